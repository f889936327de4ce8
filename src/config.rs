//! Run configuration.
//!
//! Every option has a default, can be set in an optional TOML file passed
//! with `--config`, and can be overridden by the matching CLI flag. The
//! file has one table per command:
//!
//! ```toml
//! [posts]
//! source = "source/_posts"
//! output = "typecho_import.sql"
//! asset_url_prefix = "/usr/uploads/hexo"
//! math_underscore_mode = "escaped"
//!
//! [comments]
//! db = "artalk.db"
//! coid_start = 100
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub posts: PostsConfig,
    #[serde(default)]
    pub comments: CommentsConfig,
}

/// How relative image links are treated.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AssetMode {
    /// Leave links exactly as authored.
    Keep,
    /// Rewrite links into the post's asset folder under `asset_url_prefix`.
    Prefix,
}

/// Underscore handling inside math spans.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MathMode {
    /// No change.
    Keep,
    /// `\_` becomes `_`.
    Underscore,
    /// `_` becomes `\_`.
    Escaped,
}

/// Text encoding of generated SQL files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEncoding {
    Utf8,
    /// UTF-8 with a leading byte order mark.
    Utf8Bom,
}

impl OutputEncoding {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-8-sig" | "utf8-sig" => Ok(Self::Utf8Bom),
            other => bail!(
                "Unsupported output encoding: '{}'. Must be utf-8 or utf-8-sig.",
                other
            ),
        }
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf8Bom => {
                let mut bytes = Vec::with_capacity(text.len() + 3);
                bytes.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
                bytes.extend_from_slice(text.as_bytes());
                bytes
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostsConfig {
    #[serde(default = "default_source")]
    pub source: PathBuf,
    #[serde(default = "default_posts_output")]
    pub output: PathBuf,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default = "default_author_id")]
    pub author_id: i64,
    #[serde(default)]
    pub include_drafts: bool,
    #[serde(default)]
    pub truncate: bool,
    #[serde(default = "default_start")]
    pub cid_start: i64,
    #[serde(default = "default_start")]
    pub mid_start: i64,
    #[serde(default = "default_asset_mode")]
    pub asset_mode: AssetMode,
    #[serde(default = "default_asset_url_prefix")]
    pub asset_url_prefix: String,
    #[serde(default = "default_math_mode")]
    pub math_underscore_mode: MathMode,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_title_index")]
    pub title_index: PathBuf,
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            output: default_posts_output(),
            table_prefix: default_table_prefix(),
            author: default_author(),
            author_id: default_author_id(),
            include_drafts: false,
            truncate: false,
            cid_start: default_start(),
            mid_start: default_start(),
            asset_mode: default_asset_mode(),
            asset_url_prefix: default_asset_url_prefix(),
            math_underscore_mode: default_math_mode(),
            encoding: default_encoding(),
            title_index: default_title_index(),
        }
    }
}

impl PostsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.author_id < 1 {
            bail!("posts.author_id must be >= 1");
        }
        if self.cid_start < 1 {
            bail!("posts.cid_start must be >= 1");
        }
        if self.mid_start < 1 {
            bail!("posts.mid_start must be >= 1");
        }
        OutputEncoding::parse(&self.encoding)?;
        Ok(())
    }

    pub fn output_encoding(&self) -> Result<OutputEncoding> {
        OutputEncoding::parse(&self.encoding)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommentsConfig {
    #[serde(default = "default_db")]
    pub db: PathBuf,
    #[serde(default = "default_comments_output")]
    pub output: PathBuf,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    /// Written to `ownerId`; the author of the imported posts.
    #[serde(default = "default_author_id")]
    pub owner_id: i64,
    #[serde(default = "default_start")]
    pub coid_start: i64,
    #[serde(default)]
    pub truncate: bool,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_title_index")]
    pub title_index: PathBuf,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            db: default_db(),
            output: default_comments_output(),
            table_prefix: default_table_prefix(),
            owner_id: default_author_id(),
            coid_start: default_start(),
            truncate: false,
            encoding: default_encoding(),
            title_index: default_title_index(),
        }
    }
}

impl CommentsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.owner_id < 1 {
            bail!("comments.owner_id must be >= 1");
        }
        if self.coid_start < 1 {
            bail!("comments.coid_start must be >= 1");
        }
        OutputEncoding::parse(&self.encoding)?;
        Ok(())
    }

    pub fn output_encoding(&self) -> Result<OutputEncoding> {
        OutputEncoding::parse(&self.encoding)
    }
}

fn default_source() -> PathBuf {
    PathBuf::from("source/_posts")
}
fn default_posts_output() -> PathBuf {
    PathBuf::from("typecho_import.sql")
}
fn default_comments_output() -> PathBuf {
    PathBuf::from("artalk_comments_typecho.sql")
}
fn default_db() -> PathBuf {
    PathBuf::from("artalk.db")
}
fn default_table_prefix() -> String {
    "typecho_".to_string()
}
fn default_author() -> String {
    "admin".to_string()
}
fn default_author_id() -> i64 {
    1
}
fn default_start() -> i64 {
    1
}
fn default_asset_mode() -> AssetMode {
    AssetMode::Prefix
}
fn default_asset_url_prefix() -> String {
    "/hexo-assets".to_string()
}
fn default_math_mode() -> MathMode {
    MathMode::Keep
}
fn default_encoding() -> String {
    "utf-8".to_string()
}
fn default_title_index() -> PathBuf {
    PathBuf::from("typecho_titles.json")
}

/// Load the configuration file, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.posts.validate()?;
    config.comments.validate()?;

    Ok(config)
}
