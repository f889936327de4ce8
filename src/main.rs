//! # hexo2typecho CLI (`h2t`)
//!
//! Converts a Hexo blog and its Artalk comments into SQL files that load
//! into a Typecho (MySQL/MariaDB) database.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `h2t posts` | Hexo Markdown → contents, metas and relationships inserts |
//! | `h2t comments` | Artalk SQLite → comments inserts |
//!
//! ## Examples
//!
//! ```bash
//! # Posts first: writes the SQL and the title index comments need
//! h2t posts --source ./blog/source -o typecho_import.sql
//!
//! # Then comments, attached to the posts by title
//! h2t comments --db ./artalk.db -o artalk_comments_typecho.sql
//!
//! # Options from a file, one flag overridden
//! h2t --config h2t.toml posts --truncate
//! ```
//!
//! Log verbosity follows `-v` / `-q`, or `H2T_LOG` (an `EnvFilter`
//! directive such as `hexo2typecho=debug`) when set.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use hexo2typecho::config::{self, AssetMode, CommentsConfig, MathMode, PostsConfig};
use hexo2typecho::convert;

/// Convert Hexo posts and Artalk comments into Typecho SQL import files.
#[derive(Parser)]
#[command(name = "h2t", version)]
struct Cli {
    /// Path to a TOML configuration file with `[posts]` and `[comments]`
    /// tables. Flags given on the command line take precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert Hexo Markdown posts.
    ///
    /// Writes the SQL file and a title index JSON file used later by
    /// `h2t comments`.
    Posts(PostsArgs),

    /// Convert Artalk comments.
    ///
    /// Needs the title index written by `h2t posts`.
    Comments(CommentsArgs),
}

#[derive(Args)]
struct PostsArgs {
    /// Hexo `source/_posts` directory (or `source/`).
    #[arg(long)]
    source: Option<PathBuf>,

    /// Output SQL file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Typecho table prefix.
    #[arg(long)]
    table_prefix: Option<String>,

    /// Author name for posts without one. Posts naming someone else are
    /// listed in the summary; all of them use `--author-id`.
    #[arg(long)]
    author: Option<String>,

    /// Typecho user id written to `authorId`.
    #[arg(long)]
    author_id: Option<i64>,

    /// Also convert drafts and non-public posts.
    #[arg(long)]
    include_drafts: bool,

    /// Delete existing contents, metas and relationships first.
    #[arg(long)]
    truncate: bool,

    /// First content id.
    #[arg(long)]
    cid_start: Option<i64>,

    /// First category/tag id.
    #[arg(long)]
    mid_start: Option<i64>,

    /// Rewrite relative image links (`prefix`) or leave them (`keep`).
    #[arg(long, value_enum)]
    asset_mode: Option<AssetMode>,

    /// URL prefix the asset folders are uploaded under.
    #[arg(long)]
    asset_url_prefix: Option<String>,

    /// Underscore handling inside math spans.
    #[arg(long, value_enum)]
    math_underscore_mode: Option<MathMode>,

    /// Output encoding: `utf-8` or `utf-8-sig`.
    #[arg(long)]
    encoding: Option<String>,

    /// Title index JSON file to write.
    #[arg(long)]
    title_index: Option<PathBuf>,
}

impl PostsArgs {
    fn apply(self, cfg: &mut PostsConfig) {
        if let Some(v) = self.source {
            cfg.source = v;
        }
        if let Some(v) = self.output {
            cfg.output = v;
        }
        if let Some(v) = self.table_prefix {
            cfg.table_prefix = v;
        }
        if let Some(v) = self.author {
            cfg.author = v;
        }
        if let Some(v) = self.author_id {
            cfg.author_id = v;
        }
        cfg.include_drafts |= self.include_drafts;
        cfg.truncate |= self.truncate;
        if let Some(v) = self.cid_start {
            cfg.cid_start = v;
        }
        if let Some(v) = self.mid_start {
            cfg.mid_start = v;
        }
        if let Some(v) = self.asset_mode {
            cfg.asset_mode = v;
        }
        if let Some(v) = self.asset_url_prefix {
            cfg.asset_url_prefix = v;
        }
        if let Some(v) = self.math_underscore_mode {
            cfg.math_underscore_mode = v;
        }
        if let Some(v) = self.encoding {
            cfg.encoding = v;
        }
        if let Some(v) = self.title_index {
            cfg.title_index = v;
        }
    }
}

#[derive(Args)]
struct CommentsArgs {
    /// Artalk SQLite database.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Output SQL file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Typecho table prefix.
    #[arg(long)]
    table_prefix: Option<String>,

    /// Typecho user id written to `ownerId`.
    #[arg(long)]
    owner_id: Option<i64>,

    /// First comment id.
    #[arg(long)]
    coid_start: Option<i64>,

    /// Delete existing comments first.
    #[arg(long)]
    truncate: bool,

    /// Output encoding: `utf-8` or `utf-8-sig`.
    #[arg(long)]
    encoding: Option<String>,

    /// Title index JSON file written by `h2t posts`.
    #[arg(long)]
    title_index: Option<PathBuf>,
}

impl CommentsArgs {
    fn apply(self, cfg: &mut CommentsConfig) {
        if let Some(v) = self.db {
            cfg.db = v;
        }
        if let Some(v) = self.output {
            cfg.output = v;
        }
        if let Some(v) = self.table_prefix {
            cfg.table_prefix = v;
        }
        if let Some(v) = self.owner_id {
            cfg.owner_id = v;
        }
        if let Some(v) = self.coid_start {
            cfg.coid_start = v;
        }
        cfg.truncate |= self.truncate;
        if let Some(v) = self.encoding {
            cfg.encoding = v;
        }
        if let Some(v) = self.title_index {
            cfg.title_index = v;
        }
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("H2T_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Posts(args) => {
            args.apply(&mut cfg.posts);
            cfg.posts.validate()?;
            convert::run_posts(&cfg.posts)?;
        }
        Commands::Comments(args) => {
            args.apply(&mut cfg.comments);
            cfg.comments.validate()?;
            convert::run_comments(&cfg.comments).await?;
        }
    }

    Ok(())
}
