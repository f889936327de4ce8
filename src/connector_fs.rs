//! Hexo source discovery.
//!
//! Walks the posts directory (and `_drafts` when drafts are wanted),
//! collecting Markdown files as [`RawDocument`]s with their asset folder
//! already matched.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::RawDocument;
use crate::rewrite::asset_match_key;

const INCLUDE_GLOBS: &[&str] = &["**/*.md", "**/*.markdown"];
const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/node_modules/**"];

/// The directory holding the posts. Pointing at a Hexo `source/` folder
/// with no Markdown of its own selects its `_posts`.
pub fn resolve_source_dir(source: &Path) -> Result<PathBuf> {
    if !source.is_dir() {
        bail!("Source directory does not exist: {}", source.display());
    }

    let posts = source.join("_posts");
    let is_posts_dir = source
        .file_name()
        .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case("_posts"));
    if !is_posts_dir && posts.is_dir() && !has_top_level_markdown(source)? {
        tracing::info!(path = %posts.display(), "using _posts under source directory");
        return Ok(posts);
    }
    Ok(source.to_path_buf())
}

fn has_top_level_markdown(dir: &Path) -> Result<bool> {
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_markdown(&path) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e == "md" || e == "markdown")
}

/// Every Markdown document under `posts_dir`, plus the sibling `_drafts`
/// folder when `include_drafts` is set. Sorted by path.
pub fn scan_posts(posts_dir: &Path, include_drafts: bool) -> Result<Vec<RawDocument>> {
    let mut docs = scan_root(posts_dir, false)?;

    if include_drafts {
        let drafts = posts_dir.parent().map(|p| p.join("_drafts"));
        if let Some(drafts) = drafts.filter(|d| d.is_dir() && d != posts_dir) {
            tracing::info!(path = %drafts.display(), "including drafts");
            docs.extend(scan_root(&drafts, true)?);
        }
    }

    docs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(docs)
}

fn scan_root(root: &Path, in_drafts: bool) -> Result<Vec<RawDocument>> {
    let include_set = build_globset(INCLUDE_GLOBS)?;
    let exclude_set = build_globset(EXCLUDE_GLOBS)?;
    let asset_dirs = list_asset_dirs(root)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let under_drafts = in_drafts || relative.components().any(|c| c.as_os_str() == "_drafts");
        docs.push(read_document(path, root, &asset_dirs, under_drafts)?);
    }
    tracing::debug!(root = %root.display(), count = docs.len(), "scanned");
    Ok(docs)
}

fn list_asset_dirs(root: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("Failed to list {}", root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.insert(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}

fn read_document(
    path: &Path,
    root: &Path,
    asset_dirs: &BTreeSet<String>,
    in_drafts: bool,
) -> Result<RawDocument> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(path = %path.display(), "not valid UTF-8, replacing invalid bytes");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    };

    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);

    Ok(RawDocument {
        path: path.to_path_buf(),
        stem: default_post_stem(path, root),
        text,
        modified,
        asset_dir: resolve_asset_dir(path, root, asset_dirs),
        in_drafts,
    })
}

/// File stem, or the folder name for `index.md` / `README.md` below the root.
pub fn default_post_stem(path: &Path, root: &Path) -> String {
    let stem = file_stem(path);
    let nested = path.parent().is_some_and(|p| p != root);
    if nested && matches!(stem.to_lowercase().as_str(), "index" | "readme") {
        if let Some(name) = path.parent().and_then(Path::file_name) {
            return name.to_string_lossy().to_string();
        }
    }
    stem
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// The asset folder for a post.
///
/// A post inside a folder owns that folder. A top-level post matches, in
/// order: a folder named exactly like its stem, the only `{stem}_*` folder,
/// the only folder with the same [`asset_match_key`], then the first of
/// either ambiguous set.
pub fn resolve_asset_dir(path: &Path, root: &Path, asset_dirs: &BTreeSet<String>) -> Option<String> {
    let parent = path.parent()?;
    if parent != root {
        return parent.file_name().map(|n| n.to_string_lossy().to_string());
    }

    let stem = file_stem(path);
    if asset_dirs.contains(&stem) {
        return Some(stem);
    }

    let prefixed = format!("{stem}_");
    let prefix_matches: Vec<&String> = asset_dirs
        .iter()
        .filter(|name| name.starts_with(&prefixed))
        .collect();
    if let [only] = prefix_matches.as_slice() {
        return Some((*only).clone());
    }

    let key = asset_match_key(&stem);
    let key_matches: Vec<&String> = if key.is_empty() {
        Vec::new()
    } else {
        asset_dirs
            .iter()
            .filter(|name| asset_match_key(name) == key)
            .collect()
    };
    if let [only] = key_matches.as_slice() {
        return Some((*only).clone());
    }

    prefix_matches
        .first()
        .or_else(|| key_matches.first())
        .map(|name| (*name).clone())
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_asset_dir_rules() {
        let root = Path::new("/blog/_posts");
        let dirs = names(&["hello", "trip_20230101_120000", "My-Notes", "a_1", "a_2"]);

        let find = |file: &str| resolve_asset_dir(&root.join(file), root, &dirs);
        assert_eq!(find("hello.md").as_deref(), Some("hello"));
        assert_eq!(find("trip.md").as_deref(), Some("trip_20230101_120000"));
        assert_eq!(find("my notes.md").as_deref(), Some("My-Notes"));
        assert_eq!(find("a.md").as_deref(), Some("a_1"));
        assert_eq!(find("other.md"), None);
        assert_eq!(
            resolve_asset_dir(&root.join("deep/index.md"), root, &dirs).as_deref(),
            Some("deep")
        );
    }

    #[test]
    fn test_default_post_stem() {
        let root = Path::new("/blog/_posts");
        assert_eq!(default_post_stem(&root.join("Hello World.md"), root), "Hello World");
        assert_eq!(default_post_stem(&root.join("trip/index.md"), root), "trip");
        assert_eq!(default_post_stem(&root.join("trip/README.md"), root), "trip");
        assert_eq!(default_post_stem(&root.join("index.md"), root), "index");
    }

    #[test]
    fn test_source_root_auto_targets_posts() {
        let dir = TempDir::new().unwrap();
        let posts = dir.path().join("_posts");
        fs::create_dir_all(&posts).unwrap();
        fs::write(posts.join("a.md"), "# a").unwrap();

        assert_eq!(resolve_source_dir(dir.path()).unwrap(), posts);

        fs::write(dir.path().join("about.md"), "# about").unwrap();
        assert_eq!(resolve_source_dir(dir.path()).unwrap(), dir.path());

        assert!(resolve_source_dir(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_scan_with_drafts_and_excludes() {
        let dir = TempDir::new().unwrap();
        let posts = dir.path().join("_posts");
        let drafts = dir.path().join("_drafts");
        fs::create_dir_all(posts.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(posts.join("hello")).unwrap();
        fs::create_dir_all(&drafts).unwrap();
        fs::write(posts.join("hello.md"), "hi").unwrap();
        fs::write(posts.join("hello/pic.png"), "png").unwrap();
        fs::write(posts.join("notes.markdown"), "notes").unwrap();
        fs::write(posts.join("node_modules/pkg/README.md"), "skip").unwrap();
        fs::write(drafts.join("wip.md"), "wip").unwrap();

        let docs = scan_posts(&posts, false).unwrap();
        let stems: Vec<_> = docs.iter().map(|d| d.stem.as_str()).collect();
        assert_eq!(stems, vec!["hello", "notes"]);
        assert_eq!(docs[0].asset_dir.as_deref(), Some("hello"));
        assert!(docs[0].modified.is_some());
        assert!(docs.iter().all(|d| !d.in_drafts));

        let docs = scan_posts(&posts, true).unwrap();
        let wip = docs.iter().find(|d| d.stem == "wip").unwrap();
        assert!(wip.in_drafts);
        assert_eq!(docs.len(), 3);
    }
}
