//! Body rewriting passes.
//!
//! Two independent text transforms run over a post body, math first:
//!
//! - [`normalize_math`] changes underscore escaping inside math spans.
//! - [`rewrite_assets`] points relative image links at the uploaded
//!   asset folder.
//!
//! Both leave fenced code blocks and inline code spans byte-identical:
//! code is swapped for placeholder tokens before the pass and restored
//! afterwards.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::config::{AssetMode, MathMode};

const TOKEN_OPEN: char = '\u{E000}';
const TOKEN_CLOSE: char = '\u{E001}';

static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(!?\[[^\]\n]*\]\()([^)\n]+)(\))").expect("valid markdown link regex")
});

static HTML_IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<img\b[^>]*?\bsrc\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid img regex")
});

static HEXO_ASSET_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%\s*(asset_img|asset_link|asset_path)\s+(\S+)(?:\s+([^%]*?))?\s*%\}")
        .expect("valid asset tag regex")
});

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").expect("valid scheme regex"));

static TIMESTAMP_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_[0-9]{8}_[0-9]{6}$").expect("valid suffix regex"));

/// Result of the body passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub text: String,
    /// Number of asset links rewritten.
    pub rewritten: usize,
    /// Relative images were found but the post has no asset folder.
    pub unresolved_relative: bool,
}

/// Settings for [`rewrite_assets`].
#[derive(Debug, Clone, Copy)]
pub struct AssetRewrite<'a> {
    pub mode: AssetMode,
    pub url_prefix: &'a str,
    pub asset_dir: Option<&'a str>,
}

/// Run both passes in order: math normalization, then asset rewriting.
pub fn rewrite_body(body: &str, math: MathMode, assets: AssetRewrite<'_>) -> RewriteOutcome {
    let normalized = normalize_math(body, math);
    rewrite_assets(&normalized, assets)
}

// ═══════════════════════════════════════════════════════════════════════
// Code protection
// ═══════════════════════════════════════════════════════════════════════

/// Text with its code replaced by placeholder tokens.
struct Masked {
    text: String,
    code: Vec<String>,
}

impl Masked {
    fn token(&mut self, raw: String) -> String {
        let token = format!("{TOKEN_OPEN}{}{TOKEN_CLOSE}", self.code.len());
        self.code.push(raw);
        token
    }

    /// Put the original code back into `text`.
    fn restore(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(TOKEN_OPEN) {
            out.push_str(&rest[..start]);
            let after = &rest[start + TOKEN_OPEN.len_utf8()..];
            let restored = after.find(TOKEN_CLOSE).and_then(|end| {
                let index: usize = after[..end].parse().ok()?;
                let raw = self.code.get(index)?;
                Some((raw, end))
            });
            match restored {
                Some((raw, end)) => {
                    // Inline spans may enclose an earlier fence token.
                    out.push_str(&self.restore(raw));
                    rest = &after[end + TOKEN_CLOSE.len_utf8()..];
                }
                None => {
                    out.push(TOKEN_OPEN);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn mask_code(text: &str) -> Masked {
    let mut masked = Masked {
        text: String::new(),
        code: Vec::new(),
    };
    let fenced = mask_fences(text, &mut masked);
    masked.text = mask_inline_code(&fenced, &mut masked);
    masked
}

/// Replace closed ``` / ~~~ fences. An unclosed fence stays as text.
fn mask_fences(text: &str, masked: &mut Masked) -> String {
    let mut out = String::with_capacity(text.len());
    let mut fence: Option<(char, usize)> = None;
    let mut buffer = String::new();

    for line in text.split_inclusive('\n') {
        let stripped = line.trim_start_matches([' ', '\t']);
        match fence {
            None => match fence_marker(stripped) {
                Some(marker) => {
                    fence = Some(marker);
                    buffer.push_str(line);
                }
                None => out.push_str(line),
            },
            Some((ch, len)) => {
                buffer.push_str(line);
                let run = stripped.chars().take_while(|c| *c == ch).count();
                if run >= len && stripped[run * ch.len_utf8()..].trim().is_empty() {
                    let token = masked.token(std::mem::take(&mut buffer));
                    out.push_str(&token);
                    fence = None;
                }
            }
        }
    }
    out.push_str(&buffer);
    out
}

fn fence_marker(line: &str) -> Option<(char, usize)> {
    let ch = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = line.chars().take_while(|c| *c == ch).count();
    (len >= 3).then_some((ch, len))
}

/// Replace inline code spans delimited by equal-length backtick runs.
fn mask_inline_code(text: &str, masked: &mut Masked) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut last = 0;

    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run = backtick_run(bytes, i);
        match find_closing_run(bytes, i + run, run) {
            Some(close) => {
                out.push_str(&text[last..i]);
                let token = masked.token(text[i..close + run].to_string());
                out.push_str(&token);
                i = close + run;
                last = i;
            }
            None => i += run,
        }
    }
    out.push_str(&text[last..]);
    out
}

fn backtick_run(bytes: &[u8], start: usize) -> usize {
    bytes[start..].iter().take_while(|b| **b == b'`').count()
}

fn find_closing_run(bytes: &[u8], from: usize, len: usize) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() {
        if bytes[j] == b'`' {
            let run = backtick_run(bytes, j);
            if run == len {
                return Some(j);
            }
            j += run;
        } else {
            j += 1;
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════
// Math
// ═══════════════════════════════════════════════════════════════════════

/// Normalize underscores inside `$$…$$`, `\[…\]`, `\(…\)` and `$…$`.
///
/// Idempotent for every mode. Text outside math spans and all code is
/// left untouched.
pub fn normalize_math(markdown: &str, mode: MathMode) -> String {
    if mode == MathMode::Keep || markdown.is_empty() {
        return markdown.to_string();
    }

    let masked = mask_code(markdown);
    let text = masked.text.as_str();
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut last = 0;

    while i < bytes.len() {
        let span = match bytes[i] {
            b'$' if !is_escaped(bytes, i) => {
                if bytes.get(i + 1) == Some(&b'$') {
                    find_unescaped(bytes, i + 2, b"$$").map(|end| (i + 2, end, end + 2))
                } else {
                    find_inline_dollar(bytes, i + 1).map(|end| (i + 1, end, end + 1))
                }
            }
            b'\\' if !is_escaped(bytes, i) => match bytes.get(i + 1) {
                Some(b'[') => find_unescaped(bytes, i + 2, b"\\]").map(|end| (i + 2, end, end + 2)),
                Some(b'(') => find_unescaped(bytes, i + 2, b"\\)").map(|end| (i + 2, end, end + 2)),
                _ => None,
            },
            _ => None,
        };

        match span {
            Some((inner_start, inner_end, next)) => {
                out.push_str(&text[last..inner_start]);
                out.push_str(&convert_underscores(&text[inner_start..inner_end], mode));
                out.push_str(&text[inner_end..next]);
                i = next;
                last = next;
            }
            None => i += 1,
        }
    }
    out.push_str(&text[last..]);

    masked.restore(&out)
}

fn is_escaped(bytes: &[u8], index: usize) -> bool {
    bytes[..index]
        .iter()
        .rev()
        .take_while(|b| **b == b'\\')
        .count()
        % 2
        == 1
}

fn find_unescaped(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    (from..bytes.len().saturating_sub(needle.len() - 1))
        .find(|&j| bytes[j..].starts_with(needle) && !is_escaped(bytes, j))
}

/// Closing `$` of a single-line inline span; the span must be non-empty.
fn find_inline_dollar(bytes: &[u8], from: usize) -> Option<usize> {
    if matches!(bytes.get(from), None | Some(b'$') | Some(b'\n')) {
        return None;
    }
    (from + 1..bytes.len())
        .take_while(|&j| bytes[j - 1] != b'\n')
        .find(|&j| bytes[j] == b'$' && !is_escaped(bytes, j))
        .filter(|&j| !bytes[from..j].contains(&b'\n'))
}

fn convert_underscores(segment: &str, mode: MathMode) -> String {
    let bytes = segment.as_bytes();
    let mut out = String::with_capacity(segment.len() + 8);
    let mut last = 0;

    for (i, b) in bytes.iter().enumerate() {
        match mode {
            MathMode::Escaped if *b == b'_' && !is_escaped(bytes, i) => {
                out.push_str(&segment[last..i]);
                out.push_str("\\_");
                last = i + 1;
            }
            MathMode::Underscore
                if *b == b'\\' && bytes.get(i + 1) == Some(&b'_') && !is_escaped(bytes, i) =>
            {
                out.push_str(&segment[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }
    out.push_str(&segment[last..]);
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Asset links
// ═══════════════════════════════════════════════════════════════════════

/// Rewrite relative asset references to `{prefix}/{asset_dir}/{path}`.
///
/// Covers Markdown images, HTML `<img src>`, Markdown links that name the
/// asset folder explicitly, and Hexo `{% asset_img %}` / `{% asset_link %}`
/// / `{% asset_path %}` tags. Scheme-qualified, root-relative and `../`
/// URLs are never changed.
pub fn rewrite_assets(markdown: &str, opts: AssetRewrite<'_>) -> RewriteOutcome {
    let unchanged = |unresolved_relative| RewriteOutcome {
        text: markdown.to_string(),
        rewritten: 0,
        unresolved_relative,
    };

    if opts.mode != AssetMode::Prefix {
        return unchanged(false);
    }
    let masked = mask_code(markdown);
    let Some(asset_dir) = opts.asset_dir else {
        return unchanged(has_relative_images(&masked.text));
    };

    let prefix = opts.url_prefix;
    let mut rewritten = 0;

    let text = MARKDOWN_LINK.replace_all(&masked.text, |caps: &Captures| {
        let head = &caps[1];
        let (url, tail, wrapped) = split_markdown_target(&caps[2]);
        let is_image = head.starts_with('!');
        let in_asset_dir = url
            .split('/')
            .find(|seg| !seg.is_empty() && *seg != ".")
            .is_some_and(|first| asset_match_key(first) == asset_match_key(asset_dir));

        let target = if is_image || in_asset_dir {
            rewrite_relative_url(url, asset_dir, prefix)
        } else {
            None
        };
        match target {
            Some(new_url) => {
                rewritten += 1;
                let target = if wrapped {
                    format!("<{new_url}>{tail}")
                } else {
                    format!("{new_url}{tail}")
                };
                format!("{head}{target}{}", &caps[3])
            }
            None => caps[0].to_string(),
        }
    });

    let text = HTML_IMG_SRC.replace_all(&text, |caps: &Captures| {
        let (url, quote) = match (caps.get(2), caps.get(3)) {
            (Some(m), _) => (m.as_str(), '"'),
            (None, Some(m)) => (m.as_str(), '\''),
            (None, None) => return caps[0].to_string(),
        };
        match rewrite_relative_url(url, asset_dir, prefix) {
            Some(new_url) => {
                rewritten += 1;
                format!("{}{quote}{new_url}{quote}", &caps[1])
            }
            None => caps[0].to_string(),
        }
    });

    let text = HEXO_ASSET_TAG.replace_all(&text, |caps: &Captures| {
        let name = caps[2].trim_matches(['"', '\'']);
        let Some(url) = rewrite_relative_url(name, asset_dir, prefix) else {
            return caps[0].to_string();
        };
        rewritten += 1;
        let title = caps
            .get(3)
            .map(|m| m.as_str().trim().trim_matches(['"', '\'']).to_string())
            .filter(|t| !t.is_empty());
        match &caps[1] {
            "asset_img" => format!("![{}]({url})", title.unwrap_or_default()),
            "asset_link" => format!("[{}]({url})", title.unwrap_or_else(|| name.to_string())),
            _ => url,
        }
    });

    RewriteOutcome {
        text: masked.restore(&text),
        rewritten,
        unresolved_relative: false,
    }
}

fn has_relative_images(text: &str) -> bool {
    let markdown = MARKDOWN_LINK.captures_iter(text).any(|caps| {
        caps[1].starts_with('!') && is_relative_url(split_markdown_target(&caps[2]).0)
    });
    markdown
        || HTML_IMG_SRC.captures_iter(text).any(|caps| {
            caps.get(2)
                .or_else(|| caps.get(3))
                .is_some_and(|m| is_relative_url(m.as_str()))
        })
        || HEXO_ASSET_TAG.is_match(text)
}

/// Split `url "title"` or `<url> "title"` into (url, tail, wrapped).
fn split_markdown_target(raw: &str) -> (&str, &str, bool) {
    let text = raw.trim();
    if let Some(inner) = text.strip_prefix('<') {
        if let Some(close) = inner.find('>') {
            return (inner[..close].trim(), &inner[close + 1..], true);
        }
    }
    match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], &text[idx..], false),
        None => (text, "", false),
    }
}

/// True for URLs that resolve against the post's own location.
pub fn is_relative_url(url: &str) -> bool {
    let target = url.trim();
    !target.is_empty()
        && !target.starts_with(['/', '#'])
        && !URL_SCHEME.is_match(target)
}

/// Key used to match a path segment or file stem to an asset folder:
/// lowercase alphanumerics only, with a trailing `_YYYYMMDD_HHMMSS`
/// export stamp removed.
pub fn asset_match_key(name: &str) -> String {
    TIMESTAMP_SUFFIX
        .replace(name, "")
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

fn rewrite_relative_url(url: &str, asset_dir: &str, prefix: &str) -> Option<String> {
    if !is_relative_url(url) {
        return None;
    }
    let url = url.trim();
    let split = url.find(['?', '#']).unwrap_or(url.len());
    let (path, suffix) = url.split_at(split);

    let normalized = path.replace('\\', "/");
    let mut path = normalized.as_str();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }

    let segments: Vec<String> = path
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .map(|seg| {
            urlencoding::decode(seg)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| seg.to_string())
        })
        .collect();
    if segments.is_empty() || segments.iter().any(|seg| seg == "..") {
        return None;
    }

    let mut target = Vec::with_capacity(segments.len() + 1);
    if asset_match_key(&segments[0]) != asset_match_key(asset_dir) {
        target.push(asset_dir.to_string());
    }
    target.extend(segments);

    Some(format!("{}{suffix}", join_url_prefix(prefix, &target)))
}

fn join_url_prefix(prefix: &str, segments: &[String]) -> String {
    let path = encode_segments(segments.iter().map(String::as_str));
    let clean = prefix.trim();

    if clean.contains("://") || clean.starts_with("//") {
        let base = clean.trim_end_matches('/');
        return if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        };
    }

    let joined = encode_segments(clean.split('/').chain(segments.iter().map(String::as_str)));
    if clean.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

fn encode_segments<'a>(segments: impl Iterator<Item = &'a str>) -> String {
    segments
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(asset_dir: Option<&str>) -> AssetRewrite<'_> {
        AssetRewrite {
            mode: AssetMode::Prefix,
            url_prefix: "/hexo-assets",
            asset_dir,
        }
    }

    #[test]
    fn test_masking_round_trip() {
        let text = "a `x_1` b\n```\ncode_$x$\n```\nc ``y ` z`` d\n~~~~\nunclosed";
        let masked = mask_code(text);
        assert!(!masked.text.contains("code_"));
        assert!(masked.text.contains("unclosed"));
        assert_eq!(masked.restore(&masked.text), text);
    }

    #[test]
    fn test_escape_math() {
        let text = "Inline $a_1 + b\\_2$ and text_with_underscore.\n\n$$\nx_{i}\n$$";
        let out = normalize_math(text, MathMode::Escaped);
        assert_eq!(
            out,
            "Inline $a\\_1 + b\\_2$ and text_with_underscore.\n\n$$\nx\\_{i}\n$$"
        );
    }

    #[test]
    fn test_unescape_math() {
        let text = "\\(a\\_b\\) and \\[c\\_d\\] but not e\\_f";
        let out = normalize_math(text, MathMode::Underscore);
        assert_eq!(out, "\\(a_b\\) and \\[c_d\\] but not e\\_f");
    }

    #[test]
    fn test_math_idempotent() {
        let text = "Mix $a_b\\_c$ with $$\\\\_x$$ and `$code_x$` plus \\$not_math\\$ $5 and $10";
        for mode in [MathMode::Keep, MathMode::Underscore, MathMode::Escaped] {
            let once = normalize_math(text, mode);
            assert_eq!(normalize_math(&once, mode), once, "mode {mode:?}");
        }
    }

    #[test]
    fn test_math_skips_code() {
        let text = "```\n$a_b$\n```\nand `$c_d$` then $e_f$";
        let out = normalize_math(text, MathMode::Escaped);
        assert_eq!(out, "```\n$a_b$\n```\nand `$c_d$` then $e\\_f$");
    }

    #[test]
    fn test_escaped_dollar_is_not_math() {
        let text = "costs \\$a_b\\$ today";
        assert_eq!(normalize_math(text, MathMode::Escaped), text);
    }

    #[test]
    fn test_rewrite_markdown_images() {
        let text = "![a](img.png) ![b](./sub/pic.jpg \"T\") ![c](my-post/x.png?v=1)";
        let out = rewrite_assets(text, prefix(Some("my-post")));
        assert_eq!(
            out.text,
            "![a](/hexo-assets/my-post/img.png) ![b](/hexo-assets/my-post/sub/pic.jpg \"T\") ![c](/hexo-assets/my-post/x.png?v=1)"
        );
        assert_eq!(out.rewritten, 3);
    }

    #[test]
    fn test_rewrite_encodes_segments() {
        let out = rewrite_assets("![a](<图 1.png>)", prefix(Some("post")));
        assert_eq!(out.text, "![a](</hexo-assets/post/%E5%9B%BE%201.png>)");
    }

    #[test]
    fn test_absolute_urls_untouched() {
        let text = "![a](https://cdn.example.com/x.png) ![b](/static/y.png) ![c](../up.png) \
                    <img src=\"data:image/png;base64,AAA\"> [l](mailto:a@b.c)";
        let out = rewrite_assets(text, prefix(Some("post")));
        assert_eq!(out.text, text);
        assert_eq!(out.rewritten, 0);
    }

    #[test]
    fn test_rewrite_html_and_tags() {
        let text = "<img src='a.png' width=10> {% asset_img b.png \"Title\" %} {% asset_link doc.pdf %}";
        let out = rewrite_assets(text, prefix(Some("post")));
        assert_eq!(
            out.text,
            "<img src='/hexo-assets/post/a.png' width=10> ![Title](/hexo-assets/post/b.png) [doc.pdf](/hexo-assets/post/doc.pdf)"
        );
        assert_eq!(out.rewritten, 3);
    }

    #[test]
    fn test_plain_links_need_asset_folder() {
        let text = "[other](other-post.html) [file](post/file.zip)";
        let out = rewrite_assets(text, prefix(Some("post")));
        assert_eq!(out.text, "[other](other-post.html) [file](/hexo-assets/post/file.zip)");
    }

    #[test]
    fn test_code_is_not_rewritten() {
        let text = "`![a](img.png)`\n```\n![b](img.png)\n```\n![c](img.png)";
        let out = rewrite_assets(text, prefix(Some("p")));
        assert_eq!(out.text, "`![a](img.png)`\n```\n![b](img.png)\n```\n![c](/hexo-assets/p/img.png)");
    }

    #[test]
    fn test_keep_mode_and_missing_folder() {
        let text = "![a](img.png)";
        let keep = AssetRewrite {
            mode: AssetMode::Keep,
            url_prefix: "/x",
            asset_dir: Some("p"),
        };
        assert_eq!(rewrite_assets(text, keep).text, text);

        let out = rewrite_assets(text, prefix(None));
        assert_eq!(out.text, text);
        assert!(out.unresolved_relative);
    }

    #[test]
    fn test_scheme_prefix() {
        let opts = AssetRewrite {
            mode: AssetMode::Prefix,
            url_prefix: "https://cdn.example.com/assets/",
            asset_dir: Some("p"),
        };
        let out = rewrite_assets("![a](img.png)", opts);
        assert_eq!(out.text, "![a](https://cdn.example.com/assets/p/img.png)");
    }

    #[test]
    fn test_asset_match_key() {
        assert_eq!(asset_match_key("My_Post_20240101_120000"), "mypost");
        assert_eq!(asset_match_key("my-post"), "mypost");
    }
}
