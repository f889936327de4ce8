//! Front matter extraction.
//!
//! A Hexo post starts with a YAML block between two `---` lines:
//!
//! ```markdown
//! ---
//! title: Hello World
//! date: 2021-03-04 10:20:30
//! tags: [rust, web]
//! categories:
//!   - Notes
//! ---
//!
//! Body text.
//! ```
//!
//! Parsing goes through the [`FrontMatterParser`] trait. [`YamlParser`]
//! (behind the `yaml` feature) understands full YAML; [`SimpleParser`]
//! understands only the shapes Hexo writes (scalars, flow lists, block
//! lists) and drops anything else instead of guessing. [`default_parser`]
//! chains the two.

use anyhow::Result;
use std::collections::BTreeMap;

const BOUNDARY: &str = "---";

/// A front matter value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Scalar rendered as text. Null, lists and maps have no text form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            MetaValue::Str(s) => Some(s.clone()),
            MetaValue::Int(i) => Some(i.to_string()),
            MetaValue::Float(f) => Some(f.to_string()),
            MetaValue::Bool(b) => Some(b.to_string()),
            MetaValue::Null | MetaValue::List(_) | MetaValue::Map(_) => None,
        }
    }
}

/// Parsed front matter fields, keyed case-sensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: BTreeMap<String, MetaValue>,
}

impl Metadata {
    pub fn insert(&mut self, key: impl Into<String>, value: MetaValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.fields.get(key)
    }

    /// Trimmed, non-empty text of a scalar field.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(MetaValue::as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn remove(&mut self, key: &str) {
        self.fields.remove(key);
    }
}

/// Parses the text between the front matter delimiters.
pub trait FrontMatterParser {
    fn name(&self) -> &'static str;

    /// Parse a front matter block (delimiters already removed).
    fn parse(&self, block: &str) -> Result<Metadata>;
}

/// Split a document into front matter and body.
///
/// Never fails: a missing or unterminated block gives empty metadata and
/// the whole text as body; a block that does not parse gives empty
/// metadata and the text after the block.
pub fn split_front_matter(text: &str, parser: &dyn FrontMatterParser) -> (Metadata, String) {
    let normalized = text
        .trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();

    if lines.first().map(|l| l.trim()) != Some(BOUNDARY) {
        return (Metadata::default(), normalized);
    }

    let Some(end) = lines
        .iter()
        .skip(1)
        .position(|l| l.trim() == BOUNDARY)
        .map(|i| i + 1)
    else {
        return (Metadata::default(), normalized);
    };

    let block = lines[1..end].join("\n");
    let body = lines[end + 1..].join("\n").trim_start_matches('\n').to_string();

    match parser.parse(&block) {
        Ok(metadata) => (metadata, body),
        Err(e) => {
            tracing::warn!(parser = parser.name(), "ignoring unparsable front matter: {e}");
            (Metadata::default(), body)
        }
    }
}

/// The parser used by the pipeline: YAML when compiled in, with the
/// restricted parser as fallback for blocks YAML rejects.
pub fn default_parser() -> Box<dyn FrontMatterParser> {
    Box::new(FallbackChain::new())
}

pub struct FallbackChain {
    primary: Option<Box<dyn FrontMatterParser>>,
    fallback: SimpleParser,
}

impl FallbackChain {
    pub fn new() -> Self {
        #[cfg(feature = "yaml")]
        let primary: Option<Box<dyn FrontMatterParser>> = Some(Box::new(YamlParser));
        #[cfg(not(feature = "yaml"))]
        let primary: Option<Box<dyn FrontMatterParser>> = None;

        Self {
            primary,
            fallback: SimpleParser,
        }
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FrontMatterParser for FallbackChain {
    fn name(&self) -> &'static str {
        match &self.primary {
            Some(p) => p.name(),
            None => self.fallback.name(),
        }
    }

    fn parse(&self, block: &str) -> Result<Metadata> {
        if let Some(primary) = &self.primary {
            match primary.parse(block) {
                Ok(metadata) => return Ok(metadata),
                Err(e) => {
                    tracing::debug!("{} rejected front matter, falling back: {e}", primary.name())
                }
            }
        }
        self.fallback.parse(block)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// YAML
// ═══════════════════════════════════════════════════════════════════════

#[cfg(feature = "yaml")]
pub struct YamlParser;

#[cfg(feature = "yaml")]
impl FrontMatterParser for YamlParser {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn parse(&self, block: &str) -> Result<Metadata> {
        let value: serde_yaml::Value = serde_yaml::from_str(block)?;
        match value {
            serde_yaml::Value::Null => Ok(Metadata::default()),
            serde_yaml::Value::Mapping(map) => {
                let mut metadata = Metadata::default();
                for (key, value) in map {
                    if let Some(key) = yaml_key(&key) {
                        metadata.insert(key, from_yaml(value));
                    }
                }
                Ok(metadata)
            }
            _ => anyhow::bail!("front matter is not a mapping"),
        }
    }
}

#[cfg(feature = "yaml")]
fn yaml_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(feature = "yaml")]
fn from_yaml(value: serde_yaml::Value) -> MetaValue {
    use serde_yaml::Value;

    match value {
        Value::Null => MetaValue::Null,
        Value::Bool(b) => MetaValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => MetaValue::Int(i),
            None => MetaValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => MetaValue::Str(s),
        Value::Sequence(items) => MetaValue::List(items.into_iter().map(from_yaml).collect()),
        Value::Mapping(map) => MetaValue::Map(
            map.into_iter()
                .filter_map(|(k, v)| yaml_key(&k).map(|k| (k, from_yaml(v))))
                .collect(),
        ),
        Value::Tagged(tagged) => from_yaml(tagged.value),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Restricted line parser
// ═══════════════════════════════════════════════════════════════════════

/// Line-oriented parser for the subset of YAML that Hexo front matter
/// uses: `key: scalar`, `key: [a, b]`, and `key:` followed by `- item`
/// lines. Keys whose value uses anything else are dropped.
pub struct SimpleParser;

enum ListState {
    Idle,
    /// Saw `key:` with no value; `- item` lines append to it.
    Open(String),
    /// The current key was dropped; skip its indented continuation.
    Skipping,
}

impl FrontMatterParser for SimpleParser {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn parse(&self, block: &str) -> Result<Metadata> {
        let mut metadata = Metadata::default();
        let mut state = ListState::Idle;

        for line in block.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let indented = line.starts_with([' ', '\t']);

            if let Some(item) = list_item(trimmed) {
                if let ListState::Open(key) = &state {
                    match parse_item(item) {
                        Some(value) => {
                            let entry = metadata
                                .fields
                                .entry(key.clone())
                                .or_insert(MetaValue::Null);
                            match entry {
                                MetaValue::List(items) => items.push(value),
                                _ => *entry = MetaValue::List(vec![value]),
                            }
                        }
                        None => {
                            metadata.remove(key);
                            state = ListState::Skipping;
                        }
                    }
                }
                continue;
            }

            if indented {
                // Nested mapping or continuation line: not supported.
                if let ListState::Open(key) = &state {
                    metadata.remove(key);
                    state = ListState::Skipping;
                }
                continue;
            }

            let Some((key, raw)) = key_value(trimmed) else {
                state = ListState::Idle;
                continue;
            };

            if raw.is_empty() || raw.starts_with('#') {
                metadata.insert(key, MetaValue::Null);
                state = ListState::Open(key.to_string());
                continue;
            }

            match parse_value(raw) {
                Some(value) => {
                    metadata.insert(key, value);
                    state = ListState::Idle;
                }
                None => {
                    metadata.remove(key);
                    state = ListState::Skipping;
                }
            }
        }

        Ok(metadata)
    }
}

fn list_item(trimmed: &str) -> Option<&str> {
    if trimmed == "-" {
        return Some("");
    }
    trimmed.strip_prefix("- ").map(str::trim)
}

/// Split `key: value`. The colon must be followed by whitespace or end
/// the line, and the key must be a plain identifier.
fn key_value(line: &str) -> Option<(&str, &str)> {
    let mut search = 0;
    while let Some(offset) = line[search..].find(':') {
        let idx = search + offset;
        let rest = &line[idx + 1..];
        if rest.is_empty() || rest.starts_with([' ', '\t']) {
            let key = line[..idx].trim_end();
            let valid = !key.is_empty()
                && key
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_')
                && key
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '));
            return valid.then(|| (key, rest.trim()));
        }
        search = idx + 1;
    }
    None
}

/// Parse a value in flow position. `None` means unsupported syntax.
fn parse_value(raw: &str) -> Option<MetaValue> {
    let text = raw.trim();
    if text.is_empty() {
        return Some(MetaValue::Null);
    }

    match text.chars().next() {
        Some('"') => {
            let (value, rest) = double_quoted(text)?;
            trailing_comment_only(rest).then_some(MetaValue::Str(value))
        }
        Some('\'') => {
            let (value, rest) = single_quoted(text)?;
            trailing_comment_only(rest).then_some(MetaValue::Str(value))
        }
        Some('[') => {
            let text = strip_comment(text);
            let inner = text.strip_prefix('[')?.strip_suffix(']')?;
            flow_items(inner)?
                .into_iter()
                .map(parse_item)
                .collect::<Option<Vec<_>>>()
                .map(MetaValue::List)
        }
        Some('#') => Some(MetaValue::Null),
        Some('{' | '|' | '>' | '&' | '*' | '!' | '%' | '@' | '`') => None,
        _ => Some(plain_scalar(strip_comment(text))),
    }
}

/// A list item. Unquoted `key: value` items are nested mappings, which
/// are unsupported.
fn parse_item(raw: &str) -> Option<MetaValue> {
    let text = raw.trim();
    if !text.starts_with(['"', '\'', '[']) && key_value(strip_comment(text)).is_some() {
        return None;
    }
    parse_value(text)
}

fn plain_scalar(text: &str) -> MetaValue {
    match text {
        "~" | "null" | "Null" | "NULL" => return MetaValue::Null,
        "true" | "True" | "TRUE" => return MetaValue::Bool(true),
        "false" | "False" | "FALSE" => return MetaValue::Bool(false),
        _ => {}
    }

    if let Some(i) = parse_int(text) {
        return MetaValue::Int(i);
    }
    if !leading_zero_digits(text) {
        if let Some(f) = parse_float(text) {
            return MetaValue::Float(f);
        }
    }
    MetaValue::Str(text.to_string())
}

/// YAML 1.2 core integers: decimal, `0x`, `0o` and `0b`, optionally signed.
fn parse_int(text: &str) -> Option<i64> {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| unsigned.strip_prefix(prefix).map(|d| (radix, d)))
        .unwrap_or((10, unsigned));

    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    if radix == 10 && leading_zero_digits(text) {
        return None;
    }
    i64::from_str_radix(digits, radix).ok().map(|v| sign * v)
}

/// YAML 1.2 core floats, including `.inf` and `.nan`.
fn parse_float(text: &str) -> Option<f64> {
    let unsigned = match text.strip_prefix('+') {
        Some(rest) if rest.starts_with(['+', '-']) => return None,
        Some(rest) => rest,
        None => text,
    };
    match unsigned {
        ".inf" | ".Inf" | ".INF" => return Some(f64::INFINITY),
        "-.inf" | "-.Inf" | "-.INF" => return Some(f64::NEG_INFINITY),
        ".nan" | ".NaN" | ".NAN" => return Some(f64::NAN),
        _ => {}
    }
    unsigned.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// `007`-style values are strings in YAML 1.2.
fn leading_zero_digits(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    digits.len() > 1 && digits.starts_with('0') && digits[1..].bytes().all(|b| b.is_ascii_digit())
}

/// Drop an unquoted trailing ` # comment`.
fn strip_comment(text: &str) -> &str {
    match text.find(" #").or_else(|| text.find("\t#")) {
        Some(idx) => text[..idx].trim_end(),
        None => text,
    }
}

fn trailing_comment_only(rest: &str) -> bool {
    let rest = rest.trim_start();
    rest.is_empty() || rest.starts_with('#')
}

fn double_quoted(text: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = text.char_indices().skip(1);
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Some((out, &text[idx + 1..])),
            '\\' => {
                let (_, esc) = chars.next()?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '"' | '\\' | '/' | ' ' => out.push(esc),
                    _ => return None,
                }
            }
            _ => out.push(c),
        }
    }
    None
}

fn single_quoted(text: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = text.char_indices().skip(1).peekable();
    while let Some((idx, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                out.push('\'');
                continue;
            }
            return Some((out, &text[idx + 1..]));
        }
        out.push(c);
    }
    None
}

/// Split the inside of a flow list on top-level commas, respecting
/// quotes and nested brackets. Empty items are dropped.
fn flow_items(inner: &str) -> Option<Vec<&str>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, c) in inner.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' => depth += 1,
                ']' => depth = depth.checked_sub(1)?,
                '{' => return None,
                ',' if depth == 0 => {
                    items.push(inner[start..idx].trim());
                    start = idx + 1;
                }
                _ => {}
            },
        }
    }
    if quote.is_some() || depth != 0 {
        return None;
    }
    items.push(inner[start..].trim());
    items.retain(|s| !s.is_empty());
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(block: &str) -> Metadata {
        SimpleParser.parse(block).unwrap()
    }

    fn s(v: &str) -> MetaValue {
        MetaValue::Str(v.to_string())
    }

    #[test]
    fn test_split_without_block() {
        let (meta, body) = split_front_matter("# Title\n\ntext", &SimpleParser);
        assert!(meta.is_empty());
        assert_eq!(body, "# Title\n\ntext");
    }

    #[test]
    fn test_split_unterminated_block() {
        let text = "---\ntitle: x\nno end";
        let (meta, body) = split_front_matter(text, &SimpleParser);
        assert!(meta.is_empty());
        assert_eq!(body, text);
    }

    #[test]
    fn test_split_crlf_and_bom() {
        let text = "\u{feff}---\r\ntitle: Hi\r\n---\r\n\r\nBody\r\n";
        let (meta, body) = split_front_matter(text, &SimpleParser);
        assert_eq!(meta.get_text("title").as_deref(), Some("Hi"));
        assert_eq!(body, "Body\n");
    }

    #[test]
    fn test_scalars() {
        let meta = simple(
            "title: Hello World\nviews: 42\nrating: 4.5\npublished: false\n\
             cover: ~\nquoted: \"true\"\nsingle: 'it''s'\nnote: plain # comment",
        );
        assert_eq!(meta.get("title"), Some(&s("Hello World")));
        assert_eq!(meta.get("views"), Some(&MetaValue::Int(42)));
        assert_eq!(meta.get("rating"), Some(&MetaValue::Float(4.5)));
        assert_eq!(meta.get("published"), Some(&MetaValue::Bool(false)));
        assert_eq!(meta.get("cover"), Some(&MetaValue::Null));
        assert_eq!(meta.get("quoted"), Some(&s("true")));
        assert_eq!(meta.get("single"), Some(&s("it's")));
        assert_eq!(meta.get("note"), Some(&s("plain")));
    }

    #[test]
    fn test_flow_and_block_lists() {
        let meta = simple(
            "tags: [rust, \"web, dev\", 3]\ncategories:\n  - Notes\n  - [Diary, Life]\nempty: []",
        );
        assert_eq!(
            meta.get("tags"),
            Some(&MetaValue::List(vec![s("rust"), s("web, dev"), MetaValue::Int(3)]))
        );
        assert_eq!(
            meta.get("categories"),
            Some(&MetaValue::List(vec![
                s("Notes"),
                MetaValue::List(vec![s("Diary"), s("Life")]),
            ]))
        );
        assert_eq!(meta.get("empty"), Some(&MetaValue::List(vec![])));
    }

    #[test]
    fn test_unindented_block_list() {
        let meta = simple("tags:\n- a\n- b\ntitle: x");
        assert_eq!(meta.get("tags"), Some(&MetaValue::List(vec![s("a"), s("b")])));
        assert_eq!(meta.get("title"), Some(&s("x")));
    }

    #[test]
    fn test_unsupported_constructs_are_dropped() {
        let meta = simple(
            "title: ok\nauthor:\n  name: Someone\n  link: https://x\nsummary: |\n  multi\n  line\n\
             cover: {src: a.png}\ntags: [a, b\ncategories:\n  - name: x\n  - other\n\
             keywords: [a: b, c]\nlinks:\n  - https://x.y\n  - \"k: v\"\nafter: kept",
        );
        assert_eq!(meta.get("title"), Some(&s("ok")));
        assert!(meta.get("author").is_none());
        assert!(meta.get("name").is_none());
        assert!(meta.get("summary").is_none());
        assert!(meta.get("cover").is_none());
        assert!(meta.get("tags").is_none());
        assert!(meta.get("categories").is_none());
        assert!(meta.get("keywords").is_none());
        assert_eq!(
            meta.get("links"),
            Some(&MetaValue::List(vec![s("https://x.y"), s("k: v")]))
        );
        assert_eq!(meta.get("after"), Some(&s("kept")));
    }

    #[test]
    fn test_comment_only_value_is_null() {
        let meta = simple("title: #draft\ntags: # none yet\ncategories: # below\n  - Notes");
        assert_eq!(meta.get("title"), Some(&MetaValue::Null));
        assert_eq!(meta.get_text("title"), None);
        assert_eq!(meta.get("tags"), Some(&MetaValue::Null));
        assert_eq!(meta.get("categories"), Some(&MetaValue::List(vec![s("Notes")])));
    }

    #[test]
    fn test_yaml_number_forms() {
        let meta = simple("a: 1e3\nb: .5\nc: 0x1F\nd: 0o17\ne: -0b11\nf: 007\ng: .nan\nh: 0x");
        assert_eq!(meta.get("a"), Some(&MetaValue::Float(1000.0)));
        assert_eq!(meta.get("b"), Some(&MetaValue::Float(0.5)));
        assert_eq!(meta.get("c"), Some(&MetaValue::Int(31)));
        assert_eq!(meta.get("d"), Some(&MetaValue::Int(15)));
        assert_eq!(meta.get("e"), Some(&MetaValue::Int(-3)));
        assert_eq!(meta.get("f"), Some(&s("007")));
        assert!(matches!(meta.get("g"), Some(MetaValue::Float(f)) if f.is_nan()));
        assert_eq!(meta.get("h"), Some(&s("0x")));
    }

    #[test]
    fn test_url_value_keeps_colons() {
        let meta = simple("link: https://example.com/a:b");
        assert_eq!(meta.get("link"), Some(&s("https://example.com/a:b")));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_simple_matches_yaml_on_supported_shapes() {
        let corpus = [
            "title: Hello World\ndate: 2021-03-04 10:20:30\nslug: 'hello-world'",
            "tags: [rust, \"web dev\"]\ncategories:\n  - Notes\n  - [Diary, Life]",
            "published: true\ncomments: false\nviews: 42\nrating: 4.5\ncover: ~",
            "tags:\n- a\n- b\ndescription:\nlayout: page",
            "title: \"Quoted: with colon\"\nupdated: 2022/01/02\ntags: []",
            "title: 2021\ncategories: Notes\ndraft: True\nweight: -3",
            "title: #hash\nviews: 1e3\nratio: .5\nn: 0x10\nm: 0o17\nb: -0b101",
            "top: .inf\nbottom: -.Inf\nsmall: -2.5e-1\nzip: 007\nplus: +12\nv: 1.2.3",
        ];
        for block in corpus {
            let yaml = YamlParser.parse(block).unwrap();
            let fallback = SimpleParser.parse(block).unwrap();
            assert_eq!(yaml, fallback, "parsers disagree on:\n{block}");
        }
    }

    #[test]
    fn test_chain_falls_back_on_invalid_yaml() {
        let (meta, body) = split_front_matter(
            "---\ntitle: Hello: World\ntags: [a]\n---\nBody",
            default_parser().as_ref(),
        );
        assert_eq!(meta.get_text("title").as_deref(), Some("Hello: World"));
        assert_eq!(meta.get("tags"), Some(&MetaValue::List(vec![s("a")])));
        assert_eq!(body, "Body");
    }
}
