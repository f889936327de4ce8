//! MySQL text helpers shared by the post and comment generators.

/// Quote a string literal with MySQL backslash escaping.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1a' => out.push_str("\\Z"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Table prefix with a trailing `_`; blank means `typecho_`.
pub fn normalize_prefix(prefix: &str) -> String {
    let cleaned = prefix.trim();
    if cleaned.is_empty() {
        "typecho_".to_string()
    } else if cleaned.ends_with('_') {
        cleaned.to_string()
    } else {
        format!("{cleaned}_")
    }
}

/// A SQL file assembled line by line inside one transaction.
pub struct SqlScript {
    prefix: String,
    lines: Vec<String>,
}

impl SqlScript {
    /// Start a script: header comments, charset and `START TRANSACTION`.
    pub fn begin(prefix: &str, header: &[&str]) -> Self {
        let mut lines: Vec<String> = header.iter().map(|h| format!("-- {h}")).collect();
        lines.push("SET NAMES utf8mb4;".to_string());
        lines.push("START TRANSACTION;".to_string());
        Self {
            prefix: normalize_prefix(prefix),
            lines,
        }
    }

    /// Backquoted, prefixed table name.
    pub fn table(&self, name: &str) -> String {
        format!("`{}{}`", self.prefix, name)
    }

    pub fn section(&mut self, title: &str) {
        self.lines.push(String::new());
        self.lines.push(format!("-- {title}"));
    }

    pub fn push(&mut self, statement: String) {
        self.lines.push(statement);
    }

    pub fn delete_all(&mut self, table: &str) {
        let stmt = format!("DELETE FROM {};", self.table(table));
        self.lines.push(stmt);
    }

    pub fn insert(&mut self, table: &str, columns: &[&str], values: &[String]) {
        let columns = columns
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(",");
        let stmt = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            self.table(table),
            columns,
            values.join(",")
        );
        self.lines.push(stmt);
    }

    pub fn set_auto_increment(&mut self, table: &str, next: i64) {
        let stmt = format!(
            "ALTER TABLE {} AUTO_INCREMENT = {};",
            self.table(table),
            next.max(1)
        );
        self.lines.push(stmt);
    }

    /// Append `COMMIT;` and any trailing comments, and render the file.
    pub fn commit(mut self, footer: &[String]) -> String {
        self.lines.push(String::new());
        self.lines.push("COMMIT;".to_string());
        if !footer.is_empty() {
            self.lines.push(String::new());
            self.lines.extend(footer.iter().map(|f| format!("-- {f}")));
        }
        self.lines.push(String::new());
        self.lines.join("\n")
    }
}
