//! Read-only access to an Artalk SQLite store.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use crate::models::SourceComment;

/// Live comments with their author and the newest live page title.
const COMMENTS_QUERY: &str = r#"
SELECT
    c.id AS id,
    CAST(c.created_at AS TEXT) AS created_at,
    COALESCE(c.page_key, '') AS page_key,
    COALESCE(c.content, '') AS content,
    CAST(COALESCE(c.rid, 0) AS INTEGER) AS rid,
    CAST(COALESCE(c.is_pending, 0) AS INTEGER) AS is_pending,
    COALESCE(c.ip, '') AS ip,
    COALESCE(c.ua, '') AS ua,
    COALESCE(u.name, '') AS user_name,
    COALESCE(u.email, '') AS user_email,
    COALESCE(u.link, '') AS user_link,
    (
        SELECT p.title
        FROM pages p
        WHERE p.key = c.page_key
          AND p.deleted_at IS NULL
        ORDER BY p.id DESC
        LIMIT 1
    ) AS page_title
FROM comments c
LEFT JOIN users u
    ON u.id = c.user_id
   AND u.deleted_at IS NULL
WHERE c.deleted_at IS NULL
ORDER BY c.id ASC
"#;

pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if !path.is_file() {
        bail!("Artalk database not found: {}", path.display());
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open Artalk database: {}", path.display()))?;

    Ok(pool)
}

/// All live comments, ordered by id.
pub async fn fetch_comments(pool: &SqlitePool) -> Result<Vec<SourceComment>> {
    let rows = sqlx::query(COMMENTS_QUERY)
        .fetch_all(pool)
        .await
        .context("Failed to query Artalk comments")?;

    let mut comments = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.try_get("id")?;
        let created_raw: Option<String> = row.try_get("created_at")?;
        let created = created_raw.as_deref().and_then(parse_artalk_time);
        if created.is_none() {
            tracing::warn!(
                comment = id,
                "unreadable created_at {:?}, using run time",
                created_raw.unwrap_or_default()
            );
        }

        let author: String = row.try_get("user_name")?;
        let author = match author.trim() {
            "" => "Anonymous".to_string(),
            name => name.to_string(),
        };
        let rid: i64 = row.try_get("rid")?;
        let pending: i64 = row.try_get("is_pending")?;

        comments.push(SourceComment {
            id,
            created,
            page_key: row.try_get("page_key")?,
            page_title: row.try_get("page_title")?,
            content: row.try_get("content")?,
            author,
            mail: trimmed(row.try_get("user_email")?),
            url: trimmed(row.try_get("user_link")?),
            ip: trimmed(row.try_get("ip")?),
            agent: trimmed(row.try_get("ua")?),
            rid: rid.max(0),
            is_pending: pending != 0,
        });
    }

    tracing::debug!(count = comments.len(), "read Artalk comments");
    Ok(comments)
}

/// Open the store, read every live comment, close it.
pub async fn read_comments(path: &Path) -> Result<Vec<SourceComment>> {
    let pool = connect(path).await?;
    let comments = fetch_comments(&pool).await;
    pool.close().await;
    comments
}

fn trimmed(value: String) -> String {
    value.trim().to_string()
}

/// Parse the timestamp formats Artalk's storage layer writes. Values
/// without an offset are UTC.
pub fn parse_artalk_time(raw: &str) -> Option<i64> {
    let mut text = raw.trim().to_string();
    if text.is_empty() {
        return None;
    }
    if text.contains(' ') && !text.contains('T') {
        text = text.replacen(' ', "T", 1);
    }
    if let Some(stripped) = text.strip_suffix('Z') {
        text = format!("{stripped}+00:00");
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(&text, fmt) {
            return Some(dt.timestamp());
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, fmt) {
            return Some(naive.and_utc().timestamp());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_artalk_time_variants() {
        let expected = 1_700_000_000;
        assert_eq!(parse_artalk_time("2023-11-14 22:13:20"), Some(expected));
        assert_eq!(parse_artalk_time("2023-11-14T22:13:20Z"), Some(expected));
        assert_eq!(parse_artalk_time("2023-11-15 06:13:20+08:00"), Some(expected));
        assert_eq!(
            parse_artalk_time("2023-11-15 06:13:20.123456789+08:00"),
            Some(expected)
        );
        assert_eq!(parse_artalk_time("2023-11-14 22:13:20.5"), Some(expected));
        assert_eq!(parse_artalk_time("2023-11-14 22:13"), Some(expected - 20));
    }

    #[test]
    fn test_parse_artalk_time_rejects_garbage() {
        assert_eq!(parse_artalk_time(""), None);
        assert_eq!(parse_artalk_time("   "), None);
        assert_eq!(parse_artalk_time("yesterday"), None);
    }

    #[tokio::test]
    async fn test_missing_database_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = read_comments(&dir.path().join("nope.db")).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
