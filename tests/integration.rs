use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn h2t_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("h2t");
    path
}

/// A Hexo `source/` tree, its asset folder, and a config pointing at it.
fn setup_blog() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let posts = root.join("blog/source/_posts");
    fs::create_dir_all(posts.join("Hello World")).unwrap();
    fs::create_dir_all(root.join("blog/source/_drafts")).unwrap();
    fs::create_dir_all(root.join("out")).unwrap();

    fs::write(
        posts.join("Hello World.md"),
        "---\ntitle: \"Hello World\"\ndate: 2024-01-01 09:00:00\ntags: [a, b]\n---\n\nHi there.\n\n![cover](cover.png)\n",
    )
    .unwrap();
    fs::write(posts.join("Hello World/cover.png"), "png").unwrap();
    fs::write(
        posts.join("notes-one.md"),
        "---\ntitle: Notes\nslug: notes\ndate: 2024-01-02 09:00:00\ncategories:\n  - Diary\n---\nFirst.\n",
    )
    .unwrap();
    fs::write(
        posts.join("notes-two.md"),
        "---\ntitle: Notes\nslug: notes\ndate: 2024-01-03 09:00:00\ncategories: diary\n---\nSecond with $a\\_1$ math.\n",
    )
    .unwrap();
    fs::write(
        root.join("blog/source/_drafts/idea.md"),
        "---\ntitle: Idea\n---\nNot yet.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[posts]
source = "{root}/blog/source"
output = "{root}/out/posts.sql"
title_index = "{root}/out/titles.json"
math_underscore_mode = "underscore"

[comments]
db = "{root}/artalk.db"
output = "{root}/out/comments.sql"
title_index = "{root}/out/titles.json"
"#,
        root = root.display()
    );

    let config_path = root.join("h2t.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_h2t(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = h2t_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run h2t binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn out(config_path: &Path, name: &str) -> PathBuf {
    config_path.parent().unwrap().join("out").join(name)
}

/// Minimal Artalk schema with a few users, pages and comments.
async fn create_artalk_db(path: &Path) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    for stmt in [
        "CREATE TABLE users (id INTEGER PRIMARY KEY, deleted_at DATETIME, name TEXT, email TEXT, link TEXT)",
        "CREATE TABLE pages (id INTEGER PRIMARY KEY, deleted_at DATETIME, key TEXT, title TEXT)",
        "CREATE TABLE comments (id INTEGER PRIMARY KEY, created_at DATETIME, deleted_at DATETIME, content TEXT, page_key TEXT, user_id INTEGER, ua TEXT, ip TEXT, rid INTEGER, is_pending NUMERIC)",
        "INSERT INTO users VALUES (1, NULL, 'Alice', 'alice@example.com', 'https://alice.example')",
        "INSERT INTO users VALUES (2, NULL, ' ', '', '')",
        "INSERT INTO pages VALUES (1, NULL, '/2024/01/01/hello-world/', 'Hello World | My Blog')",
        "INSERT INTO pages VALUES (2, NULL, '/notes/', 'Notes')",
        "INSERT INTO pages VALUES (3, NULL, '/gone/', 'Removed post')",
        "INSERT INTO comments VALUES (1, '2024-02-01 10:00:00', NULL, 'First!', '/2024/01/01/hello-world/', 1, 'UA', '1.1.1.1', 0, 0)",
        "INSERT INTO comments VALUES (2, '2024-02-01 11:00:00+08:00', NULL, 'It''s a reply', '/2024/01/01/hello-world/', 2, 'UA', '2.2.2.2', 1, 0)",
        "INSERT INTO comments VALUES (3, 'not a time', NULL, 'Orphan', '/notes/', 1, '', '', 77, 1)",
        "INSERT INTO comments VALUES (4, '2024-02-02 10:00:00', NULL, 'Lost', '/gone/', 1, '', '', 0, 0)",
        "INSERT INTO comments VALUES (5, '2024-02-03 10:00:00', '2024-02-04 10:00:00', 'Deleted', '/notes/', 1, '', '', 0, 0)",
    ] {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

#[test]
fn test_posts_run_writes_sql_and_index() {
    let (_tmp, config_path) = setup_blog();

    let (stdout, stderr, success) = run_h2t(&config_path, &["posts"]);
    assert!(success, "posts failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("posts written: 3"));
    assert!(stdout.contains("tags: 2"));
    assert!(stdout.contains("categories: 1"));
    assert!(stdout.contains("ok"));

    let sql = fs::read_to_string(out(&config_path, "posts.sql")).unwrap();
    assert!(sql.contains("START TRANSACTION;"));
    assert!(sql.contains("'Hello World','hello-world'"));
    assert!(sql.contains("'Notes','notes',"));
    assert!(sql.contains("'Notes','notes-2',"));
    assert!(sql.contains("/hexo-assets/Hello%20World/cover.png"));
    assert!(sql.contains("$a_1$"));
    assert!(!sql.contains("Not yet."));
    assert!(!sql.contains("DELETE FROM"));
    assert!(sql.contains("ALTER TABLE `typecho_contents` AUTO_INCREMENT = 4;"));

    let index = fs::read_to_string(out(&config_path, "titles.json")).unwrap();
    assert!(index.contains("\"Hello World\": 1"));
    assert!(index.contains("\"Notes\": 2"));
}

#[test]
fn test_posts_flags_override_config() {
    let (_tmp, config_path) = setup_blog();

    let (stdout, stderr, success) = run_h2t(
        &config_path,
        &[
            "posts",
            "--truncate",
            "--include-drafts",
            "--table-prefix",
            "blog",
            "--cid-start",
            "10",
        ],
    );
    assert!(success, "posts failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("posts written: 4"));

    let sql = fs::read_to_string(out(&config_path, "posts.sql")).unwrap();
    let delete = sql.find("DELETE FROM `blog_relationships`;").unwrap();
    let insert = sql.find("INSERT INTO `blog_contents`").unwrap();
    assert!(sql.find("START TRANSACTION;").unwrap() < delete);
    assert!(delete < insert);
    assert!(sql.contains("'Idea','idea'"));
    assert!(sql.contains("'draft'"));
    assert!(sql.contains("AUTO_INCREMENT = 14;"));
}

#[test]
fn test_posts_utf8_sig_encoding() {
    let (_tmp, config_path) = setup_blog();

    let (_, stderr, success) = run_h2t(&config_path, &["posts", "--encoding", "utf-8-sig"]);
    assert!(success, "posts failed: {}", stderr);
    let bytes = fs::read(out(&config_path, "posts.sql")).unwrap();
    assert!(bytes.starts_with(&[0xEF, 0xBB, 0xBF]));
}

#[test]
fn test_posts_rejects_bad_options() {
    let (_tmp, config_path) = setup_blog();

    let (_, _, success) = run_h2t(&config_path, &["posts", "--encoding", "latin-1"]);
    assert!(!success, "unknown encoding should fail");

    let (_, _, success) = run_h2t(&config_path, &["posts", "--author-id", "0"]);
    assert!(!success, "author id 0 should fail");

    let (_, stderr, success) = run_h2t(&config_path, &["posts", "--source", "/nonexistent/h2t"]);
    assert!(!success);
    assert!(stderr.contains("does not exist"));

    assert!(!out(&config_path, "posts.sql").exists());
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_h2t(&tmp.path().join("missing.toml"), &["posts"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_comments_require_title_index() {
    let (_tmp, config_path) = setup_blog();

    let (_, stderr, success) = run_h2t(&config_path, &["comments"]);
    assert!(!success);
    assert!(stderr.contains("h2t posts"));
}

#[tokio::test]
async fn test_comments_run_after_posts() {
    let (_tmp, config_path) = setup_blog();
    let db = config_path.parent().unwrap().join("artalk.db");
    create_artalk_db(&db).await;

    let (stdout, stderr, success) = run_h2t(&config_path, &["posts"]);
    assert!(success, "posts failed: stdout={}, stderr={}", stdout, stderr);

    let (stdout, stderr, success) = run_h2t(&config_path, &["comments", "--coid-start", "100"]);
    assert!(success, "comments failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("read: 4 comments on 3 pages"));
    assert!(stdout.contains("comments written: 3"));
    assert!(stdout.contains("pending: 1"));
    assert!(stdout.contains("skipped: 1 comments on 1 unmatched pages"));
    assert!(stdout.contains("timestamps replaced with run time: 1"));

    let sql = fs::read_to_string(out(&config_path, "comments.sql")).unwrap();
    // 2024-02-01 10:00:00 UTC
    assert!(sql.contains("VALUES (100,1,1706781600,'Alice',0,1,'alice@example.com'"));
    assert!(sql.contains("'It\\'s a reply','comment','approved',100);"));
    assert!(sql.contains("'Anonymous'"));
    assert!(sql.contains("'Orphan','comment','waiting',0);"));
    assert!(!sql.contains("'Lost'"));
    assert!(!sql.contains("'Deleted'"));
    assert!(sql.contains("SET `commentsNum` = 2 WHERE `cid` = 1;"));
    assert!(sql.contains("SET `commentsNum` = 1 WHERE `cid` = 2;"));
    assert!(sql.contains("ALTER TABLE `typecho_comments` AUTO_INCREMENT = 103;"));
    assert!(sql.contains("-- Skipped /gone/"));
}
