//! Test utilities for database and agent testing.
//!
//! In-memory SQLite sites with migrations applied, a small WordPress-like
//! fixture schema, and helpers for building signed agent requests.

use anyhow::Result;
use axum::body::Body;
use axum::http::Request;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sitesync::signing::{SIGNATURE_HEADER, TOKEN_HEADER, sign};

#[allow(dead_code)]
pub const AGENT_TOKEN: &str = "agent-token";
#[allow(dead_code)]
pub const AGENT_SECRET: &str = "agent-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool is capped at one connection so every query sees the same
/// in-memory database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Creates `wp_options` and `wp_posts` with a few rows, including a
/// PHP-serialized option value that embeds the old site URL.
#[allow(dead_code)]
pub async fn create_site_fixture(db: &DatabaseConnection) -> Result<()> {
    for statement in [
        "CREATE TABLE wp_options (option_id INTEGER PRIMARY KEY, option_name TEXT NOT NULL, option_value TEXT)",
        "CREATE TABLE wp_posts (id INTEGER PRIMARY KEY, post_title TEXT, guid TEXT)",
        "INSERT INTO wp_options (option_id, option_name, option_value) VALUES (1, 'siteurl', 'http://old.local')",
        "INSERT INTO wp_options (option_id, option_name, option_value) VALUES (2, 'widget', 'a:1:{s:3:\"url\";s:16:\"http://old.local\";}')",
        "INSERT INTO wp_options (option_id, option_name, option_value) VALUES (3, '_transient_feed', 'http://old.local/feed')",
        "INSERT INTO wp_posts (id, post_title, guid) VALUES (1, 'Hello ''world''', 'http://old.local/?p=1')",
        "INSERT INTO wp_posts (id, post_title, guid) VALUES (2, NULL, 'http://old.local/?p=2')",
    ] {
        db.execute_unprepared(statement).await?;
    }
    Ok(())
}

/// Builds an agent request signed with [`AGENT_TOKEN`] and [`AGENT_SECRET`].
#[allow(dead_code)]
pub fn signed_request(method: &str, path_and_query: &str, body: Vec<u8>) -> Request<Body> {
    let path = path_and_query
        .split('?')
        .next()
        .unwrap_or(path_and_query)
        .to_string();
    Request::builder()
        .method(method)
        .uri(path_and_query)
        .header("content-type", "application/json")
        .header(TOKEN_HEADER, AGENT_TOKEN)
        .header(SIGNATURE_HEADER, sign(AGENT_SECRET, method, &path, &body))
        .body(Body::from(body))
        .unwrap()
}
