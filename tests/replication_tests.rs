//! Export, import and swap against in-memory SQLite sites.

mod test_utils;

use sea_orm::ConnectionTrait;
use serde_json::{Value, json};
use sitesync::replication::{
    ExportOptions, ImportOptions, ReplicationError, SiteDatabase, SqlAccessor, Substitutions,
    export, import,
};
use sitesync::swap::{cleanup_tables, swap_tables};
use test_utils::{create_site_fixture, setup_test_db};

async fn source_site() -> SiteDatabase {
    let db = setup_test_db().await.unwrap();
    create_site_fixture(&db).await.unwrap();
    SiteDatabase::new(db).unwrap()
}

async fn empty_site() -> SiteDatabase {
    SiteDatabase::new(setup_test_db().await.unwrap()).unwrap()
}

fn substitutions() -> Substitutions {
    Substitutions::new(
        &["http://old.local".to_string()],
        &["https://new.example".to_string()],
    )
}

async fn column_by_key(site: &SiteDatabase, table: &str, key: &str, id: i64, column: &str) -> Option<Value> {
    site.fetch_rows(table)
        .await
        .unwrap()
        .into_iter()
        .find(|row| row.get(key) == Some(&json!(id)))
        .and_then(|row| row.get(column).cloned())
}

#[tokio::test]
async fn export_then_import_rewrites_urls_and_serialized_lengths() {
    let source = source_site().await;
    let target = empty_site().await;

    let options = ExportOptions {
        tables: vec!["wp_options".into(), "wp_posts".into()],
        substitutions: substitutions(),
        ..ExportOptions::default()
    };
    let script = export(&source, &options).await.unwrap();
    assert!(script.contains("INSERT INTO `wp_posts` (`id`, `post_title`, `guid`) VALUES"));

    import(&target, &script, &ImportOptions::default()).await.unwrap();

    assert_eq!(
        column_by_key(&target, "wp_options", "option_id", 1, "option_value").await,
        Some(json!("https://new.example"))
    );
    assert_eq!(
        column_by_key(&target, "wp_options", "option_id", 2, "option_value").await,
        Some(json!("a:1:{s:3:\"url\";s:19:\"https://new.example\";}"))
    );
    assert_eq!(
        column_by_key(&target, "wp_posts", "id", 1, "post_title").await,
        Some(json!("Hello 'world'"))
    );
    assert_eq!(
        column_by_key(&target, "wp_posts", "id", 2, "post_title").await,
        Some(Value::Null)
    );
}

#[tokio::test]
async fn search_only_tables_limit_where_substitution_happens() {
    let source = source_site().await;
    let target = empty_site().await;

    let options = ExportOptions {
        tables: vec!["wp_options".into(), "wp_posts".into()],
        substitutions: substitutions(),
        search_only_tables: vec!["wp_posts".into()],
        ..ExportOptions::default()
    };
    let script = export(&source, &options).await.unwrap();
    import(&target, &script, &ImportOptions::default()).await.unwrap();

    assert_eq!(
        column_by_key(&target, "wp_options", "option_id", 1, "option_value").await,
        Some(json!("http://old.local"))
    );
    assert_eq!(
        column_by_key(&target, "wp_posts", "id", 1, "guid").await,
        Some(json!("https://new.example/?p=1"))
    );
}

#[tokio::test]
async fn excluded_option_rows_are_not_exported() {
    let source = source_site().await;

    let options = ExportOptions {
        tables: vec!["wp_options".into()],
        exclude_option_prefix: Some("_transient".into()),
        ..ExportOptions::default()
    };
    let script = export(&source, &options).await.unwrap();

    assert!(script.contains("siteurl"));
    assert!(!script.contains("_transient_feed"));
}

#[tokio::test]
async fn all_tables_export_skips_internal_and_staged_tables() {
    let source = source_site().await;
    source
        .connection()
        .execute_unprepared("CREATE TABLE sstmp_wp_posts (id INTEGER PRIMARY KEY)")
        .await
        .unwrap();

    let options = ExportOptions {
        skip_prefixes: vec!["sstmp_".into(), "ssbak_".into()],
        ..ExportOptions::default()
    };
    let script = export(&source, &options).await.unwrap();

    assert!(script.contains("CREATE TABLE `wp_options`"));
    assert!(script.contains("CREATE TABLE `wp_posts`"));
    assert!(!script.contains("sitesync_state"));
    assert!(!script.contains("seaql_migrations"));
    assert!(!script.contains("sstmp_wp_posts"));
}

#[tokio::test]
async fn missing_tables_are_skipped_on_export() {
    let source = source_site().await;

    let options = ExportOptions {
        tables: vec!["wp_nope".into(), "wp_posts".into()],
        ..ExportOptions::default()
    };
    let script = export(&source, &options).await.unwrap();

    assert!(!script.contains("wp_nope"));
    assert!(script.contains("CREATE TABLE `wp_posts`"));
}

#[tokio::test]
async fn staged_import_then_swap_keeps_a_backup() {
    let source = source_site().await;
    let target = source_site().await;
    target
        .connection()
        .execute_unprepared("UPDATE wp_posts SET post_title = 'local copy' WHERE id = 1")
        .await
        .unwrap();

    let tables = vec!["wp_posts".to_string()];
    let script = export(
        &source,
        &ExportOptions {
            tables: tables.clone(),
            ..ExportOptions::default()
        },
    )
    .await
    .unwrap();

    let outcome = import(
        &target,
        &script,
        &ImportOptions {
            tables: tables.clone(),
            temp_prefix: "sstmp_".into(),
            skip_rename: true,
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.staged_tables, tables);
    assert!(outcome.renamed_tables.is_empty());
    assert!(target.table_exists("sstmp_wp_posts").await.unwrap());
    assert_eq!(
        column_by_key(&target, "wp_posts", "id", 1, "post_title").await,
        Some(json!("local copy"))
    );

    let swapped = swap_tables(&target, &[], "sstmp_", "ssbak_").await.unwrap();
    assert_eq!(swapped, tables);
    assert!(!target.table_exists("sstmp_wp_posts").await.unwrap());
    assert_eq!(
        column_by_key(&target, "wp_posts", "id", 1, "post_title").await,
        Some(json!("Hello 'world'"))
    );
    assert_eq!(
        column_by_key(&target, "ssbak_wp_posts", "id", 1, "post_title").await,
        Some(json!("local copy"))
    );

    cleanup_tables(&target, &tables, "sstmp_", "ssbak_").await.unwrap();
    assert!(!target.table_exists("ssbak_wp_posts").await.unwrap());
    assert!(target.table_exists("wp_posts").await.unwrap());
}

#[tokio::test]
async fn staged_import_without_skip_rename_replaces_live_tables() {
    let source = source_site().await;
    let target = empty_site().await;

    let script = export(
        &source,
        &ExportOptions {
            tables: vec!["wp_posts".into()],
            ..ExportOptions::default()
        },
    )
    .await
    .unwrap();

    let outcome = import(
        &target,
        &script,
        &ImportOptions {
            temp_prefix: "sstmp_".into(),
            ..ImportOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.renamed_tables, vec!["wp_posts".to_string()]);
    assert!(target.table_exists("wp_posts").await.unwrap());
    assert!(!target.table_exists("sstmp_wp_posts").await.unwrap());
}

#[tokio::test]
async fn import_stops_at_the_first_failing_statement() {
    let target = empty_site().await;
    let script = "CREATE TABLE `first` (x INTEGER);\nINSERT INTO `missing` VALUES (1);\nCREATE TABLE `second` (y INTEGER);";

    let err = import(&target, script, &ImportOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ReplicationError::Database(_)));
    assert!(err.to_string().contains("missing"));
    assert!(target.table_exists("first").await.unwrap());
    assert!(!target.table_exists("second").await.unwrap());
}

#[tokio::test]
async fn blob_columns_survive_export_and_import_as_bytes() {
    let source = empty_site().await;
    source
        .execute("CREATE TABLE `wp_files` (id INTEGER PRIMARY KEY, data BLOB, label TEXT)")
        .await
        .unwrap();
    source
        .execute("INSERT INTO `wp_files` VALUES (1, X'00FF41', 'raw'), (2, X'', NULL)")
        .await
        .unwrap();
    let target = empty_site().await;

    let options = ExportOptions {
        tables: vec!["wp_files".into()],
        substitutions: substitutions(),
        ..ExportOptions::default()
    };
    let script = export(&source, &options).await.unwrap();
    assert!(script.contains("(1, X'00FF41', 'raw')"));
    assert!(script.contains("(2, X'', NULL)"));

    import(&target, &script, &ImportOptions::default()).await.unwrap();

    let row = target
        .connection()
        .query_one(sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "SELECT typeof(data) AS kind, hex(data) AS bytes FROM `wp_files` WHERE id = 1",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.try_get::<String>("", "kind").unwrap(), "blob");
    assert_eq!(row.try_get::<String>("", "bytes").unwrap(), "00FF41");
}
