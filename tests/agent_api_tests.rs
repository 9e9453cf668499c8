//! Agent endpoints driven end to end through the router: two sites in
//! separate temp directories exchanging dumps and media parts.

mod test_utils;

use axum::{Router, body::Body, http::StatusCode, response::Response};
use serde_json::{Value, json};
use sitesync::config::{AgentConfig, AppConfig};
use sitesync::replication::SqlAccessor;
use sitesync::server::{AppState, create_app};
use tempfile::TempDir;
use test_utils::{AGENT_SECRET, AGENT_TOKEN, create_site_fixture, setup_test_db, signed_request};
use tower::ServiceExt;

struct Site {
    dir: TempDir,
    state: AppState,
}

impl Site {
    async fn new(with_fixture: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            uploads_dir: dir.path().join("uploads"),
            staging_dir: dir.path().join("staging"),
            backup_dir: dir.path().join("backups"),
            maintenance_file: dir.path().join(".maintenance"),
            agent: AgentConfig {
                enabled: true,
                token: Some(AGENT_TOKEN.to_string()),
                hmac_secret: Some(AGENT_SECRET.to_string()),
                ip_allowlist: Vec::new(),
            },
            ..AppConfig::default()
        };

        let db = setup_test_db().await.unwrap();
        if with_fixture {
            create_site_fixture(&db).await.unwrap();
        }
        let state = AppState::new(config, db).unwrap();
        Self { dir, state }
    }

    fn app(&self) -> Router {
        create_app(self.state.clone())
    }

    async fn call(&self, method: &str, uri: &str, body: Vec<u8>) -> Response {
        self.app()
            .oneshot(signed_request(method, uri, body))
            .await
            .unwrap()
    }

    async fn call_json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .call(method, uri, serde_json::to_vec(&body).unwrap())
            .await;
        let status = response.status();
        (status, json_body(response).await)
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn database_export_download_and_import_between_sites() {
    let source = Site::new(true).await;
    let target = Site::new(false).await;

    let (status, export) = source
        .call_json(
            "POST",
            "/replication/export",
            json!({
                "set_name": "prod",
                "tables": ["wp_options", "wp_posts"],
                "search": ["http://old.local"],
                "replace": ["https://new.example"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(export["success"], json!(true));
    let token = export["download_token"].as_str().unwrap().to_string();

    let download = source
        .call("GET", &format!("/replication/download?token={token}"), Vec::new())
        .await;
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(
        download.headers().get("content-type").unwrap(),
        "application/sql"
    );
    let script = String::from_utf8(body_bytes(download).await).unwrap();
    assert_eq!(script.len() as u64, export["size"].as_u64().unwrap());
    assert!(script.contains("s:19:\"https://new.example\""));

    // The token is single use.
    let again = source
        .call("GET", &format!("/replication/download?token={token}"), Vec::new())
        .await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let (status, imported) = target
        .call_json(
            "POST",
            "/replication/import",
            json!({"set_name": "prod", "sql": script}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(imported["success"], json!(true));
    assert!(target.state.site.table_exists("wp_posts").await.unwrap());
}

#[tokio::test]
async fn base64_import_is_staged_then_swapped_and_cleaned_up() {
    use base64::Engine;

    let source = Site::new(true).await;
    let target = Site::new(true).await;

    let (_, export) = source
        .call_json(
            "POST",
            "/replication/export",
            json!({"tables": ["wp_posts"]}),
        )
        .await;
    let token = export["download_token"].as_str().unwrap();
    let script = body_bytes(
        source
            .call("GET", &format!("/replication/download?token={token}"), Vec::new())
            .await,
    )
    .await;

    let (status, _) = target
        .call_json(
            "POST",
            "/replication/import",
            json!({
                "tables": ["wp_posts"],
                "sql": base64::engine::general_purpose::STANDARD.encode(&script),
                "encoding": "base64",
                "skip_rename": true,
                "temp_prefix": "sstmp_"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(target.state.site.table_exists("sstmp_wp_posts").await.unwrap());

    let (status, swapped) = target
        .call_json(
            "POST",
            "/replication/swap",
            json!({"tables": ["wp_posts"], "temp_prefix": "sstmp_", "backup_prefix": "ssbak_"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(swapped["message"], json!("Swapped 1 tables"));
    assert!(target.state.site.table_exists("ssbak_wp_posts").await.unwrap());
    assert!(!target.state.site.table_exists("sstmp_wp_posts").await.unwrap());

    let (status, _) = target
        .call_json(
            "POST",
            "/replication/cleanup",
            json!({"tables": ["wp_posts"], "temp_prefix": "sstmp_", "backup_prefix": "ssbak_"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!target.state.site.table_exists("ssbak_wp_posts").await.unwrap());
    assert!(target.state.site.table_exists("wp_posts").await.unwrap());
}

#[tokio::test]
async fn identical_prefixes_are_rejected() {
    let site = Site::new(false).await;

    let (status, body) = site
        .call_json(
            "POST",
            "/replication/swap",
            json!({"temp_prefix": "same_", "backup_prefix": "same_"}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn invalid_base64_payload_is_a_bad_request() {
    let site = Site::new(false).await;

    let (status, _) = site
        .call_json(
            "POST",
            "/replication/import",
            json!({"sql": "%%%not base64%%%", "encoding": "base64"}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn media_parts_travel_to_the_peer_and_swap_into_place() {
    let source = Site::new(false).await;
    let target = Site::new(false).await;

    let source_uploads = source.dir.path().join("uploads").join("2024");
    std::fs::create_dir_all(&source_uploads).unwrap();
    std::fs::write(source_uploads.join("photo.jpg"), b"jpeg-bytes").unwrap();
    std::fs::create_dir_all(target.dir.path().join("uploads")).unwrap();
    std::fs::write(target.dir.path().join("uploads").join("old.txt"), b"old").unwrap();

    let (status, export) = source
        .call_json("POST", "/media/export", json!({"max_mb": 1}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(export["parts"], json!(1));
    let token = export["token"].as_str().unwrap().to_string();

    let part = source
        .call("GET", &format!("/media/download?token={token}&part=1"), Vec::new())
        .await;
    assert_eq!(part.status(), StatusCode::OK);
    let archive = body_bytes(part).await;

    // Served parts are gone, and the batch is forgotten after the last one.
    let again = source
        .call("GET", &format!("/media/download?token={token}&part=1"), Vec::new())
        .await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let import = target
        .call(
            "POST",
            &format!("/media/import?token={token}&part=1&suffix=job1"),
            archive,
        )
        .await;
    assert_eq!(import.status(), StatusCode::OK);
    let staged = target.dir.path().join("upload_tmp_job1");
    assert_eq!(
        std::fs::read(staged.join("2024").join("photo.jpg")).unwrap(),
        b"jpeg-bytes"
    );

    let (status, _) = target
        .call_json(
            "POST",
            "/replication/swap",
            json!({
                "temp_prefix": "sstmp_",
                "backup_prefix": "ssbak_",
                "swap_uploads": true,
                "suffix": "job1"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let live = target.dir.path().join("uploads");
    assert!(live.join("2024").join("photo.jpg").exists());
    assert!(!live.join("old.txt").exists());
    assert!(target.dir.path().join("upload_bak_job1").join("old.txt").exists());

    let (status, _) = target
        .call_json(
            "POST",
            "/replication/cleanup",
            json!({
                "temp_prefix": "sstmp_",
                "backup_prefix": "ssbak_",
                "swap_uploads": true,
                "suffix": "job1"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!target.dir.path().join("upload_bak_job1").exists());
}

#[tokio::test]
async fn unknown_media_part_is_not_found() {
    let site = Site::new(false).await;
    let uploads = site.dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    std::fs::write(uploads.join("a.txt"), b"a").unwrap();

    let (_, export) = site
        .call_json("POST", "/media/export", json!({"max_mb": 1}))
        .await;
    let token = export["token"].as_str().unwrap();

    let response = site
        .call("GET", &format!("/media/download?token={token}&part=7"), Vec::new())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_media_upload_is_a_bad_request() {
    let site = Site::new(false).await;

    let response = site.call("POST", "/media/import?part=1", Vec::new()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signature_over_a_different_route_is_forbidden() {
    let site = Site::new(false).await;
    let mut request = signed_request("GET", "/status", Vec::new());
    *request.uri_mut() = "/maintenance".parse().unwrap();
    *request.method_mut() = axum::http::Method::POST;
    *request.body_mut() = Body::empty();

    let response = site.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!("rest_forbidden"));
}
