use std::time::Duration;

use serde_json::json;
use sitesync::config::RemoteSettings;
use sitesync::remote::{MaintenanceRequest, RemoteClient, SwapRequest, TransportError};
use sitesync::signing::sign;
use tempfile::TempDir;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

const TOKEN: &str = "remote-token";
const SECRET: &str = "remote-secret";

fn client_for(base: &str) -> RemoteClient {
    RemoteClient::new(RemoteSettings {
        base_url: Url::parse(base).unwrap(),
        token: TOKEN.to_string(),
        hmac_secret: SECRET.to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn requests_carry_token_and_route_signature() {
    let mock_server = MockServer::start().await;
    let body = serde_json::to_vec(&MaintenanceRequest { enabled: true }).unwrap();

    // The base path is not part of the signed route.
    Mock::given(method("POST"))
        .and(path("/wp-json/sitesync/v1/maintenance"))
        .and(header("x-token", TOKEN))
        .and(header("x-signature", sign(SECRET, "POST", "/maintenance", &body).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Maintenance enabled"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&format!("{}/wp-json/sitesync/v1/", mock_server.uri()));
    let response = client.set_maintenance(true).await.unwrap();

    assert!(response.success);
    assert_eq!(response.message, "Maintenance enabled");
}

#[tokio::test]
async fn success_false_is_a_rejection_with_the_remote_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/replication/swap"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Table wp_posts is locked"
        })))
        .mount(&mock_server)
        .await;

    let client = client_for(&format!("{}/", mock_server.uri()));
    let err = client
        .swap(&SwapRequest {
            temp_prefix: "sstmp_".into(),
            backup_prefix: "ssbak_".into(),
            ..SwapRequest::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Rejected { .. }));
    assert_eq!(err.to_string(), "Table wp_posts is locked");
}

#[tokio::test]
async fn non_success_status_carries_the_error_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "rest_forbidden",
            "message": "Sorry, you are not allowed to do that.",
            "data": {"status": 403}
        })))
        .mount(&mock_server)
        .await;

    let client = client_for(&format!("{}/", mock_server.uri()));
    let err = client.status().await.unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert!(err.to_string().contains("Sorry, you are not allowed to do that."));
}

#[tokio::test]
async fn malformed_json_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let client = client_for(&format!("{}/", mock_server.uri()));
    let err = client.status().await.unwrap_err();

    assert!(matches!(err, TransportError::Malformed { .. }));
}

#[tokio::test]
async fn media_parts_download_to_disk() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/media/download"))
        .and(query_param("token", "abc"))
        .and(query_param("part", "2"))
        .and(header("x-signature", sign(SECRET, "GET", "/media/download", b"").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-archive-bytes".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("nested").join("part2.zip");
    let client = client_for(&format!("{}/", mock_server.uri()));

    let written = client.download_media("abc", 2, &dest).await.unwrap();

    assert_eq!(written, 16);
    assert_eq!(std::fs::read(&dest).unwrap(), b"PK-archive-bytes");
}

#[tokio::test]
async fn unreachable_remote_is_a_request_error() {
    let client = client_for("http://127.0.0.1:9/");
    let err = client.status().await.unwrap_err();

    assert!(matches!(
        err,
        TransportError::Request { .. } | TransportError::Timeout { .. }
    ));
}
