//! Media pull and push steps paging through parts against a mocked peer.

mod test_utils;

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use sitesync::config::{AppConfig, RemoteConfig};
use sitesync::media::create_archives;
use sitesync::models::{Job, JobContext, ReplicationSet, SetType, Step, StepOutcome};
use sitesync::orchestrator::{StepRunner, SyncStepRunner};
use sitesync::replication::SiteDatabase;
use tempfile::TempDir;
use test_utils::setup_test_db;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path, query_param},
};

async fn runner_for(dir: &TempDir, server: &MockServer) -> SyncStepRunner {
    let config = AppConfig {
        uploads_dir: dir.path().join("uploads"),
        staging_dir: dir.path().join("staging"),
        backup_dir: dir.path().join("backups"),
        maintenance_file: dir.path().join(".maintenance"),
        remote: RemoteConfig {
            url: Some(server.uri()),
            token: Some("remote-token".to_string()),
            hmac_secret: Some("remote-secret".to_string()),
            timeout_seconds: 5,
        },
        ..AppConfig::default()
    };
    let site = SiteDatabase::new(setup_test_db().await.unwrap()).unwrap();
    SyncStepRunner::new(Arc::new(config), site).unwrap()
}

fn media_job(set_type: SetType, steps: Vec<Step>) -> Job {
    let mut set = ReplicationSet::new("media", "Media", set_type);
    set.tables = vec!["wp_posts".to_string()];
    set.include_media = true;
    set.media_chunk_mb = 1;
    Job::with_steps(set, steps, false)
}

/// Archive a single file into one zip part and return its bytes.
async fn zip_part(scratch: &Path, relative: &str, contents: &[u8]) -> Vec<u8> {
    let source = scratch.join("source");
    let file = source.join(relative);
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, contents).unwrap();
    let batch = create_archives(&source, &scratch.join("out"), 1).await.unwrap();
    assert_eq!(batch.parts(), 1);
    std::fs::read(&batch.archives[0]).unwrap()
}

fn staged_files(staging: &Path) -> Vec<String> {
    match std::fs::read_dir(staging) {
        Ok(entries) => entries
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn assert_repeat(outcome: StepOutcome) {
    assert!(matches!(outcome, StepOutcome::Repeat { .. }), "expected repeat, got {outcome:?}");
}

fn assert_advance(outcome: StepOutcome) {
    assert!(matches!(outcome, StepOutcome::Advance(_)), "expected advance, got {outcome:?}");
}

#[tokio::test]
async fn pull_downloads_each_part_then_swaps_uploads() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();

    let first = zip_part(&scratch.path().join("one"), "2024/a.txt", b"alpha").await;
    let second = zip_part(&scratch.path().join("two"), "2025/b.txt", b"beta").await;

    Mock::given(method("POST"))
        .and(path("/media/export"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "token": "batch",
            "parts": 2
        })))
        .expect(1)
        .mount(&server)
        .await;
    for (part, bytes) in [("1", first), ("2", second)] {
        Mock::given(method("GET"))
            .and(path("/media/download"))
            .and(query_param("token", "batch"))
            .and(query_param("part", part))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .expect(1)
            .mount(&server)
            .await;
    }

    let runner = runner_for(&dir, &server).await;
    std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
    std::fs::write(dir.path().join("uploads").join("old.txt"), b"old").unwrap();
    let mut job = media_job(
        SetType::Pull,
        vec![Step::MediaExportRemote, Step::MediaDownloadRemote, Step::SwapLocal],
    );
    let staged_dir = dir.path().join(format!("upload_tmp_{}", job.id));

    assert_advance(runner.run(&mut job, Step::MediaExportRemote).await.unwrap());

    assert_repeat(runner.run(&mut job, Step::MediaDownloadRemote).await.unwrap());
    let JobContext::Pull(ctx) = &job.context else {
        panic!("expected pull context");
    };
    assert_eq!((ctx.media_part, ctx.media_parts), (2, 2));
    assert_eq!(std::fs::read(staged_dir.join("2024").join("a.txt")).unwrap(), b"alpha");

    assert_repeat(runner.run(&mut job, Step::MediaDownloadRemote).await.unwrap());
    let JobContext::Pull(ctx) = &job.context else {
        panic!("expected pull context");
    };
    assert_eq!(ctx.media_part, 3);
    assert_eq!(std::fs::read(staged_dir.join("2025").join("b.txt")).unwrap(), b"beta");

    assert_advance(runner.run(&mut job, Step::MediaDownloadRemote).await.unwrap());
    assert!(staged_files(&dir.path().join("staging")).is_empty());

    assert_advance(runner.run(&mut job, Step::SwapLocal).await.unwrap());
    let live = dir.path().join("uploads");
    assert!(live.join("2024").join("a.txt").exists());
    assert!(live.join("2025").join("b.txt").exists());
    assert!(!live.join("old.txt").exists());
    assert!(!staged_dir.exists());
}

#[tokio::test]
async fn push_uploads_each_part_and_requests_an_upload_swap() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let runner = runner_for(&dir, &server).await;

    // Two files that together exceed the one megabyte part size.
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(uploads.join("2024")).unwrap();
    std::fs::write(uploads.join("2024").join("a.bin"), vec![1u8; 700_000]).unwrap();
    std::fs::write(uploads.join("2024").join("b.bin"), vec![2u8; 700_000]).unwrap();

    let mut job = media_job(SetType::Push, vec![Step::MediaUploadRemote, Step::SwapRemote]);
    for part in ["1", "2"] {
        Mock::given(method("POST"))
            .and(path("/media/import"))
            .and(query_param("part", part))
            .and(query_param("suffix", job.id.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "Extracted"
            })))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/replication/swap"))
        .and(body_partial_json(json!({"swap_uploads": true, "suffix": job.id.clone()})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Swapped 0 tables"
        })))
        .expect(1)
        .mount(&server)
        .await;

    // First entry only builds the archives.
    assert_repeat(runner.run(&mut job, Step::MediaUploadRemote).await.unwrap());
    let JobContext::Push(ctx) = &job.context else {
        panic!("expected push context");
    };
    assert_eq!((ctx.media_part, ctx.media_parts), (1, 2));
    assert_eq!(staged_files(&dir.path().join("staging")).len(), 2);

    assert_repeat(runner.run(&mut job, Step::MediaUploadRemote).await.unwrap());
    assert_eq!(staged_files(&dir.path().join("staging")).len(), 1);
    assert_repeat(runner.run(&mut job, Step::MediaUploadRemote).await.unwrap());
    let JobContext::Push(ctx) = &job.context else {
        panic!("expected push context");
    };
    assert_eq!(ctx.media_part, 3);
    assert!(staged_files(&dir.path().join("staging")).is_empty());

    assert_advance(runner.run(&mut job, Step::MediaUploadRemote).await.unwrap());
    assert_advance(runner.run(&mut job, Step::SwapRemote).await.unwrap());
}

#[tokio::test]
async fn push_without_uploads_does_not_request_an_upload_swap() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let runner = runner_for(&dir, &server).await;
    std::fs::create_dir_all(dir.path().join("uploads")).unwrap();

    Mock::given(method("POST"))
        .and(path("/media/import"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/replication/swap"))
        .and(body_partial_json(json!({"swap_uploads": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Swapped 0 tables"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut job = media_job(SetType::Push, vec![Step::MediaUploadRemote, Step::SwapRemote]);

    assert_advance(runner.run(&mut job, Step::MediaUploadRemote).await.unwrap());
    assert_eq!(job.context.media_parts(), 0);
    assert_advance(runner.run(&mut job, Step::SwapRemote).await.unwrap());
}
