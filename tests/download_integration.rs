//! Integration tests for the download queue.
//!
//! These tests verify the full download flow with mock HTTP servers.

mod support;
use support::socket_guard::start_mock_server_or_skip;

use std::time::Duration;

use pagewalk_core::{Client, DownloadEvent, DownloadState, ErrorKind, StreamState};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_asset(server: &MockServer, route: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("accept-encoding", "identity"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(content.to_vec(), "image/png"))
        .mount(server)
        .await;
}

async fn next_event(events: &mut UnboundedReceiver<DownloadEvent>) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event should arrive in time")
        .expect("event channel should stay open")
}

/// Collects events up to and including `End`, reading every ready stream.
async fn drain(events: &mut UnboundedReceiver<DownloadEvent>) -> (Vec<String>, Vec<Vec<u8>>, Vec<(String, ErrorKind)>) {
    let mut added = Vec::new();
    let mut bodies = Vec::new();
    let mut errors = Vec::new();
    loop {
        match next_event(events).await {
            DownloadEvent::Add(url) => added.push(url),
            DownloadEvent::Ready(stream) => bodies.push(stream.to_bytes().await.expect("stream should read")),
            DownloadEvent::Error { url, error } => {
                let kind = match error.kind() {
                    ErrorKind::ServerStatus { status_code } => ErrorKind::ServerStatus {
                        status_code: *status_code,
                    },
                    ErrorKind::Timeout => ErrorKind::Timeout,
                    other => panic!("unexpected download error: {other}"),
                };
                errors.push((url, kind));
            }
            DownloadEvent::End => return (added, bodies, errors),
        }
    }
}

#[tokio::test]
async fn test_selection_download_dedups_and_completes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_asset(&server, "/a.png", b"PNG-A").await;
    Mock::given(method("GET"))
        .and(path("/gallery"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<img src="/a.png"><img src="a.png"><img data-src="/lazy.png">"#,
            "text/html",
        ))
        .mount(&server)
        .await;

    let client = Client::new();
    let downloads = client.download();
    let mut events = downloads.events().expect("receiver not taken yet");

    let page = client.fetch(&format!("{}/gallery", server.uri())).await.unwrap();
    let accepted = page.select("img").unwrap().download(&[]).unwrap();
    assert_eq!(accepted, 1, "relative and absolute forms resolve to one URL");

    let (added, bodies, errors) = drain(&mut events).await;
    assert_eq!(added, vec![format!("{}/a.png", server.uri())]);
    assert_eq!(bodies, vec![b"PNG-A".to_vec()]);
    assert!(errors.is_empty());
    assert_eq!(
        downloads.state(),
        DownloadState {
            queue: 0,
            complete: 1,
            error: 0
        }
    );
}

#[tokio::test]
async fn test_same_url_queued_once_until_cache_cleared() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_asset(&server, "/logo.png", b"LOGO").await;

    let client = Client::new();
    let downloads = client.download();
    let mut events = downloads.events().unwrap();
    let url = format!("{}/logo.png", server.uri());

    assert!(downloads.enqueue(&url).unwrap());
    assert!(!downloads.enqueue(&url).unwrap());
    let (added, _, _) = drain(&mut events).await;
    assert_eq!(added.len(), 1);

    assert!(!downloads.enqueue(&url).unwrap(), "still cached after completion");
    downloads.clear_cache();
    assert!(downloads.enqueue(&url).unwrap());
    let (added, bodies, _) = drain(&mut events).await;
    assert_eq!(added.len(), 1);
    assert_eq!(bodies, vec![b"LOGO".to_vec()]);
    assert_eq!(downloads.state().complete, 2);
}

#[tokio::test]
async fn test_non_2xx_reports_error_event() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404).set_body_raw("missing", "text/plain"))
        .mount(&server)
        .await;

    let client = Client::new();
    let downloads = client.download();
    let mut events = downloads.events().unwrap();
    downloads.enqueue(&format!("{}/gone.png", server.uri())).unwrap();

    let (_, bodies, errors) = drain(&mut events).await;
    assert!(bodies.is_empty());
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].1, ErrorKind::ServerStatus { status_code: 404 }));
    assert_eq!(downloads.state().error, 1);
}

#[tokio::test]
async fn test_parallel_batch_and_save_as() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    for i in 0..4 {
        mount_asset(&server, &format!("/img{i}.png"), format!("IMG{i}").as_bytes()).await;
    }
    let dir = TempDir::new().expect("failed to create temp dir");

    let client = Client::new();
    let downloads = client.download();
    downloads.set_parallel(2);
    let mut events = downloads.events().unwrap();
    for i in 0..4 {
        downloads.enqueue(&format!("{}/img{i}.png", server.uri())).unwrap();
    }

    let mut saved = 0;
    loop {
        match next_event(&mut events).await {
            DownloadEvent::Ready(stream) => {
                let name = stream.url().rsplit('/').next().unwrap().to_string();
                let written = stream.save_as(dir.path().join(&name)).await.unwrap();
                assert_eq!(written, 4);
                assert_eq!(stream.state(), StreamState::Complete);
                saved += 1;
            }
            DownloadEvent::End => break,
            DownloadEvent::Add(_) => {}
            DownloadEvent::Error { url, error } => panic!("{url} failed: {error}"),
        }
    }
    assert_eq!(saved, 4);
    for i in 0..4 {
        let content = std::fs::read(dir.path().join(format!("img{i}.png"))).unwrap();
        assert_eq!(content, format!("IMG{i}").into_bytes());
    }
    assert_eq!(downloads.state().complete, 4);
}

#[tokio::test]
async fn test_unread_stream_times_out() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_asset(&server, "/slow.png", b"NEVER READ").await;

    let client = Client::new();
    let downloads = client.download();
    downloads.set_timeout(Duration::from_millis(100));
    let mut events = downloads.events().unwrap();
    downloads.enqueue(&format!("{}/slow.png", server.uri())).unwrap();

    let mut held = Vec::new();
    let mut timed_out = false;
    loop {
        match next_event(&mut events).await {
            DownloadEvent::Ready(stream) => held.push(stream),
            DownloadEvent::Error { error, .. } => {
                timed_out = matches!(error.kind(), ErrorKind::Timeout);
            }
            DownloadEvent::End => break,
            DownloadEvent::Add(_) => {}
        }
    }
    assert!(timed_out);
    assert_eq!(held[0].state(), StreamState::Errored);
    assert_eq!(downloads.state().error, 1);
}

#[tokio::test]
async fn test_fork_funnels_into_root_queue() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_asset(&server, "/shared.png", b"SHARED").await;

    let root = Client::new();
    let child = root.fork();
    let mut events = root.download().events().unwrap();

    assert!(child.download().enqueue(&format!("{}/shared.png", server.uri())).unwrap());
    assert!(!root.download().enqueue(&format!("{}/shared.png", server.uri())).unwrap());

    let (added, bodies, _) = drain(&mut events).await;
    assert_eq!(added.len(), 1);
    assert_eq!(bodies, vec![b"SHARED".to_vec()]);
}

#[tokio::test]
async fn test_invalid_parallelism_fails_before_queuing() {
    let client = Client::new();
    let downloads = client.download();
    downloads.set_parallel(6);
    let err = downloads.enqueue("https://example.com/a.png").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidParallelism { value: 6 }));
    assert_eq!(downloads.state(), DownloadState::default());
}
