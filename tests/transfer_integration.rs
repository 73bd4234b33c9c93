//! Integration tests for the transfer engine against mock media servers.
//!
//! Covers resume, restart when a range is ignored, verification failures,
//! attempt budgets persisted across runs, cancellation mid-stream and path
//! disambiguation.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use harvester_core::download::filename::TransferPaths;
use harvester_core::{
    FailureReason, HttpClient, ProgressRecord, ProgressStore, RetryPolicy, SkipReason,
    TransferEngine, TransferOutcome,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, Request, Respond, ResponseTemplate};

mod support;
use support::socket_guard::{should_skip_socket_bound_test, start_mock_server_or_skip};
use support::{item, payload};

/// Serves a fixed body, honouring `Range: bytes=N-` when asked to.
struct RangeServer {
    body: Vec<u8>,
    honor_range: bool,
    /// Cut the first response short while declaring the full size.
    truncate_first_at: Option<usize>,
    calls: AtomicUsize,
}

impl RangeServer {
    fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            honor_range: true,
            truncate_first_at: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn ignoring_ranges(mut self) -> Self {
        self.honor_range = false;
        self
    }

    fn truncating_first_at(mut self, cut: usize) -> Self {
        self.truncate_first_at = Some(cut);
        self
    }
}

fn requested_offset(request: &Request) -> Option<usize> {
    request
        .headers
        .get("range")?
        .to_str()
        .ok()?
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

impl Respond for RangeServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let total = self.body.len();

        if self.honor_range
            && let Some(start) = requested_offset(request)
        {
            if start >= total {
                return ResponseTemplate::new(416)
                    .insert_header("content-range", format!("bytes */{total}").as_str());
            }
            return ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes {start}-{}/{total}", total - 1).as_str(),
                )
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(self.body[start..].to_vec());
        }

        if call == 0
            && let Some(cut) = self.truncate_first_at
        {
            return ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes 0-{}/{total}", cut - 1).as_str(),
                )
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(self.body[..cut].to_vec());
        }

        ResponseTemplate::new(200)
            .insert_header("content-type", "video/mp4")
            .set_body_bytes(self.body.clone())
    }
}

fn store_in(dir: &Path) -> Arc<ProgressStore> {
    Arc::new(ProgressStore::with_record(
        dir.join("download_progress.json"),
        ProgressRecord::default(),
    ))
}

fn engine(dir: &Path, store: Arc<ProgressStore>, max_attempts: u32) -> TransferEngine {
    let client = HttpClient::for_transfers(
        "harvester-test",
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .unwrap();
    TransferEngine::new(
        client,
        store,
        RetryPolicy::new(max_attempts, Duration::from_millis(10)),
        dir,
    )
    .with_chunk_size(1024)
}

fn success_path(outcome: &TransferOutcome) -> std::path::PathBuf {
    match outcome {
        TransferOutcome::Success { path, .. } => path.clone(),
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_interrupted_transfer_resumes_byte_identical() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let body = payload(10_000);
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(RangeServer::new(body.clone()))
        .mount(&server)
        .await;

    let item = item(&server.uri(), "/clip.mp4", "Resumable Clip");
    let paths = TransferPaths::derive(dir.path(), &item.title, &item.locator);
    std::fs::write(&paths.working, &body[..4_000]).unwrap();

    let store = store_in(dir.path());
    let outcome = engine(dir.path(), Arc::clone(&store), 3).transfer(&item).await;

    let final_path = success_path(&outcome);
    assert_eq!(std::fs::read(&final_path).unwrap(), body);
    assert!(!paths.working.exists());
    assert!(store.is_completed(item.locator_key()));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers.get("range").unwrap(), "bytes=4000-");
}

#[tokio::test]
async fn test_full_reply_to_range_request_restarts_from_zero() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let body = payload(6_000);
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(RangeServer::new(body.clone()).ignoring_ranges())
        .mount(&server)
        .await;

    let item = item(&server.uri(), "/clip.mp4", "Clip");
    let paths = TransferPaths::derive(dir.path(), &item.title, &item.locator);
    std::fs::write(&paths.working, vec![0xAA; 2_500]).unwrap();

    let outcome = engine(dir.path(), store_in(dir.path()), 3).transfer(&item).await;

    let final_path = success_path(&outcome);
    assert_eq!(std::fs::read(&final_path).unwrap(), body, "stale prefix discarded");
}

#[tokio::test]
async fn test_short_body_fails_verification_then_resumes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let body = payload(8_192);
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(RangeServer::new(body.clone()).truncating_first_at(3_000))
        .mount(&server)
        .await;

    let item = item(&server.uri(), "/clip.mp4", "Clip");
    let store = store_in(dir.path());
    let outcome = engine(dir.path(), Arc::clone(&store), 3).transfer(&item).await;

    assert_eq!(std::fs::read(success_path(&outcome)).unwrap(), body);
    assert_eq!(store.attempt_count(item.locator_key()), 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("range").is_none());
    assert_eq!(requests[1].headers.get("range").unwrap(), "bytes=3000-");
}

#[tokio::test]
async fn test_unsatisfiable_range_discards_working_file_and_retries() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let body = payload(4_096);
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(RangeServer::new(body.clone()))
        .mount(&server)
        .await;

    let item = item(&server.uri(), "/clip.mp4", "Clip");
    let paths = TransferPaths::derive(dir.path(), &item.title, &item.locator);
    std::fs::write(&paths.working, vec![0u8; 9_000]).unwrap();

    let outcome = engine(dir.path(), store_in(dir.path()), 3).transfer(&item).await;

    assert_eq!(std::fs::read(success_path(&outcome)).unwrap(), body);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_attempt_counter_is_bounded_across_restarts() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/flaky.mp4"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let item = item(&server.uri(), "/flaky.mp4", "Flaky");

    let store = store_in(dir.path());
    let first = engine(dir.path(), Arc::clone(&store), 3).transfer(&item).await;
    match first {
        TransferOutcome::Failed {
            reason: FailureReason::ExhaustedRetries { attempts, last },
        } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last.as_deref(), Some(FailureReason::Network { .. })));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    store.flush().await.unwrap();
    drop(store);

    let restored = Arc::new(ProgressStore::load(&dir.path().join("download_progress.json")).await.unwrap());
    assert_eq!(restored.attempt_count(item.locator_key()), 3);

    let second = engine(dir.path(), Arc::clone(&restored), 3).transfer(&item).await;
    assert_eq!(
        second,
        TransferOutcome::failed(FailureReason::ExhaustedRetries {
            attempts: 3,
            last: None,
        })
    );
    assert_eq!(restored.attempt_count(item.locator_key()), 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_restored_completed_locator_is_never_requested() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(16)))
        .expect(0)
        .mount(&server)
        .await;

    let item = item(&server.uri(), "/done.mp4", "Done");
    let progress = dir.path().join("download_progress.json");
    std::fs::write(
        &progress,
        format!(
            r#"{{"completedLocators":["{0}"],"visitedPages":[],"minDurationSeconds":300,"attemptCounters":{{"{0}":1}}}}"#,
            item.locator
        ),
    )
    .unwrap();

    let store = Arc::new(ProgressStore::load(&progress).await.unwrap());
    let outcome = engine(dir.path(), store, 3).transfer(&item).await;

    assert_eq!(outcome, TransferOutcome::skipped(SkipReason::AlreadyCompleted));
}

#[tokio::test]
async fn test_same_title_yields_distinct_paths() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/a.mp4"))
        .respond_with(RangeServer::new(payload(1_500)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.mp4"))
        .respond_with(RangeServer::new(payload(2_500)))
        .mount(&server)
        .await;

    let a = item(&server.uri(), "/a.mp4", "Same Title");
    let b = item(&server.uri(), "/b.mp4", "Same Title");
    let pa = TransferPaths::derive(dir.path(), &a.title, &a.locator);
    let pb = TransferPaths::derive(dir.path(), &b.title, &b.locator);
    assert_ne!(pa.working, pb.working);
    assert_ne!(pa.final_path, pb.final_path);

    let engine = engine(dir.path(), store_in(dir.path()), 3);
    let (oa, ob) = tokio::join!(engine.transfer(&a), engine.transfer(&b));
    let (path_a, path_b) = (success_path(&oa), success_path(&ob));

    assert_ne!(path_a, path_b);
    assert_eq!(std::fs::metadata(path_a).unwrap().len(), 1_500);
    assert_eq!(std::fs::metadata(path_b).unwrap().len(), 2_500);
}

/// Raw HTTP server for one media body. Fresh requests get `stall_at` bytes,
/// then one more slice once `release` is notified, and the connection is held
/// open until the client hangs up. Ranged requests get the remainder as 206.
async fn serve_stalling(
    listener: TcpListener,
    body: Arc<Vec<u8>>,
    stall_at: usize,
    release: Arc<Notify>,
) {
    loop {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let body = Arc::clone(&body);
        let release = Arc::clone(&release);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            let Ok(n) = socket.read(&mut buf).await else {
                return;
            };
            let request = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
            let total = body.len();
            let start = request
                .split("range: bytes=")
                .nth(1)
                .and_then(|rest| rest.split('-').next())
                .and_then(|digits| digits.trim().parse::<usize>().ok());

            if let Some(start) = start {
                let head = format!(
                    "HTTP/1.1 206 Partial Content\r\ncontent-type: video/mp4\r\n\
                     content-range: bytes {start}-{}/{total}\r\ncontent-length: {}\r\n\
                     connection: close\r\n\r\n",
                    total - 1,
                    total - start
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body[start..]).await;
                let _ = socket.shutdown().await;
                return;
            }

            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: video/mp4\r\ncontent-length: {total}\r\n\
                 connection: close\r\n\r\n"
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&body[..stall_at]).await;
            let _ = socket.flush().await;
            release.notified().await;
            let _ = socket.write_all(&body[stall_at..stall_at + 1_000]).await;
            let _ = socket.flush().await;
            // Hold the connection until the client drops it.
            let mut sink = [0u8; 64];
            while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
        });
    }
}

async fn wait_for_len(path: &Path, at_least: u64) {
    for _ in 0..500 {
        if std::fs::metadata(path).is_ok_and(|meta| meta.len() >= at_least) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {at_least} bytes", path.display());
}

#[tokio::test]
async fn test_cancel_mid_stream_keeps_resumable_prefix_and_budget() {
    if should_skip_socket_bound_test() {
        return;
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let body = Arc::new(payload(20_000));
    let release = Arc::new(Notify::new());
    tokio::spawn(serve_stalling(
        listener,
        Arc::clone(&body),
        6_000,
        Arc::clone(&release),
    ));

    let dir = TempDir::new().unwrap();
    let item = item(&base, "/clip.mp4", "Interrupted Clip");
    let paths = TransferPaths::derive(dir.path(), &item.title, &item.locator);
    let store = store_in(dir.path());
    let cancel = Arc::new(AtomicBool::new(false));

    // Budget of one attempt: a cancelled attempt must not use it up.
    let first = Arc::new(engine(dir.path(), Arc::clone(&store), 1).with_cancel_flag(Arc::clone(&cancel)));
    let running = tokio::spawn({
        let first = Arc::clone(&first);
        let item = item.clone();
        async move { first.transfer(&item).await }
    });
    wait_for_len(&paths.working, 6_000).await;
    cancel.store(true, Ordering::SeqCst);
    release.notify_one();

    let outcome = running.await.unwrap();
    assert_eq!(outcome, TransferOutcome::failed(FailureReason::Cancelled));
    let partial = std::fs::read(&paths.working).unwrap();
    assert!(partial.len() >= 6_000 && partial.len() < body.len(), "{} bytes", partial.len());
    assert_eq!(&partial[..], &body[..partial.len()]);
    assert_eq!(store.attempt_count(item.locator_key()), 0);

    store.flush().await.unwrap();
    let restored = Arc::new(
        ProgressStore::load(&dir.path().join("download_progress.json"))
            .await
            .unwrap(),
    );
    let second = engine(dir.path(), Arc::clone(&restored), 1).transfer(&item).await;

    assert_eq!(std::fs::read(success_path(&second)).unwrap(), *body);
    assert!(!paths.working.exists());
    assert_eq!(restored.attempt_count(item.locator_key()), 1);
}

#[tokio::test]
async fn test_long_multibyte_title_transfers() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/long-title.mp4"))
        .respond_with(RangeServer::new(payload(3_000)))
        .mount(&server)
        .await;

    let item = item(&server.uri(), "/long-title.mp4", &"长视频标题".repeat(20));
    let outcome = engine(dir.path(), store_in(dir.path()), 1).transfer(&item).await;

    let final_path = success_path(&outcome);
    assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 3_000);
    assert!(final_path.file_name().unwrap().len() <= 255);
}
