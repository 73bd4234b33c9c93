//! HTTP client wrapper for page fetches and resumable media transfers.
//!
//! Two flavours share one type: page clients decompress bodies and keep a
//! cookie store for the crawl session, transfer clients leave bodies encoded
//! so byte offsets on disk match the offsets the server counts.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::DownloadError;

/// How the body of a media response relates to the existing working file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    /// The server honoured the range; append after `offset` bytes.
    Append {
        /// Bytes already on disk.
        offset: u64,
    },
    /// The body starts at byte zero; truncate the working file first.
    Restart,
}

/// An open media response with its resume plan and declared total size.
#[derive(Debug)]
pub struct MediaResponse {
    /// Response whose body is still unread.
    pub response: reqwest::Response,
    /// Whether to append or restart.
    pub plan: ResumePlan,
    /// Total resource size the server declared, if any.
    pub declared_total: Option<u64>,
}

/// HTTP client shared by page fetchers or transfer engines.
///
/// Create once and clone freely; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Client for page fetches: gzip, cookie store, total request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend fails to initialise.
    #[instrument(level = "debug", skip(user_agent))]
    pub fn for_pages(user_agent: &str, timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .cookie_store(true)
            .user_agent(user_agent)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;
        Ok(Self { client })
    }

    /// Client for media transfers: no transparent decompression, per-read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend fails to initialise.
    #[instrument(level = "debug", skip(user_agent))]
    pub fn for_transfers(
        user_agent: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .gzip(false)
            .user_agent(user_agent)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;
        Ok(Self { client })
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Opens `url` for transfer, asking for bytes from `offset` when non-zero.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::HttpStatus`] for non-success statuses (including 416)
    /// - [`DownloadError::NotMedia`] when the server answers with an HTML document
    /// - [`DownloadError::UnexpectedRange`] when a 206 starts at neither `offset` nor zero
    /// - [`DownloadError::Timeout`] / [`DownloadError::Network`] for transport failures
    #[instrument(skip(self), fields(url = %url))]
    pub async fn open_media(&self, url: &Url, offset: u64) -> Result<MediaResponse, DownloadError> {
        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url.as_str(), status.as_u16()));
        }

        if let Some(content_type) = header_str(&response, CONTENT_TYPE)
            && is_html(content_type)
        {
            return Err(DownloadError::not_media(url.as_str(), content_type));
        }

        let content_length: Option<u64> =
            header_str(&response, CONTENT_LENGTH).and_then(|v| v.parse().ok());

        if status.as_u16() == 206 {
            let range = header_str(&response, CONTENT_RANGE).and_then(parse_content_range);
            let start = range.map(|r| r.start);
            let total = range.and_then(|r| r.total);
            return match start {
                Some(start) if start == offset && offset > 0 => Ok(MediaResponse {
                    response,
                    plan: ResumePlan::Append { offset },
                    declared_total: total.or(content_length.map(|len| offset + len)),
                }),
                Some(0) | None if offset == 0 => Ok(MediaResponse {
                    response,
                    plan: ResumePlan::Restart,
                    declared_total: total.or(content_length),
                }),
                Some(0) => {
                    warn!(offset, "server restarted range from zero");
                    Ok(MediaResponse {
                        response,
                        plan: ResumePlan::Restart,
                        declared_total: total.or(content_length),
                    })
                }
                received => Err(DownloadError::unexpected_range(
                    url.as_str(),
                    offset,
                    received,
                )),
            };
        }

        if offset > 0 {
            warn!(offset, status = status.as_u16(), "range not honoured, restarting from zero");
        }
        Ok(MediaResponse {
            response,
            plan: ResumePlan::Restart,
            declared_total: content_length,
        })
    }
}

fn map_transport_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

fn header_str(
    response: &reqwest::Response,
    name: reqwest::header::HeaderName,
) -> Option<&str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn is_html(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime.eq_ignore_ascii_case("text/html") || mime.eq_ignore_ascii_case("application/xhtml+xml")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    start: u64,
    total: Option<u64>,
}

/// Parses `bytes START-END/TOTAL` (TOTAL may be `*`).
fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange { start, total })
}

/// Streams a response body into `file` in `chunk_size` pieces.
///
/// Each piece is written and flushed before `on_chunk` sees its length, so
/// the file size never runs ahead of the reported count. The cancellation
/// flag is checked between network chunks. The file is fsynced on clean end.
pub(crate) async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    chunk_size: usize,
    cancel: &AtomicBool,
    mut on_chunk: impl FnMut(u64),
) -> Result<u64, DownloadError> {
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_transport_error(url, e))?;

        for piece in chunk.chunks(chunk_size.max(1)) {
            file.write_all(piece)
                .await
                .map_err(|e| DownloadError::io(file_path, e))?;
            file.flush()
                .await
                .map_err(|e| DownloadError::io(file_path, e))?;
            bytes_written += piece.len() as u64;
            on_chunk(piece.len() as u64);
        }

        if cancel.load(Ordering::SeqCst) {
            debug!(url, bytes_written, "transfer interrupted between chunks");
            return Err(DownloadError::cancelled(url));
        }
    }

    file.sync_all()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transfer_client() -> HttpClient {
        HttpClient::for_transfers(
            "harvester-test",
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_content_range_with_total() {
        assert_eq!(
            parse_content_range("bytes 100-199/1000"),
            Some(ContentRange {
                start: 100,
                total: Some(1000)
            })
        );
    }

    #[test]
    fn test_parse_content_range_unknown_total() {
        assert_eq!(
            parse_content_range("bytes 5-9/*"),
            Some(ContentRange {
                start: 5,
                total: None
            })
        );
    }

    #[test]
    fn test_parse_content_range_rejects_garbage() {
        assert_eq!(parse_content_range("items 1-2/3"), None);
        assert_eq!(parse_content_range("bytes abc"), None);
    }

    #[test]
    fn test_is_html_ignores_parameters_and_case() {
        assert!(is_html("text/html; charset=utf-8"));
        assert!(is_html("TEXT/HTML"));
        assert!(!is_html("video/mp4"));
    }

    #[tokio::test]
    async fn test_open_media_fresh_uses_content_length() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp4")
                    .set_body_bytes(vec![7u8; 64]),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/clip.mp4", server.uri())).unwrap();
        let media = transfer_client().open_media(&url, 0).await.unwrap();
        assert_eq!(media.plan, ResumePlan::Restart);
        assert_eq!(media.declared_total, Some(64));
    }

    #[tokio::test]
    async fn test_open_media_honoured_range_appends() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .and(header("range", "bytes=40-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-type", "video/mp4")
                    .insert_header("content-range", "bytes 40-99/100")
                    .set_body_bytes(vec![1u8; 60]),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/clip.mp4", server.uri())).unwrap();
        let media = transfer_client().open_media(&url, 40).await.unwrap();
        assert_eq!(media.plan, ResumePlan::Append { offset: 40 });
        assert_eq!(media.declared_total, Some(100));
    }

    #[tokio::test]
    async fn test_open_media_ignored_range_restarts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp4")
                    .set_body_bytes(vec![1u8; 100]),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/clip.mp4", server.uri())).unwrap();
        let media = transfer_client().open_media(&url, 40).await.unwrap();
        assert_eq!(media.plan, ResumePlan::Restart);
        assert_eq!(media.declared_total, Some(100));
    }

    #[tokio::test]
    async fn test_open_media_wrong_range_start_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-type", "video/mp4")
                    .insert_header("content-range", "bytes 10-99/100")
                    .set_body_bytes(vec![1u8; 90]),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/clip.mp4", server.uri())).unwrap();
        let err = transfer_client().open_media(&url, 40).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::UnexpectedRange {
                requested: 40,
                received: Some(10),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_open_media_html_is_not_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/watch"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_bytes("<html></html>".as_bytes()),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/watch", server.uri())).unwrap();
        let err = transfer_client().open_media(&url, 0).await.unwrap_err();
        assert!(matches!(err, DownloadError::NotMedia { .. }));
    }

    #[tokio::test]
    async fn test_open_media_404_is_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/gone.mp4", server.uri())).unwrap();
        let err = transfer_client().open_media(&url, 0).await.unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_stream_to_file_writes_all_bytes_in_chunks() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp4")
                    .set_body_bytes(body.clone()),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/c.mp4", server.uri())).unwrap();
        let media = transfer_client().open_media(&url, 0).await.unwrap();

        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("c.part");
        let mut file = File::create(&file_path).await.unwrap();
        let cancel = AtomicBool::new(false);
        let mut chunks = 0usize;
        let written = stream_to_file(
            &mut file,
            media.response,
            url.as_str(),
            &file_path,
            1024,
            &cancel,
            |_| chunks += 1,
        )
        .await
        .unwrap();

        assert_eq!(written, 5000);
        assert!(chunks >= 5);
        assert_eq!(std::fs::read(&file_path).unwrap(), body);
    }
}
