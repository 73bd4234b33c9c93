//! Page fetching seam and its HTTP implementation.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::PageRef;
use crate::download::{HttpClient, RateLimiter};

/// A fetched page body.
#[derive(Debug, Clone)]
pub struct PageContent {
    /// URL after redirects; relative links resolve against it.
    pub final_url: Url,
    /// Reported content type, if any.
    pub content_type: Option<String>,
    /// Decoded body text.
    pub body: String,
}

/// Page fetch failures. Never fatal to a run: the page is counted and abandoned.
#[derive(Debug, Error)]
pub enum PageFetchError {
    /// Transport-level failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// Page URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The page did not answer within the page timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// Page URL.
        url: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// Page URL.
        url: String,
        /// Status code.
        status: u16,
    },
}

impl PageFetchError {
    fn from_reqwest(url: &Url, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Retrieves page bodies for the extractor.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches one page.
    async fn fetch_page(&self, page: &PageRef) -> Result<PageContent, PageFetchError>;
}

/// [`PageFetcher`] over HTTP with per-host politeness delays.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: HttpClient,
    rate_limiter: Arc<RateLimiter>,
}

impl HttpPageFetcher {
    /// Creates a fetcher from a page client and a shared rate limiter.
    #[must_use]
    pub fn new(client: HttpClient, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            rate_limiter,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(skip(self), fields(url = %page.url(), depth = page.depth()))]
    async fn fetch_page(&self, page: &PageRef) -> Result<PageContent, PageFetchError> {
        self.rate_limiter.acquire(page.key()).await;

        let response = self
            .client
            .inner()
            .get(page.url().clone())
            .send()
            .await
            .map_err(|e| PageFetchError::from_reqwest(page.url(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PageFetchError::HttpStatus {
                url: page.url().to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| PageFetchError::from_reqwest(page.url(), e))?;

        debug!(bytes = body.len(), final_url = %final_url, "page fetched");
        Ok(PageContent {
            final_url,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpPageFetcher {
        HttpPageFetcher::new(
            HttpClient::for_pages("harvester-test", Duration::from_secs(5)).unwrap(),
            Arc::new(RateLimiter::disabled()),
        )
    }

    #[tokio::test]
    async fn test_fetch_page_returns_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes("<html><body>hi</body></html>".as_bytes()),
            )
            .mount(&server)
            .await;

        let page = PageRef::parse(&format!("{}/index", server.uri()), 0).unwrap();
        let content = fetcher().fetch_page(&page).await.unwrap();
        assert!(content.body.contains("hi"));
        assert_eq!(content.content_type.as_deref(), Some("text/html"));
        assert_eq!(content.final_url.path(), "/index");
    }

    #[tokio::test]
    async fn test_fetch_page_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let page = PageRef::parse(&format!("{}/down", server.uri()), 0).unwrap();
        let err = fetcher().fetch_page(&page).await.unwrap_err();
        assert!(matches!(err, PageFetchError::HttpStatus { status: 503, .. }));
    }
}
