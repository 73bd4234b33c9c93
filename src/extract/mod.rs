//! Turning fetched pages into candidate items and follow-up links.
//!
//! The pipeline only depends on the [`CandidateExtractor`] trait; the
//! bundled [`HtmlExtractor`] is one implementation.

pub mod duration;
mod html;

use thiserror::Error;
use url::Url;

use crate::frontier::{PageContent, PageRef};
use crate::item::CandidateItem;

pub use html::{HtmlExtractor, MAX_TITLE_CHARS};

/// Everything one page yielded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Media references found on the page.
    pub items: Vec<CandidateItem>,
    /// Absolute page links worth crawling.
    pub links: Vec<Url>,
}

/// Extraction failures. Non-fatal: the page's items are skipped and counted.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The page body is not markup the extractor understands.
    #[error("{url} is not HTML (content type {content_type})")]
    NotHtml {
        /// Page URL.
        url: String,
        /// Reported content type.
        content_type: String,
    },

    /// Extractor-specific failure.
    #[error("failed to extract {url}: {message}")]
    Malformed {
        /// Page URL.
        url: String,
        /// What went wrong.
        message: String,
    },
}

impl ExtractionError {
    /// Creates a [`ExtractionError::NotHtml`].
    #[must_use]
    pub fn not_html(url: &Url, content_type: impl Into<String>) -> Self {
        Self::NotHtml {
            url: url.to_string(),
            content_type: content_type.into(),
        }
    }

    /// Creates a [`ExtractionError::Malformed`].
    #[must_use]
    pub fn malformed(url: &Url, message: impl Into<String>) -> Self {
        Self::Malformed {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

/// Pulls candidate items and links out of a fetched page.
pub trait CandidateExtractor: Send + Sync {
    /// Extracts from one page.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError`] when the page cannot be interpreted.
    fn extract(&self, page: &PageRef, content: &PageContent)
    -> Result<Extraction, ExtractionError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_page() {
        let url = Url::parse("https://site.test/feed").unwrap();
        let err = ExtractionError::not_html(&url, "application/json");
        assert_eq!(
            err.to_string(),
            "https://site.test/feed is not HTML (content type application/json)"
        );
        let err = ExtractionError::malformed(&url, "truncated body");
        assert!(err.to_string().contains("truncated body"));
    }
}
