use std::fmt;

use url::Url;

/// A page to crawl and the depth it was discovered at.
///
/// Identity is the URL with its fragment stripped, so `/a#top` and `/a`
/// are the same page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRef {
    url: Url,
    depth: u32,
}

impl PageRef {
    /// Creates a page reference, dropping any fragment.
    #[must_use]
    pub fn new(mut url: Url, depth: u32) -> Self {
        url.set_fragment(None);
        Self { url, depth }
    }

    /// Parses an absolute http(s) URL. Returns `None` for anything else.
    #[must_use]
    pub fn parse(raw: &str, depth: u32) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        matches!(url.scheme(), "http" | "https").then(|| Self::new(url, depth))
    }

    /// The page URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Depth below the seed (seeds are depth 0).
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Key used for dedup and for the persisted visited set.
    #[must_use]
    pub fn key(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (depth {})", self.url, self.depth)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_is_stripped_from_identity() {
        let a = PageRef::parse("https://example.com/a#top", 0).unwrap();
        let b = PageRef::parse("https://example.com/a", 0).unwrap();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_parse_rejects_non_http_schemes() {
        assert!(PageRef::parse("mailto:someone@example.com", 0).is_none());
        assert!(PageRef::parse("ftp://example.com/file", 0).is_none());
        assert!(PageRef::parse("not a url", 0).is_none());
    }
}
