//! Selector-based extraction of media references and crawlable links.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};
use url::Url;

use super::duration::{self, DEFAULT_DURATION_SECS, DURATION_ATTRIBUTES};
use super::{CandidateExtractor, Extraction, ExtractionError};
use crate::download::filename::has_media_extension;
use crate::frontier::{PageContent, PageRef};
use crate::item::CandidateItem;

/// Longest title kept, in characters.
pub const MAX_TITLE_CHARS: usize = 100;

/// How many ancestors are searched for duration text.
const DURATION_ANCESTOR_DEPTH: usize = 3;

const TITLE_ATTRIBUTES: &[&str] = &["title", "alt", "data-title"];

const HEADINGS: &[&str] = &["h1", "h2", "h3", "h4"];

const CAPTION_CLASS_HINTS: &[&str] = &["title", "name", "caption"];

/// Schemes that never lead anywhere crawlable.
const EXCLUDED_PREFIXES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

#[allow(clippy::expect_used)]
static VIDEO_SRC: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("video[src]").expect("video selector is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static VIDEO_SOURCE_SRC: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("video source[src]").expect("source selector is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static ANCHOR_HREF: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").expect("anchor selector is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static HEADING: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, h2, h3, h4").expect("heading selector is valid") // Static pattern, safe to panic
});

/// Default [`CandidateExtractor`] for HTML pages.
///
/// Media come from `<video src>`, `<video><source src>` and anchors whose
/// path ends in a known media extension. Links are same-host `http(s)`
/// anchors.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    /// Creates the extractor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CandidateExtractor for HtmlExtractor {
    fn extract(
        &self,
        page: &PageRef,
        content: &PageContent,
    ) -> Result<Extraction, ExtractionError> {
        if let Some(content_type) = content.content_type.as_deref()
            && !is_markup(content_type)
        {
            return Err(ExtractionError::not_html(page.url(), content_type));
        }

        let document = Html::parse_document(&content.body);
        let base = &content.final_url;

        let items = extract_items(&document, base);
        let links = extract_links(&document, base);
        debug!(page = %page, items = items.len(), links = links.len(), "page extracted");
        Ok(Extraction { items, links })
    }
}

fn is_markup(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.is_empty() || mime == "text/html" || mime == "application/xhtml+xml"
}

fn extract_items(document: &Html, base: &Url) -> Vec<CandidateItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    let media = document
        .select(&VIDEO_SRC)
        .map(|el| (el, "src"))
        .chain(document.select(&VIDEO_SOURCE_SRC).map(|el| (el, "src")))
        .chain(document.select(&ANCHOR_HREF).map(|el| (el, "href")));

    for (element, attr) in media {
        let Some(raw) = element.value().attr(attr) else {
            continue;
        };
        let Some(locator) = resolve(raw, base) else {
            continue;
        };
        if attr == "href" && !has_media_extension(&locator) {
            continue;
        }
        if !seen.insert(locator.as_str().to_string()) {
            continue;
        }

        let title = title_for(element);
        let estimated_duration_secs = duration_for(element, &locator);
        trace!(locator = %locator, title = %title, estimated_duration_secs, "media reference");
        items.push(CandidateItem::new(
            locator,
            title,
            estimated_duration_secs,
            base.clone(),
        ));
    }
    items
}

fn extract_links(document: &Html, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    document
        .select(&ANCHOR_HREF)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve(href, base))
        .filter(|url| url.host_str() == base.host_str())
        .filter(|url| !has_media_extension(url))
        .filter(|url| seen.insert(url.as_str().to_string()))
        .collect()
}

/// Resolves `raw` against `base`, keeping only `http(s)` targets without fragments.
fn resolve(raw: &str, base: &Url) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lowered = raw.to_ascii_lowercase();
    if EXCLUDED_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_title(text: &str) -> Option<String> {
    let collapsed = collapse_whitespace(text);
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_TITLE_CHARS).collect())
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

/// Title sources in order: attributes, own text, nearest preceding heading,
/// enclosing caption-like `div`.
fn title_for(element: ElementRef<'_>) -> String {
    TITLE_ATTRIBUTES
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .find_map(clean_title)
        .or_else(|| clean_title(&element_text(element)))
        .or_else(|| preceding_heading(element).and_then(|h| clean_title(&element_text(h))))
        .or_else(|| caption_ancestor(element).and_then(|d| clean_title(&element_text(d))))
        .unwrap_or_else(fallback_title)
}

/// Nearest `h1`-`h4` before `element` in document order.
fn preceding_heading(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let mut current = Some(*element);
    while let Some(node) = current {
        for sibling in node.prev_siblings() {
            let Some(sibling) = ElementRef::wrap(sibling) else {
                continue;
            };
            if HEADINGS.contains(&sibling.value().name()) {
                return Some(sibling);
            }
            if let Some(nested) = sibling.select(&HEADING).last() {
                return Some(nested);
            }
        }
        current = node.parent();
    }
    None
}

fn caption_ancestor(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "div")
        .find(|el| {
            el.value().classes().any(|class| {
                let class = class.to_ascii_lowercase();
                CAPTION_CLASS_HINTS.iter().any(|hint| class.contains(hint))
            })
        })
}

fn fallback_title() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("video_{secs}")
}

/// Duration sources in order: attributes, ancestor text, locator, default.
fn duration_for(element: ElementRef<'_>, locator: &Url) -> u64 {
    DURATION_ATTRIBUTES
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .filter_map(duration::from_attribute)
        .find(|secs| *secs > 0)
        .or_else(|| {
            element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .take(DURATION_ANCESTOR_DEPTH)
                .filter_map(|el| duration::from_text(&element_text(el)))
                .find(|secs| *secs > 0)
        })
        .or_else(|| duration::from_locator(locator).filter(|secs| *secs > 0))
        .unwrap_or(DEFAULT_DURATION_SECS)
}
