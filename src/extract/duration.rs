//! Play-time heuristics for media references.
//!
//! Durations come from markup attributes, nearby text, or the locator itself.
//! All parsers return `None` rather than guessing; the caller applies
//! [`DEFAULT_DURATION_SECS`] when every source comes up empty.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Estimate used when no source yields a duration.
pub const DEFAULT_DURATION_SECS: u64 = 600;

/// Attributes consulted, in order, for an explicit duration.
pub const DURATION_ATTRIBUTES: &[&str] =
    &["data-duration", "duration", "data-length", "length", "data-time"];

/// `HH:MM:SS`
#[allow(clippy::expect_used)]
static CLOCK_HMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+):(\d+):(\d+)").expect("HMS regex is valid") // Static pattern, safe to panic
});

/// `MM:SS`
#[allow(clippy::expect_used)]
static CLOCK_MS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+):(\d+)").expect("MS regex is valid") // Static pattern, safe to panic
});

/// `12 min`, `12min`
#[allow(clippy::expect_used)]
static TEXT_MINUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*min").expect("minutes regex is valid") // Static pattern, safe to panic
});

/// `2 hr`, `2hr`
#[allow(clippy::expect_used)]
static TEXT_HOURS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*hr").expect("hours regex is valid") // Static pattern, safe to panic
});

/// `duration=12`, `dur_12`, `time-12` in a locator, in minutes.
#[allow(clippy::expect_used)]
static URL_KEYED_MINUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:duration|dur|time)[=_-](\d+)").expect("keyed duration regex is valid") // Static pattern, safe to panic
});

/// `12min` in a locator.
#[allow(clippy::expect_used)]
static URL_MINUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)min").expect("URL minutes regex is valid") // Static pattern, safe to panic
});

fn group_u64(captures: &regex::Captures<'_>, index: usize) -> Option<u64> {
    captures.get(index)?.as_str().parse().ok()
}

fn hms(captures: &regex::Captures<'_>) -> Option<u64> {
    let hours = group_u64(captures, 1)?;
    let minutes = group_u64(captures, 2)?;
    let seconds = group_u64(captures, 3)?;
    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

fn ms(captures: &regex::Captures<'_>) -> Option<u64> {
    let minutes = group_u64(captures, 1)?;
    let seconds = group_u64(captures, 2)?;
    minutes.checked_mul(60)?.checked_add(seconds)
}

fn scaled(re: &Regex, haystack: &str, factor: u64) -> Option<u64> {
    let captures = re.captures(haystack)?;
    group_u64(&captures, 1)?.checked_mul(factor)
}

/// Finds a duration in free text: clock notation first, then `N min`, then `N hr`.
#[must_use]
pub fn from_text(text: &str) -> Option<u64> {
    if let Some(c) = CLOCK_HMS.captures(text) {
        return hms(&c);
    }
    if let Some(c) = CLOCK_MS.captures(text) {
        return ms(&c);
    }
    scaled(&TEXT_MINUTES, text, 60).or_else(|| scaled(&TEXT_HOURS, text, 3600))
}

/// Parses an attribute value: bare digits are seconds, anything else is text.
#[must_use]
pub fn from_attribute(value: &str) -> Option<u64> {
    let value = value.trim();
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return value.parse().ok();
    }
    from_text(value)
}

/// Finds a duration encoded in a locator's path or query.
///
/// The host and port are ignored so `host:8080` is never read as `MM:SS`.
#[must_use]
pub fn from_locator(locator: &Url) -> Option<u64> {
    let locator = match locator.query() {
        Some(query) => format!("{}?{query}", locator.path()),
        None => locator.path().to_string(),
    };
    let locator = locator.as_str();
    if let Some(minutes) = scaled(&URL_KEYED_MINUTES, locator, 60) {
        return Some(minutes);
    }
    if let Some(minutes) = scaled(&URL_MINUTES, locator, 60) {
        return Some(minutes);
    }
    if let Some(c) = CLOCK_HMS.captures(locator) {
        return hms(&c);
    }
    CLOCK_MS.captures(locator).and_then(|c| ms(&c))
}
