//! Filename sanitization and working/final path derivation for transfers.
//!
//! Paths are deterministic per locator: the sanitized title plus a short
//! locator hash, so an interrupted transfer finds its working file again on
//! the next run and two items with the same title never share a file.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

use super::constants::{DEFAULT_MEDIA_EXTENSION, WORKING_FILE_SUFFIX};

/// Extensions recognised as media in locator paths (lowercase, no dot).
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "wmv", "flv", "webm", "mkv", "m4v", "3gp",
];

/// Maximum UTF-8 bytes kept from a title in a file name. Leaves room for
/// `_<hash>`, a collision suffix and the extension under the common
/// 255-byte name limit.
const MAX_STEM_TITLE_BYTES: usize = 200;

/// Hex characters of the locator hash used as disambiguator.
const LOCATOR_HASH_LEN: usize = 12;

/// Working and final locations for one locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPaths {
    /// In-progress file receiving bytes.
    pub working: PathBuf,
    /// Preferred destination once verified.
    pub final_path: PathBuf,
}

impl TransferPaths {
    /// Derives the paths for `locator` titled `title` inside `output_dir`.
    #[must_use]
    pub fn derive(output_dir: &Path, title: &str, locator: &Url) -> Self {
        let stem = file_stem(title, locator);
        let ext = media_extension(locator);
        Self {
            working: output_dir.join(format!("{stem}.{WORKING_FILE_SUFFIX}")),
            final_path: output_dir.join(format!("{stem}.{ext}")),
        }
    }
}

/// `<sanitized title>_<locator hash>`.
fn file_stem(title: &str, locator: &Url) -> String {
    let mut base = sanitize_filename_component(title);
    if base.is_empty() {
        base = fallback_stem_from_url(locator);
    }
    let truncated = truncate_to_bytes(&base, MAX_STEM_TITLE_BYTES).trim_end_matches(['_', '.']);
    format!("{truncated}_{}", locator_hash(locator))
}

/// Longest prefix of `value` within `max_bytes`, cut on a char boundary.
fn truncate_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// First 12 hex characters of SHA-256 over the locator string.
#[must_use]
pub fn locator_hash(locator: &Url) -> String {
    let digest = Sha256::digest(locator.as_str().as_bytes());
    let mut hex = String::with_capacity(LOCATOR_HASH_LEN);
    for byte in digest.iter().take(LOCATOR_HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Media extension (no dot) from the locator path, or the default.
#[must_use]
pub fn media_extension(locator: &Url) -> &'static str {
    extension_from_url(locator)
        .and_then(|ext| MEDIA_EXTENSIONS.iter().copied().find(|known| *known == ext))
        .unwrap_or(DEFAULT_MEDIA_EXTENSION)
}

/// Returns true when the URL path ends with a recognised media extension.
#[must_use]
pub fn has_media_extension(url: &Url) -> bool {
    extension_from_url(url).is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

fn extension_from_url(url: &Url) -> Option<String> {
    let last_segment = url.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index + 1..];
    if ext.is_empty() || ext.len() > 11 {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Replaces filesystem-hostile characters and collapses runs of separators.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches(|c| c == '_' || c == '.').to_string();
    if is_safe_filename_segment(&trimmed) {
        trimmed
    } else {
        trimmed.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Stem from the decoded last path segment without its extension, or `video`.
fn fallback_stem_from_url(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
        let stem = decoded.rsplit_once('.').map_or(decoded.as_str(), |(s, _)| s);
        let cleaned = sanitize_filename_component(stem);
        if !cleaned.is_empty() {
            return cleaned;
        }
    }
    "video".to_string()
}

/// Returns `preferred` if free, else the first free `stem_N.ext` for N >= 2.
pub(crate) fn resolve_unique_path(preferred: &Path) -> PathBuf {
    if !preferred.exists() {
        return preferred.to_path_buf();
    }

    let dir = preferred.parent().unwrap_or_else(|| Path::new("."));
    let stem = preferred
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = preferred
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for i in 2..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}
