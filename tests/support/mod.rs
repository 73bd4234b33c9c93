//! Helpers shared by the integration test binaries.

#![allow(dead_code)]

pub mod socket_guard;

use url::Url;

use harvester_core::CandidateItem;

/// Deterministic, non-repeating payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from((i * 31 + i / 251) % 251).unwrap_or(0)).collect()
}

/// Candidate item for a locator on the mock server.
pub fn item(base: &str, path: &str, title: &str) -> CandidateItem {
    CandidateItem::new(
        Url::parse(&format!("{base}{path}")).unwrap_or_else(|e| panic!("bad url: {e}")),
        title,
        600,
        Url::parse(&format!("{base}/")).unwrap_or_else(|e| panic!("bad url: {e}")),
    )
}
