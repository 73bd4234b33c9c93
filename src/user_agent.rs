//! Shared User-Agent string for page and media requests.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/harvester";

/// Default User-Agent for page fetches and media transfers.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (+{PROJECT_UA_URL})")
}
