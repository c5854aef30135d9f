//! User-Agent string shared by every HTTP client in the crate.

/// Project URL advertised in the User-Agent header.
const PROJECT_UA_URL: &str = "https://github.com/fierce/sentinel-downloader";

/// User-Agent for catalogue, token and transfer requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("sentinel-downloader/{version} (+{PROJECT_UA_URL})")
}
