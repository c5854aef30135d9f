//! Constants for the download module (timeouts, chunking, worker limits).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout for streamed file bodies (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Timeout for node listings and catalogue pages (60 seconds).
pub const LISTING_TIMEOUT_SECS: u64 = 60;

/// Timeout for token endpoint requests (30 seconds).
pub const TOKEN_TIMEOUT_SECS: u64 = 30;

/// Default write buffer size for streamed downloads (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default number of concurrent file transfers per scene.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Upper bound on concurrent file transfers per scene.
pub const MAX_WORKERS: usize = 16;

/// Suffix appended to a final path while its body is still streaming.
pub const PARTIAL_SUFFIX: &str = ".part";
