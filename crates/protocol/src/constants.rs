//! Header names and protocol constants.

/// Header carrying the bearer token for a chunk request.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Header carrying the task identifier.
pub const TASK_ID_HEADER: &str = "X-Skyload-Task";

/// Header carrying the SHA-256 checksum of the chunk body.
pub const CHECKSUM_HEADER: &str = "X-Skyload-Checksum";

/// Formats a bearer authorization value.
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Returns `true` if `status` is a 2xx HTTP status code.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
