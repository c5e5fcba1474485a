//! Heuristics deciding whether a rendered page is safe to cache

use http::StatusCode;

/// Documents shorter than this need an explicit `<body` to be trusted
pub const MIN_DOCUMENT_BYTES: usize = 512;

/// Fragments that only show up in error pages or crashed renders
pub const ERROR_SIGNATURES: &[&str] = &[
    "Application error: a server-side exception has occurred",
    "Application error: a client-side exception has occurred",
    "Internal Server Error",
    "Unhandled Runtime Error",
    "__next_error__",
    "ECONNREFUSED",
    "This page could not be found",
];

/// Whether `body`, served with `status`, may be written to the HTML cache
pub fn is_valid_html(body: &str, status: StatusCode) -> bool {
    if body.trim().is_empty() {
        return false;
    }
    if status.as_u16() >= 400 {
        return false;
    }
    if ERROR_SIGNATURES
        .iter()
        .any(|signature| body.contains(signature))
    {
        return false;
    }

    let lowered = body.to_ascii_lowercase();
    if !lowered.contains("<html") && !lowered.contains("<!doctype") {
        return false;
    }

    body.len() >= MIN_DOCUMENT_BYTES || lowered.contains("<body")
}
