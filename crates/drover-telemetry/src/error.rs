//! Errors raised while fetching one queue's statistics.

use std::time::Duration;

use thiserror::Error;

/// A failure fetching or decoding a single queue's statistics.
///
/// These never abort a poll: the affected queue contributes zero and the
/// error is logged.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("request failed: {0}")]
    Send(#[source] hyper::Error),

    #[error("management API returned {0}")]
    Status(http::StatusCode),

    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),

    #[error("malformed queue statistics: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}
