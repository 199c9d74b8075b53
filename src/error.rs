use thiserror::Error;

use crate::mutation::MutationKind;

/// Failure reported by the remote data gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never produced a response (connection, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success HTTP status.
    #[error("backend returned {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The response body did not match the expected contract.
    #[error("could not decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The client was configured with an unusable base URL.
    #[error("invalid gateway configuration: {0}")]
    Config(String),

    /// The backend answered 2xx but reported `success: false`.
    #[error("backend rejected the request: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Builds a status error from a raw response body, preferring the
    /// backend's `detail` field when the body is JSON.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("detail").map(detail_to_string))
            .unwrap_or_else(|| body.trim().to_string());
        GatewayError::Status { status, detail }
    }
}

fn detail_to_string(detail: &serde_json::Value) -> String {
    match detail {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Error surfaced by the optimistic mutation engine.
///
/// By the time one of these reaches the caller the recovery policy has
/// already run, so the snapshot is either untouched or freshly reloaded.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no active session; upload a dataset first")]
    NoSession,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{kind} failed: {source}{}", resync_suffix(.resynced))]
    Rejected {
        kind: MutationKind,
        #[source]
        source: GatewayError,
        resynced: bool,
    },
}

fn resync_suffix(resynced: &bool) -> &'static str {
    if *resynced { " (snapshot reloaded)" } else { "" }
}

/// Error surfaced while generating chart data.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("no active session; upload a dataset first")]
    NoSession,

    #[error("{0}")]
    Precondition(String),

    #[error("a chart for this slot is already being generated")]
    Busy,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Error reading or writing the durable session store.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
