use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Message the service returns when a query is too large for a direct answer.
pub(crate) const JOB_QUEUE_REQUIRED: &str = "This job must be executed on a job-queue";

/// Errors returned by [`crate::Client`] and the pipeline stages.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or connection failure. Retried locally before surfacing.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The service rejected the request (malformed query, bad key, server fault).
    #[error("service returned HTTP {status}: {message}")]
    Service { status: u16, message: String },

    /// The remote job ran and failed, or was deleted.
    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// The payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The overall deadline passed before a terminal state was reached.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the execution.
    #[error("query cancelled")]
    Cancelled,

    /// The query document is not a JSON object.
    #[error("invalid query document: {0}")]
    InvalidQuery(#[source] serde_json::Error),

    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),
}

/// A failed HTTP exchange that never produced a status code.
#[derive(Debug, Error)]
#[error("{kind} error for {url}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Body,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportErrorKind::Connect => "connection",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Other => "request",
        };
        f.write_str(s)
    }
}

impl TransportError {
    /// The `apikey` query parameter of `url` is redacted before it is stored.
    pub fn new(kind: TransportErrorKind, url: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: redact_apikey(url),
            message: message.into(),
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };
        // reqwest repeats the full request URL (and with it the key) in its message.
        Self::new(kind, url, err.without_url().to_string())
    }
}

/// Payload decoding failures.
///
/// `Decompress` points at the transport; the other variants point at the
/// payload itself.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("gzip decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("malformed protobuf payload: {0}")]
    Parse(#[from] prost::DecodeError),

    #[error(
        "geometry {geometry}: invalid time interval {index} (start={start}, end={end}, stride={stride})"
    )]
    InvalidInterval {
        geometry: usize,
        index: usize,
        start: i64,
        end: i64,
        stride: i32,
    },

    #[error(
        "geometry {geometry}, code {code}: expected {expected} time interval(s), payload has {actual}"
    )]
    IntervalCountMismatch {
        geometry: usize,
        code: i32,
        expected: usize,
        actual: usize,
    },

    #[error(
        "geometry {geometry}, code {code}, interval {interval}: expected {expected} sample(s), payload has {actual}"
    )]
    SampleCountMismatch {
        geometry: usize,
        code: i32,
        interval: usize,
        expected: usize,
        actual: usize,
    },
}

impl DecodeError {
    /// True when the bytes never reached the schema parser intact.
    pub fn is_transport_corruption(&self) -> bool {
        matches!(self, DecodeError::Decompress(_))
    }
}

/// Classifies errors that are worth another attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Service { status, .. } => retriable_status(*status),
            _ => false,
        }
    }
}

/// HTTP 408 and 5xx are transient; every other 4xx is the caller's fault.
pub(crate) fn retriable_status(code: u16) -> bool {
    code == 408 || (500..=599).contains(&code)
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub(crate) error_message: Option<String>,
    // Some gateways respond with {"message": ...} instead.
    #[serde(default)]
    pub(crate) message: Option<String>,
}

/// Builds a [`Error::Service`] from a non-2xx response body.
pub(crate) fn service_error(status: u16, url: &str, body: &[u8]) -> Error {
    let parsed = serde_json::from_slice::<ApiErrorResponse>(body).ok();
    let server_message = parsed
        .as_ref()
        .and_then(|e| e.error_message.as_deref().or(e.message.as_deref()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                "(empty response body)".to_string()
            } else {
                text.chars().take(512).collect()
            }
        });

    // The job-queue routing signal is matched verbatim by the executor.
    if server_message == JOB_QUEUE_REQUIRED {
        return Error::Service {
            status,
            message: server_message,
        };
    }

    let message = match status {
        401 | 403 => format!(
            "{}\n- Check that the apikey is valid and enabled for the Dataset API\n- Keys are read from MBDATASET_APIKEY or `apikey:` in .mbdatasetrc\nrequest: {}",
            server_message,
            redact_apikey(url)
        ),
        404 => format!(
            "{}\n- The endpoint was not found; check the configured base_url / result_url\nrequest: {}",
            server_message,
            redact_apikey(url)
        ),
        _ => server_message,
    };

    Error::Service { status, message }
}

/// Replaces the value of the `apikey` query parameter so keys never end up in logs.
pub(crate) fn redact_apikey(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.split('?').next().unwrap_or_default().to_string();
    };
    if parsed.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "apikey" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.into()
}
