use std::time::Duration;

/// Boxed transport-level error returned by [`HttpClient`] implementations.
///
/// [`HttpClient`]: crate::client::HttpClient
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Wrap type for errors from the tracezip codec, exporter and receiver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No http client configured. Users should provide one or enable the
    /// `reqwest-client` feature.
    #[error("http client must be set, users can enable the reqwest-client feature to use the http client implementation within the crate")]
    NoHttpClient,
    /// Building the http request failed
    #[error(transparent)]
    RequestFailed(#[from] http::Error),
    /// The endpoint Uri was invalid
    #[error(transparent)]
    InvalidUri(#[from] http::uri::InvalidUri),
    /// JSON (de)serialization failed. Permanent, callers must not retry.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    /// Gzip compression or decompression failed
    #[error("gzip failed: {0}")]
    Gzip(#[from] std::io::Error),
    /// The http client failed before a response was received
    #[error("failed to make an http request: {0}")]
    Client(#[source] BoxError),
    /// The peer answered with a non-success status code
    #[error("{endpoint} endpoint responded with http status code {status}")]
    Status {
        /// Which endpoint failed, `"dictionary"` or `"traces"`
        endpoint: &'static str,
        status: u16,
        /// Whether the caller's retry policy may retry this request
        retryable: bool,
        /// Server-provided throttling hint, when present
        retry_after: Option<Duration>,
    },
    /// The dictionary-endpoint body could not be interpreted
    #[error("malformed dictionary update: {0}")]
    MalformedUpdate(String),
    /// A trace batch referenced a session this peer has never seen
    #[error("unknown dictionary session {0}")]
    UnknownSession(String),
    /// A trace batch referenced an id absent from the session's dictionaries
    #[error("no {dict} dictionary entry for id {id}")]
    UnknownId { dict: &'static str, id: String },
    /// A span's path array and its stable order disagree in length
    #[error("span name {name}: path array length {path_len} does not match stable order length {order_len}")]
    PathOrderMismatch {
        name: String,
        path_len: usize,
        order_len: usize,
    },
    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller's retry policy may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Client(_) => true,
            Error::Status { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Server-provided throttling hint, when the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
