//! Error type returned by every binding operation.

/// Failures surfaced by the proxy, handlers and consumer sinks.
///
/// The proxy is a relay: errors coming back from the inner protocol or the
/// consumer sink are handed to the caller exactly as they were produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// A required argument was missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The URL could not be split into a scheme and a remainder.
    #[error("malformed url: {0}")]
    InvalidUrl(String),
    /// No handler is registered for the URL scheme.
    #[error("no protocol handler for scheme {0:?}")]
    HandlerNotFound(String),
    /// The operation or status code is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    /// Terminate was requested before a terminal result was reported.
    #[error("binding has not reported a result yet")]
    NotReady,
    /// No inner protocol is bound (start has not succeeded).
    #[error("no protocol bound")]
    NotBound,
    /// Generic failure.
    #[error("operation failed")]
    Failed,
    /// The requested capability is not exposed.
    #[error("no such interface")]
    NoInterface,
    /// Data is not available yet; retry after the next data notification.
    #[error("operation pending")]
    Pending,
    /// The binding was aborted.
    #[error("binding aborted")]
    Aborted,
    /// Handler-specific failure.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T, E = BindError> = std::result::Result<T, E>;
