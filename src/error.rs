//! Error taxonomy for replica responses and transport failures.
//!
//! Every failure the pipeline can surface is a [`ClientError`]: a closed
//! [`ErrorKind`] tag plus the metadata shared by all kinds (status code, message,
//! response headers, LSN, partition key range, request URL) and an optional chained
//! cause.
//!
//! # Status mapping
//!
//! | Status | Kind | Retried by default |
//! |--------|------|--------------------|
//! | 400 | `BadRequest` | no |
//! | 401 | `Unauthorized` | no |
//! | 403 | `Forbidden` | no |
//! | 404 | `NotFound` | no |
//! | 405 | `MethodNotAllowed` | no |
//! | 408 | `RequestTimeout` | yes, next replica |
//! | 409 | `Conflict` | no |
//! | 410 | `Gone` | yes, after routing refresh |
//! | 412 | `PreconditionFailed` | no |
//! | 413 | `RequestEntityTooLarge` | no |
//! | 429 | `RequestRateTooLarge` | yes, after server backoff |
//! | 449 | `InvalidPartition` | yes, after routing refresh |
//! | 500 | `InternalServerError` | no |
//! | 503 | `ServiceUnavailable` | yes, next replica |
//! | other ≥ 400 | `UnexpectedStatus(code)` | no |
//! | no response | `TransportFailure` | yes, next replica |

use crate::protocol::{constants::status, Headers};
use crate::types::ResponseMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed cause carried by errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// 400
    BadRequest,
    /// 401
    Unauthorized,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 405
    MethodNotAllowed,
    /// 408, the server answered but timed out the request
    RequestTimeout,
    /// 409
    Conflict,
    /// 410, the partition moved or the replica is gone
    Gone,
    /// 412
    PreconditionFailed,
    /// 413
    RequestEntityTooLarge,
    /// 429, throttled
    RequestRateTooLarge,
    /// 449, stale partition routing
    InvalidPartition,
    /// 500
    InternalServerError,
    /// 503
    ServiceUnavailable,
    /// Any other status ≥ 400
    UnexpectedStatus(u16),
    /// No response was received (connect refused, DNS, read timeout before any bytes)
    TransportFailure,
    /// The caller cancelled the request
    Cancelled,
}

impl ErrorKind {
    /// Map a failure status to its kind; `None` for statuses below 400.
    ///
    /// # Examples
    ///
    /// ```
    /// use docdb_direct::ErrorKind;
    ///
    /// assert_eq!(ErrorKind::from_status(429), Some(ErrorKind::RequestRateTooLarge));
    /// assert_eq!(ErrorKind::from_status(418), Some(ErrorKind::UnexpectedStatus(418)));
    /// assert_eq!(ErrorKind::from_status(204), None);
    /// ```
    pub fn from_status(code: u16) -> Option<Self> {
        let kind = match code {
            0..=399 => return None,
            status::BAD_REQUEST => Self::BadRequest,
            status::UNAUTHORIZED => Self::Unauthorized,
            status::FORBIDDEN => Self::Forbidden,
            status::NOT_FOUND => Self::NotFound,
            status::METHOD_NOT_ALLOWED => Self::MethodNotAllowed,
            status::REQUEST_TIMEOUT => Self::RequestTimeout,
            status::CONFLICT => Self::Conflict,
            status::GONE => Self::Gone,
            status::PRECONDITION_FAILED => Self::PreconditionFailed,
            status::REQUEST_ENTITY_TOO_LARGE => Self::RequestEntityTooLarge,
            status::TOO_MANY_REQUESTS => Self::RequestRateTooLarge,
            status::RETRY_WITH => Self::InvalidPartition,
            status::INTERNAL_SERVER_ERROR => Self::InternalServerError,
            status::SERVICE_UNAVAILABLE => Self::ServiceUnavailable,
            other => Self::UnexpectedStatus(other),
        };
        Some(kind)
    }

    /// The HTTP status this kind always carries, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::BadRequest => Some(status::BAD_REQUEST),
            Self::Unauthorized => Some(status::UNAUTHORIZED),
            Self::Forbidden => Some(status::FORBIDDEN),
            Self::NotFound => Some(status::NOT_FOUND),
            Self::MethodNotAllowed => Some(status::METHOD_NOT_ALLOWED),
            Self::RequestTimeout => Some(status::REQUEST_TIMEOUT),
            Self::Conflict => Some(status::CONFLICT),
            Self::Gone => Some(status::GONE),
            Self::PreconditionFailed => Some(status::PRECONDITION_FAILED),
            Self::RequestEntityTooLarge => Some(status::REQUEST_ENTITY_TOO_LARGE),
            Self::RequestRateTooLarge => Some(status::TOO_MANY_REQUESTS),
            Self::InvalidPartition => Some(status::RETRY_WITH),
            Self::InternalServerError => Some(status::INTERNAL_SERVER_ERROR),
            Self::ServiceUnavailable => Some(status::SERVICE_UNAVAILABLE),
            Self::UnexpectedStatus(code) => Some(*code),
            Self::TransportFailure | Self::Cancelled => None,
        }
    }

    /// Human description used as the message prefix.
    pub fn description(&self) -> &'static str {
        match self {
            Self::BadRequest => "The request payload is invalid",
            Self::Unauthorized => {
                "Unable to authorize the request. The request requires valid user authentication"
            }
            Self::Forbidden => "The operation is forbidden for this resource",
            Self::NotFound => "Entity with the specified id does not exist in the system",
            Self::MethodNotAllowed => "The requested verb is not supported",
            Self::RequestTimeout => "Request timed out",
            Self::Conflict => "Entity with the specified id already exists in the system",
            Self::Gone => "The requested resource is no longer available at the server",
            Self::PreconditionFailed => {
                "Operation cannot be performed because one of the specified preconditions is not met"
            }
            Self::RequestEntityTooLarge => "Request size is too large",
            Self::RequestRateTooLarge => "Request rate is large",
            Self::InvalidPartition => "The partition addressed by the request is no longer valid",
            Self::InternalServerError => {
                "Unknown server error occurred when processing this request"
            }
            Self::ServiceUnavailable => "Service is currently unavailable",
            Self::UnexpectedStatus(_) => "Unexpected status code returned by the service",
            Self::TransportFailure => "Failed to communicate with the replica",
            Self::Cancelled => "The request was cancelled",
        }
    }

    /// Whether failures of this kind are transient at all.
    ///
    /// The [`RetryPolicy`](crate::RetryPolicy) still bounds how often they are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestRateTooLarge
                | Self::Gone
                | Self::InvalidPartition
                | Self::ServiceUnavailable
                | Self::RequestTimeout
                | Self::TransportFailure
        )
    }

    /// Whether the partition routing must be re-resolved before retrying.
    pub fn requires_routing_refresh(&self) -> bool {
        matches!(self, Self::Gone | Self::InvalidPartition)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a logical request went before its error was surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptSummary {
    /// Number of attempts made, including the last one
    pub attempts: u32,
    /// Kind observed on the last failed attempt
    pub last_kind: Option<ErrorKind>,
    /// Time from the first send to surfacing
    pub elapsed: Duration,
}

/// Failure below HTTP: no response was received from the replica.
#[derive(Debug, Error)]
#[error("transport failure calling {url}: {message}")]
pub struct TransportError {
    /// Replica address the request targeted
    pub url: String,
    /// What went wrong
    pub message: String,
    /// Underlying I/O or client error
    #[source]
    pub source: Option<BoxError>,
}

impl TransportError {
    /// Create a transport error without an underlying cause.
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The single error type surfaced to callers.
///
/// Construct with [`ClientError::builder`]. The message always reads
/// `"<description>: <detail>"`, or just the description when there is no detail.
///
/// # Examples
///
/// ```
/// use docdb_direct::{ClientError, ErrorKind, protocol::Headers};
///
/// let err = ClientError::builder(ErrorKind::Forbidden)
///     .message("key is read-only")
///     .headers(&Headers::from_pairs([("lsn", "4")]))
///     .request_url("https://replica-1/dbs/a")
///     .build();
///
/// assert_eq!(err.status(), Some(403));
/// assert_eq!(err.message(), "The operation is forbidden for this resource: key is read-only");
/// assert_eq!(err.lsn(), 4);
/// ```
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ClientError {
    kind: ErrorKind,
    status: Option<u16>,
    message: String,
    metadata: ResponseMetadata,
    request_url: Option<String>,
    attempts: Option<AttemptSummary>,
    #[source]
    source: Option<BoxError>,
}

impl ClientError {
    /// Start building an error of the given kind.
    pub fn builder(kind: ErrorKind) -> ClientErrorBuilder {
        ClientErrorBuilder {
            kind,
            detail: None,
            metadata: None,
            request_url: None,
            source: None,
        }
    }

    /// Shorthand for an error with only a kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self::builder(kind).build()
    }

    /// The failure kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status, `None` for transport failures and cancellation.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Formatted message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Metadata extracted from the failing response (merged with earlier attempts).
    pub fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }

    /// Response headers of the failing attempt.
    pub fn headers(&self) -> &Headers {
        &self.metadata.headers
    }

    /// LSN of the failing response, or the last known one; `-1` if never seen.
    pub fn lsn(&self) -> i64 {
        self.metadata.lsn
    }

    /// Partition key range of the failing response, or the last known one.
    pub fn partition_key_range_id(&self) -> &str {
        &self.metadata.partition_key_range_id
    }

    /// Server-dictated backoff.
    pub fn retry_after(&self) -> Option<Duration> {
        self.metadata.retry_after_millis.map(Duration::from_millis)
    }

    /// Replica URL the failing attempt targeted.
    pub fn request_url(&self) -> Option<&str> {
        self.request_url.as_deref()
    }

    /// Attempt history, set when the pipeline surfaces the error.
    pub fn attempts(&self) -> Option<&AttemptSummary> {
        self.attempts.as_ref()
    }

    /// Whether the kind is transient.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub(crate) fn with_attempts(mut self, summary: AttemptSummary) -> Self {
        self.attempts = Some(summary);
        self
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut ResponseMetadata {
        &mut self.metadata
    }

    fn cause_chain(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut next = std::error::Error::source(self);
        while let Some(err) = next {
            out.push(err.to_string());
            next = err.source();
        }
        out
    }
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.status == other.status
            && self.message == other.message
            && self.metadata == other.metadata
            && self.request_url == other.request_url
            && self.attempts == other.attempts
            && self.cause_chain() == other.cause_chain()
    }
}

/// Builder for [`ClientError`]; the only construction path.
#[derive(Debug)]
pub struct ClientErrorBuilder {
    kind: ErrorKind,
    detail: Option<String>,
    metadata: Option<ResponseMetadata>,
    request_url: Option<String>,
    source: Option<BoxError>,
}

impl ClientErrorBuilder {
    /// Detail appended after the kind description.
    pub fn message(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Extract metadata from response headers.
    pub fn headers(mut self, headers: &Headers) -> Self {
        let status = self.kind.status_code().unwrap_or(0);
        self.metadata = Some(ResponseMetadata::from_headers(status, headers));
        self
    }

    /// Use already-extracted metadata.
    pub fn metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Replica URL the request targeted.
    pub fn request_url(mut self, url: impl Into<String>) -> Self {
        self.request_url = Some(url.into());
        self
    }

    /// Chain an underlying cause.
    pub fn source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Finish the error.
    pub fn build(self) -> ClientError {
        let status = self.kind.status_code();
        let description = self.kind.description();
        let message = match self.detail.as_deref().map(str::trim) {
            Some(detail) if !detail.is_empty() => format!("{}: {}", description, detail),
            _ => description.to_string(),
        };
        let mut metadata = self.metadata.unwrap_or_default();
        metadata.status_code = status.unwrap_or(0);

        ClientError {
            kind: self.kind,
            status,
            message,
            metadata,
            request_url: self.request_url,
            attempts: None,
            source: self.source,
        }
    }
}
