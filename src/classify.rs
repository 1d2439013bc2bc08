//! Classification of replica responses and transport failures into [`ClientError`]s.
//!
//! Classification is pure: the same `(status, headers, body)` always yields
//! structurally equal errors, and no header is required to be present.
//!
//! # Examples
//!
//! ```
//! use docdb_direct::{classify, ErrorKind, protocol::Headers};
//!
//! let headers = Headers::from_pairs([("x-ms-retry-after-ms", "50"), ("lsn", "12")]);
//! let err = classify(429, Some(&headers), b"", None).unwrap();
//!
//! assert_eq!(err.kind(), ErrorKind::RequestRateTooLarge);
//! assert_eq!(err.metadata().retry_after_millis, Some(50));
//! assert_eq!(err.lsn(), 12);
//!
//! assert!(classify(200, None, b"", None).is_none());
//! ```

use crate::error::{BoxError, ClientError, ClientErrorBuilder, ErrorKind, TransportError};
use crate::protocol::constants::DEFAULT_RETRY_AFTER_MS;
use crate::protocol::Headers;
use crate::types::{ResponseMetadata, ServiceErrorBody, StoreResponse};

/// Classify a failure response.
///
/// Returns `None` when `status` is below 400. Absent headers are treated as an
/// empty map. A body holding a service error payload contributes its message as the
/// error detail; any other non-empty body is used verbatim.
///
/// A 429 without a retry-after header reports
/// [`DEFAULT_RETRY_AFTER_MS`](crate::protocol::constants::DEFAULT_RETRY_AFTER_MS) as
/// its backoff hint.
pub fn classify(
    status: u16,
    headers: Option<&Headers>,
    body: &[u8],
    cause: Option<BoxError>,
) -> Option<ClientError> {
    let mut builder = response_error(status, headers, body)?;
    if let Some(cause) = cause {
        builder = builder.source(cause);
    }
    Some(builder.build())
}

/// Classify a [`StoreResponse`] received from `request_url`.
pub fn classify_response(response: &StoreResponse, request_url: &str) -> Option<ClientError> {
    response_error(response.status, Some(&response.headers), &response.body)
        .map(|builder| builder.request_url(request_url).build())
}

/// Classify a failure where no response was received.
pub fn classify_transport_failure(err: TransportError) -> ClientError {
    tracing::debug!(url = %err.url, error = %err.message, "classified transport failure");
    ClientError::builder(ErrorKind::TransportFailure)
        .message(err.message.clone())
        .request_url(err.url.clone())
        .source(err)
        .build()
}

fn response_error(
    status: u16,
    headers: Option<&Headers>,
    body: &[u8],
) -> Option<ClientErrorBuilder> {
    let kind = ErrorKind::from_status(status)?;
    let empty = Headers::new();
    let headers = headers.unwrap_or(&empty);
    let mut metadata = ResponseMetadata::from_headers(status, headers);
    if kind == ErrorKind::RequestRateTooLarge && metadata.retry_after_millis.is_none() {
        metadata.retry_after_millis = Some(DEFAULT_RETRY_AFTER_MS);
    }

    tracing::debug!(
        status,
        kind = %kind,
        lsn = metadata.lsn,
        partition_key_range_id = %metadata.partition_key_range_id,
        "classified replica response"
    );

    let mut builder = ClientError::builder(kind).metadata(metadata);
    if let Some(detail) = body_detail(body) {
        builder = builder.message(detail);
    }
    Some(builder)
}

fn body_detail(body: &[u8]) -> Option<String> {
    if let Some(parsed) = ServiceErrorBody::parse(body) {
        if !parsed.message.trim().is_empty() {
            return Some(parsed.message);
        }
        if !parsed.code.trim().is_empty() {
            return Some(parsed.code);
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
