//! Value types exchanged between the pipeline and its collaborators.
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ResponseMetadata`] | LSN, partition range, charge and backoff extracted from headers |
//! | [`StoreRequest`] | What the caller wants sent; opaque to retry logic |
//! | [`StoreResponse`] | Status, headers and body returned by a replica |
//! | [`ServiceErrorBody`] | JSON error payload returned with failure statuses |

use crate::protocol::{constants::NO_LSN, Headers};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Protocol metadata merged from a single response.
///
/// # Invariants
///
/// - `lsn` is `-1` when the response carried no LSN
/// - `partition_key_range_id` is empty when the response named no range
/// - for one partition key range within one session, observed `lsn` values never
///   move backwards once merged into [`SessionState`](crate::SessionState)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// HTTP status code of the response (0 when no response was received)
    pub status_code: u16,
    /// All response headers
    pub headers: Headers,
    /// Log sequence number, `-1` if absent
    pub lsn: i64,
    /// Partition key range that served the response, `""` if absent
    pub partition_key_range_id: String,
    /// Request units consumed
    pub request_charge_units: f64,
    /// Server-dictated backoff; a 429 without the header reports the default floor
    pub retry_after_millis: Option<u64>,
    /// Refinement of `status_code`, e.g. why a replica is gone
    pub sub_status: Option<u32>,
}

impl ResponseMetadata {
    /// Extract metadata from a status code and header set.
    ///
    /// # Examples
    ///
    /// ```
    /// use docdb_direct::{protocol::Headers, ResponseMetadata};
    ///
    /// let headers = Headers::from_pairs([
    ///     ("lsn", "10"),
    ///     ("x-ms-documentdb-partitionkeyrangeid", "2"),
    ///     ("x-ms-request-charge", "3.5"),
    /// ]);
    /// let meta = ResponseMetadata::from_headers(200, &headers);
    ///
    /// assert_eq!(meta.lsn, 10);
    /// assert_eq!(meta.partition_key_range_id, "2");
    /// assert_eq!(meta.request_charge_units, 3.5);
    /// ```
    pub fn from_headers(status_code: u16, headers: &Headers) -> Self {
        Self {
            status_code,
            lsn: headers.lsn(),
            partition_key_range_id: headers.partition_key_range_id().to_string(),
            request_charge_units: headers.request_charge(),
            retry_after_millis: headers.retry_after_ms(),
            sub_status: headers.sub_status(),
            headers: headers.clone(),
        }
    }

    /// Whether both an LSN and a partition key range are known.
    pub fn has_session_position(&self) -> bool {
        self.lsn != NO_LSN && !self.partition_key_range_id.is_empty()
    }

    /// Fill in the session position this metadata lacks from an earlier attempt.
    ///
    /// Used when surfacing a final error so diagnostics keep the last known LSN and
    /// range even if the final failure was a transport error without headers. The LSN
    /// and range are taken as a pair: an LSN is never attached to another range.
    pub fn inherit_position(&mut self, earlier: &ResponseMetadata) {
        let same_range = self.partition_key_range_id.is_empty()
            || self.partition_key_range_id == earlier.partition_key_range_id;
        if self.lsn == NO_LSN && same_range {
            self.lsn = earlier.lsn;
            self.partition_key_range_id = earlier.partition_key_range_id.clone();
        } else if self.partition_key_range_id.is_empty() && self.lsn == earlier.lsn {
            self.partition_key_range_id = earlier.partition_key_range_id.clone();
        }
    }
}

impl Default for ResponseMetadata {
    fn default() -> Self {
        Self::from_headers(0, &Headers::new())
    }
}

/// A request handed to the [`Transport`](crate::Transport).
///
/// The pipeline treats it as opaque apart from `request_key`, which it resolves to a
/// partition key range, and `headers`, to which it adds session and activity headers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRequest {
    /// HTTP method (e.g. `"GET"`, `"POST"`)
    pub method: String,
    /// Resource path appended to the replica address
    pub path: String,
    /// Key used to resolve the target partition key range
    pub request_key: String,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Bytes,
}

impl StoreRequest {
    /// Create a request with no headers and an empty body.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        request_key: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            request_key: request_key.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a `GET`.
    pub fn read(path: impl Into<String>, request_key: impl Into<String>) -> Self {
        Self::new("GET", path, request_key)
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// What a replica sent back.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
}

impl StoreResponse {
    /// Create a response.
    pub fn new(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Whether the status signals success.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Metadata extracted from the headers.
    pub fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata::from_headers(self.status, &self.headers)
    }
}

/// JSON error payload returned by the service with failure statuses.
///
/// ```json
/// {"code": "NotFound", "message": "Entity with the specified id does not exist"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceErrorBody {
    /// Service error code
    #[serde(default)]
    pub code: String,
    /// Human-readable detail
    #[serde(default)]
    pub message: String,
}

impl ServiceErrorBody {
    /// Parse a body as a service error payload.
    ///
    /// Returns `None` for empty or non-JSON bodies.
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice(body).ok()
    }
}
