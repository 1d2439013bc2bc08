//! Wire-level constants shared by the classifier, session tracker and transport.

/// Header names used on replica requests and responses.
///
/// All names are lowercase; [`Headers`](super::Headers) lookups are
/// case-insensitive so responses using mixed case still match.
pub mod headers {
    use http::HeaderName;

    /// Log sequence number of the replica that served the response.
    pub const LSN: HeaderName = HeaderName::from_static("lsn");

    /// Partition key range that produced the response.
    pub const PARTITION_KEY_RANGE_ID: HeaderName =
        HeaderName::from_static("x-ms-documentdb-partitionkeyrangeid");

    /// Request units consumed by the operation.
    pub const REQUEST_CHARGE: HeaderName = HeaderName::from_static("x-ms-request-charge");

    /// Server-dictated backoff for throttled requests, in milliseconds.
    pub const RETRY_AFTER_MS: HeaderName = HeaderName::from_static("x-ms-retry-after-ms");

    /// Unprefixed alias of [`RETRY_AFTER_MS`] emitted by some gateways.
    pub const RETRY_AFTER_MS_ALIAS: HeaderName = HeaderName::from_static("retry-after-ms");

    /// Sub-status refining the HTTP status (e.g. why a replica is gone).
    pub const SUB_STATUS: HeaderName = HeaderName::from_static("x-ms-substatus");

    /// Session token: comma-separated `<range>:<lsn>` pairs.
    pub const SESSION_TOKEN: HeaderName = HeaderName::from_static("x-ms-session-token");

    /// Correlation id for one logical request.
    pub const ACTIVITY_ID: HeaderName = HeaderName::from_static("x-ms-activity-id");

    /// Consistency level requested by the client.
    pub const CONSISTENCY_LEVEL: HeaderName = HeaderName::from_static("x-ms-consistency-level");
}

/// HTTP status codes with a dedicated error kind.
pub mod status {
    /// 400
    pub const BAD_REQUEST: u16 = 400;
    /// 401
    pub const UNAUTHORIZED: u16 = 401;
    /// 403
    pub const FORBIDDEN: u16 = 403;
    /// 404
    pub const NOT_FOUND: u16 = 404;
    /// 405
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    /// 408
    pub const REQUEST_TIMEOUT: u16 = 408;
    /// 409
    pub const CONFLICT: u16 = 409;
    /// 410
    pub const GONE: u16 = 410;
    /// 412
    pub const PRECONDITION_FAILED: u16 = 412;
    /// 413
    pub const REQUEST_ENTITY_TOO_LARGE: u16 = 413;
    /// 429
    pub const TOO_MANY_REQUESTS: u16 = 429;
    /// 449, the service's "retry with" status.
    pub const RETRY_WITH: u16 = 449;
    /// 500
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    /// 503
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Sub-status codes carried in `x-ms-substatus` alongside a 410.
pub mod sub_status {
    /// The partition key range no longer exists (split or merge finished).
    pub const PARTITION_KEY_RANGE_GONE: u32 = 1002;
    /// A split of the range is in progress.
    pub const COMPLETING_SPLIT: u32 = 1007;
    /// The range is being migrated to another replica set.
    pub const COMPLETING_PARTITION_MIGRATION: u32 = 1008;
}

/// Sentinel LSN when a response carries none.
pub const NO_LSN: i64 = -1;

/// Backoff reported on a 429 that carries no retry-after header, in milliseconds.
pub const DEFAULT_RETRY_AFTER_MS: u64 = 5;
