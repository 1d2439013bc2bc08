//! Protocol constants and header parsing for direct replica responses.
//!
//! # Module Organization
//!
//! ```text
//! protocol/
//! ├── constants - Header names, status codes and sub-status codes
//! └── headers   - Case-insensitive header map and typed value extraction
//! ```
//!
//! # Examples
//!
//! ```
//! use docdb_direct::protocol::{constants::headers, Headers};
//!
//! let headers = Headers::from_pairs([
//!     ("LSN", "42"),
//!     ("x-ms-documentdb-partitionkeyrangeid", "7"),
//! ]);
//!
//! assert_eq!(headers.lsn(), 42);
//! assert_eq!(headers.partition_key_range_id(), "7");
//! assert_eq!(headers.get(headers::LSN.as_str()), Some("42"));
//! ```

pub mod constants;
mod headers;

pub use headers::{parse_lsn, parse_request_charge, parse_retry_after_ms, Headers};
