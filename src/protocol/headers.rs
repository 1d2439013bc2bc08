//! Case-insensitive header map and typed extraction of replica response headers.
//!
//! Responses from direct replicas carry the distributed-system state this crate
//! depends on in plain string headers:
//!
//! | Header | Format | Absent / unparsable |
//! |--------|--------|---------------------|
//! | `lsn` | signed 64-bit integer | `-1` |
//! | `x-ms-documentdb-partitionkeyrangeid` | opaque string | `""` |
//! | `x-ms-request-charge` | float | `0.0` |
//! | `x-ms-retry-after-ms` | unsigned integer (ms) | `None` |
//! | `x-ms-substatus` | unsigned integer | `None` |
//!
//! Extraction never fails: missing or malformed values fall back to the sentinel in
//! the table, because a response with odd headers must still be classifiable.

use super::constants::{headers, NO_LSN};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Response or request headers with lowercase-normalized names.
///
/// Names keep the position of their first insertion; inserting a name that is already
/// present (in any letter case) replaces its value in place.
///
/// # Examples
///
/// ```
/// use docdb_direct::protocol::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("X-Ms-Request-Charge", "1.5");
/// headers.insert("x-ms-request-charge", "2.25");
///
/// assert_eq!(headers.len(), 1);
/// assert_eq!(headers.request_charge(), 2.25);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a header map from `(name, value)` pairs; later pairs win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut out = Self::new();
        for (k, v) in pairs {
            out.insert(k.as_ref(), v);
        }
        out
    }

    /// Convert an optional `http::HeaderMap`, skipping values that are not valid UTF-8.
    ///
    /// `None` yields an empty map, mirroring a response that never produced headers.
    pub fn from_header_map(map: Option<&http::HeaderMap>) -> Self {
        let mut out = Self::new();
        let Some(map) = map else {
            return out;
        };
        for (name, value) in map {
            if let Ok(value) = value.to_str() {
                out.insert(name.as_str(), value);
            }
        }
        out
    }

    /// Insert or replace a header.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove a header, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let index = self.entries.iter().position(|(k, _)| *k == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Look up a header by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of distinct headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, value)` pairs in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every header of `other` into `self`, overwriting on conflict.
    pub fn merge(&mut self, other: &Headers) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    // ========== Typed accessors ==========

    /// The response LSN, or `-1` when absent.
    pub fn lsn(&self) -> i64 {
        self.get(headers::LSN.as_str())
            .map(parse_lsn)
            .unwrap_or(NO_LSN)
    }

    /// The partition key range id, or `""` when absent.
    pub fn partition_key_range_id(&self) -> &str {
        self.get(headers::PARTITION_KEY_RANGE_ID.as_str())
            .map(str::trim)
            .unwrap_or("")
    }

    /// Request units charged, or `0.0` when absent.
    pub fn request_charge(&self) -> f64 {
        self.get(headers::REQUEST_CHARGE.as_str())
            .map(parse_request_charge)
            .unwrap_or(0.0)
    }

    /// Server-provided backoff, checking the prefixed header before its alias.
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.get(headers::RETRY_AFTER_MS.as_str())
            .and_then(parse_retry_after_ms)
            .or_else(|| {
                self.get(headers::RETRY_AFTER_MS_ALIAS.as_str())
                    .and_then(parse_retry_after_ms)
            })
    }

    /// The sub-status code, if present and numeric.
    pub fn sub_status(&self) -> Option<u32> {
        self.get(headers::SUB_STATUS.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    /// The raw session token header.
    pub fn session_token(&self) -> Option<&str> {
        self.get(headers::SESSION_TOKEN.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

impl From<&http::HeaderMap> for Headers {
    fn from(map: &http::HeaderMap) -> Self {
        Self::from_header_map(Some(map))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    headers.insert(&name, value);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Parse an LSN header value; anything non-numeric becomes `-1`.
///
/// # Examples
///
/// ```
/// use docdb_direct::protocol::parse_lsn;
///
/// assert_eq!(parse_lsn(" 1024 "), 1024);
/// assert_eq!(parse_lsn("abc"), -1);
/// ```
pub fn parse_lsn(value: &str) -> i64 {
    value.trim().parse().unwrap_or(NO_LSN)
}

/// Parse a request charge; anything non-numeric or non-finite becomes `0.0`.
pub fn parse_request_charge(value: &str) -> f64 {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parse a retry-after value in milliseconds.
///
/// Some servers send fractional milliseconds; those are rounded up so the client
/// never retries earlier than asked.
///
/// # Examples
///
/// ```
/// use docdb_direct::protocol::parse_retry_after_ms;
///
/// assert_eq!(parse_retry_after_ms("50"), Some(50));
/// assert_eq!(parse_retry_after_ms("12.2"), Some(13));
/// assert_eq!(parse_retry_after_ms("-4"), None);
/// ```
pub fn parse_retry_after_ms(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    if let Ok(ms) = trimmed.parse::<u64>() {
        return Some(ms);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.ceil() as u64)
}
