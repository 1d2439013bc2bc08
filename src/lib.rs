#![warn(missing_docs)]

//! # docdb_direct: failure handling for partitioned document database clients
//!
//! This crate sits between a document database client and its transport. When a
//! replica answers with a failure status, or does not answer at all, it:
//!
//! 1. **Classifies** the failure into a closed [`ErrorKind`] carrying protocol
//!    metadata (status, headers, LSN, partition key range, request charge)
//! 2. **Tracks session state**: the highest LSN observed per partition key range, so
//!    later reads can demand at least that LSN and keep read-your-write guarantees
//!    across replicas
//! 3. **Decides** whether to retry, against which replica, after what backoff, and
//!    whether routing must be refreshed first, or surfaces the error
//!
//! ## Key Features
//!
//! - **Status classification**: fixed status table, sentinel-tolerant header extraction
//! - **Monotone session tracking**: lock-free `fetch_max` per range
//! - **Bounded retries**: every kind has an attempt bound and an elapsed-time bound
//! - **Replica rotation**: transient failures move to the next replica of the range
//! - **Routing refresh**: `410 Gone` / `449` re-resolve the partition key range
//! - **Cancellation**: any suspension point, surfacing a `Cancelled` error
//!
//! ## Usage
//!
//! ```ignore
//! use docdb_direct::{ClientConfig, ErrorKind, RequestPipeline, StoreRequest};
//! use docdb_direct::routing::StaticRoutingTable;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let routing = StaticRoutingTable::single_range(
//!         "0",
//!         vec![
//!             Url::parse("https://replica-0:10253/")?,
//!             Url::parse("https://replica-1:10253/")?,
//!         ],
//!     );
//!     let pipeline = RequestPipeline::http(routing, ClientConfig::default());
//!
//!     match pipeline.execute(StoreRequest::read("/dbs/db1/colls/c1/docs/d1", "tenant-1")).await {
//!         Ok(response) => println!("read at lsn {}", response.headers.lsn()),
//!         Err(e) if e.kind() == ErrorKind::NotFound => println!("missing"),
//!         Err(e) => eprintln!("failed after {:?}: {}", e.attempts(), e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - **[protocol]** - Header names, status codes and header parsing
//! - **[types]** - Response metadata, requests and responses
//! - **[error]** - Error taxonomy
//! - **[classify]** - Response and transport failure classification
//! - **[session]** - Per-range LSN tracking
//! - **[retry]** - Attempt tracking and retry policy
//! - **[routing]** - Partition routing collaborator
//! - **[transport]** - Transport collaborator and `reqwest` implementation
//! - **[pipeline]** - The send / classify / retry loop
//! - **[config]** - Client and retry configuration

pub mod classify;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod retry;
pub mod routing;
pub mod session;
pub mod transport;
pub mod types;

pub use classify::{classify, classify_response, classify_transport_failure};
pub use config::{ClientConfig, RetryOptions};
pub use error::{AttemptSummary, ClientError, ErrorKind, Result, TransportError};
pub use pipeline::RequestPipeline;
pub use retry::{AttemptContext, RetryDecision, RetryPolicy};
pub use routing::{ResolvedRange, RoutingTable};
pub use session::SessionState;
pub use transport::{HttpTransport, Transport};
pub use types::{ResponseMetadata, StoreRequest, StoreResponse};

#[cfg(test)]
mod tests;
