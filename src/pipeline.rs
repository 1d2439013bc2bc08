//! Request pipeline: send, classify, track session state, retry or surface.
//!
//! # Flow
//!
//! ```text
//! resolve range ──► send to replica ──► success ──► observe LSN ──► Ok(response)
//!        ▲                 │
//!        │                 └─► classify ──► observe LSN ──► RetryPolicy::decide
//!        │                                                     │
//!        ├──── refresh routing + backoff ◄── RetryAfter ───────┤
//!        │                                                     │
//!        └──── next replica ◄──────────────── RetryNow ────────┤
//!                                                              │
//!                                    Err(error + attempts) ◄── Fail
//! ```
//!
//! Each logical request carries its own [`AttemptContext`]; the [`SessionState`] is
//! shared by every request of the pipeline. Backoff sleeps and network calls are the
//! only suspension points, and cancelling at any of them drops the pending work
//! without touching session state beyond the atomic updates already applied.
//!
//! # Examples
//!
//! ```ignore
//! use docdb_direct::{ClientConfig, RequestPipeline, StoreRequest};
//! use docdb_direct::routing::StaticRoutingTable;
//! use std::time::Duration;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let routing = StaticRoutingTable::single_range(
//!         "0",
//!         vec![Url::parse("https://replica-0:10253/")?],
//!     );
//!     let pipeline = RequestPipeline::http(routing, ClientConfig::default());
//!
//!     let request = StoreRequest::read("/dbs/db1/colls/c1/docs/d1", "tenant-1");
//!     let response = pipeline
//!         .execute_with_timeout(request, Duration::from_secs(5))
//!         .await?;
//!     println!("status {}", response.status);
//!     Ok(())
//! }
//! ```

use crate::classify::{classify_response, classify_transport_failure};
use crate::config::ClientConfig;
use crate::error::{ClientError, ErrorKind, Result};
use crate::protocol::constants::headers;
use crate::retry::{AttemptContext, RetryDecision, RetryPolicy};
use crate::routing::{ResolvedRange, RoutingTable};
use crate::session::SessionState;
use crate::transport::{HttpTransport, Transport};
use crate::types::{ResponseMetadata, StoreRequest, StoreResponse};
use futures::future::{self, Either};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

/// Drives logical requests through the send / classify / retry loop.
///
/// Share one pipeline (e.g. behind an `Arc`) across tasks to share its session.
pub struct RequestPipeline<T, R> {
    transport: T,
    routing: R,
    session: SessionState,
    policy: RetryPolicy,
    config: Arc<ClientConfig>,
}

impl<R: RoutingTable> RequestPipeline<HttpTransport, R> {
    /// Pipeline over the `reqwest` transport.
    pub fn http(routing: R, config: ClientConfig) -> Self {
        let transport = HttpTransport::new(&config);
        Self::new(transport, routing).with_config(config)
    }
}

impl<T: Transport, R: RoutingTable> RequestPipeline<T, R> {
    /// Create a pipeline with default configuration and a fresh session.
    pub fn new(transport: T, routing: R) -> Self {
        let config = ClientConfig::default();
        Self {
            transport,
            routing,
            session: SessionState::new(),
            policy: RetryPolicy::new(config.retry.clone()),
            config: Arc::new(config),
        }
    }

    /// Replace the configuration (and the retry policy derived from it).
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.policy = RetryPolicy::new(config.retry.clone());
        self.config = Arc::new(config);
        self
    }

    /// Use an existing session, e.g. one shared with another pipeline.
    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = session;
        self
    }

    /// The session this pipeline updates.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// The active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one logical request to completion.
    pub async fn execute(&self, request: StoreRequest) -> Result<StoreResponse> {
        self.execute_with_cancel(request, future::pending::<()>())
            .await
    }

    /// Run one logical request, giving up with [`ErrorKind::Cancelled`] after `timeout`.
    pub async fn execute_with_timeout(
        &self,
        request: StoreRequest,
        timeout: Duration,
    ) -> Result<StoreResponse> {
        self.execute_with_cancel(request, tokio::time::sleep(timeout))
            .await
    }

    /// Run one logical request until it finishes or `cancel` resolves.
    ///
    /// On cancellation the in-flight send or backoff is dropped and a
    /// [`ErrorKind::Cancelled`] error carrying the attempt history is returned.
    pub async fn execute_with_cancel<F>(
        &self,
        request: StoreRequest,
        cancel: F,
    ) -> Result<StoreResponse>
    where
        F: Future<Output = ()>,
    {
        let activity_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "docdb_request",
            activity_id = %activity_id,
            method = %request.method,
            path = %request.path,
        );

        let mut execution = Execution::new();
        let outcome = {
            let run = self
                .run(request, activity_id, &mut execution)
                .instrument(span.clone());
            futures::pin_mut!(run);
            futures::pin_mut!(cancel);
            match future::select(run, cancel).await {
                Either::Left((result, _)) => Some(result),
                Either::Right(((), _)) => None,
            }
        };

        match outcome {
            Some(result) => result,
            None => {
                let _entered = span.enter();
                if self.config.enable_logging {
                    tracing::warn!(
                        attempt = execution.ctx.attempt_number,
                        "request cancelled by caller"
                    );
                }
                let err = ClientError::builder(ErrorKind::Cancelled)
                    .message(format!(
                        "cancelled during attempt {}",
                        execution.ctx.attempt_number
                    ))
                    .build();
                Err(execution.surface(err))
            }
        }
    }

    async fn run(
        &self,
        mut request: StoreRequest,
        activity_id: String,
        execution: &mut Execution,
    ) -> Result<StoreResponse> {
        request
            .headers
            .insert(headers::ACTIVITY_ID.as_str(), activity_id);

        let mut resolved = match self.resolve(&request.request_key, execution).await {
            Ok(resolved) => resolved,
            Err(err) => return Err(execution.surface(err)),
        };

        loop {
            let range_id = resolved.partition_key_range_id.clone();
            match self.session.session_token(&range_id) {
                Some(token) => request
                    .headers
                    .insert(headers::SESSION_TOKEN.as_str(), token),
                None => {
                    request.headers.remove(headers::SESSION_TOKEN.as_str());
                }
            }

            let outcome = match resolved.replicas.get(execution.ctx.replica_index) {
                Some(replica) => self.attempt(&request, replica).await,
                None => Err(ClientError::builder(ErrorKind::ServiceUnavailable)
                    .message(format!(
                        "no replica available for partition key range '{}'",
                        range_id
                    ))
                    .build()),
            };

            let error = match outcome {
                Ok(response) => {
                    self.observe(&response.metadata(), &range_id);
                    if let Some(token) = response.headers.session_token() {
                        self.session.merge_session_token(token);
                    }
                    tracing::debug!(
                        status = response.status,
                        attempt = execution.ctx.attempt_number,
                        "request succeeded"
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            self.observe(error.metadata(), &range_id);
            execution.remember(error.metadata(), &range_id);

            let decision = self.policy.decide(&error, &mut execution.ctx);
            match decision {
                RetryDecision::Fail(_) => return Err(execution.surface(error)),
                RetryDecision::RetryNow => {
                    self.log_retry(&error, execution, Duration::ZERO, false);
                }
                RetryDecision::RetryAfter {
                    delay,
                    refresh_routing,
                } => {
                    self.log_retry(&error, execution, delay, refresh_routing);
                    if refresh_routing {
                        if let Err(refresh_err) = self.routing.refresh(&range_id).await {
                            tracing::warn!(
                                partition_key_range_id = %range_id,
                                error = %refresh_err,
                                "routing refresh failed"
                            );
                            return Err(execution.surface(error));
                        }
                    }
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if refresh_routing {
                        resolved = match self.resolve(&request.request_key, execution).await {
                            Ok(resolved) => resolved,
                            Err(err) => return Err(execution.surface(err)),
                        };
                    }
                }
            }
        }
    }

    async fn resolve(
        &self,
        request_key: &str,
        execution: &mut Execution,
    ) -> Result<ResolvedRange> {
        let resolved = self.routing.resolve_range(request_key).await?;
        execution.ctx.replica_count = resolved.replicas.len();
        tracing::debug!(
            partition_key_range_id = %resolved.partition_key_range_id,
            replicas = resolved.replicas.len(),
            routing_epoch = execution.ctx.routing_epoch,
            "resolved partition key range"
        );
        Ok(resolved)
    }

    async fn attempt(&self, request: &StoreRequest, replica: &Url) -> Result<StoreResponse> {
        match self.transport.send(request, replica).await {
            Ok(response) => match classify_response(&response, replica.as_str()) {
                Some(err) => Err(err),
                None => Ok(response),
            },
            Err(transport_err) => Err(classify_transport_failure(transport_err)),
        }
    }

    /// Feed a response's position into the session, falling back to the resolved
    /// range when the replica did not name one.
    fn observe(&self, metadata: &ResponseMetadata, resolved_range: &str) {
        let range = if metadata.partition_key_range_id.is_empty() {
            resolved_range
        } else {
            &metadata.partition_key_range_id
        };
        self.session.observe(range, metadata.lsn);
    }

    fn log_retry(
        &self,
        error: &ClientError,
        execution: &Execution,
        delay: Duration,
        refresh: bool,
    ) {
        if self.config.enable_logging {
            tracing::warn!(
                kind = %error.kind(),
                status = ?error.status(),
                next_attempt = execution.ctx.attempt_number,
                replica_index = execution.ctx.replica_index,
                ?delay,
                refresh_routing = refresh,
                "attempt failed, retrying: {}",
                error
            );
        }
    }
}

/// Per-request state that must outlive a cancelled run.
struct Execution {
    ctx: AttemptContext,
    last_position: ResponseMetadata,
}

impl Execution {
    fn new() -> Self {
        Self {
            ctx: AttemptContext::new(),
            last_position: ResponseMetadata::default(),
        }
    }

    /// Record the position of a failed attempt. LSN and range always come from the
    /// same response.
    fn remember(&mut self, metadata: &ResponseMetadata, resolved_range: &str) {
        let range = if metadata.partition_key_range_id.is_empty() {
            resolved_range
        } else {
            &metadata.partition_key_range_id
        };
        if metadata.lsn >= 0 || self.last_position.partition_key_range_id.is_empty() {
            self.last_position.lsn = metadata.lsn;
            self.last_position.partition_key_range_id = range.to_string();
        }
    }

    fn surface(&self, mut error: ClientError) -> ClientError {
        error.metadata_mut().inherit_position(&self.last_position);
        error.with_attempts(self.ctx.summary())
    }
}
