//! End-to-end pipeline scenarios against a scripted transport.

use crate::protocol::{constants::headers, Headers};
use crate::routing::{ResolvedRange, RoutingTable, StaticRoutingTable};
use crate::{
    ClientConfig, ClientError, ErrorKind, RequestPipeline, Result, StoreRequest, StoreResponse,
    Transport, TransportError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

enum Step {
    Respond(u16, Vec<(&'static str, &'static str)>, &'static str),
    Refuse,
    Hang,
}

fn respond(status: u16, headers: &[(&'static str, &'static str)]) -> Step {
    Step::Respond(status, headers.to_vec(), "")
}

#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(String, Headers)>>,
}

impl ScriptedTransport {
    fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::default(),
        })
    }

    fn replicas_called(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    fn call_headers(&self, index: usize) -> Headers {
        self.calls.lock()[index].1.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &StoreRequest,
        replica: &Url,
    ) -> std::result::Result<StoreResponse, TransportError> {
        self.calls
            .lock()
            .push((replica.to_string(), request.headers.clone()));
        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Respond(status, headers, body)) => Ok(StoreResponse::new(
                status,
                Headers::from_pairs(headers),
                body,
            )),
            Some(Step::Refuse) => Err(TransportError::new(replica.as_str(), "connection refused")
                .with_source(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "os error 111",
                ))),
            Some(Step::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            None => Ok(StoreResponse::new(200, Headers::new(), "")),
        }
    }
}

/// Routing table whose key moves to range "1" on the first refresh.
struct SplittingRouting {
    split: Mutex<bool>,
}

#[async_trait]
impl RoutingTable for SplittingRouting {
    async fn resolve_range(&self, _request_key: &str) -> Result<ResolvedRange> {
        Ok(if *self.split.lock() {
            ResolvedRange::new("1", vec![url("https://child-1/")])
        } else {
            ResolvedRange::new("0", vec![url("https://parent-0/")])
        })
    }

    async fn refresh(&self, _partition_key_range_id: &str) -> Result<()> {
        *self.split.lock() = true;
        Ok(())
    }
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn routing(replicas: &[&str]) -> Arc<StaticRoutingTable> {
    Arc::new(StaticRoutingTable::single_range(
        "0",
        replicas.iter().map(|r| url(r)).collect(),
    ))
}

fn two_replicas() -> Arc<StaticRoutingTable> {
    routing(&["https://r0/", "https://r1/"])
}

fn splitting() -> Arc<SplittingRouting> {
    Arc::new(SplittingRouting {
        split: Mutex::new(false),
    })
}

const RANGE: &str = "x-ms-documentdb-partitionkeyrangeid";

fn config(f: impl FnOnce(&mut ClientConfig)) -> ClientConfig {
    let mut config = ClientConfig::default();
    f(&mut config);
    config
}

fn read() -> StoreRequest {
    StoreRequest::read("/dbs/db1/colls/c1/docs/d1", "tenant-1")
}

#[tokio::test(start_paused = true)]
async fn test_success_updates_session_and_next_request_carries_token() {
    init_tracing();
    let transport = ScriptedTransport::new([
        respond(200, &[("lsn", "12"), ("x-ms-documentdb-partitionkeyrangeid", "0")]),
        respond(200, &[("lsn", "13")]),
    ]);
    let pipeline = RequestPipeline::new(transport.clone(), routing(&["https://r0/"]));

    let first = pipeline.execute(read()).await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(pipeline.session().required_lsn("0"), 12);
    assert!(!transport.call_headers(0).contains(headers::SESSION_TOKEN.as_str()));

    pipeline.execute(read()).await.unwrap();
    assert_eq!(
        transport.call_headers(1).get(headers::SESSION_TOKEN.as_str()),
        Some("0:12")
    );
    // No range header on the second response: attributed to the resolved range.
    assert_eq!(pipeline.session().required_lsn("0"), 13);
}

#[tokio::test(start_paused = true)]
async fn test_success_merges_returned_session_token() {
    let transport = ScriptedTransport::new([respond(200, &[("x-ms-session-token", "0:40,3:7")])]);
    let pipeline = RequestPipeline::new(transport, routing(&["https://r0/"]));

    pipeline.execute(read()).await.unwrap();
    assert_eq!(pipeline.session().required_lsn("0"), 40);
    assert_eq!(pipeline.session().required_lsn("3"), 7);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_then_succeeds_after_server_delay() {
    init_tracing();
    let transport = ScriptedTransport::new([
        respond(429, &[("retry-after-ms", "50")]),
        respond(200, &[]),
    ]);
    let pipeline = RequestPipeline::new(transport.clone(), routing(&["https://r0/"]));

    let start = Instant::now();
    let response = pipeline.execute(read()).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(start.elapsed() >= Duration::from_millis(50));
    // Throttling does not move to another replica.
    assert_eq!(transport.replicas_called(), vec!["https://r0/", "https://r0/"]);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_budget_exhausted_surfaces_429() {
    let transport = ScriptedTransport::new(
        (0..10).map(|_| respond(429, &[("x-ms-retry-after-ms", "10"), ("lsn", "3")])),
    );
    let pipeline = RequestPipeline::new(transport.clone(), routing(&["https://r0/"]))
        .with_config(config(|c| c.retry.max_throttle_retries = 3));

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestRateTooLarge);
    assert_eq!(err.status(), Some(429));
    assert_eq!(transport.replicas_called().len(), 4);

    let summary = err.attempts().unwrap();
    assert_eq!(summary.attempts, 4);
    assert_eq!(summary.last_kind, Some(ErrorKind::RequestRateTooLarge));
    assert!(summary.elapsed >= Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn test_not_found_is_never_retried() {
    let transport = ScriptedTransport::new([Step::Respond(
        404,
        vec![],
        r#"{"code":"NotFound","message":"Document d1 does not exist"}"#,
    )]);
    let pipeline = RequestPipeline::new(transport.clone(), two_replicas());

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.message().ends_with(": Document d1 does not exist"));
    assert_eq!(err.request_url(), Some("https://r0/"));
    assert_eq!(err.attempts().unwrap().attempts, 1);
    assert_eq!(transport.replicas_called().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_moves_to_next_replica() {
    let transport = ScriptedTransport::new([Step::Refuse, respond(200, &[])]);
    let pipeline = RequestPipeline::new(transport.clone(), two_replicas());

    pipeline.execute(read()).await.unwrap();
    assert_eq!(transport.replicas_called(), vec!["https://r0/", "https://r1/"]);
    // Same logical request, same activity id.
    assert_eq!(
        transport.call_headers(0).get(headers::ACTIVITY_ID.as_str()),
        transport.call_headers(1).get(headers::ACTIVITY_ID.as_str()),
    );
}

#[tokio::test(start_paused = true)]
async fn test_all_replicas_refused_surfaces_transport_failure_with_cause() {
    let transport = ScriptedTransport::new([Step::Refuse, Step::Refuse]);
    let pipeline = RequestPipeline::new(transport.clone(), two_replicas())
        .with_config(config(|c| c.retry.max_routing_refreshes = 0));

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert_eq!(err.status(), None);
    assert_eq!(transport.replicas_called().len(), 2);

    let transport_err = err.source().unwrap();
    assert!(transport_err.to_string().contains("connection refused"));
    assert_eq!(transport_err.source().unwrap().to_string(), "os error 111");
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_replicas_trigger_one_routing_refresh() {
    let table = routing(&["https://r0/"]);
    let transport = ScriptedTransport::new((0..3).map(|_| respond(503, &[])));
    let pipeline = RequestPipeline::new(transport.clone(), table.clone());

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert_eq!(table.refresh_count(), 1);
    assert_eq!(transport.replicas_called().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_gone_refreshes_routing_and_follows_split() {
    init_tracing();
    let transport = ScriptedTransport::new([
        respond(410, &[("x-ms-substatus", "1002"), ("lsn", "90"), (RANGE, "0")]),
        respond(200, &[("lsn", "4"), ("x-ms-documentdb-partitionkeyrangeid", "1")]),
    ]);
    let pipeline = RequestPipeline::new(transport.clone(), splitting());

    pipeline.execute(read()).await.unwrap();
    assert_eq!(
        transport.replicas_called(),
        vec!["https://parent-0/", "https://child-1/"]
    );
    assert_eq!(pipeline.session().required_lsn("0"), 90);
    assert_eq!(pipeline.session().required_lsn("1"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_gone_retry_budget_is_bounded() {
    let table = routing(&["https://r0/"]);
    let transport = ScriptedTransport::new((0..10).map(|_| respond(410, &[])));
    let pipeline = RequestPipeline::new(transport.clone(), table.clone())
        .with_config(config(|c| c.retry.max_gone_retries = 2));

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Gone);
    assert_eq!(transport.replicas_called().len(), 3);
    assert_eq!(table.refresh_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_throttling_does_not_spend_gone_budget() {
    let table = routing(&["https://r0/"]);
    let transport = ScriptedTransport::new(
        (0..4)
            .map(|_| respond(429, &[("x-ms-retry-after-ms", "10")]))
            .chain([respond(410, &[]), respond(200, &[])]),
    );
    let pipeline = RequestPipeline::new(transport.clone(), table.clone());

    let response = pipeline.execute(read()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(transport.replicas_called().len(), 6);
    assert_eq!(table.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_throttling_does_not_spend_replica_rotation() {
    let transport = ScriptedTransport::new(
        (0..3)
            .map(|_| respond(429, &[("x-ms-retry-after-ms", "10")]))
            .chain([respond(503, &[]), respond(200, &[])]),
    );
    let pipeline = RequestPipeline::new(transport.clone(), two_replicas());

    pipeline.execute(read()).await.unwrap();
    assert_eq!(
        transport.replicas_called(),
        vec![
            "https://r0/",
            "https://r0/",
            "https://r0/",
            "https://r0/",
            "https://r1/"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_session_token_follows_range_after_split() {
    let transport = ScriptedTransport::new([
        respond(200, &[("lsn", "90"), (RANGE, "0")]),
        respond(410, &[("lsn", "91"), (RANGE, "0")]),
        respond(200, &[("lsn", "2"), (RANGE, "1")]),
    ]);
    let pipeline = RequestPipeline::new(transport.clone(), splitting());

    pipeline.execute(read()).await.unwrap();
    pipeline.execute(read()).await.unwrap();

    assert_eq!(
        transport.replicas_called(),
        vec!["https://parent-0/", "https://parent-0/", "https://child-1/"]
    );
    let session_token = |call| {
        transport
            .call_headers(call)
            .get(headers::SESSION_TOKEN.as_str())
            .map(str::to_string)
    };
    assert_eq!(session_token(1).as_deref(), Some("0:90"));
    // Range "1" had no position yet, so the parent's token must not leak through.
    assert_eq!(session_token(2), None);
    assert_eq!(pipeline.session().required_lsn("0"), 91);
    assert_eq!(pipeline.session().required_lsn("1"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_surfaced_position_pairs_lsn_with_its_range() {
    let transport = ScriptedTransport::new([
        respond(410, &[("lsn", "91"), (RANGE, "0")]),
        respond(503, &[(RANGE, "1")]),
    ]);
    let pipeline = RequestPipeline::new(transport, splitting());

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert_eq!(err.partition_key_range_id(), "1");
    assert_eq!(err.lsn(), -1);
}

#[tokio::test(start_paused = true)]
async fn test_surfaced_error_keeps_last_known_position() {
    let transport = ScriptedTransport::new([
        respond(503, &[("lsn", "30"), ("x-ms-documentdb-partitionkeyrangeid", "0")]),
        Step::Refuse,
    ]);
    let pipeline = RequestPipeline::new(transport, two_replicas())
        .with_config(config(|c| c.retry.max_routing_refreshes = 0));

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert_eq!(err.lsn(), 30);
    assert_eq!(err.partition_key_range_id(), "0");
    assert_eq!(err.attempts().unwrap().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failure_lsn_feeds_session() {
    let transport = ScriptedTransport::new([respond(
        409,
        &[("lsn", "40"), ("x-ms-documentdb-partitionkeyrangeid", "0")],
    )]);
    let pipeline = RequestPipeline::new(transport, routing(&["https://r0/"]));

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(pipeline.session().required_lsn("0"), 40);
}

#[tokio::test(start_paused = true)]
async fn test_transient_retries_never_exceed_bound() {
    let replicas: Vec<String> = (0..10).map(|i| format!("https://r{}/", i)).collect();
    let refs: Vec<&str> = replicas.iter().map(String::as_str).collect();
    let transport = ScriptedTransport::new((0..20).map(|_| respond(503, &[])));
    let pipeline = RequestPipeline::new(transport.clone(), routing(&refs))
        .with_config(config(|c| c.retry.max_transient_retries = 3));

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert_eq!(transport.replicas_called().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_empty_replica_set_surfaces_service_unavailable() {
    let pipeline = RequestPipeline::new(ScriptedTransport::new([]), routing(&[]))
        .with_config(config(|c| c.retry.max_routing_refreshes = 0));

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert!(err.message().contains("no replica available"));
}

#[tokio::test(start_paused = true)]
async fn test_unroutable_key_surfaces_routing_error() {
    let table = Arc::new(StaticRoutingTable::new());
    let transport = ScriptedTransport::new([]);
    let pipeline = RequestPipeline::new(transport.clone(), table);

    let err = pipeline.execute(read()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(transport.replicas_called().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_send() {
    let transport = ScriptedTransport::new([
        respond(200, &[("lsn", "8"), ("x-ms-documentdb-partitionkeyrangeid", "0")]),
        Step::Hang,
    ]);
    let pipeline = RequestPipeline::new(transport, routing(&["https://r0/"]));
    pipeline.execute(read()).await.unwrap();

    let err = pipeline
        .execute_with_timeout(read(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!err.is_retryable());
    assert_eq!(err.status(), None);
    assert_eq!(err.attempts().unwrap().attempts, 1);
    assert_eq!(pipeline.session().required_lsn("0"), 8);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let transport = ScriptedTransport::new([respond(
        429,
        &[("x-ms-retry-after-ms", "10000"), ("lsn", "6"), (RANGE, "0")],
    )]);
    let pipeline = RequestPipeline::new(transport.clone(), routing(&["https://r0/"]));

    let start = Instant::now();
    let err = pipeline
        .execute_with_timeout(read(), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.lsn(), 6);

    let summary = err.attempts().unwrap();
    assert_eq!(summary.last_kind, Some(ErrorKind::RequestRateTooLarge));
    assert_eq!(transport.replicas_called().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_with_caller_future() {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let transport = ScriptedTransport::new([Step::Hang]);
    let pipeline = RequestPipeline::new(transport, routing(&["https://r0/"]));

    let run = pipeline.execute_with_cancel(read(), async {
        let _ = rx.await;
    });
    let (result, _) = futures::future::join(run, async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = tx.send(());
    })
    .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_keep_highest_lsn() {
    let transport = ScriptedTransport::new([
        respond(200, &[("lsn", "5"), ("x-ms-documentdb-partitionkeyrangeid", "0")]),
        respond(200, &[("lsn", "3"), ("x-ms-documentdb-partitionkeyrangeid", "0")]),
    ]);
    let pipeline = Arc::new(RequestPipeline::new(transport, routing(&["https://r0/"])));

    let a = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.execute(read()).await })
    };
    let b = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.execute(read()).await })
    };
    let (a, b) = futures::future::join(a, b).await;
    assert!(a.unwrap().is_ok());
    assert!(b.unwrap().is_ok());
    assert_eq!(pipeline.session().required_lsn("0"), 5);
}

#[tokio::test(start_paused = true)]
async fn test_pipelines_can_share_a_session() {
    let first = RequestPipeline::new(
        ScriptedTransport::new([respond(
            200,
            &[("lsn", "21"), ("x-ms-documentdb-partitionkeyrangeid", "0")],
        )]),
        routing(&["https://r0/"]),
    );
    let second = RequestPipeline::new(ScriptedTransport::new([]), routing(&["https://r1/"]))
        .with_session(first.session().clone());

    first.execute(read()).await.unwrap();
    assert_eq!(second.session().required_lsn("0"), 21);
}

#[test]
fn test_surfaced_errors_compare_structurally() {
    let a = ClientError::builder(ErrorKind::Gone).message("moved").build();
    let b = ClientError::builder(ErrorKind::Gone).message("moved").build();
    assert_eq!(a, b);
}
