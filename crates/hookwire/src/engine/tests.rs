//! Tests for the interception engine.

use super::*;
use crate::config::Config;
use crate::context::{Delivery, ResponseBody};
use crate::upstream::UpstreamResponse;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use std::sync::atomic::AtomicUsize;
use tokio::sync::mpsc;

fn request(url: &str) -> InterceptedRequest {
    InterceptedRequest::get(url).unwrap()
}

fn engine() -> InterceptionEngine {
    InterceptionEngine::new(Arc::new(HandlerRegistry::new()))
}

async fn body_of(delivery: Delivery) -> (StatusCode, HeaderMap, Bytes) {
    match delivery {
        Delivery::Response { head, body } => {
            let bytes = body.collect().await.unwrap();
            (head.status, head.headers, bytes)
        }
        other => panic!("expected a response, got {other:?}"),
    }
}

/// Serves a fixed body and counts fetches.
struct FixedUpstream {
    chunks: Vec<&'static str>,
    calls: AtomicUsize,
}

impl FixedUpstream {
    fn new(chunks: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl UpstreamTransport for FixedUpstream {
    async fn fetch(&self, _request: &InterceptedRequest) -> Result<UpstreamResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        Ok(UpstreamResponse::from_chunks(
            StatusCode::OK,
            headers,
            self.chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect(),
        ))
    }

    fn describe(&self) -> String {
        "fixed".to_string()
    }
}

/// Never answers.
struct StalledUpstream;

#[async_trait]
impl UpstreamTransport for StalledUpstream {
    async fn fetch(&self, _request: &InterceptedRequest) -> Result<UpstreamResponse, TransportError> {
        futures::future::pending().await
    }

    fn describe(&self) -> String {
        "stalled".to_string()
    }
}

#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<(String, Option<Bytes>)>>,
}

impl UpstreamObserver for RecordingObserver {
    fn upstream_completed(&self, request: &InterceptedRequest, outcome: &RelayOutcome) {
        self.seen
            .lock()
            .push((request.absolute_url().to_string(), outcome.body.clone()));
    }
}

#[tokio::test]
async fn test_handler_dispatch() {
    let engine = engine();
    let id = engine
        .registry()
        .handle_host("foo.com", |_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
            ctx.respond_with_text(Some("hello")).unwrap();
        });

    let disposition = engine.intercept(request("https://foo.com/index"));
    match &disposition {
        Disposition::HandledBy {
            source: DispatchSource::Handler(source),
            ..
        } => assert_eq!(*source, id),
        other => panic!("unexpected disposition {other:?}"),
    }

    let (status, headers, body) = body_of(disposition.into_handle().unwrap().await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "text/plain");
    assert_eq!(body, "hello");
}

#[tokio::test]
async fn test_not_intercepted() {
    let engine = engine();
    engine.registry().handle_scheme("app", |_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
        ctx.respond_with_data(None, None).unwrap();
    });
    let disposition = engine.intercept(request("https://foo.com/"));
    assert!(!disposition.is_intercepted());
    assert!(disposition.into_handle().is_none());
}

#[tokio::test]
async fn test_handler_takes_precedence_over_upstream() {
    let engine = engine();
    let upstream = FixedUpstream::new(vec!["from upstream"]);
    engine.add_upstream(Predicate::http_or_https(), upstream.clone(), None);
    engine
        .registry()
        .handle_host_path("foo.com", "/local", |_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
            ctx.respond_with_text(Some("local")).unwrap();
        });

    let handle = engine
        .intercept(request("https://foo.com/local"))
        .into_handle()
        .unwrap();
    let (_, _, body) = body_of(handle.await).await;
    assert_eq!(body, "local");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);

    let disposition = engine.intercept(request("https://foo.com/remote"));
    assert!(matches!(
        &disposition,
        Disposition::HandledBy { source: DispatchSource::Upstream(name), .. } if name == "fixed"
    ));
    let (status, _, body) = body_of(disposition.into_handle().unwrap().await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "from upstream");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handler_panic_becomes_failure() {
    let engine = engine();
    engine
        .registry()
        .handle_http_or_https(|_req: Arc<InterceptedRequest>, _ctx: ResponseContext| panic!("template missing"));

    let handle = engine
        .intercept(request("http://foo.com/"))
        .into_handle()
        .unwrap();
    match handle.await {
        Delivery::Failed(InterceptError::HandlerPanicked(message)) => {
            assert_eq!(message, "template missing")
        }
        other => panic!("unexpected delivery {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_predicates_do_not_stop_the_scan() {
    let engine = engine();
    engine.add_upstream(
        Predicate::custom(|_req: &InterceptedRequest| panic!("bad upstream predicate")),
        FixedUpstream::new(vec!["never"]),
        None,
    );
    engine.registry().handle_predicate(
        |_req: &InterceptedRequest| panic!("bad predicate"),
        |_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
            ctx.respond_with_text(Some("wrong")).unwrap();
        },
    );
    engine
        .registry()
        .handle_host("foo.com", |_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
            ctx.respond_with_text(Some("second")).unwrap();
        });

    let handle = engine
        .intercept(request("https://foo.com/x"))
        .into_handle()
        .unwrap();
    let (_, _, body) = body_of(handle.await).await;
    assert_eq!(body, "second");

    assert!(!engine.intercept(request("https://other.com/x")).is_intercepted());
}

#[tokio::test]
async fn test_handler_panic_after_responding_keeps_response() {
    let engine = engine();
    engine
        .registry()
        .handle_http_or_https(|_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
            ctx.respond_with_text(Some("done")).unwrap();
            panic!("late failure");
        });

    let handle = engine
        .intercept(request("http://foo.com/"))
        .into_handle()
        .unwrap();
    let (_, _, body) = body_of(handle.await).await;
    assert_eq!(body, "done");
}

#[tokio::test]
async fn test_handler_may_respond_later() {
    let engine = engine();
    engine
        .registry()
        .handle_http_or_https(|_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                ctx.respond_with_status_code(202, None).unwrap();
            });
        });

    let handle = engine
        .intercept(request("http://foo.com/"))
        .into_handle()
        .unwrap();
    let (status, headers, body) = body_of(handle.await).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(headers.get("content-type").is_none());
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_disable_and_enable() {
    let engine = engine();
    engine
        .registry()
        .handle_http_or_https(|_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
            ctx.respond_with_data(None, None).unwrap();
        });

    engine.disable();
    assert!(!engine.is_enabled());
    assert!(!engine.intercept(request("http://foo.com/")).is_intercepted());
    assert_eq!(engine.registry().len(), 1);

    engine.enable();
    assert!(engine.intercept(request("http://foo.com/")).is_intercepted());
}

#[tokio::test]
async fn test_clear_removes_handlers_and_upstreams() {
    let engine = engine();
    engine
        .registry()
        .handle_scheme("app", |_req: Arc<InterceptedRequest>, ctx: ResponseContext| {
            ctx.respond_with_data(None, None).unwrap();
        });
    engine.add_upstream(Predicate::http_or_https(), FixedUpstream::new(vec![]), None);
    assert_eq!(engine.upstreams().len(), 1);

    engine.clear();
    assert!(engine.registry().is_empty());
    assert!(engine.upstreams().is_empty());
    assert!(!engine.intercept(request("app://bundle/")).is_intercepted());
    assert!(!engine.intercept(request("http://foo.com/")).is_intercepted());
}

#[tokio::test]
async fn test_upstream_callbacks_receive_body() {
    let engine = engine();
    let observer = Arc::new(RecordingObserver::default());
    engine.set_observer(Some(observer.clone() as Arc<dyn UpstreamObserver>));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_complete: OnComplete = Arc::new(move |request: &InterceptedRequest, outcome: &RelayOutcome| {
        let _ = tx.send((
            request.path().to_string(),
            outcome.status,
            outcome.bytes_relayed,
            outcome.body.clone(),
        ));
    });
    engine.add_upstream(
        Predicate::host("api.test"),
        FixedUpstream::new(vec!["{\"a\":", "1}"]),
        Some(on_complete),
    );

    let handle = engine
        .intercept(request("http://api.test/v1/items"))
        .into_handle()
        .unwrap();
    let (_, headers, body) = body_of(handle.await).await;
    assert_eq!(headers.get("content-type").unwrap(), "text/plain");
    assert_eq!(body, "{\"a\":1}");

    let (path, status, relayed, collected) = rx.recv().await.unwrap();
    assert_eq!(path, "/v1/items");
    assert_eq!(status, Some(StatusCode::OK));
    assert_eq!(relayed, 7);
    assert_eq!(collected.unwrap(), "{\"a\":1}");

    // The observer runs right after on_complete on the same task
    tokio::task::yield_now().await;
    for _ in 0..10 {
        if !observer.seen.lock().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let seen = observer.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "http://api.test/v1/items");
    assert_eq!(seen[0].1.as_deref(), Some(&b"{\"a\":1}"[..]));
}

#[tokio::test]
async fn test_upstream_body_not_collected_without_callbacks() {
    let engine = engine();
    engine.add_upstream(Predicate::http_or_https(), FixedUpstream::new(vec!["x"]), None);
    let handle = engine
        .intercept(request("http://foo.com/"))
        .into_handle()
        .unwrap();
    match handle.await {
        Delivery::Response {
            body: ResponseBody::Streaming(stream),
            ..
        } => assert_eq!(stream.collect_bytes().await.unwrap(), "x"),
        other => panic!("unexpected delivery {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_stops_upstream() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_complete: OnComplete = Arc::new(move |_request: &InterceptedRequest, outcome: &RelayOutcome| {
        let _ = tx.send(outcome.cancelled);
    });
    engine.add_upstream(
        Predicate::http_or_https(),
        Arc::new(StalledUpstream),
        Some(on_complete),
    );

    let handle = engine
        .intercept(request("http://slow.test/"))
        .into_handle()
        .unwrap();
    assert!(engine.cancel(&handle));
    assert!(!engine.cancel(&handle));
    assert!(matches!(handle.await, Delivery::Cancelled));
    assert!(rx.recv().await.unwrap());
}

#[test]
fn test_upstream_without_runtime_fails() {
    let engine = engine();
    assert!(Handle::try_current().is_err());
    engine.add_upstream(Predicate::http_or_https(), FixedUpstream::new(vec![]), None);

    let mut handle = engine
        .intercept(request("http://foo.com/"))
        .into_handle()
        .unwrap();
    assert!(matches!(
        handle.try_delivery(),
        Some(Delivery::Failed(InterceptError::NoRuntime))
    ));
}

#[tokio::test]
async fn test_from_config_registers_routes_then_upstreams() {
    let config: Config = serde_yaml::from_str(
        r#"
listen:
  port: 8080
mime:
  overrides:
    tpl: text/x-template
routes:
  - name: ping
    match: { relative_path: /ping }
    respond: { text: pong }
  - name: template
    match: { host: app.test }
    respond: { text: "{{name}}" }
    headers: { X-Route: template }
upstreams:
  - host: 127.0.0.1
    port: 3128
    match: { host: api.test }
"#,
    )
    .unwrap();
    config.validate().unwrap();

    let engine = InterceptionEngine::from_config(&config, Arc::new(HandlerRegistry::new())).unwrap();
    assert_eq!(engine.registry().len(), 2);
    assert_eq!(engine.upstreams().len(), 1);
    assert_eq!(engine.upstreams()[0].describe(), "http://127.0.0.1:3128");
    assert_eq!(engine.mime().guess("/a/page.tpl"), "text/x-template");

    let names: Vec<_> = engine
        .registry()
        .snapshot()
        .iter()
        .map(|entry| entry.name().map(str::to_string))
        .collect();
    assert_eq!(names, vec![Some("ping".to_string()), Some("template".to_string())]);

    let handle = engine
        .intercept(request("http://app.test/ping"))
        .into_handle()
        .unwrap();
    let (_, _, body) = body_of(handle.await).await;
    assert_eq!(body, "pong");

    let handle = engine
        .intercept(request("http://app.test/other"))
        .into_handle()
        .unwrap();
    let (_, headers, body) = body_of(handle.await).await;
    assert_eq!(headers.get("x-route").unwrap(), "template");
    assert_eq!(body, "{{name}}");
}
