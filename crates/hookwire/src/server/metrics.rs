use super::builder::{full_body, HookwireBody, SimpleResponseBuilder};
use crate::metrics::collect_metrics;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Serve `GET /metrics` in Prometheus text format until shut down.
pub async fn serve_metrics(listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
    let local_addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("Metrics available on http://{}/metrics", local_addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(|req| async move { Ok::<_, Infallible>(metrics_response(&req)) });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Metrics accept error: {}", e),
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

fn metrics_response(req: &Request<Incoming>) -> Response<HookwireBody> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return SimpleResponseBuilder::new(StatusCode::NOT_FOUND)
            .body("Not Found")
            .build();
    }
    let mut response = Response::new(full_body(Bytes::from(collect_metrics())));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
