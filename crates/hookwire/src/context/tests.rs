//! Tests for the response context state machine.

use super::*;
use crate::error::InterceptError;
use crate::mime::MimeResolver;
use crate::request::InterceptedRequest;
use bytes::Bytes;
use futures::StreamExt;
use hyper::header::CONTENT_TYPE;
use hyper::{HeaderMap, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn context(url: &str) -> (ResponseContext, ResponseHandle) {
    let request = Arc::new(InterceptedRequest::get(url).unwrap());
    ResponseContext::new(request, Arc::new(MimeResolver::default()))
}

async fn full_response(handle: ResponseHandle) -> (ResponseHead, Bytes) {
    match handle.await {
        Delivery::Response {
            head,
            body: ResponseBody::Full(bytes),
        } => (head, bytes),
        other => panic!("expected a full response, got {other:?}"),
    }
}

async fn streamed_response(handle: ResponseHandle) -> (ResponseHead, BodyStream) {
    match handle.await {
        Delivery::Response {
            head,
            body: ResponseBody::Streaming(stream),
        } => (head, stream),
        other => panic!("expected a streamed response, got {other:?}"),
    }
}

fn content_type(head: &ResponseHead) -> Option<&str> {
    head.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_respond_with_text() {
    let (ctx, handle) = context("https://app.test/hello");
    ctx.respond_with_text(Some("hello")).unwrap();
    assert_eq!(ctx.phase(), Phase::Completed);

    let (head, body) = full_response(handle).await;
    assert_eq!(head.status, StatusCode::OK);
    assert_eq!(content_type(&head), Some("text/plain"));
    assert_eq!(body, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn test_first_terminal_call_wins() {
    let (ctx, handle) = context("https://app.test/");
    ctx.respond_with_text(Some("first")).unwrap();
    ctx.respond_with_text(Some("second")).unwrap();
    ctx.respond_with_status_code(500, Some("third")).unwrap();
    ctx.pipe_error(InterceptError::Handler("late".to_string()));
    assert!(!ctx.cancel());

    let (head, body) = full_response(handle).await;
    assert_eq!(head.status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"first"));
}

#[tokio::test]
async fn test_json_keeps_existing_content_type() {
    let (ctx, handle) = context("https://api.test/items");
    ctx.set_header("Content-Type", "application/vnd.api+json")
        .unwrap();
    ctx.respond_with_json(Some(&serde_json::json!({"id": 1})))
        .unwrap();

    let (head, body) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("application/vnd.api+json"));
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["id"], 1);
}

#[tokio::test]
async fn test_json_none_sends_empty_body() {
    let (ctx, handle) = context("https://api.test/items");
    ctx.respond_with_json::<serde_json::Value>(None).unwrap();

    let (head, body) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("application/json"));
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_data_mime_resolved_from_path() {
    let (ctx, handle) = context("app://bundle/styles/site.css?v=3");
    ctx.respond_with_data(Some(Bytes::from_static(b"body{}")), None)
        .unwrap();
    let (head, _) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("text/css"));

    let (ctx, handle) = context("app://bundle/blob");
    ctx.respond_with_data(Some(Bytes::from_static(b"\x00\x01")), None)
        .unwrap();
    let (head, _) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("application/octet-stream"));
}

#[tokio::test]
async fn test_explicit_mime_and_status() {
    let (ctx, handle) = context("app://bundle/data.bin");
    ctx.respond_with_data_status(Some(Bytes::from_static(b"x")), Some("text/csv"), 202)
        .unwrap();
    let (head, body) = full_response(handle).await;
    assert_eq!(head.status, StatusCode::ACCEPTED);
    assert_eq!(content_type(&head), Some("text/csv"));
    assert_eq!(body.len(), 1);
}

#[tokio::test]
async fn test_status_without_body_has_no_content_type() {
    let (ctx, handle) = context("https://cdn.test/logo.png");
    ctx.respond_with_status_code(304, None).unwrap();
    let (head, body) = full_response(handle).await;
    assert_eq!(head.status, StatusCode::NOT_MODIFIED);
    assert_eq!(content_type(&head), None);
    assert!(body.is_empty());

    let (ctx, handle) = context("https://cdn.test/logo.png");
    ctx.respond_with_data(None, None).unwrap();
    let (head, _) = full_response(handle).await;
    assert_eq!(content_type(&head), None);

    let (ctx, handle) = context("https://cdn.test/logo.png");
    ctx.respond_with_data_status(None, None, 304).unwrap();
    let (head, body) = full_response(handle).await;
    assert_eq!(head.status, StatusCode::NOT_MODIFIED);
    assert_eq!(content_type(&head), None);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_malformed_calls_leave_context_open() {
    let (ctx, handle) = context("https://app.test/");
    assert!(matches!(
        ctx.respond_with_status_code(1000, None),
        Err(ResponseError::InvalidStatus(1000))
    ));
    assert!(ctx.set_header("bad header", "x").is_err());
    assert!(ctx
        .respond_with_data(Some(Bytes::from_static(b"x")), Some("bad\nmime"))
        .is_err());
    assert_eq!(ctx.phase(), Phase::Open);

    ctx.set_status(201).unwrap();
    ctx.respond_with_text(Some("created")).unwrap();
    let (head, _) = full_response(handle).await;
    assert_eq!(head.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_set_headers_is_all_or_nothing() {
    let (ctx, handle) = context("https://app.test/");
    assert!(ctx
        .set_headers([("X-One", "1"), ("bad header", "2")])
        .is_err());
    ctx.set_headers([("X-Two", "2"), ("x-two", "3")]).unwrap();
    ctx.set_cache_policy(CachePolicy::NotAllowed);
    ctx.respond_with_text(None).unwrap();

    let (head, _) = full_response(handle).await;
    assert!(head.headers.get("x-one").is_none());
    assert_eq!(head.headers.get("X-TWO").unwrap(), "3");
    assert_eq!(head.cache_policy, CachePolicy::NotAllowed);
}

#[tokio::test]
async fn test_metadata_frozen_after_commit() {
    let (ctx, handle) = context("https://app.test/");
    ctx.respond_with_text(Some("done")).unwrap();
    ctx.set_status(500).unwrap();
    ctx.set_header("X-Late", "1").unwrap();

    let (head, _) = full_response(handle).await;
    assert_eq!(head.status, StatusCode::OK);
    assert!(head.headers.get("x-late").is_none());
    assert_eq!(ctx.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_pipe_streams_chunks_in_order() {
    let (ctx, handle) = context("https://video.test/clip");
    let mut upstream = HeaderMap::new();
    upstream.insert("x-upstream", "yes".parse().unwrap());
    ctx.pipe_response(206, &upstream).unwrap();
    assert_eq!(ctx.phase(), Phase::Delivering);

    ctx.pipe_data(Bytes::from_static(b"ab"));
    ctx.pipe_data(Bytes::new());
    ctx.pipe_data(Bytes::from_static(b"cd"));
    ctx.pipe_end();
    ctx.pipe_data(Bytes::from_static(b"ignored"));
    ctx.pipe_end();

    let (head, mut stream) = streamed_response(handle).await;
    assert_eq!(head.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(head.headers.get("x-upstream").unwrap(), "yes");
    assert_eq!(stream.next().await.unwrap().unwrap(), "ab");
    assert_eq!(stream.next().await.unwrap().unwrap(), "cd");
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_handler_headers_override_piped_headers() {
    let (ctx, handle) = context("https://api.test/");
    ctx.set_header("Access-Control-Allow-Origin", "*").unwrap();
    let mut upstream = HeaderMap::new();
    upstream.insert("access-control-allow-origin", "https://a.test".parse().unwrap());
    upstream.insert("content-type", "text/plain".parse().unwrap());
    ctx.pipe_response(200, &upstream).unwrap();
    ctx.pipe_end();

    let (head, stream) = streamed_response(handle).await;
    assert_eq!(head.headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(content_type(&head), Some("text/plain"));
    assert!(stream.collect_bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pipe_error_after_data_keeps_relayed_bytes() {
    let (ctx, handle) = context("https://video.test/clip");
    ctx.pipe_response(200, &HeaderMap::new()).unwrap();
    ctx.pipe_data(Bytes::from_static(b"partial"));
    ctx.pipe_error(InterceptError::Handler("connection reset".to_string()));
    ctx.pipe_data(Bytes::from_static(b"after"));

    let (_, mut stream) = streamed_response(handle).await;
    assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
    assert!(matches!(
        stream.next().await,
        Some(Err(StreamError::Failed(InterceptError::Handler(_))))
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_pipe_error_while_open_fails_delivery() {
    let (ctx, handle) = context("https://video.test/clip");
    ctx.pipe_error(InterceptError::Handler("dns".to_string()));
    assert_eq!(ctx.phase(), Phase::Completed);
    assert!(matches!(handle.await, Delivery::Failed(InterceptError::Handler(_))));
}

#[tokio::test]
async fn test_pipe_data_and_end_before_response_are_ignored() {
    let (ctx, handle) = context("https://video.test/clip");
    ctx.pipe_data(Bytes::from_static(b"early"));
    ctx.pipe_end();
    assert_eq!(ctx.phase(), Phase::Open);

    ctx.pipe_response(200, &HeaderMap::new()).unwrap();
    ctx.pipe_end();
    let (_, stream) = streamed_response(handle).await;
    assert!(stream.collect_bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_respond_while_delivering_appends_and_ends() {
    let (ctx, handle) = context("https://video.test/clip");
    ctx.pipe_response(200, &HeaderMap::new()).unwrap();
    ctx.pipe_data(Bytes::from_static(b"a"));
    ctx.respond_with_text(Some("b")).unwrap();

    let (_, stream) = streamed_response(handle).await;
    assert_eq!(stream.collect_bytes().await.unwrap(), "ab");
}

#[tokio::test]
async fn test_cancel_invokes_stop_handler_once() {
    let (ctx, mut handle) = context("https://slow.test/");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    ctx.handle_stop_loading_request(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(handle.try_delivery().is_none());
    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert!(ctx.is_cancelled());

    ctx.respond_with_text(Some("too late")).unwrap();
    ctx.pipe_response(200, &HeaderMap::new()).unwrap();
    ctx.pipe_error(InterceptError::Handler("late".to_string()));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(handle.await, Delivery::Cancelled));
}

#[tokio::test]
async fn test_latest_stop_handler_wins() {
    let (ctx, handle) = context("https://slow.test/");
    let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let log = Arc::clone(&calls);
    ctx.handle_stop_loading_request(move || log.lock().push("first"));
    let log = Arc::clone(&calls);
    ctx.handle_stop_loading_request(move || log.lock().push("second"));

    handle.cancel();
    assert_eq!(*calls.lock(), vec!["second"]);
}

#[tokio::test]
async fn test_stop_handler_registered_after_cancel_runs_immediately() {
    let (ctx, handle) = context("https://slow.test/");
    handle.cancel();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    ctx.handle_stop_loading_request(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_handler_not_invoked_on_completion() {
    let (ctx, handle) = context("https://slow.test/");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    ctx.handle_stop_loading_request(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    ctx.respond_with_text(Some("ok")).unwrap();
    assert!(!handle.cancel());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_while_delivering_terminates_stream() {
    let (ctx, handle) = context("https://video.test/clip");
    let canceller = handle.canceller();
    ctx.pipe_response(200, &HeaderMap::new()).unwrap();
    ctx.pipe_data(Bytes::from_static(b"a"));
    assert!(canceller.cancel());
    ctx.pipe_data(Bytes::from_static(b"b"));
    ctx.pipe_end();

    let (_, mut stream) = streamed_response(handle).await;
    assert_eq!(stream.next().await.unwrap().unwrap(), "a");
    assert!(matches!(stream.next().await, Some(Err(StreamError::Cancelled))));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_dropped_context_is_abandoned() {
    let (ctx, handle) = context("https://app.test/");
    let canceller = handle.canceller();
    drop(ctx);
    assert!(!canceller.cancel());
    assert!(matches!(handle.await, Delivery::Failed(InterceptError::Abandoned)));

    let (ctx, handle) = context("https://app.test/");
    ctx.pipe_response(200, &HeaderMap::new()).unwrap();
    ctx.pipe_data(Bytes::from_static(b"a"));
    drop(ctx);
    let (_, stream) = streamed_response(handle).await;
    assert!(matches!(
        stream.collect_bytes().await,
        Err(StreamError::Failed(InterceptError::Abandoned))
    ));
}

#[test]
fn test_concurrent_respond_and_cancel_deliver_once() {
    for _ in 0..200 {
        let (ctx, mut handle) = context("https://race.test/");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        ctx.handle_stop_loading_request(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let canceller = handle.canceller();
        let responder = ctx.clone();
        let piper = ctx.clone();
        let threads = vec![
            std::thread::spawn(move || {
                responder.respond_with_text(Some("done")).unwrap();
            }),
            std::thread::spawn(move || {
                canceller.cancel();
            }),
            std::thread::spawn(move || {
                piper.pipe_response(200, &HeaderMap::new()).unwrap();
                piper.pipe_data(Bytes::from_static(b"x"));
                piper.pipe_end();
            }),
        ];
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(ctx.is_terminal());
        let delivery = handle.try_delivery().expect("terminal context must deliver");
        let cancelled = matches!(delivery, Delivery::Cancelled) || {
            match delivery {
                Delivery::Response {
                    body: ResponseBody::Streaming(stream),
                    ..
                } => {
                    let result = futures::executor::block_on(stream.collect_bytes());
                    matches!(result, Err(StreamError::Cancelled))
                }
                _ => false,
            }
        };
        assert_eq!(calls.load(Ordering::SeqCst), usize::from(cancelled));
    }
}

struct Checkerboard;

impl EncodeImage for Checkerboard {
    fn encode(&self, format: ImageFormat) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(format.to_string()))
    }
}

#[tokio::test]
async fn test_image_format_follows_path() {
    let (ctx, handle) = context("https://img.test/photos/cat.jpeg");
    ctx.respond_with_image(Some(&Checkerboard)).unwrap();
    let (head, body) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("image/jpeg"));
    assert_eq!(body, "jpeg");

    let (ctx, handle) = context("https://img.test/photos/cat");
    ctx.respond_with_image(Some(&Checkerboard)).unwrap();
    let (head, body) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("image/png"));
    assert_eq!(body, "png");
}

#[tokio::test]
async fn test_png_asset_served_as_jpeg_on_jpg_path() {
    let pixels = image::RgbaImage::from_pixel(4, 4, image::Rgba([200, 40, 40, 255]));
    let png = pixels.encode(ImageFormat::Png).unwrap();
    let asset = EncodedImage::new(ImageFormat::Png, png);

    let (ctx, handle) = context("https://img.test/photo.jpg");
    ctx.respond_with_image(Some(&asset)).unwrap();
    assert_eq!(ctx.phase(), Phase::Completed);
    let (head, body) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("image/jpeg"));
    assert!(body.starts_with(b"\xff\xd8"));

    let (ctx, handle) = context("https://img.test/photo");
    ctx.respond_with_image(Some(&pixels)).unwrap();
    let (head, body) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("image/png"));
    assert!(body.starts_with(b"\x89PNG"));
}

#[tokio::test]
async fn test_image_with_explicit_mime() {
    let (ctx, handle) = context("https://img.test/photo.png");
    ctx.respond_with_image_mime(Some(&Checkerboard), "image/jpg")
        .unwrap();
    let (head, body) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("image/jpg"));
    assert_eq!(body, "jpeg");
}

#[tokio::test]
async fn test_image_encoding_failure_leaves_context_open() {
    let (ctx, handle) = context("https://img.test/photo.jpg");
    let truncated = EncodedImage::new(ImageFormat::Png, &b"png"[..]);
    assert!(matches!(
        ctx.respond_with_image(Some(&truncated)),
        Err(ResponseError::ImageEncoding(_))
    ));
    assert_eq!(ctx.phase(), Phase::Open);

    ctx.respond_with_image(None).unwrap();
    let (head, body) = full_response(handle).await;
    assert_eq!(content_type(&head), Some("image/jpeg"));
    assert!(body.is_empty());
}
