//! End-to-end checks of the chat stream against a scripted local HTTP server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coral_core::errors::{
    ChatError, FinishReason, STREAM_DECODE, STREAM_IDLE, STREAM_INTERRUPTED,
};
use coral_core::llm::{ChatClient, ChatRequest, ChatResponse, StreamEvent};
use coral_providers::coral::config::CoralConfig;
use coral_providers::coral::CoralClient;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

enum Reply {
    /// Complete response with a `Content-Length` body.
    Full(&'static str, &'static str, String),
    /// 200 headers and the given bytes, then the socket stays open and silent.
    Stall(String),
    /// Reads the request and never answers.
    Silent,
}

/// Answers one connection per reply, in order. The counter tracks accepted
/// connections.
async fn serve_script(replies: Vec<Reply>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        for reply in replies {
            let (mut sock, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            read_request(&mut sock).await;
            match reply {
                Reply::Full(status_line, content_type, body) => {
                    let resp = format!(
                        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line,
                        content_type,
                        body.len(),
                        body
                    );
                    sock.write_all(resp.as_bytes()).await.unwrap();
                    sock.shutdown().await.ok();
                }
                Reply::Stall(partial) => {
                    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
                    sock.write_all(head.as_bytes()).await.unwrap();
                    sock.write_all(partial.as_bytes()).await.unwrap();
                    sock.flush().await.ok();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        drop(sock);
                    });
                }
                Reply::Silent => {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        drop(sock);
                    });
                }
            }
        }
    });
    (format!("http://{}", addr), accepted)
}

async fn serve_once(status_line: &'static str, content_type: &'static str, body: String) -> String {
    serve_script(vec![Reply::Full(status_line, content_type, body)]).await.0
}

async fn read_request(sock: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + len {
                return;
            }
        }
    }
}

fn client(base_url: String) -> CoralClient {
    client_with(base_url, |_| {})
}

fn client_with(base_url: String, tune: impl FnOnce(&mut CoralConfig)) -> CoralClient {
    let mut cfg = CoralConfig {
        base_url,
        stream_max_retries: 1,
        stream_idle_timeout: Duration::from_secs(5),
        ..CoralConfig::default()
    };
    tune(&mut cfg);
    CoralClient::new(cfg).unwrap()
}

fn sse(events: &[&str]) -> String {
    events.iter().map(|e| format!("data: {}\n\n", e)).collect()
}

async fn collect(c: &CoralClient) -> (ChatResponse, Option<ChatError>) {
    let mut resp = ChatResponse::default();
    let mut stream = c.stream_chat(ChatRequest::new("hello")).await.unwrap();
    while let Some(item) = stream.next().await {
        match item {
            Ok(ev) => resp.apply(&ev),
            Err(e) => return (resp, Some(e)),
        }
    }
    (resp, None)
}

#[tokio::test]
async fn test_complete_stream_accumulates() {
    let body = sse(&[
        r#"{"event":"stream-start","data":{"generation_id":"gen-1","conversation_id":"conv-1"}}"#,
        r#"{"event":"text-generation","data":{"text":"This is "}}"#,
        r#"{"event":"text-generation","data":{"text":"a test text"}}"#,
        r#"{"event":"citation-generation","data":{"citations":[{"start":0,"end":4,"text":"This","document_ids":["d1"]}]}}"#,
        r#"{"event":"stream-end","data":{"finish_reason":"COMPLETE","text":"This is a test text"}}"#,
    ]);
    let base = serve_once("200 OK", "text/event-stream", body).await;
    let (resp, err) = collect(&client(base)).await;
    assert!(err.is_none(), "{err:?}");
    assert_eq!(resp.text, "This is a test text");
    assert_eq!(resp.generation_id, "gen-1");
    assert_eq!(resp.citations.len(), 1);
    assert_eq!(resp.finish_reason, Some(FinishReason::Complete));
}

#[tokio::test]
async fn test_error_finish_is_classified() {
    let body = sse(&[
        r#"{"event":"text-generation","data":{"text":"partial"}}"#,
        r#"{"event":"stream-end","data":{"finish_reason":"ERROR","error":"boom"}}"#,
    ]);
    let base = serve_once("200 OK", "text/event-stream", body).await;
    let (resp, err) = collect(&client(base)).await;
    assert_eq!(resp.text, "partial");
    let err = err.expect("finish error");
    assert!(err.is_finished_with_unexpected_error());
    assert_eq!(err.user_message(), "boom");
}

#[tokio::test]
async fn test_missing_stream_end_is_interrupted() {
    let body = sse(&[r#"{"event":"text-generation","data":{"text":"cut"}}"#]);
    let base = serve_once("200 OK", "text/event-stream", body).await;
    let (_, err) = collect(&client(base)).await;
    assert!(matches!(err, Some(ChatError::Stream { code: STREAM_INTERRUPTED, .. })));
}

#[tokio::test]
async fn test_malformed_event_is_decode_error() {
    let base = serve_once("200 OK", "text/event-stream", "data: {oops\n\n".to_string()).await;
    let (_, err) = collect(&client(base)).await;
    assert!(matches!(err, Some(ChatError::Stream { code: STREAM_DECODE, .. })));
}

#[tokio::test]
async fn test_http_errors_are_tagged() {
    let base = serve_once(
        "404 Not Found",
        "application/json",
        r#"{"detail":"Conversation not found"}"#.to_string(),
    )
    .await;
    let err = client(base)
        .stream_chat(ChatRequest::new("hi"))
        .await
        .err()
        .expect("404");
    assert!(err.is_not_found());
    assert_eq!(err.user_message(), "The requested resource was not found.");

    let base = serve_once("401 Unauthorized", "application/json", "{}".to_string()).await;
    let err = client(base)
        .stream_chat(ChatRequest::new("hi"))
        .await
        .err()
        .expect("401");
    assert_eq!(err, ChatError::Unauthorized);
}


// -- timeouts and reconnects --

#[tokio::test]
async fn test_missing_headers_time_out() {
    let (base, accepted) = serve_script(vec![Reply::Silent]).await;
    let c = client_with(base, |cfg| {
        cfg.timeout = Duration::from_millis(500);
        cfg.stream_idle_timeout = Duration::from_millis(500);
    });
    let res = tokio::time::timeout(Duration::from_secs(5), c.stream_chat(ChatRequest::new("hi")))
        .await
        .expect("request should give up on its own");
    let err = res.err().expect("timeout error");
    assert_eq!(err, ChatError::network(0, "timed out waiting for response"));
    assert!(err.is_retryable());
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stalled_body_hits_idle_timeout() {
    let first = sse(&[r#"{"event":"text-generation","data":{"text":"slow"}}"#]);
    let (base, _) = serve_script(vec![Reply::Stall(first)]).await;
    let c = client_with(base, |cfg| {
        cfg.stream_idle_timeout = Duration::from_millis(600);
    });
    let (resp, err) = tokio::time::timeout(Duration::from_secs(5), collect(&c))
        .await
        .expect("idle timer should end the stream");
    assert_eq!(resp.text, "slow");
    assert!(matches!(err, Some(ChatError::Stream { code: STREAM_IDLE, .. })), "{err:?}");
}

#[tokio::test]
async fn test_unavailable_then_success_reconnects() {
    let body = sse(&[
        r#"{"event":"text-generation","data":{"text":"second try"}}"#,
        r#"{"event":"stream-end","data":{"finish_reason":"COMPLETE"}}"#,
    ]);
    let (base, accepted) = serve_script(vec![
        Reply::Full("503 Service Unavailable", "text/plain", String::new()),
        Reply::Full("200 OK", "text/event-stream", body),
    ])
    .await;
    let c = client_with(base, |cfg| cfg.stream_max_retries = 2);
    let (resp, err) = collect(&c).await;
    assert!(err.is_none(), "{err:?}");
    assert_eq!(resp.text, "second try");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let body = sse(&[r#"{"event":"stream-end","data":{"finish_reason":"COMPLETE"}}"#]);
    let (base, accepted) = serve_script(vec![
        Reply::Full("404 Not Found", "application/json", r#"{"detail":"gone"}"#.to_string()),
        Reply::Full("200 OK", "text/event-stream", body),
    ])
    .await;
    let c = client_with(base, |cfg| cfg.stream_max_retries = 2);
    let err = c.stream_chat(ChatRequest::new("hi")).await.err().expect("404");
    assert!(err.is_not_found());
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}
