use crate::coral::config::CoralConfig;
use crate::coral::sse;
use coral_core::errors::{ChatError, FinishReason, STREAM_IDLE, STREAM_INTERRUPTED};
use coral_core::llm::{ChatClient, ChatRequest, ChatStream, StreamEvent};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Clone)]
pub struct CoralClient {
    http: Client,
    cfg: CoralConfig,
    endpoint: Url,
}

impl CoralClient {
    pub fn new(cfg: CoralConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = &cfg.api_key {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", key))?,
            );
        }
        if let Some(user) = &cfg.user_id {
            headers.insert("User-Id", header::HeaderValue::from_str(user)?);
        }
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .connect_timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        let endpoint = chat_stream_url(&cfg.base_url)?;
        Ok(Self { http, cfg, endpoint })
    }

    async fn send_once(&self, req: &ChatRequest) -> Result<reqwest::Response, ChatError> {
        let pending = self
            .http
            .post(self.endpoint.clone())
            .header(header::ACCEPT, "text/event-stream")
            .json(req)
            .send();
        // Headers must arrive within `timeout`; the body is watched by the idle timer.
        let resp = match timeout(self.cfg.timeout, pending).await {
            Ok(r) => r.map_err(map_reqwest_err)?,
            Err(_) => {
                warn!(
                    target: "providers::coral",
                    "no response headers within {:?}",
                    self.cfg.timeout
                );
                return Err(ChatError::network(0, "timed out waiting for response"));
            }
        };
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.ok();
            error!(
                target: "providers::coral",
                "chat stream non-200 status={} body={:?}",
                status,
                body
            );
            return Err(map_status_err(status, body));
        }
        Ok(resp)
    }

    async fn connect(&self, req: &ChatRequest) -> Result<reqwest::Response, ChatError> {
        let max_attempts = self.cfg.stream_max_retries.max(1);
        let mut attempt = 0u32;
        loop {
            match self.send_once(req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    attempt += 1;
                    let backoff = Duration::from_millis(300 * attempt as u64);
                    warn!(
                        target: "providers::coral",
                        "connect attempt {} failed: {}; retry in {:?}",
                        attempt,
                        e,
                        backoff
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[allow(async_fn_in_trait)]
impl ChatClient for CoralClient {
    async fn stream_chat<'a>(&'a self, req: ChatRequest) -> Result<ChatStream<'a>, ChatError> {
        let mut req = req;
        if req.model.is_none() {
            req.model = self.cfg.model.clone();
        }
        info!(
            target: "providers::coral",
            "start chat stream model={:?} url={}",
            req.model,
            self.endpoint
        );
        let resp = self.connect(&req).await?;
        let idle = self.cfg.stream_idle_timeout;

        let s = async_stream::stream! {
            let mut body = resp.bytes_stream();
            let mut buf = bytes::BytesMut::new();
            let mut last = Instant::now();
            let mut done = false;
            'outer: loop {
                tokio::select! {
                    chunk = body.next() => {
                        match chunk {
                            Some(Ok(b)) => {
                                buf.extend_from_slice(&b);
                                last = Instant::now();
                                while let Some(frame) = sse::next_frame(&mut buf) {
                                    match sse::parse_event(&frame) {
                                        Ok(Some(StreamEvent::StreamEnd(end))) => {
                                            done = true;
                                            yield finish(end);
                                            break 'outer;
                                        }
                                        Ok(Some(ev)) => { yield Ok(ev); }
                                        Ok(None) => {}
                                        Err(e) => { done = true; yield Err(e); break 'outer; }
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                done = true;
                                yield Err(map_reqwest_err(e));
                                break 'outer;
                            }
                            None => {
                                // A final frame may arrive without its trailing blank line.
                                if !buf.is_empty() {
                                    match sse::parse_event(&buf) {
                                        Ok(Some(StreamEvent::StreamEnd(end))) => {
                                            done = true;
                                            yield finish(end);
                                        }
                                        Ok(Some(ev)) => { yield Ok(ev); }
                                        Ok(None) => {}
                                        Err(e) => { done = true; yield Err(e); }
                                    }
                                }
                                break 'outer;
                            }
                        }
                    }
                    _ = sleep(Duration::from_millis(500)) => {
                        if last.elapsed() > idle {
                            done = true;
                            let message = format!("no data for {:?}", idle);
                            yield Err(ChatError::stream(STREAM_IDLE, message));
                            break 'outer;
                        }
                    }
                }
            }
            if !done {
                warn!(target:"providers::coral","stream closed before stream-end");
                yield Err(ChatError::stream(STREAM_INTERRUPTED, "stream closed before stream-end"));
            }
        };
        Ok(Box::pin(s))
    }
}

/// Anything but a complete finish surfaces as a `FinishStream` error.
fn finish(end: coral_core::llm::StreamEnd) -> Result<StreamEvent, ChatError> {
    debug!(target:"providers::coral","stream-end reason={}", end.finish_reason);
    if end.finish_reason == FinishReason::Complete {
        Ok(StreamEvent::StreamEnd(end))
    } else {
        Err(ChatError::FinishStream {
            reason: end.finish_reason,
            detail: end.error,
        })
    }
}

fn chat_stream_url(base: &str) -> anyhow::Result<Url> {
    let mut base = Url::parse(base.trim())?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join("v1/chat-stream")?)
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_body() || e.is_decode() {
        ChatError::stream(STREAM_INTERRUPTED, e.to_string())
    } else {
        ChatError::network(e.status().map(|s| s.as_u16()).unwrap_or(0), e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    if status == StatusCode::UNAUTHORIZED {
        return ChatError::Unauthorized;
    }
    let message = body
        .as_deref()
        .and_then(error_detail)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
    ChatError::network(status.as_u16(), message)
}

// FastAPI style `{"detail": "..."}` bodies, otherwise the raw text.
fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(d) = v["detail"].as_str() {
            return Some(d.to_string());
        }
        if let Some(d) = v["message"].as_str() {
            return Some(d.to_string());
        }
    }
    Some(body.to_string())
}
