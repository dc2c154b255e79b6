#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use futures::Stream;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use ventra::adapters::health_handler::HealthHandler;
use ventra::adapters::rate_limit::{RateLimitConfig, RateLimiter};
use ventra::agents::config::SessionConfig;
use ventra::agents::error::{ProviderError, RawError};
use ventra::agents::llm::{AgentProvider, ByteStream, ProviderPayload, ProviderReply, StreamResponse};
use ventra::agents::memory::InMemoryStore;
use ventra::agents::AgentGateway;
use ventra::config::Settings;

/// What the provider does on its next call
pub enum Script {
    Reply(ProviderReply),
    Fail(RawError),
    /// Raw reads of a 200 stream
    Stream(Vec<Result<Bytes, ProviderError>>),
    /// Reads, then the stream never produces anything again
    StreamThenHang(Vec<Bytes>),
    /// Non-success stream status with an error body
    StreamStatus(u16, &'static str),
    /// Never answers
    Hang,
}

/// In-process provider answering from a queue of scripted steps
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Script>>,
    payloads: Mutex<Vec<ProviderPayload>>,
    calls: AtomicUsize,
    /// Set when a stream handed out by this provider is dropped
    pub stream_dropped: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            payloads: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Provider that answers every call with `content`
    pub fn replying(content: &str, times: usize) -> Arc<Self> {
        Self::new((0..times).map(|_| Script::Reply(ProviderReply::text(content))).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<ProviderPayload> {
        self.payloads.lock().unwrap().clone()
    }

    fn next(&self, payload: ProviderPayload) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("provider called more often than scripted")
    }

    fn tracked(&self, inner: ByteStream) -> ByteStream {
        Box::pin(TrackedStream {
            inner,
            dropped: self.stream_dropped.clone(),
        })
    }
}

#[async_trait]
impl AgentProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, payload: ProviderPayload) -> Result<ProviderReply, RawError> {
        match self.next(payload) {
            Script::Reply(reply) => Ok(reply),
            Script::Fail(err) => Err(err),
            Script::Hang => futures::future::pending().await,
            _ => panic!("streaming step scripted for a non-streaming call"),
        }
    }

    async fn stream_complete(&self, payload: ProviderPayload) -> Result<StreamResponse, RawError> {
        match self.next(payload) {
            Script::Stream(reads) => Ok(StreamResponse::ok(self.tracked(Box::pin(futures::stream::iter(reads))))),
            Script::StreamThenHang(reads) => {
                let reads = futures::stream::iter(reads.into_iter().map(Ok));
                let body = futures::StreamExt::chain(reads, futures::stream::pending());
                Ok(StreamResponse::ok(self.tracked(Box::pin(body))))
            }
            Script::StreamStatus(status, body) => Ok(StreamResponse::with_status(
                status,
                Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))])),
            )),
            Script::Fail(err) => Err(err),
            Script::Hang => futures::future::pending().await,
            Script::Reply(_) => panic!("non-streaming step scripted for a streaming call"),
        }
    }
}

struct TrackedStream {
    inner: ByteStream,
    dropped: Arc<AtomicBool>,
}

impl Stream for TrackedStream {
    type Item = Result<Bytes, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Wire-format frames, one per line
pub fn frames(lines: &[&str]) -> Vec<Result<Bytes, ProviderError>> {
    lines
        .iter()
        .map(|line| Ok(Bytes::from(format!("{}\n", line))))
        .collect()
}

pub fn gateway_with(provider: Arc<ScriptedProvider>, agent_quota: u32) -> AgentGateway {
    let limiter = Arc::new(RateLimiter::with_sweep_probability(
        RateLimitConfig {
            max_requests: agent_quota,
            window_ms: 60_000,
        },
        0.0,
    ));
    AgentGateway::new(limiter, provider, Arc::new(InMemoryStore::new(100)), SessionConfig::default())
}

/// The full router served on a random local port
pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
}

impl TestServer {
    pub async fn new(provider: Arc<ScriptedProvider>, settings: Settings) -> Self {
        let gateway = ventra::create_gateway(&settings, provider);
        let app = ventra::create_app(gateway, Arc::new(HealthHandler::new()), &settings);
        Self::serve(app).await
    }

    /// Serve any router, e.g. a fake upstream agent service
    pub async fn serve(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        TestServer { addr, base_url }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
