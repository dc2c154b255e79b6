//! Incremental decoder for the agent streaming wire format
//!
//! The upstream speaks newline-delimited SSE-style frames:
//!
//! ```text
//! data: {"chunk":"Hel"}
//! data: {"chunk":"lo","metadata":{"agentType":"funding"}}
//! data: [DONE]
//! ```
//!
//! Bytes are buffered until a full line is available, so frames (and
//! multi-byte characters) may be split across reads at any position.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::{ByteStream, StreamResponse};
use crate::agents::domain::{AgentResponse, StreamEvent};
use crate::agents::error::{classify, classify_value, GatewayResult, ProviderError};

/// Sentinel payload that terminates a stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Upper bound on how much of a failed response body is read for classification
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct FramePayload {
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    error: Option<Value>,
}

/// Pull-based decoder: push raw bytes in, pull [`StreamEvent`]s out
#[derive(Debug)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    pending: VecDeque<StreamEvent>,
    content: String,
    metadata: Map<String, Value>,
    fallback_agent_type: String,
    eof: bool,
    done: bool,
}

impl StreamDecoder {
    pub fn new(fallback_agent_type: impl Into<String>) -> Self {
        Self {
            buffer: Vec::new(),
            pending: VecDeque::new(),
            content: String::new(),
            metadata: Map::new(),
            fallback_agent_type: fallback_agent_type.into(),
            eof: false,
            done: false,
        }
    }

    /// Buffer a raw read from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        if !self.done && !self.eof {
            self.buffer.extend_from_slice(bytes);
        }
    }

    /// Signal that the transport has no more bytes
    pub fn end_of_input(&mut self) {
        self.eof = true;
    }

    /// Stop decoding without emitting anything further
    pub fn abort(&mut self) {
        self.done = true;
        self.pending.clear();
        self.buffer.clear();
    }

    /// Whether `End` (or an error) has been produced
    pub fn is_done(&self) -> bool {
        self.done && self.pending.is_empty()
    }

    /// Next decoded event, or `None` when more input is needed (or decoding is over)
    pub fn next_event(&mut self) -> Option<GatewayResult<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }

            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                if let Err(e) = self.process_line(&line[..pos]) {
                    return Some(Err(e));
                }
                continue;
            }

            if !self.eof {
                return None;
            }

            // The transport closed, so a trailing unterminated line is complete
            let rest = std::mem::take(&mut self.buffer);
            if let Err(e) = self.process_line(&rest) {
                return Some(Err(e));
            }
            if !self.done {
                self.finish_stream();
            }
        }
    }

    /// Push bytes and drain every event that became available
    pub fn feed(&mut self, bytes: &[u8]) -> GatewayResult<Vec<StreamEvent>> {
        self.push(bytes);
        self.drain()
    }

    /// Signal end of input and drain the remaining events (always ends with `End`)
    pub fn finish(&mut self) -> GatewayResult<Vec<StreamEvent>> {
        self.end_of_input();
        self.drain()
    }

    fn drain(&mut self) -> GatewayResult<Vec<StreamEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event() {
            events.push(event?);
        }
        Ok(events)
    }

    /// Content accumulated so far
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Metadata merged so far
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Finalize into the terminal response
    pub fn into_response(self) -> AgentResponse {
        AgentResponse::assemble(self.content, self.metadata, &self.fallback_agent_type)
    }

    fn finish_stream(&mut self) {
        self.done = true;
        self.buffer.clear();
        self.pending.push_back(StreamEvent::End);
    }

    fn process_line(&mut self, raw: &[u8]) -> GatewayResult<()> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return Ok(());
        }

        let Some(data) = line.strip_prefix("data:") else {
            tracing::trace!(line = %line, "Ignoring non-data stream line");
            return Ok(());
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data.trim() == DONE_SENTINEL {
            self.finish_stream();
            return Ok(());
        }

        let payload: FramePayload = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, line = %data, "Skipping malformed stream line");
                return Ok(());
            }
        };

        if let Some(error) = payload.error {
            self.abort();
            return Err(classify_value(error));
        }

        if let Some(chunk) = payload.chunk.filter(|c| !c.is_empty()) {
            self.content.push_str(&chunk);
            self.pending.push_back(StreamEvent::Chunk(chunk));
        }

        if let Some(metadata) = payload.metadata {
            for (key, value) in &metadata {
                self.metadata.insert(key.clone(), value.clone());
            }
            self.pending.push_back(StreamEvent::Metadata(metadata));
        }

        Ok(())
    }
}

/// Per-chunk callback for live echo of streamed text
pub type ChunkObserver<'a> = Box<dyn FnMut(&str) + Send + 'a>;

/// Lazy event stream over a byte transport
///
/// Yields `Chunk`/`Metadata` events in arrival order, then `End`, then finishes.
/// A transport failure yields one classified error and finishes. Dropping the
/// stream drops (and so closes) the transport.
pub struct DecodedStream<'a, S> {
    inner: S,
    decoder: StreamDecoder,
    observer: Option<ChunkObserver<'a>>,
}

impl<'a, S> DecodedStream<'a, S> {
    pub fn new(inner: S, fallback_agent_type: impl Into<String>) -> Self {
        Self {
            inner,
            decoder: StreamDecoder::new(fallback_agent_type),
            observer: None,
        }
    }

    /// Deliver every chunk to `observer` as it is decoded
    pub fn with_observer(mut self, observer: impl FnMut(&str) + Send + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn content(&self) -> &str {
        self.decoder.content()
    }

    /// Finalize into the terminal response
    pub fn into_response(self) -> AgentResponse {
        self.decoder.into_response()
    }
}

impl<'a> DecodedStream<'a, ByteStream> {
    /// Start decoding a provider response.
    ///
    /// A non-success status is turned into a classified error before any
    /// decoding starts, using the structured error body when there is one.
    pub async fn open(response: StreamResponse, fallback_agent_type: impl Into<String>) -> GatewayResult<Self> {
        if !(200..300).contains(&response.status) {
            let body = read_limited(response.body, MAX_ERROR_BODY_BYTES).await;
            let err = ProviderError::from_status(response.status, &body).with_retry_after(response.retry_after_secs);
            tracing::warn!(status = response.status, error = %err, "Agent stream rejected upstream");
            return Err(classify(err));
        }
        Ok(Self::new(response.body, fallback_agent_type))
    }
}

/// Read at most `limit` bytes of a failed response body.
///
/// A read failure keeps whatever arrived before it; the status alone still classifies.
pub(crate) async fn read_limited(mut body: ByteStream, limit: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    while let Some(read) = body.next().await {
        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, read = collected.len(), "Error body read failed");
                break;
            }
        };
        let take = (limit - collected.len()).min(bytes.len());
        collected.extend_from_slice(&bytes[..take]);
        if collected.len() >= limit {
            break;
        }
    }
    collected
}

impl<'a, S> Stream for DecodedStream<'a, S>
where
    S: Stream<Item = Result<Bytes, ProviderError>> + Unpin,
{
    type Item = GatewayResult<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.decoder.next_event() {
                if let (Ok(StreamEvent::Chunk(text)), Some(observer)) = (&event, this.observer.as_mut()) {
                    observer(text.as_str());
                }
                return Poll::Ready(Some(event));
            }
            if this.decoder.is_done() {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.decoder.push(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.decoder.abort();
                    tracing::warn!(error = %e, "Agent stream failed mid-flight");
                    return Poll::Ready(Some(Err(classify(e))));
                }
                Poll::Ready(None) => this.decoder.end_of_input(),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
