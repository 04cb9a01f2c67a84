use crate::backend::ByteStream;
use crate::error::{ApiError, ChatError};
use futures_core::Stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// End-of-stream marker sent as a data payload.
pub const SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Fragment(String),
    Done,
}

/// Incremental decoder for the server's event framing.
///
/// - Normalizes CRLF to LF, including a CR/LF pair split across reads
/// - Splits on blank lines; a block counts only if it starts with `data:`
/// - Keeps bytes buffered until a block is complete, so UTF-8 sequences
///   split across reads are never decoded early
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buf: Vec<u8>,
    pending_cr: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Decoded, ChatError>> {
        self.buf.reserve(chunk.len());
        for &b in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    self.buf.push(b'\n');
                    continue;
                }
                self.buf.push(b'\r');
            }
            if b == b'\r' {
                self.pending_cr = true;
            } else {
                self.buf.push(b);
            }
        }

        let mut out = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..pos + 2).take(pos).collect();
            if let Some(item) = decode_block(&block) {
                out.push(item);
            }
        }
        out
    }

    /// Flush a trailing block the server closed without a blank line.
    pub fn finish(&mut self) -> Vec<Result<Decoded, ChatError>> {
        if std::mem::take(&mut self.pending_cr) {
            self.buf.push(b'\r');
        }
        let block = std::mem::take(&mut self.buf);
        decode_block(&block).into_iter().collect()
    }
}

fn decode_block(block: &[u8]) -> Option<Result<Decoded, ChatError>> {
    let text = match std::str::from_utf8(block) {
        Ok(s) => s,
        Err(e) => return Some(Err(ChatError::Decode(format!("block is not valid UTF-8: {e}")))),
    };
    let text = text.trim_start_matches('\n');
    if text.is_empty() {
        return None;
    }

    let mut lines = text.split('\n');
    let first = lines.next()?;
    let Some(head) = first.strip_prefix(DATA_PREFIX) else {
        tracing::trace!(block = %first, "discarding non-data block");
        return None;
    };

    let mut payload = strip_space(head).to_string();
    for line in lines {
        payload.push('\n');
        match line.strip_prefix(DATA_PREFIX) {
            Some(rest) => payload.push_str(strip_space(rest)),
            None => payload.push_str(line),
        }
    }

    if payload.trim() == SENTINEL {
        return Some(Ok(Decoded::Done));
    }

    match interpret_payload(&payload) {
        Ok(Some(text)) if !text.is_empty() => Some(Ok(Decoded::Fragment(text))),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }
}

// The field value may carry one optional leading space.
fn strip_space(s: &str) -> &str {
    s.strip_prefix(' ').unwrap_or(s)
}

/// JSON strings are unwrapped, provider-shaped objects have their text pulled
/// out, and anything that is not JSON is passed through verbatim.
fn interpret_payload(payload: &str) -> Result<Option<String>, ChatError> {
    let value = match serde_json::from_str::<Value>(payload) {
        Ok(v) => v,
        Err(_) => return Ok(Some(payload.to_string())),
    };

    match value {
        Value::String(s) => Ok(Some(s)),
        Value::Object(_) => {
            if let Some(api) = ApiError::from_value(&value) {
                return Err(ChatError::ModelApi(api));
            }
            Ok(Some(extract_text(&value).unwrap_or_else(|| payload.to_string())))
        }
        // Bare numbers and the like are text that happened to parse.
        _ => Ok(Some(payload.to_string())),
    }
}

fn extract_text(value: &Value) -> Option<String> {
    let delta_content = value
        .pointer("/choices/0/delta/content")
        .or_else(|| value.pointer("/choices/0/message/content"));
    let candidates = [
        value.get("response"),
        delta_content,
        value.pointer("/delta/text"),
        value.get("completion"),
        value.get("content"),
        value.get("text"),
        value.pointer("/message/content"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .map(str::to_string)
}

/// Lazy fragment sequence over a response body.
///
/// Ends after the sentinel or the end of input. A transport error is
/// yielded once and ends the sequence; whatever sat in the partial block
/// buffer is dropped.
pub struct Fragments {
    inner: Option<ByteStream>,
    decoder: ChunkDecoder,
    ready: VecDeque<Result<String, ChatError>>,
}

impl Fragments {
    pub fn new(body: ByteStream) -> Self {
        Self {
            inner: Some(body),
            decoder: ChunkDecoder::new(),
            ready: VecDeque::new(),
        }
    }

    fn absorb(&mut self, items: Vec<Result<Decoded, ChatError>>) {
        for item in items {
            match item {
                Ok(Decoded::Fragment(text)) => self.ready.push_back(Ok(text)),
                Ok(Decoded::Done) => {
                    tracing::debug!("stream sentinel received");
                    self.inner = None;
                    return;
                }
                Err(e) => {
                    self.ready.push_back(Err(e));
                    self.inner = None;
                    return;
                }
            }
        }
    }
}

impl Stream for Fragments {
    type Item = Result<String, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(item) = this.ready.pop_front() {
                return Poll::Ready(Some(item));
            }
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(bytes))) => {
                    let items = this.decoder.push(&bytes);
                    this.absorb(items);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.inner = None;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    let items = this.decoder.finish();
                    this.absorb(items);
                }
            }
        }
    }
}
