//! In-memory backend for tests: streams are fed by hand through channels and
//! reconciliation reads come from a queue of snapshots.

use super::{ByteStream, ChatBackend};
use crate::error::ChatError;
use crate::model::{ChatId, Message, NewMessage, Role};
use bytes::Bytes;
use chrono::Utc;
use futures_core::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Chunk = Result<Bytes, ChatError>;

#[derive(Default)]
pub struct ScriptedBackend {
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Chunk>>>,
    open_failure: Mutex<Option<ChatError>>,
    reply: Mutex<Option<String>>,
    snapshots: Mutex<VecDeque<Vec<Message>>>,
    opened: AtomicUsize,
    listed: AtomicUsize,
}

/// Sending half of a scripted response body.
pub struct Feed {
    tx: mpsc::UnboundedSender<Chunk>,
}

impl Feed {
    pub fn send(&self, chunk: &str) {
        let _ = self.tx.send(Ok(Bytes::copy_from_slice(chunk.as_bytes())));
    }

    pub fn fail(&self, error: ChatError) {
        let _ = self.tx.send(Err(error));
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a body that delivers `chunks` and then ends.
    pub fn script_stream(&self, chunks: &[&str]) {
        let feed = self.feed_stream();
        for chunk in chunks {
            feed.send(chunk);
        }
    }

    /// Queue a body that stays open until the returned feed is dropped.
    pub fn feed_stream(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().push_back(rx);
        Feed { tx }
    }

    pub fn fail_next_open(&self, error: ChatError) {
        *self.open_failure.lock() = Some(error);
    }

    pub fn set_reply(&self, content: &str) {
        *self.reply.lock() = Some(content.to_string());
    }

    /// Queue what the next `list_messages` returns. The last snapshot keeps
    /// being served once the queue runs dry.
    pub fn push_snapshot(&self, messages: Vec<Message>) {
        self.snapshots.lock().push_back(messages);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn listed(&self) -> usize {
        self.listed.load(Ordering::SeqCst)
    }
}

pub fn message(id: i64, chat_id: ChatId, role: Role, content: &str) -> Message {
    Message {
        id,
        chat_id,
        role,
        content: content.to_string(),
        created_at: Utc::now(),
    }
}

impl ChatBackend for ScriptedBackend {
    fn open_stream(
        &self,
        _chat_id: ChatId,
        _message: NewMessage,
    ) -> BoxFuture<'_, Result<ByteStream, ChatError>> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.open_failure.lock().take() {
                return Err(err);
            }
            let rx = self
                .streams
                .lock()
                .pop_front()
                .ok_or_else(|| ChatError::transport("no scripted stream queued"))?;
            Ok(Box::pin(UnboundedReceiverStream::new(rx)) as ByteStream)
        })
    }

    fn send_message(
        &self,
        chat_id: ChatId,
        _message: NewMessage,
    ) -> BoxFuture<'_, Result<Message, ChatError>> {
        Box::pin(async move {
            let content = self
                .reply
                .lock()
                .clone()
                .ok_or_else(|| ChatError::transport("no scripted reply"))?;
            Ok(message(1000, chat_id, Role::Assistant, &content))
        })
    }

    fn list_messages(&self, _chat_id: ChatId) -> BoxFuture<'_, Result<Vec<Message>, ChatError>> {
        Box::pin(async move {
            self.listed.fetch_add(1, Ordering::SeqCst);
            let mut snapshots = self.snapshots.lock();
            let snapshot = if snapshots.len() > 1 {
                snapshots.pop_front()
            } else {
                snapshots.front().cloned()
            };
            Ok(snapshot.unwrap_or_default())
        })
    }
}
