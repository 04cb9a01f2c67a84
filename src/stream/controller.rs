use super::decoder::Fragments;
use crate::backend::ChatBackend;
use crate::error::ChatError;
use crate::model::{ChatId, Message, NewMessage};
use crate::session::{ActiveStream, SessionContext};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Streaming,
    Blocking,
}

pub enum StreamStart {
    Streaming(StreamHandle),
    Completed(Message),
}

#[derive(Debug)]
pub enum StreamEvent {
    Fragment(String),
    Finished(StreamOutcome),
}

/// How a stream ended. Every variant carries the text accumulated so far.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed(String),
    Cancelled(String),
    Failed { partial: String, error: ChatError },
}

/// Text gathered for the assistant turn currently in flight.
#[derive(Debug, Default)]
pub struct StreamingDraft {
    text: String,
    fragments: usize,
}

impl StreamingDraft {
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

/// Receiving end of one in-flight response.
///
/// Yields fragments in arrival order, then exactly one `Finished`.
/// Dropping the handle aborts the connection.
pub struct StreamHandle {
    chat_id: ChatId,
    events: mpsc::Receiver<StreamEvent>,
    cancel: Option<oneshot::Sender<()>>,
    finished: bool,
}

impl StreamHandle {
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }

    /// Abort the connection. Fragments already accumulated come back in the
    /// `Cancelled` outcome.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            tracing::debug!(chat_id = %self.chat_id, "cancelling stream");
            let _ = tx.send(());
        }
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.events.recv().await? {
                // Nothing but the terminal outcome is delivered after cancel.
                StreamEvent::Fragment(_) if self.is_cancelled() => continue,
                StreamEvent::Finished(outcome) => {
                    self.finished = true;
                    return Some(StreamEvent::Finished(outcome));
                }
                event => return Some(event),
            }
        }
    }
}

/// Opens responses against the chat server, one per chat at a time.
#[derive(Clone)]
pub struct StreamController {
    backend: Arc<dyn ChatBackend>,
}

impl StreamController {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Submit `message` to `chat_id`.
    ///
    /// Fails fast with `StreamAlreadyActive` while another response for the
    /// same chat is in flight in `session`.
    pub async fn start(
        &self,
        session: &SessionContext,
        chat_id: ChatId,
        message: NewMessage,
        mode: StreamMode,
    ) -> Result<StreamStart, ChatError> {
        let guard = session.claim(chat_id)?;

        if mode == StreamMode::Blocking {
            let reply = self.backend.send_message(chat_id, message).await?;
            drop(guard);
            return Ok(StreamStart::Completed(reply));
        }

        let body = self.backend.open_stream(chat_id, message).await?;
        let (tx, rx) = mpsc::channel::<StreamEvent>(64);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        tokio::spawn(pump(chat_id, Fragments::new(body), tx, cancel_rx, guard));

        Ok(StreamStart::Streaming(StreamHandle {
            chat_id,
            events: rx,
            cancel: Some(cancel_tx),
            finished: false,
        }))
    }

    pub fn cancel(&self, handle: &mut StreamHandle) {
        handle.cancel();
    }
}

async fn pump(
    chat_id: ChatId,
    mut fragments: Fragments,
    tx: mpsc::Sender<StreamEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
    guard: ActiveStream,
) {
    let mut draft = StreamingDraft::default();

    let outcome = loop {
        tokio::select! {
            biased;

            // A dropped handle also lands here.
            _ = &mut cancel_rx => break StreamOutcome::Cancelled(draft.take()),

            item = fragments.next() => match item {
                Some(Ok(text)) => {
                    draft.push(&text);
                    if tx.send(StreamEvent::Fragment(text)).await.is_err() {
                        tracing::debug!(%chat_id, "stream receiver went away");
                        break StreamOutcome::Cancelled(draft.take());
                    }
                }
                Some(Err(error)) => {
                    tracing::warn!(%chat_id, error = %error, "stream failed");
                    break StreamOutcome::Failed { partial: draft.take(), error };
                }
                None => break StreamOutcome::Completed(draft.take()),
            },
        }
    };

    tracing::info!(
        %chat_id,
        fragments = draft.fragments(),
        outcome = outcome_name(&outcome),
        "stream finished"
    );

    // Close the connection and free the chat before reporting the outcome,
    // so the receiver can start the next turn right away.
    drop(fragments);
    drop(guard);
    let _ = tx.send(StreamEvent::Finished(outcome)).await;
}

fn outcome_name(outcome: &StreamOutcome) -> &'static str {
    match outcome {
        StreamOutcome::Completed(_) => "completed",
        StreamOutcome::Cancelled(_) => "cancelled",
        StreamOutcome::Failed { .. } => "failed",
    }
}
