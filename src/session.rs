use crate::error::ChatError;
use crate::model::ChatId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Per-session state shared between the transcript and the stream controller.
///
/// Holds the registry of chats with a response in flight and the user's
/// streaming preference. The transcript owns it and lends it to the
/// controller on every `start`.
#[derive(Debug, Clone)]
pub struct SessionContext {
    active: Arc<Mutex<HashSet<ChatId>>>,
    streaming: bool,
}

impl SessionContext {
    pub fn new(streaming: bool) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
            streaming,
        }
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_streaming(&mut self, enabled: bool) {
        self.streaming = enabled;
    }

    pub fn is_active(&self, chat_id: ChatId) -> bool {
        self.active.lock().contains(&chat_id)
    }

    /// Reserve `chat_id` for one in-flight response.
    pub fn claim(&self, chat_id: ChatId) -> Result<ActiveStream, ChatError> {
        if !self.active.lock().insert(chat_id) {
            return Err(ChatError::StreamAlreadyActive(chat_id));
        }
        Ok(ActiveStream {
            chat_id,
            active: Arc::clone(&self.active),
        })
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Releases its chat from the registry when dropped.
#[derive(Debug)]
pub struct ActiveStream {
    chat_id: ChatId,
    active: Arc<Mutex<HashSet<ChatId>>>,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.active.lock().remove(&self.chat_id);
    }
}
