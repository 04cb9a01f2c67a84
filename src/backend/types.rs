use crate::error::ChatError;
use crate::model::{ChatId, Message, NewMessage};
use bytes::Bytes;
use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;

/// Raw response body of a streaming submission.
pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// What the streaming core needs from the chat server.
///
/// The persisted message list is authoritative; the core only reads it back
/// for reconciliation.
pub trait ChatBackend: Send + Sync {
    /// Submit a user message with streaming on and hand back the raw body.
    fn open_stream(
        &self,
        chat_id: ChatId,
        message: NewMessage,
    ) -> BoxFuture<'_, Result<ByteStream, ChatError>>;

    /// Submit a user message and wait for the finished assistant reply.
    fn send_message(
        &self,
        chat_id: ChatId,
        message: NewMessage,
    ) -> BoxFuture<'_, Result<Message, ChatError>>;

    fn list_messages(&self, chat_id: ChatId) -> BoxFuture<'_, Result<Vec<Message>, ChatError>>;
}
