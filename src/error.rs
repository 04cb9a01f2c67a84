use crate::model::ChatId;
use serde_json::Value;
use std::fmt;

/// Errors surfaced by the streaming core and the backend client.
///
/// `Transport` and `ModelApi` are meant for the user (with a retry action);
/// the soft cases (persistence lag, sanitizer failures) never reach this
/// type and are only logged.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("could not decode response stream: {0}")]
    Decode(String),

    #[error("{0}")]
    ModelApi(ApiError),

    #[error("a response is already streaming for chat {0}")]
    StreamAlreadyActive(ChatId),

    #[error("chat {0} is not open")]
    UnknownChat(ChatId),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Transport-class failures may be retried; a model API error needs the
    /// user to fix the model or endpoint first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transport { .. } | ChatError::Decode(_))
    }

    /// Map a non-2xx response body to the matching error kind.
    pub fn from_status(status: u16, body: &str) -> Self {
        if let Some(api) = ApiError::from_body(status, body) {
            return ChatError::ModelApi(api);
        }
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| excerpt(body, 500));
        ChatError::transport(format!("HTTP {status}: {detail}"))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            format!("request timed out: {e}")
        } else if e.is_connect() {
            format!("connection failed: {e}")
        } else {
            e.to_string()
        };
        ChatError::Transport {
            message,
            source: Some(e),
        }
    }
}

/// A structured error reported by the server or the upstream model.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    /// Recognize `{"error": true, "code", "message", "request_id"?}` and the
    /// OpenAI-style `{"error": {"type"|"code", "message"}}` shapes.
    pub fn from_body(status: u16, body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let mut err = Self::from_value(&value)?;
        err.status = Some(status);
        Some(err)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let (code, message) = match obj.get("error")? {
            Value::Bool(true) => (
                obj.get("code").and_then(Value::as_str),
                obj.get("message").and_then(Value::as_str),
            ),
            Value::Object(inner) => (
                inner
                    .get("code")
                    .or_else(|| inner.get("type"))
                    .and_then(Value::as_str),
                inner.get("message").and_then(Value::as_str),
            ),
            Value::String(message) => (None, Some(message.as_str())),
            _ => return None,
        };

        let request_id = obj
            .get("request_id")
            .or_else(|| obj.get("details").and_then(|d| d.get("request_id")))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Some(Self {
            status: None,
            code: code.unwrap_or("MODEL_API_ERROR").to_string(),
            message: message.unwrap_or("model API reported an error").to_string(),
            request_id,
        })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model API error [{}]: {}", self.code, self.message)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {status})")?;
        }
        if let Some(id) = &self.request_id {
            write!(f, " (request id {id})")?;
        }
        Ok(())
    }
}

fn excerpt(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
