use super::{ByteStream, ChatBackend};
use crate::catalog;
use crate::error::ChatError;
use crate::model::{
    Chat, ChatDraft, ChatId, Message, ModelInfo, NewMessage, Profile, ProfileDraft, ProfileId,
};
use futures_core::future::BoxFuture;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_stream::StreamExt;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the chat server's REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    api_base: Url,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        http: reqwest::Client,
        server_url: &str,
        request_timeout: Duration,
    ) -> Result<Self, ChatError> {
        let mut api_base = Url::parse(server_url)
            .map_err(|e| ChatError::InvalidUrl(format!("{server_url}: {e}")))?;
        // Url::join drops the last segment unless the base ends with '/'.
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        Ok(Self {
            http,
            api_base,
            request_timeout,
        })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        self.api_base
            .join(path)
            .map_err(|e| ChatError::InvalidUrl(format!("{path}: {e}")))
    }

    fn messages_url(&self, chat_id: ChatId, stream: bool) -> Result<Url, ChatError> {
        let mut url = self.endpoint(&format!("chats/{chat_id}/messages/"))?;
        url.query_pairs_mut()
            .append_pair("stream", if stream { "true" } else { "false" });
        Ok(url)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(%status, "server returned an error response");
        Err(ChatError::from_status(status.as_u16(), &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ChatError> {
        let resp = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn send_json<B, T>(&self, method: Method, url: Url, body: &B) -> Result<T, ChatError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .http
            .request(method, url)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn delete(&self, url: Url) -> Result<(), ChatError> {
        let resp = self
            .http
            .delete(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>, ChatError> {
        self.get_json(self.endpoint("profiles/")?).await
    }

    pub async fn create_profile(&self, draft: &ProfileDraft) -> Result<Profile, ChatError> {
        self.send_json(Method::POST, self.endpoint("profiles/")?, draft)
            .await
    }

    pub async fn update_profile(
        &self,
        id: ProfileId,
        draft: &ProfileDraft,
    ) -> Result<Profile, ChatError> {
        self.send_json(Method::PUT, self.endpoint(&format!("profiles/{id}"))?, draft)
            .await
    }

    /// Chats referencing the profile are left in place.
    pub async fn delete_profile(&self, id: ProfileId) -> Result<(), ChatError> {
        self.delete(self.endpoint(&format!("profiles/{id}"))?).await
    }

    pub async fn list_chats(&self) -> Result<Vec<Chat>, ChatError> {
        self.get_json(self.endpoint("chats/")?).await
    }

    pub async fn get_chat(&self, id: ChatId) -> Result<Chat, ChatError> {
        self.get_json(self.endpoint(&format!("chats/{id}"))?).await
    }

    pub async fn create_chat(&self, draft: &ChatDraft) -> Result<Chat, ChatError> {
        self.send_json(Method::POST, self.endpoint("chats/")?, draft)
            .await
    }

    pub async fn delete_chat(&self, id: ChatId) -> Result<(), ChatError> {
        self.delete(self.endpoint(&format!("chats/{id}"))?).await
    }

    /// Models offered by an Ollama server. Never fails: any error falls back
    /// to the built-in catalog.
    pub async fn list_models(&self, base_url: Option<&str>) -> Vec<ModelInfo> {
        match self.fetch_models(base_url).await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(error = %e, "model discovery failed; using fallback catalog");
                catalog::fallback_models()
            }
        }
    }

    async fn fetch_models(&self, base_url: Option<&str>) -> Result<Vec<ModelInfo>, ChatError> {
        let mut url = self.endpoint("models/ollama")?;
        if let Some(base) = base_url {
            url.query_pairs_mut().append_pair("base_url", base);
        }
        let resp = self
            .http
            .get(url)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

impl ChatBackend for HttpBackend {
    fn open_stream(
        &self,
        chat_id: ChatId,
        message: NewMessage,
    ) -> BoxFuture<'_, Result<ByteStream, ChatError>> {
        Box::pin(async move {
            let url = self.messages_url(chat_id, true)?;
            tracing::info!(%chat_id, "opening response stream");

            // No overall timeout: the body stays open for as long as the model talks.
            let resp = self
                .http
                .post(url)
                .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
                .json(&message)
                .send()
                .await?;
            let resp = Self::check(resp).await?;

            let body = resp
                .bytes_stream()
                .map(|item| item.map_err(ChatError::from));
            Ok(Box::pin(body) as ByteStream)
        })
    }

    fn send_message(
        &self,
        chat_id: ChatId,
        message: NewMessage,
    ) -> BoxFuture<'_, Result<Message, ChatError>> {
        Box::pin(async move {
            let url = self.messages_url(chat_id, false)?;
            tracing::info!(%chat_id, "sending message without streaming");
            self.send_json(Method::POST, url, &message).await
        })
    }

    fn list_messages(&self, chat_id: ChatId) -> BoxFuture<'_, Result<Vec<Message>, ChatError>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("chats/{chat_id}/messages/"))?;
            self.get_json(url).await
        })
    }
}
