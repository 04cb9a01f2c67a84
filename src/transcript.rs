//! The transcript a UI renders for each open chat.
//!
//! Three sources feed a view: messages the server has persisted, the user's
//! own turn inserted optimistically on submit, and the assistant draft as it
//! streams in. Once a turn ends the view is refetched from the server and
//! replaced wholesale, but only when the server's copy has caught up with
//! what is already on screen.

use crate::backend::ChatBackend;
use crate::config::ReconcileConfig;
use crate::error::ChatError;
use crate::model::{Chat, ChatId, Message, MessageId, NewMessage, Profile, Role};
use crate::sanitize::sanitize;
use crate::session::SessionContext;
use crate::stream::{StreamController, StreamEvent, StreamHandle, StreamMode, StreamOutcome, StreamStart};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    Persisted(MessageId),
    /// Client-side placeholder; never matches a server id.
    Local(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Came from the server.
    Persisted,
    /// The user's turn, shown before the server has acknowledged it.
    Optimistic,
    /// Assistant text still streaming in.
    Provisional,
    /// Finished assistant text the server has not reflected yet.
    Committed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    pub role: Role,
    pub content: String,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    fn local(role: Role, content: String, state: EntryState) -> Self {
        Self {
            id: EntryId::Local(Uuid::new_v4()),
            role,
            content,
            state,
            created_at: Utc::now(),
        }
    }

    fn is_local(&self) -> bool {
        self.state != EntryState::Persisted
    }
}

impl From<Message> for Entry {
    fn from(m: Message) -> Self {
        Self {
            id: EntryId::Persisted(m.id),
            role: m.role,
            content: m.content,
            state: EntryState::Persisted,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Replaced,
    Kept,
}

/// What changed in a view after one stream event.
#[derive(Debug)]
pub enum TranscriptUpdate {
    Fragment(String),
    Completed { content: String },
    Cancelled { content: String },
    Failed(ChatError),
}

#[derive(Debug)]
pub enum Submitted {
    /// Follow up with `next_update` until a terminal update arrives.
    Streaming,
    Completed(Message),
}

#[derive(Debug, Clone)]
pub struct TranscriptView {
    streams: bool,
    entries: Vec<Entry>,
}

impl TranscriptView {
    pub fn new(streams: bool, messages: Vec<Message>) -> Self {
        Self {
            streams,
            entries: messages.into_iter().map(Entry::from).collect(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn provisional(&self) -> Option<&Entry> {
        self.entries.iter().find(|e| e.state == EntryState::Provisional)
    }

    fn push_optimistic(&mut self, text: &str) {
        self.entries
            .push(Entry::local(Role::User, text.to_string(), EntryState::Optimistic));
    }

    fn extend_provisional(&mut self, fragment: &str) {
        match self.entries.iter_mut().find(|e| e.state == EntryState::Provisional) {
            Some(entry) => entry.content.push_str(fragment),
            None => self.entries.push(Entry::local(
                Role::Assistant,
                fragment.to_string(),
                EntryState::Provisional,
            )),
        }
    }

    /// Turn the draft into a committed entry. Empty text leaves no entry.
    fn commit_draft(&mut self, content: &str) {
        self.drop_provisional();
        if !content.is_empty() {
            self.entries.push(Entry::local(
                Role::Assistant,
                content.to_string(),
                EntryState::Committed,
            ));
        }
    }

    fn drop_provisional(&mut self) {
        self.entries.retain(|e| e.state != EntryState::Provisional);
    }

    /// Adopt `persisted` if it already represents everything shown locally.
    ///
    /// Local entries carry client ids, so the match is by position and role:
    /// from the first local entry onward the persisted list must line up
    /// role for role, and committed assistant text must have landed as
    /// non-empty content (the server writes the assistant row empty first
    /// and fills it in later).
    pub fn reconcile(&mut self, persisted: Vec<Message>) -> Reconciled {
        if !self.is_caught_up(&persisted) {
            return Reconciled::Kept;
        }
        self.entries = persisted.into_iter().map(Entry::from).collect();
        Reconciled::Replaced
    }

    fn is_caught_up(&self, persisted: &[Message]) -> bool {
        if self.provisional().is_some() || persisted.len() < self.entries.len() {
            return false;
        }
        let first_local = self
            .entries
            .iter()
            .position(Entry::is_local)
            .unwrap_or(self.entries.len());

        self.entries[first_local..]
            .iter()
            .zip(&persisted[first_local..])
            .all(|(local, remote)| {
                local.role == remote.role
                    && !(local.state == EntryState::Committed
                        && !local.content.is_empty()
                        && remote.content.is_empty())
            })
    }
}

type Views = Arc<Mutex<HashMap<ChatId, TranscriptView>>>;

/// Owns the session and one view per open chat, and drives submissions
/// through the stream controller.
pub struct TranscriptAssembler {
    controller: StreamController,
    backend: Arc<dyn ChatBackend>,
    session: SessionContext,
    views: Views,
    in_flight: HashMap<ChatId, StreamHandle>,
    reconciling: HashMap<ChatId, JoinHandle<Reconciled>>,
    reconcile: ReconcileConfig,
}

impl TranscriptAssembler {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        session: SessionContext,
        reconcile: ReconcileConfig,
    ) -> Self {
        Self {
            controller: StreamController::new(Arc::clone(&backend)),
            backend,
            session,
            views: Arc::default(),
            in_flight: HashMap::new(),
            reconciling: HashMap::new(),
            reconcile,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionContext {
        &mut self.session
    }

    /// Start showing `chat`. A chat whose profile is gone stays readable and
    /// is answered without streaming.
    pub fn open_chat(&mut self, chat: Chat, profile: Option<&Profile>) {
        let streams = profile.is_some_and(Profile::supports_streaming);
        if profile.is_none() {
            tracing::debug!(chat_id = %chat.id, profile_id = chat.profile_id, "chat has no profile");
        }
        let view = TranscriptView::new(streams, chat.messages);
        self.views.lock().insert(chat.id, view);
    }

    pub fn entries(&self, chat_id: ChatId) -> Vec<Entry> {
        self.views
            .lock()
            .get(&chat_id)
            .map(|v| v.entries.clone())
            .unwrap_or_default()
    }

    pub fn is_streaming(&self, chat_id: ChatId) -> bool {
        self.in_flight.contains_key(&chat_id)
    }

    /// Send the user's `text` to `chat_id`.
    ///
    /// The user's turn is visible in `entries` before any network round
    /// trip. A chat that already has a response in flight, or whose last
    /// outcome has not been read through `next_update` yet, is rejected
    /// without touching its view.
    pub async fn submit(&mut self, chat_id: ChatId, text: &str) -> Result<Submitted, ChatError> {
        if self.session.is_active(chat_id) || self.in_flight.contains_key(&chat_id) {
            return Err(ChatError::StreamAlreadyActive(chat_id));
        }

        let mode = {
            let mut views = self.views.lock();
            let view = views.get_mut(&chat_id).ok_or(ChatError::UnknownChat(chat_id))?;
            view.push_optimistic(text);
            if self.session.streaming() && view.streams {
                StreamMode::Streaming
            } else {
                StreamMode::Blocking
            }
        };
        tracing::debug!(%chat_id, ?mode, "submitting message");

        let started = self
            .controller
            .start(&self.session, chat_id, NewMessage::user(text), mode)
            .await;

        match started {
            Ok(StreamStart::Streaming(handle)) => {
                self.in_flight.insert(chat_id, handle);
                Ok(Submitted::Streaming)
            }
            Ok(StreamStart::Completed(message)) => {
                if let Some(view) = self.views.lock().get_mut(&chat_id) {
                    view.entries.push(Entry::from(message.clone()));
                }
                self.schedule_reconcile(chat_id, Duration::ZERO);
                Ok(Submitted::Completed(message))
            }
            Err(error) => {
                // The server may still have stored the user's turn.
                self.schedule_reconcile(chat_id, self.reconcile.grace());
                Err(error)
            }
        }
    }

    /// Wait for the next event of the response in flight for `chat_id` and
    /// apply it to the view. Returns `None` when nothing is in flight.
    pub async fn next_update(&mut self, chat_id: ChatId) -> Option<TranscriptUpdate> {
        let event = self.in_flight.get_mut(&chat_id)?.next_event().await;

        match event {
            Some(StreamEvent::Fragment(text)) => {
                if let Some(view) = self.views.lock().get_mut(&chat_id) {
                    view.extend_provisional(&text);
                }
                Some(TranscriptUpdate::Fragment(text))
            }
            Some(StreamEvent::Finished(outcome)) => {
                self.in_flight.remove(&chat_id);
                Some(self.finish(chat_id, outcome))
            }
            None => {
                self.in_flight.remove(&chat_id);
                None
            }
        }
    }

    /// Abort the response in flight for `chat_id`, keeping whatever text
    /// had already arrived.
    pub async fn cancel(&mut self, chat_id: ChatId) -> Option<TranscriptUpdate> {
        let handle = self.in_flight.get_mut(&chat_id)?;
        self.controller.cancel(handle);

        while let Some(update) = self.next_update(chat_id).await {
            if !matches!(update, TranscriptUpdate::Fragment(_)) {
                return Some(update);
            }
        }
        None
    }

    /// Refetch once, right now.
    pub async fn refresh(&mut self, chat_id: ChatId) -> Result<Reconciled, ChatError> {
        let persisted = self.backend.list_messages(chat_id).await?;
        let mut views = self.views.lock();
        let view = views.get_mut(&chat_id).ok_or(ChatError::UnknownChat(chat_id))?;
        Ok(view.reconcile(persisted))
    }

    /// Wait for the pending background refetch of `chat_id`, if any.
    pub async fn settle(&mut self, chat_id: ChatId) -> Reconciled {
        let Some(task) = self.reconciling.remove(&chat_id) else {
            return Reconciled::Kept;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::debug!(%chat_id, error = %error, "reconcile task ended early");
                Reconciled::Kept
            }
        }
    }

    fn finish(&mut self, chat_id: ChatId, outcome: StreamOutcome) -> TranscriptUpdate {
        let update = {
            let mut views = self.views.lock();
            let view = views.get_mut(&chat_id);
            match outcome {
                StreamOutcome::Completed(text) => {
                    let content = sanitize(&text);
                    if let Some(view) = view {
                        view.commit_draft(&content);
                    }
                    TranscriptUpdate::Completed { content }
                }
                StreamOutcome::Cancelled(text) => {
                    let content = sanitize(&text);
                    if let Some(view) = view {
                        view.commit_draft(&content);
                    }
                    TranscriptUpdate::Cancelled { content }
                }
                StreamOutcome::Failed { partial, error } => {
                    tracing::debug!(%chat_id, discarded = partial.len(), "dropping failed draft");
                    if let Some(view) = view {
                        view.drop_provisional();
                    }
                    TranscriptUpdate::Failed(error)
                }
            }
        };

        self.schedule_reconcile(chat_id, self.reconcile.grace());
        update
    }

    fn schedule_reconcile(&mut self, chat_id: ChatId, delay: Duration) {
        let task = tokio::spawn(reconcile_loop(
            Arc::clone(&self.backend),
            Arc::clone(&self.views),
            chat_id,
            self.reconcile,
            delay,
        ));
        if let Some(previous) = self.reconciling.insert(chat_id, task) {
            previous.abort();
        }
    }
}

/// Poll the server's copy of a chat a bounded number of times, adopting it
/// as soon as it has caught up.
async fn reconcile_loop(
    backend: Arc<dyn ChatBackend>,
    views: Views,
    chat_id: ChatId,
    cfg: ReconcileConfig,
    delay: Duration,
) -> Reconciled {
    tokio::time::sleep(delay).await;

    let attempts = cfg.max_attempts.max(1);
    for attempt in 1..=attempts {
        match backend.list_messages(chat_id).await {
            Ok(persisted) => {
                let outcome = match views.lock().get_mut(&chat_id) {
                    Some(view) => view.reconcile(persisted),
                    None => return Reconciled::Kept,
                };
                if outcome == Reconciled::Replaced {
                    tracing::debug!(%chat_id, attempt, "transcript reconciled");
                    return outcome;
                }
            }
            Err(error) => {
                tracing::warn!(%chat_id, attempt, error = %error, "refetch failed");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(cfg.interval()).await;
        }
    }

    tracing::info!(%chat_id, attempts, "server copy still behind; keeping local transcript");
    Reconciled::Kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::{message, ScriptedBackend};
    use crate::model::ProviderKind;
    use pretty_assertions::assert_eq;

    const CHAT: ChatId = ChatId(7);

    fn profile(provider: ProviderKind) -> Profile {
        Profile {
            id: 1,
            name: "local".into(),
            provider,
            url: "http://localhost:11434".into(),
            model_name: "llama3".into(),
            token_size: 2048,
            created_at: Utc::now(),
        }
    }

    fn history() -> Vec<Message> {
        vec![
            message(1, CHAT, Role::User, "earlier question"),
            message(2, CHAT, Role::Assistant, "earlier answer"),
        ]
    }

    fn chat(messages: Vec<Message>) -> Chat {
        Chat {
            id: CHAT,
            title: "test".into(),
            profile_id: 1,
            created_at: Utc::now(),
            messages,
        }
    }

    fn assembler(backend: &Arc<ScriptedBackend>, provider: Option<ProviderKind>) -> TranscriptAssembler {
        let cfg = ReconcileConfig {
            grace_ms: 500,
            interval_ms: 500,
            max_attempts: 3,
        };
        let mut asm = TranscriptAssembler::new(
            Arc::clone(backend) as Arc<dyn ChatBackend>,
            SessionContext::default(),
            cfg,
        );
        let profile = provider.map(profile);
        asm.open_chat(chat(history()), profile.as_ref());
        asm
    }

    fn shape(entries: &[Entry]) -> Vec<(Role, &str, EntryState)> {
        entries
            .iter()
            .map(|e| (e.role, e.content.as_str(), e.state))
            .collect()
    }

    fn sse(fragment: &str) -> String {
        format!("data: {}\n\n", serde_json::Value::String(fragment.into()))
    }

    #[tokio::test(start_paused = true)]
    async fn user_turn_shows_before_any_reply() {
        let backend = Arc::new(ScriptedBackend::new());
        let _feed = backend.feed_stream();
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));

        assert!(matches!(asm.submit(CHAT, "hi").await, Ok(Submitted::Streaming)));

        let entries = asm.entries(CHAT);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].role, Role::User);
        assert_eq!(entries[2].content, "hi");
        assert_eq!(entries[2].state, EntryState::Optimistic);
        assert!(matches!(entries[2].id, EntryId::Local(_)));
        assert!(asm.is_streaming(CHAT));
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_grow_a_single_provisional_entry() {
        let backend = Arc::new(ScriptedBackend::new());
        let feed = backend.feed_stream();
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.submit(CHAT, "hi").await.unwrap();

        for part in ["Hel", "lo"] {
            feed.send(&sse(part));
            assert!(matches!(asm.next_update(CHAT).await, Some(TranscriptUpdate::Fragment(_))));
        }

        let second = asm.submit(CHAT, "again").await;
        assert!(matches!(second, Err(ChatError::StreamAlreadyActive(CHAT))));
        assert_eq!(backend.opened(), 1);

        let entries = asm.entries(CHAT);
        assert_eq!(
            shape(&entries[2..]),
            vec![
                (Role::User, "hi", EntryState::Optimistic),
                (Role::Assistant, "Hello", EntryState::Provisional),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_salvages_the_partial_answer() {
        let backend = Arc::new(ScriptedBackend::new());
        let feed = backend.feed_stream();
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.submit(CHAT, "greet").await.unwrap();

        for part in ["Hel", "lo wor", "ld"] {
            feed.send(&sse(part));
            asm.next_update(CHAT).await.unwrap();
        }

        match asm.cancel(CHAT).await {
            Some(TranscriptUpdate::Cancelled { content }) => assert_eq!(content, "Hello world"),
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(!asm.is_streaming(CHAT));
        assert!(!asm.session().is_active(CHAT));

        let entries = asm.entries(CHAT);
        assert_eq!(
            shape(&entries[2..]),
            vec![
                (Role::User, "greet", EntryState::Optimistic),
                (Role::Assistant, "Hello world", EntryState::Committed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn submit_waits_until_the_previous_outcome_is_read() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_stream(&[&sse("first"), "data: [DONE]\n\n"]);
        backend.script_stream(&[&sse("second"), "data: [DONE]\n\n"]);
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.submit(CHAT, "q1").await.unwrap();
        assert!(matches!(asm.next_update(CHAT).await, Some(TranscriptUpdate::Fragment(_))));

        // Let the pump reach the sentinel and free the chat.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(!asm.session().is_active(CHAT));

        let early = asm.submit(CHAT, "q2").await;
        assert!(matches!(early, Err(ChatError::StreamAlreadyActive(CHAT))));
        assert_eq!(backend.opened(), 1);
        assert_eq!(
            shape(&asm.entries(CHAT)[2..]),
            vec![
                (Role::User, "q1", EntryState::Optimistic),
                (Role::Assistant, "first", EntryState::Provisional),
            ]
        );

        match asm.next_update(CHAT).await {
            Some(TranscriptUpdate::Completed { content }) => assert_eq!(content, "first"),
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(matches!(asm.submit(CHAT, "q2").await, Ok(Submitted::Streaming)));
        while asm.next_update(CHAT).await.is_some() {}

        assert_eq!(
            shape(&asm.entries(CHAT)[2..]),
            vec![
                (Role::User, "q1", EntryState::Optimistic),
                (Role::Assistant, "first", EntryState::Committed),
                (Role::User, "q2", EntryState::Optimistic),
                (Role::Assistant, "second", EntryState::Committed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_with_empty_draft_commits_nothing() {
        let backend = Arc::new(ScriptedBackend::new());
        let _feed = backend.feed_stream();
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.submit(CHAT, "never mind").await.unwrap();

        match asm.cancel(CHAT).await {
            Some(TranscriptUpdate::Cancelled { content }) => assert_eq!(content, ""),
            other => panic!("unexpected update: {other:?}"),
        }
        assert_eq!(
            shape(&asm.entries(CHAT)[2..]),
            vec![(Role::User, "never mind", EntryState::Optimistic)]
        );

        // Server never catches up: polling stops after max_attempts.
        assert_eq!(asm.settle(CHAT).await, Reconciled::Kept);
        assert_eq!(backend.listed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_commits_sanitized_text() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_stream(&[&sse("```python\n"), &sse("print(1)"), "data: [DONE]\n\n"]);
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.submit(CHAT, "code please").await.unwrap();

        let mut last = None;
        while let Some(update) = asm.next_update(CHAT).await {
            last = Some(update);
        }
        match last {
            Some(TranscriptUpdate::Completed { content }) => {
                assert_eq!(content, "```python\nprint(1)\n```");
            }
            other => panic!("unexpected update: {other:?}"),
        }
        let entries = asm.entries(CHAT);
        assert_eq!(entries.last().map(|e| e.state), Some(EntryState::Committed));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_refetch_does_not_clobber_local_view() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_stream(&[&sse("fresh answer")]);
        backend.push_snapshot(history());
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.submit(CHAT, "question").await.unwrap();
        while asm.next_update(CHAT).await.is_some() {}

        assert_eq!(asm.settle(CHAT).await, Reconciled::Kept);
        assert_eq!(backend.listed(), 3);

        let entries = asm.entries(CHAT);
        assert_eq!(
            shape(&entries[2..]),
            vec![
                (Role::User, "question", EntryState::Optimistic),
                (Role::Assistant, "fresh answer", EntryState::Committed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn view_is_replaced_once_the_server_catches_up() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_stream(&[&sse("fresh answer")]);

        let mut placeholder = history();
        placeholder.push(message(3, CHAT, Role::User, "question"));
        placeholder.push(message(4, CHAT, Role::Assistant, ""));
        let mut filled = placeholder.clone();
        filled[3].content = "fresh answer".into();

        backend.push_snapshot(history());
        backend.push_snapshot(placeholder);
        backend.push_snapshot(filled);

        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.submit(CHAT, "question").await.unwrap();
        while asm.next_update(CHAT).await.is_some() {}

        assert_eq!(asm.settle(CHAT).await, Reconciled::Replaced);
        assert_eq!(backend.listed(), 3);

        let entries = asm.entries(CHAT);
        assert!(entries.iter().all(|e| e.state == EntryState::Persisted));
        assert_eq!(entries[3].id, EntryId::Persisted(4));
        assert_eq!(entries[3].content, "fresh answer");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_drops_the_draft_but_keeps_the_user_turn() {
        let backend = Arc::new(ScriptedBackend::new());
        let feed = backend.feed_stream();
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.submit(CHAT, "hi").await.unwrap();

        feed.send(&sse("half"));
        asm.next_update(CHAT).await.unwrap();
        feed.fail(ChatError::transport("connection reset"));

        match asm.next_update(CHAT).await {
            Some(TranscriptUpdate::Failed(error)) => assert!(error.is_retryable()),
            other => panic!("unexpected update: {other:?}"),
        }
        let entries = asm.entries(CHAT);
        assert_eq!(
            shape(&entries[2..]),
            vec![(Role::User, "hi", EntryState::Optimistic)]
        );
        // A refetch is still on its way.
        assert_eq!(asm.settle(CHAT).await, Reconciled::Kept);
        assert_eq!(backend.listed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_streaming_profile_gets_the_whole_reply() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_reply("complete reply");
        let mut asm = assembler(&backend, Some(ProviderKind::OpenAi));

        let submitted = asm.submit(CHAT, "q").await.unwrap();
        assert!(matches!(submitted, Submitted::Completed(ref m) if m.content == "complete reply"));
        assert_eq!(backend.opened(), 0);

        let entries = asm.entries(CHAT);
        assert_eq!(
            shape(&entries[2..]),
            vec![
                (Role::User, "q", EntryState::Optimistic),
                (Role::Assistant, "complete reply", EntryState::Persisted),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_preference_off_uses_blocking_mode() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_reply("done");
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        asm.session_mut().set_streaming(false);

        assert!(matches!(asm.submit(CHAT, "q").await, Ok(Submitted::Completed(_))));
        assert_eq!(backend.opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dangling_profile_chats_do_not_stream() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_reply("still works");
        let mut asm = assembler(&backend, None);

        assert!(matches!(asm.submit(CHAT, "q").await, Ok(Submitted::Completed(_))));
    }

    #[tokio::test]
    async fn unknown_chat_is_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));
        assert!(matches!(
            asm.submit(ChatId(99), "x").await,
            Err(ChatError::UnknownChat(ChatId(99)))
        ));
    }

    #[tokio::test]
    async fn refresh_reconciles_immediately() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut newer = history();
        newer.push(message(3, CHAT, Role::User, "from elsewhere"));
        backend.push_snapshot(newer);
        let mut asm = assembler(&backend, Some(ProviderKind::Ollama));

        assert_eq!(asm.refresh(CHAT).await.unwrap(), Reconciled::Replaced);
        assert_eq!(asm.entries(CHAT).len(), 3);
    }

    #[test]
    fn provisional_entry_blocks_replacement() {
        let mut view = TranscriptView::new(true, history());
        view.push_optimistic("hi");
        view.extend_provisional("par");

        let mut persisted = history();
        persisted.push(message(3, CHAT, Role::User, "hi"));
        persisted.push(message(4, CHAT, Role::Assistant, "partial"));
        assert_eq!(view.reconcile(persisted), Reconciled::Kept);
        assert_eq!(view.provisional().map(|e| e.content.as_str()), Some("par"));
    }

    #[test]
    fn role_mismatch_is_not_caught_up() {
        let mut view = TranscriptView::new(true, history());
        view.push_optimistic("hi");

        let mut persisted = history();
        persisted.push(message(3, CHAT, Role::Assistant, "unrelated"));
        assert_eq!(view.reconcile(persisted), Reconciled::Kept);

        let mut persisted = history();
        persisted.push(message(3, CHAT, Role::User, "hi"));
        assert_eq!(view.reconcile(persisted), Reconciled::Replaced);
        assert!(view.entries().iter().all(|e| !e.is_local()));
    }
}
