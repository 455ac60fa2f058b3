//! Agent dashboard session
//!
//! One [`Dashboard`] per signed-in agent. It owns the conversation list,
//! seen-state, the current selection and the chat manager; the embedding
//! UI feeds it realtime events and user actions and renders what it exposes.
//! Outgoing realtime events are queued and drained with
//! [`Dashboard::take_outgoing`].

use helpdesk_shared::{
    AgentStatus, ClientEvent, Conversation, Message, MessageEvent, SenderKind, ServerEvent,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::HelpdeskApi;
use crate::chat::{ChatManager, PollResult, SuggestionPoll};
use crate::config::DashboardConfig;
use crate::error::DashboardResult;
use crate::queue::{self, build_queue, diff_queue, sort_queue, QueueItem, QueueView, SeenStore};
use crate::realtime::{MessageDeduper, RealtimeEvent, TypingDebouncer};

/// What needs redrawing after an event
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Changes {
    pub queue: bool,
    pub transcript: bool,
    pub typing: bool,
    /// Local state is stale; call [`Dashboard::reconcile`]
    pub reload: bool,
}

impl Changes {
    fn queue() -> Self {
        Self {
            queue: true,
            ..Self::default()
        }
    }

    fn reload() -> Self {
        Self {
            reload: true,
            ..Self::default()
        }
    }

    fn typing() -> Self {
        Self {
            typing: true,
            ..Self::default()
        }
    }
}

pub struct Dashboard<A: HelpdeskApi + ?Sized, S: SeenStore> {
    api: Arc<A>,
    config: DashboardConfig,
    seen: S,
    conversations: Vec<Conversation>,
    selected: Option<Uuid>,
    chat: ChatManager,
    deduper: MessageDeduper,
    typing: TypingDebouncer,
    customer_typing: HashSet<Uuid>,
    agent_typing: HashMap<Uuid, String>,
    presence: HashMap<Uuid, AgentStatus>,
    rendered: Vec<QueueItem>,
    outgoing: Vec<ClientEvent>,
    session: CancellationToken,
}

impl<A: HelpdeskApi + ?Sized, S: SeenStore> Dashboard<A, S> {
    pub fn new(api: Arc<A>, config: DashboardConfig, seen: S) -> Self {
        let session = CancellationToken::new();
        let chat = ChatManager::with_session(config.ai_mode.is_hitl(), session.clone());
        let typing = TypingDebouncer::new(config.typing_debounce);

        Self {
            api,
            config,
            seen,
            conversations: Vec::new(),
            selected: None,
            chat,
            deduper: MessageDeduper::new(),
            typing,
            customer_typing: HashSet::new(),
            agent_typing: HashMap::new(),
            presence: HashMap::new(),
            rendered: Vec::new(),
            outgoing: vec![ClientEvent::JoinAgentDashboard],
            session,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Open conversations in queue order
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, conversation_id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn chat(&self) -> &ChatManager {
        &self.chat
    }

    pub fn chat_mut(&mut self) -> &mut ChatManager {
        &mut self.chat
    }

    pub fn is_unseen(&self, conversation_id: Uuid) -> bool {
        self.conversation(conversation_id)
            .is_some_and(|c| queue::is_unseen(c, self.seen.last_seen(c.id)))
    }

    pub fn customer_typing(&self, conversation_id: Uuid) -> bool {
        self.customer_typing.contains(&conversation_id)
    }

    /// Name of another agent typing in this conversation
    pub fn agent_typing(&self, conversation_id: Uuid) -> Option<&str> {
        self.agent_typing.get(&conversation_id).map(String::as_str)
    }

    pub fn agent_status(&self, agent_id: Uuid) -> Option<AgentStatus> {
        self.presence.get(&agent_id).copied()
    }

    /// Cancelled when the dashboard shuts down
    pub fn session(&self) -> &CancellationToken {
        &self.session
    }

    /// Realtime events to send, oldest first
    pub fn take_outgoing(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn queue(&self) -> Vec<QueueItem> {
        build_queue(&self.conversations, self.config.agent_id, &self.seen, self.selected)
    }

    /// Push the current queue to `view`, as a diff when something is already rendered
    pub fn render(&mut self, view: &mut dyn QueueView) {
        let next = self.queue();
        if self.rendered.is_empty() {
            view.render_full(&next);
        } else {
            let ops = diff_queue(&self.rendered, &next);
            if !ops.is_empty() {
                view.apply_ops(&ops);
            }
        }
        self.rendered = next;
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Fetch the open conversations
    pub async fn load(&mut self) -> DashboardResult<()> {
        let mut conversations = self.api.list_conversations(false).await?;
        sort_queue(&mut conversations, self.config.agent_id);

        let keep: HashSet<Uuid> = conversations.iter().map(|c| c.id).collect();
        if let Err(e) = self.seen.retain(&keep) {
            tracing::warn!(error = %e, "Failed to prune seen state");
        }
        self.customer_typing.retain(|id| keep.contains(id));
        self.agent_typing.retain(|id, _| keep.contains(id));
        self.conversations = conversations;

        tracing::debug!(count = self.conversations.len(), "Loaded conversation queue");
        Ok(())
    }

    async fn load_transcript(&mut self, conversation_id: Uuid) -> DashboardResult<()> {
        let messages = self.api.list_messages(conversation_id).await?;
        for message in &messages {
            self.deduper.accept(&MessageEvent::from(message.clone()));
        }
        self.chat.set_messages(conversation_id, messages);
        Ok(())
    }

    /// Re-fetch everything after a reconnect or an event for an unknown conversation
    pub async fn reconcile(&mut self) -> DashboardResult<()> {
        self.load().await?;
        if let Some(id) = self.selected {
            self.load_transcript(id).await?;
        }
        Ok(())
    }

    // =========================================================================
    // User actions
    // =========================================================================

    fn mark_seen_locally(&mut self, conversation_id: Uuid, at: OffsetDateTime) {
        if let Err(e) = self.seen.mark_seen(conversation_id, at) {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to persist seen state");
        }
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            conversation.is_unseen = Some(false);
        }
    }

    fn stop_typing(&mut self) {
        if let (Some(false), Some(conversation_id)) = (self.typing.stop(), self.selected) {
            self.outgoing.push(ClientEvent::AgentTyping {
                conversation_id,
                is_typing: false,
            });
        }
    }

    /// Open a conversation. Returns the suggestion poll to run in HITL mode.
    pub async fn select(
        &mut self,
        conversation_id: Uuid,
    ) -> DashboardResult<Option<SuggestionPoll<A>>> {
        self.stop_typing();
        if let Some(previous) = self.selected.filter(|id| *id != conversation_id) {
            self.outgoing.push(ClientEvent::LeaveConversation {
                conversation_id: previous,
            });
        }
        self.chat.select(conversation_id);
        self.selected = Some(conversation_id);
        self.outgoing.push(ClientEvent::JoinConversation { conversation_id });

        // Never behind the latest message, whatever the local clock says
        let seen_at = self
            .conversation(conversation_id)
            .map_or(OffsetDateTime::now_utc(), |c| {
                c.activity_at().max(OffsetDateTime::now_utc())
            });
        self.mark_seen_locally(conversation_id, seen_at);
        if let Err(e) = self.api.mark_seen(conversation_id, seen_at).await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to sync seen state");
        }

        self.load_transcript(conversation_id).await?;
        Ok(self
            .chat
            .begin_poll(Arc::clone(&self.api), &self.config, Duration::ZERO))
    }

    pub fn apply_poll(&mut self, result: PollResult) -> bool {
        self.chat.apply_poll(result)
    }

    /// Update the draft and emit a typing-start signal for a new burst
    pub fn draft_changed(&mut self, text: impl Into<String>, now: Instant) {
        self.chat.edit_draft(text);
        let Some(conversation_id) = self.selected else {
            return;
        };
        if self.typing.keystroke(now) == Some(true) {
            self.outgoing.push(ClientEvent::AgentTyping {
                conversation_id,
                is_typing: true,
            });
        }
    }

    /// When [`Self::tick`] next needs to run
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    /// Emit typing-stop once the agent has paused
    pub fn tick(&mut self, now: Instant) {
        if let (Some(false), Some(conversation_id)) = (self.typing.tick(now), self.selected) {
            self.outgoing.push(ClientEvent::AgentTyping {
                conversation_id,
                is_typing: false,
            });
        }
    }

    /// Send the draft. Returns the follow-up suggestion poll in HITL mode.
    pub async fn send(&mut self) -> DashboardResult<Option<SuggestionPoll<A>>> {
        let outgoing = self.chat.begin_send()?;
        let conversation_id = outgoing.conversation_id;
        self.stop_typing();

        let message = match self.api.send_message(outgoing).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to send message");
                self.chat.send_failed(&e);
                return Err(e);
            }
        };

        self.deduper.accept(&MessageEvent::from(message.clone()));
        self.record_activity(&message.clone().into());
        self.mark_seen_locally(conversation_id, message.created_at);
        self.chat.send_succeeded(message);
        sort_queue(&mut self.conversations, self.config.agent_id);

        if let Err(e) = self.load_transcript(conversation_id).await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to reload transcript");
        }

        Ok(self
            .chat
            .begin_poll(Arc::clone(&self.api), &self.config, self.config.repoll_delay))
    }

    pub async fn assign(&mut self, conversation_id: Uuid) -> DashboardResult<()> {
        self.api.assign(conversation_id).await?;
        let (agent_id, agent_name) = (self.config.agent_id, self.config.agent_name.clone());
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            conversation.assigned_agent_id = Some(agent_id);
            conversation.assigned_agent_name = Some(agent_name);
        }
        sort_queue(&mut self.conversations, self.config.agent_id);
        Ok(())
    }

    pub async fn unassign(&mut self, conversation_id: Uuid) -> DashboardResult<()> {
        self.api.unassign(conversation_id).await?;
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            conversation.assigned_agent_id = None;
            conversation.assigned_agent_name = None;
        }
        sort_queue(&mut self.conversations, self.config.agent_id);
        Ok(())
    }

    /// Cancel polls and leave rooms
    pub fn shutdown(&mut self) {
        self.stop_typing();
        self.chat.cancel_poll();
        self.session.cancel();
    }

    // =========================================================================
    // Realtime
    // =========================================================================

    pub fn handle_realtime(&mut self, event: RealtimeEvent) -> Changes {
        match event {
            RealtimeEvent::Server(event) => self.handle_server_event(event),
            RealtimeEvent::Reconnected => {
                tracing::info!("Realtime reconnected, reconciling");
                Changes::reload()
            }
            RealtimeEvent::Disconnected => {
                tracing::warn!("Realtime disconnected");
                Changes::default()
            }
            RealtimeEvent::GaveUp => {
                tracing::error!("Realtime connection lost");
                Changes::default()
            }
        }
    }

    /// Update last-message fields. Returns false if the conversation is unknown.
    fn record_activity(&mut self, message: &MessageEvent) -> bool {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            return false;
        };
        conversation.last_message = Some(message.content.clone());
        conversation.last_message_at = Some(message.created_at);
        conversation.updated_at = conversation.updated_at.max(message.created_at);
        conversation.needs_response = message.metadata.pending_agent;
        // Fall back to comparing against the local seen time
        conversation.is_unseen = None;
        true
    }

    fn handle_message(&mut self, message: MessageEvent) -> Changes {
        if !self.deduper.accept(&message) {
            return Changes::default();
        }
        let conversation_id = message.conversation_id;
        if !self.record_activity(&message) {
            return Changes::reload();
        }

        let mut changes = Changes::queue();
        if message.sender_kind == SenderKind::Visitor && self.customer_typing.remove(&conversation_id) {
            changes.typing = true;
        }

        if self.selected == Some(conversation_id) {
            self.mark_seen_locally(conversation_id, message.created_at);
            match message.id {
                Some(id) => self.chat.push_message(Message {
                    id,
                    conversation_id,
                    sender_kind: message.sender_kind,
                    sender_id: message.sender_id,
                    content: message.content,
                    metadata: message.metadata,
                    created_at: message.created_at,
                }),
                None => changes.reload = true,
            }
            changes.transcript = true;
        }

        sort_queue(&mut self.conversations, self.config.agent_id);
        changes
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) -> Changes {
        match event {
            ServerEvent::NewMessage { message, .. } | ServerEvent::AgentMessage { message, .. } => {
                self.handle_message(message)
            }
            ServerEvent::ConversationUpdated {
                conversation_id,
                assigned_agent_id,
                archived,
            } => {
                let Some(index) = self.conversations.iter().position(|c| c.id == conversation_id)
                else {
                    return if archived { Changes::default() } else { Changes::reload() };
                };

                if archived {
                    self.conversations.remove(index);
                    self.customer_typing.remove(&conversation_id);
                    return Changes::queue();
                }

                let conversation = &mut self.conversations[index];
                if conversation.assigned_agent_id != assigned_agent_id {
                    conversation.assigned_agent_id = assigned_agent_id;
                    conversation.assigned_agent_name = (assigned_agent_id
                        == Some(self.config.agent_id))
                    .then(|| self.config.agent_name.clone());
                }
                sort_queue(&mut self.conversations, self.config.agent_id);
                Changes::queue()
            }
            ServerEvent::CustomerTypingStatus {
                conversation_id,
                is_typing,
            } => {
                let changed = if is_typing {
                    self.customer_typing.insert(conversation_id)
                } else {
                    self.customer_typing.remove(&conversation_id)
                };
                if changed {
                    Changes::typing()
                } else {
                    Changes::default()
                }
            }
            ServerEvent::AgentTypingStatus {
                conversation_id,
                agent_id,
                agent_name,
                is_typing,
            } => {
                if agent_id == self.config.agent_id {
                    return Changes::default();
                }
                if is_typing {
                    self.agent_typing.insert(conversation_id, agent_name);
                } else {
                    self.agent_typing.remove(&conversation_id);
                }
                Changes::typing()
            }
            ServerEvent::AgentStatusUpdate { agent_id, status } => {
                self.presence.insert(agent_id, status);
                Changes::default()
            }
            ServerEvent::Connected { session_id } => {
                tracing::debug!(session_id = %session_id, "Realtime session acknowledged");
                Changes::default()
            }
            ServerEvent::Pong => Changes::default(),
            ServerEvent::Error { message } => {
                tracing::warn!(message = %message, "Realtime error from server");
                Changes::default()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::OutgoingMessage;
    use crate::chat::ChatState;
    use crate::error::DashboardError;
    use crate::queue::{class, MemorySeenStore, QueueOp};
    use async_trait::async_trait;
    use helpdesk_shared::{AiMode, MessageMetadata, PendingSuggestion, SuggestionType};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use time::Duration as TimeDuration;

    #[derive(Default)]
    struct FakeApi {
        conversations: Mutex<Vec<Conversation>>,
        messages: Mutex<Vec<Message>>,
        seen: Mutex<Vec<Uuid>>,
        suggestion: Mutex<Option<String>>,
        fail_send: AtomicBool,
        fail_mark_seen: AtomicBool,
    }

    #[async_trait]
    impl HelpdeskApi for FakeApi {
        async fn list_conversations(&self, archived: bool) -> DashboardResult<Vec<Conversation>> {
            Ok(self
                .conversations
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.archived == archived)
                .cloned()
                .collect())
        }

        async fn list_messages(&self, conversation_id: Uuid) -> DashboardResult<Vec<Message>> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect())
        }

        async fn send_message(&self, outgoing: OutgoingMessage) -> DashboardResult<Message> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(DashboardError::Api {
                    status: 503,
                    message: "Service unavailable".into(),
                });
            }
            let message = Message {
                id: Uuid::new_v4(),
                conversation_id: outgoing.conversation_id,
                sender_kind: SenderKind::Agent,
                sender_id: None,
                content: outgoing.content,
                metadata: MessageMetadata::attributed(outgoing.response_attribution),
                created_at: OffsetDateTime::now_utc(),
            };
            self.messages.lock().unwrap().push(message.clone());
            Ok(message)
        }

        async fn get_suggestion(
            &self,
            conversation_id: Uuid,
        ) -> DashboardResult<Option<PendingSuggestion>> {
            Ok(self
                .suggestion
                .lock()
                .unwrap()
                .clone()
                .map(|content| PendingSuggestion {
                    conversation_id,
                    content,
                    generated_at: OffsetDateTime::now_utc(),
                }))
        }

        async fn mark_seen(&self, conversation_id: Uuid, _at: OffsetDateTime) -> DashboardResult<()> {
            if self.fail_mark_seen.load(Ordering::SeqCst) {
                return Err(DashboardError::Api {
                    status: 500,
                    message: "Internal server error".into(),
                });
            }
            self.seen.lock().unwrap().push(conversation_id);
            Ok(())
        }

        async fn assign(&self, _conversation_id: Uuid) -> DashboardResult<()> {
            Ok(())
        }

        async fn unassign(&self, _conversation_id: Uuid) -> DashboardResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingView {
        items: Vec<QueueItem>,
        full_renders: usize,
        batches: Vec<Vec<QueueOp>>,
    }

    impl QueueView for RecordingView {
        fn render_full(&mut self, items: &[QueueItem]) {
            self.items = items.to_vec();
            self.full_renders += 1;
        }

        fn apply_ops(&mut self, ops: &[QueueOp]) {
            queue::apply_ops(&mut self.items, ops);
            self.batches.push(ops.to_vec());
        }
    }

    fn conversation(visitor: &str, minutes_ago: i64, needs_response: bool) -> Conversation {
        let at = OffsetDateTime::now_utc() - TimeDuration::minutes(minutes_ago);
        Conversation {
            id: Uuid::new_v4(),
            visitor_id: visitor.to_string(),
            assigned_agent_id: None,
            assigned_agent_name: None,
            archived: false,
            last_message: Some(format!("hello from {visitor}")),
            last_message_at: Some(at),
            needs_response,
            is_unseen: None,
            category_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn visitor_message(conversation_id: Uuid, content: &str, offset: TimeDuration) -> MessageEvent {
        MessageEvent {
            id: Some(Uuid::new_v4()),
            conversation_id,
            sender_kind: SenderKind::Visitor,
            sender_id: None,
            content: content.to_string(),
            metadata: MessageMetadata::pending_agent(),
            created_at: OffsetDateTime::now_utc() + offset,
        }
    }

    fn setup(
        conversations: Vec<Conversation>,
        ai_mode: AiMode,
    ) -> (Arc<FakeApi>, Dashboard<FakeApi, MemorySeenStore>) {
        let api = Arc::new(FakeApi::default());
        *api.conversations.lock().unwrap() = conversations;
        let mut config = DashboardConfig::new("http://localhost:3000", Uuid::new_v4(), "Ada")
            .with_ai_mode(ai_mode);
        config.suggestion_poll_attempts = 2;
        config.suggestion_poll_interval = std::time::Duration::from_millis(5);
        config.repoll_delay = std::time::Duration::from_millis(5);
        let dashboard = Dashboard::new(Arc::clone(&api), config, MemorySeenStore::new());
        (api, dashboard)
    }

    #[tokio::test]
    async fn test_unseen_lifecycle() {
        let x = conversation("visitor-x", 30, false);
        let y = conversation("visitor-y", 20, false);
        let (x_id, y_id) = (x.id, y.id);
        let (api, mut dashboard) = setup(vec![x, y], AiMode::Off);

        dashboard.load().await.unwrap();
        assert!(dashboard.is_unseen(x_id));

        dashboard.select(x_id).await.unwrap();
        dashboard.assign(x_id).await.unwrap();
        assert!(!dashboard.is_unseen(x_id));

        dashboard.select(y_id).await.unwrap();

        let changes = dashboard.handle_server_event(ServerEvent::NewMessage {
            conversation_id: x_id,
            message: visitor_message(x_id, "are you there?", TimeDuration::seconds(5)),
        });
        assert!(changes.queue);
        assert!(!changes.transcript);
        assert!(dashboard.is_unseen(x_id));

        let top = &dashboard.queue()[0];
        assert_eq!(top.id, x_id);
        assert!(top.has_class(class::ASSIGNED_TO_ME));
        assert!(top.has_class(class::NEEDS_RESPONSE));
        assert!(top.has_class(class::UNSEEN));

        dashboard.select(x_id).await.unwrap();
        assert!(!dashboard.is_unseen(x_id));
        assert_eq!(dashboard.chat().conversation_id(), Some(x_id));
        assert_eq!(api.seen.lock().unwrap().as_slice(), &[x_id, y_id, x_id]);
    }

    #[tokio::test]
    async fn test_mark_seen_failure_is_local_only() {
        let x = conversation("visitor-x", 5, true);
        let x_id = x.id;
        let (api, mut dashboard) = setup(vec![x], AiMode::Off);
        api.fail_mark_seen.store(true, Ordering::SeqCst);

        dashboard.load().await.unwrap();
        dashboard.select(x_id).await.unwrap();
        assert!(!dashboard.is_unseen(x_id));
    }

    #[tokio::test]
    async fn test_message_in_open_conversation_stays_seen() {
        let x = conversation("visitor-x", 5, false);
        let x_id = x.id;
        let (_api, mut dashboard) = setup(vec![x], AiMode::Off);
        dashboard.load().await.unwrap();
        dashboard.select(x_id).await.unwrap();

        let message = visitor_message(x_id, "thanks!", TimeDuration::seconds(5));
        let changes = dashboard.handle_server_event(ServerEvent::NewMessage {
            conversation_id: x_id,
            message: message.clone(),
        });
        assert!(changes.transcript);
        assert!(!dashboard.is_unseen(x_id));
        assert_eq!(dashboard.chat().messages().len(), 1);

        // The same message via the conversation room is dropped
        let changes = dashboard.handle_server_event(ServerEvent::AgentMessage {
            conversation_id: x_id,
            message,
        });
        assert_eq!(changes, Changes::default());
        assert_eq!(dashboard.chat().messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_moves_conversation_up() {
        let older = conversation("visitor-old", 60, false);
        let newer = conversation("visitor-new", 1, false);
        let older_id = older.id;
        let (api, mut dashboard) = setup(vec![older, newer], AiMode::Off);
        dashboard.load().await.unwrap();
        assert_ne!(dashboard.queue()[0].id, older_id);

        dashboard.select(older_id).await.unwrap();
        dashboard.draft_changed("Let me check that for you", Instant::now());
        let poll = dashboard.send().await.unwrap();
        assert!(poll.is_none());

        assert_eq!(dashboard.queue()[0].id, older_id);
        assert_eq!(dashboard.chat().state(), ChatState::Sent);
        assert!(dashboard.chat().draft().is_empty());

        let stored = api.messages.lock().unwrap();
        let attribution = stored[0].metadata.response_attribution.as_ref().unwrap();
        assert_eq!(attribution.suggestion_type, SuggestionType::FromScratch);
        assert!(!attribution.suggestion_offered);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_draft() {
        let x = conversation("visitor-x", 5, true);
        let x_id = x.id;
        let (api, mut dashboard) = setup(vec![x], AiMode::Off);
        api.fail_send.store(true, Ordering::SeqCst);
        dashboard.load().await.unwrap();
        dashboard.select(x_id).await.unwrap();

        dashboard.draft_changed("One moment", Instant::now());
        let err = dashboard.send().await.err().unwrap();
        assert!(err.is_transient());
        assert_eq!(dashboard.chat().draft(), "One moment");
        assert!(dashboard.chat().input_enabled());
        assert!(dashboard.conversation(x_id).unwrap().needs_response);
    }

    #[tokio::test]
    async fn test_hitl_suggestion_handoff() {
        let x = conversation("visitor-x", 5, true);
        let x_id = x.id;
        let (api, mut dashboard) = setup(vec![x], AiMode::Hitl);
        *api.suggestion.lock().unwrap() = Some("Please restart the router.".to_string());
        dashboard.load().await.unwrap();

        let poll = dashboard.select(x_id).await.unwrap().unwrap();
        assert_eq!(dashboard.chat().state(), ChatState::SuggestionPending);
        let result = poll.run().await;
        assert!(dashboard.apply_poll(result));

        dashboard.chat_mut().use_suggestion();
        *api.suggestion.lock().unwrap() = None;
        let repoll = dashboard.send().await.unwrap();
        assert!(dashboard.chat().suggestion().is_none());

        let stored = api.messages.lock().unwrap().clone();
        let attribution = stored[0].metadata.response_attribution.clone().unwrap();
        assert_eq!(attribution.suggestion_type, SuggestionType::AsIs);
        assert!(attribution.suggestion_offered);

        let result = repoll.unwrap().run().await;
        assert!(!dashboard.apply_poll(result));
        assert_eq!(dashboard.chat().state(), ChatState::Idle);
    }

    #[tokio::test]
    async fn test_switching_conversation_drops_stale_poll() {
        let x = conversation("visitor-x", 5, true);
        let y = conversation("visitor-y", 6, true);
        let (x_id, y_id) = (x.id, y.id);
        let (api, mut dashboard) = setup(vec![x, y], AiMode::Hitl);
        *api.suggestion.lock().unwrap() = Some("For X only".to_string());
        dashboard.load().await.unwrap();

        let poll = dashboard.select(x_id).await.unwrap().unwrap();
        let _ = dashboard.select(y_id).await.unwrap();
        assert!(poll.token().is_cancelled());

        let result = poll.run().await;
        assert!(!dashboard.apply_poll(result));
        assert!(dashboard.chat().suggestion().is_none());
        assert_eq!(dashboard.chat().conversation_id(), Some(y_id));
    }

    #[tokio::test]
    async fn test_room_and_typing_events() {
        let x = conversation("visitor-x", 5, false);
        let y = conversation("visitor-y", 6, false);
        let (x_id, y_id) = (x.id, y.id);
        let (_api, mut dashboard) = setup(vec![x, y], AiMode::Off);
        dashboard.load().await.unwrap();

        dashboard.select(x_id).await.unwrap();
        let start = Instant::now();
        dashboard.draft_changed("h", start);
        dashboard.draft_changed("hi", start + std::time::Duration::from_millis(200));
        dashboard.tick(start + std::time::Duration::from_millis(500));
        dashboard.tick(start + std::time::Duration::from_secs(2));
        dashboard.select(y_id).await.unwrap();

        assert_eq!(
            dashboard.take_outgoing(),
            vec![
                ClientEvent::JoinAgentDashboard,
                ClientEvent::JoinConversation { conversation_id: x_id },
                ClientEvent::AgentTyping {
                    conversation_id: x_id,
                    is_typing: true
                },
                ClientEvent::AgentTyping {
                    conversation_id: x_id,
                    is_typing: false
                },
                ClientEvent::LeaveConversation { conversation_id: x_id },
                ClientEvent::JoinConversation { conversation_id: y_id },
            ]
        );
        assert!(dashboard.take_outgoing().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_updates() {
        let x = conversation("visitor-x", 5, false);
        let y = conversation("visitor-y", 6, false);
        let (x_id, y_id) = (x.id, y.id);
        let (_api, mut dashboard) = setup(vec![x, y], AiMode::Off);
        dashboard.load().await.unwrap();
        let other_agent = Uuid::new_v4();

        let changes = dashboard.handle_server_event(ServerEvent::ConversationUpdated {
            conversation_id: y_id,
            assigned_agent_id: Some(other_agent),
            archived: false,
        });
        assert!(changes.queue);
        assert_eq!(
            dashboard.conversation(y_id).unwrap().assigned_agent_id,
            Some(other_agent)
        );

        dashboard.handle_server_event(ServerEvent::ConversationUpdated {
            conversation_id: x_id,
            assigned_agent_id: None,
            archived: true,
        });
        assert!(dashboard.conversation(x_id).is_none());

        let unknown = Uuid::new_v4();
        let changes = dashboard.handle_server_event(ServerEvent::NewMessage {
            conversation_id: unknown,
            message: visitor_message(unknown, "hi", TimeDuration::ZERO),
        });
        assert!(changes.reload);
    }

    #[tokio::test]
    async fn test_customer_typing_cleared_by_message() {
        let x = conversation("visitor-x", 5, false);
        let x_id = x.id;
        let (_api, mut dashboard) = setup(vec![x], AiMode::Off);
        dashboard.load().await.unwrap();

        let changes = dashboard.handle_server_event(ServerEvent::CustomerTypingStatus {
            conversation_id: x_id,
            is_typing: true,
        });
        assert!(changes.typing);
        assert!(dashboard.customer_typing(x_id));

        let changes = dashboard.handle_server_event(ServerEvent::NewMessage {
            conversation_id: x_id,
            message: visitor_message(x_id, "my order is late", TimeDuration::seconds(1)),
        });
        assert!(changes.typing);
        assert!(!dashboard.customer_typing(x_id));
    }

    #[tokio::test]
    async fn test_reconnect_reconciles() {
        let x = conversation("visitor-x", 5, false);
        let (api, mut dashboard) = setup(vec![x], AiMode::Off);
        dashboard.load().await.unwrap();

        api.conversations
            .lock()
            .unwrap()
            .push(conversation("visitor-late", 0, true));

        let changes = dashboard.handle_realtime(RealtimeEvent::Reconnected);
        assert!(changes.reload);
        dashboard.reconcile().await.unwrap();
        assert_eq!(dashboard.conversations().len(), 2);
    }

    #[tokio::test]
    async fn test_render_uses_diffs_after_first_paint() {
        let x = conversation("visitor-x", 30, false);
        let y = conversation("visitor-y", 20, false);
        let x_id = x.id;
        let (_api, mut dashboard) = setup(vec![x, y], AiMode::Off);
        dashboard.load().await.unwrap();

        let mut view = RecordingView::default();
        dashboard.render(&mut view);
        assert_eq!(view.full_renders, 1);

        dashboard.handle_server_event(ServerEvent::NewMessage {
            conversation_id: x_id,
            message: visitor_message(x_id, "hello?", TimeDuration::seconds(1)),
        });
        dashboard.render(&mut view);

        assert_eq!(view.full_renders, 1);
        assert_eq!(view.batches.len(), 1);
        assert_eq!(view.items, dashboard.queue());
        assert_eq!(view.items[0].id, x_id);
    }
}
