//! Chat manager for the open conversation
//!
//! Tracks the send / AI-suggestion handoff for one conversation at a time:
//!
//! ```text
//! Idle -> SuggestionPending -> SuggestionShown -> Sending -> Sent
//!   ^            |                                  |
//!   +---- none --+                          failure +-> back, draft kept
//! ```
//!
//! Suggestion polls run outside the manager as [`SuggestionPoll`] futures
//! and report back through [`ChatManager::apply_poll`]; a result is only
//! accepted if its poll is still the current one.

use helpdesk_shared::{Message, PendingSuggestion, ResponseAttribution, SuggestionType};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{HelpdeskApi, OutgoingMessage};
use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    SuggestionPending,
    SuggestionShown,
    Sending,
    Sent,
}

/// Where the text in the reply box came from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DraftOrigin {
    #[default]
    Scratch,
    /// Loaded from an AI suggestion with this text
    Suggestion(String),
}

/// Classify a reply against the suggestion it may have started from
pub fn classify(origin: &DraftOrigin, text: &str) -> SuggestionType {
    match origin {
        DraftOrigin::Suggestion(original) if original == text => SuggestionType::AsIs,
        DraftOrigin::Suggestion(_) => SuggestionType::Edited,
        DraftOrigin::Scratch => SuggestionType::FromScratch,
    }
}

/// Outcome of one suggestion poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub conversation_id: Uuid,
    generation: u64,
    pub suggestion: Option<PendingSuggestion>,
}

/// Poll for a pending suggestion until one appears, attempts or budget run
/// out, or `cancel` fires. Errors degrade to `None`.
pub async fn poll_for_suggestion<A: HelpdeskApi + ?Sized>(
    api: &A,
    conversation_id: Uuid,
    attempts: u32,
    interval: Duration,
    budget: Duration,
    cancel: &CancellationToken,
) -> Option<PendingSuggestion> {
    let deadline = Instant::now() + budget;

    for attempt in 1..=attempts.max(1) {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = api.get_suggestion(conversation_id) => result,
        };

        match result {
            Ok(Some(suggestion)) => return Some(suggestion),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(conversation_id = %conversation_id, error = %e, "Suggestion poll failed");
                return None;
            }
        }

        if attempt >= attempts || Instant::now() + interval > deadline {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    None
}

/// A scheduled suggestion poll, run by the caller (usually on a spawned task)
pub struct SuggestionPoll<A: ?Sized> {
    api: Arc<A>,
    conversation_id: Uuid,
    generation: u64,
    token: CancellationToken,
    delay: Duration,
    attempts: u32,
    interval: Duration,
    budget: Duration,
}

impl<A: HelpdeskApi + ?Sized> SuggestionPoll<A> {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn run(self) -> PollResult {
        let waited = if self.delay.is_zero() {
            true
        } else {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => false,
                _ = tokio::time::sleep(self.delay) => true,
            }
        };

        let suggestion = if waited {
            poll_for_suggestion(
                self.api.as_ref(),
                self.conversation_id,
                self.attempts,
                self.interval,
                self.budget,
                &self.token,
            )
            .await
        } else {
            None
        };

        PollResult {
            conversation_id: self.conversation_id,
            generation: self.generation,
            suggestion,
        }
    }
}

struct ActivePoll {
    generation: u64,
    token: CancellationToken,
}

/// Send / suggestion state for the selected conversation
pub struct ChatManager {
    hitl: bool,
    conversation_id: Option<Uuid>,
    state: ChatState,
    messages: Vec<Message>,
    suggestion: Option<PendingSuggestion>,
    /// A suggestion was shown while this draft was being written
    suggestion_offered: bool,
    draft: String,
    origin: DraftOrigin,
    input_enabled: bool,
    last_error: Option<String>,
    poll: Option<ActivePoll>,
    next_generation: u64,
    session: CancellationToken,
}

impl ChatManager {
    pub fn new(hitl: bool) -> Self {
        Self::with_session(hitl, CancellationToken::new())
    }

    /// Polls are cancelled along with `session`
    pub fn with_session(hitl: bool, session: CancellationToken) -> Self {
        Self {
            hitl,
            conversation_id: None,
            state: ChatState::Idle,
            messages: Vec::new(),
            suggestion: None,
            suggestion_offered: false,
            draft: String::new(),
            origin: DraftOrigin::Scratch,
            input_enabled: true,
            last_error: None,
            poll: None,
            next_generation: 0,
            session,
        }
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Suggestion currently shown to the agent
    pub fn suggestion(&self) -> Option<&PendingSuggestion> {
        self.suggestion.as_ref()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn origin(&self) -> &DraftOrigin {
        &self.origin
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Stop any in-flight poll
    pub fn cancel_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.token.cancel();
        }
    }

    /// Switch to another conversation; everything from the previous one is dropped
    pub fn select(&mut self, conversation_id: Uuid) {
        self.cancel_poll();
        self.conversation_id = Some(conversation_id);
        self.state = ChatState::Idle;
        self.messages.clear();
        self.suggestion = None;
        self.suggestion_offered = false;
        self.draft.clear();
        self.origin = DraftOrigin::Scratch;
        self.input_enabled = true;
        self.last_error = None;
    }

    /// Replace the transcript. Does not start a poll.
    pub fn set_messages(&mut self, conversation_id: Uuid, messages: Vec<Message>) {
        if self.conversation_id == Some(conversation_id) {
            self.messages = messages;
        }
    }

    /// Append a realtime message for the open conversation
    pub fn push_message(&mut self, message: Message) {
        if self.conversation_id != Some(message.conversation_id)
            || self.messages.iter().any(|m| m.id == message.id)
        {
            return;
        }
        self.messages.push(message);
    }

    /// Schedule a poll for the open conversation (HITL only)
    pub fn begin_poll<A: HelpdeskApi + ?Sized>(
        &mut self,
        api: Arc<A>,
        config: &DashboardConfig,
        delay: Duration,
    ) -> Option<SuggestionPoll<A>> {
        let conversation_id = self.conversation_id?;
        if !self.hitl {
            return None;
        }

        self.cancel_poll();
        self.next_generation += 1;
        let token = self.session.child_token();
        self.poll = Some(ActivePoll {
            generation: self.next_generation,
            token: token.clone(),
        });
        if self.suggestion.is_none() {
            self.state = ChatState::SuggestionPending;
        }

        Some(SuggestionPoll {
            api,
            conversation_id,
            generation: self.next_generation,
            token,
            delay,
            attempts: config.suggestion_poll_attempts,
            interval: config.suggestion_poll_interval,
            budget: config.suggestion_poll_budget,
        })
    }

    /// Accept a poll result if it belongs to the current poll.
    /// Returns true when a suggestion is now shown.
    pub fn apply_poll(&mut self, result: PollResult) -> bool {
        let current = self
            .poll
            .as_ref()
            .is_some_and(|p| p.generation == result.generation && !p.token.is_cancelled());
        if !current || self.conversation_id != Some(result.conversation_id) {
            tracing::debug!(conversation_id = %result.conversation_id, "Discarding stale suggestion poll");
            return false;
        }
        self.poll = None;

        if self.state == ChatState::Sending {
            return false;
        }

        match result.suggestion {
            Some(suggestion) => {
                self.suggestion = Some(suggestion);
                self.suggestion_offered = true;
                self.state = ChatState::SuggestionShown;
                true
            }
            None => {
                if self.suggestion.is_none() {
                    self.state = ChatState::Idle;
                }
                false
            }
        }
    }

    /// Load the shown suggestion into the reply box
    pub fn use_suggestion(&mut self) -> bool {
        let Some(suggestion) = &self.suggestion else {
            return false;
        };
        self.draft = suggestion.content.clone();
        self.origin = DraftOrigin::Suggestion(suggestion.content.clone());
        true
    }

    /// Hide the suggestion and write from scratch.
    ///
    /// A draft loaded from the suggestion goes with it.
    pub fn discard_suggestion(&mut self) {
        self.suggestion = None;
        if matches!(self.origin, DraftOrigin::Suggestion(_)) {
            self.draft.clear();
        }
        self.origin = DraftOrigin::Scratch;
        if self.state == ChatState::SuggestionShown {
            self.state = ChatState::Idle;
        }
    }

    pub fn edit_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Attribution the current draft would be sent with
    pub fn attribution(&self) -> ResponseAttribution {
        ResponseAttribution {
            suggestion_type: classify(&self.origin, &self.draft),
            suggestion_offered: self.suggestion_offered,
            template_id: None,
        }
    }

    /// Lock the input and build the outgoing message
    pub fn begin_send(&mut self) -> DashboardResult<OutgoingMessage> {
        let conversation_id = self.conversation_id.ok_or(DashboardError::NoSelection)?;
        if self.state == ChatState::Sending {
            return Err(DashboardError::SendInProgress);
        }
        if self.draft.trim().is_empty() {
            return Err(DashboardError::EmptyMessage);
        }

        self.cancel_poll();
        self.input_enabled = false;
        self.last_error = None;
        self.state = ChatState::Sending;

        Ok(OutgoingMessage {
            conversation_id,
            content: self.draft.clone(),
            response_attribution: self.attribution(),
        })
    }

    pub fn send_succeeded(&mut self, message: Message) {
        self.draft.clear();
        self.origin = DraftOrigin::Scratch;
        self.suggestion = None;
        self.suggestion_offered = false;
        self.input_enabled = true;
        self.state = ChatState::Sent;
        self.push_message(message);
    }

    /// Re-enable input and keep the draft for another try
    pub fn send_failed(&mut self, error: &DashboardError) {
        self.input_enabled = true;
        self.last_error = Some(error.to_string());
        self.state = if self.suggestion.is_some() {
            ChatState::SuggestionShown
        } else {
            ChatState::Idle
        };
    }
}
