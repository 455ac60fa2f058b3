//! Realtime connection for the agent dashboard
//!
//! Wraps the `/ws` socket: reconnects with exponential backoff, re-joins
//! whatever rooms were joined before the drop and tells the dashboard to
//! re-fetch state it may have missed while disconnected.

use futures::{Sink, SinkExt, StreamExt};
use helpdesk_shared::{ClientEvent, MessageEvent, ServerEvent};
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};

const DEDUP_CAPACITY: usize = 1000;

// =============================================================================
// De-duplication
// =============================================================================

type Fingerprint = (Uuid, String, i128);

/// Drops messages that were already delivered.
///
/// Matches by id when the event has one, otherwise by content and timestamp.
/// A message first relayed without an id is still recognised once its id
/// arrives, and takes on that id from then on.
#[derive(Debug, Default)]
pub struct MessageDeduper {
    ids: HashSet<Uuid>,
    fingerprints: HashSet<Fingerprint>,
    anonymous: HashSet<Fingerprint>,
    order: VecDeque<(Option<Uuid>, Fingerprint)>,
}

impl MessageDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    fn fingerprint(message: &MessageEvent) -> Fingerprint {
        (
            message.conversation_id,
            message.content.clone(),
            message.created_at.unix_timestamp_nanos(),
        )
    }

    /// Returns false if this message was seen before
    pub fn accept(&mut self, message: &MessageEvent) -> bool {
        let fingerprint = Self::fingerprint(message);
        match message.id {
            Some(id) if self.ids.contains(&id) => return false,
            Some(id) if self.anonymous.remove(&fingerprint) => {
                self.ids.insert(id);
                if let Some(entry) = self
                    .order
                    .iter_mut()
                    .find(|(seen, fp)| seen.is_none() && *fp == fingerprint)
                {
                    entry.0 = Some(id);
                }
                return false;
            }
            None if self.fingerprints.contains(&fingerprint) => return false,
            _ => {}
        }

        match message.id {
            Some(id) => {
                self.ids.insert(id);
            }
            None => {
                self.anonymous.insert(fingerprint.clone());
            }
        }
        self.fingerprints.insert(fingerprint.clone());
        self.order.push_back((message.id, fingerprint));

        while self.order.len() > DEDUP_CAPACITY {
            if let Some((id, fingerprint)) = self.order.pop_front() {
                match id {
                    Some(id) => {
                        self.ids.remove(&id);
                    }
                    None => {
                        self.anonymous.remove(&fingerprint);
                    }
                }
                self.fingerprints.remove(&fingerprint);
            }
        }
        true
    }
}

// =============================================================================
// Typing
// =============================================================================

/// Turns keystrokes into start/stop typing signals.
///
/// Emits `true` on the first keystroke of a burst and `false` once no
/// keystroke has arrived for the debounce window.
#[derive(Debug)]
pub struct TypingDebouncer {
    debounce: Duration,
    last_keystroke: Option<Instant>,
}

impl TypingDebouncer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_keystroke: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.last_keystroke.is_some()
    }

    pub fn keystroke(&mut self, now: Instant) -> Option<bool> {
        let started = self.last_keystroke.is_none();
        self.last_keystroke = Some(now);
        started.then_some(true)
    }

    /// When the pending stop signal is due
    pub fn deadline(&self) -> Option<Instant> {
        self.last_keystroke.map(|at| at + self.debounce)
    }

    pub fn tick(&mut self, now: Instant) -> Option<bool> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.last_keystroke = None;
                Some(false)
            }
            _ => None,
        }
    }

    /// End the burst immediately (message sent, conversation switched)
    pub fn stop(&mut self) -> Option<bool> {
        self.last_keystroke.take().map(|_| false)
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Rooms joined on the current socket, replayed after a reconnect
#[derive(Debug, Default)]
pub struct Subscriptions {
    agent_dashboard: bool,
    conversations: HashSet<Uuid>,
}

impl Subscriptions {
    pub fn track(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::JoinAgentDashboard => self.agent_dashboard = true,
            ClientEvent::JoinConversation { conversation_id } => {
                self.conversations.insert(*conversation_id);
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.conversations.remove(conversation_id);
            }
            ClientEvent::AgentTyping { .. } | ClientEvent::CustomerTyping { .. } | ClientEvent::Ping => {}
        }
    }

    pub fn rejoin_events(&self) -> Vec<ClientEvent> {
        let mut events = Vec::with_capacity(self.conversations.len() + 1);
        if self.agent_dashboard {
            events.push(ClientEvent::JoinAgentDashboard);
        }
        events.extend(
            self.conversations
                .iter()
                .map(|&conversation_id| ClientEvent::JoinConversation { conversation_id }),
        );
        events
    }
}

// =============================================================================
// Client
// =============================================================================

/// What the connection task reports to the dashboard
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Server(ServerEvent),
    /// Socket came back after a drop; state should be re-fetched
    Reconnected,
    Disconnected,
    /// Reconnect attempts exhausted
    GaveUp,
}

/// Handle to the background connection task
pub struct RealtimeClient {
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    shutdown: CancellationToken,
}

impl RealtimeClient {
    /// Start the connection task for `url` (see [`DashboardConfig::ws_url`])
    pub fn spawn(
        url: String,
        config: &DashboardConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let backoff = Backoff {
            base: config.reconnect_base_delay,
            max: config.reconnect_max_delay,
            attempts: config.reconnect_attempts,
        };
        tokio::spawn(run(url, backoff, outgoing_rx, events_tx, shutdown.clone()));

        (Self { outgoing, shutdown }, events_rx)
    }

    pub fn send(&self, event: ClientEvent) -> DashboardResult<()> {
        self.outgoing
            .send(event)
            .map_err(|_| DashboardError::WebSocket("connection task stopped".into()))
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    base: Duration,
    max: Duration,
    attempts: usize,
}

impl Backoff {
    /// Delays of `2^n * factor`, i.e. base, 2*base, 4*base ... capped at `max`
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        let factor = (self.base.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max)
            .map(jitter)
            .take(self.attempts)
    }
}

async fn run(
    url: String,
    backoff: Backoff,
    mut outgoing: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::UnboundedSender<RealtimeEvent>,
    shutdown: CancellationToken,
) {
    let url = url.as_str();
    let mut subscriptions = Subscriptions::default();
    let mut connected_before = false;

    loop {
        let connect = Retry::spawn(backoff.strategy(), move || async move {
            connect_async(url).await.map(|(stream, _)| stream)
        });
        let stream = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = connect => result,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Realtime connection failed, giving up");
                let _ = events.send(RealtimeEvent::GaveUp);
                return;
            }
        };
        info!(reconnect = connected_before, "Realtime connection established");

        let (mut sink, mut source) = stream.split();

        let mut rejoin_failed = false;
        for event in subscriptions.rejoin_events() {
            if let Err(e) = send_event(&mut sink, &event).await {
                warn!(error = %e, "Failed to re-join room");
                rejoin_failed = true;
                break;
            }
        }
        if connected_before && !rejoin_failed {
            let _ = events.send(RealtimeEvent::Reconnected);
        }
        connected_before = true;

        if !rejoin_failed {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = sink.close().await;
                        return;
                    }
                    outgoing_event = outgoing.recv() => {
                        let Some(event) = outgoing_event else {
                            let _ = sink.close().await;
                            return;
                        };
                        subscriptions.track(&event);
                        if let Err(e) = send_event(&mut sink, &event).await {
                            warn!(error = %e, "Realtime send failed");
                            break;
                        }
                    }
                    frame = source.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    if events.send(RealtimeEvent::Server(event)).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => debug!(error = %e, "Ignoring unparseable realtime frame"),
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if sink.send(WsMessage::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "Realtime socket error");
                            break;
                        }
                    }
                }
            }
        }

        if events.send(RealtimeEvent::Disconnected).is_err() {
            return;
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &ClientEvent) -> DashboardResult<()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(event)?;
    sink.send(WsMessage::Text(text))
        .await
        .map_err(|e| DashboardError::WebSocket(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use helpdesk_shared::{MessageMetadata, SenderKind};
    use time::macros::datetime;

    fn event(id: Option<Uuid>, content: &str) -> MessageEvent {
        MessageEvent {
            id,
            conversation_id: Uuid::nil(),
            sender_kind: SenderKind::Visitor,
            sender_id: None,
            content: content.to_string(),
            metadata: MessageMetadata::default(),
            created_at: datetime!(2025-03-01 12:00 UTC),
        }
    }

    #[test]
    fn test_dedupe_by_id() {
        let mut deduper = MessageDeduper::new();
        let id = Uuid::new_v4();
        assert!(deduper.accept(&event(Some(id), "hi")));
        assert!(!deduper.accept(&event(Some(id), "hi")));
        // Same text and time but a different id is a different message
        assert!(deduper.accept(&event(Some(Uuid::new_v4()), "hi")));
    }

    #[test]
    fn test_dedupe_without_id_uses_content_and_time() {
        let mut deduper = MessageDeduper::new();
        assert!(deduper.accept(&event(Some(Uuid::new_v4()), "hello")));
        assert!(!deduper.accept(&event(None, "hello")));
        assert!(deduper.accept(&event(None, "hello again")));
        assert!(!deduper.accept(&event(None, "hello again")));
    }

    #[test]
    fn test_dedupe_relay_without_id_then_with_id() {
        let mut deduper = MessageDeduper::new();
        let id = Uuid::new_v4();
        assert!(deduper.accept(&event(None, "on my way")));
        assert!(!deduper.accept(&event(Some(id), "on my way")));
        // The id is remembered for later copies
        assert!(!deduper.accept(&event(Some(id), "on my way")));
        assert!(!deduper.accept(&event(None, "on my way")));
        assert_eq!(deduper.order.len(), 1);

        // A second real message with the same text still gets through
        assert!(deduper.accept(&event(Some(Uuid::new_v4()), "on my way")));
    }

    #[test]
    fn test_dedupe_is_bounded() {
        let mut deduper = MessageDeduper::new();
        let first = Uuid::new_v4();
        deduper.accept(&event(Some(first), "first"));
        for i in 0..DEDUP_CAPACITY {
            deduper.accept(&event(Some(Uuid::new_v4()), &format!("m{i}")));
        }
        assert_eq!(deduper.order.len(), DEDUP_CAPACITY);
        assert!(deduper.accept(&event(Some(first), "first")));
    }

    #[test]
    fn test_typing_burst() {
        let start = Instant::now();
        let mut typing = TypingDebouncer::new(Duration::from_secs(1));

        assert_eq!(typing.keystroke(start), Some(true));
        assert_eq!(typing.keystroke(start + Duration::from_millis(300)), None);
        assert_eq!(typing.keystroke(start + Duration::from_millis(900)), None);

        // The window restarts with each keystroke
        assert_eq!(typing.tick(start + Duration::from_millis(1500)), None);
        assert_eq!(typing.tick(start + Duration::from_millis(1900)), Some(false));
        assert!(!typing.is_typing());
        assert_eq!(typing.tick(start + Duration::from_secs(5)), None);

        assert_eq!(typing.keystroke(start + Duration::from_secs(6)), Some(true));
    }

    #[test]
    fn test_typing_stop_on_send() {
        let mut typing = TypingDebouncer::new(Duration::from_secs(1));
        assert_eq!(typing.stop(), None);
        typing.keystroke(Instant::now());
        assert_eq!(typing.stop(), Some(false));
        assert!(typing.deadline().is_none());
    }

    #[test]
    fn test_subscriptions_replay() {
        let mut subscriptions = Subscriptions::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        subscriptions.track(&ClientEvent::JoinAgentDashboard);
        subscriptions.track(&ClientEvent::JoinConversation { conversation_id: a });
        subscriptions.track(&ClientEvent::JoinConversation { conversation_id: b });
        subscriptions.track(&ClientEvent::LeaveConversation { conversation_id: a });
        subscriptions.track(&ClientEvent::Ping);

        let events = subscriptions.rejoin_events();
        assert_eq!(
            events,
            vec![
                ClientEvent::JoinAgentDashboard,
                ClientEvent::JoinConversation { conversation_id: b },
            ]
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = Backoff {
            base: Duration::from_millis(500),
            max: Duration::from_secs(4),
            attempts: 8,
        };
        let delays: Vec<Duration> = backoff.strategy().collect();
        assert_eq!(delays.len(), 8);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(4)));
    }

    #[tokio::test]
    async fn test_unreachable_server_gives_up() {
        let mut config = DashboardConfig::new("http://127.0.0.1:9", Uuid::new_v4(), "Ada");
        config.reconnect_base_delay = Duration::from_millis(2);
        config.reconnect_max_delay = Duration::from_millis(10);
        config.reconnect_attempts = 2;

        let (client, mut events) = RealtimeClient::spawn(config.ws_url("token"), &config);
        client.send(ClientEvent::JoinAgentDashboard).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(RealtimeEvent::GaveUp));
    }
}
