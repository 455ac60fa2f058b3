//! Conversation queue: ordering, seen-state and differential rendering
//!
//! Everything here is a pure function over [`Conversation`] lists except the
//! seen-state stores. Rendering goes through [`QueueView`] so a UI adapter
//! can either redraw the whole list or patch it with [`QueueOp`]s; both give
//! the same result for the same input.

use helpdesk_shared::Conversation;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::DashboardResult;

// =============================================================================
// Ordering
// =============================================================================

/// Sort tier, lower first
fn tier(conversation: &Conversation, agent_id: Uuid) -> u8 {
    let mine = conversation.assigned_agent_id == Some(agent_id);
    match (mine, conversation.needs_response) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    }
}

/// Order the queue for `agent_id`.
///
/// Tiers: mine and waiting, mine, waiting, everything else. Within a tier the
/// most recent activity comes first; full ties keep their input order.
pub fn sort_queue(conversations: &mut [Conversation], agent_id: Uuid) {
    conversations.sort_by(|a, b| {
        tier(a, agent_id)
            .cmp(&tier(b, agent_id))
            .then_with(|| b.activity_at().cmp(&a.activity_at()))
    });
}

// =============================================================================
// Seen-state
// =============================================================================

/// Whether the agent has not yet seen the latest message.
///
/// The server's flag wins when present. Otherwise the last message must be
/// strictly newer than the recorded view; no recorded view means never seen.
pub fn is_unseen(conversation: &Conversation, last_seen: Option<OffsetDateTime>) -> bool {
    if let Some(flag) = conversation.is_unseen {
        return flag;
    }
    match (conversation.last_message_at, last_seen) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(last_message), Some(seen)) => last_message > seen,
    }
}

/// Client-side last-seen timestamps per conversation
pub trait SeenStore: Send {
    fn last_seen(&self, conversation_id: Uuid) -> Option<OffsetDateTime>;

    /// Record a view. Never moves a timestamp backwards.
    fn mark_seen(&mut self, conversation_id: Uuid, at: OffsetDateTime) -> DashboardResult<()>;

    /// Drop entries for conversations that no longer exist
    fn retain(&mut self, keep: &HashSet<Uuid>) -> DashboardResult<()>;
}

#[derive(Debug, Default)]
pub struct MemorySeenStore {
    entries: HashMap<Uuid, OffsetDateTime>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn record_max(entries: &mut HashMap<Uuid, OffsetDateTime>, id: Uuid, at: OffsetDateTime) -> bool {
    match entries.get(&id) {
        Some(existing) if *existing >= at => false,
        _ => {
            entries.insert(id, at);
            true
        }
    }
}

impl SeenStore for MemorySeenStore {
    fn last_seen(&self, conversation_id: Uuid) -> Option<OffsetDateTime> {
        self.entries.get(&conversation_id).copied()
    }

    fn mark_seen(&mut self, conversation_id: Uuid, at: OffsetDateTime) -> DashboardResult<()> {
        record_max(&mut self.entries, conversation_id, at);
        Ok(())
    }

    fn retain(&mut self, keep: &HashSet<Uuid>) -> DashboardResult<()> {
        self.entries.retain(|id, _| keep.contains(id));
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SeenEntry {
    #[serde(with = "time::serde::rfc3339")]
    last_seen_at: OffsetDateTime,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeenFile {
    #[serde(default)]
    conversations: HashMap<Uuid, SeenEntry>,
}

/// Seen-state persisted as a JSON file, rewritten atomically on change
#[derive(Debug)]
pub struct JsonFileSeenStore {
    path: PathBuf,
    entries: HashMap<Uuid, OffsetDateTime>,
}

impl JsonFileSeenStore {
    /// Load the store, starting empty if the file does not exist or is corrupt
    pub fn open(path: impl Into<PathBuf>) -> DashboardResult<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<SeenFile>(&bytes) {
                Ok(file) => file
                    .conversations
                    .into_iter()
                    .map(|(id, entry)| (id, entry.last_seen_at))
                    .collect(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable seen-state file");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, entries })
    }

    fn persist(&self) -> DashboardResult<()> {
        let file = SeenFile {
            conversations: self
                .entries
                .iter()
                .map(|(id, at)| (*id, SeenEntry { last_seen_at: *at }))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SeenStore for JsonFileSeenStore {
    fn last_seen(&self, conversation_id: Uuid) -> Option<OffsetDateTime> {
        self.entries.get(&conversation_id).copied()
    }

    fn mark_seen(&mut self, conversation_id: Uuid, at: OffsetDateTime) -> DashboardResult<()> {
        if record_max(&mut self.entries, conversation_id, at) {
            self.persist()?;
        }
        Ok(())
    }

    fn retain(&mut self, keep: &HashSet<Uuid>) -> DashboardResult<()> {
        let before = self.entries.len();
        self.entries.retain(|id, _| keep.contains(id));
        if self.entries.len() != before {
            self.persist()?;
        }
        Ok(())
    }
}

// =============================================================================
// Presentation
// =============================================================================

pub mod class {
    pub const ITEM: &str = "conversation-item";
    pub const ASSIGNED_TO_ME: &str = "assigned-to-me";
    pub const ASSIGNED_OTHER: &str = "assigned-other";
    pub const UNASSIGNED: &str = "unassigned";
    pub const NEEDS_RESPONSE: &str = "needs-response";
    pub const UNSEEN: &str = "unseen";
    pub const SELECTED: &str = "selected";
}

/// One rendered queue row
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: Uuid,
    pub visitor_id: String,
    pub preview: Option<String>,
    pub status_label: String,
    pub classes: Vec<&'static str>,
    pub unseen: bool,
    pub activity_at: OffsetDateTime,
}

impl QueueItem {
    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains(&name)
    }
}

fn status_label(conversation: &Conversation, agent_id: Uuid) -> String {
    if conversation.needs_response {
        return "Needs response".to_string();
    }
    match conversation.assigned_agent_id {
        Some(id) if id == agent_id => "Assigned to you".to_string(),
        Some(_) => format!(
            "Assigned to {}",
            conversation
                .assigned_agent_name
                .as_deref()
                .unwrap_or("another agent")
        ),
        None => "Unassigned".to_string(),
    }
}

/// Row for one conversation
pub fn present(
    conversation: &Conversation,
    agent_id: Uuid,
    last_seen: Option<OffsetDateTime>,
    selected: Option<Uuid>,
) -> QueueItem {
    let unseen = is_unseen(conversation, last_seen);

    let mut classes = vec![class::ITEM];
    classes.push(match conversation.assigned_agent_id {
        Some(id) if id == agent_id => class::ASSIGNED_TO_ME,
        Some(_) => class::ASSIGNED_OTHER,
        None => class::UNASSIGNED,
    });
    if conversation.needs_response {
        classes.push(class::NEEDS_RESPONSE);
    }
    if unseen {
        classes.push(class::UNSEEN);
    }
    if selected == Some(conversation.id) {
        classes.push(class::SELECTED);
    }

    QueueItem {
        id: conversation.id,
        visitor_id: conversation.visitor_id.clone(),
        preview: conversation.last_message.clone(),
        status_label: status_label(conversation, agent_id),
        classes,
        unseen,
        activity_at: conversation.activity_at(),
    }
}

/// Sorted, styled rows for the whole queue
pub fn build_queue(
    conversations: &[Conversation],
    agent_id: Uuid,
    seen: &dyn SeenStore,
    selected: Option<Uuid>,
) -> Vec<QueueItem> {
    let mut ordered = conversations.to_vec();
    sort_queue(&mut ordered, agent_id);
    ordered
        .iter()
        .map(|c| present(c, agent_id, seen.last_seen(c.id), selected))
        .collect()
}

// =============================================================================
// Differential update
// =============================================================================

/// Minimal edit applied to a rendered queue, keyed by conversation id
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOp {
    Remove { id: Uuid },
    Insert { index: usize, item: QueueItem },
    Move { id: Uuid, to: usize },
    Update { item: QueueItem },
}

/// Rendering adapter for the queue
pub trait QueueView {
    fn render_full(&mut self, items: &[QueueItem]);

    fn apply_ops(&mut self, ops: &[QueueOp]);
}

/// Apply ops in order. Unknown ids are ignored.
pub fn apply_ops(items: &mut Vec<QueueItem>, ops: &[QueueOp]) {
    for op in ops {
        match op {
            QueueOp::Remove { id } => items.retain(|item| item.id != *id),
            QueueOp::Insert { index, item } => {
                let index = (*index).min(items.len());
                items.insert(index, item.clone());
            }
            QueueOp::Move { id, to } => {
                if let Some(from) = items.iter().position(|item| item.id == *id) {
                    let item = items.remove(from);
                    let to = (*to).min(items.len());
                    items.insert(to, item);
                }
            }
            QueueOp::Update { item } => {
                if let Some(existing) = items.iter_mut().find(|existing| existing.id == item.id) {
                    *existing = item.clone();
                }
            }
        }
    }
}

/// Ops turning `current` into `next`
pub fn diff_queue(current: &[QueueItem], next: &[QueueItem]) -> Vec<QueueOp> {
    let next_ids: HashSet<Uuid> = next.iter().map(|item| item.id).collect();
    let mut ops = Vec::new();

    let mut working: Vec<QueueItem> = Vec::with_capacity(current.len());
    for item in current {
        if next_ids.contains(&item.id) {
            working.push(item.clone());
        } else {
            ops.push(QueueOp::Remove { id: item.id });
        }
    }

    for (index, target) in next.iter().enumerate() {
        if working.get(index).map(|item| item.id) == Some(target.id) {
            if working[index] != *target {
                ops.push(QueueOp::Update {
                    item: target.clone(),
                });
                working[index] = target.clone();
            }
            continue;
        }

        match working.iter().position(|item| item.id == target.id) {
            Some(from) => {
                let moved = working.remove(from);
                ops.push(QueueOp::Move {
                    id: target.id,
                    to: index,
                });
                if moved != *target {
                    ops.push(QueueOp::Update {
                        item: target.clone(),
                    });
                }
                working.insert(index, target.clone());
            }
            None => {
                ops.push(QueueOp::Insert {
                    index,
                    item: target.clone(),
                });
                working.insert(index, target.clone());
            }
        }
    }

    ops
}
