//! Pending AI suggestions
//!
//! Ephemeral, keyed by conversation. A suggestion is replaced by a newer one,
//! taken at most once per send and cleared by any agent reply.
//!
//! Every take advances the conversation's generation. Background generation
//! records the generation it started under and only stores its result if no
//! reply has landed in between.

use helpdesk_shared::PendingSuggestion;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Slots {
    suggestions: HashMap<Uuid, PendingSuggestion>,
    generations: HashMap<Uuid, u64>,
}

#[derive(Clone, Default)]
pub struct SuggestionStore {
    inner: Arc<RwLock<Slots>>,
}

fn pending(conversation_id: Uuid, content: String) -> PendingSuggestion {
    PendingSuggestion {
        conversation_id,
        content,
        generated_at: OffsetDateTime::now_utc(),
    }
}

impl SuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a suggestion, replacing any earlier one for the conversation
    pub async fn put(&self, conversation_id: Uuid, content: String) -> PendingSuggestion {
        let suggestion = pending(conversation_id, content);
        self.inner
            .write()
            .await
            .suggestions
            .insert(conversation_id, suggestion.clone());

        tracing::debug!(conversation_id = %conversation_id, "AI suggestion stored");
        suggestion
    }

    /// Generation to hand to [`SuggestionStore::put_if_current`]
    pub async fn generation(&self, conversation_id: Uuid) -> u64 {
        self.inner
            .read()
            .await
            .generations
            .get(&conversation_id)
            .copied()
            .unwrap_or(0)
    }

    /// Store a suggestion only if nothing was taken since `generation`
    pub async fn put_if_current(
        &self,
        conversation_id: Uuid,
        generation: u64,
        content: String,
    ) -> Option<PendingSuggestion> {
        let mut slots = self.inner.write().await;
        let current = slots.generations.get(&conversation_id).copied().unwrap_or(0);
        if current != generation {
            tracing::debug!(
                conversation_id = %conversation_id,
                generation,
                current,
                "Stale AI suggestion dropped"
            );
            return None;
        }

        let suggestion = pending(conversation_id, content);
        slots.suggestions.insert(conversation_id, suggestion.clone());
        tracing::debug!(conversation_id = %conversation_id, "AI suggestion stored");
        Some(suggestion)
    }

    /// Current suggestion without consuming it
    pub async fn get(&self, conversation_id: Uuid) -> Option<PendingSuggestion> {
        self.inner
            .read()
            .await
            .suggestions
            .get(&conversation_id)
            .cloned()
    }

    /// Remove and return the suggestion, invalidating in-flight generations
    pub async fn take(&self, conversation_id: Uuid) -> Option<PendingSuggestion> {
        let mut slots = self.inner.write().await;
        *slots.generations.entry(conversation_id).or_insert(0) += 1;
        slots.suggestions.remove(&conversation_id)
    }

    /// Drop suggestions for conversations that no longer exist
    pub async fn retain_conversations(&self, keep: impl Fn(&Uuid) -> bool) {
        let mut slots = self.inner.write().await;
        slots.suggestions.retain(|id, _| keep(id));
        slots.generations.retain(|id, _| keep(id));
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.suggestions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_take() {
        let store = SuggestionStore::new();
        let conversation_id = Uuid::new_v4();

        assert!(store.get(conversation_id).await.is_none());

        store.put(conversation_id, "first".to_string()).await;
        store.put(conversation_id, "second".to_string()).await;
        assert_eq!(store.get(conversation_id).await.unwrap().content, "second");

        let taken = store.take(conversation_id).await.unwrap();
        assert_eq!(taken.content, "second");
        assert!(store.take(conversation_id).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_retain_conversations() {
        let store = SuggestionStore::new();
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();

        store.put(keep, "a".to_string()).await;
        store.put(drop, "b".to_string()).await;
        store.retain_conversations(|id| *id == keep).await;

        assert!(store.get(keep).await.is_some());
        assert!(store.get(drop).await.is_none());
    }

    #[tokio::test]
    async fn test_reply_during_generation_discards_late_suggestion() {
        let store = SuggestionStore::new();
        let conversation_id = Uuid::new_v4();

        // Generation starts, then the agent replies before it finishes
        let started = store.generation(conversation_id).await;
        assert!(store.take(conversation_id).await.is_none());

        let late = store
            .put_if_current(conversation_id, started, "stale".to_string())
            .await;
        assert!(late.is_none());
        assert!(store.get(conversation_id).await.is_none());

        // The next visitor message starts a fresh generation
        let next = store.generation(conversation_id).await;
        assert_ne!(next, started);
        let stored = store
            .put_if_current(conversation_id, next, "fresh".to_string())
            .await
            .unwrap();
        assert_eq!(stored.content, "fresh");
        assert_eq!(store.get(conversation_id).await.unwrap().content, "fresh");
    }
}
