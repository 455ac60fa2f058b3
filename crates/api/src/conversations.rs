//! Conversation and message persistence

use helpdesk_shared::{Conversation, Message, MessageMetadata, ResponseAttribution, SenderKind};
use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Longest summary stored in `conversations.last_message`
const SUMMARY_CHARS: usize = 200;

const MAX_VISITOR_ID_LEN: usize = 128;

/// Widget visitor ids are opaque client-generated strings
pub fn valid_visitor_id(visitor_id: &str) -> bool {
    !visitor_id.is_empty()
        && visitor_id.len() <= MAX_VISITOR_ID_LEN
        && visitor_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Minimal conversation state used for access checks and updates
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub visitor_id: String,
    pub assigned_agent_id: Option<Uuid>,
    pub archived: bool,
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: Uuid,
    visitor_id: String,
    assigned_agent_id: Option<Uuid>,
    assigned_agent_name: Option<String>,
    archived: bool,
    last_message: Option<String>,
    last_message_at: Option<OffsetDateTime>,
    needs_response: bool,
    is_unseen: bool,
    category_id: Option<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            visitor_id: row.visitor_id,
            assigned_agent_id: row.assigned_agent_id,
            assigned_agent_name: row.assigned_agent_name,
            archived: row.archived,
            last_message: row.last_message,
            last_message_at: row.last_message_at,
            needs_response: row.needs_response,
            is_unseen: Some(row.is_unseen),
            category_id: row.category_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_kind: SenderKind,
    sender_id: Option<Uuid>,
    content: String,
    metadata: Json<MessageMetadata>,
    created_at: OffsetDateTime,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_kind: row.sender_kind,
            sender_id: row.sender_id,
            content: row.content,
            metadata: row.metadata.0,
            created_at: row.created_at,
        }
    }
}

/// A message about to be stored
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_kind: SenderKind,
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub metadata: MessageMetadata,
}

/// Truncate to the stored summary length on a char boundary
pub fn summarize(content: &str) -> String {
    match content.char_indices().nth(SUMMARY_CHARS) {
        Some((idx, _)) => format!("{}…", &content[..idx]),
        None => content.to_string(),
    }
}

/// Conversations as seen by one agent, with per-agent unseen flag
pub async fn list_for_agent(
    pool: &PgPool,
    agent_id: Uuid,
    archived: bool,
) -> Result<Vec<Conversation>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ConversationRow>(
        r#"
        SELECT c.id, c.visitor_id, c.assigned_agent_id, u.name AS assigned_agent_name,
               c.archived, c.last_message, c.last_message_at, c.category_id,
               c.created_at, c.updated_at,
               COALESCE((
                   SELECT (m.metadata->>'pending_agent')::boolean
                   FROM messages m
                   WHERE m.conversation_id = c.id
                   ORDER BY m.created_at DESC
                   LIMIT 1
               ), FALSE) AS needs_response,
               (c.last_message_at IS NOT NULL
                AND (v.last_seen_at IS NULL OR c.last_message_at > v.last_seen_at)) AS is_unseen
        FROM conversations c
        LEFT JOIN users u ON u.id = c.assigned_agent_id
        LEFT JOIN agent_conversation_views v
               ON v.conversation_id = c.id AND v.agent_id = $1
        WHERE c.archived = $2
        ORDER BY COALESCE(c.last_message_at, c.updated_at) DESC
        "#,
    )
    .bind(agent_id)
    .bind(archived)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Conversation::from).collect())
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<ConversationRecord>, sqlx::Error> {
    sqlx::query_as::<_, ConversationRecord>(
        "SELECT id, visitor_id, assigned_agent_id, archived FROM conversations WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Most recent open conversation for a visitor
pub async fn find_open_for_visitor(
    pool: &PgPool,
    visitor_id: &str,
) -> Result<Option<ConversationRecord>, sqlx::Error> {
    sqlx::query_as::<_, ConversationRecord>(
        r#"
        SELECT id, visitor_id, assigned_agent_id, archived
        FROM conversations
        WHERE visitor_id = $1 AND archived = FALSE
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(visitor_id)
    .fetch_optional(pool)
    .await
}

pub async fn create(
    pool: &PgPool,
    visitor_id: &str,
    category_id: Option<Uuid>,
) -> Result<ConversationRecord, sqlx::Error> {
    let record = sqlx::query_as::<_, ConversationRecord>(
        r#"
        INSERT INTO conversations (visitor_id, category_id)
        VALUES ($1, $2)
        RETURNING id, visitor_id, assigned_agent_id, archived
        "#,
    )
    .bind(visitor_id)
    .bind(category_id)
    .fetch_one(pool)
    .await?;

    tracing::info!(conversation_id = %record.id, "Conversation created");
    Ok(record)
}

pub async fn visitor_owns(
    pool: &PgPool,
    conversation_id: Uuid,
    visitor_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1 AND visitor_id = $2)",
    )
    .bind(conversation_id)
    .bind(visitor_id)
    .fetch_one(pool)
    .await
}

pub async fn exists(pool: &PgPool, conversation_id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1)")
        .bind(conversation_id)
        .fetch_one(pool)
        .await
}

/// Set or clear the assigned agent. Concurrent calls are last-write-wins.
pub async fn set_assignment(
    pool: &PgPool,
    conversation_id: Uuid,
    agent_id: Option<Uuid>,
) -> Result<Option<ConversationRecord>, sqlx::Error> {
    sqlx::query_as::<_, ConversationRecord>(
        r#"
        UPDATE conversations
        SET assigned_agent_id = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, visitor_id, assigned_agent_id, archived
        "#,
    )
    .bind(conversation_id)
    .bind(agent_id)
    .fetch_optional(pool)
    .await
}

/// Archive a conversation, stamping `archived_at` for retention
pub async fn archive(
    pool: &PgPool,
    conversation_id: Uuid,
) -> Result<Option<ConversationRecord>, sqlx::Error> {
    sqlx::query_as::<_, ConversationRecord>(
        r#"
        UPDATE conversations
        SET archived = TRUE,
            archived_at = COALESCE(archived_at, NOW()),
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, visitor_id, assigned_agent_id, archived
        "#,
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await
}

/// Record that the agent has seen the conversation up to `seen_at`
pub async fn mark_seen(
    pool: &PgPool,
    agent_id: Uuid,
    conversation_id: Uuid,
    seen_at: OffsetDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO agent_conversation_views (agent_id, conversation_id, last_seen_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (agent_id, conversation_id) DO UPDATE
        SET last_seen_at = GREATEST(agent_conversation_views.last_seen_at, EXCLUDED.last_seen_at)
        "#,
    )
    .bind(agent_id)
    .bind(conversation_id)
    .bind(seen_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_messages(
    pool: &PgPool,
    conversation_id: Uuid,
) -> Result<Vec<Message>, sqlx::Error> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, conversation_id, sender_kind, sender_id, content, metadata, created_at
        FROM messages
        WHERE conversation_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Message::from).collect())
}

/// Store a message and refresh the conversation summary in one transaction
pub async fn insert_message(pool: &PgPool, new: NewMessage) -> Result<Message, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO messages (conversation_id, sender_kind, sender_id, content, metadata)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, conversation_id, sender_kind, sender_id, content, metadata, created_at
        "#,
    )
    .bind(new.conversation_id)
    .bind(new.sender_kind)
    .bind(new.sender_id)
    .bind(&new.content)
    .bind(Json(&new.metadata))
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE conversations
        SET last_message = $2, last_message_at = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(new.conversation_id)
    .bind(summarize(&new.content))
    .bind(row.created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Message::from(row))
}

/// Record attribution and response time for an agent-sent message
pub async fn record_statistic(
    pool: &PgPool,
    message: &Message,
    agent_id: Uuid,
    attribution: &ResponseAttribution,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO message_statistics
            (message_id, conversation_id, agent_id, suggestion_type, suggestion_offered,
             response_time_ms, template_id, created_at)
        VALUES (
            $1, $2, $3, $4, $5,
            (SELECT (EXTRACT(EPOCH FROM ($6 - MAX(m.created_at))) * 1000)::BIGINT
             FROM messages m
             WHERE m.conversation_id = $2
               AND m.sender_kind = 'visitor'
               AND m.created_at <= $6),
            $7, $6
        )
        "#,
    )
    .bind(message.id)
    .bind(message.conversation_id)
    .bind(agent_id)
    .bind(attribution.suggestion_type.as_str())
    .bind(attribution.suggestion_offered)
    .bind(message.created_at)
    .bind(attribution.template_id)
    .execute(pool)
    .await?;
    Ok(())
}
