//! Reporting endpoints

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use helpdesk_shared::ApiEnvelope;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

const DEFAULT_WINDOW_DAYS: i64 = 30;
const MAX_WINDOW_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub days: Option<i64>,
}

impl WindowQuery {
    fn days(&self) -> i64 {
        self.days
            .unwrap_or(DEFAULT_WINDOW_DAYS)
            .clamp(1, MAX_WINDOW_DAYS)
    }

    fn since(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc() - Duration::days(self.days())
    }
}

#[derive(Debug, Serialize, FromRow)]
pub struct DashboardStats {
    pub total_conversations: i64,
    pub open_conversations: i64,
    pub archived_conversations: i64,
    pub unassigned_conversations: i64,
    pub messages_in_window: i64,
    pub avg_response_time_ms: Option<f64>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ApiEnvelope<DashboardStats>>> {
    let stats = sqlx::query_as::<_, DashboardStats>(
        r#"
        SELECT
            COUNT(*) AS total_conversations,
            COUNT(*) FILTER (WHERE NOT c.archived) AS open_conversations,
            COUNT(*) FILTER (WHERE c.archived) AS archived_conversations,
            COUNT(*) FILTER (WHERE NOT c.archived AND c.assigned_agent_id IS NULL)
                AS unassigned_conversations,
            (SELECT COUNT(*) FROM messages m WHERE m.created_at >= $1) AS messages_in_window,
            (SELECT AVG(s.response_time_ms)::FLOAT8 FROM message_statistics s
             WHERE s.created_at >= $1) AS avg_response_time_ms
        FROM conversations c
        "#,
    )
    .bind(query.since())
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiEnvelope::ok(stats)))
}

#[derive(Debug, Serialize, FromRow)]
pub struct AgentStats {
    pub agent_id: Uuid,
    pub name: String,
    pub messages_sent: i64,
    pub avg_response_time_ms: Option<f64>,
    pub open_assigned: i64,
}

pub async fn agents(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ApiEnvelope<Vec<AgentStats>>>> {
    let rows = sqlx::query_as::<_, AgentStats>(
        r#"
        SELECT u.id AS agent_id, u.name,
               COUNT(s.message_id) AS messages_sent,
               AVG(s.response_time_ms)::FLOAT8 AS avg_response_time_ms,
               (SELECT COUNT(*) FROM conversations c
                WHERE c.assigned_agent_id = u.id AND NOT c.archived) AS open_assigned
        FROM users u
        LEFT JOIN message_statistics s ON s.agent_id = u.id AND s.created_at >= $1
        WHERE u.is_active
        GROUP BY u.id, u.name
        ORDER BY messages_sent DESC, u.name ASC
        "#,
    )
    .bind(query.since())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiEnvelope::ok(rows)))
}

#[derive(Debug, Serialize, FromRow)]
pub struct DailyConversations {
    pub day: String,
    pub created: i64,
    pub archived: i64,
}

pub async fn conversations(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ApiEnvelope<Vec<DailyConversations>>>> {
    let rows = sqlx::query_as::<_, DailyConversations>(
        r#"
        SELECT to_char(date_trunc('day', created_at), 'YYYY-MM-DD') AS day,
               COUNT(*) AS created,
               COUNT(*) FILTER (WHERE archived) AS archived
        FROM conversations
        WHERE created_at >= $1
        GROUP BY 1
        ORDER BY 1 ASC
        "#,
    )
    .bind(query.since())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiEnvelope::ok(rows)))
}

#[derive(Debug, Serialize, FromRow)]
pub struct TemplateUsage {
    pub template_id: Uuid,
    pub title: String,
    pub uses: i64,
}

pub async fn templates(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ApiEnvelope<Vec<TemplateUsage>>>> {
    let rows = sqlx::query_as::<_, TemplateUsage>(
        r#"
        SELECT t.id AS template_id, t.title, COUNT(s.message_id) AS uses
        FROM templates t
        LEFT JOIN message_statistics s ON s.template_id = t.id AND s.created_at >= $1
        GROUP BY t.id, t.title
        ORDER BY uses DESC, t.title ASC
        "#,
    )
    .bind(query.since())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiEnvelope::ok(rows)))
}

/// Raw attribution counts
#[derive(Debug, Clone, Copy, Default, FromRow)]
pub struct SuggestionCounts {
    pub as_is: i64,
    pub edited: i64,
    pub from_scratch: i64,
    /// From-scratch replies sent while a suggestion was on screen
    pub from_scratch_offered: i64,
}

#[derive(Debug, Serialize)]
pub struct SuggestionStats {
    pub as_is: i64,
    pub edited: i64,
    pub from_scratch: i64,
    pub from_scratch_offered: i64,
    /// Share of offered suggestions that were used; `None` with nothing offered
    pub acceptance_rate: Option<f64>,
}

impl From<SuggestionCounts> for SuggestionStats {
    fn from(c: SuggestionCounts) -> Self {
        let accepted = c.as_is + c.edited;
        let offered = accepted + c.from_scratch_offered;
        Self {
            as_is: c.as_is,
            edited: c.edited,
            from_scratch: c.from_scratch,
            from_scratch_offered: c.from_scratch_offered,
            acceptance_rate: (offered > 0).then(|| accepted as f64 / offered as f64),
        }
    }
}

pub async fn ai_suggestions(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ApiEnvelope<SuggestionStats>>> {
    let counts = sqlx::query_as::<_, SuggestionCounts>(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE suggestion_type = 'as-is') AS as_is,
            COUNT(*) FILTER (WHERE suggestion_type = 'edited') AS edited,
            COUNT(*) FILTER (WHERE suggestion_type = 'from-scratch') AS from_scratch,
            COUNT(*) FILTER (WHERE suggestion_type = 'from-scratch' AND suggestion_offered)
                AS from_scratch_offered
        FROM message_statistics
        WHERE created_at >= $1
        "#,
    )
    .bind(query.since())
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiEnvelope::ok(SuggestionStats::from(counts))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_clamped() {
        assert_eq!(WindowQuery { days: None }.days(), DEFAULT_WINDOW_DAYS);
        assert_eq!(WindowQuery { days: Some(0) }.days(), 1);
        assert_eq!(WindowQuery { days: Some(10_000) }.days(), MAX_WINDOW_DAYS);
    }

    #[test]
    fn test_unoffered_from_scratch_not_in_denominator() {
        let stats = SuggestionStats::from(SuggestionCounts {
            as_is: 3,
            edited: 1,
            from_scratch: 10,
            from_scratch_offered: 4,
        });
        assert_eq!(stats.acceptance_rate, Some(0.5));
        assert_eq!(stats.from_scratch, 10);
    }

    #[test]
    fn test_no_offers_has_no_rate() {
        let stats = SuggestionStats::from(SuggestionCounts {
            from_scratch: 5,
            ..Default::default()
        });
        assert_eq!(stats.acceptance_rate, None);
    }
}
