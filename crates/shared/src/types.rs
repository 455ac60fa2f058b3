//! Common types used across the helpdesk platform

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::HelpdeskError;

// =============================================================================
// Enums
// =============================================================================

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Visitor,
    Agent,
    Ai,
    System,
}

impl std::fmt::Display for SenderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Visitor => write!(f, "visitor"),
            Self::Agent => write!(f, "agent"),
            Self::Ai => write!(f, "ai"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Staff role. Visitors are not users and have no role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Agent,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "agent" => Ok(Self::Agent),
            _ => Err(HelpdeskError::InvalidValue {
                field: "role",
                value: s.to_string(),
            }),
        }
    }
}

/// How AI replies are handled for incoming visitor messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    /// No AI involvement
    #[default]
    Off,
    /// Human-in-the-loop: AI drafts a suggestion, an agent reviews and sends
    Hitl,
    /// AI replies are sent automatically
    Autopilot,
}

impl AiMode {
    pub fn is_hitl(&self) -> bool {
        matches!(self, Self::Hitl)
    }
}

impl std::str::FromStr for AiMode {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "" => Ok(Self::Off),
            "hitl" => Ok(Self::Hitl),
            "autopilot" => Ok(Self::Autopilot),
            _ => Err(HelpdeskError::InvalidValue {
                field: "ai_mode",
                value: s.to_string(),
            }),
        }
    }
}

/// How an agent's reply relates to the AI suggestion that was on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuggestionType {
    /// Suggestion sent verbatim
    #[serde(rename = "as-is")]
    AsIs,
    /// Suggestion edited before sending
    #[serde(rename = "edited")]
    Edited,
    /// Suggestion discarded (or never used), reply written by the agent
    #[serde(rename = "from-scratch")]
    FromScratch,
}

impl SuggestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AsIs => "as-is",
            Self::Edited => "edited",
            Self::FromScratch => "from-scratch",
        }
    }
}

impl std::str::FromStr for SuggestionType {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "as-is" => Ok(Self::AsIs),
            "edited" => Ok(Self::Edited),
            "from-scratch" => Ok(Self::FromScratch),
            _ => Err(HelpdeskError::InvalidValue {
                field: "suggestion_type",
                value: s.to_string(),
            }),
        }
    }
}

/// Agent availability shown on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Away,
    Offline,
}

// =============================================================================
// Message metadata
// =============================================================================

/// Attribution attached to agent replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseAttribution {
    pub suggestion_type: SuggestionType,
    /// Whether an AI suggestion was on screen when the reply was sent
    #[serde(default)]
    pub suggestion_offered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
}

/// JSON metadata stored alongside each message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// The visitor is waiting on a human reply
    #[serde(default)]
    pub pending_agent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_attribution: Option<ResponseAttribution>,
}

impl MessageMetadata {
    pub fn pending_agent() -> Self {
        Self {
            pending_agent: true,
            response_attribution: None,
        }
    }

    pub fn attributed(attribution: ResponseAttribution) -> Self {
        Self {
            pending_agent: false,
            response_attribution: Some(attribution),
        }
    }
}

// =============================================================================
// Conversations and messages
// =============================================================================

/// Conversation as listed on the agent dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub visitor_id: String,
    pub assigned_agent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_name: Option<String>,
    pub archived: bool,
    pub last_message: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    /// Last message carries the pending-agent flag
    #[serde(default)]
    pub needs_response: bool,
    /// Server-computed unseen flag for the requesting agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_unseen: Option<bool>,
    pub category_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    /// Most recent activity, used for queue ordering
    pub fn activity_at(&self) -> OffsetDateTime {
        self.last_message_at.unwrap_or(self.updated_at)
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_kind: SenderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// AI draft waiting for agent review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSuggestion {
    pub conversation_id: Uuid,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

// =============================================================================
// Password expiry
// =============================================================================

/// Days-remaining boundaries for the warning tiers
pub const NOTICE_THRESHOLD_DAYS: i64 = 30;
pub const INFO_THRESHOLD_DAYS: i64 = 14;
pub const WARNING_THRESHOLD_DAYS: i64 = 7;
pub const CRITICAL_THRESHOLD_DAYS: i64 = 3;

/// Password expiry warning tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordWarningLevel {
    None,
    Notice,
    Info,
    Warning,
    Critical,
    Expired,
}

impl PasswordWarningLevel {
    /// Map days remaining until expiry to a warning tier
    pub fn from_days_remaining(days_remaining: i64) -> Self {
        match days_remaining {
            d if d <= 0 => Self::Expired,
            d if d <= CRITICAL_THRESHOLD_DAYS => Self::Critical,
            d if d <= WARNING_THRESHOLD_DAYS => Self::Warning,
            d if d <= INFO_THRESHOLD_DAYS => Self::Info,
            d if d <= NOTICE_THRESHOLD_DAYS => Self::Notice,
            _ => Self::None,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// Password status returned at login and by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordStatus {
    /// Whether the account's role is subject to expiry at all
    pub enforced: bool,
    pub days_remaining: Option<i64>,
    pub level: PasswordWarningLevel,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// Account may only reach status, change-password and logout
    pub blocked: bool,
}

// =============================================================================
// Response envelope
// =============================================================================

/// `{ success, data?, error? }` wrapper used by every REST endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(self.error.unwrap_or_else(|| "Unknown error".to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_level_boundaries() {
        use PasswordWarningLevel::*;
        assert_eq!(PasswordWarningLevel::from_days_remaining(-5), Expired);
        assert_eq!(PasswordWarningLevel::from_days_remaining(0), Expired);
        assert_eq!(PasswordWarningLevel::from_days_remaining(1), Critical);
        assert_eq!(PasswordWarningLevel::from_days_remaining(3), Critical);
        assert_eq!(PasswordWarningLevel::from_days_remaining(4), Warning);
        assert_eq!(PasswordWarningLevel::from_days_remaining(7), Warning);
        assert_eq!(PasswordWarningLevel::from_days_remaining(8), Info);
        assert_eq!(PasswordWarningLevel::from_days_remaining(14), Info);
        assert_eq!(PasswordWarningLevel::from_days_remaining(15), Notice);
        assert_eq!(PasswordWarningLevel::from_days_remaining(30), Notice);
        assert_eq!(PasswordWarningLevel::from_days_remaining(31), None);
        assert_eq!(PasswordWarningLevel::from_days_remaining(365), None);
    }

    #[test]
    fn test_warning_level_is_monotonic() {
        let mut previous = PasswordWarningLevel::from_days_remaining(-1);
        for days in 0..60 {
            let level = PasswordWarningLevel::from_days_remaining(days);
            assert!(level <= previous, "level rose at {} days", days);
            previous = level;
        }
    }

    #[test]
    fn test_suggestion_type_serialization() {
        assert_eq!(
            serde_json::to_string(&SuggestionType::AsIs).unwrap(),
            r#""as-is""#
        );
        assert_eq!(
            serde_json::to_string(&SuggestionType::FromScratch).unwrap(),
            r#""from-scratch""#
        );
        let parsed: SuggestionType = "edited".parse().unwrap();
        assert_eq!(parsed, SuggestionType::Edited);
        assert!("as_is".parse::<SuggestionType>().is_err());
    }

    #[test]
    fn test_metadata_defaults_when_missing() {
        let meta: MessageMetadata = serde_json::from_str("{}").unwrap();
        assert!(!meta.pending_agent);
        assert!(meta.response_attribution.is_none());

        let meta: MessageMetadata = serde_json::from_str(
            r#"{"pending_agent":false,"response_attribution":{"suggestion_type":"edited","suggestion_offered":true}}"#,
        )
        .unwrap();
        assert_eq!(
            meta.response_attribution.unwrap().suggestion_type,
            SuggestionType::Edited
        );
    }

    #[test]
    fn test_ai_mode_parse() {
        assert_eq!("HITL".parse::<AiMode>().unwrap(), AiMode::Hitl);
        assert_eq!("".parse::<AiMode>().unwrap(), AiMode::Off);
        assert!("sometimes".parse::<AiMode>().is_err());
    }

    #[test]
    fn test_envelope_into_result() {
        let ok: ApiEnvelope<u32> = serde_json::from_str(r#"{"success":true,"data":7}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), 7);

        let err: ApiEnvelope<u32> =
            serde_json::from_str(r#"{"success":false,"error":"Nope"}"#).unwrap();
        assert_eq!(err.into_result().unwrap_err(), "Nope");
    }
}
