// Database Models
//
// Tokio-postgres compatible models for users, journal conversations and the
// community feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

/// Trait for converting from tokio-postgres Row
pub trait FromRow {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error>
    where
        Self: Sized;
}

// ============================================================================
// USER & AUTH MODELS
// ============================================================================

/// User account information
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl FromRow for User {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Public view of a user; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

// ============================================================================
// CONVERSATION MODELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One turn of a chat exchange, as sent to and received from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Persisted message belonging to a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl FromRow for StoredMessage {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            // The column is constrained by a CHECK; anything else is treated as user text.
            role: Role::parse(&role).unwrap_or(Role::User),
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Journal conversation owned by a single user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub date: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<StoredMessage>,
}

impl FromRow for Conversation {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            date: row.try_get("date")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            messages: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub title: String,
    pub content: String,
    pub date: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub date: Option<String>,
}

// ============================================================================
// COMMUNITY MODELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Original,
    Diary,
    System,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Original => "original",
            SourceType::Diary => "diary",
            SourceType::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "original" => Some(SourceType::Original),
            "diary" => Some(SourceType::Diary),
            "system" => Some(SourceType::System),
            _ => None,
        }
    }
}

/// Entry published to the shared community feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunityPost {
    pub id: Uuid,
    pub user_id: Uuid,
    pub author_name: String,
    pub title: String,
    pub content: String,
    pub is_public: bool,
    pub source_type: SourceType,
    pub source_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow for CommunityPost {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        let source_type: String = row.try_get("source_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            author_name: row
                .try_get::<_, Option<String>>("author_name")?
                .unwrap_or_else(|| "Anonymous".to_string()),
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            is_public: row.try_get("is_public")?,
            source_type: SourceType::parse(&source_type).unwrap_or_default(),
            source_id: row.try_get("source_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub is_public: bool,
    pub source_type: SourceType,
    pub source_id: Option<Uuid>,
}
