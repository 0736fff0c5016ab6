//! Persistence seam shared by the PostgreSQL and in-memory backends.
//!
//! Every conversation, message and post operation takes the requesting user's
//! id and filters on it inside the backend, so a row owned by someone else is
//! indistinguishable from a missing one.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::{
    ChatMessage, CommunityPost, Conversation, ConversationUpdate, NewConversation, NewPost,
    NewUser, StoredMessage, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write; carries the offending field.
    #[error("{0} is already taken")]
    Conflict(&'static str),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Returns false when the user does not exist.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool>;

    async fn create_conversation(
        &self,
        owner: Uuid,
        conversation: NewConversation,
    ) -> StoreResult<Conversation>;
    /// Newest first.
    async fn list_conversations(&self, owner: Uuid) -> StoreResult<Vec<Conversation>>;
    async fn get_conversation(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Conversation>>;
    async fn update_conversation(
        &self,
        owner: Uuid,
        id: Uuid,
        update: ConversationUpdate,
    ) -> StoreResult<Option<Conversation>>;
    /// Removes the conversation and its messages.
    async fn delete_conversation(&self, owner: Uuid, id: Uuid) -> StoreResult<bool>;
    /// Appends all messages atomically. `None` when the conversation is not the owner's.
    async fn append_messages(
        &self,
        owner: Uuid,
        conversation_id: Uuid,
        messages: Vec<ChatMessage>,
    ) -> StoreResult<Option<Vec<StoredMessage>>>;

    async fn create_post(&self, owner: Uuid, post: NewPost) -> StoreResult<CommunityPost>;
    /// Public posts, newest first.
    async fn list_public_posts(&self) -> StoreResult<Vec<CommunityPost>>;
    async fn list_posts_by_author(&self, owner: Uuid) -> StoreResult<Vec<CommunityPost>>;
    async fn delete_post(&self, owner: Uuid, id: Uuid) -> StoreResult<bool>;
}
