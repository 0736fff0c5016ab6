//! In-process store used when no `DATABASE_URL` is configured and in tests.
//!
//! Each operation takes the lock once, so multi-row writes are as atomic as
//! the PostgreSQL transactions they stand in for.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::database::models::{
    ChatMessage, CommunityPost, Conversation, ConversationUpdate, NewConversation, NewPost,
    NewUser, StoredMessage, User,
};
use crate::database::store::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    conversations: HashMap<Uuid, Conversation>,
    posts: HashMap<Uuid, CommunityPost>,
}

impl Tables {
    fn author_name(&self, user_id: Uuid) -> String {
        self.users
            .get(&user_id)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| "Anonymous".to_string())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn user_count(&self) -> usize {
        self.tables.read().users.len()
    }
}

fn to_stored(conversation_id: Uuid, messages: Vec<ChatMessage>) -> Vec<StoredMessage> {
    let now = Utc::now();
    messages
        .into_iter()
        .map(|m| StoredMessage {
            id: Uuid::new_v4(),
            conversation_id,
            role: m.role,
            content: m.content,
            created_at: now,
        })
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.write();
        if tables.users.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::Conflict("email"));
        }
        if tables.users.values().any(|u| u.name == new_user.name) {
            return Err(StoreError::Conflict("name"));
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        Ok(match tables.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn create_conversation(
        &self,
        owner: Uuid,
        conversation: NewConversation,
    ) -> StoreResult<Conversation> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let record = Conversation {
            id,
            user_id: owner,
            title: conversation.title,
            content: conversation.content,
            date: conversation.date,
            created_at: now,
            updated_at: now,
            messages: to_stored(id, conversation.messages),
        };
        self.tables.write().conversations.insert(id, record.clone());
        Ok(record)
    }

    async fn list_conversations(&self, owner: Uuid) -> StoreResult<Vec<Conversation>> {
        let mut list: Vec<Conversation> = self
            .tables
            .read()
            .conversations
            .values()
            .filter(|c| c.user_id == owner)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn get_conversation(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self
            .tables
            .read()
            .conversations
            .get(&id)
            .filter(|c| c.user_id == owner)
            .cloned())
    }

    async fn update_conversation(
        &self,
        owner: Uuid,
        id: Uuid,
        update: ConversationUpdate,
    ) -> StoreResult<Option<Conversation>> {
        let mut tables = self.tables.write();
        let Some(conversation) = tables.conversations.get_mut(&id).filter(|c| c.user_id == owner)
        else {
            return Ok(None);
        };
        if let Some(title) = update.title {
            conversation.title = title;
        }
        if let Some(content) = update.content {
            conversation.content = content;
        }
        if let Some(date) = update.date {
            conversation.date = date;
        }
        conversation.updated_at = Utc::now();
        Ok(Some(conversation.clone()))
    }

    async fn delete_conversation(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        let owned = tables.conversations.get(&id).is_some_and(|c| c.user_id == owner);
        if owned {
            tables.conversations.remove(&id);
        }
        Ok(owned)
    }

    async fn append_messages(
        &self,
        owner: Uuid,
        conversation_id: Uuid,
        messages: Vec<ChatMessage>,
    ) -> StoreResult<Option<Vec<StoredMessage>>> {
        let mut tables = self.tables.write();
        let Some(conversation) = tables
            .conversations
            .get_mut(&conversation_id)
            .filter(|c| c.user_id == owner)
        else {
            return Ok(None);
        };
        let stored = to_stored(conversation_id, messages);
        conversation.messages.extend(stored.iter().cloned());
        conversation.updated_at = Utc::now();
        Ok(Some(stored))
    }

    async fn create_post(&self, owner: Uuid, post: NewPost) -> StoreResult<CommunityPost> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let record = CommunityPost {
            id: Uuid::new_v4(),
            user_id: owner,
            author_name: tables.author_name(owner),
            title: post.title,
            content: post.content,
            is_public: post.is_public,
            source_type: post.source_type,
            source_id: post.source_id,
            created_at: now,
            updated_at: now,
        };
        tables.posts.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_public_posts(&self) -> StoreResult<Vec<CommunityPost>> {
        let mut posts: Vec<CommunityPost> = self
            .tables
            .read()
            .posts
            .values()
            .filter(|p| p.is_public)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn list_posts_by_author(&self, owner: Uuid) -> StoreResult<Vec<CommunityPost>> {
        let mut posts: Vec<CommunityPost> = self
            .tables
            .read()
            .posts
            .values()
            .filter(|p| p.user_id == owner)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn delete_post(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        let owned = tables.posts.get(&id).is_some_and(|p| p.user_id == owner);
        if owned {
            tables.posts.remove(&id);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Role, SourceType};

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    fn new_conversation() -> NewConversation {
        NewConversation {
            title: "Summer".to_string(),
            content: "By the lake".to_string(),
            date: "2024-07-01".to_string(),
            messages: vec![ChatMessage::new(Role::User, "I remember the lake")],
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_and_name_conflict() {
        let store = MemoryStore::new();
        store.create_user(new_user("alice", "alice@example.com")).await.unwrap();

        let err = store.create_user(new_user("alice2", "alice@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict("email")));
        let err = store.create_user(new_user("alice", "other@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict("name")));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_conversations_are_scoped_by_owner() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        let conversation = store.create_conversation(alice, new_conversation()).await.unwrap();

        assert!(store.get_conversation(mallory, conversation.id).await.unwrap().is_none());
        assert!(store.list_conversations(mallory).await.unwrap().is_empty());
        assert!(!store.delete_conversation(mallory, conversation.id).await.unwrap());
        assert!(store
            .update_conversation(mallory, conversation.id, ConversationUpdate::default())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .append_messages(mallory, conversation.id, vec![ChatMessage::new(Role::User, "x")])
            .await
            .unwrap()
            .is_none());

        let own = store.get_conversation(alice, conversation.id).await.unwrap().unwrap();
        assert_eq!(own.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let conversation = store.create_conversation(alice, new_conversation()).await.unwrap();

        store
            .append_messages(
                alice,
                conversation.id,
                vec![
                    ChatMessage::new(Role::User, "second"),
                    ChatMessage::new(Role::Assistant, "third"),
                ],
            )
            .await
            .unwrap()
            .unwrap();

        let contents: Vec<String> = store
            .get_conversation(alice, conversation.id)
            .await
            .unwrap()
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["I remember the lake", "second", "third"]);
    }

    #[tokio::test]
    async fn test_posts_visibility_and_author_delete() {
        let store = MemoryStore::new();
        let alice = store.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        let bob = Uuid::new_v4();

        let public = store
            .create_post(
                alice.id,
                NewPost {
                    title: "Hello".to_string(),
                    content: "World".to_string(),
                    is_public: true,
                    source_type: SourceType::Original,
                    source_id: None,
                },
            )
            .await
            .unwrap();
        store
            .create_post(
                alice.id,
                NewPost {
                    title: "Private".to_string(),
                    content: "Secret".to_string(),
                    is_public: false,
                    source_type: SourceType::Original,
                    source_id: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(public.author_name, "alice");
        assert_eq!(store.list_public_posts().await.unwrap().len(), 1);
        assert_eq!(store.list_posts_by_author(alice.id).await.unwrap().len(), 2);
        assert!(!store.delete_post(bob, public.id).await.unwrap());
        assert!(store.delete_post(alice.id, public.id).await.unwrap());
    }
}
