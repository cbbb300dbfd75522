use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::users::{
    repo::{StoreError, UserRepository},
    repo_types::{next_updated_at, NewUser, UniqueField, User, UserId},
};

#[derive(Debug)]
struct Inner {
    users: BTreeMap<UserId, User>,
    next_id: UserId,
}

impl Inner {
    /// Ids start at 1, so `except = 0` checks against every stored user.
    fn find_conflict(
        &self,
        username: Option<&str>,
        email: Option<&str>,
        except: UserId,
    ) -> Option<UniqueField> {
        let others = self.users.values().filter(|u| u.id != except);
        for u in others {
            if username.is_some() && Some(u.username.as_str()) == username {
                return Some(UniqueField::Username);
            }
            if email.is_some() && u.email.as_deref() == email {
                return Some(UniqueField::Email);
            }
        }
        None
    }
}

/// Map-backed repository used when no database is configured. Ids start at 1
/// and increase by one per created user.
#[derive(Debug)]
pub struct InMemoryUserRepository {
    inner: RwLock<Inner>,
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                users: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(field) = inner.find_conflict(Some(&user.username), user.email.as_deref(), 0)
        {
            return Err(StoreError::Conflict { field });
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let user = user.into_user(id, OffsetDateTime::now_utc());
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.username == username).cloned())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().any(|u| u.username == username))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .any(|u| u.email.as_deref() == Some(email)))
    }

    async fn update(&self, user: &User) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(field) = inner.find_conflict(None, user.email.as_deref(), user.id) {
            return Err(StoreError::Conflict { field });
        }
        let Some(stored) = inner.users.get_mut(&user.id) else {
            return Ok(None);
        };
        // id, username and created_at are fixed once assigned
        stored.email = user.email.clone();
        stored.password_hash = user.password_hash.clone();
        stored.nickname = user.nickname.clone();
        stored.avatar = user.avatar.clone();
        stored.status = user.status;
        stored.updated_at = next_updated_at(stored.updated_at);
        Ok(Some(stored.clone()))
    }

    async fn delete(&self, id: UserId) -> Result<(), StoreError> {
        self.inner.write().await.users.remove(&id);
        Ok(())
    }
}
