use std::{future::Future, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::users::repo_types::{NewUser, UniqueField, User, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage call exceeded {0:?}")]
    Timeout(Duration),
    #[error("unique constraint violated on {field}")]
    Conflict { field: UniqueField },
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Persistence for user records. Lookups return `None` instead of erroring
/// when the record is absent.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user, assigning its id and timestamps.
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError>;

    /// Write the mutable fields of `user` and refresh `updated_at`.
    /// Returns `None` when no record with `user.id` exists.
    async fn update(&self, user: &User) -> Result<Option<User>, StoreError>;

    /// Remove a user. Deleting an absent id is not an error.
    async fn delete(&self, id: UserId) -> Result<(), StoreError>;
}

/// Bound a single storage call by the request-scoped deadline.
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
