use std::sync::Arc;

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::password::{HashError, PasswordHasher},
    users::{
        repo::{StoreError, UserRepository},
        repo_types::{NewUser, UniqueField, User, UserId},
    },
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("username already exists")]
    DuplicateUsername,
    #[error("email already in use")]
    DuplicateEmail,
    #[error("user not found")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict {
                field: UniqueField::Username,
            } => ServiceError::DuplicateUsername,
            StoreError::Conflict {
                field: UniqueField::Email,
            } => ServiceError::DuplicateEmail,
            other => ServiceError::Store(other),
        }
    }
}

/// Registration input; `password` is plaintext until the service hashes it.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub nickname: Option<String>,
    pub status: i16,
}

/// Profile fields a user may change. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

// Verified against when the username is unknown, so both login paths pay one hash.
const DUMMY_PASSWORD: &str = "userhub-dummy-password";

pub struct UserService {
    repo: Arc<dyn UserRepository>,
    hasher: Arc<dyn PasswordHasher>,
    dummy_digest: OnceCell<String>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            repo,
            hasher,
            dummy_digest: OnceCell::new(),
        }
    }

    /// Uniqueness checks run before hashing so rejected requests cost no hash.
    #[instrument(skip(self, reg), fields(username = %reg.username))]
    pub async fn register(&self, reg: Registration) -> Result<User, ServiceError> {
        if self.repo.exists_by_username(&reg.username).await? {
            warn!("username already registered");
            return Err(ServiceError::DuplicateUsername);
        }
        if let Some(email) = reg.email.as_deref() {
            if self.repo.exists_by_email(email).await? {
                warn!("email already registered");
                return Err(ServiceError::DuplicateEmail);
            }
        }

        let password_hash = self.hash(reg.password).await?;
        let user = self
            .repo
            .create(NewUser {
                username: reg.username,
                email: reg.email,
                password_hash,
                nickname: reg.nickname,
                avatar: None,
                status: reg.status,
            })
            .await?;

        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        let Some(user) = self.repo.get_by_username(username).await? else {
            self.verify_dummy(password).await;
            return Err(ServiceError::NotFound);
        };

        if !self.verify(user.password_hash.clone(), password.to_owned()).await? {
            warn!(user_id = user.id, "password mismatch");
            return Err(ServiceError::InvalidCredentials);
        }
        if !user.is_active() {
            warn!(user_id = user.id, status = user.status, "login by inactive user");
            return Err(ServiceError::InvalidCredentials);
        }
        debug!(user_id = user.id, "credentials verified");
        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: UserId) -> Result<User, ServiceError> {
        self.repo.get_by_id(id).await?.ok_or(ServiceError::NotFound)
    }

    /// Persist `user` as given; uniqueness is left to the storage layer.
    pub async fn update_user(&self, user: &User) -> Result<User, ServiceError> {
        self.repo.update(user).await?.ok_or(ServiceError::NotFound)
    }

    /// Apply the supplied profile fields, re-checking email uniqueness when
    /// the address actually changes.
    #[instrument(skip(self, changes))]
    pub async fn update_profile(
        &self,
        id: UserId,
        changes: ProfileChanges,
    ) -> Result<User, ServiceError> {
        let mut user = self.get_user_by_id(id).await?;

        if let Some(email) = changes.email {
            if user.email.as_deref() != Some(email.as_str()) {
                if self.repo.exists_by_email(&email).await? {
                    warn!(user_id = id, "email already registered");
                    return Err(ServiceError::DuplicateEmail);
                }
                user.email = Some(email);
            }
        }
        if let Some(nickname) = changes.nickname {
            user.nickname = Some(nickname);
        }
        if let Some(avatar) = changes.avatar {
            user.avatar = Some(avatar);
        }

        let updated = self.update_user(&user).await?;
        info!(user_id = id, "profile updated");
        Ok(updated)
    }

    // Argon2 is CPU-bound; keep it off the async workers.
    async fn hash(&self, password: String) -> Result<String, HashError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| HashError::Internal(e.to_string()))?
    }

    async fn verify(&self, digest: String, password: String) -> Result<bool, HashError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&digest, &password))
            .await
            .map_err(|e| HashError::Internal(e.to_string()))?
    }

    async fn verify_dummy(&self, password: &str) {
        let digest = self
            .dummy_digest
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD.to_owned()))
            .await;
        match digest {
            Ok(digest) => {
                if let Err(e) = self.verify(digest.clone(), password.to_owned()).await {
                    debug!(error = %e, "dummy verification failed");
                }
            }
            Err(e) => debug!(error = %e, "dummy digest unavailable"),
        }
    }
}
