use serde::Serialize;
use time::OffsetDateTime;

pub type UserId = i64;

pub const STATUS_ACTIVE: i16 = 1;
#[cfg(test)]
pub const STATUS_DISABLED: i16 = 0;

/// User record as persisted by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string, not exposed in JSON
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub status: i16,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// A user before the repository has assigned an id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub status: i16,
}

impl NewUser {
    pub fn into_user(self, id: UserId, now: OffsetDateTime) -> User {
        User {
            id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            nickname: self.nickname,
            avatar: self.avatar,
            status: self.status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Column carrying a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueField::Username => f.write_str("username"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

/// Unique index names shared by the MySQL table and the Mongo collection.
pub(crate) const USERNAME_KEY: &str = "uk_users_username";
pub(crate) const EMAIL_KEY: &str = "uk_users_email";

/// Pick the violated column out of a driver's duplicate-key message.
pub(crate) fn conflict_field(message: &str) -> UniqueField {
    if message.contains(EMAIL_KEY) {
        UniqueField::Email
    } else {
        UniqueField::Username
    }
}

/// `updated_at` never moves backwards, even if the wall clock does.
pub(crate) fn next_updated_at(previous: OffsetDateTime) -> OffsetDateTime {
    OffsetDateTime::now_utc().max(previous)
}
