use std::time::Duration;

use async_trait::async_trait;
use mongodb::{
    bson::{doc, Bson, DateTime as BsonDateTime, Document},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::users::{
    repo::{with_timeout, StoreError, UserRepository},
    repo_types::{conflict_field, NewUser, User, UserId, EMAIL_KEY, USERNAME_KEY},
};

const DUPLICATE_KEY: i32 = 11000;
const USERS: &str = "users";
const COUNTERS: &str = "counters";

/// Stored shape of a user. The driver-generated `_id` is ignored; `id` is
/// allocated from the `counters` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    id: i64,
    username: String,
    #[serde(default)]
    email: Option<String>,
    password_hash: String,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    status: i32,
    created_at: BsonDateTime,
    updated_at: BsonDateTime,
}

impl UserDocument {
    fn from_user(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            password_hash: u.password_hash.clone(),
            nickname: u.nickname.clone(),
            avatar: u.avatar.clone(),
            status: i32::from(u.status),
            created_at: to_bson_time(u.created_at),
            updated_at: to_bson_time(u.updated_at),
        }
    }

    fn into_user(self) -> Result<User, StoreError> {
        let status = i16::try_from(self.status)
            .map_err(|_| StoreError::Corrupt(format!("status {} out of range", self.status)))?;
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            nickname: self.nickname,
            avatar: self.avatar,
            status,
            created_at: from_bson_time(self.created_at)?,
            updated_at: from_bson_time(self.updated_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MongoUserRepository {
    users: Collection<UserDocument>,
    counters: Collection<Document>,
    timeout: Duration,
}

impl MongoUserRepository {
    pub fn new(db: &Database, timeout: Duration) -> Self {
        Self {
            users: db.collection(USERS),
            counters: db.collection(COUNTERS),
            timeout,
        }
    }

    /// Create the unique indexes backing id, username and email uniqueness.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = |keys: Document, name: &str| {
            IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name(name.to_string())
                        .build(),
                )
                .build()
        };
        let email = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name(EMAIL_KEY.to_string())
                    // users without an email are left out of the index
                    .partial_filter_expression(doc! { "email": { "$type": "string" } })
                    .build(),
            )
            .build();

        with_timeout(self.timeout, async {
            self.users
                .create_indexes(vec![
                    unique(doc! { "id": 1 }, "uk_users_id"),
                    unique(doc! { "username": 1 }, USERNAME_KEY),
                    email,
                ])
                .await
                .map_err(map_mongo)?;
            Ok(())
        })
        .await
    }

    async fn next_id(&self) -> Result<UserId, StoreError> {
        let counter = self
            .counters
            .find_one_and_update(doc! { "_id": USERS }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(map_mongo)?
            .ok_or_else(|| StoreError::Corrupt("user id counter missing".into()))?;
        counter
            .get_i64("seq")
            .map_err(|e| StoreError::Corrupt(format!("user id counter: {e}")))
    }
}

#[async_trait]
impl UserRepository for MongoUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        with_timeout(self.timeout, async {
            let id = self.next_id().await?;
            let user = user.into_user(id, now_millis());
            self.users
                .insert_one(UserDocument::from_user(&user))
                .await
                .map_err(map_mongo)?;
            debug!(user_id = id, "user document inserted");
            Ok(user)
        })
        .await
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        with_timeout(self.timeout, async {
            self.users
                .find_one(doc! { "id": id })
                .await
                .map_err(map_mongo)?
                .map(UserDocument::into_user)
                .transpose()
        })
        .await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        with_timeout(self.timeout, async {
            self.users
                .find_one(doc! { "username": username })
                .await
                .map_err(map_mongo)?
                .map(UserDocument::into_user)
                .transpose()
        })
        .await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        with_timeout(self.timeout, async {
            let count = self
                .users
                .count_documents(doc! { "username": username })
                .await
                .map_err(map_mongo)?;
            Ok(count > 0)
        })
        .await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        with_timeout(self.timeout, async {
            let count = self
                .users
                .count_documents(doc! { "email": email })
                .await
                .map_err(map_mongo)?;
            Ok(count > 0)
        })
        .await
    }

    async fn update(&self, user: &User) -> Result<Option<User>, StoreError> {
        let changes = doc! {
            "$set": {
                "email": user.email.clone().map_or(Bson::Null, Bson::String),
                "password_hash": user.password_hash.as_str(),
                "nickname": user.nickname.clone().map_or(Bson::Null, Bson::String),
                "avatar": user.avatar.clone().map_or(Bson::Null, Bson::String),
                "status": i32::from(user.status),
            },
            // keeps updated_at monotonic
            "$max": { "updated_at": to_bson_time(now_millis()) },
        };
        with_timeout(self.timeout, async {
            self.users
                .find_one_and_update(doc! { "id": user.id }, changes)
                .return_document(ReturnDocument::After)
                .await
                .map_err(map_mongo)?
                .map(UserDocument::into_user)
                .transpose()
        })
        .await
    }

    async fn delete(&self, id: UserId) -> Result<(), StoreError> {
        with_timeout(self.timeout, async {
            self.users
                .delete_one(doc! { "id": id })
                .await
                .map_err(map_mongo)?;
            Ok(())
        })
        .await
    }
}

fn map_mongo(e: MongoError) -> StoreError {
    let duplicate = match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY => {
            Some(we.message.as_str())
        }
        ErrorKind::Command(ce) if ce.code == DUPLICATE_KEY => Some(ce.message.as_str()),
        _ => None,
    };
    match duplicate {
        Some(message) => StoreError::Conflict {
            field: conflict_field(message),
        },
        None => StoreError::Unavailable(e.to_string()),
    }
}

/// BSON datetimes carry milliseconds only.
fn now_millis() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(now)
}

fn to_bson_time(t: OffsetDateTime) -> BsonDateTime {
    let millis = t.unix_timestamp_nanos() / 1_000_000;
    BsonDateTime::from_millis(i64::try_from(millis).unwrap_or(i64::MAX))
}

fn from_bson_time(t: BsonDateTime) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(t.timestamp_millis()) * 1_000_000)
        .map_err(|e| StoreError::Corrupt(format!("timestamp out of range: {e}")))
}
