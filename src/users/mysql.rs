use std::time::Duration;

use async_trait::async_trait;
use sqlx::{FromRow, MySqlPool};
use time::OffsetDateTime;
use tracing::debug;

use crate::users::{
    repo::{with_timeout, StoreError, UserRepository},
    repo_types::{conflict_field, NewUser, User, UserId},
};

// Unique columns compare bytes exactly, like the in-memory and Mongo backends.
const CREATE_USERS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id            BIGINT       NOT NULL AUTO_INCREMENT,
        username      VARCHAR(50)  CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL,
        email         VARCHAR(100) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NULL,
        password_hash VARCHAR(255) NOT NULL,
        nickname      VARCHAR(50)  NULL,
        avatar        VARCHAR(255) NULL,
        status        SMALLINT     NOT NULL DEFAULT 1,
        created_at    TIMESTAMP(6) NOT NULL,
        updated_at    TIMESTAMP(6) NOT NULL,
        PRIMARY KEY (id),
        UNIQUE KEY uk_users_username (username),
        UNIQUE KEY uk_users_email (email)
    )
"#;

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    password_hash: String,
    nickname: Option<String>,
    avatar: Option<String>,
    status: i16,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            nickname: r.nickname,
            avatar: r.avatar,
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MySqlUserRepository {
    pool: MySqlPool,
    timeout: Duration,
}

impl MySqlUserRepository {
    pub fn new(pool: MySqlPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Create the `users` table if it is missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        with_timeout(self.timeout, async {
            sqlx::query(CREATE_USERS_TABLE)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl UserRepository for MySqlUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        with_timeout(self.timeout, async {
            let now = now_micros();
            let result = sqlx::query(
                r#"
                INSERT INTO users
                    (username, email, password_hash, nickname, avatar, status,
                     created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.nickname)
            .bind(&user.avatar)
            .bind(user.status)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

            let id = UserId::try_from(result.last_insert_id())
                .map_err(|e| StoreError::Corrupt(format!("insert id out of range: {e}")))?;
            debug!(user_id = id, "user row inserted");
            Ok(user.into_user(id, now))
        })
        .await
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        with_timeout(self.timeout, async {
            let row = sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, username, email, password_hash, nickname, avatar, status,
                       created_at, updated_at
                FROM users
                WHERE id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
            Ok(row.map(User::from))
        })
        .await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        with_timeout(self.timeout, async {
            let row = sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, username, email, password_hash, nickname, avatar, status,
                       created_at, updated_at
                FROM users
                WHERE username = ?
                "#,
            )
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
            Ok(row.map(User::from))
        })
        .await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        with_timeout(self.timeout, async {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
                .bind(username)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
            Ok(count > 0)
        })
        .await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        with_timeout(self.timeout, async {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
            Ok(count > 0)
        })
        .await
    }

    async fn update(&self, user: &User) -> Result<Option<User>, StoreError> {
        with_timeout(self.timeout, async {
            sqlx::query(
                r#"
                UPDATE users
                SET email = ?, password_hash = ?, nickname = ?, avatar = ?, status = ?,
                    updated_at = GREATEST(updated_at, ?)
                WHERE id = ?
                "#,
            )
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.nickname)
            .bind(&user.avatar)
            .bind(user.status)
            .bind(now_micros())
            .bind(user.id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

            // MySQL reports 0 affected rows for no-op updates, so re-read instead.
            let row = sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, username, email, password_hash, nickname, avatar, status,
                       created_at, updated_at
                FROM users
                WHERE id = ?
                "#,
            )
            .bind(user.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
            Ok(row.map(User::from))
        })
        .await
    }

    async fn delete(&self, id: UserId) -> Result<(), StoreError> {
        with_timeout(self.timeout, async {
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
            Ok(())
        })
        .await
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict {
                field: conflict_field(db.message()),
            };
        }
    }
    StoreError::Unavailable(e.to_string())
}

/// TIMESTAMP(6) keeps microseconds; truncate so returned values match stored ones.
fn now_micros() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}
