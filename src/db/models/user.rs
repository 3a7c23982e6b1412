//! User and session models.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{now_timestamp, timestamp};
use crate::config::MAX_DURATION_SECONDS;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

fn session_lifetime(ttl_seconds: u64) -> Duration {
    Duration::seconds(ttl_seconds.min(MAX_DURATION_SECONDS) as i64)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub profile_picture: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            profile_picture: user.profile_picture,
        }
    }
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub async fn create(
        db: &SqlitePool,
        email: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
        role: &str,
    ) -> Result<User, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(email.trim().to_lowercase())
        .bind(password_hash)
        .bind(first_name)
        .bind(last_name)
        .bind(role)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        User::get_by_id(db, &id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_by_id(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn get_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(db)
            .await
    }

    pub async fn count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(db)
            .await?;
        Ok(count)
    }

    pub async fn set_picture(
        db: &SqlitePool,
        id: &str,
        file_name: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET profile_picture = ?, updated_at = ? WHERE id = ?")
            .bind(file_name)
            .bind(now_timestamp())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub ip_address: Option<String>,
    pub expires_at: String,
    pub created_at: String,
}

impl Session {
    pub async fn create(
        db: &SqlitePool,
        user_id: &str,
        token_hash: &str,
        ip_address: Option<&str>,
        ttl_seconds: u64,
    ) -> Result<Session, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + session_lifetime(ttl_seconds);

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, token_hash, ip_address, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(token_hash)
        .bind(ip_address)
        .bind(timestamp(expires_at))
        .bind(timestamp(now))
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    /// Session and owner for an unexpired token hash.
    pub async fn find_valid(
        db: &SqlitePool,
        token_hash: &str,
    ) -> Result<Option<(Session, User)>, sqlx::Error> {
        let session: Option<Session> =
            sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
                .bind(token_hash)
                .bind(now_timestamp())
                .fetch_optional(db)
                .await?;

        let Some(session) = session else {
            return Ok(None);
        };
        let user = User::get_by_id(db, &session.user_id).await?;
        Ok(user.map(|user| (session, user)))
    }

    /// Push the expiry out to `ttl_seconds` from now.
    pub async fn extend(db: &SqlitePool, id: &str, ttl_seconds: u64) -> Result<String, sqlx::Error> {
        let expires_at = timestamp(Utc::now() + session_lifetime(ttl_seconds));
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
            .bind(&expires_at)
            .bind(id)
            .execute(db)
            .await?;
        Ok(expires_at)
    }

    pub async fn delete(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_expired(db: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now_timestamp())
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserResponse,
}
