//! Storage accounts.
//!
//! Users are owned by an external identity system; silo only keeps the
//! username (for share-target listings) and the quota fields.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::{Result, SiloError};

/// An already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
}

impl Principal {
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// A storage account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    /// Unique user ID.
    pub id: i64,
    /// Username.
    pub username: String,
    /// Storage ceiling in bytes.
    pub max_storage_bytes: i64,
    /// Bytes currently used.
    pub bytes_in_storage: i64,
    /// When the account was provisioned.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Principal for this account.
    pub fn principal(&self) -> Principal {
        Principal::new(self.id, self.username.clone())
    }
}

/// Public projection of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UserReference {
    pub id: i64,
    pub username: String,
}

impl From<&User> for UserReference {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

/// Repository for storage accounts.
pub struct UserRepository;

impl UserRepository {
    /// Create a new account with the given quota.
    pub async fn create(
        conn: &mut SqliteConnection,
        username: &str,
        max_storage_bytes: i64,
    ) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SiloError::FileManagement(
                "a username is required".to_string(),
            ));
        }
        if max_storage_bytes < 0 {
            return Err(SiloError::Storage(
                "max storage space can not be negative".to_string(),
            ));
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, max_storage_bytes, bytes_in_storage, created_at)
             VALUES (?, ?, 0, ?) RETURNING id",
        )
        .bind(username)
        .bind(max_storage_bytes)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await?;

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| SiloError::NotFound("user".to_string()))
    }

    /// Get a user by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, max_storage_bytes, bytes_in_storage, created_at
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(user)
    }

    /// Get a user by username.
    pub async fn get_by_username(
        conn: &mut SqliteConnection,
        username: &str,
    ) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, max_storage_bytes, bytes_in_storage, created_at
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(user)
    }

    /// Resolve a principal to its account.
    ///
    /// The id/username pairing supplied by the caller must match.
    pub async fn find_principal(
        conn: &mut SqliteConnection,
        principal: &Principal,
    ) -> Result<User> {
        match Self::get_by_id(conn, principal.user_id).await? {
            Some(user) if user.username == principal.username => Ok(user),
            _ => Err(SiloError::NotFound("user".to_string())),
        }
    }

    /// Users whose name contains `fragment`, as candidates for sharing a chunk.
    ///
    /// The fragment is reduced to `[A-Za-z0-9_]` first; nothing left means no
    /// candidates. The requester and users the chunk is already shared with
    /// are left out.
    pub async fn query_for_sharing(
        conn: &mut SqliteConnection,
        fragment: &str,
        exclude_user_id: i64,
        chunk_id: i64,
    ) -> Result<Vec<UserReference>> {
        let fragment: String = fragment
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if fragment.is_empty() {
            return Ok(Vec::new());
        }

        // `_` is a LIKE wildcard
        let pattern = format!("%{}%", fragment.replace('_', "\\_"));

        let users = sqlx::query_as::<_, UserReference>(
            "SELECT u.id, u.username FROM users u
             WHERE u.username LIKE ? ESCAPE '\\'
               AND u.id <> ?
               AND NOT EXISTS (
                   SELECT 1 FROM chunk_shares s WHERE s.chunk_id = ? AND s.user_id = u.id
               )
             ORDER BY u.username ASC",
        )
        .bind(pattern)
        .bind(exclude_user_id)
        .bind(chunk_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(users)
    }
}
