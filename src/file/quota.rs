//! Per-user storage quota accounting.
//!
//! All updates are single conditional UPDATE statements, so concurrent
//! uploads and deletions for one account never race past the ceiling.

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::UserRepository;
use crate::{Result, SiloError};

/// Snapshot of an account's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub bytes_in_storage: i64,
    pub max_storage_bytes: i64,
    pub available_bytes: i64,
}

/// Atomic quota updates against the `users` table.
pub struct QuotaTracker;

impl QuotaTracker {
    /// Reserve `delta` bytes for a user.
    ///
    /// Fails with a Storage error when the reservation would exceed the
    /// user's maximum.
    pub async fn increase(conn: &mut SqliteConnection, user_id: i64, delta: i64) -> Result<()> {
        if delta < 0 {
            return Err(SiloError::Processing(
                "storage increase can not be negative".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE users SET bytes_in_storage = bytes_in_storage + ?
             WHERE id = ? AND bytes_in_storage + ? <= max_storage_bytes",
        )
        .bind(delta)
        .bind(user_id)
        .bind(delta)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            if UserRepository::get_by_id(conn, user_id).await?.is_none() {
                return Err(SiloError::NotFound("user".to_string()));
            }
            return Err(SiloError::Storage(
                "not enough free storage space".to_string(),
            ));
        }

        Ok(())
    }

    /// Release `delta` bytes. Usage floors at zero; a negative delta is a no-op.
    pub async fn decrease(conn: &mut SqliteConnection, user_id: i64, delta: i64) -> Result<()> {
        let delta = delta.max(0);

        sqlx::query(
            "UPDATE users SET bytes_in_storage = MAX(bytes_in_storage - ?, 0) WHERE id = ?",
        )
        .bind(delta)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Bytes still available to a user.
    pub async fn available_bytes(conn: &mut SqliteConnection, user_id: i64) -> Result<i64> {
        Ok(Self::usage(conn, user_id).await?.available_bytes)
    }

    /// Current usage for a user.
    pub async fn usage(conn: &mut SqliteConnection, user_id: i64) -> Result<StorageUsage> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT bytes_in_storage, max_storage_bytes FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;

        let (bytes_in_storage, max_storage_bytes) =
            row.ok_or_else(|| SiloError::NotFound("user".to_string()))?;

        Ok(StorageUsage {
            bytes_in_storage,
            max_storage_bytes,
            available_bytes: (max_storage_bytes - bytes_in_storage).max(0),
        })
    }
}
