//! Directory records and repository.
//!
//! The tree is stored as flat rows keyed by id; each row holds an optional
//! parent id and children are found by indexed lookup.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::Result;

/// A node of a user's directory tree.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Directory {
    /// Unique directory ID.
    pub id: i64,
    /// Owning user ID.
    pub owner_id: i64,
    /// Directory name.
    pub name: String,
    /// Cached number of direct children (chunks and directories).
    pub element_count: i64,
    /// Parent directory ID (None for the root).
    pub parent_id: Option<i64>,
    /// When the directory was created.
    pub created_at: DateTime<Utc>,
    /// When the directory was last changed.
    pub last_modified: DateTime<Utc>,
}

impl Directory {
    /// Whether this is an account's root directory.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

const DIRECTORY_COLUMNS: &str =
    "id, owner_id, name, element_count, parent_id, created_at, last_modified";

/// Repository for directory rows.
pub struct DirectoryRepository;

impl DirectoryRepository {
    /// Insert a directory row, returning its ID.
    pub async fn insert(
        conn: &mut SqliteConnection,
        owner_id: i64,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<i64> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO directories
                 (owner_id, name, element_count, parent_id, created_at, last_modified)
             VALUES (?, ?, 0, ?, ?, ?) RETURNING id",
        )
        .bind(owner_id)
        .bind(name)
        .bind(parent_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(id)
    }

    /// Get a directory by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Directory>> {
        let sql = format!("SELECT {DIRECTORY_COLUMNS} FROM directories WHERE id = ?");
        let directory = sqlx::query_as::<_, Directory>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(directory)
    }

    /// Get a directory by ID if it belongs to the owner.
    pub async fn get_owned(
        conn: &mut SqliteConnection,
        id: i64,
        owner_id: i64,
    ) -> Result<Option<Directory>> {
        Ok(Self::get_by_id(conn, id)
            .await?
            .filter(|directory| directory.owner_id == owner_id))
    }

    /// Get the root directory of an account.
    pub async fn root_for(conn: &mut SqliteConnection, owner_id: i64) -> Result<Option<Directory>> {
        let sql = format!(
            "SELECT {DIRECTORY_COLUMNS} FROM directories WHERE owner_id = ? AND parent_id IS NULL"
        );
        let directory = sqlx::query_as::<_, Directory>(&sql)
            .bind(owner_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(directory)
    }

    /// List direct subdirectories, ordered by name.
    pub async fn list_children(
        conn: &mut SqliteConnection,
        parent_id: i64,
    ) -> Result<Vec<Directory>> {
        let sql = format!(
            "SELECT {DIRECTORY_COLUMNS} FROM directories WHERE parent_id = ? ORDER BY name"
        );
        let children = sqlx::query_as::<_, Directory>(&sql)
            .bind(parent_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(children)
    }

    /// IDs of direct subdirectories.
    pub async fn child_ids(conn: &mut SqliteConnection, parent_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM directories WHERE parent_id = ? ORDER BY id")
            .bind(parent_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids)
    }

    /// Names of direct subdirectories.
    pub async fn names_in(conn: &mut SqliteConnection, parent_id: i64) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT name FROM directories WHERE parent_id = ?")
            .bind(parent_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(names)
    }

    /// Whether a sibling directory (other than `exclude`) already uses this name.
    pub async fn name_taken(
        conn: &mut SqliteConnection,
        parent_id: i64,
        name: &str,
        exclude: Option<i64>,
    ) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM directories WHERE parent_id = ? AND name = ? AND id <> ?)",
        )
        .bind(parent_id)
        .bind(name)
        .bind(exclude.unwrap_or(-1))
        .fetch_one(&mut *conn)
        .await?;
        Ok(taken)
    }

    /// Atomically add one to a directory's element count.
    pub async fn increment_element_count(conn: &mut SqliteConnection, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE directories SET element_count = element_count + 1, last_modified = ?
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Atomically subtract one from a directory's element count, flooring at zero.
    pub async fn decrement_element_count(conn: &mut SqliteConnection, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE directories
             SET element_count = CASE WHEN element_count > 0 THEN element_count - 1 ELSE 0 END,
                 last_modified = ?
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Rename a directory.
    pub async fn update_name(conn: &mut SqliteConnection, id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE directories SET name = ?, last_modified = ? WHERE id = ?")
            .bind(name)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Point a directory at a new parent.
    pub async fn set_parent(conn: &mut SqliteConnection, id: i64, parent_id: i64) -> Result<()> {
        sqlx::query("UPDATE directories SET parent_id = ?, last_modified = ? WHERE id = ?")
            .bind(parent_id)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Delete a directory row.
    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM directories WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Actual number of direct children, counted from the rows.
    pub async fn count_children(conn: &mut SqliteConnection, id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM chunks WHERE directory_id = ?1)
                  + (SELECT COUNT(*) FROM directories WHERE parent_id = ?1)",
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    /// Ancestors of a directory, root first, ending with the directory itself.
    ///
    /// Walks parent links iteratively. A missing ancestor ends the walk.
    pub async fn path_to_root(conn: &mut SqliteConnection, id: i64) -> Result<Vec<Directory>> {
        let mut path = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut current_id = Some(id);

        while let Some(cid) = current_id {
            if !seen.insert(cid) {
                break;
            }
            match Self::get_by_id(conn, cid).await? {
                Some(directory) => {
                    current_id = directory.parent_id;
                    path.push(directory);
                }
                None => break,
            }
        }

        path.reverse();
        Ok(path)
    }
}
