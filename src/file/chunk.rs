//! Chunk metadata and repository.
//!
//! A chunk is one stored file: a row in `chunks` plus the physical bytes
//! at `storage_path`. Share targets live in `chunk_shares` and are loaded
//! into [`Chunk::share_with`] whenever a chunk is fetched.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::UserReference;
use crate::{Result, SiloError};

/// Visibility state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareOption {
    /// Only the owner can see the file.
    #[default]
    Private,
    /// Visible to an explicit list of users.
    ShareWithUser,
    /// Anyone holding the share link can download the file.
    ShareWithAllWithLink,
}

impl ShareOption {
    /// Convert to the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareOption::Private => "PRIVATE",
            ShareOption::ShareWithUser => "SHARE_WITH_USER",
            ShareOption::ShareWithAllWithLink => "SHARE_WITH_ALL_WITH_LINK",
        }
    }
}

impl fmt::Display for ShareOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareOption {
    type Err = SiloError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PRIVATE" => Ok(ShareOption::Private),
            "SHARE_WITH_USER" => Ok(ShareOption::ShareWithUser),
            "SHARE_WITH_ALL_WITH_LINK" => Ok(ShareOption::ShareWithAllWithLink),
            _ => Err(SiloError::Storage(
                "such share option does not exist".to_string(),
            )),
        }
    }
}

impl TryFrom<String> for ShareOption {
    type Error = SiloError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// A stored file.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Chunk {
    /// Unique chunk ID.
    pub id: i64,
    /// Owning user ID.
    pub owner_id: i64,
    /// Containing directory ID.
    pub directory_id: i64,
    /// Display name, unique among siblings.
    pub original_file_name: String,
    /// Physical location, relative to the storage root.
    pub storage_path: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// MIME type.
    pub mime_type: String,
    /// Visibility state.
    #[sqlx(try_from = "String")]
    pub share_option: ShareOption,
    /// Public share link, set only for link sharing.
    pub share_link: Option<String>,
    /// Favorite flag.
    pub is_favorite: bool,
    /// When the chunk was created.
    pub created_at: DateTime<Utc>,
    /// When the chunk was last changed.
    pub last_modified: DateTime<Utc>,
    /// Users the chunk is shared with.
    #[sqlx(skip)]
    pub share_with: Vec<i64>,
}

impl Chunk {
    /// Whether the given user is an explicit share target.
    pub fn is_shared_with(&self, user_id: i64) -> bool {
        self.share_option != ShareOption::Private && self.share_with.contains(&user_id)
    }
}

/// Data for inserting a new chunk row.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub owner_id: i64,
    pub directory_id: i64,
    pub original_file_name: String,
    pub size_bytes: i64,
    pub mime_type: String,
}

const CHUNK_COLUMNS: &str = "c.id, c.owner_id, c.directory_id, c.original_file_name, \
     c.storage_path, c.size_bytes, c.mime_type, c.share_option, c.share_link, \
     c.is_favorite, c.created_at, c.last_modified";

/// Escape `%`, `_` and `\` for a LIKE pattern using `ESCAPE '\'`.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Repository for chunk metadata.
pub struct ChunkRepository;

impl ChunkRepository {
    /// Insert a new chunk row with an empty storage path.
    ///
    /// The path depends on the generated id, so callers follow up with
    /// [`ChunkRepository::set_storage_path`].
    pub async fn insert(conn: &mut SqliteConnection, chunk: &NewChunk) -> Result<i64> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chunks (owner_id, directory_id, original_file_name, storage_path,
                                 size_bytes, mime_type, share_option, is_favorite,
                                 created_at, last_modified)
             VALUES (?, ?, ?, '', ?, ?, 'PRIVATE', 0, ?, ?) RETURNING id",
        )
        .bind(chunk.owner_id)
        .bind(chunk.directory_id)
        .bind(&chunk.original_file_name)
        .bind(chunk.size_bytes)
        .bind(&chunk.mime_type)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(id)
    }

    /// Set the relative storage path of a chunk.
    pub async fn set_storage_path(
        conn: &mut SqliteConnection,
        id: i64,
        storage_path: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE chunks SET storage_path = ? WHERE id = ?")
            .bind(storage_path)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn load_targets(conn: &mut SqliteConnection, chunk: &mut Chunk) -> Result<()> {
        chunk.share_with = Self::share_targets(conn, chunk.id).await?;
        Ok(())
    }

    async fn load_all_targets(conn: &mut SqliteConnection, chunks: &mut [Chunk]) -> Result<()> {
        for chunk in chunks.iter_mut() {
            Self::load_targets(conn, chunk).await?;
        }
        Ok(())
    }

    /// Get a chunk by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Chunk>> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.id = ?");
        let chunk = sqlx::query_as::<_, Chunk>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        match chunk {
            Some(mut chunk) => {
                Self::load_targets(conn, &mut chunk).await?;
                Ok(Some(chunk))
            }
            None => Ok(None),
        }
    }

    /// Get a chunk by ID if it belongs to the owner.
    pub async fn get_owned(
        conn: &mut SqliteConnection,
        id: i64,
        owner_id: i64,
    ) -> Result<Option<Chunk>> {
        Ok(Self::get_by_id(conn, id)
            .await?
            .filter(|chunk| chunk.owner_id == owner_id))
    }

    /// List the chunks directly inside a directory, ordered by name.
    pub async fn list_by_directory(
        conn: &mut SqliteConnection,
        directory_id: i64,
    ) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.directory_id = ?
             ORDER BY c.original_file_name"
        );
        let mut chunks = sqlx::query_as::<_, Chunk>(&sql)
            .bind(directory_id)
            .fetch_all(&mut *conn)
            .await?;

        Self::load_all_targets(conn, &mut chunks).await?;
        Ok(chunks)
    }

    /// IDs of the chunks directly inside a directory.
    pub async fn ids_by_directory(
        conn: &mut SqliteConnection,
        directory_id: i64,
    ) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM chunks WHERE directory_id = ? ORDER BY id")
            .bind(directory_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids)
    }

    /// Display names of the chunks directly inside a directory.
    pub async fn names_in_directory(
        conn: &mut SqliteConnection,
        directory_id: i64,
    ) -> Result<Vec<String>> {
        let names =
            sqlx::query_scalar("SELECT original_file_name FROM chunks WHERE directory_id = ?")
                .bind(directory_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(names)
    }

    /// Whether a sibling (other than `exclude`) already uses this name.
    pub async fn name_taken(
        conn: &mut SqliteConnection,
        directory_id: i64,
        name: &str,
        exclude: Option<i64>,
    ) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chunks
                           WHERE directory_id = ? AND original_file_name = ? AND id <> ?)",
        )
        .bind(directory_id)
        .bind(name)
        .bind(exclude.unwrap_or(-1))
        .fetch_one(&mut *conn)
        .await?;
        Ok(taken)
    }

    /// Number of chunks directly inside a directory.
    pub async fn count_by_directory(conn: &mut SqliteConnection, directory_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE directory_id = ?")
            .bind(directory_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    /// Change the display name of a chunk.
    pub async fn update_name(conn: &mut SqliteConnection, id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE chunks SET original_file_name = ?, last_modified = ? WHERE id = ?")
            .bind(name)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Set or clear the favorite flag.
    pub async fn set_favorite(conn: &mut SqliteConnection, id: i64, favorite: bool) -> Result<()> {
        sqlx::query("UPDATE chunks SET is_favorite = ?, last_modified = ? WHERE id = ?")
            .bind(favorite)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Replace the whole sharing state: targets are dropped, then the option
    /// and link are written together.
    pub async fn update_share_state(
        conn: &mut SqliteConnection,
        id: i64,
        option: ShareOption,
        link: Option<&str>,
    ) -> Result<()> {
        sqlx::query("DELETE FROM chunk_shares WHERE chunk_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            "UPDATE chunks SET share_option = ?, share_link = ?, last_modified = ? WHERE id = ?",
        )
        .bind(option.as_str())
        .bind(link)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Overwrite the share link only; option and targets stay as they are.
    pub async fn set_share_link(
        conn: &mut SqliteConnection,
        id: i64,
        link: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE chunks SET share_link = ? WHERE id = ?")
            .bind(link)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Add a share target. Adding an existing target is a no-op.
    pub async fn add_share_target(
        conn: &mut SqliteConnection,
        chunk_id: i64,
        user_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO chunk_shares (chunk_id, user_id, shared_at) VALUES (?, ?, ?)",
        )
        .bind(chunk_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a share target, returning whether it was present.
    pub async fn remove_share_target(
        conn: &mut SqliteConnection,
        chunk_id: i64,
        user_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chunk_shares WHERE chunk_id = ? AND user_id = ?")
            .bind(chunk_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// User IDs a chunk is shared with.
    pub async fn share_targets(conn: &mut SqliteConnection, chunk_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT user_id FROM chunk_shares WHERE chunk_id = ? ORDER BY user_id",
        )
        .bind(chunk_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(ids)
    }

    /// Users a chunk is shared with, ordered by username.
    pub async fn share_target_users(
        conn: &mut SqliteConnection,
        chunk_id: i64,
    ) -> Result<Vec<UserReference>> {
        let users = sqlx::query_as::<_, UserReference>(
            "SELECT u.id, u.username FROM chunk_shares s
             JOIN users u ON u.id = s.user_id
             WHERE s.chunk_id = ? ORDER BY u.username",
        )
        .bind(chunk_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(users)
    }

    /// Favorite chunks of an owner.
    pub async fn list_favorites(conn: &mut SqliteConnection, owner_id: i64) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.owner_id = ? AND c.is_favorite = 1
             ORDER BY c.original_file_name"
        );
        let mut chunks = sqlx::query_as::<_, Chunk>(&sql)
            .bind(owner_id)
            .fetch_all(&mut *conn)
            .await?;

        Self::load_all_targets(conn, &mut chunks).await?;
        Ok(chunks)
    }

    /// Chunks an owner shares in any way.
    pub async fn list_sharing(conn: &mut SqliteConnection, owner_id: i64) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c
             WHERE c.owner_id = ? AND c.share_option <> 'PRIVATE'
             ORDER BY c.original_file_name"
        );
        let mut chunks = sqlx::query_as::<_, Chunk>(&sql)
            .bind(owner_id)
            .fetch_all(&mut *conn)
            .await?;

        Self::load_all_targets(conn, &mut chunks).await?;
        Ok(chunks)
    }

    /// Chunks other users share with this user.
    pub async fn list_shared_with(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c
             JOIN chunk_shares s ON s.chunk_id = c.id
             WHERE s.user_id = ? AND c.share_option <> 'PRIVATE'
             ORDER BY c.original_file_name"
        );
        let mut chunks = sqlx::query_as::<_, Chunk>(&sql)
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;

        Self::load_all_targets(conn, &mut chunks).await?;
        Ok(chunks)
    }

    /// Owned chunks whose name contains `query`, case-insensitively.
    pub async fn search_owned(
        conn: &mut SqliteConnection,
        owner_id: i64,
        query: &str,
    ) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c
             WHERE c.owner_id = ? AND LOWER(c.original_file_name) LIKE ? ESCAPE '\\'
             ORDER BY c.original_file_name"
        );
        let mut chunks = sqlx::query_as::<_, Chunk>(&sql)
            .bind(owner_id)
            .bind(like_pattern(query))
            .fetch_all(&mut *conn)
            .await?;

        Self::load_all_targets(conn, &mut chunks).await?;
        Ok(chunks)
    }

    /// Chunks shared with the user whose name contains `query`.
    pub async fn search_shared_with(
        conn: &mut SqliteConnection,
        user_id: i64,
        query: &str,
    ) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c
             JOIN chunk_shares s ON s.chunk_id = c.id
             WHERE s.user_id = ? AND c.share_option <> 'PRIVATE'
               AND LOWER(c.original_file_name) LIKE ? ESCAPE '\\'
             ORDER BY c.original_file_name"
        );
        let mut chunks = sqlx::query_as::<_, Chunk>(&sql)
            .bind(user_id)
            .bind(like_pattern(query))
            .fetch_all(&mut *conn)
            .await?;

        Self::load_all_targets(conn, &mut chunks).await?;
        Ok(chunks)
    }

    /// Delete a chunk row. Share targets go with it.
    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
