//! Chunk registry: storing, finding and renaming files.

use std::collections::HashSet;
use std::io::{Cursor, Read};

use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::chunk::{Chunk, ChunkRepository, NewChunk, ShareOption};
use super::directory::DirectoryRepository;
use super::naming::{sanitize_name, unique_name, with_extension_of};
use super::quota::QuotaTracker;
use super::storage::FileStorage;
use crate::{Result, SiloError};

/// An incoming file.
pub struct Upload<R> {
    /// Target directory.
    pub directory_id: i64,
    /// Name as declared by the client.
    pub file_name: String,
    /// Declared MIME type, if any.
    pub mime_type: Option<String>,
    /// Declared size in bytes.
    pub size: u64,
    /// The bytes.
    pub reader: R,
}

impl Upload<Cursor<Vec<u8>>> {
    /// Build an upload from an in-memory buffer.
    pub fn from_bytes(directory_id: i64, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            directory_id,
            file_name: file_name.into(),
            mime_type: None,
            size: bytes.len() as u64,
            reader: Cursor::new(bytes),
        }
    }
}

impl<R> Upload<R> {
    /// Set the declared MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// CRUD over chunk metadata with ownership checks.
pub struct ChunkRegistry;

impl ChunkRegistry {
    /// Store a new file for `owner_id`.
    ///
    /// Metadata is written first to get an id, which fixes the physical
    /// path. The quota is reserved before any bytes hit the disk and the
    /// bytes are written last, so a failing write leaves only uncommitted
    /// rows behind for the caller to roll back.
    pub async fn store<R: Read>(
        conn: &mut SqliteConnection,
        storage: &FileStorage,
        owner_id: i64,
        upload: Upload<R>,
    ) -> Result<Chunk> {
        if upload.size == 0 {
            return Err(SiloError::Storage("failed to store empty file".to_string()));
        }
        let size = i64::try_from(upload.size)
            .map_err(|_| SiloError::Storage("file is too large".to_string()))?;

        let directory = DirectoryRepository::get_owned(conn, upload.directory_id, owner_id)
            .await?
            .ok_or_else(|| SiloError::NotFound("directory".to_string()))?;

        let name = sanitize_name(&upload.file_name)?;
        let taken: HashSet<String> = ChunkRepository::names_in_directory(conn, directory.id)
            .await?
            .into_iter()
            .collect();
        let name = unique_name(&name, &taken);

        if QuotaTracker::available_bytes(conn, owner_id).await? < size {
            return Err(SiloError::Storage(
                "not enough free storage space".to_string(),
            ));
        }

        let mime_type = upload
            .mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&name)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });

        let id = ChunkRepository::insert(
            conn,
            &NewChunk {
                owner_id,
                directory_id: directory.id,
                original_file_name: name.clone(),
                size_bytes: size,
                mime_type,
            },
        )
        .await?;
        let relative = FileStorage::chunk_relative_path(owner_id, id, &name)?;
        ChunkRepository::set_storage_path(conn, id, &relative).await?;
        DirectoryRepository::increment_element_count(conn, directory.id).await?;
        QuotaTracker::increase(conn, owner_id, size).await?;

        // One extra byte is enough to notice an oversized payload.
        let mut limited = upload.reader.take(upload.size + 1);
        let written = storage.write_new(&relative, &mut limited)?;
        if written != upload.size {
            discard(storage, &relative);
            return Err(SiloError::Storage(format!(
                "received {written} bytes but {} were declared",
                upload.size
            )));
        }

        match ChunkRepository::get_by_id(conn, id).await {
            Ok(Some(chunk)) => {
                info!(chunk_id = id, owner_id, size, "stored file");
                Ok(chunk)
            }
            Ok(None) => {
                discard(storage, &relative);
                Err(SiloError::NotFound("file".to_string()))
            }
            Err(e) => {
                discard(storage, &relative);
                Err(e)
            }
        }
    }

    /// Rename a chunk, keeping its extension.
    ///
    /// A sibling with the resulting name is an error.
    pub async fn rename(
        conn: &mut SqliteConnection,
        chunk: &Chunk,
        new_base_name: &str,
    ) -> Result<Chunk> {
        let base = sanitize_name(new_base_name)?;
        let new_name = with_extension_of(&chunk.original_file_name, &base);

        if new_name != chunk.original_file_name
            && ChunkRepository::name_taken(conn, chunk.directory_id, &new_name, Some(chunk.id))
                .await?
        {
            return Err(SiloError::FileManagement(format!(
                "a file named \"{new_name}\" already exists here"
            )));
        }

        ChunkRepository::update_name(conn, chunk.id, &new_name).await?;
        ChunkRepository::get_by_id(conn, chunk.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("file".to_string()))
    }

    /// Find a chunk owned by `owner_id`.
    pub async fn find_owned(conn: &mut SqliteConnection, id: i64, owner_id: i64) -> Result<Chunk> {
        ChunkRepository::get_owned(conn, id, owner_id)
            .await?
            .ok_or_else(|| SiloError::NotFound("file".to_string()))
    }

    /// Find a chunk shared through a public link.
    pub async fn find_public(conn: &mut SqliteConnection, id: i64) -> Result<Chunk> {
        ChunkRepository::get_by_id(conn, id)
            .await?
            .filter(|chunk| chunk.share_option == ShareOption::ShareWithAllWithLink)
            .ok_or_else(|| SiloError::NotFound("file".to_string()))
    }

    /// Find a chunk that is shared with `user_id`.
    pub async fn find_shared_with_user(
        conn: &mut SqliteConnection,
        id: i64,
        user_id: i64,
    ) -> Result<Chunk> {
        let chunk = ChunkRepository::get_by_id(conn, id)
            .await?
            .ok_or_else(|| SiloError::NotFound("file".to_string()))?;

        if !chunk.is_shared_with(user_id) {
            return Err(SiloError::FileManagement(
                "this file is not shared with you".to_string(),
            ));
        }
        Ok(chunk)
    }

    /// Mark or unmark a chunk as favorite.
    pub async fn set_favorite(
        conn: &mut SqliteConnection,
        chunk: &Chunk,
        favorite: bool,
    ) -> Result<Chunk> {
        ChunkRepository::set_favorite(conn, chunk.id, favorite).await?;
        ChunkRepository::get_by_id(conn, chunk.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("file".to_string()))
    }

    /// Remove a chunk's metadata. The physical file is left alone.
    pub async fn delete(conn: &mut SqliteConnection, chunk: &Chunk) -> Result<bool> {
        ChunkRepository::delete(conn, chunk.id).await
    }
}

/// Best-effort removal of a file written during a failed store.
pub(crate) fn discard(storage: &FileStorage, relative: &str) {
    if let Err(e) = storage.delete(relative) {
        warn!(path = relative, error = %e, "failed to remove orphaned file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRepository;
    use crate::file::tree::DirectoryTree;
    use crate::Database;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        db: Database,
        storage: FileStorage,
        owner: i64,
        root: i64,
    }

    async fn setup(quota: i64) -> Fixture {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path().join("storage")).unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let user = UserRepository::create(&mut conn, "alice", quota).await.unwrap();
        let root = DirectoryTree::create_root(&mut conn, "1", user.id)
            .await
            .unwrap();
        drop(conn);
        Fixture {
            _temp: temp,
            db,
            storage,
            owner: user.id,
            root: root.id,
        }
    }

    #[tokio::test]
    async fn test_store_and_find() {
        let f = setup(1000).await;
        let mut conn = f.db.pool().acquire().await.unwrap();

        let chunk = ChunkRegistry::store(
            &mut conn,
            &f.storage,
            f.owner,
            Upload::from_bytes(f.root, "report.pdf", vec![7u8; 500]),
        )
        .await
        .unwrap();

        assert_eq!(chunk.original_file_name, "report.pdf");
        assert_eq!(chunk.size_bytes, 500);
        assert_eq!(chunk.mime_type, "application/pdf");
        assert_eq!(
            chunk.storage_path,
            format!("{}/{}___report.pdf", f.owner, chunk.id)
        );
        assert!(f.storage.exists(&chunk.storage_path));

        let found = ChunkRegistry::find_owned(&mut conn, chunk.id, f.owner)
            .await
            .unwrap();
        assert_eq!(found.size_bytes, 500);

        let usage = QuotaTracker::usage(&mut conn, f.owner).await.unwrap();
        assert_eq!(usage.bytes_in_storage, 500);
    }

    #[tokio::test]
    async fn test_store_declared_mime_and_sanitized_name() {
        let f = setup(1000).await;
        let mut conn = f.db.pool().acquire().await.unwrap();

        let chunk = ChunkRegistry::store(
            &mut conn,
            &f.storage,
            f.owner,
            Upload::from_bytes(f.root, " ../evil?.bin ", vec![1, 2, 3]).with_mime_type("text/x"),
        )
        .await
        .unwrap();

        assert_eq!(chunk.original_file_name, "..evil.bin");
        assert_eq!(chunk.mime_type, "text/x");
    }

    #[tokio::test]
    async fn test_store_rejects_empty() {
        let f = setup(1000).await;
        let mut conn = f.db.pool().acquire().await.unwrap();

        let result = ChunkRegistry::store(
            &mut conn,
            &f.storage,
            f.owner,
            Upload::from_bytes(f.root, "empty.txt", Vec::new()),
        )
        .await;
        assert!(matches!(result, Err(SiloError::Storage(_))));
    }

    #[tokio::test]
    async fn test_store_size_mismatch_cleans_up() {
        let f = setup(1000).await;
        let mut conn = f.db.pool().acquire().await.unwrap();

        let mut upload = Upload::from_bytes(f.root, "short.txt", vec![1u8; 10]);
        upload.size = 20;
        let result = ChunkRegistry::store(&mut conn, &f.storage, f.owner, upload).await;

        assert!(matches!(result, Err(SiloError::Storage(_))));
        let user_dir = f.storage.user_dir(f.owner).unwrap();
        let leftover = std::fs::read_dir(&user_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_rename_keeps_extension() {
        let f = setup(1000).await;
        let mut conn = f.db.pool().acquire().await.unwrap();

        let a = ChunkRegistry::store(
            &mut conn,
            &f.storage,
            f.owner,
            Upload::from_bytes(f.root, "a.txt", vec![1]),
        )
        .await
        .unwrap();
        ChunkRegistry::store(
            &mut conn,
            &f.storage,
            f.owner,
            Upload::from_bytes(f.root, "b.txt", vec![1]),
        )
        .await
        .unwrap();

        let result = ChunkRegistry::rename(&mut conn, &a, "b").await;
        assert!(matches!(result, Err(SiloError::FileManagement(_))));

        let renamed = ChunkRegistry::rename(&mut conn, &a, "notes").await.unwrap();
        assert_eq!(renamed.original_file_name, "notes.txt");
    }

    #[tokio::test]
    async fn test_find_variants() {
        let f = setup(1000).await;
        let mut conn = f.db.pool().acquire().await.unwrap();
        let bob = UserRepository::create(&mut conn, "bob", 1000).await.unwrap();

        let chunk = ChunkRegistry::store(
            &mut conn,
            &f.storage,
            f.owner,
            Upload::from_bytes(f.root, "a.txt", vec![1]),
        )
        .await
        .unwrap();

        assert!(matches!(
            ChunkRegistry::find_owned(&mut conn, chunk.id, bob.id).await,
            Err(SiloError::NotFound(_))
        ));
        assert!(matches!(
            ChunkRegistry::find_public(&mut conn, chunk.id).await,
            Err(SiloError::NotFound(_))
        ));
        assert!(matches!(
            ChunkRegistry::find_shared_with_user(&mut conn, chunk.id, bob.id).await,
            Err(SiloError::FileManagement(_))
        ));
        assert!(matches!(
            ChunkRegistry::find_shared_with_user(&mut conn, 999, bob.id).await,
            Err(SiloError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_favorite_and_delete() {
        let f = setup(1000).await;
        let mut conn = f.db.pool().acquire().await.unwrap();

        let chunk = ChunkRegistry::store(
            &mut conn,
            &f.storage,
            f.owner,
            Upload::from_bytes(f.root, "a.txt", vec![1]),
        )
        .await
        .unwrap();

        let chunk = ChunkRegistry::set_favorite(&mut conn, &chunk, true).await.unwrap();
        assert!(chunk.is_favorite);

        assert!(ChunkRegistry::delete(&mut conn, &chunk).await.unwrap());
        // metadata only
        assert!(f.storage.exists(&chunk.storage_path));
    }
}
