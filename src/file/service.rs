//! File system service for silo.
//!
//! `FileSystem` is the operation boundary: every method resolves the
//! caller, runs against its own connection or transaction, and returns
//! projections rather than repository rows.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::sync::Arc;

use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::archive::{ArchiveExporter, ExportSummary};
use super::chunk::{Chunk, ChunkRepository, ShareOption};
use super::deletion::{DeletionCoordinator, DeletionReport, DeletionTargets};
use super::directory::{Directory, DirectoryRepository};
use super::quota::{QuotaTracker, StorageUsage};
use super::reference::{
    path_segments, AccountReference, ChunkReference, DirectoryReference, FileSearchResult,
    HydratedDirectoryReference, SearchResults,
};
use super::registry::{discard, ChunkRegistry, Upload};
use super::sharing::{LinkGenerator, SharingState};
use super::storage::FileStorage;
use super::tree::DirectoryTree;
use crate::config::StorageConfig;
use crate::db::{Database, Principal, User, UserReference, UserRepository};
use crate::{Result, SiloError};

/// Owned chunks and directories picked out by id.
pub async fn collect_owned(
    conn: &mut SqliteConnection,
    chunk_ids: &[i64],
    directory_ids: &[i64],
    owner_id: i64,
) -> Result<(Vec<Chunk>, Vec<Directory>)> {
    let mut chunks = Vec::with_capacity(chunk_ids.len());
    let mut seen = HashSet::new();
    for &id in chunk_ids {
        if seen.insert(id) {
            chunks.push(ChunkRegistry::find_owned(conn, id, owner_id).await?);
        }
    }

    let mut directories = Vec::with_capacity(directory_ids.len());
    let mut seen = HashSet::new();
    for &id in directory_ids {
        if seen.insert(id) {
            let directory = DirectoryRepository::get_owned(conn, id, owner_id)
                .await?
                .ok_or_else(|| SiloError::NotFound("directory".to_string()))?;
            directories.push(directory);
        }
    }

    Ok((chunks, directories))
}

/// Chunks shared with `user_id`, picked out by id.
pub async fn collect_shared_with(
    conn: &mut SqliteConnection,
    chunk_ids: &[i64],
    user_id: i64,
) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::with_capacity(chunk_ids.len());
    let mut seen = HashSet::new();
    for &id in chunk_ids {
        if seen.insert(id) {
            chunks.push(ChunkRegistry::find_shared_with_user(conn, id, user_id).await?);
        }
    }
    Ok(chunks)
}

/// Quota for accounts provisioned without an explicit one (1 GiB).
pub const DEFAULT_QUOTA_BYTES: i64 = 1024 * 1024 * 1024;

/// Per-user file storage.
pub struct FileSystem {
    db: Arc<Database>,
    storage: FileStorage,
    links: LinkGenerator,
    default_quota_bytes: i64,
}

impl FileSystem {
    /// Create a new FileSystem.
    pub fn new(db: Arc<Database>, storage: FileStorage, links: LinkGenerator) -> Self {
        Self {
            db,
            storage,
            links,
            default_quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }

    /// Create a FileSystem from the storage section of the config.
    pub fn from_config(db: Arc<Database>, config: &StorageConfig) -> Result<Self> {
        let storage = FileStorage::new(&config.root_path)?;
        let links = LinkGenerator::new(config.base_url.clone())?;
        let default_quota_bytes = config.default_quota_bytes()?;
        Ok(Self::new(db, storage, links).with_default_quota(default_quota_bytes))
    }

    /// Set the quota handed to accounts provisioned without one.
    pub fn with_default_quota(mut self, bytes: i64) -> Self {
        self.default_quota_bytes = bytes;
        self
    }

    /// Quota handed to accounts provisioned without one.
    pub fn default_quota_bytes(&self) -> i64 {
        self.default_quota_bytes
    }

    /// Get the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get the physical storage.
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    async fn user(conn: &mut SqliteConnection, principal: &Principal) -> Result<User> {
        UserRepository::find_principal(conn, principal).await
    }

    async fn owned_directory(
        conn: &mut SqliteConnection,
        id: i64,
        owner_id: i64,
    ) -> Result<Directory> {
        DirectoryRepository::get_owned(conn, id, owner_id)
            .await?
            .ok_or_else(|| SiloError::NotFound("directory".to_string()))
    }

    async fn directory_reference_for(
        conn: &mut SqliteConnection,
        directory: &Directory,
    ) -> Result<DirectoryReference> {
        let chunk_ids = ChunkRepository::ids_by_directory(conn, directory.id).await?;
        let directory_ids = DirectoryRepository::child_ids(conn, directory.id).await?;
        Ok(DirectoryReference::new(directory, chunk_ids, directory_ids))
    }

    async fn hydrate(
        conn: &mut SqliteConnection,
        directory: &Directory,
    ) -> Result<HydratedDirectoryReference> {
        let chunks = ChunkRepository::list_by_directory(conn, directory.id).await?;
        let subdirectories = DirectoryRepository::list_children(conn, directory.id).await?;
        let path = DirectoryRepository::path_to_root(conn, directory.id).await?;
        Ok(HydratedDirectoryReference::new(
            directory,
            &chunks,
            &subdirectories,
            &path,
        ))
    }

    // ---- accounts ----

    /// Create the storage side of a new account: the quota record, the root
    /// directory (named after the user id) and the physical user directory.
    pub async fn provision_account(
        &self,
        username: &str,
        max_storage_bytes: i64,
    ) -> Result<AccountReference> {
        let mut tx = self.db.begin().await?;

        let user = UserRepository::create(&mut tx, username, max_storage_bytes).await?;
        let root = DirectoryTree::create_root(&mut tx, &user.id.to_string(), user.id).await?;
        let dir = self.storage.create_user_dir(user.id)?;

        if let Err(e) = tx.commit().await {
            if let Err(cleanup) = std::fs::remove_dir(&dir) {
                warn!(user_id = user.id, error = %cleanup, "failed to remove user directory");
            }
            return Err(e.into());
        }

        info!(user_id = user.id, username = %user.username, "provisioned account");
        Ok(AccountReference::new(&user, &root))
    }

    /// Provision an account with the configured default quota.
    pub async fn provision_default_account(&self, username: &str) -> Result<AccountReference> {
        self.provision_account(username, self.default_quota_bytes).await
    }

    /// Current quota usage.
    pub async fn usage(&self, principal: &Principal) -> Result<StorageUsage> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        QuotaTracker::usage(&mut conn, user.id).await
    }

    // ---- chunks ----

    /// Store an uploaded file.
    ///
    /// The bytes are written while the metadata transaction is still open.
    /// A failed write rolls the transaction back; a failed commit removes
    /// the written file.
    pub async fn store<R: Read + Send>(
        &self,
        principal: &Principal,
        upload: Upload<R>,
    ) -> Result<ChunkReference> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;

        let chunk = ChunkRegistry::store(&mut tx, &self.storage, user.id, upload).await?;

        if let Err(e) = tx.commit().await {
            discard(&self.storage, &chunk.storage_path);
            return Err(e.into());
        }

        Ok(ChunkReference::from(&chunk))
    }

    /// Metadata of an owned chunk.
    pub async fn chunk(&self, id: i64, principal: &Principal) -> Result<ChunkReference> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let chunk = ChunkRegistry::find_owned(&mut conn, id, user.id).await?;
        Ok(ChunkReference::from(&chunk))
    }

    /// Metadata of a chunk shared through a public link.
    pub async fn public_chunk(&self, id: i64) -> Result<ChunkReference> {
        let mut conn = self.db.pool().acquire().await?;
        let chunk = ChunkRegistry::find_public(&mut conn, id).await?;
        Ok(ChunkReference::from(&chunk))
    }

    /// Metadata of a chunk shared with the caller.
    pub async fn shared_chunk(&self, id: i64, principal: &Principal) -> Result<ChunkReference> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let chunk = ChunkRegistry::find_shared_with_user(&mut conn, id, user.id).await?;
        Ok(ChunkReference::from(&chunk))
    }

    fn copy_bytes<W: Write>(&self, chunk: &Chunk, out: &mut W) -> Result<u64> {
        let mut file = self.storage.open(&chunk.storage_path)?;
        let copied = io::copy(&mut file, out)?;
        Ok(copied)
    }

    /// Copy an owned chunk's bytes to `out`.
    pub async fn stream_chunk<W: Write + Send>(
        &self,
        id: i64,
        principal: &Principal,
        out: &mut W,
    ) -> Result<(ChunkReference, u64)> {
        let chunk = {
            let mut conn = self.db.pool().acquire().await?;
            let user = Self::user(&mut conn, principal).await?;
            ChunkRegistry::find_owned(&mut conn, id, user.id).await?
        };
        let copied = self.copy_bytes(&chunk, out)?;
        Ok((ChunkReference::from(&chunk), copied))
    }

    /// Copy a link-shared chunk's bytes to `out`.
    pub async fn stream_public<W: Write + Send>(
        &self,
        id: i64,
        out: &mut W,
    ) -> Result<(ChunkReference, u64)> {
        let chunk = {
            let mut conn = self.db.pool().acquire().await?;
            ChunkRegistry::find_public(&mut conn, id).await?
        };
        let copied = self.copy_bytes(&chunk, out)?;
        Ok((ChunkReference::from(&chunk), copied))
    }

    /// Copy the bytes of a chunk shared with the caller to `out`.
    pub async fn stream_shared<W: Write + Send>(
        &self,
        id: i64,
        principal: &Principal,
        out: &mut W,
    ) -> Result<(ChunkReference, u64)> {
        let chunk = {
            let mut conn = self.db.pool().acquire().await?;
            let user = Self::user(&mut conn, principal).await?;
            ChunkRegistry::find_shared_with_user(&mut conn, id, user.id).await?
        };
        let copied = self.copy_bytes(&chunk, out)?;
        Ok((ChunkReference::from(&chunk), copied))
    }

    /// Rename an owned chunk, keeping its extension.
    pub async fn rename_chunk(
        &self,
        id: i64,
        new_name: &str,
        principal: &Principal,
    ) -> Result<ChunkReference> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let chunk = ChunkRegistry::find_owned(&mut tx, id, user.id).await?;
        let chunk = ChunkRegistry::rename(&mut tx, &chunk, new_name).await?;
        let chunk = SharingState::refresh_link(&mut tx, &self.links, &chunk).await?;
        tx.commit().await?;
        Ok(ChunkReference::from(&chunk))
    }

    /// Mark or unmark an owned chunk as favorite.
    pub async fn set_favorite(
        &self,
        id: i64,
        favorite: bool,
        principal: &Principal,
    ) -> Result<ChunkReference> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let chunk = ChunkRegistry::find_owned(&mut tx, id, user.id).await?;
        let chunk = ChunkRegistry::set_favorite(&mut tx, &chunk, favorite).await?;
        tx.commit().await?;
        Ok(ChunkReference::from(&chunk))
    }

    /// Favorite chunks of the caller.
    pub async fn favorites(&self, principal: &Principal) -> Result<Vec<ChunkReference>> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let chunks = ChunkRepository::list_favorites(&mut conn, user.id).await?;
        Ok(chunks.iter().map(ChunkReference::from).collect())
    }

    // ---- deletion ----

    /// Delete owned chunks and directory subtrees in one transaction.
    ///
    /// Physical files are removed after the commit; failures there are
    /// logged only.
    pub async fn delete_targets(
        &self,
        chunk_ids: &[i64],
        directory_ids: &[i64],
        principal: &Principal,
    ) -> Result<DeletionReport> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let (chunks, directories) =
            collect_owned(&mut tx, chunk_ids, directory_ids, user.id).await?;

        let report = DeletionCoordinator::delete_subtree(
            &mut tx,
            DeletionTargets {
                chunks,
                directories,
            },
            user.id,
        )
        .await?;
        tx.commit().await?;

        DeletionCoordinator::remove_files(&self.storage, &report);
        Ok(report)
    }

    /// Delete one owned chunk.
    pub async fn delete_chunk(&self, id: i64, principal: &Principal) -> Result<DeletionReport> {
        self.delete_targets(&[id], &[], principal).await
    }

    /// Delete an owned directory and everything the caller owns below it.
    pub async fn delete_directory(
        &self,
        id: i64,
        principal: &Principal,
    ) -> Result<DeletionReport> {
        self.delete_targets(&[], &[id], principal).await
    }

    // ---- directories ----

    /// The caller's root directory listing.
    pub async fn root_directory(
        &self,
        principal: &Principal,
    ) -> Result<HydratedDirectoryReference> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let root = DirectoryRepository::root_for(&mut conn, user.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("directory".to_string()))?;
        Self::hydrate(&mut conn, &root).await
    }

    /// Listing of an owned directory with its chunks embedded.
    pub async fn directory(
        &self,
        id: i64,
        principal: &Principal,
    ) -> Result<HydratedDirectoryReference> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let directory = Self::owned_directory(&mut conn, id, user.id).await?;
        Self::hydrate(&mut conn, &directory).await
    }

    /// Id-only view of an owned directory.
    pub async fn directory_reference(
        &self,
        id: i64,
        principal: &Principal,
    ) -> Result<DirectoryReference> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let directory = Self::owned_directory(&mut conn, id, user.id).await?;
        Self::directory_reference_for(&mut conn, &directory).await
    }

    /// Create a subdirectory under an owned parent.
    pub async fn create_directory(
        &self,
        name: &str,
        parent_id: i64,
        principal: &Principal,
    ) -> Result<DirectoryReference> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let directory =
            DirectoryTree::create_subdirectory(&mut tx, name, user.id, parent_id).await?;
        let reference = Self::directory_reference_for(&mut tx, &directory).await?;
        tx.commit().await?;
        Ok(reference)
    }

    /// Rename an owned directory.
    pub async fn rename_directory(
        &self,
        id: i64,
        new_name: &str,
        principal: &Principal,
    ) -> Result<DirectoryReference> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let directory = Self::owned_directory(&mut tx, id, user.id).await?;
        let directory = DirectoryTree::rename(&mut tx, &directory, new_name).await?;
        let reference = Self::directory_reference_for(&mut tx, &directory).await?;
        tx.commit().await?;
        Ok(reference)
    }

    /// Move an owned directory under another owned directory.
    pub async fn move_directory(
        &self,
        id: i64,
        new_parent_id: i64,
        principal: &Principal,
    ) -> Result<DirectoryReference> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let directory = Self::owned_directory(&mut tx, id, user.id).await?;
        let new_parent = Self::owned_directory(&mut tx, new_parent_id, user.id).await?;
        let directory = DirectoryTree::reparent(&mut tx, &directory, &new_parent).await?;
        let reference = Self::directory_reference_for(&mut tx, &directory).await?;
        tx.commit().await?;
        Ok(reference)
    }

    // ---- sharing ----

    /// Change the share option of an owned chunk.
    ///
    /// The option is matched case-insensitively.
    pub async fn set_share_option(
        &self,
        id: i64,
        option: &str,
        principal: &Principal,
    ) -> Result<ChunkReference> {
        let option: ShareOption = option.parse()?;

        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let chunk = ChunkRegistry::find_owned(&mut tx, id, user.id).await?;
        let chunk = SharingState::set_option(&mut tx, &self.links, &chunk, option).await?;
        tx.commit().await?;
        Ok(ChunkReference::from(&chunk))
    }

    /// Share an owned chunk with another user.
    pub async fn share_with_user(
        &self,
        id: i64,
        target_user_id: i64,
        principal: &Principal,
    ) -> Result<ChunkReference> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let chunk = ChunkRegistry::find_owned(&mut tx, id, user.id).await?;
        let chunk = SharingState::add_target(&mut tx, &chunk, target_user_id).await?;
        tx.commit().await?;
        Ok(ChunkReference::from(&chunk))
    }

    /// Stop sharing an owned chunk with a user.
    pub async fn unshare_with_user(
        &self,
        id: i64,
        target_user_id: i64,
        principal: &Principal,
    ) -> Result<ChunkReference> {
        let mut tx = self.db.begin().await?;
        let user = Self::user(&mut tx, principal).await?;
        let chunk = ChunkRegistry::find_owned(&mut tx, id, user.id).await?;
        let chunk = SharingState::remove_target(&mut tx, &chunk, target_user_id).await?;
        tx.commit().await?;
        Ok(ChunkReference::from(&chunk))
    }

    /// Users an owned chunk is shared with.
    pub async fn share_targets(
        &self,
        id: i64,
        principal: &Principal,
    ) -> Result<Vec<UserReference>> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let chunk = ChunkRegistry::find_owned(&mut conn, id, user.id).await?;
        ChunkRepository::share_target_users(&mut conn, chunk.id).await
    }

    /// Users an owned chunk could still be shared with, matched by a
    /// username fragment.
    pub async fn share_candidates(
        &self,
        id: i64,
        fragment: &str,
        principal: &Principal,
    ) -> Result<Vec<UserReference>> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let chunk = ChunkRegistry::find_owned(&mut conn, id, user.id).await?;
        UserRepository::query_for_sharing(&mut conn, fragment, user.id, chunk.id).await
    }

    /// Chunks the caller shares in any way.
    pub async fn files_user_is_sharing(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ChunkReference>> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let chunks = ChunkRepository::list_sharing(&mut conn, user.id).await?;
        Ok(chunks.iter().map(ChunkReference::from).collect())
    }

    /// Chunks other users share with the caller.
    pub async fn files_shared_with_me(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ChunkReference>> {
        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;
        let chunks = ChunkRepository::list_shared_with(&mut conn, user.id).await?;
        Ok(chunks.iter().map(ChunkReference::from).collect())
    }

    // ---- search ----

    /// Case-insensitive name search over owned and shared chunks.
    pub async fn search(&self, query: &str, principal: &Principal) -> Result<SearchResults> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchResults::default());
        }

        let mut conn = self.db.pool().acquire().await?;
        let user = Self::user(&mut conn, principal).await?;

        let mut results = SearchResults::default();
        for chunk in ChunkRepository::search_owned(&mut conn, user.id, query).await? {
            let path = DirectoryRepository::path_to_root(&mut conn, chunk.directory_id).await?;
            results.my_storage.push(FileSearchResult {
                directory_path: Some(path_segments(&path)),
                chunk: ChunkReference::from(&chunk),
            });
        }
        for chunk in ChunkRepository::search_shared_with(&mut conn, user.id, query).await? {
            results.shared_with_me.push(FileSearchResult {
                directory_path: None,
                chunk: ChunkReference::from(&chunk),
            });
        }

        Ok(results)
    }

    // ---- export ----

    /// Write owned chunks and directory subtrees to `out` as tar.
    ///
    /// The tree is read first; the archive is then written on the blocking
    /// thread pool.
    pub async fn export_tar<W: Write + Send + 'static>(
        &self,
        chunk_ids: &[i64],
        directory_ids: &[i64],
        principal: &Principal,
        out: W,
    ) -> Result<ExportSummary> {
        let plan = {
            let mut conn = self.db.pool().acquire().await?;
            let user = Self::user(&mut conn, principal).await?;
            let (chunks, directories) =
                collect_owned(&mut conn, chunk_ids, directory_ids, user.id).await?;
            ArchiveExporter::plan(&mut conn, &chunks, &directories).await?
        };

        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || ArchiveExporter::write(&plan, &storage, out))
            .await
            .map_err(|e| SiloError::Processing(format!("archive task failed: {e}")))?
    }

    /// Write chunks shared with the caller to `out` as tar.
    pub async fn export_shared_tar<W: Write + Send + 'static>(
        &self,
        chunk_ids: &[i64],
        principal: &Principal,
        out: W,
    ) -> Result<ExportSummary> {
        let plan = {
            let mut conn = self.db.pool().acquire().await?;
            let user = Self::user(&mut conn, principal).await?;
            let chunks = collect_shared_with(&mut conn, chunk_ids, user.id).await?;
            ArchiveExporter::plan(&mut conn, &chunks, &[]).await?
        };

        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || ArchiveExporter::write(&plan, &storage, out))
            .await
            .map_err(|e| SiloError::Processing(format!("archive task failed: {e}")))?
    }
}
