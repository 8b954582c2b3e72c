//! Recursive deletion of chunks and directory subtrees.
//!
//! Metadata goes in one pass over the caller's connection (normally an
//! open transaction). Physical files are only removed after the caller has
//! committed, via [`DeletionCoordinator::remove_files`], so a rolled back
//! deletion never loses bytes.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::chunk::{Chunk, ChunkRepository};
use super::directory::{Directory, DirectoryRepository};
use super::quota::QuotaTracker;
use super::storage::FileStorage;
use super::tree::DirectoryTree;
use crate::{Result, SiloError};

/// What to delete: individual chunks plus whole directory subtrees.
#[derive(Debug, Clone, Default)]
pub struct DeletionTargets {
    pub chunks: Vec<Chunk>,
    pub directories: Vec<Directory>,
}

impl DeletionTargets {
    pub fn chunk(chunk: Chunk) -> Self {
        Self {
            chunks: vec![chunk],
            directories: Vec::new(),
        }
    }

    pub fn directory(directory: Directory) -> Self {
        Self {
            chunks: Vec::new(),
            directories: vec![directory],
        }
    }
}

/// Outcome of a subtree deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub deleted_chunks: Vec<i64>,
    pub deleted_directories: Vec<i64>,
    /// Entries owned by someone else, left untouched.
    pub skipped_chunks: Vec<i64>,
    pub skipped_directories: Vec<i64>,
    /// Requester-owned directories kept because foreign entries remain inside.
    pub retained_directories: Vec<i64>,
    pub freed_bytes: i64,
    /// Relative paths of physical files to remove once committed.
    #[serde(skip)]
    pub storage_paths: Vec<String>,
}

/// Orchestrates subtree teardown across tree, registry and quota.
pub struct DeletionCoordinator;

impl DeletionCoordinator {
    /// Delete the targets and everything below them that `requester_id` owns.
    pub async fn delete_subtree(
        conn: &mut SqliteConnection,
        targets: DeletionTargets,
        requester_id: i64,
    ) -> Result<DeletionReport> {
        if targets.directories.iter().any(Directory::is_root) {
            return Err(SiloError::FileManagement(
                "the root storage directory can not be deleted".to_string(),
            ));
        }

        let mut chunks: BTreeMap<i64, Chunk> = BTreeMap::new();
        let mut directories: HashMap<i64, Directory> = HashMap::new();
        let mut order: Vec<i64> = Vec::new();

        for chunk in targets.chunks {
            chunks.entry(chunk.id).or_insert(chunk);
        }
        for target in targets.directories {
            for chunk in DirectoryTree::extract_subtree_chunks(conn, target.id).await? {
                chunks.entry(chunk.id).or_insert(chunk);
            }
            let descendants = DirectoryTree::extract_subtree_directories(conn, target.id).await?;
            for directory in std::iter::once(target).chain(descendants) {
                if !directories.contains_key(&directory.id) {
                    order.push(directory.id);
                    directories.insert(directory.id, directory);
                }
            }
        }

        let mut report = DeletionReport::default();

        for chunk in chunks.into_values() {
            if chunk.owner_id != requester_id {
                warn!(
                    chunk_id = chunk.id,
                    owner_id = chunk.owner_id,
                    requester_id,
                    "skipping file owned by another user"
                );
                report.skipped_chunks.push(chunk.id);
                continue;
            }
            if !ChunkRepository::delete(conn, chunk.id).await? {
                // already gone
                continue;
            }
            DirectoryRepository::decrement_element_count(conn, chunk.directory_id).await?;
            QuotaTracker::decrease(conn, requester_id, chunk.size_bytes).await?;

            report.freed_bytes += chunk.size_bytes;
            report.deleted_chunks.push(chunk.id);
            report.storage_paths.push(chunk.storage_path);
        }

        for id in deepest_first(&order, &directories) {
            let Some(directory) = directories.get(&id) else {
                continue;
            };
            if directory.owner_id != requester_id {
                warn!(
                    directory_id = id,
                    owner_id = directory.owner_id,
                    requester_id,
                    "skipping directory owned by another user"
                );
                report.skipped_directories.push(id);
                continue;
            }
            if DirectoryRepository::count_children(conn, id).await? > 0 {
                warn!(directory_id = id, "keeping directory that still holds entries");
                report.retained_directories.push(id);
                continue;
            }
            if !DirectoryRepository::delete(conn, id).await? {
                continue;
            }
            if let Some(parent_id) = directory.parent_id {
                DirectoryRepository::decrement_element_count(conn, parent_id).await?;
            }
            report.deleted_directories.push(id);
        }

        info!(
            requester_id,
            files = report.deleted_chunks.len(),
            directories = report.deleted_directories.len(),
            freed_bytes = report.freed_bytes,
            "deleted subtree"
        );

        Ok(report)
    }

    /// Remove the physical files of a committed deletion.
    ///
    /// Failures are logged and counted, never returned.
    pub fn remove_files(storage: &FileStorage, report: &DeletionReport) -> usize {
        let mut failures = 0;
        for path in &report.storage_paths {
            match storage.delete(path) {
                Ok(true) => {}
                Ok(false) => warn!(path = %path, "stored file was already missing"),
                Err(e) => {
                    failures += 1;
                    warn!(path = %path, error = %e, "failed to remove stored file");
                }
            }
        }
        failures
    }
}

/// Order directory ids so every directory comes before its ancestors.
fn deepest_first(order: &[i64], directories: &HashMap<i64, Directory>) -> Vec<i64> {
    let mut depth: HashMap<i64, usize> = HashMap::new();

    for &id in order {
        // Walk up until an ancestor with a known depth or one outside the set.
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(id);
        let mut base = 0;
        while let Some(cid) = current {
            if let Some(&d) = depth.get(&cid) {
                base = d + 1;
                break;
            }
            if !seen.insert(cid) {
                break;
            }
            match directories.get(&cid) {
                Some(directory) => {
                    chain.push(cid);
                    current = directory.parent_id;
                }
                None => break,
            }
        }
        for (offset, cid) in chain.into_iter().rev().enumerate() {
            depth.insert(cid, base + offset);
        }
    }

    let mut ids = order.to_vec();
    ids.sort_by_key(|id| std::cmp::Reverse(depth.get(id).copied().unwrap_or(0)));
    ids
}
