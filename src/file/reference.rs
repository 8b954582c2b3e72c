//! Serializable projections handed to callers.
//!
//! These are decoupled from the repository rows so internal fields such as
//! the physical storage path never leave the crate.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::chunk::{Chunk, ShareOption};
use super::directory::Directory;
use super::quota::StorageUsage;
use super::ROOT_DISPLAY_NAME;
use crate::db::User;

/// Public view of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReference {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub share_option: ShareOption,
    pub share_with: Vec<i64>,
    pub share_link: Option<String>,
    pub is_favorite: bool,
    pub directory_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl From<&Chunk> for ChunkReference {
    fn from(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id,
            owner_id: chunk.owner_id,
            name: chunk.original_file_name.clone(),
            size_bytes: chunk.size_bytes,
            mime_type: chunk.mime_type.clone(),
            share_option: chunk.share_option,
            share_with: chunk.share_with.clone(),
            share_link: chunk.share_link.clone(),
            is_favorite: chunk.is_favorite,
            directory_id: chunk.directory_id,
            created_at: chunk.created_at,
            last_modified: chunk.last_modified,
        }
    }
}

impl From<Chunk> for ChunkReference {
    fn from(chunk: Chunk) -> Self {
        Self::from(&chunk)
    }
}

/// Public view of a directory with child ids only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryReference {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub element_count: i64,
    pub chunk_ids: Vec<i64>,
    pub directory_ids: Vec<i64>,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl DirectoryReference {
    pub fn new(directory: &Directory, chunk_ids: Vec<i64>, directory_ids: Vec<i64>) -> Self {
        Self {
            id: directory.id,
            owner_id: directory.owner_id,
            name: directory.name.clone(),
            element_count: directory.element_count,
            chunk_ids,
            directory_ids,
            parent_id: directory.parent_id,
            created_at: directory.created_at,
            last_modified: directory.last_modified,
        }
    }
}

/// A subdirectory as shown in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubdirectoryEntry {
    pub id: i64,
    pub name: String,
    pub element_count: i64,
}

impl From<&Directory> for SubdirectoryEntry {
    fn from(directory: &Directory) -> Self {
        Self {
            id: directory.id,
            name: directory.name.clone(),
            element_count: directory.element_count,
        }
    }
}

/// One step of a breadcrumb path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathSegment {
    pub id: i64,
    pub name: String,
}

/// Breadcrumbs for a root-first ancestor list. The root shows as "My Storage".
pub fn path_segments(path: &[Directory]) -> Vec<PathSegment> {
    path.iter()
        .map(|d| PathSegment {
            id: d.id,
            name: if d.is_root() {
                ROOT_DISPLAY_NAME.to_string()
            } else {
                d.name.clone()
            },
        })
        .collect()
}

/// A directory listing with its chunks embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HydratedDirectoryReference {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub element_count: i64,
    pub chunks: Vec<ChunkReference>,
    pub subdirectories: Vec<SubdirectoryEntry>,
    pub parent_id: Option<i64>,
    pub path: Vec<PathSegment>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl HydratedDirectoryReference {
    pub fn new(
        directory: &Directory,
        chunks: &[Chunk],
        subdirectories: &[Directory],
        path: &[Directory],
    ) -> Self {
        Self {
            id: directory.id,
            owner_id: directory.owner_id,
            name: directory.name.clone(),
            element_count: directory.element_count,
            chunks: chunks.iter().map(ChunkReference::from).collect(),
            subdirectories: subdirectories.iter().map(SubdirectoryEntry::from).collect(),
            parent_id: directory.parent_id,
            path: path_segments(path),
            created_at: directory.created_at,
            last_modified: directory.last_modified,
        }
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSearchResult {
    /// Breadcrumbs to the containing directory; absent for shared files.
    pub directory_path: Option<Vec<PathSegment>>,
    pub chunk: ChunkReference,
}

/// Search hits split by where they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub my_storage: Vec<FileSearchResult>,
    pub shared_with_me: Vec<FileSearchResult>,
}

/// A provisioned account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountReference {
    pub id: i64,
    pub username: String,
    pub root_directory_id: i64,
    pub usage: StorageUsage,
}

impl AccountReference {
    pub fn new(user: &User, root: &Directory) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            root_directory_id: root.id,
            usage: StorageUsage {
                bytes_in_storage: user.bytes_in_storage,
                max_storage_bytes: user.max_storage_bytes,
                available_bytes: (user.max_storage_bytes - user.bytes_in_storage).max(0),
            },
        }
    }
}
