//! Per-user file storage.
//!
//! This module provides:
//! - A directory tree per user with cached element counts
//! - Chunk (file) metadata plus physical bytes under a storage root
//! - Per-user quota tracking
//! - Sharing with users or through public links
//! - Recursive deletion and tar export of subtrees

mod archive;
mod chunk;
mod deletion;
mod directory;
mod naming;
mod quota;
mod reference;
mod registry;
mod service;
mod sharing;
mod storage;
mod tree;

pub use archive::{ArchiveEntry, ArchiveExporter, ArchivePlan, ExportSummary};
pub use chunk::{Chunk, ChunkRepository, NewChunk, ShareOption};
pub use deletion::{DeletionCoordinator, DeletionReport, DeletionTargets};
pub use directory::{Directory, DirectoryRepository};
pub use naming::{append_unique_counter, sanitize_name, split_extension, unique_name};
pub use quota::{QuotaTracker, StorageUsage};
pub use reference::{
    path_segments, AccountReference, ChunkReference, DirectoryReference, FileSearchResult,
    HydratedDirectoryReference, PathSegment, SearchResults, SubdirectoryEntry,
};
pub use registry::{ChunkRegistry, Upload};
pub use service::{collect_owned, collect_shared_with, FileSystem, DEFAULT_QUOTA_BYTES};
pub use sharing::{LinkGenerator, SharingState};
pub use storage::FileStorage;
pub use tree::DirectoryTree;

/// Name under which a root directory is shown in breadcrumbs.
pub const ROOT_DISPLAY_NAME: &str = "My Storage";
