//! silo - per-user hierarchical file storage
//!
//! Users own a tree of directories holding files, bounded by a storage
//! quota. Files can be shared with other users or through public links,
//! and subtrees can be deleted recursively or exported as tar.

pub mod config;
pub mod db;
pub mod error;
pub mod file;
pub mod logging;
pub mod worker;

pub use config::Config;
pub use db::{Database, Principal, User, UserReference, UserRepository};
pub use error::{ErrorKind, Failure, Result, SiloError};
pub use file::{
    AccountReference, ChunkReference, DeletionReport, DirectoryReference, ExportSummary,
    FileStorage, FileSystem, HydratedDirectoryReference, LinkGenerator, SearchResults,
    ShareOption, StorageUsage, Upload,
};
pub use worker::WorkerPool;
