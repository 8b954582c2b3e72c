//! Bulk tar export of chunks and directory subtrees.
//!
//! Export runs in two steps: [`ArchiveExporter::plan`] takes a snapshot of
//! the tree from the database, then [`ArchiveExporter::write`] streams the
//! entries as a GNU tar. Paths longer than 100 bytes are emitted with GNU
//! long-name records.

use std::collections::HashSet;
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use super::chunk::{Chunk, ChunkRepository};
use super::directory::{Directory, DirectoryRepository};
use super::storage::FileStorage;
use crate::{Result, SiloError};

/// One entry of a planned archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    /// An empty directory record.
    Directory {
        path: String,
        modified: DateTime<Utc>,
    },
    /// A file whose bytes come from storage.
    File {
        path: String,
        storage_path: String,
        modified: DateTime<Utc>,
    },
}

impl ArchiveEntry {
    /// Path of the entry inside the archive.
    pub fn path(&self) -> &str {
        match self {
            ArchiveEntry::Directory { path, .. } | ArchiveEntry::File { path, .. } => path,
        }
    }

    fn file(prefix: &str, chunk: &Chunk) -> Self {
        ArchiveEntry::File {
            path: format!("{prefix}{}", chunk.original_file_name),
            storage_path: chunk.storage_path.clone(),
            modified: chunk.last_modified,
        }
    }
}

/// Snapshot of everything an export will contain, in write order.
#[derive(Debug, Clone, Default)]
pub struct ArchivePlan {
    pub entries: Vec<ArchiveEntry>,
}

/// Result of writing an archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub files: usize,
    pub directories: usize,
    /// Files whose bytes could not be read.
    pub skipped: usize,
    pub bytes: u64,
    /// The receiving side went away before the archive was complete.
    pub aborted: bool,
}

/// Whether a write error means the client stopped reading.
fn is_client_abort(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WriteZero
    )
}

fn mtime(at: &DateTime<Utc>) -> u64 {
    at.timestamp().max(0) as u64
}

/// Streams chunks and directory subtrees as tar.
pub struct ArchiveExporter;

impl ArchiveExporter {
    /// Build the list of entries for the given chunks and directories.
    ///
    /// Chunks land at the top level. Each directory contributes its own
    /// entry, then its chunks, then its subdirectories, with the prefix
    /// growing by the directory name. Traversal is iterative.
    pub async fn plan(
        conn: &mut SqliteConnection,
        chunks: &[Chunk],
        directories: &[Directory],
    ) -> Result<ArchivePlan> {
        let mut entries: Vec<ArchiveEntry> =
            chunks.iter().map(|c| ArchiveEntry::file("", c)).collect();

        let mut visited = HashSet::new();
        for top in directories {
            let mut stack: Vec<(Directory, String)> = vec![(top.clone(), String::new())];

            while let Some((directory, prefix)) = stack.pop() {
                if !visited.insert(directory.id) {
                    continue;
                }
                let path = format!("{prefix}{}/", directory.name);
                entries.push(ArchiveEntry::Directory {
                    path: path.clone(),
                    modified: directory.last_modified,
                });

                for chunk in ChunkRepository::list_by_directory(conn, directory.id).await? {
                    entries.push(ArchiveEntry::file(&path, &chunk));
                }

                let children = DirectoryRepository::list_children(conn, directory.id).await?;
                for child in children.into_iter().rev() {
                    stack.push((child, path.clone()));
                }
            }
        }

        Ok(ArchivePlan { entries })
    }

    /// Write a planned archive to `out`.
    ///
    /// Files missing from storage are skipped. If the writer reports that
    /// the client disconnected, the export stops and the summary is marked
    /// `aborted` instead of failing.
    pub fn write<W: Write>(
        plan: &ArchivePlan,
        storage: &FileStorage,
        out: W,
    ) -> Result<ExportSummary> {
        let mut builder = tar::Builder::new(out);
        let mut summary = ExportSummary::default();

        for entry in &plan.entries {
            let result = match entry {
                ArchiveEntry::Directory { path, modified } => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    header.set_mtime(mtime(modified));

                    let name = path.trim_end_matches('/');
                    builder
                        .append_data(&mut header, name, io::empty())
                        .map(|_| summary.directories += 1)
                }
                ArchiveEntry::File {
                    path,
                    storage_path,
                    modified,
                } => {
                    let file = match storage.open(storage_path) {
                        Ok(file) => file,
                        Err(e) => {
                            warn!(path = %path, error = %e, "skipping unreadable file in export");
                            summary.skipped += 1;
                            continue;
                        }
                    };
                    let size = match file.metadata() {
                        Ok(m) => m.len(),
                        Err(e) => {
                            warn!(path = %path, error = %e, "skipping unreadable file in export");
                            summary.skipped += 1;
                            continue;
                        }
                    };

                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_mode(0o644);
                    header.set_size(size);
                    header.set_mtime(mtime(modified));

                    builder.append_data(&mut header, path, file).map(|_| {
                        summary.files += 1;
                        summary.bytes += size;
                    })
                }
            };

            if let Err(e) = result {
                return Self::classify(e, summary);
            }
        }

        match builder.into_inner() {
            Ok(mut out) => {
                if let Err(e) = out.flush() {
                    return Self::classify(e, summary);
                }
            }
            Err(e) => return Self::classify(e, summary),
        }

        debug!(
            files = summary.files,
            directories = summary.directories,
            "archive written"
        );
        Ok(summary)
    }

    fn classify(e: io::Error, mut summary: ExportSummary) -> Result<ExportSummary> {
        if is_client_abort(&e) {
            warn!(error = %e, "client aborted archive download");
            summary.aborted = true;
            return Ok(summary);
        }
        Err(SiloError::Storage(format!("failed to write archive: {e}")))
    }
}
