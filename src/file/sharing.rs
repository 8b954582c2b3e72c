//! Share option transitions and share targets.
//!
//! | option                     | share link | share targets          |
//! |----------------------------|------------|------------------------|
//! | `PRIVATE`                  | none       | none                   |
//! | `SHARE_WITH_USER`          | none       | added one by one       |
//! | `SHARE_WITH_ALL_WITH_LINK` | generated  | cleared on entry       |
//!
//! Every transition is a full replace of the previous state.

use sqlx::SqliteConnection;
use tracing::debug;

use super::chunk::{Chunk, ChunkRepository, ShareOption};
use crate::db::UserRepository;
use crate::{Result, SiloError};

/// Builds public share links.
#[derive(Debug, Clone)]
pub struct LinkGenerator {
    base_url: String,
}

impl LinkGenerator {
    /// Create a generator for the given public base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(SiloError::Config(
                "base url must be a valid string".to_string(),
            ));
        }
        Ok(Self {
            base_url: trimmed.to_string(),
        })
    }

    /// Link for downloading a chunk without authentication.
    pub fn file_sharing_link(&self, chunk_id: i64, file_name: &str) -> Result<String> {
        if file_name.trim().is_empty() {
            return Err(SiloError::Processing(
                "file id and name are required for the sharing link".to_string(),
            ));
        }
        Ok(format!(
            "{}/api/download_shared_file/{}/{}",
            self.base_url,
            chunk_id,
            urlencoding::encode(file_name)
        ))
    }
}

/// Sharing state machine over persisted chunks.
pub struct SharingState;

impl SharingState {
    /// Move a chunk to `option`, discarding its previous share data.
    pub async fn set_option(
        conn: &mut SqliteConnection,
        links: &LinkGenerator,
        chunk: &Chunk,
        option: ShareOption,
    ) -> Result<Chunk> {
        let link = match option {
            ShareOption::Private | ShareOption::ShareWithUser => None,
            ShareOption::ShareWithAllWithLink => {
                Some(links.file_sharing_link(chunk.id, &chunk.original_file_name)?)
            }
        };

        ChunkRepository::update_share_state(conn, chunk.id, option, link.as_deref()).await?;
        debug!(chunk_id = chunk.id, option = %option, "share option changed");

        ChunkRepository::get_by_id(conn, chunk.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("file".to_string()))
    }

    /// Rebuild the public link after the chunk's name changed.
    ///
    /// Chunks without a link are returned unchanged.
    pub async fn refresh_link(
        conn: &mut SqliteConnection,
        links: &LinkGenerator,
        chunk: &Chunk,
    ) -> Result<Chunk> {
        if chunk.share_option != ShareOption::ShareWithAllWithLink {
            return Ok(chunk.clone());
        }

        let link = links.file_sharing_link(chunk.id, &chunk.original_file_name)?;
        if chunk.share_link.as_deref() == Some(link.as_str()) {
            return Ok(chunk.clone());
        }
        ChunkRepository::set_share_link(conn, chunk.id, Some(&link)).await?;

        ChunkRepository::get_by_id(conn, chunk.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("file".to_string()))
    }

    /// Grant a user access to a chunk.
    pub async fn add_target(
        conn: &mut SqliteConnection,
        chunk: &Chunk,
        user_id: i64,
    ) -> Result<Chunk> {
        if chunk.share_option == ShareOption::Private {
            return Err(SiloError::FileManagement(
                "a private file can not be shared with users".to_string(),
            ));
        }
        if user_id == chunk.owner_id {
            return Err(SiloError::FileManagement(
                "a file can not be shared with its owner".to_string(),
            ));
        }
        if UserRepository::get_by_id(conn, user_id).await?.is_none() {
            return Err(SiloError::NotFound("user".to_string()));
        }

        ChunkRepository::add_share_target(conn, chunk.id, user_id).await?;

        ChunkRepository::get_by_id(conn, chunk.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("file".to_string()))
    }

    /// Revoke a user's access. Allowed in any state.
    pub async fn remove_target(
        conn: &mut SqliteConnection,
        chunk: &Chunk,
        user_id: i64,
    ) -> Result<Chunk> {
        ChunkRepository::remove_share_target(conn, chunk.id, user_id).await?;

        ChunkRepository::get_by_id(conn, chunk.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("file".to_string()))
    }
}
