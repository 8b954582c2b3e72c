//! Directory tree operations.
//!
//! Keeps the tree invariants: one root per owner, no self-parenting or
//! cycles, and `element_count` equal to the number of direct children.

use std::collections::{HashSet, VecDeque};

use sqlx::SqliteConnection;

use super::chunk::{Chunk, ChunkRepository};
use super::directory::{Directory, DirectoryRepository};
use super::naming::{sanitize_name, unique_name};
use crate::{Result, SiloError};

/// Tree-level directory operations.
pub struct DirectoryTree;

impl DirectoryTree {
    /// Create an account's root directory.
    ///
    /// Callers make sure the owner has no root yet; the database refuses a
    /// second one.
    pub async fn create_root(
        conn: &mut SqliteConnection,
        name: &str,
        owner_id: i64,
    ) -> Result<Directory> {
        let id = DirectoryRepository::insert(conn, owner_id, name, None).await?;
        DirectoryRepository::get_by_id(conn, id)
            .await?
            .ok_or_else(|| SiloError::NotFound("directory".to_string()))
    }

    /// Create a subdirectory, suffixing the name on a sibling collision.
    pub async fn create_subdirectory(
        conn: &mut SqliteConnection,
        name: &str,
        owner_id: i64,
        parent_id: i64,
    ) -> Result<Directory> {
        let parent = DirectoryRepository::get_owned(conn, parent_id, owner_id)
            .await?
            .ok_or_else(|| SiloError::NotFound("directory".to_string()))?;

        let name = sanitize_name(name)?;
        let taken: HashSet<String> = DirectoryRepository::names_in(conn, parent.id)
            .await?
            .into_iter()
            .collect();
        let name = unique_name(&name, &taken);

        let id = DirectoryRepository::insert(conn, owner_id, &name, Some(parent.id)).await?;
        DirectoryRepository::increment_element_count(conn, parent.id).await?;

        DirectoryRepository::get_by_id(conn, id)
            .await?
            .ok_or_else(|| SiloError::NotFound("directory".to_string()))
    }

    /// Rename a directory. The root can not be renamed and sibling names
    /// must stay distinct.
    pub async fn rename(
        conn: &mut SqliteConnection,
        directory: &Directory,
        new_name: &str,
    ) -> Result<Directory> {
        let Some(parent_id) = directory.parent_id else {
            return Err(SiloError::FileManagement(
                "this directory can not be renamed".to_string(),
            ));
        };

        let new_name = sanitize_name(new_name)?;
        if new_name != directory.name
            && DirectoryRepository::name_taken(conn, parent_id, &new_name, Some(directory.id))
                .await?
        {
            return Err(SiloError::FileManagement(format!(
                "a directory named \"{new_name}\" already exists here"
            )));
        }

        DirectoryRepository::update_name(conn, directory.id, &new_name).await?;
        DirectoryRepository::get_by_id(conn, directory.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("directory".to_string()))
    }

    /// Move a directory under a new parent.
    ///
    /// Detaching from the old parent and attaching to the new one happen on
    /// the same connection, so inside a transaction they commit together.
    pub async fn reparent(
        conn: &mut SqliteConnection,
        directory: &Directory,
        new_parent: &Directory,
    ) -> Result<Directory> {
        let Some(old_parent_id) = directory.parent_id else {
            return Err(SiloError::FileManagement(
                "the root storage directory can not be moved".to_string(),
            ));
        };
        if directory.id == new_parent.id {
            return Err(SiloError::FileManagement(
                "a directory can not be its own parent".to_string(),
            ));
        }
        if directory.owner_id != new_parent.owner_id {
            return Err(SiloError::FileManagement(
                "invalid target directory".to_string(),
            ));
        }
        if old_parent_id == new_parent.id {
            return Ok(directory.clone());
        }

        let ancestors = DirectoryRepository::path_to_root(conn, new_parent.id).await?;
        if ancestors.iter().any(|d| d.id == directory.id) {
            return Err(SiloError::FileManagement(
                "a directory can not be moved into its own subtree".to_string(),
            ));
        }
        if DirectoryRepository::name_taken(conn, new_parent.id, &directory.name, None).await? {
            return Err(SiloError::FileManagement(format!(
                "a directory named \"{}\" already exists in the target",
                directory.name
            )));
        }

        DirectoryRepository::set_parent(conn, directory.id, new_parent.id).await?;
        DirectoryRepository::decrement_element_count(conn, old_parent_id).await?;
        DirectoryRepository::increment_element_count(conn, new_parent.id).await?;

        DirectoryRepository::get_by_id(conn, directory.id)
            .await?
            .ok_or_else(|| SiloError::NotFound("directory".to_string()))
    }

    /// Every chunk in the subtree, including the directory's own chunks.
    ///
    /// Depth-first with an explicit stack. Directories removed concurrently
    /// simply contribute nothing.
    pub async fn extract_subtree_chunks(
        conn: &mut SqliteConnection,
        directory_id: i64,
    ) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![directory_id];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            chunks.extend(ChunkRepository::list_by_directory(conn, current).await?);

            let children = DirectoryRepository::child_ids(conn, current).await?;
            stack.extend(children.into_iter().rev());
        }

        Ok(chunks)
    }

    /// Every descendant directory in preorder, excluding the directory itself.
    pub async fn extract_subtree_directories(
        conn: &mut SqliteConnection,
        directory_id: i64,
    ) -> Result<Vec<Directory>> {
        let mut directories = Vec::new();
        let mut visited = HashSet::from([directory_id]);
        let mut stack: VecDeque<Directory> = DirectoryRepository::list_children(conn, directory_id)
            .await?
            .into();

        while let Some(current) = stack.pop_front() {
            if !visited.insert(current.id) {
                continue;
            }
            let children = DirectoryRepository::list_children(conn, current.id).await?;
            for child in children.into_iter().rev() {
                stack.push_front(child);
            }
            directories.push(current);
        }

        Ok(directories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRepository;
    use crate::file::chunk::NewChunk;
    use crate::Database;

    async fn setup() -> (Database, i64, Directory) {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let user = UserRepository::create(&mut conn, "alice", 1000).await.unwrap();
        let root = DirectoryTree::create_root(&mut conn, &user.id.to_string(), user.id)
            .await
            .unwrap();
        drop(conn);
        (db, user.id, root)
    }

    async fn add_chunk(conn: &mut SqliteConnection, owner: i64, dir: i64, name: &str) -> i64 {
        let id = ChunkRepository::insert(
            conn,
            &NewChunk {
                owner_id: owner,
                directory_id: dir,
                original_file_name: name.to_string(),
                size_bytes: 1,
                mime_type: "text/plain".to_string(),
            },
        )
        .await
        .unwrap();
        DirectoryRepository::increment_element_count(conn, dir)
            .await
            .unwrap();
        id
    }

    async fn element_count(conn: &mut SqliteConnection, id: i64) -> i64 {
        DirectoryRepository::get_by_id(conn, id)
            .await
            .unwrap()
            .unwrap()
            .element_count
    }

    #[tokio::test]
    async fn test_create_subdirectory_suffixes() {
        let (db, owner, root) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let a = DirectoryTree::create_subdirectory(&mut conn, "docs", owner, root.id)
            .await
            .unwrap();
        let b = DirectoryTree::create_subdirectory(&mut conn, "docs", owner, root.id)
            .await
            .unwrap();

        assert_eq!(a.name, "docs");
        assert_eq!(b.name, "docs (1)");
        assert_eq!(element_count(&mut conn, root.id).await, 2);
    }

    #[tokio::test]
    async fn test_create_subdirectory_foreign_parent() {
        let (db, _owner, root) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let bob = UserRepository::create(&mut conn, "bob", 1000).await.unwrap();

        let result = DirectoryTree::create_subdirectory(&mut conn, "x", bob.id, root.id).await;
        assert!(matches!(result, Err(SiloError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rename_rules() {
        let (db, owner, root) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let result = DirectoryTree::rename(&mut conn, &root, "new").await;
        assert!(matches!(result, Err(SiloError::FileManagement(_))));

        let a = DirectoryTree::create_subdirectory(&mut conn, "a", owner, root.id)
            .await
            .unwrap();
        DirectoryTree::create_subdirectory(&mut conn, "b", owner, root.id)
            .await
            .unwrap();

        let result = DirectoryTree::rename(&mut conn, &a, "b").await;
        assert!(matches!(result, Err(SiloError::FileManagement(_))));

        let renamed = DirectoryTree::rename(&mut conn, &a, "c").await.unwrap();
        assert_eq!(renamed.name, "c");
    }

    #[tokio::test]
    async fn test_reparent() {
        let (db, owner, root) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let a = DirectoryTree::create_subdirectory(&mut conn, "a", owner, root.id)
            .await
            .unwrap();
        let b = DirectoryTree::create_subdirectory(&mut conn, "b", owner, root.id)
            .await
            .unwrap();
        let a_child = DirectoryTree::create_subdirectory(&mut conn, "inner", owner, a.id)
            .await
            .unwrap();

        // into itself, into its own descendant, root
        assert!(DirectoryTree::reparent(&mut conn, &a, &a).await.is_err());
        assert!(DirectoryTree::reparent(&mut conn, &a, &a_child).await.is_err());
        assert!(DirectoryTree::reparent(&mut conn, &root, &b).await.is_err());

        let moved = DirectoryTree::reparent(&mut conn, &a, &b).await.unwrap();
        assert_eq!(moved.parent_id, Some(b.id));
        assert_eq!(element_count(&mut conn, root.id).await, 1);
        assert_eq!(element_count(&mut conn, b.id).await, 1);
    }

    #[tokio::test]
    async fn test_extract_subtree() {
        let (db, owner, root) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let top = DirectoryTree::create_subdirectory(&mut conn, "top", owner, root.id)
            .await
            .unwrap();
        let mid = DirectoryTree::create_subdirectory(&mut conn, "mid", owner, top.id)
            .await
            .unwrap();
        let leaf = DirectoryTree::create_subdirectory(&mut conn, "leaf", owner, mid.id)
            .await
            .unwrap();
        let side = DirectoryTree::create_subdirectory(&mut conn, "side", owner, top.id)
            .await
            .unwrap();

        add_chunk(&mut conn, owner, top.id, "t.txt").await;
        add_chunk(&mut conn, owner, leaf.id, "l.txt").await;
        add_chunk(&mut conn, owner, side.id, "s.txt").await;
        add_chunk(&mut conn, owner, root.id, "outside.txt").await;

        let dirs = DirectoryTree::extract_subtree_directories(&mut conn, top.id)
            .await
            .unwrap();
        let ids: Vec<_> = dirs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![mid.id, leaf.id, side.id]);

        let chunks = DirectoryTree::extract_subtree_chunks(&mut conn, top.id)
            .await
            .unwrap();
        let mut names: Vec<_> = chunks.iter().map(|c| c.original_file_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["l.txt", "s.txt", "t.txt"]);
    }

    #[tokio::test]
    async fn test_extract_deep_tree() {
        let (db, owner, root) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let mut parent = root.id;
        for i in 0..200 {
            let dir = DirectoryTree::create_subdirectory(&mut conn, &format!("d{i}"), owner, parent)
                .await
                .unwrap();
            parent = dir.id;
        }

        let dirs = DirectoryTree::extract_subtree_directories(&mut conn, root.id)
            .await
            .unwrap();
        assert_eq!(dirs.len(), 200);
    }
}
