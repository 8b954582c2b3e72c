//! End-to-end storage scenarios.
//!
//! These tests drive the public `FileSystem` API and then check the tree,
//! quota and sharing invariants directly against the database.

use std::sync::Arc;

use silo::db::Database;
use silo::file::{
    ChunkRepository, DirectoryRepository, FileStorage, FileSystem, LinkGenerator, NewChunk,
    QuotaTracker, ShareOption, Upload,
};
use silo::{Principal, SiloError};
use tempfile::TempDir;

struct TestEnv {
    _temp: TempDir,
    fs: FileSystem,
}

async fn setup() -> TestEnv {
    let temp = TempDir::new().unwrap();
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let storage = FileStorage::new(temp.path().join("storage")).unwrap();
    let links = LinkGenerator::new("https://files.example.com/").unwrap();
    TestEnv {
        _temp: temp,
        fs: FileSystem::new(db, storage, links),
    }
}

/// Provision an account and return its principal and root directory id.
async fn create_account(fs: &FileSystem, username: &str, quota: i64) -> (Principal, i64) {
    let account = fs.provision_account(username, quota).await.unwrap();
    (
        Principal::new(account.id, username),
        account.root_directory_id,
    )
}

async fn upload(fs: &FileSystem, who: &Principal, dir: i64, name: &str, size: usize) -> i64 {
    fs.store(who, Upload::from_bytes(dir, name, vec![7u8; size]))
        .await
        .unwrap()
        .id
}

/// Check that every directory of `owner` has an element count matching its
/// actual children.
async fn assert_element_counts(fs: &FileSystem, owner: &Principal, root: i64) {
    let mut conn = fs.db().pool().acquire().await.unwrap();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let directory = DirectoryRepository::get_by_id(&mut conn, id)
            .await
            .unwrap()
            .unwrap();
        let chunks = ChunkRepository::count_by_directory(&mut conn, id).await.unwrap();
        let children = DirectoryRepository::child_ids(&mut conn, id).await.unwrap();
        assert_eq!(
            directory.element_count,
            chunks + children.len() as i64,
            "element count of directory {} ({})",
            id,
            owner.username
        );
        stack.extend(children);
    }
}

#[tokio::test]
async fn scenario_a_upload_within_quota() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;

    let chunk = env
        .fs
        .store(
            &alice,
            Upload::from_bytes(root, "report.pdf", vec![1u8; 500]),
        )
        .await
        .unwrap();

    assert_eq!(chunk.name, "report.pdf");
    assert_eq!(chunk.size_bytes, 500);
    assert_eq!(chunk.mime_type, "application/pdf");

    let usage = env.fs.usage(&alice).await.unwrap();
    assert_eq!(usage.bytes_in_storage, 500);
    assert_eq!(usage.available_bytes, 500);
    assert_element_counts(&env.fs, &alice, root).await;
}

#[tokio::test]
async fn scenario_b_duplicate_name_is_renamed() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;

    let first = upload(&env.fs, &alice, root, "report.pdf", 100).await;
    let second = env
        .fs
        .store(
            &alice,
            Upload::from_bytes(root, "report.pdf", b"second".to_vec()),
        )
        .await
        .unwrap();

    assert_eq!(second.name, "report (1).pdf");

    // Both remain retrievable
    let mut out = Vec::new();
    env.fs.stream_chunk(first, &alice, &mut out).await.unwrap();
    assert_eq!(out.len(), 100);
    let mut out = Vec::new();
    env.fs.stream_chunk(second.id, &alice, &mut out).await.unwrap();
    assert_eq!(out, b"second");

    let third = upload(&env.fs, &alice, root, "report.pdf", 1).await;
    let third = env.fs.chunk(third, &alice).await.unwrap();
    assert_eq!(third.name, "report (2).pdf");
}

#[tokio::test]
async fn scenario_c_quota_exceeded() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;
    upload(&env.fs, &alice, root, "big.bin", 900).await;

    let result = env
        .fs
        .store(&alice, Upload::from_bytes(root, "more.bin", vec![0u8; 200]))
        .await;
    assert!(matches!(result, Err(SiloError::Storage(_))));

    let usage = env.fs.usage(&alice).await.unwrap();
    assert_eq!(usage.bytes_in_storage, 900);

    let listing = env.fs.directory(root, &alice).await.unwrap();
    assert_eq!(listing.chunks.len(), 1);
    assert_eq!(listing.element_count, 1);
}

#[tokio::test]
async fn scenario_d_root_cannot_be_deleted() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;
    let docs = env.fs.create_directory("docs", root, &alice).await.unwrap();
    upload(&env.fs, &alice, docs.id, "a.txt", 10).await;

    let result = env.fs.delete_directory(root, &alice).await;
    assert!(matches!(result, Err(SiloError::FileManagement(_))));

    let listing = env.fs.directory(root, &alice).await.unwrap();
    assert_eq!(listing.subdirectories.len(), 1);
    let docs = env.fs.directory(docs.id, &alice).await.unwrap();
    assert_eq!(docs.chunks.len(), 1);
    assert_eq!(env.fs.usage(&alice).await.unwrap().bytes_in_storage, 10);
}

#[tokio::test]
async fn scenario_e_back_to_private_clears_sharing() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;
    let (bob, _) = create_account(&env.fs, "bob", 1000).await;
    let (carol, _) = create_account(&env.fs, "carol", 1000).await;
    let id = upload(&env.fs, &alice, root, "notes.txt", 20).await;

    env.fs
        .set_share_option(id, "SHARE_WITH_USER", &alice)
        .await
        .unwrap();
    env.fs.share_with_user(id, bob.user_id, &alice).await.unwrap();
    let shared = env
        .fs
        .share_with_user(id, carol.user_id, &alice)
        .await
        .unwrap();
    assert_eq!(shared.share_with.len(), 2);
    assert!(shared.share_link.is_none());

    let private = env.fs.set_share_option(id, "private", &alice).await.unwrap();
    assert_eq!(private.share_option, ShareOption::Private);
    assert!(private.share_with.is_empty());
    assert!(private.share_link.is_none());

    assert!(env.fs.files_shared_with_me(&bob).await.unwrap().is_empty());
    assert!(matches!(
        env.fs.shared_chunk(id, &carol).await,
        Err(SiloError::FileManagement(_))
    ));
}

#[tokio::test]
async fn scenario_f_delete_keeps_foreign_entries() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 10_000).await;
    let (bob, _) = create_account(&env.fs, "bob", 10_000).await;

    // target/{one, two/three} with five files of alice spread across them
    let target = env.fs.create_directory("target", root, &alice).await.unwrap();
    let one = env.fs.create_directory("one", target.id, &alice).await.unwrap();
    let two = env.fs.create_directory("two", target.id, &alice).await.unwrap();
    let three = env.fs.create_directory("three", two.id, &alice).await.unwrap();

    upload(&env.fs, &alice, target.id, "a1.txt", 10).await;
    upload(&env.fs, &alice, one.id, "a2.txt", 10).await;
    upload(&env.fs, &alice, one.id, "a3.txt", 10).await;
    upload(&env.fs, &alice, two.id, "a4.txt", 10).await;
    upload(&env.fs, &alice, three.id, "a5.txt", 10).await;

    // A file of bob's placed directly in the target directory
    let foreign = {
        let mut conn = env.fs.db().pool().acquire().await.unwrap();
        let id = ChunkRepository::insert(
            &mut conn,
            &NewChunk {
                owner_id: bob.user_id,
                directory_id: target.id,
                original_file_name: "b.txt".to_string(),
                size_bytes: 3,
                mime_type: "text/plain".to_string(),
            },
        )
        .await
        .unwrap();
        let path = FileStorage::chunk_relative_path(bob.user_id, id, "b.txt").unwrap();
        ChunkRepository::set_storage_path(&mut conn, id, &path)
            .await
            .unwrap();
        DirectoryRepository::increment_element_count(&mut conn, target.id)
            .await
            .unwrap();
        QuotaTracker::increase(&mut conn, bob.user_id, 3).await.unwrap();
        env.fs.storage().write_new(&path, &mut &b"bob"[..]).unwrap();
        id
    };

    let report = env.fs.delete_directory(target.id, &alice).await.unwrap();

    assert_eq!(report.deleted_chunks.len(), 5);
    assert_eq!(report.skipped_chunks, vec![foreign]);
    assert_eq!(report.freed_bytes, 50);
    let mut deleted = report.deleted_directories.clone();
    deleted.sort();
    let mut expected = vec![one.id, two.id, three.id];
    expected.sort();
    assert_eq!(deleted, expected);
    assert_eq!(report.retained_directories, vec![target.id]);

    // Bob's file keeps its parent and its bytes
    let mut conn = env.fs.db().pool().acquire().await.unwrap();
    let chunk = ChunkRepository::get_by_id(&mut conn, foreign)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chunk.directory_id, target.id);
    assert!(env.fs.storage().exists(&chunk.storage_path));
    let target_row = DirectoryRepository::get_by_id(&mut conn, target.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(target_row.element_count, 1);
    assert_eq!(
        QuotaTracker::usage(&mut conn, alice.user_id)
            .await
            .unwrap()
            .bytes_in_storage,
        0
    );
    assert_eq!(
        QuotaTracker::usage(&mut conn, bob.user_id)
            .await
            .unwrap()
            .bytes_in_storage,
        3
    );
    drop(conn);

    assert_element_counts(&env.fs, &alice, root).await;
}

#[tokio::test]
async fn round_trip_store_then_delete() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;

    let stored = env
        .fs
        .store(
            &alice,
            Upload::from_bytes(root, "data.csv", b"a,b\n1,2\n".to_vec())
                .with_mime_type("text/csv"),
        )
        .await
        .unwrap();

    let found = env.fs.chunk(stored.id, &alice).await.unwrap();
    assert_eq!(found.name, stored.name);
    assert_eq!(found.size_bytes, 8);
    assert_eq!(found.mime_type, "text/csv");

    env.fs.delete_chunk(stored.id, &alice).await.unwrap();
    assert!(matches!(
        env.fs.chunk(stored.id, &alice).await,
        Err(SiloError::NotFound(_))
    ));
}

#[tokio::test]
async fn other_users_entries_are_not_found() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;
    let (bob, bob_root) = create_account(&env.fs, "bob", 1000).await;
    let id = upload(&env.fs, &alice, root, "secret.txt", 5).await;

    assert!(matches!(
        env.fs.chunk(id, &bob).await,
        Err(SiloError::NotFound(_))
    ));
    assert!(matches!(
        env.fs.directory(root, &bob).await,
        Err(SiloError::NotFound(_))
    ));
    assert!(matches!(
        env.fs.delete_chunk(id, &bob).await,
        Err(SiloError::NotFound(_))
    ));
    assert!(matches!(
        env.fs
            .store(&bob, Upload::from_bytes(root, "x.txt", vec![1]))
            .await,
        Err(SiloError::NotFound(_))
    ));
    assert!(matches!(
        env.fs.move_directory(bob_root, root, &bob).await,
        Err(SiloError::NotFound(_))
    ));
}

#[tokio::test]
async fn link_sharing_round_trip() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;
    let id = upload(&env.fs, &alice, root, "my photo.jpg", 4).await;

    assert!(matches!(
        env.fs.public_chunk(id).await,
        Err(SiloError::NotFound(_))
    ));

    let shared = env
        .fs
        .set_share_option(id, "share_with_all_with_link", &alice)
        .await
        .unwrap();
    assert_eq!(
        shared.share_link.as_deref(),
        Some(
            format!("https://files.example.com/api/download_shared_file/{id}/my%20photo.jpg")
                .as_str()
        )
    );

    let mut out = Vec::new();
    let (_, copied) = env.fs.stream_public(id, &mut out).await.unwrap();
    assert_eq!(copied, 4);

    let back = env
        .fs
        .set_share_option(id, "SHARE_WITH_USER", &alice)
        .await
        .unwrap();
    assert!(back.share_link.is_none());
    assert!(env.fs.public_chunk(id).await.is_err());
}

#[tokio::test]
async fn directory_moves_keep_counts() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;

    let a = env.fs.create_directory("a", root, &alice).await.unwrap();
    let b = env.fs.create_directory("b", root, &alice).await.unwrap();
    let c = env.fs.create_directory("c", a.id, &alice).await.unwrap();
    upload(&env.fs, &alice, c.id, "f.txt", 3).await;

    env.fs.move_directory(c.id, b.id, &alice).await.unwrap();
    assert_element_counts(&env.fs, &alice, root).await;

    // Moving an ancestor under its own descendant is refused
    assert!(matches!(
        env.fs.move_directory(b.id, c.id, &alice).await,
        Err(SiloError::FileManagement(_))
    ));
    // The root never moves
    assert!(matches!(
        env.fs.move_directory(root, a.id, &alice).await,
        Err(SiloError::FileManagement(_))
    ));

    // Same name as an existing subdirectory is auto-renamed on create
    let dup = env.fs.create_directory("a", root, &alice).await.unwrap();
    assert_eq!(dup.name, "a (1)");
    assert_element_counts(&env.fs, &alice, root).await;
}

#[tokio::test]
async fn rename_rejects_collisions() {
    let env = setup().await;
    let (alice, root) = create_account(&env.fs, "alice", 1000).await;
    upload(&env.fs, &alice, root, "one.txt", 1).await;
    let two = upload(&env.fs, &alice, root, "two.txt", 1).await;

    assert!(matches!(
        env.fs.rename_chunk(two, "one", &alice).await,
        Err(SiloError::FileManagement(_))
    ));
    let renamed = env.fs.rename_chunk(two, "three", &alice).await.unwrap();
    assert_eq!(renamed.name, "three.txt");

    assert!(matches!(
        env.fs.rename_directory(root, "home", &alice).await,
        Err(SiloError::FileManagement(_))
    ));
}
