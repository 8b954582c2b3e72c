//! Database schema and migrations for silo.
//!
//! Migrations are applied sequentially when the database is first opened
//! or upgraded; the schema_version table tracks which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Storage accounts
    r#"
-- Only the quota fields of an account live here; credentials are external.
CREATE TABLE users (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    username            TEXT NOT NULL UNIQUE,
    max_storage_bytes   INTEGER NOT NULL CHECK (max_storage_bytes >= 0),
    bytes_in_storage    INTEGER NOT NULL DEFAULT 0
                        CHECK (bytes_in_storage >= 0 AND bytes_in_storage <= max_storage_bytes),
    created_at          TEXT NOT NULL
);
"#,
    // v2: Directory tree
    r#"
CREATE TABLE directories (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    element_count   INTEGER NOT NULL DEFAULT 0 CHECK (element_count >= 0),
    parent_id       INTEGER REFERENCES directories(id),   -- NULL for the root
    created_at      TEXT NOT NULL,
    last_modified   TEXT NOT NULL,
    CHECK (parent_id IS NULL OR parent_id <> id)
);

CREATE INDEX idx_directories_parent_id ON directories(parent_id);
CREATE INDEX idx_directories_owner_id ON directories(owner_id);
CREATE UNIQUE INDEX idx_directories_one_root ON directories(owner_id) WHERE parent_id IS NULL;
"#,
    // v3: Stored files
    r#"
CREATE TABLE chunks (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id            INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    directory_id        INTEGER NOT NULL REFERENCES directories(id),
    original_file_name  TEXT NOT NULL,
    storage_path        TEXT NOT NULL,       -- relative to the storage root
    size_bytes          INTEGER NOT NULL CHECK (size_bytes >= 0),
    mime_type           TEXT NOT NULL,
    share_option        TEXT NOT NULL DEFAULT 'PRIVATE',
    share_link          TEXT,
    is_favorite         INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    last_modified       TEXT NOT NULL,
    CHECK (share_option IN ('PRIVATE', 'SHARE_WITH_USER', 'SHARE_WITH_ALL_WITH_LINK')),
    CHECK ((share_option = 'SHARE_WITH_ALL_WITH_LINK') = (share_link IS NOT NULL))
);

CREATE INDEX idx_chunks_owner_id ON chunks(owner_id);
CREATE UNIQUE INDEX idx_chunks_directory_name ON chunks(directory_id, original_file_name);
"#,
    // v4: Share targets
    r#"
CREATE TABLE chunk_shares (
    chunk_id    INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    shared_at   TEXT NOT NULL,
    PRIMARY KEY (chunk_id, user_id)
);

CREATE INDEX idx_chunk_shares_user_id ON chunk_shares(user_id);
"#,
];
