//! Physical file storage for silo.
//!
//! Every stored file lives under a single configured root:
//! ```text
//! {root}/
//! ├── 1/                     one directory per account
//! │   ├── 12___report.pdf    {chunkId}___{displayName}
//! │   └── 15___notes.txt
//! └── 2/
//!     └── 13___photo.png
//! ```
//! Paths handed to this module are relative to the root. They are
//! normalized component by component, so `..` can never climb above it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::{Result, SiloError};

/// Separator between the chunk id and the display name on disk.
const ID_NAME_SEPARATOR: &str = "___";

/// Sandboxed physical file storage.
#[derive(Debug, Clone)]
pub struct FileStorage {
    /// Root directory for all stored files.
    root: PathBuf,
}

impl FileStorage {
    /// Create a new FileStorage rooted at the given path.
    ///
    /// The root directory will be created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(SiloError::Config(
                "storage root path is required".to_string(),
            ));
        }
        if root.exists() && !root.is_dir() {
            return Err(SiloError::Config(format!(
                "storage root {} is not a directory",
                root.display()
            )));
        }
        fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    /// Get the root path of this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve relative components to an absolute path under the root.
    ///
    /// Backslashes are treated as separators. `..` is applied lexically and
    /// fails once it would leave the root; absolute components fail outright.
    pub fn resolve(&self, components: &[&str]) -> Result<PathBuf> {
        let mut normalized = PathBuf::new();

        for component in components {
            let component = component.replace('\\', "/");
            for part in Path::new(&component).components() {
                match part {
                    Component::Normal(segment) => normalized.push(segment),
                    Component::CurDir => {}
                    Component::ParentDir => {
                        if !normalized.pop() {
                            return Err(SiloError::Storage(
                                "path escapes the storage root".to_string(),
                            ));
                        }
                    }
                    Component::RootDir | Component::Prefix(_) => {
                        return Err(SiloError::Storage(
                            "absolute paths are not allowed".to_string(),
                        ));
                    }
                }
            }
        }

        if normalized.as_os_str().is_empty() {
            return Err(SiloError::Storage(
                "can not write at storage root".to_string(),
            ));
        }

        Ok(self.root.join(normalized))
    }

    /// Relative storage path of a chunk: `{ownerId}/{chunkId}___{name}`.
    pub fn chunk_relative_path(owner_id: i64, chunk_id: i64, name: &str) -> Result<String> {
        if name.trim().is_empty() || name.contains(['/', '\\']) {
            return Err(SiloError::Processing(format!(
                "invalid stored name for chunk {chunk_id}"
            )));
        }
        Ok(format!("{owner_id}/{chunk_id}{ID_NAME_SEPARATOR}{name}"))
    }

    /// Absolute path of an account's storage directory.
    pub fn user_dir(&self, owner_id: i64) -> Result<PathBuf> {
        self.resolve(&[&owner_id.to_string()])
    }

    /// Create the storage directory for a freshly provisioned account.
    pub fn create_user_dir(&self, owner_id: i64) -> Result<PathBuf> {
        let dir = self.user_dir(owner_id)?;
        if dir.exists() {
            return Err(SiloError::FileManagement(format!(
                "storage directory for user {owner_id} already exists"
            )));
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Whether a path exists and is both readable and writable.
    pub fn verify_exists(path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path) else {
            return false;
        };
        if metadata.permissions().readonly() {
            return false;
        }
        if metadata.is_dir() {
            fs::read_dir(path).is_ok()
        } else {
            File::open(path).is_ok()
        }
    }

    /// Write a new file from a reader, returning the number of bytes written.
    ///
    /// Refuses to overwrite an existing file. A partially written file is
    /// removed before the error is returned.
    pub fn write_new<R: Read>(&self, relative: &str, reader: &mut R) -> Result<u64> {
        let path = self.resolve(&[relative])?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SiloError::FileManagement(
                    "a file already exists at this location".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let written = io::copy(reader, &mut file).and_then(|n| file.sync_all().map(|_| n));
        match written {
            Ok(n) => Ok(n),
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&path);
                Err(SiloError::Storage(format!("failed to write file: {e}")))
            }
        }
    }

    /// Open a stored file for reading.
    pub fn open(&self, relative: &str) -> Result<File> {
        let path = self.resolve(&[relative])?;

        match File::open(&path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SiloError::Storage(
                "file could not be accessed".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a stored file.
    ///
    /// Returns `true` if the file was deleted, `false` if it didn't exist.
    pub fn delete(&self, relative: &str) -> Result<bool> {
        let path = self.resolve(&[relative])?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a stored file exists.
    pub fn exists(&self, relative: &str) -> bool {
        self.resolve(&[relative])
            .map(|path| path.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_storage() -> (TempDir, FileStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path().join("root")).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_new_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let storage_path = temp_dir.path().join("storage");

        assert!(!storage_path.exists());

        let storage = FileStorage::new(&storage_path).unwrap();

        assert!(storage_path.exists());
        assert_eq!(storage.root(), storage_path);
    }

    #[test]
    fn test_new_rejects_empty_or_file_root() {
        assert!(matches!(FileStorage::new(""), Err(SiloError::Config(_))));

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("plain");
        fs::write(&file_path, b"x").unwrap();
        assert!(matches!(
            FileStorage::new(&file_path),
            Err(SiloError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_normalizes() {
        let (_temp_dir, storage) = setup_storage();

        let path = storage.resolve(&["1", "./a/../b\\c"]).unwrap();
        assert_eq!(path, storage.root().join("1").join("b").join("c"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let (_temp_dir, storage) = setup_storage();

        for attempt in ["../etc/passwd", "1/../../x", "..\\..\\x", "/etc/passwd"] {
            let result = storage.resolve(&[attempt]);
            assert!(
                matches!(result, Err(SiloError::Storage(_))),
                "{attempt} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_root_itself() {
        let (_temp_dir, storage) = setup_storage();

        assert!(matches!(storage.resolve(&[]), Err(SiloError::Storage(_))));
        assert!(matches!(storage.resolve(&["a/.."]), Err(SiloError::Storage(_))));
        assert!(matches!(storage.resolve(&["."]), Err(SiloError::Storage(_))));
    }

    #[test]
    fn test_chunk_relative_path() {
        assert_eq!(
            FileStorage::chunk_relative_path(3, 42, "report.pdf").unwrap(),
            "3/42___report.pdf"
        );
        assert!(matches!(
            FileStorage::chunk_relative_path(3, 42, "a/b"),
            Err(SiloError::Processing(_))
        ));
        assert!(matches!(
            FileStorage::chunk_relative_path(3, 42, " "),
            Err(SiloError::Processing(_))
        ));
    }

    #[test]
    fn test_create_user_dir_twice() {
        let (_temp_dir, storage) = setup_storage();

        let dir = storage.create_user_dir(7).unwrap();
        assert!(FileStorage::verify_exists(&dir));

        let result = storage.create_user_dir(7);
        assert!(matches!(result, Err(SiloError::FileManagement(_))));
    }

    #[test]
    fn test_write_open_delete() {
        let (_temp_dir, storage) = setup_storage();
        let content = b"Hello, World!";

        let written = storage
            .write_new("1/5___hello.txt", &mut &content[..])
            .unwrap();
        assert_eq!(written, content.len() as u64);
        assert!(storage.exists("1/5___hello.txt"));

        let mut loaded = Vec::new();
        storage
            .open("1/5___hello.txt")
            .unwrap()
            .read_to_end(&mut loaded)
            .unwrap();
        assert_eq!(loaded, content);

        assert!(storage.delete("1/5___hello.txt").unwrap());
        assert!(!storage.exists("1/5___hello.txt"));
        assert!(!storage.delete("1/5___hello.txt").unwrap());
    }

    #[test]
    fn test_write_new_refuses_overwrite() {
        let (_temp_dir, storage) = setup_storage();

        storage.write_new("1/1___a", &mut &b"first"[..]).unwrap();
        let result = storage.write_new("1/1___a", &mut &b"second"[..]);
        assert!(matches!(result, Err(SiloError::FileManagement(_))));
    }

    #[test]
    fn test_write_new_removes_partial_file() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
            }
        }

        let (_temp_dir, storage) = setup_storage();
        let result = storage.write_new("1/2___partial", &mut Failing);

        assert!(matches!(result, Err(SiloError::Storage(_))));
        assert!(!storage.exists("1/2___partial"));
    }

    #[test]
    fn test_open_missing() {
        let (_temp_dir, storage) = setup_storage();

        let result = storage.open("1/404___missing");
        assert!(matches!(result, Err(SiloError::Storage(_))));
    }
}
