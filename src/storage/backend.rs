//! Storage capability: how the backing file is opened on this platform.
//!
//! The store never branches on the target OS itself. It asks a
//! [`StorageBackend`] for a read/write handle and maps whatever comes back.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Opens backing files for the parameter store.
pub trait StorageBackend: Send + Sync {
    /// Open `path` for reading and writing, creating it if absent.
    /// Must not truncate; the store decides when to discard content.
    fn open_rw(&self, path: &Path) -> io::Result<File>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// The backend selected for the compilation target.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformBackend;

fn base_options() -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);
    opts
}

#[cfg(unix)]
impl StorageBackend for PlatformBackend {
    fn open_rw(&self, path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        base_options().mode(0o644).open(path)
    }

    fn name(&self) -> &'static str {
        "unix"
    }
}

#[cfg(windows)]
impl StorageBackend for PlatformBackend {
    fn open_rw(&self, path: &Path) -> io::Result<File> {
        use std::os::windows::fs::OpenOptionsExt;
        // FILE_SHARE_READ | FILE_SHARE_WRITE: other handles may map the file too.
        base_options().share_mode(0x1 | 0x2).open(path)
    }

    fn name(&self) -> &'static str {
        "windows"
    }
}

#[cfg(not(any(unix, windows)))]
impl StorageBackend for PlatformBackend {
    fn open_rw(&self, path: &Path) -> io::Result<File> {
        base_options().open(path)
    }

    fn name(&self) -> &'static str {
        "generic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_missing_file() {
        let dir = tempdir().expect("failed to create tempdir");
        let path = dir.path().join("params.bin");
        let file = PlatformBackend.open_rw(&path).expect("open should create");
        assert_eq!(file.metadata().unwrap().len(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_open_does_not_truncate() {
        let dir = tempdir().expect("failed to create tempdir");
        let path = dir.path().join("params.bin");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(&[1, 2, 3, 4]))
            .expect("failed to seed file");

        let file = PlatformBackend.open_rw(&path).expect("open should succeed");
        assert_eq!(file.metadata().unwrap().len(), 4);
    }

    #[test]
    fn test_open_in_missing_directory_fails() {
        let dir = tempdir().expect("failed to create tempdir");
        let path = dir.path().join("missing").join("params.bin");
        assert!(PlatformBackend.open_rw(&path).is_err());
    }

    #[test]
    fn test_backend_name() {
        assert!(!PlatformBackend.name().is_empty());
    }
}
