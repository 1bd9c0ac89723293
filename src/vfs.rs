//! Virtual file system used by `require`/`load`.
//!
//! The engine never touches the disk directly; all file access goes through
//! a [`Vfs`] implementation supplied by the host. [`DiskFs`] is the default.

use std::collections::HashMap;

/// Host-provided file access. `stat` is optional and only used by hosts that
/// want to invalidate caches on modification time.
pub trait Vfs {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Option<Vec<u8>>;
    fn stat(&self, _path: &str) -> Option<u64> {
        None
    }
}

/// The real filesystem.
#[derive(Debug, Default)]
pub struct DiskFs;

impl Vfs for DiskFs {
    fn exists(&self, path: &str) -> bool {
        std::path::Path::new(path).is_file()
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(path).ok()
    }

    fn stat(&self, path: &str) -> Option<u64> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta.modified().ok()?;
        mtime
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs())
    }
}

/// An in-memory filesystem for embedding and tests.
#[derive(Debug, Default)]
pub struct MemFs {
    files: HashMap<String, Vec<u8>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }
}

impl Vfs for MemFs {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memfs_read() {
        let mut fs = MemFs::new();
        fs.insert("/lib/foo.rb", "def foo; 3 end");
        assert!(fs.exists("/lib/foo.rb"));
        assert!(!fs.exists("/lib/bar.rb"));
        assert_eq!(fs.read("/lib/foo.rb").unwrap(), b"def foo; 3 end");
        assert_eq!(fs.read("/lib/bar.rb"), None);
    }
}
