//! Path resolution for hookcord data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `HOOKCORD_DATA_DIR` env > `~/.hookcord`.
//! The resolved value is carried in [`DataDir`] rather than looked up globally.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Priority: `explicit` arg (already merged with the env var by clap) > `~/.hookcord`.
    /// Falls back to the system temp dir when no home directory exists.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let root = match explicit {
            Some(p) => p.to_path_buf(),
            None => dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".hookcord"),
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("hookcord.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create all required subdirectories under the data dir.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let dir = DataDir::resolve(Some(Path::new("/tmp/hookcord-test")));
        assert_eq!(dir.root(), Path::new("/tmp/hookcord-test"));
        assert_eq!(dir.db_path(), PathBuf::from("/tmp/hookcord-test/hookcord.db"));
        assert_eq!(dir.log_dir(), PathBuf::from("/tmp/hookcord-test/logs"));
    }

    #[test]
    fn default_dir_ends_with_hookcord() {
        let dir = DataDir::resolve(None);
        assert!(dir.root().ends_with(".hookcord"));
    }

    #[test]
    fn ensure_dirs_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(&tmp.path().join("data")));
        dir.ensure_dirs().unwrap();
        assert!(dir.log_dir().is_dir());
    }
}
