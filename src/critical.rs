//! The protected action performed inside the critical section.

use crate::{PeerId, Result};
use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

/// Whatever a peer does while it holds the token and has been granted access.
pub trait CriticalSection: Send + Sync {
    fn access(&self, peer: PeerId) -> Result<()>;
}

/// Append-only text log with one line per critical-section entry.
///
/// The file is opened and closed on every write. Only the token holder ever
/// writes, so no file lock is taken.
#[derive(Debug, Clone)]
pub struct AccessLog {
    path: PathBuf,
}

impl AccessLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(peer: PeerId) -> String {
        format!("Peer {peer} accessed critical section\n")
    }

    /// Empties the log, creating it if needed.
    pub fn clear(&self) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

impl CriticalSection for AccessLog {
    fn access(&self, peer: PeerId) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(Self::line(peer).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn appends_one_line_per_access() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path().join("Critical Section.txt"));

        log.access(PeerId(5001)).unwrap();
        log.access(PeerId(5003)).unwrap();

        assert_eq!(
            fs::read_to_string(log.path()).unwrap(),
            "Peer 5001 accessed critical section\nPeer 5003 accessed critical section\n"
        );
    }

    #[test]
    fn clear_truncates_or_creates() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path().join("log.txt"));

        log.clear().unwrap();
        assert_eq!(fs::read_to_string(log.path()).unwrap(), "");

        log.access(PeerId(1)).unwrap();
        log.clear().unwrap();
        assert_eq!(fs::read_to_string(log.path()).unwrap(), "");
    }
}
