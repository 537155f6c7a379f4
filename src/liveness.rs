//! Liveness markers
//!
//! A marker is a PID file that says "a long-running process is active".
//! The guard removes it on drop, so early returns and unwinding panics
//! clear it too.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// PID file guard
#[derive(Debug)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    /// Write the current PID to `path`, creating parent directories
    pub fn acquire(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, std::process::id().to_string())?;
        debug!("Liveness marker written: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LivenessMarker {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Liveness marker cleared: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear liveness marker {}: {}", self.path.display(), e),
        }
    }
}

/// PID recorded in a marker, if one is present
pub fn read_marker(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_written_and_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("runner.pid");

        {
            let marker = LivenessMarker::acquire(&path).unwrap();
            assert_eq!(marker.path(), path.as_path());
            assert_eq!(read_marker(&path), Some(std::process::id()));
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_marker_cleared_on_panic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runner.pid");
        let inner = path.clone();

        let result = std::panic::catch_unwind(move || {
            let _marker = LivenessMarker::acquire(&inner).unwrap();
            panic!("boom");
        });

        assert!(result.is_err());
        assert!(!path.exists());
    }
}
