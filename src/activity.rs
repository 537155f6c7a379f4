//! Session activity probe
//!
//! The scheduler needs two facts from the outside world: when the user last
//! interacted with the assistant, and whether the companion process is busy
//! right now. Both are read from stamp files the assistant keeps fresh.

use chrono::{DateTime, Duration, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::Clock;

/// How recent a companion heartbeat must be to count as active
pub const COMPANION_WINDOW_SECS: i64 = 300;

/// Reports upstream user activity
pub trait ActivityProbe: Send + Sync {
    /// Last time the user was active, if known
    fn last_activity(&self) -> Option<DateTime<Local>>;

    /// Whether the companion process reports very recent activity
    fn is_companion_active(&self) -> bool;
}

/// Probe backed by file modification times
pub struct FileActivityProbe {
    activity_stamp: PathBuf,
    companion_heartbeat: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileActivityProbe {
    pub fn new(
        activity_stamp: impl Into<PathBuf>,
        companion_heartbeat: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            activity_stamp: activity_stamp.into(),
            companion_heartbeat: companion_heartbeat.into(),
            clock,
        }
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Local>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified))
}

impl ActivityProbe for FileActivityProbe {
    fn last_activity(&self) -> Option<DateTime<Local>> {
        modified_at(&self.activity_stamp)
    }

    fn is_companion_active(&self) -> bool {
        modified_at(&self.companion_heartbeat)
            .map(|beat| self.clock.now() - beat < Duration::seconds(COMPANION_WINDOW_SECS))
            .unwrap_or(false)
    }
}

/// Probe that never sees any activity
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActivity;

impl ActivityProbe for NoActivity {
    fn last_activity(&self) -> Option<DateTime<Local>> {
        None
    }

    fn is_companion_active(&self) -> bool {
        false
    }
}
