//! External feedback toggles, polled once per driver iteration.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, error, info};

/// A one-shot, externally set request to toggle feedback.
pub trait Trigger {
    /// Returns true if the trigger was set, clearing it.
    fn poll(&mut self) -> bool;
}

/// In-process trigger backed by a shared flag.
#[derive(Debug, Clone, Default)]
pub struct FlagTrigger {
    flag: Arc<AtomicBool>,
}

impl FlagTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for another thread to set the trigger.
    pub fn handle(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

impl Trigger for FlagTrigger {
    fn poll(&mut self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

/// Trigger set by the existence of a file; observing it deletes the file.
///
/// Lets scan scripts toggle feedback with a plain `touch`. A sentinel that
/// cannot be removed disables the trigger, since it could never clear.
#[derive(Debug, Clone)]
pub struct SentinelFileTrigger {
    path: PathBuf,
    disabled: bool,
}

impl SentinelFileTrigger {
    /// Removes a stale sentinel left over from a previous run.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        remove_quietly(&path);
        debug!("[Trigger] watching {}", path.display());
        Self { path, disabled: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Counts the trigger as set only if the sentinel is gone afterwards.
    fn consume(&mut self, removal: io::Result<()>) -> bool {
        match removal {
            Ok(()) => {
                info!("[Trigger] {} found", self.path.display());
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                error!("[Trigger] cannot remove {}: {}; trigger disabled", self.path.display(), e);
                self.disabled = true;
                false
            }
        }
    }
}

impl Trigger for SentinelFileTrigger {
    fn poll(&mut self) -> bool {
        if self.disabled || !self.path.is_file() {
            return false;
        }
        let removal = fs::remove_file(&self.path);
        self.consume(removal)
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => error!("[Trigger] cannot remove {}: {}", path.display(), e),
    }
}
