//! File creation events.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::event::CreateKind;
use serde::Serialize;

/// A detected file creation.
///
/// Fields are private so an event stays exactly as the watcher recorded it
/// while it travels through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvent {
    path: PathBuf,
    kind: FileEventKind,
    detected_at: DateTime<Utc>,
}

impl FileEvent {
    /// Create an event stamped with the current time.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind,
            detected_at: Utc::now(),
        }
    }

    /// Path of the created entry.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FileEventKind {
        self.kind
    }

    /// When the watcher saw the creation.
    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// What the notification source says was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// A regular file.
    File,

    /// A directory.
    Directory,

    /// The source did not say; the path has to be inspected.
    Unknown,
}

impl FileEventKind {
    /// Map a notify event kind. Anything but a creation yields `None`.
    pub fn from_notify(kind: &notify::EventKind) -> Option<Self> {
        match kind {
            notify::EventKind::Create(CreateKind::File) => Some(Self::File),
            notify::EventKind::Create(CreateKind::Folder) => Some(Self::Directory),
            notify::EventKind::Create(_) => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Resolve `Unknown` by looking at the path on disk.
    pub fn resolve(self, path: &Path) -> Self {
        match self {
            Self::Unknown => match std::fs::symlink_metadata(path) {
                Ok(meta) if meta.is_dir() => Self::Directory,
                Ok(_) => Self::File,
                Err(_) => Self::Unknown,
            },
            known => known,
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}
