//! One-shot abort signal shared by the watcher, the processor and the
//! orchestrator.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a run was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// A handled file could not be moved to its destination.
    RelocationFailed,

    /// An operator interrupt arrived.
    Interrupted,

    /// Stop requested through the API.
    Requested,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::RelocationFailed => "a processed file could not be relocated",
            Self::Interrupted => "interrupted",
            Self::Requested => "stop requested",
        };
        f.write_str(text)
    }
}

/// Write-once flag. Clones observe the same state; once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns `true` for the call that actually set it;
    /// later calls keep the first reason.
    pub fn trigger(&self, reason: AbortReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason recorded by the first trigger.
    pub fn reason(&self) -> Option<AbortReason> {
        self.reason.get().copied()
    }

    /// Resolves once the signal is set.
    pub fn wait(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
