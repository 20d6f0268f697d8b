//! # autochange pipeline
//!
//! Watches a directory for newly created files, queues them, and hands each
//! one to a processing function on a background task. Handled files are moved
//! to `processed_files/` or `failed_files/` depending on the outcome, and every
//! step is recorded in a per-run log under `logs/`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Orchestrator                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  DirectoryWatcher ──► EventQueue ──► QueueProcessor ──► RunLog   │
//! │        │                                  │                      │
//! │        └───────────── AbortSignal ◄───────┘                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ```no_run
//! use std::path::Path;
//!
//! use autochange_pipeline::{PipelineConfig, run};
//!
//! # async fn example() -> autochange_pipeline::Result<()> {
//! let config = PipelineConfig::new("/srv/inbox").pattern("*.xml");
//! let summary = run(config, |path: &Path| -> anyhow::Result<bool> {
//!     Ok(std::fs::metadata(path)?.len() > 0)
//! })
//! .await?;
//! println!("stopped: {}", summary.reason);
//! # Ok(())
//! # }
//! ```

pub mod abort;
pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod processor;
pub mod queue;
pub mod run_log;
pub mod watcher;

pub use abort::{AbortReason, AbortSignal};
pub use config::{OutputLayout, PatternFilter, PipelineConfig, WatchBackend};
pub use error::{PipelineError, RelocationError, Result};
pub use event::{FileEvent, FileEventKind};
pub use orchestrator::{RunSummary, run, run_until};
pub use processor::{FileProcessor, Outcome, ProcessorStats, QueueProcessor, relocate};
pub use queue::EventQueue;
pub use run_log::{LogLevel, RunLog};
pub use watcher::{DirectoryWatcher, Subscription, WatcherStats};
