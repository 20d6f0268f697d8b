//! Queue processor: drains the event queue, runs the processing function on
//! each file and moves it to the processed or failed directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info};

use crate::abort::{AbortReason, AbortSignal};
use crate::config::{OutputLayout, PipelineConfig};
use crate::error::{RelocationError, Result};
use crate::event::FileEvent;
use crate::queue::EventQueue;
use crate::run_log::RunLog;

/// Caller-supplied work done on each queued file.
///
/// `Ok(true)` means success. `Ok(false)`, an error, or a panic all route the
/// file to the failed directory.
pub trait FileProcessor: Send + Sync + 'static {
    fn process(&self, path: &Path) -> anyhow::Result<bool>;
}

impl<F> FileProcessor for F
where
    F: Fn(&Path) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    fn process(&self, path: &Path) -> anyhow::Result<bool> {
        self(path)
    }
}

/// Where a handled file ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Processed,
    Failed,
}

/// Consumer side of the pipeline.
pub struct QueueProcessor {
    processed_dir: PathBuf,
    failed_dir: PathBuf,
    poll_interval: Duration,
    log: Arc<RunLog>,
    processor: Arc<dyn FileProcessor>,
    stats: StatsHandle,
}

impl QueueProcessor {
    /// Create the output directories under `root` and open the run log.
    ///
    /// Existing directories are reused.
    pub fn prepare(
        root: &Path,
        layout: &OutputLayout,
        poll_interval: Duration,
        processor: Arc<dyn FileProcessor>,
    ) -> Result<Self> {
        let processed_dir = root.join(&layout.processed_dir);
        let failed_dir = root.join(&layout.failed_dir);
        let log_dir = root.join(&layout.log_dir);
        for dir in [&processed_dir, &failed_dir, &log_dir] {
            std::fs::create_dir_all(dir)?;
        }

        let log = Arc::new(RunLog::create(&log_dir, Local::now())?);
        debug!("Run log opened at {}", log.path().display());

        Ok(Self {
            processed_dir,
            failed_dir,
            poll_interval,
            log,
            processor,
            stats: StatsHandle::default(),
        })
    }

    /// Prepare a processor from a pipeline config.
    pub fn from_config(config: &PipelineConfig, processor: Arc<dyn FileProcessor>) -> Result<Self> {
        Self::prepare(
            &config.root,
            &config.layout,
            config.queue_poll(),
            processor,
        )
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// The run log shared with whoever owns the run.
    pub fn run_log(&self) -> Arc<RunLog> {
        self.log.clone()
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn failed_dir(&self) -> &Path {
        &self.failed_dir
    }

    /// Counters that stay readable after `run` has taken ownership.
    pub fn stats_handle(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Drain `queue` until `abort` is set or a file cannot be relocated.
    ///
    /// Events still queued when this returns are not processed.
    pub async fn run(self, queue: EventQueue, abort: AbortSignal) -> ProcessorStats {
        info!("Queue processing started");
        loop {
            let next = tokio::select! {
                biased;
                _ = abort.wait() => break,
                next = queue.pop_timeout(self.poll_interval) => next,
            };
            let Some(event) = next else {
                continue;
            };

            match self.handle(event).await {
                Ok(_) => queue.task_done(),
                Err(err) => {
                    self.stats.0.relocation_errors.fetch_add(1, Ordering::Relaxed);
                    self.log.error(&err);
                    abort.trigger(AbortReason::RelocationFailed);
                    break;
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            "Queue processing stopped (processed: {}, failed: {}, left in queue: {})",
            stats.processed,
            stats.failed,
            queue.len()
        );
        stats
    }

    /// Process a single event and move its file.
    pub async fn handle(&self, event: FileEvent) -> std::result::Result<Outcome, RelocationError> {
        let path = event.into_path();
        self.log
            .info(format_args!("Started processing {}", path.display()));

        let outcome = if self.invoke(&path).await {
            Outcome::Processed
        } else {
            Outcome::Failed
        };
        let dest_dir = match outcome {
            Outcome::Processed => &self.processed_dir,
            Outcome::Failed => &self.failed_dir,
        };

        let dest = relocate(&path, dest_dir).await?;
        debug!("Moved {} to {}", path.display(), dest.display());

        match outcome {
            Outcome::Processed => {
                self.stats.0.processed.fetch_add(1, Ordering::Relaxed);
                self.log
                    .info(format_args!("Finished processing {}", path.display()));
            }
            Outcome::Failed => {
                self.stats.0.failed.fetch_add(1, Ordering::Relaxed);
                self.log
                    .info(format_args!("Failed processing {}", path.display()));
            }
        }
        Ok(outcome)
    }

    /// Run the processing function on the blocking pool.
    async fn invoke(&self, path: &Path) -> bool {
        let processor = self.processor.clone();
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || processor.process(&owned)).await {
            Ok(Ok(success)) => success,
            Ok(Err(err)) => {
                self.log.warning(format_args!(
                    "Processing {} returned an error: {err:#}",
                    path.display()
                ));
                false
            }
            Err(err) => {
                self.log.error(format_args!(
                    "Processing {} panicked: {err}",
                    path.display()
                ));
                false
            }
        }
    }
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("processed_dir", &self.processed_dir)
            .field("failed_dir", &self.failed_dir)
            .field("poll_interval", &self.poll_interval)
            .field("log", &self.log.path())
            .finish_non_exhaustive()
    }
}

/// Move `src` into `dest_dir`, keeping its file name.
///
/// Never overwrites: an occupied destination is an error and `src` is left in
/// place. The processor is the only writer of the destination directories,
/// so the existence check cannot race with another writer.
pub async fn relocate(src: &Path, dest_dir: &Path) -> std::result::Result<PathBuf, RelocationError> {
    let name = src
        .file_name()
        .ok_or_else(|| RelocationError::MissingFileName(src.to_path_buf()))?;
    let dest = dest_dir.join(name);

    if tokio::fs::try_exists(&dest)
        .await
        .map_err(|source| move_error(src, &dest, source))?
    {
        return Err(RelocationError::DestinationExists(dest));
    }
    match tokio::fs::rename(src, &dest).await {
        Ok(()) => Ok(dest),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(RelocationError::DestinationExists(dest))
        }
        Err(err) => Err(move_error(src, &dest, err)),
    }
}

fn move_error(from: &Path, to: &Path, source: std::io::Error) -> RelocationError {
    RelocationError::Io {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    }
}

/// Shared processor counters.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle(Arc<Counters>);

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    relocation_errors: AtomicUsize,
}

impl StatsHandle {
    pub fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            processed: self.0.processed.load(Ordering::Relaxed),
            failed: self.0.failed.load(Ordering::Relaxed),
            relocation_errors: self.0.relocation_errors.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about a processor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    /// Files moved to the processed directory.
    pub processed: usize,

    /// Files moved to the failed directory.
    pub failed: usize,

    /// Relocations that aborted the run.
    pub relocation_errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FileEventKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn accept_all() -> Arc<dyn FileProcessor> {
        Arc::new(|_: &Path| -> anyhow::Result<bool> { Ok(true) })
    }

    fn prepare(root: &Path, processor: Arc<dyn FileProcessor>) -> QueueProcessor {
        QueueProcessor::prepare(
            root,
            &OutputLayout::default(),
            Duration::from_millis(20),
            processor,
        )
        .unwrap()
    }

    fn drop_file(root: &Path, name: &str) -> FileEvent {
        let path = root.join(name);
        std::fs::write(&path, "<doc/>").unwrap();
        FileEvent::new(FileEventKind::File, path)
    }

    #[test]
    fn test_prepare_creates_layout_idempotently() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("processed_files")).unwrap();

        let processor = prepare(temp_dir.path(), accept_all());
        for dir in ["processed_files", "failed_files", "logs"] {
            assert!(temp_dir.path().join(dir).is_dir(), "{dir} missing");
        }
        assert!(processor.log_path().starts_with(temp_dir.path().join("logs")));
    }

    #[tokio::test]
    async fn test_success_moves_to_processed() {
        let temp_dir = TempDir::new().unwrap();
        let processor = prepare(temp_dir.path(), accept_all());

        let outcome = processor
            .handle(drop_file(temp_dir.path(), "a.xml"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Processed);
        assert!(temp_dir.path().join("processed_files/a.xml").exists());
        assert!(!temp_dir.path().join("a.xml").exists());

        let log = std::fs::read_to_string(processor.log_path()).unwrap();
        assert!(log.contains("Started processing"));
        assert!(log.contains(&format!(
            "Finished processing {}",
            temp_dir.path().join("a.xml").display()
        )));
    }

    #[tokio::test]
    async fn test_false_error_and_panic_all_fail() {
        let temp_dir = TempDir::new().unwrap();
        let processor = prepare(
            temp_dir.path(),
            Arc::new(|path: &Path| -> anyhow::Result<bool> {
                match path.file_name().and_then(|n| n.to_str()) {
                    Some("err.xml") => anyhow::bail!("bad document"),
                    Some("panic.xml") => panic!("processing function blew up"),
                    _ => Ok(false),
                }
            }),
        );

        for name in ["e.xml", "err.xml", "panic.xml"] {
            let outcome = processor
                .handle(drop_file(temp_dir.path(), name))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Failed, "{name}");
            assert!(temp_dir.path().join("failed_files").join(name).exists());
            assert!(!temp_dir.path().join("processed_files").join(name).exists());
        }

        let stats = processor.stats_handle().snapshot();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.processed, 0);

        let log = std::fs::read_to_string(processor.log_path()).unwrap();
        assert!(log.contains("WARNING: "));
        assert!(log.contains("bad document"));
        assert!(log.contains(&format!(
            "Failed processing {}",
            temp_dir.path().join("e.xml").display()
        )));
    }

    #[tokio::test]
    async fn test_relocate_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let dest_dir = temp_dir.path().join("failed_files");
        std::fs::create_dir(&dest_dir).unwrap();
        std::fs::write(dest_dir.join("f.xml"), "old").unwrap();
        let src = temp_dir.path().join("f.xml");
        std::fs::write(&src, "new").unwrap();

        let err = relocate(&src, &dest_dir).await.unwrap_err();

        assert!(matches!(err, RelocationError::DestinationExists(_)));
        assert_eq!(std::fs::read_to_string(&src).unwrap(), "new");
        assert_eq!(
            std::fs::read_to_string(dest_dir.join("f.xml")).unwrap(),
            "old"
        );
    }

    #[tokio::test]
    async fn test_relocate_missing_destination_dir_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("g.xml");
        std::fs::write(&src, "x").unwrap();

        let err = relocate(&src, &temp_dir.path().join("vanished"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelocationError::Io { .. }));
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_run_processes_in_order_then_stops_on_abort() {
        let temp_dir = TempDir::new().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let processor = prepare(
            temp_dir.path(),
            Arc::new(move |path: &Path| -> anyhow::Result<bool> {
                recorder.lock().unwrap().push(path.to_path_buf());
                Ok(true)
            }),
        );

        let queue = EventQueue::new();
        let abort = AbortSignal::new();
        for name in ["c.xml", "d.xml"] {
            queue.push(drop_file(temp_dir.path(), name));
        }

        let worker = tokio::spawn(processor.run(queue.clone(), abort.clone()));
        tokio::time::timeout(Duration::from_secs(5), queue.join())
            .await
            .unwrap();
        abort.trigger(AbortReason::Requested);

        let stats = tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![temp_dir.path().join("c.xml"), temp_dir.path().join("d.xml")]
        );
    }

    #[tokio::test]
    async fn test_collision_aborts_and_leaves_queue() {
        let temp_dir = TempDir::new().unwrap();
        let processor = prepare(temp_dir.path(), Arc::new(|_: &Path| -> anyhow::Result<bool> { Ok(false) }));
        std::fs::write(temp_dir.path().join("failed_files/f.xml"), "old").unwrap();

        let queue = EventQueue::new();
        let abort = AbortSignal::new();
        queue.push(drop_file(temp_dir.path(), "f.xml"));
        queue.push(drop_file(temp_dir.path(), "h.xml"));
        let log_path = processor.log_path().to_path_buf();

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            processor.run(queue.clone(), abort.clone()),
        )
        .await
        .unwrap();

        assert!(abort.is_set());
        assert_eq!(abort.reason(), Some(AbortReason::RelocationFailed));
        assert_eq!(stats.relocation_errors, 1);
        assert!(temp_dir.path().join("f.xml").exists());
        assert!(temp_dir.path().join("h.xml").exists());
        assert_eq!(queue.len(), 1);

        let log = std::fs::read_to_string(log_path).unwrap();
        assert!(log.contains("ERROR: "));
        assert!(log.contains("already exists"));
    }
}
