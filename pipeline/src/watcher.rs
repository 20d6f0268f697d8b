//! Directory watcher: turns creation notifications into queued events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::abort::AbortSignal;
use crate::config::{PatternFilter, PipelineConfig, WatchBackend};
use crate::error::{PipelineError, Result};
use crate::event::{FileEvent, FileEventKind};
use crate::queue::EventQueue;

/// Watches one directory, non-recursively, for newly created entries.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    root: PathBuf,
    filter: PatternFilter,
    backend: WatchBackend,
}

impl DirectoryWatcher {
    /// Create a watcher for `root` using the native backend.
    pub fn new(root: impl Into<PathBuf>, filter: PatternFilter) -> Self {
        Self {
            root: root.into(),
            filter,
            backend: WatchBackend::Native,
        }
    }

    /// Build a watcher from a pipeline config.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let root = std::path::absolute(&config.root)?;
        Ok(Self::new(root, config.filter()?).with_backend(config.backend))
    }

    pub fn with_backend(mut self, backend: WatchBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register for notifications and start feeding `queue`.
    ///
    /// Fails immediately if the root is missing or the notification
    /// mechanism cannot be set up. Nothing is enqueued once `abort` is set.
    pub fn subscribe(&self, queue: EventQueue, abort: AbortSignal) -> Result<Subscription> {
        if !self.root.is_dir() {
            return Err(if self.root.exists() {
                PipelineError::NotADirectory(self.root.clone())
            } else {
                PipelineError::RootNotFound(self.root.clone())
            });
        }

        let stats = Arc::new(Counters::default());
        let handler = EnqueueHandler {
            queue,
            filter: self.filter.clone(),
            abort,
            stats: stats.clone(),
        };

        let mut watcher: Box<dyn Watcher + Send> = match self.backend {
            WatchBackend::Native => Box::new(RecommendedWatcher::new(
                handler,
                notify::Config::default(),
            )?),
            WatchBackend::Polling { interval_ms } => Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(Duration::from_millis(interval_ms)),
            )?),
        };
        watcher.watch(&self.root, RecursiveMode::NonRecursive)?;

        info!("Observation of {} has started", self.root.display());
        Ok(Subscription {
            watcher,
            root: self.root.clone(),
            stats,
        })
    }

    /// Subscribe, then block until `abort` is set and unregister.
    pub async fn watch(&self, queue: EventQueue, abort: AbortSignal) -> Result<WatcherStats> {
        let subscription = self.subscribe(queue, abort.clone())?;
        Ok(subscription.run_until(&abort).await)
    }
}

/// A live notification registration. Dropping it also unregisters.
pub struct Subscription {
    watcher: Box<dyn Watcher + Send>,
    root: PathBuf,
    stats: Arc<Counters>,
}

impl Subscription {
    /// Wait for `abort`, then unregister.
    pub async fn run_until(self, abort: &AbortSignal) -> WatcherStats {
        abort.wait().await;
        self.stop()
    }

    /// Unregister and release the notification backend.
    pub fn stop(mut self) -> WatcherStats {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            warn!("Failed to unwatch {}: {e}", self.root.display());
        }
        let stats = self.stats();
        drop(self.watcher);
        info!("Observation of {} has been stopped", self.root.display());
        stats
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> WatcherStats {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("root", &self.root)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> WatcherStats {
        WatcherStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Events pushed onto the queue.
    pub enqueued: usize,

    /// Creations rejected by the pattern or directory filter.
    pub skipped: usize,

    /// Errors reported by the notification backend.
    pub errors: usize,
}

/// Runs on the notify backend's thread.
struct EnqueueHandler {
    queue: EventQueue,
    filter: PatternFilter,
    abort: AbortSignal,
    stats: Arc<Counters>,
}

impl EnqueueHandler {
    fn qualify(&self, kind: FileEventKind, path: &Path) -> Option<FileEvent> {
        if !self.filter.matches_name(path) {
            return None;
        }
        let kind = kind.resolve(path);
        if self.filter.ignores_directories() && kind.is_directory() {
            return None;
        }
        Some(FileEvent::new(kind, path))
    }
}

impl notify::EventHandler for EnqueueHandler {
    fn handle_event(&mut self, res: notify::Result<notify::Event>) {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                error!("Watch error: {e}");
                return;
            }
        };

        let Some(kind) = FileEventKind::from_notify(&event.kind) else {
            return;
        };
        if self.abort.is_set() {
            debug!("Dropping creation event after abort: {:?}", event.paths);
            return;
        }

        for path in &event.paths {
            match self.qualify(kind, path) {
                Some(file_event) => {
                    debug!("Queueing {}", path.display());
                    self.queue.push(file_event);
                    self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    debug!("Ignoring {}", path.display());
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::EventHandler;
    use notify::event::{CreateKind, EventKind, ModifyKind};
    use tempfile::TempDir;

    fn handler(filter: PatternFilter) -> (EnqueueHandler, EventQueue, AbortSignal) {
        let queue = EventQueue::new();
        let abort = AbortSignal::new();
        let handler = EnqueueHandler {
            queue: queue.clone(),
            filter,
            abort: abort.clone(),
            stats: Arc::new(Counters::default()),
        };
        (handler, queue, abort)
    }

    fn created(kind: CreateKind, path: &Path) -> notify::Result<notify::Event> {
        Ok(notify::Event::new(EventKind::Create(kind)).add_path(path.to_path_buf()))
    }

    #[test]
    fn test_handler_filters_by_pattern() {
        let filter = PatternFilter::new(&["*.xml"], true, true).unwrap();
        let (mut handler, queue, _abort) = handler(filter);

        handler.handle_event(created(CreateKind::File, Path::new("/inbox/a.xml")));
        handler.handle_event(created(CreateKind::File, Path::new("/inbox/b.txt")));

        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.try_pop().map(FileEvent::into_path),
            Some(PathBuf::from("/inbox/a.xml"))
        );
        assert_eq!(handler.stats.snapshot().skipped, 1);
    }

    #[test]
    fn test_handler_ignores_directories_and_other_kinds() {
        let temp_dir = TempDir::new().unwrap();
        let subdir = temp_dir.path().join("nested");
        std::fs::create_dir(&subdir).unwrap();

        let (mut handler, queue, _abort) = handler(PatternFilter::match_all());
        handler.handle_event(created(CreateKind::Folder, &subdir));
        handler.handle_event(created(CreateKind::Any, &subdir));
        handler.handle_event(Ok(notify::Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(temp_dir.path().join("x.xml"))));

        assert!(queue.is_empty());
    }

    #[test]
    fn test_handler_forwards_directories_when_asked() {
        let temp_dir = TempDir::new().unwrap();
        let subdir = temp_dir.path().join("nested");
        std::fs::create_dir(&subdir).unwrap();

        let empty: [&str; 0] = [];
        let filter = PatternFilter::new(&empty, true, false).unwrap();
        let (mut handler, queue, _abort) = handler(filter);
        handler.handle_event(created(CreateKind::Folder, &subdir));

        let event = queue.try_pop().unwrap();
        assert_eq!(event.kind(), FileEventKind::Directory);
    }

    #[test]
    fn test_handler_stops_enqueueing_after_abort() {
        let (mut handler, queue, abort) = handler(PatternFilter::match_all());
        abort.trigger(crate::abort::AbortReason::Requested);

        handler.handle_event(created(CreateKind::File, Path::new("/inbox/late.xml")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_subscribe_nonexistent_directory() {
        let watcher = DirectoryWatcher::new("/nonexistent/path/12345", PatternFilter::match_all());
        let result = watcher.subscribe(EventQueue::new(), AbortSignal::new());
        assert!(matches!(result, Err(PipelineError::RootNotFound(_))));
    }

    #[tokio::test]
    async fn test_watch_returns_after_abort() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = DirectoryWatcher::new(temp_dir.path(), PatternFilter::match_all());
        let abort = AbortSignal::new();

        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger(crate::abort::AbortReason::Requested);
        });

        let stats = tokio::time::timeout(
            Duration::from_secs(2),
            watcher.watch(EventQueue::new(), abort),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(stats.enqueued, 0);
    }
}
