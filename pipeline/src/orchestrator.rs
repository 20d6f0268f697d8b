//! Wires the watcher and the processor together and owns shutdown.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::abort::{AbortReason, AbortSignal};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::processor::{FileProcessor, ProcessorStats, QueueProcessor};
use crate::queue::EventQueue;
use crate::watcher::{DirectoryWatcher, WatcherStats};

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Why the run ended.
    pub reason: AbortReason,

    /// Processor counters at shutdown. A file still inside the processing
    /// function is not counted.
    pub processor: ProcessorStats,

    /// Watcher counters at shutdown.
    pub watcher: WatcherStats,

    /// Events that were queued but never processed.
    pub left_in_queue: usize,

    /// The run's log file.
    pub log_path: PathBuf,
}

/// Run the pipeline until a relocation failure or Ctrl-C.
pub async fn run<P: FileProcessor>(config: PipelineConfig, processor: P) -> Result<RunSummary> {
    run_until(config, processor, ctrl_c()).await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Run the pipeline until a relocation failure or until `shutdown` resolves.
///
/// Nothing is started unless the configuration validates, the output
/// directories can be created and the watcher subscription succeeds. The
/// processor runs as a detached task and is not joined: it stops on its own
/// once it observes the abort signal.
pub async fn run_until<P, F>(config: PipelineConfig, processor: P, shutdown: F) -> Result<RunSummary>
where
    P: FileProcessor,
    F: Future<Output = ()>,
{
    config.validate()?;
    let root = std::path::absolute(&config.root)?;

    let queue = EventQueue::new();
    let abort = AbortSignal::new();

    // Output directories must exist before the subscription starts, otherwise
    // their creation would be reported as new entries under the root.
    let processor = QueueProcessor::prepare(
        &root,
        &config.layout,
        config.queue_poll(),
        Arc::new(processor),
    )?;
    let run_log = processor.run_log();
    let stats = processor.stats_handle();

    let subscription =
        DirectoryWatcher::from_config(&config)?.subscribe(queue.clone(), abort.clone())?;

    tokio::spawn(processor.run(queue.clone(), abort.clone()));
    info!(
        "Watching {} for {}",
        root.display(),
        if config.patterns.is_empty() {
            "all files".to_string()
        } else {
            config.patterns.join(", ")
        }
    );

    tokio::pin!(shutdown);
    tokio::select! {
        _ = abort.wait() => {}
        _ = &mut shutdown => {
            abort.trigger(AbortReason::Interrupted);
        }
    }

    let reason = abort.reason().unwrap_or(AbortReason::Requested);
    match reason {
        AbortReason::RelocationFailed => run_log.error(format_args!(
            "The program is aborting: {reason}"
        )),
        _ => run_log.info(format_args!("The program is shutting down: {reason}")),
    }

    let timeout = config.shutdown_timeout();
    let watcher_stats = match tokio::time::timeout(
        timeout,
        tokio::task::spawn_blocking(move || subscription.stop()),
    )
    .await
    {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            error!("Watcher shutdown failed: {e}");
            WatcherStats::default()
        }
        Err(_) => {
            warn!("Watcher did not unregister within {timeout:?}");
            WatcherStats::default()
        }
    };

    Ok(RunSummary {
        reason,
        processor: stats.snapshot(),
        watcher: watcher_stats,
        left_in_queue: queue.len(),
        log_path: run_log.path().to_path_buf(),
    })
}
