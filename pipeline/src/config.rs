//! Configuration types for the file pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Configuration for one watched directory and its processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory to watch for new files.
    pub root: PathBuf,

    /// Filename patterns (glob syntax). Empty matches every file.
    pub patterns: Vec<String>,

    /// Whether created directories are ignored.
    pub ignore_directories: bool,

    /// Whether patterns match case-sensitively. Off by default, so `*.xml`
    /// also picks up `REPORT.XML`.
    pub case_sensitive: bool,

    /// How long the processor waits on an empty queue before re-checking.
    pub queue_poll_ms: u64,

    /// Upper bound on the wait for the watcher to unregister at shutdown.
    pub shutdown_timeout_ms: u64,

    /// Notification backend.
    pub backend: WatchBackend,

    /// Names of the output directories under the root.
    pub layout: OutputLayout,
}

impl PipelineConfig {
    /// Create a new config for `root` with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            patterns: Vec::new(),
            ignore_directories: true,
            case_sensitive: false,
            queue_poll_ms: 1000,
            shutdown_timeout_ms: 5000,
            backend: WatchBackend::default(),
            layout: OutputLayout::default(),
        }
    }

    /// Parse a config from TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Add a filename pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Replace the pattern set.
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Forward created directories too.
    pub fn include_directories(mut self) -> Self {
        self.ignore_directories = false;
        self
    }

    /// Match patterns with regard to case.
    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    /// Set the empty-queue wait.
    pub fn with_queue_poll(mut self, interval: Duration) -> Self {
        self.queue_poll_ms = interval.as_millis() as u64;
        self
    }

    /// Set the shutdown wait bound.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the notification backend.
    pub fn with_backend(mut self, backend: WatchBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the output directory names.
    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Check everything that can be checked before any component starts.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(PipelineError::Config("root is required".to_string()));
        }
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(PipelineError::NotADirectory(self.root.clone())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::RootNotFound(self.root.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        if self.queue_poll_ms == 0 {
            return Err(PipelineError::Config(
                "queue_poll_ms must be greater than zero".to_string(),
            ));
        }
        if let WatchBackend::Polling { interval_ms: 0 } = self.backend {
            return Err(PipelineError::Config(
                "polling backend interval_ms must be greater than zero".to_string(),
            ));
        }

        self.layout.validate()?;
        self.filter().map(|_| ())
    }

    /// Compile the filename filter described by this config.
    pub fn filter(&self) -> Result<PatternFilter> {
        PatternFilter::new(&self.patterns, self.case_sensitive, self.ignore_directories)
    }
}

/// Defaults with an empty root, which `validate` rejects. A config file has
/// to name its root.
impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(PathBuf::new())
    }
}

/// Which notification mechanism backs the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WatchBackend {
    /// The platform's native mechanism (inotify, FSEvents, ReadDirectoryChangesW).
    #[default]
    Native,

    /// Periodic directory scans. Works on network shares.
    Polling { interval_ms: u64 },
}

/// Names of the directories the processor writes into, relative to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLayout {
    pub processed_dir: String,
    pub failed_dir: String,
    pub log_dir: String,
}

impl OutputLayout {
    fn validate(&self) -> Result<()> {
        for name in [&self.processed_dir, &self.failed_dir, &self.log_dir] {
            let mut components = Path::new(name).components();
            let single = matches!(
                (components.next(), components.next()),
                (Some(std::path::Component::Normal(_)), None)
            );
            if !single {
                return Err(PipelineError::Config(format!(
                    "output directory name must be a single path component: `{name}`"
                )));
            }
        }
        let pairs = [
            (&self.processed_dir, &self.failed_dir),
            (&self.processed_dir, &self.log_dir),
            (&self.failed_dir, &self.log_dir),
        ];
        if let Some((name, _)) = pairs.into_iter().find(|(a, b)| a == b) {
            return Err(PipelineError::Config(format!(
                "output directories must be distinct: `{name}` is used twice"
            )));
        }
        Ok(())
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            processed_dir: "processed_files".to_string(),
            failed_dir: "failed_files".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

/// Compiled filename filter.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    patterns: Vec<Pattern>,
    options: MatchOptions,
    ignore_directories: bool,
}

impl PatternFilter {
    /// Compile `patterns`. An empty set matches every file name.
    pub fn new<S: AsRef<str>>(
        patterns: &[S],
        case_sensitive: bool,
        ignore_directories: bool,
    ) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                Pattern::new(raw).map_err(|source| PipelineError::InvalidPattern {
                    pattern: raw.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            options: MatchOptions {
                case_sensitive,
                require_literal_separator: true,
                require_literal_leading_dot: false,
            },
            ignore_directories,
        })
    }

    /// Filter that accepts every file.
    pub fn match_all() -> Self {
        Self {
            patterns: Vec::new(),
            options: MatchOptions::new(),
            ignore_directories: true,
        }
    }

    pub fn ignores_directories(&self) -> bool {
        self.ignore_directories
    }

    /// Check the basename of `path` against the patterns. Names that are not
    /// valid UTF-8 are matched in their lossy form.
    pub fn matches_name(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy();
        self.patterns
            .iter()
            .any(|p| p.matches_with(&name, self.options))
    }
}
