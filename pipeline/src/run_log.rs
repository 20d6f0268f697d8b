//! Per-run log file.
//!
//! Each run gets its own file under the log directory, named after the run's
//! start time. Records are also forwarded to `tracing` so they reach whatever
//! subscriber the host installed.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use tracing::warn;

const FILE_PREFIX: &str = "processed_files";
const NAME_TIME_FORMAT: &str = "%m%d%YT%H%M%S";
const LINE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Severity of a run log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

/// Log sink scoped to one pipeline run.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    /// Open a fresh log file in `dir` named after `started_at`.
    ///
    /// An existing file is never reused: if the name is taken a numeric
    /// suffix is appended.
    pub fn create(dir: &Path, started_at: DateTime<Local>) -> io::Result<Self> {
        let stamp = started_at.format(NAME_TIME_FORMAT).to_string();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{FILE_PREFIX}_{stamp}.log")
            } else {
                format!("{FILE_PREFIX}_{stamp}_{attempt}.log")
            };
            let path = dir.join(name);
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        path,
                        file: Mutex::new(file),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err),
            }
        }
    }

    /// Path of the file this log writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.record(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl fmt::Display) {
        self.record(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.record(LogLevel::Error, message);
    }

    /// Write one line and mirror it to `tracing`.
    pub fn record(&self, level: LogLevel, message: impl fmt::Display) {
        let message = message.to_string();
        match level {
            LogLevel::Info => tracing::info!(target: "autochange::run", "{message}"),
            LogLevel::Warning => tracing::warn!(target: "autochange::run", "{message}"),
            LogLevel::Error => tracing::error!(target: "autochange::run", "{message}"),
        }

        let line = format!(
            "{level}: {} - {message}\n",
            Local::now().format(LINE_TIME_FORMAT)
        );
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = file.write_all(line.as_bytes()).and_then(|()| file.flush()) {
            warn!("Failed to write run log {}: {err}", self.path.display());
        }
    }
}
