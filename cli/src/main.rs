use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Context;
use autochange_pipeline::{AbortReason, PipelineConfig, WatchBackend};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Watch a directory for new files and process each one.
#[derive(Debug, Parser)]
#[command(name = "autochange", version)]
struct Cli {
    /// Directory to watch. Overrides `root` from the config file.
    root: Option<PathBuf>,

    /// Filename pattern to accept (repeatable). Without any, every file is accepted.
    #[arg(short, long = "pattern", value_name = "GLOB")]
    patterns: Vec<String>,

    /// TOML file with pipeline settings.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scan the directory periodically instead of using native notifications.
    /// Takes an optional interval as `--poll=MILLIS`.
    #[arg(
        long,
        value_name = "MILLIS",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "1000"
    )]
    poll: Option<u64>,

    /// Command run for each file, with the file path appended. Exit status 0
    /// marks the file as processed. Without a command every file is accepted.
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if config.root.as_os_str().is_empty() {
            anyhow::bail!(
                "a directory to watch is required (positional ROOT or `root` in --config)"
            );
        }
        if !self.patterns.is_empty() {
            config = config.with_patterns(self.patterns.iter().cloned());
        }
        if let Some(interval_ms) = self.poll {
            config = config.with_backend(WatchBackend::Polling { interval_ms });
        }
        Ok(config)
    }
}

/// Runs an external command on each file.
#[derive(Debug, Clone)]
struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn run(&self, path: &Path) -> anyhow::Result<bool> {
        debug!("Running {} on {}", self.program, path.display());
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("failed to start `{}`", self.program))?;
        if !status.success() {
            warn!("`{}` exited with {status} for {}", self.program, path.display());
        }
        Ok(status.success())
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.pipeline_config()?;

    let summary = match ExternalCommand::from_argv(&cli.command) {
        Some(command) => {
            autochange_pipeline::run(config, move |path: &Path| command.run(path)).await?
        }
        None => {
            autochange_pipeline::run(config, |_: &Path| -> anyhow::Result<bool> { Ok(true) })
                .await?
        }
    };

    info!(
        "Stopped ({}): {} processed, {} failed, {} left unprocessed. Log: {}",
        summary.reason,
        summary.processor.processed,
        summary.processor.failed,
        summary.left_in_queue,
        summary.log_path.display()
    );

    if summary.reason == AbortReason::RelocationFailed {
        anyhow::bail!("stopped because a processed file could not be relocated");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(cli));
    // A processing command may still be running on the blocking pool; do not
    // let it hold the process open.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_builds_config() {
        let cli = Cli::parse_from([
            "autochange",
            "/srv/inbox",
            "-p",
            "*.xml",
            "--pattern",
            "*.json",
            "--poll",
            "--",
            "convert",
            "--strict",
        ]);
        let config = cli.pipeline_config().unwrap();

        assert_eq!(config.root, PathBuf::from("/srv/inbox"));
        assert_eq!(config.patterns, vec!["*.xml", "*.json"]);
        assert_eq!(config.backend, WatchBackend::Polling { interval_ms: 1000 });
        assert_eq!(cli.command, vec!["convert", "--strict"]);

        let command = ExternalCommand::from_argv(&cli.command).unwrap();
        assert_eq!(command.program, "convert");
        assert_eq!(command.args, vec!["--strict"]);
    }

    #[test]
    fn test_cli_requires_root_without_config() {
        let cli = Cli::parse_from(["autochange"]);
        assert!(cli.pipeline_config().is_err());
        assert!(ExternalCommand::from_argv(&cli.command).is_none());
    }

    #[test]
    fn test_poll_flag_does_not_swallow_root() {
        let cli = Cli::parse_from(["autochange", "--poll", "/srv/inbox"]);
        assert_eq!(cli.root, Some(PathBuf::from("/srv/inbox")));
        assert_eq!(cli.poll, Some(1000));

        let cli = Cli::parse_from(["autochange", "--poll=250", "/srv/inbox"]);
        assert_eq!(cli.poll, Some(250));
        let config = cli.pipeline_config().unwrap();
        assert_eq!(config.backend, WatchBackend::Polling { interval_ms: 250 });
    }

    #[test]
    fn test_config_file_must_name_a_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("autochange.toml");
        std::fs::write(&path, "patterns = [\"*.xml\"]\n").unwrap();
        let config_arg = path.to_string_lossy().into_owned();

        let cli = Cli::parse_from(["autochange", "--config", config_arg.as_str()]);
        assert!(cli.pipeline_config().is_err());

        let cli = Cli::parse_from([
            "autochange",
            "/srv/inbox",
            "--config",
            config_arg.as_str(),
        ]);
        let config = cli.pipeline_config().unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/inbox"));
        assert_eq!(config.patterns, vec!["*.xml"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_command_exit_status() {
        let ok = ExternalCommand::from_argv(&["true".to_string()]).unwrap();
        let fail = ExternalCommand::from_argv(&["false".to_string()]).unwrap();

        assert!(ok.run(Path::new("/dev/null")).unwrap());
        assert!(!fail.run(Path::new("/dev/null")).unwrap());

        let missing =
            ExternalCommand::from_argv(&["/nonexistent/autochange-test-binary".to_string()])
                .unwrap();
        assert!(missing.run(Path::new("/dev/null")).is_err());
    }
}
