//! git4p4 command-line tool.
//!
//! Converts the local Git commits made since the last run into pending
//! Perforce changelists, one per commit, then shelves and reverts them so
//! the next commit can be applied on top.

mod style;
mod summary;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use git4p4_core::config::Git4p4Config;
use git4p4_core::gateway::SourceRepository;
use git4p4_core::models::RunPolicy;
use git4p4_core::{GitClient, P4Client, Session};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Mirror Git commits into pending Perforce changelists.
#[derive(Parser, Debug)]
#[command(
    name = "git4p4",
    version,
    about = "Mirror Git commits into pending Perforce changelists"
)]
struct Cli {
    /// Commits to convert: `FROM..TO`, or the last commit to convert
    /// (default: the default branch), starting after the tracking branch.
    range: Option<String>,

    /// Keep working in Perforce afterwards: same as
    /// `--no-revert --ignore-opened --stay`.
    #[arg(short = 'p', long)]
    p4_work: bool,

    /// Don't revert changelists after shelving them.
    #[arg(long)]
    no_revert: bool,

    /// Don't shelve changelists (implies --no-revert).
    #[arg(long)]
    no_shelve: bool,

    /// Don't check for files already open in other changelists.
    #[arg(long)]
    ignore_opened: bool,

    /// Stay on the last converted commit instead of returning.
    #[arg(long)]
    stay: bool,

    /// Don't move the tracking branch after converting.
    #[arg(long)]
    no_p4_branch: bool,

    /// Rename detection similarity, in percent.
    #[arg(long, value_name = "PERCENT", value_parser = clap::value_parser!(u16).range(0..=100))]
    rename_threshold: Option<u16>,

    /// Print what would happen without changing anything.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the TOML configuration file
    /// (default: `.git4p4.toml` in the working copy, if present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the run report as JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Write a default configuration file and exit.
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

impl Cli {
    /// Flags can only switch behaviour off relative to the configuration.
    fn apply_to(&self, policy: &mut RunPolicy) {
        policy.dry_run |= self.dry_run;
        if self.no_shelve {
            policy.shelve = false;
        }
        if self.no_revert || self.no_shelve || self.p4_work {
            policy.revert = false;
        }
        policy.ignore_opened |= self.ignore_opened || self.p4_work;
        policy.stay |= self.stay || self.p4_work;
        if self.no_p4_branch {
            policy.manage_tracking_branch = false;
        }
        if self.rename_threshold.is_some() {
            policy.rename_threshold = self.rename_threshold;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// Level used until the configuration file has been read.
const STARTUP_LOG_LEVEL: &str = "info";

/// The filter to start with, and whether it is final. `RUST_LOG` wins over
/// `--verbose`, which wins over the configured level.
fn startup_filter(verbose: bool, rust_log: Option<&str>) -> (String, bool) {
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => (directives.to_string(), true),
        None if verbose => ("debug".to_string(), true),
        None => (STARTUP_LOG_LEVEL.to_string(), false),
    }
}

/// Installed subscriber whose level can still follow the config file.
struct Logging {
    handle: reload::Handle<EnvFilter, Registry>,
    fixed: bool,
}

impl Logging {
    fn init(verbose: bool) -> Self {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let (directives, fixed) = startup_filter(verbose, rust_log.as_deref());
        let filter =
            EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(STARTUP_LOG_LEVEL));
        let (filter, handle) = reload::Layer::new(filter);
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .init();
        Self { handle, fixed }
    }

    /// Switch to the configured level unless `RUST_LOG` or `--verbose` chose.
    fn apply_config_level(&self, level: &str) {
        if self.fixed {
            return;
        }
        if let Err(e) = self.handle.reload(EnvFilter::new(level)) {
            tracing::warn!(error = %e, "could not apply configured log level");
        }
    }
}

/// Returns whether every selected commit was converted.
async fn run(cli: Cli) -> Result<bool> {
    if let Some(path) = &cli.write_config {
        Git4p4Config::write_template(path).context("failed to write config file")?;
        println!("Default configuration written to {}", path.display());
        return Ok(true);
    }

    let logging = Logging::init(cli.verbose);

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let git = GitClient::new(&cwd).context("not inside a git working copy")?;
    let workdir = git.workdir().to_path_buf();

    let config = Git4p4Config::discover(cli.config.as_deref(), &workdir)
        .context("failed to load configuration")?;
    logging.apply_config_level(&config.log.level);

    let mut policy = config.run_policy();
    cli.apply_to(&mut policy);
    tracing::debug!(?policy, workdir = %workdir.display(), "effective run policy");

    let p4 = P4Client::new(config.p4.binary.as_str(), config.p4.program.as_str(), workdir.clone());
    let report = Session::new(&git, &p4, &policy)
        .run(cli.range.as_deref())
        .await
        .context("conversion did not run")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{}", json);
    } else {
        summary::print_report(&report);
    }

    Ok(report.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_for(args: &[&str]) -> RunPolicy {
        let cli = Cli::try_parse_from(std::iter::once("git4p4").chain(args.iter().copied()))
            .expect("arguments should parse");
        let mut policy = RunPolicy::default();
        cli.apply_to(&mut policy);
        policy
    }

    #[test]
    fn test_defaults_keep_configured_policy() {
        assert_eq!(policy_for(&[]), RunPolicy::default());
    }

    #[test]
    fn test_p4_work_flag() {
        let policy = policy_for(&["-p"]);
        assert!(policy.shelve);
        assert!(!policy.revert);
        assert!(policy.ignore_opened);
        assert!(policy.stay);
    }

    #[test]
    fn test_no_shelve_implies_no_revert() {
        let policy = policy_for(&["--no-shelve"]);
        assert!(!policy.shelve);
        assert!(!policy.revert);
    }

    #[test]
    fn test_range_and_threshold() {
        let cli = Cli::try_parse_from(["git4p4", "abc..def", "--rename-threshold", "60", "-n"])
            .unwrap();
        assert_eq!(cli.range.as_deref(), Some("abc..def"));
        let mut policy = RunPolicy::default();
        cli.apply_to(&mut policy);
        assert_eq!(policy.rename_threshold, Some(60));
        assert!(policy.dry_run);
        assert!(!policy_for(&["--no-p4-branch"]).manage_tracking_branch);
    }

    #[test]
    fn test_startup_filter_precedence() {
        assert_eq!(startup_filter(false, None), ("info".to_string(), false));
        assert_eq!(startup_filter(true, None), ("debug".to_string(), true));
        assert_eq!(
            startup_filter(true, Some("git4p4_core=trace")),
            ("git4p4_core=trace".to_string(), true)
        );
        assert_eq!(startup_filter(false, Some("  ")), ("info".to_string(), false));
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["git4p4", "--rename-threshold", "150"]).is_err());
    }

    #[test]
    fn test_flags_never_loosen_config() {
        let cli = Cli::try_parse_from(["git4p4"]).unwrap();
        let mut policy = RunPolicy {
            shelve: false,
            revert: false,
            stay: true,
            ..RunPolicy::default()
        };
        cli.apply_to(&mut policy);
        assert!(!policy.shelve);
        assert!(!policy.revert);
        assert!(policy.stay);
    }
}
