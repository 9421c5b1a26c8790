//! Configuration for git4p4.
//!
//! Every setting has a default, so the config file is optional. It is read
//! from `--config` when given, otherwise from `.git4p4.toml` at the root of
//! the git working copy.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::models::RunPolicy;

/// File name looked up at the root of the working copy.
pub const CONFIG_FILE_NAME: &str = ".git4p4.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Git4p4Config {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub p4: P4Config,

    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Conversion behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Branch marking the last commit converted to Perforce.
    #[serde(default = "default_tracking_branch")]
    pub tracking_branch: String,

    /// Move `tracking_branch` forward after each run.
    #[serde(default = "default_true")]
    pub manage_tracking_branch: bool,

    /// Git rename similarity, in percent. Git's own default when unset.
    #[serde(default)]
    pub rename_threshold: Option<u16>,

    #[serde(default = "default_true")]
    pub shelve: bool,

    /// Revert shelved changelists, keeping local content.
    #[serde(default = "default_true")]
    pub revert: bool,

    /// Skip the check against files already open in Perforce.
    #[serde(default)]
    pub ignore_opened: bool,

    /// Stay on the last converted commit instead of returning.
    #[serde(default)]
    pub stay: bool,
}

fn default_tracking_branch() -> String {
    "p4".into()
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tracking_branch: default_tracking_branch(),
            manage_tracking_branch: true,
            rename_threshold: None,
            shelve: true,
            revert: true,
            ignore_opened: false,
            stay: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Perforce
// ---------------------------------------------------------------------------

/// How to invoke the `p4` CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct P4Config {
    /// Path or name of the `p4` binary.
    #[serde(default = "default_p4_binary")]
    pub binary: String,

    /// Program name reported to the server (`-zprog`).
    #[serde(default = "default_program")]
    pub program: String,
}

fn default_p4_binary() -> String {
    "p4".into()
}

fn default_program() -> String {
    "git4p4".into()
}

impl Default for P4Config {
    fn default() -> Self {
        Self {
            binary: default_p4_binary(),
            program: default_program(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl Git4p4Config {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Git4p4Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load `explicit` if given (it must exist), else `CONFIG_FILE_NAME`
    /// under `workdir` if present, else the defaults. The result is
    /// validated.
    pub fn discover(explicit: Option<&Path>, workdir: &Path) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let candidate = Self::default_path(workdir);
                if candidate.exists() {
                    Self::load_from_file(&candidate)?
                } else {
                    debug!("no configuration file, using defaults");
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn default_path(workdir: &Path) -> PathBuf {
        workdir.join(CONFIG_FILE_NAME)
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.tracking_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.tracking_branch".into(),
                detail: "tracking branch must not be empty".into(),
            });
        }
        if let Some(threshold) = self.sync.rename_threshold {
            if threshold > 100 {
                return Err(ConfigError::InvalidValue {
                    field: "sync.rename_threshold".into(),
                    detail: format!("{} is not a percentage (0-100)", threshold),
                });
            }
        }
        if self.p4.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "p4.binary".into(),
                detail: "p4 binary must not be empty".into(),
            });
        }
        if tracing::Level::from_str(&self.log.level).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "log.level".into(),
                detail: format!(
                    "unknown level '{}' (expected trace, debug, info, warn or error)",
                    self.log.level
                ),
            });
        }
        Ok(())
    }

    /// The run policy this configuration asks for, before command-line
    /// overrides.
    pub fn run_policy(&self) -> RunPolicy {
        RunPolicy {
            dry_run: false,
            shelve: self.sync.shelve,
            revert: self.sync.revert,
            ignore_opened: self.sync.ignore_opened,
            stay: self.sync.stay,
            manage_tracking_branch: self.sync.manage_tracking_branch,
            tracking_branch: self.sync.tracking_branch.clone(),
            rename_threshold: self.sync.rename_threshold,
        }
    }

    /// Generate a commented TOML template.
    pub fn default_template() -> &'static str {
        r#"# git4p4 configuration
# Place this file at the root of the git working copy as .git4p4.toml,
# or pass it with --config.

[sync]
# Branch marking the last commit converted to Perforce.
tracking_branch = "p4"
# Move the tracking branch to the last converted commit after each run.
manage_tracking_branch = true
# Git rename similarity in percent (0-100); git's default when unset.
# rename_threshold = 50
shelve = true
# Revert shelved changelists, keeping local content. Needs shelve.
revert = true
ignore_opened = false
# Stay on the last converted commit instead of returning to the start.
stay = false

[p4]
binary = "p4"
program = "git4p4"

[log]
level = "info"
"#
    }

    /// Write [`default_template`](Self::default_template) to `path`,
    /// refusing to overwrite an existing file.
    pub fn write_template(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::InvalidValue {
                field: "path".into(),
                detail: format!("{} already exists, not overwriting", path.display()),
            });
        }
        std::fs::write(path, Self::default_template())?;
        info!(path = %path.display(), "wrote configuration template");
        Ok(())
    }
}
