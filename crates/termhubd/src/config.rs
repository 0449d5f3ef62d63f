//! Daemon configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables, then command-line flags (applied by the CLI).

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use termhub_core::{BufferLimits, TermSize};
use thiserror::Error;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/termhub.sock";

/// Default cap on concurrently registered sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 50;

/// Default budget for one process-tree query.
pub const DEFAULT_CHILD_PROBE_TIMEOUT_MS: u64 = 500;

/// Shell used when neither the config file nor `SHELL` names one.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Variables never passed to spawned shells. A trailing `*` matches by prefix.
pub const DEFAULT_ENV_DENYLIST: &[&str] = &[
    "TERMHUB_*",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "NPM_TOKEN",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "SESSION_SECRET",
];

const APP_DIR: &str = "termhub";

/// Runtime configuration for `termhubd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,

    /// PID file written after bind
    pub pid_file: PathBuf,

    /// Program spawned for every session; `SHELL` when unset
    pub shell: Option<String>,

    /// Extra arguments passed to `shell`
    pub shell_args: Vec<String>,

    /// Working directory of new sessions; `HOME` when unset
    pub working_dir: Option<PathBuf>,

    /// Directory holding `shortcuts.json`
    pub data_dir: PathBuf,

    /// Environment variable names (or `PREFIX*` patterns) stripped from
    /// spawned processes
    pub env_denylist: Vec<String>,

    pub max_sessions: usize,

    /// Replay history limits per session
    pub buffer: BufferLimits,

    pub default_cols: u16,
    pub default_rows: u16,

    /// Upper bound on one `hasChildProcesses` query, in milliseconds
    pub child_probe_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            pid_file: state_dir().join("termhubd.pid"),
            shell: None,
            shell_args: Vec::new(),
            working_dir: None,
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(APP_DIR),
            env_denylist: DEFAULT_ENV_DENYLIST.iter().map(|s| s.to_string()).collect(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            buffer: BufferLimits::default(),
            default_cols: 80,
            default_rows: 24,
            child_probe_timeout_ms: DEFAULT_CHILD_PROBE_TIMEOUT_MS,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from `path`, or from the default location if it
    /// exists, then applies environment overrides.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env_with(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("TERMHUB_SOCKET") {
            self.socket_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("TERMHUB_PID_FILE") {
            self.pid_file = PathBuf::from(v);
        }
        if let Some(v) = non_empty("TERMHUB_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        // SHELL and HOME only fill in what the config file left unset
        if self.shell.is_none() {
            self.shell = non_empty("SHELL");
        }
        if let Some(v) = non_empty("TERMHUB_CWD") {
            self.working_dir = Some(PathBuf::from(v));
        } else if self.working_dir.is_none() {
            self.working_dir = non_empty("HOME").map(PathBuf::from);
        }
        if let Some(v) = non_empty("TERMHUB_ENV_DENYLIST") {
            for name in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !self.env_denylist.iter().any(|existing| existing == name) {
                    self.env_denylist.push(name.to_string());
                }
            }
        }
    }

    /// Rejects values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be at least 1".into()));
        }
        if self.shell().trim().is_empty() {
            return Err(ConfigError::Invalid("shell must not be empty".into()));
        }
        Ok(())
    }

    /// Program spawned for new sessions.
    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(FALLBACK_SHELL)
    }

    /// Working directory of new sessions.
    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    /// Size of a session created without client dimensions.
    pub fn default_size(&self) -> TermSize {
        TermSize::new(self.default_cols, self.default_rows)
    }

    pub fn child_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.child_probe_timeout_ms)
    }
}

/// `<config_dir>/termhub/config.toml`, if a config directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// Directory for the PID file and daemon log.
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

/// Log file used when running daemonized.
pub fn log_file_path() -> PathBuf {
    state_dir().join("termhubd.log")
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/termhub.sock"));
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.buffer.max_items, 1000);
        assert_eq!(config.buffer.max_bytes, 1024 * 1024);
        assert_eq!(config.default_size(), TermSize::new(80, 24));
        assert_eq!(config.child_probe_timeout(), Duration::from_millis(500));
        assert!(config.env_denylist.iter().any(|p| p == "TERMHUB_*"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            socket_path = "/run/termhub.sock"
            max_sessions = 5

            [buffer]
            max_items = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/termhub.sock"));
        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.buffer.max_items, 10);
        assert_eq!(config.buffer.max_bytes, 1024 * 1024);
        assert_eq!(config.default_cols, 80);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DaemonConfig::default();
        config.apply_env_with(lookup(&[
            ("TERMHUB_SOCKET", "/tmp/other.sock"),
            ("TERMHUB_DATA_DIR", "/var/lib/termhub"),
            ("SHELL", "/bin/zsh"),
            ("HOME", "/home/me"),
            ("TERMHUB_ENV_DENYLIST", "DB_PASSWORD, STRIPE_*,,TERMHUB_*"),
        ]));

        assert_eq!(config.socket_path, PathBuf::from("/tmp/other.sock"));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/termhub"));
        assert_eq!(config.shell(), "/bin/zsh");
        assert_eq!(config.working_dir(), PathBuf::from("/home/me"));
        assert!(config.env_denylist.iter().any(|p| p == "DB_PASSWORD"));
        assert!(config.env_denylist.iter().any(|p| p == "STRIPE_*"));
        assert_eq!(
            config.env_denylist.iter().filter(|p| *p == "TERMHUB_*").count(),
            1
        );
    }

    #[test]
    fn test_termhub_cwd_wins_over_home() {
        let mut config = DaemonConfig::default();
        config.apply_env_with(lookup(&[("HOME", "/home/me"), ("TERMHUB_CWD", "/srv")]));
        assert_eq!(config.working_dir(), PathBuf::from("/srv"));
    }

    #[test]
    fn test_file_shell_and_working_dir_beat_login_env() {
        let mut config: DaemonConfig = toml::from_str(
            r#"
            shell = "/bin/zsh"
            working_dir = "/srv/work"
            "#,
        )
        .unwrap();

        config.apply_env_with(lookup(&[("SHELL", "/bin/bash"), ("HOME", "/home/me")]));

        assert_eq!(config.shell(), "/bin/zsh");
        assert_eq!(config.working_dir(), PathBuf::from("/srv/work"));
    }

    #[test]
    fn test_termhub_cwd_overrides_file_working_dir() {
        let mut config: DaemonConfig = toml::from_str(r#"working_dir = "/srv/work""#).unwrap();
        config.apply_env_with(lookup(&[("TERMHUB_CWD", "/tmp/elsewhere")]));
        assert_eq!(config.working_dir(), PathBuf::from("/tmp/elsewhere"));
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = DaemonConfig::default();
        config.apply_env_with(lookup(&[("SHELL", "  ")]));
        assert_eq!(config.shell(), FALLBACK_SHELL);
    }

    #[test]
    fn test_validate_rejects_zero_sessions() {
        let config = DaemonConfig {
            max_sessions: 0,
            ..DaemonConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = DaemonConfig::from_file(Path::new("/nonexistent/termhub.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/termhub.toml"));
    }
}
