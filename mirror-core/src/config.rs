//! Environment-driven configuration.
//!
//! Every reader has two forms:
//! - `*_from_lookup(lookup, home)`: explicit variable source and home; used in tests
//! - `*_from_env()`: reads the process environment and `dirs::home_dir()`
//!
//! Tests must never call the `_from_env` forms.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::state;

pub const ENV_TOKEN: &str = "GITHUB_API_TOKEN";
pub const ENV_USERNAME: &str = "GITHUB_USERNAME";
pub const ENV_EMAIL: &str = "GITHUB_EMAIL";
pub const ENV_ROOTS: &str = "MIRROR_ROOTS";
pub const ENV_STATE_FILE: &str = "MIRROR_STATE_FILE";
pub const ENV_BACKDATE: &str = "MIRROR_BACKDATE_COMMITS";
pub const ENV_SYNC_DELAY: &str = "MIRROR_SYNC_DELAY_SECS";
pub const ENV_PRIVATE: &str = "MIRROR_PRIVATE_REPOS";
pub const ENV_DEFAULT_BRANCH: &str = "MIRROR_DEFAULT_BRANCH";
pub const ENV_API_BASE: &str = "MIRROR_GITHUB_API";

pub const DEFAULT_SYNC_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Hosting API bearer token. `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

impl fmt::Display for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Commit author identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Full runtime configuration for `sync` and `watch`.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: ApiToken,
    pub username: String,
    pub email: String,
    pub roots: Vec<PathBuf>,
    pub state_file: PathBuf,
    /// Commit at the folder's modification time instead of now.
    pub backdate_commits: bool,
    pub sync_delay: Duration,
    pub private_repos: bool,
    pub default_branch: String,
    pub api_base: String,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), dirs::home_dir().as_deref())
    }

    /// Load from an arbitrary variable source.
    ///
    /// Credentials are checked first so a missing token is reported before
    /// anything else.
    pub fn from_lookup<F>(lookup: F, home: Option<&Path>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = required(&lookup, ENV_TOKEN)?;
        let username = required(&lookup, ENV_USERNAME)?;
        let email = required(&lookup, ENV_EMAIL)?;

        let roots = non_empty(&lookup, ENV_ROOTS)
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();

        let backdate_commits = match non_empty(&lookup, ENV_BACKDATE) {
            Some(raw) => parse_bool(ENV_BACKDATE, &raw)?,
            None => false,
        };
        let private_repos = match non_empty(&lookup, ENV_PRIVATE) {
            Some(raw) => parse_bool(ENV_PRIVATE, &raw)?,
            None => true,
        };
        let sync_delay = match non_empty(&lookup, ENV_SYNC_DELAY) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_SYNC_DELAY,
                        value: raw,
                        reason: "expected a positive number of seconds",
                    })
                }
            },
            None => DEFAULT_SYNC_DELAY,
        };

        Ok(Self {
            token: ApiToken::new(token),
            username,
            email,
            roots,
            state_file: state_file_from_lookup(&lookup, home)?,
            backdate_commits,
            sync_delay,
            private_repos,
            default_branch: non_empty(&lookup, ENV_DEFAULT_BRANCH)
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            api_base: non_empty(&lookup, ENV_API_BASE)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }

    /// Replace the configured roots when `roots` is non-empty.
    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        if !roots.is_empty() {
            self.roots = roots;
        }
        self
    }

    /// Fail with [`ConfigError::NoRoots`] when there is nothing to scan.
    pub fn require_roots(&self) -> Result<(), ConfigError> {
        if self.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        Ok(())
    }

    /// Fallback commit identity when the repository has none configured.
    pub fn identity(&self) -> Identity {
        Identity {
            name: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

/// Resolve the state document path without requiring credentials.
pub fn state_file_from_env() -> Result<PathBuf, ConfigError> {
    state_file_from_lookup(&|key: &str| std::env::var(key).ok(), dirs::home_dir().as_deref())
}

pub fn state_file_from_lookup<F>(lookup: &F, home: Option<&Path>) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = non_empty(lookup, ENV_STATE_FILE) {
        return Ok(PathBuf::from(path));
    }
    home.map(state::default_path_at)
        .ok_or(ConfigError::HomeNotFound)
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, var).ok_or(ConfigError::MissingVar(var))
}

fn non_empty<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var).filter(|v| !v.trim().is_empty())
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            reason: "expected true/false",
        }),
    }
}
