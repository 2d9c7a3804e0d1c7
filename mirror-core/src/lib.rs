//! Mirror core library: domain types, state persistence, configuration, errors.
//!
//! - [`types`]: repo-name slug, tracked-project records, credential redaction
//! - [`state`]: load / save of the tracking document
//! - [`config`]: environment-driven configuration
//! - [`error`]: [`StateError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use config::{ApiToken, Config, Identity};
pub use error::{ConfigError, StateError};
pub use state::StateStore;
pub use types::{redact_credentials, RepoName, TrackedProject, TrackedState};
