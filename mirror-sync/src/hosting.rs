//! Hosting API boundary: create-or-get a remote repository.
//!
//! [`GithubHosting`] talks to the GitHub REST API over `ureq`. Creation is
//! idempotent from the caller's view: a 422 ("name already exists") falls
//! back to a lookup by name.

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use mirror_core::{redact_credentials, ApiToken, RepoName};

const USER_AGENT: &str = concat!("mirror/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Error)]
pub enum HostingError {
    #[error("hosting API rejected the credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("hosting API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("hosting API unreachable after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    #[error("unexpected hosting API response: {0}")]
    Decode(String),
}

/// A repository on the hosting side.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    pub name: RepoName,
    /// Clone URL with the credential embedded in its user-info.
    pub clone_url: String,
    /// `false` when an existing repository was reused.
    pub created: bool,
}

impl std::fmt::Debug for RemoteRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRepository")
            .field("name", &self.name)
            .field("clone_url", &redact_credentials(&self.clone_url))
            .field("created", &self.created)
            .finish()
    }
}

pub trait HostingBackend: Send + Sync {
    /// Create `name` under the account, or return the existing repository of
    /// that name.
    fn create_or_get_repository(
        &self,
        name: &RepoName,
        private: bool,
        description: &str,
    ) -> Result<RemoteRepository, HostingError>;
}

/// Bounded retry policy for transport-level failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepoPayload {
    name: String,
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

pub struct GithubHosting {
    agent: ureq::Agent,
    api_base: String,
    owner: String,
    token: ApiToken,
    retry: RetryPolicy,
}

impl GithubHosting {
    pub fn new(api_base: impl Into<String>, owner: impl Into<String>, token: ApiToken) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            agent,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            token,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn create(
        &self,
        name: &RepoName,
        private: bool,
        description: &str,
    ) -> Result<RepoPayload, HostingError> {
        let url = format!("{}/user/repos", self.api_base);
        let body = serde_json::json!({
            "name": name.as_str(),
            "private": private,
            "description": description,
            "auto_init": false,
        });
        self.with_retries(|| {
            self.agent
                .post(&url)
                .set("Authorization", &format!("Bearer {}", self.token.expose()))
                .set("Accept", ACCEPT)
                .set("User-Agent", USER_AGENT)
                .send_json(body.clone())
        })
    }

    fn lookup(&self, name: &RepoName) -> Result<RepoPayload, HostingError> {
        let url = format!("{}/repos/{}/{}", self.api_base, self.owner, name);
        self.with_retries(|| {
            self.agent
                .get(&url)
                .set("Authorization", &format!("Bearer {}", self.token.expose()))
                .set("Accept", ACCEPT)
                .set("User-Agent", USER_AGENT)
                .call()
        })
    }

    /// Run `call`, retrying transport failures with doubling backoff.
    fn with_retries<F>(&self, call: F) -> Result<RepoPayload, HostingError>
    where
        F: Fn() -> Result<ureq::Response, ureq::Error>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut backoff = self.retry.initial_backoff;
        let mut last = String::new();
        for attempt in 1..=attempts {
            match call() {
                Ok(resp) => {
                    return resp
                        .into_json::<RepoPayload>()
                        .map_err(|e| HostingError::Decode(e.to_string()));
                }
                Err(ureq::Error::Status(status, resp)) => return Err(status_error(status, resp)),
                Err(ureq::Error::Transport(t)) => {
                    last = redact_credentials(&t.to_string());
                    tracing::warn!(attempt, attempts, error = %last, "hosting API call failed");
                    if attempt < attempts {
                        thread::sleep(backoff);
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        Err(HostingError::Transport {
            attempts,
            message: last,
        })
    }

    fn bind(&self, payload: RepoPayload, created: bool) -> RemoteRepository {
        RemoteRepository {
            name: RepoName::from(payload.name),
            clone_url: authenticated_url(&payload.clone_url, &self.token),
            created,
        }
    }
}

impl HostingBackend for GithubHosting {
    fn create_or_get_repository(
        &self,
        name: &RepoName,
        private: bool,
        description: &str,
    ) -> Result<RemoteRepository, HostingError> {
        match self.create(name, private, description) {
            Ok(payload) => {
                tracing::info!(repo = %name, "created remote repository");
                Ok(self.bind(payload, true))
            }
            Err(HostingError::Status { status: 422, .. }) => {
                tracing::info!(repo = %name, "remote repository already exists, reusing it");
                let payload = self.lookup(name)?;
                Ok(self.bind(payload, false))
            }
            Err(e) => Err(e),
        }
    }
}

fn status_error(status: u16, resp: ureq::Response) -> HostingError {
    if status == 401 || status == 403 {
        return HostingError::Unauthorized { status };
    }
    let message = resp
        .into_json::<ErrorPayload>()
        .map(|p| p.message)
        .unwrap_or_default();
    HostingError::Status {
        status,
        message: redact_credentials(&message),
    }
}

/// Embed `token` as the user-info of an `https://` clone URL.
///
/// URLs with another scheme, or that already carry user-info, are returned
/// unchanged.
pub fn authenticated_url(clone_url: &str, token: &ApiToken) -> String {
    match clone_url.strip_prefix("https://") {
        Some(rest) if !rest.split('/').next().unwrap_or("").contains('@') => {
            format!("https://{}@{}", token.expose(), rest)
        }
        _ => clone_url.to_string(),
    }
}
