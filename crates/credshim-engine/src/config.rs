use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::CredentialError;

/// Environment variable holding the full URI of the credentials endpoint.
pub const FULL_URI_VAR: &str = "AWS_CONTAINER_CREDENTIALS_FULL_URI";

/// Environment variable holding the optional `Authorization` header value.
pub const AUTH_TOKEN_VAR: &str = "AWS_CONTAINER_AUTHORIZATION_TOKEN";

pub const DEFAULT_USER_AGENT: &str = concat!("credshim/", env!("CARGO_PKG_VERSION"));

/// Where to send the credentials request, and with which token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub uri: Url,
    /// Sent verbatim as the `Authorization` header when present.
    pub auth_token: Option<String>,
}

impl EndpointConfig {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = (!token.is_empty()).then_some(token);
        self
    }

    /// Read the endpoint from the process environment.
    pub fn from_env() -> Result<Self, CredentialError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the endpoint through an arbitrary variable lookup.
    ///
    /// An empty token is treated the same as an absent one.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup(FULL_URI_VAR)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .ok_or(CredentialError::MissingEndpoint { var: FULL_URI_VAR })?;

        let uri = Url::parse(&raw)
            .map_err(|e| CredentialError::invalid_endpoint(&raw, e.to_string()))?;

        match uri.scheme() {
            "http" | "https" => {}
            other => {
                return Err(CredentialError::invalid_endpoint(
                    &raw,
                    format!("unsupported scheme `{other}`"),
                ));
            }
        }

        let config = Self::new(uri);
        Ok(match lookup(AUTH_TOKEN_VAR) {
            Some(token) => config.with_auth_token(token),
            None => config,
        })
    }
}

/// Variable lookup consulted on every fetch by [`EndpointSource::Lookup`].
pub type VarLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// How the fetcher obtains its [`EndpointConfig`] on each call.
#[derive(Clone, Default)]
pub enum EndpointSource {
    /// Re-read the process environment on every fetch so a rotated token is picked up.
    #[default]
    Environment,
    /// Like `Environment`, but backed by a caller-supplied lookup.
    Lookup(VarLookup),
    /// A fixed endpoint, resolved once by the caller.
    Fixed(EndpointConfig),
}

impl EndpointSource {
    pub fn lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self::Lookup(Arc::new(lookup))
    }

    pub fn resolve(&self) -> Result<EndpointConfig, CredentialError> {
        match self {
            Self::Environment => EndpointConfig::from_env(),
            Self::Lookup(lookup) => EndpointConfig::from_lookup(|key| lookup(key)),
            Self::Fixed(config) => Ok(config.clone()),
        }
    }
}

impl fmt::Debug for EndpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => f.write_str("Environment"),
            Self::Lookup(_) => f.write_str("Lookup(..)"),
            Self::Fixed(config) => f.debug_tuple("Fixed").field(config).finish(),
        }
    }
}

/// HTTP options for the credentials request.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Overall timeout for one request, including reading the body.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Lower bound on the wait between refreshes in expiration-driven mode.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// User-facing choice of refresh strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum RefreshMode {
    /// Refresh on a fixed interval
    #[default]
    Fixed,
    /// Refresh shortly before the reported expiration
    Expiration,
}

/// When the next refresh should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSchedule {
    /// Refresh a fixed interval after the previous wait began, regardless of expiration.
    FixedInterval(Duration),
    /// Refresh `buffer` before the held expiration, but never sooner than
    /// `min_interval` from now.
    BeforeExpiration {
        buffer: Duration,
        min_interval: Duration,
    },
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self::FixedInterval(Duration::from_secs(30))
    }
}

impl RefreshSchedule {
    /// Build a schedule from CLI-level settings.
    ///
    /// `interval` is only used in [`RefreshMode::Fixed`]; `buffer` only in
    /// [`RefreshMode::Expiration`].
    pub fn from_mode(mode: RefreshMode, interval: Duration, buffer: Duration) -> Self {
        match mode {
            RefreshMode::Fixed => Self::FixedInterval(interval),
            RefreshMode::Expiration => Self::BeforeExpiration {
                buffer,
                min_interval: MIN_REFRESH_INTERVAL,
            },
        }
    }

    /// How long to wait from `now` before the next fetch.
    pub fn delay_from(&self, now: DateTime<Utc>, expiration: Option<DateTime<Utc>>) -> Duration {
        match *self {
            Self::FixedInterval(interval) => interval,
            Self::BeforeExpiration {
                buffer,
                min_interval,
            } => {
                let Some(expiration) = expiration else {
                    return min_interval;
                };
                // chrono::Duration is signed; a negative span means the refresh point has passed.
                let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::MAX);
                let until = expiration
                    .checked_sub_signed(buffer)
                    .map(|refresh_at| refresh_at - now)
                    .and_then(|span| span.to_std().ok())
                    .unwrap_or(Duration::ZERO);
                until.max(min_interval)
            }
        }
    }
}

/// Timing policy for the background refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub schedule: RefreshSchedule,
    /// Pause after a failed fetch before the loop goes back to waiting.
    pub retry_cooldown: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            schedule: RefreshSchedule::default(),
            retry_cooldown: Duration::from_secs(60),
        }
    }
}
