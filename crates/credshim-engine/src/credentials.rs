//! Credential state and the response-to-environment mapping.
//!
//! The endpoint answers with a loosely typed JSON object. Known fields are
//! routed through a fixed dispatch table into a [`CredentialSet`]; everything
//! else is ignored. The set is later exported into the child process
//! environment instead of mutating the shim's own environment.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::trace;

use crate::CredentialError;

pub const ACCESS_KEY_ID_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";

/// A recognized key in the endpoint response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    AccessKeyId,
    SecretAccessKey,
    Token,
    Expiration,
}

impl Field {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "AccessKeyId" => Some(Self::AccessKeyId),
            "SecretAccessKey" => Some(Self::SecretAccessKey),
            "Token" => Some(Self::Token),
            "Expiration" => Some(Self::Expiration),
            _ => None,
        }
    }

    fn env_var(self) -> Option<&'static str> {
        match self {
            Self::AccessKeyId => Some(ACCESS_KEY_ID_VAR),
            Self::SecretAccessKey => Some(SECRET_ACCESS_KEY_VAR),
            Self::Token => Some(SESSION_TOKEN_VAR),
            Self::Expiration => None,
        }
    }
}

/// Render a JSON value the way it should appear in an environment variable.
///
/// Strings are taken verbatim, `null` becomes empty, and anything else is
/// written as compact JSON.
pub fn display_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}

/// Parse an RFC 3339 `Expiration` value. Anything unparsable yields `None`.
fn parse_expiration(value: &Value) -> Option<DateTime<Utc>> {
    let Value::String(raw) = value else {
        return None;
    };
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// The credential environment handed to the supervised child.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("CredentialSet")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("session_token", &redact(&self.session_token))
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl CredentialSet {
    pub fn access_key_id(&self) -> Option<&str> {
        self.access_key_id.as_deref()
    }

    pub fn secret_access_key(&self) -> Option<&str> {
        self.secret_access_key.as_deref()
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    pub fn is_empty(&self) -> bool {
        self.access_key_id.is_none()
            && self.secret_access_key.is_none()
            && self.session_token.is_none()
    }

    /// Look up a value by environment variable name.
    #[cfg(test)]
    pub(crate) fn get(&self, var: &str) -> Option<&str> {
        match var {
            ACCESS_KEY_ID_VAR => self.access_key_id(),
            SECRET_ACCESS_KEY_VAR => self.secret_access_key(),
            SESSION_TOKEN_VAR => self.session_token(),
            _ => None,
        }
    }

    /// The variables that are currently set, as `(name, value)` pairs.
    pub fn env_vars(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            (ACCESS_KEY_ID_VAR, self.access_key_id.as_deref()),
            (SECRET_ACCESS_KEY_VAR, self.secret_access_key.as_deref()),
            (SESSION_TOKEN_VAR, self.session_token.as_deref()),
        ]
        .into_iter()
        .filter_map(|(var, value)| value.map(|v| (var, v)))
    }

    /// Store one environment value.
    ///
    /// Fails when the value could never be exported to a process
    /// environment (it contains a NUL byte).
    pub fn set_var(&mut self, var: &'static str, value: String) -> Result<(), CredentialError> {
        if value.contains('\0') {
            return Err(CredentialError::InvalidEnvironmentValue {
                var,
                reason: "value contains a NUL byte".to_string(),
            });
        }

        let slot = match var {
            ACCESS_KEY_ID_VAR => &mut self.access_key_id,
            SECRET_ACCESS_KEY_VAR => &mut self.secret_access_key,
            SESSION_TOKEN_VAR => &mut self.session_token,
            _ => {
                return Err(CredentialError::InvalidEnvironmentValue {
                    var,
                    reason: "not a credential variable".to_string(),
                });
            }
        };
        *slot = Some(value);
        Ok(())
    }

    /// Apply one endpoint response.
    ///
    /// Returns the parsed expiration, if the payload carried a valid one.
    /// Not atomic: when a value is rejected, fields stored earlier in the
    /// same pass stay stored and the error is returned.
    pub fn apply(
        &mut self,
        payload: &Map<String, Value>,
    ) -> Result<Option<DateTime<Utc>>, CredentialError> {
        let mut expiration = None;

        for (key, value) in payload {
            let Some(field) = Field::from_key(key) else {
                trace!(key = %key, "Ignoring unrecognized credential field");
                continue;
            };

            match field.env_var() {
                Some(var) => self.set_var(var, display_value(value).into_owned())?,
                None => match parse_expiration(value) {
                    Some(ts) => {
                        self.expiration = Some(ts);
                        expiration = Some(ts);
                    }
                    None => trace!("Dropping unparsable Expiration value"),
                },
            }
        }

        Ok(expiration)
    }
}

/// Shared handle to the current [`CredentialSet`].
///
/// The refresh loop writes through it; the supervisor reads a snapshot when
/// it launches the child.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<CredentialSet>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CredentialSet {
        self.inner.read().clone()
    }

    pub fn apply(
        &self,
        payload: &Map<String, Value>,
    ) -> Result<Option<DateTime<Utc>>, CredentialError> {
        self.inner.write().apply(payload)
    }
}
