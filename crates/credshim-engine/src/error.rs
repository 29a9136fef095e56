use reqwest::StatusCode;

/// Errors produced by a single fetch cycle against the credentials endpoint.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credentials endpoint is not configured: {var} is unset or empty")]
    MissingEndpoint { var: &'static str },

    #[error("invalid credentials endpoint `{input}`: {reason}")]
    InvalidEndpoint { input: String, reason: String },

    #[error("failed to make request: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("credentials endpoint {url} responded with HTTP {status}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("failed to parse JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("failed to set environment variable {var}: {reason}")]
    InvalidEnvironmentValue { var: &'static str, reason: String },

    #[error("failed to build HTTP client: {reason}")]
    Client { reason: String },
}

impl CredentialError {
    pub fn invalid_endpoint(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Configuration errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingEndpoint { .. } | Self::InvalidEndpoint { .. } | Self::Client { .. }
        )
    }

    /// Errors likely to clear up on their own (network blips, server errors).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
