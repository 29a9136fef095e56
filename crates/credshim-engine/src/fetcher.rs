//! One fetch-and-apply cycle against the credentials endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};
use tracing::{debug, instrument, trace};

use crate::config::{EndpointSource, FetcherConfig};
use crate::credentials::CredentialStore;
use crate::CredentialError;

/// Something that can refresh the credential set.
///
/// Implementations store whatever they fetched as a side effect and report
/// the expiration instant, if the endpoint provided one.
#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Option<DateTime<Utc>>, CredentialError>;
}

/// Fetches credentials over HTTP and applies them to a [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct HttpCredentialFetcher {
    client: reqwest::Client,
    source: EndpointSource,
    store: CredentialStore,
}

impl HttpCredentialFetcher {
    pub fn new(
        config: &FetcherConfig,
        source: EndpointSource,
        store: CredentialStore,
    ) -> Result<Self, CredentialError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            // The endpoint is local; an environment proxy would only get in the way.
            .no_proxy()
            .build()
            .map_err(|e| CredentialError::Client {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            source,
            store,
        })
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &CredentialStore {
        &self.store
    }

    async fn request(&self) -> Result<Map<String, Value>, CredentialError> {
        // Resolved per call so that a rotated authorization token is observed.
        let endpoint = self.source.resolve()?;

        let mut request = self.client.get(endpoint.uri.clone());
        if let Some(token) = endpoint.auth_token.as_deref() {
            request = request.header(AUTHORIZATION, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::http_status(status, endpoint.uri.as_str()));
        }

        let body = response.bytes().await?;
        let payload: Map<String, Value> = serde_json::from_slice(&body)?;
        trace!(
            keys = ?payload.keys().collect::<Vec<_>>(),
            "Received credentials payload"
        );
        Ok(payload)
    }
}

#[async_trait]
impl CredentialFetcher for HttpCredentialFetcher {
    #[instrument(skip(self), err(Display))]
    async fn fetch(&self) -> Result<Option<DateTime<Utc>>, CredentialError> {
        let payload = self.request().await?;
        let expiration = self.store.apply(&payload)?;
        debug!(?expiration, "Applied credentials");
        Ok(expiration)
    }
}
