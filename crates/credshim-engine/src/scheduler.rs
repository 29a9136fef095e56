//! Background credential refresh loop.
//!
//! The loop alternates between waiting for the next refresh point and
//! fetching. A failed fetch is logged and followed by a fixed cooldown; the
//! loop itself only stops when its cancellation token fires (or on a
//! configuration error that no amount of retrying can fix).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RefreshPolicy;
use crate::fetcher::CredentialFetcher;
use crate::CredentialError;

/// Why the refresh loop stopped.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The lifetime token was cancelled.
    Cancelled {
        /// Expiration held when the loop stopped.
        expiration: Option<DateTime<Utc>>,
    },
    /// A fetch failed with a configuration error.
    Aborted(CredentialError),
}

/// Sleep for `delay` unless `token` is cancelled first.
///
/// Returns `false` when cancelled.
async fn wait_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

pub struct RefreshScheduler {
    fetcher: Arc<dyn CredentialFetcher>,
    policy: RefreshPolicy,
}

impl RefreshScheduler {
    pub fn new(fetcher: Arc<dyn CredentialFetcher>, policy: RefreshPolicy) -> Self {
        Self { fetcher, policy }
    }

    /// Run the loop on a new tokio task.
    pub fn spawn(
        self,
        token: CancellationToken,
        initial_expiration: Option<DateTime<Utc>>,
    ) -> JoinHandle<RefreshOutcome> {
        tokio::spawn(async move { self.run(token, initial_expiration).await })
    }

    /// Keep credentials fresh until `token` is cancelled.
    pub async fn run(
        &self,
        token: CancellationToken,
        initial_expiration: Option<DateTime<Utc>>,
    ) -> RefreshOutcome {
        let mut expiration = initial_expiration;
        let mut failures: u32 = 0;

        loop {
            let delay = self.policy.schedule.delay_from(Utc::now(), expiration);
            debug!(
                delay_ms = delay.as_millis() as u64,
                "Waiting for next credential refresh"
            );
            if !wait_or_cancel(&token, delay).await {
                debug!("Credential refresh cancelled while waiting");
                return RefreshOutcome::Cancelled { expiration };
            }

            debug!(?expiration, "Refreshing credentials");
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Credential refresh cancelled during fetch");
                    return RefreshOutcome::Cancelled { expiration };
                }
                result = self.fetcher.fetch() => result,
            };

            match result {
                Ok(new_expiration) => {
                    failures = 0;
                    // A response without a usable expiration keeps the previous one.
                    if new_expiration.is_some() {
                        expiration = new_expiration;
                    }
                    info!(?expiration, "Credentials refreshed");
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Credential refresh stopped; keeping existing credentials");
                    return RefreshOutcome::Aborted(e);
                }
                Err(e) => {
                    failures += 1;
                    let cooldown = self.policy.retry_cooldown;
                    warn!(
                        attempt = failures,
                        delay_ms = cooldown.as_millis() as u64,
                        transient = e.is_transient(),
                        error = %e,
                        "Failed to refresh credentials; keeping existing ones"
                    );
                    if !wait_or_cancel(&token, cooldown).await {
                        debug!("Credential refresh cancelled during retry cooldown");
                        return RefreshOutcome::Cancelled { expiration };
                    }
                }
            }
        }
    }
}
