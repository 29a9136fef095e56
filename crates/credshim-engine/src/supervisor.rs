//! Startup, child execution and shutdown coordination.

use std::ffi::OsStr;
use std::sync::Arc;

use process_utils::{Termination, classify, inherited_command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{ChildCommand, split_args};
use crate::config::RefreshPolicy;
use crate::credentials::CredentialStore;
use crate::fetcher::CredentialFetcher;
use crate::scheduler::{RefreshOutcome, RefreshScheduler};
use crate::CredentialError;

/// How a supervised run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// No command followed the delimiter; credentials were fetched and nothing else ran.
    NoCommand,
    /// The child exited normally with this code.
    Exited(i32),
}

impl SupervisorExit {
    /// Exit code the shim itself should use.
    pub fn code(&self) -> i32 {
        match self {
            Self::NoCommand => 0,
            Self::Exited(code) => *code,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to fetch initial credentials: {0}")]
    InitialFetch(#[source] CredentialError),

    #[error("failed to execute command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for command `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` {termination}")]
    AbnormalExit {
        command: String,
        termination: Termination,
    },
}

/// Handle to a running refresh loop.
struct RefreshTask {
    token: CancellationToken,
    handle: JoinHandle<RefreshOutcome>,
}

impl RefreshTask {
    async fn stop(self) {
        self.token.cancel();
        match self.handle.await {
            Ok(RefreshOutcome::Cancelled { expiration }) => {
                debug!(?expiration, "Credential refresh stopped");
            }
            Ok(RefreshOutcome::Aborted(e)) => {
                warn!(error = %e, "Credential refresh had already stopped");
            }
            Err(e) => warn!(error = %e, "Credential refresh task failed"),
        }
    }
}

/// Fetches credentials, keeps them fresh, and runs one child process with them.
pub struct Supervisor {
    fetcher: Arc<dyn CredentialFetcher>,
    store: CredentialStore,
    policy: RefreshPolicy,
}

impl Supervisor {
    /// `store` must be the store that `fetcher` writes into.
    pub fn new(
        fetcher: Arc<dyn CredentialFetcher>,
        store: CredentialStore,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            fetcher,
            store,
            policy,
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Run with a full argument list; everything after the first `--` is the child command.
    pub async fn start<S: AsRef<OsStr>>(
        &self,
        args: &[S],
    ) -> Result<SupervisorExit, SupervisorError> {
        let (_, command) = split_args(args);
        self.run(command).await
    }

    /// Run with an already split command.
    pub async fn run(
        &self,
        command: Option<ChildCommand>,
    ) -> Result<SupervisorExit, SupervisorError> {
        let expiration = self
            .fetcher
            .fetch()
            .await
            .map_err(SupervisorError::InitialFetch)?;
        if self.store.snapshot().is_empty() {
            warn!("Credentials endpoint returned no access key, secret or session token");
        }

        let refresh = match expiration {
            Some(expiration) => {
                info!(%expiration, "Fetched initial credentials; refreshing in background");
                let token = CancellationToken::new();
                let handle = RefreshScheduler::new(Arc::clone(&self.fetcher), self.policy)
                    .spawn(token.clone(), Some(expiration));
                Some(RefreshTask { token, handle })
            }
            None => {
                info!("Fetched initial credentials without expiration; they will not be refreshed");
                None
            }
        };

        let result = match command {
            Some(command) => self.run_child(&command).await,
            None => {
                debug!("No command after `--`; nothing to run");
                Ok(SupervisorExit::NoCommand)
            }
        };

        if let Some(refresh) = refresh {
            refresh.stop().await;
        }
        result
    }

    async fn run_child(&self, command: &ChildCommand) -> Result<SupervisorExit, SupervisorError> {
        let credentials = self.store.snapshot();
        let mut cmd = inherited_command(&command.program, &command.args);
        cmd.envs(credentials.env_vars());

        debug!(command = %command, "Starting command");
        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let status = child.wait().await.map_err(|source| SupervisorError::Wait {
            command: command.to_string(),
            source,
        })?;

        let termination = classify(status);
        match termination.code() {
            Some(code) => {
                debug!(code, "Command exited");
                Ok(SupervisorExit::Exited(code))
            }
            None => Err(SupervisorError::AbnormalExit {
                command: command.to_string(),
                termination,
            }),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::RefreshSchedule;
    use crate::credentials::{ACCESS_KEY_ID_VAR, SECRET_ACCESS_KEY_VAR, SESSION_TOKEN_VAR};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use reqwest::StatusCode;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Applies the same payload on every call, or fails every call.
    struct StaticFetcher {
        store: CredentialStore,
        payload: Option<Map<String, Value>>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn new(store: CredentialStore, payload: Value) -> Arc<Self> {
            let payload = match payload {
                Value::Object(map) => Some(map),
                _ => None,
            };
            Arc::new(Self {
                store,
                payload,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(store: CredentialStore) -> Arc<Self> {
            Self::new(store, Value::Null)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialFetcher for StaticFetcher {
        async fn fetch(&self) -> Result<Option<DateTime<Utc>>, CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.payload {
                Some(payload) => self.store.apply(payload),
                None => Err(CredentialError::http_status(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "http://127.0.0.1/creds",
                )),
            }
        }
    }

    fn full_payload() -> Value {
        json!({
            "AccessKeyId": "AKIASTUB",
            "SecretAccessKey": "stub-secret",
            "Token": "stub-token",
            "Expiration": "2030-01-01T00:00:00Z",
        })
    }

    fn supervisor(fetcher: Arc<StaticFetcher>, store: CredentialStore) -> Supervisor {
        Supervisor::new(fetcher, store, RefreshPolicy::default())
    }

    #[tokio::test]
    async fn propagates_child_exit_code() {
        let store = CredentialStore::new();
        let fetcher = StaticFetcher::new(store.clone(), full_payload());
        let supervisor = supervisor(fetcher, store);

        let exit = supervisor
            .start(&["--", "sh", "-c", "exit 7"])
            .await
            .unwrap();
        assert_eq!(exit, SupervisorExit::Exited(7));
        assert_eq!(exit.code(), 7);
    }

    #[tokio::test]
    async fn without_delimiter_only_fetches() {
        let store = CredentialStore::new();
        let fetcher = StaticFetcher::new(store.clone(), full_payload());
        let supervisor = supervisor(fetcher.clone(), store);

        let exit = supervisor.start(&["-v", "sh", "-c", "exit 3"]).await.unwrap();
        assert_eq!(exit, SupervisorExit::NoCommand);
        assert_eq!(exit.code(), 0);
        assert_eq!(fetcher.calls(), 1);

        let set = supervisor.store().snapshot();
        assert_eq!(set.get(ACCESS_KEY_ID_VAR), Some("AKIASTUB"));
        assert_eq!(set.get(SECRET_ACCESS_KEY_VAR), Some("stub-secret"));
        assert_eq!(set.get(SESSION_TOKEN_VAR), Some("stub-token"));
    }

    #[tokio::test]
    async fn child_sees_credentials_in_environment() {
        let store = CredentialStore::new();
        let fetcher = StaticFetcher::new(store.clone(), full_payload());
        let supervisor = supervisor(fetcher, store);

        let script = r#"[ "$AWS_ACCESS_KEY_ID" = AKIASTUB ] && [ "$AWS_SECRET_ACCESS_KEY" = stub-secret ] && [ "$AWS_SESSION_TOKEN" = stub-token ]"#;
        let exit = supervisor.start(&["--", "sh", "-c", script]).await.unwrap();
        assert_eq!(exit, SupervisorExit::Exited(0));
    }

    #[tokio::test]
    async fn initial_fetch_failure_is_fatal() {
        let store = CredentialStore::new();
        let fetcher = StaticFetcher::failing(store.clone());
        let supervisor = supervisor(fetcher.clone(), store);

        let err = supervisor
            .start(&["--", "sh", "-c", "exit 0"])
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InitialFetch(_)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let store = CredentialStore::new();
        let fetcher = StaticFetcher::new(store.clone(), full_payload());
        let supervisor = supervisor(fetcher, store);

        let err = supervisor
            .start(&["--", "credshim-test-no-such-program"])
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn signalled_child_is_abnormal() {
        let store = CredentialStore::new();
        let fetcher = StaticFetcher::new(store.clone(), full_payload());
        let supervisor = supervisor(fetcher, store);

        let err = supervisor
            .start(&["--", "sh", "-c", "kill -9 $$"])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::AbnormalExit {
                termination: Termination::Signaled(9),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn refresh_stops_when_child_exits() {
        let store = CredentialStore::new();
        let fetcher = StaticFetcher::new(store.clone(), full_payload());
        let policy = RefreshPolicy {
            schedule: RefreshSchedule::FixedInterval(Duration::from_millis(20)),
            retry_cooldown: Duration::from_millis(20),
        };
        let supervisor = Supervisor::new(fetcher.clone(), store, policy);

        let exit = supervisor
            .start(&["--", "sh", "-c", "sleep 0.3"])
            .await
            .unwrap();
        assert_eq!(exit, SupervisorExit::Exited(0));

        let calls_at_exit = fetcher.calls();
        assert!(calls_at_exit > 1, "expected background refreshes, got {calls_at_exit}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fetcher.calls(), calls_at_exit);
    }

    #[tokio::test]
    async fn no_expiration_means_no_refresh() {
        let store = CredentialStore::new();
        let fetcher = StaticFetcher::new(
            store.clone(),
            json!({ "AccessKeyId": "AKIASTUB", "SecretAccessKey": "stub-secret" }),
        );
        let policy = RefreshPolicy {
            schedule: RefreshSchedule::FixedInterval(Duration::from_millis(10)),
            retry_cooldown: Duration::from_millis(10),
        };
        let supervisor = Supervisor::new(fetcher.clone(), store, policy);

        let exit = supervisor
            .start(&["--", "sh", "-c", "sleep 0.1"])
            .await
            .unwrap();
        assert_eq!(exit, SupervisorExit::Exited(0));
        assert_eq!(fetcher.calls(), 1);
    }
}
