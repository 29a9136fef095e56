//! Credential refresh engine.
//!
//! Fetches short-lived AWS credentials from a container credentials endpoint,
//! hands them to a supervised child process through its environment, and
//! keeps them fresh in the background while the child runs.
//!
//! - [`CredentialFetcher`]: one fetch-and-apply cycle ([`HttpCredentialFetcher`] over HTTP)
//! - [`CredentialStore`]: the shared [`CredentialSet`] exported to the child
//! - [`RefreshScheduler`]: cancellable background refresh loop
//! - [`Supervisor`]: initial fetch, child execution and shutdown

pub mod command;
pub mod config;
pub mod credentials;
mod error;
pub mod fetcher;
pub mod scheduler;
pub mod supervisor;

pub use command::{ChildCommand, split_args};
pub use config::{
    EndpointConfig, EndpointSource, FetcherConfig, RefreshMode, RefreshPolicy, RefreshSchedule,
};
pub use credentials::{CredentialSet, CredentialStore};
pub use error::CredentialError;
pub use fetcher::{CredentialFetcher, HttpCredentialFetcher};
pub use scheduler::{RefreshOutcome, RefreshScheduler};
pub use supervisor::{Supervisor, SupervisorError, SupervisorExit};

pub use process_utils::Termination;
