mod cli;

use std::ffi::OsString;
use std::process;
use std::sync::Arc;

use clap::Parser;
use credshim_engine::{
    ChildCommand, CredentialStore, EndpointSource, HttpCredentialFetcher, Supervisor, split_args,
};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Args;

/// Default log filter directive.
const DEFAULT_LOG_FILTER: &str = "credshim=info,credshim_engine=info";

#[tokio::main]
async fn main() {
    let mut raw = std::env::args_os();
    let bin = raw.next().unwrap_or_else(|| OsString::from("credshim"));
    let rest: Vec<OsString> = raw.collect();

    // Only the arguments before `--` belong to us; the rest is the child command line.
    let (own, command) = split_args(&rest);
    let args = Args::parse_from(std::iter::once(&bin).chain(own));

    init_logging(args.verbose, args.quiet);

    match run(args, command).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{}", error_message(&e));
            process::exit(1);
        }
    }
}

async fn run(args: Args, command: Option<ChildCommand>) -> anyhow::Result<i32> {
    debug!(?args, "Starting credshim");

    let store = CredentialStore::new();
    let fetcher = HttpCredentialFetcher::new(
        &args.fetcher_config(),
        EndpointSource::Environment,
        store.clone(),
    )?;
    let supervisor = Supervisor::new(Arc::new(fetcher), store, args.refresh_policy());

    let exit = supervisor.run(command).await?;
    Ok(exit.code())
}

/// Each error's Display already includes its source, so only the top level is printed.
fn error_message(e: &anyhow::Error) -> String {
    format!("credshim: {e}")
}

/// Logs go to stderr so the child's stdout stays untouched.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("credshim=debug,credshim_engine=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use credshim_engine::{CredentialError, SupervisorError};

    #[test]
    fn error_message_mentions_cause_once() {
        let err = anyhow::Error::from(SupervisorError::InitialFetch(
            CredentialError::MissingEndpoint {
                var: "AWS_CONTAINER_CREDENTIALS_FULL_URI",
            },
        ));
        let message = error_message(&err);
        assert!(message.starts_with("credshim: failed to fetch initial credentials"));
        assert_eq!(message.matches("is unset or empty").count(), 1);
    }
}
