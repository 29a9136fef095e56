use std::ffi::OsString;
use std::time::Duration;

use clap::Parser;
use credshim_engine::{FetcherConfig, RefreshMode, RefreshPolicy, RefreshSchedule};

/// Run a command with AWS container credentials kept fresh in its environment.
///
/// Credentials are fetched from AWS_CONTAINER_CREDENTIALS_FULL_URI (with
/// AWS_CONTAINER_AUTHORIZATION_TOKEN as the Authorization header, if set).
/// Everything after the first `--` is the command to run.
#[derive(Parser, Debug)]
#[command(name = "credshim", author, version, about, long_about = None)]
#[command(override_usage = "credshim [OPTIONS] -- <COMMAND> [ARGS]...")]
pub struct Args {
    /// How to schedule background refreshes
    #[arg(
        long,
        value_enum,
        env = "CREDSHIM_REFRESH_MODE",
        default_value_t = RefreshMode::Fixed
    )]
    pub refresh_mode: RefreshMode,

    /// Seconds between refreshes in `fixed` mode
    #[arg(
        long,
        env = "CREDSHIM_REFRESH_INTERVAL",
        value_name = "SECONDS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub refresh_interval: u64,

    /// Seconds before expiration to refresh in `expiration` mode
    #[arg(
        long,
        env = "CREDSHIM_REFRESH_BUFFER",
        value_name = "SECONDS",
        default_value_t = 30
    )]
    pub refresh_buffer: u64,

    /// Seconds to wait after a failed refresh before trying again
    #[arg(
        long,
        env = "CREDSHIM_RETRY_COOLDOWN",
        value_name = "SECONDS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub retry_cooldown: u64,

    /// Timeout for a single credentials request, in seconds
    #[arg(
        long,
        env = "CREDSHIM_TIMEOUT",
        value_name = "SECONDS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Words before `--` that are not options; accepted and ignored.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub ignored: Vec<OsString>,
}

impl Args {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            schedule: RefreshSchedule::from_mode(
                self.refresh_mode,
                Duration::from_secs(self.refresh_interval),
                Duration::from_secs(self.refresh_buffer),
            ),
            retry_cooldown: Duration::from_secs(self.retry_cooldown),
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_secs(self.timeout),
            ..FetcherConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_match_fixed_thirty_second_refresh() {
        let args = Args::try_parse_from(["credshim"]).unwrap();
        assert_eq!(args.refresh_policy(), RefreshPolicy::default());
        assert_eq!(args.fetcher_config().timeout, Duration::from_secs(30));
        assert!(!args.verbose);
        assert!(!args.quiet);
    }

    #[test]
    fn expiration_mode_uses_buffer() {
        let args = Args::try_parse_from([
            "credshim",
            "--refresh-mode",
            "expiration",
            "--refresh-buffer",
            "120",
            "--retry-cooldown",
            "5",
        ])
        .unwrap();
        let policy = args.refresh_policy();
        assert!(matches!(
            policy.schedule,
            RefreshSchedule::BeforeExpiration { buffer, .. } if buffer == Duration::from_secs(120)
        ));
        assert_eq!(policy.retry_cooldown, Duration::from_secs(5));
    }

    #[test]
    fn stray_words_before_delimiter_are_ignored() {
        let args = Args::try_parse_from(["credshim", "aws", "s3", "ls"]).unwrap();
        assert_eq!(args.ignored, ["aws", "s3", "ls"]);
        assert_eq!(args.refresh_policy(), RefreshPolicy::default());
    }

    #[test]
    fn options_still_apply_before_stray_words() {
        let args = Args::try_parse_from(["credshim", "-v", "--timeout", "5", "foo"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.fetcher_config().timeout, Duration::from_secs(5));
        assert_eq!(args.ignored, ["foo"]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Args::try_parse_from(["credshim", "--refresh-interval", "0"]).is_err());
    }

    #[test]
    fn verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["credshim", "-v", "-q"]).is_err());
    }
}
