//! Process helpers for launching a supervised child and interpreting how it ended.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Build a command that shares stdin, stdout and stderr with the current process.
///
/// Nothing is captured or buffered; the child reads and writes the parent's
/// terminal (or pipes) directly.
pub fn inherited_command<I, S>(program: impl AsRef<OsStr>, args: I) -> tokio::process::Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio_command(program);
    cmd.args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    cmd
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with a reportable code.
    Exited(i32),
    /// Killed by a signal (unix only).
    Signaled(i32),
    /// No exit code and no signal could be determined.
    Unknown,
}

impl Termination {
    /// Exit code, if the child terminated normally.
    #[inline]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            Self::Unknown => f.write_str("terminated without an exit code"),
        }
    }
}

/// Classify an [`ExitStatus`] into a [`Termination`].
pub fn classify(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Termination::Signaled(signal);
        }
    }

    Termination::Unknown
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn classify_reports_exit_code() {
        let status = inherited_command("sh", ["-c", "exit 3"])
            .status()
            .await
            .unwrap();
        assert_eq!(classify(status), Termination::Exited(3));
        assert_eq!(classify(status).code(), Some(3));
    }

    #[tokio::test]
    async fn classify_reports_signal() {
        let status = inherited_command("sh", ["-c", "kill -9 $$"])
            .status()
            .await
            .unwrap();
        assert_eq!(classify(status), Termination::Signaled(9));
        assert_eq!(classify(status).code(), None);
    }

    #[test]
    fn termination_display() {
        assert_eq!(Termination::Exited(0).to_string(), "exited with code 0");
        assert_eq!(
            Termination::Signaled(15).to_string(),
            "terminated by signal 15"
        );
    }
}
