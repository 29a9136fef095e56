use std::ffi::{OsStr, OsString};

/// Token separating the shim's own arguments from the supervised command.
pub const DELIMITER: &str = "--";

/// A downstream program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

/// Split an argument list at the first `--`.
///
/// Returns the arguments before the delimiter and, if anything follows it,
/// the command to run. Later `--` tokens belong to the command.
pub fn split_args<S: AsRef<OsStr>>(args: &[S]) -> (&[S], Option<ChildCommand>) {
    let Some(pos) = args.iter().position(|a| a.as_ref() == DELIMITER) else {
        return (args, None);
    };

    let (own, rest) = (&args[..pos], &args[pos + 1..]);
    let command = rest.split_first().map(|(program, args)| ChildCommand {
        program: program.as_ref().to_owned(),
        args: args.iter().map(|a| a.as_ref().to_owned()).collect(),
    });
    (own, command)
}

impl std::fmt::Display for ChildCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}
