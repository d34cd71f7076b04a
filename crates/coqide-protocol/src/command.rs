//! Command building utilities.

use thiserror::Error;

/// Flags that put the prover into machine-interface mode on stdio.
pub const PROTOCOL_ARGS: [&str; 5] = [
    "-ideslave",
    "-main-channel",
    "stdfds",
    "-async-proofs",
    "on",
];

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

/// Builder for prover command lines.
///
/// The base may carry its own arguments, e.g. `opam exec -- coqtop`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command.
    pub base: String,
    /// Parameters appended after the protocol flags.
    pub params: Option<Vec<String>>,
}

impl CommandBuilder {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: None,
        }
    }

    /// Set parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Extend parameters.
    #[must_use]
    pub fn extend_params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let extra: Vec<String> = more.into_iter().map(Into::into).collect();
        match &mut self.params {
            Some(p) => p.extend(extra),
            None => self.params = Some(extra),
        }
        self
    }

    /// Build the full command line: base, protocol flags, configured
    /// parameters, then `extra_args` verbatim.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn build(&self, extra_args: &[String]) -> Result<CommandParts, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        let program = parts.remove(0);

        let mut args = parts;
        args.extend(PROTOCOL_ARGS.iter().map(|s| (*s).to_owned()));
        if let Some(ref params) = self.params {
            args.extend(params.iter().cloned());
        }
        args.extend(extra_args.iter().cloned());

        Ok(CommandParts { program, args })
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        let parts = winsplit::split(input);
        if parts.is_empty() {
            Err(CommandBuildError::EmptyCommand)
        } else {
            Ok(parts)
        }
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_flags_precede_extras() {
        let parts = CommandBuilder::new("coqtop")
            .build(&["-R".into(), "theories".into(), "Foo".into()])
            .unwrap();
        assert_eq!(parts.program, "coqtop");
        assert_eq!(
            parts.args,
            [
                "-ideslave",
                "-main-channel",
                "stdfds",
                "-async-proofs",
                "on",
                "-R",
                "theories",
                "Foo"
            ]
        );
    }

    #[test]
    fn base_arguments_stay_in_front() {
        let parts = CommandBuilder::new("opam exec -- coqtop")
            .params(["-noinit"])
            .extend_params(["-indices-matter"])
            .build(&[])
            .unwrap();
        assert_eq!(parts.program, "opam");
        assert_eq!(&parts.args[..3], ["exec", "--", "coqtop"]);
        assert_eq!(&parts.args[8..], ["-noinit", "-indices-matter"]);
    }

    #[test]
    fn empty_base_is_rejected() {
        assert!(matches!(
            CommandBuilder::new("   ").build(&[]),
            Err(CommandBuildError::EmptyCommand)
        ));
    }

    #[cfg(not(windows))]
    #[test]
    fn unbalanced_quotes_are_rejected() {
        assert!(matches!(
            CommandBuilder::new("coqtop \"-R").build(&[]),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }
}
