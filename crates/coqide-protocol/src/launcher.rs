//! Launches real `coqtop` processes.

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use coqide_core::{LaunchError, Launcher, SessionConfig, SpawnedProver};
use coqide_process::{DEFAULT_GRACE, ProcessError, Supervisor};

use crate::command::CommandBuilder;

/// Starts the prover under a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct CoqtopLauncher {
    builder: CommandBuilder,
    grace: Duration,
}

impl CoqtopLauncher {
    #[must_use]
    pub const fn new(builder: CommandBuilder) -> Self {
        Self {
            builder,
            grace: DEFAULT_GRACE,
        }
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            builder: CommandBuilder::new(config.program.clone()).params(config.extra_args.clone()),
            grace: config.shutdown_grace(),
        }
    }
}

#[async_trait]
impl Launcher for CoqtopLauncher {
    async fn launch(&self, extra_args: &[String]) -> Result<SpawnedProver, LaunchError> {
        let parts = self
            .builder
            .build(extra_args)
            .map_err(|e| LaunchError::CommandBuild(e.to_string()))?;

        let mut supervisor = Supervisor::new().with_shutdown_grace(self.grace);
        supervisor
            .spawn(&parts.program, &parts.args)
            .await
            .map_err(|e| match e {
                ProcessError::Spawn { program, source } if source.kind() == io::ErrorKind::NotFound => {
                    LaunchError::ExecutableNotFound(program)
                }
                other => LaunchError::SpawnFailed(other.to_string()),
            })?;

        let (stdin, stdout) = supervisor
            .take_stdio()
            .map_err(|e| LaunchError::SpawnFailed(e.to_string()))?;
        let interrupter = supervisor
            .interrupter()
            .map_err(|e| LaunchError::SpawnFailed(e.to_string()))?;

        Ok(SpawnedProver {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            interrupter: Arc::new(interrupter),
            handle: Box::new(supervisor),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_is_reported_by_name() {
        let launcher = CoqtopLauncher::from_config(&SessionConfig {
            program: "/nonexistent/bin/coqtop".into(),
            ..SessionConfig::default()
        });
        match launcher.launch(&[]).await {
            Err(LaunchError::ExecutableNotFound(program)) => {
                assert_eq!(program, "/nonexistent/bin/coqtop");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("launch should fail"),
        }
    }

    #[tokio::test]
    async fn empty_program_is_a_build_error() {
        let launcher = CoqtopLauncher::new(CommandBuilder::new(""));
        assert!(matches!(
            launcher.launch(&[]).await,
            Err(LaunchError::CommandBuild(_))
        ));
    }
}
