/// Shutdown hook that runs shell commands.
///
/// Each command is run with `<shell> -c <command>` in order, with the fatal
/// error exposed through the environment:
/// - `FATAL_GUARD_ERROR`: the error message
/// - `FATAL_GUARD_KIND`: `signal`, `panic`, `application` or `shutdown_timeout`
///
/// A failing command is logged and the next one still runs. Nothing is retried.
use crate::config::HooksConfig;
use crate::error::FatalError;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CommandHook {
    shell: String,
    commands: Vec<String>,
}

/// Outcome of one hook command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: String,
    /// Exit code, `None` if it could not be spawned or was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl CommandHook {
    pub fn new(shell: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            commands,
        }
    }

    pub fn from_config(config: &HooksConfig) -> Self {
        Self::new(config.shell.clone(), config.on_shutdown.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub async fn run(&self, error: &FatalError) -> Vec<CommandOutcome> {
        let message = error.to_string();
        let mut outcomes = Vec::with_capacity(self.commands.len());

        for command in &self.commands {
            tracing::info!(command = %command, "running shutdown hook command");
            let status = Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .env("FATAL_GUARD_ERROR", &message)
                .env("FATAL_GUARD_KIND", error.kind())
                .stdin(Stdio::null())
                .status()
                .await;

            let exit_code = match status {
                Ok(status) => {
                    if !status.success() {
                        tracing::warn!(
                            command = %command,
                            status = %status,
                            "shutdown hook command failed"
                        );
                    }
                    status.code()
                }
                Err(e) => {
                    tracing::warn!(
                        command = %command,
                        error = %e,
                        "failed to spawn shutdown hook command"
                    );
                    None
                }
            };
            outcomes.push(CommandOutcome {
                command: command.clone(),
                exit_code,
            });
        }

        outcomes
    }
}
