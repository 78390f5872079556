//! Command execution
//!
//! Staged commands run one at a time, in staging order. Results flow back
//! only through the record store; the scheduler itself records exit status
//! in the [`CommandJournal`] and the pass report.

use crate::command::StagedCommand;
use crate::error::SchedulerError;
use crate::logging::{CommandJournal, JournalEntry};
use crate::report::CommandRecord;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exit status of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// Exit code; `None` if terminated by a signal
    pub code: Option<i32>,
}

impl CommandStatus {
    pub const SUCCESS: CommandStatus = CommandStatus { code: Some(0) };

    /// Status of a process that exited with `code`
    #[inline]
    #[must_use]
    pub fn exited(code: i32) -> Self {
        Self { code: Some(code) }
    }

    #[inline]
    #[must_use]
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

/// Executes one staged command
///
/// Implement this trait to run commands somewhere other than a local
/// process, or to script their effects in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion
    async fn run(&self, command: &StagedCommand) -> Result<CommandStatus, SchedulerError>;
}

/// Runs commands as child processes, without a shell
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Create a runner without a timeout
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &StagedCommand) -> Result<CommandStatus, SchedulerError> {
        let spawn_error = |source: std::io::Error| SchedulerError::Spawn {
            program: command.program.clone(),
            source,
        };
        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status.map_err(spawn_error)?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(SchedulerError::Timeout {
                        program: command.program.clone(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await.map_err(spawn_error)?,
        };
        Ok(CommandStatus { code: status.code() })
    }
}

/// Result of running one batch
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Commands that ran, in order
    pub executed: Vec<CommandRecord>,
    /// Command lines not run because of cancellation
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

impl BatchOutcome {
    /// Origins of every command that did not succeed
    #[must_use]
    pub fn failed_origins(&self) -> BTreeSet<astro_store::Juid> {
        self.executed
            .iter()
            .filter(|c| !c.success)
            .map(|c| c.origin)
            .collect()
    }
}

/// Runs batches through a [`CommandRunner`]
#[derive(Clone)]
pub struct Scheduler {
    runner: Arc<dyn CommandRunner>,
    journal: Arc<CommandJournal>,
}

impl Scheduler {
    /// Create a scheduler journaling into `journal`
    pub fn new(runner: Arc<dyn CommandRunner>, journal: Arc<CommandJournal>) -> Self {
        Self { runner, journal }
    }

    /// Execute `commands` in order
    ///
    /// Cancellation is checked before each command; once cancelled, the
    /// remaining commands are reported as skipped. A command that fails to
    /// start or times out is recorded as failed and the batch continues.
    pub async fn execute(
        &self,
        target: &str,
        commands: Vec<StagedCommand>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut commands = commands.into_iter();

        while let Some(command) = commands.next() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                outcome.skipped.push(command.command_line());
                outcome.skipped.extend(commands.by_ref().map(|c| c.command_line()));
                tracing::warn!(
                    target_name = target,
                    skipped = outcome.skipped.len(),
                    "cancelled; skipping remaining commands"
                );
                break;
            }

            let line = command.command_line();
            tracing::info!(target_name = target, origin = %command.origin, command = %line, "running");
            let record = match self.runner.run(&command).await {
                Ok(status) => {
                    if !status.success() {
                        tracing::warn!(command = %line, code = ?status.code, "command failed");
                    }
                    CommandRecord {
                        origin: command.origin,
                        command_line: line,
                        exit_code: status.code,
                        success: status.success(),
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(command = %line, "{e}");
                    CommandRecord {
                        origin: command.origin,
                        command_line: line,
                        exit_code: None,
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };

            self.journal.append(JournalEntry::new(target, &record));
            outcome.executed.push(record);
        }

        outcome
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("journal_entries", &self.journal.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use astro_store::Juid;

    fn command(origin: i64, program: &str) -> StagedCommand {
        StagedCommand {
            origin: Juid(origin),
            kind: CommandKind::Photometry,
            program: program.to_string(),
            args: vec!["-i".into(), format!("/img/{origin}.fits")],
        }
    }

    #[tokio::test]
    async fn failures_are_recorded_and_batch_continues() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(3)
            .returning(|c| match c.origin.0 {
                2_000_002 => Ok(CommandStatus::exited(3)),
                2_000_003 => Err(SchedulerError::Timeout {
                    program: c.program.clone(),
                    secs: 5,
                }),
                _ => Ok(CommandStatus::SUCCESS),
            });
        let journal = Arc::new(CommandJournal::default());
        let scheduler = Scheduler::new(Arc::new(runner), journal.clone());

        let batch = vec![
            command(2_000_001, "photometry"),
            command(2_000_002, "photometry"),
            command(2_000_003, "photometry"),
        ];
        let outcome = scheduler.execute("rr-lyr", batch, &CancellationToken::new()).await;

        assert_eq!(outcome.executed.len(), 3);
        assert_eq!(
            outcome.failed_origins(),
            BTreeSet::from([Juid(2_000_002), Juid(2_000_003)])
        );
        assert_eq!(outcome.executed[1].exit_code, Some(3));
        assert!(outcome.executed[2].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(journal.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_batch_skips_everything() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();
        let scheduler = Scheduler::new(Arc::new(runner), Arc::new(CommandJournal::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = scheduler
            .execute("rr-lyr", vec![command(2_000_001, "photometry"), command(2_000_002, "photometry")], &cancel)
            .await;
        assert!(outcome.cancelled);
        assert!(outcome.executed.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
    }

    #[tokio::test]
    async fn process_runner_reports_spawn_failure() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(&command(2_000_001, "/nonexistent/astro/photometry"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_times_out() {
        let runner = ProcessRunner::new().with_timeout(Some(Duration::from_millis(100)));
        let sleep = StagedCommand {
            origin: Juid(2_000_001),
            kind: CommandKind::Stack,
            program: "sleep".into(),
            args: vec!["5".into()],
        };
        let err = runner.run(&sleep).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout { .. }));

        let ok = StagedCommand {
            program: "true".into(),
            args: Vec::new(),
            ..sleep
        };
        assert!(runner.run(&ok).await.unwrap().success());
    }

    #[tokio::test]
    async fn failed_origins_are_distinct() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(3)
            .returning(|c| match c.origin.0 {
                2_000_001 => Ok(CommandStatus::exited(1)),
                _ => Ok(CommandStatus::SUCCESS),
            });
        let scheduler = Scheduler::new(Arc::new(runner), Arc::new(CommandJournal::default()));

        // Same origin failing twice, not adjacent
        let batch = vec![
            command(2_000_001, "find_stars"),
            command(2_000_002, "photometry"),
            command(2_000_001, "photometry"),
        ];
        let outcome = scheduler.execute("rr-lyr", batch, &CancellationToken::new()).await;

        assert_eq!(outcome.failed_origins(), BTreeSet::from([Juid(2_000_001)]));
    }
}
