//! Caller-level command sequences.
//!
//! Plugins report a result per command and never decide what happens next. A
//! [`CommandSequence`] is where the caller writes that decision down: each command step
//! says whether a failure aborts the rest ([`OnFailure::Abort`]) or is recorded and
//! passed over ([`OnFailure::Continue`]), and `require` steps gate later commands on
//! telemetry state.

use crate::{CommandResult, Result};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Abort,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "result", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed(CommandResult),
    PreconditionFailed,
    Skipped,
}

/// One named step and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSequenceStep {
    pub name: String,
    pub outcome: StepOutcome,
}

impl CommandSequenceStep {
    pub fn succeeded(&self) -> bool {
        self.outcome == StepOutcome::Completed(CommandResult::Success)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceReport {
    pub steps: Vec<CommandSequenceStep>,
    /// Name of the step that stopped the sequence, if any.
    pub aborted_at: Option<String>,
}

impl SequenceReport {
    pub fn aborted(&self) -> bool {
        self.aborted_at.is_some()
    }

    pub fn step(&self, name: &str) -> Option<&CommandSequenceStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Steps that ran and did not succeed, aborting or not.
    pub fn failures(&self) -> impl Iterator<Item = &CommandSequenceStep> {
        self.steps.iter().filter(|s| {
            matches!(s.outcome, StepOutcome::PreconditionFailed)
                || matches!(s.outcome, StepOutcome::Completed(r) if !r.is_success())
        })
    }
}

type CommandFn<'a> = Box<dyn FnMut() -> Result<CommandResult> + 'a>;
type CheckFn<'a> = Box<dyn FnMut() -> Result<bool> + 'a>;

enum StepKind<'a> {
    Command {
        on_failure: OnFailure,
        run: CommandFn<'a>,
    },
    Require(CheckFn<'a>),
    Wait(Duration),
}

struct Step<'a> {
    name: String,
    kind: StepKind<'a>,
}

/// Ordered list of steps executed on the calling thread.
///
/// Plugin errors (a plugin used outside its enabled window) are not step outcomes:
/// they end [`run`](Self::run) immediately with the error.
#[derive(Default)]
pub struct CommandSequence<'a> {
    steps: Vec<Step<'a>>,
}

impl<'a> CommandSequence<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn command<F>(mut self, name: impl Into<String>, on_failure: OnFailure, run: F) -> Self
    where
        F: FnMut() -> Result<CommandResult> + 'a,
    {
        self.steps.push(Step {
            name: name.into(),
            kind: StepKind::Command {
                on_failure,
                run: Box::new(run),
            },
        });
        self
    }

    /// Abort unless `check` holds when this step is reached.
    pub fn require<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: FnMut() -> Result<bool> + 'a,
    {
        self.steps.push(Step {
            name: name.into(),
            kind: StepKind::Require(Box::new(check)),
        });
        self
    }

    /// Pause between steps. Waits are not recorded in the report.
    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(Step {
            name: String::new(),
            kind: StepKind::Wait(duration),
        });
        self
    }

    pub fn run(self) -> Result<SequenceReport> {
        let mut report = SequenceReport::default();
        for step in self.steps {
            if report.aborted() {
                if !matches!(step.kind, StepKind::Wait(_)) {
                    report.steps.push(CommandSequenceStep {
                        name: step.name,
                        outcome: StepOutcome::Skipped,
                    });
                }
                continue;
            }
            match step.kind {
                StepKind::Wait(duration) => thread::sleep(duration),
                StepKind::Require(mut check) => {
                    if !check()? {
                        warn!(step = %step.name, "precondition failed, aborting sequence");
                        report.aborted_at = Some(step.name.clone());
                        report.steps.push(CommandSequenceStep {
                            name: step.name,
                            outcome: StepOutcome::PreconditionFailed,
                        });
                    }
                }
                StepKind::Command { on_failure, mut run } => {
                    let result = run()?;
                    if result.is_success() {
                        info!(step = %step.name, "step succeeded");
                    } else {
                        match on_failure {
                            OnFailure::Abort => {
                                warn!(step = %step.name, %result, "step failed, aborting sequence");
                                report.aborted_at = Some(step.name.clone());
                            }
                            OnFailure::Continue => {
                                warn!(step = %step.name, %result, "step failed, continuing");
                            }
                        }
                    }
                    report.steps.push(CommandSequenceStep {
                        name: step.name,
                        outcome: StepOutcome::Completed(result),
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PluginError, PluginState};
    use std::cell::RefCell;

    #[test]
    fn abort_skips_the_remaining_steps() {
        let issued = RefCell::new(Vec::new());
        let report = CommandSequence::new()
            .command("arm", OnFailure::Abort, || {
                issued.borrow_mut().push("arm");
                Ok(CommandResult::CommandDenied)
            })
            .wait(Duration::from_millis(1))
            .command("takeoff", OnFailure::Abort, || {
                issued.borrow_mut().push("takeoff");
                Ok(CommandResult::Success)
            })
            .run()
            .unwrap();

        assert_eq!(*issued.borrow(), vec!["arm"]);
        assert_eq!(report.aborted_at.as_deref(), Some("arm"));
        assert_eq!(
            report.step("arm").map(|s| s.outcome),
            Some(StepOutcome::Completed(CommandResult::CommandDenied))
        );
        assert_eq!(report.step("takeoff").map(|s| s.outcome), Some(StepOutcome::Skipped));
    }

    #[test]
    fn continue_records_the_failure_and_proceeds() {
        let report = CommandSequence::new()
            .command("to fixed-wing", OnFailure::Continue, || {
                Ok(CommandResult::Timeout)
            })
            .command("to multicopter", OnFailure::Continue, || {
                Ok(CommandResult::Success)
            })
            .command("return to launch", OnFailure::Continue, || {
                Ok(CommandResult::Success)
            })
            .run()
            .unwrap();

        assert!(!report.aborted());
        assert_eq!(report.steps.len(), 3);
        let failed: Vec<_> = report.failures().map(|s| s.name.as_str()).collect();
        assert_eq!(failed, vec!["to fixed-wing"]);
        assert!(report.step("return to launch").is_some_and(|s| s.succeeded()));
    }

    #[test]
    fn failed_precondition_aborts_before_commands() {
        let mut ran = false;
        let report = CommandSequence::new()
            .require("health ok", || Ok(false))
            .command("arm", OnFailure::Abort, || {
                ran = true;
                Ok(CommandResult::Success)
            })
            .run()
            .unwrap();
        assert!(!ran);
        assert_eq!(
            report.step("health ok").map(|s| s.outcome),
            Some(StepOutcome::PreconditionFailed)
        );
        assert_eq!(report.step("arm").map(|s| s.outcome), Some(StepOutcome::Skipped));
    }

    #[test]
    fn plugin_errors_end_the_run() {
        let err = CommandSequence::new()
            .command("land", OnFailure::Continue, || {
                Err(PluginError::NotEnabled {
                    plugin: "action",
                    state: PluginState::Deinitialized,
                })
            })
            .run()
            .err();
        assert!(matches!(err, Some(PluginError::NotEnabled { .. })));
    }

    #[test]
    fn report_serializes_outcomes() {
        let report = SequenceReport {
            steps: vec![CommandSequenceStep {
                name: "arm".into(),
                outcome: StepOutcome::Completed(CommandResult::Busy),
            }],
            aborted_at: Some("arm".into()),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["outcome"]["outcome"], "completed");
        assert_eq!(json["steps"][0]["outcome"]["result"], "busy");
        assert_eq!(json["aborted_at"], "arm");
    }
}
