//! Resolve and plan reports
//!
//! Reports serialize to JSON for `--json` and render as text otherwise.

use astro_store::Juid;
use serde::Serialize;
use std::fmt;

/// A node the walk could not satisfy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub node: Juid,
    pub kind: String,
    pub error: String,
    /// Set when the node was skipped because a predecessor failed
    pub blocked_by: Option<Juid>,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.node, self.error)
    }
}

/// Result of executing one staged command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRecord {
    pub origin: Juid,
    pub command_line: String,
    /// Exit code; `None` when killed by a signal or never started
    pub exit_code: Option<i32>,
    pub success: bool,
    pub error: Option<String>,
}

/// One reload, walk, execute, reconcile pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    /// Whether the store changed since the previous snapshot
    pub graph_rebuilt: bool,
    pub staged: Vec<String>,
    pub executed: Vec<CommandRecord>,
    /// Commands not run because the resolve was cancelled
    pub skipped: Vec<String>,
    pub failures: Vec<NodeFailure>,
    pub warnings: Vec<String>,
}

impl PassReport {
    #[must_use]
    pub fn failed_commands(&self) -> impl Iterator<Item = &CommandRecord> {
        self.executed.iter().filter(|c| !c.success)
    }
}

/// How the pass loop for one target ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    /// The last pass staged nothing
    Settled,
    /// Passes ran out while work was still being staged
    PassLimit,
    /// A pass staged exactly the batch of the previous pass
    Repeated,
    Cancelled,
}

/// Everything one target's resolve did
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,
    /// Id of the `Set/Target` node the target resolved to
    pub target_node: Juid,
    pub outcome: TargetOutcome,
    pub passes: Vec<PassReport>,
}

impl TargetReport {
    /// Nodes left unsatisfied by the final pass
    #[must_use]
    pub fn failures(&self) -> &[NodeFailure] {
        self.passes.last().map(|p| p.failures.as_slice()).unwrap_or_default()
    }

    /// Commands run over all passes
    #[must_use]
    pub fn commands_executed(&self) -> usize {
        self.passes.iter().map(|p| p.executed.len()).sum()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome != TargetOutcome::Cancelled
            && self.failures().is_empty()
            && self.passes.iter().all(|p| p.failed_commands().next().is_none())
    }
}

/// Report of one `resolve` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveReport {
    pub targets: Vec<TargetReport>,
    /// Requested names with no `Set/Target` node
    pub unknown_targets: Vec<String>,
    pub cancelled: bool,
    /// Problems found while building the graph
    pub diagnostics: Vec<String>,
}

impl ResolveReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.unknown_targets.is_empty()
            && self.targets.iter().all(TargetReport::is_success)
    }
}

impl fmt::Display for ResolveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.unknown_targets {
            writeln!(f, "target {name}: not defined")?;
        }
        for target in &self.targets {
            writeln!(
                f,
                "target {} ({}): {:?} after {} pass(es), {} command(s) run",
                target.target,
                target.target_node,
                target.outcome,
                target.passes.len(),
                target.commands_executed()
            )?;
            for pass in &target.passes {
                for command in pass.failed_commands() {
                    writeln!(f, "  failed: {}", command.command_line)?;
                }
                for skipped in &pass.skipped {
                    writeln!(f, "  skipped: {skipped}")?;
                }
            }
            for failure in target.failures() {
                writeln!(f, "  unsatisfied: {failure}")?;
            }
        }
        for message in &self.diagnostics {
            writeln!(f, "warning: {message}")?;
        }
        if self.cancelled {
            writeln!(f, "cancelled")?;
        }
        Ok(())
    }
}

/// Commands one target would stage, without running them
#[derive(Debug, Clone, Serialize)]
pub struct TargetPlan {
    pub target: String,
    pub target_node: Juid,
    pub staged: Vec<String>,
    pub failures: Vec<NodeFailure>,
    pub warnings: Vec<String>,
}

/// Report of one `plan` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanReport {
    pub targets: Vec<TargetPlan>,
    pub unknown_targets: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl fmt::Display for PlanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.unknown_targets {
            writeln!(f, "target {name}: not defined")?;
        }
        for plan in &self.targets {
            writeln!(f, "target {} ({}):", plan.target, plan.target_node)?;
            if plan.staged.is_empty() {
                writeln!(f, "  up to date")?;
            }
            for line in &plan.staged {
                writeln!(f, "  {line}")?;
            }
            for failure in &plan.failures {
                writeln!(f, "  unsatisfied: {failure}")?;
            }
        }
        for message in &self.diagnostics {
            writeln!(f, "warning: {message}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(executed: Vec<CommandRecord>) -> PassReport {
        PassReport {
            staged: executed.iter().map(|c| c.command_line.clone()).collect(),
            executed,
            ..PassReport::default()
        }
    }

    #[test]
    fn failed_command_fails_the_report() {
        let ok = CommandRecord {
            origin: Juid(2_000_001),
            command_line: "find_stars -f -i /img/a.fits".into(),
            exit_code: Some(0),
            success: true,
            error: None,
        };
        let bad = CommandRecord {
            exit_code: Some(2),
            success: false,
            ..ok.clone()
        };

        let mut report = ResolveReport {
            targets: vec![TargetReport {
                target: "rr-lyr".into(),
                target_node: Juid(5_000_001),
                outcome: TargetOutcome::PassLimit,
                passes: vec![pass(vec![ok.clone()])],
            }],
            ..ResolveReport::default()
        };
        assert!(report.is_success());

        report.targets[0].passes.push(pass(vec![bad]));
        assert!(!report.is_success());
        assert!(report.to_string().contains("failed: find_stars"));
    }

    #[test]
    fn json_shape() {
        let report = ResolveReport {
            unknown_targets: vec!["m31".into()],
            ..ResolveReport::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["unknown_targets"][0], "m31");
        assert_eq!(value["cancelled"], false);
        assert_eq!(
            serde_json::to_value(TargetOutcome::PassLimit).unwrap(),
            "pass_limit"
        );
    }
}
