//! Resolve driver
//!
//! [`Analyzer`] owns the graph snapshot, the retry set and the store handle,
//! and drives the reconciliation passes for each requested target:
//!
//! 1. reactivate the store, rebuilding the graph if it changed
//! 2. reset run state and walk from the target node
//! 3. release the store lock
//! 4. execute the staged batch
//! 5. reactivate to observe side effects, restore timestamps advanced by
//!    failed commands, release again
//!
//! With the wildcard selector each `Set/Target` node gets its own passes,
//! run to completion before the next target starts.

use crate::config::AnalyzerConfig;
use crate::error::AnalyzerError;
use crate::graph::{Graph, NodeIdx};
use crate::logging::CommandJournal;
use crate::probe::ArtifactProbe;
use crate::report::{PassReport, PlanReport, ResolveReport, TargetOutcome, TargetPlan, TargetReport};
use crate::satisfy::{Satisfier, WalkOutcome};
use crate::scheduler::{BatchOutcome, CommandRunner, Scheduler};
use crate::command::StagedCommand;
use astro_store::{fields, Juid, RecordStore};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which targets a resolve covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Every `Set/Target` node, written `*`
    All,
    Named(String),
}

impl FromStr for TargetSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s == "*" {
            Self::All
        } else {
            Self::Named(s.to_string())
        })
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// A target to resolve; the node id pins a specific `Set/Target` node
#[derive(Debug, Clone)]
struct TargetRef {
    name: String,
    node: Option<Juid>,
}

/// Incremental rebuild driver over one record store
pub struct Analyzer<S: RecordStore> {
    store: S,
    probe: Arc<dyn ArtifactProbe>,
    scheduler: Scheduler,
    journal: Arc<CommandJournal>,
    config: AnalyzerConfig,
    graph: Option<Graph>,
    retry: BTreeSet<Juid>,
}

impl<S: RecordStore> Analyzer<S> {
    /// Create an analyzer over `store`; nothing is read until the first resolve
    pub fn new(
        store: S,
        probe: Arc<dyn ArtifactProbe>,
        runner: Arc<dyn CommandRunner>,
        config: AnalyzerConfig,
    ) -> Self {
        let journal = Arc::new(CommandJournal::default());
        Self {
            store,
            probe,
            scheduler: Scheduler::new(runner, journal.clone()),
            journal,
            config,
            graph: None,
            retry: BTreeSet::new(),
        }
    }

    /// The underlying record store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Graph of the most recent snapshot, if one was built
    #[inline]
    #[must_use]
    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    /// Nodes whose last command failed; they are re-staged on the next walk
    #[inline]
    #[must_use]
    pub fn retry_set(&self) -> &BTreeSet<Juid> {
        &self.retry
    }

    /// Every command executed by this analyzer
    #[inline]
    #[must_use]
    pub fn journal(&self) -> &Arc<CommandJournal> {
        &self.journal
    }

    /// Resolve without cancellation
    ///
    /// # Errors
    /// Returns error if the store cannot be reactivated or released.
    pub async fn resolve(
        &mut self,
        selector: &TargetSelector,
        force: bool,
    ) -> Result<ResolveReport, AnalyzerError> {
        self.resolve_with_cancel(selector, force, &CancellationToken::new())
            .await
    }

    /// Bring the selected targets up to date
    ///
    /// `cancel` is checked between commands and between passes; once it
    /// fires no further command, pass or target starts.
    ///
    /// # Errors
    /// Returns error if the store cannot be reactivated or released.
    /// Per-node problems and failed commands are reported, not returned.
    pub async fn resolve_with_cancel(
        &mut self,
        selector: &TargetSelector,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<ResolveReport, AnalyzerError> {
        let targets = self.selected_targets(selector)?;
        let mut report = ResolveReport::default();

        for target in targets {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            tracing::info!(target_name = %target.name, "resolving target");
            match self.resolve_target(&target, force, cancel).await? {
                Some(result) => {
                    let cancelled = result.outcome == TargetOutcome::Cancelled;
                    report.targets.push(result);
                    if cancelled {
                        report.cancelled = true;
                        break;
                    }
                }
                None => {
                    tracing::warn!(target_name = %target.name, "target not defined");
                    report.unknown_targets.push(target.name);
                }
            }
        }

        report.diagnostics = self.diagnostics();
        Ok(report)
    }

    /// Stage commands for the selected targets without running them
    ///
    /// Nothing is written to the store.
    ///
    /// # Errors
    /// Returns error if the store cannot be reactivated or released.
    pub fn plan(&mut self, selector: &TargetSelector, force: bool) -> Result<PlanReport, AnalyzerError> {
        let targets = self.selected_targets(selector)?;
        let mut report = PlanReport::default();

        for target in targets {
            self.acquire()?;
            let Some(root) = self.locate(&target) else {
                self.release()?;
                report.unknown_targets.push(target.name);
                continue;
            };
            let target_node = self.node_id(root);
            let walk = self.walk(root, force, true);
            self.release()?;

            report.targets.push(TargetPlan {
                target: target.name,
                target_node,
                staged: walk.commands.iter().map(StagedCommand::command_line).collect(),
                failures: walk.failures,
                warnings: walk.warnings,
            });
        }

        report.diagnostics = self.diagnostics();
        Ok(report)
    }

    async fn resolve_target(
        &mut self,
        target: &TargetRef,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<TargetReport>, AnalyzerError> {
        let mut passes: Vec<PassReport> = Vec::new();
        let mut previous: Option<Vec<StagedCommand>> = None;
        let mut outcome = TargetOutcome::PassLimit;
        let mut target_node = Juid::UNRESOLVED;

        for pass_number in 1..=self.config.max_passes {
            if cancel.is_cancelled() {
                outcome = TargetOutcome::Cancelled;
                break;
            }

            let rebuilt = self.acquire()?;
            let Some(root) = self.locate(target) else {
                self.release()?;
                if passes.is_empty() {
                    return Ok(None);
                }
                tracing::warn!(target_name = %target.name, "target disappeared between passes");
                break;
            };
            target_node = self.node_id(root);

            // Forcing applies to the first pass only; later passes follow the rules
            let walk = self.walk(root, force && pass_number == 1, false);
            self.release()?;

            let mut pass = PassReport {
                graph_rebuilt: rebuilt,
                staged: walk.commands.iter().map(StagedCommand::command_line).collect(),
                failures: walk.failures,
                warnings: walk.warnings,
                ..PassReport::default()
            };

            if !walk.commands.is_empty() && previous.as_ref() == Some(&walk.commands) {
                tracing::warn!(
                    target_name = %target.name,
                    pass = pass_number,
                    "pass staged the same batch as the previous one; not converging"
                );
                passes.push(pass);
                outcome = TargetOutcome::Repeated;
                break;
            }

            tracing::info!(
                target_name = %target.name,
                pass = pass_number,
                staged = walk.commands.len(),
                "executing batch"
            );
            let before = self.origin_timestamps(&walk.commands);
            let batch = self
                .scheduler
                .execute(&target.name, walk.commands.clone(), cancel)
                .await;
            self.reconcile(&before, &batch)?;

            let settled = walk.commands.is_empty();
            pass.executed = batch.executed;
            pass.skipped = batch.skipped;
            passes.push(pass);

            if batch.cancelled {
                outcome = TargetOutcome::Cancelled;
                break;
            }
            if settled {
                outcome = TargetOutcome::Settled;
                break;
            }
            previous = Some(walk.commands);
        }

        Ok(Some(TargetReport {
            target: target.name.clone(),
            target_node,
            outcome,
            passes,
        }))
    }

    fn selected_targets(&mut self, selector: &TargetSelector) -> Result<Vec<TargetRef>, AnalyzerError> {
        match selector {
            TargetSelector::Named(name) => Ok(vec![TargetRef {
                name: name.clone(),
                node: None,
            }]),
            TargetSelector::All => {
                self.acquire()?;
                let targets = self
                    .graph
                    .as_ref()
                    .map(Graph::target_sets)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(idx, name)| TargetRef {
                        name,
                        node: Some(self.node_id(idx)),
                    })
                    .collect();
                self.release()?;
                Ok(targets)
            }
        }
    }

    /// Reactivate the store; returns whether the graph was rebuilt
    fn acquire(&mut self) -> Result<bool, AnalyzerError> {
        let changed = self.store.reactivate()?;
        if changed || self.graph.is_none() {
            self.graph = Some(Graph::build(&self.store, self.config.propagation_depth_limit));
            return Ok(true);
        }
        Ok(false)
    }

    fn release(&mut self) -> Result<(), AnalyzerError> {
        self.store.sync_and_release()?;
        Ok(())
    }

    fn locate(&self, target: &TargetRef) -> Option<NodeIdx> {
        let graph = self.graph.as_ref()?;
        if let Some(idx) = target.node.and_then(|id| graph.lookup(id)) {
            if graph.node(idx).kind.is_target_set() {
                return Some(idx);
            }
        }
        graph.find_target(&target.name)
    }

    fn node_id(&self, idx: NodeIdx) -> Juid {
        self.graph
            .as_ref()
            .map_or(Juid::UNRESOLVED, |g| g.node(idx).id)
    }

    fn walk(&mut self, root: NodeIdx, force: bool, dry_run: bool) -> WalkOutcome {
        let Some(graph) = self.graph.as_mut() else {
            return WalkOutcome::default();
        };
        graph.reset_run_state();

        let mut satisfier = Satisfier::new(graph, &mut self.store, self.probe.as_ref(), &self.config)
            .with_retry(&self.retry)
            .dry_run(dry_run);
        satisfier.satisfy(root, force);
        let outcome = satisfier.finish();

        tracing::info!(
            staged = outcome.commands.len(),
            unsatisfied = outcome.failures.len(),
            "walk complete"
        );
        outcome
    }

    /// Stored `tstamp` of each command origin before the batch runs
    fn origin_timestamps(&self, commands: &[StagedCommand]) -> HashMap<Juid, Option<Value>> {
        let Some(graph) = self.graph.as_ref() else {
            return HashMap::new();
        };
        commands
            .iter()
            .map(|c| {
                let stamp = graph
                    .get(c.origin)
                    .and_then(|n| n.record.get(fields::TSTAMP).cloned());
                (c.origin, stamp)
            })
            .collect()
    }

    /// Observe side effects of a batch and settle the retry set
    fn reconcile(
        &mut self,
        before: &HashMap<Juid, Option<Value>>,
        batch: &BatchOutcome,
    ) -> Result<(), AnalyzerError> {
        let changed = self.store.reactivate()?;
        let failed = batch.failed_origins();

        for &origin in &failed {
            let previous = before.get(&origin).cloned().flatten();
            let current = self
                .store
                .find_by_id(origin)
                .and_then(|r| r.get(fields::TSTAMP).cloned());
            if let Some(previous) = previous {
                if current.as_ref() != Some(&previous) {
                    tracing::info!(%origin, "restoring timestamp advanced by a failed command");
                    if let Err(e) = self.store.set_field(origin, fields::TSTAMP, previous) {
                        tracing::warn!(%origin, "cannot restore timestamp: {e}");
                    }
                }
            }
            self.retry.insert(origin);
        }
        for record in &batch.executed {
            if record.success && !failed.contains(&record.origin) {
                self.retry.remove(&record.origin);
            }
        }

        if changed {
            tracing::info!("store changed by commands; rebuilding graph");
            self.graph = Some(Graph::build(&self.store, self.config.propagation_depth_limit));
        }
        self.release()
    }

    fn diagnostics(&self) -> Vec<String> {
        self.graph
            .as_ref()
            .map(|g| g.diagnostics().messages())
            .unwrap_or_default()
    }
}

impl<S: RecordStore> fmt::Debug for Analyzer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("config", &self.config)
            .field("nodes", &self.graph.as_ref().map(Graph::len))
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
