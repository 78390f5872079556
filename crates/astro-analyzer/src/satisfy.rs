//! Satisfaction engine
//!
//! A depth-first walk from a root node. Each node first satisfies its
//! predecessors, then evaluates its own staleness rule (which may stage
//! commands and raise `dirty`), then satisfies its sidecars, forcing them
//! when the node itself was dirtied.
//!
//! Nothing executes during a walk; staged commands accumulate in a
//! [`CommandQueue`] returned by [`Satisfier::finish`].
//!
//! A node whose evaluation fails with a [`StructuralError`] is marked
//! blocked, and so is every node that needs it as a predecessor. All other
//! nodes keep making progress. Commands staged and store writes requested
//! by a failed evaluation are discarded.

use crate::command::{CommandBuilder, CommandQueue, StagedCommand};
use crate::config::AnalyzerConfig;
use crate::error::StructuralError;
use crate::graph::{Graph, NodeIdx, NodeKind, SetType, Timestamp};
use crate::probe::ArtifactProbe;
use crate::report::NodeFailure;
use astro_store::{fields, id_list, Juid, RecordStore};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// What one walk produced
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    /// Staged commands in staging order
    pub commands: Vec<StagedCommand>,
    /// Nodes that failed or were blocked by a failed predecessor
    pub failures: Vec<NodeFailure>,
    /// Degraded but non-fatal problems
    pub warnings: Vec<String>,
}

/// One walk over a graph snapshot
///
/// The store must be active for the lifetime of the satisfier: directive
/// lookups and the `included` write-back go through it.
pub struct Satisfier<'a, S: RecordStore + ?Sized> {
    graph: &'a mut Graph,
    store: &'a mut S,
    probe: &'a dyn ArtifactProbe,
    config: &'a AnalyzerConfig,
    retry: Option<&'a BTreeSet<Juid>>,
    dry_run: bool,
    queue: CommandQueue,
    /// `included` write-backs of the node under evaluation
    pending: Vec<(NodeIdx, Value)>,
    path: Vec<NodeIdx>,
    failures: Vec<NodeFailure>,
    warnings: Vec<String>,
}

impl<'a, S: RecordStore + ?Sized> Satisfier<'a, S> {
    /// Create a satisfier over an active store
    pub fn new(
        graph: &'a mut Graph,
        store: &'a mut S,
        probe: &'a dyn ArtifactProbe,
        config: &'a AnalyzerConfig,
    ) -> Self {
        Self {
            graph,
            store,
            probe,
            config,
            retry: None,
            dry_run: false,
            queue: CommandQueue::new(),
            pending: Vec::new(),
            path: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Treat these nodes as stale regardless of their rules
    #[must_use]
    pub fn with_retry(mut self, retry: &'a BTreeSet<Juid>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Stage commands without writing anything back to the store
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Satisfy `idx` and everything it depends on
    ///
    /// Returns `false` if the node is blocked.
    pub fn satisfy(&mut self, idx: NodeIdx, force: bool) -> bool {
        let node = self.graph.node(idx);
        if node.satisfied {
            return !node.blocked;
        }
        let id = node.id;
        tracing::debug!(%id, kind = %node.kind, force, "satisfy");
        let preds: Vec<NodeIdx> = node.predecessors().iter().copied().collect();

        self.graph.node_mut(idx).in_progress = true;
        self.path.push(idx);

        let mut any_dirty = false;
        let mut failed = false;
        for pred in preds {
            if self.graph.node(pred).in_progress {
                let err = StructuralError::Cycle {
                    chain: self.cycle_chain(pred),
                };
                tracing::warn!(%id, "{err}");
                self.fail(idx, err.to_string(), None);
                failed = true;
                continue;
            }
            if !self.satisfy(pred, force) && !failed {
                let blocker = self.graph.node(pred).id;
                self.fail(idx, format!("predecessor {blocker} could not be satisfied"), Some(blocker));
                failed = true;
            }
            any_dirty |= self.graph.node(pred).is_dirty();
        }

        if !failed {
            let forced = force || self.retry.is_some_and(|r| r.contains(&id));
            let staged = self.queue.len();
            match self.evaluate(idx, forced, any_dirty) {
                Ok(()) => self.commit_pending(),
                Err(err) => {
                    tracing::warn!(%id, "{err}");
                    self.queue.truncate(staged);
                    self.pending.clear();
                    self.fail(idx, err.to_string(), None);
                    failed = true;
                }
            }
        }

        self.path.pop();
        let node = self.graph.node_mut(idx);
        node.in_progress = false;
        node.satisfied = true;
        node.blocked = failed;
        if failed {
            return false;
        }

        let dirty = node.is_dirty();
        let sidecars: Vec<NodeIdx> = node.sidecars().iter().copied().collect();
        for sidecar in sidecars {
            if self.graph.node(sidecar).in_progress {
                continue;
            }
            self.satisfy(sidecar, force || dirty);
        }
        true
    }

    /// Consume the satisfier, yielding staged commands in staging order
    pub fn finish(mut self) -> WalkOutcome {
        WalkOutcome {
            commands: self.queue.drain(),
            failures: self.failures,
            warnings: self.warnings,
        }
    }

    fn evaluate(&mut self, idx: NodeIdx, force: bool, any_dirty: bool) -> Result<(), StructuralError> {
        match self.graph.node(idx).kind.clone() {
            NodeKind::Image => self.evaluate_image(idx, force),
            NodeKind::Stack => self.evaluate_stack(idx, force, any_dirty),
            NodeKind::InstMag => self.evaluate_inst_mag(idx, force, any_dirty),
            NodeKind::Analysis | NodeKind::Submission => {
                if any_dirty {
                    self.graph.node_mut(idx).mark_dirty();
                }
                Ok(())
            }
            NodeKind::Set(set_type) => self.evaluate_set(idx, &set_type, any_dirty),
        }
    }

    fn evaluate_image(&mut self, idx: NodeIdx, force: bool) -> Result<(), StructuralError> {
        if self.need_stars(idx, force)? {
            self.graph.node_mut(idx).mark_dirty();
        }

        let node = self.graph.node(idx);
        if node.is_dirty() || node.sidecars().is_empty() || force {
            let id = node.id;
            if self.stage_photometry(idx, id)? {
                self.graph.node_mut(idx).mark_dirty();
            }
        }
        Ok(())
    }

    fn evaluate_stack(&mut self, idx: NodeIdx, force: bool, any_dirty: bool) -> Result<(), StructuralError> {
        let node = self.graph.node(idx);
        let id = node.id;
        let output = node
            .filename()
            .ok_or(StructuralError::MissingField {
                node: id,
                field: fields::FILENAME,
            })?
            .to_string();
        let newest_input = node
            .predecessors()
            .iter()
            .map(|&p| self.graph.node(p).timestamp)
            .max()
            .unwrap_or(Timestamp::EPOCH);
        let inputs_newer = newest_input > node.timestamp;
        let exists = self.probe.exists(Path::new(&output));

        let mut restacked = false;
        if !exists || force || any_dirty || inputs_newer {
            restacked = self.stage_stack(idx, &output)?;
            if restacked {
                self.graph.node_mut(idx).mark_dirty();
            }
        }
        if !(exists || restacked) {
            return Ok(());
        }

        // A fresh stack output has no catalogue yet
        let stars = self.need_stars(idx, force || restacked)?;
        if stars {
            self.graph.node_mut(idx).mark_dirty();
        }

        let no_sidecars = self.graph.node(idx).sidecars().is_empty();
        if (stars || no_sidecars || force || any_dirty) && self.stage_photometry(idx, id)? {
            self.graph.node_mut(idx).mark_dirty();
        }
        Ok(())
    }

    fn evaluate_inst_mag(&mut self, idx: NodeIdx, force: bool, any_dirty: bool) -> Result<(), StructuralError> {
        let node = self.graph.node(idx);
        let id = node.id;
        let own = node.timestamp;
        let exposure = node.record.get_id(fields::EXPOSURE).ok_or(StructuralError::MissingField {
            node: id,
            field: fields::EXPOSURE,
        })?;

        let Some(source_idx) = self.graph.lookup(exposure) else {
            self.warn(format!("inst_mag {id}: exposure {exposure} is unknown"));
            return Ok(());
        };
        let source = self.graph.node(source_idx);
        let file_time = source
            .filename()
            .and_then(|f| self.probe.modified(Path::new(f)))
            .unwrap_or(Timestamp::EPOCH);
        let stale = force || any_dirty || file_time > own || source.timestamp > own;

        if stale && self.stage_photometry(idx, exposure)? {
            self.graph.node_mut(idx).mark_dirty();
        }
        Ok(())
    }

    fn evaluate_set(&mut self, idx: NodeIdx, set_type: &SetType, any_dirty: bool) -> Result<(), StructuralError> {
        let node = self.graph.node(idx);
        let id = node.id;

        match set_type {
            SetType::Bvri => {
                if !(any_dirty || node.sidecars().is_empty()) {
                    return Ok(());
                }
                let target = node
                    .ultimate_target
                    .as_deref()
                    .or_else(|| node.record.get_str(fields::TARGET))
                    .ok_or(StructuralError::MissingTarget { node: id })?;
                let base = self.config.base_directory().display().to_string();
                let command = CommandBuilder::new(&self.config.programs).bvri(id, &base, target);
                self.queue.push(command);
                self.graph.node_mut(idx).mark_dirty();
            }
            SetType::Merge => {
                let sidecars = node.sidecars();
                if sidecars.len() > 1 {
                    return Err(StructuralError::AmbiguousSidecars {
                        node: id,
                        count: sidecars.len(),
                    });
                }
                let output = sidecars.first().map(|&s| self.graph.node(s).id);
                let inputs: Vec<Juid> = node
                    .predecessors()
                    .iter()
                    .map(|&p| self.graph.node(p).id)
                    .collect();
                let command = CommandBuilder::new(&self.config.programs).merge(id, output, &inputs);
                self.queue.push(command);
            }
            SetType::SubExp | SetType::Target | SetType::TimeSeq => {}
            SetType::Unrecognized(stype) => {
                return Err(StructuralError::UnknownSetType {
                    node: id,
                    stype: stype.clone(),
                });
            }
        }
        Ok(())
    }

    /// Stage detection and catalogue matching unless a matched catalogue exists
    fn need_stars(&mut self, idx: NodeIdx, force: bool) -> Result<bool, StructuralError> {
        let node = self.graph.node(idx);
        let id = node.id;
        let file = node.filename().ok_or(StructuralError::MissingField {
            node: id,
            field: fields::FILENAME,
        })?;
        if !force && self.probe.has_matched_catalogue(Path::new(file)) {
            return Ok(false);
        }

        let target = node
            .record
            .get_str(fields::TARGET)
            .or(node.ultimate_target.as_deref())
            .ok_or(StructuralError::MissingTarget { node: id })?;
        let dark = node.record.get_str(fields::DARK);
        let builder = CommandBuilder::new(&self.config.programs);
        let find = builder.find_stars(id, file, dark);
        let matched = builder.star_match(id, file, target);
        self.queue.push(find);
        self.queue.push(matched);
        Ok(true)
    }

    /// Stage photometry of `source` on behalf of the node at `origin`
    ///
    /// Returns `false` when nothing was staged: the source is excluded by
    /// the origin's directive or is unknown.
    fn stage_photometry(&mut self, origin: NodeIdx, source: Juid) -> Result<bool, StructuralError> {
        let node = self.graph.node(origin);
        let origin_id = node.id;
        let directive = node.record.get_id(fields::DIRECTIVE);

        if self
            .directive_list(origin_id, directive, fields::IMG_ANALY_EXCL)
            .contains(&source)
        {
            tracing::debug!(origin = %origin_id, %source, "photometry excluded by directive");
            return Ok(false);
        }

        let Some(source_idx) = self.graph.lookup(source) else {
            self.warn(format!("node {origin_id}: photometry source {source} is unknown"));
            return Ok(false);
        };
        let record = &self.graph.node(source_idx).record;
        let file = record.get_str(fields::FILENAME).ok_or(StructuralError::MissingField {
            node: source,
            field: fields::FILENAME,
        })?;
        let command = CommandBuilder::new(&self.config.programs).photometry(
            origin_id,
            file,
            record.get_str(fields::FLAT),
            record.get_str(fields::DARK),
        );
        self.queue.push(command);
        Ok(true)
    }

    /// Stage a stack over the node's inputs minus the directive's exclusions
    fn stage_stack(&mut self, idx: NodeIdx, output: &str) -> Result<bool, StructuralError> {
        let node = self.graph.node(idx);
        let id = node.id;
        let directive = node.record.get_id(fields::DIRECTIVE);
        let candidates: Vec<NodeIdx> = node.predecessors().iter().copied().collect();
        if candidates.is_empty() {
            self.warn(format!("stack {id} has no input images"));
            return Ok(false);
        }

        let excluded = self.directive_list(id, directive, fields::STACK_EXCL);
        let candidate_ids: Vec<Juid> = candidates.iter().map(|&c| self.graph.node(c).id).collect();
        for x in &excluded {
            if !candidate_ids.contains(x) {
                self.warn(format!("stack {id}: excluded id {x} is not one of its inputs"));
            }
        }
        let included: Vec<NodeIdx> = candidates
            .into_iter()
            .filter(|&c| !excluded.contains(&self.graph.node(c).id))
            .collect();
        let Some(&first) = included.first() else {
            self.warn(format!("stack {id}: every input is excluded"));
            return Ok(false);
        };

        let mut files = Vec::with_capacity(included.len());
        for &input in &included {
            let input = self.graph.node(input);
            let file = input.filename().ok_or(StructuralError::MissingField {
                node: input.id,
                field: fields::FILENAME,
            })?;
            files.push(file.to_string());
        }
        let first = &self.graph.node(first).record;
        let command = CommandBuilder::new(&self.config.programs).stack(
            id,
            output,
            first.get_str(fields::DARK),
            first.get_str(fields::FLAT),
            &files,
        );

        let included_ids: Vec<Juid> = included.iter().map(|&i| self.graph.node(i).id).collect();
        if !self.dry_run {
            self.pending.push((idx, id_list(&included_ids)));
        }

        self.queue.push(command);
        Ok(true)
    }

    /// Apply the write-backs of an evaluation that succeeded
    fn commit_pending(&mut self) {
        for (idx, value) in std::mem::take(&mut self.pending) {
            let id = self.graph.node(idx).id;
            if let Err(e) = self.store.set_field(id, fields::INCLUDED, value.clone()) {
                self.warn(format!("stack {id}: cannot record included inputs: {e}"));
            }
            self.graph.node_mut(idx).record.set(fields::INCLUDED, value);
        }
    }

    /// Ids listed under `field` of the directive `directive`
    fn directive_list(&mut self, owner: Juid, directive: Option<Juid>, field: &str) -> Vec<Juid> {
        let Some(directive) = directive else {
            return Vec::new();
        };
        match self.store.find_by_id(directive) {
            Some(record) => record.get_ids(field).unwrap_or_default(),
            None => {
                self.warn(format!("node {owner}: directive {directive} not found"));
                Vec::new()
            }
        }
    }

    /// Ids along the current walk path from `start` back to `start`
    fn cycle_chain(&self, start: NodeIdx) -> Vec<Juid> {
        let from = self.path.iter().position(|&p| p == start).unwrap_or(0);
        self.path[from..]
            .iter()
            .chain(std::iter::once(&start))
            .map(|&p| self.graph.node(p).id)
            .collect()
    }

    fn fail(&mut self, idx: NodeIdx, error: String, blocked_by: Option<Juid>) {
        let node = self.graph.node(idx);
        self.failures.push(NodeFailure {
            node: node.id,
            kind: node.kind.to_string(),
            error,
            blocked_by,
        });
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}
