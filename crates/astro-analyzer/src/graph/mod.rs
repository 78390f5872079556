//! Dependency graph over one snapshot of the record store
//!
//! Nodes live in an arena and refer to each other by [`NodeIdx`]. The graph is
//! rebuilt wholesale whenever the store reports external change, so no index
//! survives a rebuild. Construction lives in [`builder`], target name
//! propagation in [`targets`].

pub mod builder;
pub mod node;
pub mod targets;

pub use node::{Node, NodeIdx, NodeKind, SetType, Timestamp};

use crate::error::{PropagationError, ReferentialError};
use astro_store::{Juid, RecordKind};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Problems found while building one snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphDiagnostics {
    pub referential: Vec<ReferentialError>,
    /// Strongly connected components of the predecessor relation
    pub cycles: Vec<Vec<Juid>>,
    pub propagation: Vec<PropagationError>,
    /// `Set/Target` records without a `target` name
    pub unnamed_targets: Vec<Juid>,
    /// Ids carried by more than one record; the first record wins
    pub duplicate_ids: Vec<Juid>,
    /// Records without a usable id
    pub unresolved: usize,
}

impl GraphDiagnostics {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.referential.is_empty()
            && self.cycles.is_empty()
            && self.propagation.is_empty()
            && self.unnamed_targets.is_empty()
            && self.duplicate_ids.is_empty()
            && self.unresolved == 0
    }

    /// One line per problem, for reports
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        let mut out: Vec<String> = self.referential.iter().map(ToString::to_string).collect();
        out.extend(self.cycles.iter().map(|c| {
            format!("dependency cycle {}", crate::error::format_chain(c))
        }));
        out.extend(self.propagation.iter().map(ToString::to_string));
        out.extend(
            self.unnamed_targets
                .iter()
                .map(|id| format!("target set {id} has no target name")),
        );
        out.extend(
            self.duplicate_ids
                .iter()
                .map(|id| format!("duplicate record id {id}")),
        );
        if self.unresolved > 0 {
            out.push(format!("{} record(s) without juid", self.unresolved));
        }
        out
    }
}

/// All nodes of one store snapshot
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<Juid, NodeIdx>,
    by_kind: BTreeMap<RecordKind, Vec<NodeIdx>>,
    diagnostics: GraphDiagnostics,
}

impl Graph {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at `idx`
    ///
    /// # Panics
    /// Panics if `idx` does not come from this graph.
    #[inline]
    #[must_use]
    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx.0]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, idx: NodeIdx) -> &mut Node {
        &mut self.nodes[idx.0]
    }

    /// Arena index for an id
    #[inline]
    #[must_use]
    pub fn lookup(&self, id: Juid) -> Option<NodeIdx> {
        self.index.get(&id).copied()
    }

    /// Node carrying `id`, if indexed
    #[must_use]
    pub fn get(&self, id: Juid) -> Option<&Node> {
        self.lookup(id).map(|idx| self.node(idx))
    }

    /// Every node in store order
    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIdx(i), n))
    }

    /// Nodes built from one collection, in store order
    #[must_use]
    pub fn of_kind(&self, kind: RecordKind) -> &[NodeIdx] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every `Set/Target` node with its target name, in store order
    ///
    /// Target sets without a name are left out; they are listed in
    /// [`GraphDiagnostics::unnamed_targets`].
    #[must_use]
    pub fn target_sets(&self) -> Vec<(NodeIdx, String)> {
        self.of_kind(RecordKind::Set)
            .iter()
            .copied()
            .filter_map(|idx| {
                let node = self.node(idx);
                if !node.kind.is_target_set() {
                    return None;
                }
                let name = node.record.get_str(astro_store::fields::TARGET)?;
                Some((idx, name.to_string()))
            })
            .collect()
    }

    /// First `Set/Target` node carrying `name`
    #[must_use]
    pub fn find_target(&self, name: &str) -> Option<NodeIdx> {
        self.target_sets()
            .into_iter()
            .find_map(|(idx, n)| (n == name).then_some(idx))
    }

    #[inline]
    #[must_use]
    pub fn diagnostics(&self) -> &GraphDiagnostics {
        &self.diagnostics
    }

    /// Clear `dirty`, `satisfied` and walk bookkeeping on every node
    pub fn reset_run_state(&mut self) {
        for node in &mut self.nodes {
            node.reset_run_state();
        }
    }

    /// Predecessor relation as a petgraph map (edge: predecessor -> node)
    #[must_use]
    pub fn dependency_view(&self) -> DiGraphMap<NodeIdx, ()> {
        let mut view = DiGraphMap::with_capacity(self.nodes.len(), 0);
        for (idx, node) in self.iter() {
            view.add_node(idx);
            for &pred in node.predecessors() {
                view.add_edge(pred, idx, ());
            }
        }
        view
    }

    /// Components of the predecessor relation that form cycles
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<NodeIdx>> {
        let view = self.dependency_view();
        tarjan_scc(&view)
            .into_iter()
            .filter(|scc| scc.len() > 1 || view.contains_edge(scc[0], scc[0]))
            .collect()
    }

    /// Every node reachable from `root` through predecessor and sidecar edges
    #[must_use]
    pub fn reachable(&self, root: NodeIdx) -> BTreeSet<NodeIdx> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            let node = self.node(idx);
            stack.extend(node.predecessors().iter().chain(node.sidecars()).copied());
        }
        seen
    }
}
