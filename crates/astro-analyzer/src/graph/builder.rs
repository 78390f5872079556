//! Graph construction from the record store

use super::{Graph, GraphDiagnostics, Node, NodeIdx, NodeKind};
use crate::error::ReferentialError;
use astro_store::{fields, Juid, RecordKind, RecordStore};
use std::collections::hash_map::Entry;

/// How a node kind names its predecessors
enum Reference {
    /// One id; the node also becomes a sidecar of the referenced node
    Sidecar(&'static str),
    /// A list of ids, with an optional fallback field
    List(&'static str, Option<&'static str>),
}

fn reference_of(kind: &NodeKind) -> Option<Reference> {
    match kind {
        NodeKind::InstMag => Some(Reference::Sidecar(fields::EXPOSURE)),
        NodeKind::Analysis => Some(Reference::Sidecar(fields::SOURCE)),
        NodeKind::Submission => Some(Reference::Sidecar(fields::ANALYSIS)),
        NodeKind::Stack => Some(Reference::List(fields::INCLUDED, Some(fields::SOURCE))),
        NodeKind::Set(_) => Some(Reference::List(fields::INPUT, None)),
        NodeKind::Image => None,
    }
}

impl Graph {
    /// Rebuild, link and propagate targets in one go
    #[must_use]
    pub fn build<S: RecordStore + ?Sized>(store: &S, depth_limit: usize) -> Self {
        let mut graph = Self::rebuild(store);
        graph.link_dependencies();
        graph.propagate_targets(depth_limit);
        tracing::info!(
            nodes = graph.len(),
            targets = graph.target_sets().len(),
            problems = graph.diagnostics().messages().len(),
            "dependency graph built"
        );
        graph
    }

    /// Wrap every record of every node kind and index them by id
    ///
    /// Records without an id become unindexed nodes. When two records share
    /// an id the first one keeps the index slot.
    #[must_use]
    pub fn rebuild<S: RecordStore + ?Sized>(store: &S) -> Self {
        let mut graph = Graph::default();

        for kind in RecordKind::NODE_KINDS {
            for record in store.fetch_all_of_type(kind) {
                let Some(node_kind) = NodeKind::of(kind, &record) else {
                    continue;
                };
                let node = Node::new(node_kind, record);
                let idx = NodeIdx(graph.nodes.len());

                if node.id.is_resolved() {
                    match graph.index.entry(node.id) {
                        Entry::Vacant(slot) => {
                            slot.insert(idx);
                        }
                        Entry::Occupied(_) => {
                            tracing::warn!(id = %node.id, "duplicate record id; keeping the first");
                            graph.diagnostics.duplicate_ids.push(node.id);
                        }
                    }
                } else {
                    graph.diagnostics.unresolved += 1;
                }

                graph.by_kind.entry(kind).or_default().push(idx);
                graph.nodes.push(node);
            }
        }

        graph
    }

    /// Rebuild all edges from the records' reference fields
    ///
    /// Unknown ids are logged, skipped and kept in the diagnostics.
    /// Successors are derived as the exact inverse of predecessors.
    pub fn link_dependencies(&mut self) {
        for node in &mut self.nodes {
            node.predecessors.clear();
            node.successors.clear();
            node.sidecars.clear();
        }
        let mut referential = Vec::new();

        for i in 0..self.nodes.len() {
            let idx = NodeIdx(i);
            let node = &self.nodes[i];
            let Some(reference) = reference_of(&node.kind) else {
                continue;
            };

            let (field, ids, sidecar) = match reference {
                Reference::Sidecar(field) => {
                    (field, node.record.get_id(field).into_iter().collect::<Vec<_>>(), true)
                }
                Reference::List(primary, fallback) => {
                    match (node.record.get_ids(primary), fallback) {
                        (Some(ids), _) => (primary, ids, false),
                        (None, Some(fallback)) => {
                            (fallback, node.record.get_ids(fallback).unwrap_or_default(), false)
                        }
                        (None, None) => (primary, Vec::new(), false),
                    }
                }
            };
            let owner = node.id;

            for id in ids {
                match self.index.get(&id).copied() {
                    Some(pred) => {
                        self.nodes[i].predecessors.insert(pred);
                        if sidecar {
                            self.nodes[pred.0].sidecars.insert(idx);
                        }
                    }
                    None => {
                        let err = ReferentialError {
                            node: owner,
                            field,
                            missing: id,
                        };
                        tracing::warn!("{err}");
                        referential.push(err);
                    }
                }
            }
        }

        let mut links = 0usize;
        for i in 0..self.nodes.len() {
            let preds: Vec<NodeIdx> = self.nodes[i].predecessors.iter().copied().collect();
            for pred in preds {
                self.nodes[pred.0].successors.insert(NodeIdx(i));
                links += 1;
            }
        }

        let cycles: Vec<Vec<Juid>> = self
            .cycles()
            .into_iter()
            .map(|scc| scc.into_iter().map(|idx| self.node(idx).id).collect())
            .collect();
        for cycle in &cycles {
            tracing::warn!(chain = %crate::error::format_chain(cycle), "dependency cycle in store");
        }

        tracing::debug!(links, "dependencies linked");
        self.diagnostics = GraphDiagnostics {
            referential,
            cycles,
            propagation: Vec::new(),
            ..std::mem::take(&mut self.diagnostics)
        };
    }
}
