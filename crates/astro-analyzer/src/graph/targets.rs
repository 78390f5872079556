//! Target name propagation
//!
//! Every `Set/Target` node pushes its name down through predecessors and
//! sidecars. The first target to reach a node owns it; propagation never
//! passes through another `Set/Target` node.

use super::{Graph, NodeIdx};
use crate::error::PropagationError;
use astro_store::Juid;

impl Graph {
    /// Assign `ultimate_target` below every `Set/Target` node
    ///
    /// A descent deeper than `depth_limit` is recorded in the diagnostics
    /// with the id chain that led there; the rest of the graph is unaffected.
    pub fn propagate_targets(&mut self, depth_limit: usize) {
        for node in &mut self.nodes {
            node.ultimate_target = None;
        }
        let mut errors = Vec::new();

        let unnamed: Vec<Juid> = self
            .iter()
            .filter(|(_, node)| {
                node.kind.is_target_set() && node.record.get_str(astro_store::fields::TARGET).is_none()
            })
            .map(|(_, node)| node.id)
            .collect();
        for id in &unnamed {
            tracing::warn!(%id, "target set has no target name");
        }

        for (target_idx, name) in self.target_sets() {
            let preds: Vec<NodeIdx> = self.node(target_idx).predecessors().iter().copied().collect();
            for pred in preds {
                let mut chain = vec![self.node(target_idx).id];
                if let Err(err) = self.propagate_down(pred, &name, 0, depth_limit, &mut chain) {
                    tracing::warn!("{err}");
                    errors.push(err);
                }
            }
        }

        self.diagnostics.propagation = errors;
        self.diagnostics.unnamed_targets = unnamed;
    }

    fn propagate_down(
        &mut self,
        idx: NodeIdx,
        target: &str,
        depth: usize,
        limit: usize,
        chain: &mut Vec<Juid>,
    ) -> Result<(), PropagationError> {
        let node = self.node(idx);
        if node.kind.is_target_set() || node.ultimate_target.is_some() {
            return Ok(());
        }

        chain.push(node.id);
        if depth > limit {
            return Err(PropagationError::DepthExceeded {
                target: target.to_string(),
                limit,
                chain: chain.clone(),
            });
        }

        self.node_mut(idx).ultimate_target = Some(target.to_string());
        let node = self.node(idx);
        let next: Vec<NodeIdx> = node
            .predecessors()
            .iter()
            .chain(node.sidecars())
            .copied()
            .collect();
        for child in next {
            self.propagate_down(child, target, depth + 1, limit, chain)?;
        }

        chain.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astro_store::{fields, id_list, MemoryStore, Record, RecordKind};

    fn rec(id: i64) -> Record {
        Record::new().with(fields::JUID, id).with(fields::TSTAMP, 1)
    }

    fn target(id: i64, name: &str, input: &[i64]) -> (RecordKind, Record) {
        let ids: Vec<Juid> = input.iter().copied().map(Juid).collect();
        (
            RecordKind::Set,
            rec(id)
                .with(fields::STYPE, "TARGET")
                .with(fields::TARGET, name)
                .with(fields::INPUT, id_list(&ids)),
        )
    }

    #[test]
    fn targets_stop_at_other_targets() {
        let store = MemoryStore::with_records([
            (RecordKind::Image, rec(2_000_001)),
            (RecordKind::Image, rec(2_000_002)),
            (RecordKind::InstMag, rec(4_000_001).with(fields::EXPOSURE, 2_000_001)),
            target(5_000_001, "outer", &[2_000_001, 5_000_002]),
            target(5_000_002, "inner", &[2_000_002]),
        ]);
        let graph = Graph::build(&store, 10);

        let target_of = |id| graph.get(Juid(id)).unwrap().ultimate_target.clone();
        assert_eq!(target_of(2_000_001).as_deref(), Some("outer"));
        // Sidecars inherit through their owner
        assert_eq!(target_of(4_000_001).as_deref(), Some("outer"));
        assert_eq!(target_of(2_000_002).as_deref(), Some("inner"));
        assert_eq!(target_of(5_000_002), None);
        assert!(graph.diagnostics().propagation.is_empty());
    }

    #[test]
    fn depth_limit_reports_chain() {
        // Target -> stack 6 -> stack 5 -> ... -> image
        let mut records = vec![(RecordKind::Image, rec(2_000_001))];
        let mut below = 2_000_001;
        for n in 1..=5 {
            let id = 6_000_000 + n;
            records.push((
                RecordKind::Stack,
                rec(id).with(fields::SOURCE, id_list(&[Juid(below)])),
            ));
            below = id;
        }
        records.push(target(5_000_001, "deep", &[below]));
        let store = MemoryStore::with_records(records);

        let graph = Graph::build(&store, 2);
        let errors = &graph.diagnostics().propagation;
        assert_eq!(errors.len(), 1);
        let PropagationError::DepthExceeded { chain, limit, .. } = &errors[0];
        assert_eq!(*limit, 2);
        assert_eq!(
            chain,
            &vec![Juid(5_000_001), Juid(6_000_005), Juid(6_000_004), Juid(6_000_003), Juid(6_000_002)]
        );
    }

    #[test]
    fn cyclic_references_terminate() {
        let store = MemoryStore::with_records([
            (RecordKind::Stack, rec(6_000_001).with(fields::SOURCE, id_list(&[Juid(6_000_002)]))),
            (RecordKind::Stack, rec(6_000_002).with(fields::SOURCE, id_list(&[Juid(6_000_001)]))),
            target(5_000_001, "loop", &[6_000_001]),
        ]);
        let graph = Graph::build(&store, 10);
        assert!(graph.diagnostics().propagation.is_empty());
        assert_eq!(
            graph.get(Juid(6_000_002)).unwrap().ultimate_target.as_deref(),
            Some("loop")
        );
    }

    #[test]
    fn unnamed_target_set_is_diagnosed() {
        let store = MemoryStore::with_records([
            (RecordKind::Image, rec(2_000_001)),
            (
                RecordKind::Set,
                rec(5_000_001)
                    .with(fields::STYPE, "TARGET")
                    .with(fields::INPUT, id_list(&[Juid(2_000_001)])),
            ),
        ]);
        let graph = Graph::build(&store, 10);

        assert!(graph.target_sets().is_empty());
        assert_eq!(graph.diagnostics().unnamed_targets, vec![Juid(5_000_001)]);
        assert!(!graph.diagnostics().is_clean());
        assert_eq!(graph.get(Juid(2_000_001)).unwrap().ultimate_target, None);
    }
}
