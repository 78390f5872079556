use astro_analyzer::command::CommandKind;
use astro_analyzer::config::AnalyzerConfig;
use astro_analyzer::graph::{Graph, NodeKind, Timestamp};
use astro_analyzer::satisfy::{Satisfier, WalkOutcome};
use astro_store::{fields, Juid, RecordStore};
use astro_test_utils::session_ids::*;
use astro_test_utils::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::path::Path;

fn walk(session: &Session, root: i64, force: bool) -> (Graph, WalkOutcome) {
    let config = AnalyzerConfig::default();
    let mut store = session.store.clone();
    store.reactivate().unwrap();
    let mut graph = Graph::build(&store, config.propagation_depth_limit);
    let root = graph.lookup(Juid(root)).unwrap();
    let outcome = {
        let mut satisfier = Satisfier::new(&mut graph, &mut store, &session.probe, &config);
        satisfier.satisfy(root, force);
        satisfier.finish()
    };
    store.sync_and_release().unwrap();
    (graph, outcome)
}

fn staged_by(outcome: &WalkOutcome, kind: CommandKind) -> Vec<Juid> {
    outcome
        .commands
        .iter()
        .filter(|c| c.kind == kind)
        .map(|c| c.origin)
        .collect()
}

#[test]
fn test_up_to_date_session_stages_nothing() {
    let (_, outcome) = walk(&Session::current(), TARGET, false);
    assert!(outcome.commands.is_empty(), "{:?}", outcome.commands);
    assert!(outcome.failures.is_empty());
}

#[test]
fn test_every_reachable_node_is_satisfied() {
    let session = Session::current();
    session.store.insert(
        astro_store::RecordKind::Submission,
        submission(8_000_001, ANALYSIS, 400).1,
    );
    session.probe.remove_catalogue(Path::new(IMAGE_B_FILE));

    let (graph, _) = walk(&session, TARGET, false);
    let root = graph.lookup(Juid(TARGET)).unwrap();
    let reachable = graph.reachable(root);
    assert_eq!(reachable.len(), graph.len());
    for idx in reachable {
        assert!(graph.node(idx).is_satisfied(), "{} not satisfied", graph.node(idx).id);
    }
}

#[test]
fn test_missing_catalogue_restacks_and_reruns_downstream() {
    let session = Session::current();
    session.probe.remove_catalogue(Path::new(IMAGE_A_FILE));

    let (graph, outcome) = walk(&session, TARGET, false);

    assert_eq!(staged_by(&outcome, CommandKind::FindStars), vec![Juid(IMAGE_A), Juid(STACK)]);
    assert_eq!(staged_by(&outcome, CommandKind::Stack), vec![Juid(STACK)]);
    assert_eq!(
        staged_by(&outcome, CommandKind::Photometry),
        vec![Juid(IMAGE_A), Juid(INST_MAG_A), Juid(STACK), Juid(INST_MAG_STACK)]
    );
    assert_eq!(staged_by(&outcome, CommandKind::Bvri), vec![Juid(BVRI)]);
    assert!(graph.get(Juid(ANALYSIS)).unwrap().is_dirty());
    assert!(!graph.get(Juid(IMAGE_B)).unwrap().is_dirty());

    let bvri = outcome.commands.iter().find(|c| c.kind == CommandKind::Bvri).unwrap();
    assert_eq!(bvri.args, vec!["-d", ".", "-t", "rr-lyr"]);
}

#[test]
fn test_force_rebuilds_everything_reachable() {
    let (_, outcome) = walk(&Session::current(), TARGET, true);
    assert_eq!(staged_by(&outcome, CommandKind::Stack), vec![Juid(STACK)]);
    assert_eq!(staged_by(&outcome, CommandKind::StarMatch).len(), 3);
    assert_eq!(staged_by(&outcome, CommandKind::Bvri), vec![Juid(BVRI)]);
}

#[test]
fn test_stale_stack_is_not_restaged_after_timestamp_write() {
    // Stack A (tstamp 10) is built from stack B (tstamp 20)
    let session = Session::new([
        exposure(2_000_001, "/img/v1.fits", "rr-lyr"),
        inst_mag(4_000_001, 2_000_001, 30),
        stack(6_000_002, "/img/b.fits", "rr-lyr", &[2_000_001], 20),
        inst_mag(4_000_002, 6_000_002, 30),
        stack(6_000_001, "/img/a.fits", "rr-lyr", &[6_000_002], 10),
        inst_mag(4_000_003, 6_000_001, 30),
    ]);
    for file in ["/img/v1.fits", "/img/b.fits", "/img/a.fits"] {
        session.probe.put_file(file, Timestamp(5));
        session.probe.put_catalogue(file);
    }

    let (_, first) = walk(&session, 6_000_001, false);
    assert_eq!(staged_by(&first, CommandKind::Stack), vec![Juid(6_000_001)]);
    assert_eq!(
        session.store.record(Juid(6_000_001)).unwrap().get_ids(fields::INCLUDED),
        Some(vec![Juid(6_000_002)])
    );

    session.store.update(Juid(6_000_001), |r| r.set(fields::TSTAMP, 21));
    let (_, second) = walk(&session, 6_000_001, false);
    assert!(second.commands.is_empty(), "{:?}", second.commands);
}

#[test]
fn test_inst_mag_older_than_exposure_file_is_rerun() {
    let session = Session::current();
    session.probe.put_file(IMAGE_B_FILE, Timestamp(250));

    let (_, outcome) = walk(&session, TARGET, false);
    assert_eq!(staged_by(&outcome, CommandKind::Photometry), vec![Juid(INST_MAG_B)]);
    assert_eq!(outcome.commands[0].args, vec!["-i", IMAGE_B_FILE]);
}

#[test]
fn test_directive_on_inst_mag_excludes_its_photometry() {
    let session = Session::new([
        exposure(2_000_001, "/img/v1.fits", "rr-lyr"),
        with_directive(inst_mag(4_000_001, 2_000_001, 1), 7_000_001),
        directive(7_000_001, &[], &[2_000_001]),
    ]);
    session.probe.put_file("/img/v1.fits", Timestamp(50));
    session.probe.put_catalogue("/img/v1.fits");

    let (graph, outcome) = walk(&session, 4_000_001, false);
    assert!(outcome.commands.is_empty());
    assert!(!graph.get(Juid(4_000_001)).unwrap().is_dirty());
}

#[test]
fn test_stack_exclusion_of_foreign_id_warns() {
    let session = Session::new([
        exposure(2_000_001, "/img/v1.fits", "rr-lyr"),
        with_directive(stack(6_000_001, "/img/s.fits", "rr-lyr", &[2_000_001], 1), 7_000_001),
        directive(7_000_001, &[2_000_777], &[]),
    ]);
    session.probe.put_catalogue("/img/v1.fits");

    let (_, outcome) = walk(&session, 6_000_001, false);
    assert_eq!(staged_by(&outcome, CommandKind::Stack), vec![Juid(6_000_001)]);
    assert!(outcome.warnings.iter().any(|w| w.contains("2000777")));
}

#[test]
fn test_missing_directive_degrades() {
    let session = Session::new([with_directive(
        exposure(2_000_001, "/img/v1.fits", "rr-lyr"),
        7_000_404,
    )]);
    let (_, outcome) = walk(&session, 2_000_001, false);
    assert_eq!(outcome.commands.len(), 3);
    assert!(outcome.warnings.iter().any(|w| w.contains("7000404")));
}

#[test]
fn test_missing_filename_blocks_only_dependents() {
    let session = Session::current();
    session.store.update(Juid(STACK), |r| r.set(fields::FILENAME, serde_json::Value::Null));
    session.probe.remove_catalogue(Path::new(IMAGE_B_FILE));

    let (graph, outcome) = walk(&session, TARGET, false);

    let failed: Vec<(Juid, Option<Juid>)> =
        outcome.failures.iter().map(|f| (f.node, f.blocked_by)).collect();
    assert_eq!(
        failed,
        vec![
            (Juid(STACK), None),
            (Juid(INST_MAG_STACK), Some(Juid(STACK))),
            (Juid(BVRI), Some(Juid(INST_MAG_STACK))),
            (Juid(TARGET), Some(Juid(BVRI))),
        ]
    );
    assert!(outcome.failures[0].error.contains("filename"));
    // Image B still got its catalogue and photometry staged
    assert_eq!(
        staged_by(&outcome, CommandKind::Photometry),
        vec![Juid(IMAGE_B), Juid(INST_MAG_B)]
    );
    assert!(graph.get(Juid(IMAGE_B)).unwrap().is_dirty());
}

proptest! {
    #[test]
    fn prop_pass_through_dirty_is_or_of_predecessors(
        missing in proptest::collection::vec(any::<bool>(), 3),
        stale_stack in any::<bool>(),
    ) {
        let session = Session::current();
        session.store.insert(
            astro_store::RecordKind::Submission,
            submission(8_000_001, ANALYSIS, 400).1,
        );
        for (file, gone) in [IMAGE_A_FILE, IMAGE_B_FILE, STACK_FILE].into_iter().zip(missing) {
            if gone {
                session.probe.remove_catalogue(Path::new(file));
            }
        }
        if stale_stack {
            session.store.update(Juid(STACK), |r| r.set(fields::TSTAMP, -1));
            session.store.update(Juid(IMAGE_A), |r| r.set(fields::TSTAMP, 0));
        }

        let (graph, _) = walk(&session, TARGET, false);
        for (_, node) in graph.iter() {
            if matches!(node.kind, NodeKind::Analysis | NodeKind::Submission) {
                let any_dirty = node
                    .predecessors()
                    .iter()
                    .any(|&p| graph.node(p).is_dirty());
                prop_assert!(node.is_satisfied());
                prop_assert_eq!(node.is_dirty(), any_dirty);
            }
        }
    }

    #[test]
    fn prop_stack_uses_exactly_the_non_excluded_inputs(
        excluded in proptest::collection::vec(any::<bool>(), 1..8)
    ) {
        let inputs: Vec<i64> = (0..excluded.len() as i64).map(|n| 2_000_001 + n).collect();
        let dropped: Vec<i64> = inputs
            .iter()
            .zip(&excluded)
            .filter_map(|(&id, &x)| x.then_some(id))
            .collect();
        let kept: Vec<i64> = inputs
            .iter()
            .zip(&excluded)
            .filter_map(|(&id, &x)| (!x).then_some(id))
            .collect();

        let mut records: Vec<_> = inputs
            .iter()
            .map(|&id| exposure(id, &format!("/img/{id}.fits"), "rr-lyr"))
            .collect();
        records.push(with_directive(
            stack(6_000_001, "/img/stack.fits", "rr-lyr", &inputs, 1),
            7_000_001,
        ));
        records.push(directive(7_000_001, &dropped, &[]));
        let session = Session::new(records);

        let (_, outcome) = walk(&session, 6_000_001, false);
        let stacks: Vec<_> = outcome
            .commands
            .iter()
            .filter(|c| c.kind == CommandKind::Stack)
            .collect();
        let included = session
            .store
            .record(Juid(6_000_001))
            .unwrap()
            .get_ids(fields::INCLUDED);

        if kept.is_empty() {
            prop_assert!(stacks.is_empty());
            prop_assert_eq!(included, None);
        } else {
            prop_assert_eq!(stacks.len(), 1);
            let files: Vec<String> = kept.iter().map(|id| format!("/img/{id}.fits")).collect();
            prop_assert_eq!(&stacks[0].args[2..], files.as_slice());
            let kept_ids: Vec<Juid> = kept.iter().copied().map(Juid).collect();
            prop_assert_eq!(included, Some(kept_ids));
        }
    }
}
