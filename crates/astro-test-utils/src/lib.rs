//! Testing utilities for the astro workspace
//!
//! Record fixtures, a scripted [`CommandRunner`], and a ready-made session
//! whose derived products are all up to date.

#![allow(missing_docs)]

use astro_analyzer::command::{CommandKind, StagedCommand};
use astro_analyzer::config::AnalyzerConfig;
use astro_analyzer::error::SchedulerError;
use astro_analyzer::graph::Timestamp;
use astro_analyzer::probe::MemoryProbe;
use astro_analyzer::scheduler::{CommandRunner, CommandStatus};
use astro_analyzer::Analyzer;
use astro_store::{fields, id_list, Juid, MemoryStore, Record, RecordKind, RecordStore};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A bare record of the kind implied by the id's millions block
pub fn kinded(id: i64) -> (RecordKind, Record) {
    let kind = Juid(id).kind().unwrap();
    (kind, Record::new().with(fields::JUID, id))
}

pub fn ids(list: &[i64]) -> Value {
    let list: Vec<Juid> = list.iter().copied().map(Juid).collect();
    id_list(&list)
}

/// An image record
pub fn exposure(id: i64, file: &str, target: &str) -> (RecordKind, Record) {
    let (kind, record) = kinded(id);
    (
        kind,
        record.with(fields::FILENAME, file).with(fields::TARGET, target),
    )
}

pub fn stack(id: i64, file: &str, target: &str, sources: &[i64], tstamp: i64) -> (RecordKind, Record) {
    let (kind, record) = kinded(id);
    (
        kind,
        record
            .with(fields::FILENAME, file)
            .with(fields::TARGET, target)
            .with(fields::SOURCE, ids(sources))
            .with(fields::TSTAMP, tstamp),
    )
}

pub fn inst_mag(id: i64, exposure: i64, tstamp: i64) -> (RecordKind, Record) {
    let (kind, record) = kinded(id);
    (
        kind,
        record
            .with(fields::EXPOSURE, exposure)
            .with(fields::TSTAMP, tstamp),
    )
}

pub fn analysis(id: i64, source: i64, tstamp: i64) -> (RecordKind, Record) {
    let (kind, record) = kinded(id);
    (
        kind,
        record.with(fields::SOURCE, source).with(fields::TSTAMP, tstamp),
    )
}

pub fn submission(id: i64, analysis: i64, tstamp: i64) -> (RecordKind, Record) {
    let (kind, record) = kinded(id);
    (
        kind,
        record
            .with(fields::ANALYSIS, analysis)
            .with(fields::TSTAMP, tstamp),
    )
}

pub fn set(id: i64, stype: &str, input: &[i64]) -> (RecordKind, Record) {
    let (kind, record) = kinded(id);
    (
        kind,
        record.with(fields::STYPE, stype).with(fields::INPUT, ids(input)),
    )
}

/// A `Set/Target` record named `name`
pub fn target_set(id: i64, name: &str, input: &[i64]) -> (RecordKind, Record) {
    let (kind, record) = set(id, "TARGET", input);
    (kind, record.with(fields::TARGET, name))
}

pub fn directive(id: i64, stack_excl: &[i64], img_analy_excl: &[i64]) -> (RecordKind, Record) {
    let (kind, record) = kinded(id);
    (
        kind,
        record
            .with(fields::STACK_EXCL, ids(stack_excl))
            .with(fields::IMG_ANALY_EXCL, ids(img_analy_excl)),
    )
}

/// Attach a directive to a fixture
pub fn with_directive((kind, record): (RecordKind, Record), directive: i64) -> (RecordKind, Record) {
    (kind, record.with(fields::DIRECTIVE, directive))
}

type Effect = Box<dyn Fn(&StagedCommand) + Send + Sync>;

/// Runner that records every command and plays scripted effects
///
/// Effects run whether or not the command is scripted to fail, so a test
/// can model a tool that writes to the store and then exits non-zero.
#[derive(Default)]
pub struct ScriptedRunner {
    commands: Mutex<Vec<StagedCommand>>,
    failing_origins: Mutex<HashMap<Juid, i32>>,
    failing_kinds: Mutex<HashMap<CommandKind, i32>>,
    effects: Vec<(CommandKind, Effect)>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands staged by `origin` exit with `code`
    pub fn fail_origin(mut self, origin: i64, code: i32) -> Self {
        self.failing_origins.get_mut().insert(Juid(origin), code);
        self
    }

    /// Commands of `kind` exit with `code`
    pub fn fail_kind(mut self, kind: CommandKind, code: i32) -> Self {
        self.failing_kinds.get_mut().insert(kind, code);
        self
    }

    pub fn on(mut self, kind: CommandKind, effect: impl Fn(&StagedCommand) + Send + Sync + 'static) -> Self {
        self.effects.push((kind, Box::new(effect)));
        self
    }

    /// Let every later command succeed
    pub fn heal(&self) {
        self.failing_origins.lock().clear();
        self.failing_kinds.lock().clear();
    }

    pub fn commands(&self) -> Vec<StagedCommand> {
        self.commands.lock().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.commands.lock().iter().map(StagedCommand::command_line).collect()
    }

    /// Number of recorded commands of `kind`
    pub fn count_of(&self, kind: CommandKind) -> usize {
        self.commands.lock().iter().filter(|c| c.kind == kind).count()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &StagedCommand) -> Result<CommandStatus, SchedulerError> {
        self.commands.lock().push(command.clone());
        for (kind, effect) in &self.effects {
            if *kind == command.kind {
                effect(command);
            }
        }
        let code = self
            .failing_origins
            .lock()
            .get(&command.origin)
            .copied()
            .or_else(|| self.failing_kinds.lock().get(&command.kind).copied())
            .unwrap_or(0);
        Ok(CommandStatus::exited(code))
    }
}

/// Ids of the records in [`Session::current`]
pub mod session_ids {
    pub const IMAGE_A: i64 = 2_000_001;
    pub const IMAGE_B: i64 = 2_000_002;
    pub const INST_MAG_A: i64 = 4_000_001;
    pub const INST_MAG_B: i64 = 4_000_002;
    pub const STACK: i64 = 6_000_001;
    pub const INST_MAG_STACK: i64 = 4_000_003;
    pub const BVRI: i64 = 5_000_002;
    pub const ANALYSIS: i64 = 3_000_001;
    pub const TARGET: i64 = 5_000_001;
}

pub const IMAGE_A_FILE: &str = "/session/rr-lyr-v-001.fits";
pub const IMAGE_B_FILE: &str = "/session/rr-lyr-v-002.fits";
pub const STACK_FILE: &str = "/session/rr-lyr-v-stack.fits";

/// A store and probe that simulate one observing session
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub store: MemoryStore,
    pub probe: MemoryProbe,
    clock: Arc<AtomicI64>,
}

impl Session {
    pub fn new(records: impl IntoIterator<Item = (RecordKind, Record)>) -> Self {
        Self {
            store: MemoryStore::with_records(records),
            probe: MemoryProbe::new(),
            clock: Arc::new(AtomicI64::new(1_000)),
        }
    }

    /// Two exposures and their stack, all photometered, feeding a BVRI
    /// set that has already been analysed, under target `rr-lyr`
    pub fn current() -> Self {
        use session_ids::*;

        let session = Self::new([
            exposure(IMAGE_A, IMAGE_A_FILE, "rr-lyr"),
            exposure(IMAGE_B, IMAGE_B_FILE, "rr-lyr"),
            inst_mag(INST_MAG_A, IMAGE_A, 200),
            inst_mag(INST_MAG_B, IMAGE_B, 200),
            stack(STACK, STACK_FILE, "rr-lyr", &[IMAGE_A, IMAGE_B], 100),
            inst_mag(INST_MAG_STACK, STACK, 200),
            set(BVRI, "BVRI", &[INST_MAG_STACK]),
            analysis(ANALYSIS, BVRI, 300),
            target_set(TARGET, "rr-lyr", &[BVRI, IMAGE_A, IMAGE_B]),
        ]);
        for file in [IMAGE_A_FILE, IMAGE_B_FILE] {
            session.probe.put_file(file, Timestamp(50));
            session.probe.put_catalogue(file);
        }
        session.probe.put_file(STACK_FILE, Timestamp(60));
        session.probe.put_catalogue(STACK_FILE);
        session
    }

    /// Next value of the session clock
    pub fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    /// Runner whose commands produce their outputs
    ///
    /// * `star_match` writes the matched catalogue of its image
    /// * `stack` writes the output file and advances the stack's `tstamp`
    /// * `photometry` advances the `tstamp` of the resulting inst_mag records
    pub fn simulating_runner(&self) -> ScriptedRunner {
        let probe = self.probe.clone();
        let matched = move |c: &StagedCommand| {
            if let Some(file) = c.args.last() {
                probe.put_catalogue(file.as_str());
            }
        };

        let session = self.clone();
        let stacked = move |c: &StagedCommand| {
            let now = session.tick();
            if let Some(out) = c.args.get(1) {
                session.probe.put_file(out.as_str(), Timestamp(now));
            }
            session.store.update(c.origin, |r| r.set(fields::TSTAMP, now));
        };

        let session = self.clone();
        let photometered = move |c: &StagedCommand| session.photometer(c.origin);

        ScriptedRunner::new()
            .on(CommandKind::StarMatch, matched)
            .on(CommandKind::Stack, stacked)
            .on(CommandKind::Photometry, photometered)
    }

    /// Advance the inst_mag records produced by photometry staged at `origin`
    pub fn photometer(&self, origin: Juid) {
        let now = self.tick();
        if origin.kind() == Some(RecordKind::InstMag) {
            self.store.update(origin, |r| r.set(fields::TSTAMP, now));
            return;
        }
        let products: Vec<Juid> = self
            .store
            .fetch_all_of_type(RecordKind::InstMag)
            .into_iter()
            .filter(|r| r.get_id(fields::EXPOSURE) == Some(origin))
            .filter_map(|r| r.id())
            .collect();
        for id in products {
            self.store.update(id, |r| r.set(fields::TSTAMP, now));
        }
    }

    /// Analyzer over this session's store and probe
    pub fn analyzer(&self, runner: Arc<ScriptedRunner>, config: AnalyzerConfig) -> Analyzer<MemoryStore> {
        Analyzer::new(self.store.clone(), Arc::new(self.probe.clone()), runner, config)
    }

    pub fn tstamp(&self, id: i64) -> Option<i64> {
        self.store.record(Juid(id))?.get_int(fields::TSTAMP)
    }

    pub fn has_catalogue(&self, file: &str) -> bool {
        use astro_analyzer::probe::ArtifactProbe;
        self.probe.has_matched_catalogue(Path::new(file))
    }
}
