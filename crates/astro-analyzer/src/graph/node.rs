//! Graph nodes
//!
//! A [`Node`] wraps one store record for one graph snapshot. Edges are arena
//! indices ([`NodeIdx`]) into the owning [`Graph`](super::Graph) and are only
//! valid for that snapshot.

use astro_store::{fields, Juid, Record, RecordKind};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::Serialize;
use std::fmt;

/// Index of a node in its graph's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIdx(pub usize);

impl fmt::Display for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Seconds since the Unix epoch, as stored in `tstamp`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp(self.0, 0) {
            Some(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%SZ")),
            None => write!(f, "{}s", self.0),
        }
    }
}

/// Subtype of a Set record, read from `stype`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum SetType {
    Bvri,
    SubExp,
    Merge,
    Target,
    TimeSeq,
    /// Anything else; evaluating such a set is a structural error
    Unrecognized(String),
}

impl SetType {
    /// Subtype named by a set record's `stype`
    #[must_use]
    pub fn parse(stype: &str) -> Self {
        match stype {
            "BVRI" => Self::Bvri,
            "SUBEXP" => Self::SubExp,
            "MERGE" => Self::Merge,
            "TARGET" => Self::Target,
            "TIMESEQ" => Self::TimeSeq,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for SetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bvri => f.write_str("BVRI"),
            Self::SubExp => f.write_str("SUBEXP"),
            Self::Merge => f.write_str("MERGE"),
            Self::Target => f.write_str("TARGET"),
            Self::TimeSeq => f.write_str("TIMESEQ"),
            Self::Unrecognized(s) => write!(f, "{s:?}"),
        }
    }
}

/// Kind of graph node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Image,
    Stack,
    InstMag,
    Analysis,
    Submission,
    Set(SetType),
}

impl NodeKind {
    /// Node kind for a record fetched from the collection of `kind`
    ///
    /// Returns `None` for kinds that never become nodes (directives).
    #[must_use]
    pub fn of(kind: RecordKind, record: &Record) -> Option<Self> {
        Some(match kind {
            RecordKind::Image => Self::Image,
            RecordKind::Stack => Self::Stack,
            RecordKind::InstMag => Self::InstMag,
            RecordKind::Analysis => Self::Analysis,
            RecordKind::Submission => Self::Submission,
            RecordKind::Set => Self::Set(SetType::parse(
                record.get_str(fields::STYPE).unwrap_or_default(),
            )),
            RecordKind::Directive => return None,
        })
    }

    /// Store collection this kind is read from
    #[must_use]
    pub fn record_kind(&self) -> RecordKind {
        match self {
            Self::Image => RecordKind::Image,
            Self::Stack => RecordKind::Stack,
            Self::InstMag => RecordKind::InstMag,
            Self::Analysis => RecordKind::Analysis,
            Self::Submission => RecordKind::Submission,
            Self::Set(_) => RecordKind::Set,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_target_set(&self) -> bool {
        matches!(self, Self::Set(SetType::Target))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("Image"),
            Self::Stack => f.write_str("Stack"),
            Self::InstMag => f.write_str("InstMag"),
            Self::Analysis => f.write_str("Analysis"),
            Self::Submission => f.write_str("Submission"),
            Self::Set(t) => write!(f, "Set/{t}"),
        }
    }
}

/// One record in one graph snapshot, with its edges and run state
#[derive(Debug, Clone)]
pub struct Node {
    pub id: Juid,
    pub kind: NodeKind,
    pub record: Record,
    pub timestamp: Timestamp,
    /// Name of the target set that owns this node
    pub ultimate_target: Option<String>,
    pub(crate) predecessors: IndexSet<NodeIdx>,
    pub(crate) successors: IndexSet<NodeIdx>,
    pub(crate) sidecars: IndexSet<NodeIdx>,
    dirty: bool,
    pub(crate) satisfied: bool,
    pub(crate) in_progress: bool,
    pub(crate) blocked: bool,
}

impl Node {
    /// Wrap a record; missing id or timestamp fall back with a warning
    #[must_use]
    pub fn new(kind: NodeKind, record: Record) -> Self {
        let id = record.id().unwrap_or_else(|| {
            tracing::warn!(%kind, "record has no juid; node will not be indexed");
            Juid::UNRESOLVED
        });

        let timestamp = if kind.record_kind().has_timestamp() {
            record.get_int(fields::TSTAMP).map_or_else(
                || {
                    tracing::warn!(%id, %kind, "record has no tstamp; using epoch");
                    Timestamp::EPOCH
                },
                Timestamp,
            )
        } else {
            Timestamp::EPOCH
        };

        Self {
            id,
            kind,
            record,
            timestamp,
            ultimate_target: None,
            predecessors: IndexSet::new(),
            successors: IndexSet::new(),
            sidecars: IndexSet::new(),
            dirty: false,
            satisfied: false,
            in_progress: false,
            blocked: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn predecessors(&self) -> &IndexSet<NodeIdx> {
        &self.predecessors
    }

    #[inline]
    #[must_use]
    pub fn successors(&self) -> &IndexSet<NodeIdx> {
        &self.successors
    }

    /// Nodes that reference this node through a single-id field
    #[inline]
    #[must_use]
    pub fn sidecars(&self) -> &IndexSet<NodeIdx> {
        &self.sidecars
    }

    /// Whether this node was (re)produced in the current run
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.satisfied
    }

    /// Whether the walk gave up on this node this run
    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Raise the dirty flag; it only ever goes up within a run
    #[inline]
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn reset_run_state(&mut self) {
        self.dirty = false;
        self.satisfied = false;
        self.in_progress = false;
        self.blocked = false;
    }

    /// File the record names, if any
    #[inline]
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.record.get_str(fields::FILENAME)
    }
}
