//! Typed records and field accessors
//!
//! A [`Record`] is an opaque JSON object. The analyzer only relies on a small
//! vocabulary of field names, collected in [`fields`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field names understood by the analyzer
pub mod fields {
    pub const JUID: &str = "juid";
    pub const TSTAMP: &str = "tstamp";
    pub const FILENAME: &str = "filename";
    pub const DARK: &str = "dark";
    pub const FLAT: &str = "flat";
    pub const TARGET: &str = "target";
    pub const DIRECTIVE: &str = "directive";
    pub const EXPOSURE: &str = "exposure";
    pub const SOURCE: &str = "source";
    pub const ANALYSIS: &str = "analysis";
    pub const INCLUDED: &str = "included";
    pub const INPUT: &str = "input";
    pub const STYPE: &str = "stype";
    pub const STACK_EXCL: &str = "stack_excl";
    pub const IMG_ANALY_EXCL: &str = "img_analy_excl";
}

/// Unique record id ("juid")
///
/// Ids are allocated in blocks of one million per record kind, so the kind
/// can be recovered from the id alone (see [`Juid::kind`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Juid(pub i64);

impl Juid {
    /// Sentinel carried by records that have no id field
    pub const UNRESOLVED: Juid = Juid(0);

    /// Whether this is a real id rather than the unresolved sentinel
    #[inline]
    #[must_use]
    pub fn is_resolved(self) -> bool {
        self != Self::UNRESOLVED
    }

    /// Record kind encoded in the id block, if any
    #[inline]
    #[must_use]
    pub fn kind(self) -> Option<RecordKind> {
        RecordKind::from_juid_block(self.0 / 1_000_000)
    }
}

impl fmt::Display for Juid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Juid {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Kind of record, one per top-level collection of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Image,
    Stack,
    InstMag,
    Analysis,
    Submission,
    Set,
    Directive,
}

impl RecordKind {
    /// Every kind, in store order
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Image,
        RecordKind::Stack,
        RecordKind::InstMag,
        RecordKind::Analysis,
        RecordKind::Directive,
        RecordKind::Submission,
        RecordKind::Set,
    ];

    /// Kinds that become nodes of the dependency graph
    pub const NODE_KINDS: [RecordKind; 6] = [
        RecordKind::Image,
        RecordKind::Set,
        RecordKind::Analysis,
        RecordKind::InstMag,
        RecordKind::Submission,
        RecordKind::Stack,
    ];

    /// Name of the top-level collection holding this kind
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            RecordKind::Image => "exposures",
            RecordKind::Stack => "stacks",
            RecordKind::InstMag => "inst_mags",
            RecordKind::Analysis => "analyses",
            RecordKind::Submission => "submissions",
            RecordKind::Set => "sets",
            RecordKind::Directive => "directives",
        }
    }

    /// Millions block of the ids allocated to this kind
    #[must_use]
    pub fn juid_block(self) -> i64 {
        match self {
            RecordKind::Image => 2,
            RecordKind::Analysis => 3,
            RecordKind::InstMag => 4,
            RecordKind::Set => 5,
            RecordKind::Stack => 6,
            RecordKind::Directive => 7,
            RecordKind::Submission => 8,
        }
    }

    /// Inverse of [`RecordKind::juid_block`]
    #[must_use]
    pub fn from_juid_block(block: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.juid_block() == block)
    }

    /// Whether records of this kind carry a `tstamp` used for staleness
    #[must_use]
    pub fn has_timestamp(self) -> bool {
        matches!(
            self,
            RecordKind::Stack | RecordKind::InstMag | RecordKind::Submission | RecordKind::Analysis
        )
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// A record: one JSON object with named fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Create empty record
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; only objects are records
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// The record's id, if it has a usable one
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<Juid> {
        self.get_int(fields::JUID).map(Juid)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Integer value of `field`
    #[inline]
    #[must_use]
    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.get(field)?.as_i64()
    }

    /// String value of `field`
    #[inline]
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field)?.as_str()
    }

    /// List of ids held in `field`; non-integer entries are dropped
    #[must_use]
    pub fn get_ids(&self, field: &str) -> Option<Vec<Juid>> {
        let list = self.get(field)?.as_array()?;
        Some(list.iter().filter_map(Value::as_i64).map(Juid).collect())
    }

    /// Single id held in `field`
    #[inline]
    #[must_use]
    pub fn get_id(&self, field: &str) -> Option<Juid> {
        self.get_int(field).map(Juid)
    }

    /// Insert or replace `field`
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Builder form of [`Record::set`]
    #[inline]
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Encode a list of ids as a JSON array
#[must_use]
pub fn id_list(ids: &[Juid]) -> Value {
    Value::Array(ids.iter().map(|id| Value::from(id.0)).collect())
}
