//! Disconnected snapshots of cells, for inspection and serialization.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Arg, Cell};
use crate::error::Result;
use crate::graph::Address;

/// A serializable view of a cell and its nested cells. Functions, policies
/// and stores are not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub address: Option<Address>,
    pub args: IndexMap<String, SnapshotArg>,
    pub results: IndexMap<String, Value>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SnapshotArg {
    Data(Value),
    Cell(Box<Snapshot>),
    List(Vec<SnapshotArg>),
    Map(IndexMap<String, SnapshotArg>),
}

impl Snapshot {
    /// Encode as MessagePack.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from MessagePack.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Number of snapshots in this tree, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.args.values().map(SnapshotArg::node_count).sum::<usize>()
    }
}

impl SnapshotArg {
    fn node_count(&self) -> usize {
        match self {
            SnapshotArg::Data(_) => 0,
            SnapshotArg::Cell(snapshot) => snapshot.node_count(),
            SnapshotArg::List(items) => items.iter().map(SnapshotArg::node_count).sum(),
            SnapshotArg::Map(entries) => entries.values().map(SnapshotArg::node_count).sum(),
        }
    }

    fn of(arg: &Arg) -> Result<Self> {
        Ok(match arg {
            Arg::Data(value) => SnapshotArg::Data(value.clone()),
            Arg::Cell(cell) => SnapshotArg::Cell(Box::new(cell.snapshot()?)),
            Arg::List(items) => {
                SnapshotArg::List(items.iter().map(SnapshotArg::of).collect::<Result<_>>()?)
            }
            Arg::Map(entries) => SnapshotArg::Map(
                entries
                    .iter()
                    .map(|(k, a)| Ok((k.clone(), SnapshotArg::of(a)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

impl Cell {
    /// A disconnected snapshot of this cell and every nested cell.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            address: self.address()?,
            args: self
                .args
                .iter()
                .map(|(k, a)| Ok((k.clone(), SnapshotArg::of(a)?)))
                .collect::<Result<_>>()?,
            results: self.results.clone(),
            updated: self.updated,
        })
    }
}
