//! # Backing Stores
//!
//! The contract between durable cells and whatever persists them.
//!
//! A store is keyed by primary key. Updates never destroy history: the
//! previous live record is kept as a soft-deleted version stamped with its
//! deletion time, and as-of reads walk those versions.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory, for tests and embedding |

pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::graph::Address;

pub use memory::{MemoryDb, MemoryStore, MemoryTable};

// ============================================================================
// Record
// ============================================================================

/// A persisted cell version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary-key fields.
    pub key: Address,
    /// Plain-data arguments.
    pub args: IndexMap<String, Value>,
    /// Result slots.
    pub results: IndexMap<String, Value>,
    /// When the result was computed.
    pub updated: DateTime<Utc>,
    /// When this version stopped being live. `None` for the live version.
    pub deleted: Option<DateTime<Utc>>,
}

impl Record {
    pub fn is_live(&self) -> bool {
        self.deleted.is_none()
    }
}

// ============================================================================
// Store traits
// ============================================================================

/// A keyed, versioned record store.
pub trait Store: Send + Sync {
    /// Primary-key fields this store is keyed by.
    fn pk(&self) -> &[String];

    /// The live record for `key`. Fails with `NotFound` when there is none.
    fn find_one(&self, key: &Address) -> Result<Record>;

    /// Insert or replace the live record for `record.key`.
    ///
    /// A replaced record is kept as a historical version whose `deleted`
    /// stamp is the time of replacement.
    fn upsert(&self, record: Record) -> Result<Record>;

    /// Point-in-time read.
    ///
    /// `None` selects the live version. A cutoff selects the version that
    /// was live at that time: the earliest version deleted at or after the
    /// cutoff, or the live version if it was written at or before it.
    fn read_as_of(&self, key: &Address, cutoff: Option<DateTime<Utc>>) -> Result<Option<Record>>;

    /// Soft-delete the live record. Returns it, stamped.
    fn delete(&self, key: &Address) -> Result<Option<Record>>;

    /// Every version of `key`, oldest first, live version last.
    fn history(&self, key: &Address) -> Result<Vec<Record>>;

    /// Forget everything, history included.
    fn drop_all(&self) -> Result<()>;
}

/// Opens the store a durable cell persists to, given its key fields.
pub trait StoreFactory: Send + Sync {
    fn open(&self, pk: &[String]) -> Result<Arc<dyn Store>>;
}
