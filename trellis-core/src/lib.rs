//! Trellis Core
//!
//! This crate provides the core runtime for Trellis, a lazy, addressable
//! computation graph with memoization. It implements:
//!
//! - Memoized cells (synchronous and asynchronous) over nested arguments
//! - Staleness policies, including calendar-periodic recomputation
//! - Durable cells backed by versioned stores with as-of reads
//! - A dependency DAG with topological push propagation
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `cell`: cells, arguments, staleness policies and the waiter
//! - `graph`: addresses and the dependency DAG
//! - `session`: the graph cache, recency registry and push orchestration
//! - `store`: the store contract and an in-memory implementation
//!
//! # Example
//!
//! ```rust
//! use serde_json::{json, Value};
//! use trellis_core::{Args, Cell, Force, Lookup, Result, Session};
//!
//! fn add(args: &Args) -> Result<Value> {
//!     let a = args["a"].as_i64().unwrap_or_default();
//!     let b = args["b"].as_i64().unwrap_or_default();
//!     Ok(json!(a + b))
//! }
//!
//! let session = Session::new();
//! let a = Cell::new(add).arg("a", 1).arg("b", 2).arg("key", "a").pk(["key"]);
//! let b = Cell::new(add).arg("a", a.clone()).arg("b", a.clone()).arg("key", "b").pk(["key"]);
//!
//! let b = b.evaluate(&session, Force::IfStale)?;
//! assert_eq!(b.result(), Some(&json!(6)));
//!
//! // Change an input and propagate it to every dependent
//! session.push(&a.arg("a", 3))?;
//! assert_eq!(session.get_data(&Lookup::new().field("key", "b"))?, json!(10));
//! # Ok::<(), trellis_core::Error>(())
//! ```

pub mod cell;
pub mod config;
pub mod error;
pub mod graph;
pub mod session;
pub mod store;

pub use cell::{Arg, Args, Cell, Force, Function, Period, Snapshot, SnapshotArg, Staleness, DATA};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use graph::{Address, Dag};
pub use session::{Lookup, Session};
pub use store::{MemoryDb, MemoryStore, MemoryTable, Record, Store, StoreFactory};
