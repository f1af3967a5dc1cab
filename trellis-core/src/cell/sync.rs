//! Synchronous evaluation.
//!
//! Everything here runs on the caller's thread: nested cells are loaded and
//! evaluated one after another, in argument order.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, trace};

use super::{Arg, Cell, Force, Function, Plan};
use crate::error::{Error, Result};
use crate::graph::Address;
use crate::Session;

impl Cell {
    /// Return a cell with a fresh result.
    ///
    /// See [`Force`] for the forcing levels. Unless detached, every nested
    /// cell argument is loaded and evaluated first, and the fresh result is
    /// committed to `session`. A function error propagates unchanged and
    /// nothing is committed for this address.
    pub fn evaluate(&self, session: &Session, force: Force) -> Result<Cell> {
        let current = if force == Force::Detached {
            self.clone()
        } else {
            self.latest(session)?
        };

        let function = match current.plan(force) {
            Plan::Keep => {
                trace!(cell = %current.label(), "result is current");
                return Ok(current);
            }
            Plan::Missing => return Err(Error::NoFunction(current.label())),
            Plan::Run(Function::Async(_)) => {
                return Err(Error::AsyncInSyncContext(current.label()));
            }
            Plan::Run(Function::Sync(function)) => function,
        };

        let args = if force == Force::Detached {
            current.args.clone()
        } else {
            let child = force.child();
            let mut resolved = HashMap::new();
            current
                .args
                .iter()
                .map(|(k, a)| Ok((k.clone(), resolve(a, session, child, &mut resolved)?)))
                .collect::<Result<IndexMap<_, _>>>()?
        };

        debug!(cell = %current.label(), ?force, "recomputing");
        let value = function(&Cell::inputs(&args)?)?;
        let fresh = current.computed(args, value)?;

        if force == Force::Detached {
            return Ok(fresh);
        }
        fresh.commit(session)
    }

    /// Swap this cell and its nested cell arguments for their latest
    /// computed versions, without recomputing anything.
    ///
    /// The graph cache is authoritative for an address; durable cells fall
    /// back to the store's live record. Anonymous nested cells are looked
    /// through and lose their result if an input under them changed. With
    /// `detach`, the loaded subtree is also removed from the graph cache.
    pub fn load(&self, session: &Session, detach: bool) -> Result<Cell> {
        let base = self.fetch(session)?.unwrap_or_else(|| self.clone());
        let loaded = base.refresh(session)?;

        if detach {
            return session.detach(&loaded, usize::MAX);
        }
        Ok(loaded)
    }

    /// Publish this cell: store first, then graph cache, recency registry
    /// and dependency edges. A no-op for cells without an address.
    pub fn commit(&self, session: &Session) -> Result<Cell> {
        let Some(address) = self.address()? else {
            return Ok(self.clone());
        };

        let dependencies = self.dependencies()?;
        if dependencies.contains(&address) {
            return Err(Error::SelfEdge(address.to_string()));
        }

        if let Some(factory) = &self.store {
            let store = factory.open(&self.pk)?;
            store.upsert(self.to_record(address.clone())?)?;
            trace!(cell = %address, "persisted");
        }

        session.register(address, self.clone(), dependencies)?;
        Ok(self.clone())
    }
}

/// Load then evaluate every cell inside an argument. A keyed cell seen
/// earlier in the same evaluation is reused rather than evaluated again.
fn resolve(
    arg: &Arg,
    session: &Session,
    force: Force,
    resolved: &mut HashMap<Address, Cell>,
) -> Result<Arg> {
    arg.try_map_cells(&mut |nested: &Cell| {
        let address = nested.address()?;
        if let Some(done) = address.as_ref().and_then(|a| resolved.get(a)) {
            return Ok(done.clone());
        }
        let fresh = nested.load(session, false)?.evaluate(session, force)?;
        if let Some(address) = address {
            resolved.insert(address, fresh.clone());
        }
        Ok(fresh)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Args;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn add(args: &Args) -> Result<Value> {
        let a = args["a"].as_i64().unwrap_or_default();
        let b = args["b"].as_i64().unwrap_or_default();
        Ok(json!(a + b))
    }

    fn counting(counter: Arc<AtomicI32>) -> Cell {
        Cell::new(move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            add(args)
        })
    }

    #[test]
    fn evaluate_computes_and_caches() {
        let session = Session::new();
        let cell = Cell::new(add).arg("a", 1).arg("b", 2).arg("key", "x").pk(["key"]);

        let fresh = cell.evaluate(&session, Force::IfStale).unwrap();
        assert_eq!(fresh.result(), Some(&json!(3)));

        let address = cell.address().unwrap().unwrap();
        assert_eq!(session.cached(&address), Some(fresh.clone()));
        assert_eq!(session.updated_at(&address), fresh.updated());
    }

    #[test]
    fn second_evaluation_is_a_no_op() {
        let session = Session::new();
        let calls = Arc::new(AtomicI32::new(0));
        let cell = counting(calls.clone()).arg("a", 1).arg("b", 1).arg("key", "k").pk(["key"]);

        let first = cell.evaluate(&session, Force::IfStale).unwrap();
        let second = first.evaluate(&session, Force::IfStale).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        let address = cell.address().unwrap().unwrap();
        assert_eq!(session.updated_at(&address), first.updated());
    }

    #[test]
    fn force_one_recomputes_only_this_node() {
        let session = Session::new();
        let inner_calls = Arc::new(AtomicI32::new(0));
        let outer_calls = Arc::new(AtomicI32::new(0));

        let inner = counting(inner_calls.clone()).arg("a", 1).arg("b", 2);
        let outer = counting(outer_calls.clone()).arg("a", inner).arg("b", 10);

        let outer = outer.evaluate(&session, Force::IfStale).unwrap();
        assert_eq!(outer.result(), Some(&json!(13)));

        outer.evaluate(&session, Force::Levels(1)).unwrap();
        assert_eq!(outer_calls.load(Ordering::SeqCst), 2);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 1);

        outer.evaluate(&session, Force::Levels(2)).unwrap();
        assert_eq!(outer_calls.load(Ordering::SeqCst), 3);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_cells_are_resolved_before_the_function_runs() {
        let session = Session::new();
        let a = Cell::new(add).arg("a", 1).arg("b", 2);
        let b = Cell::new(add).arg("a", a.clone()).arg("b", a);

        let b = b.evaluate(&session, Force::IfStale).unwrap();
        assert_eq!(b.result(), Some(&json!(6)));

        // The nested argument now carries its own result
        let Some(Arg::Cell(inner)) = b.get("a") else {
            panic!("expected a cell argument");
        };
        assert_eq!(inner.result(), Some(&json!(3)));
    }

    #[test]
    fn detached_evaluation_leaves_the_session_alone() {
        let session = Session::new();
        let inner = Cell::data(json!(4)).arg("key", "inner").pk(["key"]);
        let cell = Cell::new(add)
            .arg("a", inner)
            .arg("b", 1)
            .arg("key", "outer")
            .pk(["key"]);

        let fresh = cell.evaluate(&session, Force::Detached).unwrap();
        assert_eq!(fresh.result(), Some(&json!(5)));
        assert_eq!(session.cache_len(), 0);
        assert_eq!(session.dag(None).edge_count(), 0);
    }

    #[test]
    fn detached_evaluation_needs_evaluated_inputs() {
        let session = Session::new();
        let inner = Cell::new(add).arg("a", 1).arg("b", 1);
        let cell = Cell::new(add).arg("a", inner).arg("b", 1);

        let err = cell.evaluate(&session, Force::Detached).unwrap_err();
        assert!(matches!(err, Error::Unevaluated(_)));
    }

    #[test]
    fn failure_commits_nothing() {
        let session = Session::new();
        let cell = Cell::new(|_| Err(Error::computation("boom")))
            .arg("key", "bad")
            .pk(["key"]);

        let err = cell.evaluate(&session, Force::IfStale).unwrap_err();
        assert!(matches!(err, Error::Computation(ref m) if m == "boom"));

        let address = cell.address().unwrap().unwrap();
        assert!(session.cached(&address).is_none());
        assert!(session.updated_at(&address).is_none());
    }

    #[test]
    fn failure_keeps_the_previous_commit() {
        let session = Session::new();
        let good = Cell::new(add).arg("a", 1).arg("b", 1).arg("key", "k").pk(["key"]);
        let committed = good.evaluate(&session, Force::IfStale).unwrap();

        let bad = Cell::new(|_| Err(Error::computation("boom")))
            .arg("key", "k")
            .pk(["key"]);
        assert!(bad.evaluate(&session, Force::IfStale).is_err());

        let address = good.address().unwrap().unwrap();
        assert_eq!(session.cached(&address), Some(committed.clone()));
        assert_eq!(session.updated_at(&address), committed.updated());
    }

    #[test]
    fn async_function_is_rejected() {
        let session = Session::new();
        let cell = Cell::new_async(|_| async { Ok(json!(1)) });
        let err = cell.evaluate(&session, Force::IfStale).unwrap_err();
        assert!(matches!(err, Error::AsyncInSyncContext(_)));
    }

    #[test]
    fn load_prefers_the_graph_cache() {
        let session = Session::new();
        let cell = Cell::new(add).arg("a", 1).arg("b", 2).arg("key", "k").pk(["key"]);
        let fresh = cell.evaluate(&session, Force::IfStale).unwrap();

        let loaded = cell.load(&session, false).unwrap();
        assert_eq!(loaded, fresh);
        assert!(!loaded.needs_recompute());
    }

    #[test]
    fn load_with_detach_strips_the_subtree() {
        let session = Session::new();
        let a = Cell::new(add).arg("a", 1).arg("b", 2).arg("key", "a").pk(["key"]);
        let b = Cell::new(add).arg("a", a.clone()).arg("b", 1).arg("key", "b").pk(["key"]);
        b.evaluate(&session, Force::IfStale).unwrap();
        assert_eq!(session.cache_len(), 2);

        let detached = b.load(&session, true).unwrap();
        assert_eq!(detached.result(), Some(&json!(4)));
        assert_eq!(session.cache_len(), 0);
    }

    #[test]
    fn data_cells_need_no_function() {
        let session = Session::new();
        let cell = Cell::data(json!("hello"));
        let same = cell.evaluate(&session, Force::Levels(1)).unwrap();
        assert_eq!(same.result(), Some(&json!("hello")));
    }

    #[test]
    fn commit_records_implicit_edges() {
        let session = Session::new();
        let a = Cell::new(add).arg("a", 1).arg("b", 2).arg("key", "a").pk(["key"]);
        let b = Cell::new(add).arg("a", a.clone()).arg("b", a).arg("key", "b").pk(["key"]);
        b.evaluate(&session, Force::IfStale).unwrap();

        let dag = session.dag(None);
        let a_addr = crate::Address::from_pairs([("key", json!("a"))]);
        let b_addr = crate::Address::from_pairs([("key", json!("b"))]);
        assert!(dag.contains_edge(&a_addr, &b_addr));
        assert_eq!(dag.edge_count(), 1);
    }

    #[test]
    fn held_handle_defers_to_newer_cache_entry() {
        let session = Session::new();
        let a = Cell::new(add).arg("a", 1).arg("b", 2).arg("key", "a").pk(["key"]);
        let d = Cell::new(add).arg("a", a.clone()).arg("b", 0).arg("key", "d").pk(["key"]);
        let d = d.evaluate(&session, Force::IfStale).unwrap();
        assert_eq!(d.result(), Some(&json!(3)));

        session.push(&a.arg("a", 3)).unwrap();

        let again = d.evaluate(&session, Force::IfStale).unwrap();
        assert_eq!(again.result(), Some(&json!(5)));
        let address = d.address().unwrap().unwrap();
        assert_eq!(session.cached(&address), Some(again));
    }

    #[test]
    fn shared_keyed_input_is_forced_once() {
        let session = Session::new();
        let calls = Arc::new(AtomicI32::new(0));
        let a = counting(calls.clone()).arg("a", 1).arg("b", 2).arg("key", "a").pk(["key"]);
        let b = Cell::new(add).arg("a", a.clone()).arg("b", a);

        let b = b.evaluate(&session, Force::IfStale).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let b = b.evaluate(&session, Force::Levels(2)).unwrap();
        assert_eq!(b.result(), Some(&json!(6)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn load_clears_anonymous_cells_over_changed_inputs() {
        let session = Session::new();
        let a = Cell::new(add).arg("a", 1).arg("b", 2).arg("key", "a").pk(["key"]);
        let anonymous = Cell::new(add).arg("a", a.clone()).arg("b", 100);
        let d = Cell::new(add).arg("a", anonymous).arg("b", 0).arg("key", "d").pk(["key"]);
        let d = d.evaluate(&session, Force::IfStale).unwrap();
        assert_eq!(d.result(), Some(&json!(103)));

        // Nothing changed yet, so the anonymous cell keeps its result
        let loaded = d.load(&session, false).unwrap();
        let Some(Arg::Cell(inner)) = loaded.get("a") else {
            panic!("expected a cell argument");
        };
        assert!(inner.has_result());

        a.arg("a", 3).evaluate(&session, Force::IfStale).unwrap();
        let loaded = d.load(&session, false).unwrap();
        let Some(Arg::Cell(inner)) = loaded.get("a") else {
            panic!("expected a cell argument");
        };
        assert!(!inner.has_result());

        let d = loaded.evaluate(&session, Force::Levels(1)).unwrap();
        assert_eq!(d.result(), Some(&json!(105)));
    }
}
