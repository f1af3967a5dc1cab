//! Asynchronous evaluation.
//!
//! Same contract as the synchronous path, but nested cell arguments are
//! resolved concurrently through the waiter and async functions are awaited.
//! Every session mutation for a node happens after its last suspension
//! point, so dropping an in-flight evaluation leaves nothing behind for that
//! node.

use std::collections::HashMap;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use indexmap::IndexMap;
use tracing::{debug, trace};

use super::waiter::{wait, Resolved, Waitable};
use super::{Arg, Cell, Force, Function, Plan};
use crate::error::{Error, Result};
use crate::graph::Address;
use crate::Session;

impl Cell {
    /// Non-blocking counterpart of [`Cell::evaluate`].
    pub fn evaluate_async<'a>(
        &'a self,
        session: &'a Session,
        force: Force,
    ) -> BoxFuture<'a, Result<Cell>> {
        async move {
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
                Plan::Run(function) => function,
            };

            let args = if force == Force::Detached {
                current.args.clone()
            } else {
                let child = force.child();
                let mut shared = HashMap::new();
                let tree = Waitable::Map(
                    current
                        .args
                        .iter()
                        .map(|(k, a)| Ok((k.clone(), pending(a, session, child, &mut shared)?)))
                        .collect::<Result<_>>()?,
                );
                match wait(tree).await? {
                    Resolved::Map(entries) => entries
                        .into_iter()
                        .map(|(k, r)| (k, into_arg(r)))
                        .collect::<IndexMap<_, _>>(),
                    other => return Err(Error::computation(format!(
                        "argument tree changed shape: {other:?}"
                    ))),
                }
            };

            debug!(cell = %current.label(), ?force, "recomputing");
            let inputs = Cell::inputs(&args)?;
            let value = match function {
                Function::Sync(f) => f(&inputs)?,
                Function::Async(f) => f(inputs).await?,
            };
            let fresh = current.computed(args, value)?;

            if force == Force::Detached {
                return Ok(fresh);
            }
            fresh.commit(session)
        }
        .boxed()
    }

    /// Non-blocking counterpart of [`Cell::load`].
    ///
    /// Loading reads the graph cache and the store's live record, neither of
    /// which suspends. The returned future is always ready on its first poll.
    pub async fn load_async(&self, session: &Session, detach: bool) -> Result<Cell> {
        self.load(session, detach)
    }
}

type SharedCell<'a> = Shared<BoxFuture<'a, Result<Cell>>>;

/// Turn an argument into a waitable tree: cells become pending leaves that
/// load then evaluate, everything else is ready. Every leaf holding the same
/// keyed cell awaits one shared evaluation.
fn pending<'a>(
    arg: &'a Arg,
    session: &'a Session,
    force: Force,
    shared: &mut HashMap<Address, SharedCell<'a>>,
) -> Result<Waitable<'a, Arg>> {
    Ok(match arg {
        Arg::Data(_) => Waitable::Ready(arg.clone()),
        Arg::Cell(cell) => {
            let resolve = async move {
                let loaded = cell.load(session, false)?;
                loaded.evaluate_async(session, force).await
            };
            let leaf = match cell.address()? {
                None => resolve.boxed(),
                Some(address) => shared
                    .entry(address)
                    .or_insert_with(|| resolve.boxed().shared())
                    .clone()
                    .boxed(),
            };
            Waitable::pending(leaf.map(|r| r.map(|c| Arg::Cell(Box::new(c)))))
        }
        Arg::List(items) => Waitable::Seq(
            items
                .iter()
                .map(|a| pending(a, session, force, shared))
                .collect::<Result<_>>()?,
        ),
        Arg::Map(entries) => Waitable::Map(
            entries
                .iter()
                .map(|(k, a)| Ok((k.clone(), pending(a, session, force, shared)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

fn into_arg(resolved: Resolved<Arg>) -> Arg {
    match resolved {
        Resolved::Leaf(arg) => arg,
        Resolved::Seq(items) => Arg::List(items.into_iter().map(into_arg).collect()),
        Resolved::Map(entries) => Arg::Map(
            entries
                .into_iter()
                .map(|(k, r)| (k, into_arg(r)))
                .collect(),
        ),
    }
}
