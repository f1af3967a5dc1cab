//! Waiter
//!
//! Resolves an arbitrarily nested structure of possibly-deferred values into
//! a structurally identical tree of plain values.
//!
//! Siblings at every level are joined concurrently: a tree of N independent
//! deferred leaves completes when its slowest leaf does, not after the sum
//! of all of them. The first failure wins and is returned unchanged; the
//! remaining siblings are dropped.

use futures_util::future::{self, try_join_all, BoxFuture};
use futures_util::FutureExt;
use indexmap::IndexMap;

use crate::error::Result;

/// A tree whose leaves may still be pending.
pub enum Waitable<'a, T> {
    /// Already available.
    Ready(T),

    /// Available once the future completes.
    Pending(BoxFuture<'a, Result<T>>),

    /// A sequence of subtrees.
    Seq(Vec<Waitable<'a, T>>),

    /// A mapping of subtrees.
    Map(IndexMap<String, Waitable<'a, T>>),
}

impl<'a, T> Waitable<'a, T> {
    /// Wrap a future as a pending leaf.
    pub fn pending<F>(future: F) -> Self
    where
        F: std::future::Future<Output = Result<T>> + Send + 'a,
    {
        Waitable::Pending(future.boxed())
    }
}

/// A fully resolved tree, same shape as the [`Waitable`] it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    Leaf(T),
    Seq(Vec<Resolved<T>>),
    Map(IndexMap<String, Resolved<T>>),
}

impl<T> Resolved<T> {
    /// Flatten every leaf in depth-first order.
    pub fn into_leaves(self) -> Vec<T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(self, out: &mut Vec<T>) {
        match self {
            Resolved::Leaf(value) => out.push(value),
            Resolved::Seq(items) => items.into_iter().for_each(|r| r.collect_leaves(out)),
            Resolved::Map(entries) => entries.into_values().for_each(|r| r.collect_leaves(out)),
        }
    }
}

/// Resolve every pending leaf, joining siblings concurrently.
pub fn wait<'a, T>(tree: Waitable<'a, T>) -> BoxFuture<'a, Result<Resolved<T>>>
where
    T: Send + 'a,
{
    match tree {
        Waitable::Ready(value) => future::ready(Ok(Resolved::Leaf(value))).boxed(),
        Waitable::Pending(fut) => fut.map(|r| r.map(Resolved::Leaf)).boxed(),
        Waitable::Seq(items) => try_join_all(items.into_iter().map(wait))
            .map(|r| r.map(Resolved::Seq))
            .boxed(),
        Waitable::Map(entries) => {
            let (keys, values): (Vec<String>, Vec<Waitable<'a, T>>) = entries.into_iter().unzip();
            try_join_all(values.into_iter().map(wait))
                .map(move |r| r.map(|values| Resolved::Map(keys.into_iter().zip(values).collect())))
                .boxed()
        }
    }
}

/// Resolve a flat batch of futures concurrently, preserving order.
pub async fn wait_all<'a, T>(futures: Vec<BoxFuture<'a, Result<T>>>) -> Result<Vec<T>>
where
    T: Send + 'a,
{
    let tree = Waitable::Seq(futures.into_iter().map(Waitable::Pending).collect());
    Ok(wait(tree).await?.into_leaves())
}
