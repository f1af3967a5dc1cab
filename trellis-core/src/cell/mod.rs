//! Cells
//!
//! A cell is a memoized computation node: a function, its keyword arguments
//! (which may themselves be cells), the cached result and the rule deciding
//! when that result is stale.
//!
//! # Lifecycle
//!
//! Cells are values. Every lifecycle operation returns a new cell rather
//! than mutating the receiver:
//!
//! 1. `load` swaps the cell and its nested cell arguments for the latest
//!    computed versions held by the session (or the store, for durable
//!    cells).
//!
//! 2. `evaluate` recomputes when the staleness policy or the forcing level
//!    asks for it, resolving every nested cell argument first.
//!
//! 3. `commit` publishes the result: store first, then graph cache and
//!    recency registry, then the implicit dependency edges.
//!
//! A node either commits all of result, recency and cache entry, or none of
//! them. A failing function leaves the session untouched for its address.
//!
//! # Sync and async
//!
//! [`Cell::evaluate`] runs on the caller's thread and resolves arguments one
//! after another. [`Cell::evaluate_async`] resolves sibling arguments
//! concurrently through the [`waiter`] and awaits async functions.

mod arg;
mod nonblocking;
mod period;
mod policy;
mod snapshot;
mod sync;
pub mod waiter;

pub use arg::Arg;
pub use period::Period;
pub use policy::Staleness;
pub use snapshot::{Snapshot, SnapshotArg};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::graph::Address;
use crate::store::{Record, StoreFactory};

/// Resolved keyword arguments, as seen by a wrapped function.
pub type Args = IndexMap<String, Value>;

/// Name of the result slot used when a function declares no outputs.
pub const DATA: &str = "data";

type SyncFn = dyn Fn(&Args) -> Result<Value> + Send + Sync;
type AsyncFn = dyn Fn(Args) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// The function wrapped by a cell.
#[derive(Clone)]
pub enum Function {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Sync(_) => f.write_str("Function::Sync"),
            Function::Async(_) => f.write_str("Function::Async"),
        }
    }
}

/// How hard `evaluate` pushes for a fresh result.
///
/// Converts from the integer encoding: `-1` detached, `0` if stale, `n > 0`
/// forces this node and `n - 1` levels of nested cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Force {
    /// Recompute this node from its arguments' current results without
    /// loading, evaluating or committing anything.
    Detached,

    /// Recompute only if the staleness policy says so.
    #[default]
    IfStale,

    /// Recompute unconditionally; nested cells receive one level less.
    Levels(u32),
}

impl Force {
    /// Forcing handed to nested cell arguments.
    pub fn child(self) -> Force {
        match self {
            Force::Detached => Force::Detached,
            Force::IfStale | Force::Levels(0) | Force::Levels(1) => Force::IfStale,
            Force::Levels(n) => Force::Levels(n - 1),
        }
    }

    fn is_forced(self) -> bool {
        matches!(self, Force::Detached | Force::Levels(1..))
    }
}

impl From<i32> for Force {
    fn from(level: i32) -> Self {
        match level {
            i32::MIN..=-1 => Force::Detached,
            0 => Force::IfStale,
            n => Force::Levels(n.unsigned_abs()),
        }
    }
}

/// A memoized computation node.
#[derive(Clone)]
pub struct Cell {
    function: Option<Function>,
    args: IndexMap<String, Arg>,
    pk: Vec<String>,
    outputs: Option<Vec<String>>,
    results: IndexMap<String, Value>,
    updated: Option<DateTime<Utc>>,
    policy: Staleness,
    store: Option<Arc<dyn StoreFactory>>,
}

impl Cell {
    fn with_function(function: Option<Function>) -> Self {
        Self {
            function,
            args: IndexMap::new(),
            pk: Vec::new(),
            outputs: None,
            results: IndexMap::new(),
            updated: None,
            policy: Staleness::Missing,
            store: None,
        }
    }

    /// Create a cell wrapping a synchronous function.
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(&Args) -> Result<Value> + Send + Sync + 'static,
    {
        Self::with_function(Some(Function::Sync(Arc::new(function))))
    }

    /// Create a cell wrapping an asynchronous function.
    pub fn new_async<F, Fut>(function: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let boxed = move |args: Args| function(args).boxed();
        Self::with_function(Some(Function::Async(Arc::new(boxed))))
    }

    /// A function-less cell already holding `value`.
    pub fn data(value: Value) -> Self {
        let mut cell = Self::with_function(None);
        cell.results.insert(DATA.to_string(), value);
        cell.updated = Some(Utc::now());
        cell
    }

    /// Set a keyword argument.
    ///
    /// Changing an input discards any cached result.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.args.insert(name.into(), value.into());
        if self.function.is_some() {
            self.results.clear();
            self.updated = None;
        }
        self
    }

    /// Declare the primary-key fields.
    pub fn pk<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pk = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declare named outputs for a function returning several values.
    pub fn outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the staleness policy.
    pub fn policy(mut self, policy: Staleness) -> Self {
        self.policy = policy;
        self
    }

    /// Recompute once `period` has elapsed since the last update.
    pub fn periodic(self, period: Period) -> Self {
        self.policy(Staleness::Periodic(period))
    }

    /// Persist through stores opened by `factory`.
    pub fn durable(mut self, factory: Arc<dyn StoreFactory>) -> Self {
        self.store = Some(factory);
        self
    }

    /// Override the last-updated timestamp.
    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = Some(updated);
        self
    }

    /// Rebuild a function-less cell from a persisted record.
    pub fn from_record(record: Record) -> Self {
        let mut cell = Self::with_function(None);
        cell.pk = record.key.fields().map(str::to_string).collect();
        cell.args = record
            .args
            .into_iter()
            .map(|(k, v)| (k, Arg::Data(v)))
            .collect();
        cell.results = record.results;
        cell.updated = Some(record.updated);
        cell
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Canonical identity from the declared key fields, `None` without one.
    pub fn address(&self) -> Result<Option<Address>> {
        Address::for_fields(&self.pk, |field| match self.args.get(field) {
            None => Ok(None),
            Some(Arg::Data(value)) => Ok(Some(value)),
            Some(_) => Err(Error::InvalidKey {
                field: field.to_string(),
            }),
        })
    }

    /// Address for log and error messages.
    pub(crate) fn label(&self) -> String {
        match self.address() {
            Ok(Some(address)) => address.to_string(),
            _ => "<anonymous>".to_string(),
        }
    }

    pub fn function(&self) -> Option<&Function> {
        self.function.as_ref()
    }

    pub fn is_async(&self) -> bool {
        matches!(self.function, Some(Function::Async(_)))
    }

    pub fn args(&self) -> &IndexMap<String, Arg> {
        &self.args
    }

    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.args.get(name)
    }

    pub fn primary_key(&self) -> &[String] {
        &self.pk
    }

    pub fn output_names(&self) -> Option<&[String]> {
        self.outputs.as_deref()
    }

    pub fn staleness(&self) -> &Staleness {
        &self.policy
    }

    pub fn store(&self) -> Option<&Arc<dyn StoreFactory>> {
        self.store.as_ref()
    }

    /// The single `data` result slot.
    pub fn result(&self) -> Option<&Value> {
        self.results.get(DATA)
    }

    /// One named output slot.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.results.get(name)
    }

    /// All result slots.
    pub fn results(&self) -> &IndexMap<String, Value> {
        &self.results
    }

    /// When the result was last computed.
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    /// Whether every result slot the function produces is filled.
    pub fn has_result(&self) -> bool {
        match &self.outputs {
            None => self.results.contains_key(DATA),
            Some(names) => {
                !names.is_empty() && names.iter().all(|n| self.results.contains_key(n))
            }
        }
    }

    /// The value a dependent cell receives: the `data` slot, or an object of
    /// the named outputs.
    pub fn value(&self) -> Result<Value> {
        if !self.has_result() {
            return Err(Error::Unevaluated(self.label()));
        }
        match &self.outputs {
            None => Ok(self.results[DATA].clone()),
            Some(names) => Ok(Value::Object(
                names
                    .iter()
                    .map(|n| (n.clone(), self.results[n.as_str()].clone()))
                    .collect(),
            )),
        }
    }

    /// Whether the staleness policy asks for a recomputation now.
    pub fn needs_recompute(&self) -> bool {
        self.needs_recompute_at(Utc::now())
    }

    /// Whether the staleness policy asks for a recomputation at `now`.
    pub fn needs_recompute_at(&self, now: DateTime<Utc>) -> bool {
        self.policy.needs_recompute(self, now)
    }

    /// Every cell held directly by the arguments.
    pub fn nested_cells(&self) -> Vec<&Cell> {
        self.args.values().flat_map(Arg::cells).collect()
    }

    /// Addresses this cell is derived from.
    ///
    /// Anonymous nested cells are looked through, so their addressed inputs
    /// count as direct dependencies.
    pub fn dependencies(&self) -> Result<Vec<Address>> {
        let mut out = Vec::new();
        for nested in self.nested_cells() {
            match nested.address()? {
                Some(address) => {
                    if !out.contains(&address) {
                        out.push(address);
                    }
                }
                None => {
                    for address in nested.dependencies()? {
                        if !out.contains(&address) {
                            out.push(address);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Shared evaluation steps
    // ------------------------------------------------------------------

    /// Rebuild with every nested cell argument replaced by `f`.
    pub(crate) fn try_map_cells<F>(&self, mut f: F) -> Result<Cell>
    where
        F: FnMut(&Cell) -> Result<Cell>,
    {
        let mut out = self.clone();
        out.args = self
            .args
            .iter()
            .map(|(k, a)| Ok((k.clone(), a.try_map_cells(&mut f)?)))
            .collect::<Result<_>>()?;
        Ok(out)
    }

    /// Plain inputs for the wrapped function.
    fn inputs(args: &IndexMap<String, Arg>) -> Result<Args> {
        args.iter()
            .map(|(k, a)| Ok((k.clone(), a.to_input()?)))
            .collect()
    }

    /// Split a function's return value across the result slots.
    fn split(&self, value: Value) -> Result<IndexMap<String, Value>> {
        let Some(names) = &self.outputs else {
            return Ok(IndexMap::from([(DATA.to_string(), value)]));
        };
        match value {
            Value::Array(items) if items.len() == names.len() => {
                Ok(names.iter().cloned().zip(items).collect())
            }
            Value::Object(mut map) if names.iter().all(|n| map.contains_key(n)) => Ok(names
                .iter()
                .map(|n| (n.clone(), map.remove(n).unwrap_or(Value::Null)))
                .collect()),
            other => Err(Error::OutputMismatch {
                expected: names.len(),
                got: describe(&other),
            }),
        }
    }

    /// A copy carrying freshly computed results.
    fn computed(&self, args: IndexMap<String, Arg>, value: Value) -> Result<Cell> {
        let results = self.split(value)?;
        let mut fresh = self.clone();
        fresh.args = args;
        fresh.results = results;
        fresh.updated = Some(Utc::now());
        Ok(fresh)
    }

    /// What `evaluate` should do before resolving any argument.
    fn plan(&self, force: Force) -> Plan {
        if !force.is_forced() && !self.needs_recompute() {
            return Plan::Keep;
        }
        match &self.function {
            Some(function) => Plan::Run(function.clone()),
            None if self.has_result() => Plan::Keep,
            None => Plan::Missing,
        }
    }

    /// The cached or persisted version of this cell alone.
    fn fetch(&self, session: &crate::Session) -> Result<Option<Cell>> {
        let Some(address) = self.address()? else {
            return Ok(None);
        };
        if let Some(cached) = session.cached(&address) {
            return Ok(Some(cached));
        }
        if let Some(factory) = &self.store {
            let store = factory.open(&self.pk)?;
            if let Some(record) = store.read_as_of(&address, None)? {
                let mut loaded = self.clone();
                loaded.results = record.results;
                loaded.updated = Some(record.updated);
                return Ok(Some(loaded));
            }
        }
        Ok(None)
    }

    /// The version evaluation starts from. A handle already holding a result
    /// defers to a newer graph-cache entry at its address; a handle without
    /// one carries the caller's new inputs and is kept.
    fn latest(&self, session: &crate::Session) -> Result<Cell> {
        if !self.has_result() {
            return Ok(self.clone());
        }
        let Some(address) = self.address()? else {
            return Ok(self.clone());
        };
        match session.cached(&address) {
            Some(cached) if cached.updated > self.updated => Ok(cached),
            _ => Ok(self.clone()),
        }
    }

    /// Swap nested cells for their cached or persisted versions.
    ///
    /// Anonymous nested cells are never cached, so they are looked through
    /// instead. An anonymous cell whose inputs moved on loses its result.
    fn refresh(&self, session: &crate::Session) -> Result<Cell> {
        let mut moved = false;
        let mut out = self.try_map_cells(|nested| {
            let current = match nested.address()? {
                Some(_) => nested.fetch(session)?.unwrap_or_else(|| nested.clone()),
                None => nested.refresh(session)?,
            };
            if current.updated != nested.updated || current.results != nested.results {
                moved = true;
            }
            Ok(current)
        })?;

        if moved && out.function.is_some() && out.address()?.is_none() {
            out.results.clear();
            out.updated = None;
        }
        Ok(out)
    }

    /// The record persisted for this cell.
    pub(crate) fn to_record(&self, key: Address) -> Result<Record> {
        let updated = self
            .updated
            .ok_or_else(|| Error::Unevaluated(key.to_string()))?;
        Ok(Record {
            key,
            args: self
                .args
                .iter()
                .filter_map(|(k, a)| a.as_plain().map(|v| (k.clone(), v)))
                .collect(),
            results: self.results.clone(),
            updated,
            deleted: None,
        })
    }
}

enum Plan {
    Keep,
    Run(Function),
    Missing,
}

fn describe(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("array of {}", items.len()),
        Value::Object(map) => format!("object with keys {:?}", map.keys().collect::<Vec<_>>()),
        other => format!("scalar {other}"),
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("address", &self.label())
            .field("function", &self.function)
            .field("args", &self.args)
            .field("results", &self.results)
            .field("updated", &self.updated)
            .field("policy", &self.policy)
            .field("durable", &self.store.is_some())
            .finish()
    }
}

/// Cells compare by data: arguments, key, outputs, results and update time.
impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.args == other.args
            && self.pk == other.pk
            && self.outputs == other.outputs
            && self.results == other.results
            && self.updated == other.updated
            && self.policy == other.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn force_from_integers() {
        assert_eq!(Force::from(-1), Force::Detached);
        assert_eq!(Force::from(0), Force::IfStale);
        assert_eq!(Force::from(1), Force::Levels(1));
        assert_eq!(Force::from(3).child(), Force::Levels(2));
        assert_eq!(Force::from(1).child(), Force::IfStale);
        assert_eq!(Force::Detached.child(), Force::Detached);
    }

    #[test]
    fn address_comes_from_key_fields() {
        let cell = Cell::new(|_| Ok(json!(0)))
            .arg("key", "a")
            .arg("x", 1)
            .pk(["key"]);
        let address = cell.address().unwrap().unwrap();
        assert_eq!(address, Address::from_pairs([("key", json!("a"))]));

        let anonymous = Cell::new(|_| Ok(json!(0))).arg("x", 1);
        assert!(anonymous.address().unwrap().is_none());
    }

    #[test]
    fn cell_valued_key_is_rejected() {
        let cell = Cell::new(|_| Ok(json!(0)))
            .arg("key", Cell::data(json!("a")))
            .pk(["key"]);
        assert!(matches!(cell.address(), Err(Error::InvalidKey { .. })));
    }

    #[test]
    fn missing_key_is_rejected() {
        let cell = Cell::new(|_| Ok(json!(0))).pk(["key"]);
        assert!(matches!(cell.address(), Err(Error::MissingKey { .. })));
    }

    #[test]
    fn outputs_split_arrays_and_objects() {
        let cell = Cell::new(|_| Ok(json!(0))).outputs(["lo", "hi"]);

        let slots = cell.split(json!([1, 2])).unwrap();
        assert_eq!(slots["lo"], json!(1));
        assert_eq!(slots["hi"], json!(2));

        let slots = cell.split(json!({"hi": 9, "lo": 8, "extra": 0})).unwrap();
        assert_eq!(slots.keys().collect::<Vec<_>>(), vec!["lo", "hi"]);

        assert!(matches!(
            cell.split(json!([1, 2, 3])),
            Err(Error::OutputMismatch { expected: 2, .. })
        ));
    }

    #[test]
    fn value_of_multi_output_cell_is_an_object() {
        let cell = Cell::new(|_| Ok(json!(0))).outputs(["lo", "hi"]);
        let fresh = cell.computed(IndexMap::new(), json!([1, 2])).unwrap();
        assert!(fresh.has_result());
        assert_eq!(fresh.value().unwrap(), json!({"lo": 1, "hi": 2}));
    }

    #[test]
    fn changing_an_input_discards_the_result() {
        let cell = Cell::new(|_| Ok(json!(0)));
        let fresh = cell.computed(IndexMap::new(), json!(1)).unwrap();
        assert!(fresh.has_result());

        let changed = fresh.arg("x", 2);
        assert!(!changed.has_result());
        assert!(changed.updated().is_none());
    }

    #[test]
    fn dependencies_look_through_anonymous_cells() {
        let keyed = Cell::data(json!(1)).arg("key", "k").pk(["key"]);
        let anonymous = Cell::new(|_| Ok(json!(0))).arg("inner", keyed.clone());
        let outer = Cell::new(|_| Ok(json!(0)))
            .arg("a", anonymous)
            .arg("b", keyed);

        let deps = outer.dependencies().unwrap();
        assert_eq!(deps, vec![Address::from_pairs([("key", json!("k"))])]);
    }
}
