//! Session
//!
//! The session owns every piece of mutable graph state:
//!
//! - the graph cache (address -> last computed cell),
//! - the recency registry (address -> last computation time),
//! - named dependency registries,
//! - the set of addresses a push sweep has invalidated but not yet
//!   recomputed.
//!
//! Cells never hold a reference to the session; it is passed explicitly to
//! every lifecycle operation.
//!
//! # Push
//!
//! A push recomputes a cell, orders its transitive dependents by
//! generation and recomputes them from the graph cache one generation at a
//! time. A sweep is not transactional: when a dependent fails, earlier
//! generations stay committed and the remaining addresses stay pending.
//!
//! Pushes on one session are serialized (sync pushes among themselves,
//! async pushes among themselves). Nothing is coordinated across
//! processes; the store sees last-writer-wins per address.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::cell::waiter::wait_all;
use crate::cell::{Cell, Force};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::graph::{Address, Dag};
use crate::store::Store;

/// Graph state shared by every cell evaluated against it.
#[derive(Default)]
pub struct Session {
    config: SessionConfig,
    cache: DashMap<Address, Cell>,
    recency: DashMap<Address, DateTime<Utc>>,
    registries: RwLock<HashMap<String, Dag<Address>>>,
    pending: DashSet<Address>,
    push_lock: Mutex<()>,
    push_gate: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Graph cache
    // ------------------------------------------------------------------

    /// The last computed cell at `address`.
    pub fn cached(&self, address: &Address) -> Option<Cell> {
        self.cache.get(address).map(|c| c.value().clone())
    }

    /// When the cell at `address` was last computed.
    pub fn updated_at(&self, address: &Address) -> Option<DateTime<Utc>> {
        self.recency.get(address).map(|t| *t.value())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.cache.contains_key(address)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Record a freshly computed cell and the addresses it was derived from.
    pub(crate) fn register(
        &self,
        address: Address,
        cell: Cell,
        dependencies: Vec<Address>,
    ) -> Result<()> {
        let updated = cell.updated().unwrap_or_else(Utc::now);

        if self.config.track_edges && !dependencies.is_empty() {
            let mut registries = self.registries.write();
            let dag = registries
                .entry(self.config.default_registry.clone())
                .or_default();
            for dependency in dependencies {
                dag.add_edge(dependency, address.clone(), self.config.edge_weight)?;
            }
        }

        self.cache.insert(address.clone(), cell);
        self.recency.insert(address.clone(), updated);
        trace!(cell = %address, %updated, "registered");
        Ok(())
    }

    /// Drop a cell and, up to `depth` levels down, its nested cells from the
    /// graph cache. Returns the cell, now disconnected.
    pub fn detach(&self, cell: &Cell, depth: usize) -> Result<Cell> {
        if let Some(address) = cell.address()? {
            self.evict(&address);
        }
        if depth > 0 {
            for nested in cell.nested_cells() {
                self.detach(nested, depth - 1)?;
            }
        }
        Ok(cell.clone())
    }

    /// Remove one address from the graph cache and recency registry.
    pub fn evict(&self, address: &Address) -> Option<Cell> {
        self.recency.remove(address);
        self.cache.remove(address).map(|(_, cell)| cell)
    }

    /// Empty the graph cache and recency registry. Edges are kept.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.recency.clear();
    }

    // ------------------------------------------------------------------
    // Dependency registries
    // ------------------------------------------------------------------

    fn registry_name<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.config.default_registry)
    }

    /// Add an edge with the configured weight: `dependent` is derived from
    /// `dependency`.
    pub fn add_edge(
        &self,
        dependency: Address,
        dependent: Address,
        registry: Option<&str>,
    ) -> Result<()> {
        self.add_weighted_edge(dependency, dependent, self.config.edge_weight, registry)
    }

    pub fn add_weighted_edge(
        &self,
        dependency: Address,
        dependent: Address,
        weight: f64,
        registry: Option<&str>,
    ) -> Result<()> {
        let name = self.registry_name(registry).to_string();
        self.registries
            .write()
            .entry(name)
            .or_default()
            .add_edge(dependency, dependent, weight)
    }

    /// Returns whether the edge existed.
    pub fn remove_edge(
        &self,
        dependency: &Address,
        dependent: &Address,
        registry: Option<&str>,
    ) -> bool {
        let name = self.registry_name(registry);
        match self.registries.write().get_mut(name) {
            Some(dag) => dag.remove_edge(dependency, dependent),
            None => false,
        }
    }

    /// A copy of the named registry, or of the default one for `None`.
    pub fn dag(&self, registry: Option<&str>) -> Dag<Address> {
        let name = self.registry_name(registry);
        self.registries.read().get(name).cloned().unwrap_or_default()
    }

    fn with_dag<T>(&self, registry: Option<&str>, f: impl FnOnce(&Dag<Address>) -> T) -> T {
        let name = self.registry_name(registry);
        let registries = self.registries.read();
        match registries.get(name) {
            Some(dag) => f(dag),
            None => f(&Dag::new()),
        }
    }

    pub fn topological_order(
        &self,
        node: &Address,
        registry: Option<&str>,
    ) -> Result<IndexMap<Address, usize>> {
        self.with_dag(registry, |dag| dag.topological_order(node))
    }

    pub fn generations(&self, node: &Address, registry: Option<&str>) -> Result<Vec<Vec<Address>>> {
        self.with_dag(registry, |dag| dag.generations(node))
    }

    pub fn descendants(
        &self,
        node: &Address,
        include_self: bool,
        registry: Option<&str>,
    ) -> Vec<Address> {
        self.with_dag(registry, |dag| dag.descendants(node, include_self))
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// Recompute `cell` and every cell derived from it, in dependency order.
    pub fn push(&self, cell: &Cell) -> Result<Cell> {
        let _guard = self.push_lock.lock();

        let fresh = cell.evaluate(self, Force::Levels(1))?;
        let Some(address) = fresh.address()? else {
            return Ok(fresh);
        };
        let generations = self.invalidate(&address)?;

        for (level, nodes) in generations.iter().enumerate().skip(1) {
            debug!(source = %address, generation = level, size = nodes.len(), "pushing generation");
            for node in nodes {
                self.recompute(node)?;
            }
        }

        self.clear();
        Ok(fresh)
    }

    /// Non-blocking counterpart of [`Session::push`]. Cells of one
    /// generation are recomputed concurrently.
    pub async fn push_async(&self, cell: &Cell) -> Result<Cell> {
        let _guard = self.push_gate.lock().await;

        let fresh = cell.evaluate_async(self, Force::Levels(1)).await?;
        let Some(address) = fresh.address()? else {
            return Ok(fresh);
        };
        let generations = self.invalidate(&address)?;

        for (level, nodes) in generations.iter().enumerate().skip(1) {
            debug!(source = %address, generation = level, size = nodes.len(), "pushing generation");
            wait_all(nodes.iter().map(|n| self.recompute_async(n)).collect()).await?;
        }

        self.clear();
        Ok(fresh)
    }

    /// Order the dependents of `address` and mark them pending.
    fn invalidate(&self, address: &Address) -> Result<Vec<Vec<Address>>> {
        let generations = self.generations(address, None)?;
        for node in generations.iter().skip(1).flatten() {
            self.pending.insert(node.clone());
        }
        info!(source = %address, dependents = self.pending.len(), "push started");
        Ok(generations)
    }

    fn recompute(&self, address: &Address) -> Result<Cell> {
        let cached = self.cached(address).ok_or_else(|| Error::not_found(address))?;
        let fresh = cached.evaluate(self, Force::Levels(1))?;
        self.pending.remove(address);
        Ok(fresh)
    }

    fn recompute_async<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Result<Cell>> {
        async move {
            let cached = self.cached(address).ok_or_else(|| Error::not_found(address))?;
            let fresh = cached.evaluate_async(self, Force::Levels(1)).await?;
            self.pending.remove(address);
            Ok(fresh)
        }
        .boxed()
    }

    /// Mark the current sweep complete.
    pub fn clear(&self) {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "clearing pending addresses");
        }
        self.pending.clear();
    }

    /// Addresses invalidated by a sweep and not yet recomputed.
    pub fn pending(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self.pending.iter().map(|a| a.key().clone()).collect();
        out.sort();
        out
    }

    pub fn is_pending(&self, address: &Address) -> bool {
        self.pending.contains(address)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Find a cell by its key fields.
    ///
    /// Without a cutoff the graph cache is consulted first. A store, when
    /// given, answers everything else, as of the cutoff if there is one.
    pub fn get_cell(&self, lookup: &Lookup) -> Result<Cell> {
        let address = lookup.address();
        if lookup.as_of.is_none() {
            if let Some(cached) = self.cached(&address) {
                return Ok(cached);
            }
        }
        if let Some(store) = &lookup.store {
            if let Some(record) = store.read_as_of(&address, lookup.as_of)? {
                return Ok(Cell::from_record(record));
            }
        }
        Err(Error::not_found(&address))
    }

    /// The `data` slot of the cell [`Session::get_cell`] finds.
    pub fn get_data(&self, lookup: &Lookup) -> Result<Value> {
        let cell = self.get_cell(lookup)?;
        cell.result()
            .cloned()
            .ok_or_else(|| Error::Unevaluated(lookup.address().to_string()))
    }
}

/// Query for [`Session::get_cell`].
#[derive(Clone, Default)]
pub struct Lookup {
    pub store: Option<Arc<dyn Store>>,
    pub as_of: Option<DateTime<Utc>>,
    pub fields: Vec<(String, Value)>,
}

impl Lookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match one key field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn as_of(mut self, cutoff: DateTime<Utc>) -> Self {
        self.as_of = Some(cutoff);
        self
    }

    pub fn address(&self) -> Address {
        Address::from_pairs(self.fields.iter().cloned())
    }
}
