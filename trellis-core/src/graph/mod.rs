//! Dependency Graph
//!
//! This module implements the address model and the dependency graph that
//! tracks which cells are derived from which.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are cell addresses
//! - Edges represent derivation: if B is computed from A, there is an edge
//!   from A to B
//!
//! When a cell is pushed, we order its reachable dependents by generation
//! and recompute them strictly in that order.
//!
//! # Design Decisions
//!
//! 1. Nodes are identified by [`Address`], the canonical form of a cell's
//!    primary key, so two cells with the same key are the same node.
//!
//! 2. The graph is generic over the node type, which keeps the ordering
//!    logic testable without building cells.
//!
//! 3. We maintain both forward (dependents) and reverse (dependencies) edges
//!    so edge and node removal never scan the whole graph.

mod address;
mod dag;

pub use address::Address;
pub use dag::Dag;
