//! Staleness policies.
//!
//! A policy answers one question: must this cell recompute before use? It
//! never suppresses errors, it only avoids unnecessary invocations.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Cell, Period};

type Predicate = dyn Fn(&Cell, DateTime<Utc>) -> bool + Send + Sync;

/// Rule deciding whether a cell must recompute.
#[derive(Clone, Default)]
pub enum Staleness {
    /// Recompute iff no result is cached.
    #[default]
    Missing,

    /// Recompute once `period` has elapsed since the last update.
    Periodic(Period),

    /// Caller-supplied rule.
    Custom(Arc<Predicate>),
}

impl Staleness {
    /// Wrap a caller-supplied rule.
    pub fn custom<F>(rule: F) -> Self
    where
        F: Fn(&Cell, DateTime<Utc>) -> bool + Send + Sync + 'static,
    {
        Staleness::Custom(Arc::new(rule))
    }

    /// Whether `cell` must recompute at time `now`.
    pub fn needs_recompute(&self, cell: &Cell, now: DateTime<Utc>) -> bool {
        match self {
            Staleness::Missing => !cell.has_result(),
            Staleness::Periodic(period) => match cell.updated() {
                None => true,
                Some(updated) if period.bump(updated) <= now => true,
                Some(_) => !cell.has_result(),
            },
            Staleness::Custom(rule) => rule(cell, now),
        }
    }
}

impl fmt::Debug for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Missing => f.write_str("Missing"),
            Staleness::Periodic(period) => write!(f, "Periodic({period})"),
            Staleness::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for Staleness {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Staleness::Missing, Staleness::Missing) => true,
            (Staleness::Periodic(a), Staleness::Periodic(b)) => a == b,
            (Staleness::Custom(a), Staleness::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
