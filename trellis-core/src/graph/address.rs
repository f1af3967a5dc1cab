//! Cell Addresses
//!
//! This module defines the canonical identity of a cell in the graph.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Canonical identity of a cell, derived from its primary-key fields.
///
/// An address is the sequence of `(field, value)` pairs for every declared
/// key field, sorted by field name. Values are stored in canonical JSON
/// (object keys sorted at every depth) so that two addresses built from the
/// same data compare, hash and order identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(SmallVec<[(String, String); 2]>);

impl Address {
    /// Build an address from the declared key fields.
    ///
    /// `lookup` resolves a field name to its plain-data value. It returns
    /// `Ok(None)` for a missing field and an error for a field that is not
    /// plain data. Returns `Ok(None)` when no key is declared.
    pub fn for_fields<'a, F>(pk: &[String], mut lookup: F) -> Result<Option<Self>>
    where
        F: FnMut(&str) -> Result<Option<&'a Value>>,
    {
        if pk.is_empty() {
            return Ok(None);
        }

        let mut pairs: SmallVec<[(String, String); 2]> = SmallVec::new();
        for field in pk {
            let value = lookup(field)?.ok_or_else(|| Error::MissingKey {
                field: field.clone(),
            })?;
            pairs.push((field.clone(), canonical(value)));
        }
        pairs.sort();
        pairs.dedup_by(|a, b| a.0 == b.0);

        Ok(Some(Self(pairs)))
    }

    /// Build an address directly from `(field, value)` pairs.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut pairs: SmallVec<[(String, String); 2]> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), canonical(&v)))
            .collect();
        pairs.sort();
        pairs.dedup_by(|a, b| a.0 == b.0);
        Self(pairs)
    }

    /// The key field names, in canonical order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Decoded value of one key field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.0
            .iter()
            .find(|(k, _)| k == field)
            .and_then(|(_, v)| serde_json::from_str(v).ok())
    }

    /// Number of key fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str(")")
    }
}

/// Canonical JSON text for a value: object keys sorted at every depth.
fn canonical(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String(key.clone()).to_string());
                    out.push(':');
                    write(&map[key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}
