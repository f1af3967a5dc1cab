//! Cell arguments.
//!
//! An argument is either plain data or a reference to another cell, possibly
//! nested inside lists and mappings. Graph-walking code matches on the tag
//! rather than probing values at runtime.

use indexmap::IndexMap;
use serde_json::Value;

use super::Cell;
use crate::error::Result;

/// A keyword argument of a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Plain data, passed to the function as is.
    Data(Value),

    /// Another cell; the function sees its result.
    Cell(Box<Cell>),

    /// A sequence of arguments; the function sees an array.
    List(Vec<Arg>),

    /// A mapping of arguments; the function sees an object.
    Map(IndexMap<String, Arg>),
}

impl Arg {
    /// Build a list argument.
    pub fn list<I, A>(items: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Arg::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a mapping argument.
    pub fn map<I, K, A>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, A)>,
        K: Into<String>,
        A: Into<Arg>,
    {
        Arg::Map(
            entries
                .into_iter()
                .map(|(k, a)| (k.into(), a.into()))
                .collect(),
        )
    }

    /// The plain data behind this argument, if it holds no cell at all.
    pub fn as_plain(&self) -> Option<Value> {
        match self {
            Arg::Data(value) => Some(value.clone()),
            Arg::Cell(_) => None,
            Arg::List(items) => items
                .iter()
                .map(Arg::as_plain)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Arg::Map(entries) => entries
                .iter()
                .map(|(k, a)| a.as_plain().map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
        }
    }

    /// The value the wrapped function receives for this argument.
    ///
    /// Nested cells contribute their current result; a nested cell without
    /// one is an error.
    pub fn to_input(&self) -> Result<Value> {
        match self {
            Arg::Data(value) => Ok(value.clone()),
            Arg::Cell(cell) => cell.value(),
            Arg::List(items) => Ok(Value::Array(
                items.iter().map(Arg::to_input).collect::<Result<_>>()?,
            )),
            Arg::Map(entries) => Ok(Value::Object(
                entries
                    .iter()
                    .map(|(k, a)| Ok((k.clone(), a.to_input()?)))
                    .collect::<Result<_>>()?,
            )),
        }
    }

    /// Every cell directly held by this argument, at any list/map depth.
    pub fn cells(&self) -> Vec<&Cell> {
        let mut out = Vec::new();
        self.collect_cells(&mut out);
        out
    }

    fn collect_cells<'a>(&'a self, out: &mut Vec<&'a Cell>) {
        match self {
            Arg::Data(_) => {}
            Arg::Cell(cell) => out.push(cell),
            Arg::List(items) => items.iter().for_each(|a| a.collect_cells(out)),
            Arg::Map(entries) => entries.values().for_each(|a| a.collect_cells(out)),
        }
    }

    /// Rebuild the argument with every directly held cell replaced by `f`.
    pub fn try_map_cells<F>(&self, f: &mut F) -> Result<Arg>
    where
        F: FnMut(&Cell) -> Result<Cell>,
    {
        Ok(match self {
            Arg::Data(value) => Arg::Data(value.clone()),
            Arg::Cell(cell) => Arg::Cell(Box::new(f(cell)?)),
            Arg::List(items) => Arg::List(
                items
                    .iter()
                    .map(|a| a.try_map_cells(f))
                    .collect::<Result<_>>()?,
            ),
            Arg::Map(entries) => Arg::Map(
                entries
                    .iter()
                    .map(|(k, a)| Ok((k.clone(), a.try_map_cells(f)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Data(value)
    }
}

impl From<Cell> for Arg {
    fn from(cell: Cell) -> Self {
        Arg::Cell(Box::new(cell))
    }
}

impl From<&Cell> for Arg {
    fn from(cell: &Cell) -> Self {
        Arg::Cell(Box::new(cell.clone()))
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Data(Value::from(value))
    }
}

macro_rules! data_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Data(Value::from(value))
                }
            }
        )*
    };
}

data_from!(i32, i64, u32, u64, usize, f64, bool, String);
