//! Parameter records and the dispatch queue for parameterized pools.

use crate::error::{PoolError, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Read;
use std::path::Path;

/// One named set of values handed to a single task invocation.
pub type ParamRecord = serde_json::Map<String, Value>;

/// FIFO queue of parameter records.
///
/// Each entry carries its position in the original sequence so that
/// dispatch order and failures can be reported by index.
#[derive(Debug, Clone)]
pub struct ParamQueue {
    pending: VecDeque<(usize, ParamRecord)>,
    total: usize,
}

impl ParamQueue {
    /// Build a queue from records. Fails on an empty sequence.
    pub fn new(records: Vec<ParamRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(PoolError::EmptyParameterSequence);
        }
        let total = records.len();
        Ok(Self {
            pending: records.into_iter().enumerate().collect(),
            total,
        })
    }

    /// Build a queue from a JSON value, which must be an array of objects.
    pub fn from_json(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => return Err(PoolError::InvalidParameterSequence(describe(&other))),
        };

        let records = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(PoolError::InvalidParameterSequence(format!(
                    "{} at index {}",
                    describe(&other),
                    i
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(records)
    }

    /// Read a JSON parameter file. `-` reads from stdin.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = if path == Path::new("-") {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            std::fs::read_to_string(path)?
        };
        Self::from_json(serde_json::from_str(&text)?)
    }

    /// Number of records the queue was built with.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Records not yet handed to a worker.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn pop_front(&mut self) -> Option<(usize, ParamRecord)> {
        self.pending.pop_front()
    }

    /// Put back a record whose dispatch failed, ahead of everything else.
    pub(crate) fn push_front(&mut self, index: usize, record: ParamRecord) {
        self.pending.push_front((index, record));
    }
}

fn describe(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    format!("{} ({})", kind, value)
}

/// Render a parameter value for command lines and environment variables.
///
/// Strings are used verbatim; everything else is its JSON text.
pub fn value_to_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
