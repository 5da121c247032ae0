//! Error types for the store, the views and the lookup engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Lookup-table failure: an operand fell outside `[0, domain)`.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LutError {
    #[error("lookup operands ({a}, {b}) outside domain [0, {domain})")]
    OutOfDomain { a: usize, b: usize, domain: usize },

    #[error("table domain {domain} outside 1..={max}")]
    InvalidDomain { domain: usize, max: usize },
}

/// Everything that can go wrong while opening, viewing, updating or
/// training over a parameter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be opened, resized, mapped or flushed.
    #[error("failed to {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requested views need more elements than the store holds.
    #[error("views require {required} parameters but the store holds {available}")]
    Capacity { required: usize, available: usize },

    /// An update would write outside the store.
    #[error("write of {len} values at offset {offset} exceeds store of {total} values")]
    Range { offset: usize, len: usize, total: usize },

    #[error(transparent)]
    Domain(#[from] LutError),

    /// An update carried a value outside `[0, domain)`.
    #[error("value {value} at index {index} outside domain [0, {domain})")]
    ValueOutOfDomain { index: usize, value: u16, domain: usize },

    /// The store has been closed.
    #[error("parameter store is closed")]
    Closed,

    /// An awaited write did not land in time. It may still be applied later.
    #[error("write not applied within {0:?}")]
    WriteTimeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the closed-handle error.
    pub fn is_closed(&self) -> bool {
        matches!(self, StoreError::Closed)
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
