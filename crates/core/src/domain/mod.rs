pub mod actor;
pub mod approval;
pub mod flow;
pub mod subject;

use thiserror::Error;

/// Returned when a storage or wire key does not name a known variant.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownKeyError {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownKeyError {
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}
