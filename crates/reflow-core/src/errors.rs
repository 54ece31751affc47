//! Error types for the reflow engine.

use crate::types::{NodeId, SizeConstraint};
use thiserror::Error;

/// Failure reported by a host measurement function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MeasureError {
    message: String,
}

impl MeasureError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors during layout resolution.
///
/// Cloneable so one failed computation can be reported to every caller that
/// was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("Measurement failed for node {node} under {constraint}: {source}")]
    MeasurementFailed {
        node: NodeId,
        constraint: SizeConstraint,
        #[source]
        source: MeasureError,
    },

    #[error("Layout of node {node} under {constraint} was abandoned before completing")]
    Abandoned {
        node: NodeId,
        constraint: SizeConstraint,
    },

    #[error("Unknown node: {node}")]
    UnknownNode { node: NodeId },

    #[error("Node {node} was added to the tree twice")]
    DuplicateNode { node: NodeId },

    #[error("Deferred node {node} cannot resolve under non-concrete constraint {constraint}")]
    DeferredWithoutConstraint {
        node: NodeId,
        constraint: SizeConstraint,
    },

    #[error("Holder for node {node} already resolved under {resolved}, cannot satisfy {requested}")]
    HolderConflict {
        node: NodeId,
        resolved: SizeConstraint,
        requested: SizeConstraint,
    },

    #[error("Maximum layout nesting depth ({depth}) exceeded")]
    MaxDepthExceeded { depth: usize },

    #[error("Component tree has been torn down")]
    TornDown,
}

/// A layout result that contradicts the constraint it is stored under.
///
/// This is a measurement-function contract violation, not a recoverable
/// condition; the cache panics with it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Node {node} resolved to {width}x{height}, which violates {constraint}")]
pub struct ConstraintViolation {
    pub node: NodeId,
    pub constraint: SizeConstraint,
    pub width: u32,
    pub height: u32,
}
