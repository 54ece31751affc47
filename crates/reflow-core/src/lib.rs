//! Core types and errors for the reflow layout engine.
//!
//! This crate provides the value types shared by every other reflow crate:
//! - Node identities and resolution epochs
//! - One-dimensional size specs and two-dimensional size constraints
//! - Requested child sizes, edges and axis sets used when deriving constraints
//! - Error types

pub mod errors;
pub mod types;

pub use errors::*;
pub use types::*;
