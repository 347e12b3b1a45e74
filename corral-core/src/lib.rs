//! Shared document model for the Corral operator.
//!
//! This crate holds the pieces of the desired-state model which are useful
//! outside of the operator binary itself: the YAML tree structure driving a
//! reconciliation pass, the secret value types embedded in kind specs, and
//! the closed error taxonomy for planning failures.

pub mod error;
pub mod secret;
pub mod tree;
