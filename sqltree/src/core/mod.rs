//! Deterministic, pure logic for the search core.
//!
//! Core modules must be free of I/O side effects. Randomness is always
//! injected by the caller so results are reproducible under a seed.

pub mod consistency;
pub mod error;
pub mod extract;
pub mod invariants;
pub mod node;
pub mod policy;
pub mod schema;
pub mod transitions;
pub mod types;
