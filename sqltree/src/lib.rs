//! Search-tree controller for multi-step text-to-SQL synthesis.
//!
//! A question is answered by growing a tree of reasoning states: rephrasing
//! the question, annotating column values and functions, narrowing the
//! schema, then generating and revising SQL by self-consistency voting over
//! execution results. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (transition table, nodes,
//!   voting, schema closure, parsing). No I/O; randomness is injected.
//! - **[`io`]**: Side-effecting services (oracle process, SQLite execution
//!   and its cache, templates, config, traces). Behind traits so tests can
//!   substitute scripted doubles.
//!
//! [`actions`] implements one handler per action kind on top of both, and
//! [`search`] drives expansion, rollouts and the final vote.

pub mod actions;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod search;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
