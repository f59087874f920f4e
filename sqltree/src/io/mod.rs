//! Side-effecting services: configuration, the generation oracle, SQL
//! execution and its cache, prompt templates, schema loading and traces.

pub mod config;
pub mod exec_cache;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod schema_store;
pub mod sqlite;
pub mod trace;
