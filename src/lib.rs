// ABOUTME: Library root for pullwise - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod output;
pub mod registry;
pub mod runtime;
pub mod types;
