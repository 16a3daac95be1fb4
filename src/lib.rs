//! rootwalk - resolves names by walking DNS delegations down from the root servers

pub mod config;
pub mod metrics;
pub mod repl;
pub mod resolver;
pub mod transport;
pub mod types;
pub mod wire;
