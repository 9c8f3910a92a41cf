//! Shared library for the metrix agent and server.
//!
//! Provides:
//! - `metric`: gauge/counter values, merge rules, wire records and batches
//! - `storage`: the `Storage` contract with in-memory, file-backed and PostgreSQL backends
//! - `collector`: runtime/process/system statistics sampling for the agent
//! - `security`: integrity tags (HMAC-SHA256), RSA payload encryption, gzip, trusted subnet
//! - `config`: JSON config file loading shared by both binaries

pub mod collector;
pub mod config;
pub mod metric;
pub mod security;
pub mod storage;

/// Crate version with the git SHA it was built from.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_SHA"), ")");

/// Header (HTTP) / metadata key (RPC, lowercase) carrying the integrity tag.
pub const HASH_HEADER: &str = "HashSHA256";

/// Header carrying the agent's own address for trusted subnet checks.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
