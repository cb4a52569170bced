//! DID agent
//!
//! Admits DID documents behind a proof-of-work ticket gate, verifies their
//! proofs and persists them in a pluggable storage backend.

pub mod api;
pub mod config;
pub mod context;
pub mod did;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod server;
pub mod storage;
pub mod ticket;
