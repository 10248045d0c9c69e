//! `labelwork-worker`: runs the annotation workflow engine against a store.
//!
//! The engine itself lives in `labelwork-core` and never performs I/O; this
//! crate loads its inputs, runs it and writes the results back.

pub mod config;
pub mod store;
pub mod workflow;
