//! Board hub library.
//!
//! Exposes the hub server for use in tests and embedding. The hub owns the
//! authoritative task and comment tables, checks project membership on every
//! write, and pushes each committed change to the connections subscribed to
//! the affected project.

pub mod config;
pub mod hub;
pub mod tables;
