//! Taskboard -- shared task board with optimistic mutation and live sync.
//!
//! The [`board::Board`] session ties the pieces together: a [`store`] of
//! tasks, the pure [`filter`] engine, the [`permission`] gate, the mutation
//! [`coordinator`], [`drag`] transitions, [`comments`], the [`realtime`]
//! listener, and the [`views`] / [`timeline`] projections.

pub mod board;
pub mod comments;
pub mod config;
pub mod coordinator;
pub mod drag;
pub mod filter;
pub mod permission;
pub mod realtime;
pub mod remote;
pub mod store;
pub mod timeline;
pub mod views;
