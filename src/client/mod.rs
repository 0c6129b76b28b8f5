//! Client-facing connection lifecycle
//!
//! [`ConnectionManager`] is the entry point: it validates the target, drives
//! the retry loop and owns the resulting authenticated handle.

mod manager;

pub use manager::{ConnectionHandle, ConnectionManager, ConnectionManagerBuilder};
