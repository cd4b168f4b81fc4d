//! Test utilities for the triggerbench server.
//!
//! See the modules for all available utilities.

pub mod server;
pub mod tracing;
