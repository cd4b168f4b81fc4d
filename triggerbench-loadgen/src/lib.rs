//! A load generator that fires benchmark invocations at a triggerbench invoker.
//!
//! Each [`Workload`] targets one trigger with a fixed input and runs in one of two modes:
//!
//! - *constant*: a fixed number of invocations is kept in flight until the duration elapses.
//! - *burst*: batches of invocations are fired at once, with a pause between batches.
//!
//! Every invocation carries the workload's mode and load level as `invokeMode` and `invokeInput`,
//! along with a per-workload iteration id, so the resulting telemetry can be grouped by experiment.
//!
//! After a run, [`analysis`] reads that telemetry back from Application Insights and measures how
//! long each trigger took to start the triggered function.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod analysis;
pub mod config;
pub mod http;
pub mod insights;
pub mod loadgen;
pub mod workload;

pub use crate::loadgen::run;
pub use crate::workload::{Workload, WorkloadMode};
