//! The invoker server component.
//!
//! This builds on top of the [`triggerbench_service`], and exposes the trigger dispatcher as an
//! `HTTP` endpoint that the experiment driver, or the Azure Functions host in custom handler
//! mode, calls once per invocation.

pub mod cli;
pub mod config;
pub mod endpoints;
pub mod extractors;
pub mod healthcheck;
pub mod observability;
pub mod state;
pub mod web;
