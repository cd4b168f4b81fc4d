//! The service layer fires benchmark triggers against Azure managed services.
//!
//! A request names a trigger type and its input. [`TriggerService`] parses it into a
//! [`Trigger`], records the invocation in Application Insights, performs exactly one outbound
//! call through a [`backend::Backend`], and renders the outcome as a [`TriggerResponse`].
//!
//! It is designed as a library crate to be used by the `server`.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backend;
pub mod context;
pub mod credential;
pub mod invocation;
mod service;
pub mod telemetry;
pub mod trigger;

pub use context::OperationContext;
pub use invocation::{InvocationRequest, RequestSnapshot, TriggerResponse};
pub use service::*;
pub use trigger::{Trigger, TriggerKind};
