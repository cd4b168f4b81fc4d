//! Backends that perform the outbound call firing a trigger.
//!
//! The [`Backend`] trait executes a single [`Operation`]. [`AzureBackend`] talks to the Azure
//! data plane REST APIs directly; the storage, queue, Cosmos DB, messaging and functions calls
//! each live in their own module.

mod azure;
mod common;
mod cosmos;
mod functions;
mod messaging;
mod storage;

pub use azure::{AzureBackend, AzureConfig, Endpoints};
pub use common::*;
pub use cosmos::{CosmosAccount, master_key_authorization};
