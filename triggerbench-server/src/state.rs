use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use secrecy::{ExposeSecret, SecretBox, SecretString};
use tokio::runtime::Handle;
use triggerbench_service::backend::{AzureConfig, CosmosAccount, Endpoints};
use triggerbench_service::credential::ClientSecretConfig;
use triggerbench_service::telemetry::ConnectionString;
use triggerbench_service::{ServiceConfig, TriggerService};

use crate::config::{Config, ConfigSecret};

/// Shared reference to the invoker [service state](State).
pub type ServiceState = Arc<State>;

/// Reference to the invoker business logic.
///
/// This structure is created during server startup and shared with all HTTP request handlers.
///
/// In request handlers, use `axum::extract::State<ServiceState>` to retrieve a shared reference to
/// this structure.
#[derive(Debug)]
pub struct State {
    /// The server configuration.
    pub config: Config,
    /// The trigger dispatcher.
    pub service: TriggerService,
}

impl State {
    /// Spawns all services and background tasks of the invoker.
    pub async fn new(config: Config) -> anyhow::Result<ServiceState> {
        tokio::spawn(track_runtime_metrics(config.runtime.metrics_interval));

        let service = TriggerService::new(service_config(&config)?)
            .context("failed to initialize trigger service")?;

        Ok(Arc::new(Self { config, service }))
    }
}

fn service_config(config: &Config) -> anyhow::Result<ServiceConfig> {
    let azure = &config.azure;

    let cosmos = match (&azure.cosmos_endpoint, &azure.cosmos_key) {
        (Some(endpoint), Some(key)) => Some(CosmosAccount {
            endpoint: endpoint.clone(),
            key: secret(key),
        }),
        _ => None,
    };

    let telemetry = config
        .telemetry
        .connection_string
        .as_ref()
        .map(|s| ConnectionString::parse(s.expose_secret().as_str()))
        .transpose()
        .context("invalid Application Insights connection string")?;

    Ok(ServiceConfig {
        azure: AzureConfig {
            endpoints: Endpoints {
                blob: azure.blob_endpoint.clone(),
                queue: azure.queue_endpoint.clone(),
                service_bus: azure.service_bus_endpoint.clone(),
            },
            cosmos,
            timer_master_key: azure.timer_master_key.as_ref().map(secret),
        },
        credential: ClientSecretConfig {
            tenant_id: azure.tenant_id.clone(),
            client_id: azure.client_id.clone(),
            client_secret: azure.client_secret.as_ref().map(secret),
            authority_host: azure.authority_host.clone(),
        },
        request_timeout: azure.request_timeout,
        telemetry,
        cloud_role: config.telemetry.cloud_role.clone(),
        runtime: config.telemetry.runtime.clone(),
    })
}

fn secret(value: &SecretBox<ConfigSecret>) -> SecretString {
    SecretString::from(value.expose_secret().as_str().to_owned())
}

/// Periodically captures and reports internal Tokio runtime metrics.
async fn track_runtime_metrics(interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let metrics = Handle::current().metrics();

    loop {
        ticker.tick().await;
        tracing::trace!("Capturing runtime metrics");

        merni::gauge!("runtime.num_workers": metrics.num_workers());
        merni::gauge!("runtime.num_alive_tasks": metrics.num_alive_tasks());
        merni::gauge!("runtime.global_queue_depth": metrics.global_queue_depth());
    }
}
