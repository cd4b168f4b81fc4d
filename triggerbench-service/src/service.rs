use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{
    AzureBackend, AzureConfig, BackendError, BackendResult, BoxedBackend, error_message,
    reqwest_client,
};
use crate::context::OperationContext;
use crate::credential::{ClientSecretConfig, EnvironmentCredential};
use crate::invocation::{InvocationRequest, TriggerResponse};
use crate::telemetry::{AppInsights, ConnectionString, Dependency, NoopTelemetry, Telemetry};
use crate::trigger::{Trigger, TriggerKind};

/// Message of the trace emitted for every valid invocation.
pub const INVOKER_TRACE: &str = "InvokerEndpoint details";

/// Header carrying the correlation id on successful HTTP trigger responses.
pub const OPERATION_ID_HEADER: &str = "operationId";

/// Reported duration of the dependency record.
const DEPENDENCY_DURATION: Duration = Duration::from_millis(10);

/// Configuration to initialize a [`TriggerService`].
#[derive(Debug, Default)]
pub struct ServiceConfig {
    /// Azure endpoints and keys.
    pub azure: AzureConfig,
    /// Service principal used for storage and messaging.
    pub credential: ClientSecretConfig,
    /// Timeout for outbound requests. `None` leaves requests unbounded.
    pub request_timeout: Option<Duration>,
    /// Application Insights resource; telemetry is discarded when `None`.
    pub telemetry: Option<ConnectionString>,
    /// Cloud role name reported in telemetry.
    pub cloud_role: Option<String>,
    /// Runtime label reported in the invocation trace, `RUNTIME`.
    pub runtime: Option<String>,
}

/// Fires benchmark triggers and reports them to telemetry.
///
/// This type is cheap to clone and shares its backend and telemetry handle.
#[derive(Clone, Debug)]
pub struct TriggerService(Arc<TriggerServiceInner>);

#[derive(Debug)]
struct TriggerServiceInner {
    backend: BoxedBackend,
    telemetry: Arc<dyn Telemetry>,
    runtime: Option<String>,
}

impl TriggerService {
    /// Creates a service talking to Azure with the given configuration.
    pub fn new(config: ServiceConfig) -> BackendResult<Self> {
        let client = reqwest_client(config.request_timeout)
            .map_err(|cause| BackendError::reqwest("building HTTP client", cause))?;

        let credential = EnvironmentCredential::new(client.clone(), config.credential);
        let backend = Box::new(AzureBackend::new(client.clone(), credential, config.azure));

        let telemetry: Arc<dyn Telemetry> = match config.telemetry {
            Some(connection) => Arc::new(AppInsights::new(client, connection, config.cloud_role)),
            None => Arc::new(NoopTelemetry),
        };

        Ok(Self::from_parts(backend, telemetry, config.runtime))
    }

    /// Creates a service from an explicit backend and telemetry sink.
    pub fn from_parts(
        backend: BoxedBackend,
        telemetry: Arc<dyn Telemetry>,
        runtime: Option<String>,
    ) -> Self {
        tracing::debug!(backend = backend.name(), "initializing trigger service");
        Self(Arc::new(TriggerServiceInner {
            backend,
            telemetry,
            runtime,
        }))
    }

    /// Handles one invoker request.
    ///
    /// Invalid requests are echoed back. Otherwise the trigger is recorded in telemetry, fired
    /// with exactly one outbound call, and the outcome is reported in the response body. The
    /// response status is always `200`.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
        context: &OperationContext,
    ) -> TriggerResponse {
        let Some(trigger) = request.parse_trigger() else {
            tracing::debug!(trigger = ?request.trigger, "unsupported invocation, echoing request");
            merni::counter!("invocation.echo": 1);
            return TriggerResponse::echo(&request.snapshot);
        };

        let kind = trigger.kind();
        let correlation_id = trigger.correlation_id(context);
        tracing::debug!(trigger = %kind, correlation_id, "firing trigger");

        let telemetry = &self.0.telemetry;
        telemetry.track_trace(context, INVOKER_TRACE, self.trace_properties(request, kind, context));
        telemetry.track_dependency(context, dependency(kind, correlation_id));

        let start = Instant::now();
        let operation = trigger.operation(correlation_id, chrono::Utc::now().timestamp_millis());
        let result = self.0.backend.execute(&operation).await;

        merni::distribution!(
            "trigger.latency"@s: start.elapsed(),
            "trigger" => kind.as_str(),
            "success" => if result.is_ok() { "true" } else { "false" }
        );

        let response = respond(&trigger, correlation_id, result);
        telemetry.flush().await;
        response
    }

    fn trace_properties(
        &self,
        request: &InvocationRequest,
        kind: TriggerKind,
        context: &OperationContext,
    ) -> BTreeMap<String, String> {
        let value = |v: &Option<String>| v.clone().unwrap_or_default();
        BTreeMap::from([
            ("iterationId".to_owned(), value(&request.iteration_id)),
            ("invokeMode".to_owned(), value(&request.invoke_mode)),
            ("invokeInput".to_owned(), value(&request.invoke_input)),
            ("triggerType".to_owned(), kind.as_str().to_owned()),
            ("runtime".to_owned(), value(&self.0.runtime)),
            ("operationId".to_owned(), context.id.clone()),
        ])
    }
}

fn dependency(kind: TriggerKind, correlation_id: &str) -> Dependency {
    Dependency {
        name: kind.dependency_name().to_owned(),
        id: correlation_id.to_owned(),
        kind: "HTTP".to_owned(),
        result_code: "200".to_owned(),
        duration: DEPENDENCY_DURATION,
        success: true,
    }
}

fn respond(trigger: &Trigger, correlation_id: &str, result: BackendResult<()>) -> TriggerResponse {
    let kind = trigger.kind();
    match result {
        Ok(()) => {
            let response = TriggerResponse::text(kind.success_message());
            match kind {
                TriggerKind::Http => response.with_header(OPERATION_ID_HEADER, correlation_id),
                _ => response,
            }
        }
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                trigger = %kind,
                "trigger failed to start"
            );
            TriggerResponse::text(trigger.failure_message(&error_message(&error)))
        }
    }
}
