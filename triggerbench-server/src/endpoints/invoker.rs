use axum::extract::{DefaultBodyLimit, State};
use axum::{Router, routing};
use triggerbench_service::{InvocationRequest, OperationContext, TriggerResponse};

use crate::extractors::Xt;
use crate::state::ServiceState;

pub fn router() -> Router<ServiceState> {
    // The Functions host forwards every function route to the custom handler as `/api/{name}`.
    Router::new()
        .route("/", routing::any(invoke))
        .route("/api/{function}", routing::any(invoke))
        // Payloads of any size are echoed back.
        .layer(DefaultBodyLimit::disable())
}

async fn invoke(
    State(state): State<ServiceState>,
    Xt(context): Xt<OperationContext>,
    Xt(request): Xt<InvocationRequest>,
) -> Xt<TriggerResponse> {
    Xt(state.service.invoke(&request, &context).await)
}
