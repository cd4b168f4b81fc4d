use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use triggerbench_service::OperationContext;
use triggerbench_service::context::TRACEPARENT_HEADER;

use crate::extractors::Xt;

impl<S> FromRequestParts<S> for Xt<OperationContext>
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let traceparent = parts
            .headers
            .get(TRACEPARENT_HEADER)
            .and_then(|value| value.to_str().ok());
        let context = OperationContext::from_traceparent_or_generate(traceparent);

        sentry::configure_scope(|s| {
            s.set_tag("operation_id", &context.id);
            s.set_tag("operation_parent_id", &context.parent_id);
        });

        Ok(Xt(context))
    }
}
