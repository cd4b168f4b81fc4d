//! Correlation context of a single invocation.

use serde::Serialize;
use uuid::Uuid;

/// Name of the W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Identifies one invocation across telemetry and the payload sent to the external service.
///
/// `id` is the W3C trace id (32 lowercase hex digits) and `parent_id` the span id of the caller
/// (16 lowercase hex digits). Both are opaque correlation strings, never used for ordering or
/// idempotency.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OperationContext {
    /// The operation (trace) id.
    pub id: String,
    /// The id of the operation's parent span.
    pub parent_id: String,
}

impl OperationContext {
    /// Creates a fresh context with random ids.
    pub fn generate() -> Self {
        let trace = Uuid::new_v4().simple().to_string();
        let span = Uuid::new_v4().simple().to_string();
        Self {
            id: trace,
            parent_id: span[..16].to_owned(),
        }
    }

    /// Parses a `traceparent` header value of the form `00-{trace-id}-{parent-id}-{flags}`.
    ///
    /// Returns `None` for malformed values and for the all-zero ids the W3C format declares
    /// invalid.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let parent_id = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || version == "ff" || !is_hex(version) {
            return None;
        }
        // Version 00 defines exactly four fields, later versions may append more.
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if flags.len() != 2 || !is_hex(flags) {
            return None;
        }
        if trace_id.len() != 32 || !is_hex(trace_id) || is_zero(trace_id) {
            return None;
        }
        if parent_id.len() != 16 || !is_hex(parent_id) || is_zero(parent_id) {
            return None;
        }

        Some(Self {
            id: trace_id.to_ascii_lowercase(),
            parent_id: parent_id.to_ascii_lowercase(),
        })
    }

    /// Uses the given `traceparent` value if it is valid, otherwise generates a fresh context.
    pub fn from_traceparent_or_generate(value: Option<&str>) -> Self {
        value
            .and_then(Self::from_traceparent)
            .unwrap_or_else(Self::generate)
    }
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_traceparent() {
        let context = OperationContext::from_traceparent(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )
        .unwrap();

        assert_eq!(context.id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(context.parent_id, "00f067aa0ba902b7");
    }

    #[test]
    fn rejects_invalid_traceparent() {
        for value in [
            "",
            "garbage",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e47-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "00-xyz92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        ] {
            assert_eq!(OperationContext::from_traceparent(value), None, "{value}");
        }
    }

    #[test]
    fn generates_w3c_shaped_ids() {
        let context = OperationContext::generate();
        assert_eq!(context.id.len(), 32);
        assert_eq!(context.parent_id.len(), 16);
        assert!(is_hex(&context.id));
        assert!(is_hex(&context.parent_id));

        let fallback = OperationContext::from_traceparent_or_generate(Some("nope"));
        assert_eq!(fallback.id.len(), 32);
    }
}
