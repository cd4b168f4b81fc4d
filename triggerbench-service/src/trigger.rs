//! The set of benchmark triggers and how their inputs are interpreted.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::backend::{MessagingService, Operation};
use crate::context::OperationContext;

/// Payload written to blobs by the storage and event grid triggers.
pub const BLOB_CONTENT: &str = "Hello world!";

/// Selector for which external service an invocation exercises.
///
/// The wire names are case-sensitive and match the `trigger` query parameter exactly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum TriggerKind {
    /// An HTTP-triggered function, called with a `GET` request.
    #[serde(rename = "http")]
    Http,
    /// A blob-triggered function, fired by uploading a blob.
    #[serde(rename = "storage")]
    Storage,
    /// A queue-triggered function, fired by sending a storage queue message.
    #[serde(rename = "queue")]
    Queue,
    /// A Cosmos DB change feed function, fired by inserting an item.
    #[serde(rename = "database")]
    Database,
    /// A timer-triggered function, fired manually through the admin endpoint.
    #[serde(rename = "timer")]
    Timer,
    /// An Event Hubs-triggered function, fired by sending an event.
    #[serde(rename = "eventHub")]
    EventHub,
    /// An Event Grid function subscribed to blob creation events.
    #[serde(rename = "eventGrid")]
    EventGrid,
    /// A Service Bus topic subscription function, fired by sending a message.
    #[serde(rename = "serviceBusTopic")]
    ServiceBusTopic,
}

impl TriggerKind {
    /// All trigger kinds, in declaration order.
    pub const ALL: [TriggerKind; 8] = [
        TriggerKind::Http,
        TriggerKind::Storage,
        TriggerKind::Queue,
        TriggerKind::Database,
        TriggerKind::Timer,
        TriggerKind::EventHub,
        TriggerKind::EventGrid,
        TriggerKind::ServiceBusTopic,
    ];

    /// Returns the wire name of this trigger kind.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Http => "http",
            TriggerKind::Storage => "storage",
            TriggerKind::Queue => "queue",
            TriggerKind::Database => "database",
            TriggerKind::Timer => "timer",
            TriggerKind::EventHub => "eventHub",
            TriggerKind::EventGrid => "eventGrid",
            TriggerKind::ServiceBusTopic => "serviceBusTopic",
        }
    }

    /// Name of the dependency record emitted before firing this trigger.
    pub fn dependency_name(self) -> &'static str {
        match self {
            TriggerKind::Http => "CompletionTrackHttp",
            TriggerKind::Storage => "CompletionTrackStorage",
            TriggerKind::Queue => "CompletionTrackQueue",
            TriggerKind::Database => "CompletionTrackDatabase",
            TriggerKind::Timer => "CompletionTrackTimer",
            TriggerKind::EventHub => "CompletionTrackEventHub",
            TriggerKind::EventGrid => "CompletionTrackEventGrid",
            TriggerKind::ServiceBusTopic => "CompletionTrackserviceBusTopic",
        }
    }

    /// The human readable label used in response bodies.
    fn label(self) -> &'static str {
        match self {
            TriggerKind::Http => "HTTP trigger",
            TriggerKind::Storage => "Storage trigger benchmark",
            TriggerKind::Queue => "Queue trigger benchmark",
            TriggerKind::Database => "Database trigger benchmark",
            TriggerKind::Timer => "Timer trigger",
            TriggerKind::EventHub => "Event Hub trigger benchmark",
            TriggerKind::EventGrid => "Event Grid trigger",
            TriggerKind::ServiceBusTopic => "Service Bus trigger",
        }
    }

    /// Response body reported when the outbound call succeeded.
    pub fn success_message(self) -> String {
        format!("AZURE - {} successfully started", self.label())
    }

    /// Prefix of the response body reported when the outbound call failed.
    pub fn failure_prefix(self) -> String {
        let label = match self {
            // The HTTP trigger reports itself as a benchmark when failing.
            TriggerKind::Http => "HTTP trigger benchmark",
            other => other.label(),
        };
        format!("AZURE - {label} failed to start")
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown trigger name.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown trigger type `{0}`")]
pub struct UnknownTrigger(pub String);

impl FromStr for TriggerKind {
    type Err = UnknownTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownTrigger(s.to_owned()))
    }
}

/// A trigger together with its positional inputs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// `GET {url}?operationId=…`
    Http {
        /// Target function URL.
        url: String,
    },
    /// Upload a timestamped blob.
    Storage {
        /// Blob container name.
        container: String,
        /// Storage account name.
        account: String,
    },
    /// Send a base64 encoded message to a storage queue.
    Queue {
        /// Queue name.
        queue: String,
        /// Storage account name.
        account: String,
    },
    /// Insert one item into a Cosmos DB container.
    Database {
        /// Database name.
        database: String,
        /// Container name.
        container: String,
    },
    /// `POST {url}` against the functions admin endpoint.
    Timer {
        /// Admin endpoint URL of the timer function.
        url: String,
    },
    /// Send a batch of one event.
    EventHub {
        /// Event hub name.
        event_hub: String,
        /// Event Hubs namespace name.
        namespace: String,
    },
    /// Upload a blob named after the operation id.
    EventGrid {
        /// Storage account name.
        account: String,
        /// Blob container name.
        container: String,
    },
    /// Send a batch of one message to a topic.
    ServiceBusTopic {
        /// Service Bus namespace name.
        namespace: String,
        /// Topic name.
        topic: String,
    },
}

impl Trigger {
    /// Parses the comma-delimited `input` for the given trigger kind.
    ///
    /// Returns `None` if the input is empty. Storage and database inputs must have exactly two
    /// comma-separated parts. The messaging and event grid triggers read the first two parts
    /// and ignore the rest; a missing second part is left empty and fails when the trigger is
    /// fired.
    pub fn parse(kind: TriggerKind, input: &str) -> Option<Self> {
        if input.is_empty() {
            return None;
        }

        let trigger = match kind {
            TriggerKind::Http => Trigger::Http { url: input.into() },
            TriggerKind::Timer => Trigger::Timer { url: input.into() },
            TriggerKind::Storage => {
                let (container, account) = split_pair(input)?;
                Trigger::Storage { container, account }
            }
            TriggerKind::Queue => {
                let (queue, account) = first_two(input);
                Trigger::Queue { queue, account }
            }
            TriggerKind::Database => {
                let (database, container) = split_pair(input)?;
                Trigger::Database {
                    database,
                    container,
                }
            }
            TriggerKind::EventHub => {
                let (event_hub, namespace) = first_two(input);
                Trigger::EventHub {
                    event_hub,
                    namespace,
                }
            }
            TriggerKind::EventGrid => {
                let (account, container) = first_two(input);
                Trigger::EventGrid { account, container }
            }
            TriggerKind::ServiceBusTopic => {
                let (namespace, topic) = first_two(input);
                Trigger::ServiceBusTopic { namespace, topic }
            }
        };

        Some(trigger)
    }

    /// Returns the kind of this trigger.
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Http { .. } => TriggerKind::Http,
            Trigger::Storage { .. } => TriggerKind::Storage,
            Trigger::Queue { .. } => TriggerKind::Queue,
            Trigger::Database { .. } => TriggerKind::Database,
            Trigger::Timer { .. } => TriggerKind::Timer,
            Trigger::EventHub { .. } => TriggerKind::EventHub,
            Trigger::EventGrid { .. } => TriggerKind::EventGrid,
            Trigger::ServiceBusTopic { .. } => TriggerKind::ServiceBusTopic,
        }
    }

    /// Selects the correlation id threaded through the outbound call and its dependency record.
    ///
    /// Storage, timer and Service Bus invocations correlate on the parent id of the operation,
    /// all others on the operation id itself.
    pub fn correlation_id<'a>(&self, context: &'a OperationContext) -> &'a str {
        match self {
            Trigger::Storage { .. } | Trigger::Timer { .. } | Trigger::ServiceBusTopic { .. } => {
                &context.parent_id
            }
            _ => &context.id,
        }
    }

    /// Builds the single outbound operation that fires this trigger.
    ///
    /// `timestamp_millis` names the blob uploaded by the storage trigger.
    pub fn operation(&self, operation_id: &str, timestamp_millis: i64) -> Operation {
        match self {
            Trigger::Http { url } => Operation::InvokeHttp {
                url: url.clone(),
                operation_id: operation_id.into(),
            },
            Trigger::Storage { container, account } => Operation::UploadBlob {
                account: account.clone(),
                container: container.clone(),
                blob_name: format!("{timestamp_millis}.txt"),
                content: Bytes::from_static(BLOB_CONTENT.as_bytes()),
                operation_id: operation_id.into(),
            },
            Trigger::Queue { queue, account } => Operation::SendQueueMessage {
                account: account.clone(),
                queue: queue.clone(),
                message_text: base64_encode(operation_id),
            },
            Trigger::Database {
                database,
                container,
            } => Operation::CreateItem {
                database: database.clone(),
                container: container.clone(),
                item: serde_json::json!({
                    "id": uuid::Uuid::new_v4().to_string(),
                    "newOperationId": operation_id,
                    "isComplete": false,
                }),
                partition_key: operation_id.into(),
            },
            Trigger::Timer { url } => Operation::InvokeTimer {
                url: url.clone(),
                operation_id: operation_id.into(),
            },
            Trigger::EventHub {
                event_hub,
                namespace,
            } => Operation::SendBatch {
                service: MessagingService::EventHubs,
                namespace: namespace.clone(),
                entity: event_hub.clone(),
                bodies: vec![operation_id.into()],
            },
            Trigger::EventGrid { account, container } => Operation::UploadBlob {
                account: account.clone(),
                container: container.clone(),
                blob_name: operation_id.into(),
                content: Bytes::from_static(BLOB_CONTENT.as_bytes()),
                operation_id: operation_id.into(),
            },
            Trigger::ServiceBusTopic { namespace, topic } => Operation::SendBatch {
                service: MessagingService::ServiceBus,
                namespace: namespace.clone(),
                entity: topic.clone(),
                bodies: vec![operation_id.into()],
            },
        }
    }

    /// Formats the response body for a failed outbound call.
    pub fn failure_message(&self, error: &str) -> String {
        let prefix = self.kind().failure_prefix();
        match self {
            Trigger::Queue { queue, .. } => {
                format!("{prefix}\n\nError: {error} \n Queue: {queue}")
            }
            Trigger::EventHub { .. } => format!("{prefix}\n\nError in sending batch: {error} \n"),
            _ => format!("{prefix}\n\nError: {error}"),
        }
    }
}

fn split_pair(input: &str) -> Option<(String, String)> {
    let mut parts = input.split(',');
    let first = parts.next()?;
    let second = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((first.into(), second.into()))
}

fn first_two(input: &str) -> (String, String) {
    let mut parts = input.split(',');
    let first = parts.next().unwrap_or_default();
    let second = parts.next().unwrap_or_default();
    (first.into(), second.into())
}

fn base64_encode(value: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> OperationContext {
        OperationContext {
            id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
            parent_id: "00f067aa0ba902b7".into(),
        }
    }

    #[test]
    fn parses_all_wire_names() {
        for kind in TriggerKind::ALL {
            assert_eq!(kind.as_str().parse::<TriggerKind>(), Ok(kind));
        }
        assert!("Storage".parse::<TriggerKind>().is_err());
        assert!("eventhub".parse::<TriggerKind>().is_err());
        assert!("".parse::<TriggerKind>().is_err());
    }

    #[test]
    fn splits_positional_inputs() {
        assert_eq!(
            Trigger::parse(TriggerKind::Storage, "containerA,accountB"),
            Some(Trigger::Storage {
                container: "containerA".into(),
                account: "accountB".into(),
            })
        );
        assert_eq!(
            Trigger::parse(TriggerKind::EventHub, "hub,namespace"),
            Some(Trigger::EventHub {
                event_hub: "hub".into(),
                namespace: "namespace".into(),
            })
        );
        assert_eq!(
            Trigger::parse(TriggerKind::Http, "https://example.com/api/fn?a=1,2"),
            Some(Trigger::Http {
                url: "https://example.com/api/fn?a=1,2".into()
            })
        );
    }

    #[test]
    fn rejects_malformed_inputs() {
        assert_eq!(Trigger::parse(TriggerKind::Http, ""), None);
        assert_eq!(Trigger::parse(TriggerKind::Storage, "onlyone"), None);
        assert_eq!(Trigger::parse(TriggerKind::Database, "a,b,c"), None);
        assert_eq!(Trigger::parse(TriggerKind::Database, "a"), None);
        assert_eq!(Trigger::parse(TriggerKind::Queue, ""), None);
        assert_eq!(Trigger::parse(TriggerKind::EventGrid, ""), None);
    }

    #[test]
    fn messaging_inputs_use_first_two_parts() {
        assert_eq!(
            Trigger::parse(TriggerKind::Queue, "queueA,accountB,extra"),
            Some(Trigger::Queue {
                queue: "queueA".into(),
                account: "accountB".into(),
            })
        );
        assert_eq!(
            Trigger::parse(TriggerKind::ServiceBusTopic, "ns,topic,x,y"),
            Some(Trigger::ServiceBusTopic {
                namespace: "ns".into(),
                topic: "topic".into(),
            })
        );
        assert_eq!(
            Trigger::parse(TriggerKind::EventHub, "hub"),
            Some(Trigger::EventHub {
                event_hub: "hub".into(),
                namespace: String::new(),
            })
        );
        assert_eq!(
            Trigger::parse(TriggerKind::EventGrid, "account"),
            Some(Trigger::EventGrid {
                account: "account".into(),
                container: String::new(),
            })
        );
    }

    #[test]
    fn correlates_on_parent_for_some_triggers() {
        let context = context();
        let storage = Trigger::parse(TriggerKind::Storage, "c,a").unwrap();
        let queue = Trigger::parse(TriggerKind::Queue, "q,a").unwrap();
        let timer = Trigger::parse(TriggerKind::Timer, "http://x").unwrap();
        let topic = Trigger::parse(TriggerKind::ServiceBusTopic, "ns,topic").unwrap();

        assert_eq!(storage.correlation_id(&context), "00f067aa0ba902b7");
        assert_eq!(timer.correlation_id(&context), "00f067aa0ba902b7");
        assert_eq!(topic.correlation_id(&context), "00f067aa0ba902b7");
        assert_eq!(queue.correlation_id(&context), "4bf92f3577b34da6a3ce929d0e0e4736");
    }

    #[test]
    fn queue_message_is_base64_operation_id() {
        let trigger = Trigger::parse(TriggerKind::Queue, "queueA,accountB").unwrap();
        let Operation::SendQueueMessage {
            account,
            queue,
            message_text,
        } = trigger.operation("4bf92f3577b34da6a3ce929d0e0e4736", 0)
        else {
            panic!("expected a queue message");
        };

        assert_eq!(account, "accountB");
        assert_eq!(queue, "queueA");
        assert_eq!(message_text, "NGJmOTJmMzU3N2IzNGRhNmEzY2U5MjlkMGUwZTQ3MzY=");
    }

    #[test]
    fn storage_blob_is_named_by_timestamp() {
        let trigger = Trigger::parse(TriggerKind::Storage, "containerA,accountB").unwrap();
        let Operation::UploadBlob {
            blob_name, content, ..
        } = trigger.operation("op", 1650000000123)
        else {
            panic!("expected a blob upload");
        };

        assert_eq!(blob_name, "1650000000123.txt");
        assert_eq!(content.as_ref(), b"Hello world!");
    }

    #[test]
    fn formats_messages() {
        assert_eq!(
            TriggerKind::Storage.success_message(),
            "AZURE - Storage trigger benchmark successfully started"
        );
        assert_eq!(
            TriggerKind::ServiceBusTopic.success_message(),
            "AZURE - Service Bus trigger successfully started"
        );

        let http = Trigger::parse(TriggerKind::Http, "http://x").unwrap();
        assert_eq!(
            http.failure_message("boom"),
            "AZURE - HTTP trigger benchmark failed to start\n\nError: boom"
        );

        let queue = Trigger::parse(TriggerKind::Queue, "queueA,accountB").unwrap();
        assert_eq!(
            queue.failure_message("boom"),
            "AZURE - Queue trigger benchmark failed to start\n\nError: boom \n Queue: queueA"
        );

        let hub = Trigger::parse(TriggerKind::EventHub, "hub,ns").unwrap();
        assert_eq!(
            hub.failure_message("boom"),
            "AZURE - Event Hub trigger benchmark failed to start\n\nError in sending batch: boom \n"
        );
    }
}
