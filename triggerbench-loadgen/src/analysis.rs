//! Measures trigger delays from the telemetry of a benchmark run.
//!
//! Every invocation of the invoker records a `CompletionTrack*` dependency right before it fires
//! the trigger. The triggered function then runs under the same operation id, either because the
//! operation is propagated by the service or because the function logs a `Custom operationId`
//! trace that maps its own operation onto the invoker's. The trigger delay of one operation is the
//! time from the firing call to the start of the triggered function's request.
//!
//! Operations whose records are incomplete are discarded, see [`Expected`].

use std::collections::BTreeMap;
use std::io;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sketches_ddsketch::DDSketch;
use triggerbench_service::TriggerKind;
use yansi::Paint;

use crate::insights::{Event, EventTable, InsightsClient};
use crate::loadgen::print_percentiles;

/// Requests to this function are made by the Functions host, not by a trigger.
const INFRA_ENDPOINT: &str = "Functions.InfraEndpoint";

/// Marks traces that map a function's operation id onto the invoker's.
const SWITCH_MARKER: &str = "Custom operationId";

/// The table a record was read from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// A function invocation.
    Request,
    /// An outgoing call.
    Dependency,
    /// A log message.
    Trace,
}

/// A telemetry record reduced to what the analysis needs.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    /// The table the record was read from.
    pub kind: EntryKind,
    /// Function name, dependency name or the first two words of a trace message.
    pub name: String,
    /// When the record was made.
    pub timestamp: DateTime<Utc>,
    /// The operation this record belongs to, after switches are applied.
    pub operation_id: String,
    /// Duration of a dependency in milliseconds.
    pub duration_ms: Option<f64>,
}

impl Entry {
    fn request(event: &Event) -> Self {
        let name = event
            .dimension("FullName")
            .or_else(|| event.request.as_ref()?.name.as_deref())
            .unwrap_or_default();
        Self::new(EntryKind::Request, name.to_owned(), event)
    }

    fn dependency(event: &Event) -> Self {
        let details = event.dependency.as_ref();
        let name = details
            .and_then(|d| d.name.as_deref())
            .unwrap_or_default();
        // Auto-collected outgoing calls are named after their method and URL.
        let name = if name.starts_with("POST") { "POST" } else { name };

        let mut entry = Self::new(EntryKind::Dependency, name.to_owned(), event);
        entry.duration_ms = details.and_then(|d| d.duration);
        entry
    }

    fn trace(event: &Event, message: &str) -> Self {
        let name = message.split(' ').take(2).collect::<Vec<_>>().join(" ");
        Self::new(EntryKind::Trace, name, event)
    }

    fn new(kind: EntryKind, name: String, event: &Event) -> Self {
        Self {
            kind,
            name,
            timestamp: event.timestamp,
            operation_id: event.operation_id().to_owned(),
            duration_ms: None,
        }
    }
}

/// Maps the operation id of a triggered function onto the invoker's operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationSwitch {
    /// Operation id the function ran under.
    pub old: String,
    /// Operation id of the invoker.
    pub new: String,
}

impl OperationSwitch {
    fn from_event(event: &Event) -> Option<Self> {
        let old = event.dimension("oldOperationId")?;
        // Hierarchical ids look like `|{operation}.{span}.`.
        let new = event.dimension("newOperationId")?.replace('|', "");
        let new = new.split('.').next().unwrap_or_default();
        if new.is_empty() {
            return None;
        }

        Some(Self {
            old: old.to_owned(),
            new: new.to_owned(),
        })
    }
}

/// Telemetry records collected for one analysis.
#[derive(Debug, Default)]
pub struct Records {
    entries: Vec<Entry>,
    switches: Vec<OperationSwitch>,
}

impl Records {
    /// Adds rows of the requests table.
    pub fn add_requests(&mut self, events: &[Event]) {
        self.entries.extend(events.iter().map(Entry::request));
    }

    /// Adds rows of the dependencies table.
    pub fn add_dependencies(&mut self, events: &[Event]) {
        self.entries.extend(events.iter().map(Entry::dependency));
    }

    /// Adds rows of the traces table. Operation id switches are collected, not recorded.
    pub fn add_traces(&mut self, events: &[Event]) {
        for event in events {
            let message = event
                .trace
                .as_ref()
                .and_then(|t| t.message.as_deref())
                .unwrap_or_default();

            if message.contains(SWITCH_MARKER) {
                self.switches.extend(OperationSwitch::from_event(event));
            } else {
                self.entries.push(Entry::trace(event, message));
            }
        }
    }

    /// Applies operation id switches and groups the entries by operation id.
    ///
    /// Entries within a group are ordered by timestamp. Entries without an operation id are
    /// dropped.
    pub fn into_groups(self) -> BTreeMap<String, Vec<Entry>> {
        let Self {
            mut entries,
            switches,
        } = self;
        entries.sort_by_key(|entry| entry.timestamp);

        let mut groups = BTreeMap::<String, Vec<Entry>>::new();
        for mut entry in entries {
            for switch in &switches {
                if entry.operation_id == switch.old {
                    entry.operation_id = switch.new.clone();
                }
            }
            if !entry.operation_id.is_empty() {
                groups.entry(entry.operation_id.clone()).or_default().push(entry);
            }
        }
        groups
    }
}

/// How many dependency records a complete operation has.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DependencyCount {
    /// Exactly this many.
    Exactly(usize),
    /// This many or more.
    AtLeast(usize),
}

/// The records a complete operation consists of.
///
/// An operation spans the invoker's request and the triggered function's request, each with an
/// `Executing` and an `Executed` trace. The number of dependencies depends on what the trigger's
/// SDK records on top of the `CompletionTrack*` dependency.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Expected {
    /// Number of trace records.
    pub traces: usize,
    /// Number of request records.
    pub requests: usize,
    /// Number of dependency records.
    pub dependencies: DependencyCount,
}

impl Expected {
    /// The records expected for an operation firing `trigger`.
    pub fn for_trigger(trigger: TriggerKind) -> Self {
        let dependencies = match trigger {
            TriggerKind::Http => DependencyCount::Exactly(2),
            TriggerKind::Storage => DependencyCount::Exactly(9),
            _ => DependencyCount::AtLeast(1),
        };

        Self {
            traces: 4,
            requests: 2,
            dependencies,
        }
    }

    /// Returns `true` if the group holds exactly the expected records.
    pub fn matches(&self, group: &[Entry]) -> bool {
        let count = |kind| group.iter().filter(|entry| entry.kind == kind).count();
        let dependencies = count(EntryKind::Dependency);

        count(EntryKind::Trace) == self.traces
            && count(EntryKind::Request) == self.requests
            && match self.dependencies {
                DependencyCount::Exactly(n) => dependencies == n,
                DependencyCount::AtLeast(n) => dependencies >= n,
            }
    }
}

/// The delay measured for one operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    /// The invoker's operation id.
    pub operation_id: String,
    /// Time from firing the trigger to the triggered request, in milliseconds.
    pub delay_ms: f64,
    /// Duration recorded on the `CompletionTrack*` dependency, in milliseconds.
    pub completion_track_ms: Option<f64>,
}

impl Measurement {
    /// Measures the trigger delay of one operation group.
    ///
    /// The delay starts at the last outgoing call other than the `CompletionTrack*` record, which
    /// is the call the trigger's SDK made, or at the `CompletionTrack*` record if there is none.
    /// It ends at the last request that is not a host infrastructure call.
    pub fn from_group(trigger: TriggerKind, operation_id: &str, group: &[Entry]) -> Option<Self> {
        let completion_name = trigger.dependency_name();
        let dependencies = || group.iter().filter(|e| e.kind == EntryKind::Dependency);

        let completion = dependencies().filter(|e| e.name == completion_name).last();
        let fired = dependencies()
            .filter(|e| e.name != completion_name)
            .last()
            .or(completion)?;
        let triggered = group
            .iter()
            .filter(|e| e.kind == EntryKind::Request && e.name != INFRA_ENDPOINT)
            .last()?;

        let delay = triggered.timestamp - fired.timestamp;
        let delay_ms = match delay.num_microseconds() {
            Some(micros) => micros as f64 / 1000.0,
            None => delay.num_milliseconds() as f64,
        };

        Some(Self {
            operation_id: operation_id.to_owned(),
            delay_ms,
            completion_track_ms: completion.and_then(|e| e.duration_ms),
        })
    }
}

/// The trigger delays of one benchmark run.
#[derive(Debug)]
pub struct Analysis {
    /// The analyzed trigger.
    pub trigger: TriggerKind,
    /// One measurement per complete operation, ordered by operation id.
    pub measurements: Vec<Measurement>,
    /// Operations discarded as incomplete.
    pub discarded: usize,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    trigger_type: &'a str,
    latency: f64,
}

impl Analysis {
    /// Measures every complete operation in `records`.
    pub fn new(trigger: TriggerKind, records: Records) -> Self {
        let expected = Expected::for_trigger(trigger);
        let mut measurements = Vec::new();
        let mut discarded = 0;

        for (operation_id, group) in records.into_groups() {
            let measurement = expected
                .matches(&group)
                .then(|| Measurement::from_group(trigger, &operation_id, &group))
                .flatten();
            match measurement {
                Some(measurement) => measurements.push(measurement),
                None => discarded += 1,
            }
        }

        Self {
            trigger,
            measurements,
            discarded,
        }
    }

    /// The mean trigger delay in milliseconds.
    pub fn average_delay_ms(&self) -> Option<f64> {
        average(self.measurements.iter().map(|m| m.delay_ms))
    }

    /// The mean duration of the `CompletionTrack*` dependencies in milliseconds.
    pub fn average_completion_track_ms(&self) -> Option<f64> {
        average(self.measurements.iter().filter_map(|m| m.completion_track_ms))
    }

    /// Writes one `trigger_type,latency` row per measurement.
    pub fn write_csv(&self, writer: impl io::Write) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for measurement in &self.measurements {
            writer.serialize(CsvRow {
                trigger_type: self.trigger.as_str(),
                latency: measurement.delay_ms,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Prints the summary of this analysis.
    pub fn print(&self) {
        println!(
            "{} {}",
            "## Trigger delay:".bold(),
            self.trigger.as_str().bold().blue()
        );

        print!(
            "{} ({} operations",
            "VALID:".bold().green(),
            self.measurements.len().bold()
        );
        if self.discarded > 0 {
            print!(", {}", format!("{} DISCARDED", self.discarded).yellow());
        }
        println!(")");

        if self.measurements.is_empty() {
            return;
        }

        let mut sketch = DDSketch::default();
        for measurement in &self.measurements {
            sketch.add(measurement.delay_ms);
        }
        print!("  delay (ms):");
        print_percentiles(&sketch, |ms| ms);

        if let Some(avg) = self.average_completion_track_ms() {
            println!("  completion track (ms): avg: {:.2}", avg.bold());
        }
    }
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Fetches the telemetry recorded within `timespan` and measures the delays of `trigger`.
pub async fn analyze(
    client: &InsightsClient,
    trigger: TriggerKind,
    timespan: &str,
    top: usize,
) -> Result<Analysis> {
    println!("Fetching telemetry for {timespan}...");
    let (requests, dependencies, traces) = tokio::try_join!(
        client.fetch(EventTable::Requests, timespan, top),
        client.fetch(EventTable::Dependencies, timespan, top),
        client.fetch(EventTable::Traces, timespan, top),
    )
    .context("failed to fetch telemetry")?;

    for (table, rows) in [
        (EventTable::Requests, requests.len()),
        (EventTable::Dependencies, dependencies.len()),
        (EventTable::Traces, traces.len()),
    ] {
        if rows >= top {
            eprintln!("{} {table} hit the row limit of {top}", "warning:".yellow());
        }
    }

    let mut records = Records::default();
    records.add_requests(&requests);
    records.add_dependencies(&dependencies);
    records.add_traces(&traces);

    Ok(Analysis::new(trigger, records))
}
