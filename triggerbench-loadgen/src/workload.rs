//! A module for defining a [`Workload`] that fires invocations of a single trigger.

use std::fmt;
use std::thread::available_parallelism;
use std::time::Duration;

use serde::Deserialize;
use triggerbench_service::TriggerKind;
use triggerbench_service::invocation::{
    INPUT_PARAM, INVOKE_INPUT_PARAM, INVOKE_MODE_PARAM, ITERATION_ID_PARAM, TRIGGER_PARAM,
};

/// How invocations of a workload are spread over time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadMode {
    /// Keep `concurrency` invocations in flight until the duration elapses.
    #[default]
    Constant,
    /// Fire `concurrency` invocations at once, wait for all of them, then pause.
    Burst,
}

impl WorkloadMode {
    /// The value sent as `invokeMode`.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadMode::Constant => "constant",
            WorkloadMode::Burst => "burst",
        }
    }
}

impl fmt::Display for WorkloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A builder for creating a [`Workload`].
#[derive(Debug)]
pub struct WorkloadBuilder {
    name: String,
    trigger: TriggerKind,
    input: String,
    concurrency: usize,
    mode: WorkloadMode,
    pause: Duration,
}

impl WorkloadBuilder {
    /// The number of invocations in flight, or the size of each burst.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// How invocations are spread over time.
    pub fn mode(mut self, mode: WorkloadMode) -> Self {
        self.mode = mode;
        self
    }

    /// The pause between two bursts. Ignored in constant mode.
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Creates the workload instance.
    pub fn build(self) -> Workload {
        Workload {
            name: self.name,
            trigger: self.trigger,
            input: self.input,
            concurrency: self.concurrency,
            mode: self.mode,
            pause: self.pause,
            next_iteration: 0,
        }
    }
}

/// A series of invocations of one trigger with a fixed input.
#[derive(Debug)]
pub struct Workload {
    /// Name of the workload for identification in the summary.
    pub(crate) name: String,
    pub(crate) trigger: TriggerKind,
    /// Comma-delimited trigger input, passed through verbatim.
    pub(crate) input: String,
    pub(crate) concurrency: usize,
    pub(crate) mode: WorkloadMode,
    pub(crate) pause: Duration,

    /// Iteration id of the next invocation.
    next_iteration: u64,
}

impl Workload {
    /// Constructs a new workload builder.
    pub fn builder(
        name: impl Into<String>,
        trigger: TriggerKind,
        input: impl Into<String>,
    ) -> WorkloadBuilder {
        WorkloadBuilder {
            name: name.into(),
            trigger,
            input: input.into(),
            concurrency: available_parallelism().map_or(1, |n| n.get()),
            mode: WorkloadMode::Constant,
            pause: Duration::from_secs(1),
        }
    }

    /// Returns the number of invocations handed out so far.
    pub fn iterations(&self) -> u64 {
        self.next_iteration
    }

    pub(crate) fn next_invocation(&mut self) -> Invocation {
        let iteration_id = self.next_iteration;
        self.next_iteration += 1;

        Invocation {
            trigger: self.trigger,
            input: self.input.clone(),
            iteration_id,
            invoke_mode: self.mode,
            invoke_input: self.concurrency,
        }
    }
}

/// A single request to the invoker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    /// The trigger to fire.
    pub trigger: TriggerKind,
    /// The trigger input.
    pub input: String,
    /// Sequence number of this invocation within its workload.
    pub iteration_id: u64,
    /// Reported as `invokeMode`.
    pub invoke_mode: WorkloadMode,
    /// Reported as `invokeInput`: the concurrency or burst size.
    pub invoke_input: usize,
}

impl Invocation {
    /// The query parameters understood by the invoker.
    pub fn query(&self) -> [(&'static str, String); 5] {
        [
            (TRIGGER_PARAM, self.trigger.to_string()),
            (INPUT_PARAM, self.input.clone()),
            (ITERATION_ID_PARAM, self.iteration_id.to_string()),
            (INVOKE_MODE_PARAM, self.invoke_mode.to_string()),
            (INVOKE_INPUT_PARAM, self.invoke_input.to_string()),
        ]
    }
}
