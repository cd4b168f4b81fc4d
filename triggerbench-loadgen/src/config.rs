//! The YAML configuration of a load generator run.

use std::time::Duration;

use serde::Deserialize;
use triggerbench_service::TriggerKind;

use crate::workload::{Workload, WorkloadMode};

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// URL of the invoker endpoint, e.g. `https://app.azurewebsites.net/api/invoker`.
    pub remote: String,

    /// How long every workload runs.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Timeout of a single invocation.
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// The workloads to run concurrently.
    pub workloads: Vec<WorkloadConfig>,
}

/// Configuration of one [`Workload`].
#[derive(Debug, Deserialize)]
pub struct WorkloadConfig {
    /// Name shown in the summary.
    pub name: String,
    /// The trigger to fire, e.g. `storage`.
    pub trigger: TriggerKind,
    /// The comma-delimited trigger input.
    pub input: String,
    /// Invocations in flight, or the size of each burst.
    pub concurrency: usize,
    /// See [`WorkloadMode`].
    #[serde(default)]
    pub mode: WorkloadMode,
    /// Pause between bursts.
    #[serde(default, with = "humantime_serde")]
    pub pause: Option<Duration>,
}

impl WorkloadConfig {
    /// Creates the configured workload.
    pub fn build(self) -> Workload {
        let mut builder = Workload::builder(self.name, self.trigger, self.input)
            .concurrency(self.concurrency)
            .mode(self.mode);
        if let Some(pause) = self.pause {
            builder = builder.pause(pause);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml() {
        let config: Config = serde_yaml::from_str(
            r#"
            remote: http://localhost:8080/api/invoker
            duration: 1m
            workloads:
              - name: storage
                trigger: storage
                input: containerA,accountB
                concurrency: 10
              - name: bursty queue
                trigger: queue
                input: queueA,accountB
                concurrency: 50
                mode: burst
                pause: 30s
            "#,
        )
        .unwrap();

        assert_eq!(config.duration, Duration::from_secs(60));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.workloads.len(), 2);

        let queue = &config.workloads[1];
        assert_eq!(queue.trigger, TriggerKind::Queue);
        assert_eq!(queue.mode, WorkloadMode::Burst);
        assert_eq!(queue.pause, Some(Duration::from_secs(30)));
        assert_eq!(config.workloads[0].mode, WorkloadMode::Constant);
    }

    #[test]
    fn rejects_unknown_trigger() {
        let result: Result<Config, _> = serde_yaml::from_str(
            r#"
            remote: http://localhost:8080/api/invoker
            duration: 1m
            workloads:
              - name: ftp
                trigger: ftp
                input: x
                concurrency: 1
            "#,
        );
        assert!(result.is_err());
    }
}
