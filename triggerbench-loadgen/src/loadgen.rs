//! Run workloads concurrently against the invoker and print latency metrics.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use yansi::Paint;

use crate::http::{HttpRemote, Outcome};
use crate::workload::{Invocation, Workload, WorkloadMode};

/// Runs the given workloads concurrently against the remote, then prints a summary.
pub async fn run(remote: HttpRemote, workloads: Vec<Workload>, duration: Duration) -> Result<()> {
    let remote = Arc::new(remote);
    println!("Running {} workloads for {duration:?}...", workloads.len());

    let tasks: Vec<_> = workloads
        .into_iter()
        .map(|workload| {
            let remote = Arc::clone(&remote);
            tokio::spawn(run_workload(remote, workload, duration))
        })
        .collect();

    let mut total_metrics = WorkloadMetrics::default();
    for task in futures::future::join_all(tasks).await {
        let (workload, metrics) = task.context("workload task panicked")?;

        println!();
        println!(
            "{} {} (trigger: {}, mode: {}, concurrency: {})",
            "## Workload".bold(),
            workload.name.bold().blue(),
            workload.trigger,
            workload.mode,
            workload.concurrency.bold()
        );
        print_metrics(&metrics, duration);

        total_metrics.merge(&metrics)?;
    }

    println!();
    println!("{}", "## TOTALS".bold());
    print_metrics(&total_metrics, duration);

    Ok(())
}

async fn run_workload(
    remote: Arc<HttpRemote>,
    mut workload: Workload,
    duration: Duration,
) -> (Workload, WorkloadMetrics) {
    let deadline = Instant::now() + duration;
    let mut metrics = WorkloadMetrics::default();

    match workload.mode {
        WorkloadMode::Constant => run_constant(&remote, &mut workload, deadline, &mut metrics).await,
        WorkloadMode::Burst => run_bursts(&remote, &mut workload, deadline, &mut metrics).await,
    }

    (workload, metrics)
}

async fn run_constant(
    remote: &Arc<HttpRemote>,
    workload: &mut Workload,
    deadline: Instant,
    metrics: &mut WorkloadMetrics,
) {
    let semaphore = Arc::new(Semaphore::new(workload.concurrency));
    let mut tasks = JoinSet::new();

    // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            permit = semaphore.clone().acquire_owned() => {
                let Ok(permit) = permit else {
                    break;
                };

                let remote = Arc::clone(remote);
                let invocation = workload.next_invocation();
                tasks.spawn(async move {
                    let sample = invoke_timed(&remote, invocation).await;
                    drop(permit);
                    sample
                });

                while let Some(sample) = tasks.try_join_next() {
                    metrics.record(sample);
                }
            }
            _ = &mut sleep => {
                break;
            }
        }
    }

    while let Some(sample) = tasks.join_next().await {
        metrics.record(sample);
    }
}

async fn run_bursts(
    remote: &Arc<HttpRemote>,
    workload: &mut Workload,
    deadline: Instant,
    metrics: &mut WorkloadMetrics,
) {
    while Instant::now() < deadline {
        let mut tasks = JoinSet::new();
        for _ in 0..workload.concurrency {
            let remote = Arc::clone(remote);
            let invocation = workload.next_invocation();
            tasks.spawn(async move { invoke_timed(&remote, invocation).await });
        }
        while let Some(sample) = tasks.join_next().await {
            metrics.record(sample);
        }

        tokio::select! {
            _ = tokio::time::sleep(workload.pause) => {}
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
}

struct Sample {
    elapsed: Duration,
    outcome: Result<Outcome>,
}

async fn invoke_timed(remote: &HttpRemote, invocation: Invocation) -> Sample {
    let start = Instant::now();
    let outcome = remote.invoke(&invocation).await;
    Sample {
        elapsed: start.elapsed(),
        outcome,
    }
}

#[derive(Default)]
struct WorkloadMetrics {
    started_timing: DDSketch,
    failed_timing: DDSketch,

    echoed: u64,
    errors: u64,
}

impl WorkloadMetrics {
    fn record(&mut self, sample: Result<Sample, JoinError>) {
        let sample = match sample {
            Ok(sample) => sample,
            Err(err) => {
                eprintln!("invocation task failed: {err}");
                self.errors += 1;
                return;
            }
        };

        let seconds = sample.elapsed.as_secs_f64();
        match sample.outcome {
            Ok(Outcome::Started) => self.started_timing.add(seconds),
            Ok(Outcome::FailedToStart(summary)) => {
                eprintln!("{summary}");
                self.failed_timing.add(seconds);
            }
            Ok(Outcome::Echoed) => self.echoed += 1,
            Err(err) => {
                eprintln!("error invoking trigger: {err:#}");
                self.errors += 1;
            }
        }
    }

    fn merge(&mut self, other: &WorkloadMetrics) -> Result<()> {
        self.started_timing
            .merge(&other.started_timing)
            .map_err(|err| anyhow::anyhow!("failed to merge sketches: {err:?}"))?;
        self.failed_timing
            .merge(&other.failed_timing)
            .map_err(|err| anyhow::anyhow!("failed to merge sketches: {err:?}"))?;
        self.echoed += other.echoed;
        self.errors += other.errors;
        Ok(())
    }
}

fn print_metrics(metrics: &WorkloadMetrics, duration: Duration) {
    let started = &metrics.started_timing;
    let failed = &metrics.failed_timing;

    print!("{} ({} ops", "STARTED:".bold().green(), started.count().bold());
    if failed.count() > 0 {
        print!(
            ", {}",
            format!("{} FAILURES", failed.count()).bold().red()
        );
    }
    if metrics.echoed > 0 {
        print!(", {}", format!("{} ECHOED", metrics.echoed).yellow());
    }
    if metrics.errors > 0 {
        print!(", {}", format!("{} ERRORS", metrics.errors).bold().red());
    }
    println!(")");

    if started.count() > 0 {
        print_ops(started, duration);
        print_percentiles(started, Duration::from_secs_f64);
    }
    if failed.count() > 0 {
        print!("  failures:");
        print_percentiles(failed, Duration::from_secs_f64);
    }
}

pub(crate) fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let quantile = |q| sketch.quantile(q).ok().flatten().unwrap_or_default();
    let avg = map(sketch.sum().unwrap_or_default() / sketch.count() as f64);
    let p50 = map(quantile(0.5));
    let p90 = map(quantile(0.9));
    let p99 = map(quantile(0.99));
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn print_ops(sketch: &DDSketch, duration: Duration) {
    let ops_ps = sketch.count() as f64 / duration.as_secs_f64();
    println!("  {:.2} invocations/s", ops_ps.bold());
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use triggerbench_service::TriggerKind;

    use super::*;

    async fn invoker(body: &'static str) -> MockServer {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/invoker");
                then.status(200).body(body);
            })
            .await;
        server
    }

    #[tokio::test]
    async fn constant_mode_counts_started_invocations() {
        let server = invoker("AZURE - Storage trigger benchmark successfully started").await;
        let remote = Arc::new(HttpRemote::new(&server.url("/api/invoker"), None).unwrap());
        let workload = Workload::builder("storage", TriggerKind::Storage, "c,a")
            .concurrency(2)
            .build();

        let (workload, metrics) =
            run_workload(remote, workload, Duration::from_millis(200)).await;

        assert!(metrics.started_timing.count() > 0);
        assert_eq!(metrics.started_timing.count() as u64, workload.iterations());
        assert_eq!(metrics.failed_timing.count(), 0);
        assert_eq!(metrics.errors, 0);
    }

    #[tokio::test]
    async fn burst_mode_fires_whole_bursts() {
        let server = invoker("AZURE - Queue trigger benchmark failed to start\n\nError: x").await;
        let remote = Arc::new(HttpRemote::new(&server.url("/api/invoker"), None).unwrap());
        let workload = Workload::builder("queue", TriggerKind::Queue, "q,a")
            .concurrency(3)
            .mode(WorkloadMode::Burst)
            .pause(Duration::from_millis(50))
            .build();

        let (workload, metrics) =
            run_workload(remote, workload, Duration::from_millis(120)).await;

        assert!(workload.iterations() >= 3);
        assert_eq!(workload.iterations() % 3, 0);
        assert_eq!(metrics.failed_timing.count() as u64, workload.iterations());
        assert_eq!(metrics.started_timing.count(), 0);
    }

    #[tokio::test]
    async fn echoed_requests_are_counted() {
        let server = invoker(r#"{"method":"GET"}"#).await;
        let remote = Arc::new(HttpRemote::new(&server.url("/api/invoker"), None).unwrap());
        let workload = Workload::builder("echo", TriggerKind::Http, "x")
            .concurrency(1)
            .mode(WorkloadMode::Burst)
            .pause(Duration::from_secs(10))
            .build();

        let (_, metrics) = run_workload(remote, workload, Duration::from_millis(50)).await;

        assert_eq!(metrics.echoed, 1);
    }
}
