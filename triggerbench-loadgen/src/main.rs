//! Fires benchmark invocations at a triggerbench invoker and summarizes the latencies.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use secrecy::SecretString;
use triggerbench_service::TriggerKind;

use triggerbench_loadgen::analysis;
use triggerbench_loadgen::config::Config;
use triggerbench_loadgen::http::HttpRemote;
use triggerbench_loadgen::insights::{DEFAULT_ENDPOINT, DEFAULT_TOP, InsightsClient};

/// Load generator for the triggerbench invoker
#[derive(Debug, FromArgs)]
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Analyze(AnalyzeCommand),
}

/// fire the configured workloads at the invoker
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// path to the yaml configuration file
    #[argh(option, short = 'c')]
    config: PathBuf,
}

/// measure trigger delays from Application Insights telemetry
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "analyze")]
struct AnalyzeCommand {
    /// the trigger to analyze, e.g. `storage`
    #[argh(option, short = 't')]
    trigger: TriggerKind,

    /// ISO 8601 duration or interval of the benchmark run, e.g. `PT1H`
    #[argh(option, default = "String::from(\"P1D\")")]
    timespan: String,

    /// application id, defaults to `INSIGHTS_APP_ID`
    #[argh(option)]
    app_id: Option<String>,

    /// API key, defaults to `INSIGHTS_API_KEY`
    #[argh(option)]
    api_key: Option<String>,

    /// maximum number of rows fetched per table
    #[argh(option, default = "DEFAULT_TOP")]
    top: usize,

    /// base URL of the Application Insights API
    #[argh(option, default = "String::from(DEFAULT_ENDPOINT)")]
    endpoint: String,

    /// write the measured delays to this CSV file
    #[argh(option)]
    csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Args = argh::from_env();
    match args.command {
        Command::Run(command) => run(command).await,
        Command::Analyze(command) => analyze(command).await,
    }
}

async fn run(command: RunCommand) -> Result<()> {
    let config_file = std::fs::File::open(command.config).context("failed to open config file")?;
    let config: Config =
        serde_yaml::from_reader(config_file).context("failed to parse config YAML")?;

    let remote = HttpRemote::new(&config.remote, config.request_timeout)?;
    let workloads = config.workloads.into_iter().map(|w| w.build()).collect();

    triggerbench_loadgen::run(remote, workloads, config.duration).await
}

async fn analyze(command: AnalyzeCommand) -> Result<()> {
    let app_id = setting(command.app_id, "INSIGHTS_APP_ID")?;
    let api_key = setting(command.api_key, "INSIGHTS_API_KEY")?;
    let client = InsightsClient::new(&command.endpoint, app_id, SecretString::from(api_key))?;

    let analysis =
        analysis::analyze(&client, command.trigger, &command.timespan, command.top).await?;
    println!();
    analysis.print();

    if let Some(path) = command.csv {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        analysis.write_csv(file)?;
        println!("Wrote {} delays to {}", analysis.measurements.len(), path.display());
    }

    Ok(())
}

fn setting(value: Option<String>, env: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => std::env::var(env).with_context(|| format!("pass the option or set {env}")),
    }
}
