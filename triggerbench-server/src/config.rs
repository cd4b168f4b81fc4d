//! Configuration for the triggerbench server.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Well-known Azure environment variables (see [`AZURE_ENV`])
//! 2. Environment variables (prefixed with `TB__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `TB__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `TB__HTTP_ADDR=0.0.0.0:8080` sets the HTTP server address
//! - `TB__AZURE__REQUEST_TIMEOUT=10s` bounds outbound requests
//! - `TB__LOGGING__FORMAT=json` switches to JSON logs
//!
//! The settings that Azure Functions and the benchmark deployment provide as plain environment
//! variables, such as `ACCOUNTDB_ENDPOINT` or `AZURE_CLIENT_SECRET`, are read as well. When the
//! server runs as a custom handler, `FUNCTIONS_CUSTOMHANDLER_PORT` overrides the listen port.
//!
//! # YAML Configuration File
//!
//! ```yaml
//! http_addr: 0.0.0.0:8080
//!
//! azure:
//!   tenant_id: 00000000-0000-0000-0000-000000000000
//!   request_timeout: 30s
//!
//! telemetry:
//!   runtime: rust
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "TB__";

/// Environment variable set by the Azure Functions host for custom handlers.
pub const CUSTOM_HANDLER_PORT_ENV: &str = "FUNCTIONS_CUSTOMHANDLER_PORT";

/// Unprefixed environment variables and the configuration keys they map to.
pub const AZURE_ENV: &[(&str, &str)] = &[
    ("ACCOUNTDB_ENDPOINT", "azure.cosmos_endpoint"),
    ("ACCOUNTDB_PRIMARYKEY", "azure.cosmos_key"),
    ("AZURE_TIMER_MASTERKEY", "azure.timer_master_key"),
    ("AZURE_TENANT_ID", "azure.tenant_id"),
    ("AZURE_CLIENT_ID", "azure.client_id"),
    ("AZURE_CLIENT_SECRET", "azure.client_secret"),
    ("AZURE_AUTHORITY_HOST", "azure.authority_host"),
    ("APPLICATIONINSIGHTS_CONNECTION_STRING", "telemetry.connection_string"),
    ("RUNTIME", "telemetry.runtime"),
];

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Azure service access.
///
/// Used in: [`Config::azure`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Azure {
    /// Directory (tenant) id of the service principal.
    ///
    /// # Environment Variable
    ///
    /// `AZURE_TENANT_ID` or `TB__AZURE__TENANT_ID`
    pub tenant_id: Option<String>,

    /// Application (client) id of the service principal.
    ///
    /// # Environment Variable
    ///
    /// `AZURE_CLIENT_ID` or `TB__AZURE__CLIENT_ID`
    pub client_id: Option<String>,

    /// Client secret of the service principal.
    ///
    /// # Environment Variable
    ///
    /// `AZURE_CLIENT_SECRET` or `TB__AZURE__CLIENT_SECRET`
    pub client_secret: Option<SecretBox<ConfigSecret>>,

    /// Microsoft Entra ID authority host.
    ///
    /// # Default
    ///
    /// `https://login.microsoftonline.com`
    pub authority_host: Option<String>,

    /// Cosmos DB account endpoint used by the database trigger.
    ///
    /// # Environment Variable
    ///
    /// `ACCOUNTDB_ENDPOINT`
    pub cosmos_endpoint: Option<String>,

    /// Primary key of the Cosmos DB account.
    ///
    /// # Environment Variable
    ///
    /// `ACCOUNTDB_PRIMARYKEY`
    pub cosmos_key: Option<SecretBox<ConfigSecret>>,

    /// Functions master key used to invoke timer functions.
    ///
    /// # Environment Variable
    ///
    /// `AZURE_TIMER_MASTERKEY`
    pub timer_master_key: Option<SecretBox<ConfigSecret>>,

    /// Blob service endpoint template, with an `{account}` placeholder.
    pub blob_endpoint: String,

    /// Queue service endpoint template, with an `{account}` placeholder.
    pub queue_endpoint: String,

    /// Service Bus and Event Hubs endpoint template, with a `{namespace}` placeholder.
    pub service_bus_endpoint: String,

    /// Timeout for outbound requests.
    ///
    /// # Default
    ///
    /// `None` (no timeout)
    ///
    /// # Environment Variable
    ///
    /// `TB__AZURE__REQUEST_TIMEOUT`, e.g. `30s`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for Azure {
    fn default() -> Self {
        let endpoints = triggerbench_service::backend::Endpoints::default();
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            authority_host: None,
            cosmos_endpoint: None,
            cosmos_key: None,
            timer_master_key: None,
            blob_endpoint: endpoints.blob,
            queue_endpoint: endpoints.queue,
            service_bus_endpoint: endpoints.service_bus,
            request_timeout: None,
        }
    }
}

/// Application Insights reporting.
///
/// Used in: [`Config::telemetry`]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Telemetry {
    /// Application Insights connection string. Telemetry is discarded when unset.
    ///
    /// # Environment Variable
    ///
    /// `APPLICATIONINSIGHTS_CONNECTION_STRING`
    pub connection_string: Option<SecretBox<ConfigSecret>>,

    /// Cloud role name attached to all records.
    pub cloud_role: Option<String>,

    /// Runtime label reported with every invocation.
    ///
    /// # Environment Variable
    ///
    /// `RUNTIME`
    pub runtime: Option<String>,
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the server runtime.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `TB__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,

    /// Interval for reporting internal runtime metrics.
    ///
    /// Defaults to `10s`.
    #[serde(with = "humantime_serde")]
    pub metrics_interval: Duration,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            metrics_interval: Duration::from_secs(10),
        }
    }
}

/// [Sentry](https://sentry.io/) error tracking and performance monitoring configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `TB__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name for this deployment.
    pub environment: Option<Cow<'static, str>>,

    /// Server name or identifier.
    pub server_name: Option<Cow<'static, str>>,

    /// Error event sampling rate. Defaults to `1.0`.
    pub sample_rate: f32,

    /// Performance trace sampling rate. Defaults to `0.01`.
    pub traces_sample_rate: f32,

    /// Enable Sentry SDK debug mode.
    pub debug: bool,

    /// Additional tags to attach to all Sentry events.
    ///
    /// # Environment Variables
    ///
    /// Each tag is set individually, e.g. `TB__SENTRY__TAGS__REGION=westeurope`.
    pub tags: BTreeMap<String, String>,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
            tags: BTreeMap::new(),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `TB__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`].
    ///
    /// # Environment Variable
    ///
    /// `TB__LOGGING__FORMAT`
    #[serde(with = "display_fromstr")]
    pub format: LogFormat,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Auto => "auto",
            LogFormat::Pretty => "pretty",
            LogFormat::Simplified => "simplified",
            LogFormat::Json => "json",
        })
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Metrics configuration.
///
/// Configures submission of internal metrics to Datadog.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// Datadog API key for metrics. Metrics are disabled when unset.
    ///
    /// # Environment Variable
    ///
    /// `TB__METRICS__DATADOG_KEY`
    pub datadog_key: Option<SecretBox<ConfigSecret>>,

    /// Global tags applied to all metrics.
    ///
    /// # Environment Variables
    ///
    /// Each tag is set individually, e.g. `TB__METRICS__TAGS__REGION=westeurope`.
    pub tags: BTreeMap<String, String>,
}

/// Main configuration struct for the triggerbench server.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server bind address.
    ///
    /// # Default
    ///
    /// `0.0.0.0:8080`
    ///
    /// # Environment Variable
    ///
    /// `TB__HTTP_ADDR`. The port is replaced by `FUNCTIONS_CUSTOMHANDLER_PORT` when set.
    pub http_addr: SocketAddr,

    /// Azure credentials, keys and endpoints. See [`Azure`].
    pub azure: Azure,

    /// Application Insights reporting. See [`Telemetry`].
    pub telemetry: Telemetry,

    /// Configuration of the internal task runtime.
    pub runtime: Runtime,

    /// Logging configuration.
    pub logging: Logging,

    /// Sentry error tracking configuration.
    pub sentry: Sentry,

    /// Internal metrics configuration.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            azure: Azure::default(),
            telemetry: Telemetry::default(),
            runtime: Runtime::default(),
            logging: Logging::default(),
            sentry: Sentry::default(),
            metrics: Metrics::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `TB__`)
    /// 4. Well-known Azure environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if any source contains
    /// invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let mut config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(azure_env())
            .extract()?;

        if let Some(port) = Env::var(CUSTOM_HANDLER_PORT_ENV) {
            let port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid {CUSTOM_HANDLER_PORT_ENV} `{port}`"))?;
            config.http_addr.set_port(port);
        }

        Ok(config)
    }
}

fn azure_env() -> Env {
    Env::raw().filter_map(|key| {
        AZURE_ENV
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map(|(_, path)| (*path).into())
    })
}
