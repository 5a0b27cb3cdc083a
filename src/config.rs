//! Configuration loading and types for bucketline.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The `storage` section describes the remote
//! buckets, credentials, and the retry and hedging policies; the
//! `logging` section controls the tracing subscriber of the CLI.

use garde::Validate;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::listing::DEFAULT_MAX_PAGES;
use crate::secret::Secret;
use crate::transport::{Decorator, MiddlewareChain};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Object storage client settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Remote object storage configuration.
///
/// Field names follow the usual S3 client YAML layout:
/// `access_key_id`, `secret_access_key`, `session_token`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// Buckets to use. The first one is the primary bucket for writes.
    /// Accepts a YAML list or a comma-separated string.
    #[serde(default, deserialize_with = "deserialize_bucket_names")]
    #[garde(
        length(min = 1),
        inner(length(min = 3, max = 63), pattern(r"^[a-z0-9][a-z0-9.\-]*[a-z0-9]$"))
    )]
    pub bucket_names: Vec<String>,

    /// Custom S3-compatible endpoint (e.g. MinIO). Empty means AWS.
    #[serde(default)]
    #[garde(skip)]
    pub endpoint: String,

    /// Region to sign requests for.
    #[serde(default = "default_region")]
    #[garde(skip)]
    pub region: String,

    /// Force path-style URL addressing.
    #[serde(default)]
    #[garde(skip)]
    pub s3_force_path_style: bool,

    /// Skip TLS certificate verification.
    #[serde(default)]
    #[garde(skip)]
    pub insecure: bool,

    /// Access key id. Not a secret; rendered in plain text.
    #[serde(default)]
    #[garde(skip)]
    pub access_key_id: String,

    /// Secret access key.
    #[serde(default)]
    #[garde(skip)]
    pub secret_access_key: Secret,

    /// Optional session token. Empty means not set.
    #[serde(default)]
    #[garde(skip)]
    pub session_token: Secret,

    /// Retry policy for every backend call.
    #[serde(default)]
    #[garde(dive)]
    pub backoff_config: RetryConfig,

    /// Hedging policy for GET requests.
    #[serde(default)]
    #[garde(skip)]
    pub hedging: HedgingConfig,

    /// Upper bound on pages fetched by one listing (0 = unlimited).
    #[serde(default = "default_list_max_pages")]
    #[garde(skip)]
    pub list_max_pages: usize,

    /// Decorators applied to every outbound HTTP request.
    #[serde(skip)]
    #[garde(skip)]
    pub middleware: MiddlewareChain,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_names: Vec::new(),
            endpoint: String::new(),
            region: default_region(),
            s3_force_path_style: false,
            insecure: false,
            access_key_id: String::new(),
            secret_access_key: Secret::default(),
            session_token: Secret::default(),
            backoff_config: RetryConfig::default(),
            hedging: HedgingConfig::default(),
            list_max_pages: default_list_max_pages(),
            middleware: MiddlewareChain::default(),
        }
    }
}

impl StorageConfig {
    /// Create a config for the given buckets with defaults elsewhere.
    pub fn new<I, S>(bucket_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bucket_names: bucket_names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set static credentials.
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<Secret>,
    ) -> Self {
        self.access_key_id = access_key_id.into();
        self.secret_access_key = secret_access_key.into();
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.backoff_config = retry;
        self
    }

    /// Set the hedging policy.
    pub fn with_hedging(mut self, hedging: HedgingConfig) -> Self {
        self.hedging = hedging;
        self
    }

    /// Register a transport decorator. Decorators registered first see
    /// outbound requests first.
    pub fn with_middleware(mut self, decorator: Decorator) -> Self {
        self.middleware.push(decorator);
        self
    }

    /// The bucket that receives writes.
    pub fn primary_bucket(&self) -> Option<&str> {
        self.bucket_names.first().map(String::as_str)
    }
}

/// When writes may be retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Writes are attempted once.
    Never,
    /// Writes are retried only after an explicit transient answer from the
    /// backend, never after a timeout or dropped connection.
    #[default]
    Unambiguous,
    /// Writes are retried like reads.
    Always,
}

/// Retry / backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Retries allowed after the first failed attempt (0 = single attempt).
    #[serde(default = "default_max_retries")]
    #[garde(skip)]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_min_period", with = "duration_str")]
    #[garde(skip)]
    pub min_period: Duration,

    /// Upper bound on any single delay.
    #[serde(default = "default_max_period", with = "duration_str")]
    #[garde(custom(max_not_below_min(&self.min_period)))]
    pub max_period: Duration,

    /// Retry behaviour for PUT and DELETE.
    #[serde(default)]
    #[garde(skip)]
    pub write_policy: WritePolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_period: default_min_period(),
            max_period: default_max_period(),
            write_policy: WritePolicy::default(),
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff bounds.
    pub fn with_backoff(mut self, min_period: Duration, max_period: Duration) -> Self {
        self.min_period = min_period;
        self.max_period = max_period;
        self
    }

    /// Set the write retry policy.
    pub fn with_write_policy(mut self, write_policy: WritePolicy) -> Self {
        self.write_policy = write_policy;
        self
    }
}

fn max_not_below_min(min: &Duration) -> impl FnOnce(&Duration, &()) -> garde::Result + '_ {
    move |max, _| {
        if max < min {
            return Err(garde::Error::new("max_period must not be below min_period"));
        }
        Ok(())
    }
}

/// Request hedging policy for GET.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgingConfig {
    /// Issue a hedge when an attempt has been pending this long (0 = off).
    #[serde(default, with = "duration_str")]
    pub at: Duration,

    /// Hedge rounds allowed beyond the primary attempt.
    #[serde(default = "default_up_to")]
    pub up_to: u32,

    /// Hedges the whole client may issue per second (0 = unlimited).
    #[serde(default = "default_max_per_second")]
    pub max_per_second: u32,
}

impl Default for HedgingConfig {
    fn default() -> Self {
        Self {
            at: Duration::ZERO,
            up_to: default_up_to(),
            max_per_second: default_max_per_second(),
        }
    }
}

impl HedgingConfig {
    /// Hedging configuration with all three knobs set.
    pub fn new(at: Duration, up_to: u32, max_per_second: u32) -> Self {
        Self {
            at,
            up_to,
            max_per_second,
        }
    }

    /// Whether GETs are hedged at all.
    pub fn enabled(&self) -> bool {
        !self.at.is_zero() && self.up_to > 0
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_min_period() -> Duration {
    Duration::from_millis(100)
}

fn default_max_period() -> Duration {
    Duration::from_secs(10)
}

fn default_up_to() -> u32 {
    2
}

fn default_list_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_max_per_second() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Serde helpers -----------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum BucketNames {
    List(Vec<String>),
    Joined(String),
}

fn deserialize_bucket_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = match Option::<BucketNames>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(BucketNames::List(names)) => names,
        Some(BucketNames::Joined(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    };
    Ok(names)
}

/// Durations as `"20ns"`, `"250ms"`, `"1s"`, `"2m"`, `"1h"`, or a bare
/// integer number of milliseconds.
pub mod duration_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const UNITS: &[(&str, u128)] = &[
        ("h", 3_600_000_000_000),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// Render using the largest unit that represents `duration` exactly.
    pub fn format(duration: Duration) -> String {
        let nanos = duration.as_nanos();
        if nanos == 0 {
            return "0s".to_string();
        }
        for (suffix, scale) in UNITS {
            if nanos % scale == 0 {
                return format!("{}{}", nanos / scale, suffix);
            }
        }
        format!("{nanos}ns")
    }

    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("duration {text:?} is missing a unit"))?;
        let (digits, suffix) = text.split_at(split);
        let value: u128 = digits
            .parse()
            .map_err(|_| format!("invalid duration {text:?}"))?;
        let scale = UNITS
            .iter()
            .find(|(unit, _)| *unit == suffix)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| format!("unknown duration unit {suffix:?} in {text:?}"))?;
        let nanos = value
            .checked_mul(scale)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| format!("duration {text:?} is too large"))?;
        Ok(Duration::from_nanos(nanos))
    }
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    config.storage.validate()?;
    Ok(config)
}

/// Render configuration as YAML with every secret masked.
pub fn render_config(config: &Config) -> anyhow::Result<String> {
    Ok(serde_yaml::to_string(config)?)
}

// -- Tests --------------------------------------------------------------------
