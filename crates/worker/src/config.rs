use std::time::Duration;

use trackq_runner::RunnerConfig;

use crate::monitor::{MonitorConfig, PollPolicy};

/// Default processing image.
pub const DEFAULT_RUNNER_IMAGE: &str = "mbari/strongsort-yolov5:latest";
/// Default container name prefix.
pub const DEFAULT_NAME_PREFIX: &str = "trackq-runner";
/// Fixed tracker arguments handed to every run.
pub const DEFAULT_RUNNER_ARGS: &str = "--iou-thres 0.5 --conf-thres 0.01 --agnostic-nms --max-det 100";

const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_POLL_ATTEMPTS: u32 = 3;

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Container image and naming.
    pub runner: RunnerConfig,
    /// Output location, run arguments and completion polling.
    pub monitor: MonitorConfig,
    /// Time between monitor cycles.
    pub monitor_interval: Duration,
    /// Format of the tracing output.
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                 | Required | Default                          |
    /// |-------------------------|----------|----------------------------------|
    /// | `DATABASE_URL`          | yes      |                                  |
    /// | `S3_ROOT_BUCKET`        | yes      |                                  |
    /// | `S3_TRACK_PREFIX`       | yes      |                                  |
    /// | `S3_TRACK_CONFIG`       | yes      |                                  |
    /// | `RUNNER_IMAGE`          | no       | `mbari/strongsort-yolov5:latest` |
    /// | `RUNNER_NAME_PREFIX`    | no       | `trackq-runner`                  |
    /// | `RUNNER_ARGS`           | no       | see [`DEFAULT_RUNNER_ARGS`]      |
    /// | `MONITOR_INTERVAL_SECS` | no       | `30`                             |
    /// | `POLL_INTERVAL_SECS`    | no       | `30`                             |
    /// | `POLL_ATTEMPTS`         | no       | `3`                              |
    /// | `LOG_FORMAT`            | no       | `text` (`json` for structured)   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let optional = |var: &'static str, default: &str| -> String {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let monitor_interval_secs: u64 =
            parse_or(&lookup, "MONITOR_INTERVAL_SECS", DEFAULT_MONITOR_INTERVAL_SECS)?;
        let poll_interval_secs: u64 =
            parse_or(&lookup, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let poll_attempts: u32 = parse_or(&lookup, "POLL_ATTEMPTS", DEFAULT_POLL_ATTEMPTS)?;
        if poll_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let log_format = match optional("LOG_FORMAT", "text").to_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            runner: RunnerConfig {
                image: optional("RUNNER_IMAGE", DEFAULT_RUNNER_IMAGE),
                name_prefix: optional("RUNNER_NAME_PREFIX", DEFAULT_NAME_PREFIX),
            },
            monitor: MonitorConfig {
                bucket: required("S3_ROOT_BUCKET")?,
                track_prefix: required("S3_TRACK_PREFIX")?,
                track_config: required("S3_TRACK_CONFIG")?,
                args: optional("RUNNER_ARGS", DEFAULT_RUNNER_ARGS),
                poll: PollPolicy {
                    interval: Duration::from_secs(poll_interval_secs),
                    attempts: poll_attempts,
                },
            },
            monitor_interval: Duration::from_secs(monitor_interval_secs),
            log_format,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var).map(|v| v.trim().to_string()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { var, value: v }),
    }
}
