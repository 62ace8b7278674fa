use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Sentinel used in the configuration surface for "use the default"
pub const UNSET: i64 = -1;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
pub const DEFAULT_TIMEOUT_THRESHOLD_MILLIS: u64 = 5 * 60 * 1000;
pub const DEFAULT_TIMEOUT_CHECK_PULSE_MILLIS: u64 = 1000;
pub const DEFAULT_MAX_TIMED_OUT_CONSUMERS: u64 = 100;
pub const DEFAULT_PAUSE_ON_EARLY_TERMINATION_MILLIS: u64 = 1000;
pub const DEFAULT_STATUS_REPORT_INTERVAL_MILLIS: u64 = 5000;
pub const DEFAULT_MAX_RESOURCE_ATTEMPTS: u32 = 3;

pub const DEFAULT_MAX_RESTARTS: u32 = 20;
pub const DEFAULT_RESTART_DELAY_MILLIS: u64 = 1000;
pub const DEFAULT_KILL_GRACE_SECONDS: u64 = 30;

fn unset() -> i64 {
    UNSET
}

/// Main configuration structure for Batchward
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    pub source: SourceConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub interrupter: InterrupterConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub relaunch: RelaunchSettings,
}

impl Config {
    /// Resolves the `[supervisor]` table into its immutable runtime form
    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig::resolve(&self.supervisor)
    }
}

/// Raw `[supervisor]` table; every value may be `-1` or absent for "default"
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSettings {
    /// Number of parallel consumer workers
    #[serde(rename = "num-consumers", default = "unset")]
    pub num_consumers: i64,

    /// Capacity of the resource queue between crawler and consumers
    #[serde(rename = "max-queue-size", default = "unset")]
    pub max_queue_size: i64,

    /// Heartbeat age after which an active consumer counts as hung
    #[serde(rename = "timeout-threshold-millis", default = "unset")]
    pub timeout_threshold_millis: i64,

    /// Sleep between monitor iterations
    #[serde(rename = "timeout-check-pulse-millis", default = "unset")]
    pub timeout_check_pulse_millis: i64,

    /// Number of timed-out consumers tolerated before the process gives up
    #[serde(rename = "max-timed-out-consumers", default = "unset")]
    pub max_timed_out_consumers: i64,

    /// Global wall-clock budget for one process incarnation
    #[serde(rename = "max-alive-time-seconds", default = "unset")]
    pub max_alive_time_seconds: i64,

    /// Grace period before declaring an apparently finished batch complete
    #[serde(rename = "pause-on-early-termination-millis", default = "unset")]
    pub pause_on_early_termination_millis: i64,

    /// How often the status reporter takes a snapshot
    #[serde(rename = "status-report-interval-millis", default = "unset")]
    pub status_report_interval_millis: i64,

    /// Claims without a terminal outcome before a resource is abandoned
    #[serde(rename = "max-resource-attempts", default = "unset")]
    pub max_resource_attempts: i64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            num_consumers: UNSET,
            max_queue_size: UNSET,
            timeout_threshold_millis: UNSET,
            timeout_check_pulse_millis: UNSET,
            max_timed_out_consumers: UNSET,
            max_alive_time_seconds: UNSET,
            pause_on_early_termination_millis: UNSET,
            status_report_interval_millis: UNSET,
            max_resource_attempts: UNSET,
        }
    }
}

/// Immutable supervisor settings with every default resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub num_consumers: usize,
    pub max_queue_size: usize,
    pub timeout_threshold: Duration,
    pub timeout_check_pulse: Duration,
    pub max_timed_out_consumers: u64,
    /// `None` disables the global watchdog
    pub max_alive_time: Option<Duration>,
    pub pause_on_early_termination: Duration,
    pub status_report_interval: Duration,
    pub max_resource_attempts: u32,
}

impl SupervisorConfig {
    /// Resolves raw settings, replacing negative values with defaults
    ///
    /// Callers are expected to have run validation first; values that slipped
    /// through as zero where zero is meaningless are clamped to one.
    pub fn resolve(raw: &SupervisorSettings) -> Self {
        Self {
            num_consumers: resolved(raw.num_consumers)
                .map(|n| n.max(1) as usize)
                .unwrap_or_else(default_num_consumers),
            max_queue_size: resolved(raw.max_queue_size)
                .map(|n| n.max(1) as usize)
                .unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
            timeout_threshold: Duration::from_millis(
                resolved(raw.timeout_threshold_millis)
                    .map(|n| n.max(1))
                    .unwrap_or(DEFAULT_TIMEOUT_THRESHOLD_MILLIS),
            ),
            timeout_check_pulse: Duration::from_millis(
                resolved(raw.timeout_check_pulse_millis)
                    .map(|n| n.max(1))
                    .unwrap_or(DEFAULT_TIMEOUT_CHECK_PULSE_MILLIS),
            ),
            max_timed_out_consumers: resolved(raw.max_timed_out_consumers)
                .unwrap_or(DEFAULT_MAX_TIMED_OUT_CONSUMERS),
            max_alive_time: resolved(raw.max_alive_time_seconds)
                .map(|n| Duration::from_secs(n.max(1))),
            pause_on_early_termination: Duration::from_millis(
                resolved(raw.pause_on_early_termination_millis)
                    .unwrap_or(DEFAULT_PAUSE_ON_EARLY_TERMINATION_MILLIS),
            ),
            status_report_interval: Duration::from_millis(
                resolved(raw.status_report_interval_millis)
                    .map(|n| n.max(1))
                    .unwrap_or(DEFAULT_STATUS_REPORT_INTERVAL_MILLIS),
            ),
            max_resource_attempts: resolved(raw.max_resource_attempts)
                .map(|n| n.clamp(1, u32::MAX as u64) as u32)
                .unwrap_or(DEFAULT_MAX_RESOURCE_ATTEMPTS),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::resolve(&SupervisorSettings::default())
    }
}

/// Returns `Some(value)` for configured values and `None` for the unset sentinel
pub(crate) fn resolved(value: i64) -> Option<u64> {
    if value < 0 {
        None
    } else {
        Some(value as u64)
    }
}

fn default_dedupe() -> bool {
    true
}

fn default_num_consumers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Where resources come from
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceConfig {
    /// Recursive walk of a directory tree
    Filesystem {
        root: PathBuf,

        #[serde(rename = "follow-links", default)]
        follow_links: bool,

        /// Only files with one of these extensions (case-insensitive); empty means all
        #[serde(default)]
        extensions: Vec<String>,
    },

    /// A text file listing one path per line
    List {
        path: PathBuf,

        /// Enumerate a repeated line only once; remembers every entry for the scan
        #[serde(default = "default_dedupe")]
        dedupe: bool,
    },
}

/// Which extraction capability consumers invoke
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExtractorConfig {
    /// SHA-256 digest of the file contents
    #[default]
    Digest,

    /// External program run once per resource
    Command {
        program: String,

        /// Arguments; `{}` is replaced by the resource path
        #[serde(default)]
        args: Vec<String>,

        /// Exit codes that mean the environment itself is broken
        #[serde(rename = "no-restart-exit-codes", default)]
        no_restart_exit_codes: Vec<i32>,
    },
}

/// Status reporter sink
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReporterConfig {
    None,

    #[default]
    Log,

    JsonFile { path: PathBuf },
}

/// Operator stop mechanism
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InterrupterConfig {
    None,

    StopFile { path: PathBuf },

    #[default]
    Signal,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database recording per-resource outcomes
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Raw `[relaunch]` table for the outer relaunch loop
#[derive(Debug, Clone, Deserialize)]
pub struct RelaunchSettings {
    #[serde(rename = "max-restarts", default = "unset")]
    pub max_restarts: i64,

    #[serde(rename = "max-total-seconds", default = "unset")]
    pub max_total_seconds: i64,

    #[serde(rename = "restart-delay-millis", default = "unset")]
    pub restart_delay_millis: i64,

    /// Extra time past `max-alive-time-seconds` before the child is killed
    #[serde(rename = "kill-grace-seconds", default = "unset")]
    pub kill_grace_seconds: i64,
}

impl Default for RelaunchSettings {
    fn default() -> Self {
        Self {
            max_restarts: UNSET,
            max_total_seconds: UNSET,
            restart_delay_millis: UNSET,
            kill_grace_seconds: UNSET,
        }
    }
}
