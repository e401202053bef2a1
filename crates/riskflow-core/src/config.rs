//! Service configuration read from the environment.
//!
//! Every key has a safe default. Values that are present but unparseable are
//! rejected rather than silently replaced by the default.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Upper bound for every duration setting (30 days).
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

fn ensure_duration(key: &str, secs: u64) -> ConfigResult<()> {
    if secs > MAX_DURATION_SECS {
        return Err(ConfigError::Constraint(format!(
            "{key} ({secs}s) exceeds the {MAX_DURATION_SECS}s limit"
        )));
    }
    Ok(())
}

/// Thresholds and limits for the autoscaling controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Pending jobs above which the pool scales up.
    pub scale_up_threshold: usize,
    /// Pending jobs below which the pool may scale down.
    pub scale_down_threshold: usize,
    /// Pending jobs above which the pool jumps straight to `max_workers`.
    pub emergency_threshold: usize,
    pub scale_up_cooldown_secs: u64,
    pub scale_down_cooldown_secs: u64,
    /// Workers added or removed by a regular scaling step.
    pub scale_step: usize,
    /// Consecutive low ticks required before scaling down.
    pub scale_down_stable_ticks: usize,
    pub interval_secs: u64,
    /// Scaling records retained for inspection.
    pub history_len: usize,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            scale_up_threshold: 25,
            scale_down_threshold: 5,
            emergency_threshold: 100,
            scale_up_cooldown_secs: 120,
            scale_down_cooldown_secs: 600,
            scale_step: 1,
            scale_down_stable_ticks: 3,
            interval_secs: 60,
            history_len: 256,
        }
    }
}

impl ScalingConfig {
    pub fn scale_up_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_up_cooldown_secs)
    }

    pub fn scale_down_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_down_cooldown_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn clamp(&self, workers: usize) -> usize {
        workers.clamp(self.min_workers, self.max_workers)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_workers < 1 {
            return Err(ConfigError::Constraint(
                "MIN_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(ConfigError::Constraint(format!(
                "MIN_WORKERS ({}) exceeds MAX_WORKERS ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.scale_down_threshold == 0 {
            return Err(ConfigError::Constraint(
                "SCALE_DOWN_THRESHOLD must be positive".to_string(),
            ));
        }
        if self.scale_down_threshold >= self.scale_up_threshold
            || self.scale_up_threshold >= self.emergency_threshold
        {
            return Err(ConfigError::Constraint(format!(
                "thresholds must satisfy scale-down ({}) < scale-up ({}) < emergency ({})",
                self.scale_down_threshold, self.scale_up_threshold, self.emergency_threshold
            )));
        }
        if self.scale_step == 0 {
            return Err(ConfigError::Constraint("SCALE_STEP must be positive".to_string()));
        }
        if self.scale_down_stable_ticks == 0 {
            return Err(ConfigError::Constraint(
                "SCALE_DOWN_STABLE_TICKS must be positive".to_string(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Constraint(
                "SCALING_INTERVAL_SECONDS must be positive".to_string(),
            ));
        }
        ensure_duration("SCALE_UP_COOLDOWN_SECONDS", self.scale_up_cooldown_secs)?;
        ensure_duration("SCALE_DOWN_COOLDOWN_SECONDS", self.scale_down_cooldown_secs)?;
        ensure_duration("SCALING_INTERVAL_SECONDS", self.interval_secs)
    }
}

/// Per-executor behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Executors hosted by each worker instance.
    pub concurrency: usize,
    pub job_timeout_secs: u64,
    pub dequeue_timeout_ms: u64,
    /// Heartbeat age after which an idle executor is reported stale.
    pub heartbeat_stale_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            job_timeout_secs: 600,
            dequeue_timeout_ms: 1000,
            heartbeat_stale_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn heartbeat_stale(&self) -> Duration {
        Duration::from_secs(self.heartbeat_stale_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == 0 {
            return Err(ConfigError::Constraint(
                "WORKER_CONCURRENCY must be positive".to_string(),
            ));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::Constraint(
                "JOB_TIMEOUT_SECONDS must be positive".to_string(),
            ));
        }
        if self.dequeue_timeout_ms == 0 {
            return Err(ConfigError::Constraint(
                "DEQUEUE_TIMEOUT_MS must be positive".to_string(),
            ));
        }
        ensure_duration("JOB_TIMEOUT_SECONDS", self.job_timeout_secs)?;
        ensure_duration("DEQUEUE_TIMEOUT_MS", self.dequeue_timeout_ms / 1000)?;
        ensure_duration("HEARTBEAT_STALE_SECONDS", self.heartbeat_stale_secs)
    }
}

/// Submission, chunking and lane settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Per-lane job capacity; `None` is unbounded.
    pub lane_capacity: Option<usize>,
    pub chunk_size: usize,
    pub max_rows_per_submission: usize,
    /// Throughput of one executor, used for completion estimates.
    pub rows_per_minute_per_worker: usize,
    pub high_lane_max_rows: usize,
    pub medium_lane_max_rows: usize,
    /// Terminal jobs older than this are purged.
    pub result_retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lane_capacity: None,
            chunk_size: 500,
            max_rows_per_submission: 100_000,
            rows_per_minute_per_worker: 6000,
            high_lane_max_rows: 100,
            medium_lane_max_rows: 5000,
            result_retention_secs: 3600,
        }
    }
}

impl QueueConfig {
    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.lane_capacity == Some(0) {
            return Err(ConfigError::Constraint(
                "LANE_CAPACITY must be positive when set".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Constraint("CHUNK_SIZE must be positive".to_string()));
        }
        if self.max_rows_per_submission == 0 {
            return Err(ConfigError::Constraint(
                "MAX_ROWS_PER_SUBMISSION must be positive".to_string(),
            ));
        }
        if self.rows_per_minute_per_worker == 0 {
            return Err(ConfigError::Constraint(
                "ROWS_PER_MINUTE_PER_WORKER must be positive".to_string(),
            ));
        }
        if self.high_lane_max_rows > self.medium_lane_max_rows {
            return Err(ConfigError::Constraint(format!(
                "HIGH_LANE_MAX_ROWS ({}) exceeds MEDIUM_LANE_MAX_ROWS ({})",
                self.high_lane_max_rows, self.medium_lane_max_rows
            )));
        }
        ensure_duration("RESULT_RETENTION_SECONDS", self.result_retention_secs)
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub scaling: ScalingConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
}

impl ServiceConfig {
    /// Read from the process environment and validate.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through `lookup` (a map in tests, the environment in production).
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = ServiceConfig::default();
        let scaling = ScalingConfig {
            min_workers: read(&lookup, "MIN_WORKERS", d.scaling.min_workers)?,
            max_workers: read(&lookup, "MAX_WORKERS", d.scaling.max_workers)?,
            scale_up_threshold: read(&lookup, "SCALE_UP_THRESHOLD", d.scaling.scale_up_threshold)?,
            scale_down_threshold: read(
                &lookup,
                "SCALE_DOWN_THRESHOLD",
                d.scaling.scale_down_threshold,
            )?,
            emergency_threshold: read(
                &lookup,
                "EMERGENCY_THRESHOLD",
                d.scaling.emergency_threshold,
            )?,
            scale_up_cooldown_secs: read(
                &lookup,
                "SCALE_UP_COOLDOWN_SECONDS",
                d.scaling.scale_up_cooldown_secs,
            )?,
            scale_down_cooldown_secs: read(
                &lookup,
                "SCALE_DOWN_COOLDOWN_SECONDS",
                d.scaling.scale_down_cooldown_secs,
            )?,
            scale_step: read(&lookup, "SCALE_STEP", d.scaling.scale_step)?,
            scale_down_stable_ticks: read(
                &lookup,
                "SCALE_DOWN_STABLE_TICKS",
                d.scaling.scale_down_stable_ticks,
            )?,
            interval_secs: read(&lookup, "SCALING_INTERVAL_SECONDS", d.scaling.interval_secs)?,
            history_len: read(&lookup, "SCALING_HISTORY_LEN", d.scaling.history_len)?,
        };
        let worker = WorkerConfig {
            concurrency: read(&lookup, "WORKER_CONCURRENCY", d.worker.concurrency)?,
            job_timeout_secs: read(&lookup, "JOB_TIMEOUT_SECONDS", d.worker.job_timeout_secs)?,
            dequeue_timeout_ms: read(&lookup, "DEQUEUE_TIMEOUT_MS", d.worker.dequeue_timeout_ms)?,
            heartbeat_stale_secs: read(
                &lookup,
                "HEARTBEAT_STALE_SECONDS",
                d.worker.heartbeat_stale_secs,
            )?,
        };
        let queue = QueueConfig {
            lane_capacity: read_optional(&lookup, "LANE_CAPACITY")?,
            chunk_size: read(&lookup, "CHUNK_SIZE", d.queue.chunk_size)?,
            max_rows_per_submission: read(
                &lookup,
                "MAX_ROWS_PER_SUBMISSION",
                d.queue.max_rows_per_submission,
            )?,
            rows_per_minute_per_worker: read(
                &lookup,
                "ROWS_PER_MINUTE_PER_WORKER",
                d.queue.rows_per_minute_per_worker,
            )?,
            high_lane_max_rows: read(&lookup, "HIGH_LANE_MAX_ROWS", d.queue.high_lane_max_rows)?,
            medium_lane_max_rows: read(
                &lookup,
                "MEDIUM_LANE_MAX_ROWS",
                d.queue.medium_lane_max_rows,
            )?,
            result_retention_secs: read(
                &lookup,
                "RESULT_RETENTION_SECONDS",
                d.queue.result_retention_secs,
            )?,
        };

        let config = ServiceConfig {
            scaling,
            worker,
            queue,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.scaling.validate()?;
        self.worker.validate()?;
        self.queue.validate()
    }
}

fn read_optional<F, T>(lookup: &F, key: &str) -> ConfigResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn read<F, T>(lookup: &F, key: &str, default: T) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(read_optional(lookup, key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.scaling.min_workers, 2);
        assert_eq!(config.scaling.max_workers, 8);
        assert_eq!(config.scaling.scale_up_cooldown(), Duration::from_secs(120));
        assert_eq!(config.scaling.scale_down_cooldown(), Duration::from_secs(600));
        assert_eq!(config.worker.job_timeout(), Duration::from_secs(600));
        assert_eq!(config.queue.lane_capacity, None);
    }

    #[test]
    fn overrides_are_applied() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("MIN_WORKERS", "1"),
            ("MAX_WORKERS", "20"),
            ("EMERGENCY_THRESHOLD", "500"),
            ("LANE_CAPACITY", "64"),
            ("JOB_TIMEOUT_SECONDS", " 30 "),
        ]))
        .unwrap();
        assert_eq!(config.scaling.min_workers, 1);
        assert_eq!(config.scaling.max_workers, 20);
        assert_eq!(config.scaling.emergency_threshold, 500);
        assert_eq!(config.queue.lane_capacity, Some(64));
        assert_eq!(config.worker.job_timeout_secs, 30);
    }

    #[test]
    fn unparseable_values_are_errors() {
        let err = ServiceConfig::from_lookup(lookup(&[("MAX_WORKERS", "eight")])).unwrap_err();
        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "MAX_WORKERS");
                assert_eq!(value, "eight");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn constraints_are_enforced() {
        for pairs in [
            vec![("MIN_WORKERS", "0")],
            vec![("MIN_WORKERS", "9")],
            vec![("SCALE_DOWN_THRESHOLD", "0")],
            vec![("SCALE_DOWN_THRESHOLD", "30")],
            vec![("SCALE_UP_THRESHOLD", "100")],
            vec![("WORKER_CONCURRENCY", "0")],
            vec![("LANE_CAPACITY", "0")],
            vec![("HIGH_LANE_MAX_ROWS", "9000")],
        ] {
            let err = ServiceConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(
                matches!(err, ConfigError::Constraint(_)),
                "{pairs:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let max = u64::MAX.to_string();
        for key in [
            "JOB_TIMEOUT_SECONDS",
            "DEQUEUE_TIMEOUT_MS",
            "HEARTBEAT_STALE_SECONDS",
            "SCALE_UP_COOLDOWN_SECONDS",
            "SCALE_DOWN_COOLDOWN_SECONDS",
            "SCALING_INTERVAL_SECONDS",
            "RESULT_RETENTION_SECONDS",
        ] {
            match ServiceConfig::from_lookup(lookup(&[(key, max.as_str())])).unwrap_err() {
                ConfigError::Constraint(msg) => assert!(msg.contains(key), "{msg}"),
                other => panic!("{key} gave {other:?}"),
            }
        }

        let at_limit = MAX_DURATION_SECS.to_string();
        let config =
            ServiceConfig::from_lookup(lookup(&[("JOB_TIMEOUT_SECONDS", at_limit.as_str())]))
                .unwrap();
        assert_eq!(config.worker.job_timeout_secs, MAX_DURATION_SECS);
    }

    #[test]
    fn clamp_respects_bounds() {
        let scaling = ScalingConfig::default();
        assert_eq!(scaling.clamp(0), 2);
        assert_eq!(scaling.clamp(5), 5);
        assert_eq!(scaling.clamp(50), 8);
    }
}
