//! Typed view over `Metadata.configuration`. This is the "ambient
//! configuration layer" the distilled spec doesn't spell out but every
//! component in §4 depends on (checkpoint cadence, tombstone/log
//! retention, append-only enforcement).

use std::time::Duration;

use crate::clock::Clock;
use crate::kernel::Metadata;

const CHECKPOINT_INTERVAL: &str = "delta.checkpointInterval";
const ENABLE_EXPIRED_LOG_CLEANUP: &str = "delta.enableExpiredLogCleanup";
const LOG_RETENTION_DURATION: &str = "delta.logRetentionDuration";
const DELETED_FILE_RETENTION_DURATION: &str = "delta.deletedFileRetentionDuration";
const APPEND_ONLY: &str = "delta.appendOnly";
const TARGET_FILE_SIZE: &str = "delta.targetFileSize";

const DEFAULT_CHECKPOINT_INTERVAL: i64 = 10;
const DEFAULT_LOG_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_DELETED_FILE_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_TARGET_FILE_SIZE: i64 = 104_857_600;

/// Typed accessors over a table's `delta.*` configuration keys, with the
/// same defaults Delta-protocol tables use when a key is absent.
#[derive(Debug, Clone, Copy)]
pub struct TableConfig<'a>(pub(crate) &'a Metadata);

impl<'a> TableConfig<'a> {
    pub fn new(metadata: &'a Metadata) -> Self {
        TableConfig(metadata)
    }

    /// How many commits between checkpoints (spec.md §4.8).
    pub fn checkpoint_interval(&self) -> i64 {
        self.parsed(CHECKPOINT_INTERVAL).unwrap_or(DEFAULT_CHECKPOINT_INTERVAL)
    }

    /// Whether the checkpoint writer should also prune expired log
    /// files (spec.md §4.8 step 5).
    pub fn enable_expired_log_cleanup(&self) -> bool {
        self.parsed(ENABLE_EXPIRED_LOG_CLEANUP).unwrap_or(true)
    }

    /// How long a committed delta/checkpoint file is kept before log
    /// cleanup may delete it.
    pub fn log_retention_duration(&self) -> Duration {
        self.parsed_duration(LOG_RETENTION_DURATION)
            .unwrap_or(DEFAULT_LOG_RETENTION)
    }

    /// How long a tombstone (`RemoveFile`) is kept in replay/checkpoints
    /// before it's dropped; feeds `State.min_file_retention_ts` (spec.md
    /// §3, §4.3).
    pub fn deleted_file_retention_duration(&self) -> Duration {
        self.parsed_duration(DELETED_FILE_RETENTION_DURATION)
            .unwrap_or(DEFAULT_DELETED_FILE_RETENTION)
    }

    /// Whether the table rejects `RemoveFile`s with `dataChange=true`
    /// (spec.md §4.6 AppendOnly violation check).
    pub fn append_only(&self) -> bool {
        self.parsed(APPEND_ONLY).unwrap_or(false)
    }

    /// Target size, in bytes, a writer should aim for when producing a new
    /// data file. This crate performs no data-file I/O (spec.md §1
    /// Non-goals), so the value is surfaced for callers that do, not
    /// consumed internally.
    pub fn target_file_size(&self) -> i64 {
        self.parsed(TARGET_FILE_SIZE).unwrap_or(DEFAULT_TARGET_FILE_SIZE)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.0.configuration_value(key).and_then(|v| v.parse().ok())
    }

    /// Delta encodes interval-like configuration values as
    /// `"interval <n> <unit>"` (e.g. `"interval 7 days"`); a plain
    /// integer is treated as seconds for leniency.
    fn parsed_duration(&self, key: &str) -> Option<Duration> {
        let raw = self.0.configuration_value(key)?;
        parse_interval(raw)
    }
}

/// Tombstone-retention cutoff used before a table's own `Metadata` (and
/// thus its configured `deleted_file_retention_duration`) is known yet —
/// notably, the first replay `DeltaLog::open` performs to discover that
/// very metadata. Uses the same default every table starts with absent
/// an override.
pub fn default_retention_cutoff(clock: &dyn Clock) -> i64 {
    clock.now_millis().saturating_sub(DEFAULT_DELETED_FILE_RETENTION.as_millis() as i64)
}

fn parse_interval(raw: &str) -> Option<Duration> {
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let mut parts = raw.split_whitespace();
    if parts.next()? != "interval" {
        return None;
    }
    let amount: u64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    let seconds = match unit.trim_end_matches('s') {
        "second" => amount,
        "minute" => amount * 60,
        "hour" => amount * 3600,
        "day" => amount * 86400,
        "week" => amount * 7 * 86400,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_absent() {
        let metadata = Metadata::new("{}", vec![]);
        let config = TableConfig::new(&metadata);
        assert_eq!(config.checkpoint_interval(), 10);
        assert!(!config.append_only());
        assert!(config.enable_expired_log_cleanup());
    }

    #[test]
    fn parses_interval_strings() {
        let mut configuration = HashMap::new();
        configuration.insert(
            "delta.deletedFileRetentionDuration".to_string(),
            Some("interval 1 days".to_string()),
        );
        configuration.insert("delta.appendOnly".to_string(), Some("true".to_string()));
        let metadata = Metadata::new("{}", vec![]).with_configuration(configuration);
        let config = TableConfig::new(&metadata);
        assert_eq!(config.deleted_file_retention_duration(), Duration::from_secs(86400));
        assert!(config.append_only());
    }
}
