//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `BEACON_*` environment variable overrides
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use beacon_core::Priority;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::BeaconSettings;

/// Resolve the path to the settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// [`load_settings_from_path`] at [`settings_path`].
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, then the file at `path`, then `BEACON_*` overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged
/// result is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BeaconSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Merge `source` over `target`.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut BeaconSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `BEACON_*` overrides read through `lookup`.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_overrides_from(settings: &mut BeaconSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("BEACON_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("BEACON_PORT", |s| parse_range::<u16>(s, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("BEACON_MAX_CONNECTIONS", |s| parse_range::<usize>(s, 1, 1_000_000)) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.parsed("BEACON_MAX_FRAME_SIZE", |s| parse_range::<usize>(s, 1024, 64 * 1024 * 1024)) {
        settings.server.max_frame_size = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = env.parsed("BEACON_OUTBOUND_CAPACITY", |s| parse_range::<usize>(s, 1, 65_536)) {
        settings.hub.outbound_capacity = v;
    }
    if let Some(v) = env.parsed("BEACON_QUEUE_CAPACITY", |s| parse_range::<usize>(s, 1, 10_000_000)) {
        settings.hub.queue_capacity = v;
    }
    if let Some(v) = env.parsed("BEACON_DROP_THRESHOLD", |s| parse_range::<u32>(s, 1, 10_000)) {
        settings.hub.drop_threshold = v;
    }
    if let Some(v) = env.parsed("BEACON_HEARTBEAT_INTERVAL_MS", |s| parse_range::<u64>(s, 100, 600_000)) {
        settings.hub.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.parsed("BEACON_PONG_WAIT_MS", |s| parse_range::<u64>(s, 100, 3_600_000)) {
        settings.hub.pong_wait_ms = v;
    }
    if let Some(v) = env.parsed("BEACON_WRITE_TIMEOUT_MS", |s| parse_range::<u64>(s, 10, 600_000)) {
        settings.hub.write_timeout_ms = v;
    }
    if let Some(v) = env.parsed("BEACON_SHUTDOWN_STEP_TIMEOUT_MS", |s| parse_range::<u64>(s, 10, 600_000)) {
        settings.hub.shutdown_step_timeout_ms = v;
    }
    if let Some(v) = env.parsed("BEACON_DEFAULT_PRIORITY", |s| s.parse::<Priority>().ok()) {
        settings.hub.default_priority = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("BEACON_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("BEACON_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Case-insensitive boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as an integer within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env override, ignoring");
        }
        result
    }
}
