//! Configuration model and settings persistence.
//!
//! The controller never reads individual keys mid-evaluation: configuration
//! is always loaded as a full five-field snapshot so a settings change can
//! never leak a half-updated view into a provider call.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum value for a seconds-of-day field (24:00:00)
pub const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Settings keys, one per persisted configuration field
pub const KEY_ENABLED: &str = "charging_control_enabled";
pub const KEY_MODE: &str = "charging_control_mode";
pub const KEY_LIMIT: &str = "charging_control_limit";
pub const KEY_START_TIME: &str = "charging_control_start_time";
pub const KEY_TARGET_TIME: &str = "charging_control_target_time";

/// The charging-control strategy selected by the user.
///
/// Persisted as an integer 0..=3 with `Limit` as the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargingMode {
    /// Feature logically disabled
    None = 0,
    /// Target the next scheduled wake alarm
    Auto = 1,
    /// Target a user-specified time-of-day window
    Manual = 2,
    /// Cap the state of charge at a percentage
    Limit = 3,
}

impl ChargingMode {
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Auto),
            2 => Some(Self::Manual),
            3 => Some(Self::Limit),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> i64 {
        *self as i64
    }

    /// Whether this mode converges on a target time rather than a percentage
    pub fn is_time_based(&self) -> bool {
        matches!(self, Self::Auto | Self::Manual)
    }
}

/// Immutable-per-evaluation snapshot of the user configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingConfig {
    pub enabled: bool,
    pub mode: ChargingMode,
    /// State-of-charge cap, 0..=100
    pub limit: u32,
    /// Window start, seconds of the local day, 0..=86400
    pub start_time: u32,
    /// Window target, seconds of the local day, 0..=86400
    pub target_time: u32,
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ChargingMode::Auto,
            limit: 80,
            start_time: 22 * 60 * 60, // 22:00
            target_time: 6 * 60 * 60, // 06:00
        }
    }
}

impl ChargingConfig {
    /// Load the full snapshot from a settings store.
    ///
    /// Out-of-range persisted values fall back to the defaults instead of
    /// failing the load; the store may have been written by an older build.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();

        let enabled = store
            .get(KEY_ENABLED)
            .map(|v| v != 0)
            .unwrap_or(defaults.enabled);

        let mode = store
            .get(KEY_MODE)
            .and_then(ChargingMode::from_raw)
            .unwrap_or(defaults.mode);

        let limit = store
            .get(KEY_LIMIT)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v <= 100)
            .unwrap_or(defaults.limit);

        let start_time = store
            .get(KEY_START_TIME)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v <= SECONDS_PER_DAY)
            .unwrap_or(defaults.start_time);

        let target_time = store
            .get(KEY_TARGET_TIME)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v <= SECONDS_PER_DAY)
            .unwrap_or(defaults.target_time);

        Self {
            enabled,
            mode,
            limit,
            start_time,
            target_time,
        }
    }

    /// Persist the platform defaults, overwriting all five keys
    pub fn store_defaults(store: &dyn SettingsStore) -> Result<()> {
        let defaults = Self::default();
        store.put(KEY_ENABLED, defaults.enabled as i64)?;
        store.put(KEY_MODE, defaults.mode.as_raw())?;
        store.put(KEY_LIMIT, defaults.limit as i64)?;
        store.put(KEY_START_TIME, defaults.start_time as i64)?;
        store.put(KEY_TARGET_TIME, defaults.target_time as i64)?;
        Ok(())
    }
}

/// Validate a charge limit percentage at the setter boundary
pub fn validate_limit(limit: i64) -> Result<u32> {
    if !(0..=100).contains(&limit) {
        return Err(Error::InvalidInput {
            reason: format!("charge limit {} out of range 0..=100", limit),
        });
    }
    Ok(limit as u32)
}

/// Validate a seconds-of-day value at the setter boundary
pub fn validate_time_of_day(time: i64) -> Result<u32> {
    if !(0..=SECONDS_PER_DAY as i64).contains(&time) {
        return Err(Error::InvalidInput {
            reason: format!("time of day {} out of range 0..=86400", time),
        });
    }
    Ok(time as u32)
}

/// Validate a raw mode integer at the setter boundary
pub fn validate_mode(mode: i64) -> Result<ChargingMode> {
    ChargingMode::from_raw(mode).ok_or_else(|| Error::InvalidInput {
        reason: format!("charging mode {} out of range 0..=3", mode),
    })
}

/// Key/value store supplying the persisted configuration.
///
/// Booleans are stored as 0/1 integers. Change notification is the
/// embedder's job: after writing, it enqueues a `SettingsChanged` event
/// carrying a freshly loaded snapshot.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<i64>;
    fn put(&self, key: &str, value: i64) -> Result<()>;
}

/// In-memory settings store for tests and embedders that persist elsewhere
#[derive(Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, i64>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<i64> {
        self.values.read().get(key).copied()
    }

    fn put(&self, key: &str, value: i64) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// TOML-file-backed settings store.
///
/// The file is a flat table of integer values, rewritten atomically-enough
/// (full rewrite) on every put. Reads are served from memory.
pub struct TomlSettingsStore {
    path: PathBuf,
    values: RwLock<HashMap<String, i64>>,
}

impl TomlSettingsStore {
    /// Open a store at `path`, loading existing values if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    fn persist(&self, values: &HashMap<String, i64>) -> Result<()> {
        let contents = toml::to_string(values).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl SettingsStore for TomlSettingsStore {
    fn get(&self, key: &str) -> Option<i64> {
        self.values.read().get(key).copied()
    }

    fn put(&self, key: &str, value: i64) -> Result<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }
}
