use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    cache::CacheConfig,
    degradation::DegradationConfig,
    dispatch::DispatchConfig,
    models::{CostClass, TaskProfile},
    monitor::MonitorConfig,
    tiers::TierConfig,
};

const DEBUG_ENV: &str = "POLYTIER_DEBUG";
const DEBUG_POLL_INTERVAL_MS: u64 = 1_000;
const DEBUG_SWEEP_INTERVAL_SECS: u64 = 10;

/// Everything the engine can be tuned with. Missing fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub monitor: MonitorConfig,
    pub tiers: TierConfig,
    pub cache: CacheConfig,
    pub dispatch: DispatchConfig,
    pub degradation: DegradationConfig,
    pub profiles: Vec<TaskProfile>,
    pub default_profile: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            tiers: TierConfig::default(),
            cache: CacheConfig::default(),
            dispatch: DispatchConfig::default(),
            degradation: DegradationConfig::default(),
            profiles: vec![
                TaskProfile::new("default", CostClass::Heavy),
                TaskProfile::new("classify", CostClass::Light),
            ],
            default_profile: "default".into(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), String> {
        self.tiers.validate()?;
        self.cache.validate()?;
        self.dispatch.validate()?;

        let degradation = &self.degradation;
        if degradation.breach_window == 0 || degradation.recovery_window == 0 {
            return Err("degradation windows must be at least 1".into());
        }
        if degradation.backoff_ms == 0 {
            return Err("degradation.backoffMs must be positive".into());
        }
        if !(0.0..=1.0).contains(&degradation.warning_threshold) {
            return Err("degradation.warningThreshold must be within [0, 1]".into());
        }

        if self.monitor.history_capacity == 0 || self.monitor.smoothing_window == 0 {
            return Err("monitor.historyCapacity and smoothingWindow must be positive".into());
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err("monitor.pollIntervalMs must be positive".into());
        }
        // each tick probes the remote and must finish within one interval
        if self.dispatch.remote_probe_timeout_ms >= self.monitor.poll_interval_ms {
            return Err(format!(
                "dispatch.remoteProbeTimeoutMs ({}) must be shorter than monitor.pollIntervalMs ({})",
                self.dispatch.remote_probe_timeout_ms, self.monitor.poll_interval_ms
            ));
        }

        for profile in &self.profiles {
            profile.validate()?;
        }

        if self.profile(&self.default_profile).is_none() {
            return Err(format!("unknown default profile '{}'", self.default_profile));
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&TaskProfile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    pub fn default_profile(&self) -> Option<&TaskProfile> {
        self.profile(&self.default_profile)
    }

    /// Shorten loop intervals when `POLYTIER_DEBUG` is `1` or `true`.
    pub fn apply_env_overrides(&mut self) {
        let debug_mode = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if debug_mode {
            self.monitor.poll_interval_ms = DEBUG_POLL_INTERVAL_MS;
            self.cache.sweep_interval_secs = DEBUG_SWEEP_INTERVAL_SECS;
            log::info!("{DEBUG_ENV} set: using short monitor and sweep intervals");
        }
    }
}

/// JSON-file backed settings, shared behind a lock.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    /// A missing file yields defaults; an unreadable one is an error and a
    /// malformed one falls back to defaults with a warning.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring malformed settings at {}: {err}",
                    path.display()
                );
                EngineSettings::default()
            })
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.read().clone()
    }

    /// Apply `change`, validate, and persist. Invalid results are rejected and
    /// leave the stored settings untouched.
    pub fn update<F>(&self, change: F) -> Result<EngineSettings>
    where
        F: FnOnce(&mut EngineSettings),
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        change(&mut next);
        next.validate()
            .map_err(|reason| anyhow!("invalid settings: {reason}"))?;

        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: EngineSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed settings in {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineSettings::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{ "degradation": { "breachWindow": 5 } }"#).unwrap();
        assert_eq!(settings.degradation.breach_window, 5);
        assert_eq!(settings.degradation.recovery_window, 3);
        assert_eq!(settings.cache.default_ttl_secs, 3600);
        assert_eq!(settings.tiers.tiers.len(), 4);
    }

    #[test]
    fn validation_catches_bad_tables() {
        let mut settings = EngineSettings::default();
        settings.tiers.tiers.reverse();
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.tiers.tiers[0].max_parallel_workers = 0;
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.default_profile = "missing".into();
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.degradation.recovery_window = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_backoff_is_rejected() {
        let mut settings = EngineSettings::default();
        settings.degradation.backoff_ms = 0;
        assert!(settings.validate().unwrap_err().contains("backoffMs"));
    }

    #[test]
    fn remote_timeout_must_fit_in_a_poll_interval() {
        let mut settings = EngineSettings::default();
        settings.monitor.poll_interval_ms = 500;
        settings.dispatch.remote_probe_timeout_ms = 500;
        assert!(settings.validate().unwrap_err().contains("remoteProbeTimeoutMs"));

        settings.dispatch.remote_probe_timeout_ms = 499;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn profile_names_with_separator_are_rejected() {
        let mut settings = EngineSettings::default();
        settings
            .profiles
            .push(TaskProfile::new("default:v2", CostClass::Heavy));
        assert!(settings.validate().unwrap_err().contains("default:v2"));
    }

    #[test]
    fn store_persists_updates_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.settings().cache.default_ttl_secs, 3600);

        store
            .update(|settings| settings.cache.default_ttl_secs = 120)
            .unwrap();
        assert!(path.exists());

        let reopened = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(reopened.settings().cache.default_ttl_secs, 120);

        fs::write(&path, r#"{ "cache": { "defaultTtlSecs": 7 } }"#).unwrap();
        reopened.reload().unwrap();
        assert_eq!(reopened.settings().cache.default_ttl_secs, 7);
    }

    #[test]
    fn invalid_update_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let result = store.update(|settings| settings.tiers.tiers.clear());
        assert!(result.is_err());
        assert_eq!(store.settings().tiers.tiers.len(), 4);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.settings().default_profile, "default");
    }
}
