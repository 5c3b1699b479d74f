//! Tunables for every cache component.
//!
//! Durations are stored as whole seconds (milliseconds for store timeouts)
//! so the config serializes cleanly to JSON and environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SalienceError};
use crate::rolling::WindowName;

/// What happens to the attention set's expiry when it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttentionTtlPolicy {
    /// Every write pushes expiry `attention_ttl_secs` into the future; an idle
    /// user's attention set disappears, whatever the scores.
    #[default]
    RefreshOnWrite,
    /// The set never expires; items leave only by fading or removal.
    Persistent,
}

/// Salience cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SalienceConfig {
    /// Minimum score for an item to be attended.
    pub attention_threshold: f64,
    /// Scores at or above this count as high salience.
    pub high_salience: f64,
    /// Width of the "fading soon" band, `[threshold, threshold + band)`.
    ///
    /// Defaults to 5, narrower than the legacy 10-point band, so that an
    /// item at 45 with the default threshold of 40 is not reported as
    /// fading. Set to 10 to count `[40, 50)` as before.
    pub fading_band: f64,
    pub attention_ttl_secs: u64,
    pub attention_ttl_policy: AttentionTtlPolicy,
    pub hot_cache_ttl_secs: u64,
    /// Trailing window counted by the frequency tracker.
    pub frequency_window_secs: u64,
    /// Safety-net expiry on frequency logs.
    pub frequency_ttl_secs: u64,
    pub short_window_secs: u64,
    pub medium_window_secs: u64,
    pub long_window_secs: u64,
    /// Consolidation runs once the short window holds more than this many entries.
    pub consolidation_trigger: u64,
    pub engram_ttl_secs: u64,
    pub anticipated_ttl_secs: u64,
    /// Budget for a single store operation.
    pub op_timeout_ms: u64,
    /// Budget for establishing the store connection.
    pub connect_timeout_ms: u64,
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            attention_threshold: 40.0,
            high_salience: 70.0,
            fading_band: 5.0,
            attention_ttl_secs: 24 * 60 * 60,
            attention_ttl_policy: AttentionTtlPolicy::RefreshOnWrite,
            hot_cache_ttl_secs: 60 * 60,
            frequency_window_secs: 60 * 60,
            frequency_ttl_secs: 2 * 60 * 60,
            short_window_secs: 20 * 60,
            medium_window_secs: 60 * 60,
            long_window_secs: 24 * 60 * 60,
            consolidation_trigger: 100,
            engram_ttl_secs: 24 * 60 * 60,
            anticipated_ttl_secs: 15 * 60,
            op_timeout_ms: 2_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl SalienceConfig {
    /// Load a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SalienceError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `SALIENCE_*` environment variables.
    ///
    /// Reads e.g. `SALIENCE_ATTENTION_THRESHOLD`, `SALIENCE_HOT_CACHE_TTL_SECS`,
    /// `SALIENCE_ATTENTION_TTL_POLICY` (`refresh_on_write` | `persistent`).
    pub fn from_env() -> Result<Self> {
        let mut c = Self::default();
        env_override("SALIENCE_ATTENTION_THRESHOLD", &mut c.attention_threshold)?;
        env_override("SALIENCE_HIGH_SALIENCE", &mut c.high_salience)?;
        env_override("SALIENCE_FADING_BAND", &mut c.fading_band)?;
        env_override("SALIENCE_ATTENTION_TTL_SECS", &mut c.attention_ttl_secs)?;
        env_override("SALIENCE_HOT_CACHE_TTL_SECS", &mut c.hot_cache_ttl_secs)?;
        env_override("SALIENCE_FREQUENCY_WINDOW_SECS", &mut c.frequency_window_secs)?;
        env_override("SALIENCE_FREQUENCY_TTL_SECS", &mut c.frequency_ttl_secs)?;
        env_override("SALIENCE_SHORT_WINDOW_SECS", &mut c.short_window_secs)?;
        env_override("SALIENCE_MEDIUM_WINDOW_SECS", &mut c.medium_window_secs)?;
        env_override("SALIENCE_LONG_WINDOW_SECS", &mut c.long_window_secs)?;
        env_override("SALIENCE_CONSOLIDATION_TRIGGER", &mut c.consolidation_trigger)?;
        env_override("SALIENCE_ENGRAM_TTL_SECS", &mut c.engram_ttl_secs)?;
        env_override("SALIENCE_ANTICIPATED_TTL_SECS", &mut c.anticipated_ttl_secs)?;
        env_override("SALIENCE_OP_TIMEOUT_MS", &mut c.op_timeout_ms)?;
        env_override("SALIENCE_CONNECT_TIMEOUT_MS", &mut c.connect_timeout_ms)?;

        if let Ok(policy) = std::env::var("SALIENCE_ATTENTION_TTL_POLICY") {
            c.attention_ttl_policy = match policy.to_lowercase().as_str() {
                "refresh_on_write" => AttentionTtlPolicy::RefreshOnWrite,
                "persistent" => AttentionTtlPolicy::Persistent,
                other => {
                    return Err(SalienceError::InvalidConfig(format!(
                        "SALIENCE_ATTENTION_TTL_POLICY: unknown policy `{other}`"
                    )))
                }
            };
        }

        c.validate()?;
        Ok(c)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        let score_ok = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
        if !score_ok(self.attention_threshold) {
            return Err(invalid("attention_threshold must be within 0..=100"));
        }
        if !score_ok(self.high_salience) || self.high_salience < self.attention_threshold {
            return Err(invalid(
                "high_salience must be within attention_threshold..=100",
            ));
        }
        if !self.fading_band.is_finite() || self.fading_band < 0.0 {
            return Err(invalid("fading_band must be a non-negative number"));
        }

        let nonzero = [
            ("attention_ttl_secs", self.attention_ttl_secs),
            ("hot_cache_ttl_secs", self.hot_cache_ttl_secs),
            ("frequency_window_secs", self.frequency_window_secs),
            ("frequency_ttl_secs", self.frequency_ttl_secs),
            ("short_window_secs", self.short_window_secs),
            ("medium_window_secs", self.medium_window_secs),
            ("long_window_secs", self.long_window_secs),
            ("consolidation_trigger", self.consolidation_trigger),
            ("engram_ttl_secs", self.engram_ttl_secs),
            ("anticipated_ttl_secs", self.anticipated_ttl_secs),
            ("op_timeout_ms", self.op_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(&format!("{name} must be greater than zero")));
        }

        if self.frequency_ttl_secs < self.frequency_window_secs {
            return Err(invalid("frequency_ttl_secs must cover frequency_window_secs"));
        }
        if !(self.short_window_secs <= self.medium_window_secs
            && self.medium_window_secs <= self.long_window_secs)
        {
            return Err(invalid("window retentions must satisfy short <= medium <= long"));
        }
        Ok(())
    }

    pub fn retention(&self, window: WindowName) -> Duration {
        Duration::from_secs(match window {
            WindowName::Short => self.short_window_secs,
            WindowName::Medium => self.medium_window_secs,
            WindowName::Long => self.long_window_secs,
        })
    }

    pub fn attention_ttl(&self) -> Duration {
        Duration::from_secs(self.attention_ttl_secs)
    }

    pub fn hot_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_cache_ttl_secs)
    }

    pub fn frequency_window(&self) -> Duration {
        Duration::from_secs(self.frequency_window_secs)
    }

    pub fn frequency_ttl(&self) -> Duration {
        Duration::from_secs(self.frequency_ttl_secs)
    }

    pub fn engram_ttl(&self) -> Duration {
        Duration::from_secs(self.engram_ttl_secs)
    }

    pub fn anticipated_ttl(&self) -> Duration {
        Duration::from_secs(self.anticipated_ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn invalid(msg: &str) -> SalienceError {
    SalienceError::InvalidConfig(msg.to_string())
}

fn env_override<T: FromStr>(name: &str, slot: &mut T) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| SalienceError::InvalidConfig(format!("{name}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = SalienceConfig::default();
        c.validate().unwrap();
        assert_eq!(c.attention_threshold, 40.0);
        assert_eq!(c.retention(WindowName::Short), Duration::from_secs(1200));
        assert_eq!(c.retention(WindowName::Long), Duration::from_secs(86_400));
        assert_eq!(c.consolidation_trigger, 100);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c = SalienceConfig::from_json_str(
            r#"{"attention_threshold": 55.0, "attention_ttl_policy": "persistent"}"#,
        )
        .unwrap();
        assert_eq!(c.attention_threshold, 55.0);
        assert_eq!(c.attention_ttl_policy, AttentionTtlPolicy::Persistent);
        assert_eq!(c.hot_cache_ttl_secs, 3600);
    }

    #[test]
    fn rejects_inconsistent_values() {
        let c = SalienceConfig {
            attention_threshold: 120.0,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(SalienceError::InvalidConfig(_))));

        let c = SalienceConfig {
            high_salience: 30.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = SalienceConfig {
            op_timeout_ms: 0,
            ..Default::default()
        };
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("op_timeout_ms"));

        let c = SalienceConfig {
            short_window_secs: 7200,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn malformed_json_is_invalid_config() {
        let err = SalienceConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, SalienceError::InvalidConfig(_)));
    }
}
