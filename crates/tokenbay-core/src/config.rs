//! Startup configuration for the slot manager.
//!
//! The configuration is read once when the manager is built and is not
//! mutable afterwards. Every field has a default, so a partial JSON document
//! (or an empty object) is a valid configuration.
//!
//! # Examples
//!
//! ```
//! use tokenbay_core::SlotConfig;
//!
//! let config = SlotConfig::from_json_str(r#"{ "slots_per_card": 2 }"#).unwrap();
//! assert_eq!(config.effective_slots_per_card(), 2);
//! assert_eq!(config.max_virtual_slots, tokenbay_core::constants::MAX_VIRTUAL_SLOTS);
//! ```

use crate::constants::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_SLOTS_PER_CARD, MAX_SUPPORTED_VIRTUAL_SLOTS,
    MAX_VIRTUAL_SLOTS, MIN_POLL_INTERVAL_MS,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Slot manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    /// Slots a single card may claim. Zero selects [`DEFAULT_SLOTS_PER_CARD`].
    pub slots_per_card: usize,

    /// Size of the virtual slot pool shared by all readers.
    pub max_virtual_slots: usize,

    /// Delay between background detection sweeps, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            slots_per_card: 0,
            max_virtual_slots: MAX_VIRTUAL_SLOTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl SlotConfig {
    /// Parse a configuration from JSON and validate it.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigFormat` for malformed JSON and `Error::Config`
    /// when a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, otherwise the same
    /// errors as [`SlotConfig::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_virtual_slots == 0 || self.max_virtual_slots > MAX_SUPPORTED_VIRTUAL_SLOTS {
            return Err(Error::Config(format!(
                "max_virtual_slots must be 1-{MAX_SUPPORTED_VIRTUAL_SLOTS}, got {}",
                self.max_virtual_slots
            )));
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(Error::Config(format!(
                "poll_interval_ms must be at least {MIN_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            )));
        }
        Ok(())
    }

    /// Per-card slot budget after applying the built-in default.
    #[must_use]
    pub fn effective_slots_per_card(&self) -> usize {
        if self.slots_per_card == 0 {
            DEFAULT_SLOTS_PER_CARD
        } else {
            self.slots_per_card
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SlotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.effective_slots_per_card(), DEFAULT_SLOTS_PER_CARD);
        assert_eq!(config.poll_interval(), Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
    }

    #[rstest]
    #[case(0, DEFAULT_SLOTS_PER_CARD)]
    #[case(1, 1)]
    #[case(6, 6)]
    fn test_effective_slots_per_card(#[case] configured: usize, #[case] expected: usize) {
        let config = SlotConfig {
            slots_per_card: configured,
            ..SlotConfig::default()
        };
        assert_eq!(config.effective_slots_per_card(), expected);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = SlotConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SlotConfig::default());
    }

    #[rstest]
    #[case(r#"{ "max_virtual_slots": 0 }"#)]
    #[case(r#"{ "max_virtual_slots": 100000 }"#)]
    #[case(r#"{ "poll_interval_ms": 1 }"#)]
    fn test_out_of_range_values_rejected(#[case] json: &str) {
        let result = SlotConfig::from_json_str(json);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = SlotConfig::from_json_str("{ slots_per_card: ");
        assert!(matches!(result, Err(Error::ConfigFormat(_))));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "slots_per_card": 3, "max_virtual_slots": 16 }}"#).unwrap();

        let config = SlotConfig::from_path(file.path()).unwrap();
        assert_eq!(config.slots_per_card, 3);
        assert_eq!(config.max_virtual_slots, 16);
    }

    #[test]
    fn test_missing_file() {
        let result = SlotConfig::from_path("/nonexistent/tokenbay.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
