//! Application settings loaded from a TOML file.
//!
//! Every section is optional; a missing file yields [`Settings::default`].
//!
//! ```toml
//! [projection]
//! horizon_months = 12
//!
//! [settlement]
//! default_intent = "deferred"
//!
//! [events]
//! queue_capacity = 256
//! ```

use crate::entities::SettlementIntent;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "LEDGER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";
const MAX_HORIZON_MONTHS: u32 = 60;

/// Top-level settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub projection: ProjectionSettings,
    pub settlement: SettlementSettings,
    pub events: EventSettings,
}

/// Projection generator settings.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectionSettings {
    /// How many months ahead of today the generator fills
    pub horizon_months: u32,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self { horizon_months: 12 }
    }
}

/// Card settlement defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SettlementSettings {
    /// Intent given to card entries when the entry, template or loan names none
    pub default_intent: SettlementIntent,
}

/// Domain event queue settings.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventSettings {
    /// Bounded queue size; events published while it is full are dropped
    pub queue_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

impl Settings {
    /// Parses and validates settings from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Self = toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("Failed to parse settings: {e}"),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from `path`, falling back to defaults when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            tracing::info!("No settings file at {:?}, using defaults", path_ref);
            return Ok(Self::default());
        }
        tracing::debug!("Loading settings from {:?}", path_ref);
        let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
            message: format!("Failed to read settings file {path_ref:?}: {e}"),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads settings from the file named by `LEDGER_CONFIG`, or `config.toml`.
    pub fn load_from_env() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }

    fn validate(&self) -> Result<()> {
        let horizon = self.projection.horizon_months;
        if horizon == 0 || horizon > MAX_HORIZON_MONTHS {
            return Err(Error::Config {
                message: format!(
                    "projection.horizon_months must be between 1 and {MAX_HORIZON_MONTHS}, got {horizon}"
                ),
            });
        }
        if self.events.queue_capacity == 0 {
            return Err(Error::Config {
                message: "events.queue_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
