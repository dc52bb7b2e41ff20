//! TOML configuration for a tracking session
//!
//! ```toml
//! queue_capacity = 256
//!
//! [fusion]
//! interpolation_weight = 0.01
//! calibration_period = 10.0
//!
//! [finger]
//! pitch_source = "euler"
//! ```

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::error::{FusionError, Result};
use crate::remap::DeviceFrame;
use crate::types::{DerivationSettings, FusionSettings, PitchSource};

/// Session configuration
///
/// Every field is optional in the TOML source; missing fields take their
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tracker input queue length
    pub queue_capacity: usize,
    /// Derivation job queue length, per entity
    pub job_capacity: usize,
    /// Fusion engine thresholds and calibration timing
    pub fusion: FusionSettings,
    /// Gaze angle derivation
    #[serde(deserialize_with = "gaze_table")]
    pub gaze: DerivationSettings,
    /// Finger angle derivation
    #[serde(deserialize_with = "finger_table")]
    pub finger: DerivationSettings,
}

/// Derivation table as written in TOML, before entity defaults are applied
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DerivationTable {
    invert_yaw: Option<bool>,
    pitch_source: Option<PitchSource>,
    frame: Option<DeviceFrame>,
}

impl DerivationTable {
    fn or(self, defaults: DerivationSettings) -> DerivationSettings {
        DerivationSettings {
            invert_yaw: self.invert_yaw.unwrap_or(defaults.invert_yaw),
            pitch_source: self.pitch_source.unwrap_or(defaults.pitch_source),
            frame: self.frame.unwrap_or(defaults.frame),
        }
    }
}

fn gaze_table<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DerivationSettings, D::Error> {
    Ok(DerivationTable::deserialize(deserializer)?.or(DerivationSettings::gaze()))
}

fn finger_table<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DerivationSettings, D::Error> {
    Ok(DerivationTable::deserialize(deserializer)?.or(DerivationSettings::finger()))
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            job_capacity: 64,
            fusion: FusionSettings::default(),
            gaze: DerivationSettings::gaze(),
            finger: DerivationSettings::finger(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(?path, "Loaded session config");
        Ok(config)
    }

    /// Like [`SessionConfig::load`], but a missing file yields the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!(?path, "No session config found, using defaults");
            Ok(Self::default())
        }
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.fusion.validate()?;
        self.gaze.validate()?;
        self.finger.validate()?;
        if self.queue_capacity == 0 || self.job_capacity == 0 {
            return Err(FusionError::InvalidSettings(
                "queue capacities must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remap::Axis;
    use crate::types::PitchSource;

    #[test]
    fn test_empty_config_is_default() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(config.finger.invert_yaw);
        assert!(!config.gaze.invert_yaw);
    }

    #[test]
    fn test_partial_config() {
        let source = r#"
            queue_capacity = 32

            [fusion]
            interpolation_weight = 0.01
            calibration_period = 10.0

            [finger]
            pitch_source = "euler"

            [gaze.frame]
            x = "x"
            y = "minus_z"
        "#;
        let config = SessionConfig::from_toml_str(source).unwrap();

        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.job_capacity, 64);
        assert_eq!(config.fusion.interpolation_weight, 0.01);
        assert_eq!(config.fusion.calibration_period, 10.0);
        assert_eq!(config.fusion.outlier_threshold, 0.85);
        assert_eq!(config.finger.pitch_source, PitchSource::Euler);
        assert!(config.finger.invert_yaw);
        assert_eq!(config.gaze.frame.x, Axis::X);
        assert_eq!(config.gaze.frame.y, Axis::MinusZ);
    }

    #[test]
    fn test_entity_tables_keep_their_own_defaults() {
        let source = r#"
            [gaze]
            pitch_source = "euler"

            [finger]
            pitch_source = "euler"
        "#;
        let config = SessionConfig::from_toml_str(source).unwrap();
        assert!(!config.gaze.invert_yaw);
        assert!(config.finger.invert_yaw);

        let config = SessionConfig::from_toml_str("[finger]\ninvert_yaw = false").unwrap();
        assert!(!config.finger.invert_yaw);
        assert_eq!(config.finger.pitch_source, PitchSource::DeviceFrame);

        let config = SessionConfig::from_toml_str("[gaze]\ninvert_yaw = true").unwrap();
        assert!(config.gaze.invert_yaw);
        assert!(config.finger.invert_yaw);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let source = r#"
            [fusion]
            outlier_threshold = 0.5
            outlier_panic_threshold = 0.7
        "#;
        assert!(matches!(
            SessionConfig::from_toml_str(source),
            Err(FusionError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(SessionConfig::from_toml_str("job_capacity = 0").is_err());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            SessionConfig::from_toml_str("queue_capacity = \"many\""),
            Err(FusionError::Config(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SessionConfig {
            queue_capacity: 1024,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(SessionConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join("gaze-fusion-missing-config.toml");
        assert!(matches!(SessionConfig::load(&path), Err(FusionError::Io(_))));
        assert_eq!(
            SessionConfig::load_or_default(&path).unwrap(),
            SessionConfig::default()
        );
    }
}
