use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::feed::RetryPolicy;

/// Geographic rectangle both feeds are polled for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl Default for BoundingBox {
    /// Continental Europe
    fn default() -> Self {
        Self {
            lat_min: 35.93302587741835,
            lat_max: 71.40896420697621,
            lon_min: -11.360649771804841,
            lon_max: 32.017698096436696,
        }
    }
}

impl BoundingBox {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.lat_min
            && latitude <= self.lat_max
            && longitude >= self.lon_min
            && longitude <= self.lon_max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSkyConfig {
    #[serde(default = "default_opensky_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for OpenSkyConfig {
    fn default() -> Self {
        Self {
            base_url: default_opensky_url(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirLabsConfig {
    #[serde(default = "default_airlabs_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for AirLabsConfig {
    fn default() -> Self {
        Self {
            base_url: default_airlabs_url(),
            api_key: None,
        }
    }
}

/// Trigger periods for the four scheduled jobs, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_state_vector_secs")]
    pub state_vector_secs: u64,
    #[serde(default = "default_metadata_secs")]
    pub metadata_secs: u64,
    #[serde(default = "default_daily_secs")]
    pub aggregate_secs: u64,
    #[serde(default = "default_daily_secs")]
    pub retention_secs: u64,
    /// Delay before the first retention run, keeping it apart from aggregation
    #[serde(default = "default_retention_offset_secs")]
    pub retention_offset_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            state_vector_secs: default_state_vector_secs(),
            metadata_secs: default_metadata_secs(),
            aggregate_secs: default_daily_secs(),
            retention_secs: default_daily_secs(),
            retention_offset_secs: default_retention_offset_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_secs: default_retry_delay(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts.max(1),
            delay: Duration::from_secs(self.delay_secs),
        }
    }
}

/// Top-level pipeline configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub opensky: OpenSkyConfig,
    #[serde(default)]
    pub airlabs: AirLabsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_link_carry_forward_secs")]
    pub link_carry_forward_secs: i64,
    #[serde(default)]
    pub aggregate_airborne_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_data_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bounding_box: BoundingBox::default(),
            opensky: OpenSkyConfig::default(),
            airlabs: AirLabsConfig::default(),
            schedule: ScheduleConfig::default(),
            retry: RetryConfig::default(),
            retention_days: default_retention_days(),
            link_carry_forward_secs: default_link_carry_forward_secs(),
            aggregate_airborne_only: false,
            reference_data_path: None,
        }
    }
}

fn default_opensky_url() -> String {
    "https://opensky-network.org/api".to_string()
}

fn default_airlabs_url() -> String {
    "https://airlabs.co/api/v9".to_string()
}

fn default_state_vector_secs() -> u64 {
    30
}

fn default_metadata_secs() -> u64 {
    3600
}

fn default_daily_secs() -> u64 {
    86_400
}

fn default_retention_offset_secs() -> u64 {
    3600
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

fn default_retention_days() -> u32 {
    7
}

fn default_link_carry_forward_secs() -> i64 {
    900
}

impl PipelineConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: PipelineConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Load the config file if it exists, fall back to defaults otherwise,
    /// then apply credentials from the environment.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::info!("No config file at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Credentials are never expected in the file; the environment wins when set
    pub fn apply_env(&mut self) {
        if let Ok(username) = std::env::var("OPENSKY_USERNAME") {
            self.opensky.username = Some(username);
        }
        if let Ok(password) = std::env::var("OPENSKY_PASSWORD") {
            self.opensky.password = Some(password);
        }
        if let Ok(api_key) = std::env::var("AIRLABS_API_KEY") {
            self.airlabs.api_key = Some(api_key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let bbox = &self.bounding_box;
        if bbox.lat_min >= bbox.lat_max || bbox.lon_min >= bbox.lon_max {
            anyhow::bail!("Bounding box is empty: {:?}", bbox);
        }
        if self.retention_days == 0 {
            anyhow::bail!("retention_days must be at least 1");
        }
        let schedule = &self.schedule;
        if schedule.state_vector_secs == 0
            || schedule.metadata_secs == 0
            || schedule.aggregate_secs == 0
            || schedule.retention_secs == 0
        {
            anyhow::bail!("Schedule periods must be greater than zero");
        }
        Ok(())
    }
}

/// Resolve the pipeline config file path.
///
/// Priority:
/// 1. `FLIGHTLINK_CONFIG` env var
/// 2. `./flightlink.toml`
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("FLIGHTLINK_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("./flightlink.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: PipelineConfig = toml::from_str("").unwrap();

        assert_eq!(config.retention_days, 7);
        assert_eq!(config.schedule.state_vector_secs, 30);
        assert_eq!(config.schedule.metadata_secs, 3600);
        assert_eq!(config.schedule.retention_offset_secs, 3600);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.delay_secs, 5);
        assert_eq!(config.link_carry_forward_secs, 900);
        assert!(!config.aggregate_airborne_only);
        assert_eq!(config.bounding_box, BoundingBox::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            retention_days = 10

            [schedule]
            metadata_secs = 3000

            [bounding_box]
            lat_min = 40.0
            lat_max = 50.0
            lon_min = -5.0
            lon_max = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.retention_days, 10);
        assert_eq!(config.schedule.metadata_secs, 3000);
        assert_eq!(config.schedule.state_vector_secs, 30);
        assert!(config.bounding_box.contains(45.0, 2.0));
        assert!(!config.bounding_box.contains(51.0, 2.0));
    }

    #[test]
    fn test_validate_rejects_inverted_bbox() {
        let mut config = PipelineConfig::default();
        config.bounding_box.lat_min = 60.0;
        config.bounding_box.lat_max = 40.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_retention() {
        let config = PipelineConfig {
            retention_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_never_zero_attempts() {
        let retry = RetryConfig {
            attempts: 0,
            delay_secs: 2,
        };
        let policy = retry.policy();
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn test_load_or_default_applies_env_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flightlink.toml");
        std::fs::write(
            &path,
            r#"
            [airlabs]
            base_url = "http://localhost:9999/api"
            "#,
        )
        .unwrap();

        // SAFETY: serialised with the other env-mutating tests
        unsafe {
            std::env::set_var("AIRLABS_API_KEY", "secret-key");
        }
        let config = PipelineConfig::load_or_default(&path).unwrap();
        unsafe {
            std::env::remove_var("AIRLABS_API_KEY");
        }

        assert_eq!(config.airlabs.base_url, "http://localhost:9999/api");
        assert_eq!(config.airlabs.api_key.as_deref(), Some("secret-key"));
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.retention_days, 7);
    }
}
