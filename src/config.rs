use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for an analysis run.
///
/// Every table and field is optional in the TOML form; anything absent
/// falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Detector thresholds.
    pub detection: DetectionConfig,
    /// Alert correlation configuration.
    pub correlation: CorrelationConfig,
    /// Report output configuration.
    pub output: OutputConfig,
}

/// Detector thresholds.
///
/// All thresholds are soft configuration: degenerate values (zero or
/// negative windows) are clamped at use and never panic, at worst a
/// detector finds nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Impossible travel speed threshold in km/h.
    pub speed_threshold_kmh: f64,
    /// Maximum hours between logins for travel detection.
    pub max_travel_hours: f64,
    /// Failure chain lookback window in minutes.
    pub failure_window_minutes: i64,
    /// Minimum failures from a single IP to trigger a chain alert.
    pub min_failures_same_ip: usize,
    /// Minimum total failures across IPs to trigger a chain alert.
    pub min_failures_multi_ip: usize,
    /// Days of history for the device baseline.
    pub device_lookback_days: u32,
}

/// Alert correlation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Time window in hours for grouping alerts into one case.
    pub window_hours: f64,
}

/// Report output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for generated reports.
    pub outdir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            detection: DetectionConfig::default(),
            correlation: CorrelationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig { window_hours: 8.0 }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            outdir: PathBuf::from("out"),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            speed_threshold_kmh: 900.0,
            max_travel_hours: 6.0,
            failure_window_minutes: 20,
            min_failures_same_ip: 8,
            min_failures_multi_ip: 15,
            device_lookback_days: 30,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
