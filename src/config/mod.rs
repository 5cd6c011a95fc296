//! Machine configuration, loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use thiserror::Error;

use crate::{AXES, DRIVES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineConfig,

    #[serde(default)]
    pub axes: AxesConfig,

    #[serde(default)]
    pub drives: DrivesConfig,

    #[serde(default)]
    pub z_probe: ZProbeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default = "default_machine_name")]
    pub name: String,

    /// Some mechanics cannot home Z until the head is clear of the bed.
    #[serde(default = "default_true")]
    pub must_home_xy_before_z: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxesConfig {
    #[serde(default = "default_axis_minima")]
    pub minima: [f64; AXES],

    #[serde(default = "default_axis_maxima")]
    pub maxima: [f64; AXES],

    /// Homing feedrates in mm/s, per axis.
    #[serde(default = "default_home_feedrates")]
    pub home_feedrates: [f64; AXES],
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DrivesConfig {
    /// Maximum feedrates in mm/s, axes then extruders.
    #[serde(default = "default_max_feedrates")]
    pub max_feedrates: [f64; DRIVES],

    #[serde(default = "default_accelerations")]
    pub accelerations: [f64; DRIVES],

    /// Instantaneous speed changes (jerk) in mm/s.
    #[serde(default = "default_instant_dv")]
    pub instant_dv: [f64; DRIVES],

    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: [f64; DRIVES],

    /// Motor currents in mA.
    #[serde(default = "default_motor_currents")]
    pub motor_currents: [f64; DRIVES],
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZProbeConfig {
    #[serde(default)]
    pub probe_type: i32,

    /// Trigger height above the bed in mm.
    #[serde(default)]
    pub height: f64,

    #[serde(default = "default_probe_adc")]
    pub adc_value: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory holding the gcodes/sys/www trees.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    /// Reply dialect used on the serial channel until M555 changes it:
    /// "native", "marlin", "teacup", "sprinter" or "repetier".
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// TCP port of the network console.
    #[serde(default = "default_console_port")]
    pub port: u16,
}

fn default_machine_name() -> String {
    "Kiln".to_string()
}

fn default_true() -> bool {
    true
}

fn default_axis_minima() -> [f64; AXES] {
    [0.0, 0.0, 0.0]
}

fn default_axis_maxima() -> [f64; AXES] {
    [210.0, 210.0, 200.0]
}

fn default_home_feedrates() -> [f64; AXES] {
    [50.0, 50.0, 1.0]
}

fn default_max_feedrates() -> [f64; DRIVES] {
    [100.0, 100.0, 3.0, 20.0, 20.0]
}

fn default_accelerations() -> [f64; DRIVES] {
    [800.0, 800.0, 10.0, 250.0, 250.0]
}

fn default_instant_dv() -> [f64; DRIVES] {
    [15.0, 15.0, 0.2, 2.0, 2.0]
}

fn default_steps_per_mm() -> [f64; DRIVES] {
    [87.5, 87.5, 4000.0, 420.0, 420.0]
}

fn default_motor_currents() -> [f64; DRIVES] {
    [800.0, 800.0, 800.0, 1000.0, 1000.0]
}

fn default_probe_adc() -> i32 {
    500
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("machine-data")
}

fn default_dialect() -> String {
    "native".to_string()
}

fn default_console_port() -> u16 {
    4040
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: default_machine_name(),
            must_home_xy_before_z: true,
        }
    }
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            minima: default_axis_minima(),
            maxima: default_axis_maxima(),
            home_feedrates: default_home_feedrates(),
        }
    }
}

impl Default for DrivesConfig {
    fn default() -> Self {
        Self {
            max_feedrates: default_max_feedrates(),
            accelerations: default_accelerations(),
            instant_dv: default_instant_dv(),
            steps_per_mm: default_steps_per_mm(),
            motor_currents: default_motor_currents(),
        }
    }
}

impl Default for ZProbeConfig {
    fn default() -> Self {
        Self {
            probe_type: 0,
            height: 0.0,
            adc_value: default_probe_adc(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            port: default_console_port(),
        }
    }
}

/// Load the configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let config = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.machine.name, "Kiln");
        assert!(config.machine.must_home_xy_before_z);
        assert_eq!(config.axes.maxima[2], 200.0);
        assert_eq!(config.console.dialect, "native");
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            [machine]
            name = "Bench"
            must_home_xy_before_z = false

            [axes]
            maxima = [300.0, 300.0, 400.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.machine.name, "Bench");
        assert!(!config.machine.must_home_xy_before_z);
        assert_eq!(config.axes.maxima, [300.0, 300.0, 400.0]);
        // Untouched sections keep their defaults.
        assert_eq!(config.drives.max_feedrates[0], 100.0);
    }
}
