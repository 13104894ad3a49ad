//! Layered TOML settings.
//!
//! Sources, later ones winning:
//!
//! - `config.toml` in the per-user config directory
//! - `rfidtool.toml` in the working directory
//! - `RFIDTOOL_*` environment variables and command-line flags (resolved by clap)
//!
//! With `--config PATH` that single file replaces both TOML layers.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Local config file name.
pub const LOCAL_CONFIG: &str = "rfidtool.toml";

/// `[connection]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial device used when `-p` is absent.
    pub serial: Option<String>,
    /// Line speed used when `-b` is absent.
    pub baud: Option<u32>,
}

/// Reader request defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Reader address.
    pub device_id: Option<u8>,
    /// Antenna port.
    pub antenna: Option<u8>,
    /// RF power.
    pub power: Option<u16>,
    /// Per-command timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Inventory record cap.
    pub max_records: Option<u32>,
}

/// Stress test defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StressConfig {
    /// Number of cycles.
    pub cycles: Option<u32>,
    /// Pause between cycles in milliseconds.
    pub interval_ms: Option<u64>,
    /// Stop at the first non-success.
    #[serde(default)]
    pub stop_on_error: bool,
}

/// Everything a config file can set. Unset fields fall through to built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port selection.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Request defaults.
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Stress test defaults.
    #[serde(default)]
    pub stress: StressConfig,
}

impl Config {
    /// Fold the user-wide file and the working-directory file together.
    pub fn load() -> Self {
        Self::global_config_path()
            .into_iter()
            .chain([PathBuf::from(LOCAL_CONFIG)])
            .filter_map(|path| Self::read_layer(&path))
            .fold(Self::default(), |mut acc, layer| {
                acc.merge(layer);
                acc
            })
    }

    /// Only `path`, for `--config`. Unusable files leave every setting unset.
    pub fn load_from_path(path: &Path) -> Self {
        Self::read_layer(path).unwrap_or_else(|| {
            warn!("Ignoring {}, no settings loaded from it", path.display());
            Self::default()
        })
    }

    /// Parse one TOML layer. A missing file is silent; an unreadable or
    /// malformed one is reported and skipped.
    fn read_layer(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {e}", path.display());
                return None;
            },
        };

        match toml::from_str(&content) {
            Ok(layer) => {
                debug!("Config layer {}", path.display());
                Some(layer)
            },
            Err(e) => {
                warn!("Invalid config {}: {e}", path.display());
                None
            },
        }
    }

    /// Per-user config directory, if the platform has one.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rfidtool").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// `config.toml` inside [`Config::global_config_dir`].
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            connection,
            reader,
            stress,
        } = other;

        if connection.serial.is_some() {
            self.connection.serial = connection.serial;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }

        if reader.device_id.is_some() {
            self.reader.device_id = reader.device_id;
        }
        if reader.antenna.is_some() {
            self.reader.antenna = reader.antenna;
        }
        if reader.power.is_some() {
            self.reader.power = reader.power;
        }
        if reader.timeout_ms.is_some() {
            self.reader.timeout_ms = reader.timeout_ms;
        }
        if reader.max_records.is_some() {
            self.reader.max_records = reader.max_records;
        }

        if stress.cycles.is_some() {
            self.stress.cycles = stress.cycles;
        }
        if stress.interval_ms.is_some() {
            self.stress.interval_ms = stress.interval_ms;
        }
        if stress.stop_on_error {
            self.stress.stop_on_error = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_leaves_everything_unset() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.reader.device_id.is_none());
        assert!(config.stress.cycles.is_none());
        assert!(!config.stress.stop_on_error);
    }

    #[test]
    fn test_config_merge_overrides_set_values() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyUSB0".into());
        config.reader.power = Some(20);

        let mut other = Config::default();
        other.connection.serial = Some("/dev/ttyACM0".into());
        other.reader.antenna = Some(2);

        config.merge(other);
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.reader.power, Some(20));
        assert_eq!(config.reader.antenna, Some(2));
    }

    #[test]
    fn test_merge_keeps_values_the_layer_leaves_unset() {
        let mut config = Config::default();
        config.connection.baud = Some(57600);
        config.stress.cycles = Some(10);

        config.merge(Config::default());
        assert_eq!(config.connection.baud, Some(57600));
        assert_eq!(config.stress.cycles, Some(10));
    }

    #[test]
    fn test_config_merge_stop_on_error() {
        let mut config = Config::default();
        let mut other = Config::default();
        other.stress.stop_on_error = true;
        config.merge(other);
        assert!(config.stress.stop_on_error);
    }

    #[test]
    fn test_parse_every_table() {
        let text = r#"
[connection]
serial = "/dev/ttyUSB0"
baud = 115200

[reader]
device_id = 2
antenna = 1
power = 30
timeout_ms = 1500
max_records = 50

[stress]
cycles = 500
interval_ms = 200
stop_on_error = true
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.reader.device_id, Some(2));
        assert_eq!(config.reader.antenna, Some(1));
        assert_eq!(config.reader.power, Some(30));
        assert_eq!(config.reader.timeout_ms, Some(1500));
        assert_eq!(config.reader.max_records, Some(50));
        assert_eq!(config.stress.cycles, Some(500));
        assert_eq!(config.stress.interval_ms, Some(200));
        assert!(config.stress.stop_on_error);
    }

    #[test]
    fn test_empty_file_parses() {
        let config: Config = toml::from_str("\n").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.reader.power.is_none());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[reader]\npower = 25\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.reader.power, Some(25));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.reader.power.is_none());
    }

    #[test]
    fn test_missing_layer_is_skipped() {
        assert!(Config::read_layer(Path::new("/nonexistent/rfidtool.toml")).is_none());
    }

    #[test]
    fn test_global_config_path_name() {
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
