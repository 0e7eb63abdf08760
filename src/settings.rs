// src/settings.rs
//
// Service settings: TOML file with per-field defaults, then environment
// overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::serial::{LineSettings, Parity};

const APP_DIR: &str = "speedtrap";
const SETTINGS_FILE: &str = "settings.toml";
const DATABASE_FILE: &str = "speed_records.db";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_live_addr")]
    pub live_addr: String,
    #[serde(default = "default_line_queue_capacity")]
    pub line_queue_capacity: usize,
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(DATABASE_FILE)
}
fn default_live_addr() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_line_queue_capacity() -> usize {
    crate::io::DEFAULT_LINE_QUEUE_CAPACITY
}
fn default_subscriber_capacity() -> usize {
    crate::broadcast::DEFAULT_SUBSCRIBER_CAPACITY
}
fn default_retention_days() -> u32 {
    7
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            database_path: default_database_path(),
            live_addr: default_live_addr(),
            line_queue_capacity: default_line_queue_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
            retention_days: default_retention_days(),
            log_dir: None,
        }
    }
}

/// `<config dir>/speedtrap/settings.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(SETTINGS_FILE))
}

impl Settings {
    /// Load from `path` (or the default location), falling back to defaults
    /// when the file does not exist, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Settings, String> {
        let path = path.map(Path::to_path_buf).or_else(default_settings_path);
        let mut settings = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            _ => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Settings, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings {}: {}", path.display(), e))?;
        Self::from_toml(&content)
            .map_err(|e| format!("Failed to parse settings {}: {}", path.display(), e))
    }

    pub fn from_toml(content: &str) -> Result<Settings, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Apply overrides from the environment. `lookup` returns a variable's value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        // ARDUINO_PORT is the older name for the device path
        if let Some(port) = lookup("SPEEDTRAP_SERIAL_PORT").or_else(|| lookup("ARDUINO_PORT")) {
            self.serial_port = port;
        }
        if let Some(baud) = lookup("SPEEDTRAP_BAUD_RATE") {
            self.baud_rate = baud
                .trim()
                .parse()
                .map_err(|_| format!("Invalid SPEEDTRAP_BAUD_RATE: {}", baud))?;
        }
        if let Some(db) = lookup("SPEEDTRAP_DB_PATH") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(addr) = lookup("SPEEDTRAP_LIVE_ADDR") {
            self.live_addr = addr;
        } else if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| format!("Invalid PORT: {}", port))?;
            self.live_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(dir) = lookup("SPEEDTRAP_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.retention_days, 7);
        assert_eq!(settings.line_settings(), LineSettings::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml(
            "serial_port = \"/dev/ttyACM0\"\nbaud_rate = 115200\nparity = \"even\"\n",
        )
        .unwrap();
        assert_eq!(settings.serial_port, "/dev/ttyACM0");
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.live_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(Settings::from_toml("baud_rate = \"fast\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("ARDUINO_PORT", "/dev/tty.usbserial-1120"),
                ("SPEEDTRAP_BAUD_RATE", "57600"),
                ("SPEEDTRAP_DB_PATH", "/tmp/speed.db"),
                ("PORT", "8080"),
            ]))
            .unwrap();
        assert_eq!(settings.serial_port, "/dev/tty.usbserial-1120");
        assert_eq!(settings.baud_rate, 57600);
        assert_eq!(settings.database_path, PathBuf::from("/tmp/speed.db"));
        assert_eq!(settings.live_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_specific_env_wins() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("ARDUINO_PORT", "/dev/old"),
                ("SPEEDTRAP_SERIAL_PORT", "/dev/new"),
                ("PORT", "8080"),
                ("SPEEDTRAP_LIVE_ADDR", "127.0.0.1:9000"),
            ]))
            .unwrap();
        assert_eq!(settings.serial_port, "/dev/new");
        assert_eq!(settings.live_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_env_is_error() {
        let mut settings = Settings::default();
        assert!(settings.apply_env(env(&[("SPEEDTRAP_BAUD_RATE", "x")])).is_err());
        assert!(settings.apply_env(env(&[("PORT", "99999")])).is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "retention_days = 30\n").unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.retention_days, 30);
    }
}
