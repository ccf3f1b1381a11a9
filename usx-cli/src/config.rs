//! Configuration file support for usx.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (USX_*)
//! 3. Local config file (./usx.toml)
//! 4. Global config file (~/.config/usx/config.toml)
//!
//! ```toml
//! [connection]
//! serial = "/dev/ttyUSB0"
//! baud = 115200
//! timeout_ms = 3000
//!
//! [usb]
//! vid = 0x1782
//! pid = 0x4d00
//! interface = 0
//! input = 0x85
//! output = 0x06
//!
//! [protocol]
//! framing = "bootrom"
//! block_size = 512
//! ```

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use usx::ChecksumMode;

/// Local configuration file name.
const LOCAL_CONFIG: &str = "usx.toml";

/// Serial connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Transport timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// USB device and endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbConfig {
    /// USB Vendor ID.
    pub vid: Option<u16>,
    /// USB Product ID.
    pub pid: Option<u16>,
    /// Interface number.
    pub interface: Option<u8>,
    /// Bulk IN endpoint.
    pub input: Option<u8>,
    /// Bulk OUT endpoint.
    pub output: Option<u8>,
}

/// Protocol configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Checksum framing.
    pub framing: Option<ChecksumMode>,
    /// Transfer block size.
    pub block_size: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Serial connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// USB settings.
    #[serde(default)]
    pub usb: UsbConfig,
    /// Protocol settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "usx").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Values set in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.connection.serial, other.connection.serial);
        take(&mut self.connection.baud, other.connection.baud);
        take(&mut self.connection.timeout_ms, other.connection.timeout_ms);

        take(&mut self.usb.vid, other.usb.vid);
        take(&mut self.usb.pid, other.usb.pid);
        take(&mut self.usb.interface, other.usb.interface);
        take(&mut self.usb.input, other.usb.input);
        take(&mut self.usb.output, other.usb.output);

        take(&mut self.protocol.framing, other.protocol.framing);
        take(&mut self.protocol.block_size, other.protocol.block_size);
    }
}
