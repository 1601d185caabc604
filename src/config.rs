//! Terminal configuration
//!
//! A [`TerminalConfig`] is plain serde data stored as camelCase JSON. It can
//! be built in code, parsed from a string, or loaded from the platform
//! default location returned by [`default_config_path`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::lib3270::ScreenSize;
use crate::protocol_common::traits::TerminalHost;

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "TN3270R_CONFIG";

/// TLS trust settings. Certificate validation itself cannot be turned off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    /// Extra trusted CAs, PEM or DER
    pub ca_bundle_path: Option<String>,
    /// Also trust the platform certificate store
    pub use_native_roots: bool,
}

/// Everything a terminal needs besides the host address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalConfig {
    /// IBM-3278 model, 2 to 5
    pub model: u8,
    /// Explicit primary size; overrides the model size when both are set
    pub rows: Option<usize>,
    pub columns: Option<usize>,
    /// Size used by Erase/Write Alternate; defaults to the model size
    pub alternate_rows: Option<usize>,
    pub alternate_columns: Option<usize>,
    /// Reported terminal type; defaults to IBM-3278-<model>
    pub terminal_type: Option<String>,
    /// Accept TN3270E when the host offers it
    pub tn3270e: bool,
    /// LU to connect to under TN3270E
    pub device_name: Option<String>,
    pub connect_timeout_ms: u64,
    pub negotiation_timeout_ms: u64,
    /// Timeout for waits that don't name one
    pub default_wait_timeout_ms: u64,
    /// How often the reader thread lets go of the socket to check for close
    pub reader_poll_interval_ms: u64,
    pub tls: TlsConfig,
    pub capture_images: bool,
    /// Oldest images are dropped beyond this; 0 keeps everything
    pub max_images: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            model: 2,
            rows: None,
            columns: None,
            alternate_rows: None,
            alternate_columns: None,
            terminal_type: None,
            tn3270e: false,
            device_name: None,
            connect_timeout_ms: 10_000,
            negotiation_timeout_ms: 15_000,
            default_wait_timeout_ms: 30_000,
            reader_poll_interval_ms: 50,
            tls: TlsConfig::default(),
            capture_images: true,
            max_images: 1000,
        }
    }
}

impl TerminalConfig {
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: TerminalConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        debug!("loaded terminal config from {}", path.display());
        Self::from_json(&text)
    }

    /// Load from [`default_config_path`], falling back to defaults when the
    /// file is missing
    pub fn load_default() -> ConfigResult<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let file_error = |e: std::io::Error| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(file_error)?;
            }
        }
        fs::write(path, self.to_json()?).map_err(file_error)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if ScreenSize::model(self.model).is_none() {
            return Err(invalid("model", self.model, "must be 2, 3, 4 or 5"));
        }
        for (name, rows, columns) in [
            ("rows/columns", self.rows, self.columns),
            ("alternateRows/alternateColumns", self.alternate_rows, self.alternate_columns),
        ] {
            match (rows, columns) {
                (None, None) => {}
                (Some(r), Some(c)) if r > 0 && c > 0 && r * c <= 16384 => {}
                (Some(r), Some(c)) => {
                    return Err(invalid(name, format!("{r}x{c}"), "buffer must hold 1 to 16384 cells"))
                }
                _ => return Err(invalid(name, "partial", "set both or neither")),
            }
        }
        if let Some(terminal_type) = &self.terminal_type {
            if terminal_type.is_empty() || !terminal_type.is_ascii() {
                return Err(invalid("terminalType", terminal_type, "must be non-empty ASCII"));
            }
        }
        for (name, value) in [
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("negotiationTimeoutMs", self.negotiation_timeout_ms),
            ("readerPollIntervalMs", self.reader_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(invalid(name, value, "must be greater than zero"));
            }
        }
        Ok(())
    }

    pub fn primary_size(&self) -> ScreenSize {
        match (self.rows, self.columns) {
            (Some(rows), Some(columns)) => ScreenSize::new(rows, columns),
            _ => self.model_size(),
        }
    }

    pub fn alternate_size(&self) -> ScreenSize {
        match (self.alternate_rows, self.alternate_columns) {
            (Some(rows), Some(columns)) => ScreenSize::new(rows, columns),
            _ => self.model_size(),
        }
    }

    fn model_size(&self) -> ScreenSize {
        ScreenSize::model(self.model).unwrap_or_else(|| {
            warn!("unknown model {}, using model 2", self.model);
            ScreenSize::MODEL_2
        })
    }

    pub fn terminal_type(&self) -> String {
        self.terminal_type
            .clone()
            .unwrap_or_else(|| format!("IBM-3278-{}", self.model))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn default_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.default_wait_timeout_ms)
    }

    pub fn reader_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reader_poll_interval_ms)
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// A fixed host address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Defaults to true on port 992
    #[serde(default)]
    pub tls: Option<bool>,
}

fn default_port() -> u16 {
    23
}

impl HostConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self { hostname: hostname.into(), port, tls: None }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = Some(tls);
        self
    }
}

impl TerminalHost for HostConfig {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn telnet_port(&self) -> u16 {
        self.port
    }

    fn is_telnet_port_tls(&self) -> bool {
        self.tls.unwrap_or(self.port == 992)
    }
}

/// Determine a platform-appropriate default config file path.
/// Priority:
/// 1) TN3270R_CONFIG env var
/// 2) platform config dir, e.g. ~/.config/tn3270r/terminal.json
/// 3) ./tn3270r.json
pub fn default_config_path() -> PathBuf {
    if let Some(p) = std::env::var_os(CONFIG_ENV_VAR) {
        return PathBuf::from(p);
    }
    dirs::config_dir()
        .map(|dir| dir.join("tn3270r").join("terminal.json"))
        .unwrap_or_else(|| PathBuf::from("tn3270r.json"))
}
