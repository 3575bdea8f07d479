//! Server configuration.
//!
//! Settings are resolved in three layers: built-in defaults, then an
//! optional `flowvis.toml` file, then `FLOWVIS_*` environment variables.
//! The resolved [`Settings`] struct travels into the server state; a small
//! subset of it is also exposed to browser clients through the
//! `GET /setting` endpoint as the "settings block".

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "flowvis.toml";

/// Milliseconds between the client's layout autosave checks.
const DEFAULT_SAVE_INTERVAL_MS: u64 = 5000;

/// Wall-clock budget for a headless-browser capture.
const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 30;

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Address the server binds to
    pub host: String,

    /// Fixed listening port; `None` scans upward from the default
    pub port: Option<u16>,

    /// Interval at which the client checks for unsaved layout changes
    pub save_time_interval_ms: u64,

    /// Extra on-disk asset directory served under `/static`
    pub static_dir: Option<PathBuf>,

    /// Explicit headless-browser binary for captures
    pub browser: Option<PathBuf>,

    pub capture_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
            save_time_interval_ms: DEFAULT_SAVE_INTERVAL_MS,
            static_dir: None,
            browser: None,
            capture_timeout_secs: DEFAULT_CAPTURE_TIMEOUT_SECS,
        }
    }
}

/// On-disk configuration file schema; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    host: Option<String>,
    port: Option<u16>,
    save_time_interval_ms: Option<u64>,
    static_dir: Option<PathBuf>,
    browser: Option<PathBuf>,
    capture_timeout_secs: Option<u64>,
}

impl Settings {
    /// Resolve settings from the working directory and process environment.
    pub fn load() -> Result<Self> {
        let config_path = Path::new(CONFIG_FILE);
        let file = config_path.exists().then_some(config_path);
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Layered resolution: defaults, then `file`, then the `env` lookup.
    ///
    /// The environment is injected as a closure so tests can exercise
    /// overrides without touching process globals.
    pub fn resolve(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(path) = file {
            let raw = std::fs::read_to_string(path)?;
            let parsed: SettingsFile = toml::from_str(&raw)
                .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
            if let Some(host) = parsed.host {
                settings.host = host;
            }
            if parsed.port.is_some() {
                settings.port = parsed.port;
            }
            if let Some(ms) = parsed.save_time_interval_ms {
                settings.save_time_interval_ms = ms;
            }
            if parsed.static_dir.is_some() {
                settings.static_dir = parsed.static_dir;
            }
            if parsed.browser.is_some() {
                settings.browser = parsed.browser;
            }
            if let Some(secs) = parsed.capture_timeout_secs {
                settings.capture_timeout_secs = secs;
            }
        }

        if let Some(host) = env("FLOWVIS_HOST") {
            settings.host = host;
        }
        if let Some(port) = env("FLOWVIS_PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::InvalidInput(format!("FLOWVIS_PORT: '{}'", port)))?;
            settings.port = Some(port);
        }
        if let Some(ms) = env("FLOWVIS_SAVE_INTERVAL_MS") {
            settings.save_time_interval_ms = ms
                .parse()
                .map_err(|_| Error::InvalidInput(format!("FLOWVIS_SAVE_INTERVAL_MS: '{}'", ms)))?;
        }
        if let Some(dir) = env("FLOWVIS_STATIC_DIR") {
            settings.static_dir = Some(PathBuf::from(dir));
        }
        if let Some(browser) = env("FLOWVIS_BROWSER") {
            settings.browser = Some(PathBuf::from(browser));
        }
        if let Some(secs) = env("FLOWVIS_CAPTURE_TIMEOUT_SECS") {
            settings.capture_timeout_secs = secs.parse().map_err(|_| {
                Error::InvalidInput(format!("FLOWVIS_CAPTURE_TIMEOUT_SECS: '{}'", secs))
            })?;
        }

        Ok(settings)
    }

    /// Key/value settings exposed to clients via `GET /setting`.
    pub fn settings_block(&self) -> HashMap<String, serde_json::Value> {
        let mut block = HashMap::new();
        block.insert(
            "save_time_interval".to_string(),
            serde_json::json!(self.save_time_interval_ms),
        );
        block
    }
}
