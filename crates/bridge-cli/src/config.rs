//! Config file handling – reads/writes `~/.sensorbridge/config.toml`.
//!
//! A missing file is not an error: the defaults are written there on first
//! run and the bridge runs on [`BridgeConfig::default`].  Environment
//! variables are applied on top of whatever was loaded and never saved.

use std::fs;
use std::path::{Path, PathBuf};

use bridge_runtime::BridgeConfig;
use bridge_types::BridgeError;
use tracing::{info, warn};

pub const ENV_ENDPOINT: &str = "SENSORBRIDGE_ENDPOINT";
pub const ENV_POSITION_DEVICE: &str = "SENSORBRIDGE_POSITION_DEVICE";
pub const ENV_ORIENTATION_DEVICE: &str = "SENSORBRIDGE_ORIENTATION_DEVICE";
pub const ENV_NO_IMU: &str = "SENSORBRIDGE_NO_IMU";
pub const ENV_NO_DWM: &str = "SENSORBRIDGE_NO_DWM";

/// Return the path to `~/.sensorbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sensorbridge").join("config.toml")
}

/// Load `path` (or the defaults when it does not exist) and apply the
/// process environment.
pub fn load(path: &Path) -> Result<BridgeConfig, BridgeError> {
    let mut cfg = load_or_init(path)?;
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

/// Parse `path`, or write the defaults there if it does not exist yet.
///
/// Failing to write the first-run file is logged; the defaults are still
/// returned.
pub(crate) fn load_or_init(path: &Path) -> Result<BridgeConfig, BridgeError> {
    if let Some(cfg) = load_from(path)? {
        return Ok(cfg);
    }
    let cfg = BridgeConfig::default();
    match save_to(&cfg, path) {
        Ok(()) => info!(path = %path.display(), "wrote default config"),
        Err(e) => warn!(error = %e, "running on defaults without a config file"),
    }
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<BridgeConfig>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `SENSORBRIDGE_*` overrides looked up through `var`.
///
/// | Variable | Effect |
/// |---|---|
/// | `SENSORBRIDGE_ENDPOINT` | `bus.endpoint` |
/// | `SENSORBRIDGE_ORIENTATION_DEVICE` | `orientation.device` |
/// | `SENSORBRIDGE_POSITION_DEVICE` | `position.device` |
/// | `SENSORBRIDGE_NO_IMU=1` | disables the orientation sensor |
/// | `SENSORBRIDGE_NO_DWM=1` | disables the position sensor |
///
/// Empty strings and unrecognised flag values leave the config untouched.
pub fn apply_overrides(cfg: &mut BridgeConfig, var: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(endpoint) = non_empty(ENV_ENDPOINT) {
        cfg.bus.endpoint = endpoint;
    }
    if let Some(device) = non_empty(ENV_ORIENTATION_DEVICE) {
        cfg.orientation.device = device;
    }
    if let Some(device) = non_empty(ENV_POSITION_DEVICE) {
        cfg.position.device = device;
    }
    if let Some(disabled) = var(ENV_NO_IMU).as_deref().and_then(parse_flag) {
        cfg.orientation.enabled = !disabled;
    }
    if let Some(disabled) = var(ENV_NO_DWM).as_deref().and_then(parse_flag) {
        cfg.position.enabled = !disabled;
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Write `cfg` to `path`, creating the parent directory if necessary.
pub(crate) fn save_to(cfg: &BridgeConfig, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BridgeError::Config(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| BridgeError::Config(format!("failed to write {}: {e}", path.display())))
}
