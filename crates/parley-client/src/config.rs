//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the state core can start with zero
//! configuration.

use std::path::PathBuf;

use parley_shared::constants::DEFAULT_BASE_DC_ID;

use crate::state::TimeFormat;

/// Build number shipped with this crate version.
pub const APP_BUILD: u32 = 120;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory holding `state.db`.
    /// Env: `PARLEY_DATA_DIR`
    /// Default: `None` (platform data directory).
    pub data_dir: Option<PathBuf>,

    /// Version of the running build, compared against the stored `version`.
    /// Env: `PARLEY_APP_VERSION`
    /// Default: the crate version.
    pub app_version: String,

    /// Build number of the running build, compared against the stored `build`.
    /// Env: `PARLEY_BUILD`
    /// Default: [`APP_BUILD`].
    pub build: u32,

    /// Mobile clients start at phone sign-in, desktop clients at QR login.
    /// Env: `PARLEY_MOBILE` (true/false)
    /// Default: `false`
    pub mobile: bool,

    /// Default clock format for fresh states.
    /// Env: `PARLEY_TIME_FORMAT` (`h12` / `h23`)
    /// Default: `h23`
    pub time_format: TimeFormat,

    /// Datacenter assumed when a legacy session never recorded one.
    /// Env: `PARLEY_BASE_DC_ID`
    /// Default: `2`
    pub base_dc_id: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            build: APP_BUILD,
            mobile: false,
            time_format: TimeFormat::H23,
            base_dc_id: DEFAULT_BASE_DC_ID,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("PARLEY_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(version) = lookup("PARLEY_APP_VERSION") {
            if !version.trim().is_empty() {
                config.app_version = version.trim().to_string();
            }
        }

        if let Some(val) = lookup("PARLEY_BUILD") {
            match val.parse::<u32>() {
                Ok(build) => config.build = build,
                Err(_) => tracing::warn!(value = %val, "Invalid PARLEY_BUILD, using default"),
            }
        }

        if let Some(val) = lookup("PARLEY_MOBILE") {
            config.mobile = val != "false" && val != "0";
        }

        if let Some(val) = lookup("PARLEY_TIME_FORMAT") {
            match val.as_str() {
                "h12" => config.time_format = TimeFormat::H12,
                "h23" => config.time_format = TimeFormat::H23,
                _ => tracing::warn!(value = %val, "Invalid PARLEY_TIME_FORMAT, using default"),
            }
        }

        if let Some(val) = lookup("PARLEY_BASE_DC_ID") {
            match val.parse::<u32>() {
                Ok(dc) if dc > 0 => config.base_dc_id = dc,
                _ => tracing::warn!(value = %val, "Invalid PARLEY_BASE_DC_ID, using default"),
            }
        }

        config
    }
}
