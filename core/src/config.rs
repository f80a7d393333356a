//! Persistent scan parameters.
//!
//! Tunable front-end settings live in a TOML file at
//! `~/.config/filmscan/config.toml` (or under `XDG_CONFIG_HOME`). A missing
//! file means defaults; unknown keys are ignored so older files keep
//! loading. Values are range-checked at load time, so a bad file is
//! rejected before it ever reaches the device.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::session::ScanParams;

/// What went wrong with the parameter file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a valid parameter file: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{} holds out-of-range parameters: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("cannot encode parameters: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// On-disk scan parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Analog gain per channel
    pub analog_gain: [u8; 3],
    /// Analog offset per channel, -255..=255
    pub analog_offset: [i16; 3],
    /// CCD shutter pulse width per channel
    pub shutter: [u16; 3],
    /// Post-scan gain per channel, 8.8 fixed point
    pub boost: [u16; 3],
    /// Scan speed, 1 (slowest) ..= 4
    pub speed: u8,
    /// Input sample depth: 8, 14 or 16 bits
    pub sample_bits: u8,
    /// Uncorrected columns at line start
    pub margin: u32,
    /// Upper bound for shutter widths
    pub max_shutter: u16,
    /// Speed used for the auto-exposure pre-pass
    pub auto_exposure_speed: u8,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let params = ScanParams::default();
        Self {
            analog_gain: params.a_gain,
            analog_offset: params.a_offset,
            shutter: params.shutter,
            boost: params.boost,
            speed: params.speed,
            sample_bits: params.in_mode,
            margin: params.margin,
            max_shutter: params.max_shutter,
            auto_exposure_speed: params.auto_exp,
        }
    }
}

impl ScanConfig {
    /// Default configuration file location
    pub fn config_file() -> PathBuf {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("filmscan").join("config.toml")
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::config_file())
    }

    /// Load from `path`. A file that was never written is the same as an
    /// all-default one; a file that exists but cannot be read, parsed or
    /// validated is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Err(err) = config.to_params().validate() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: err.to_string(),
            });
        }
        Ok(config)
    }

    /// Write to `path`, creating missing directories along the way
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                fs::create_dir_all(dir).map_err(write_err)?
            }
            _ => {}
        }
        fs::write(path, text).map_err(write_err)
    }

    /// Session parameters carrying these settings
    pub fn to_params(&self) -> ScanParams {
        ScanParams {
            a_gain: self.analog_gain,
            a_offset: self.analog_offset,
            shutter: self.shutter,
            boost: self.boost,
            speed: self.speed,
            in_mode: self.sample_bits,
            margin: self.margin,
            max_shutter: self.max_shutter,
            auto_exp: self.auto_exposure_speed,
            ..ScanParams::default()
        }
    }
}
