//! Conversion settings, loadable from TOML.
//!
//! ```toml
//! format = "png"
//! quality = 85
//! thumbnail_max_edge = 512
//!
//! [develop]
//! half_size = true
//! gamma = "bt709"
//! white_balance = { custom = [2.0, 1.0, 1.5, 1.0] }
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::{DevelopOptions, FilterType};
use crate::encode::OutputFormat;

pub const DEFAULT_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Options applied by a converter to every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// File format written by directory conversions.
    pub format: OutputFormat,
    /// JPEG quality, 1-100.
    pub quality: u8,
    /// Longest edge of decoded thumbnails; `None` keeps the embedded size.
    pub thumbnail_max_edge: Option<u32>,
    pub thumbnail_filter: FilterType,
    pub develop: DevelopOptions,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality: DEFAULT_QUALITY,
            thumbnail_max_edge: None,
            thumbnail_filter: FilterType::default(),
            develop: DevelopOptions::default(),
        }
    }
}

impl ConvertOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::Invalid {
                field: "quality",
                reason: format!("{} is outside 1-100", self.quality),
            });
        }
        if self.thumbnail_max_edge == Some(0) {
            return Err(ConfigError::Invalid {
                field: "thumbnail_max_edge",
                reason: "must be positive".to_string(),
            });
        }
        let brightness = self.develop.brightness;
        if !brightness.is_finite() || brightness <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "develop.brightness",
                reason: format!("{} is not a positive number", brightness),
            });
        }
        Ok(())
    }
}
