//! Configuration for CMap conversion.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Default gzip compression level.
///
/// Same as Python's `gzip.open`, which produced the checked-in artifacts.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

/// Conversion configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertConfig {
    /// Table column (encoding) name to codec label, used to derive Unicode
    /// characters for CIDs. Columns without a codec contribute nothing.
    pub codecs: BTreeMap<String, String>,

    /// gzip compression level (0-9).
    pub compression_level: u32,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvertConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            codecs: BTreeMap::new(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Register the codec used to decode codes of one table column.
    pub fn with_codec(mut self, encoding: impl Into<String>, codec: impl Into<String>) -> Self {
        self.codecs.insert(encoding.into(), codec.into());
        self
    }

    /// Set the gzip compression level. Values above 9 are clamped.
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Parse a command-line codec option of the form `ENC=CODEC`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cmap_oxide::config::ConvertConfig;
    ///
    /// let (enc, codec) = ConvertConfig::parse_codec_option("B5=cp950").unwrap();
    /// assert_eq!(enc, "B5");
    /// assert_eq!(codec, "cp950");
    /// ```
    pub fn parse_codec_option(option: &str) -> Result<(String, String)> {
        match option.split_once('=') {
            Some((enc, codec)) if !enc.trim().is_empty() && !codec.trim().is_empty() => {
                Ok((enc.trim().to_string(), codec.trim().to_string()))
            },
            _ => Err(Error::InvalidArgument(format!(
                "codec option must look like ENC=CODEC, got '{}'",
                option
            ))),
        }
    }
}
