//! Sequencer configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Timer rate the driver bytecode was authored against.
pub const DEFAULT_TICK_RATE_HZ: u32 = 72;

/// Displacement subtracted from absolute addresses in old sound data.
pub const ABSOLUTE_ADDRESS_BASE: i32 = 191;

/// Driver revision the sound data was written for
///
/// Revisions differ in the size of the program table, in how jump and call
/// targets are encoded, and in how sound effect volume is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum DriverVersion {
    /// 150 programs, absolute jumps and calls
    V1,
    /// 250 programs, absolute calls
    V2,
    /// 250 programs, relative addressing
    #[default]
    V3,
    /// 500 programs, independent sound effect volume
    V4,
}

impl DriverVersion {
    /// Number of program slots before the instrument table
    pub fn program_count(self) -> u16 {
        match self {
            DriverVersion::V1 => 150,
            DriverVersion::V2 | DriverVersion::V3 => 250,
            DriverVersion::V4 => 500,
        }
    }

    /// Jump targets are absolute addresses
    pub fn absolute_jumps(self) -> bool {
        self == DriverVersion::V1
    }

    /// Subroutine targets are absolute addresses
    pub fn absolute_calls(self) -> bool {
        self < DriverVersion::V3
    }

    /// Sound effect volume is set separately from music volume
    pub fn separate_sfx_volume(self) -> bool {
        self >= DriverVersion::V4
    }

    /// Sound effect velocity scaling uses the linear formula
    pub fn linear_sfx_scaling(self) -> bool {
        self >= DriverVersion::V3
    }
}

/// Sequencer configuration
///
/// Every field has a default, so partial JSON documents are accepted.
///
/// # Example
///
/// ```
/// use adlib_sequencer::{DriverVersion, SequencerConfig};
///
/// let config = SequencerConfig::from_json_str(r#"{ "version": "V1" }"#).unwrap();
/// assert_eq!(config.version, DriverVersion::V1);
/// assert_eq!(config.music_volume, 0xFF);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Sound data revision
    pub version: DriverVersion,
    /// Early key-off distance every freshly started channel begins with
    ///
    /// 0 lets each note ring for its full duration; 1 releases one tick early.
    pub default_note_spacing: u8,
    /// Initial music volume modifier (0 = silent, 0xFF = full)
    pub music_volume: u8,
    /// Initial sound effect volume modifier
    pub sfx_volume: u8,
    /// Rate at which the host is expected to call `tick`
    pub tick_rate_hz: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            version: DriverVersion::default(),
            default_note_spacing: 0,
            music_volume: 0xFF,
            sfx_volume: 0xFF,
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
        }
    }
}

impl SequencerConfig {
    /// Configuration for a specific driver revision
    pub fn for_version(version: DriverVersion) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges
    pub fn validate(&self) -> crate::Result<()> {
        if self.tick_rate_hz == 0 {
            return Err(crate::SequencerError::ConfigError(
                "tick_rate_hz must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
