//! # Persistence Module
//!
//! Keeps the gamepad options alive across power cycles. The options live as a
//! fixed 12-byte record in a reserved slot of a byte-addressed medium (an
//! EEPROM emulation backed by RAM or by an image file).
//!
//! ## Record Layout
//! ```text
//! offset  size  field
//!      0     1  input mode
//!      1     1  d-pad mode
//!      2     1  SOCD mode
//!      3     1  invert X axis (0/1)
//!      4     1  invert Y axis (0/1)
//!      5     3  padding
//!      8     4  CRC-32, little endian
//! ```
//!
//! The checksum is computed over all 12 bytes with the checksum bytes zeroed,
//! so padding bytes take part in validation as they are stored.
//!
//! ## Error Handling Strategy
//! A checksum mismatch is not an error: [`options_store::OptionsStore::load`]
//! silently resets the record to defaults and writes it back. Only failures of
//! the medium itself surface as [`medium::StorageError`].

pub mod medium;
pub mod options_store;

use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const OPTIONS_RECORD_SIZE: usize = 12;
const PADDING_OFFSET: usize = 5;
const CHECKSUM_OFFSET: usize = 8;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Host protocol the processing engine emulates
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InputMode {
    #[default]
    XInput = 0,
    Switch = 1,
    Hid = 2,
    Keyboard = 3,
    Config = 255,
}

/// How the d-pad is reported to the host
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DpadMode {
    #[default]
    Digital = 0,
    LeftAnalog = 1,
    RightAnalog = 2,
}

/// Policy for simultaneous opposing cardinal directions
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SocdMode {
    UpPriority = 0,
    #[default]
    Neutral = 1,
    SecondInputPriority = 2,
}

/// Raised when a record byte does not name a known variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field} value in options record: {value:#04x}")]
pub struct RecordError {
    pub field: &'static str,
    pub value: u8,
}

impl TryFrom<u8> for InputMode {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::XInput),
            1 => Ok(Self::Switch),
            2 => Ok(Self::Hid),
            3 => Ok(Self::Keyboard),
            255 => Ok(Self::Config),
            _ => Err(RecordError {
                field: "input mode",
                value,
            }),
        }
    }
}

impl TryFrom<u8> for DpadMode {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Digital),
            1 => Ok(Self::LeftAnalog),
            2 => Ok(Self::RightAnalog),
            _ => Err(RecordError {
                field: "d-pad mode",
                value,
            }),
        }
    }
}

impl TryFrom<u8> for SocdMode {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::UpPriority),
            1 => Ok(Self::Neutral),
            2 => Ok(Self::SecondInputPriority),
            _ => Err(RecordError {
                field: "SOCD mode",
                value,
            }),
        }
    }
}

fn flag_from_byte(field: &'static str, value: u8) -> Result<bool, RecordError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(RecordError { field, value }),
    }
}

/// User-configurable interpretation options, persisted with a checksum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GamepadOptions {
    pub input_mode: InputMode,
    pub dpad_mode: DpadMode,
    pub socd_mode: SocdMode,
    pub invert_x_axis: bool,
    pub invert_y_axis: bool,
    pub checksum: u32,
}

impl GamepadOptions {
    /// Factory options, unsigned
    pub fn defaults(socd_mode: SocdMode) -> Self {
        Self {
            input_mode: InputMode::XInput,
            dpad_mode: DpadMode::Digital,
            socd_mode,
            invert_x_axis: false,
            invert_y_axis: false,
            checksum: 0,
        }
    }

    /// Serializes the options including the current checksum field
    pub fn to_record(&self) -> [u8; OPTIONS_RECORD_SIZE] {
        let mut record = [0u8; OPTIONS_RECORD_SIZE];
        record[0] = self.input_mode as u8;
        record[1] = self.dpad_mode as u8;
        record[2] = self.socd_mode as u8;
        record[3] = self.invert_x_axis as u8;
        record[4] = self.invert_y_axis as u8;
        record[CHECKSUM_OFFSET..].copy_from_slice(&self.checksum.to_le_bytes());
        record
    }

    /// Parses a record without looking at the checksum.
    ///
    /// Padding must be zero so that a parsed record serializes back to the
    /// exact bytes it was read from.
    pub fn from_record(record: &[u8; OPTIONS_RECORD_SIZE]) -> Result<Self, RecordError> {
        if let Some(&value) = record[PADDING_OFFSET..CHECKSUM_OFFSET]
            .iter()
            .find(|byte| **byte != 0)
        {
            return Err(RecordError {
                field: "padding",
                value,
            });
        }

        Ok(Self {
            input_mode: InputMode::try_from(record[0])?,
            dpad_mode: DpadMode::try_from(record[1])?,
            socd_mode: SocdMode::try_from(record[2])?,
            invert_x_axis: flag_from_byte("invert X axis", record[3])?,
            invert_y_axis: flag_from_byte("invert Y axis", record[4])?,
            checksum: stored_checksum(record),
        })
    }

    /// Returns a copy whose checksum matches its contents
    pub fn signed(mut self) -> Self {
        self.checksum = 0;
        self.checksum = record_checksum(&self.to_record());
        self
    }

    pub fn has_valid_checksum(&self) -> bool {
        self.checksum == record_checksum(&self.to_record())
    }
}

impl fmt::Display for GamepadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input={:?} dpad={:?} socd={:?} invert_x={} invert_y={} crc={:#010x}",
            self.input_mode,
            self.dpad_mode,
            self.socd_mode,
            self.invert_x_axis,
            self.invert_y_axis,
            self.checksum
        )
    }
}

pub fn stored_checksum(record: &[u8; OPTIONS_RECORD_SIZE]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&record[CHECKSUM_OFFSET..]);
    u32::from_le_bytes(bytes)
}

/// CRC-32 of the record with its checksum field zeroed
pub fn record_checksum(record: &[u8; OPTIONS_RECORD_SIZE]) -> u32 {
    let mut neutral = *record;
    neutral[CHECKSUM_OFFSET..].fill(0);
    CRC32.checksum(&neutral)
}
