//! Sound data blob access
//!
//! A sound data blob starts with a table of little-endian 16-bit offsets, one
//! per program, followed by the instrument offsets (the instrument table
//! starts right after the last program slot). Every read here is
//! bounds-checked against the blob and reports a [`SoundDataError`] instead of
//! reading foreign memory.
//!
//! Program layout at its offset:
//!
//! | byte | meaning                       |
//! |------|-------------------------------|
//! | 0    | target channel (0-9)          |
//! | 1    | priority (signed)             |
//! | 2..  | bytecode stream               |

use crate::config::DriverVersion;

/// Size in bytes of one encoded instrument.
pub const INSTRUMENT_SIZE: usize = 11;

/// Errors raised by bounds-checked sound data decoding
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundDataError {
    /// A read would run past the end of the blob
    #[error("read of offset {offset:#06x} outside sound data of {len} bytes")]
    OutOfBounds {
        /// Requested offset
        offset: usize,
        /// Blob length
        len: usize,
    },

    /// Program table entry is empty or points outside the blob
    #[error("invalid program {0}")]
    InvalidProgram(u16),

    /// Instrument table entry is empty or too short
    #[error("invalid instrument {0}")]
    InvalidInstrument(u8),

    /// Program header names a channel above 9
    #[error("invalid channel {0}")]
    InvalidChannel(u8),
}

/// Decoded program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Program id the header was looked up with
    pub id: u16,
    /// Offset of the header inside the blob
    pub offset: usize,
    /// Channel the program plays on
    pub channel: usize,
    /// Start priority
    pub priority: i8,
}

impl ProgramHeader {
    /// Offset of the first bytecode instruction
    pub fn start(&self) -> usize {
        self.offset + 2
    }
}

/// Operator parameters of one instrument
///
/// Fields are named after the OPL registers they are written to, in the order
/// the blob stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Instrument {
    /// 0x20: AM / vibrato / EG type / KSR / multiple, modulator
    pub modulator_characteristic: u8,
    /// 0x23: AM / vibrato / EG type / KSR / multiple, carrier
    pub carrier_characteristic: u8,
    /// 0xC0: feedback and connection
    pub feedback_connection: u8,
    /// 0xE0: waveform select, modulator
    pub modulator_waveform: u8,
    /// 0xE3: waveform select, carrier
    pub carrier_waveform: u8,
    /// 0x40: key scale level / total level, modulator
    pub modulator_level: u8,
    /// 0x43: key scale level / total level, carrier
    pub carrier_level: u8,
    /// 0x60: attack / decay, modulator
    pub modulator_attack_decay: u8,
    /// 0x63: attack / decay, carrier
    pub carrier_attack_decay: u8,
    /// 0x80: sustain / release, modulator
    pub modulator_sustain_release: u8,
    /// 0x83: sustain / release, carrier
    pub carrier_sustain_release: u8,
}

impl Instrument {
    /// Decode an instrument from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let b: &[u8; INSTRUMENT_SIZE] = bytes.get(..INSTRUMENT_SIZE)?.try_into().ok()?;
        Some(Self {
            modulator_characteristic: b[0],
            carrier_characteristic: b[1],
            feedback_connection: b[2],
            modulator_waveform: b[3],
            carrier_waveform: b[4],
            modulator_level: b[5],
            carrier_level: b[6],
            modulator_attack_decay: b[7],
            carrier_attack_decay: b[8],
            modulator_sustain_release: b[9],
            carrier_sustain_release: b[10],
        })
    }

    /// Both operators output directly (additive synthesis)
    pub fn is_additive(&self) -> bool {
        self.feedback_connection & 0x01 != 0
    }
}

/// Owned sound data blob
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoundData {
    bytes: Vec<u8>,
}

impl From<Vec<u8>> for SoundData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl SoundData {
    /// Wrap a raw blob
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Blob length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for an empty blob
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Read one byte
    pub fn byte(&self, offset: usize) -> Result<u8, SoundDataError> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(SoundDataError::OutOfBounds {
                offset,
                len: self.len(),
            })
    }

    /// Read a little-endian 16-bit word
    pub fn read_le_u16(&self, offset: usize) -> Result<u16, SoundDataError> {
        Ok(u16::from_le_bytes([
            self.byte(offset)?,
            self.byte(offset + 1)?,
        ]))
    }

    /// Read a big-endian 16-bit word
    pub fn read_be_u16(&self, offset: usize) -> Result<u16, SoundDataError> {
        Ok(u16::from_be_bytes([
            self.byte(offset)?,
            self.byte(offset + 1)?,
        ]))
    }

    /// Look up the blob offset of a program table slot
    ///
    /// Empty slots (0 and 0xFFFF) and offsets outside the blob are rejected.
    pub fn program_offset(&self, id: u16) -> Result<usize, SoundDataError> {
        let slot = id as usize * 2;
        if slot + 1 >= self.len() {
            return Err(SoundDataError::InvalidProgram(id));
        }
        let offset = self
            .read_le_u16(slot)
            .map_err(|_| SoundDataError::InvalidProgram(id))?;
        if offset == 0 || offset == 0xFFFF || offset as usize >= self.len() {
            return Err(SoundDataError::InvalidProgram(id));
        }
        Ok(offset as usize)
    }

    /// Decode the header of a program
    pub fn program(&self, id: u16) -> Result<ProgramHeader, SoundDataError> {
        let offset = self.program_offset(id)?;
        if offset + 2 > self.len() {
            return Err(SoundDataError::InvalidProgram(id));
        }
        let channel = self.byte(offset)?;
        if channel > 9 {
            return Err(SoundDataError::InvalidChannel(channel));
        }
        Ok(ProgramHeader {
            id,
            offset,
            channel: channel as usize,
            priority: self.byte(offset + 1)? as i8,
        })
    }

    /// Decode an instrument
    pub fn instrument(
        &self,
        version: DriverVersion,
        id: u8,
    ) -> Result<Instrument, SoundDataError> {
        let offset = self
            .program_offset(version.program_count() + id as u16)
            .map_err(|_| SoundDataError::InvalidInstrument(id))?;
        Instrument::decode(&self.bytes[offset..]).ok_or(SoundDataError::InvalidInstrument(id))
    }

    /// Overwrite one byte in place
    pub(crate) fn patch(&mut self, offset: usize, value: u8) {
        if let Some(b) = self.bytes.get_mut(offset) {
            *b = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_with_program() -> SoundData {
        // slot 0 empty, slot 1 -> offset 4
        SoundData::new(vec![0x00, 0x00, 0x04, 0x00, 0x03, 0xFB, 0x00, 0x0A])
    }

    #[test]
    fn test_program_header() {
        let data = blob_with_program();
        let header = data.program(1).unwrap();
        assert_eq!(header.offset, 4);
        assert_eq!(header.channel, 3);
        assert_eq!(header.priority, -5);
        assert_eq!(header.start(), 6);
    }

    #[test]
    fn test_empty_and_out_of_range_slots() {
        let data = blob_with_program();
        assert_eq!(data.program(0), Err(SoundDataError::InvalidProgram(0)));
        assert_eq!(data.program(4), Err(SoundDataError::InvalidProgram(4)));
        assert_eq!(data.program(200), Err(SoundDataError::InvalidProgram(200)));
    }

    #[test]
    fn test_offset_past_end() {
        let data = SoundData::new(vec![0x00, 0x00, 0x40, 0x00]);
        assert_eq!(data.program(1), Err(SoundDataError::InvalidProgram(1)));
    }

    #[test]
    fn test_invalid_channel() {
        let data = SoundData::new(vec![0x00, 0x00, 0x04, 0x00, 0x0C, 0x01]);
        assert_eq!(data.program(1), Err(SoundDataError::InvalidChannel(12)));
    }

    #[test]
    fn test_word_reads() {
        let data = SoundData::new(vec![0x34, 0x12]);
        assert_eq!(data.read_le_u16(0), Ok(0x1234));
        assert_eq!(data.read_be_u16(0), Ok(0x3412));
        assert_eq!(
            data.read_le_u16(1),
            Err(SoundDataError::OutOfBounds { offset: 2, len: 2 })
        );
    }

    #[test]
    fn test_instrument_decode() {
        let version = DriverVersion::V1;
        let slot = version.program_count() as usize * 2;
        let mut bytes = vec![0u8; slot + 2];
        let offset = bytes.len() as u16;
        bytes[slot..slot + 2].copy_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);

        let data = SoundData::new(bytes);
        let instrument = data.instrument(version, 0).unwrap();
        assert_eq!(instrument.modulator_characteristic, 1);
        assert_eq!(instrument.feedback_connection, 3);
        assert!(instrument.is_additive());
        assert_eq!(instrument.carrier_level, 7);
        assert_eq!(instrument.carrier_sustain_release, 11);
    }

    #[test]
    fn test_truncated_instrument() {
        let version = DriverVersion::V1;
        let slot = version.program_count() as usize * 2;
        let mut bytes = vec![0u8; slot + 2];
        let offset = bytes.len() as u16;
        bytes[slot..slot + 2].copy_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);

        let data = SoundData::new(bytes);
        assert_eq!(
            data.instrument(version, 0),
            Err(SoundDataError::InvalidInstrument(0))
        );
    }

    #[test]
    fn test_patch_ignores_out_of_bounds() {
        let mut data = SoundData::new(vec![0; 2]);
        data.patch(1, 0xAA);
        data.patch(5, 0xBB);
        assert_eq!(data.as_bytes(), &[0x00, 0xAA]);
    }
}
