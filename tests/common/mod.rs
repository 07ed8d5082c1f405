//! Sound data assembly and trace helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use adlib_sequencer::{DriverVersion, RegisterLog, RegisterWrite, Sequencer};

const STOP: [u8; 2] = [0x88, 0x00];

/// Builds a sound data blob: program table, instrument table, then bodies.
///
/// Every body is terminated with a stop so programs never run into the next
/// one.
pub struct SongBuilder {
    version: DriverVersion,
    programs: BTreeMap<u16, (u8, u8, Vec<u8>)>,
    instruments: Vec<[u8; 11]>,
}

impl SongBuilder {
    pub fn new() -> Self {
        Self::for_version(DriverVersion::V3)
    }

    pub fn for_version(version: DriverVersion) -> Self {
        Self {
            version,
            programs: BTreeMap::new(),
            instruments: Vec::new(),
        }
    }

    /// Add program `id` on `channel` with a raw priority byte
    pub fn program(mut self, id: u16, channel: u8, priority: u8, code: &[u8]) -> Self {
        self.programs.insert(id, (channel, priority, code.to_vec()));
        self
    }

    /// Add the next instrument
    pub fn instrument(mut self, bytes: [u8; 11]) -> Self {
        self.instruments.push(bytes);
        self
    }

    fn slots(&self) -> usize {
        if self.instruments.is_empty() {
            self.programs.keys().max().map_or(1, |&id| id as usize + 1)
        } else {
            self.version.program_count() as usize + self.instruments.len()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let slots = self.slots();
        let mut blob = vec![0u8; slots * 2];

        for (&id, (channel, priority, code)) in &self.programs {
            let offset = blob.len() as u16;
            blob[id as usize * 2..id as usize * 2 + 2].copy_from_slice(&offset.to_le_bytes());
            blob.push(*channel);
            blob.push(*priority);
            blob.extend_from_slice(code);
            blob.extend_from_slice(&STOP);
        }

        let base = self.version.program_count() as usize;
        for (i, instrument) in self.instruments.iter().enumerate() {
            let offset = blob.len() as u16;
            let slot = (base + i) * 2;
            blob[slot..slot + 2].copy_from_slice(&offset.to_le_bytes());
            blob.extend_from_slice(instrument);
        }

        blob
    }
}

/// FM instrument with the given operator levels
pub fn fm_instrument(modulator_level: u8, carrier_level: u8) -> [u8; 11] {
    [
        0x01,
        0x01,
        0x00,
        0x00,
        0x00,
        modulator_level,
        carrier_level,
        0xF0,
        0xF0,
        0x77,
        0x77,
    ]
}

/// Sequencer with the chip initialised, `blob` loaded and the log empty
pub fn loaded_sequencer(blob: Vec<u8>) -> Sequencer<RegisterLog> {
    let sequencer = Sequencer::new(RegisterLog::new());
    sequencer.init_chip();
    sequencer.set_sound_data(blob);
    sequencer.with_sink(|log| log.clear());
    sequencer
}

/// Run `ticks` ticks and return the writes of each one
pub fn run_ticks(sequencer: &Sequencer<RegisterLog>, ticks: usize) -> Vec<Vec<RegisterWrite>> {
    (0..ticks)
        .map(|_| {
            sequencer.tick();
            sequencer.with_sink(|log| log.take())
        })
        .collect()
}

/// Values written to `addr` across a trace
pub fn values_at(trace: &[Vec<RegisterWrite>], addr: u16) -> Vec<u8> {
    trace
        .iter()
        .flatten()
        .filter(|w| w.addr == addr)
        .map(|w| w.value)
        .collect()
}

/// Little-endian relative offset from `from` (the byte after the operand) to `to`
pub fn rel(from: usize, to: usize) -> [u8; 2] {
    ((to as i32 - from as i32) as i16).to_le_bytes()
}
