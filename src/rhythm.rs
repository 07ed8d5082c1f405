//! Percussion (rhythm) mode bookkeeping
//!
//! In rhythm mode the last three voices are split into five drums. Each drum
//! has one operator level register and its own pair of extra levels, kept
//! apart from the melodic channel state.

use bitflags::bitflags;

use crate::sink::RegisterSink;

/// 0xBD bit enabling rhythm mode.
pub const RHYTHM_ENABLE: u8 = 0x20;

bitflags! {
    /// Drum selection as encoded in the 0xBD register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RhythmInstruments: u8 {
        /// Hi-hat (voice 7, modulator)
        const HI_HAT = 0x01;
        /// Top cymbal (voice 8, carrier)
        const CYMBAL = 0x02;
        /// Tom-tom (voice 8, modulator)
        const TOM_TOM = 0x04;
        /// Snare drum (voice 7, carrier)
        const SNARE_DRUM = 0x08;
        /// Bass drum (voice 6, carrier)
        const BASS_DRUM = 0x10;
    }
}

/// Level state of one drum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrumLevel {
    /// Operator level taken from the drum's instrument
    pub base: u8,
    /// First extra level
    pub extra_level1: u8,
    /// Second extra level
    pub extra_level2: u8,
}

const DRUMS: [(RhythmInstruments, u16); 5] = [
    (RhythmInstruments::HI_HAT, 0x51),
    (RhythmInstruments::CYMBAL, 0x55),
    (RhythmInstruments::TOM_TOM, 0x52),
    (RhythmInstruments::SNARE_DRUM, 0x54),
    (RhythmInstruments::BASS_DRUM, 0x53),
];

fn check_level(value: i32) -> u8 {
    value.clamp(0, 0x3F) as u8
}

/// Levels of the five drums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RhythmLevels {
    drums: [DrumLevel; 5],
}

impl RhythmLevels {
    /// Level state of one drum
    ///
    /// `drum` must name exactly one instrument.
    pub fn drum(&self, drum: RhythmInstruments) -> Option<&DrumLevel> {
        DRUMS
            .iter()
            .position(|(flag, _)| *flag == drum)
            .map(|i| &self.drums[i])
    }

    pub(crate) fn set_base(&mut self, drum: RhythmInstruments, level: u8) {
        for (i, (flag, _)) in DRUMS.iter().enumerate() {
            if drum.contains(*flag) {
                self.drums[i].base = level;
            }
        }
    }

    /// Set the second extra level of the selected drums
    pub fn set_level2<S: RegisterSink + ?Sized>(
        &mut self,
        selection: RhythmInstruments,
        value: u8,
        sink: &mut S,
    ) {
        for (i, (flag, register)) in DRUMS.iter().enumerate() {
            if !selection.contains(*flag) {
                continue;
            }
            let drum = &mut self.drums[i];
            drum.extra_level2 = value;
            let level = value as i32
                + drum.base as i32
                + drum.extra_level1 as i32
                + drum.extra_level2 as i32;
            sink.write_register(*register, check_level(level));
        }
    }

    /// Fold `value` into the first extra level of the selected drums
    pub fn change_level1<S: RegisterSink + ?Sized>(
        &mut self,
        selection: RhythmInstruments,
        value: u8,
        sink: &mut S,
    ) {
        for (i, (flag, register)) in DRUMS.iter().enumerate() {
            if !selection.contains(*flag) {
                continue;
            }
            let drum = &mut self.drums[i];
            drum.extra_level1 = check_level(
                value as i32
                    + drum.base as i32
                    + drum.extra_level1 as i32
                    + drum.extra_level2 as i32,
            );
            sink.write_register(*register, drum.extra_level1);
        }
    }

    /// Set the first extra level of the selected drums
    pub fn set_level1<S: RegisterSink + ?Sized>(
        &mut self,
        selection: RhythmInstruments,
        value: u8,
        sink: &mut S,
    ) {
        for (i, (flag, register)) in DRUMS.iter().enumerate() {
            if !selection.contains(*flag) {
                continue;
            }
            let drum = &mut self.drums[i];
            drum.extra_level1 = value;
            let level = value as i32 + drum.base as i32 + drum.extra_level2 as i32;
            sink.write_register(*register, check_level(level));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RegisterLog;

    #[test]
    fn test_set_level2_counts_value_twice() {
        let mut levels = RhythmLevels::default();
        levels.set_base(RhythmInstruments::BASS_DRUM, 0x04);
        let mut log = RegisterLog::new();
        levels.set_level2(RhythmInstruments::BASS_DRUM, 0x03, &mut log);
        assert_eq!(log.writes_to(0x53).collect::<Vec<_>>(), vec![0x0A]);
        assert_eq!(
            levels.drum(RhythmInstruments::BASS_DRUM).unwrap().extra_level2,
            0x03
        );
    }

    #[test]
    fn test_selection_writes_each_drum_once() {
        let mut levels = RhythmLevels::default();
        let mut log = RegisterLog::new();
        levels.set_level1(
            RhythmInstruments::HI_HAT | RhythmInstruments::SNARE_DRUM,
            0x10,
            &mut log,
        );
        let registers: Vec<u16> = log.writes().iter().map(|w| w.addr).collect();
        assert_eq!(registers, vec![0x51, 0x54]);
    }

    #[test]
    fn test_levels_clamp() {
        let mut levels = RhythmLevels::default();
        levels.set_base(RhythmInstruments::all(), 0xF0);
        let mut log = RegisterLog::new();
        levels.change_level1(RhythmInstruments::CYMBAL, 0xFF, &mut log);
        assert_eq!(log.writes_to(0x55).collect::<Vec<_>>(), vec![0x3F]);
        assert_eq!(levels.drum(RhythmInstruments::CYMBAL).unwrap().extra_level1, 0x3F);
    }

    #[test]
    fn test_drum_lookup_requires_single_flag() {
        let levels = RhythmLevels::default();
        assert!(levels.drum(RhythmInstruments::TOM_TOM).is_some());
        assert!(levels
            .drum(RhythmInstruments::TOM_TOM | RhythmInstruments::CYMBAL)
            .is_none());
    }
}
