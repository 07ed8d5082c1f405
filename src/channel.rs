//! Per-channel sequencer state
//!
//! Channels 0-8 map onto the nine melodic OPL voices. Channel 9 is the
//! control channel: it runs bytecode (tempo, rhythm, other channels) but owns
//! no operators and never writes voice registers.

use crate::cursor::{BytecodeCursor, CallStack};
use crate::sound_data::Instrument;

/// Total number of sequencer channels.
pub const NUM_CHANNELS: usize = 10;

/// Index of the control channel.
pub const CONTROL_CHANNEL: usize = 9;

/// Key-on bit of the 0xB0 register.
pub const KEY_ON: u8 = 0x20;

/// Effect run on the frequency registers after each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryEffect {
    /// Disarmed
    #[default]
    None,
    /// Continuous slide with octave carry
    Slide,
    /// Periodic up/down modulation
    Vibrato,
}

/// Effect run on an operator register after the primary effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecondaryEffect {
    /// Disarmed
    #[default]
    None,
    /// Replays a byte table from the sound data into one register
    RegisterSweep,
}

/// Pitch slide parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlideState {
    /// Added to `timer` every tick; an update happens on overflow
    pub tempo: u8,
    /// Accumulator
    pub timer: u8,
    /// Signed F-number delta per update
    pub step: i16,
}

/// Vibrato parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VibratoState {
    /// Added to `timer` every tick; an update happens on overflow
    pub tempo: u8,
    /// Accumulator
    pub timer: u8,
    /// Signed F-number delta per update, derived at key-on
    pub step: i16,
    /// Step size exponent (0-9) relative to the note's F-number
    pub step_range: u8,
    /// Updates left before the direction flips
    pub steps_countdown: u8,
    /// Reload value for `steps_countdown`
    pub num_steps: u8,
    /// Ticks to wait after key-on before modulating
    pub delay: u8,
    /// Remaining delay for the current note
    pub delay_countdown: u8,
}

/// Register sweep parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepState {
    /// Added to `timer` every tick; a write happens on overflow
    pub tempo: u8,
    /// Accumulator
    pub timer: u8,
    /// Last table index
    pub size: i8,
    /// Current table index, counting down
    pub pos: i8,
    /// Register base, the channel's operator offset is added
    pub reg_base: u8,
    /// Blob offset of the table
    pub table: i32,
}

/// Mutable state of one sequencer channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Channel {
    pub(crate) lock: bool,
    pub(crate) program: Option<BytecodeCursor>,
    pub(crate) call_stack: CallStack,
    pub(crate) program_id: Option<u16>,
    pub(crate) priority: i8,
    pub(crate) duration: u8,
    pub(crate) repeat_counter: u8,
    pub(crate) base_octave: i8,
    pub(crate) base_note: i8,
    pub(crate) base_freq: u8,
    pub(crate) raw_note: u8,
    pub(crate) pitch_bend: i8,
    pub(crate) tempo: u8,
    pub(crate) position: u8,
    pub(crate) tempo_reset: bool,
    pub(crate) reg_ax: u8,
    pub(crate) reg_bx: u8,
    pub(crate) primary_effect: PrimaryEffect,
    pub(crate) secondary_effect: SecondaryEffect,
    pub(crate) slide: SlideState,
    pub(crate) vibrato: VibratoState,
    pub(crate) sweep: SweepState,
    pub(crate) instrument: Instrument,
    pub(crate) extra_level1: u8,
    pub(crate) extra_level2: u8,
    pub(crate) extra_level3: u8,
    pub(crate) volume_modifier: u8,
    pub(crate) spacing1: u8,
    pub(crate) spacing2: u8,
    pub(crate) fractional_spacing: u8,
    pub(crate) duration_randomness: u8,
    pub(crate) aux: [u8; 2],
}

impl Channel {
    /// Clear everything a new program must not inherit
    ///
    /// The second extra level is owned by whichever channel last set it and
    /// survives the reset.
    pub(crate) fn reset(&mut self, note_spacing: u8) {
        *self = Channel {
            extra_level2: self.extra_level2,
            tempo: 0xFF,
            spacing1: note_spacing,
            ..Default::default()
        };
    }

    /// A program is bound to the channel
    pub fn is_playing(&self) -> bool {
        self.program.is_some()
    }

    /// Current arbitration priority
    pub fn priority(&self) -> i8 {
        self.priority
    }

    /// Id of the program last started on this channel
    pub fn program_id(&self) -> Option<u16> {
        self.program_id
    }

    /// Offset of the next instruction, if playing
    pub fn program_position(&self) -> Option<usize> {
        self.program.map(|c| c.position())
    }

    /// Saved subroutine return positions
    pub fn call_depth(&self) -> usize {
        self.call_stack.depth()
    }

    /// Wrapped ticks left before the next instruction fetch
    pub fn duration(&self) -> u8 {
        self.duration
    }

    /// Channel tempo
    pub fn tempo(&self) -> u8 {
        self.tempo
    }

    /// Last values written to the 0xA0 and 0xB0 registers
    pub fn frequency_registers(&self) -> (u8, u8) {
        (self.reg_ax, self.reg_bx)
    }

    /// 10-bit F-number
    pub fn frequency(&self) -> u16 {
        (((self.reg_bx as u16) << 8) | self.reg_ax as u16) & 0x3FF
    }

    /// Octave (block) 0-7
    pub fn block(&self) -> u8 {
        (self.reg_bx >> 2) & 0x07
    }

    /// Key-on bit state
    pub fn is_key_on(&self) -> bool {
        self.reg_bx & KEY_ON != 0
    }

    /// Instrument snapshot
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Volume modifier applied to the total level
    pub fn volume_modifier(&self) -> u8 {
        self.volume_modifier
    }

    /// Armed primary effect
    pub fn primary_effect(&self) -> PrimaryEffect {
        self.primary_effect
    }

    /// Armed secondary effect
    pub fn secondary_effect(&self) -> SecondaryEffect {
        self.secondary_effect
    }

    /// Both operators sound directly, so both levels follow the volume
    pub fn is_additive(&self) -> bool {
        self.instrument.is_additive()
    }

    fn volume_term(&self) -> u16 {
        let mut level3 = (self.extra_level3 ^ 0x3F) as u16 * self.volume_modifier as u16;
        if level3 != 0 {
            level3 = (level3 + 0x3F) >> 8;
        }
        level3 ^ 0x3F
    }

    fn total_level(&self, op_level: u8, with_extras: bool) -> u8 {
        let mut value = (op_level & 0x3F) as u16;
        if with_extras {
            value += self.extra_level1 as u16 + self.extra_level2 as u16 + self.volume_term();
        }

        let mut level = value.min(0x3F) as u8;
        if self.volume_modifier == 0 {
            level = 0x3F;
        }

        // Keep the key scale bits.
        level | (op_level & 0xC0)
    }

    /// Value for the modulator's 0x40 register
    ///
    /// Extra levels only attenuate the modulator when it sounds directly.
    pub fn modulator_level(&self) -> u8 {
        self.total_level(self.instrument.modulator_level, self.is_additive())
    }

    /// Value for the carrier's 0x43 register
    pub fn carrier_level(&self) -> u8 {
        self.total_level(self.instrument.carrier_level, true)
    }
}
