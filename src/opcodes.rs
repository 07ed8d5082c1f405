//! Opcode table and handlers
//!
//! Opcode byte `0x80 | index` selects a slot of [`OPCODE_TABLE`]. Several
//! slots were never assigned and stop the channel, like the final slot that
//! every out-of-range index clamps to.

use log::{debug, warn};

use crate::channel::{PrimaryEffect, SecondaryEffect, CONTROL_CHANNEL, NUM_CHANNELS};
use crate::config::ABSOLUTE_ADDRESS_BASE;
use crate::cursor::BytecodeCursor;
use crate::driver::Driver;
use crate::rhythm::{RhythmInstruments, RHYTHM_ENABLE};
use crate::sink::RegisterSink;
use crate::sound_data::SoundDataError;
use crate::tables::{reg_offset, LEVEL_TABLES};

/// What the dispatch loop does after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Fetch the next instruction
    Continue,
    /// Stop fetching for this tick and run the channel's effects
    Yield,
    /// Stop fetching for this tick without running effects
    Suspend,
    /// Unbind the program
    Halt,
}

impl Flow {
    fn wait_if(waits: bool) -> Self {
        if waits {
            Flow::Yield
        } else {
            Flow::Continue
        }
    }
}

/// Opcode semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Load the loop counter
    SetRepeat,
    /// Count down the loop counter and branch back while nonzero
    CheckRepeat,
    /// Bind another program to its channel without running it
    SetupProgram,
    /// Set the early key-off distance
    SetNoteSpacing,
    /// Unconditional jump
    Jump,
    /// Push the return position and jump
    JumpToSubroutine,
    /// Pop the return position
    ReturnFromSubroutine,
    /// Set the signed octave offset
    SetBaseOctave,
    /// Key off and unbind the program
    StopChannel,
    /// Key off and wait
    PlayRest,
    /// Write a raw register
    WriteRegister,
    /// Retune, keep the key state, and wait
    SetupNoteAndDuration,
    /// Set the signed note offset
    SetBaseNote,
    /// Arm the register sweep
    SetupRegisterSweep,
    /// Unbind another channel's program
    StopOtherChannel,
    /// Block until another program finishes
    WaitForEndOfProgram,
    /// Load an instrument into the channel's voice
    SetupInstrument,
    /// Arm the pitch slide
    SetupSlide,
    /// Disarm the pitch slide
    RemoveSlide,
    /// Set the F-number offset
    SetBaseFreq,
    /// Arm the vibrato
    SetupVibrato,
    /// Set the channel priority
    SetPriority,
    /// Restart the beat clock
    SetBeat,
    /// Block until the selected beat bits change
    WaitForNextBeat,
    /// Set the first extra attenuation
    SetExtraLevel1,
    /// Wait without touching the key state
    SetupDuration,
    /// Key on and wait
    PlayNote,
    /// Set the proportional early key-off
    SetFractionalNoteSpacing,
    /// Set the global tempo
    SetTempo,
    /// Disarm the register sweep
    RemoveRegisterSweep,
    /// Set the channel tempo
    SetChannelTempo,
    /// Set the volume scaling level
    SetExtraLevel3,
    /// Set another channel's second extra attenuation
    SetExtraLevel2,
    /// Adjust another channel's second extra attenuation
    ChangeExtraLevel2,
    /// Toggle deep tremolo
    SetAmDepth,
    /// Toggle deep hardware vibrato
    SetVibratoDepth,
    /// Adjust the first extra attenuation
    ChangeExtraLevel1,
    /// Unbind and silence a channel
    ClearChannel,
    /// Detune the current note by a random amount
    ChangeNoteRandomly,
    /// Disarm the vibrato
    RemoveVibrato,
    /// Set the pitch bend and retune
    PitchBend,
    /// Copy the global tempo into the channel
    ResetToGlobalTempo,
    /// No operation
    Nop,
    /// Set the random duration mask
    SetDurationRandomness,
    /// Adjust the channel tempo
    ChangeChannelTempo,
    /// Select a pair of level tables
    SelectLevelTables,
    /// Load the drum instruments and enable rhythm mode
    SetupRhythmSection,
    /// Strike drums
    PlayRhythmSection,
    /// Disable rhythm mode
    RemoveRhythmSection,
    /// Set the second extra level of drums
    SetRhythmLevel2,
    /// Adjust the first extra level of drums
    ChangeRhythmLevel1,
    /// Set the first extra level of drums
    SetRhythmLevel1,
    /// Set the host-visible trigger byte
    SetSoundTrigger,
    /// Follow the global tempo on every tick
    SetTempoReset,
    /// Store two opaque bytes
    SetAuxBytes,
}

/// One dispatch table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Handler
    pub opcode: Opcode,
    /// Mnemonic used in traces
    pub name: &'static str,
    /// Operand bytes, including the one read with the opcode
    pub operands: usize,
}

const fn op(opcode: Opcode, name: &'static str, operands: usize) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        name,
        operands,
    }
}

const STOP: OpcodeInfo = op(Opcode::StopChannel, "stopChannel", 0);

/// Dispatch table, indexed by `opcode & 0x7F`
pub static OPCODE_TABLE: [OpcodeInfo; 75] = [
    // 0x00
    op(Opcode::SetRepeat, "setRepeat", 1),
    op(Opcode::CheckRepeat, "checkRepeat", 2),
    op(Opcode::SetupProgram, "setupProgram", 1),
    op(Opcode::SetNoteSpacing, "setNoteSpacing", 1),
    op(Opcode::Jump, "jump", 2),
    op(Opcode::JumpToSubroutine, "jumpToSubroutine", 2),
    op(Opcode::ReturnFromSubroutine, "returnFromSubroutine", 0),
    op(Opcode::SetBaseOctave, "setBaseOctave", 1),
    // 0x08
    STOP,
    op(Opcode::PlayRest, "playRest", 1),
    op(Opcode::WriteRegister, "writeRegister", 2),
    op(Opcode::SetupNoteAndDuration, "setupNoteAndDuration", 2),
    op(Opcode::SetBaseNote, "setBaseNote", 1),
    op(Opcode::SetupRegisterSweep, "setupRegisterSweep", 5),
    op(Opcode::StopOtherChannel, "stopOtherChannel", 1),
    op(Opcode::WaitForEndOfProgram, "waitForEndOfProgram", 1),
    // 0x10
    op(Opcode::SetupInstrument, "setupInstrument", 1),
    op(Opcode::SetupSlide, "setupSlide", 3),
    op(Opcode::RemoveSlide, "removeSlide", 0),
    op(Opcode::SetBaseFreq, "setBaseFreq", 1),
    STOP,
    op(Opcode::SetupVibrato, "setupVibrato", 4),
    STOP,
    STOP,
    // 0x18
    STOP,
    STOP,
    op(Opcode::SetPriority, "setPriority", 1),
    STOP,
    op(Opcode::SetBeat, "setBeat", 1),
    op(Opcode::WaitForNextBeat, "waitForNextBeat", 1),
    op(Opcode::SetExtraLevel1, "setExtraLevel1", 1),
    STOP,
    // 0x20
    op(Opcode::SetupDuration, "setupDuration", 1),
    op(Opcode::PlayNote, "playNote", 1),
    STOP,
    STOP,
    op(Opcode::SetFractionalNoteSpacing, "setFractionalNoteSpacing", 1),
    STOP,
    op(Opcode::SetTempo, "setTempo", 1),
    op(Opcode::RemoveRegisterSweep, "removeRegisterSweep", 0),
    // 0x28
    STOP,
    op(Opcode::SetChannelTempo, "setChannelTempo", 1),
    STOP,
    op(Opcode::SetExtraLevel3, "setExtraLevel3", 1),
    op(Opcode::SetExtraLevel2, "setExtraLevel2", 2),
    op(Opcode::ChangeExtraLevel2, "changeExtraLevel2", 2),
    op(Opcode::SetAmDepth, "setAMDepth", 1),
    op(Opcode::SetVibratoDepth, "setVibratoDepth", 1),
    // 0x30
    op(Opcode::ChangeExtraLevel1, "changeExtraLevel1", 1),
    STOP,
    STOP,
    op(Opcode::ClearChannel, "clearChannel", 1),
    STOP,
    op(Opcode::ChangeNoteRandomly, "changeNoteRandomly", 2),
    op(Opcode::RemoveVibrato, "removeVibrato", 0),
    STOP,
    // 0x38
    STOP,
    op(Opcode::PitchBend, "pitchBend", 1),
    op(Opcode::ResetToGlobalTempo, "resetToGlobalTempo", 0),
    op(Opcode::Nop, "nop", 0),
    op(Opcode::SetDurationRandomness, "setDurationRandomness", 1),
    op(Opcode::ChangeChannelTempo, "changeChannelTempo", 1),
    STOP,
    op(Opcode::SelectLevelTables, "selectLevelTables", 2),
    // 0x40
    op(Opcode::Nop, "nop", 0),
    op(Opcode::SetupRhythmSection, "setupRhythmSection", 9),
    op(Opcode::PlayRhythmSection, "playRhythmSection", 1),
    op(Opcode::RemoveRhythmSection, "removeRhythmSection", 0),
    op(Opcode::SetRhythmLevel2, "setRhythmLevel2", 2),
    op(Opcode::ChangeRhythmLevel1, "changeRhythmLevel1", 2),
    op(Opcode::SetRhythmLevel1, "setRhythmLevel1", 2),
    op(Opcode::SetSoundTrigger, "setSoundTrigger", 1),
    // 0x48
    op(Opcode::SetTempoReset, "setTempoReset", 1),
    op(Opcode::SetAuxBytes, "setAuxBytes", 2),
    STOP,
];

fn add_signed(value: u8, delta: u8) -> u8 {
    (value as i16 + delta as i8 as i16).clamp(0, 0xFF) as u8
}

impl<S: RegisterSink> Driver<S> {
    /// Execute one opcode for channel `chan`
    ///
    /// `cursor` sits just past the first operand. Handlers for operand-less
    /// opcodes step back over it.
    pub(crate) fn execute_opcode(
        &mut self,
        opcode: Opcode,
        cursor: &mut BytecodeCursor,
        chan: usize,
        param: u8,
    ) -> Flow {
        match opcode {
            Opcode::SetRepeat => {
                self.channels[chan].repeat_counter = param;
                Flow::Continue
            }
            Opcode::CheckRepeat => self.op_check_repeat(cursor, chan, param),
            Opcode::SetupProgram => self.op_setup_program(param),
            Opcode::SetNoteSpacing => {
                self.channels[chan].spacing1 = param;
                Flow::Continue
            }
            Opcode::Jump => self.op_jump(cursor, chan),
            Opcode::JumpToSubroutine => self.op_jump_to_subroutine(cursor, chan),
            Opcode::ReturnFromSubroutine => self.op_return(cursor, chan),
            Opcode::SetBaseOctave => {
                self.channels[chan].base_octave = param as i8;
                Flow::Continue
            }
            Opcode::StopChannel => self.op_stop_channel(chan),
            Opcode::PlayRest => {
                self.setup_duration(chan, param);
                self.note_off(chan);
                Flow::wait_if(param != 0)
            }
            Opcode::WriteRegister => {
                let value = cursor.next_u8(self.bytes());
                self.write(param as u16, value);
                Flow::Continue
            }
            Opcode::SetupNoteAndDuration => {
                self.setup_note(chan, param, false);
                let duration = cursor.next_u8(self.bytes());
                self.setup_duration(chan, duration);
                Flow::wait_if(duration != 0)
            }
            Opcode::SetBaseNote => {
                self.channels[chan].base_note = param as i8;
                Flow::Continue
            }
            Opcode::SetupRegisterSweep => self.op_setup_register_sweep(cursor, chan, param),
            Opcode::StopOtherChannel => self.op_stop_other_channel(param),
            Opcode::WaitForEndOfProgram => self.op_wait_for_end_of_program(cursor, chan, param),
            Opcode::SetupInstrument => {
                match self.instrument(param) {
                    Ok(instrument) => self.setup_instrument(chan, instrument, chan),
                    Err(err) => debug!("channel {}: {}", chan, err),
                }
                Flow::Continue
            }
            Opcode::SetupSlide => {
                let step = cursor.next_be_u16(self.bytes()) as i16;
                let channel = &mut self.channels[chan];
                channel.slide.tempo = param;
                channel.slide.step = step;
                channel.slide.timer = 0xFF;
                channel.primary_effect = PrimaryEffect::Slide;
                Flow::Continue
            }
            Opcode::RemoveSlide => {
                cursor.rewind(1);
                let channel = &mut self.channels[chan];
                channel.primary_effect = PrimaryEffect::None;
                channel.slide.step = 0;
                Flow::Continue
            }
            Opcode::SetBaseFreq => {
                self.channels[chan].base_freq = param;
                Flow::Continue
            }
            Opcode::SetupVibrato => {
                let data = self.bytes();
                let step_range = cursor.next_u8(data);
                let steps = cursor.next_u8(data);
                let delay = cursor.next_u8(data);
                let channel = &mut self.channels[chan];
                channel.vibrato.tempo = param;
                channel.vibrato.step_range = step_range;
                channel.vibrato.steps_countdown = steps.wrapping_add(1);
                channel.vibrato.num_steps = steps << 1;
                channel.vibrato.delay = delay;
                channel.primary_effect = PrimaryEffect::Vibrato;
                Flow::Continue
            }
            Opcode::SetPriority => {
                self.channels[chan].priority = param as i8;
                Flow::Continue
            }
            Opcode::SetBeat => {
                let value = param >> 1;
                self.beat.divider = value;
                self.beat.countdown = value;
                self.beat.counter = 0;
                self.beat.waiting = 0;
                self.callback_timer = 0xFF;
                Flow::Continue
            }
            Opcode::WaitForNextBeat => self.op_wait_for_next_beat(cursor, chan, param),
            Opcode::SetExtraLevel1 => {
                self.channels[chan].extra_level1 = param;
                self.adjust_volume(chan);
                Flow::Continue
            }
            Opcode::SetupDuration => {
                self.setup_duration(chan, param);
                Flow::wait_if(param != 0)
            }
            Opcode::PlayNote => {
                self.setup_duration(chan, param);
                self.note_on(chan);
                Flow::wait_if(param != 0)
            }
            Opcode::SetFractionalNoteSpacing => {
                self.channels[chan].fractional_spacing = param & 7;
                Flow::Continue
            }
            Opcode::SetTempo => {
                self.tempo = param;
                Flow::Continue
            }
            Opcode::RemoveRegisterSweep => {
                cursor.rewind(1);
                self.channels[chan].secondary_effect = SecondaryEffect::None;
                Flow::Continue
            }
            Opcode::SetChannelTempo => {
                self.channels[chan].tempo = param;
                Flow::Continue
            }
            Opcode::SetExtraLevel3 => {
                self.channels[chan].extra_level3 = param;
                Flow::Continue
            }
            Opcode::SetExtraLevel2 | Opcode::ChangeExtraLevel2 => {
                let value = cursor.next_u8(self.bytes());
                let target = param as usize;
                if target >= NUM_CHANNELS {
                    warn!("channel {}: extra level for invalid channel {}", chan, target);
                    return Flow::Continue;
                }
                let channel = &mut self.channels[target];
                channel.extra_level2 = if opcode == Opcode::SetExtraLevel2 {
                    value
                } else {
                    add_signed(channel.extra_level2, value)
                };
                self.adjust_volume(target);
                Flow::Continue
            }
            Opcode::SetAmDepth => {
                self.toggle_depth_bit(0x80, param);
                Flow::Continue
            }
            Opcode::SetVibratoDepth => {
                self.toggle_depth_bit(0x40, param);
                Flow::Continue
            }
            Opcode::ChangeExtraLevel1 => {
                let channel = &mut self.channels[chan];
                channel.extra_level1 = add_signed(channel.extra_level1, param);
                self.adjust_volume(chan);
                Flow::Continue
            }
            Opcode::ClearChannel => self.op_clear_channel(chan, param),
            Opcode::ChangeNoteRandomly => self.op_change_note_randomly(cursor, chan, param),
            Opcode::RemoveVibrato => {
                cursor.rewind(1);
                self.channels[chan].primary_effect = PrimaryEffect::None;
                Flow::Continue
            }
            Opcode::PitchBend => {
                self.channels[chan].pitch_bend = param as i8;
                let raw = self.channels[chan].raw_note;
                self.setup_note(chan, raw, true);
                Flow::Continue
            }
            Opcode::ResetToGlobalTempo => {
                cursor.rewind(1);
                self.channels[chan].tempo = self.tempo;
                Flow::Continue
            }
            Opcode::Nop => {
                cursor.rewind(1);
                Flow::Continue
            }
            Opcode::SetDurationRandomness => {
                self.channels[chan].duration_randomness = param;
                Flow::Continue
            }
            Opcode::ChangeChannelTempo => {
                let channel = &mut self.channels[chan];
                channel.tempo = (channel.tempo as i16 + param as i8 as i16).clamp(1, 0xFF) as u8;
                Flow::Continue
            }
            Opcode::SelectLevelTables => {
                let entry = cursor.next_u8(self.bytes()) as usize;
                if entry + 2 > LEVEL_TABLES.len() {
                    debug!("channel {}: invalid level table pair {}", chan, entry);
                    return Flow::Continue;
                }
                // The pair is never read back; only the priming write reaches the chip.
                if param == 2 {
                    self.write(0xA0, LEVEL_TABLES[entry + 1][0]);
                }
                Flow::Continue
            }
            Opcode::SetupRhythmSection => self.op_setup_rhythm_section(cursor, chan, param),
            Opcode::PlayRhythmSection => {
                let keyed = (self.rhythm_bits & !(param & 0x1F)) | RHYTHM_ENABLE;
                self.write(0xBD, keyed);
                self.rhythm_bits |= param;
                let bits = self.vibrato_am_bits | RHYTHM_ENABLE | self.rhythm_bits;
                self.write(0xBD, bits);
                Flow::Continue
            }
            Opcode::RemoveRhythmSection => {
                cursor.rewind(1);
                self.rhythm_bits = 0;
                let bits = self.vibrato_am_bits;
                self.write(0xBD, bits);
                Flow::Continue
            }
            Opcode::SetRhythmLevel2 | Opcode::ChangeRhythmLevel1 | Opcode::SetRhythmLevel1 => {
                let value = cursor.next_u8(self.bytes());
                let selection = RhythmInstruments::from_bits_truncate(param);
                let (levels, sink) = (&mut self.rhythm_levels, &mut self.sink);
                match opcode {
                    Opcode::SetRhythmLevel2 => levels.set_level2(selection, value, sink),
                    Opcode::ChangeRhythmLevel1 => levels.change_level1(selection, value, sink),
                    _ => levels.set_level1(selection, value, sink),
                }
                Flow::Continue
            }
            Opcode::SetSoundTrigger => {
                self.sound_trigger = param;
                Flow::Continue
            }
            Opcode::SetTempoReset => {
                self.channels[chan].tempo_reset = param != 0;
                Flow::Continue
            }
            Opcode::SetAuxBytes => {
                let second = cursor.next_u8(self.bytes());
                self.channels[chan].aux = [param, second];
                Flow::Continue
            }
        }
    }

    fn instrument(&self, id: u8) -> Result<crate::sound_data::Instrument, SoundDataError> {
        match self.data.as_ref() {
            Some(data) => data.instrument(self.config.version, id),
            None => Err(SoundDataError::InvalidInstrument(id)),
        }
    }

    fn toggle_depth_bit(&mut self, bit: u8, param: u8) {
        if param & 1 != 0 {
            self.vibrato_am_bits |= bit;
        } else {
            self.vibrato_am_bits &= !bit;
        }
        let value = self.vibrato_am_bits | self.rhythm_bits;
        self.write(0xBD, value);
    }

    fn op_check_repeat(&mut self, cursor: &mut BytecodeCursor, chan: usize, param: u8) -> Flow {
        let hi = cursor.next_u8(self.bytes());
        let len = self.bytes().len();
        let channel = &mut self.channels[chan];
        channel.repeat_counter = channel.repeat_counter.wrapping_sub(1);
        if channel.repeat_counter != 0 {
            let offset = i16::from_le_bytes([param, hi]);
            if !cursor.jump_relative(offset, len) {
                warn!("channel {}: ignoring invalid loop offset {}", chan, offset);
            }
        }
        Flow::Continue
    }

    fn op_setup_program(&mut self, param: u8) -> Flow {
        if param == 0xFF {
            return Flow::Continue;
        }
        let Some(data) = self.data.as_ref() else {
            return Flow::Continue;
        };
        let header = match data.program(param as u16) {
            Ok(header) => header,
            Err(err @ SoundDataError::InvalidChannel(_)) => {
                warn!("Program {}: {}", param, err);
                return Flow::Continue;
            }
            Err(err) => {
                debug!("Ignoring setup of program {}: {}", param, err);
                return Flow::Continue;
            }
        };
        if header.priority >= self.channels[header.channel].priority {
            self.bind_program(header);
        }
        Flow::Continue
    }

    fn op_jump(&mut self, cursor: &mut BytecodeCursor, chan: usize) -> Flow {
        cursor.rewind(1);
        let data = self.bytes();
        let len = data.len();
        let offset = cursor.next_le_u16(data);
        let landed = if self.config.version.absolute_jumps() {
            cursor.jump_absolute(offset, ABSOLUTE_ADDRESS_BASE, len)
        } else {
            cursor.jump_relative(offset as i16, len)
        };
        if !landed {
            warn!("channel {}: invalid jump offset {:#06x}, stopping", chan, offset);
            return self.op_stop_channel(chan);
        }
        if self.sync_jump_mask & (1 << chan) != 0 {
            self.channels[chan].lock = true;
        }
        Flow::Continue
    }

    fn op_jump_to_subroutine(&mut self, cursor: &mut BytecodeCursor, chan: usize) -> Flow {
        cursor.rewind(1);
        let data = self.bytes();
        let len = data.len();
        let offset = cursor.next_le_u16(data);
        if self.channels[chan].call_stack.is_full() {
            warn!("channel {}: subroutine stack full, call ignored", chan);
            return Flow::Continue;
        }
        let return_to = *cursor;
        let landed = if self.config.version.absolute_calls() {
            cursor.jump_absolute(offset, ABSOLUTE_ADDRESS_BASE, len)
        } else {
            cursor.jump_relative(offset as i16, len)
        };
        if landed {
            self.channels[chan].call_stack.push(return_to);
        } else {
            warn!("channel {}: invalid subroutine offset {:#06x}", chan, offset);
        }
        Flow::Continue
    }

    fn op_return(&mut self, cursor: &mut BytecodeCursor, chan: usize) -> Flow {
        cursor.rewind(1);
        match self.channels[chan].call_stack.pop() {
            Some(return_to) => {
                *cursor = return_to;
                Flow::Continue
            }
            None => {
                warn!("channel {}: return without call, stopping", chan);
                self.op_stop_channel(chan)
            }
        }
    }

    fn op_stop_channel(&mut self, chan: usize) -> Flow {
        self.channels[chan].priority = 0;
        if chan != CONTROL_CHANNEL {
            self.note_off(chan);
        }
        Flow::Halt
    }

    fn op_setup_register_sweep(&mut self, cursor: &mut BytecodeCursor, chan: usize, param: u8) -> Flow {
        let data = self.bytes();
        let len = data.len() as i32;
        let size = cursor.next_u8(data) as i8;
        let reg_base = cursor.next_u8(data);
        let table = cursor.next_le_u16(data) as i32 - ABSOLUTE_ADDRESS_BASE;

        let channel = &mut self.channels[chan];
        channel.sweep.tempo = param;
        channel.sweep.timer = param;
        channel.sweep.size = size;
        channel.sweep.pos = size;
        channel.sweep.reg_base = reg_base;
        channel.sweep.table = table;

        let start = table + size as i32;
        if (0..len).contains(&start) {
            channel.secondary_effect = SecondaryEffect::RegisterSweep;
        } else {
            warn!("channel {}: register sweep table {} outside sound data", chan, start);
            channel.secondary_effect = SecondaryEffect::None;
        }
        Flow::Continue
    }

    fn op_stop_other_channel(&mut self, param: u8) -> Flow {
        let target = param as usize;
        if target >= NUM_CHANNELS {
            warn!("Ignoring stop of invalid channel {}", target);
            return Flow::Continue;
        }
        let channel = &mut self.channels[target];
        channel.duration = 0;
        channel.priority = 0;
        channel.program = None;
        Flow::Continue
    }

    fn op_wait_for_end_of_program(&mut self, cursor: &mut BytecodeCursor, chan: usize, param: u8) -> Flow {
        let Some(data) = self.data.as_ref() else {
            return Flow::Continue;
        };
        let target = match data.program_offset(param as u16).and_then(|offset| data.byte(offset)) {
            Ok(chan) => chan as usize,
            Err(err) => {
                debug!("Not waiting for program {}: {}", param, err);
                return Flow::Continue;
            }
        };
        if target >= NUM_CHANNELS || !self.channels[target].is_playing() {
            return Flow::Continue;
        }
        // Poll again on the next tick.
        cursor.rewind(2);
        self.channels[chan].duration = 1;
        Flow::Suspend
    }

    fn op_wait_for_next_beat(&mut self, cursor: &mut BytecodeCursor, chan: usize, param: u8) -> Flow {
        let on_beat = self.beat.counter & param != 0;
        if on_beat && self.beat.waiting != 0 {
            self.beat.waiting = 0;
            return Flow::Continue;
        }
        if !on_beat {
            self.beat.waiting = self.beat.waiting.wrapping_add(1);
        }
        cursor.rewind(2);
        self.channels[chan].duration = 1;
        Flow::Suspend
    }

    fn op_clear_channel(&mut self, chan: usize, param: u8) -> Flow {
        let target = param as usize;
        if target >= NUM_CHANNELS {
            warn!("channel {}: ignoring clear of invalid channel {}", chan, target);
            return Flow::Continue;
        }
        let channel = &mut self.channels[target];
        channel.duration = 0;
        channel.priority = 0;
        channel.program = None;
        channel.extra_level2 = 0;

        if target != CONTROL_CHANNEL {
            let off = reg_offset(target) as u16;
            self.write(0xC0 + target as u16, 0x00);
            self.write(0x43 + off, 0x3F);
            self.write(0x83 + off, 0xFF);
            self.write(0xB0 + target as u16, 0x00);
        }
        Flow::Continue
    }

    fn op_change_note_randomly(&mut self, cursor: &mut BytecodeCursor, chan: usize, param: u8) -> Flow {
        if chan >= CONTROL_CHANNEL {
            return Flow::Continue;
        }
        let lo = cursor.next_u8(self.bytes());
        let mask = u16::from_be_bytes([param, lo]);
        let rnd = self.random();
        let channel = &self.channels[chan];
        let key = (channel.reg_bx & 0x20) as u32;

        let note = (((channel.reg_bx & 0x1F) as u32) << 8) | channel.reg_ax as u32;
        let note = (note + (mask & rnd) as u32).min(0x1FFF) | (key << 8);

        self.write(0xA0 + chan as u16, (note & 0xFF) as u8);
        self.write(0xB0 + chan as u16, (note >> 8) as u8);
        Flow::Continue
    }

    fn op_setup_rhythm_section(&mut self, cursor: &mut BytecodeCursor, chan: usize, param: u8) -> Flow {
        let data = self.bytes();
        let ids = [param, cursor.next_u8(data), cursor.next_u8(data)];

        for (voice, id) in (6..CONTROL_CHANNEL).zip(ids) {
            match self.instrument(id) {
                Ok(instrument) => self.setup_instrument(voice, instrument, chan),
                Err(err) => debug!("Rhythm voice {}: {}", voice, err),
            }
            let instrument = self.channels[chan].instrument;
            let levels = &mut self.rhythm_levels;
            match voice {
                6 => levels.set_base(RhythmInstruments::BASS_DRUM, instrument.carrier_level),
                7 => {
                    levels.set_base(RhythmInstruments::HI_HAT, instrument.modulator_level);
                    levels.set_base(RhythmInstruments::SNARE_DRUM, instrument.carrier_level);
                }
                _ => {
                    levels.set_base(RhythmInstruments::TOM_TOM, instrument.modulator_level);
                    levels.set_base(RhythmInstruments::CYMBAL, instrument.carrier_level);
                }
            }
        }

        for voice in 6..CONTROL_CHANNEL {
            let data = self.bytes();
            let bx = cursor.next_u8(data) & 0x2F;
            let ax = cursor.next_u8(data);
            self.channels[voice].reg_bx = bx;
            self.write(0xB0 + voice as u16, bx);
            self.write(0xA0 + voice as u16, ax);
        }

        self.rhythm_bits = RHYTHM_ENABLE;
        Flow::Continue
    }
}
