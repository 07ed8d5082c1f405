//! Sequencer core
//!
//! [`Driver`] owns the sound data, the ten channels and the register sink.
//! It is single threaded; [`Sequencer`](crate::Sequencer) wraps it behind a
//! lock for hosts that call in from another thread.
//!
//! One [`tick`](Driver::tick):
//!
//! 1. Drain the start queue. Each accepted program runs its first dispatch
//!    pass right away.
//! 2. Run every other bound channel, 9 down to 0: advance its position by its
//!    tempo, and on wrap count down the note duration and fetch instructions
//!    once it runs out.
//! 3. Run the armed effects of channels that did not suspend.
//! 4. Advance the beat clock.

use log::{debug, trace, warn};

use crate::channel::{Channel, PrimaryEffect, SecondaryEffect, CONTROL_CHANNEL, KEY_ON, NUM_CHANNELS};
use crate::config::SequencerConfig;
use crate::cursor::Command;
use crate::opcodes::{Flow, OPCODE_TABLE};
use crate::queue::{ProgramQueue, StartRequest};
use crate::rhythm::RhythmLevels;
use crate::sequencer::MasterFlags;
use crate::sink::RegisterSink;
use crate::sound_data::{Instrument, ProgramHeader, SoundData};
use crate::tables::{reg_offset, FREQ_TABLE, PITCH_BEND_TABLES};

/// Instructions one channel may execute per tick before it is forced to
/// yield.
pub const MAX_DISPATCH_STEPS: usize = 1024;

const RANDOM_SEED: u16 = 0x1234;

/// Program header bytes saved before a sound effect start scaled them
#[derive(Debug, Clone, Copy)]
struct SfxPatch {
    offset: usize,
    priority: u8,
    velocity: u8,
}

/// Global beat counter driven by the global tempo
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BeatClock {
    pub(crate) divider: u8,
    pub(crate) countdown: u8,
    pub(crate) counter: u8,
    pub(crate) waiting: u8,
}

/// Single-threaded sequencer state
pub struct Driver<S> {
    pub(crate) sink: S,
    pub(crate) config: SequencerConfig,
    pub(crate) data: Option<SoundData>,
    pub(crate) channels: [Channel; NUM_CHANNELS],
    queue: ProgramQueue,
    sfx_patch: Option<SfxPatch>,
    pub(crate) master_flags: MasterFlags,
    pub(crate) rnd: u16,
    pub(crate) tempo: u8,
    pub(crate) callback_timer: u8,
    pub(crate) beat: BeatClock,
    pub(crate) vibrato_am_bits: u8,
    pub(crate) rhythm_bits: u8,
    pub(crate) rhythm_levels: RhythmLevels,
    pub(crate) sync_jump_mask: u16,
    pub(crate) sound_trigger: u8,
    pub(crate) music_volume: u8,
    pub(crate) sfx_volume: u8,
    preempted: usize,
    serviced: u16,
}

impl<S: RegisterSink> Driver<S> {
    /// Idle driver without sound data
    ///
    /// No register is written until [`init_chip`](Self::init_chip).
    pub fn new(sink: S, config: SequencerConfig) -> Self {
        let mut channels: [Channel; NUM_CHANNELS] = Default::default();
        for channel in channels.iter_mut() {
            channel.reset(config.default_note_spacing);
        }
        Self {
            sink,
            config,
            data: None,
            channels,
            queue: ProgramQueue::new(),
            sfx_patch: None,
            master_flags: MasterFlags::default(),
            rnd: RANDOM_SEED,
            tempo: 0,
            callback_timer: 0xFF,
            beat: BeatClock::default(),
            vibrato_am_bits: 0,
            rhythm_bits: 0,
            rhythm_levels: RhythmLevels::default(),
            sync_jump_mask: 0,
            sound_trigger: 0,
            music_volume: config.music_volume,
            sfx_volume: config.sfx_volume,
            preempted: 0,
            serviced: 0,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.data.as_ref().map_or(&[], |d| d.as_bytes())
    }

    pub(crate) fn write(&mut self, addr: u16, value: u8) {
        self.sink.write_register(addr, value);
    }

    /// Start requests refused because of priority
    pub fn preempted_requests(&self) -> usize {
        self.preempted
    }

    /// Number of queued start requests
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// Put the chip and every channel into the idle state
    pub fn init_chip(&mut self) {
        debug!("Initializing OPL chip");
        self.rnd = RANDOM_SEED;

        // Waveform select enable, timers off, rhythm and depth bits off.
        self.write(0x01, 0x20);
        self.write(0x08, 0x00);
        self.write(0xBD, 0x00);
        self.vibrato_am_bits = 0;
        self.rhythm_bits = 0;

        self.reset_channel(CONTROL_CHANNEL);
        for chan in (0..CONTROL_CHANNEL).rev() {
            let off = reg_offset(chan) as u16;
            self.write(0x40 + off, 0x3F);
            self.write(0x43 + off, 0x3F);
            self.reset_channel(chan);
        }
    }

    pub(crate) fn reset_channel(&mut self, chan: usize) {
        self.channels[chan].reset(self.config.default_note_spacing);
    }

    /// Replace the sound data
    ///
    /// Stops every channel and drops queued requests first, so no cursor
    /// outlives the blob it points into.
    pub fn set_sound_data(&mut self, data: Option<SoundData>) {
        self.stop_all();
        self.sfx_patch = None;
        self.data = data;
    }

    /// Unbind every channel and drop queued requests
    pub fn stop_all(&mut self) {
        for chan in 0..NUM_CHANNELS {
            let channel = &mut self.channels[chan];
            channel.priority = 0;
            channel.program = None;
            if chan != CONTROL_CHANNEL {
                self.note_off(chan);
            }
        }
        self.queue.clear();
    }

    /// Queue a program start
    ///
    /// Returns false when no sound data is loaded, the id has no program or
    /// the queue is full.
    pub fn queue_program(&mut self, id: u16, volume: u8) -> bool {
        let Some(data) = self.data.as_ref() else {
            debug!("Ignoring start of program {}: no sound data", id);
            return false;
        };
        if let Err(err) = data.program_offset(id) {
            debug!("Ignoring start of program {}: {}", id, err);
            return false;
        }
        if !self.queue.push(StartRequest { id, volume }) {
            warn!("Program queue full, dropping start of program {}", id);
            return false;
        }
        true
    }

    /// Advance the sequencer by one timer tick
    pub fn tick(&mut self) {
        self.serviced = 0;
        while let Some(request) = self.queue.pop() {
            self.start_program(request);
        }
        self.execute_programs();

        let before = self.callback_timer;
        self.callback_timer = self.callback_timer.wrapping_add(self.tempo);
        if self.callback_timer < before {
            self.beat.countdown = self.beat.countdown.wrapping_sub(1);
            if self.beat.countdown == 0 {
                self.beat.countdown = self.beat.divider;
                self.beat.counter = self.beat.counter.wrapping_add(1);
            }
        }
    }

    fn class_enabled(&self, chan: usize) -> bool {
        let class = if (6..CONTROL_CHANNEL).contains(&chan) {
            MasterFlags::SFX
        } else {
            MasterFlags::MUSIC
        };
        self.master_flags.contains(class)
    }

    fn start_program(&mut self, request: StartRequest) {
        let Some(data) = self.data.as_ref() else {
            return;
        };
        let header = match data.program(request.id) {
            Ok(header) => header,
            Err(err) => {
                debug!("Ignoring start of program {}: {}", request.id, err);
                return;
            }
        };
        // Melodic programs need at least one instruction.
        if header.channel < CONTROL_CHANNEL && header.start() + 2 > data.len() {
            debug!("Ignoring start of program {}: truncated", request.id);
            return;
        }
        if !self.class_enabled(header.channel) {
            debug!(
                "Ignoring start of program {}: channel {} is masked",
                request.id, header.channel
            );
            return;
        }

        self.adjust_sfx_data(header.offset, request.volume);

        let priority = self
            .data
            .as_ref()
            .and_then(|d| d.byte(header.offset + 1).ok())
            .unwrap_or(0) as i8;
        let chan = header.channel;
        if priority >= self.channels[chan].priority {
            debug!("Starting program {} on channel {}", request.id, chan);
            self.bind_program(ProgramHeader { priority, ..header });
            self.run_channel(chan);
            self.serviced |= 1 << chan;
        } else {
            self.preempted += 1;
            debug!(
                "Program {} (priority {}) refused on channel {} (priority {})",
                request.id, priority, chan, self.channels[chan].priority
            );
        }
    }

    /// Bind a program to its channel without running it
    pub(crate) fn bind_program(&mut self, header: ProgramHeader) {
        let chan = header.channel;
        self.reset_channel(chan);
        let volume = if chan <= 5 {
            self.music_volume
        } else {
            self.sfx_volume
        };
        let channel = &mut self.channels[chan];
        channel.priority = header.priority;
        channel.program = Some(crate::cursor::BytecodeCursor::at(header.start()));
        channel.program_id = Some(header.id);
        channel.tempo = 0xFF;
        channel.position = 0xFF;
        channel.duration = 1;
        channel.volume_modifier = volume;
        self.init_adlib_channel(chan);
    }

    /// Scale a sound effect's velocity and priority by the request volume
    ///
    /// The previous patch is undone first, so at most one program header is
    /// modified at any time.
    fn adjust_sfx_data(&mut self, offset: usize, volume: u8) {
        let linear = self.config.version.linear_sfx_scaling();
        let Some(data) = self.data.as_mut() else {
            return;
        };

        if let Some(patch) = self.sfx_patch.take() {
            data.patch(patch.offset + 1, patch.priority);
            data.patch(patch.offset + 3, patch.velocity);
        }

        if data.byte(offset) == Ok(CONTROL_CHANNEL as u8) {
            return;
        }

        let priority = data.byte(offset + 1).unwrap_or(0);
        let velocity = data.byte(offset + 3).unwrap_or(0);
        self.sfx_patch = Some(SfxPatch {
            offset,
            priority,
            velocity,
        });

        if volume == 0xFF {
            return;
        }

        let volume = volume as i32;
        if linear {
            let scaled = (((velocity as i32 + 63) * volume) >> 8) & 0xFF;
            data.patch(offset + 3, ((63 - scaled) & 0xFF) as u8);
            data.patch(offset + 1, (((priority as i32 * volume) >> 8) & 0xFF) as u8);
        } else {
            let scaled = (((velocity as i32) << 2) ^ 0xFF) * volume;
            data.patch(offset + 3, (((scaled >> 10) ^ 0x3F) & 0xFF) as u8);
            data.patch(offset + 1, ((scaled >> 11) & 0xFF) as u8);
        }
    }

    fn execute_programs(&mut self) {
        if self.sync_jump_mask != 0 {
            // Release the group once no member is still running unlocked.
            let mask = self.sync_jump_mask;
            let all_waiting = (0..NUM_CHANNELS)
                .filter(|chan| mask & (1 << chan) != 0)
                .all(|chan| {
                    let channel = &self.channels[chan];
                    !channel.is_playing() || channel.lock
                });
            if all_waiting {
                for chan in (0..NUM_CHANNELS).filter(|chan| mask & (1 << chan) != 0) {
                    self.channels[chan].lock = false;
                }
            }
        }

        for chan in (0..NUM_CHANNELS).rev() {
            if self.serviced & (1 << chan) != 0 {
                continue;
            }
            self.run_channel(chan);
        }
    }

    fn run_channel(&mut self, chan: usize) {
        let locked = self.sync_jump_mask & (1 << chan) != 0;
        let global_tempo = self.tempo;
        let channel = &mut self.channels[chan];
        if !channel.is_playing() || (channel.lock && locked) {
            return;
        }
        if channel.tempo_reset {
            channel.tempo = global_tempo;
        }

        let before = channel.position;
        channel.position = channel.position.wrapping_add(channel.tempo);

        let mut flow = Flow::Yield;
        if channel.position < before {
            channel.duration = channel.duration.wrapping_sub(1);
            let duration = channel.duration;
            if duration != 0 {
                if duration == channel.spacing2 {
                    self.note_off(chan);
                }
                if duration == self.channels[chan].spacing1 && chan != CONTROL_CHANNEL {
                    self.note_off(chan);
                }
            } else {
                flow = self.dispatch(chan);
            }
        }

        if flow == Flow::Yield {
            self.run_effects(chan);
        }
    }

    fn dispatch(&mut self, chan: usize) -> Flow {
        let Some(mut cursor) = self.channels[chan].program else {
            return Flow::Yield;
        };

        for _ in 0..MAX_DISPATCH_STEPS {
            match cursor.read_command(self.bytes()) {
                Command::Opcode { index, param } => {
                    let info = &OPCODE_TABLE[index];
                    trace!(
                        "channel {}: {} ({:#04x}) param {:#04x}",
                        chan,
                        info.name,
                        index,
                        param
                    );
                    let flow = self.execute_opcode(info.opcode, &mut cursor, chan, param);
                    self.channels[chan].program = match flow {
                        Flow::Halt => None,
                        _ => Some(cursor),
                    };
                    if flow != Flow::Continue {
                        return flow;
                    }
                }
                Command::Note { note, duration } => {
                    trace!(
                        "channel {}: note {:#04x} duration {}",
                        chan,
                        note,
                        duration
                    );
                    self.channels[chan].program = Some(cursor);
                    self.start_note(chan, note);
                    self.setup_duration(chan, duration);
                    if duration != 0 {
                        return Flow::Yield;
                    }
                }
            }
        }

        warn!(
            "channel {}: {} instructions without a wait, resuming next tick",
            chan, MAX_DISPATCH_STEPS
        );
        let channel = &mut self.channels[chan];
        channel.program = Some(cursor);
        channel.duration = 1;
        Flow::Yield
    }

    /// Advance the pseudo-random generator
    pub(crate) fn random(&mut self) -> u16 {
        self.rnd = self.rnd.wrapping_add(0x9248);
        let low = self.rnd & 7;
        self.rnd >>= 3;
        self.rnd |= low << 13;
        self.rnd
    }

    pub(crate) fn setup_duration(&mut self, chan: usize, duration: u8) {
        let randomness = self.channels[chan].duration_randomness;
        if randomness != 0 {
            let rnd = self.random();
            let channel = &mut self.channels[chan];
            channel.duration = duration.wrapping_add((rnd & randomness as u16) as u8);
            return;
        }

        let channel = &mut self.channels[chan];
        if channel.fractional_spacing != 0 {
            channel.spacing2 = (duration >> 3).wrapping_mul(channel.fractional_spacing);
        }
        channel.duration = duration;
    }

    /// Derive the frequency registers of a raw note
    ///
    /// Returns false for the control channel, which has no voice.
    fn compute_note(&mut self, chan: usize, raw: u8, force_bend: bool) -> bool {
        if chan >= CONTROL_CHANNEL {
            return false;
        }
        let channel = &mut self.channels[chan];
        channel.raw_note = raw;

        let mut note = (raw & 0x0F) as i16 + channel.base_note as i16;
        let mut octave = ((raw as i16 + channel.base_octave as i16) >> 4) & 0x0F;

        if note >= 12 {
            octave += note / 12;
            note %= 12;
        } else if note < 0 {
            let octaves = -(note + 1) / 12 + 1;
            octave -= octaves;
            note += 12 * octaves;
        }

        let mut freq = FREQ_TABLE[note as usize] as i16 + channel.base_freq as i16;

        if channel.pitch_bend != 0 || force_bend {
            let index = ((raw & 0x0F) as usize).min(11);
            if channel.pitch_bend >= 0 {
                let bend = (channel.pitch_bend as usize).min(31);
                freq += PITCH_BEND_TABLES[index + 2][bend] as i16;
            } else {
                let bend = (-(channel.pitch_bend as i16)).min(31) as usize;
                freq -= PITCH_BEND_TABLES[index][bend] as i16;
            }
        }

        let freq = freq.clamp(0, 0x3FF) as u16;
        let block = (octave.clamp(0, 7) as u8) << 2;
        channel.reg_ax = (freq & 0xFF) as u8;
        channel.reg_bx = (channel.reg_bx & KEY_ON) | block | ((freq >> 8) & 0x03) as u8;
        true
    }

    /// Retune without touching the key state
    pub(crate) fn setup_note(&mut self, chan: usize, raw: u8, force_bend: bool) {
        if !self.compute_note(chan, raw, force_bend) {
            return;
        }
        let (ax, bx) = self.channels[chan].frequency_registers();
        self.write(0xA0 + chan as u16, ax);
        self.write(0xB0 + chan as u16, bx);
    }

    /// Retune and key on
    fn start_note(&mut self, chan: usize, raw: u8) {
        if !self.compute_note(chan, raw, false) {
            return;
        }
        let ax = self.channels[chan].reg_ax;
        self.write(0xA0 + chan as u16, ax);
        self.note_on(chan);
    }

    pub(crate) fn note_on(&mut self, chan: usize) {
        if chan >= CONTROL_CHANNEL {
            return;
        }
        let channel = &mut self.channels[chan];
        channel.reg_bx |= KEY_ON;
        let bx = channel.reg_bx;

        let shift = 9 - (channel.vibrato.step_range as i8).clamp(0, 9) as u16;
        channel.vibrato.step = ((channel.frequency() >> shift) & 0xFF) as i16;
        channel.vibrato.delay_countdown = channel.vibrato.delay;

        self.write(0xB0 + chan as u16, bx);
    }

    pub(crate) fn note_off(&mut self, chan: usize) {
        if chan >= CONTROL_CHANNEL {
            return;
        }
        // Rhythm mode owns voices 6-8.
        if self.rhythm_bits != 0 && chan >= 6 {
            return;
        }
        let channel = &mut self.channels[chan];
        channel.reg_bx &= !KEY_ON;
        let bx = channel.reg_bx;
        self.write(0xB0 + chan as u16, bx);
    }

    /// Silence a voice's envelopes before a new program takes it over
    fn init_adlib_channel(&mut self, chan: usize) {
        if chan >= CONTROL_CHANNEL {
            return;
        }
        if self.rhythm_bits != 0 && chan >= 6 {
            return;
        }
        let off = reg_offset(chan) as u16;
        self.write(0x60 + off, 0xFF);
        self.write(0x63 + off, 0xFF);
        self.write(0x80 + off, 0xFF);
        self.write(0x83 + off, 0xFF);
        self.write(0xB0 + chan as u16, 0x00);
    }

    /// Load an instrument into hardware voice `voice`
    ///
    /// The snapshot and level state live in channel `state_chan`, which
    /// differs from `voice` only while setting up the rhythm section.
    pub(crate) fn setup_instrument(&mut self, voice: usize, instrument: Instrument, state_chan: usize) {
        if voice >= CONTROL_CHANNEL {
            return;
        }
        let off = reg_offset(voice) as u16;
        self.write(0x20 + off, instrument.modulator_characteristic);
        self.write(0x23 + off, instrument.carrier_characteristic);
        self.write(0xC0 + voice as u16, instrument.feedback_connection);
        self.write(0xE0 + off, instrument.modulator_waveform);
        self.write(0xE3 + off, instrument.carrier_waveform);

        self.channels[state_chan].instrument = instrument;
        let modulator = self.channels[state_chan].modulator_level();
        let carrier = self.channels[state_chan].carrier_level();
        self.write(0x40 + off, modulator);
        self.write(0x43 + off, carrier);

        self.write(0x60 + off, instrument.modulator_attack_decay);
        self.write(0x63 + off, instrument.carrier_attack_decay);
        self.write(0x80 + off, instrument.modulator_sustain_release);
        self.write(0x83 + off, instrument.carrier_sustain_release);
    }

    /// Rewrite the operator levels after an extra level changed
    pub(crate) fn adjust_volume(&mut self, chan: usize) {
        if chan >= CONTROL_CHANNEL {
            return;
        }
        let off = reg_offset(chan) as u16;
        let channel = &self.channels[chan];
        let carrier = channel.carrier_level();
        let modulator = channel.is_additive().then(|| channel.modulator_level());
        self.write(0x43 + off, carrier);
        if let Some(modulator) = modulator {
            self.write(0x40 + off, modulator);
        }
    }

    fn write_levels(&mut self, chan: usize) {
        let off = reg_offset(chan) as u16;
        let modulator = self.channels[chan].modulator_level();
        let carrier = self.channels[chan].carrier_level();
        self.write(0x40 + off, modulator);
        self.write(0x43 + off, carrier);
    }

    /// Change the music volume and rewrite the affected levels
    ///
    /// Before the revision with independent sound effect volume, the effect
    /// voices follow the music volume.
    pub fn set_music_volume(&mut self, volume: u8) {
        self.music_volume = volume;
        for chan in 0..6 {
            self.channels[chan].volume_modifier = volume;
            self.write_levels(chan);
        }

        if !self.config.version.separate_sfx_volume() {
            self.sfx_volume = volume;
            for chan in 6..CONTROL_CHANNEL {
                self.channels[chan].volume_modifier = volume;
                self.write_levels(chan);
            }
        }
    }

    /// Change the sound effect volume
    ///
    /// Only honored by revisions with independent sound effect volume.
    pub fn set_sfx_volume(&mut self, volume: u8) {
        if !self.config.version.separate_sfx_volume() {
            debug!("Ignoring sound effect volume change for {:?}", self.config.version);
            return;
        }
        self.sfx_volume = volume;
        for chan in 6..CONTROL_CHANNEL {
            self.channels[chan].volume_modifier = volume;
            self.write_levels(chan);
        }
    }

    pub(crate) fn run_effects(&mut self, chan: usize) {
        match self.channels[chan].primary_effect {
            PrimaryEffect::Slide => self.slide(chan),
            PrimaryEffect::Vibrato => self.vibrato(chan),
            PrimaryEffect::None => {}
        }
        if self.channels[chan].secondary_effect == SecondaryEffect::RegisterSweep {
            self.register_sweep(chan);
        }
    }
}
