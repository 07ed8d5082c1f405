//! Thread-safe sequencer front end
//!
//! [`Sequencer`] is what a host engine talks to. Every call takes the driver
//! lock for its whole duration, so a timer thread calling [`Sequencer::tick`]
//! and a game thread calling [`Sequencer::start_song`] never interleave
//! inside a tick.

use bitflags::bitflags;
use log::debug;
use parking_lot::Mutex;

use crate::channel::{Channel, NUM_CHANNELS};
use crate::config::SequencerConfig;
use crate::driver::Driver;
use crate::sink::RegisterSink;
use crate::sound_data::SoundData;

bitflags! {
    /// Program classes allowed to start
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MasterFlags: u8 {
        /// Programs on channels 0-5 and the control channel
        const MUSIC = 0x01;
        /// Programs on channels 6-8
        const SFX = 0x02;
    }
}

impl Default for MasterFlags {
    fn default() -> Self {
        MasterFlags::all()
    }
}

/// Bytecode music sequencer driving an OPL register sink
///
/// # Example
///
/// ```
/// use adlib_sequencer::{RegisterLog, Sequencer};
///
/// // Program 1 at offset 4: channel 0, priority 0, note C-0 for 10 ticks.
/// let blob = vec![0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x0A];
///
/// let sequencer = Sequencer::new(RegisterLog::new());
/// sequencer.init_chip();
/// sequencer.set_sound_data(blob);
/// sequencer.start_song(1);
/// sequencer.tick();
///
/// assert!(sequencer.is_channel_playing(0));
/// assert!(sequencer.channel(0).is_key_on());
/// ```
pub struct Sequencer<S> {
    driver: Mutex<Driver<S>>,
}

impl<S: RegisterSink> Sequencer<S> {
    /// Sequencer with the default configuration
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, SequencerConfig::default())
    }

    /// Sequencer with an explicit configuration
    pub fn with_config(sink: S, config: SequencerConfig) -> Self {
        debug!("Creating sequencer for {:?}", config.version);
        Self {
            driver: Mutex::new(Driver::new(sink, config)),
        }
    }

    /// Active configuration
    pub fn config(&self) -> SequencerConfig {
        self.driver.lock().config
    }

    /// Write the chip reset sequence and idle every channel
    pub fn init_chip(&self) {
        self.driver.lock().init_chip();
    }

    /// Load a sound data blob, stopping whatever was playing
    pub fn set_sound_data(&self, data: Vec<u8>) {
        self.driver.lock().set_sound_data(Some(SoundData::new(data)));
    }

    /// Unload the sound data, stopping whatever was playing
    pub fn clear_sound_data(&self) {
        self.driver.lock().set_sound_data(None);
    }

    /// Request a program start on the next tick
    ///
    /// Ignored when no sound data is loaded or `id` names no program.
    pub fn start_song(&self, id: u16) {
        self.start_song_with_volume(id, 0xFF);
    }

    /// Request a program start with a sound effect volume
    ///
    /// `volume` scales the program's velocity and priority bytes; 0xFF plays
    /// it unscaled.
    pub fn start_song_with_volume(&self, id: u16, volume: u8) {
        if id == 0 {
            debug!("Ignoring start of program 0");
            return;
        }
        self.driver.lock().queue_program(id, volume);
    }

    /// Unbind every channel and drop pending requests
    pub fn stop_all(&self) {
        self.driver.lock().stop_all();
    }

    /// Advance by one timer tick
    pub fn tick(&self) {
        self.driver.lock().tick();
    }

    /// Enable program classes, returning the previous flags
    pub fn set_master_flags(&self, flags: MasterFlags) -> MasterFlags {
        let mut driver = self.driver.lock();
        let previous = driver.master_flags;
        driver.master_flags |= flags;
        previous
    }

    /// Disable program classes, returning the previous flags
    pub fn clear_master_flags(&self, flags: MasterFlags) -> MasterFlags {
        let mut driver = self.driver.lock();
        let previous = driver.master_flags;
        driver.master_flags &= !flags;
        previous
    }

    /// Currently enabled program classes
    pub fn master_flags(&self) -> MasterFlags {
        self.driver.lock().master_flags
    }

    /// Change the music volume
    pub fn set_music_volume(&self, volume: u8) {
        self.driver.lock().set_music_volume(volume);
    }

    /// Change the sound effect volume
    pub fn set_sfx_volume(&self, volume: u8) {
        self.driver.lock().set_sfx_volume(volume);
    }

    /// Group channels (bit per channel) whose jumps wait for each other
    pub fn set_sync_jump_mask(&self, mask: u16) {
        let mut driver = self.driver.lock();
        driver.sync_jump_mask = mask;
        if mask == 0 {
            for channel in driver.channels.iter_mut() {
                channel.lock = false;
            }
        }
    }

    /// Byte last set by the bytecode's trigger opcode
    pub fn sound_trigger(&self) -> u8 {
        self.driver.lock().sound_trigger
    }

    /// Clear the trigger byte
    pub fn reset_sound_trigger(&self) {
        self.driver.lock().sound_trigger = 0;
    }

    /// A program is bound to channel `chan`
    pub fn is_channel_playing(&self, chan: usize) -> bool {
        debug_assert!(chan < NUM_CHANNELS, "channel {} out of range", chan);
        self.driver
            .lock()
            .channels
            .get(chan)
            .is_some_and(Channel::is_playing)
    }

    /// Snapshot of channel `chan`
    ///
    /// Out-of-range indices yield an idle default channel.
    pub fn channel(&self, chan: usize) -> Channel {
        debug_assert!(chan < NUM_CHANNELS, "channel {} out of range", chan);
        self.driver
            .lock()
            .channels
            .get(chan)
            .cloned()
            .unwrap_or_default()
    }

    /// Start requests refused because of priority
    pub fn preempted_requests(&self) -> usize {
        self.driver.lock().preempted_requests()
    }

    /// Queued start requests
    pub fn pending_requests(&self) -> usize {
        self.driver.lock().pending_requests()
    }

    /// Run `f` with exclusive access to the register sink
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.driver.lock().sink)
    }

    /// Tear down the sequencer and return the sink
    pub fn into_sink(self) -> S {
        self.driver.into_inner().sink
    }
}
