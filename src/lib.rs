//! Bytecode-driven OPL2 (AdLib) music sequencer
//!
//! Plays the sound data format of early-1990s DOS adventure game drivers: a
//! blob holding a program table, an instrument table and per-channel bytecode.
//! Ten virtual channels (nine FM voices plus a control channel) run their
//! programs on a fixed timer tick and emit OPL register writes.
//!
//! The crate produces no audio. Register writes go to a [`RegisterSink`],
//! which may be an OPL emulator, real hardware or the [`RegisterLog`]
//! recorder used by the tests.
//!
//! # Features
//! - Full 75-slot opcode table: loops, subroutines, jumps, tempo, beats
//! - Pitch slide, vibrato and register sweep effects
//! - Priority arbitration between music and sound effects
//! - Rhythm (percussion) mode
//! - Register-exact, deterministic output
//!
//! # Crate feature flags
//! - `cli` (default): the `adlib-seq` register trace dumper
//!
//! # Quick start
//! ```
//! use adlib_sequencer::{RegisterLog, Sequencer};
//!
//! let blob = vec![0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x0A];
//! let sequencer = Sequencer::new(RegisterLog::new());
//! sequencer.init_chip();
//! sequencer.set_sound_data(blob);
//! sequencer.start_song(1);
//! for _ in 0..11 {
//!     sequencer.tick();
//! }
//! let log = sequencer.into_sink();
//! // Key on, then key off when the program runs out.
//! assert_eq!(log.writes_to(0xB0).last(), Some(0x01));
//! ```

#![warn(missing_docs)]

pub mod channel; // Per-channel state
pub mod clock; // Sample-driven tick scheduling
pub mod config; // Driver revision and volumes
pub mod cursor; // Bytecode reading
mod driver; // Scheduler, note and instrument writes
mod effects; // Slide, vibrato, register sweep
pub mod opcodes; // Opcode table and handlers
pub mod queue; // Start request ring
pub mod rhythm; // Percussion mode levels
pub mod sequencer; // Thread-safe front end
pub mod sink; // Register output
pub mod sound_data; // Blob decoding
pub mod tables; // Static lookup tables

/// Error types for sequencer operations
#[derive(thiserror::Error, Debug)]
pub enum SequencerError {
    /// Malformed sound data
    #[error("Sound data error: {0}")]
    SoundData(#[from] SoundDataError),

    /// Configuration document could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Result type for sequencer operations
pub type Result<T> = std::result::Result<T, SequencerError>;

// Public API exports
pub use channel::{Channel, PrimaryEffect, SecondaryEffect, CONTROL_CHANNEL, NUM_CHANNELS};
pub use clock::TickClock;
pub use config::{DriverVersion, SequencerConfig, DEFAULT_TICK_RATE_HZ};
pub use driver::MAX_DISPATCH_STEPS;
pub use opcodes::{Opcode, OpcodeInfo, OPCODE_TABLE};
pub use rhythm::RhythmInstruments;
pub use sequencer::{MasterFlags, Sequencer};
pub use sink::{NullSink, RegisterLog, RegisterSink, RegisterWrite};
pub use sound_data::{Instrument, ProgramHeader, SoundData, SoundDataError};
