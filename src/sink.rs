//! Register sink abstraction for OPL chip implementations
//!
//! The sequencer never synthesizes audio. Everything it does reaches the chip
//! through [`RegisterSink::write_register`], so any emulator core, hardware
//! port driver or trace recorder can sit behind it.

use serde::{Deserialize, Serialize};

/// Number of addressable registers in one OPL2 register bank.
pub const OPL_REGISTER_COUNT: usize = 0x100;

/// Common interface for OPL register consumers
///
/// Writes are fire-and-forget and assumed to take effect immediately.
///
/// # Example
///
/// ```
/// use adlib_sequencer::{RegisterLog, RegisterSink};
///
/// fn key_on<S: RegisterSink>(chip: &mut S) {
///     chip.write_register(0xA0, 0x34); // F-number low, channel 0
///     chip.write_register(0xB0, 0x21); // Key-on | block 0 | F-number high
/// }
///
/// let mut log = RegisterLog::new();
/// key_on(&mut log);
/// assert_eq!(log.read_register(0xB0), 0x21);
/// ```
pub trait RegisterSink: Send {
    /// Write to an OPL register
    ///
    /// # Arguments
    ///
    /// * `addr` - Register address (0x000-0x0FF, 0x100-0x1FF on dual-bank chips)
    /// * `value` - Register value (0x00-0xFF)
    fn write_register(&mut self, addr: u16, value: u8);

    /// Read back a register
    ///
    /// Real OPL chips cannot read registers back; the default returns 0x00.
    /// Sinks that mirror writes may override this.
    fn read_register(&self, _addr: u16) -> u8 {
        0x00
    }
}

impl<T: RegisterSink + ?Sized> RegisterSink for Box<T> {
    fn write_register(&mut self, addr: u16, value: u8) {
        (**self).write_register(addr, value);
    }

    fn read_register(&self, addr: u16) -> u8 {
        (**self).read_register(addr)
    }
}

/// A single `(address, value)` register write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWrite {
    /// Register address
    pub addr: u16,
    /// Value written
    pub value: u8,
}

/// Recording sink
///
/// Keeps every write in order and mirrors the last value written to each
/// register of the first bank, which makes it the reference sink for tests
/// and register trace dumps.
#[derive(Debug, Clone)]
pub struct RegisterLog {
    writes: Vec<RegisterWrite>,
    registers: [u8; OPL_REGISTER_COUNT],
}

impl Default for RegisterLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterLog {
    /// Create an empty log with all mirrored registers cleared
    pub fn new() -> Self {
        Self {
            writes: Vec::new(),
            registers: [0; OPL_REGISTER_COUNT],
        }
    }

    /// All writes recorded so far, oldest first
    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    /// Drain the recorded writes, keeping the mirrored register file
    pub fn take(&mut self) -> Vec<RegisterWrite> {
        std::mem::take(&mut self.writes)
    }

    /// Writes to a single register address, oldest first
    pub fn writes_to(&self, addr: u16) -> impl Iterator<Item = u8> + '_ {
        self.writes
            .iter()
            .filter(move |w| w.addr == addr)
            .map(|w| w.value)
    }

    /// Forget recorded writes and clear the register mirror
    pub fn clear(&mut self) {
        self.writes.clear();
        self.registers = [0; OPL_REGISTER_COUNT];
    }
}

impl RegisterSink for RegisterLog {
    fn write_register(&mut self, addr: u16, value: u8) {
        if let Some(reg) = self.registers.get_mut(addr as usize) {
            *reg = value;
        }
        self.writes.push(RegisterWrite { addr, value });
    }

    fn read_register(&self, addr: u16) -> u8 {
        self.registers.get(addr as usize).copied().unwrap_or(0)
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RegisterSink for NullSink {
    fn write_register(&mut self, _addr: u16, _value: u8) {}
}
