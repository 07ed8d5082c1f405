//! Tick scheduling for audio hosts
//!
//! Hosts that render audio in sample blocks rather than running a timer use
//! [`TickClock`] to find out how many sequencer ticks fall inside each block.
//! The fractional remainder carries over, so the long-run tick rate is exact.

use crate::config::DEFAULT_TICK_RATE_HZ;

/// Sample-driven tick scheduler
#[derive(Debug, Clone)]
pub struct TickClock {
    sample_rate: u32,
    tick_rate_hz: u32,
    /// Accumulated samples times the tick rate
    phase: u64,
    /// Total ticks emitted
    tick_count: u64,
}

impl TickClock {
    /// Clock for `sample_rate` at the default tick rate
    pub fn new(sample_rate: u32) -> Self {
        Self::with_tick_rate(sample_rate, DEFAULT_TICK_RATE_HZ)
    }

    /// Clock for `sample_rate` at `tick_rate_hz`
    ///
    /// A zero tick rate is treated as 1 Hz.
    pub fn with_tick_rate(sample_rate: u32, tick_rate_hz: u32) -> Self {
        TickClock {
            sample_rate: sample_rate.max(1),
            tick_rate_hz: tick_rate_hz.max(1),
            phase: 0,
            tick_count: 0,
        }
    }

    /// Average samples between two ticks, rounded down
    pub fn samples_per_tick(&self) -> u32 {
        self.sample_rate / self.tick_rate_hz
    }

    /// Advance by `samples` and return how many ticks became due
    pub fn advance(&mut self, samples: u32) -> u32 {
        self.phase += samples as u64 * self.tick_rate_hz as u64;
        let due = self.phase / self.sample_rate as u64;
        self.phase %= self.sample_rate as u64;
        self.tick_count += due;
        due as u32
    }

    /// Samples until the next tick is due
    pub fn samples_until_tick(&self) -> u32 {
        let remaining = self.sample_rate as u64 - self.phase;
        remaining.div_ceil(self.tick_rate_hz as u64) as u32
    }

    /// Total ticks emitted since creation or the last reset
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Tick rate in Hz
    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Forget the accumulated phase and tick count
    pub fn reset(&mut self) {
        self.phase = 0;
        self.tick_count = 0;
    }
}
