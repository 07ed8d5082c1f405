//! Per-tick channel effects
//!
//! Every effect keeps an 8-bit timer that its tempo is added to each tick;
//! the effect only acts on the ticks where the timer wraps. None of them run
//! on the control channel.

use crate::channel::{CONTROL_CHANNEL, KEY_ON};
use crate::driver::Driver;
use crate::sink::RegisterSink;
use crate::tables::reg_offset;

const SLIDE_OCTAVE_UP: i16 = 734;
const SLIDE_OCTAVE_DOWN: i16 = 388;

impl<S: RegisterSink> Driver<S> {
    /// Slide the F-number, carrying into the block at the octave boundaries
    ///
    /// The block saturates at 0 and 7; at either end the F-number is pinned to
    /// its 10-bit range instead of wrapping into the other end of the scale.
    pub(crate) fn slide(&mut self, chan: usize) {
        if chan >= CONTROL_CHANNEL {
            return;
        }
        let channel = &mut self.channels[chan];
        let before = channel.slide.timer;
        channel.slide.timer = channel.slide.timer.wrapping_add(channel.slide.tempo);
        if channel.slide.timer >= before {
            return;
        }

        let step = channel.slide.step;
        let key = channel.reg_bx & KEY_ON;
        let mut block = channel.block() as i16;
        let mut freq = channel.frequency() as i16 + step.clamp(-0x3FF, 0x3FF);

        if step >= 0 && freq >= SLIDE_OCTAVE_UP {
            if block < 7 {
                freq >>= 1;
                if freq & 0x3FF == 0 {
                    freq += 1;
                }
                block += 1;
            }
        } else if step < 0 && freq < SLIDE_OCTAVE_DOWN && block > 0 {
            freq = freq.max(0) << 1;
            if freq & 0x3FF == 0 {
                freq -= 1;
            }
            block -= 1;
        }

        let freq = freq.clamp(0, 0x3FF) as u16;
        channel.reg_ax = (freq & 0xFF) as u8;
        channel.reg_bx = key | ((block as u8) << 2) | ((freq >> 8) & 0x03) as u8;
        let (ax, bx) = (channel.reg_ax, channel.reg_bx);

        self.write(0xA0 + chan as u16, ax);
        self.write(0xB0 + chan as u16, bx);
    }

    /// Swing the F-number up and down around the note
    pub(crate) fn vibrato(&mut self, chan: usize) {
        if chan >= CONTROL_CHANNEL {
            return;
        }
        let channel = &mut self.channels[chan];
        let vibrato = &mut channel.vibrato;
        if vibrato.delay_countdown != 0 {
            vibrato.delay_countdown -= 1;
            return;
        }

        let before = vibrato.timer;
        vibrato.timer = vibrato.timer.wrapping_add(vibrato.tempo);
        if vibrato.timer >= before {
            return;
        }

        vibrato.steps_countdown = vibrato.steps_countdown.wrapping_sub(1);
        if vibrato.steps_countdown == 0 {
            vibrato.step = -vibrato.step;
            vibrato.steps_countdown = vibrato.num_steps;
        }
        let step = vibrato.step as i32;

        let freq = (channel.frequency() as i32 + step).clamp(0, 0x3FF) as u16;
        channel.reg_ax = (freq & 0xFF) as u8;
        channel.reg_bx = (channel.reg_bx & 0xFC) | (freq >> 8) as u8;
        let (ax, bx) = (channel.reg_ax, channel.reg_bx);

        self.write(0xA0 + chan as u16, ax);
        self.write(0xB0 + chan as u16, bx);
    }

    /// Replay a byte table from the sound data into one operator register
    pub(crate) fn register_sweep(&mut self, chan: usize) {
        if chan >= CONTROL_CHANNEL {
            return;
        }
        let sweep = &mut self.channels[chan].sweep;
        let before = sweep.timer;
        sweep.timer = sweep.timer.wrapping_add(sweep.tempo);
        if sweep.timer >= before {
            return;
        }

        let mut pos = sweep.pos as i16 - 1;
        if pos < 0 {
            pos = sweep.size as i16;
        }
        sweep.pos = pos as i8;
        let index = sweep.table + pos as i32;
        let register = sweep.reg_base as u16 + reg_offset(chan) as u16;

        let value = usize::try_from(index)
            .ok()
            .and_then(|i| self.bytes().get(i).copied());
        if let Some(value) = value {
            self.write(register, value);
        }
    }
}
