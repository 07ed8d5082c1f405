//! Bytecode read cursor and subroutine stack
//!
//! A channel's program is a byte stream inside the sound data. Every
//! instruction starts with a two-byte header:
//!
//! - `0x80..=0xFF, operand`: opcode `b & 0x7F` with its first operand.
//!   Further operands follow in the stream.
//! - `0x00..=0x7F, duration`: a note event.
//!
//! Reading past the end of the blob yields the stop opcode, so a truncated
//! program always terminates.

use crate::opcodes::{Opcode, OPCODE_TABLE};

/// Depth of the per-channel subroutine stack.
pub const CALL_STACK_DEPTH: usize = 4;

const END_OF_STREAM: u8 = 0xFF;

/// Read position inside the sound data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BytecodeCursor {
    pos: usize,
}

/// One decoded instruction header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Opcode with its first operand byte (0 for operand-less opcodes)
    Opcode {
        /// Dispatch table index after clamping
        index: usize,
        /// First operand
        param: u8,
    },
    /// Note event
    Note {
        /// Raw note: low nibble is the note, high nibble the octave
        note: u8,
        /// Duration in wrapped ticks
        duration: u8,
    },
}

impl Command {
    /// Opcode variant, if this is an opcode instruction
    pub fn opcode(&self) -> Option<Opcode> {
        match *self {
            Command::Opcode { index, .. } => Some(OPCODE_TABLE[index].opcode),
            Command::Note { .. } => None,
        }
    }
}

impl BytecodeCursor {
    /// Cursor at an absolute blob offset
    pub fn at(pos: usize) -> Self {
        Self { pos }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Decode the next instruction header
    ///
    /// Opcode indices past the table, and opcodes whose declared operands would
    /// run off the end of `data`, clamp to the last table slot. The byte after
    /// an opcode is always consumed; operand-less handlers step back over it.
    pub fn read_command(&mut self, data: &[u8]) -> Command {
        let len = data.len();
        let mut code = data.get(self.pos).copied().unwrap_or(END_OF_STREAM);
        self.pos += 1;

        // A note needs its duration byte.
        if code < 0x80 && self.pos >= len {
            code = END_OF_STREAM;
        }

        if code & 0x80 == 0 {
            let duration = data.get(self.pos).copied().unwrap_or(0);
            self.pos += 1;
            return Command::Note {
                note: code,
                duration,
            };
        }

        let last = OPCODE_TABLE.len() - 1;
        let mut index = ((code & 0x7F) as usize).min(last);
        if self.pos + OPCODE_TABLE[index].operands > len {
            index = last;
        }

        let param = if OPCODE_TABLE[index].operands > 0 {
            data.get(self.pos).copied().unwrap_or(0)
        } else {
            0
        };
        self.pos += 1;

        Command::Opcode { index, param }
    }

    /// Read one operand byte
    ///
    /// Operand counts are validated by [`read_command`](Self::read_command),
    /// so this only yields zero for malformed tables.
    pub fn next_u8(&mut self, data: &[u8]) -> u8 {
        let value = data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        value
    }

    /// Read a little-endian 16-bit operand
    pub fn next_le_u16(&mut self, data: &[u8]) -> u16 {
        let lo = self.next_u8(data);
        let hi = self.next_u8(data);
        u16::from_le_bytes([lo, hi])
    }

    /// Read a big-endian 16-bit operand
    pub fn next_be_u16(&mut self, data: &[u8]) -> u16 {
        let hi = self.next_u8(data);
        let lo = self.next_u8(data);
        u16::from_be_bytes([hi, lo])
    }

    /// Step back `n` bytes
    pub fn rewind(&mut self, n: usize) {
        self.pos = self.pos.saturating_sub(n);
    }

    /// Target of a relative jump, if it lands inside the blob
    pub fn relative_target(&self, offset: i16, len: usize) -> Option<usize> {
        let target = self.pos as i64 + offset as i64;
        (0..len as i64).contains(&target).then_some(target as usize)
    }

    /// Move by a signed offset from the current position
    ///
    /// Returns false, leaving the cursor untouched, when the target is outside
    /// `0..len`.
    pub fn jump_relative(&mut self, offset: i16, len: usize) -> bool {
        match self.relative_target(offset, len) {
            Some(target) => {
                self.pos = target;
                true
            }
            None => false,
        }
    }

    /// Move to an absolute address encoded with the legacy displacement
    pub fn jump_absolute(&mut self, address: u16, base: i32, len: usize) -> bool {
        let target = address as i32 - base;
        if target < 0 || target as usize >= len {
            return false;
        }
        self.pos = target as usize;
        true
    }
}

/// Fixed-depth stack of saved return positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallStack {
    entries: [BytecodeCursor; CALL_STACK_DEPTH],
    depth: usize,
}

impl CallStack {
    /// Number of saved positions
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True when another push would be refused
    pub fn is_full(&self) -> bool {
        self.depth >= CALL_STACK_DEPTH
    }

    /// Save a return position; refused when full
    pub fn push(&mut self, cursor: BytecodeCursor) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries[self.depth] = cursor;
        self.depth += 1;
        true
    }

    /// Restore the most recent return position
    pub fn pop(&mut self) -> Option<BytecodeCursor> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        Some(self.entries[self.depth])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_command() {
        let data = [0x25, 0x0A];
        let mut cursor = BytecodeCursor::at(0);
        assert_eq!(
            cursor.read_command(&data),
            Command::Note {
                note: 0x25,
                duration: 0x0A
            }
        );
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn test_opcode_command() {
        // set repeat, 3
        let data = [0x80, 0x03];
        let mut cursor = BytecodeCursor::at(0);
        let cmd = cursor.read_command(&data);
        assert_eq!(cmd, Command::Opcode { index: 0, param: 3 });
        assert_eq!(cmd.opcode(), Some(Opcode::SetRepeat));
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn test_out_of_range_index_clamps_to_last_slot() {
        let data = [0xFE, 0x00];
        let mut cursor = BytecodeCursor::at(0);
        let cmd = cursor.read_command(&data);
        assert_eq!(
            cmd,
            Command::Opcode {
                index: OPCODE_TABLE.len() - 1,
                param: 0
            }
        );
        assert_eq!(cmd.opcode(), Some(Opcode::StopChannel));
    }

    #[test]
    fn test_end_of_stream_reads_stop() {
        let data = [0x10];
        let mut cursor = BytecodeCursor::at(0);
        // Note without a duration byte
        assert_eq!(cursor.read_command(&data).opcode(), Some(Opcode::StopChannel));

        let mut past_end = BytecodeCursor::at(8);
        assert_eq!(
            past_end.read_command(&data).opcode(),
            Some(Opcode::StopChannel)
        );
    }

    #[test]
    fn test_truncated_operands_clamp_to_stop() {
        // jump needs two operand bytes, only one present
        let data = [0x84, 0x10];
        let mut cursor = BytecodeCursor::at(0);
        assert_eq!(cursor.read_command(&data).opcode(), Some(Opcode::StopChannel));
    }

    #[test]
    fn test_operand_reads() {
        let data = [0x34, 0x12, 0x12, 0x34];
        let mut cursor = BytecodeCursor::at(0);
        assert_eq!(cursor.next_le_u16(&data), 0x1234);
        assert_eq!(cursor.next_be_u16(&data), 0x1234);
        assert_eq!(cursor.next_u8(&data), 0);
    }

    #[test]
    fn test_jump_relative_bounds() {
        let mut cursor = BytecodeCursor::at(4);
        assert!(cursor.jump_relative(-4, 10));
        assert_eq!(cursor.position(), 0);
        assert!(!cursor.jump_relative(-1, 10));
        assert!(!cursor.jump_relative(10, 10));
        assert_eq!(cursor.position(), 0);
        assert!(cursor.jump_relative(9, 10));
        assert_eq!(cursor.position(), 9);
    }

    #[test]
    fn test_jump_absolute() {
        let mut cursor = BytecodeCursor::at(0);
        assert!(cursor.jump_absolute(191 + 5, 191, 10));
        assert_eq!(cursor.position(), 5);
        assert!(!cursor.jump_absolute(100, 191, 10));
        assert!(!cursor.jump_absolute(191 + 10, 191, 10));
    }

    #[test]
    fn test_call_stack_capacity() {
        let mut stack = CallStack::default();
        for i in 0..CALL_STACK_DEPTH {
            assert!(stack.push(BytecodeCursor::at(i)));
        }
        assert!(stack.is_full());
        assert!(!stack.push(BytecodeCursor::at(99)));
        assert_eq!(stack.depth(), CALL_STACK_DEPTH);

        for i in (0..CALL_STACK_DEPTH).rev() {
            assert_eq!(stack.pop(), Some(BytecodeCursor::at(i)));
        }
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.depth(), 0);
    }
}
