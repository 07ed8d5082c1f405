//! Pending program start requests

/// Capacity of the request ring.
pub const QUEUE_CAPACITY: usize = 16;

/// One queued start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartRequest {
    /// Program id
    pub id: u16,
    /// Sound effect volume (0xFF = unscaled)
    pub volume: u8,
}

/// Fixed ring of start requests, drained in arrival order
#[derive(Debug, Clone, Default)]
pub struct ProgramQueue {
    entries: [StartRequest; QUEUE_CAPACITY],
    start: usize,
    len: usize,
}

impl ProgramQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending requests
    pub fn len(&self) -> usize {
        self.len
    }

    /// No requests pending
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a request; refused when the ring is full
    pub fn push(&mut self, request: StartRequest) -> bool {
        if self.len == QUEUE_CAPACITY {
            return false;
        }
        let slot = (self.start + self.len) % QUEUE_CAPACITY;
        self.entries[slot] = request;
        self.len += 1;
        true
    }

    /// Take the oldest request
    pub fn pop(&mut self) -> Option<StartRequest> {
        if self.len == 0 {
            return None;
        }
        let request = self.entries[self.start];
        self.start = (self.start + 1) % QUEUE_CAPACITY;
        self.len -= 1;
        Some(request)
    }

    /// Drop every pending request
    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }
}
