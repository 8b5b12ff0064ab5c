//! Fixed-capacity circular buffer of output events.

use std::sync::RwLock;

use super::models::OutputEvent;

/// Bounded history of a session's output, used to replay recent events to
/// late subscribers. Position is authoritative for ordering; once the
/// buffer is full the oldest entry is overwritten.
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    buf: Vec<OutputEvent>,
    /// Next write position.
    pos: usize,
    full: bool,
}

impl RingBuffer {
    /// Create a ring buffer holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner {
                buf: Vec::with_capacity(capacity),
                pos: 0,
                full: false,
            }),
        }
    }

    /// Append an event, overwriting the oldest one when full.
    pub fn write(&self, event: OutputEvent) {
        let mut inner = self.inner.write().unwrap();
        if inner.full {
            let pos = inner.pos;
            inner.buf[pos] = event;
        } else {
            inner.buf.push(event);
        }
        inner.pos = (inner.pos + 1) % self.capacity;
        if inner.pos == 0 {
            inner.full = true;
        }
    }

    /// Snapshot all buffered events in production order, oldest first.
    pub fn read_all(&self) -> Vec<OutputEvent> {
        let inner = self.inner.read().unwrap();
        if !inner.full {
            return inner.buf.clone();
        }

        let mut result = Vec::with_capacity(self.capacity);
        result.extend_from_slice(&inner.buf[inner.pos..]);
        result.extend_from_slice(&inner.buf[..inner.pos]);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OutputKind;

    fn event(data: &str) -> OutputEvent {
        OutputEvent::line("test", OutputKind::Stdout, data)
    }

    fn data(events: &[OutputEvent]) -> Vec<&str> {
        events.iter().map(|e| e.data.as_str()).collect()
    }

    #[test]
    fn empty_buffer_reads_empty() {
        let ring = RingBuffer::new(10);
        assert!(ring.read_all().is_empty());
    }

    #[test]
    fn partial_fill_preserves_order() {
        let ring = RingBuffer::new(10);
        for i in 0..3 {
            ring.write(event(&format!("line{i}")));
        }
        assert_eq!(data(&ring.read_all()), ["line0", "line1", "line2"]);
    }

    #[test]
    fn wraparound_keeps_last_capacity_events() {
        let ring = RingBuffer::new(3);
        for i in 0..5 {
            ring.write(event(&format!("line{i}")));
        }
        assert_eq!(data(&ring.read_all()), ["line2", "line3", "line4"]);
    }

    #[test]
    fn exactly_full_keeps_everything() {
        let ring = RingBuffer::new(3);
        for i in 0..3 {
            ring.write(event(&format!("line{i}")));
        }
        assert_eq!(data(&ring.read_all()), ["line0", "line1", "line2"]);
    }

    #[test]
    fn capacity_one_keeps_only_last_write() {
        let ring = RingBuffer::new(1);
        ring.write(event("first"));
        ring.write(event("second"));
        assert_eq!(data(&ring.read_all()), ["second"]);
    }

    #[test]
    fn read_is_idempotent() {
        let ring = RingBuffer::new(4);
        for i in 0..6 {
            ring.write(event(&format!("line{i}")));
        }
        let first_all = ring.read_all();
        let first = data(&first_all);
        let second_all = ring.read_all();
        let second = data(&second_all);
        assert_eq!(first, second);
    }

    #[test]
    fn length_is_min_of_writes_and_capacity() {
        for (writes, capacity, expected) in [(0, 5, 0), (3, 5, 3), (5, 5, 5), (12, 5, 5)] {
            let ring = RingBuffer::new(capacity);
            for i in 0..writes {
                ring.write(event(&format!("line{i}")));
            }
            assert_eq!(ring.read_all().len(), expected);
        }
    }
}
