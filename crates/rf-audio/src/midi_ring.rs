//! Lock-free single-producer/single-consumer MIDI event ring (spec §4.6).
//!
//! Delivers timestamped raw MIDI messages from a non-realtime producer (the
//! platform MIDI backend's callback, or a virtual keyboard) to the
//! realtime audio thread without either side ever blocking. Capacity is a
//! power of two; the producer/consumer indices are 64-bit monotonically
//! increasing counters so wraparound within the process's lifetime is
//! impossible — the slot index is derived by masking. Index publication is
//! the lock-free part (`Acquire`/`Release` on the two counters); each slot
//! itself is guarded by an uncontended per-slot `parking_lot::Mutex` since
//! producer and consumer never touch the same slot at once — this avoids
//! `unsafe` for the payload copy without reintroducing blocking in the
//! contended sense the spec rules out.

use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum MIDI message size a ring slot can hold. SysEx never enters the
/// ring (see [`MidiRing::push`]), so this only needs to cover the longest
/// non-SysEx message plus headroom, matching the spec's stated minimum.
pub const MAX_MSG: usize = 1024;

#[derive(Clone, Copy)]
struct Slot {
    timestamp: f64,
    size: u32,
    data: [u8; MAX_MSG],
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            size: 0,
            data: [0u8; MAX_MSG],
        }
    }
}

/// A single timestamped MIDI message read out of the ring.
#[derive(Debug, Clone)]
pub struct MidiMessage {
    /// Monotonic seconds, from the platform's highest-resolution clock.
    pub timestamp: f64,
    pub bytes: Vec<u8>,
}

/// Fixed-capacity SPSC ring of timestamped MIDI messages.
///
/// The reference engine uses a 2048-capacity ring for file-sourced
/// preroll/dispatch replay and a 16384-capacity ring for the live
/// device-thread-fed path; both are plain instances of this type with
/// different `capacity`.
pub struct MidiRing {
    slots: Box<[parking_lot::Mutex<Slot>]>,
    mask: usize,
    tail: AtomicU64,
    head: AtomicU64,
    drop_count: AtomicU64,
}

impl MidiRing {
    /// `capacity` is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(2);
        let slots = (0..capacity)
            .map(|_| parking_lot::Mutex::new(Slot::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            tail: AtomicU64::new(0),
            head: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }

    /// Single-producer enqueue. SysEx (`0xF0`) and system-realtime
    /// (`0xF8`..=`0xFF`) messages are rejected here per spec §4.6's SysEx
    /// policy — they never enter the ring.
    pub fn push(&self, timestamp: f64, bytes: &[u8]) {
        if let Some(&status) = bytes.first() {
            if status == 0xF0 || status >= 0xF8 {
                return;
            }
        }
        if bytes.len() > MAX_MSG {
            self.drop_count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) as usize >= self.capacity() {
            self.drop_count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let idx = (tail as usize) & self.mask;
        {
            let mut slot = self.slots[idx].lock();
            slot.timestamp = timestamp;
            slot.size = bytes.len() as u32;
            slot.data[..bytes.len()].copy_from_slice(bytes);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
    }

    /// Single-consumer dequeue. Returns `None` when the ring is empty.
    pub fn pop(&self) -> Option<MidiMessage> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = (head as usize) & self.mask;
        let message = {
            let slot = self.slots[idx].lock();
            MidiMessage {
                timestamp: slot.timestamp,
                bytes: slot.data[..slot.size as usize].to_vec(),
            }
        };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(message)
    }

    /// Drain every message currently available, in FIFO order. This is
    /// what the audio thread calls during slice drain (spec §4.1 step 2).
    pub fn drain(&self) -> Vec<MidiMessage> {
        let mut out = Vec::new();
        while let Some(msg) = self.pop() {
            out.push(msg);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_preserving() {
        let ring = MidiRing::new(8);
        ring.push(0.0, &[0x90, 60, 100]);
        ring.push(0.1, &[0x90, 64, 100]);
        ring.push(0.2, &[0x90, 67, 100]);
        let drained = ring.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].bytes, vec![0x90, 60, 100]);
        assert_eq!(drained[1].bytes, vec![0x90, 64, 100]);
        assert_eq!(drained[2].bytes, vec![0x90, 67, 100]);
    }

    #[test]
    fn overflow_drops_and_reports_count() {
        // spec S4: capacity 8, enqueue 16 without draining -> 8 drops,
        // dequeue returns exactly the first 8 inserts in order.
        let ring = MidiRing::new(8);
        for i in 0..16u8 {
            ring.push(i as f64, &[0x90, i, 100]);
        }
        assert_eq!(ring.drop_count(), 8);
        let drained = ring.drain();
        assert_eq!(drained.len(), 8);
        for (i, msg) in drained.iter().enumerate() {
            assert_eq!(msg.bytes, vec![0x90, i as u8, 100]);
        }
    }

    #[test]
    fn sysex_never_enters_ring() {
        let ring = MidiRing::new(8);
        ring.push(0.0, &[0xF0, 0x43, 0x10, 0xF7]);
        assert!(ring.pop().is_none());
        assert_eq!(ring.drop_count(), 0);
    }

    #[test]
    fn system_realtime_never_enters_ring() {
        let ring = MidiRing::new(8);
        ring.push(0.0, &[0xF8]); // timing clock
        ring.push(0.0, &[0xFA]); // start
        assert!(ring.pop().is_none());
    }

    #[test]
    fn empty_ring_pop_is_none() {
        let ring = MidiRing::new(4);
        assert!(ring.pop().is_none());
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let ring = MidiRing::new(10);
        assert_eq!(ring.capacity(), 16);
    }
}
