//! Single-producer / single-consumer byte ring.
//!
//! The producer side lives in a UART receive interrupt, the consumer side in a
//! task. Nothing is locked: each index has exactly one writer, and every index
//! store happens after the slot it publishes or releases has been touched.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

pub struct ByteRingBuffer<const N: usize> {
    storage: UnsafeCell<[u8; N]>,
    write_index: AtomicU8,
    read_index: AtomicU8,
    // Written by the producer only
    dropped: AtomicU8,
}

// Slots are only written by the producer before publishing them and only read
// by the consumer after observing the publish; see `split`.
unsafe impl<const N: usize> Sync for ByteRingBuffer<N> {}

impl<const N: usize> ByteRingBuffer<N> {
    // Indices are single bytes, the MCU's atomic word
    const VALID_CAPACITY: () = assert!(N >= 2 && N <= 256, "ring capacity must be 2..=256");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        Self {
            storage: UnsafeCell::new([0; N]),
            write_index: AtomicU8::new(0),
            read_index: AtomicU8::new(0),
            dropped: AtomicU8::new(0),
        }
    }

    /// Number of bytes the ring can hold at once (one slot stays empty)
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Hands out the two ends. Borrowing mutably guarantees there is never a
    /// second producer or consumer for the same storage.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let ring: &Self = self;
        (Producer { ring }, Consumer { ring })
    }

    #[inline]
    fn next(index: u8) -> u8 {
        ((index as usize + 1) % N) as u8
    }

    #[inline]
    fn slot(&self, index: u8) -> *mut u8 {
        // In bounds: indices are always < N
        unsafe { self.storage.get().cast::<u8>().add(index as usize) }
    }
}

impl<const N: usize> Default for ByteRingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing end, owned by the interrupt handler
pub struct Producer<'a, const N: usize> {
    ring: &'a ByteRingBuffer<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    /// Appends `byte`; returns false and drops it when the ring is full
    pub fn push(&mut self, byte: u8) -> bool {
        let ring = self.ring;
        let write = ring.write_index.load(Ordering::Relaxed);
        let next = ByteRingBuffer::<N>::next(write);
        if next == ring.read_index.load(Ordering::Acquire) {
            let dropped = ring.dropped.load(Ordering::Relaxed);
            ring.dropped.store(dropped.wrapping_add(1), Ordering::Relaxed);
            return false;
        }
        unsafe { ring.slot(write).write(byte) };
        // Publish last
        ring.write_index.store(next, Ordering::Release);
        true
    }

    pub fn is_full(&self) -> bool {
        let ring = self.ring;
        ByteRingBuffer::<N>::next(ring.write_index.load(Ordering::Relaxed))
            == ring.read_index.load(Ordering::Acquire)
    }
}

/// Reading end, owned by exactly one task
pub struct Consumer<'a, const N: usize> {
    ring: &'a ByteRingBuffer<N>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    pub fn pop(&mut self) -> Option<u8> {
        let ring = self.ring;
        let read = ring.read_index.load(Ordering::Relaxed);
        if read == ring.write_index.load(Ordering::Acquire) {
            return None;
        }
        let byte = unsafe { ring.slot(read).read() };
        // Release the slot only after it has been copied out
        ring.read_index.store(ByteRingBuffer::<N>::next(read), Ordering::Release);
        Some(byte)
    }

    /// Oldest byte without consuming it
    pub fn peek(&self) -> Option<u8> {
        let ring = self.ring;
        let read = ring.read_index.load(Ordering::Relaxed);
        if read == ring.write_index.load(Ordering::Acquire) {
            return None;
        }
        Some(unsafe { ring.slot(read).read() })
    }

    /// Discards everything buffered so far
    pub fn clear(&mut self) {
        let ring = self.ring;
        let write = ring.write_index.load(Ordering::Acquire);
        ring.read_index.store(write, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        let ring = self.ring;
        let write = ring.write_index.load(Ordering::Acquire) as usize;
        let read = ring.read_index.load(Ordering::Relaxed) as usize;
        (write + N - read) % N
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes rejected by the producer, wrapping at 256
    pub fn dropped(&self) -> u8 {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}
