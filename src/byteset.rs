//! Concurrent byte-sets: fixed-capacity counter arrays written by the
//! instrumented target and drained by a single observer thread.
//!
//! Writers use relaxed atomic stores only; the drain reads and clears one
//! machine word at a time. A write landing on a word between its read and
//! its zeroing is lost. That race is tolerated on purpose: its only effect
//! is occasional lossy counting, and keeping the write side wait-free
//! matters more than perfect counts.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

const WORD_SIZE: usize = size_of::<usize>();

/// A fixed-size set of `N` byte-wide counters, `N` a multiple of 64.
///
/// `set` and `saturated_increment` can be called concurrently from any
/// thread; concurrent writers on the same index race last-writer-wins.
/// [`ConcurrentByteSet::for_each_non_zero`] and
/// [`ConcurrentByteSet::clear`] must run on exactly one thread.
///
/// [`ConcurrentByteSet::new`] is `const` and all-zero, so instances meant to
/// be shared with the target should be given static storage duration: the
/// process image zero-initializes them for free, no matter how large `N`
/// is.
#[derive(Debug)]
#[repr(align(64))]
pub struct ConcurrentByteSet<const N: usize> {
    bytes: [AtomicU8; N],
}

impl<const N: usize> ConcurrentByteSet<N> {
    /// Total number of bytes in the set.
    pub const SIZE: usize = N;
    /// Sweep bounds must be multiples of this.
    pub const SIZE_MULTIPLE: usize = 64;

    /// Creates an all-zero byte-set.
    #[must_use]
    pub const fn new() -> Self {
        const { assert!(N != 0 && N % 64 == 0, "byte-set size must be a positive multiple of 64") }
        Self {
            bytes: [const { AtomicU8::new(0) }; N],
        }
    }

    /// Sets all bytes to zero. Must not race with writers.
    pub fn clear(&self) {
        for byte in &self.bytes {
            byte.store(0, Ordering::Relaxed);
        }
    }

    /// Stores `value` at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= N`.
    #[inline]
    pub fn set(&self, idx: usize, value: u8) {
        self.bytes[idx].store(value, Ordering::Relaxed);
    }

    /// Increments the byte at `idx`, clamping at 255.
    ///
    /// The load/store pair is not a read-modify-write, so concurrent
    /// increments of the same index may lose counts.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= N`.
    #[inline]
    pub fn saturated_increment(&self, idx: usize) {
        let counter = self.bytes[idx].load(Ordering::Relaxed);
        if counter != 255 {
            self.bytes[idx].store(counter + 1, Ordering::Relaxed);
        }
    }

    /// Calls `action(index, value)` for every `{index, value}` of a
    /// non-zero byte in the set, then sets all those bytes to zero.
    pub fn for_each_non_zero<F>(&self, action: F)
    where
        F: FnMut(usize, u8),
    {
        self.for_each_non_zero_in(0, N, action);
    }

    /// Like [`ConcurrentByteSet::for_each_non_zero`], restricted to the
    /// index range `[from, to)`.
    ///
    /// The sweep proceeds in ascending index order, one machine word at a
    /// time; each non-zero word is zeroed before its bytes are reported.
    ///
    /// # Panics
    ///
    /// Panics unless `from` and `to` are multiples of
    /// [`ConcurrentByteSet::SIZE_MULTIPLE`] and `to <= N`.
    pub fn for_each_non_zero_in<F>(&self, from: usize, to: usize, mut action: F)
    where
        F: FnMut(usize, u8),
    {
        assert!(from % Self::SIZE_MULTIPLE == 0, "`from` must be a multiple of 64");
        assert!(to % Self::SIZE_MULTIPLE == 0, "`to` must be a multiple of 64");
        assert!(to <= N, "`to` is past the end of the set");
        let base = self.bytes.as_ptr();
        let mut offset = from;
        while offset < to {
            // The set is 64-byte aligned and `offset` is word-aligned, so
            // viewing this chunk as one word is valid. The word-sized access
            // races byte-sized writer stores; lost writes are accepted.
            let word_slot = unsafe { &*base.add(offset).cast::<AtomicUsize>() };
            let word = word_slot.load(Ordering::Relaxed);
            if word != 0 {
                word_slot.store(0, Ordering::Relaxed);
                // Decode assumes the lowest byte sits at the lowest address.
                #[cfg(target_endian = "big")]
                let word = word.swap_bytes();
                for pos in 0..WORD_SIZE {
                    let value = (word >> (pos * 8)) as u8;
                    if value != 0 {
                        action(offset + pos, value);
                    }
                }
            }
            offset += WORD_SIZE;
        }
    }
}

impl<const N: usize> Default for ConcurrentByteSet<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A byte-set of `N` bytes backed by two layers: an upper presence set of
/// `M` bytes and a lower data set of `N` bytes, `N / M` a multiple of 64.
///
/// Writes flag `upper[idx / RATIO]` before touching `lower[idx]`, so a
/// non-zero lower byte implies its window flag was set at some point. The
/// sweep walks the upper set and drains only flagged lower windows, which
/// makes draining sub-linear when occupancy is sparse. Stale upper flags
/// are possible and cause extra sweeping, never missed bytes.
///
/// The usual shape is `M = N / 64`.
#[derive(Debug)]
pub struct TwoLayerConcurrentByteSet<const N: usize, const M: usize> {
    upper: ConcurrentByteSet<M>,
    lower: ConcurrentByteSet<N>,
}

impl<const N: usize, const M: usize> TwoLayerConcurrentByteSet<N, M> {
    /// Total number of bytes in the set.
    pub const SIZE: usize = N;
    /// Lower bytes covered by one upper byte.
    pub const LAYER_RATIO: usize = N / M;
    /// Sweep bounds must be multiples of this.
    pub const SIZE_MULTIPLE: usize = ConcurrentByteSet::<N>::SIZE_MULTIPLE * Self::LAYER_RATIO;

    /// Creates an all-zero two-layer byte-set.
    #[must_use]
    pub const fn new() -> Self {
        const {
            assert!(
                M != 0 && N % M == 0 && (N / M) % 64 == 0,
                "the layer ratio must be a multiple of 64"
            )
        }
        Self {
            upper: ConcurrentByteSet::new(),
            lower: ConcurrentByteSet::new(),
        }
    }

    /// Sets all bytes of both layers to zero. Must not race with writers.
    pub fn clear(&self) {
        self.upper.clear();
        self.lower.clear();
    }

    /// Stores `value` at `idx`, flagging the covering window first.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= N`.
    #[inline]
    pub fn set(&self, idx: usize, value: u8) {
        self.upper.set(idx / Self::LAYER_RATIO, 1);
        self.lower.set(idx, value);
    }

    /// Increments the byte at `idx`, clamping at 255, flagging the covering
    /// window first.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= N`.
    #[inline]
    pub fn saturated_increment(&self, idx: usize) {
        self.upper.set(idx / Self::LAYER_RATIO, 1);
        self.lower.saturated_increment(idx);
    }

    /// Calls `action(index, value)` for every `{index, value}` of a
    /// non-zero byte in the lower layer, then sets all touched bytes of both
    /// layers to zero.
    pub fn for_each_non_zero<F>(&self, action: F)
    where
        F: FnMut(usize, u8),
    {
        self.for_each_non_zero_in(0, N, action);
    }

    /// Like [`TwoLayerConcurrentByteSet::for_each_non_zero`], restricted to
    /// the index range `[from, to)`.
    ///
    /// # Panics
    ///
    /// Panics unless `from` and `to` are multiples of
    /// [`TwoLayerConcurrentByteSet::SIZE_MULTIPLE`] and `to <= N`.
    pub fn for_each_non_zero_in<F>(&self, from: usize, to: usize, mut action: F)
    where
        F: FnMut(usize, u8),
    {
        assert!(to <= N, "`to` is past the end of the set");
        assert!(
            from % Self::SIZE_MULTIPLE == 0,
            "`from` must be a multiple of the layered size multiple"
        );
        assert!(
            to % Self::SIZE_MULTIPLE == 0,
            "`to` must be a multiple of the layered size multiple"
        );
        let upper_from = from / Self::LAYER_RATIO;
        let upper_to = to / Self::LAYER_RATIO;
        self.upper.for_each_non_zero_in(upper_from, upper_to, |upper_idx, _| {
            let lower_from = upper_idx * Self::LAYER_RATIO;
            self.lower
                .for_each_non_zero_in(lower_from, lower_from + Self::LAYER_RATIO, &mut action);
        });
    }
}

impl<const N: usize, const M: usize> Default for TwoLayerConcurrentByteSet<N, M> {
    fn default() -> Self {
        Self::new()
    }
}
