//! Tables of recent compares: lossy rings remembering the operands of
//! recently observed integer and buffer comparisons.
//!
//! Insertions scatter across each table with a cheap linear congruential
//! step instead of true randomness, overwriting whatever the slot held.
//! Writers are not synchronized with each other or with readers; torn
//! entries only make the tables lossier, which is accepted. Making the
//! write side atomic would make the instrumentation callbacks too heavy to
//! be worth it.

use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::Hash;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::dictionary::{matching_container_entry, DictionaryContainer, DictionaryEntry};
use crate::rands::Rand;

/// Capacity in bytes of one side of a recorded buffer comparison.
const BUFFER_ENTRY_CAPACITY: usize = 128;
/// Number of slots in the buffer table.
const BUFFER_TABLE_LEN: usize = 128;

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// An unsigned comparison operand.
///
/// Implemented exactly for `u8`, `u16`, `u32` and `u64`; operand widths
/// outside `{1, 2, 4, 8}` are unrepresentable. Conversions through `u64`
/// zero-extend and truncate, i.e. they wrap like two's-complement integer
/// casts.
pub trait CmpInteger:
    sealed::Sealed + Copy + Eq + Ord + Hash + Debug + 'static
{
    /// The all-zero value.
    const ZERO: Self;
    /// The smallest value.
    const MIN: Self;
    /// The largest value.
    const MAX: Self;
    /// Width in bytes.
    const WIDTH: usize;

    /// Zero-extends into a `u64`.
    fn to_u64(self) -> u64;

    /// Truncates a `u64` into this width.
    fn from_u64(value: u64) -> Self;
}

macro_rules! impl_cmp_integer {
    ($ty:ty) => {
        impl CmpInteger for $ty {
            const ZERO: Self = 0;
            const MIN: Self = <$ty>::MIN;
            const MAX: Self = <$ty>::MAX;
            const WIDTH: usize = core::mem::size_of::<$ty>();

            #[inline]
            fn to_u64(self) -> u64 {
                u64::from(self)
            }

            #[inline]
            fn from_u64(value: u64) -> Self {
                value as $ty
            }
        }
    };
}

impl_cmp_integer!(u8);
impl_cmp_integer!(u16);
impl_cmp_integer!(u32);

impl CmpInteger for u64 {
    const ZERO: Self = 0;
    const MIN: Self = u64::MIN;
    const MAX: Self = u64::MAX;
    const WIDTH: usize = size_of::<u64>();

    #[inline]
    fn to_u64(self) -> u64 {
        self
    }

    #[inline]
    fn from_u64(value: u64) -> Self {
        value
    }
}

/// One recorded integer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompareEntry<T> {
    /// Left operand.
    pub lhs: T,
    /// Right operand.
    pub rhs: T,
}

impl<T: CmpInteger> CompareEntry<T> {
    const ZEROED: Self = Self {
        lhs: T::ZERO,
        rhs: T::ZERO,
    };
}

/// Advances a ring index with the `(37, 89)` linear congruential step,
/// masked to a power-of-two table.
///
/// The multiplier is `1 mod 4` and the increment is odd, so the walk visits
/// every slot exactly once per period while costing one multiply-add.
#[inline]
const fn lcg_next_index(index: usize, mask: usize) -> usize {
    index.wrapping_mul(37).wrapping_add(89) & mask
}

/// A fixed-capacity table of recent integer comparisons of width `T`.
///
/// Each width's table spans one 4 KiB page, so `N` is `4096 /
/// size_of::<T>()`; use the [`TorcU8`]..[`TorcU64`] aliases. Collisions
/// overwrite silently.
#[derive(Debug)]
pub struct TableOfRecentCompares<T, const N: usize> {
    insert_index: usize,
    entries: [CompareEntry<T>; N],
}

/// Recent `u8` comparisons.
pub type TorcU8 = TableOfRecentCompares<u8, 4096>;
/// Recent `u16` comparisons.
pub type TorcU16 = TableOfRecentCompares<u16, 2048>;
/// Recent `u32` comparisons.
pub type TorcU32 = TableOfRecentCompares<u32, 1024>;
/// Recent `u64` comparisons.
pub type TorcU64 = TableOfRecentCompares<u64, 512>;

impl<T: CmpInteger, const N: usize> TableOfRecentCompares<T, N> {
    /// Number of slots in the table.
    pub const LEN: usize = N;
    const INDEX_MASK: usize = N - 1;

    /// Creates an empty table. `const` so instances can have static storage
    /// duration in the target image.
    #[must_use]
    pub const fn new() -> Self {
        const {
            assert!(N.is_power_of_two(), "the index mask needs a power-of-two table");
            assert!(N * size_of::<T>() == 4096, "each table spans one page");
        }
        Self {
            insert_index: 0,
            entries: [CompareEntry::ZEROED; N],
        }
    }

    /// Records one comparison, overwriting whatever the next ring slot held.
    #[inline]
    pub fn insert(&mut self, lhs: T, rhs: T) {
        self.insert_index = lcg_next_index(self.insert_index, Self::INDEX_MASK);
        self.entries[self.insert_index] = CompareEntry { lhs, rhs };
    }

    /// All slots, in table order.
    #[must_use]
    pub fn entries(&self) -> &[CompareEntry<T>] {
        &self.entries
    }

    /// Returns every value the table saw compared against `val`, restricted
    /// to `[min, max]` and deduplicated.
    ///
    /// `val` may be of a different width than the table; operands are cast
    /// to `V` with two's-complement wrap semantics before matching.
    pub fn matching_entries<V: CmpInteger>(&self, val: V, min: V, max: V) -> Vec<V> {
        let mut matches: HashSet<V> = HashSet::new();
        for idx in 0..N {
            if let Some(other) = self.matching_entry(val, idx, min, max) {
                matches.insert(other);
            }
        }
        matches.into_iter().collect()
    }

    /// Probes the single slot `idx`: if one side of the recorded pair equals
    /// `val`, returns the other side, filtered to `[min, max]`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= N`.
    pub fn matching_entry<V: CmpInteger>(&self, val: V, idx: usize, min: V, max: V) -> Option<V> {
        let entry = self.entries[idx];
        let lhs = V::from_u64(entry.lhs.to_u64());
        let rhs = V::from_u64(entry.rhs.to_u64());
        let other = if lhs == val {
            rhs
        } else if rhs == val {
            lhs
        } else {
            return None;
        };
        (min <= other && other <= max).then_some(other)
    }

    /// A uniformly random slot.
    pub fn random_entry<R: Rand>(&self, rand: &mut R) -> CompareEntry<T> {
        self.entries[rand.below(N as u64) as usize]
    }

    /// Picks one side of slot `idx` with a fair coin and returns it when it
    /// falls within `[min, max]`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= N`.
    pub fn random_side<V: CmpInteger, R: Rand>(
        &self,
        rand: &mut R,
        idx: usize,
        min: V,
        max: V,
    ) -> Option<V> {
        let entry = self.entries[idx];
        let side = if rand.coinflip(0.5) {
            entry.lhs
        } else {
            entry.rhs
        };
        let side = V::from_u64(side.to_u64());
        (min <= side && side <= max).then_some(side)
    }
}

impl<T: CmpInteger, const N: usize> Default for TableOfRecentCompares<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// One recorded buffer comparison.
///
/// Both sides keep their first [`ComparedBufferEntry::CAPACITY`]` - 1`
/// bytes at most. The stored buffers are 8-byte aligned so they can be
/// viewed as arrays of wider integers.
#[derive(Debug, Clone)]
#[repr(align(8))]
pub struct ComparedBufferEntry {
    buf_size: usize,
    buf1: [u8; BUFFER_ENTRY_CAPACITY],
    buf2: [u8; BUFFER_ENTRY_CAPACITY],
}

impl ComparedBufferEntry {
    /// Fixed capacity in bytes of each stored side.
    pub const CAPACITY: usize = BUFFER_ENTRY_CAPACITY;

    const EMPTY: Self = Self {
        buf_size: 0,
        buf1: [0; BUFFER_ENTRY_CAPACITY],
        buf2: [0; BUFFER_ENTRY_CAPACITY],
    };

    /// Stored length in bytes; both sides share it.
    #[must_use]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// The stored prefix of the first compared buffer.
    #[must_use]
    pub fn buf1(&self) -> &[u8] {
        &self.buf1[..self.buf_size]
    }

    /// The stored prefix of the second compared buffer.
    #[must_use]
    pub fn buf2(&self) -> &[u8] {
        &self.buf2[..self.buf_size]
    }
}

/// A fixed-capacity table of recent buffer comparisons, i.e. the arguments
/// of `memcmp`, `strcmp`, `strncmp` and friends.
#[derive(Debug)]
pub struct TableOfRecentlyComparedBuffers {
    insert_index: usize,
    entries: [ComparedBufferEntry; BUFFER_TABLE_LEN],
}

impl TableOfRecentlyComparedBuffers {
    /// Number of slots in the table.
    pub const LEN: usize = BUFFER_TABLE_LEN;
    const INDEX_MASK: usize = BUFFER_TABLE_LEN - 1;

    /// Creates an empty table. `const` so instances can have static storage
    /// duration in the target image.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            insert_index: 0,
            entries: [ComparedBufferEntry::EMPTY; BUFFER_TABLE_LEN],
        }
    }

    /// Records one buffer comparison, overwriting whatever the next ring
    /// slot held.
    ///
    /// At most `n` bytes of each side are stored, clamped to the slice
    /// lengths and to [`ComparedBufferEntry::CAPACITY`]` - 1`.
    pub fn insert(&mut self, buf1: &[u8], buf2: &[u8], n: usize) {
        self.insert_index = lcg_next_index(self.insert_index, Self::INDEX_MASK);
        let n = n
            .min(ComparedBufferEntry::CAPACITY - 1)
            .min(buf1.len())
            .min(buf2.len());
        let entry = &mut self.entries[self.insert_index];
        entry.buf_size = n;
        entry.buf1[..n].copy_from_slice(&buf1[..n]);
        entry.buf2[..n].copy_from_slice(&buf2[..n]);
    }

    /// All slots, in table order.
    #[must_use]
    pub fn entries(&self) -> &[ComparedBufferEntry] {
        &self.entries
    }

    /// Returns a dictionary entry for every recorded pair with one side
    /// occurring in `val` (as a sequence of `val`'s elements), carrying the
    /// opposite side as the value. Deduplicated.
    pub fn matching_entries<C: DictionaryContainer>(&self, val: &C) -> Vec<DictionaryEntry<C>> {
        let mut matches: HashSet<DictionaryEntry<C>> = HashSet::new();
        for entry in &self.entries {
            if let Some(found) = matching_container_entry(val, entry.buf1(), entry.buf2()) {
                matches.insert(found);
            }
        }
        matches.into_iter().collect()
    }

    /// A uniformly random slot.
    pub fn random_entry<R: Rand>(&self, rand: &mut R) -> &ComparedBufferEntry {
        &self.entries[rand.below(Self::LEN as u64) as usize]
    }
}

impl Default for TableOfRecentlyComparedBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// The aggregate of all comparison tables: one integer table per operand
/// width plus the buffer table.
///
/// The runner owns one of these per process (static storage, written by the
/// comparison hooks); the engine reads it through the dictionary miners in
/// [`crate::dictionary`].
#[derive(Debug)]
pub struct TablesOfRecentCompares {
    buffers: TableOfRecentlyComparedBuffers,
    u8s: TorcU8,
    u16s: TorcU16,
    u32s: TorcU32,
    u64s: TorcU64,
}

impl TablesOfRecentCompares {
    /// Creates an empty aggregate. `const` so instances can have static
    /// storage duration in the target image.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffers: TableOfRecentlyComparedBuffers::new(),
            u8s: TorcU8::new(),
            u16s: TorcU16::new(),
            u32s: TorcU32::new(),
            u64s: TorcU64::new(),
        }
    }

    /// The buffer comparison table.
    #[must_use]
    pub fn buffer_table(&self) -> &TableOfRecentlyComparedBuffers {
        &self.buffers
    }

    /// The buffer comparison table, for the insert side.
    pub fn buffer_table_mut(&mut self) -> &mut TableOfRecentlyComparedBuffers {
        &mut self.buffers
    }

    /// The `u8` comparison table.
    #[must_use]
    pub fn u8_table(&self) -> &TorcU8 {
        &self.u8s
    }

    /// The `u8` comparison table, for the insert side.
    pub fn u8_table_mut(&mut self) -> &mut TorcU8 {
        &mut self.u8s
    }

    /// The `u16` comparison table.
    #[must_use]
    pub fn u16_table(&self) -> &TorcU16 {
        &self.u16s
    }

    /// The `u16` comparison table, for the insert side.
    pub fn u16_table_mut(&mut self) -> &mut TorcU16 {
        &mut self.u16s
    }

    /// The `u32` comparison table.
    #[must_use]
    pub fn u32_table(&self) -> &TorcU32 {
        &self.u32s
    }

    /// The `u32` comparison table, for the insert side.
    pub fn u32_table_mut(&mut self) -> &mut TorcU32 {
        &mut self.u32s
    }

    /// The `u64` comparison table.
    #[must_use]
    pub fn u64_table(&self) -> &TorcU64 {
        &self.u64s
    }

    /// The `u64` comparison table, for the insert side.
    pub fn u64_table_mut(&mut self) -> &mut TorcU64 {
        &mut self.u64s
    }
}

impl Default for TablesOfRecentCompares {
    fn default() -> Self {
        Self::new()
    }
}

/// Width-indexed access to the integer tables of a
/// [`TablesOfRecentCompares`].
///
/// Generic consumers (notably
/// [`IntegerDictionary`](crate::dictionary::IntegerDictionary)) bound on
/// `TablesOfRecentCompares: IntegerTorc<T>` to reach the table matching
/// their operand width without naming it.
pub trait IntegerTorc<T: CmpInteger> {
    /// See [`TableOfRecentCompares::matching_entries`].
    fn matching_entries(&self, val: T, min: T, max: T) -> Vec<T>;

    /// See [`TableOfRecentCompares::matching_entry`].
    fn matching_entry(&self, val: T, idx: usize, min: T, max: T) -> Option<T>;

    /// See [`TableOfRecentCompares::random_side`].
    fn random_side<R: Rand>(&self, rand: &mut R, idx: usize, min: T, max: T) -> Option<T>;

    /// See [`TableOfRecentCompares::random_entry`].
    fn random_entry<R: Rand>(&self, rand: &mut R) -> CompareEntry<T>;

    /// Number of slots in the width-`T` table.
    fn table_len(&self) -> usize;
}

macro_rules! impl_integer_torc {
    ($ty:ty, $field:ident) => {
        impl IntegerTorc<$ty> for TablesOfRecentCompares {
            fn matching_entries(&self, val: $ty, min: $ty, max: $ty) -> Vec<$ty> {
                self.$field.matching_entries(val, min, max)
            }

            fn matching_entry(&self, val: $ty, idx: usize, min: $ty, max: $ty) -> Option<$ty> {
                self.$field.matching_entry(val, idx, min, max)
            }

            fn random_side<R: Rand>(
                &self,
                rand: &mut R,
                idx: usize,
                min: $ty,
                max: $ty,
            ) -> Option<$ty> {
                self.$field.random_side(rand, idx, min, max)
            }

            fn random_entry<R: Rand>(&self, rand: &mut R) -> CompareEntry<$ty> {
                self.$field.random_entry(rand)
            }

            fn table_len(&self) -> usize {
                self.$field.entries().len()
            }
        }
    };
}

impl_integer_torc!(u8, u8s);
impl_integer_torc!(u16, u16s);
impl_integer_torc!(u32, u32s);
impl_integer_torc!(u64, u64s);

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::{TableOfRecentlyComparedBuffers, TablesOfRecentCompares, TorcU16, TorcU32};
    use crate::dictionary::DictionaryEntry;
    use crate::rands::StdRand;

    #[test]
    fn inserted_pairs_match_in_both_directions() {
        let mut table = TorcU32::new();
        table.insert(0xDEAD, 0xBEEF);

        let matches = table.matching_entries(0xDEAD_u32, u32::MIN, u32::MAX);
        assert!(matches.contains(&0xBEEF));
        let matches = table.matching_entries(0xBEEF_u32, u32::MIN, u32::MAX);
        assert!(matches.contains(&0xDEAD));
    }

    #[test]
    fn range_bounds_filter_matches() {
        let mut table = TorcU32::new();
        table.insert(0xDEAD, 0xBEEF);
        assert!(table.matching_entries(0xBEEF_u32, 0, 0xFF).is_empty());
        assert_eq!(
            table.matching_entries(0xBEEF_u32, 0, 0xDEAD),
            vec![0xDEAD_u32]
        );
    }

    #[test]
    fn queries_are_idempotent() {
        let mut table = TorcU16::new();
        for i in 0..100u16 {
            table.insert(7, 1000 + i);
        }
        let mut first = table.matching_entries(7u16, u16::MIN, u16::MAX);
        let mut second = table.matching_entries(7u16, u16::MIN, u16::MAX);
        first.sort_unstable();
        second.sort_unstable();
        assert_eq!(first, second);
    }

    #[test]
    fn matches_are_deduplicated() {
        let mut table = TorcU16::new();
        for _ in 0..50 {
            table.insert(21, 42);
        }
        assert_eq!(table.matching_entries(21u16, u16::MIN, u16::MAX), vec![42]);
    }

    #[test]
    fn the_lcg_walk_covers_every_slot() {
        // Multiplier 1 mod 4, odd increment: full period over the
        // power-of-two table, so as many distinct pairs as slots all stay
        // addressable.
        let mut table = TorcU16::new();
        for i in 0..2048u16 {
            table.insert(i, 10000 + i);
        }
        for i in (0..2048u16).step_by(97) {
            let matches = table.matching_entries(i, u16::MIN, u16::MAX);
            assert!(matches.contains(&(10000 + i)), "lost pair {i}");
        }
    }

    #[test]
    fn wider_queries_cast_with_wrap_semantics() {
        let mut table = TablesOfRecentCompares::new();
        table.u8_table_mut().insert(0xAB, 0xCD);

        // A u32 query only matches when the zero-extended operand is equal.
        let matches = table.u8_table().matching_entries(0xAB_u32, u32::MIN, u32::MAX);
        assert!(matches.contains(&0xCD));
        let matches = table.u8_table().matching_entries(0x1AB_u32, u32::MIN, u32::MAX);
        assert!(matches.is_empty());
    }

    #[test]
    fn random_side_returns_both_operands_over_time() {
        let mut table = TorcU32::new();
        table.insert(11, 22);
        // Locate the slot the first insertion landed in.
        let idx = table
            .entries()
            .iter()
            .position(|e| e.lhs == 11)
            .unwrap();

        let mut rand = StdRand::with_seed(3);
        let mut seen = Vec::new();
        for _ in 0..100 {
            if let Some(side) = table.random_side::<u32, _>(&mut rand, idx, u32::MIN, u32::MAX) {
                if !seen.contains(&side) {
                    seen.push(side);
                }
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![11, 22]);

        // Out-of-range sides are suppressed.
        assert_eq!(
            table.random_side::<u32, _>(&mut rand, idx, 1000, 2000),
            None
        );
    }

    #[test]
    fn random_entry_draws_from_the_table() {
        let mut table = TorcU32::new();
        table.insert(5, 6);
        let mut rand = StdRand::with_seed(11);
        for _ in 0..10 {
            let entry = table.random_entry(&mut rand);
            assert!(entry.lhs == 0 || entry.lhs == 5);
        }
    }

    #[test]
    fn buffer_matches_carry_the_opposite_side_and_position() {
        let mut table = TableOfRecentlyComparedBuffers::new();
        table.insert(b"hello", b"world", 5);

        let val: Vec<u8> = b"xyzhelloabc".to_vec();
        let matches = table.matching_entries(&val);
        assert_eq!(
            matches,
            vec![DictionaryEntry {
                position_hint: Some(3),
                value: b"world".to_vec(),
            }]
        );

        let val: Vec<u8> = b"aworldz".to_vec();
        let matches = table.matching_entries(&val);
        assert_eq!(
            matches,
            vec![DictionaryEntry {
                position_hint: Some(1),
                value: b"hello".to_vec(),
            }]
        );
    }

    #[test]
    fn buffer_matches_require_the_full_needle() {
        let mut table = TableOfRecentlyComparedBuffers::new();
        table.insert(b"hello", b"world", 5);
        let val: Vec<u8> = b"hell".to_vec();
        assert!(table.matching_entries(&val).is_empty());
    }

    #[test]
    fn buffer_inserts_truncate_to_the_entry_capacity() {
        let mut table = TableOfRecentlyComparedBuffers::new();
        let long = [0x41u8; 200];
        table.insert(&long, &long, 200);
        let stored = table
            .entries()
            .iter()
            .find(|e| e.buf_size() != 0)
            .unwrap();
        assert_eq!(stored.buf_size(), 127);
        assert_eq!(stored.buf1(), &long[..127]);
        assert_eq!(stored.buf2(), &long[..127]);
    }

    #[test]
    fn wide_element_containers_match_on_element_boundaries() {
        let mut table = TableOfRecentlyComparedBuffers::new();
        // Two u16 elements, little-endian.
        table.insert(&[0x01, 0x02, 0x03, 0x04], &[0xAA, 0xBB, 0xCC, 0xDD], 4);

        let val: Vec<u16> = vec![0x9999, 0x0201, 0x0403, 0x7777];
        let matches = table.matching_entries(&val);
        assert_eq!(
            matches,
            vec![DictionaryEntry {
                position_hint: Some(1),
                value: vec![0xBBAA_u16, 0xDDCC],
            }]
        );

        // A 5-byte entry is not a whole number of u16 elements.
        let mut table = TableOfRecentlyComparedBuffers::new();
        table.insert(&[1, 2, 3, 4, 5], &[6, 7, 8, 9, 10], 5);
        assert!(table.matching_entries(&val).is_empty());
    }

    #[test]
    fn aggregate_tables_are_independent() {
        let mut torc = TablesOfRecentCompares::new();
        torc.u16_table_mut().insert(1, 2);
        torc.u64_table_mut().insert(3, 4);
        torc.buffer_table_mut().insert(b"ab", b"cd", 2);

        assert!(torc.u16_table().matching_entries(1u16, u16::MIN, u16::MAX).contains(&2));
        assert!(torc.u32_table().matching_entries(1u32, u32::MIN, u32::MAX).is_empty());
        assert!(torc.u64_table().matching_entries(3u64, u64::MIN, u64::MAX).contains(&4));

        let val: Vec<u8> = b"zabz".to_vec();
        assert_eq!(torc.buffer_table().matching_entries(&val).len(), 1);
    }
}
