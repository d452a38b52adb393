//! Auto-dictionaries mined from the tables of recent compares.
//!
//! During mutation the engine asks: "which values did the target recently
//! compare my input against?". The answers become dictionary entries the
//! mutator can splice in, optionally at the position where the matched
//! half was found.

use alloc::vec::Vec;
use core::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::rands::Rand;
use crate::torc::{CmpInteger, IntegerTorc, TablesOfRecentCompares};

/// A candidate mutation value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DictionaryEntry<C> {
    /// Index in the input where the matched needle was found, if any.
    pub position_hint: Option<usize>,
    /// Entry content.
    pub value: C,
}

/// An ordered sequence of unsigned integers with a little-endian byte view.
///
/// Recorded comparison buffers are raw bytes; containers of wider elements
/// decode them little-endian, so the same recorded pair can enrich byte
/// inputs and wide-element inputs alike.
pub trait DictionaryContainer: Clone + Eq + Hash + core::fmt::Debug {
    /// The element type of the sequence.
    type Element: CmpInteger;

    /// The elements, in order.
    fn elements(&self) -> &[Self::Element];

    /// Decodes a little-endian byte buffer. `bytes.len()` must be a
    /// multiple of the element width.
    fn from_le_bytes(bytes: &[u8]) -> Self;
}

impl DictionaryContainer for Vec<u8> {
    type Element = u8;

    fn elements(&self) -> &[u8] {
        self
    }

    fn from_le_bytes(bytes: &[u8]) -> Self {
        bytes.to_vec()
    }
}

macro_rules! impl_wide_dictionary_container {
    ($ty:ty) => {
        impl DictionaryContainer for Vec<$ty> {
            type Element = $ty;

            fn elements(&self) -> &[$ty] {
                self
            }

            fn from_le_bytes(bytes: &[u8]) -> Self {
                debug_assert_eq!(bytes.len() % core::mem::size_of::<$ty>(), 0);
                bytes
                    .chunks_exact(core::mem::size_of::<$ty>())
                    .map(|chunk| <$ty>::from_le_bytes(chunk.try_into().unwrap()))
                    .collect()
            }
        }
    };
}

impl_wide_dictionary_container!(u16);
impl_wide_dictionary_container!(u32);
impl_wide_dictionary_container!(u64);

/// Matches one recorded buffer pair against `val`.
///
/// If `buf1` occurs in `val` as a contiguous run of `val`'s elements, the
/// entry carries `buf2` (and vice versa), with the hint pointing at the
/// first occurrence. Pairs whose size is zero, not a whole number of
/// elements, or longer than `val` cannot match.
pub fn matching_container_entry<C: DictionaryContainer>(
    val: &C,
    buf1: &[u8],
    buf2: &[u8],
) -> Option<DictionaryEntry<C>> {
    let buf_size = buf1.len();
    debug_assert_eq!(buf_size, buf2.len());
    if buf_size == 0 || buf_size % C::Element::WIDTH != 0 {
        return None;
    }
    let elements = val.elements();
    if elements.len() * C::Element::WIDTH < buf_size {
        return None;
    }
    if let Some(position) = find_needle::<C>(elements, buf1) {
        return Some(DictionaryEntry {
            position_hint: Some(position),
            value: C::from_le_bytes(buf2),
        });
    }
    if let Some(position) = find_needle::<C>(elements, buf2) {
        return Some(DictionaryEntry {
            position_hint: Some(position),
            value: C::from_le_bytes(buf1),
        });
    }
    None
}

/// Picks one side of a recorded buffer pair with a fair coin, without
/// looking for an occurrence in `val` (so no position hint).
pub fn random_container_side<C: DictionaryContainer, R: Rand>(
    rand: &mut R,
    buf1: &[u8],
    buf2: &[u8],
) -> Option<DictionaryEntry<C>> {
    let buf_size = buf1.len();
    debug_assert_eq!(buf_size, buf2.len());
    if buf_size == 0 || buf_size % C::Element::WIDTH != 0 {
        return None;
    }
    let value = if rand.coinflip(0.5) {
        C::from_le_bytes(buf1)
    } else {
        C::from_le_bytes(buf2)
    };
    Some(DictionaryEntry {
        position_hint: None,
        value,
    })
}

fn find_needle<C: DictionaryContainer>(
    haystack: &[C::Element],
    needle_bytes: &[u8],
) -> Option<usize> {
    let needle = C::from_le_bytes(needle_bytes);
    let needle = needle.elements();
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Matches the little-endian byte view of one recorded integer pair
/// against `val`.
fn matching_integer_pair<C: DictionaryContainer, I: CmpInteger>(
    val: &C,
    lhs: I,
    rhs: I,
) -> Option<DictionaryEntry<C>> {
    let lhs_bytes = lhs.to_u64().to_le_bytes();
    let rhs_bytes = rhs.to_u64().to_le_bytes();
    matching_container_entry(val, &lhs_bytes[..I::WIDTH], &rhs_bytes[..I::WIDTH])
}

/// Candidate integer values mined from the comparison tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegerDictionary<T> {
    entries: Vec<T>,
}

impl<T> IntegerDictionary<T> {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a caller-provided entry.
    pub fn add_entry(&mut self, val: T) {
        self.entries.push(val);
    }

    /// Whether the dictionary holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of saved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The saved entries.
    #[must_use]
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// A uniformly random saved entry.
    ///
    /// # Panics
    ///
    /// Panics if the dictionary is empty; check [`IntegerDictionary::is_empty`]
    /// first.
    pub fn random_saved_entry<R: Rand>(&self, rand: &mut R) -> T
    where
        T: Copy,
    {
        self.entries[rand.below(self.entries.len() as u64) as usize]
    }
}

impl<T> Default for IntegerDictionary<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntegerDictionary<T>
where
    T: CmpInteger,
    TablesOfRecentCompares: IntegerTorc<T>,
{
    /// Replaces the current contents with every value of the width-`T`
    /// table compared against `val`, restricted to `[min, max]`.
    pub fn match_from_torc(&mut self, val: T, torc: &TablesOfRecentCompares, min: T, max: T) {
        self.entries = torc.matching_entries(val, min, max);
        log::trace!(
            "integer dictionary: {} entries mined from recent compares",
            self.entries.len()
        );
    }

    /// One-shot random probe: draws one slot of the width-`T` table, tries
    /// the exact match against `val` first and falls back to a random side
    /// of that slot. Either way the result is filtered to `[min, max]`.
    pub fn random_torc_entry<R: Rand>(
        val: T,
        rand: &mut R,
        torc: &TablesOfRecentCompares,
        min: T,
        max: T,
    ) -> Option<T> {
        let len = <TablesOfRecentCompares as IntegerTorc<T>>::table_len(torc);
        let idx = rand.below(len as u64) as usize;
        torc.matching_entry(val, idx, min, max)
            .or_else(|| torc.random_side(rand, idx, min, max))
    }
}

/// Candidate element sequences mined from the comparison tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDictionary<C> {
    entries: Vec<DictionaryEntry<C>>,
}

impl<C> ContainerDictionary<C> {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a caller-provided entry.
    pub fn add_entry(&mut self, entry: DictionaryEntry<C>) {
        self.entries.push(entry);
    }

    /// Whether the dictionary holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of saved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The saved entries.
    #[must_use]
    pub fn entries(&self) -> &[DictionaryEntry<C>] {
        &self.entries
    }

    /// A uniformly random saved entry.
    ///
    /// # Panics
    ///
    /// Panics if the dictionary is empty; check
    /// [`ContainerDictionary::is_empty`] first.
    pub fn random_saved_entry<R: Rand>(&self, rand: &mut R) -> &DictionaryEntry<C> {
        &self.entries[rand.below(self.entries.len() as u64) as usize]
    }
}

impl<C> Default for ContainerDictionary<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: DictionaryContainer> ContainerDictionary<C> {
    /// Replaces the current contents with every buffer-table match against
    /// `val`, then appends matches of integer entries viewed as
    /// little-endian buffers.
    pub fn match_from_torc(&mut self, val: &C, torc: &TablesOfRecentCompares) {
        self.entries = torc.buffer_table().matching_entries(val);
        self.add_integer_matches(val, torc);
        log::trace!(
            "container dictionary: {} entries mined from recent compares",
            self.entries.len()
        );
    }

    // Integer comparisons often concern values the target widened
    // implicitly, which hides them from same-width matching; 64-bit entries
    // are therefore also demoted to 32 bits before matching. Promotions are
    // not attempted.
    fn add_integer_matches(&mut self, val: &C, torc: &TablesOfRecentCompares) {
        if C::Element::WIDTH <= 4 && val.elements().len() >= 4 {
            for entry in torc.u32_table().entries() {
                if let Some(found) = matching_integer_pair(val, entry.lhs, entry.rhs) {
                    self.entries.push(found);
                }
            }
            for entry in torc.u64_table().entries() {
                if let Some(found) = matching_integer_pair(val, entry.lhs as u32, entry.rhs as u32)
                {
                    self.entries.push(found);
                }
            }
        }
        if C::Element::WIDTH <= 8 && val.elements().len() >= 8 {
            for entry in torc.u64_table().entries() {
                if let Some(found) = matching_integer_pair(val, entry.lhs, entry.rhs) {
                    self.entries.push(found);
                }
            }
        }
    }

    /// One-shot random probe across the buffer and integer tables.
    ///
    /// A fair coin picks between the buffer table (exact match on a random
    /// slot, then a random side of it) and the integer tables; element
    /// widths up to 4 split evenly between a `u32` slot, a demoted `u64`
    /// slot and a raw `u64` slot, wider elements always draw a raw `u64`
    /// slot.
    pub fn random_torc_entry<R: Rand>(
        val: &C,
        rand: &mut R,
        torc: &TablesOfRecentCompares,
    ) -> Option<DictionaryEntry<C>> {
        if rand.coinflip(0.5) {
            let entry = torc.buffer_table().random_entry(rand);
            matching_container_entry(val, entry.buf1(), entry.buf2())
                .or_else(|| random_container_side(rand, entry.buf1(), entry.buf2()))
        } else if C::Element::WIDTH <= 4 {
            match rand.below(3) {
                0 => {
                    let entry = torc.u32_table().random_entry(rand);
                    matching_integer_pair(val, entry.lhs, entry.rhs)
                }
                1 => {
                    let entry = torc.u64_table().random_entry(rand);
                    matching_integer_pair(val, entry.lhs as u32, entry.rhs as u32)
                }
                _ => {
                    let entry = torc.u64_table().random_entry(rand);
                    matching_integer_pair(val, entry.lhs, entry.rhs)
                }
            }
        } else {
            let entry = torc.u64_table().random_entry(rand);
            matching_integer_pair(val, entry.lhs, entry.rhs)
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::{
        matching_container_entry, random_container_side, ContainerDictionary, DictionaryEntry,
        IntegerDictionary,
    };
    use crate::rands::StdRand;
    use crate::torc::TablesOfRecentCompares;

    #[test]
    fn integer_dictionary_mines_the_matching_width() {
        let mut torc = TablesOfRecentCompares::new();
        torc.u32_table_mut().insert(0xDEAD, 0xBEEF);
        torc.u16_table_mut().insert(7, 8);

        let mut dict = IntegerDictionary::<u32>::new();
        dict.match_from_torc(0xDEAD, &torc, u32::MIN, u32::MAX);
        assert_eq!(dict.entries(), &[0xBEEF]);

        dict.match_from_torc(0xBEEF, &torc, 0, 0xFF);
        assert!(dict.is_empty());
    }

    #[test]
    fn integer_dictionary_tracks_user_entries() {
        let mut dict = IntegerDictionary::<u16>::new();
        assert!(dict.is_empty());
        dict.add_entry(42);
        dict.add_entry(43);
        assert_eq!(dict.len(), 2);

        let mut rand = StdRand::with_seed(5);
        for _ in 0..10 {
            let drawn = dict.random_saved_entry(&mut rand);
            assert!(drawn == 42 || drawn == 43);
        }
    }

    #[test]
    fn integer_random_probe_prefers_the_exact_match() {
        let mut torc = TablesOfRecentCompares::new();
        // Fill every u64 slot with the same pair so any random draw hits it.
        for _ in 0..512 {
            torc.u64_table_mut().insert(1111, 2222);
        }
        let mut rand = StdRand::with_seed(9);
        let found =
            IntegerDictionary::<u64>::random_torc_entry(1111, &mut rand, &torc, u64::MIN, u64::MAX);
        assert_eq!(found, Some(2222));
    }

    #[test]
    fn integer_random_probe_falls_back_to_a_random_side() {
        let mut torc = TablesOfRecentCompares::new();
        for _ in 0..512 {
            torc.u64_table_mut().insert(1111, 2222);
        }
        let mut rand = StdRand::with_seed(10);
        // 999 matches neither side, so only the fallback can produce values.
        let mut seen = Vec::new();
        for _ in 0..100 {
            if let Some(side) =
                IntegerDictionary::<u64>::random_torc_entry(999, &mut rand, &torc, 1000, 3000)
            {
                if !seen.contains(&side) {
                    seen.push(side);
                }
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1111, 2222]);
    }

    #[test]
    fn container_dictionary_mines_buffers_and_integers() {
        let mut torc = TablesOfRecentCompares::new();
        torc.buffer_table_mut().insert(b"hello", b"world", 5);
        torc.u32_table_mut().insert(0x0201, 0x0809);

        // Contains "hello" at 3 and the little-endian bytes of 0x0201 at 8.
        let val: Vec<u8> = b"xyzhello\x01\x02\x00\x00".to_vec();
        let mut dict = ContainerDictionary::<Vec<u8>>::new();
        dict.match_from_torc(&val, &torc);

        assert!(dict.entries().contains(&DictionaryEntry {
            position_hint: Some(3),
            value: b"world".to_vec(),
        }));
        assert!(dict.entries().contains(&DictionaryEntry {
            position_hint: Some(8),
            value: vec![0x09, 0x08, 0x00, 0x00],
        }));
    }

    #[test]
    fn container_dictionary_demotes_wide_integer_entries() {
        let mut torc = TablesOfRecentCompares::new();
        torc.u64_table_mut().insert(0x1_0000_ABCD, 0x1_0000_1234);

        // Contains the little-endian bytes of 0xABCD as a u32, not the full
        // u64, so only the demoted view can match.
        let val: Vec<u8> = vec![0xFF, 0xCD, 0xAB, 0x00, 0x00, 0xEE];
        let mut dict = ContainerDictionary::<Vec<u8>>::new();
        dict.match_from_torc(&val, &torc);

        assert!(dict.entries().contains(&DictionaryEntry {
            position_hint: Some(1),
            value: vec![0x34, 0x12, 0x00, 0x00],
        }));
        // The raw u64 needle is 8 bytes and cannot occur in 6.
        assert!(dict
            .entries()
            .iter()
            .all(|entry| entry.value.len() == 4));
    }

    #[test]
    fn container_dictionary_skips_integer_mining_for_short_inputs() {
        let mut torc = TablesOfRecentCompares::new();
        torc.u32_table_mut().insert(0x0201, 0x0809);

        let val: Vec<u8> = vec![0x01, 0x02];
        let mut dict = ContainerDictionary::<Vec<u8>>::new();
        dict.match_from_torc(&val, &torc);
        assert!(dict.is_empty());
    }

    #[test]
    fn container_random_probe_reaches_the_buffer_table() {
        let mut torc = TablesOfRecentCompares::new();
        for _ in 0..128 {
            torc.buffer_table_mut().insert(b"key1", b"key2", 4);
        }
        let val: Vec<u8> = b"__key1__".to_vec();
        let mut rand = StdRand::with_seed(21);
        let mut hits = 0;
        for _ in 0..50 {
            if let Some(entry) = ContainerDictionary::random_torc_entry(&val, &mut rand, &torc) {
                if entry.position_hint == Some(2) {
                    assert_eq!(entry.value, b"key2".to_vec());
                    hits += 1;
                }
            }
        }
        assert!(hits > 0);
    }

    #[test]
    fn container_random_probe_reaches_the_integer_tables() {
        let mut torc = TablesOfRecentCompares::new();
        for _ in 0..1024 {
            torc.u32_table_mut().insert(0x0605_0403, 0x0A0B_0C0D);
        }
        let val: Vec<u8> = vec![0x00, 0x03, 0x04, 0x05, 0x06, 0x00];
        let mut rand = StdRand::with_seed(22);
        let mut hits = 0;
        for _ in 0..100 {
            if let Some(entry) = ContainerDictionary::random_torc_entry(&val, &mut rand, &torc) {
                assert_eq!(entry.position_hint, Some(1));
                assert_eq!(entry.value, vec![0x0D, 0x0C, 0x0B, 0x0A]);
                hits += 1;
            }
        }
        assert!(hits > 0);
    }

    #[test]
    fn wide_element_dictionaries_match_whole_elements() {
        let mut torc = TablesOfRecentCompares::new();
        torc.buffer_table_mut()
            .insert(&[0x01, 0x02, 0x03, 0x04], &[0x05, 0x06, 0x07, 0x08], 4);

        let val: Vec<u16> = vec![0xAAAA, 0x0201, 0x0403, 0xBBBB];
        let mut dict = ContainerDictionary::<Vec<u16>>::new();
        dict.match_from_torc(&val, &torc);
        assert!(dict.entries().contains(&DictionaryEntry {
            position_hint: Some(1),
            value: vec![0x0605_u16, 0x0807],
        }));
    }

    #[test]
    fn container_matching_rejects_misshapen_pairs() {
        let val: Vec<u16> = vec![0x0201, 0x0403];
        // Not a whole number of u16 elements.
        assert_eq!(matching_container_entry(&val, &[1, 2, 3], &[4, 5, 6]), None);
        // Empty pair.
        assert_eq!(matching_container_entry(&val, &[], &[]), None);
        // Longer than the input.
        assert_eq!(
            matching_container_entry(
                &val,
                &[1, 2, 3, 4, 5, 6],
                &[7, 8, 9, 10, 11, 12]
            ),
            None
        );
    }

    #[test]
    fn random_container_side_returns_either_buffer() {
        let mut rand = StdRand::with_seed(33);
        let mut seen: Vec<Vec<u8>> = Vec::new();
        for _ in 0..50 {
            let entry: DictionaryEntry<Vec<u8>> =
                random_container_side(&mut rand, b"aa", b"bb").unwrap();
            assert_eq!(entry.position_hint, None);
            if !seen.contains(&entry.value) {
                seen.push(entry.value);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![b"aa".to_vec(), b"bb".to_vec()]);
        assert_eq!(
            random_container_side::<Vec<u8>, _>(&mut rand, &[], &[]),
            None
        );
    }
}
