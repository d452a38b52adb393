//! Pseudo-random number generation for dictionary sampling.
//!
//! Nothing here is cryptographically secure. Fuzzing wants speed and
//! reproducibility from a seed, nothing more.

use core::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The standard [`Rand`] implementation of this crate.
pub type StdRand = RomuDuoJrRand;

/// Returns a fresh pseudo-random seed.
#[cfg(feature = "std")]
#[must_use]
pub fn random_seed() -> u64 {
    use std::{
        collections::hash_map::RandomState,
        hash::{BuildHasher, Hasher},
    };
    RandomState::new().build_hasher().finish()
}

/// Returns a fresh pseudo-random seed.
///
/// Without `std` there is no entropy source, so seeds are drawn from a
/// single deterministic process-wide sequence.
#[cfg(not(feature = "std"))]
#[must_use]
pub fn random_seed() -> u64 {
    use core::sync::atomic::{AtomicU64, Ordering};
    static SEED_COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut seed = SEED_COUNTER.fetch_add(1, Ordering::Relaxed);
    splitmix64(&mut seed)
}

// https://prng.di.unimi.it/splitmix64.c
fn splitmix64(x: &mut u64) -> u64 {
    *x = x.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Faster and almost unbiased alternative to `rand % n`.
///
/// See: [An optimal algorithm for bounded random integers](https://github.com/apple/swift/pull/39143).
#[inline]
#[must_use]
pub fn fast_bound(rand: u64, n: u64) -> u64 {
    let mul = u128::from(rand).wrapping_mul(u128::from(n));
    (mul >> 64) as u64
}

/// Ways to get random around here.
pub trait Rand: Debug + Serialize + DeserializeOwned {
    /// Sets the seed of this Rand.
    fn set_seed(&mut self, seed: u64);

    /// Gets the next 64 bit value.
    fn next(&mut self) -> u64;

    /// Gets a value below the given bound (exclusive).
    #[inline]
    fn below(&mut self, upper_bound_excl: u64) -> u64 {
        fast_bound(self.next(), upper_bound_excl)
    }

    /// Gets a value between the given lower bound (inclusive) and upper
    /// bound (inclusive).
    #[inline]
    fn between(&mut self, lower_bound_incl: u64, upper_bound_incl: u64) -> u64 {
        debug_assert!(lower_bound_incl <= upper_bound_incl);
        lower_bound_incl + self.below(upper_bound_incl - lower_bound_incl + 1)
    }

    /// Gets a value between 0.0 (inclusive) and 1.0 (exclusive).
    #[inline]
    #[allow(clippy::cast_precision_loss)]
    fn next_float(&mut self) -> f64 {
        // both 2^53 and 2^-53 can be represented in f64 exactly
        const MAX: u64 = 1u64 << 53;
        const MAX_DIV: f64 = 1.0 / (MAX as f64);
        let u = self.next() & MAX.wrapping_sub(1);
        u as f64 * MAX_DIV
    }

    /// Returns true with the specified probability.
    #[inline]
    fn coinflip(&mut self, success_prob: f64) -> bool {
        debug_assert!((0.0..=1.0).contains(&success_prob));
        self.next_float() < success_prob
    }

    /// Chooses an item at random from the given iterator, sampling uniformly.
    ///
    /// Will only return `None` for an empty iterator.
    fn choose<I>(&mut self, from: I) -> Option<I::Item>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
    {
        let mut iter = from.into_iter();
        let len = iter.len();
        if len == 0 {
            return None;
        }
        iter.nth(self.below(len as u64) as usize)
    }
}

/// Extremely quick rand implementation,
/// see <https://arxiv.org/pdf/2002.11331.pdf>.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct RomuDuoJrRand {
    x_state: u64,
    y_state: u64,
}

impl RomuDuoJrRand {
    /// Creates a new `RomuDuoJrRand` with the given seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let mut rand = Self {
            x_state: 0,
            y_state: 0,
        };
        rand.set_seed(seed);
        rand
    }

    /// Creates a generator seeded with [`random_seed`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(random_seed())
    }
}

impl Default for RomuDuoJrRand {
    /// Creates a generator seeded with [`random_seed`].
    fn default() -> Self {
        Self::new()
    }
}

impl Rand for RomuDuoJrRand {
    fn set_seed(&mut self, mut seed: u64) {
        self.x_state = splitmix64(&mut seed);
        self.y_state = splitmix64(&mut seed);
    }

    #[inline]
    #[allow(clippy::unreadable_literal)]
    fn next(&mut self) -> u64 {
        let xp = self.x_state;
        self.x_state = 15241094284759029579_u64.wrapping_mul(self.y_state);
        self.y_state = self.y_state.wrapping_sub(xp).rotate_left(27);
        xp
    }
}
