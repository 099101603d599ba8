//! A reproducible permutation of `[0, N)`, encodable as a single integer identifier so that
//! a peer can reconstruct it without the permutation itself ever crossing the wire
//! (spec.md §3, §4.2).

use rand::rngs::StdRng;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use std::rc::Rc;

use crate::key::Key;

/// Shared ownership of a [`Shuffle`]: every [`crate::block::Block`] created under the same
/// pass points at the same shuffle instance.
pub type SharedShuffle = Rc<Shuffle>;

pub const MAX_KEY_SIZE: u128 = 1_000_000_000;
pub const MAX_ALGORITHM: u128 = 100;
pub const MAX_SHUFFLE_SEED: u128 = 1_000_000_000_000;

/// The algorithm used to generate a shuffle's permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleAlgorithm {
    /// The identity permutation.
    KeepSame = 0,
    /// A Fisher-Yates permutation driven by a seeded PRNG.
    Random = 1,
}

/// A bijection of `[0, N)` onto itself: `shuffle_index -> key_index`.
#[derive(Debug, Clone)]
pub struct Shuffle {
    size: u32,
    algorithm: ShuffleAlgorithm,
    seed: u64,
    // shuffle_index -> key_index
    shuffle_to_key: Vec<u32>,
    // key_index -> shuffle_index
    key_to_shuffle: Vec<u32>,
}

impl Shuffle {
    /// Create a shuffle of `size` using `algorithm`. `seed` is ignored for
    /// [`ShuffleAlgorithm::KeepSame`]. For [`ShuffleAlgorithm::Random`] with `seed = None`, a
    /// seed is drawn uniformly from `[1, MAX_SHUFFLE_SEED)` using the thread-local RNG; seed 0
    /// is reserved to mean "keep same" and is never drawn.
    pub fn new(size: u32, algorithm: ShuffleAlgorithm, seed: Option<u64>) -> Shuffle {
        match algorithm {
            ShuffleAlgorithm::KeepSame => Self::identity(size),
            ShuffleAlgorithm::Random => {
                let seed = seed.unwrap_or_else(|| {
                    let mut thread_rng = rand::thread_rng();
                    thread_rng.gen_range(1..MAX_SHUFFLE_SEED as u64)
                });
                assert!(seed != 0, "seed 0 is reserved for the KEEP_SAME shuffle");
                Self::from_seed(size, seed)
            }
        }
    }

    fn identity(size: u32) -> Shuffle {
        let identity: Vec<u32> = (0..size).collect();
        Shuffle {
            size,
            algorithm: ShuffleAlgorithm::KeepSame,
            seed: 0,
            shuffle_to_key: identity.clone(),
            key_to_shuffle: identity,
        }
    }

    fn from_seed(size: u32, seed: u64) -> Shuffle {
        let mut shuffle_to_key: Vec<u32> = (0..size).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        shuffle_to_key.shuffle(&mut rng);
        let mut key_to_shuffle = vec![0u32; size as usize];
        for (shuffle_index, &key_index) in shuffle_to_key.iter().enumerate() {
            key_to_shuffle[key_index as usize] = shuffle_index as u32;
        }
        Shuffle {
            size,
            algorithm: ShuffleAlgorithm::Random,
            seed,
            shuffle_to_key,
            key_to_shuffle,
        }
    }

    /// Encode this shuffle as a single non-negative integer:
    /// `identifier = ((seed * MAX_ALGO) + algorithm) * MAX_KEY_SIZE + size`.
    pub fn identifier(&self) -> u128 {
        let algorithm = self.algorithm as u128;
        let seed = self.seed as u128;
        ((seed * MAX_ALGORITHM) + algorithm) * MAX_KEY_SIZE + self.size as u128
    }

    /// Reconstruct a shuffle byte-for-byte from an identifier produced by [`Self::identifier`].
    pub fn from_identifier(identifier: u128) -> Shuffle {
        let size = (identifier % MAX_KEY_SIZE) as u32;
        let rest = identifier / MAX_KEY_SIZE;
        let algorithm = (rest % MAX_ALGORITHM) as u8;
        let seed = (rest / MAX_ALGORITHM) as u64;
        if seed == 0 {
            Self::identity(size)
        } else {
            debug_assert_eq!(algorithm, ShuffleAlgorithm::Random as u8);
            Self::from_seed(size, seed)
        }
    }

    pub fn get_size(&self) -> u32 {
        self.size
    }

    pub fn get_seed(&self) -> u64 {
        self.seed
    }

    pub fn algorithm(&self) -> ShuffleAlgorithm {
        self.algorithm
    }

    /// Map a shuffle index to the key index it refers to.
    pub fn key_index(&self, shuffle_index: u32) -> u32 {
        self.shuffle_to_key[shuffle_index as usize]
    }

    /// Map a key index back to the shuffle index it appears at.
    pub fn shuffle_index(&self, key_index: u32) -> u32 {
        self.key_to_shuffle[key_index as usize]
    }

    pub fn get_bit(&self, key: &Key, shuffle_index: u32) -> u8 {
        key.get_bit(self.key_index(shuffle_index))
    }

    pub fn set_bit(&self, key: &mut Key, shuffle_index: u32, value: u8) {
        key.set_bit(self.key_index(shuffle_index), value);
    }

    pub fn flip_bit(&self, key: &mut Key, shuffle_index: u32) {
        key.flip_bit(self.key_index(shuffle_index));
    }

    /// XOR of `key.get_bit(map(i))` for `i` in `[start, end)`.
    pub fn calculate_parity(&self, key: &Key, start: u32, end: u32) -> u8 {
        let mut parity = 0u8;
        for shuffle_index in start..end {
            if self.get_bit(key, shuffle_index) == 1 {
                parity ^= 1;
            }
        }
        parity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_same_is_identity() {
        let shuffle = Shuffle::new(8, ShuffleAlgorithm::KeepSame, None);
        for i in 0..8 {
            assert_eq!(shuffle.key_index(i), i);
        }
        let key = Key::from("10111010");
        assert_eq!(shuffle.calculate_parity(&key, 3, 6), 0);
    }

    #[test]
    fn test_random_shuffle_is_bijective() {
        let shuffle = Shuffle::new(100, ShuffleAlgorithm::Random, Some(42));
        let mut seen = vec![false; 100];
        for shuffle_index in 0..100 {
            let key_index = shuffle.key_index(shuffle_index);
            assert!(!seen[key_index as usize]);
            seen[key_index as usize] = true;
            assert_eq!(shuffle.shuffle_index(key_index), shuffle_index);
        }
        assert!(seen.iter().all(|&x| x));
    }

    #[test]
    fn test_identifier_round_trip() {
        let shuffle = Shuffle::new(12345, ShuffleAlgorithm::Random, Some(67890));
        let identifier = shuffle.identifier();
        let restored = Shuffle::from_identifier(identifier);
        assert_eq!(shuffle.size, restored.size);
        assert_eq!(shuffle.seed, restored.seed);
        assert_eq!(shuffle.shuffle_to_key, restored.shuffle_to_key);
    }

    #[test]
    fn test_identifier_round_trip_keep_same() {
        let shuffle = Shuffle::new(10, ShuffleAlgorithm::KeepSame, None);
        let identifier = shuffle.identifier();
        let restored = Shuffle::from_identifier(identifier);
        assert_eq!(restored.algorithm(), ShuffleAlgorithm::KeepSame);
        assert_eq!(shuffle.shuffle_to_key, restored.shuffle_to_key);
    }

    #[test]
    fn test_deterministic_replay() {
        let a = Shuffle::new(5000, ShuffleAlgorithm::Random, Some(999));
        let b = Shuffle::new(5000, ShuffleAlgorithm::Random, Some(999));
        assert_eq!(a.shuffle_to_key, b.shuffle_to_key);
    }
}
