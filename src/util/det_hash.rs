//! Deterministic hash map.
//!
//! The identity index over `(type, dir, out, name, ext)` target keys and the
//! rule registry's scope maps use a fixed-seed hasher so that iteration
//! order — and therefore the order in which candidate rules are listed in
//! an "ambiguous rule" diagnostic, or targets are reported in a cycle chain
//! — is stable across runs and platforms. This is not cryptographic; it
//! exists purely for reproducibility.

use hashbrown::HashMap;
use std::hash::{BuildHasherDefault, Hasher};

/// A fixed-seed FNV-1a hasher.
#[derive(Default)]
pub struct DetHasher(u64);

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl Hasher for DetHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut hash = if self.0 == 0 { FNV_OFFSET } else { self.0 };
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        self.0 = hash;
    }
}

/// A `BuildHasher` that always produces [`DetHasher`].
pub type DetBuildHasher = BuildHasherDefault<DetHasher>;

/// A `HashMap` with deterministic iteration order across runs (not across
/// insertion order changes).
pub type DetHashMap<K, V> = HashMap<K, V, DetBuildHasher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_across_instances() {
        let mut a: DetHashMap<&str, i32> = DetHashMap::default();
        let mut b: DetHashMap<&str, i32> = DetHashMap::default();
        for (k, v) in [("x", 1), ("y", 2), ("z", 3)] {
            a.insert(k, v);
            b.insert(k, v);
        }
        let order_a: Vec<_> = a.keys().collect();
        let order_b: Vec<_> = b.keys().collect();
        assert_eq!(order_a, order_b);
    }
}
