use serde::{Deserialize, Serialize};

/// Seeded LCG. Same seed, same DAG, on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        // low LCG bits have short periods
        self.state >> 16
    }

    /// Next value in `[0, upper_exclusive)`, or 0 for an empty range.
    pub const fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Uniform index into a slice of length `len`.
    pub fn next_index(&mut self, len: usize) -> usize {
        usize::try_from(self.next_bounded(len as u64)).unwrap_or(0)
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_index(i + 1);
            items.swap(i, j);
        }
    }

    /// Fork an independent stream, e.g. one per replay order.
    pub const fn fork(&mut self, salt: u64) -> Self {
        Self::new(self.next_u64() ^ salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = DeterministicRng::new(7);
        let mut b = DeterministicRng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn bounded_stays_in_range() {
        let mut rng = DeterministicRng::new(1);
        assert_eq!(rng.next_bounded(0), 0);
        for _ in 0..1000 {
            assert!(rng.next_bounded(13) < 13);
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = DeterministicRng::new(99);
        let mut items: Vec<u32> = (0..50).collect();
        rng.shuffle(&mut items);
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }
}
