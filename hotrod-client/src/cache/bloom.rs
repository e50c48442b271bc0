//! Bloom filter over marshalled keys.
//!
//! The bitmap is sent to the server as-is. Bit positions come from the
//! client's own murmur3 seeds and are not guaranteed to match the hash
//! functions of any particular server release.

use hotrod_core::hash::murmur_hash3_x86_32;

/// One murmur3 x86_32 seed per hash function.
const HASH_SEEDS: [u32; 3] = [0x9747_b28c, 0x2545_f491, 0x1b87_3593];

/// Fixed-size bloom filter of the keys held by a near cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u32,
}

impl BloomFilter {
    /// Creates an empty filter of `num_bits` bits (at least 8).
    pub fn new(num_bits: u32) -> Self {
        let num_bits = num_bits.max(8);
        Self {
            bits: vec![0; num_bits.div_ceil(8) as usize],
            num_bits,
        }
    }

    /// Size in bits.
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn positions(&self, key: &[u8]) -> [u32; 3] {
        let num_bits = self.num_bits;
        HASH_SEEDS.map(|seed| (murmur_hash3_x86_32(key, seed) as u32) % num_bits)
    }

    /// Records `key`.
    pub fn add(&mut self, key: &[u8]) {
        for p in self.positions(key) {
            self.bits[(p / 8) as usize] |= 1 << (p % 8);
        }
    }

    /// Returns `false` only if `key` was never added.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.positions(key)
            .iter()
            .all(|p| self.bits[(p / 8) as usize] & (1 << (p % 8)) != 0)
    }

    /// Resets every bit.
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = 0);
    }

    /// Little-endian bitmap as sent to the server.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_keys_are_found() {
        let mut filter = BloomFilter::new(1024);
        for i in 0..100u32 {
            filter.add(&i.to_be_bytes());
        }
        for i in 0..100u32 {
            assert!(filter.might_contain(&i.to_be_bytes()));
        }
    }

    #[test]
    fn test_empty_filter_contains_nothing() {
        let filter = BloomFilter::new(64);
        assert!(!filter.might_contain(b"anything"));
        assert_eq!(filter.to_bytes().len(), 8);
    }

    #[test]
    fn test_clear() {
        let mut filter = BloomFilter::new(64);
        filter.add(b"k");
        filter.clear();
        assert!(!filter.might_contain(b"k"));
    }

    #[test]
    fn test_each_key_sets_at_most_three_bits() {
        let mut filter = BloomFilter::new(4096);
        filter.add(b"isbn-0000000001");
        let set: u32 = filter.to_bytes().iter().map(|b| b.count_ones()).sum();
        assert!((1..=HASH_SEEDS.len() as u32).contains(&set));
    }

    #[test]
    fn test_minimum_size() {
        assert_eq!(BloomFilter::new(0).num_bits(), 8);
    }
}
