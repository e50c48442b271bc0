//! MurmurHash3 (x86, 32-bit) used to place keys on segments.

/// Seed used by Hot Rod servers for key placement.
pub const KEY_HASH_SEED: u32 = 9001;

/// Hashes key bytes the way servers do for segment placement.
pub fn key_hash(key: &[u8]) -> i32 {
    murmur_hash3_x86_32(key, KEY_HASH_SEED)
}

/// MurmurHash3 x86 32-bit implementation.
pub fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> i32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);

    for block in &mut blocks {
        let k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h1 ^= mix_k1(k1, C1, C2);
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k1 = tail
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc ^ (u32::from(*b) << (8 * i)));
        h1 ^= mix_k1(k1, C1, C2);
    }

    h1 ^= data.len() as u32;
    fmix32(h1) as i32
}

fn mix_k1(k1: u32, c1: u32, c2: u32) -> u32 {
    k1.wrapping_mul(c1).rotate_left(15).wrapping_mul(c2)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vectors() {
        assert_eq!(murmur_hash3_x86_32(b"", 0), 0);
        assert_eq!(murmur_hash3_x86_32(b"", 1), 0x514E_28B7_u32 as i32);
        assert_eq!(murmur_hash3_x86_32(b"hello", 0), 0x248B_FA47_u32 as i32);
    }

    #[test]
    fn test_tail_lengths_differ() {
        let hashes: Vec<i32> = [&b"a"[..], b"ab", b"abc", b"abcd", b"abcde"]
            .iter()
            .map(|k| key_hash(k))
            .collect();
        let mut unique = hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), hashes.len());
    }
}
