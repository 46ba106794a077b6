//! Key-hash partitioning compatible with the Kafka Java client

use super::broker::PartitionId;

const SEED: u32 = 0x9747_b28c;
const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

/// 32-bit murmur2 as used by Kafka's default partitioner
pub fn murmur2(data: &[u8]) -> u32 {
    let length = data.len() as u32;
    let mut h = SEED ^ length;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Partition for `key` among `partitions` (sorted partition ids)
pub fn partition_for(key: &[u8], partitions: &[PartitionId]) -> Option<PartitionId> {
    if partitions.is_empty() {
        return None;
    }
    let positive = murmur2(key) & 0x7fff_ffff;
    let index = positive as usize % partitions.len();
    Some(partitions[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // Reference values from the Kafka Java client's Utils.murmur2
    #[rstest]
    #[case(b"21", -973932308)]
    #[case(b"foobar", -790332482)]
    #[case(b"a-little-bit-long-string", -985981536)]
    #[case(b"a-little-bit-longer-string", -1486304829)]
    #[case(b"lkjh234lh9fiuh90y23oiuhsafujhadof229phr9h19h89h8", -58897971)]
    #[case(b"abc", 479470107)]
    fn test_murmur2_matches_java_client(#[case] key: &[u8], #[case] expected: i32) {
        assert_eq!(murmur2(key) as i32, expected);
    }

    #[test]
    fn test_same_key_same_partition() {
        let partitions = [0, 1, 2, 3, 4, 5];
        let first = partition_for(b"event-id", &partitions);
        assert!(first.is_some());
        for _ in 0..10 {
            assert_eq!(partition_for(b"event-id", &partitions), first);
        }
    }

    #[test]
    fn test_no_partitions() {
        assert_eq!(partition_for(b"x", &[]), None);
    }
}
