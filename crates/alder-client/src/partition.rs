//! Key-to-partition mapping.
//!
//! A single logical primitive is striped over an ordered list of partitions.
//! The mapping from a key (or a primitive name, for single-partition
//! primitives) to a partition index must be deterministic, uniform in
//! expectation, and stable across processes so that independent clients
//! agree on which partition owns a key.

use crate::error::ClientError;

/// Index into the client's ordered partition list.
pub type PartitionId = u32;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Map a key to a partition index in `[0, partitions)`.
///
/// The hash is FNV-1a: non-cryptographic, uniform, and fully specified, so
/// the mapping does not drift between builds or hosts the way
/// `DefaultHasher` may.
pub fn partition_index(key: &str, partitions: usize) -> Result<usize, ClientError> {
    if partitions == 0 {
        return Err(ClientError::NoPartitions);
    }
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    Ok((hash % partitions as u64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_index_deterministic() {
        for key in ["", "a", "user:123", "事件"] {
            let first = partition_index(key, 7).unwrap();
            let second = partition_index(key, 7).unwrap();
            assert_eq!(first, second, "mapping must be stable for {key:?}");
        }
    }

    #[test]
    fn test_partition_index_in_range() {
        for n in 1..=16 {
            for i in 0..100 {
                let key = format!("key_{i}");
                let index = partition_index(&key, n).unwrap();
                assert!(index < n, "index {index} out of range for {n} partitions");
            }
        }
    }

    #[test]
    fn test_partition_index_single_partition() {
        assert_eq!(partition_index("anything", 1).unwrap(), 0);
    }

    #[test]
    fn test_partition_index_no_partitions() {
        assert!(matches!(partition_index("k", 0), Err(ClientError::NoPartitions)));
    }

    #[test]
    fn test_partition_index_spreads_keys() {
        let mut seen = [false; 4];
        for i in 0..200 {
            let key = format!("key_{i}");
            seen[partition_index(&key, 4).unwrap()] = true;
        }
        assert!(seen.iter().all(|hit| *hit), "200 keys should touch all 4 partitions");
    }
}
