const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// Computes the shard owning `key` with 64-bit FNV-1 modulo `shard_count`.
///
/// Every node must use this exact function; nodes hashing differently disagree on
/// ownership without noticing.
pub fn stable_shard_for(key: &[u8], shard_count: u32) -> u32 {
    if shard_count == 0 {
        return 0;
    }
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= *byte as u64;
    }
    (hash % shard_count as u64) as u32
}
