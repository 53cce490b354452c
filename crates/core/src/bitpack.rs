//! Fixed-block bit-packing.
//!
//! Values are packed in blocks of [`BLOCK_SIZE`] = 64 entries, each entry
//! occupying exactly `bits` bits, little-endian within and across bytes.
//! For `k` values at `b` bits, `ceil(k*b/8)` bytes are emitted. Element `i`
//! is randomly addressable via [`fastpack_at`] without unpacking the block.
//!
//! A block whose values are all zero is encoded with `bits == ALL_EQUAL`
//! and contributes no data bytes; offset arithmetic alone reconstructs it.

/// Number of values per packing block.
pub const BLOCK_SIZE: usize = 64;

/// Marker for blocks of all-zero values; no payload is emitted.
pub const ALL_EQUAL: u8 = 0;

/// Number of bits needed to represent `value`.
#[inline]
pub const fn bits_required(value: u64) -> u8 {
    match value {
        0 => 0,
        v => (64 - v.leading_zeros()) as u8,
    }
}

/// Number of bytes occupied by `count` values at `bits` bits each.
#[inline]
pub const fn packed_len(count: usize, bits: u8) -> usize {
    (count * bits as usize + 7) / 8
}

/// Pack `values` at `bits` bits each, appending to `out`.
///
/// Every value must satisfy `value < 2^bits`; with `bits == ALL_EQUAL`
/// nothing is written and every value must be zero.
pub fn pack(values: &[u64], bits: u8, out: &mut Vec<u8>) {
    debug_assert!(bits <= 64);
    if bits == ALL_EQUAL {
        debug_assert!(values.iter().all(|&v| v == 0));
        return;
    }
    let start = out.len();
    out.resize(start + packed_len(values.len(), bits), 0);
    let buf = &mut out[start..];
    for (i, &v) in values.iter().enumerate() {
        debug_assert!(bits == 64 || v < (1u64 << bits));
        let bit_pos = i * bits as usize;
        let mut byte = bit_pos / 8;
        let mut shift = (bit_pos % 8) as u32;
        let mut rest = v;
        let mut remaining = u32::from(bits);
        while remaining > 0 {
            buf[byte] |= (rest << shift) as u8;
            let written = (8 - shift).min(remaining);
            rest >>= written;
            remaining -= written;
            shift = 0;
            byte += 1;
        }
    }
}

/// Unpack `count` values at `bits` bits each from the front of `buf`.
pub fn unpack(buf: &[u8], bits: u8, count: usize, out: &mut Vec<u64>) {
    out.clear();
    out.reserve(count);
    if bits == ALL_EQUAL {
        out.resize(count, 0);
        return;
    }
    for i in 0..count {
        out.push(fastpack_at(buf, i, bits));
    }
}

/// Random access to packed element `i`.
#[inline]
pub fn fastpack_at(buf: &[u8], i: usize, bits: u8) -> u64 {
    if bits == ALL_EQUAL {
        return 0;
    }
    let bit_pos = i * bits as usize;
    let mut byte = bit_pos / 8;
    let mut shift = (bit_pos % 8) as u32;
    let mut value = 0u64;
    let mut assembled = 0u32;
    let total = u32::from(bits);
    while assembled < total {
        let take = (8 - shift).min(total - assembled);
        let chunk = (u64::from(buf[byte]) >> shift) & ((1u64 << take) - 1);
        value |= chunk << assembled;
        assembled += take;
        shift = 0;
        byte += 1;
    }
    value
}

/// True when every value in the slice is zero.
#[inline]
pub fn all_zero(values: &[u64]) -> bool {
    values.iter().all(|&v| v == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packed_len() {
        assert_eq!(packed_len(64, 1), 8);
        assert_eq!(packed_len(64, 7), 56);
        assert_eq!(packed_len(3, 3), 2);
        assert_eq!(packed_len(0, 13), 0);
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 0);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
        assert_eq!(bits_required(u64::MAX), 64);
    }

    #[test]
    fn test_all_equal_block_is_empty() {
        let values = [0u64; BLOCK_SIZE];
        let mut out = Vec::new();
        pack(&values, ALL_EQUAL, &mut out);
        assert!(out.is_empty());
        let mut decoded = Vec::new();
        unpack(&out, ALL_EQUAL, BLOCK_SIZE, &mut decoded);
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_random_access_matches_unpack() {
        let values: Vec<u64> = (0..BLOCK_SIZE as u64).map(|i| i * 3 % 31).collect();
        let bits = bits_required(30);
        let mut out = Vec::new();
        pack(&values, bits, &mut out);
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(fastpack_at(&out, i, bits), v);
        }
    }

    proptest! {
        #[test]
        fn prop_pack_roundtrip(
            values in proptest::collection::vec(0u64..1 << 23, 1..=BLOCK_SIZE),
        ) {
            let max = values.iter().copied().max().unwrap_or(0);
            let bits = bits_required(max).max(1);
            let mut packed = Vec::new();
            pack(&values, bits, &mut packed);
            prop_assert_eq!(packed.len(), packed_len(values.len(), bits));
            let mut decoded = Vec::new();
            unpack(&packed, bits, values.len(), &mut decoded);
            prop_assert_eq!(decoded, values);
        }

        #[test]
        fn prop_full_width(values in proptest::collection::vec(any::<u64>(), 1..=BLOCK_SIZE)) {
            let mut packed = Vec::new();
            pack(&values, 64, &mut packed);
            let mut decoded = Vec::new();
            unpack(&packed, 64, values.len(), &mut decoded);
            prop_assert_eq!(decoded, values);
        }
    }
}
