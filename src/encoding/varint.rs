//! Variable-length integers.
//!
//! Unsigned values use LEB128: seven data bits per byte, least significant
//! group first, high bit set on every byte but the last. Signed values are
//! zigzag-mapped first so small magnitudes of either sign stay short:
//! 0 → 0, -1 → 1, 1 → 2, -2 → 3, ...

/// Longest encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` as an unsigned varint.
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80; // continuation
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Appends `value` as a zigzag-encoded signed varint.
pub fn put_varint(buf: &mut Vec<u8>, value: i64) {
    put_uvarint(buf, zigzag(value));
}

/// Decodes an unsigned varint from the front of `data`, returning the value
/// and the number of bytes consumed. `None` if `data` ends mid-value or the
/// value overflows 64 bits.
pub fn get_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        if shift == 63 && byte > 1 {
            return None;
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Decodes a zigzag-encoded signed varint from the front of `data`.
pub fn get_varint(data: &[u8]) -> Option<(i64, usize)> {
    get_uvarint(data).map(|(v, n)| (unzigzag(v), n))
}

/// Number of bytes `value` occupies as an unsigned varint.
pub fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_use_one_byte() {
        for v in 0..128u64 {
            let mut buf = Vec::new();
            put_uvarint(&mut buf, v);
            assert_eq!(buf, vec![v as u8]);
        }
    }

    #[test]
    fn test_known_encodings() {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(get_uvarint(&buf), Some((300, 2)));

        buf.clear();
        put_uvarint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        assert_eq!(uvarint_len(u64::MAX), MAX_VARINT_LEN);
        assert_eq!(get_uvarint(&buf), Some((u64::MAX, MAX_VARINT_LEN)));
    }

    #[test]
    fn test_zigzag_signed() {
        for (value, expected_len) in [(0i64, 1), (-1, 1), (1, 1), (-64, 1), (64, 2)] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), expected_len, "length of {}", value);
            assert_eq!(get_varint(&buf), Some((value, expected_len)));
        }

        let mut buf = Vec::new();
        put_varint(&mut buf, i64::MIN);
        assert_eq!(get_varint(&buf).map(|(v, _)| v), Some(i64::MIN));
    }

    #[test]
    fn test_truncated_and_overflowing_input() {
        assert_eq!(get_uvarint(&[]), None);
        assert_eq!(get_uvarint(&[0x80, 0x80]), None);

        let mut overflow = vec![0xFF; 9];
        overflow.push(0x02);
        assert_eq!(get_uvarint(&overflow), None);
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        assert_eq!(get_uvarint(&[0x05, 0xFF, 0xFF]), Some((5, 1)));
    }
}
