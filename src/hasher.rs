use std::fmt;

use crc::{Crc, Digest, CRC_32_ISCSI};

/// CRC32C (Castagnoli), the polynomial used for SortedTable block trailers.
static CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282_ead8;

/// Incremental CRC32C over one or more byte slices.
#[derive(Clone)]
pub struct Hasher {
    digest: Digest<'static, u32>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: CASTAGNOLI.digest(),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn checksum(&self) -> u32 {
        self.digest.clone().finalize()
    }

    /// The checksum rotated and offset so that a CRC stored inside the data it
    /// covers does not checksum to itself.
    pub fn masked(&self) -> u32 {
        mask(self.checksum())
    }

    pub fn reset(&mut self) {
        self.digest = CASTAGNOLI.digest();
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Masked CRC32C of `data`.
pub fn masked_crc(data: &[u8]) -> u32 {
    mask(CASTAGNOLI.checksum(data))
}

pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_checksum() {
        let mut hasher1 = Hasher::new();
        hasher1.write(b"hello ");
        hasher1.write(b"world");

        let mut hasher2 = Hasher::new();
        hasher2.write(b"hello world");

        assert_eq!(
            hasher1.checksum(),
            hasher2.checksum(),
            "Incremental and single-write checksums should match"
        );
    }

    #[test]
    fn test_known_crc32c_value() {
        // Standard CRC32C check value.
        assert_eq!(CASTAGNOLI.checksum(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn test_mask_roundtrip() {
        let crc = CASTAGNOLI.checksum(b"foo");
        assert_ne!(mask(crc), crc);
        assert_eq!(unmask(mask(crc)), crc);
        assert_eq!(masked_crc(b"foo"), mask(crc));
    }

    #[test]
    fn test_reset_hasher() {
        let mut hasher = Hasher::new();
        hasher.write(b"hello");
        let first = hasher.masked();

        hasher.reset();
        hasher.write(b"hello");
        assert_eq!(first, hasher.masked());
    }
}
