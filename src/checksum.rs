//! CRC32 checksums over datagram byte ranges.
//!
//! The protocol checksums everything from the header trailer byte to the end
//! of the datagram, using the IEEE reflected polynomial (0xedb88320) that
//! ubiquitous file-integrity tools use.

/// Compute the IEEE CRC32 of `data`.
pub fn compute(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Check that `data` hashes to `expected`.
pub fn verify(data: &[u8], expected: u32) -> bool {
    compute(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(compute(b"test"), 3632233996);

        let input = [255, 0, 116, 101, 115, 116, 101, 101, 101, 101];
        assert_eq!(compute(&input), 353074917);
    }

    #[test]
    fn verify_accepts_matching_checksum() {
        assert!(verify(b"test", 3632233996));
    }

    #[test]
    fn verify_rejects_wrong_checksum() {
        assert!(!verify(b"test", 3632233995));
        assert!(!verify(b"test", 0));
    }
}
