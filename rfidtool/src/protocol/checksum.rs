//! XOR frame checksum.

/// XOR of every byte in `data`.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0, |acc, b| acc ^ b)
}

/// Check that the last byte of `frame` is the XOR of all bytes before it.
pub fn verify(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((last, body)) => xor_checksum(body) == *last,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_checksum_is_zero() {
        assert_eq!(xor_checksum(&[]), 0);
    }

    #[test]
    fn test_known_values() {
        assert_eq!(xor_checksum(&[0x80, 0x00, 0x03, 0x35, 0x01]), 0xB7);
        assert_eq!(xor_checksum(&[0xFF, 0xFF]), 0x00);
    }

    #[test]
    fn test_verify() {
        assert!(verify(&[0x80, 0x00, 0x03, 0x35, 0x01, 0xB7]));
        assert!(!verify(&[0x80, 0x00, 0x03, 0x35, 0x01, 0xB6]));
        assert!(!verify(&[]));
    }
}
