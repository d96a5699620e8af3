//! Hex conversion for algorithm keys.
//!
//! Keys travel through the configuration layer as lowercase hex strings and
//! through the kernel as raw bytes.

use crate::commands::MAX_KEY_BYTES;

/// Decode `hex` into `out`, returning the number of bytes written.
///
/// Conversion never writes past `out`, stops at the first malformed digit
/// pair (or a trailing odd digit), and leaves every undecoded byte of `out`
/// zeroed.
pub fn hex_to_bytes(hex: &str, out: &mut [u8]) -> usize {
    out.fill(0);

    let mut written = 0;
    for (slot, pair) in out.iter_mut().zip(hex.as_bytes().chunks_exact(2)) {
        if ::hex::decode_to_slice(pair, std::slice::from_mut(slot)).is_err() {
            *slot = 0;
            break;
        }
        written += 1;
    }
    written
}

/// Encode bytes as a lowercase hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    ::hex::encode(bytes)
}

/// Decode an algorithm key into an owned buffer of half the string length,
/// capped at [`MAX_KEY_BYTES`].
pub fn decode_key(hex: &str) -> Vec<u8> {
    let mut key = vec![0u8; (hex.len() / 2).min(MAX_KEY_BYTES)];
    hex_to_bytes(hex, &mut key);
    key
}
