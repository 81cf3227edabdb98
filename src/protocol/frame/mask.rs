//! Payload masking (RFC 6455, section 5.3).

/// Generates a random mask for the client side.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    rand::random()
}

/// Masks or unmasks a payload in place: byte `i` is XORed with `mask[i % 4]`.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
            ^ u32::from_ne_bytes(mask);
        chunk.copy_from_slice(&word.to_ne_bytes());
    }

    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}
