//! WebSocket frame masking utilities
//!
//! Masking XORs every payload byte `i` with `mask[i mod 4]`, so the same call
//! both masks and unmasks.
//!
//! Supports multiple RNG backends via feature flags:
//! - `fastrand`: fast PRNG (default)
//! - `getrandom`: cryptographically secure RNG

/// Apply a WebSocket mask in place
///
/// Works on eight bytes at a time, then finishes the tail byte by byte.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // Chunks are a multiple of 8 long, so the tail starts at a mask boundary
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Generate a random mask for WebSocket client frames.
///
/// If both RNG features are enabled, `getrandom` wins.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    let mut mask = [0u8; 4];
    fill_random(&mut mask);
    mask
}

/// Fill `buf` with random bytes from the selected backend
#[cfg(feature = "getrandom")]
pub fn fill_random(buf: &mut [u8]) {
    getrandom::getrandom(buf).expect("getrandom failed");
}

/// Fill `buf` with random bytes from the selected backend
#[cfg(all(feature = "fastrand", not(feature = "getrandom")))]
pub fn fill_random(buf: &mut [u8]) {
    fastrand::fill(buf);
}

#[cfg(not(any(feature = "fastrand", feature = "getrandom")))]
pub fn fill_random(_buf: &mut [u8]) {
    compile_error!("At least one RNG feature must be enabled: fastrand or getrandom");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_bytewise(data: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn test_apply_mask_matches_definition() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        for len in [0usize, 1, 3, 4, 7, 8, 9, 15, 16, 17, 125, 1000] {
            let original: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();

            let mut fast = original.clone();
            apply_mask(&mut fast, mask);

            let mut slow = original.clone();
            mask_bytewise(&mut slow, mask);

            assert_eq!(fast, slow, "Failed for length {}", len);
        }
    }

    #[test]
    fn test_apply_mask_is_invertible() {
        for _ in 0..32 {
            let mask = generate_mask();
            let len = fastrand_len();
            let mut original = vec![0u8; len];
            fill_random(&mut original);

            let mut data = original.clone();
            apply_mask(&mut data, mask);
            apply_mask(&mut data, mask);
            assert_eq!(data, original);
        }
    }

    fn fastrand_len() -> usize {
        let mut b = [0u8; 2];
        fill_random(&mut b);
        u16::from_ne_bytes(b) as usize % 2048
    }

    #[test]
    fn test_apply_mask_empty() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        let mut data: Vec<u8> = vec![];
        apply_mask(&mut data, mask);
        assert!(data.is_empty());
    }

    #[test]
    fn test_generate_mask() {
        let masks: Vec<[u8; 4]> = (0..8).map(|_| generate_mask()).collect();
        // Eight identical 32-bit draws would mean the RNG is not wired up
        assert!(masks.iter().any(|m| *m != masks[0]));
    }
}
