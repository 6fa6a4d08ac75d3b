//! Fixed-point conversion at the device boundary.
//!
//! Input arrives as signed 16-bit little-endian PCM and is scaled to
//! `[-1, 1)`. Output blocks are peak-limited as a whole, dividing by the
//! block's peak when it exceeds full scale, then truncated back to 16 bits.

const FULL_SCALE: f32 = 32768.0;

#[inline]
pub fn decode_sample(sample: i16) -> f32 {
    sample as f32 / FULL_SCALE
}

#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    (sample * FULL_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn decode(input: &[i16], output: &mut [f32]) {
    for (out, &sample) in output.iter_mut().zip(input) {
        *out = decode_sample(sample);
    }
}

/// Decode little-endian byte pairs. A trailing odd byte is ignored.
pub fn decode_bytes(input: &[u8], output: &mut [f32]) {
    for (out, pair) in output.iter_mut().zip(input.chunks_exact(2)) {
        *out = decode_sample(i16::from_le_bytes([pair[0], pair[1]]));
    }
}

/// Scale `block` in place so its peak magnitude is at most 1.
/// Returns the divisor that was applied.
pub fn peak_limit(block: &mut [f32]) -> f32 {
    let peak = block.iter().fold(0.0f32, |peak, &s| peak.max(s.abs()));
    let divisor = peak.max(1.0);
    if divisor > 1.0 {
        let gain = divisor.recip();
        block.iter_mut().for_each(|s| *s *= gain);
    }
    divisor
}

pub fn encode(input: &[f32], output: &mut [i16]) {
    for (out, &sample) in output.iter_mut().zip(input) {
        *out = encode_sample(sample);
    }
}

pub fn encode_bytes(input: &[f32], output: &mut [u8]) {
    for (pair, &sample) in output.chunks_exact_mut(2).zip(input) {
        pair.copy_from_slice(&encode_sample(sample).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_scales_to_unit_range() {
        let mut out = [0.0; 4];
        decode(&[i16::MIN, -16384, 0, i16::MAX], &mut out);
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], -0.5);
        assert_eq!(out[2], 0.0);
        assert!(out[3] < 1.0 && out[3] > 0.9999);
    }

    #[test]
    fn bytes_are_little_endian() {
        let mut out = [0.0; 2];
        decode_bytes(&[0x00, 0x40, 0x00, 0xC0, 0xFF], &mut out);
        assert_eq!(out, [0.5, -0.5]);

        let mut bytes = [0u8; 4];
        encode_bytes(&[0.5, -0.5], &mut bytes);
        assert_eq!(bytes, [0x00, 0x40, 0x00, 0xC0]);
    }

    #[test]
    fn encode_clamps_full_scale() {
        let mut out = [0i16; 3];
        encode(&[1.0, -1.0, 0.25], &mut out);
        assert_eq!(out, [i16::MAX, i16::MIN, 8192]);
    }

    #[test]
    fn peak_limit_only_attenuates_hot_blocks() {
        let mut quiet = [0.5, -0.25];
        assert_eq!(peak_limit(&mut quiet), 1.0);
        assert_eq!(quiet, [0.5, -0.25]);

        let mut hot = [4.0, -2.0, 1.0];
        assert_eq!(peak_limit(&mut hot), 4.0);
        assert_eq!(hot, [1.0, -0.5, 0.25]);
    }
}
