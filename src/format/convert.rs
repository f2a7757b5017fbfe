//! Sample and channel conversion for 16-bit PCM.

/// Converts an f32 sample in [-1.0, 1.0] to i16, clamping out-of-range input.
///
/// Scales by 32767 so that +1.0 and -1.0 map symmetrically.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts an interleaved buffer from one channel count to another.
///
/// Mono to stereo duplicates each sample; stereo to mono averages each pair.
/// Any other combination keeps the first `to` channels of every frame and
/// pads missing channels with the frame's first channel.
pub fn remix(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let from = usize::from(from);
    let to = usize::from(to);

    if from == 2 && to == 1 {
        return samples
            .chunks_exact(2)
            .map(|pair| ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16)
            .collect();
    }

    let mut output = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        for channel in 0..to {
            output.push(frame.get(channel).copied().unwrap_or(frame[0]));
        }
    }
    output
}

/// Appends samples to `out` as little-endian bytes.
pub fn write_le_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}
