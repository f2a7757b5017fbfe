//! Linear-interpolation sample rate conversion.
//!
//! Good enough to bridge a device running at 48 kHz into a 44.1 kHz encoder.
//! A dedicated resampler would do better for large ratio changes.

/// Resamples interleaved audio with `channels` channels.
///
/// Each channel is interpolated independently. Trailing samples that do not
/// form a complete frame are ignored.
pub fn resample_interleaved(
    samples: &[i16],
    channels: u16,
    from_rate: u32,
    to_rate: u32,
) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || channels == 0 {
        return samples.to_vec();
    }
    if from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let channels = usize::from(channels);
    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let out_frames = (frames as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let src_pos = i as f64 / ratio;
        let idx = (src_pos.floor() as usize).min(frames - 1);
        let frac = src_pos - idx as f64;

        for channel in 0..channels {
            let current = samples[idx * channels + channel];
            let sample = if idx + 1 < frames {
                let next = samples[(idx + 1) * channels + channel];
                let a = f64::from(current);
                let b = f64::from(next);
                (a + (b - a) * frac) as i16
            } else {
                current
            };
            output.push(sample);
        }
    }

    output
}
