//! PCM conversion between a capture device's native format and the format
//! the audio encoder was configured with.
//!
//! - Sample format conversion (f32 → i16)
//! - Channel remixing (mono ↔ stereo)
//! - Sample rate conversion (linear resampling)

mod convert;
mod resample;

pub use convert::{f32_to_i16, remix, write_le_bytes};
pub use resample::resample_interleaved;

/// Converts device-native interleaved i16 audio into the encoder's format.
///
/// # Example
///
/// ```
/// use stream_recorder::format::PcmConverter;
///
/// // 48 kHz mono device feeding a 48 kHz stereo encoder
/// let converter = PcmConverter::new((48000, 1), (48000, 2));
/// let mut bytes = Vec::new();
/// converter.convert_into(&[1, 2], &mut bytes);
/// assert_eq!(bytes.len(), 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmConverter {
    source_rate: u32,
    source_channels: u16,
    target_rate: u32,
    target_channels: u16,
}

impl PcmConverter {
    /// Creates a converter from `(rate, channels)` to `(rate, channels)`.
    pub fn new(source: (u32, u16), target: (u32, u16)) -> Self {
        Self {
            source_rate: source.0,
            source_channels: source.1,
            target_rate: target.0,
            target_channels: target.1,
        }
    }

    /// Returns `true` if no conversion is needed.
    pub fn is_passthrough(&self) -> bool {
        self.source_rate == self.target_rate && self.source_channels == self.target_channels
    }

    /// Converts `samples` and appends them to `out` as little-endian bytes.
    pub fn convert_into(&self, samples: &[i16], out: &mut Vec<u8>) {
        if self.is_passthrough() {
            write_le_bytes(samples, out);
            return;
        }

        let remixed = remix(samples, self.source_channels, self.target_channels);
        let resampled = resample_interleaved(
            &remixed,
            self.target_channels,
            self.source_rate,
            self.target_rate,
        );
        write_le_bytes(&resampled, out);
    }
}
