//! Encoded sample metadata, track identity, and stream formats.

use std::fmt;

use crate::config::ChannelMask;

/// MIME type of the video encoder (H.264).
pub const VIDEO_MIME_AVC: &str = "video/avc";

/// MIME type of the audio encoder (AAC).
pub const AUDIO_MIME_AAC: &str = "audio/mp4a-latm";

/// Kind of elementary stream carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Audio stream.
    Audio,
    /// Video stream.
    Video,
}

impl TrackKind {
    /// Both track kinds, in no particular container order.
    pub const ALL: [TrackKind; 2] = [TrackKind::Audio, TrackKind::Video];

    pub(crate) fn as_byte(self) -> u8 {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Audio),
            1 => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// A track registered with the muxer.
///
/// The index is assigned by the container writer and is only meaningful to
/// the muxer that handed it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    /// Writer-assigned track index.
    pub index: usize,
    /// Stream kind.
    pub kind: TrackKind,
}

/// Flags attached to an encoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u8);

impl BufferFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Codec-specific configuration data, not a media sample.
    pub const CONFIG: Self = Self(0b001);
    /// The buffer is a sync sample.
    pub const KEYFRAME: Self = Self(0b010);
    /// Last buffer of the stream.
    pub const END_OF_STREAM: Self = Self(0b100);

    /// Returns `true` if every flag in `other` is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw bit pattern.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Builds flags from a raw bit pattern, ignoring unknown bits.
    #[must_use]
    pub fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & 0b111)
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Describes a byte range inside a codec buffer.
///
/// This is the metadata half of an encoded sample. The bytes themselves stay
/// in the codec's output buffer until the muxer has written them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Start of the payload inside the buffer.
    pub offset: usize,
    /// Payload length in bytes.
    pub size: usize,
    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,
    /// Buffer flags.
    pub flags: BufferFlags,
}

impl BufferInfo {
    /// Creates buffer metadata for a payload starting at offset 0.
    pub fn new(size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            offset: 0,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Returns `true` if this buffer carries a writable media sample.
    #[must_use]
    pub fn is_media_sample(&self) -> bool {
        self.size > 0 && !self.flags.contains(BufferFlags::CONFIG)
    }

    /// Returns `true` if this is the final buffer of the stream.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}

/// Audio stream format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    /// Codec MIME type.
    pub mime: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channel_count: u16,
    /// Channel layout of the capture device.
    pub channel_mask: ChannelMask,
    /// Target bit rate in bits per second.
    pub bit_rate: u32,
    /// Codec-specific data, filled in by the encoder on format change.
    pub codec_config: Vec<u8>,
}

/// Video stream format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    /// Codec MIME type.
    pub mime: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target bit rate in bits per second.
    pub bit_rate: u32,
    /// Frames per second.
    pub frame_rate: u32,
    /// Seconds between key frames.
    pub i_frame_interval: u32,
    /// Codec-specific data, filled in by the encoder on format change.
    pub codec_config: Vec<u8>,
}

/// Format of one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFormat {
    /// Audio stream format.
    Audio(AudioFormat),
    /// Video stream format.
    Video(VideoFormat),
}

impl MediaFormat {
    /// Returns the track kind this format describes.
    #[must_use]
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Audio(_) => TrackKind::Audio,
            Self::Video(_) => TrackKind::Video,
        }
    }

    /// Returns the codec MIME type.
    #[must_use]
    pub fn mime(&self) -> &str {
        match self {
            Self::Audio(format) => &format.mime,
            Self::Video(format) => &format.mime,
        }
    }

    /// Returns the codec-specific data.
    #[must_use]
    pub fn codec_config(&self) -> &[u8] {
        match self {
            Self::Audio(format) => &format.codec_config,
            Self::Video(format) => &format.codec_config,
        }
    }

    /// Returns a copy of this format carrying the given codec-specific data.
    #[must_use]
    pub fn with_codec_config(mut self, data: Vec<u8>) -> Self {
        match &mut self {
            Self::Audio(format) => format.codec_config = data,
            Self::Video(format) => format.codec_config = data,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_flags_contains() {
        let flags = BufferFlags::KEYFRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::KEYFRAME));
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(!flags.contains(BufferFlags::CONFIG));
        assert!(flags.contains(BufferFlags::NONE));
    }

    #[test]
    fn test_config_buffer_is_not_media() {
        let info = BufferInfo::new(32, 0, BufferFlags::CONFIG);
        assert!(!info.is_media_sample());

        let empty = BufferInfo::new(0, 1000, BufferFlags::END_OF_STREAM);
        assert!(!empty.is_media_sample());
        assert!(empty.is_end_of_stream());

        let frame = BufferInfo::new(1024, 33_000, BufferFlags::KEYFRAME);
        assert!(frame.is_media_sample());
    }

    #[test]
    fn test_track_kind_display() {
        assert_eq!(TrackKind::Audio.to_string(), "audio");
        assert_eq!(TrackKind::Video.to_string(), "video");
        assert_eq!(TrackKind::from_byte(TrackKind::Video.as_byte()), Some(TrackKind::Video));
        assert_eq!(TrackKind::from_byte(9), None);
    }

    #[test]
    fn test_media_format_codec_config() {
        let format = MediaFormat::Video(VideoFormat {
            mime: VIDEO_MIME_AVC.to_string(),
            width: 480,
            height: 480,
            bit_rate: 1_024_000,
            frame_rate: 30,
            i_frame_interval: 5,
            codec_config: Vec::new(),
        });
        let format = format.with_codec_config(vec![0, 0, 0, 1]);
        assert_eq!(format.codec_config(), &[0, 0, 0, 1]);
        assert_eq!(format.kind(), TrackKind::Video);
        assert_eq!(format.mime(), VIDEO_MIME_AVC);
    }
}
