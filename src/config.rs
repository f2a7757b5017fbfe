//! Recording profile and pipeline tuning.

use std::time::Duration;

use crate::sample::{AudioFormat, VideoFormat, AUDIO_MIME_AAC, VIDEO_MIME_AVC};
use crate::RecorderError;

/// Channel layout requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMask {
    /// Single channel.
    Mono,
    /// Interleaved left/right.
    #[default]
    Stereo,
}

impl ChannelMask {
    /// Number of interleaved channels for this layout.
    #[must_use]
    pub fn channel_count(self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }

    /// Layout matching a channel count, if one exists.
    #[must_use]
    pub fn from_channel_count(count: u16) -> Option<Self> {
        match count {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}

/// Video encoding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoProfile {
    /// Encoded frame width in pixels.
    pub width: u32,
    /// Encoded frame height in pixels.
    pub height: u32,
    /// Target bit rate in bits per second.
    pub bit_rate: u32,
    /// Frames per second.
    pub frame_rate: u32,
    /// Seconds between key frames.
    pub i_frame_interval: u32,
}

/// Audio encoding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioProfile {
    /// Target bit rate in bits per second.
    pub bit_rate: u32,
    /// Capture and encode sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channel_count: u16,
    /// Capture channel layout.
    pub channel_mask: ChannelMask,
}

/// Immutable configuration snapshot for one recording.
///
/// Build with [`Profile::builder()`]; the encoders only ever read it.
///
/// # Example
///
/// ```
/// use stream_recorder::Profile;
///
/// let profile = Profile::builder()
///     .video_size(480, 480)
///     .video_frame_rate(30)
///     .audio_sample_rate(48000)
///     .build()
///     .unwrap();
///
/// assert_eq!(profile.video.width, 480);
/// assert_eq!(profile.audio.sample_rate, 48000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Video parameters.
    pub video: VideoProfile,
    /// Audio parameters.
    pub audio: AudioProfile,
    /// Rotation in degrees recorded in the container (0, 90, 180, 270).
    pub orientation_hint: u16,
    /// Requests the callback-driven codec mode.
    ///
    /// Accepted for compatibility; encoders always poll their codecs.
    pub asynchronous_mode: bool,
}

impl Profile {
    /// Creates a builder with the default recording parameters.
    pub fn builder() -> ProfileBuilder {
        ProfileBuilder::default()
    }

    /// Codec input format for the audio encoder.
    #[must_use]
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            mime: AUDIO_MIME_AAC.to_string(),
            sample_rate: self.audio.sample_rate,
            channel_count: self.audio.channel_count,
            channel_mask: self.audio.channel_mask,
            bit_rate: self.audio.bit_rate,
            codec_config: Vec::new(),
        }
    }

    /// Codec input format for the video encoder.
    #[must_use]
    pub fn video_format(&self) -> VideoFormat {
        VideoFormat {
            mime: VIDEO_MIME_AVC.to_string(),
            width: self.video.width,
            height: self.video.height,
            bit_rate: self.video.bit_rate,
            frame_rate: self.video.frame_rate,
            i_frame_interval: self.video.i_frame_interval,
            codec_config: Vec::new(),
        }
    }
}

/// Builder for [`Profile`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ProfileBuilder {
    video: VideoProfile,
    audio: AudioProfile,
    orientation_hint: u16,
    asynchronous_mode: bool,
}

impl Default for ProfileBuilder {
    fn default() -> Self {
        Self {
            video: VideoProfile {
                width: 640,
                height: 480,
                bit_rate: 1_024_000,
                frame_rate: 15,
                i_frame_interval: 1,
            },
            audio: AudioProfile {
                bit_rate: 128_000,
                sample_rate: 44_100,
                channel_count: 2,
                channel_mask: ChannelMask::Stereo,
            },
            orientation_hint: 0,
            asynchronous_mode: false,
        }
    }
}

impl ProfileBuilder {
    /// Sets the encoded frame size.
    pub fn video_size(mut self, width: u32, height: u32) -> Self {
        self.video.width = width;
        self.video.height = height;
        self
    }

    /// Sets the video bit rate in bits per second.
    pub fn video_bit_rate(mut self, bit_rate: u32) -> Self {
        self.video.bit_rate = bit_rate;
        self
    }

    /// Sets the video frame rate.
    pub fn video_frame_rate(mut self, frame_rate: u32) -> Self {
        self.video.frame_rate = frame_rate;
        self
    }

    /// Sets the key frame interval in seconds.
    pub fn i_frame_interval(mut self, seconds: u32) -> Self {
        self.video.i_frame_interval = seconds;
        self
    }

    /// Sets the audio bit rate in bits per second.
    pub fn audio_bit_rate(mut self, bit_rate: u32) -> Self {
        self.audio.bit_rate = bit_rate;
        self
    }

    /// Sets the audio sample rate in Hz.
    pub fn audio_sample_rate(mut self, sample_rate: u32) -> Self {
        self.audio.sample_rate = sample_rate;
        self
    }

    /// Sets the capture channel layout and the matching channel count.
    pub fn audio_channels(mut self, mask: ChannelMask) -> Self {
        self.audio.channel_mask = mask;
        self.audio.channel_count = mask.channel_count();
        self
    }

    /// Sets the rotation hint in degrees.
    pub fn orientation_hint(mut self, degrees: u16) -> Self {
        self.orientation_hint = degrees;
        self
    }

    /// Requests the callback-driven codec mode.
    pub fn asynchronous_mode(mut self, on: bool) -> Self {
        self.asynchronous_mode = on;
        self
    }

    /// Validates the parameters and builds the profile.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Configuration`] if a dimension or rate is zero,
    /// the channel count does not match the mask, or the orientation is not a
    /// multiple of 90 degrees below 360.
    pub fn build(self) -> Result<Profile, RecorderError> {
        let video = &self.video;
        if video.width == 0 || video.height == 0 {
            return Err(RecorderError::configuration(format!(
                "video size {}x{} must be non-zero",
                video.width, video.height
            )));
        }
        if video.bit_rate == 0 || video.frame_rate == 0 {
            return Err(RecorderError::configuration(
                "video bit rate and frame rate must be non-zero",
            ));
        }

        let audio = &self.audio;
        if audio.sample_rate == 0 || audio.bit_rate == 0 {
            return Err(RecorderError::configuration(
                "audio sample rate and bit rate must be non-zero",
            ));
        }
        if audio.channel_mask.channel_count() != audio.channel_count {
            return Err(RecorderError::configuration(format!(
                "channel count {} does not match {:?}",
                audio.channel_count, audio.channel_mask
            )));
        }

        if !matches!(self.orientation_hint, 0 | 90 | 180 | 270) {
            return Err(RecorderError::configuration(format!(
                "orientation hint {} is not one of 0, 90, 180, 270",
                self.orientation_hint
            )));
        }

        Ok(Profile {
            video: self.video,
            audio: self.audio,
            orientation_hint: self.orientation_hint,
            asynchronous_mode: self.asynchronous_mode,
        })
    }
}

/// Timing and sizing knobs for the actors.
///
/// Use [`PipelineConfig::default()`] unless a backend needs different bounds.
///
/// # Example
///
/// ```
/// use stream_recorder::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig {
///     transition_timeout: Duration::from_secs(3),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Wait per `dequeue_output_buffer` poll while draining.
    ///
    /// Default: 10ms
    pub drain_poll_timeout: Duration,

    /// Wait per `dequeue_input_buffer` poll while feeding audio.
    ///
    /// Default: 10ms
    pub input_dequeue_timeout: Duration,

    /// Upper bound on the final end-of-stream drain during `stop`.
    ///
    /// Default: 5 seconds
    pub eos_drain_timeout: Duration,

    /// How long `prepare`/`start`/`stop` wait for both encoders.
    ///
    /// Default: 10 seconds
    pub transition_timeout: Duration,

    /// How long an encoder waits for the peer track to register before
    /// cancelling the muxer.
    ///
    /// Default: 5 seconds
    pub track_sync_timeout: Duration,

    /// Bytes read from the capture device per chunk.
    ///
    /// Default: 2048
    pub capture_chunk_bytes: usize,

    /// Attempts to open the capture device before giving up.
    ///
    /// Default: 5
    pub device_open_attempts: u32,

    /// Delay between device open attempts.
    ///
    /// Default: 100ms
    pub device_retry_delay: Duration,

    /// How long stopping the capture actor waits for its thread.
    ///
    /// Default: 30 seconds
    pub capture_stop_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            drain_poll_timeout: Duration::from_millis(10),
            input_dequeue_timeout: Duration::from_millis(10),
            eos_drain_timeout: Duration::from_secs(5),
            transition_timeout: Duration::from_secs(10),
            track_sync_timeout: Duration::from_secs(5),
            capture_chunk_bytes: 2048,
            device_open_attempts: 5,
            device_retry_delay: Duration::from_millis(100),
            capture_stop_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let profile = Profile::builder().build().unwrap();
        assert_eq!(profile.video.width, 640);
        assert_eq!(profile.video.height, 480);
        assert_eq!(profile.video.bit_rate, 1_024_000);
        assert_eq!(profile.video.frame_rate, 15);
        assert_eq!(profile.audio.sample_rate, 44_100);
        assert_eq!(profile.audio.channel_count, 2);
        assert_eq!(profile.audio.channel_mask, ChannelMask::Stereo);
        assert_eq!(profile.orientation_hint, 0);
        assert!(!profile.asynchronous_mode);
    }

    #[test]
    fn test_profile_rejects_zero_size() {
        let err = Profile::builder().video_size(0, 480).build().unwrap_err();
        assert!(matches!(err, RecorderError::Configuration { .. }));
    }

    #[test]
    fn test_profile_rejects_bad_orientation() {
        let err = Profile::builder().orientation_hint(45).build().unwrap_err();
        assert!(err.to_string().contains("45"));

        let profile = Profile::builder().orientation_hint(270).build().unwrap();
        assert_eq!(profile.orientation_hint, 270);
    }

    #[test]
    fn test_audio_channels_sets_count() {
        let profile = Profile::builder()
            .audio_channels(ChannelMask::Mono)
            .build()
            .unwrap();
        assert_eq!(profile.audio.channel_count, 1);
        assert_eq!(profile.audio_format().channel_count, 1);
    }

    #[test]
    fn test_video_format_from_profile() {
        let profile = Profile::builder()
            .video_size(480, 480)
            .i_frame_interval(5)
            .build()
            .unwrap();
        let format = profile.video_format();
        assert_eq!(format.mime, VIDEO_MIME_AVC);
        assert_eq!((format.width, format.height), (480, 480));
        assert_eq!(format.i_frame_interval, 5);
    }

    #[test]
    fn test_channel_mask_round_trip() {
        assert_eq!(ChannelMask::from_channel_count(1), Some(ChannelMask::Mono));
        assert_eq!(ChannelMask::from_channel_count(2), Some(ChannelMask::Stereo));
        assert_eq!(ChannelMask::from_channel_count(6), None);
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.drain_poll_timeout, Duration::from_millis(10));
        assert_eq!(config.capture_chunk_bytes, 2048);
        assert_eq!(config.device_open_attempts, 5);
        assert_eq!(config.device_retry_delay, Duration::from_millis(100));
        assert_eq!(config.capture_stop_timeout, Duration::from_secs(30));
    }
}
