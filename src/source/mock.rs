//! Synthetic capture device for testing without hardware.

use std::time::{Duration, Instant};

use crate::config::ChannelMask;
use crate::source::AudioInput;
use crate::BackendError;

/// Waveform produced by a [`MockAudioInput`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockSignal {
    /// All-zero samples.
    Silence,
    /// A sine wave at the given frequency in Hz.
    Sine(f64),
    /// Deterministic white noise at the given amplitude (0.0..=1.0).
    Noise(f64),
}

/// A capture device that synthesizes audio.
///
/// Reads are paced to real time by default so a recording made with the mock
/// has the same duration as the wall-clock interval between `start` and
/// `stop`. Open failures and read failures can be simulated to exercise the
/// capture actor's retry and error paths.
///
/// # Example
///
/// ```
/// use stream_recorder::source::{AudioInput, MockAudioInput};
/// use stream_recorder::ChannelMask;
///
/// let mut mock = MockAudioInput::sine(440.0).unpaced();
/// mock.open(16000, ChannelMask::Mono).unwrap();
///
/// let mut buf = [0u8; 320];
/// assert_eq!(mock.read(&mut buf).unwrap(), 320);
/// ```
#[derive(Debug, Clone)]
pub struct MockAudioInput {
    signal: MockSignal,
    paced: bool,
    failing_opens: u32,
    fail_after_reads: Option<u32>,
    open_attempts: u32,
    reads: u32,
    sample_rate: u32,
    channels: u16,
    frames_produced: u64,
    started: Option<Instant>,
    seed: u32,
}

impl MockAudioInput {
    /// Creates a mock producing the given signal.
    pub fn new(signal: MockSignal) -> Self {
        Self {
            signal,
            paced: true,
            failing_opens: 0,
            fail_after_reads: None,
            open_attempts: 0,
            reads: 0,
            sample_rate: 0,
            channels: 0,
            frames_produced: 0,
            started: None,
            seed: 12345,
        }
    }

    /// Creates a mock producing silence.
    pub fn silence() -> Self {
        Self::new(MockSignal::Silence)
    }

    /// Creates a mock producing a sine wave.
    pub fn sine(frequency: f64) -> Self {
        Self::new(MockSignal::Sine(frequency))
    }

    /// Creates a mock producing white noise.
    pub fn noise(amplitude: f64) -> Self {
        Self::new(MockSignal::Noise(amplitude))
    }

    /// Returns samples as fast as they are requested instead of in real time.
    #[must_use]
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Makes the first `count` calls to `open` fail.
    #[must_use]
    pub fn failing_opens(mut self, count: u32) -> Self {
        self.failing_opens = count;
        self
    }

    /// Makes every read after the first `reads` fail.
    #[must_use]
    pub fn fail_after_reads(mut self, reads: u32) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }

    /// Number of times `open` has been called.
    pub fn open_attempts(&self) -> u32 {
        self.open_attempts
    }

    /// Audio produced so far.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames_produced as f64 / f64::from(self.sample_rate))
    }

    fn next_sample(&mut self, frame: u64) -> i16 {
        match self.signal {
            MockSignal::Silence => 0,
            MockSignal::Sine(frequency) => {
                let t = frame as f64 / f64::from(self.sample_rate);
                ((2.0 * std::f64::consts::PI * frequency * t).sin() * 32767.0) as i16
            }
            MockSignal::Noise(amplitude) => {
                // LCG keeps the noise reproducible across runs
                self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                let random = ((self.seed >> 16) as i32 - 32768) as f64 / 32768.0;
                (random * amplitude.clamp(0.0, 1.0) * 32767.0) as i16
            }
        }
    }

    fn pace(&self, frames_after_read: u64) {
        let Some(started) = self.started else {
            return;
        };
        let due = Duration::from_secs_f64(frames_after_read as f64 / f64::from(self.sample_rate));
        let elapsed = started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }
}

impl AudioInput for MockAudioInput {
    fn open(&mut self, sample_rate: u32, channel_mask: ChannelMask) -> Result<(), BackendError> {
        self.open_attempts += 1;
        if self.open_attempts <= self.failing_opens {
            return Err(BackendError::device(format!(
                "simulated open failure {} of {}",
                self.open_attempts, self.failing_opens
            )));
        }
        if sample_rate == 0 {
            return Err(BackendError::device("sample rate must be non-zero"));
        }

        self.sample_rate = sample_rate;
        self.channels = channel_mask.channel_count();
        self.frames_produced = 0;
        self.reads = 0;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError> {
        if self.started.is_none() {
            return Err(BackendError::device("mock input is not open"));
        }
        if let Some(limit) = self.fail_after_reads {
            if self.reads >= limit {
                return Err(BackendError::device("simulated read failure"));
            }
        }
        self.reads += 1;

        let frame_bytes = usize::from(self.channels) * 2;
        let frames = buf.len() / frame_bytes;
        if frames == 0 {
            return Ok(0);
        }

        if self.paced {
            self.pace(self.frames_produced + frames as u64);
        }

        for (i, frame) in buf.chunks_exact_mut(frame_bytes).take(frames).enumerate() {
            let sample = self.next_sample(self.frames_produced + i as u64);
            for slot in frame.chunks_exact_mut(2) {
                slot.copy_from_slice(&sample.to_le_bytes());
            }
        }
        self.frames_produced += frames as u64;

        Ok(frames * frame_bytes)
    }

    fn close(&mut self) {
        self.started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(buf: &[u8]) -> Vec<i16> {
        buf.chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_mock_silence() {
        let mut mock = MockAudioInput::silence().unpaced();
        mock.open(16000, ChannelMask::Mono).unwrap();

        let mut buf = vec![0xAAu8; 3200];
        assert_eq!(mock.read(&mut buf).unwrap(), 3200);
        assert!(samples(&buf).iter().all(|&s| s == 0));
        assert_eq!(mock.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_mock_sine_stereo_duplicates_channels() {
        let mut mock = MockAudioInput::sine(440.0).unpaced();
        mock.open(44100, ChannelMask::Stereo).unwrap();

        let mut buf = vec![0u8; 2048];
        assert_eq!(mock.read(&mut buf).unwrap(), 2048);

        let samples = samples(&buf);
        assert!(samples.chunks_exact(2).all(|f| f[0] == f[1]));
        assert!(samples.iter().any(|&s| s > 0));
        assert!(samples.iter().any(|&s| s < 0));
    }

    #[test]
    fn test_mock_noise_is_deterministic() {
        let mut a = MockAudioInput::noise(0.5).unpaced();
        let mut b = MockAudioInput::noise(0.5).unpaced();
        a.open(8000, ChannelMask::Mono).unwrap();
        b.open(8000, ChannelMask::Mono).unwrap();

        let mut buf_a = vec![0u8; 256];
        let mut buf_b = vec![0u8; 256];
        a.read(&mut buf_a).unwrap();
        b.read(&mut buf_b).unwrap();
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn test_mock_failing_opens() {
        let mut mock = MockAudioInput::silence().failing_opens(2);
        assert!(mock.open(16000, ChannelMask::Mono).is_err());
        assert!(mock.open(16000, ChannelMask::Mono).is_err());
        assert!(mock.open(16000, ChannelMask::Mono).is_ok());
        assert_eq!(mock.open_attempts(), 3);
    }

    #[test]
    fn test_mock_fail_after_reads() {
        let mut mock = MockAudioInput::silence().unpaced().fail_after_reads(1);
        mock.open(16000, ChannelMask::Mono).unwrap();

        let mut buf = vec![0u8; 64];
        assert!(mock.read(&mut buf).is_ok());
        assert!(mock.read(&mut buf).is_err());
    }

    #[test]
    fn test_mock_read_before_open() {
        let mut mock = MockAudioInput::silence();
        let mut buf = vec![0u8; 64];
        assert!(mock.read(&mut buf).is_err());
    }

    #[test]
    fn test_mock_paced_read_takes_real_time() {
        let mut mock = MockAudioInput::silence();
        mock.open(16000, ChannelMask::Mono).unwrap();

        let start = Instant::now();
        let mut buf = vec![0u8; 1600]; // 50ms at 16 kHz mono
        mock.read(&mut buf).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
