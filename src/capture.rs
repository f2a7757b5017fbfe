//! Audio capture actor.
//!
//! Owns the capture device on a dedicated thread and forwards fixed-size
//! PCM chunks, stamped with the monotonic clock, to a [`CaptureReceiver`].
//!
//! Every run ends with exactly one terminal notification:
//! [`CaptureReceiver::on_capture_end`] after a requested stop, or
//! [`CaptureReceiver::on_capture_error`] if the device failed to open or to
//! read. Nothing is delivered after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::clock;
use crate::config::{ChannelMask, PipelineConfig};
use crate::pipeline::{PhaseBarrier, PhaseOutcome, PhaseSignal};
use crate::source::{AudioInput, AudioInputFactory};
use crate::BackendError;

/// Consumer of captured audio.
pub trait CaptureReceiver: Send {
    /// A chunk of interleaved 16-bit little-endian PCM.
    fn on_audio_data(&self, data: Vec<u8>, pts_us: i64);

    /// Capture stopped on request; `last_pts_us` is the final chunk's stamp.
    fn on_capture_end(&self, last_pts_us: i64);

    /// Capture stopped because the device failed.
    fn on_capture_error(&self, error: BackendError);
}

/// Parameters for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Requested channel layout.
    pub channel_mask: ChannelMask,
    /// Bytes per chunk.
    pub chunk_bytes: usize,
    /// Attempts to open the device.
    pub open_attempts: u32,
    /// Delay between open attempts.
    pub retry_delay: Duration,
    /// How long [`AudioCapture::stop`] waits for the thread.
    pub stop_timeout: Duration,
}

impl CaptureConfig {
    /// Builds a capture config from the profile format and pipeline knobs.
    pub fn new(sample_rate: u32, channel_mask: ChannelMask, pipeline: &PipelineConfig) -> Self {
        Self {
            sample_rate,
            channel_mask,
            chunk_bytes: pipeline.capture_chunk_bytes,
            open_attempts: pipeline.device_open_attempts.max(1),
            retry_delay: pipeline.device_retry_delay,
            stop_timeout: pipeline.capture_stop_timeout,
        }
    }
}

/// Handle to a running capture thread.
pub struct AudioCapture {
    stop_requested: Arc<AtomicBool>,
    finished: PhaseBarrier,
    handle: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl AudioCapture {
    /// Spawns the capture thread and blocks until the device is open.
    ///
    /// # Errors
    ///
    /// Returns the last open error if the device could not be opened after
    /// the configured number of attempts. No data is delivered in that case.
    pub fn start(
        factory: AudioInputFactory,
        config: CaptureConfig,
        receiver: Box<dyn CaptureReceiver>,
    ) -> Result<Self, BackendError> {
        let stop_requested = Arc::new(AtomicBool::new(false));
        let finished = PhaseBarrier::new("capture", 1);
        let (opened_tx, opened_rx) = oneshot::channel();

        let worker = CaptureWorker {
            stop_requested: Arc::clone(&stop_requested),
            config: config.clone(),
            receiver,
        };
        let done = finished.signal();

        let handle = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || worker.run(&factory, opened_tx, done))
            .map_err(|e| BackendError::device(format!("failed to spawn capture thread: {e}")))?;

        let opened = opened_rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(BackendError::device("capture thread exited during open")));

        let mut capture = Self {
            stop_requested,
            finished,
            handle: Some(handle),
            stop_timeout: config.stop_timeout,
        };

        match opened {
            Ok(()) => Ok(capture),
            Err(e) => {
                capture.join();
                Err(e)
            }
        }
    }

    /// Requests the thread to finish its current read and exit.
    ///
    /// Waits up to the configured stop timeout. Returns `true` if the thread
    /// exited in time. Calling it again is a no-op.
    pub fn stop(&mut self) -> bool {
        if self.handle.is_none() {
            return true;
        }
        self.stop_requested.store(true, Ordering::SeqCst);

        match self.finished.wait(self.stop_timeout) {
            PhaseOutcome::TimedOut { .. } => {
                tracing::warn!(
                    timeout = ?self.stop_timeout,
                    "Audio capture did not stop in time, detaching thread"
                );
                self.handle = None;
                false
            }
            _ => {
                self.join();
                true
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Audio capture thread panicked");
            }
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureWorker {
    stop_requested: Arc<AtomicBool>,
    config: CaptureConfig,
    receiver: Box<dyn CaptureReceiver>,
}

impl CaptureWorker {
    fn run(
        self,
        factory: &AudioInputFactory,
        opened: oneshot::Sender<Result<(), BackendError>>,
        done: PhaseSignal,
    ) {
        let mut input = factory();

        if let Err(e) = self.open_with_retry(input.as_mut()) {
            tracing::error!(error = %e, "Audio capture failed to open device");
            self.receiver
                .on_capture_error(BackendError::device(format!("failed to open device: {e}")));
            let _ = opened.send(Err(e));
            done.succeed();
            return;
        }
        let _ = opened.send(Ok(()));

        tracing::info!(
            sample_rate = self.config.sample_rate,
            channels = self.config.channel_mask.channel_count(),
            chunk_bytes = self.config.chunk_bytes,
            "Audio capture started"
        );

        self.capture_loop(input.as_mut());
        input.close();
        done.succeed();
    }

    fn open_with_retry(&self, input: &mut dyn AudioInput) -> Result<(), BackendError> {
        let mut attempt = 1;
        loop {
            match input.open(self.config.sample_rate, self.config.channel_mask) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.open_attempts => {
                    tracing::debug!(attempt, error = %e, "Audio device open failed, retrying");
                    attempt += 1;
                    std::thread::sleep(self.config.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn capture_loop(&self, input: &mut dyn AudioInput) {
        let mut buf = vec![0u8; self.config.chunk_bytes.max(2)];
        let mut last_pts_us = clock::monotonic_micros();
        let mut chunks: u64 = 0;

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                tracing::info!(chunks, last_pts_us, "Audio capture stopped");
                self.receiver.on_capture_end(last_pts_us);
                return;
            }

            match input.read(&mut buf) {
                Ok(0) => {
                    tracing::error!("Audio device returned no data");
                    self.receiver
                        .on_capture_error(BackendError::device("device read returned 0 bytes"));
                    return;
                }
                Ok(n) => {
                    last_pts_us = clock::monotonic_micros();
                    chunks += 1;
                    self.receiver.on_audio_data(buf[..n].to_vec(), last_pts_us);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Audio device read failed");
                    self.receiver.on_capture_error(e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{audio_input_factory, MockAudioInput};
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Recorded {
        chunks: Vec<(usize, i64)>,
        ends: u32,
        errors: u32,
    }

    struct TestReceiver(Arc<Mutex<Recorded>>);

    impl CaptureReceiver for TestReceiver {
        fn on_audio_data(&self, data: Vec<u8>, pts_us: i64) {
            self.0.lock().chunks.push((data.len(), pts_us));
        }

        fn on_capture_end(&self, _last_pts_us: i64) {
            self.0.lock().ends += 1;
        }

        fn on_capture_error(&self, _error: BackendError) {
            self.0.lock().errors += 1;
        }
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            sample_rate: 16000,
            channel_mask: ChannelMask::Mono,
            chunk_bytes: 2048,
            open_attempts: 5,
            retry_delay: Duration::from_millis(1),
            stop_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_capture_delivers_chunks_then_one_end() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let factory = audio_input_factory(|| Box::new(MockAudioInput::sine(440.0)));

        let mut capture = AudioCapture::start(
            factory,
            fast_config(),
            Box::new(TestReceiver(Arc::clone(&recorded))),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(capture.stop());
        assert!(capture.stop());

        let recorded = recorded.lock();
        assert!(!recorded.chunks.is_empty());
        assert!(recorded.chunks.iter().all(|(len, _)| *len == 2048));
        assert!(recorded.chunks.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(recorded.ends, 1);
        assert_eq!(recorded.errors, 0);
    }

    #[test]
    fn test_capture_retries_open() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let factory =
            audio_input_factory(|| Box::new(MockAudioInput::silence().failing_opens(3)));

        let mut capture = AudioCapture::start(
            factory,
            fast_config(),
            Box::new(TestReceiver(Arc::clone(&recorded))),
        )
        .unwrap();
        capture.stop();
        assert_eq!(recorded.lock().ends, 1);
    }

    #[test]
    fn test_capture_open_failure_reports_error() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let factory =
            audio_input_factory(|| Box::new(MockAudioInput::silence().failing_opens(10)));

        let result = AudioCapture::start(
            factory,
            fast_config(),
            Box::new(TestReceiver(Arc::clone(&recorded))),
        );
        assert!(result.is_err());

        let recorded = recorded.lock();
        assert!(recorded.chunks.is_empty());
        assert_eq!(recorded.ends, 0);
        assert_eq!(recorded.errors, 1);
    }

    #[test]
    fn test_capture_read_error_replaces_end() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let factory = audio_input_factory(|| {
            Box::new(MockAudioInput::silence().unpaced().fail_after_reads(3))
        });

        let mut capture = AudioCapture::start(
            factory,
            fast_config(),
            Box::new(TestReceiver(Arc::clone(&recorded))),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        capture.stop();

        let recorded = recorded.lock();
        assert_eq!(recorded.chunks.len(), 3);
        assert_eq!(recorded.errors, 1);
        assert_eq!(recorded.ends, 0);
    }
}
