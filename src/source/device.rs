//! CPAL-backed capture device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

use crate::config::ChannelMask;
use crate::format::{f32_to_i16, PcmConverter};
use crate::source::AudioInput;
use crate::BackendError;

/// Seconds of native audio the ring buffer can hold.
const RING_SECONDS: usize = 2;
/// Sleep between ring buffer polls while waiting for a full read.
const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// A read that sees no samples for this long reports the device as stalled.
const STALL_TIMEOUT: Duration = Duration::from_secs(1);

struct OpenStream {
    _stream: Stream,
    consumer: ringbuf::HeapCons<i16>,
    converter: PcmConverter,
    failed: Arc<AtomicBool>,
}

/// Captures from a CPAL input device.
///
/// The CPAL callback only pushes into a lock-free ring buffer; conversion to
/// the requested rate and channel count happens on the capture thread inside
/// [`read`](AudioInput::read).
#[must_use]
pub struct CpalAudioInput {
    device_name: Option<String>,
    stream: Option<OpenStream>,
    pending: Vec<u8>,
    scratch: Vec<i16>,
}

impl CpalAudioInput {
    /// Uses the host's default input device.
    pub fn default_device() -> Self {
        Self {
            device_name: None,
            stream: None,
            pending: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Uses the input device with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            ..Self::default_device()
        }
    }

    fn find_device(&self) -> Result<Device, BackendError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_input_device()
                .ok_or_else(|| BackendError::device("no default input device")),
            Some(name) => host
                .input_devices()
                .map_err(|e| BackendError::device(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| BackendError::device(format!("input device not found: {name}"))),
        }
    }

    fn drain_ring(&mut self) -> usize {
        let Some(open) = self.stream.as_mut() else {
            return 0;
        };
        let available = open.consumer.occupied_len();
        if available == 0 {
            return 0;
        }
        self.scratch.resize(available, 0);
        let popped = open.consumer.pop_slice(&mut self.scratch);
        open.converter
            .convert_into(&self.scratch[..popped], &mut self.pending);
        popped
    }
}

impl AudioInput for CpalAudioInput {
    fn open(&mut self, sample_rate: u32, channel_mask: ChannelMask) -> Result<(), BackendError> {
        self.close();

        let device = self.find_device()?;
        let supported = device
            .default_input_config()
            .map_err(|e| BackendError::device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: CpalStreamConfig = supported.into();
        let native = (config.sample_rate.0, config.channels);

        let capacity = native.0 as usize * usize::from(native.1) * RING_SECONDS;
        let (mut producer, consumer) = HeapRb::<i16>::new(capacity.max(4096)).split();

        let failed = Arc::new(AtomicBool::new(false));
        let error_flag = Arc::clone(&failed);
        let on_error = move |err: cpal::StreamError| {
            tracing::error!(error = %err, "Audio input stream error");
            error_flag.store(true, Ordering::SeqCst);
        };

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    // Never block the callback; overflow drops samples
                    let _ = producer.push_slice(data);
                },
                on_error,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        let _ = producer.try_push(f32_to_i16(sample));
                    }
                },
                on_error,
                None,
            ),
            other => {
                return Err(BackendError::device(format!(
                    "unsupported sample format: {other:?}"
                )));
            }
        }
        .map_err(|e| BackendError::device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| BackendError::device(e.to_string()))?;

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            native_rate = native.0,
            native_channels = native.1,
            sample_rate,
            channels = channel_mask.channel_count(),
            "Audio input opened"
        );

        self.stream = Some(OpenStream {
            _stream: stream,
            consumer,
            converter: PcmConverter::new(native, (sample_rate, channel_mask.channel_count())),
            failed,
        });
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError> {
        let mut last_data = Instant::now();

        while self.pending.len() < buf.len() {
            let Some(open) = self.stream.as_ref() else {
                return Err(BackendError::device("audio input is not open"));
            };
            if open.failed.load(Ordering::SeqCst) {
                return Err(BackendError::device("audio input stream failed"));
            }

            if self.drain_ring() > 0 {
                last_data = Instant::now();
            } else if last_data.elapsed() > STALL_TIMEOUT {
                return Err(BackendError::device("audio input stalled"));
            } else {
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        let n = buf.len();
        buf.copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Audio input closed");
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_open_fails() {
        let mut input = CpalAudioInput::named("does-not-exist");
        let mut buf = [0u8; 64];
        assert!(input.read(&mut buf).is_err());
    }

    #[test]
    fn test_close_without_open() {
        let mut input = CpalAudioInput::default_device();
        input.close();
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_default_device() {
        let mut input = CpalAudioInput::default_device();
        input.open(44100, ChannelMask::Stereo).unwrap();

        let mut buf = [0u8; 2048];
        assert_eq!(input.read(&mut buf).unwrap(), 2048);
        input.close();
    }
}
