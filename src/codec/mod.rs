//! Codec interface consumed by the encoder actors.
//!
//! The interface mirrors a buffer-queue codec: raw input goes in through
//! dequeued input buffers (audio) or an [`InputSurface`] (video), and encoded
//! output is polled with [`Codec::dequeue_output_buffer`]. A codec reports
//! its final output format through [`OutputEvent::FormatChanged`] exactly
//! once, before any data buffer.

mod raw;
mod surface;

pub use raw::RawCodec;
pub use surface::{InputSurface, RenderedFrame};

use std::sync::Arc;
use std::time::Duration;

use crate::sample::{BufferFlags, BufferInfo, MediaFormat};
use crate::BackendError;

/// Result of polling a codec for output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// An output buffer is ready at `index`; read it with
    /// [`Codec::output_buffer`] and hand it back with
    /// [`Codec::release_output_buffer`].
    Buffer {
        /// Output buffer index.
        index: usize,
        /// Payload metadata.
        info: BufferInfo,
    },
    /// The output format is final. Carries codec-specific data.
    FormatChanged(MediaFormat),
    /// Nothing became available within the timeout.
    TryAgainLater,
}

/// An encoder instance owned by exactly one encoder actor thread.
pub trait Codec: Send {
    /// Codec name for logs.
    fn name(&self) -> &str;

    /// Applies the stream format. Must be called before `start`.
    fn configure(&mut self, format: &MediaFormat) -> Result<(), BackendError>;

    /// Creates the surface the compositor renders into. Video only; call
    /// after `configure` and before `start`.
    fn create_input_surface(&mut self) -> Result<InputSurface, BackendError>;

    /// Starts accepting input.
    fn start(&mut self) -> Result<(), BackendError>;

    /// Returns a free input buffer index, waiting up to `timeout`.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>, BackendError>;

    /// Writable view of a dequeued input buffer.
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], BackendError>;

    /// Submits `size` bytes of a dequeued input buffer.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<(), BackendError>;

    /// Polls for output, waiting up to `timeout`.
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent, BackendError>;

    /// Read-only view of a dequeued output buffer.
    fn output_buffer(&self, index: usize) -> Result<&[u8], BackendError>;

    /// Returns an output buffer to the codec.
    fn release_output_buffer(&mut self, index: usize) -> Result<(), BackendError>;

    /// Ends surface input; the codec emits an end-of-stream buffer once the
    /// remaining frames are drained.
    fn signal_end_of_input_stream(&mut self) -> Result<(), BackendError>;

    /// Stops the codec. Buffers are invalidated.
    fn stop(&mut self) -> Result<(), BackendError>;

    /// Frees all codec resources. Safe to call more than once.
    fn release(&mut self);
}

/// Creates a codec for a MIME type such as `video/avc`.
pub type CodecFactory = Arc<dyn Fn(&str) -> Result<Box<dyn Codec>, BackendError> + Send + Sync>;

/// Wraps a closure into a [`CodecFactory`].
pub fn codec_factory<F>(f: F) -> CodecFactory
where
    F: Fn(&str) -> Result<Box<dyn Codec>, BackendError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Factory that serves every MIME type with a [`RawCodec`].
pub fn raw_codec_factory() -> CodecFactory {
    codec_factory(|mime| Ok(Box::new(RawCodec::new(mime)) as Box<dyn Codec>))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_boxed_codec_moves_to_actor_thread() {
        assert_send::<Box<dyn Codec>>();

        let mut codec = raw_codec_factory()(crate::AUDIO_MIME_AAC).unwrap();
        let name = std::thread::spawn(move || {
            let name = codec.name().to_string();
            codec.release();
            name
        })
        .join()
        .unwrap();
        assert!(name.contains(crate::AUDIO_MIME_AAC));
    }
}
