//! Capture device interface and the inputs shipped with the crate.
//!
//! The [`AudioInput`] trait is what the capture actor reads from. Inputs are
//! created on the capture thread through an [`AudioInputFactory`], so an
//! implementation may hold thread-bound handles such as a CPAL stream.

mod device;
mod mock;

pub use device::CpalAudioInput;
pub use mock::{MockAudioInput, MockSignal};

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::ChannelMask;
use crate::BackendError;

/// A blocking PCM capture device.
///
/// Samples are 16-bit signed little-endian, interleaved.
pub trait AudioInput {
    /// Opens the device at the requested format.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Device`] if the device is unavailable. The
    /// capture actor retries a bounded number of times.
    fn open(&mut self, sample_rate: u32, channel_mask: ChannelMask) -> Result<(), BackendError>;

    /// Blocks until `buf` is filled or the device has nothing more to give,
    /// returning the number of bytes written.
    ///
    /// A return of `Ok(0)` is treated as a device error by the caller.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError>;

    /// Releases the device. Must be safe to call when not open.
    fn close(&mut self);
}

/// Creates a fresh [`AudioInput`] for each recording.
pub type AudioInputFactory = Arc<dyn Fn() -> Box<dyn AudioInput> + Send + Sync>;

/// Wraps a closure into an [`AudioInputFactory`].
///
/// # Example
///
/// ```
/// use stream_recorder::source::{audio_input_factory, MockAudioInput};
///
/// let factory = audio_input_factory(|| Box::new(MockAudioInput::sine(440.0)));
/// ```
pub fn audio_input_factory<F>(f: F) -> AudioInputFactory
where
    F: Fn() -> Box<dyn AudioInput> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Lists all available input devices.
///
/// # Errors
///
/// Returns an error if the audio host cannot be accessed.
pub fn list_input_devices() -> Result<Vec<String>, BackendError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| BackendError::device(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_doesnt_panic() {
        // May be empty in CI
        let _ = list_input_devices();
    }

    #[test]
    fn test_factory_creates_fresh_inputs() {
        let factory = audio_input_factory(|| Box::new(MockAudioInput::silence()));
        let mut a = factory();
        let mut b = factory();
        a.open(8000, ChannelMask::Mono).unwrap();
        b.open(8000, ChannelMask::Mono).unwrap();
        a.close();
        b.close();
    }
}
