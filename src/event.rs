//! Life-cycle and diagnostic events.
//!
//! Events are notifications, not errors. Fatal failures are returned from
//! the [`Recorder`](crate::Recorder) calls; events tell an observer what the
//! encoders did along the way.

use std::path::PathBuf;
use std::sync::Arc;

use crate::recorder::{RecorderState, RecordingStats};
use crate::sample::TrackKind;

/// Informational codes reported by an encoder actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInfo {
    /// The codec's output format is final and its track is registered.
    TrackRegistered {
        /// Index assigned by the container writer.
        index: usize,
    },
    /// The stream ended without producing a single frame; the muxer was
    /// cancelled instead of finalized.
    EmptyStream,
    /// The capture device failed to open or failed mid-recording; the audio
    /// stream was ended early.
    CaptureFailed {
        /// Device error description.
        reason: String,
    },
    /// The drain loop stopped on a codec or muxer error.
    DrainHalted {
        /// Error description.
        reason: String,
    },
    /// Samples produced before the muxer started were discarded.
    FramesDropped(u64),
}

/// Tagged callback of one encoder actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// Codec configured.
    Prepared,
    /// Codec running.
    Started,
    /// End of stream drained and codec released.
    Stopped,
    /// Diagnostic information.
    Info(EncoderInfo),
}

/// Events emitted by the [`Recorder`](crate::Recorder).
///
/// # Example
///
/// ```
/// use stream_recorder::{EncoderEvent, EncoderInfo, RecorderEvent};
///
/// fn handle_event(event: RecorderEvent) {
///     match event {
///         RecorderEvent::StateChanged { from, to } => {
///             eprintln!("recorder {from:?} -> {to:?}");
///         }
///         RecorderEvent::Encoder {
///             track,
///             event: EncoderEvent::Info(EncoderInfo::EmptyStream),
///         } => {
///             eprintln!("{track} produced no frames");
///         }
///         RecorderEvent::Encoder { .. } => {}
///         RecorderEvent::Finalized { path, stats } => {
///             eprintln!("wrote {} ({} samples)", path.display(), stats.total_samples());
///         }
///         RecorderEvent::Cancelled { path } => {
///             eprintln!("nothing written to {}", path.display());
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// The coordinator changed state.
    StateChanged {
        /// Previous state.
        from: RecorderState,
        /// New state.
        to: RecorderState,
    },
    /// An encoder reported an event.
    Encoder {
        /// Which encoder.
        track: TrackKind,
        /// What it reported.
        event: EncoderEvent,
    },
    /// The output file was finalized.
    Finalized {
        /// Output path.
        path: PathBuf,
        /// Counters for the recording.
        stats: RecordingStats,
    },
    /// The recording stopped without starting the writer; no file was
    /// produced.
    Cancelled {
        /// Output path that was not written.
        path: PathBuf,
    },
}

/// Callback type for receiving recorder events.
///
/// Register one with [`RecorderBuilder::on_event()`](crate::RecorderBuilder::on_event).
/// It is called from the encoder threads as well as the caller's thread, so
/// it should return quickly.
pub type EventCallback = Arc<dyn Fn(RecorderEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_recorder::{event_callback, RecorderEvent};
///
/// let callback = event_callback(|event: RecorderEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(RecorderEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_event_debug() {
        let event = RecorderEvent::Encoder {
            track: TrackKind::Video,
            event: EncoderEvent::Info(EncoderInfo::FramesDropped(3)),
        };
        let debug = format!("{event:?}");
        assert!(debug.contains("Video"));
        assert!(debug.contains("FramesDropped(3)"));
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(RecorderEvent::StateChanged {
            from: RecorderState::Idle,
            to: RecorderState::Preparing,
        });
        assert!(called.load(Ordering::SeqCst));
    }
}
