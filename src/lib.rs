//! # stream-recorder
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Synchronized audio/video recording into a single container file.
//!
//! `stream-recorder` captures audio from a device, composites live video
//! textures onto an encoder surface, encodes both streams on their own actor
//! threads and interleaves them through a muxer that starts the container
//! only once both tracks are known.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_recorder::{compositor::IDENTITY, clock, Profile, Recorder};
//!
//! # fn main() -> Result<(), stream_recorder::RecorderError> {
//! let mut recorder = Recorder::builder()
//!     .on_event(|e| tracing::info!(?e, "recorder event"))
//!     .build();
//!
//! recorder.set_profile(Profile::builder().video_size(480, 480).build()?)?;
//! recorder.set_output_file("capture.srv")?;
//! recorder.set_preview_size(640, 480);
//!
//! recorder.prepare()?;
//! recorder.start()?;
//!
//! // Called by the camera whenever a new texture is ready
//! recorder.update_frame(1, IDENTITY, clock::monotonic_nanos());
//!
//! let stats = recorder.stop()?;
//! recorder.release();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Every component runs on its own thread and is driven through a mailbox:
//!
//! - **Capture**: reads PCM chunks from an [`AudioInput`](source::AudioInput)
//! - **Audio / Video Encoders**: feed and drain one [`Codec`](codec::Codec) each
//! - **Compositor**: draws producer textures into the video encoder's surface
//! - **Muxer**: the only shared mutable state; serializes every container call
//!
//! The [`Recorder`] sequences prepare, start and stop across both encoders
//! with a fresh two-party barrier per transition, so it never reports
//! "recording" before both tracks are live.

#![warn(missing_docs)]
// Media code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod capture;
pub mod clock;
pub mod codec;
pub mod compositor;
mod config;
pub mod container;
mod encoder;
mod error;
mod event;
pub mod format;
mod muxer;
pub mod pipeline;
mod recorder;
mod sample;
pub mod source;

pub use config::{AudioProfile, ChannelMask, PipelineConfig, Profile, ProfileBuilder, VideoProfile};
pub use error::{BackendError, RecorderError};
pub use event::{event_callback, EncoderEvent, EncoderInfo, EventCallback, RecorderEvent};
pub use muxer::{MuxerState, MuxerStats, StartOutcome, SyncMuxer, TRACK_COUNT};
pub use recorder::{Recorder, RecorderBuilder, RecorderState, RecordingStats};
pub use sample::{
    AudioFormat, BufferFlags, BufferInfo, MediaFormat, Track, TrackKind, VideoFormat,
    AUDIO_MIME_AAC, VIDEO_MIME_AVC,
};
pub use source::list_input_devices;
