//! Error types for stream-recorder.
//!
//! Errors are split into two layers:
//! - **Recorder errors** ([`RecorderError`]): returned by the [`Recorder`](crate::Recorder)
//!   life-cycle calls and fatal to the transition that produced them
//! - **Backend errors** ([`BackendError`]): returned by the external collaborators
//!   (codec, capture device, GPU, container writer) and translated into
//!   recorder errors at the actor boundary
//!
//! A stream that ends with zero frames is not an error; it is reported as
//! [`EncoderInfo::EmptyStream`](crate::EncoderInfo::EmptyStream).

use std::path::PathBuf;
use std::time::Duration;

use crate::recorder::RecorderState;

/// Fatal errors surfaced by the recorder life-cycle.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// Profile or output path missing/invalid before `prepare`.
    #[error("configuration error: {reason}")]
    Configuration {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// A capture device or codec could not be opened or configured.
    #[error("device error in {component}: {reason}")]
    Device {
        /// Component that failed (e.g. "audio encoder").
        component: String,
        /// Description of the failure.
        reason: String,
    },

    /// A codec failed while draining output.
    #[error("codec runtime error in {component}: {reason}")]
    CodecRuntime {
        /// Component that failed.
        component: String,
        /// Description of the failure.
        reason: String,
    },

    /// A life-cycle call was made in a state that does not allow it.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// State the recorder was in.
        state: RecorderState,
    },

    /// The encoders did not reach a barrier in time.
    #[error("timed out after {waited:?} waiting for {phase}")]
    Timeout {
        /// Name of the life-cycle phase.
        phase: &'static str,
        /// How long the coordinator waited.
        waited: Duration,
    },

    /// The muxer rejected an operation.
    #[error("muxer error: {reason}")]
    Muxer {
        /// Description of the failure.
        reason: String,
    },

    /// The recorder has been released and cannot be used again.
    #[error("recorder has been released")]
    Released,
}

impl RecorderError {
    /// Creates a configuration error with the given reason.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a device error for the given component.
    pub fn device(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Device {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Creates a codec runtime error for the given component.
    pub fn codec_runtime(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CodecRuntime {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by the external collaborators of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Codec configuration or runtime failure.
    #[error("codec error: {reason}")]
    Codec {
        /// Description of the failure.
        reason: String,
    },

    /// Capture device failure.
    #[error("device error: {reason}")]
    Device {
        /// Description of the failure.
        reason: String,
    },

    /// GPU context or surface failure.
    #[error("gpu error: {reason}")]
    Gpu {
        /// Description of the failure.
        reason: String,
    },

    /// Container writer failure.
    #[error("container error: {reason}")]
    Container {
        /// Description of the failure.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// Creates a codec error.
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Creates a capture device error.
    pub fn device(reason: impl Into<String>) -> Self {
        Self::Device {
            reason: reason.into(),
        }
    }

    /// Creates a GPU error.
    pub fn gpu(reason: impl Into<String>) -> Self {
        Self::Gpu {
            reason: reason.into(),
        }
    }

    /// Creates a container error.
    pub fn container(reason: impl Into<String>) -> Self {
        Self::Container {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
