//! Container writer interface and the interleaved file format.
//!
//! The muxer drives a [`ContainerWriter`] through
//! `add_track → set_orientation_hint → start → write_sample_data* → stop → release`.
//! [`InterleavedFileWriter`] is the one fixed layout shipped with the crate;
//! [`read_summary`] and [`read_samples`] parse it back.

mod file;
mod reader;

pub use file::InterleavedFileWriter;
pub use reader::{read_samples, read_summary, ContainerSummary, SampleRecord, TrackSummary};

use std::path::Path;
use std::sync::Arc;

use crate::sample::{BufferInfo, MediaFormat};
use crate::BackendError;

/// Writes encoded tracks into one output file.
///
/// Implementations need no internal locking: the muxer serializes every
/// call.
pub trait ContainerWriter: Send {
    /// Registers a track and returns its index. Only valid before `start`.
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, BackendError>;

    /// Records the display rotation in degrees. Only valid before `start`.
    fn set_orientation_hint(&mut self, degrees: u16) -> Result<(), BackendError>;

    /// Opens the output and commits the track layout.
    fn start(&mut self) -> Result<(), BackendError>;

    /// Appends `info.size` bytes of `data`, starting at `info.offset`, to the
    /// given track.
    fn write_sample_data(
        &mut self,
        track_index: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), BackendError>;

    /// Finalizes the output. The file is valid only after this returns.
    fn stop(&mut self) -> Result<(), BackendError>;

    /// Frees resources. Safe in any state and more than once.
    fn release(&mut self);
}

/// Creates a writer for an output path.
pub type ContainerFactory =
    Arc<dyn Fn(&Path) -> Result<Box<dyn ContainerWriter>, BackendError> + Send + Sync>;

/// Wraps a closure into a [`ContainerFactory`].
pub fn container_factory<F>(f: F) -> ContainerFactory
where
    F: Fn(&Path) -> Result<Box<dyn ContainerWriter>, BackendError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Factory producing an [`InterleavedFileWriter`] per recording.
pub fn interleaved_file_factory() -> ContainerFactory {
    container_factory(|path| {
        Ok(Box::new(InterleavedFileWriter::new(path)) as Box<dyn ContainerWriter>)
    })
}
