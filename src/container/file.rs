//! Interleaved audio/video file writer.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! header      magic "SRMX" | version u16 | orientation u16 | finalized u8 |
//!             track_count u8 | reserved u16 | trailer_offset u64
//! track table per track: kind u8 | format block
//! records     per sample: track u8 | flags u8 | pts_us i64 | size u32 | data
//! trailer     "TRLR" | per track: sample_count u64 | first_pts i64 | last_pts i64
//! ```
//!
//! The header is written with `finalized = 0` at start and patched at stop,
//! so a file whose recording never completed is recognizable.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::container::ContainerWriter;
use crate::sample::{BufferInfo, MediaFormat};
use crate::BackendError;

pub(crate) const MAGIC: &[u8; 4] = b"SRMX";
pub(crate) const TRAILER_MAGIC: &[u8; 4] = b"TRLR";
pub(crate) const VERSION: u16 = 1;
pub(crate) const HEADER_SIZE: u64 = 20;
pub(crate) const RECORD_HEADER_SIZE: usize = 1 + 1 + 8 + 4;

/// Byte offset of the finalized flag.
const FINALIZED_OFFSET: u64 = 8;
/// Byte offset of the trailer offset field.
const TRAILER_OFFSET_OFFSET: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Initialized,
    Started,
    Stopped,
    Released,
}

#[derive(Debug, Clone, Copy, Default)]
struct TrackTotals {
    samples: u64,
    first_pts: Option<i64>,
    last_pts: Option<i64>,
}

/// Writes the interleaved layout described in the module docs.
///
/// Nothing touches the filesystem until [`start`](ContainerWriter::start), so a
/// recording that is cancelled before both tracks register leaves no file.
///
/// # Example
///
/// ```no_run
/// use stream_recorder::container::{ContainerWriter, InterleavedFileWriter};
///
/// let mut writer = InterleavedFileWriter::new("recording.srmx");
/// // add_track for audio and video, then start, write, stop
/// ```
pub struct InterleavedFileWriter {
    path: PathBuf,
    tracks: Vec<MediaFormat>,
    totals: Vec<TrackTotals>,
    orientation: u16,
    writer: Option<BufWriter<File>>,
    state: WriterState,
}

impl InterleavedFileWriter {
    /// Creates a writer for `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tracks: Vec::new(),
            totals: Vec::new(),
            orientation: 0,
            writer: None,
            state: WriterState::Initialized,
        }
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, e: std::io::Error) -> BackendError {
        BackendError::io(&self.path, e)
    }

    fn expect_state(&self, expected: WriterState, operation: &str) -> Result<(), BackendError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BackendError::container(format!(
                "cannot {operation} while {:?}",
                self.state
            )))
        }
    }

    fn write_header(&self, out: &mut impl Write) -> std::io::Result<()> {
        out.write_all(MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&self.orientation.to_le_bytes())?;
        out.write_all(&[0u8])?;
        out.write_all(&[self.tracks.len() as u8])?;
        out.write_all(&0u16.to_le_bytes())?;
        out.write_all(&0u64.to_le_bytes())?;

        for format in &self.tracks {
            out.write_all(&[format.kind().as_byte()])?;
            write_format(out, format)?;
        }
        Ok(())
    }

    fn write_trailer_and_patch(&mut self) -> std::io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let trailer_offset = writer.stream_position()?;
        writer.write_all(TRAILER_MAGIC)?;
        for totals in &self.totals {
            writer.write_all(&totals.samples.to_le_bytes())?;
            writer.write_all(&totals.first_pts.unwrap_or(0).to_le_bytes())?;
            writer.write_all(&totals.last_pts.unwrap_or(0).to_le_bytes())?;
        }

        writer.seek(SeekFrom::Start(FINALIZED_OFFSET))?;
        writer.write_all(&[1u8])?;
        writer.seek(SeekFrom::Start(TRAILER_OFFSET_OFFSET))?;
        writer.write_all(&trailer_offset.to_le_bytes())?;
        writer.seek(SeekFrom::End(0))?;
        writer.flush()
    }
}

fn write_format(out: &mut impl Write, format: &MediaFormat) -> std::io::Result<()> {
    let mime = format.mime().as_bytes();
    out.write_all(&(mime.len() as u16).to_le_bytes())?;
    out.write_all(mime)?;

    match format {
        MediaFormat::Audio(audio) => {
            out.write_all(&audio.sample_rate.to_le_bytes())?;
            out.write_all(&audio.channel_count.to_le_bytes())?;
            out.write_all(&audio.bit_rate.to_le_bytes())?;
        }
        MediaFormat::Video(video) => {
            out.write_all(&video.width.to_le_bytes())?;
            out.write_all(&video.height.to_le_bytes())?;
            out.write_all(&video.bit_rate.to_le_bytes())?;
            out.write_all(&video.frame_rate.to_le_bytes())?;
            out.write_all(&video.i_frame_interval.to_le_bytes())?;
        }
    }

    let config = format.codec_config();
    out.write_all(&(config.len() as u32).to_le_bytes())?;
    out.write_all(config)
}

impl ContainerWriter for InterleavedFileWriter {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, BackendError> {
        self.expect_state(WriterState::Initialized, "add track")?;
        if self.tracks.len() >= usize::from(u8::MAX) {
            return Err(BackendError::container("too many tracks"));
        }
        self.tracks.push(format.clone());
        self.totals.push(TrackTotals::default());
        Ok(self.tracks.len() - 1)
    }

    fn set_orientation_hint(&mut self, degrees: u16) -> Result<(), BackendError> {
        self.expect_state(WriterState::Initialized, "set orientation")?;
        self.orientation = degrees;
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.expect_state(WriterState::Initialized, "start")?;
        if self.tracks.is_empty() {
            return Err(BackendError::container("no tracks registered"));
        }

        let file = File::create(&self.path).map_err(|e| self.io_err(e))?;
        let mut writer = BufWriter::new(file);
        self.write_header(&mut writer).map_err(|e| self.io_err(e))?;
        // An unfinished recording must be recognizable on disk
        writer.flush().map_err(|e| self.io_err(e))?;

        tracing::debug!(
            path = %self.path.display(),
            tracks = self.tracks.len(),
            "Container started"
        );
        self.writer = Some(writer);
        self.state = WriterState::Started;
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track_index: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), BackendError> {
        self.expect_state(WriterState::Started, "write sample")?;
        let end = info.offset.checked_add(info.size);
        let payload = end
            .and_then(|end| data.get(info.offset..end))
            .ok_or_else(|| {
                BackendError::container(format!(
                    "sample range {}+{} exceeds buffer of {} bytes",
                    info.offset,
                    info.size,
                    data.len()
                ))
            })?;
        let size = u32::try_from(payload.len())
            .map_err(|_| BackendError::container("sample larger than 4 GiB"))?;
        let Some(totals) = self.totals.get_mut(track_index) else {
            return Err(BackendError::container(format!("unknown track {track_index}")));
        };

        totals.samples += 1;
        totals.first_pts.get_or_insert(info.presentation_time_us);
        totals.last_pts = Some(info.presentation_time_us);

        let Some(writer) = self.writer.as_mut() else {
            return Err(BackendError::container("writer is not open"));
        };
        let mut record = [0u8; RECORD_HEADER_SIZE];
        record[0] = track_index as u8;
        record[1] = info.flags.bits();
        record[2..10].copy_from_slice(&info.presentation_time_us.to_le_bytes());
        record[10..14].copy_from_slice(&size.to_le_bytes());

        writer
            .write_all(&record)
            .and_then(|()| writer.write_all(payload))
            .map_err(|e| BackendError::io(&self.path, e))
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.expect_state(WriterState::Started, "stop")?;
        self.write_trailer_and_patch().map_err(|e| self.io_err(e))?;
        self.writer = None;
        self.state = WriterState::Stopped;

        tracing::debug!(
            path = %self.path.display(),
            samples = self.totals.iter().map(|t| t.samples).sum::<u64>(),
            "Container finalized"
        );
        Ok(())
    }

    fn release(&mut self) {
        if self.state == WriterState::Started {
            tracing::warn!(path = %self.path.display(), "Container released without stop");
        }
        self.writer = None;
        self.state = WriterState::Released;
    }
}
