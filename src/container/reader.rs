//! Reader for the interleaved file layout.

use std::path::Path;
use std::time::Duration;

use crate::config::ChannelMask;
use crate::container::file::{HEADER_SIZE, MAGIC, RECORD_HEADER_SIZE, TRAILER_MAGIC, VERSION};
use crate::sample::{AudioFormat, BufferFlags, MediaFormat, TrackKind, VideoFormat};
use crate::BackendError;

/// One track as recorded in a container file.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSummary {
    /// Track index in the file.
    pub index: usize,
    /// Stream kind.
    pub kind: TrackKind,
    /// Stream format including codec-specific data.
    pub format: MediaFormat,
    /// Number of samples written.
    pub sample_count: u64,
    /// Timestamp of the first sample, if any.
    pub first_pts_us: Option<i64>,
    /// Timestamp of the last sample, if any.
    pub last_pts_us: Option<i64>,
}

impl TrackSummary {
    /// Span between the first and last sample.
    #[must_use]
    pub fn duration(&self) -> Duration {
        match (self.first_pts_us, self.last_pts_us) {
            (Some(first), Some(last)) if last > first => {
                Duration::from_micros(u64::try_from(last - first).unwrap_or(0))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Parsed view of a container file.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    /// Rotation hint in degrees.
    pub orientation_hint: u16,
    /// `true` if the writer completed `stop`.
    pub finalized: bool,
    /// Tracks in index order.
    pub tracks: Vec<TrackSummary>,
}

impl ContainerSummary {
    /// Returns the track of the given kind.
    #[must_use]
    pub fn track(&self, kind: TrackKind) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Longest track duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.tracks
            .iter()
            .map(TrackSummary::duration)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// One sample record read back from a container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    /// Track index.
    pub track: usize,
    /// Buffer flags.
    pub flags: BufferFlags,
    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,
    /// Payload.
    pub data: Vec<u8>,
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BackendError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| BackendError::container(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BackendError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, BackendError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, BackendError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, BackendError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, BackendError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, BackendError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

struct Parsed {
    orientation_hint: u16,
    finalized: bool,
    trailer_offset: usize,
    tracks: Vec<(TrackKind, MediaFormat)>,
    records_start: usize,
}

fn read_format(r: &mut ByteReader<'_>, kind: TrackKind) -> Result<MediaFormat, BackendError> {
    let mime_len = usize::from(r.u16()?);
    let mime = String::from_utf8(r.take(mime_len)?.to_vec())
        .map_err(|_| BackendError::container("track MIME is not UTF-8"))?;

    let format = match kind {
        TrackKind::Audio => {
            let sample_rate = r.u32()?;
            let channel_count = r.u16()?;
            let bit_rate = r.u32()?;
            let channel_mask = ChannelMask::from_channel_count(channel_count).ok_or_else(|| {
                BackendError::container(format!("unsupported channel count {channel_count}"))
            })?;
            MediaFormat::Audio(AudioFormat {
                mime,
                sample_rate,
                channel_count,
                channel_mask,
                bit_rate,
                codec_config: Vec::new(),
            })
        }
        TrackKind::Video => MediaFormat::Video(VideoFormat {
            mime,
            width: r.u32()?,
            height: r.u32()?,
            bit_rate: r.u32()?,
            frame_rate: r.u32()?,
            i_frame_interval: r.u32()?,
            codec_config: Vec::new(),
        }),
    };

    let config_len = r.u32()? as usize;
    let config = r.take(config_len)?.to_vec();
    Ok(format.with_codec_config(config))
}

fn parse_header(data: &[u8]) -> Result<Parsed, BackendError> {
    let mut r = ByteReader::new(data, 0);
    if r.take(4)? != MAGIC {
        return Err(BackendError::container("not an interleaved recording"));
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(BackendError::container(format!("unsupported version {version}")));
    }
    let orientation_hint = r.u16()?;
    let finalized = r.u8()? == 1;
    let track_count = r.u8()?;
    let _reserved = r.u16()?;
    let trailer_offset = usize::try_from(r.u64()?)
        .map_err(|_| BackendError::container("trailer offset out of range"))?;
    debug_assert_eq!(r.pos as u64, HEADER_SIZE);

    let mut tracks = Vec::with_capacity(usize::from(track_count));
    for _ in 0..track_count {
        let kind_byte = r.u8()?;
        let kind = TrackKind::from_byte(kind_byte)
            .ok_or_else(|| BackendError::container(format!("unknown track kind {kind_byte}")))?;
        tracks.push((kind, read_format(&mut r, kind)?));
    }

    Ok(Parsed {
        orientation_hint,
        finalized,
        trailer_offset,
        tracks,
        records_start: r.pos,
    })
}

/// Reads records until `end`, stopping quietly at a torn record when the file
/// was never finalized.
fn scan_records(
    data: &[u8],
    parsed: &Parsed,
    mut visit: impl FnMut(SampleRecord),
) -> Result<(), BackendError> {
    let end = if parsed.finalized {
        parsed.trailer_offset
    } else {
        data.len()
    };
    let records = data
        .get(..end)
        .ok_or_else(|| BackendError::container("trailer offset beyond end of file"))?;
    let mut r = ByteReader::new(records, parsed.records_start);

    while r.remaining() > 0 {
        if !parsed.finalized && r.remaining() < RECORD_HEADER_SIZE {
            break;
        }
        let track = usize::from(r.u8()?);
        let flags = BufferFlags::from_bits_truncate(r.u8()?);
        let presentation_time_us = r.i64()?;
        let size = r.u32()? as usize;
        if !parsed.finalized && r.remaining() < size {
            break;
        }
        if track >= parsed.tracks.len() {
            return Err(BackendError::container(format!("record for unknown track {track}")));
        }
        visit(SampleRecord {
            track,
            flags,
            presentation_time_us,
            data: r.take(size)?.to_vec(),
        });
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, BackendError> {
    std::fs::read(path).map_err(|e| BackendError::io(path, e))
}

/// Parses a recording and summarizes its tracks.
///
/// For a finalized file the trailer totals are cross-checked against the
/// sample records. An unfinalized file is summarized from whatever complete
/// records it contains.
///
/// # Errors
///
/// Returns [`BackendError::Io`] if the file cannot be read and
/// [`BackendError::Container`] if it is malformed.
pub fn read_summary(path: impl AsRef<Path>) -> Result<ContainerSummary, BackendError> {
    let data = read_file(path.as_ref())?;
    let parsed = parse_header(&data)?;

    let mut tracks: Vec<TrackSummary> = parsed
        .tracks
        .iter()
        .enumerate()
        .map(|(index, (kind, format))| TrackSummary {
            index,
            kind: *kind,
            format: format.clone(),
            sample_count: 0,
            first_pts_us: None,
            last_pts_us: None,
        })
        .collect();

    scan_records(&data, &parsed, |record| {
        let track = &mut tracks[record.track];
        track.sample_count += 1;
        track.first_pts_us.get_or_insert(record.presentation_time_us);
        track.last_pts_us = Some(record.presentation_time_us);
    })?;

    if parsed.finalized {
        let mut r = ByteReader::new(&data, parsed.trailer_offset);
        if r.take(4)? != TRAILER_MAGIC {
            return Err(BackendError::container("missing trailer"));
        }
        for track in &tracks {
            let count = r.u64()?;
            let _first = r.i64()?;
            let _last = r.i64()?;
            if count != track.sample_count {
                return Err(BackendError::container(format!(
                    "track {} trailer count {count} does not match {} records",
                    track.index, track.sample_count
                )));
            }
        }
    }

    Ok(ContainerSummary {
        orientation_hint: parsed.orientation_hint,
        finalized: parsed.finalized,
        tracks,
    })
}

/// Reads every sample record in file order.
///
/// # Errors
///
/// Same as [`read_summary`].
pub fn read_samples(path: impl AsRef<Path>) -> Result<Vec<SampleRecord>, BackendError> {
    let data = read_file(path.as_ref())?;
    let parsed = parse_header(&data)?;
    let mut records = Vec::new();
    scan_records(&data, &parsed, |record| records.push(record))?;
    Ok(records)
}
