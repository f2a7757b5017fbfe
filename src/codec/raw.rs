//! Software passthrough codec.
//!
//! `RawCodec` does no compression. It behaves like a buffer-queue encoder in
//! every observable way: one format change, a codec config buffer, one
//! output buffer per input buffer or rendered frame, and a final empty
//! end-of-stream buffer. That makes the whole pipeline runnable without a
//! platform encoder.

use std::collections::VecDeque;
use std::time::Duration;

use crate::codec::{Codec, InputSurface, OutputEvent, RenderedFrame};
use crate::sample::{BufferFlags, BufferInfo, MediaFormat, TrackKind};
use crate::BackendError;

const INPUT_BUFFER_COUNT: usize = 4;
const DEFAULT_INPUT_BUFFER_SIZE: usize = 4096;
const OUTPUT_SLOT_COUNT: usize = 8;
const SURFACE_CAPACITY: usize = 8;
const CONFIG_MAGIC: &[u8; 4] = b"RAWC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecState {
    Uninitialized,
    Configured,
    Running,
    Stopped,
    Released,
}

#[derive(Debug)]
struct Packet {
    data: Vec<u8>,
    pts_us: i64,
    flags: BufferFlags,
}

/// Passthrough encoder for any MIME type.
///
/// Audio output buffers carry the submitted PCM bytes. Video output buffers
/// carry a compact record of each rendered frame: texture id, presentation
/// time in nanoseconds, and the MVP matrix.
///
/// # Example
///
/// ```
/// use stream_recorder::codec::{Codec, OutputEvent, RawCodec};
/// use stream_recorder::{BufferFlags, Profile, MediaFormat};
/// use std::time::Duration;
///
/// let profile = Profile::builder().build().unwrap();
/// let format = MediaFormat::Audio(profile.audio_format());
///
/// let mut codec = RawCodec::new(format.mime());
/// codec.configure(&format).unwrap();
/// codec.start().unwrap();
///
/// let index = codec.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
/// codec.input_buffer(index).unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
/// codec.queue_input_buffer(index, 4, 0, BufferFlags::NONE).unwrap();
///
/// let first = codec.dequeue_output_buffer(Duration::ZERO).unwrap();
/// assert!(matches!(first, OutputEvent::FormatChanged(_)));
/// ```
#[derive(Debug)]
pub struct RawCodec {
    name: String,
    mime: String,
    state: CodecState,
    format: Option<MediaFormat>,
    surface: Option<InputSurface>,
    input_size: usize,
    inputs: Vec<Vec<u8>>,
    input_dequeued: Vec<bool>,
    free_inputs: VecDeque<usize>,
    pending: VecDeque<Packet>,
    outputs: Vec<Option<Vec<u8>>>,
    format_reported: bool,
    input_ended: bool,
    eos_queued: bool,
    frames_encoded: u64,
    last_pts_us: i64,
}

impl RawCodec {
    /// Creates a codec that accepts formats of the given MIME type.
    pub fn new(mime: &str) -> Self {
        Self {
            name: format!("raw:{mime}"),
            mime: mime.to_string(),
            state: CodecState::Uninitialized,
            format: None,
            surface: None,
            input_size: DEFAULT_INPUT_BUFFER_SIZE,
            inputs: Vec::new(),
            input_dequeued: Vec::new(),
            free_inputs: VecDeque::new(),
            pending: VecDeque::new(),
            outputs: Vec::new(),
            format_reported: false,
            input_ended: false,
            eos_queued: false,
            frames_encoded: 0,
            last_pts_us: 0,
        }
    }

    /// Sets the capacity of each input buffer. Takes effect at `configure`.
    #[must_use]
    pub fn with_input_buffer_size(mut self, bytes: usize) -> Self {
        self.input_size = bytes.max(1);
        self
    }

    fn kind(&self) -> Option<TrackKind> {
        self.format.as_ref().map(MediaFormat::kind)
    }

    fn ensure_running(&self, operation: &str) -> Result<(), BackendError> {
        if self.state == CodecState::Running {
            Ok(())
        } else {
            Err(BackendError::codec(format!(
                "{}: cannot {operation} in state {:?}",
                self.name, self.state
            )))
        }
    }

    fn keyframe_interval(&self) -> u64 {
        match &self.format {
            Some(MediaFormat::Video(video)) => {
                u64::from(video.frame_rate.saturating_mul(video.i_frame_interval)).max(1)
            }
            _ => 1,
        }
    }

    fn encode_frame(&mut self, frame: &RenderedFrame) {
        let mut data = Vec::with_capacity(4 + 8 + 64);
        data.extend_from_slice(&frame.texture_id.to_le_bytes());
        data.extend_from_slice(&frame.presentation_time_ns.to_le_bytes());
        for value in frame.mvp {
            data.extend_from_slice(&value.to_le_bytes());
        }

        let flags = if self.frames_encoded % self.keyframe_interval() == 0 {
            BufferFlags::KEYFRAME
        } else {
            BufferFlags::NONE
        };
        let pts_us = frame.presentation_time_ns / 1000;
        self.frames_encoded += 1;
        self.last_pts_us = pts_us;
        self.pending.push_back(Packet {
            data,
            pts_us,
            flags,
        });
    }

    fn pull_surface_frames(&mut self, timeout: Duration) {
        let Some(surface) = self.surface.clone() else {
            return;
        };
        if self.pending.is_empty() && !self.input_ended {
            if let Some(frame) = surface.wait_frame(timeout) {
                self.encode_frame(&frame);
            }
        }
        while let Some(frame) = surface.try_take() {
            self.encode_frame(&frame);
        }
    }

    fn codec_config(&self) -> Vec<u8> {
        let mut config = CONFIG_MAGIC.to_vec();
        config.extend_from_slice(self.mime.as_bytes());
        config
    }

    fn has_output(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl Codec for RawCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, format: &MediaFormat) -> Result<(), BackendError> {
        if !matches!(self.state, CodecState::Uninitialized | CodecState::Stopped) {
            return Err(BackendError::codec(format!(
                "{}: cannot configure in state {:?}",
                self.name, self.state
            )));
        }
        if format.mime() != self.mime {
            return Err(BackendError::codec(format!(
                "{}: format MIME {} does not match",
                self.name,
                format.mime()
            )));
        }

        self.format = Some(format.clone());
        self.inputs = vec![vec![0; self.input_size]; INPUT_BUFFER_COUNT];
        self.input_dequeued = vec![false; INPUT_BUFFER_COUNT];
        self.free_inputs = (0..INPUT_BUFFER_COUNT).collect();
        self.outputs = vec![None; OUTPUT_SLOT_COUNT];
        self.pending.clear();
        self.format_reported = false;
        self.input_ended = false;
        self.eos_queued = false;
        self.frames_encoded = 0;
        self.last_pts_us = 0;
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, BackendError> {
        if self.state != CodecState::Configured {
            return Err(BackendError::codec(format!(
                "{}: input surface requires a configured codec",
                self.name
            )));
        }
        match &self.format {
            Some(MediaFormat::Video(video)) => {
                let surface = InputSurface::new(video.width, video.height, SURFACE_CAPACITY);
                self.surface = Some(surface.clone());
                Ok(surface)
            }
            _ => Err(BackendError::codec(format!(
                "{}: input surfaces are only available for video",
                self.name
            ))),
        }
    }

    fn start(&mut self) -> Result<(), BackendError> {
        if self.state != CodecState::Configured {
            return Err(BackendError::codec(format!(
                "{}: cannot start in state {:?}",
                self.name, self.state
            )));
        }
        self.state = CodecState::Running;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>, BackendError> {
        self.ensure_running("dequeue input")?;
        if self.surface.is_some() {
            return Err(BackendError::codec(format!(
                "{}: surface input codecs have no input buffers",
                self.name
            )));
        }
        if self.input_ended {
            return Ok(None);
        }

        match self.free_inputs.pop_front() {
            Some(index) => {
                self.input_dequeued[index] = true;
                Ok(Some(index))
            }
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], BackendError> {
        if !self.input_dequeued.get(index).copied().unwrap_or(false) {
            return Err(BackendError::codec(format!(
                "{}: input buffer {index} is not dequeued",
                self.name
            )));
        }
        Ok(&mut self.inputs[index])
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<(), BackendError> {
        self.ensure_running("queue input")?;
        if !self.input_dequeued.get(index).copied().unwrap_or(false) {
            return Err(BackendError::codec(format!(
                "{}: input buffer {index} is not dequeued",
                self.name
            )));
        }
        if size > self.input_size {
            return Err(BackendError::codec(format!(
                "{}: {size} bytes exceeds input buffer capacity {}",
                self.name, self.input_size
            )));
        }

        self.input_dequeued[index] = false;
        self.free_inputs.push_back(index);

        if size > 0 {
            self.pending.push_back(Packet {
                data: self.inputs[index][..size].to_vec(),
                pts_us: presentation_time_us,
                flags: BufferFlags::KEYFRAME,
            });
            self.frames_encoded += 1;
        }
        self.last_pts_us = self.last_pts_us.max(presentation_time_us);

        if flags.contains(BufferFlags::END_OF_STREAM) {
            self.input_ended = true;
            self.eos_queued = true;
            self.pending.push_back(Packet {
                data: Vec::new(),
                pts_us: self.last_pts_us,
                flags: BufferFlags::END_OF_STREAM,
            });
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent, BackendError> {
        self.ensure_running("dequeue output")?;

        if self.kind() == Some(TrackKind::Video) {
            self.pull_surface_frames(timeout);
            let drained = self.surface.as_ref().map_or(true, |s| s.pending() == 0);
            if self.input_ended && !self.eos_queued && drained {
                self.eos_queued = true;
                self.pending.push_back(Packet {
                    data: Vec::new(),
                    pts_us: self.last_pts_us,
                    flags: BufferFlags::END_OF_STREAM,
                });
            }
        }

        if !self.has_output() {
            return Ok(OutputEvent::TryAgainLater);
        }

        if !self.format_reported {
            self.format_reported = true;
            let config = self.codec_config();
            self.pending.push_front(Packet {
                data: config.clone(),
                pts_us: 0,
                flags: BufferFlags::CONFIG,
            });
            let format = self
                .format
                .clone()
                .ok_or_else(|| BackendError::codec("running codec has no format"))?;
            return Ok(OutputEvent::FormatChanged(format.with_codec_config(config)));
        }

        let Some(slot) = self.outputs.iter().position(Option::is_none) else {
            // Consumer holds every output buffer
            return Ok(OutputEvent::TryAgainLater);
        };
        let Some(packet) = self.pending.pop_front() else {
            return Ok(OutputEvent::TryAgainLater);
        };

        let info = BufferInfo::new(packet.data.len(), packet.pts_us, packet.flags);
        self.outputs[slot] = Some(packet.data);
        Ok(OutputEvent::Buffer { index: slot, info })
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], BackendError> {
        self.outputs
            .get(index)
            .and_then(Option::as_deref)
            .ok_or_else(|| {
                BackendError::codec(format!("{}: output buffer {index} is not dequeued", self.name))
            })
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<(), BackendError> {
        match self.outputs.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(BackendError::codec(format!(
                "{}: output buffer {index} is not dequeued",
                self.name
            ))),
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), BackendError> {
        self.ensure_running("signal end of stream")?;
        if self.surface.is_none() {
            return Err(BackendError::codec(format!(
                "{}: end of input stream requires surface input",
                self.name
            )));
        }
        self.input_ended = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        if matches!(self.state, CodecState::Uninitialized | CodecState::Released) {
            return Err(BackendError::codec(format!(
                "{}: cannot stop in state {:?}",
                self.name, self.state
            )));
        }
        self.pending.clear();
        self.outputs.iter_mut().for_each(|slot| *slot = None);
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        self.state = CodecState::Stopped;
        Ok(())
    }

    fn release(&mut self) {
        if self.state == CodecState::Released {
            return;
        }
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        self.pending.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.format = None;
        self.state = CodecState::Released;
    }
}
