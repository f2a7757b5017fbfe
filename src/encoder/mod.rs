//! Encoder actors.
//!
//! Each encoder owns one [`Codec`] on a private thread and processes an
//! ordered mailbox of `Prepare`, `Start`, `Stop` and data messages. Both
//! share [`OutputDrain`], which pulls encoded buffers out of the codec and
//! hands them to the [`SyncMuxer`].
//!
//! Life-cycle messages carry a [`PhaseSignal`](crate::pipeline::PhaseSignal)
//! from the coordinator's barrier for that transition. The actor signals it
//! exactly once, with a failure if the transition did not complete.

mod audio;
mod video;

pub(crate) use audio::{AudioEncoder, AudioSetup};
pub(crate) use video::{VideoEncoder, VideoSetup};

use std::time::{Duration, Instant};

use crate::codec::{Codec, OutputEvent};
use crate::config::PipelineConfig;
use crate::event::{EncoderEvent, EncoderInfo, EventCallback, RecorderEvent};
use crate::muxer::{MuxerState, StartOutcome, SyncMuxer};
use crate::sample::{BufferInfo, MediaFormat, Track, TrackKind};
use crate::{BackendError, RecorderError};

/// Encoder actor life-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EncoderState {
    Unprepared,
    Prepared,
    Running,
    Draining,
    Stopped,
}

/// What every encoder actor needs besides its codec.
#[derive(Clone)]
pub(crate) struct EncoderContext {
    pub kind: TrackKind,
    pub muxer: SyncMuxer,
    pub config: PipelineConfig,
    pub on_event: Option<EventCallback>,
}

impl EncoderContext {
    pub fn emit(&self, event: EncoderEvent) {
        if let Some(callback) = &self.on_event {
            callback(RecorderEvent::Encoder {
                track: self.kind,
                event,
            });
        }
    }

    pub fn component(&self) -> String {
        format!("{} encoder", self.kind)
    }

    pub fn codec_error(&self, error: &BackendError) -> RecorderError {
        RecorderError::codec_runtime(self.component(), error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Pending,
    Registered(Track),
    /// The muxer was cancelled before this track could be used.
    Abandoned,
}

/// How a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drained {
    /// The codec has nothing more right now.
    Pending,
    /// The end-of-stream buffer was written.
    EndOfStream,
}

/// Moves encoded output from a codec into the muxer.
pub(crate) struct OutputDrain {
    ctx: EncoderContext,
    registration: Registration,
    written: u64,
    dropped: u64,
}

impl OutputDrain {
    pub fn new(ctx: EncoderContext) -> Self {
        Self {
            ctx,
            registration: Registration::Pending,
            written: 0,
            dropped: 0,
        }
    }

    /// Samples accepted by the muxer.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Samples the muxer discarded.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drains all currently available output.
    ///
    /// With `until_eos` the drain keeps polling until the end-of-stream
    /// buffer arrives, bounded by the configured end-of-stream timeout.
    pub fn drain(
        &mut self,
        codec: &mut dyn Codec,
        until_eos: bool,
    ) -> Result<Drained, RecorderError> {
        let poll = self.ctx.config.drain_poll_timeout;
        let deadline = until_eos.then(|| Instant::now() + self.ctx.config.eos_drain_timeout);

        loop {
            let event = codec
                .dequeue_output_buffer(poll)
                .map_err(|e| self.ctx.codec_error(&e))?;

            match event {
                OutputEvent::TryAgainLater => match deadline {
                    None => return Ok(Drained::Pending),
                    Some(deadline) if Instant::now() >= deadline => {
                        return Err(RecorderError::codec_runtime(
                            self.ctx.component(),
                            format!(
                                "end of stream not reached within {:?}",
                                self.ctx.config.eos_drain_timeout
                            ),
                        ));
                    }
                    Some(_) => {}
                },
                OutputEvent::FormatChanged(format) => self.register(&format)?,
                OutputEvent::Buffer { index, info } => {
                    let written = self.write(codec, index, &info);
                    codec
                        .release_output_buffer(index)
                        .map_err(|e| self.ctx.codec_error(&e))?;
                    written?;

                    if info.is_end_of_stream() {
                        tracing::debug!(
                            track = %self.ctx.kind,
                            written = self.written,
                            dropped = self.dropped,
                            "Encoder reached end of stream"
                        );
                        return Ok(Drained::EndOfStream);
                    }
                }
            }
        }
    }

    fn register(&mut self, format: &MediaFormat) -> Result<(), RecorderError> {
        if self.registration != Registration::Pending {
            tracing::warn!(track = %self.ctx.kind, "Ignoring repeated output format change");
            return Ok(());
        }

        let track = match self.ctx.muxer.add_track(format) {
            Ok(track) => track,
            Err(e) if self.ctx.muxer.state() == MuxerState::Cancelled => {
                tracing::info!(
                    track = %self.ctx.kind,
                    error = %e,
                    "Muxer cancelled before track registration"
                );
                self.registration = Registration::Abandoned;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.registration = Registration::Registered(track);
        self.ctx.emit(EncoderEvent::Info(EncoderInfo::TrackRegistered {
            index: track.index,
        }));

        let timeout = self.ctx.config.track_sync_timeout;
        match self.ctx.muxer.await_start(timeout) {
            StartOutcome::Started => {
                tracing::debug!(track = %self.ctx.kind, "Muxer running");
            }
            StartOutcome::Cancelled => {
                tracing::info!(
                    track = %self.ctx.kind,
                    "Muxer cancelled while waiting for peer track"
                );
            }
            StartOutcome::TimedOut => {
                // Samples are dropped until the peer registers and starts the writer
                tracing::warn!(
                    track = %self.ctx.kind,
                    timeout = ?timeout,
                    "Peer track not registered yet, continuing without it"
                );
            }
        }
        Ok(())
    }

    fn write(
        &mut self,
        codec: &dyn Codec,
        index: usize,
        info: &BufferInfo,
    ) -> Result<(), RecorderError> {
        if !info.is_media_sample() {
            return Ok(());
        }

        let track = match self.registration {
            Registration::Registered(track) => track,
            Registration::Abandoned => {
                self.dropped += 1;
                return Ok(());
            }
            Registration::Pending => {
                return Err(RecorderError::codec_runtime(
                    self.ctx.component(),
                    "codec produced data before its output format",
                ));
            }
        };

        let buffer = codec
            .output_buffer(index)
            .map_err(|e| self.ctx.codec_error(&e))?;
        let data = buffer.get(info.offset..info.offset + info.size).ok_or_else(|| {
            RecorderError::codec_runtime(
                self.ctx.component(),
                format!(
                    "sample range {}..{} exceeds output buffer of {} bytes",
                    info.offset,
                    info.offset + info.size,
                    buffer.len()
                ),
            )
        })?;

        if self.ctx.muxer.write_sample(track, data, info)? {
            self.written += 1;
        } else {
            self.dropped += 1;
        }
        Ok(())
    }
}

/// Stops and releases a codec, logging failures.
pub(crate) fn shutdown_codec(kind: TrackKind, codec: &mut Option<Box<dyn Codec>>) {
    if let Some(mut codec) = codec.take() {
        if let Err(e) = codec.stop() {
            tracing::debug!(track = %kind, error = %e, "Codec stop failed");
        }
        codec.release();
        tracing::debug!(track = %kind, "Codec released");
    }
}

/// Duration of `bytes` of interleaved 16-bit PCM.
pub(crate) fn pcm_duration(bytes: usize, sample_rate: u32, channels: u16) -> Duration {
    let frame_bytes = 2 * u64::from(channels.max(1));
    let frames = bytes as u64 / frame_bytes;
    Duration::from_micros(frames * 1_000_000 / u64::from(sample_rate.max(1)))
}
