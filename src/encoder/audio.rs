//! Audio encoder actor.
//!
//! Starts the capture actor on `Start`, feeds each captured chunk into the
//! codec's input buffers and drains the output after every chunk. On `Stop`
//! the capture is stopped first, chunks still in the mailbox are encoded,
//! and the stream is closed with an end-of-stream input buffer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::capture::{AudioCapture, CaptureConfig, CaptureReceiver};
use crate::codec::{Codec, CodecFactory};
use crate::encoder::{
    pcm_duration, shutdown_codec, Drained, EncoderContext, EncoderState, OutputDrain,
};
use crate::event::{EncoderEvent, EncoderInfo};
use crate::pipeline::PhaseSignal;
use crate::sample::{AudioFormat, BufferFlags, MediaFormat};
use crate::source::AudioInputFactory;
use crate::{BackendError, RecorderError};

/// Consecutive empty input dequeues tolerated before a chunk is abandoned.
const MAX_INPUT_STALLS: u32 = 50;

/// What the audio encoder needs to build its codec and capture device.
#[derive(Clone)]
pub(crate) struct AudioSetup {
    pub format: AudioFormat,
    pub codec_factory: CodecFactory,
    pub input_factory: AudioInputFactory,
}

#[derive(Debug)]
enum AudioMessage {
    Prepare(PhaseSignal),
    Start(PhaseSignal),
    Stop(PhaseSignal),
    AudioData { data: Vec<u8>, pts_us: i64 },
    CaptureEnd { last_pts_us: i64 },
    CaptureError(BackendError),
    Shutdown,
}

/// Forwards capture callbacks into the encoder's mailbox.
struct MailboxReceiver(mpsc::UnboundedSender<AudioMessage>);

impl CaptureReceiver for MailboxReceiver {
    fn on_audio_data(&self, data: Vec<u8>, pts_us: i64) {
        let _ = self.0.send(AudioMessage::AudioData { data, pts_us });
    }

    fn on_capture_end(&self, last_pts_us: i64) {
        let _ = self.0.send(AudioMessage::CaptureEnd { last_pts_us });
    }

    fn on_capture_error(&self, error: BackendError) {
        let _ = self.0.send(AudioMessage::CaptureError(error));
    }
}

/// Handle to the audio encoder thread.
pub(crate) struct AudioEncoder {
    tx: mpsc::UnboundedSender<AudioMessage>,
    handle: Option<JoinHandle<()>>,
}

impl AudioEncoder {
    pub fn spawn(ctx: EncoderContext, setup: AudioSetup) -> Result<Self, RecorderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let component = ctx.component();
        let actor = AudioActor::new(ctx, setup, tx.downgrade());

        let handle = std::thread::Builder::new()
            .name("audio-encoder".to_string())
            .spawn(move || actor.run(rx))
            .map_err(|e| RecorderError::device(component, e.to_string()))?;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn prepare(&self, signal: PhaseSignal) {
        self.send(AudioMessage::Prepare(signal));
    }

    pub fn start(&self, signal: PhaseSignal) {
        self.send(AudioMessage::Start(signal));
    }

    pub fn stop(&self, signal: PhaseSignal) {
        self.send(AudioMessage::Stop(signal));
    }

    /// Ends the actor thread, releasing the codec and capture device.
    pub fn release(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(AudioMessage::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Audio encoder thread panicked");
        }
    }

    fn send(&self, message: AudioMessage) {
        // A refused message drops its PhaseSignal, which fails the barrier.
        if self.tx.send(message).is_err() {
            tracing::warn!("Audio encoder mailbox is closed");
        }
    }
}

impl Drop for AudioEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

struct AudioActor {
    ctx: EncoderContext,
    setup: AudioSetup,
    mailbox: mpsc::WeakUnboundedSender<AudioMessage>,
    state: EncoderState,
    codec: Option<Box<dyn Codec>>,
    capture: Option<AudioCapture>,
    drain: OutputDrain,
    deferred: VecDeque<AudioMessage>,
    input_ended: bool,
    eos_drained: bool,
    last_pts_us: i64,
    halted: Option<String>,
}

impl AudioActor {
    fn new(
        ctx: EncoderContext,
        setup: AudioSetup,
        mailbox: mpsc::WeakUnboundedSender<AudioMessage>,
    ) -> Self {
        Self {
            drain: OutputDrain::new(ctx.clone()),
            ctx,
            setup,
            mailbox,
            state: EncoderState::Unprepared,
            codec: None,
            capture: None,
            deferred: VecDeque::new(),
            input_ended: false,
            eos_drained: false,
            last_pts_us: 0,
            halted: None,
        }
    }

    fn run(mut self, mut rx: mpsc::UnboundedReceiver<AudioMessage>) {
        loop {
            let message = match self.deferred.pop_front() {
                Some(message) => message,
                None => match rx.blocking_recv() {
                    Some(message) => message,
                    None => break,
                },
            };

            match message {
                AudioMessage::Prepare(signal) => self.handle_prepare(signal),
                AudioMessage::Start(signal) => self.handle_start(signal),
                AudioMessage::Stop(signal) => self.handle_stop(signal, &mut rx),
                AudioMessage::AudioData { data, pts_us } => self.handle_data(&data, pts_us),
                AudioMessage::CaptureEnd { last_pts_us } => self.handle_capture_end(last_pts_us),
                AudioMessage::CaptureError(error) => self.handle_capture_error(&error),
                AudioMessage::Shutdown => break,
            }
        }

        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        shutdown_codec(self.ctx.kind, &mut self.codec);
        tracing::debug!("Audio encoder thread exiting");
    }

    fn handle_prepare(&mut self, signal: PhaseSignal) {
        if self.state != EncoderState::Unprepared {
            signal.fail(format!("audio encoder cannot prepare while {:?}", self.state));
            return;
        }

        match self.create_codec() {
            Ok(codec) => {
                tracing::info!(
                    codec = codec.name(),
                    sample_rate = self.setup.format.sample_rate,
                    channels = self.setup.format.channel_count,
                    bit_rate = self.setup.format.bit_rate,
                    "Audio encoder prepared"
                );
                self.codec = Some(codec);
                self.state = EncoderState::Prepared;
                self.ctx.emit(EncoderEvent::Prepared);
                signal.succeed();
            }
            Err(e) => {
                tracing::error!(error = %e, "Audio encoder failed to prepare");
                signal.fail(format!("{}: {e}", self.ctx.component()));
            }
        }
    }

    fn create_codec(&self) -> Result<Box<dyn Codec>, BackendError> {
        let format = MediaFormat::Audio(self.setup.format.clone());
        let mut codec = (self.setup.codec_factory)(format.mime())?;
        if let Err(e) = codec.configure(&format) {
            codec.release();
            return Err(e);
        }
        Ok(codec)
    }

    fn handle_start(&mut self, signal: PhaseSignal) {
        if self.state != EncoderState::Prepared {
            signal.fail(format!("audio encoder cannot start while {:?}", self.state));
            return;
        }
        let Some(codec) = self.codec.as_mut() else {
            signal.fail("audio encoder has no codec");
            return;
        };
        if let Err(e) = codec.start() {
            tracing::error!(error = %e, "Audio codec failed to start");
            signal.fail(format!("{}: {e}", self.ctx.component()));
            return;
        }

        let Some(tx) = self.mailbox.upgrade() else {
            signal.fail("audio encoder mailbox is closed");
            return;
        };
        let config = CaptureConfig::new(
            self.setup.format.sample_rate,
            self.setup.format.channel_mask,
            &self.ctx.config,
        );

        match AudioCapture::start(
            Arc::clone(&self.setup.input_factory),
            config,
            Box::new(MailboxReceiver(tx)),
        ) {
            Ok(capture) => {
                self.capture = Some(capture);
                self.state = EncoderState::Running;
                tracing::info!("Audio encoder started");
                self.ctx.emit(EncoderEvent::Started);
                signal.succeed();
            }
            Err(e) => {
                tracing::error!(error = %e, "Audio capture failed to start");
                signal.fail(format!("{}: {e}", self.ctx.component()));
            }
        }
    }

    fn accepts_input(&self) -> bool {
        matches!(self.state, EncoderState::Running | EncoderState::Draining)
            && self.halted.is_none()
            && !self.input_ended
    }

    fn handle_data(&mut self, data: &[u8], pts_us: i64) {
        if !self.accepts_input() {
            tracing::trace!(bytes = data.len(), state = ?self.state, "Ignoring audio chunk");
            return;
        }

        let result = self.feed(data, pts_us);
        if let Err(e) = result.and_then(|()| self.drain_available()) {
            self.halt(&e);
        }
    }

    fn handle_capture_end(&mut self, last_pts_us: i64) {
        self.last_pts_us = self.last_pts_us.max(last_pts_us);
        tracing::debug!(last_pts_us, "Audio capture ended");
    }

    fn handle_capture_error(&mut self, error: &BackendError) {
        tracing::warn!(error = %error, "Audio capture failed, ending audio stream");
        self.ctx.emit(EncoderEvent::Info(EncoderInfo::CaptureFailed {
            reason: error.to_string(),
        }));
        if !self.accepts_input() {
            return;
        }

        let result = self.end_input();
        if let Err(e) = result.and_then(|()| self.drain_available()) {
            self.halt(&e);
        }
    }

    fn handle_stop(&mut self, signal: PhaseSignal, rx: &mut mpsc::UnboundedReceiver<AudioMessage>) {
        match self.state {
            EncoderState::Running => {}
            EncoderState::Prepared => {
                shutdown_codec(self.ctx.kind, &mut self.codec);
                self.state = EncoderState::Stopped;
                self.ctx.emit(EncoderEvent::Stopped);
                signal.succeed();
                return;
            }
            EncoderState::Stopped => {
                tracing::debug!("Audio encoder already stopped");
                signal.succeed();
                return;
            }
            state => {
                signal.fail(format!("audio encoder cannot stop while {state:?}"));
                return;
            }
        }

        self.state = EncoderState::Draining;
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }

        while let Ok(message) = rx.try_recv() {
            match message {
                AudioMessage::AudioData { data, pts_us } => self.handle_data(&data, pts_us),
                AudioMessage::CaptureEnd { last_pts_us } => self.handle_capture_end(last_pts_us),
                AudioMessage::CaptureError(error) => self.handle_capture_error(&error),
                other => self.deferred.push_back(other),
            }
        }

        if self.halted.is_none() {
            if let Err(e) = self.finish_stream() {
                self.halt(&e);
            }
        }

        shutdown_codec(self.ctx.kind, &mut self.codec);
        self.state = EncoderState::Stopped;

        let dropped = self.drain.dropped();
        if dropped > 0 {
            self.ctx.emit(EncoderEvent::Info(EncoderInfo::FramesDropped(dropped)));
        }
        tracing::info!(
            written = self.drain.written(),
            dropped,
            "Audio encoder stopped"
        );
        self.ctx.emit(EncoderEvent::Stopped);

        match &self.halted {
            None => signal.succeed(),
            Some(reason) => signal.fail(reason.clone()),
        }
    }

    fn finish_stream(&mut self) -> Result<(), RecorderError> {
        self.end_input()?;
        if self.eos_drained {
            return Ok(());
        }
        if let Some(codec) = self.codec.as_mut() {
            self.drain.drain(codec.as_mut(), true)?;
            self.eos_drained = true;
        }
        Ok(())
    }

    /// Splits `data` across as many codec input buffers as it needs.
    fn feed(&mut self, data: &[u8], pts_us: i64) -> Result<(), RecorderError> {
        let Some(codec) = self.codec.as_mut() else {
            return Ok(());
        };
        let timeout = self.ctx.config.input_dequeue_timeout;
        let mut offset = 0;
        let mut stalls = 0;

        while offset < data.len() {
            let index = codec
                .dequeue_input_buffer(timeout)
                .map_err(|e| self.ctx.codec_error(&e))?;
            let Some(index) = index else {
                stalls += 1;
                if stalls > MAX_INPUT_STALLS {
                    tracing::warn!(
                        dropped_bytes = data.len() - offset,
                        "Audio codec input stalled, dropping rest of chunk"
                    );
                    break;
                }
                if self.drain.drain(codec.as_mut(), false)? == Drained::EndOfStream {
                    self.eos_drained = true;
                }
                continue;
            };
            stalls = 0;

            let buffer = codec
                .input_buffer(index)
                .map_err(|e| self.ctx.codec_error(&e))?;
            let len = buffer.len().min(data.len() - offset);
            if len == 0 {
                return Err(RecorderError::codec_runtime(
                    self.ctx.component(),
                    "codec input buffer has no capacity",
                ));
            }
            buffer[..len].copy_from_slice(&data[offset..offset + len]);

            let piece_pts = pts_us
                + pcm_duration(
                    offset,
                    self.setup.format.sample_rate,
                    self.setup.format.channel_count,
                )
                .as_micros() as i64;
            codec
                .queue_input_buffer(index, len, piece_pts, BufferFlags::NONE)
                .map_err(|e| self.ctx.codec_error(&e))?;

            self.last_pts_us = self.last_pts_us.max(piece_pts);
            offset += len;
        }
        Ok(())
    }

    /// Queues the end-of-stream input buffer once.
    fn end_input(&mut self) -> Result<(), RecorderError> {
        if self.input_ended {
            return Ok(());
        }
        let Some(codec) = self.codec.as_mut() else {
            return Ok(());
        };
        let timeout = self.ctx.config.input_dequeue_timeout;

        for _ in 0..=MAX_INPUT_STALLS {
            let index = codec
                .dequeue_input_buffer(timeout)
                .map_err(|e| self.ctx.codec_error(&e))?;
            if let Some(index) = index {
                codec
                    .queue_input_buffer(index, 0, self.last_pts_us, BufferFlags::END_OF_STREAM)
                    .map_err(|e| self.ctx.codec_error(&e))?;
                self.input_ended = true;
                tracing::debug!(last_pts_us = self.last_pts_us, "Audio end of stream queued");
                return Ok(());
            }
            if self.drain.drain(codec.as_mut(), false)? == Drained::EndOfStream {
                self.eos_drained = true;
            }
        }

        Err(RecorderError::codec_runtime(
            self.ctx.component(),
            "no input buffer available for end of stream",
        ))
    }

    fn drain_available(&mut self) -> Result<(), RecorderError> {
        if let Some(codec) = self.codec.as_mut() {
            if self.drain.drain(codec.as_mut(), false)? == Drained::EndOfStream {
                self.eos_drained = true;
            }
        }
        Ok(())
    }

    fn halt(&mut self, error: &RecorderError) {
        tracing::error!(error = %error, "Audio encoder drain halted");
        self.ctx.emit(EncoderEvent::Info(EncoderInfo::DrainHalted {
            reason: error.to_string(),
        }));
        self.ctx.muxer.cancel();
        self.halted = Some(error.to_string());
    }
}
