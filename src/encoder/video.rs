//! Video encoder actor.
//!
//! Input arrives already rendered into the codec's [`InputSurface`] by the
//! compositor; the actor only drains. It is told about new frames through
//! the [`FrameListener`] it hands to the compositor.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::codec::{Codec, CodecFactory, InputSurface};
use crate::compositor::FrameListener;
use crate::encoder::{shutdown_codec, EncoderContext, EncoderState, OutputDrain};
use crate::event::{EncoderEvent, EncoderInfo};
use crate::pipeline::PhaseSignal;
use crate::sample::{MediaFormat, VideoFormat};
use crate::{BackendError, RecorderError};

/// What the video encoder needs to build its codec.
#[derive(Clone)]
pub(crate) struct VideoSetup {
    pub format: VideoFormat,
    pub codec_factory: CodecFactory,
}

#[derive(Debug)]
enum VideoMessage {
    Prepare {
        signal: PhaseSignal,
        surface: oneshot::Sender<InputSurface>,
    },
    Start(PhaseSignal),
    Stop(PhaseSignal),
    DataAvailable,
    Shutdown,
}

struct FrameNotifier(mpsc::UnboundedSender<VideoMessage>);

impl FrameListener for FrameNotifier {
    fn on_frame_available(&self) {
        let _ = self.0.send(VideoMessage::DataAvailable);
    }
}

/// Handle to the video encoder thread.
pub(crate) struct VideoEncoder {
    tx: mpsc::UnboundedSender<VideoMessage>,
    handle: Option<JoinHandle<()>>,
}

impl VideoEncoder {
    pub fn spawn(ctx: EncoderContext, setup: VideoSetup) -> Result<Self, RecorderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let component = ctx.component();
        let actor = VideoActor::new(ctx, setup);

        let handle = std::thread::Builder::new()
            .name("video-encoder".to_string())
            .spawn(move || actor.run(rx))
            .map_err(|e| RecorderError::device(component, e.to_string()))?;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Requests prepare. The returned receiver yields the codec's input
    /// surface once the signal has reported success.
    pub fn prepare(&self, signal: PhaseSignal) -> oneshot::Receiver<InputSurface> {
        let (surface, receiver) = oneshot::channel();
        self.send(VideoMessage::Prepare { signal, surface });
        receiver
    }

    pub fn start(&self, signal: PhaseSignal) {
        self.send(VideoMessage::Start(signal));
    }

    pub fn stop(&self, signal: PhaseSignal) {
        self.send(VideoMessage::Stop(signal));
    }

    /// Listener to register with the compositor.
    pub fn frame_listener(&self) -> Arc<dyn FrameListener> {
        Arc::new(FrameNotifier(self.tx.clone()))
    }

    pub fn release(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(VideoMessage::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Video encoder thread panicked");
        }
    }

    fn send(&self, message: VideoMessage) {
        if self.tx.send(message).is_err() {
            tracing::warn!("Video encoder mailbox is closed");
        }
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

struct VideoActor {
    ctx: EncoderContext,
    setup: VideoSetup,
    state: EncoderState,
    codec: Option<Box<dyn Codec>>,
    drain: OutputDrain,
    notifications: u64,
    halted: Option<String>,
}

impl VideoActor {
    fn new(ctx: EncoderContext, setup: VideoSetup) -> Self {
        Self {
            drain: OutputDrain::new(ctx.clone()),
            ctx,
            setup,
            state: EncoderState::Unprepared,
            codec: None,
            notifications: 0,
            halted: None,
        }
    }

    fn run(mut self, mut rx: mpsc::UnboundedReceiver<VideoMessage>) {
        while let Some(message) = rx.blocking_recv() {
            match message {
                VideoMessage::Prepare { signal, surface } => self.handle_prepare(signal, surface),
                VideoMessage::Start(signal) => self.handle_start(signal),
                VideoMessage::Stop(signal) => self.handle_stop(signal),
                VideoMessage::DataAvailable => self.handle_data_available(),
                VideoMessage::Shutdown => break,
            }
        }

        shutdown_codec(self.ctx.kind, &mut self.codec);
        tracing::debug!("Video encoder thread exiting");
    }

    fn handle_prepare(&mut self, signal: PhaseSignal, reply: oneshot::Sender<InputSurface>) {
        if self.state != EncoderState::Unprepared {
            signal.fail(format!("video encoder cannot prepare while {:?}", self.state));
            return;
        }

        match self.create_codec() {
            Ok((codec, surface)) => {
                tracing::info!(
                    codec = codec.name(),
                    width = self.setup.format.width,
                    height = self.setup.format.height,
                    frame_rate = self.setup.format.frame_rate,
                    bit_rate = self.setup.format.bit_rate,
                    "Video encoder prepared"
                );
                self.codec = Some(codec);
                self.state = EncoderState::Prepared;
                let _ = reply.send(surface);
                self.ctx.emit(EncoderEvent::Prepared);
                signal.succeed();
            }
            Err(e) => {
                tracing::error!(error = %e, "Video encoder failed to prepare");
                signal.fail(format!("{}: {e}", self.ctx.component()));
            }
        }
    }

    fn create_codec(&self) -> Result<(Box<dyn Codec>, InputSurface), BackendError> {
        let format = MediaFormat::Video(self.setup.format.clone());
        let mut codec = (self.setup.codec_factory)(format.mime())?;
        match codec
            .configure(&format)
            .and_then(|()| codec.create_input_surface())
        {
            Ok(surface) => Ok((codec, surface)),
            Err(e) => {
                codec.release();
                Err(e)
            }
        }
    }

    fn handle_start(&mut self, signal: PhaseSignal) {
        if self.state != EncoderState::Prepared {
            signal.fail(format!("video encoder cannot start while {:?}", self.state));
            return;
        }
        let Some(codec) = self.codec.as_mut() else {
            signal.fail("video encoder has no codec");
            return;
        };

        match codec.start() {
            Ok(()) => {
                self.state = EncoderState::Running;
                tracing::info!("Video encoder started");
                self.ctx.emit(EncoderEvent::Started);
                signal.succeed();
            }
            Err(e) => {
                tracing::error!(error = %e, "Video codec failed to start");
                signal.fail(format!("{}: {e}", self.ctx.component()));
            }
        }
    }

    fn handle_data_available(&mut self) {
        self.notifications += 1;
        if self.state != EncoderState::Running || self.halted.is_some() {
            tracing::trace!(state = ?self.state, "Ignoring frame notification");
            return;
        }
        let Some(codec) = self.codec.as_mut() else {
            return;
        };
        if let Err(e) = self.drain.drain(codec.as_mut(), false) {
            self.halt(&e);
        }
    }

    fn handle_stop(&mut self, signal: PhaseSignal) {
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
                tracing::debug!("Video encoder already stopped");
                signal.succeed();
                return;
            }
            state => {
                signal.fail(format!("video encoder cannot stop while {state:?}"));
                return;
            }
        }
        self.state = EncoderState::Draining;

        if self.halted.is_none() {
            if self.notifications == 0 && self.drain.written() == 0 {
                // The audio encoder may be parked in await_start on this track
                tracing::info!("Video stream produced no frames, cancelling muxer");
                self.ctx.muxer.cancel();
                self.ctx.emit(EncoderEvent::Info(EncoderInfo::EmptyStream));
            } else if let Err(e) = self.finish_stream() {
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
            notifications = self.notifications,
            written = self.drain.written(),
            dropped,
            "Video encoder stopped"
        );
        self.ctx.emit(EncoderEvent::Stopped);

        match &self.halted {
            None => signal.succeed(),
            Some(reason) => signal.fail(reason.clone()),
        }
    }

    fn finish_stream(&mut self) -> Result<(), RecorderError> {
        let Some(codec) = self.codec.as_mut() else {
            return Ok(());
        };
        codec
            .signal_end_of_input_stream()
            .map_err(|e| self.ctx.codec_error(&e))?;
        self.drain.drain(codec.as_mut(), true)?;
        Ok(())
    }

    fn halt(&mut self, error: &RecorderError) {
        tracing::error!(error = %error, "Video encoder drain halted");
        self.ctx.emit(EncoderEvent::Info(EncoderInfo::DrainHalted {
            reason: error.to_string(),
        }));
        self.ctx.muxer.cancel();
        self.halted = Some(error.to_string());
    }
}
