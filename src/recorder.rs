//! Pipeline coordinator.
//!
//! The [`Recorder`] owns the profile, the output path, the compositor and,
//! for each recording cycle, a fresh muxer and pair of encoder actors. Every
//! life-cycle transition is a [`PhaseBarrier`] of two: the call returns only
//! once both encoders have reported in (or the transition timeout elapses).
//!
//! ```text
//!   Idle ──prepare──▶ Preparing ──▶ Prepared ──start──▶ Recording
//!    ▲                    │                                 │
//!    └──────(failure)─────┘                               stop
//!    ▲                                                      ▼
//!    └──────────────────────────────────────────────── Stopping
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::{raw_codec_factory, CodecFactory};
use crate::compositor::{headless_gpu_factory, Compositor, GpuFactory, Mat4, SharedContext};
use crate::container::{interleaved_file_factory, ContainerFactory};
use crate::encoder::{AudioEncoder, AudioSetup, EncoderContext, VideoEncoder, VideoSetup};
use crate::event::RecorderEvent;
use crate::muxer::{SyncMuxer, TRACK_COUNT};
use crate::pipeline::{PhaseBarrier, PhaseOutcome};
use crate::sample::TrackKind;
use crate::source::{audio_input_factory, AudioInput, AudioInputFactory, CpalAudioInput};
use crate::{EventCallback, PipelineConfig, Profile, RecorderError};

/// Life-cycle state of the [`Recorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No recording cycle exists.
    Idle,
    /// Encoders are configuring their codecs.
    Preparing,
    /// Both encoders are configured; the compositor is attached.
    Prepared,
    /// Both encoders are running.
    Recording,
    /// Encoders are draining their end of stream.
    Stopping,
    /// Resources are gone; the recorder cannot be used again.
    Released,
}

/// Counters for one finished recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingStats {
    /// Audio samples written to the container.
    pub audio_samples: u64,
    /// Video samples written to the container.
    pub video_samples: u64,
    /// Samples discarded because the muxer was not started.
    pub dropped_samples: u64,
    /// Frames the compositor drew into the encoder surface.
    pub frames_rendered: u64,
    /// Producer frames replaced by a newer one before being drawn.
    pub frames_superseded: u64,
    /// Whether the container was finalized.
    pub finalized: bool,
}

impl RecordingStats {
    /// Samples written across both tracks.
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.audio_samples + self.video_samples
    }
}

/// Builder for a [`Recorder`].
///
/// Every collaborator has a working default: the [`RawCodec`](crate::codec::RawCodec),
/// the default CPAL input device, the [`HeadlessGpu`](crate::compositor::HeadlessGpu)
/// and the [`InterleavedFileWriter`](crate::container::InterleavedFileWriter).
///
/// # Example
///
/// ```
/// use stream_recorder::{PipelineConfig, Recorder};
/// use stream_recorder::source::{audio_input_factory, MockAudioInput};
///
/// let recorder = Recorder::builder()
///     .audio_input(audio_input_factory(|| Box::new(MockAudioInput::sine(440.0))))
///     .with_config(PipelineConfig::default())
///     .on_event(|event| println!("{event:?}"))
///     .build();
/// ```
#[must_use]
pub struct RecorderBuilder {
    codec_factory: CodecFactory,
    input_factory: AudioInputFactory,
    gpu_factory: GpuFactory,
    container_factory: ContainerFactory,
    shared_context: Option<SharedContext>,
    on_event: Option<EventCallback>,
    config: PipelineConfig,
}

impl Default for RecorderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderBuilder {
    /// Creates a builder with the default collaborators.
    pub fn new() -> Self {
        Self {
            codec_factory: raw_codec_factory(),
            input_factory: audio_input_factory(|| {
                Box::new(CpalAudioInput::default_device()) as Box<dyn AudioInput>
            }),
            gpu_factory: headless_gpu_factory(),
            container_factory: interleaved_file_factory(),
            shared_context: None,
            on_event: None,
            config: PipelineConfig::default(),
        }
    }

    /// Sets the factory that selects a codec by MIME type.
    pub fn codec_factory(mut self, factory: CodecFactory) -> Self {
        self.codec_factory = factory;
        self
    }

    /// Sets the factory for the capture device, called once per recording.
    pub fn audio_input(mut self, factory: AudioInputFactory) -> Self {
        self.input_factory = factory;
        self
    }

    /// Sets the GPU backend used by the compositor.
    pub fn gpu_factory(mut self, factory: GpuFactory) -> Self {
        self.gpu_factory = factory;
        self
    }

    /// Sets the factory for the container writer, called once per recording.
    pub fn container_factory(mut self, factory: ContainerFactory) -> Self {
        self.container_factory = factory;
        self
    }

    /// Shares GPU resources with the producer's context.
    pub fn shared_context(mut self, context: SharedContext) -> Self {
        self.shared_context = Some(context);
        self
    }

    /// Registers the event callback.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(RecorderEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(f));
        self
    }

    /// Sets the actor timing and sizing knobs.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds an idle recorder. No thread is started until `prepare`.
    pub fn build(self) -> Recorder {
        Recorder {
            codec_factory: self.codec_factory,
            input_factory: self.input_factory,
            gpu_factory: self.gpu_factory,
            container_factory: self.container_factory,
            shared_context: self.shared_context,
            on_event: self.on_event,
            config: self.config,
            profile: None,
            output_file: None,
            preview_size: None,
            state: RecorderState::Idle,
            compositor: None,
            cycle: None,
        }
    }
}

/// Muxer and encoders of one prepare → stop cycle.
struct ActiveRecording {
    muxer: SyncMuxer,
    audio: AudioEncoder,
    video: VideoEncoder,
    path: PathBuf,
}

impl Drop for ActiveRecording {
    fn drop(&mut self) {
        self.audio.release();
        self.video.release();
        self.muxer.release();
    }
}

/// Records synchronized audio and composited video into one container file.
///
/// Life-cycle calls block until both encoders have completed the transition.
/// The recorder is not reentrant: calls must be serialized by the caller.
///
/// # Example
///
/// ```no_run
/// use stream_recorder::{compositor::IDENTITY, Profile, Recorder};
///
/// # fn main() -> Result<(), stream_recorder::RecorderError> {
/// let mut recorder = Recorder::new();
/// recorder.set_profile(Profile::builder().video_size(480, 480).build()?)?;
/// recorder.set_output_file("capture.srv")?;
/// recorder.set_preview_size(640, 480);
///
/// recorder.prepare()?;
/// recorder.start()?;
/// for frame in 0..30 {
///     recorder.update_frame(1, IDENTITY, frame * 33_333_333);
/// }
/// let stats = recorder.stop()?;
/// recorder.release();
/// # Ok(())
/// # }
/// ```
pub struct Recorder {
    codec_factory: CodecFactory,
    input_factory: AudioInputFactory,
    gpu_factory: GpuFactory,
    container_factory: ContainerFactory,
    shared_context: Option<SharedContext>,
    on_event: Option<EventCallback>,
    config: PipelineConfig,
    profile: Option<Profile>,
    output_file: Option<PathBuf>,
    preview_size: Option<(u32, u32)>,
    state: RecorderState,
    compositor: Option<Compositor>,
    cycle: Option<ActiveRecording>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    /// Creates a builder.
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::new()
    }

    /// Creates a recorder with the default collaborators.
    pub fn new() -> Self {
        RecorderBuilder::new().build()
    }

    /// Current state.
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Profile used by the next `prepare`.
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Output path used by the next `prepare`.
    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    /// The compositor, once the first `prepare` has created it.
    pub fn compositor(&self) -> Option<&Compositor> {
        self.compositor.as_ref()
    }

    /// Sets the recording profile.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::InvalidState`] unless idle.
    pub fn set_profile(&mut self, profile: Profile) -> Result<(), RecorderError> {
        self.require_idle("set profile")?;
        self.profile = Some(profile);
        Ok(())
    }

    /// Sets the output path.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::InvalidState`] unless idle.
    pub fn set_output_file(&mut self, path: impl Into<PathBuf>) -> Result<(), RecorderError> {
        self.require_idle("set output file")?;
        self.output_file = Some(path.into());
        Ok(())
    }

    /// Sets the producer frame size used for the center-fit transform.
    ///
    /// Takes effect immediately if the compositor exists.
    pub fn set_preview_size(&mut self, width: u32, height: u32) {
        self.preview_size = Some((width, height));
        if let Some(compositor) = &self.compositor {
            compositor.set_preview_size(width, height);
        }
    }

    /// Submits a producer frame. Frames outside a recording are dropped.
    ///
    /// `timestamp_ns` is on the [monotonic clock](crate::clock::monotonic_nanos).
    pub fn update_frame(&self, texture_id: u32, tex_matrix: Mat4, timestamp_ns: i64) {
        if let Some(compositor) = &self.compositor {
            compositor.update(texture_id, tex_matrix, timestamp_ns);
        }
    }

    /// Builds the muxer, both encoders and the compositor, then waits for
    /// both encoders to configure their codecs.
    ///
    /// # Errors
    ///
    /// - [`RecorderError::Configuration`] if the profile or output path is
    ///   missing; the recorder stays idle.
    /// - [`RecorderError::Device`] if a codec, the GPU or the container
    ///   writer cannot be set up.
    /// - [`RecorderError::Timeout`] if an encoder does not report in time.
    ///
    /// On any error no output file is left behind and the recorder is idle.
    pub fn prepare(&mut self) -> Result<(), RecorderError> {
        self.require_idle("prepare")?;

        let profile = self
            .profile
            .clone()
            .ok_or_else(|| RecorderError::configuration("no profile set"))?;
        let path = match &self.output_file {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => return Err(RecorderError::configuration("output path is empty")),
        };

        self.set_state(RecorderState::Preparing);
        match self.prepare_cycle(&profile, path) {
            Ok(()) => {
                self.set_state(RecorderState::Prepared);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Prepare failed");
                self.abort_cycle();
                self.set_state(RecorderState::Idle);
                Err(e)
            }
        }
    }

    fn prepare_cycle(&mut self, profile: &Profile, path: PathBuf) -> Result<(), RecorderError> {
        if profile.asynchronous_mode {
            tracing::warn!("Asynchronous codec mode requested; encoders will poll");
        }

        let writer = (self.container_factory)(&path)
            .map_err(|e| RecorderError::device("container writer", e.to_string()))?;
        let muxer = SyncMuxer::new(writer, profile.orientation_hint);

        let audio = AudioEncoder::spawn(
            self.encoder_context(TrackKind::Audio, &muxer),
            AudioSetup {
                format: profile.audio_format(),
                codec_factory: self.codec_factory.clone(),
                input_factory: self.input_factory.clone(),
            },
        )?;
        let video = VideoEncoder::spawn(
            self.encoder_context(TrackKind::Video, &muxer),
            VideoSetup {
                format: profile.video_format(),
                codec_factory: self.codec_factory.clone(),
            },
        )?;
        let cycle = self.cycle.insert(ActiveRecording {
            muxer,
            audio,
            video,
            path,
        });

        let barrier = PhaseBarrier::new("prepare", TRACK_COUNT);
        cycle.audio.prepare(barrier.signal());
        let mut surface_rx = cycle.video.prepare(barrier.signal());
        let listener = cycle.video.frame_listener();
        self.await_phase(&barrier, |phase, reason| RecorderError::device(phase, reason))?;

        let surface = surface_rx
            .try_recv()
            .map_err(|_| RecorderError::device("video encoder", "no input surface after prepare"))?;

        let compositor = match self.compositor.take() {
            Some(compositor) => compositor,
            None => Compositor::new(self.gpu_factory.clone(), self.shared_context.clone())?,
        };
        let compositor = self.compositor.insert(compositor);
        let (width, height) = (profile.video.width, profile.video.height);
        let (preview_width, preview_height) = self.preview_size.unwrap_or((width, height));
        compositor.set_preview_size(preview_width, preview_height);
        compositor.set_window_size(width, height);
        compositor.set_listener(Some(listener));
        compositor
            .attach(surface)
            .map_err(|e| RecorderError::device("compositor", e.to_string()))?;

        Ok(())
    }

    /// Starts both encoders and the audio capture.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::InvalidState`] unless prepared. If either
    /// encoder fails to start, the cycle is torn down, the recorder returns
    /// to idle and the error is returned.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Prepared {
            return Err(self.invalid_state("start"));
        }
        let Some(cycle) = &self.cycle else {
            return Err(self.invalid_state("start"));
        };

        let barrier = PhaseBarrier::new("start", TRACK_COUNT);
        cycle.audio.start(barrier.signal());
        cycle.video.start(barrier.signal());

        match self.await_phase(&barrier, |phase, reason| RecorderError::device(phase, reason)) {
            Ok(()) => {
                self.set_state(RecorderState::Recording);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Start failed");
                self.abort_cycle();
                self.set_state(RecorderState::Idle);
                Err(e)
            }
        }
    }

    /// Stops the recording and finalizes the output file.
    ///
    /// Returns `Ok(None)` without doing anything unless recording. Otherwise
    /// returns the recording's counters; `finalized` is `false` when the
    /// muxer was cancelled because a stream produced no frames.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Released`] after `release`, and the first
    /// encoder or muxer failure otherwise. The muxer is stopped and released
    /// even when an encoder fails.
    pub fn stop(&mut self) -> Result<Option<RecordingStats>, RecorderError> {
        if self.state == RecorderState::Released {
            return Err(RecorderError::Released);
        }
        if self.state != RecorderState::Recording {
            tracing::debug!(state = ?self.state, "Stop ignored");
            return Ok(None);
        }
        let Some(cycle) = self.cycle.take() else {
            self.set_state(RecorderState::Idle);
            return Ok(None);
        };

        self.set_state(RecorderState::Stopping);

        let mut stats = RecordingStats::default();
        if let Some(compositor) = &self.compositor {
            compositor.detach();
            compositor.set_listener(None);
            let drawn = compositor.stats();
            stats.frames_rendered = drawn.rendered;
            stats.frames_superseded = drawn.superseded;
        }

        let barrier = PhaseBarrier::new("stop", TRACK_COUNT);
        cycle.audio.stop(barrier.signal());
        cycle.video.stop(barrier.signal());
        let drained = self.await_phase(&barrier, |phase, reason| {
            RecorderError::codec_runtime(phase, reason)
        });

        let finalized = cycle.muxer.stop();
        let written = cycle.muxer.stats();
        stats.audio_samples = written.audio_samples;
        stats.video_samples = written.video_samples;
        stats.dropped_samples = written.dropped_samples;
        stats.finalized = matches!(finalized, Ok(true));

        let path = cycle.path.clone();
        drop(cycle);
        self.set_state(RecorderState::Idle);

        if stats.finalized {
            tracing::info!(
                path = %path.display(),
                audio = stats.audio_samples,
                video = stats.video_samples,
                "Recording finalized"
            );
            self.emit(RecorderEvent::Finalized {
                path,
                stats,
            });
        } else {
            tracing::warn!(path = %path.display(), "Recording cancelled, no file written");
            self.emit(RecorderEvent::Cancelled { path });
        }

        drained?;
        finalized?;
        Ok(Some(stats))
    }

    /// Discards the current cycle and returns to idle, stopping first if
    /// recording.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Released`] after `release`.
    pub fn reset(&mut self) -> Result<(), RecorderError> {
        if self.state == RecorderState::Released {
            return Err(RecorderError::Released);
        }
        if self.state == RecorderState::Recording {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "Stop during reset failed");
            }
        }
        self.abort_cycle();
        if self.state != RecorderState::Idle {
            self.set_state(RecorderState::Idle);
        }
        Ok(())
    }

    /// Stops any recording, then tears down the encoders and the compositor.
    ///
    /// Safe to call from any state and more than once.
    pub fn release(&mut self) {
        if self.state == RecorderState::Released {
            return;
        }
        if self.state == RecorderState::Recording {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "Stop during release failed");
            }
        }
        self.abort_cycle();
        if let Some(mut compositor) = self.compositor.take() {
            compositor.set_listener(None);
            compositor.release();
        }
        self.set_state(RecorderState::Released);
    }

    /// Drops the current cycle without finalizing anything.
    fn abort_cycle(&mut self) {
        if let Some(compositor) = &self.compositor {
            compositor.detach();
            compositor.set_listener(None);
        }
        if let Some(cycle) = self.cycle.take() {
            cycle.muxer.cancel();
            drop(cycle);
        }
    }

    fn await_phase(
        &self,
        barrier: &PhaseBarrier,
        failed: fn(String, String) -> RecorderError,
    ) -> Result<(), RecorderError> {
        let phase = barrier.phase();
        match barrier.wait(self.config.transition_timeout) {
            PhaseOutcome::Complete => {
                tracing::debug!(phase, "Phase complete");
                Ok(())
            }
            PhaseOutcome::Failed(failures) => {
                Err(failed(format!("{phase} phase"), failures.join("; ")))
            }
            PhaseOutcome::TimedOut { arrived, failures } => {
                tracing::error!(phase, arrived, ?failures, "Phase timed out");
                Err(RecorderError::Timeout {
                    phase,
                    waited: self.config.transition_timeout,
                })
            }
        }
    }

    fn encoder_context(&self, kind: TrackKind, muxer: &SyncMuxer) -> EncoderContext {
        EncoderContext {
            kind,
            muxer: muxer.clone(),
            config: self.config.clone(),
            on_event: self.on_event.clone(),
        }
    }

    fn require_idle(&self, operation: &'static str) -> Result<(), RecorderError> {
        match self.state {
            RecorderState::Idle => Ok(()),
            RecorderState::Released => Err(RecorderError::Released),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> RecorderError {
        if self.state == RecorderState::Released {
            return RecorderError::Released;
        }
        RecorderError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn set_state(&mut self, to: RecorderState) {
        let from = self.state;
        self.state = to;
        tracing::info!(?from, ?to, "Recorder state changed");
        self.emit(RecorderEvent::StateChanged { from, to });
    }

    fn emit(&self, event: RecorderEvent) {
        if let Some(callback) = &self.on_event {
            callback(event);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::codec::codec_factory;
    use crate::compositor::IDENTITY;
    use crate::container::container_factory;
    use crate::encoder::test_support::{fast_config, CountingWriter};
    use crate::source::MockAudioInput;
    use crate::BackendError;

    fn builder_with(writer: CountingWriter) -> (RecorderBuilder, Arc<Mutex<Vec<RecorderEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let writer = Mutex::new(Some(writer));
        let builder = Recorder::builder()
            .audio_input(audio_input_factory(|| {
                Box::new(MockAudioInput::sine(440.0)) as Box<dyn AudioInput>
            }))
            .container_factory(container_factory(move |_| {
                writer
                    .lock()
                    .take()
                    .map(|w| Box::new(w) as Box<dyn crate::container::ContainerWriter>)
                    .ok_or_else(|| BackendError::container("writer already used"))
            }))
            .with_config(fast_config())
            .on_event(move |event| sink.lock().push(event));
        (builder, events)
    }

    fn recorder_with(writer: CountingWriter) -> (Recorder, Arc<Mutex<Vec<RecorderEvent>>>) {
        let (builder, events) = builder_with(writer);
        (builder.build(), events)
    }

    fn configured(writer: CountingWriter) -> (Recorder, Arc<Mutex<Vec<RecorderEvent>>>) {
        let (mut recorder, events) = recorder_with(writer);
        recorder
            .set_profile(Profile::builder().video_size(320, 240).build().unwrap())
            .unwrap();
        recorder.set_output_file("unused.srv").unwrap();
        (recorder, events)
    }

    #[test]
    fn test_prepare_requires_profile_and_path() {
        let (mut recorder, _) = recorder_with(CountingWriter::default());
        let err = recorder.prepare().unwrap_err();
        assert!(matches!(err, RecorderError::Configuration { .. }));

        recorder.set_profile(Profile::builder().build().unwrap()).unwrap();
        recorder.set_output_file("").unwrap();
        let err = recorder.prepare().unwrap_err();
        assert!(matches!(err, RecorderError::Configuration { .. }));
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_start_requires_prepare() {
        let (mut recorder, _) = configured(CountingWriter::default());
        let err = recorder.start().unwrap_err();
        assert!(matches!(
            err,
            RecorderError::InvalidState {
                operation: "start",
                state: RecorderState::Idle
            }
        ));
    }

    #[test]
    fn test_full_cycle_writes_both_tracks() {
        let writer = CountingWriter::default();
        let started = Arc::clone(&writer.started);
        let tracks = Arc::clone(&writer.tracks);
        let (mut recorder, events) = configured(writer);

        recorder.prepare().unwrap();
        assert_eq!(recorder.state(), RecorderState::Prepared);
        assert!(recorder.compositor().is_some_and(Compositor::is_attached));

        recorder.start().unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);
        for frame in 0..5 {
            recorder.update_frame(7, IDENTITY, frame * 33_333_333);
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(50));

        let stats = recorder.stop().unwrap().unwrap();
        assert!(stats.finalized);
        assert!(stats.audio_samples > 0);
        assert!(stats.video_samples > 0);
        assert_eq!(*started.lock(), 1);
        assert_eq!(tracks.lock().len(), 2);
        assert_eq!(recorder.state(), RecorderState::Idle);

        let events = events.lock();
        assert!(events
            .iter()
            .any(|e| matches!(e, RecorderEvent::Finalized { stats, .. } if stats.finalized)));
    }

    #[test]
    fn test_stop_without_frames_cancels() {
        let writer = CountingWriter::default();
        let started = Arc::clone(&writer.started);
        let (mut recorder, events) = configured(writer);

        recorder.prepare().unwrap();
        recorder.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let stats = recorder.stop().unwrap().unwrap();
        assert!(!stats.finalized);
        assert_eq!(stats.total_samples(), 0);
        assert_eq!(*started.lock(), 0);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, RecorderEvent::Cancelled { .. })));
    }

    #[test]
    fn test_stop_is_noop_unless_recording() {
        let (mut recorder, _) = configured(CountingWriter::default());
        assert!(recorder.stop().unwrap().is_none());

        recorder.prepare().unwrap();
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(recorder.state(), RecorderState::Prepared);
    }

    #[test]
    fn test_prepare_failure_returns_to_idle() {
        let (builder, _) = builder_with(CountingWriter::default());
        let mut recorder = builder
            .codec_factory(codec_factory(|mime| {
                Err(BackendError::codec(format!("no encoder for {mime}")))
            }))
            .build();
        recorder
            .set_profile(Profile::builder().build().unwrap())
            .unwrap();
        recorder.set_output_file("unused.srv").unwrap();

        let err = recorder.prepare().unwrap_err();
        match err {
            RecorderError::Device { component, reason } => {
                assert_eq!(component, "prepare phase");
                assert!(reason.contains("no encoder for"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_settings_rejected_while_prepared() {
        let (mut recorder, _) = configured(CountingWriter::default());
        recorder.prepare().unwrap();

        let err = recorder.set_output_file("other.srv").unwrap_err();
        assert!(matches!(err, RecorderError::InvalidState { .. }));

        recorder.reset().unwrap();
        assert_eq!(recorder.state(), RecorderState::Idle);
        recorder.set_output_file("other.srv").unwrap();
    }

    #[test]
    fn test_release_is_final() {
        let (mut recorder, events) = configured(CountingWriter::default());
        recorder.prepare().unwrap();
        recorder.release();
        recorder.release();

        assert_eq!(recorder.state(), RecorderState::Released);
        assert!(recorder.compositor().is_none());
        assert!(matches!(recorder.prepare(), Err(RecorderError::Released)));
        assert!(matches!(recorder.stop(), Err(RecorderError::Released)));

        let released = events
            .lock()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    RecorderEvent::StateChanged {
                        to: RecorderState::Released,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(released, 1);
    }
}
