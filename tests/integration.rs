//! Integration tests for stream-recorder.
//!
//! These drive the public [`Recorder`] with the mock microphone, the raw
//! codec and the headless GPU. Tests that require actual audio hardware are
//! marked with `#[ignore]` and should be run manually.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use stream_recorder::codec::{codec_factory, InputSurface, RawCodec};
use stream_recorder::compositor::{
    gpu_factory, GpuBackend, HeadlessGpu, Mat4, SurfaceHandle, IDENTITY,
};
use stream_recorder::container::{container_factory, read_summary, ContainerWriter};
use stream_recorder::source::{audio_input_factory, AudioInput, CpalAudioInput, MockAudioInput};
use stream_recorder::{
    clock, BackendError, BufferInfo, EncoderEvent, EncoderInfo, MediaFormat, PipelineConfig,
    Profile, Recorder, RecorderBuilder, RecorderError, RecorderEvent, RecorderState, TrackKind,
    VIDEO_MIME_AVC,
};

fn test_config() -> PipelineConfig {
    PipelineConfig {
        drain_poll_timeout: Duration::from_millis(2),
        input_dequeue_timeout: Duration::from_millis(2),
        eos_drain_timeout: Duration::from_secs(2),
        track_sync_timeout: Duration::from_secs(2),
        device_retry_delay: Duration::from_millis(1),
        ..PipelineConfig::default()
    }
}

fn mock_builder() -> RecorderBuilder {
    Recorder::builder()
        .audio_input(audio_input_factory(|| {
            Box::new(MockAudioInput::sine(440.0)) as Box<dyn AudioInput>
        }))
        .with_config(test_config())
}

fn configure(recorder: &mut Recorder, path: &Path) {
    recorder
        .set_profile(
            Profile::builder()
                .video_size(480, 480)
                .video_frame_rate(30)
                .orientation_hint(90)
                .build()
                .unwrap(),
        )
        .unwrap();
    recorder.set_output_file(path).unwrap();
    recorder.set_preview_size(640, 480);
}

/// Feeds producer frames at roughly 30 fps for `duration`.
fn produce_frames(recorder: &Recorder, duration: Duration) -> u32 {
    let deadline = Instant::now() + duration;
    let mut frames = 0;
    while Instant::now() < deadline {
        recorder.update_frame(1, IDENTITY, clock::monotonic_nanos());
        frames += 1;
        std::thread::sleep(Duration::from_millis(33));
    }
    frames
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriterCall {
    AddTrack(TrackKind),
    Orientation(u16),
    Start,
    Write(usize),
    Stop,
    Release,
}

/// Container writer that logs every call in order.
#[derive(Clone, Default)]
struct RecordingWriter {
    calls: Arc<Mutex<Vec<WriterCall>>>,
}

impl ContainerWriter for RecordingWriter {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, BackendError> {
        let mut calls = self.calls.lock();
        let index = calls
            .iter()
            .filter(|c| matches!(c, WriterCall::AddTrack(_)))
            .count();
        calls.push(WriterCall::AddTrack(format.kind()));
        Ok(index)
    }

    fn set_orientation_hint(&mut self, degrees: u16) -> Result<(), BackendError> {
        self.calls.lock().push(WriterCall::Orientation(degrees));
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.calls.lock().push(WriterCall::Start);
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track_index: usize,
        _data: &[u8],
        _info: &BufferInfo,
    ) -> Result<(), BackendError> {
        self.calls.lock().push(WriterCall::Write(track_index));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.calls.lock().push(WriterCall::Stop);
        Ok(())
    }

    fn release(&mut self) {
        self.calls.lock().push(WriterCall::Release);
    }
}

/// Headless GPU that also keeps every MVP it was asked to draw with.
struct MvpRecordingGpu {
    inner: HeadlessGpu,
    mvps: Arc<Mutex<Vec<Mat4>>>,
}

impl GpuBackend for MvpRecordingGpu {
    fn create_window_surface(
        &mut self,
        target: &InputSurface,
    ) -> Result<SurfaceHandle, BackendError> {
        self.inner.create_window_surface(target)
    }

    fn make_current(&mut self, surface: SurfaceHandle) -> Result<(), BackendError> {
        self.inner.make_current(surface)
    }

    fn draw_texture(
        &mut self,
        texture_id: u32,
        mvp: &Mat4,
        tex_matrix: &Mat4,
    ) -> Result<(), BackendError> {
        self.mvps.lock().push(*mvp);
        self.inner.draw_texture(texture_id, mvp, tex_matrix)
    }

    fn set_presentation_time(
        &mut self,
        surface: SurfaceHandle,
        nanos: i64,
    ) -> Result<(), BackendError> {
        self.inner.set_presentation_time(surface, nanos)
    }

    fn swap_buffers(&mut self, surface: SurfaceHandle) -> Result<(), BackendError> {
        self.inner.swap_buffers(surface)
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        self.inner.release_surface(surface);
    }

    fn release(&mut self) {
        self.inner.release();
    }
}

#[test]
fn test_full_cycle_produces_two_track_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cycle.srv");

    let mut recorder = mock_builder().build();
    configure(&mut recorder, &path);

    recorder.prepare().unwrap();
    recorder.start().unwrap();
    let frames = produce_frames(&recorder, Duration::from_millis(600));
    let stats = recorder.stop().unwrap().unwrap();
    recorder.release();

    assert!(frames > 0);
    assert!(stats.finalized);
    assert!(stats.audio_samples > 0);
    assert!(stats.video_samples > 0);
    assert!(stats.frames_rendered > 0);

    let summary = read_summary(&path).unwrap();
    assert!(summary.finalized);
    assert_eq!(summary.orientation_hint, 90);
    assert_eq!(summary.tracks.len(), 2);

    let audio = summary.track(TrackKind::Audio).unwrap();
    let video = summary.track(TrackKind::Video).unwrap();
    assert_eq!(audio.sample_count, stats.audio_samples);
    assert_eq!(video.sample_count, stats.video_samples);
    assert_ne!(audio.index, video.index);

    let duration = summary.duration();
    assert!(duration >= Duration::from_millis(200), "duration {duration:?}");
    assert!(duration <= Duration::from_secs(3), "duration {duration:?}");
}

#[test]
fn test_writer_started_once_after_both_tracks() {
    let writer = RecordingWriter::default();
    let calls = Arc::clone(&writer.calls);
    let slot = Mutex::new(Some(writer));

    let mut recorder = mock_builder()
        .container_factory(container_factory(move |_| {
            slot.lock()
                .take()
                .map(|w| Box::new(w) as Box<dyn ContainerWriter>)
                .ok_or_else(|| BackendError::container("writer already used"))
        }))
        .build();
    configure(&mut recorder, Path::new("unused.srv"));

    recorder.prepare().unwrap();
    recorder.start().unwrap();
    produce_frames(&recorder, Duration::from_millis(300));
    recorder.stop().unwrap();
    recorder.release();

    let calls = calls.lock();
    let position = |call: &WriterCall| calls.iter().position(|c| c == call);

    let starts = calls.iter().filter(|c| **c == WriterCall::Start).count();
    assert_eq!(starts, 1);

    let start = position(&WriterCall::Start).unwrap();
    let audio_track = position(&WriterCall::AddTrack(TrackKind::Audio)).unwrap();
    let video_track = position(&WriterCall::AddTrack(TrackKind::Video)).unwrap();
    assert!(audio_track < start);
    assert!(video_track < start);
    assert!(position(&WriterCall::Orientation(90)).unwrap() < start);

    let stop = position(&WriterCall::Stop).unwrap();
    for (i, call) in calls.iter().enumerate() {
        if matches!(call, WriterCall::Write(_)) {
            assert!(i > start, "write before start at {i}");
            assert!(i < stop, "write after stop at {i}");
        }
    }
    assert!(calls.iter().any(|c| matches!(c, WriterCall::Write(_))));
    assert_eq!(calls.last(), Some(&WriterCall::Release));
}

#[test]
fn test_late_first_frame_still_finalizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.srv");

    let mut recorder = Recorder::builder()
        .audio_input(audio_input_factory(|| {
            Box::new(MockAudioInput::sine(440.0)) as Box<dyn AudioInput>
        }))
        .with_config(PipelineConfig {
            track_sync_timeout: Duration::from_millis(300),
            ..test_config()
        })
        .build();
    configure(&mut recorder, &path);

    recorder.prepare().unwrap();
    recorder.start().unwrap();
    // Audio gives up waiting for the video track before the first frame
    std::thread::sleep(Duration::from_millis(600));
    let frames = produce_frames(&recorder, Duration::from_secs(1));
    let stats = recorder.stop().unwrap().unwrap();
    recorder.release();

    assert!(frames > 0);
    assert!(stats.finalized, "{stats:?}");
    assert!(stats.audio_samples > 0);
    assert!(stats.video_samples > 0);

    let summary = read_summary(&path).unwrap();
    assert!(summary.finalized);
    assert_eq!(summary.tracks.len(), 2);
}

#[test]
fn test_zero_frame_video_cancels_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.srv");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let mut recorder = mock_builder()
        .on_event(move |event| sink.lock().push(event))
        .build();
    configure(&mut recorder, &path);

    recorder.prepare().unwrap();
    recorder.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let begun = Instant::now();
    let stats = recorder.stop().unwrap().unwrap();
    assert!(begun.elapsed() < Duration::from_secs(5));

    assert!(!stats.finalized);
    assert_eq!(stats.total_samples(), 0);
    assert!(!path.exists());
    assert_eq!(recorder.state(), RecorderState::Idle);

    let events = events.lock();
    assert!(events.iter().any(|e| matches!(
        e,
        RecorderEvent::Encoder {
            track: TrackKind::Video,
            event: EncoderEvent::Info(EncoderInfo::EmptyStream),
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, RecorderEvent::Cancelled { path: p } if *p == path)));
}

#[test]
fn test_repeated_cycles_produce_independent_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = mock_builder().build();
    let mut paths: Vec<PathBuf> = Vec::new();

    for cycle in 0..3 {
        let path = dir.path().join(format!("cycle-{cycle}.srv"));
        configure(&mut recorder, &path);

        recorder.prepare().unwrap();
        recorder.start().unwrap();
        produce_frames(&recorder, Duration::from_millis(250));
        let stats = recorder.stop().unwrap().unwrap();
        assert!(stats.finalized, "cycle {cycle} was not finalized");
        recorder.reset().unwrap();

        paths.push(path);
    }
    recorder.release();

    for path in &paths {
        let summary = read_summary(path).unwrap();
        assert!(summary.finalized);
        assert_eq!(summary.tracks.len(), 2);
        assert!(summary.tracks.iter().all(|t| t.sample_count > 0));
    }
}

#[test]
fn test_compositor_center_fit_reference_cases() {
    let cases = [((640, 480), (480, 480), 640.0_f32 / 480.0), ((640, 480), (640, 480), 1.0)];

    for (preview, window, expected_x) in cases {
        let mvps = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&mvps);
        let mut recorder = mock_builder()
            .gpu_factory(gpu_factory(move |shared| {
                Ok(Box::new(MvpRecordingGpu {
                    inner: HeadlessGpu::new(shared),
                    mvps: Arc::clone(&recorded),
                }) as Box<dyn GpuBackend>)
            }))
            .container_factory(container_factory(|_| {
                Ok(Box::new(RecordingWriter::default()) as Box<dyn ContainerWriter>)
            }))
            .build();

        recorder
            .set_profile(Profile::builder().video_size(window.0, window.1).build().unwrap())
            .unwrap();
        recorder.set_output_file("unused.srv").unwrap();
        recorder.set_preview_size(preview.0, preview.1);

        recorder.prepare().unwrap();
        recorder.start().unwrap();
        produce_frames(&recorder, Duration::from_millis(150));
        recorder.stop().unwrap();
        recorder.release();

        let mvps = mvps.lock();
        let mvp = mvps.first().expect("no frame was drawn");
        assert!((mvp[0] - expected_x).abs() < 1e-5, "{preview:?} -> {window:?}: {}", mvp[0]);
        assert!((mvp[5] - 1.0).abs() < 1e-5);
        if preview == window {
            assert_eq!(*mvp, IDENTITY);
        }
    }
}

#[test]
fn test_stop_before_start_and_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("twice.srv");
    let mut recorder = mock_builder().build();
    configure(&mut recorder, &path);

    assert!(recorder.stop().unwrap().is_none());
    recorder.prepare().unwrap();
    assert!(recorder.stop().unwrap().is_none());
    assert_eq!(recorder.state(), RecorderState::Prepared);

    recorder.start().unwrap();
    produce_frames(&recorder, Duration::from_millis(200));
    let first = recorder.stop().unwrap();
    assert!(first.is_some_and(|s| s.finalized));
    assert!(recorder.stop().unwrap().is_none());

    recorder.release();
    recorder.release();
    assert!(read_summary(&path).unwrap().finalized);
}

#[test]
fn test_prepare_failure_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("failed.srv");

    let mut recorder = mock_builder()
        .codec_factory(codec_factory(|mime| {
            if mime == VIDEO_MIME_AVC {
                return Err(BackendError::codec(format!("no encoder for {mime}")));
            }
            Ok(Box::new(RawCodec::new(mime)) as Box<dyn stream_recorder::codec::Codec>)
        }))
        .build();
    configure(&mut recorder, &path);

    let err = recorder.prepare().unwrap_err();
    assert!(matches!(err, RecorderError::Device { .. }), "{err}");
    assert!(err.to_string().contains("video encoder"));
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert!(!path.exists());

    let err = recorder.start().unwrap_err();
    assert!(matches!(err, RecorderError::InvalidState { .. }));
}

#[test]
#[ignore = "requires audio hardware"]
fn test_real_capture() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.srv");

    let mut recorder = Recorder::builder()
        .audio_input(audio_input_factory(|| {
            Box::new(CpalAudioInput::default_device()) as Box<dyn AudioInput>
        }))
        .build();
    configure(&mut recorder, &path);

    recorder.prepare().unwrap();
    recorder.start().unwrap();
    produce_frames(&recorder, Duration::from_secs(1));
    let stats = recorder.stop().unwrap().unwrap();
    recorder.release();

    assert!(stats.finalized);
    assert_eq!(read_summary(&path).unwrap().tracks.len(), 2);
}
