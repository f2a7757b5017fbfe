//! Synchronized muxer shared by the two encoder actors.
//!
//! Wraps one [`ContainerWriter`] behind a single lock. The writer is started
//! exactly once, by whichever encoder registers the second track, and only
//! then are sample writes forwarded. An encoder that registered its track
//! blocks in [`SyncMuxer::await_start`] until its peer registers too, or
//! until someone calls [`SyncMuxer::cancel`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::container::ContainerWriter;
use crate::sample::{BufferInfo, MediaFormat, Track, TrackKind};
use crate::RecorderError;

/// Number of tracks that must register before the writer starts.
pub const TRACK_COUNT: usize = 2;

/// Muxer life-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    /// Waiting for tracks.
    Idle,
    /// Writer started; samples are forwarded.
    Started,
    /// Abandoned before the writer started.
    Cancelled,
    /// Writer finalized.
    Stopped,
    /// Writer released.
    Released,
}

/// Result of [`SyncMuxer::await_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Both tracks registered and the writer started.
    Started,
    /// The muxer was cancelled, stopped, or released before starting.
    Cancelled,
    /// The peer track did not register in time.
    TimedOut,
}

/// Write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxerStats {
    /// Audio samples forwarded to the writer.
    pub audio_samples: u64,
    /// Video samples forwarded to the writer.
    pub video_samples: u64,
    /// Writes dropped because the writer was not started.
    pub dropped_samples: u64,
}

impl MuxerStats {
    /// Samples forwarded for a track kind.
    #[must_use]
    pub fn samples(&self, kind: TrackKind) -> u64 {
        match kind {
            TrackKind::Audio => self.audio_samples,
            TrackKind::Video => self.video_samples,
        }
    }
}

struct MuxerCore {
    writer: Box<dyn ContainerWriter>,
    state: MuxerState,
    tracks: Vec<Track>,
    stats: MuxerStats,
    writer_released: bool,
}

struct MuxerInner {
    core: Mutex<MuxerCore>,
    state_changed: Condvar,
    orientation_hint: u16,
}

/// Thread-safe front of a container writer.
///
/// Cloning yields another handle to the same muxer.
///
/// # Example
///
/// ```
/// use stream_recorder::container::InterleavedFileWriter;
/// use stream_recorder::{MediaFormat, Profile, SyncMuxer, MuxerState};
///
/// let dir = tempfile::tempdir().unwrap();
/// let profile = Profile::builder().build().unwrap();
/// let muxer = SyncMuxer::new(Box::new(InterleavedFileWriter::new(dir.path().join("a.srmx"))), 0);
///
/// muxer.add_track(&MediaFormat::Audio(profile.audio_format())).unwrap();
/// assert_eq!(muxer.state(), MuxerState::Idle);
/// muxer.add_track(&MediaFormat::Video(profile.video_format())).unwrap();
/// assert_eq!(muxer.state(), MuxerState::Started);
///
/// muxer.stop().unwrap();
/// muxer.release();
/// ```
#[derive(Clone)]
pub struct SyncMuxer {
    inner: Arc<MuxerInner>,
}

impl SyncMuxer {
    /// Wraps `writer`. The orientation hint is applied just before start.
    pub fn new(writer: Box<dyn ContainerWriter>, orientation_hint: u16) -> Self {
        Self {
            inner: Arc::new(MuxerInner {
                core: Mutex::new(MuxerCore {
                    writer,
                    state: MuxerState::Idle,
                    tracks: Vec::with_capacity(TRACK_COUNT),
                    stats: MuxerStats::default(),
                    writer_released: false,
                }),
                state_changed: Condvar::new(),
                orientation_hint,
            }),
        }
    }

    /// Registers a track. The registration that completes the set starts
    /// the writer.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Muxer`] if the muxer is no longer idle, the
    /// track kind is already registered, or the writer rejects the track or
    /// fails to start. A failed start cancels the muxer.
    pub fn add_track(&self, format: &MediaFormat) -> Result<Track, RecorderError> {
        let kind = format.kind();
        let mut core = self.inner.core.lock();

        if core.state != MuxerState::Idle {
            return Err(muxer_error(format!(
                "cannot add {kind} track while {:?}",
                core.state
            )));
        }
        if core.tracks.iter().any(|t| t.kind == kind) {
            return Err(muxer_error(format!("{kind} track already registered")));
        }

        let index = core
            .writer
            .add_track(format)
            .map_err(|e| muxer_error(e.to_string()))?;
        let track = Track { index, kind };
        core.tracks.push(track);
        tracing::info!(track = %kind, index, registered = core.tracks.len(), "Muxer track added");

        if core.tracks.len() == TRACK_COUNT {
            let orientation = self.inner.orientation_hint;
            let started = core
                .writer
                .set_orientation_hint(orientation)
                .and_then(|()| core.writer.start());

            match started {
                Ok(()) => {
                    core.state = MuxerState::Started;
                    tracing::info!(orientation, "Muxer started");
                }
                Err(e) => {
                    core.state = MuxerState::Cancelled;
                    self.inner.state_changed.notify_all();
                    tracing::error!(error = %e, "Muxer failed to start");
                    return Err(muxer_error(e.to_string()));
                }
            }
            self.inner.state_changed.notify_all();
        }

        Ok(track)
    }

    /// Blocks until the writer has started, the muxer is cancelled, or
    /// `timeout` elapses.
    pub fn await_start(&self, timeout: Duration) -> StartOutcome {
        let deadline = Instant::now() + timeout;
        let mut core = self.inner.core.lock();

        loop {
            match core.state {
                MuxerState::Started => return StartOutcome::Started,
                MuxerState::Idle => {}
                _ => return StartOutcome::Cancelled,
            }
            if self
                .inner
                .state_changed
                .wait_until(&mut core, deadline)
                .timed_out()
            {
                return match core.state {
                    MuxerState::Started => StartOutcome::Started,
                    MuxerState::Idle => StartOutcome::TimedOut,
                    _ => StartOutcome::Cancelled,
                };
            }
        }
    }

    /// Forwards one encoded sample if the writer is started.
    ///
    /// Returns `Ok(false)` and counts the sample as dropped when the writer
    /// has not started yet or has already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Muxer`] if the writer fails.
    pub fn write_sample(
        &self,
        track: Track,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<bool, RecorderError> {
        let mut core = self.inner.core.lock();

        if core.state != MuxerState::Started {
            core.stats.dropped_samples += 1;
            tracing::debug!(
                track = %track.kind,
                pts_us = info.presentation_time_us,
                state = ?core.state,
                "Dropping sample outside started muxer"
            );
            return Ok(false);
        }

        core.writer
            .write_sample_data(track.index, data, info)
            .map_err(|e| muxer_error(e.to_string()))?;
        match track.kind {
            TrackKind::Audio => core.stats.audio_samples += 1,
            TrackKind::Video => core.stats.video_samples += 1,
        }
        Ok(true)
    }

    /// Abandons the recording before the writer starts, waking any encoder
    /// blocked in [`await_start`](Self::await_start).
    ///
    /// Returns `true` if the muxer was idle. Has no effect once started.
    pub fn cancel(&self) -> bool {
        let mut core = self.inner.core.lock();
        if core.state != MuxerState::Idle {
            return false;
        }
        core.state = MuxerState::Cancelled;
        self.inner.state_changed.notify_all();
        tracing::info!(registered = core.tracks.len(), "Muxer cancelled");
        true
    }

    /// Finalizes the writer if it was started. Idempotent.
    ///
    /// Returns `Ok(true)` if this call finalized the output. An idle muxer is
    /// cancelled instead.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Muxer`] if the writer fails to finalize. The
    /// muxer still counts as stopped.
    pub fn stop(&self) -> Result<bool, RecorderError> {
        let mut core = self.inner.core.lock();
        match core.state {
            MuxerState::Started => {
                core.state = MuxerState::Stopped;
                self.inner.state_changed.notify_all();
                core.writer
                    .stop()
                    .map_err(|e| muxer_error(e.to_string()))?;
                tracing::info!(
                    audio = core.stats.audio_samples,
                    video = core.stats.video_samples,
                    dropped = core.stats.dropped_samples,
                    "Muxer stopped"
                );
                Ok(true)
            }
            MuxerState::Idle => {
                core.state = MuxerState::Cancelled;
                self.inner.state_changed.notify_all();
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Releases the writer. Safe to call in any state and more than once.
    pub fn release(&self) {
        let mut core = self.inner.core.lock();
        if !core.writer_released {
            core.writer.release();
            core.writer_released = true;
        }
        core.state = MuxerState::Released;
        self.inner.state_changed.notify_all();
    }

    /// Current state.
    pub fn state(&self) -> MuxerState {
        self.inner.core.lock().state
    }

    /// Registered tracks in registration order.
    pub fn tracks(&self) -> Vec<Track> {
        self.inner.core.lock().tracks.clone()
    }

    /// Write counters.
    pub fn stats(&self) -> MuxerStats {
        self.inner.core.lock().stats
    }
}

fn muxer_error(reason: impl Into<String>) -> RecorderError {
    RecorderError::Muxer {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::BufferFlags;
    use crate::{BackendError, Profile};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        AddTrack(TrackKind),
        Orientation(u16),
        Start,
        Write(usize),
        Stop,
        Release,
    }

    #[derive(Clone, Default)]
    struct FakeWriter {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_start: bool,
    }

    impl ContainerWriter for FakeWriter {
        fn add_track(&mut self, format: &MediaFormat) -> Result<usize, BackendError> {
            let mut calls = self.calls.lock();
            calls.push(Call::AddTrack(format.kind()));
            Ok(calls.iter().filter(|c| matches!(c, Call::AddTrack(_))).count() - 1)
        }

        fn set_orientation_hint(&mut self, degrees: u16) -> Result<(), BackendError> {
            self.calls.lock().push(Call::Orientation(degrees));
            Ok(())
        }

        fn start(&mut self) -> Result<(), BackendError> {
            if self.fail_start {
                return Err(BackendError::container("disk full"));
            }
            self.calls.lock().push(Call::Start);
            Ok(())
        }

        fn write_sample_data(
            &mut self,
            index: usize,
            _: &[u8],
            _: &BufferInfo,
        ) -> Result<(), BackendError> {
            self.calls.lock().push(Call::Write(index));
            Ok(())
        }

        fn stop(&mut self) -> Result<(), BackendError> {
            self.calls.lock().push(Call::Stop);
            Ok(())
        }

        fn release(&mut self) {
            self.calls.lock().push(Call::Release);
        }
    }

    fn formats() -> (MediaFormat, MediaFormat) {
        let profile = Profile::builder().build().unwrap();
        (
            MediaFormat::Audio(profile.audio_format()),
            MediaFormat::Video(profile.video_format()),
        )
    }

    fn sample() -> BufferInfo {
        BufferInfo::new(4, 0, BufferFlags::NONE)
    }

    #[test]
    fn test_start_once_after_both_tracks() {
        let writer = FakeWriter::default();
        let calls = Arc::clone(&writer.calls);
        let muxer = SyncMuxer::new(Box::new(writer), 90);
        let (audio, video) = formats();

        let v = muxer.add_track(&video).unwrap();
        assert_eq!(muxer.state(), MuxerState::Idle);
        let a = muxer.add_track(&audio).unwrap();
        assert_eq!(muxer.state(), MuxerState::Started);
        assert_eq!((v.index, a.index), (0, 1));

        assert_eq!(
            *calls.lock(),
            vec![
                Call::AddTrack(TrackKind::Video),
                Call::AddTrack(TrackKind::Audio),
                Call::Orientation(90),
                Call::Start,
            ]
        );
    }

    #[test]
    fn test_writes_dropped_outside_started() {
        let writer = FakeWriter::default();
        let calls = Arc::clone(&writer.calls);
        let muxer = SyncMuxer::new(Box::new(writer), 0);
        let (audio, video) = formats();

        let a = muxer.add_track(&audio).unwrap();
        assert!(!muxer.write_sample(a, &[0; 4], &sample()).unwrap());

        let v = muxer.add_track(&video).unwrap();
        assert!(muxer.write_sample(v, &[0; 4], &sample()).unwrap());
        assert!(muxer.stop().unwrap());
        assert!(!muxer.write_sample(a, &[0; 4], &sample()).unwrap());

        let stats = muxer.stats();
        assert_eq!(stats.video_samples, 1);
        assert_eq!(stats.audio_samples, 0);
        assert_eq!(stats.dropped_samples, 2);

        let calls = calls.lock();
        let start = calls.iter().position(|c| *c == Call::Start).unwrap();
        let stop = calls.iter().position(|c| *c == Call::Stop).unwrap();
        for (i, call) in calls.iter().enumerate() {
            if matches!(call, Call::Write(_)) {
                assert!(i > start && i < stop);
            }
        }
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let muxer = SyncMuxer::new(Box::new(FakeWriter::default()), 0);
        let (audio, _) = formats();
        muxer.add_track(&audio).unwrap();
        assert!(matches!(
            muxer.add_track(&audio),
            Err(RecorderError::Muxer { .. })
        ));
    }

    #[test]
    fn test_await_start_released_by_peer() {
        let muxer = SyncMuxer::new(Box::new(FakeWriter::default()), 0);
        let (audio, video) = formats();
        muxer.add_track(&audio).unwrap();

        let peer = muxer.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            peer.add_track(&video).unwrap();
        });

        assert_eq!(muxer.await_start(Duration::from_secs(2)), StartOutcome::Started);
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_unblocks_waiter_without_start() {
        let writer = FakeWriter::default();
        let calls = Arc::clone(&writer.calls);
        let muxer = SyncMuxer::new(Box::new(writer), 0);
        let (audio, video) = formats();
        muxer.add_track(&audio).unwrap();

        let peer = muxer.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            assert!(peer.cancel());
        });

        assert_eq!(muxer.await_start(Duration::from_secs(2)), StartOutcome::Cancelled);
        handle.join().unwrap();

        assert!(muxer.add_track(&video).is_err());
        assert!(!muxer.stop().unwrap());
        assert!(!calls.lock().contains(&Call::Start));
    }

    #[test]
    fn test_await_start_times_out() {
        let muxer = SyncMuxer::new(Box::new(FakeWriter::default()), 0);
        let (audio, _) = formats();
        muxer.add_track(&audio).unwrap();
        assert_eq!(muxer.await_start(Duration::from_millis(20)), StartOutcome::TimedOut);
    }

    #[test]
    fn test_stop_idempotent_and_release_once() {
        let writer = FakeWriter::default();
        let calls = Arc::clone(&writer.calls);
        let muxer = SyncMuxer::new(Box::new(writer), 0);
        let (audio, video) = formats();
        muxer.add_track(&audio).unwrap();
        muxer.add_track(&video).unwrap();

        assert!(muxer.stop().unwrap());
        assert!(!muxer.stop().unwrap());
        muxer.release();
        muxer.release();

        let calls = calls.lock();
        assert_eq!(calls.iter().filter(|c| **c == Call::Stop).count(), 1);
        assert_eq!(calls.iter().filter(|c| **c == Call::Release).count(), 1);
    }

    #[test]
    fn test_failed_start_cancels() {
        let writer = FakeWriter {
            fail_start: true,
            ..FakeWriter::default()
        };
        let muxer = SyncMuxer::new(Box::new(writer), 0);
        let (audio, video) = formats();
        muxer.add_track(&audio).unwrap();
        assert!(muxer.add_track(&video).is_err());
        assert_eq!(muxer.state(), MuxerState::Cancelled);
        assert_eq!(muxer.await_start(Duration::from_millis(5)), StartOutcome::Cancelled);
    }
}
