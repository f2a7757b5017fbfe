//! Compositor actor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::codec::InputSurface;
use crate::compositor::transform::center_fit_mvp;
use crate::compositor::{GpuBackend, GpuFactory, Mat4, SharedContext, SurfaceHandle};
use crate::{BackendError, RecorderError};

/// Notified after each frame is presented to the attached surface.
pub trait FrameListener: Send + Sync {
    /// A new frame is available on the encoder's input surface.
    fn on_frame_available(&self);
}

/// Frame counters since the last attach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorStats {
    /// Frames drawn and presented.
    pub rendered: u64,
    /// Updates replaced by a newer update before they were drawn.
    pub superseded: u64,
    /// Updates dropped because no surface was attached.
    pub dropped_detached: u64,
    /// Draws that failed in the GPU backend.
    pub failed: u64,
}

#[derive(Debug, Clone, Copy)]
struct FrameUpdate {
    texture_id: u32,
    tex_matrix: Mat4,
    timestamp_ns: i64,
}

enum Command {
    SetPreviewSize(u32, u32),
    SetWindowSize(u32, u32),
    Attach {
        surface: InputSurface,
        ack: oneshot::Sender<Result<(), BackendError>>,
    },
    Detach {
        ack: oneshot::Sender<()>,
    },
    Render,
    SetListener(Option<Arc<dyn FrameListener>>),
    Shutdown,
}

#[derive(Default)]
struct Counters {
    rendered: AtomicU64,
    superseded: AtomicU64,
    dropped_detached: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CompositorStats {
        CompositorStats {
            rendered: self.rendered.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            dropped_detached: self.dropped_detached.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.rendered.store(0, Ordering::Relaxed);
        self.superseded.store(0, Ordering::Relaxed);
        self.dropped_detached.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}

struct Shared {
    attached: AtomicBool,
    pending: Mutex<Option<FrameUpdate>>,
    counters: Counters,
}

/// Offscreen window that composites producer textures into an encoder's
/// input surface.
///
/// All GPU work happens on the compositor thread. [`update`](Self::update)
/// never blocks: at most one frame waits to be drawn, and a newer update
/// replaces it. Updates made while no surface is attached are dropped.
pub struct Compositor {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Compositor {
    /// Spawns the compositor thread and creates the GPU backend on it.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Device`] if the backend cannot be created.
    pub fn new(
        factory: GpuFactory,
        shared_context: Option<SharedContext>,
    ) -> Result<Self, RecorderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            attached: AtomicBool::new(false),
            pending: Mutex::new(None),
            counters: Counters::default(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("compositor".to_string())
            .spawn(move || {
                let gpu = match factory(shared_context.as_ref()) {
                    Ok(gpu) => {
                        let _ = ready_tx.send(Ok(()));
                        gpu
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                CompositorLoop::new(gpu, thread_shared).run(rx);
            })
            .map_err(|e| RecorderError::device("compositor", e.to_string()))?;

        let ready = ready_rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(BackendError::gpu("compositor thread exited during init")));

        match ready {
            Ok(()) => {
                tracing::debug!("Compositor started");
                Ok(Self {
                    tx,
                    shared,
                    handle: Some(handle),
                })
            }
            Err(e) => {
                let _ = handle.join();
                Err(RecorderError::device("compositor", e.to_string()))
            }
        }
    }

    /// Sets the producer's frame size used for the center-fit transform.
    pub fn set_preview_size(&self, width: u32, height: u32) {
        let _ = self.tx.send(Command::SetPreviewSize(width, height));
    }

    /// Sets the output (encoder) frame size used for the center-fit transform.
    pub fn set_window_size(&self, width: u32, height: u32) {
        let _ = self.tx.send(Command::SetWindowSize(width, height));
    }

    /// Registers or clears the frame listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn FrameListener>>) {
        let _ = self.tx.send(Command::SetListener(listener));
    }

    /// Creates a GPU surface bound to `surface` and makes it current.
    ///
    /// Blocks until the compositor thread has done so. Counters are reset.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the surface cannot be created.
    pub fn attach(&self, surface: InputSurface) -> Result<(), BackendError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Attach { surface, ack })
            .map_err(|_| BackendError::gpu("compositor has shut down"))?;
        done.blocking_recv()
            .unwrap_or_else(|_| Err(BackendError::gpu("compositor has shut down")))?;

        self.shared.counters.reset();
        self.shared.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Releases the GPU surface, keeping the context for a later attach.
    ///
    /// Blocks until the surface is gone; no frame is presented after this
    /// returns.
    pub fn detach(&self) {
        self.shared.attached.store(false, Ordering::SeqCst);
        self.shared.pending.lock().take();

        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Detach { ack }).is_ok() {
            let _ = done.blocking_recv();
        }
    }

    /// Returns `true` while a surface is attached.
    pub fn is_attached(&self) -> bool {
        self.shared.attached.load(Ordering::SeqCst)
    }

    /// Submits a producer frame for compositing.
    ///
    /// `tex_matrix` is the producer's texture coordinate transform and
    /// `timestamp_ns` the presentation time on the
    /// [monotonic clock](crate::clock::monotonic_nanos).
    pub fn update(&self, texture_id: u32, tex_matrix: Mat4, timestamp_ns: i64) {
        if !self.shared.attached.load(Ordering::SeqCst) {
            self.shared
                .counters
                .dropped_detached
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let update = FrameUpdate {
            texture_id,
            tex_matrix,
            timestamp_ns,
        };
        let was_empty = {
            let mut pending = self.shared.pending.lock();
            let was_empty = pending.is_none();
            *pending = Some(update);
            was_empty
        };

        if was_empty {
            let _ = self.tx.send(Command::Render);
        } else {
            self.shared
                .counters
                .superseded
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counters since the last attach.
    pub fn stats(&self) -> CompositorStats {
        self.shared.counters.snapshot()
    }

    /// Stops the thread and releases the GPU context. Idempotent.
    pub fn release(&mut self) {
        self.shared.attached.store(false, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(Command::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Compositor thread panicked");
        }
        tracing::debug!("Compositor released");
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.release();
    }
}

struct CompositorLoop {
    gpu: Box<dyn GpuBackend>,
    shared: Arc<Shared>,
    surface: Option<SurfaceHandle>,
    listener: Option<Arc<dyn FrameListener>>,
    preview_size: (u32, u32),
    window_size: (u32, u32),
    mvp: Mat4,
}

impl CompositorLoop {
    fn new(gpu: Box<dyn GpuBackend>, shared: Arc<Shared>) -> Self {
        Self {
            gpu,
            shared,
            surface: None,
            listener: None,
            preview_size: (0, 0),
            window_size: (0, 0),
            mvp: center_fit_mvp((0, 0), (0, 0)),
        }
    }

    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.blocking_recv() {
            match command {
                Command::SetPreviewSize(w, h) => {
                    self.preview_size = (w, h);
                    self.recalculate();
                }
                Command::SetWindowSize(w, h) => {
                    self.window_size = (w, h);
                    self.recalculate();
                }
                Command::Attach { surface, ack } => {
                    let _ = ack.send(self.attach(&surface));
                }
                Command::Detach { ack } => {
                    self.release_surface();
                    let _ = ack.send(());
                }
                Command::Render => self.render(),
                Command::SetListener(listener) => self.listener = listener,
                Command::Shutdown => break,
            }
        }

        self.release_surface();
        self.listener = None;
        self.gpu.release();
    }

    fn recalculate(&mut self) {
        self.mvp = center_fit_mvp(self.preview_size, self.window_size);
        tracing::debug!(
            preview = ?self.preview_size,
            window = ?self.window_size,
            scale_x = self.mvp[0],
            scale_y = self.mvp[5],
            "Compositor transform updated"
        );
    }

    fn attach(&mut self, target: &InputSurface) -> Result<(), BackendError> {
        self.release_surface();
        let handle = self.gpu.create_window_surface(target)?;
        if let Err(e) = self.gpu.make_current(handle) {
            self.gpu.release_surface(handle);
            return Err(e);
        }
        self.surface = Some(handle);
        tracing::debug!(size = ?target.size(), "Compositor surface attached");
        Ok(())
    }

    fn release_surface(&mut self) {
        if let Some(handle) = self.surface.take() {
            self.gpu.release_surface(handle);
            tracing::debug!("Compositor surface detached");
        }
    }

    fn render(&mut self) {
        let Some(update) = self.shared.pending.lock().take() else {
            return;
        };
        let Some(surface) = self.surface else {
            self.shared
                .counters
                .dropped_detached
                .fetch_add(1, Ordering::Relaxed);
            return;
        };

        let result = self
            .gpu
            .make_current(surface)
            .and_then(|()| self.gpu.draw_texture(update.texture_id, &self.mvp, &update.tex_matrix))
            .and_then(|()| self.gpu.set_presentation_time(surface, update.timestamp_ns))
            .and_then(|()| self.gpu.swap_buffers(surface));

        match result {
            Ok(()) => {
                self.shared.counters.rendered.fetch_add(1, Ordering::Relaxed);
                if let Some(listener) = &self.listener {
                    listener.on_frame_available();
                }
            }
            Err(e) => {
                self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Compositor draw failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{headless_gpu_factory, gpu_factory, IDENTITY};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingListener(AtomicUsize);

    impl FrameListener for CountingListener {
        fn on_frame_available(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_update_before_attach_is_dropped() {
        let compositor = Compositor::new(headless_gpu_factory(), None).unwrap();
        compositor.update(1, IDENTITY, 100);
        assert_eq!(compositor.stats().dropped_detached, 1);
        assert_eq!(compositor.stats().rendered, 0);
    }

    #[test]
    fn test_update_renders_with_center_fit() {
        let compositor = Compositor::new(headless_gpu_factory(), None).unwrap();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        compositor.set_preview_size(640, 480);
        compositor.set_window_size(480, 480);
        compositor.set_listener(Some(listener.clone()));

        let surface = InputSurface::new(480, 480, 8);
        compositor.attach(surface.clone()).unwrap();
        compositor.update(9, IDENTITY, 1_000);

        assert!(wait_for(|| surface.pending() == 1));
        let frame = surface.try_take().unwrap();
        assert_eq!(frame.texture_id, 9);
        assert_eq!(frame.presentation_time_ns, 1_000);
        assert!((frame.mvp[0] - 640.0 / 480.0).abs() < 1e-5);
        assert!(wait_for(|| listener.0.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_detach_stops_frames_and_allows_reattach() {
        let compositor = Compositor::new(headless_gpu_factory(), None).unwrap();
        let first = InputSurface::new(640, 480, 8);
        compositor.attach(first.clone()).unwrap();
        compositor.detach();
        assert!(!compositor.is_attached());

        compositor.update(1, IDENTITY, 10);
        assert_eq!(first.pending(), 0);

        let second = InputSurface::new(640, 480, 8);
        compositor.attach(second.clone()).unwrap();
        compositor.update(2, IDENTITY, 20);
        assert!(wait_for(|| second.pending() == 1));
        assert_eq!(first.pending(), 0);
    }

    #[test]
    fn test_rapid_updates_supersede() {
        let compositor = Compositor::new(headless_gpu_factory(), None).unwrap();
        let surface = InputSurface::new(640, 480, 64);
        compositor.attach(surface.clone()).unwrap();

        for i in 0..50 {
            compositor.update(i, IDENTITY, i64::from(i));
        }

        assert!(wait_for(|| {
            let stats = compositor.stats();
            stats.rendered + stats.superseded == 50
        }));
        assert_eq!(surface.presented(), compositor.stats().rendered);
    }

    #[test]
    fn test_failed_backend_creation() {
        let factory = gpu_factory(|_| Err(BackendError::gpu("no display")));
        let err = Compositor::new(factory, None).err().unwrap();
        assert!(err.to_string().contains("no display"));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut compositor = Compositor::new(headless_gpu_factory(), None).unwrap();
        compositor.release();
        compositor.release();
        compositor.update(1, IDENTITY, 0);
    }
}
