//! Encoder input surface shared between the compositor and a video codec.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::compositor::Mat4;

/// A frame the compositor has presented onto an [`InputSurface`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame {
    /// Source texture the frame was drawn from.
    pub texture_id: u32,
    /// Presentation timestamp stamped by the compositor, in nanoseconds.
    pub presentation_time_ns: i64,
    /// Model-view-projection transform used for the draw.
    pub mvp: Mat4,
    /// Texture coordinate transform supplied by the producer.
    pub tex_matrix: Mat4,
}

#[derive(Debug, Default)]
struct SurfaceFrames {
    queue: VecDeque<RenderedFrame>,
    presented: u64,
    dropped: u64,
    released: bool,
}

#[derive(Debug)]
struct SurfaceInner {
    width: u32,
    height: u32,
    capacity: usize,
    frames: Mutex<SurfaceFrames>,
    available: Condvar,
}

/// Render target that feeds a video codec.
///
/// The compositor presents frames into it; the codec consumes them. When the
/// codec falls behind, the oldest unconsumed frame is discarded so the
/// surface always holds the most recent frames. Cloning yields another handle
/// to the same surface.
#[derive(Debug, Clone)]
pub struct InputSurface {
    inner: Arc<SurfaceInner>,
}

impl InputSurface {
    /// Creates a surface of the given size holding at most `capacity` frames.
    #[must_use]
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                width,
                height,
                capacity: capacity.max(1),
                frames: Mutex::new(SurfaceFrames::default()),
                available: Condvar::new(),
            }),
        }
    }

    /// Surface size in pixels.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.inner.width, self.inner.height)
    }

    /// Presents a frame. Returns `false` if the surface has been released.
    pub fn present(&self, frame: RenderedFrame) -> bool {
        let mut frames = self.inner.frames.lock();
        if frames.released {
            return false;
        }
        if frames.queue.len() >= self.inner.capacity {
            frames.queue.pop_front();
            frames.dropped += 1;
        }
        frames.queue.push_back(frame);
        frames.presented += 1;
        self.inner.available.notify_one();
        true
    }

    /// Takes the oldest presented frame without waiting.
    pub fn try_take(&self) -> Option<RenderedFrame> {
        self.inner.frames.lock().queue.pop_front()
    }

    /// Takes the oldest presented frame, waiting up to `timeout` for one.
    pub fn wait_frame(&self, timeout: Duration) -> Option<RenderedFrame> {
        let mut frames = self.inner.frames.lock();
        if frames.queue.is_empty() && !frames.released {
            self.inner.available.wait_for(&mut frames, timeout);
        }
        frames.queue.pop_front()
    }

    /// Frames waiting to be consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.frames.lock().queue.len()
    }

    /// Total frames presented since creation.
    #[must_use]
    pub fn presented(&self) -> u64 {
        self.inner.frames.lock().presented
    }

    /// Frames discarded because the consumer fell behind.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.frames.lock().dropped
    }

    /// Rejects further frames and wakes any waiter.
    pub fn release(&self) {
        let mut frames = self.inner.frames.lock();
        frames.released = true;
        self.inner.available.notify_all();
    }

    /// Returns `true` once [`release`](Self::release) has been called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.frames.lock().released
    }
}
