//! GPU offscreen compositor.
//!
//! The [`Compositor`] owns a GPU backend on its own thread and draws live
//! producer textures onto the video encoder's [`InputSurface`] through a
//! center-fit transform.
//!
//! ```text
//! camera ──update()──▶ pending slot ──Render──▶ compositor thread
//!                                                 │ make_current
//!                                                 │ draw_texture(mvp)
//!                                                 │ swap_buffers
//!                                                 ▼
//!                                   InputSurface ──▶ video codec
//!                                                 │
//!                                   FrameListener::on_frame_available
//! ```

mod headless;
mod offscreen;
mod transform;

pub use headless::{DrawRecord, HeadlessGpu};
pub use offscreen::{Compositor, CompositorStats, FrameListener};
pub use transform::{center_fit_mvp, center_fit_scale, Mat4, IDENTITY};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::codec::InputSurface;
use crate::BackendError;

/// Opaque handle to a caller-owned GPU context the compositor shares
/// resources with (typically the camera preview's context).
#[derive(Clone)]
pub struct SharedContext(Arc<dyn Any + Send + Sync>);

impl SharedContext {
    /// Wraps a backend-specific context handle.
    pub fn new<T: Any + Send + Sync>(context: T) -> Self {
        Self(Arc::new(context))
    }

    /// Returns the wrapped handle if it has type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedContext(..)")
    }
}

/// Identifies a window surface created by a [`GpuBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// GPU operations the compositor needs.
///
/// Created and used only on the compositor thread.
pub trait GpuBackend {
    /// Creates a window surface that presents into `target`.
    fn create_window_surface(
        &mut self,
        target: &InputSurface,
    ) -> Result<SurfaceHandle, BackendError>;

    /// Binds the context to `surface`.
    fn make_current(&mut self, surface: SurfaceHandle) -> Result<(), BackendError>;

    /// Draws `texture_id` through the given transforms into the current surface.
    fn draw_texture(
        &mut self,
        texture_id: u32,
        mvp: &Mat4,
        tex_matrix: &Mat4,
    ) -> Result<(), BackendError>;

    /// Stamps the next presented frame.
    fn set_presentation_time(
        &mut self,
        surface: SurfaceHandle,
        nanos: i64,
    ) -> Result<(), BackendError>;

    /// Presents the current frame.
    fn swap_buffers(&mut self, surface: SurfaceHandle) -> Result<(), BackendError>;

    /// Destroys a window surface. The context stays alive.
    fn release_surface(&mut self, surface: SurfaceHandle);

    /// Destroys the context.
    fn release(&mut self);
}

/// Creates the GPU backend on the compositor thread.
pub type GpuFactory =
    Arc<dyn Fn(Option<&SharedContext>) -> Result<Box<dyn GpuBackend>, BackendError> + Send + Sync>;

/// Wraps a closure into a [`GpuFactory`].
pub fn gpu_factory<F>(f: F) -> GpuFactory
where
    F: Fn(Option<&SharedContext>) -> Result<Box<dyn GpuBackend>, BackendError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Factory producing a [`HeadlessGpu`].
pub fn headless_gpu_factory() -> GpuFactory {
    gpu_factory(|shared| Ok(Box::new(HeadlessGpu::new(shared)) as Box<dyn GpuBackend>))
}
