//! GPU backend without a GPU.

use std::collections::HashMap;

use crate::codec::{InputSurface, RenderedFrame};
use crate::compositor::{GpuBackend, Mat4, SharedContext, SurfaceHandle};
use crate::BackendError;

/// One draw call as seen by [`HeadlessGpu`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Source texture.
    pub texture_id: u32,
    /// Model-view-projection transform.
    pub mvp: Mat4,
    /// Texture coordinate transform.
    pub tex_matrix: Mat4,
}

/// Records draw calls and presents them as [`RenderedFrame`]s on the target
/// surface. Useful for tests and for running the pipeline headless.
#[derive(Debug, Default)]
pub struct HeadlessGpu {
    shared: bool,
    next_id: u64,
    surfaces: HashMap<SurfaceHandle, InputSurface>,
    current: Option<SurfaceHandle>,
    pending_draw: Option<DrawRecord>,
    pending_pts: Option<i64>,
    released: bool,
}

impl HeadlessGpu {
    /// Creates a backend, optionally sharing with a caller context.
    pub fn new(shared: Option<&SharedContext>) -> Self {
        Self {
            shared: shared.is_some(),
            ..Self::default()
        }
    }

    /// Returns `true` if created against a shared context.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Number of live window surfaces.
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    fn check_alive(&self) -> Result<(), BackendError> {
        if self.released {
            Err(BackendError::gpu("context released"))
        } else {
            Ok(())
        }
    }

    fn surface(&self, handle: SurfaceHandle) -> Result<&InputSurface, BackendError> {
        self.surfaces
            .get(&handle)
            .ok_or_else(|| BackendError::gpu(format!("unknown surface {}", handle.0)))
    }
}

impl GpuBackend for HeadlessGpu {
    fn create_window_surface(
        &mut self,
        target: &InputSurface,
    ) -> Result<SurfaceHandle, BackendError> {
        self.check_alive()?;
        if target.is_released() {
            return Err(BackendError::gpu("target surface is released"));
        }
        self.next_id += 1;
        let handle = SurfaceHandle(self.next_id);
        self.surfaces.insert(handle, target.clone());
        Ok(handle)
    }

    fn make_current(&mut self, surface: SurfaceHandle) -> Result<(), BackendError> {
        self.check_alive()?;
        self.surface(surface)?;
        self.current = Some(surface);
        Ok(())
    }

    fn draw_texture(
        &mut self,
        texture_id: u32,
        mvp: &Mat4,
        tex_matrix: &Mat4,
    ) -> Result<(), BackendError> {
        self.check_alive()?;
        if self.current.is_none() {
            return Err(BackendError::gpu("no current surface"));
        }
        self.pending_draw = Some(DrawRecord {
            texture_id,
            mvp: *mvp,
            tex_matrix: *tex_matrix,
        });
        Ok(())
    }

    fn set_presentation_time(
        &mut self,
        surface: SurfaceHandle,
        nanos: i64,
    ) -> Result<(), BackendError> {
        self.surface(surface)?;
        self.pending_pts = Some(nanos);
        Ok(())
    }

    fn swap_buffers(&mut self, surface: SurfaceHandle) -> Result<(), BackendError> {
        self.check_alive()?;
        let target = self.surface(surface)?.clone();
        let Some(draw) = self.pending_draw.take() else {
            return Err(BackendError::gpu("swap without draw"));
        };
        let frame = RenderedFrame {
            texture_id: draw.texture_id,
            presentation_time_ns: self.pending_pts.take().unwrap_or(0),
            mvp: draw.mvp,
            tex_matrix: draw.tex_matrix,
        };
        if target.present(frame) {
            Ok(())
        } else {
            Err(BackendError::gpu("target surface is released"))
        }
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        self.surfaces.remove(&surface);
        if self.current == Some(surface) {
            self.current = None;
        }
    }

    fn release(&mut self) {
        self.surfaces.clear();
        self.current = None;
        self.released = true;
    }
}
