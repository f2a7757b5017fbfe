//! Center-fit model-view-projection transform.

/// Column-major 4×4 matrix.
pub type Mat4 = [f32; 16];

/// The identity matrix.
pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Axis scale factors that make a `preview` image cover a `window` without
/// distortion.
///
/// The axis along which the preview is relatively longer is scaled up by
/// `preview_ratio / window_ratio` (or its inverse for the other axis), so the
/// window is fully covered and the excess is cropped symmetrically. Returns
/// `(1.0, 1.0)` when any dimension is zero.
///
/// # Example
///
/// ```
/// use stream_recorder::compositor::center_fit_scale;
///
/// // 4:3 camera into a square video crops the sides
/// let (sx, sy) = center_fit_scale((640, 480), (480, 480));
/// assert!((sx - 4.0 / 3.0).abs() < 1e-6);
/// assert_eq!(sy, 1.0);
/// ```
#[must_use]
pub fn center_fit_scale(preview: (u32, u32), window: (u32, u32)) -> (f32, f32) {
    let (pw, ph) = preview;
    let (ww, wh) = window;
    if pw == 0 || ph == 0 || ww == 0 || wh == 0 {
        return (1.0, 1.0);
    }

    let preview_ratio = f64::from(pw) / f64::from(ph);
    let window_ratio = f64::from(ww) / f64::from(wh);

    if preview_ratio < window_ratio {
        (1.0, (window_ratio / preview_ratio) as f32)
    } else {
        ((preview_ratio / window_ratio) as f32, 1.0)
    }
}

/// Scale matrix for [`center_fit_scale`].
#[must_use]
pub fn center_fit_mvp(preview: (u32, u32), window: (u32, u32)) -> Mat4 {
    let (sx, sy) = center_fit_scale(preview, window);
    let mut mvp = IDENTITY;
    mvp[0] = sx;
    mvp[5] = sy;
    mvp
}
