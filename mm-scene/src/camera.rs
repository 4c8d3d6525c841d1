//! Pinhole camera projection with film-back and film-fit semantics.
//!
//! The projection maps camera-space points (camera looks down +Z) onto the
//! film back, measured in millimetres, and normalises by the film-back
//! width so that `x` spans [-1, 1] inside the film gate. The film-fit
//! policy scale is baked into the matrix; observed marker positions must be
//! run through [`apply_film_fit_correction_backward`] to land in the same
//! space.

use nalgebra as na;

use crate::{Result, SceneError};

/// The policy by which a film-back aspect is mapped to a render aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilmFit {
    #[default]
    Fill,
    Horizontal,
    Vertical,
    Overscan,
}

impl FilmFit {
    pub fn from_index(index: u8) -> Option<FilmFit> {
        match index {
            0 => Some(FilmFit::Fill),
            1 => Some(FilmFit::Horizontal),
            2 => Some(FilmFit::Vertical),
            3 => Some(FilmFit::Overscan),
            _ => None,
        }
    }
}

/// Per-axis film-fit scale factors.
///
/// These are the factors baked into the projection matrix. The backward
/// marker correction multiplies by the same factors, the forward
/// correction divides; forward and backward compose to the identity.
pub fn film_fit_factors(film_fit: FilmFit, film_aspect: f64, render_aspect: f64) -> (f64, f64) {
    let mut scale_x = 1.0;
    let mut scale_y = 1.0;
    match film_fit {
        FilmFit::Horizontal => {
            if film_aspect > render_aspect {
                scale_y = render_aspect / film_aspect;
            }
        }
        FilmFit::Vertical => {
            if render_aspect > film_aspect {
                scale_x = film_aspect / render_aspect;
            }
        }
        FilmFit::Fill => {
            if film_aspect > render_aspect {
                scale_y = render_aspect / film_aspect;
            } else {
                scale_x = film_aspect / render_aspect;
            }
        }
        FilmFit::Overscan => {
            if film_aspect > render_aspect {
                scale_x = film_aspect / render_aspect;
            } else {
                scale_y = render_aspect / film_aspect;
            }
        }
    }
    (scale_x, scale_y)
}

/// Scale a film-gate normalised position into the render space the
/// projection matrix produces.
pub fn apply_film_fit_correction_backward(
    film_fit: FilmFit,
    film_aspect: f64,
    render_aspect: f64,
    x: &mut f64,
    y: &mut f64,
) {
    let (scale_x, scale_y) = film_fit_factors(film_fit, film_aspect, render_aspect);
    *x *= scale_x;
    *y *= scale_y;
}

/// Inverse of [`apply_film_fit_correction_backward`].
pub fn apply_film_fit_correction_forward(
    film_fit: FilmFit,
    film_aspect: f64,
    render_aspect: f64,
    x: &mut f64,
    y: &mut f64,
) {
    let (scale_x, scale_y) = film_fit_factors(film_fit, film_aspect, render_aspect);
    *x /= scale_x;
    *y /= scale_y;
}

/// The scalar camera parameters needed to build a projection matrix.
#[derive(Debug, Clone, Copy)]
pub struct CameraProjection {
    /// Focal length in millimetres.
    pub focal_length: f64,
    /// Film back width in millimetres.
    pub film_back_width: f64,
    /// Film back height in millimetres.
    pub film_back_height: f64,
    /// Film back offset in millimetres.
    pub film_offset_x: f64,
    pub film_offset_y: f64,
    pub film_fit: FilmFit,
    /// Render resolution in pixels.
    pub render_width: f64,
    pub render_height: f64,
    pub near_clip: f64,
    pub far_clip: f64,
    pub camera_scale: f64,
}

impl CameraProjection {
    pub fn film_aspect(&self) -> f64 {
        self.film_back_width / self.film_back_height
    }

    pub fn render_aspect(&self) -> f64 {
        self.render_width / self.render_height
    }
}

/// Build the camera projection matrix.
///
/// Post perspective-divide, `x` is in [-1, 1] across the film-gate width
/// and `y` is width-normalised; both axes carry the film-fit scale.
pub fn projection_matrix(camera: &CameraProjection) -> Result<na::Matrix4<f64>> {
    if camera.film_back_width <= 0.0 || camera.film_back_height <= 0.0 {
        return Err(SceneError::InvalidFilmBack);
    }
    let (scale_x, scale_y) = film_fit_factors(
        camera.film_fit,
        camera.film_aspect(),
        camera.render_aspect(),
    );

    let focal = camera.focal_length / camera.camera_scale;
    let inv_half_width = 2.0 / camera.film_back_width;

    let near = camera.near_clip;
    let far = camera.far_clip;
    let depth_scale = (far + near) / (far - near);
    let depth_offset = -2.0 * far * near / (far - near);

    // Column-vector convention; w takes the camera-space depth.
    let mut m = na::Matrix4::zeros();
    m[(0, 0)] = focal * inv_half_width * scale_x;
    m[(0, 2)] = camera.film_offset_x * inv_half_width * scale_x;
    m[(1, 1)] = focal * inv_half_width * scale_y;
    m[(1, 2)] = camera.film_offset_y * inv_half_width * scale_y;
    m[(2, 2)] = depth_scale;
    m[(2, 3)] = depth_offset;
    m[(3, 2)] = 1.0;
    Ok(m)
}

/// Project a world-space point through a combined projection-view matrix
/// into screen space: [-0.5, 0.5] across the render width, y
/// width-normalised. Points at (or behind) the camera plane produce
/// non-finite coordinates which callers treat as a numerical failure.
pub fn project_point(
    world_projection: &na::Matrix4<f64>,
    point: &na::Point3<f64>,
) -> (f64, f64) {
    let clip = world_projection * na::Vector4::new(point.x, point.y, point.z, 1.0);
    let x = clip.x / clip.w;
    let y = clip.y / clip.w;
    (x * 0.5, y * 0.5)
}
