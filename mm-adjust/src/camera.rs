//! The camera solve object.

use std::collections::BTreeMap;

use nalgebra as na;

use mm_scene::{
    projection_matrix, transform_matrix, CameraProjection, FilmFit, RotateOrder,
};

use crate::attr::{AttrRole, AttrValue};
use crate::frame::FrameNumber;
use crate::{Result, SolveError};

/// The nine TRS channels and rotate order of a transform node.
#[derive(Debug, Clone)]
pub struct TransformValues {
    pub tx: AttrValue,
    pub ty: AttrValue,
    pub tz: AttrValue,
    pub rx: AttrValue,
    pub ry: AttrValue,
    pub rz: AttrValue,
    pub sx: AttrValue,
    pub sy: AttrValue,
    pub sz: AttrValue,
    pub rotate_order: RotateOrder,
}

impl Default for TransformValues {
    fn default() -> Self {
        Self {
            tx: AttrValue::Static(0.0),
            ty: AttrValue::Static(0.0),
            tz: AttrValue::Static(0.0),
            rx: AttrValue::Static(0.0),
            ry: AttrValue::Static(0.0),
            rz: AttrValue::Static(0.0),
            sx: AttrValue::Static(1.0),
            sy: AttrValue::Static(1.0),
            sz: AttrValue::Static(1.0),
            rotate_order: RotateOrder::Xyz,
        }
    }
}

impl TransformValues {
    pub fn matrix_at(&self, frame: FrameNumber) -> na::Matrix4<f64> {
        transform_matrix(
            (self.tx.get(frame), self.ty.get(frame), self.tz.get(frame)),
            (self.rx.get(frame), self.ry.get(frame), self.rz.get(frame)),
            (self.sx.get(frame), self.sy.get(frame), self.sz.get(frame)),
            self.rotate_order,
        )
    }

    pub fn value(&self, role: AttrRole) -> Option<&AttrValue> {
        match role {
            AttrRole::TranslateX => Some(&self.tx),
            AttrRole::TranslateY => Some(&self.ty),
            AttrRole::TranslateZ => Some(&self.tz),
            AttrRole::RotateX => Some(&self.rx),
            AttrRole::RotateY => Some(&self.ry),
            AttrRole::RotateZ => Some(&self.rz),
            AttrRole::ScaleX => Some(&self.sx),
            AttrRole::ScaleY => Some(&self.sy),
            AttrRole::ScaleZ => Some(&self.sz),
            _ => None,
        }
    }

    pub fn value_mut(&mut self, role: AttrRole) -> Option<&mut AttrValue> {
        match role {
            AttrRole::TranslateX => Some(&mut self.tx),
            AttrRole::TranslateY => Some(&mut self.ty),
            AttrRole::TranslateZ => Some(&mut self.tz),
            AttrRole::RotateX => Some(&mut self.rx),
            AttrRole::RotateY => Some(&mut self.ry),
            AttrRole::RotateZ => Some(&mut self.rz),
            AttrRole::ScaleX => Some(&mut self.sx),
            AttrRole::ScaleY => Some(&mut self.sy),
            AttrRole::ScaleZ => Some(&mut self.sz),
            _ => None,
        }
    }
}

/// A pinhole camera: a world transform plus film-back parameters.
///
/// Holds a per-frame world-projection matrix cache; any write-back of
/// solved parameters must clear the cache because camera attributes may
/// have changed.
#[derive(Debug, Clone)]
pub struct Camera {
    pub name: String,
    pub transform: TransformValues,
    /// Millimetres.
    pub focal_length: AttrValue,
    /// Millimetres.
    pub film_back_width: AttrValue,
    pub film_back_height: AttrValue,
    pub film_offset_x: AttrValue,
    pub film_offset_y: AttrValue,
    pub film_fit: FilmFit,
    pub near_clip: f64,
    pub far_clip: f64,
    pub camera_scale: f64,
    /// Pixels.
    pub render_width: u32,
    pub render_height: u32,
    world_proj_cache: BTreeMap<FrameNumber, na::Matrix4<f64>>,
}

impl Camera {
    pub fn new(name: &str, render_width: u32, render_height: u32) -> Self {
        Self {
            name: name.to_string(),
            transform: TransformValues::default(),
            focal_length: AttrValue::Static(35.0),
            film_back_width: AttrValue::Static(36.0),
            film_back_height: AttrValue::Static(24.0),
            film_offset_x: AttrValue::Static(0.0),
            film_offset_y: AttrValue::Static(0.0),
            film_fit: FilmFit::Horizontal,
            near_clip: 0.1,
            far_clip: 10000.0,
            camera_scale: 1.0,
            render_width,
            render_height,
            world_proj_cache: BTreeMap::new(),
        }
    }

    pub fn render_aspect(&self) -> f64 {
        f64::from(self.render_width) / f64::from(self.render_height)
    }

    pub fn film_back_aspect(&self, frame: FrameNumber) -> f64 {
        self.film_back_width.get(frame) / self.film_back_height.get(frame)
    }

    pub fn projection_parameters(&self, frame: FrameNumber) -> CameraProjection {
        CameraProjection {
            focal_length: self.focal_length.get(frame),
            film_back_width: self.film_back_width.get(frame),
            film_back_height: self.film_back_height.get(frame),
            film_offset_x: self.film_offset_x.get(frame),
            film_offset_y: self.film_offset_y.get(frame),
            film_fit: self.film_fit,
            render_width: f64::from(self.render_width),
            render_height: f64::from(self.render_height),
            near_clip: self.near_clip,
            far_clip: self.far_clip,
            camera_scale: self.camera_scale,
        }
    }

    pub fn world_matrix(&self, frame: FrameNumber) -> na::Matrix4<f64> {
        self.transform.matrix_at(frame)
    }

    pub fn world_position(&self, frame: FrameNumber) -> na::Point3<f64> {
        let m = self.world_matrix(frame);
        na::Point3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
    }

    /// The combined projection * view matrix at a frame, cached until
    /// [`Camera::clear_attr_value_cache`].
    pub fn world_projection_matrix(&mut self, frame: FrameNumber) -> Result<na::Matrix4<f64>> {
        if let Some(matrix) = self.world_proj_cache.get(&frame) {
            return Ok(*matrix);
        }
        let world = self.world_matrix(frame);
        let view = world
            .try_inverse()
            .ok_or(mm_scene::SceneError::SingularCameraMatrix)
            .map_err(SolveError::from)?;
        let projection = projection_matrix(&self.projection_parameters(frame))?;
        let matrix = projection * view;
        self.world_proj_cache.insert(frame, matrix);
        Ok(matrix)
    }

    pub fn clear_attr_value_cache(&mut self) {
        self.world_proj_cache.clear();
    }

    pub fn attr_value(&self, role: AttrRole, frame: FrameNumber) -> Option<f64> {
        match role {
            AttrRole::FocalLength => Some(self.focal_length.get(frame)),
            _ => self.transform.value(role).map(|v| v.get(frame)),
        }
    }

    pub fn set_attr_value(&mut self, role: AttrRole, frame: FrameNumber, value: f64) -> bool {
        match role {
            AttrRole::FocalLength => {
                self.focal_length.set(frame, value);
                true
            }
            _ => match self.transform.value_mut(role) {
                Some(slot) => {
                    slot.set(frame, value);
                    true
                }
                None => false,
            },
        }
    }
}
