//! The 3D bundle solve object.

use nalgebra as na;

use crate::attr::{AttrRole, AttrValue};
use crate::camera::TransformValues;
use crate::frame::FrameNumber;

/// A 3D point a marker is presumed to observe. Position comes from
/// evaluating the owning transform at a frame.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub name: String,
    pub transform: TransformValues,
}

impl Bundle {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transform: TransformValues::default(),
        }
    }

    pub fn with_position(mut self, x: f64, y: f64, z: f64) -> Self {
        self.transform.tx = AttrValue::Static(x);
        self.transform.ty = AttrValue::Static(y);
        self.transform.tz = AttrValue::Static(z);
        self
    }

    pub fn world_position(&self, frame: FrameNumber) -> na::Point3<f64> {
        let m = self.transform.matrix_at(frame);
        na::Point3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
    }

    pub fn attr_value(&self, role: AttrRole, frame: FrameNumber) -> Option<f64> {
        self.transform.value(role).map(|v| v.get(frame))
    }

    pub fn set_attr_value(&mut self, role: AttrRole, frame: FrameNumber, value: f64) -> bool {
        match self.transform.value_mut(role) {
            Some(slot) => {
                slot.set(frame, value);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn world_position_follows_translation() {
        let bundle = Bundle::new("bnd").with_position(1.0, -2.0, 3.0);
        let p = bundle.world_position(0);
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, -2.0);
        assert_relative_eq!(p.z, 3.0);
    }
}
