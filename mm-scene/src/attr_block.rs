//! Frame-indexed storage for animatable scalar values.

use crate::{FrameValue, Result, SceneError};

/// Identity of one scalar channel inside an [`AttrDataBlock`].
///
/// Static attributes hold a single value for all frames; animated
/// attributes hold one value for every integer frame of their stored
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrId {
    Static(usize),
    Animated(usize),
}

#[derive(Debug, Clone)]
struct AnimCurve {
    start_frame: FrameValue,
    values: Vec<f64>,
}

impl AnimCurve {
    fn end_frame(&self) -> FrameValue {
        self.start_frame + (self.values.len() as FrameValue) - 1
    }

    fn index_of(&self, frame: FrameValue) -> Result<usize> {
        if frame < self.start_frame || frame > self.end_frame() {
            return Err(SceneError::FrameOutOfRange {
                frame,
                start: self.start_frame,
                end: self.end_frame(),
            });
        }
        Ok((frame - self.start_frame) as usize)
    }
}

/// The flat store of attribute values consumed by scene evaluation.
///
/// Animated attributes store a value for every integer frame in their
/// range, whether or not those frames participate in a solve. This keeps
/// frame lookup O(1) and the solver's view of parameters simple.
#[derive(Debug, Clone, Default)]
pub struct AttrDataBlock {
    static_values: Vec<f64>,
    anim_curves: Vec<AnimCurve>,
}

impl AttrDataBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_attr_static(&self) -> usize {
        self.static_values.len()
    }

    pub fn num_attr_animated(&self) -> usize {
        self.anim_curves.len()
    }

    pub fn create_attr_static(&mut self, value: f64) -> AttrId {
        let index = self.static_values.len();
        self.static_values.push(value);
        AttrId::Static(index)
    }

    /// Create an animated attribute holding `values[i]` at frame
    /// `start_frame + i`.
    pub fn create_attr_animated(
        &mut self,
        start_frame: FrameValue,
        values: Vec<f64>,
    ) -> Result<AttrId> {
        if values.is_empty() {
            return Err(SceneError::EmptyAnimCurve);
        }
        let index = self.anim_curves.len();
        self.anim_curves.push(AnimCurve {
            start_frame,
            values,
        });
        Ok(AttrId::Animated(index))
    }

    /// Get a value. The frame is ignored for static attributes.
    pub fn attr_value(&self, attr_id: AttrId, frame: FrameValue) -> Result<f64> {
        match attr_id {
            AttrId::Static(index) => self
                .static_values
                .get(index)
                .copied()
                .ok_or(SceneError::AttrIdOutOfRange(index)),
            AttrId::Animated(index) => {
                let curve = self
                    .anim_curves
                    .get(index)
                    .ok_or(SceneError::AttrIdOutOfRange(index))?;
                let value_index = curve.index_of(frame)?;
                Ok(curve.values[value_index])
            }
        }
    }

    /// Set a value. The frame is ignored for static attributes; for
    /// animated attributes it must lie inside the stored range.
    pub fn set_attr_value(&mut self, attr_id: AttrId, frame: FrameValue, value: f64) -> Result<()> {
        match attr_id {
            AttrId::Static(index) => {
                let slot = self
                    .static_values
                    .get_mut(index)
                    .ok_or(SceneError::AttrIdOutOfRange(index))?;
                *slot = value;
                Ok(())
            }
            AttrId::Animated(index) => {
                let curve = self
                    .anim_curves
                    .get_mut(index)
                    .ok_or(SceneError::AttrIdOutOfRange(index))?;
                let value_index = curve.index_of(frame)?;
                curve.values[value_index] = value;
                Ok(())
            }
        }
    }
}
