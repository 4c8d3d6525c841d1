//! Lens-model lookup tables for the solve.
//!
//! Each distortion layer gets an independent model instance per solve
//! frame so animated lens attributes can hold different coefficients on
//! different frames. The tables answer two queries: the lens chain for a
//! (marker, frame) pair, and the model a lens attribute writes to for an
//! (attribute, frame) pair.

use mm_lens::{LensLayers, LensModel, LensParameter};

use crate::attr::{AttrList, AttrRole};
use crate::marker::MarkerList;
use crate::{Result, SolveError};

/// The host-provided lens description: the layer arena plus, per camera,
/// the tail layer of the distortion chain rendered through that camera.
#[derive(Debug, Clone, Default)]
pub struct LensSetup {
    pub layers: LensLayers,
    pub camera_to_lens: Vec<Option<usize>>,
}

impl LensSetup {
    pub fn no_lens(num_cameras: usize) -> Self {
        Self {
            layers: LensLayers::new(),
            camera_to_lens: vec![None; num_cameras],
        }
    }
}

fn lens_parameter_for_role(role: AttrRole) -> Option<LensParameter> {
    match role {
        AttrRole::LensBasicK1 => Some(LensParameter::BasicK1),
        AttrRole::LensBasicK2 => Some(LensParameter::BasicK2),
        AttrRole::LensTdeDistortion => Some(LensParameter::TdeDistortion),
        AttrRole::LensTdeAnamorphicSqueeze => Some(LensParameter::TdeAnamorphicSqueeze),
        AttrRole::LensTdeCurvatureX => Some(LensParameter::TdeCurvatureX),
        AttrRole::LensTdeCurvatureY => Some(LensParameter::TdeCurvatureY),
        AttrRole::LensTdeQuarticDistortion => Some(LensParameter::TdeQuarticDistortion),
        _ => None,
    }
}

/// Working lens state for one solve invocation.
#[derive(Debug, Clone)]
pub struct LensState {
    /// Model instances, indexed `[layer * num_frames + frame]`.
    models: Vec<Box<dyn LensModel>>,
    /// Parent layer per layer, upstream applied first.
    parents: Vec<Option<usize>>,
    /// Tail layer per (marker, frame), indexed
    /// `[marker * num_frames + frame]`.
    marker_frame_to_layer: Vec<Option<usize>>,
    /// Layer written by each solve attribute (lens attributes only).
    attr_to_layer: Vec<Option<usize>>,
    num_frames: usize,
    num_layers: usize,
}

impl LensState {
    pub fn build(
        setup: &LensSetup,
        markers: &MarkerList,
        attrs: &AttrList,
        num_frames: usize,
    ) -> Result<Self> {
        let num_layers = setup.layers.len();

        let mut models = Vec::with_capacity(num_layers * num_frames);
        let mut parents = Vec::with_capacity(num_layers);
        for layer_index in 0..num_layers {
            for _ in 0..num_frames {
                models.push(setup.layers.clone_model(layer_index)?);
            }
            parents.push(setup.layers.parent(layer_index)?);
        }

        let mut marker_frame_to_layer = Vec::with_capacity(markers.len() * num_frames);
        for marker in markers.iter() {
            let layer = setup
                .camera_to_lens
                .get(marker.camera_index)
                .copied()
                .flatten();
            for _ in 0..num_frames {
                marker_frame_to_layer.push(layer);
            }
        }

        let mut attr_to_layer = Vec::with_capacity(attrs.len());
        for attr in attrs.iter() {
            if attr.role().is_lens() {
                let layer_index = attr.object_index();
                if layer_index >= num_layers {
                    return Err(SolveError::UnknownAttrObject {
                        attr: attr.name().to_string(),
                        index: layer_index,
                    });
                }
                attr_to_layer.push(Some(layer_index));
            } else {
                attr_to_layer.push(None);
            }
        }

        Ok(Self {
            models,
            parents,
            marker_frame_to_layer,
            attr_to_layer,
            num_frames,
            num_layers,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn has_lens(&self, marker_index: usize, frame_index: usize) -> bool {
        self.marker_frame_to_layer
            .get(marker_index * self.num_frames + frame_index)
            .copied()
            .flatten()
            .is_some()
    }

    /// Distort a position through the lens chain of (marker, frame), the
    /// upstream layers applied first. `None` when the marker has no lens.
    pub fn apply_distort(
        &self,
        marker_index: usize,
        frame_index: usize,
        x: f64,
        y: f64,
    ) -> Option<(f64, f64)> {
        let tail = self
            .marker_frame_to_layer
            .get(marker_index * self.num_frames + frame_index)
            .copied()
            .flatten()?;

        let mut chain = Vec::new();
        let mut cursor = Some(tail);
        while let Some(layer) = cursor {
            chain.push(layer);
            cursor = self.parents[layer];
        }
        chain.reverse();

        let mut position = (x, y);
        for layer in chain {
            let model = &self.models[layer * self.num_frames + frame_index];
            position = model.apply_distort(position.0, position.1);
        }
        Some(position)
    }

    /// Write one lens coefficient. With a frame index the write lands on
    /// that frame's model instance; without one (a static parameter) it
    /// lands on every frame's instance.
    pub fn set_attr_value(
        &mut self,
        attr_index: usize,
        role: AttrRole,
        frame_index: Option<usize>,
        value: f64,
    ) -> bool {
        let Some(layer) = self.attr_to_layer.get(attr_index).copied().flatten() else {
            return false;
        };
        let Some(parameter) = lens_parameter_for_role(role) else {
            return false;
        };
        match frame_index {
            Some(frame) => {
                self.models[layer * self.num_frames + frame].set_parameter(parameter, value)
            }
            None => {
                let mut all_ok = true;
                for frame in 0..self.num_frames {
                    all_ok &=
                        self.models[layer * self.num_frames + frame].set_parameter(parameter, value);
                }
                all_ok
            }
        }
    }

    /// Read one lens coefficient from the model instance at a frame.
    pub fn attr_value(&self, attr_index: usize, role: AttrRole, frame_index: usize) -> Option<f64> {
        let layer = self.attr_to_layer.get(attr_index).copied().flatten()?;
        let parameter = lens_parameter_for_role(role)?;
        self.models[layer * self.num_frames + frame_index].parameter(parameter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{Attr, ObjectType};
    use crate::marker::Marker;
    use mm_lens::BasicRadial;

    fn make_state() -> LensState {
        let mut layers = LensLayers::new();
        layers
            .add_layer(Box::new(BasicRadial::new(0.1, 0.0)), None)
            .unwrap();
        let setup = LensSetup {
            layers,
            camera_to_lens: vec![Some(0)],
        };
        let markers = MarkerList::from_markers(vec![Marker::new("mkr", 0, 0)]);
        let attrs = AttrList::from_attrs(vec![Attr::new(
            "lens.k1",
            "aa01",
            ObjectType::Lens,
            AttrRole::LensBasicK1,
            0,
            true,
        )]);
        LensState::build(&setup, &markers, &attrs, 2).unwrap()
    }

    #[test]
    fn per_frame_instances_are_independent() {
        let mut state = make_state();
        assert!(state.set_attr_value(0, AttrRole::LensBasicK1, Some(1), 0.5));
        assert_eq!(state.attr_value(0, AttrRole::LensBasicK1, 0), Some(0.1));
        assert_eq!(state.attr_value(0, AttrRole::LensBasicK1, 1), Some(0.5));

        let (x0, _) = state.apply_distort(0, 0, 0.2, 0.0).unwrap();
        let (x1, _) = state.apply_distort(0, 1, 0.2, 0.0).unwrap();
        assert!(x1 > x0);
    }

    #[test]
    fn static_write_lands_on_every_frame() {
        let mut state = make_state();
        assert!(state.set_attr_value(0, AttrRole::LensBasicK1, None, 0.3));
        assert_eq!(state.attr_value(0, AttrRole::LensBasicK1, 0), Some(0.3));
        assert_eq!(state.attr_value(0, AttrRole::LensBasicK1, 1), Some(0.3));
    }
}
