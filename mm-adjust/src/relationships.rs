//! Counting and relationship mapping between markers, attributes,
//! frames, residuals and parameters.

use std::collections::BTreeMap;

use tracing::{debug, error};

use crate::attr::AttrList;
use crate::camera::Camera;
use crate::frame::FrameList;
use crate::marker::MarkerList;
use crate::matrix_bool::{MatrixBool2D, MatrixBool3D};

/// Each enabled (marker, frame) pair contributes two residuals, x then y.
pub const ERRORS_PER_MARKER: usize = 2;

/// Everything derived from counting measurable marker errors.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounts {
    pub number_of_errors: usize,
    pub number_of_marker_errors: usize,
    /// Always zero; stiffness residuals were removed from the solve but
    /// the count participates in residual indexing.
    pub number_of_attr_stiffness_errors: usize,
    /// Always zero, as above.
    pub number_of_attr_smoothness_errors: usize,
    /// Pair `(marker_index, frame_index)` per marker-residual-pair.
    pub error_to_marker: Vec<(usize, usize)>,
    /// Cached observed positions, width-normalised.
    pub marker_pos: Vec<(f64, f64)>,
    /// Weights normalised per-frame to a maximum of 1.0.
    pub marker_weight: Vec<f64>,
}

/// Count the residuals to be measured and build the per-pair caches.
///
/// A (marker, frame) pair participates iff the marker is enabled in the
/// list, the frame is enabled, the marker's own enable curve is on at the
/// frame and its weight there is positive.
pub fn count_up_number_of_errors(
    markers: &MarkerList,
    cameras: &[Camera],
    frames: &FrameList,
) -> ErrorCounts {
    let mut counts = ErrorCounts::default();

    // Per-frame maximum weight, used to normalise below.
    let mut weight_max_per_frame: BTreeMap<usize, f64> = BTreeMap::new();

    for (marker_index, marker) in markers.iter().enumerate() {
        if !markers.get_enabled(marker_index) {
            continue;
        }
        for (frame_index, frame_number) in frames.iter_enabled() {
            if !marker.enabled_at(frame_number) {
                continue;
            }
            let weight = marker.weight_at(frame_number);
            if weight <= 0.0 {
                continue;
            }

            counts.error_to_marker.push((marker_index, frame_index));
            counts.number_of_marker_errors += ERRORS_PER_MARKER;
            counts.marker_weight.push(weight);

            let current_max = weight_max_per_frame.entry(frame_index).or_insert(weight);
            if weight > *current_max {
                *current_max = weight;
            }

            // Cache the observed position, width-normalised so that
            // pixel distances are isotropic.
            let (pos_x, mut pos_y) = marker.position_at(frame_number);
            if let Some(camera) = cameras.get(marker.camera_index) {
                pos_y /= camera.film_back_aspect(frame_number);
            }
            counts.marker_pos.push((pos_x, pos_y));
        }
    }

    for (pair_index, (_, frame_index)) in counts.error_to_marker.iter().enumerate() {
        let weight_max = weight_max_per_frame[frame_index];
        counts.marker_weight[pair_index] /= weight_max;
    }

    counts.number_of_errors = counts.number_of_marker_errors
        + counts.number_of_attr_stiffness_errors
        + counts.number_of_attr_smoothness_errors;
    debug!(
        "counted errors: marker_errors={} total={}",
        counts.number_of_marker_errors, counts.number_of_errors
    );
    counts
}

/// Everything derived from counting unknown parameters.
#[derive(Debug, Clone, Default)]
pub struct ParamCounts {
    pub number_of_parameters: usize,
    /// Pair `(attr_index, frame_index)` per parameter; `None` marks a
    /// static parameter.
    pub param_to_attr: Vec<(usize, Option<usize>)>,
    /// width = parameters, height = frames: true iff the parameter's
    /// value determines residuals at that frame.
    pub param_to_frame: MatrixBool2D,
    pub param_lower_bounds: Vec<f64>,
    pub param_upper_bounds: Vec<f64>,
    pub param_weights: Vec<f64>,
}

/// Visit attributes in stable order and emit one parameter per enabled
/// frame for animated attributes, or a single static parameter.
pub fn count_up_number_of_unknown_parameters(attrs: &AttrList, frames: &FrameList) -> ParamCounts {
    let mut counts = ParamCounts::default();
    let mut frame_columns: Vec<Vec<bool>> = Vec::new();
    let frame_enabled_mask = frames.enabled_mask();

    for (attr_index, attr) in attrs.iter().enumerate() {
        if !attrs.get_enabled(attr_index) {
            continue;
        }
        if attr.role() == crate::attr::AttrRole::Unknown {
            error!(
                "attribute '{}' has no solvable role and is skipped",
                attr.name()
            );
            continue;
        }

        if attr.is_animated() {
            // One parameter for each enabled frame.
            for (frame_index, _frame_number) in frames.iter_enabled() {
                counts.param_to_attr.push((attr_index, Some(frame_index)));

                let mut column = vec![false; frames.len()];
                column[frame_index] = true;
                frame_columns.push(column);

                counts.param_lower_bounds.push(attr.minimum_value());
                counts.param_upper_bounds.push(attr.maximum_value());
                counts.param_weights.push(1.0);
            }
        } else {
            // A static parameter affects every enabled frame.
            counts.param_to_attr.push((attr_index, None));
            frame_columns.push(frame_enabled_mask.clone());
            counts.param_lower_bounds.push(attr.minimum_value());
            counts.param_upper_bounds.push(attr.maximum_value());
            counts.param_weights.push(1.0);
        }
    }

    counts.number_of_parameters = counts.param_to_attr.len();
    counts.param_to_frame = MatrixBool2D::new(counts.number_of_parameters, frames.len(), false);
    for (param_index, column) in frame_columns.iter().enumerate() {
        for (frame_index, value) in column.iter().enumerate() {
            counts.param_to_frame.set(param_index, frame_index, *value);
        }
    }
    debug!("counted parameters: {}", counts.number_of_parameters);
    counts
}

/// Expand the sparsity cube into the marker-residual-pair to parameter
/// relationship.
///
/// A parameter affects a pair iff the cube relates the marker to the
/// attribute on the pair's frame, and the parameter is static or
/// keyframed on exactly that frame.
pub fn map_errors_to_parameters(
    attrs: &AttrList,
    param_to_attr: &[(usize, Option<usize>)],
    error_to_marker: &[(usize, usize)],
    marker_to_attr_to_frame: &MatrixBool3D,
) -> MatrixBool2D {
    let number_of_pairs = error_to_marker.len();
    let number_of_parameters = param_to_attr.len();
    let mut error_to_param = MatrixBool2D::new(number_of_pairs, number_of_parameters, false);

    for (pair_index, (marker_index, marker_frame_index)) in error_to_marker.iter().enumerate() {
        for (param_index, (attr_index, attr_frame_index)) in param_to_attr.iter().enumerate() {
            debug_assert!(*attr_index < attrs.len());
            let marker_affects_attr =
                marker_to_attr_to_frame.at(*marker_index, *attr_index, *marker_frame_index);
            let param_affects_error = marker_affects_attr
                && match attr_frame_index {
                    // Only residuals on the keyframe's own frame.
                    Some(frame_index) => frame_index == marker_frame_index,
                    // Static parameters reach every frame.
                    None => true,
                };
            error_to_param.set(pair_index, param_index, param_affects_error);
        }
    }
    error_to_param
}

/// Flip off frames with no active (marker, parameter) relationship.
pub fn calculate_valid_frames(
    frames: &FrameList,
    error_to_marker: &[(usize, usize)],
    error_to_param: &MatrixBool2D,
) -> FrameList {
    let mut valid_frames = frames.clone();
    for frame_index in 0..frames.len() {
        if !frames.get_enabled(frame_index) {
            continue;
        }
        let active = error_to_marker
            .iter()
            .enumerate()
            .filter(|(_, (_, pair_frame))| *pair_frame == frame_index)
            .any(|(pair_index, _)| {
                (0..error_to_param.height()).any(|param| error_to_param.at(pair_index, param))
            });
        if !active {
            valid_frames.set_enabled(frame_index, false);
        }
    }
    valid_frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{Attr, AttrRole, AttrValue, ObjectType};
    use crate::marker::Marker;

    fn camera() -> Camera {
        let mut camera = Camera::new("cam", 1920, 1080);
        // Square film back keeps positions unchanged in the cache.
        camera.film_back_width = AttrValue::Static(36.0);
        camera.film_back_height = AttrValue::Static(36.0);
        camera
    }

    #[test]
    fn marker_weights_are_normalised_per_frame() {
        let mut marker_a = Marker::new("a", 0, 0);
        marker_a.weight = AttrValue::Static(2.0);
        let mut marker_b = Marker::new("b", 0, 1);
        marker_b.weight = AttrValue::Static(4.0);
        let markers = MarkerList::from_markers(vec![marker_a, marker_b]);
        let cameras = vec![camera()];
        let frames = FrameList::from_frames(&[1]);

        let counts = count_up_number_of_errors(&markers, &cameras, &frames);
        assert_eq!(counts.number_of_marker_errors, 4);
        assert_eq!(counts.marker_weight, vec![0.5, 1.0]);
        assert_eq!(
            counts.number_of_errors,
            counts.number_of_marker_errors
                + counts.number_of_attr_stiffness_errors
                + counts.number_of_attr_smoothness_errors
        );
    }

    #[test]
    fn disabled_frames_produce_no_errors() {
        let markers = MarkerList::from_markers(vec![Marker::new("a", 0, 0)]);
        let cameras = vec![camera()];
        let mut frames = FrameList::from_frames(&[1, 2, 3]);
        frames.set_enabled(1, false);

        let counts = count_up_number_of_errors(&markers, &cameras, &frames);
        assert_eq!(counts.error_to_marker, vec![(0, 0), (0, 2)]);
    }

    #[test]
    fn parameter_packing_visits_enabled_frames() {
        let attrs = AttrList::from_attrs(vec![
            Attr::new(
                "bnd.tx",
                "b0",
                ObjectType::Bundle,
                AttrRole::TranslateX,
                0,
                false,
            ),
            Attr::new(
                "cam.rx",
                "c0",
                ObjectType::Camera,
                AttrRole::RotateX,
                0,
                true,
            ),
        ]);
        let mut frames = FrameList::from_frames(&[1, 2, 3]);
        frames.set_enabled(2, false);

        let counts = count_up_number_of_unknown_parameters(&attrs, &frames);
        assert_eq!(counts.number_of_parameters, 3);
        assert_eq!(
            counts.param_to_attr,
            vec![(0, None), (1, Some(0)), (1, Some(1))]
        );
        assert_eq!(counts.param_lower_bounds.len(), 3);
        assert_eq!(counts.param_upper_bounds.len(), 3);

        // Static parameter reaches both enabled frames, keyframed
        // parameters only their own.
        assert!(counts.param_to_frame.at(0, 0));
        assert!(counts.param_to_frame.at(0, 1));
        assert!(!counts.param_to_frame.at(0, 2));
        assert!(counts.param_to_frame.at(1, 0));
        assert!(!counts.param_to_frame.at(1, 1));
        assert!(counts.param_to_frame.at(2, 1));
    }

    #[test]
    fn error_param_mapping_respects_keyframes() {
        let attrs = AttrList::from_attrs(vec![Attr::new(
            "cam.rx",
            "c0",
            ObjectType::Camera,
            AttrRole::RotateX,
            0,
            true,
        )]);
        let frames = FrameList::from_frames(&[1, 2]);
        let param_to_attr = vec![(0, Some(0)), (0, Some(1))];
        let error_to_marker = vec![(0, 0), (0, 1)];
        let cube = MatrixBool3D::new(1, 1, 2, true);

        let matrix = map_errors_to_parameters(&attrs, &param_to_attr, &error_to_marker, &cube);
        assert!(matrix.at(0, 0));
        assert!(!matrix.at(0, 1));
        assert!(!matrix.at(1, 0));
        assert!(matrix.at(1, 1));
    }
}
