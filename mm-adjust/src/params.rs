//! Parameter packing: the box-constraint transform between external
//! (host-visible) and internal (solver-visible) values, initial packing
//! and write-back.

use tracing::{debug, error};

use crate::attr::{Attr, ObjectType};
use crate::data::{SceneGraphMode, SolverData};
use crate::frame::FrameNumber;

/// Bounds at or beyond this magnitude are treated as unbounded.
const FLOAT_MAX: f64 = f32::MAX as f64;

fn has_lower_bound(xmin: f64) -> bool {
    xmin > -FLOAT_MAX
}

fn has_upper_bound(xmax: f64) -> bool {
    xmax < FLOAT_MAX
}

/// Convert an unbounded internal value into a bounded external value in
/// `[xmin, xmax]`, undoing the affine conditioning.
///
/// The mapping follows the smooth monotonic "box constraints"
/// transformation; the conditioning `offset`/`scale` applies in every
/// branch.
pub fn parameter_bound_from_internal_to_external(
    value: f64,
    xmin: f64,
    xmax: f64,
    offset: f64,
    scale: f64,
) -> f64 {
    let bounded = match (has_lower_bound(xmin), has_upper_bound(xmax)) {
        (false, false) => value,
        (true, false) => {
            let tmin = (xmin + offset) * scale;
            tmin - 1.0 + (value * value + 1.0).sqrt()
        }
        (false, true) => {
            let tmax = (xmax + offset) * scale;
            tmax + 1.0 - (value * value + 1.0).sqrt()
        }
        (true, true) => {
            let tmin = (xmin + offset) * scale;
            let tmax = (xmax + offset) * scale;
            tmin + ((tmax - tmin) / 2.0) * (value.sin() + 1.0)
        }
    };
    let external = (bounded / scale) - offset;
    external.clamp(xmin, xmax)
}

/// Convert a bounded external value into an unbounded internal value;
/// the exact inverse of [`parameter_bound_from_internal_to_external`].
/// Applied once to seed internal values at solve start.
pub fn parameter_bound_from_external_to_internal(
    value: f64,
    xmin: f64,
    xmax: f64,
    offset: f64,
    scale: f64,
) -> f64 {
    let clamped = value.clamp(xmin, xmax);
    let conditioned = (clamped + offset) * scale;
    match (has_lower_bound(xmin), has_upper_bound(xmax)) {
        (false, false) => conditioned,
        (true, false) => {
            let tmin = (xmin + offset) * scale;
            (((conditioned - tmin) + 1.0).powi(2) - 1.0).max(0.0).sqrt()
        }
        (false, true) => {
            let tmax = (xmax + offset) * scale;
            (((tmax - conditioned) + 1.0).powi(2) - 1.0).max(0.0).sqrt()
        }
        (true, true) => {
            let tmin = (xmin + offset) * scale;
            let tmax = (xmax + offset) * scale;
            let ratio = (2.0 * (conditioned - tmin) / (tmax - tmin)) - 1.0;
            ratio.clamp(-1.0, 1.0).asin()
        }
    }
}

fn effective_bounds(attr: &Attr, solver_supports_parameter_bounds: bool) -> (f64, f64) {
    if solver_supports_parameter_bounds {
        (attr.minimum_value(), attr.maximum_value())
    } else {
        // The conditioning still applies, the box constraints do not.
        (f64::NEG_INFINITY, f64::INFINITY)
    }
}

/// Internal-to-external for one attribute, honouring the solver's bound
/// support.
pub fn internal_to_external(attr: &Attr, value: f64, supports_bounds: bool) -> f64 {
    let (xmin, xmax) = effective_bounds(attr, supports_bounds);
    parameter_bound_from_internal_to_external(
        value,
        xmin,
        xmax,
        attr.offset_value(),
        attr.scale_value(),
    )
}

/// External-to-internal for one attribute, honouring the solver's bound
/// support.
pub fn external_to_internal(attr: &Attr, value: f64, supports_bounds: bool) -> f64 {
    let (xmin, xmax) = effective_bounds(attr, supports_bounds);
    parameter_bound_from_external_to_internal(
        value,
        xmin,
        xmax,
        attr.offset_value(),
        attr.scale_value(),
    )
}

/// The finite-difference step for one parameter, with the sign flipped
/// when `value + delta` would escape the attribute's box constraints.
pub fn calculate_parameter_delta(value: f64, delta: f64, sign: f64, attr: &Attr) -> f64 {
    let xmin = attr.minimum_value();
    let xmax = attr.maximum_value();

    let mut new_sign = sign;
    if (value + delta) > xmax {
        new_sign = -1.0;
    }
    if (value - delta) < xmin {
        new_sign = 1.0;
    }
    delta * new_sign
}

fn host_attr_value(data: &SolverData<'_>, attr_index: usize, frame: FrameNumber) -> Option<f64> {
    let attr = data.attrs.get_attr(attr_index);
    match attr.object_type() {
        ObjectType::Camera => data
            .cameras
            .get(attr.object_index())
            .and_then(|camera| camera.attr_value(attr.role(), frame)),
        ObjectType::Bundle => data
            .bundles
            .get(attr.object_index())
            .and_then(|bundle| bundle.attr_value(attr.role(), frame)),
        ObjectType::Lens => {
            let frame_index = data.frames.index_of(frame)?;
            data.lens_state.attr_value(attr_index, attr.role(), frame_index)
        }
        ObjectType::Transform | ObjectType::Unknown => None,
    }
}

/// Read external attribute values into the internal parameter vector,
/// applying the external-to-internal transform.
pub fn get_initial_parameters(data: &mut SolverData<'_>) -> bool {
    let supports_bounds = data.options.solver_supports_parameter_bounds;
    let fallback_frame = if data.frames.is_empty() {
        0
    } else {
        data.frames.get_frame(0)
    };
    for param_index in 0..data.param_to_attr.len() {
        let (attr_index, frame_index) = data.param_to_attr[param_index];
        let frame = match frame_index {
            Some(index) => data.frames.get_frame(index),
            None => fallback_frame,
        };
        let attr = data.attrs.get_attr(attr_index);
        let Some(external) = host_attr_value(data, attr_index, frame) else {
            error!(
                "failed to read initial value of attribute '{}'",
                attr.name()
            );
            return false;
        };
        if !external.is_finite() {
            error!(
                "attribute '{}' has a non-finite initial value: {}",
                attr.name(),
                external
            );
            return false;
        }
        data.params[param_index] = external_to_internal(attr, external, supports_bounds);
    }
    true
}

/// Push a parameter vector into the active value store: host objects or
/// the flat-scene attribute block, with lens attributes routed to the
/// lens state in both modes. Camera matrix caches are invalidated.
pub fn set_parameters(data: &mut SolverData<'_>, parameters: &[f64]) -> bool {
    let supports_bounds = data.options.solver_supports_parameter_bounds;
    let scene_graph_mode = data.options.scene_graph_mode;
    let mut host_attrs_set = 0usize;

    for (param_index, parameter) in parameters.iter().enumerate() {
        let (attr_index, frame_index) = data.param_to_attr[param_index];
        let attr = data.attrs.get_attr(attr_index);
        let solver_value = *parameter;
        let real_value = internal_to_external(attr, solver_value, supports_bounds);

        if attr.object_type() == ObjectType::Lens {
            let role = attr.role();
            if !data
                .lens_state
                .set_attr_value(attr_index, role, frame_index, real_value)
            {
                error!(
                    "set parameters was given an invalid lens value to set: \
                     attr name={} solver value={} bound value={}",
                    attr.name(),
                    solver_value,
                    real_value
                );
                return false;
            }
            continue;
        }

        let ok = match scene_graph_mode {
            SceneGraphMode::HostObjects => {
                let frame = match frame_index {
                    Some(index) => data.frames.get_frame(index),
                    None => 0,
                };
                match attr.object_type() {
                    ObjectType::Camera => data
                        .cameras
                        .get_mut(attr.object_index())
                        .map(|camera| camera.set_attr_value(attr.role(), frame, real_value))
                        .unwrap_or(false),
                    ObjectType::Bundle => data
                        .bundles
                        .get_mut(attr.object_index())
                        .map(|bundle| bundle.set_attr_value(attr.role(), frame, real_value))
                        .unwrap_or(false),
                    _ => false,
                }
            }
            SceneGraphMode::FlatScene => match &mut data.scene {
                Some(scene) => scene.set_attr_value(attr_index, frame_index, real_value),
                None => false,
            },
        };
        if !ok {
            error!(
                "set parameters was given an invalid value to set: \
                 attr name={} solver value={} bound value={} offset={} scale={} min={} max={}",
                attr.name(),
                solver_value,
                real_value,
                attr.offset_value(),
                attr.scale_value(),
                attr.minimum_value(),
                attr.maximum_value()
            );
            return false;
        }
        host_attrs_set += 1;
    }

    if host_attrs_set > 0 {
        // Camera attributes may have changed; a stale projection matrix
        // would silently corrupt the solve.
        for camera in data.cameras.iter_mut() {
            camera.clear_attr_value_cache();
        }
    }
    true
}

/// Final write-back of solved values onto the host objects, in both
/// scene-graph modes.
pub fn set_attribute_values(data: &mut SolverData<'_>, parameters: &[f64]) -> bool {
    let supports_bounds = data.options.solver_supports_parameter_bounds;
    debug!("writing {} solved parameters back", parameters.len());

    for (param_index, parameter) in parameters.iter().enumerate() {
        let (attr_index, frame_index) = data.param_to_attr[param_index];
        let attr = data.attrs.get_attr(attr_index);
        let real_value = internal_to_external(attr, *parameter, supports_bounds);
        let frame = match frame_index {
            Some(index) => data.frames.get_frame(index),
            None => 0,
        };

        let ok = match attr.object_type() {
            ObjectType::Camera => data
                .cameras
                .get_mut(attr.object_index())
                .map(|camera| camera.set_attr_value(attr.role(), frame, real_value))
                .unwrap_or(false),
            ObjectType::Bundle => data
                .bundles
                .get_mut(attr.object_index())
                .map(|bundle| bundle.set_attr_value(attr.role(), frame, real_value))
                .unwrap_or(false),
            ObjectType::Lens => {
                data.lens_state
                    .set_attr_value(attr_index, attr.role(), frame_index, real_value)
            }
            _ => false,
        };
        if !ok {
            error!(
                "failed to write back value for attribute '{}'",
                attr.name()
            );
            return false;
        }
    }

    for camera in data.cameras.iter_mut() {
        camera.clear_attr_value_cache();
    }
    true
}
