//! Residual measurement: the deviation between observed markers and
//! re-projected bundles.

use tracing::{error, warn};

use mm_scene::{apply_film_fit_correction_backward, project_point};

use crate::data::{SceneGraphMode, SolverData};
use crate::loss::apply_loss_function_to_errors;
use crate::relationships::ERRORS_PER_MARKER;

/// Min/avg/max pixel deviations of one measurement pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorStats {
    pub error_avg: f64,
    pub error_min: f64,
    pub error_max: f64,
    pub measured_count: usize,
}

fn distance_2d(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = ax - bx;
    let dy = ay - by;
    (dx * dx + dy * dy).sqrt()
}

/// Measure residuals into `errors`.
///
/// Both evaluation backends share this contract. A marker-residual pair
/// is skipped (its `errors` entries keep their last computed values) when
/// its frame is disabled in `frame_enable`, when `eval_measurements` says
/// so, or when no enabled attribute relates to the (marker, frame) pair.
/// This skip behaviour is what makes the finite-difference Jacobian
/// columns sparse.
pub fn measure_errors(
    data: &mut SolverData<'_>,
    frame_enable: &[bool],
    eval_measurements: &[bool],
    errors: &mut [f64],
) -> ErrorStats {
    let image_width = data.options.image_width;
    let scene_graph_mode = data.options.scene_graph_mode;
    let number_of_pairs = data.number_of_marker_errors / ERRORS_PER_MARKER;
    debug_assert!(errors.len() >= data.number_of_marker_errors);
    debug_assert_eq!(eval_measurements.len(), number_of_pairs);

    let mut stats = ErrorStats {
        error_avg: 0.0,
        error_min: f64::MAX,
        error_max: -0.0,
        measured_count: 0,
    };

    // Evaluate the whole flat scene once per measurement pass.
    let mut scene_eval_failed = false;
    if scene_graph_mode == SceneGraphMode::FlatScene {
        if let Some(scene) = &mut data.scene {
            if let Err(scene_error) = scene
                .flat_scene
                .evaluate(&scene.attr_block, &scene.frame_values)
            {
                error!("flat scene evaluation failed: {scene_error}");
                scene_eval_failed = true;
            }
        } else {
            error!("flat scene backend selected but no scene was built");
            scene_eval_failed = true;
        }
    }

    let num_frames = data.frames.len();
    for pair_index in 0..number_of_pairs {
        let (marker_index, frame_index) = data.error_to_marker[pair_index];

        if !frame_enable[frame_index] {
            // The 'errors' data is expected to be unchanged from the
            // last evaluation.
            continue;
        }
        if !eval_measurements[pair_index] {
            // The mask knows something about the greater structure of
            // the problem that this function does not.
            continue;
        }
        if data
            .marker_to_attr_to_frame
            .count_enabled_attrs(marker_index, frame_index)
            == 0
        {
            continue;
        }

        let error_index_x = pair_index * ERRORS_PER_MARKER;
        let error_index_y = error_index_x + 1;

        if scene_eval_failed {
            errors[error_index_x] = f64::NAN;
            errors[error_index_y] = f64::NAN;
            data.error_distances[pair_index] = f64::NAN;
            continue;
        }

        let marker = data.markers.get_marker(marker_index);
        let frame_number = data.frames.get_frame(frame_index);

        let (marker_x, marker_y, mut point_x, mut point_y) = match scene_graph_mode {
            SceneGraphMode::HostObjects => {
                let camera = &mut data.cameras[marker.camera_index];
                let world_projection = match camera.world_projection_matrix(frame_number) {
                    Ok(matrix) => matrix,
                    Err(projection_error) => {
                        error!("camera projection failed: {projection_error}");
                        errors[error_index_x] = f64::NAN;
                        errors[error_index_y] = f64::NAN;
                        data.error_distances[pair_index] = f64::NAN;
                        continue;
                    }
                };
                let film_aspect = camera.film_back_aspect(frame_number);
                let render_aspect = camera.render_aspect();
                let film_fit = camera.film_fit;

                let bundle_position = data.bundles[marker.bundle_index].world_position(frame_number);
                let (point_x, point_y) = project_point(&world_projection, &bundle_position);

                // The projection matrix bakes the forward film-fit scale;
                // bring the cached observed position into the same space.
                let (mut marker_x, mut marker_y) = data.marker_pos[pair_index];
                apply_film_fit_correction_backward(
                    film_fit,
                    film_aspect,
                    render_aspect,
                    &mut marker_x,
                    &mut marker_y,
                );
                (marker_x, marker_y, point_x, point_y)
            }
            SceneGraphMode::FlatScene => {
                let scene = data.scene.as_ref().expect("scene checked above");
                let value_index = (marker_index * num_frames + frame_index) * 2;
                let out_markers = scene.flat_scene.markers();
                let out_points = scene.flat_scene.points();
                (
                    out_markers[value_index],
                    out_markers[value_index + 1],
                    out_points[value_index],
                    out_points[value_index + 1],
                )
            }
        };

        // Applying lens distortion to large input values can create
        // non-finite points; those keep the pre-distortion value.
        if let Some((distorted_x, distorted_y)) =
            data.lens_state
                .apply_distort(marker_index, frame_index, point_x, point_y)
        {
            if distorted_x.is_finite() {
                point_x = distorted_x;
            }
            if distorted_y.is_finite() {
                point_y = distorted_y;
            }
        }

        let marker_weight = data.marker_weight[pair_index];
        debug_assert!(marker_weight > 0.0);
        let weight = marker_weight.sqrt();

        let dx = (marker_x - point_x) * image_width;
        let dy = (marker_y - point_y) * image_width;

        errors[error_index_x] = dx * weight;
        errors[error_index_y] = dy * weight;

        // The user-facing deviation carries no weighting or loss scaling.
        data.error_list[error_index_x] = dx;
        data.error_list[error_index_y] = dy;

        let distance = distance_2d(marker_x, marker_y, point_x, point_y) * image_width;
        data.error_distances[pair_index] = distance;
        if distance.is_finite() {
            stats.error_avg += distance;
            if distance > stats.error_max {
                stats.error_max = distance;
            }
            if distance < stats.error_min {
                stats.error_min = distance;
            }
            stats.measured_count += 1;
        } else {
            warn!(
                "marker '{}' produced a non-finite deviation on frame {}",
                marker.name, frame_number
            );
        }
    }

    if stats.measured_count == 0 {
        stats.error_avg = 0.0;
        stats.error_min = 0.0;
        stats.error_max = 0.0;
        error!("no marker measurements were taken");
    } else {
        stats.error_avg /= stats.measured_count as f64;
    }

    // Reduce the effect outliers have on the solve.
    if data.options.solver_supports_robust_loss {
        apply_loss_function_to_errors(
            errors,
            data.options.robust_loss_type,
            data.options.robust_loss_scale,
        );
    }

    stats
}

/// Min/avg/max over the per-marker pixel distances the last measurement
/// computed, skipping non-finite entries.
pub fn compute_error_stats(
    number_of_marker_errors: usize,
    error_distances: &[f64],
) -> Option<ErrorStats> {
    let pair_count = number_of_marker_errors / ERRORS_PER_MARKER;
    if pair_count == 0 {
        return None;
    }
    let mut stats = ErrorStats {
        error_avg: 0.0,
        error_min: f64::MAX,
        error_max: -0.0,
        measured_count: 0,
    };
    for distance in error_distances.iter().take(pair_count) {
        if !distance.is_finite() {
            error!("error distance value is invalid, skipping: {distance}");
            continue;
        }
        stats.error_avg += distance;
        if *distance < stats.error_min {
            stats.error_min = *distance;
        }
        if *distance > stats.error_max {
            stats.error_max = *distance;
        }
        stats.measured_count += 1;
    }
    stats.error_avg /= pair_count as f64;
    Some(stats)
}
