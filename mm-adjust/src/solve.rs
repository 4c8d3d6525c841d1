//! The solve driver: validate inputs, prepare the problem, drive the LM
//! kernel and write accepted values back.

use tracing::{debug, error, info, warn};

use crate::affects::{
    find_marker_to_attr_to_frame_relationships, generate_valid_lists, write_stored_relationships,
};
use crate::attr::AttrList;
use crate::bundle::Bundle;
use crate::camera::Camera;
use crate::data::{
    FrameSolveMode, Interruptor, LogLevel, PrintStatOptions, SceneGraphMode, SolverData,
    SolverOptions,
};
use crate::frame::FrameList;
use crate::kernel::{solve_with_kernel, SolverType};
use crate::lens_state::{LensSetup, LensState};
use crate::marker::MarkerList;
use crate::matrix_bool::{MatrixBool2D, MatrixBool3D};
use crate::measure::{compute_error_stats, measure_errors};
use crate::params::{get_initial_parameters, set_attribute_values};
use crate::relationships::{
    calculate_valid_frames, count_up_number_of_errors, count_up_number_of_unknown_parameters,
    map_errors_to_parameters, ErrorCounts, ParamCounts, ERRORS_PER_MARKER,
};
use crate::results::{CommandResult, SolverResult};
use crate::scene_build::construct_scene_graph;
use crate::solve_func::SolveProblem;
use crate::timer::SolverTimer;
use crate::Result;

/// Everything `validate_solve` derives before the kernel can run.
struct PreparedProblem {
    error_counts: ErrorCounts,
    param_counts: ParamCounts,
    error_to_param: MatrixBool2D,
    valid_frame_list: FrameList,
}

/// Compute the sparsity cube and the valid marker/attribute/frame lists.
///
/// Without any `remove_unused_*` option every relationship is assumed,
/// which is the safe default. The computed relationships are persisted
/// back onto the markers so later solves can reuse them through
/// [`crate::affects::GraphMode::NodeName`].
fn generate_marker_and_bundle_relationships(
    markers: &mut MarkerList,
    attrs: &AttrList,
    frames: &FrameList,
    lens_setup: &LensSetup,
    options: &SolverOptions,
) -> (MatrixBool3D, MarkerList, AttrList, FrameList) {
    let remove_any = options.remove_unused_markers
        || options.remove_unused_attributes
        || options.remove_unused_frames;

    if !remove_any {
        let cube = MatrixBool3D::new(markers.len(), attrs.len(), frames.len(), true);
        return (cube, markers.clone(), attrs.clone(), frames.clone());
    }

    let cube = find_marker_to_attr_to_frame_relationships(
        markers,
        attrs,
        frames,
        &lens_setup.layers,
        &lens_setup.camera_to_lens,
        options.affects_graph_mode,
    );
    write_stored_relationships(markers, attrs, frames, &cube);

    let (valid_markers, valid_attrs, valid_frames) =
        generate_valid_lists(markers, attrs, frames, &cube);

    if valid_markers.count_disabled() > 0 && options.remove_unused_markers {
        warn!(
            "{} markers are not used by the solve",
            valid_markers.count_disabled()
        );
    }
    if valid_attrs.count_disabled() > 0 && options.remove_unused_attributes {
        warn!(
            "{} attributes are not used by the solve",
            valid_attrs.count_disabled()
        );
    }

    let valid_markers = if options.remove_unused_markers {
        valid_markers
    } else {
        markers.clone()
    };
    let valid_attrs = if options.remove_unused_attributes {
        valid_attrs
    } else {
        attrs.clone()
    };
    let valid_frames = if options.remove_unused_frames {
        valid_frames
    } else {
        frames.clone()
    };
    (cube, valid_markers, valid_attrs, valid_frames)
}

/// Count, map and validate; fills the statistics sections of the result.
#[allow(clippy::too_many_arguments)]
fn validate_solve(
    cameras: &[Camera],
    markers: &MarkerList,
    attrs: &AttrList,
    frames: &FrameList,
    cube: &MatrixBool3D,
    cmd_result: &mut CommandResult,
    log_level: LogLevel,
) -> Option<PreparedProblem> {
    let print_stats = cmd_result.print_stats;

    let error_counts = count_up_number_of_errors(markers, cameras, frames);
    if error_counts.number_of_errors == 0 {
        debug!("validate: no errors can be measured");
        cmd_result.solver_result.success = print_stats.do_not_solve;
        return None;
    }
    debug_assert_eq!(
        error_counts.number_of_errors,
        error_counts.number_of_marker_errors
            + error_counts.number_of_attr_stiffness_errors
            + error_counts.number_of_attr_smoothness_errors
    );

    let param_counts = count_up_number_of_unknown_parameters(attrs, frames);
    if param_counts.number_of_parameters == 0 {
        debug!("validate: no unknown parameters");
        cmd_result.solver_result.success = print_stats.do_not_solve;
        return None;
    }
    debug_assert_eq!(
        param_counts.param_lower_bounds.len(),
        param_counts.number_of_parameters
    );
    debug_assert_eq!(
        param_counts.param_upper_bounds.len(),
        param_counts.number_of_parameters
    );

    let error_to_param = map_errors_to_parameters(
        attrs,
        &param_counts.param_to_attr,
        &error_counts.error_to_marker,
        cube,
    );

    cmd_result.solver_object_count_result.fill(
        param_counts.number_of_parameters,
        error_counts.number_of_errors,
        error_counts.number_of_marker_errors,
        error_counts.number_of_attr_stiffness_errors,
        error_counts.number_of_attr_smoothness_errors,
    );
    if print_stats.used_solve_objects {
        cmd_result
            .solver_object_usage_result
            .fill(markers, attrs);
    }
    if print_stats.affects {
        cmd_result.affects_result.fill(markers, attrs, cube);
    }

    let valid_frame_list =
        calculate_valid_frames(frames, &error_counts.error_to_marker, &error_to_param);
    cmd_result
        .solver_frames_result
        .fill(frames.len(), &valid_frame_list);

    if log_level >= LogLevel::Info {
        info!(
            "markers used={} unused={}",
            markers.count_enabled(),
            markers.count_disabled()
        );
        info!(
            "attributes used={} unused={}",
            attrs.count_enabled(),
            attrs.count_disabled()
        );
        info!("parameters: {}", param_counts.number_of_parameters);
        info!("marker errors: {}", error_counts.number_of_marker_errors);
        info!(
            "frames valid={} invalid={}",
            valid_frame_list.count_enabled(),
            valid_frame_list.count_disabled()
        );
    }

    if valid_frame_list.count_enabled() == 0 {
        if print_stats.do_not_solve {
            cmd_result.solver_result.success = true;
            return None;
        }
        error!("solver failure; no frames are valid to solve");
        cmd_result.solver_result.success = false;
        return None;
    }

    if markers.count_enabled() == 0 || attrs.count_enabled() == 0 {
        if print_stats.do_not_solve {
            cmd_result.solver_result.success = true;
            return None;
        }
        error!(
            "solver failure; not enough markers or attributes are used; \
             used_markers={} used_attributes={}",
            markers.count_enabled(),
            attrs.count_enabled()
        );
        cmd_result.solver_result.success = false;
        return None;
    }

    if param_counts.number_of_parameters > error_counts.number_of_errors {
        if print_stats.do_not_solve {
            cmd_result.solver_result.success = true;
            return None;
        }
        error!(
            "solver failure; cannot solve for more attributes (\"parameters\") \
             than number of markers (\"errors\"); parameters={} errors={}",
            param_counts.number_of_parameters, error_counts.number_of_errors
        );
        cmd_result.solver_result.success = false;
        return None;
    }

    Some(PreparedProblem {
        error_counts,
        param_counts,
        error_to_param,
        valid_frame_list,
    })
}

/// Run one kernel invocation over a validated problem and write the
/// accepted values back to the solve objects.
#[allow(clippy::too_many_arguments)]
fn solve_frames(
    cameras: &mut [Camera],
    markers: &MarkerList,
    bundles: &mut [Bundle],
    attrs: &AttrList,
    frames: &FrameList,
    cube: &MatrixBool3D,
    lens_setup: &LensSetup,
    options: &SolverOptions,
    prepared: PreparedProblem,
    log_level: LogLevel,
    interrupt: &dyn Interruptor,
    cmd_result: &mut CommandResult,
) -> Result<()> {
    let PreparedProblem {
        error_counts,
        param_counts,
        error_to_param,
        valid_frame_list,
    } = prepared;

    let number_of_parameters = param_counts.number_of_parameters;
    let number_of_errors = error_counts.number_of_errors;
    let number_of_marker_errors = error_counts.number_of_marker_errors;
    debug!(
        "solve frames: parameters={number_of_parameters} errors={number_of_errors}"
    );

    let mut timer = SolverTimer::default();
    timer.solve.start();

    let scene = match options.scene_graph_mode {
        SceneGraphMode::FlatScene => Some(construct_scene_graph(
            cameras,
            markers,
            bundles,
            attrs,
            &valid_frame_list,
        )?),
        SceneGraphMode::HostObjects => None,
    };

    let lens_state = LensState::build(lens_setup, markers, attrs, valid_frame_list.len())?;

    let mut data = SolverData {
        cameras,
        markers,
        bundles,
        attrs,
        frames: &valid_frame_list,
        lens_state,
        scene,
        param_to_attr: param_counts.param_to_attr,
        error_to_marker: error_counts.error_to_marker,
        marker_pos: error_counts.marker_pos,
        marker_weight: error_counts.marker_weight,
        param_to_frame: param_counts.param_to_frame,
        error_to_param,
        marker_to_attr_to_frame: cube,
        params: vec![0.0; number_of_parameters],
        previous_params: vec![0.0; number_of_parameters],
        errors: vec![0.0; number_of_errors],
        error_list: vec![0.0; number_of_errors],
        error_distances: vec![0.0; number_of_marker_errors / ERRORS_PER_MARKER],
        func_eval_count: 0,
        iter_count: 0,
        jac_iter_count: 0,
        number_of_marker_errors,
        number_of_attr_stiffness_errors: error_counts.number_of_attr_stiffness_errors,
        number_of_attr_smoothness_errors: error_counts.number_of_attr_smoothness_errors,
        options,
        timer,
        interrupt,
        user_interrupted: false,
        log_level,
    };

    // Measure the problem as given, before any parameter changes.
    let mut initial_error_avg = 0.0;
    let mut initial_error_min = 0.0;
    let mut initial_error_max = 0.0;
    if options.accept_only_better || cmd_result.print_stats.deviation {
        let frame_enable = data.frames.enabled_mask();
        let eval_measurements = vec![true; number_of_marker_errors / ERRORS_PER_MARKER];
        let mut errors = std::mem::take(&mut data.errors);
        measure_errors(&mut data, &frame_enable, &eval_measurements, &mut errors);
        data.errors = errors;

        let Some(stats) = compute_error_stats(number_of_marker_errors, &data.error_distances)
        else {
            error!("failed to compute initial error stats");
            cmd_result.solver_result.success = false;
            return Ok(());
        };
        initial_error_avg = stats.error_avg;
        initial_error_min = stats.error_min;
        initial_error_max = stats.error_max;
    }

    cmd_result.solver_result = SolverResult {
        error_avg: initial_error_avg,
        error_min: initial_error_min,
        error_max: initial_error_max,
        count: 1,
        ..SolverResult::default()
    };

    if cmd_result.print_stats.do_not_solve {
        cmd_result.error_metrics_result.fill(
            number_of_marker_errors,
            data.markers,
            data.frames,
            &data.error_to_marker,
            &data.error_distances,
        );
        data.timer.solve.stop();
        cmd_result.timer_result.fill(&data.timer);
        cmd_result
            .solve_values_result
            .fill(&data.params, &data.error_list);
        cmd_result.solver_result.success = true;
        return Ok(());
    }

    debug!("get initial parameters");
    if !get_initial_parameters(&mut data) {
        error!("failed to get initial parameters");
        cmd_result.solver_result.success = false;
        return Ok(());
    }
    data.previous_params = data.params.clone();

    debug!("solve; solver type: {:?}", options.solver_type);
    if options.solver_type == SolverType::Levmar {
        error!(
            "solver type is not supported by this build; solver_type={}",
            options.solver_type.name()
        );
        cmd_result.solver_result.success = false;
        return Ok(());
    }

    let sparse_jacobian = options.solver_type.uses_sparse_jacobian();
    let problem = SolveProblem::new(data, sparse_jacobian);
    let (mut data, mut solver_result) = solve_with_kernel(options, problem);

    data.timer.solve.stop();
    timer = data.timer;

    cmd_result.error_metrics_result.fill(
        number_of_marker_errors,
        data.markers,
        data.frames,
        &data.error_to_marker,
        &data.error_distances,
    );
    cmd_result.timer_result.fill(&timer);

    // Re-calculate the error statistics after the kernel has finished.
    let Some(stats) = compute_error_stats(number_of_marker_errors, &data.error_distances) else {
        error!("failed to compute error stats");
        cmd_result.solver_result.success = false;
        return Ok(());
    };
    solver_result.error_avg = stats.error_avg;
    solver_result.error_min = stats.error_min;
    solver_result.error_max = stats.error_max;

    if data.user_interrupted {
        // Roll back, nothing of the aborted iteration survives.
        warn!("solve cancelled; restoring initial parameter values");
        let previous = data.previous_params.clone();
        if !set_attribute_values(&mut data, &previous) {
            error!("failed to restore initial parameters");
        }
        solver_result.success = false;
        solver_result.user_interrupted = true;
        solver_result.error_avg = initial_error_avg;
        solver_result.error_min = initial_error_min;
        solver_result.error_max = initial_error_max;
    } else {
        let error_is_better =
            !options.accept_only_better || solver_result.error_avg <= initial_error_avg;
        if error_is_better {
            debug!("setting solved parameters");
            let solved = data.params.clone();
            if !set_attribute_values(&mut data, &solved) {
                error!("failed to set solved parameters");
                solver_result.success = false;
            }
        } else {
            // The solve made things worse; restore the initial values
            // and report the initial statistics.
            debug!("setting initial parameters");
            let previous = data.previous_params.clone();
            if !set_attribute_values(&mut data, &previous) {
                error!("failed to set initial parameters");
                solver_result.success = false;
            }
            solver_result.error_avg = initial_error_avg;
            solver_result.error_min = initial_error_min;
            solver_result.error_max = initial_error_max;
        }
    }

    cmd_result
        .solve_values_result
        .fill(&data.params, &data.error_list);
    cmd_result.solver_result = solver_result;

    if log_level >= LogLevel::Verbose {
        let result = &cmd_result.solver_result;
        if result.success {
            debug!("solver returned SUCCESS in {} iterations", result.iterations);
        } else {
            debug!("solver returned FAILURE in {} iterations", result.iterations);
        }
        debug!("reason: {}", result.reason);
        debug!("reason number: {}", result.reason_number);
        debug!("maximum error: {}", result.error_max);
        debug!("average error: {}", result.error_avg);
        debug!("minimum error: {}", result.error_min);
        debug!("iterations: {}", result.iterations);
        debug!("function evaluations: {}", result.function_evals);
        debug!("jacobian evaluations: {}", result.jacobian_evals);
    }
    Ok(())
}

/// Solve everything.
///
/// Takes the given cameras, markers, bundles, attributes and frames,
/// modifies the solve objects in place, and returns the full record of
/// the solve. All recoverable failures are reported through the result;
/// only missing collaborators surface as errors.
#[allow(clippy::too_many_arguments)]
pub fn solve(
    options: &SolverOptions,
    cameras: &mut [Camera],
    markers: &mut MarkerList,
    bundles: &mut [Bundle],
    attrs: &AttrList,
    frames: &FrameList,
    lens_setup: &LensSetup,
    print_stats: PrintStatOptions,
    log_level: LogLevel,
    interrupt: &dyn Interruptor,
) -> Result<CommandResult> {
    let mut cmd_result = CommandResult {
        print_stats,
        ..CommandResult::default()
    };

    let (cube, valid_marker_list, valid_attr_list, valid_frame_list) =
        generate_marker_and_bundle_relationships(markers, attrs, frames, lens_setup, options);

    if valid_marker_list.count_enabled() == 0
        || valid_attr_list.count_enabled() == 0
        || valid_frame_list.count_enabled() == 0
    {
        if !print_stats.do_not_solve {
            if valid_marker_list.count_enabled() == 0 {
                warn!("no valid markers to solve with");
            }
            if valid_attr_list.count_enabled() == 0 {
                warn!("no valid attributes to solve with");
            }
            if valid_frame_list.count_enabled() == 0 {
                warn!("no valid frames to solve with");
            }
        }
        cmd_result.solver_result.success = false;
        cmd_result.solver_result.count = 1;
        return Ok(cmd_result);
    }

    match options.frame_solve_mode {
        FrameSolveMode::AllFramesAtOnce => {
            debug!("frame solve mode: all frames at once");
            let prepared = validate_solve(
                cameras,
                &valid_marker_list,
                &valid_attr_list,
                &valid_frame_list,
                &cube,
                &mut cmd_result,
                log_level,
            );
            if let Some(prepared) = prepared {
                solve_frames(
                    cameras,
                    &valid_marker_list,
                    bundles,
                    &valid_attr_list,
                    &valid_frame_list,
                    &cube,
                    lens_setup,
                    options,
                    prepared,
                    log_level,
                    interrupt,
                    &mut cmd_result,
                )?;
            } else {
                debug!("cannot continue solving");
            }
        }
        FrameSolveMode::PerFrame => {
            debug!("frame solve mode: per frame");
            let per_frame_log_level = log_level.reduced_for_per_frame();
            let mut combined = CommandResult {
                print_stats,
                ..CommandResult::default()
            };

            for (frame_index, frame_number) in valid_frame_list.iter_enabled() {
                debug!("solving frame {frame_number}");

                let mut per_frame_list = valid_frame_list.clone();
                per_frame_list.set_all_enabled(false);
                per_frame_list.set_enabled(frame_index, true);

                let mut per_frame_result = CommandResult {
                    print_stats,
                    ..CommandResult::default()
                };
                let prepared = validate_solve(
                    cameras,
                    &valid_marker_list,
                    &valid_attr_list,
                    &per_frame_list,
                    &cube,
                    &mut per_frame_result,
                    per_frame_log_level,
                );
                if let Some(prepared) = prepared {
                    solve_frames(
                        cameras,
                        &valid_marker_list,
                        bundles,
                        &valid_attr_list,
                        &per_frame_list,
                        &cube,
                        lens_setup,
                        options,
                        prepared,
                        per_frame_log_level,
                        interrupt,
                        &mut per_frame_result,
                    )?;
                } else {
                    debug!("cannot continue solving frame {frame_number}");
                }

                let failed = !per_frame_result.solver_result.success;
                combined.add(&per_frame_result);

                if failed && per_frame_result.solver_result.user_interrupted {
                    error!("failed to solve frame {frame_number}, stopping solve");
                    break;
                }
            }

            combined.divide();
            combined.print_stats = print_stats;
            cmd_result = combined;
        }
    }

    debug!(
        "solve finished: success={}",
        cmd_result.solver_result.success
    );
    Ok(cmd_result)
}
