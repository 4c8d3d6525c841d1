//! The affects-aware Jacobian only touches residuals a parameter can
//! reach; everything else stays bit-for-bit identical.

use approx::assert_relative_eq;
use levenberg_marquardt::{differentiate_numerically, LeastSquaresProblem};

use mm_adjust::affects::{find_marker_to_attr_to_frame_relationships, GraphMode};
use mm_adjust::attr::{Attr, AttrList, AttrRole, AttrValue, ObjectType};
use mm_adjust::bundle::Bundle;
use mm_adjust::camera::Camera;
use mm_adjust::data::{LogLevel, NeverInterrupt, SceneGraphMode, SolverData, SolverOptions};
use mm_adjust::frame::FrameList;
use mm_adjust::kernel::SolverType;
use mm_adjust::lens_state::{LensSetup, LensState};
use mm_adjust::marker::{Marker, MarkerList};
use mm_adjust::params::get_initial_parameters;
use mm_adjust::relationships::{
    count_up_number_of_errors, count_up_number_of_unknown_parameters, map_errors_to_parameters,
    ERRORS_PER_MARKER,
};
use mm_adjust::solve_func::SolveProblem;
use mm_adjust::timer::SolverTimer;
use mm_lens::LensLayers;

fn square_camera() -> Camera {
    let mut camera = Camera::new("cam", 1920, 1920);
    camera.film_back_width = AttrValue::Static(36.0);
    camera.film_back_height = AttrValue::Static(36.0);
    camera
}

/// Two independent camera/marker/bundle pairs: attribute 0 is wired only
/// to marker 0 and attribute 1 only to marker 1.
#[test]
fn perturbing_one_attribute_leaves_other_residuals_untouched() {
    let mut cameras = vec![square_camera(), square_camera()];
    let mut bundles = vec![
        Bundle::new("bundle_00").with_position(0.5, 0.0, 10.0),
        Bundle::new("bundle_01").with_position(-0.5, 0.2, 12.0),
    ];
    let markers = MarkerList::from_markers(vec![Marker::new("marker_00", 0, 0), {
        let mut marker = Marker::new("marker_01", 1, 1);
        marker.pos_x = AttrValue::Static(0.1);
        marker
    }]);
    let attrs = AttrList::from_attrs(vec![
        Attr::new(
            "bundle_00.translateX",
            "b00tx",
            ObjectType::Bundle,
            AttrRole::TranslateX,
            0,
            false,
        ),
        Attr::new(
            "bundle_01.translateX",
            "b01tx",
            ObjectType::Bundle,
            AttrRole::TranslateX,
            1,
            false,
        ),
    ]);
    let frames = FrameList::from_frames(&[1]);
    let lens_setup = LensSetup::no_lens(cameras.len());

    let cube = find_marker_to_attr_to_frame_relationships(
        &markers,
        &attrs,
        &frames,
        &LensLayers::new(),
        &lens_setup.camera_to_lens,
        GraphMode::Object,
    );
    assert!(cube.at(0, 0, 0));
    assert!(!cube.at(0, 1, 0));
    assert!(!cube.at(1, 0, 0));
    assert!(cube.at(1, 1, 0));

    let error_counts = count_up_number_of_errors(&markers, &cameras, &frames);
    let param_counts = count_up_number_of_unknown_parameters(&attrs, &frames);
    let error_to_param = map_errors_to_parameters(
        &attrs,
        &param_counts.param_to_attr,
        &error_counts.error_to_marker,
        &cube,
    );

    let mut options = SolverOptions::default();
    options.set_solver_type(SolverType::CMinpackLmder);
    options.scene_graph_mode = SceneGraphMode::HostObjects;
    options.image_width = 1920.0;
    options.delta = 1e-4;

    let number_of_parameters = param_counts.number_of_parameters;
    let number_of_errors = error_counts.number_of_errors;
    let number_of_marker_errors = error_counts.number_of_marker_errors;
    assert_eq!(number_of_parameters, 2);
    assert_eq!(number_of_errors, 4);

    let lens_state = LensState::build(&lens_setup, &markers, &attrs, frames.len()).unwrap();
    let mut data = SolverData {
        cameras: &mut cameras,
        markers: &markers,
        bundles: &mut bundles,
        attrs: &attrs,
        frames: &frames,
        lens_state,
        scene: None,
        param_to_attr: param_counts.param_to_attr,
        error_to_marker: error_counts.error_to_marker,
        marker_pos: error_counts.marker_pos,
        marker_weight: error_counts.marker_weight,
        param_to_frame: param_counts.param_to_frame,
        error_to_param,
        marker_to_attr_to_frame: &cube,
        params: vec![0.0; number_of_parameters],
        previous_params: vec![0.0; number_of_parameters],
        errors: vec![0.0; number_of_errors],
        error_list: vec![0.0; number_of_errors],
        error_distances: vec![0.0; number_of_marker_errors / ERRORS_PER_MARKER],
        func_eval_count: 0,
        iter_count: 0,
        jac_iter_count: 0,
        number_of_marker_errors,
        number_of_attr_stiffness_errors: 0,
        number_of_attr_smoothness_errors: 0,
        options: &options,
        timer: SolverTimer::default(),
        interrupt: &NeverInterrupt,
        user_interrupted: false,
        log_level: LogLevel::Warning,
    };
    assert!(get_initial_parameters(&mut data));

    let mut problem = SolveProblem::new(data, true);
    let residuals = problem.residuals().unwrap();
    assert_eq!(residuals.len(), 4);

    let jacobian = problem.jacobian().unwrap();
    assert_eq!(jacobian.nrows(), 4);
    assert_eq!(jacobian.ncols(), 2);

    // The cross blocks are exactly zero; the perturbed evaluation held
    // those residuals at their base values.
    assert_eq!(jacobian[(2, 0)].to_bits(), 0.0f64.to_bits());
    assert_eq!(jacobian[(3, 0)].to_bits(), 0.0f64.to_bits());
    assert_eq!(jacobian[(0, 1)].to_bits(), 0.0f64.to_bits());
    assert_eq!(jacobian[(1, 1)].to_bits(), 0.0f64.to_bits());

    // The diagonal blocks carry real derivatives.
    assert!(jacobian[(0, 0)].abs() > 1e-3);
    assert!(jacobian[(2, 1)].abs() > 1e-3);

    // The sparse columns agree with dense numerical differentiation.
    let numerical = differentiate_numerically(&mut problem).unwrap();
    assert_relative_eq!(jacobian, numerical, epsilon = 1e-4);
}
