//! End-to-end solves over synthetic camera-tracking scenes.

use std::cell::Cell;

use approx::assert_relative_eq;

use mm_adjust::attr::{Attr, AttrList, AttrRole, AttrValue, ObjectType};
use mm_adjust::bundle::Bundle;
use mm_adjust::camera::Camera;
use mm_adjust::data::{
    AutoDiffType, FrameSolveMode, Interruptor, LogLevel, NeverInterrupt, PrintStatOptions,
    SceneGraphMode, SolverOptions,
};
use mm_adjust::frame::FrameList;
use mm_adjust::kernel::SolverType;
use mm_adjust::lens_state::LensSetup;
use mm_adjust::marker::{Marker, MarkerList};
use mm_adjust::solve::solve;
use mm_scene::project_point;

/// A camera with a square film back and square render so film-fit
/// scaling drops out of the synthetic data generation.
fn square_camera() -> Camera {
    let mut camera = Camera::new("cam", 1920, 1920);
    camera.film_back_width = AttrValue::Static(36.0);
    camera.film_back_height = AttrValue::Static(36.0);
    camera.focal_length = AttrValue::Static(35.0);
    camera
}

/// Project a bundle through a camera at a frame into marker space.
fn observe(camera: &mut Camera, bundle: &Bundle, frame: i32) -> (f64, f64) {
    let world_projection = camera.world_projection_matrix(frame).unwrap();
    let position = bundle.world_position(frame);
    project_point(&world_projection, &position)
}

fn default_options() -> SolverOptions {
    let mut options = SolverOptions::default();
    options.set_solver_type(SolverType::CMinpackLmder);
    options.iter_max = 100;
    options.delta = 1e-4;
    options.image_width = 1920.0;
    options
}

struct InterruptAfter {
    countdown: Cell<usize>,
}

impl InterruptAfter {
    fn new(count: usize) -> Self {
        Self {
            countdown: Cell::new(count),
        }
    }
}

impl Interruptor for InterruptAfter {
    fn is_interrupt_requested(&self) -> bool {
        let remaining = self.countdown.get();
        if remaining == 0 {
            true
        } else {
            self.countdown.set(remaining - 1);
            false
        }
    }
}

/// One camera at the origin facing +Z, one bundle at (0, 0, 10) observed
/// at the film-back centre. The bundle's x translation starts offset and
/// must solve back to zero.
#[test]
fn one_bundle_one_attribute() {
    let mut cameras = vec![square_camera()];
    let mut bundles = vec![Bundle::new("bundle_01").with_position(1.0, 0.0, 10.0)];

    let mut marker = Marker::new("marker_01", 0, 0);
    marker.pos_x = AttrValue::Static(0.0);
    marker.pos_y = AttrValue::Static(0.0);
    let mut markers = MarkerList::from_markers(vec![marker]);

    let attrs = AttrList::from_attrs(vec![Attr::new(
        "bundle_01.translateX",
        "bnd01tx",
        ObjectType::Bundle,
        AttrRole::TranslateX,
        0,
        false,
    )
    .with_bounds(-5.0, 5.0)]);
    let frames = FrameList::from_frames(&[1]);
    let lens_setup = LensSetup::no_lens(cameras.len());
    let options = default_options();

    let result = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();

    assert!(result.solver_result.success);
    let solved_tx = bundles[0].transform.tx.get(1);
    assert_relative_eq!(solved_tx, 0.0, epsilon = 1e-6);
    assert!(result.solver_result.error_max < 0.5);
}

/// Build the rigid-body scene: a static cube of bundles observed by a
/// rotating camera over ten frames. Returns the solve objects with the
/// camera rotations reset to zero, plus the ground-truth rotations.
#[allow(clippy::type_complexity)]
fn rigid_body_scene() -> (
    Vec<Camera>,
    MarkerList,
    Vec<Bundle>,
    AttrList,
    FrameList,
    Vec<(f64, f64, f64)>,
) {
    let frames: Vec<i32> = (1..=10).collect();
    let truth: Vec<(f64, f64, f64)> = frames
        .iter()
        .map(|frame| {
            let f = f64::from(*frame);
            (0.08 * f, -0.05 * f, 0.02 * f)
        })
        .collect();

    let bundles: Vec<Bundle> = [
        (-2.0, -2.0, 9.0),
        (2.0, -2.0, 9.0),
        (-2.0, 2.0, 9.0),
        (2.0, 2.0, 11.0),
        (-2.0, 2.0, 11.0),
        (2.0, -2.0, 11.0),
    ]
    .iter()
    .enumerate()
    .map(|(i, (x, y, z))| Bundle::new(&format!("bundle_{i:02}")).with_position(*x, *y, *z))
    .collect();

    // Animate the ground-truth camera and record what it observes.
    let mut camera = square_camera();
    camera.transform.rx = AttrValue::Animated {
        start_frame: 1,
        values: truth.iter().map(|r| r.0).collect(),
    };
    camera.transform.ry = AttrValue::Animated {
        start_frame: 1,
        values: truth.iter().map(|r| r.1).collect(),
    };
    camera.transform.rz = AttrValue::Animated {
        start_frame: 1,
        values: truth.iter().map(|r| r.2).collect(),
    };

    let mut markers = Vec::with_capacity(bundles.len());
    for (bundle_index, bundle) in bundles.iter().enumerate() {
        let mut xs = Vec::with_capacity(frames.len());
        let mut ys = Vec::with_capacity(frames.len());
        for frame in &frames {
            camera.clear_attr_value_cache();
            let (x, y) = observe(&mut camera, bundle, *frame);
            xs.push(x);
            ys.push(y);
        }
        let mut marker = Marker::new(&format!("marker_{bundle_index:02}"), 0, bundle_index);
        marker.pos_x = AttrValue::Animated {
            start_frame: 1,
            values: xs,
        };
        marker.pos_y = AttrValue::Animated {
            start_frame: 1,
            values: ys,
        };
        markers.push(marker);
    }

    // Reset the camera animation; the solver must recover it.
    let zero = AttrValue::Animated {
        start_frame: 1,
        values: vec![0.0; frames.len()],
    };
    camera.transform.rx = zero.clone();
    camera.transform.ry = zero.clone();
    camera.transform.rz = zero;
    camera.clear_attr_value_cache();

    let attrs = AttrList::from_attrs(vec![
        Attr::new(
            "cam.rotateX",
            "camrx",
            ObjectType::Camera,
            AttrRole::RotateX,
            0,
            true,
        ),
        Attr::new(
            "cam.rotateY",
            "camry",
            ObjectType::Camera,
            AttrRole::RotateY,
            0,
            true,
        ),
        Attr::new(
            "cam.rotateZ",
            "camrz",
            ObjectType::Camera,
            AttrRole::RotateZ,
            0,
            true,
        ),
    ]);

    (
        vec![camera],
        MarkerList::from_markers(markers),
        bundles,
        attrs,
        FrameList::from_frames(&frames),
        truth,
    )
}

/// Keyframed camera rotations across ten frames, recovered from
/// synthetic markers with central differencing.
#[test]
fn rigid_body_across_frames() {
    let (mut cameras, mut markers, mut bundles, attrs, frames, truth) = rigid_body_scene();
    let lens_setup = LensSetup::no_lens(cameras.len());

    let mut options = default_options();
    options.auto_diff_type = AutoDiffType::Central;
    options.iter_max = 50;

    let result = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();

    assert!(result.solver_result.success);
    assert!(
        result.solver_result.error_avg < 0.1,
        "average error too large: {}",
        result.solver_result.error_avg
    );

    for (frame_offset, (rx, ry, rz)) in truth.iter().enumerate() {
        let frame = 1 + frame_offset as i32;
        assert_relative_eq!(cameras[0].transform.rx.get(frame), *rx, epsilon = 1e-2);
        assert_relative_eq!(cameras[0].transform.ry.get(frame), *ry, epsilon = 1e-2);
        assert_relative_eq!(cameras[0].transform.rz.get(frame), *rz, epsilon = 1e-2);
    }
}

/// A bounded attribute must converge to the in-range target and the
/// external value can never leave the box.
#[test]
fn bounded_parameter_stays_in_range() {
    let mut cameras = vec![square_camera()];
    let target = 0.9;
    let mut truth_bundle = Bundle::new("bnd").with_position(target, 0.0, 10.0);
    let observed = observe(&mut cameras[0], &mut truth_bundle, 1);
    cameras[0].clear_attr_value_cache();

    let mut bundles = vec![Bundle::new("bnd").with_position(0.5, 0.0, 10.0)];
    let mut marker = Marker::new("mkr", 0, 0);
    marker.pos_x = AttrValue::Static(observed.0);
    marker.pos_y = AttrValue::Static(observed.1);
    let mut markers = MarkerList::from_markers(vec![marker]);

    let attrs = AttrList::from_attrs(vec![Attr::new(
        "bnd.translateX",
        "bndtx",
        ObjectType::Bundle,
        AttrRole::TranslateX,
        0,
        false,
    )
    .with_bounds(0.0, 1.0)]);
    let frames = FrameList::from_frames(&[1]);
    let lens_setup = LensSetup::no_lens(cameras.len());
    let options = default_options();

    let result = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();

    assert!(result.solver_result.success);
    let solved = bundles[0].transform.tx.get(1);
    assert!(
        (0.899999..=0.900001).contains(&solved),
        "solved value {solved}"
    );
}

/// Cancelling mid-solve restores every initial value and reports the
/// interruption.
#[test]
fn cancellation_restores_initial_values() {
    let (mut cameras, mut markers, mut bundles, attrs, frames, _truth) = rigid_body_scene();
    let lens_setup = LensSetup::no_lens(cameras.len());
    let options = default_options();

    let interrupt = InterruptAfter::new(3);
    let result = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &interrupt,
    )
    .unwrap();

    assert!(!result.solver_result.success);
    assert!(result.solver_result.user_interrupted);
    for frame in 1..=10 {
        assert_eq!(cameras[0].transform.rx.get(frame), 0.0);
        assert_eq!(cameras[0].transform.ry.get(frame), 0.0);
        assert_eq!(cameras[0].transform.rz.get(frame), 0.0);
    }
}

/// Solving per-frame and all-frames-at-once must agree when every
/// parameter is a single-frame keyframe.
#[test]
fn per_frame_matches_all_frames_at_once() {
    let (mut cameras_a, mut markers_a, mut bundles_a, attrs_a, frames_a, _truth) =
        rigid_body_scene();
    let (mut cameras_b, mut markers_b, mut bundles_b, attrs_b, frames_b, _truth) =
        rigid_body_scene();
    let lens_setup = LensSetup::no_lens(1);

    let mut options = default_options();
    options.auto_diff_type = AutoDiffType::Central;
    options.iter_max = 50;

    let all_at_once = solve(
        &options,
        &mut cameras_a,
        &mut markers_a,
        &mut bundles_a,
        &attrs_a,
        &frames_a,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();

    options.frame_solve_mode = FrameSolveMode::PerFrame;
    let per_frame = solve(
        &options,
        &mut cameras_b,
        &mut markers_b,
        &mut bundles_b,
        &attrs_b,
        &frames_b,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();

    assert!(all_at_once.solver_result.success);
    assert!(per_frame.solver_result.success);

    for frame in 1..=10 {
        assert_relative_eq!(
            cameras_a.first().unwrap().transform.rx.get(frame),
            cameras_b.first().unwrap().transform.rx.get(frame),
            epsilon = 1e-4
        );
        assert_relative_eq!(
            cameras_a.first().unwrap().transform.ry.get(frame),
            cameras_b.first().unwrap().transform.ry.get(frame),
            epsilon = 1e-4
        );
        assert_relative_eq!(
            cameras_a.first().unwrap().transform.rz.get(frame),
            cameras_b.first().unwrap().transform.rz.get(frame),
            epsilon = 1e-4
        );
    }
}

/// Two successive solves of the same problem return byte-identical
/// parameter vectors.
#[test]
fn solves_are_deterministic() {
    let run = || {
        let mut cameras = vec![square_camera()];
        let mut bundles = vec![Bundle::new("bnd").with_position(1.0, -0.5, 10.0)];
        let mut marker = Marker::new("mkr", 0, 0);
        marker.pos_x = AttrValue::Static(0.01);
        marker.pos_y = AttrValue::Static(-0.02);
        let mut markers = MarkerList::from_markers(vec![marker]);
        let attrs = AttrList::from_attrs(vec![
            Attr::new(
                "bnd.translateX",
                "btx",
                ObjectType::Bundle,
                AttrRole::TranslateX,
                0,
                false,
            ),
            Attr::new(
                "bnd.translateY",
                "bty",
                ObjectType::Bundle,
                AttrRole::TranslateY,
                0,
                false,
            ),
        ]);
        let frames = FrameList::from_frames(&[1]);
        let lens_setup = LensSetup::no_lens(1);
        let options = default_options();
        let result = solve(
            &options,
            &mut cameras,
            &mut markers,
            &mut bundles,
            &attrs,
            &frames,
            &lens_setup,
            PrintStatOptions::default(),
            LogLevel::Warning,
            &NeverInterrupt,
        )
        .unwrap();
        result.solve_values_result.solve_parameter_list
    };

    let first = run();
    let second = run();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

/// With accept-only-better the reported error average can never rise
/// above the initial average.
#[test]
fn accept_only_better_never_regresses() {
    let (mut cameras, mut markers, mut bundles, attrs, frames, _truth) = rigid_body_scene();
    let lens_setup = LensSetup::no_lens(cameras.len());

    let mut options = default_options();
    options.accept_only_better = true;
    // Starve the kernel so the solve barely moves.
    options.iter_max = 1;

    let deviation_stats = PrintStatOptions::from_modes(&["deviation"]);
    let initial = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        deviation_stats,
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();
    let initial_avg = initial.solver_result.error_avg;

    let result = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();
    assert!(result.solver_result.error_avg <= initial_avg + 1e-9);
}

/// Print-statistics modes imply do-not-solve: values are reported but
/// nothing is modified.
#[test]
fn print_stats_does_not_solve() {
    let mut cameras = vec![square_camera()];
    let mut bundles = vec![Bundle::new("bnd").with_position(1.0, 0.0, 10.0)];
    let mut marker = Marker::new("mkr", 0, 0);
    marker.pos_x = AttrValue::Static(0.0);
    let mut markers = MarkerList::from_markers(vec![marker]);
    let attrs = AttrList::from_attrs(vec![Attr::new(
        "bnd.translateX",
        "btx",
        ObjectType::Bundle,
        AttrRole::TranslateX,
        0,
        false,
    )]);
    let frames = FrameList::from_frames(&[1]);
    let lens_setup = LensSetup::no_lens(1);
    let options = default_options();

    let print_stats = PrintStatOptions::from_modes(&["inputs", "deviation"]);
    let result = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        print_stats,
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();

    assert!(result.solver_result.success);
    // The bundle was not moved.
    assert_eq!(bundles[0].transform.tx.get(1), 1.0);
    // Counts were reported.
    let fields = result.as_string_fields();
    assert!(fields.iter().any(|f| f == "numberOfParameters=1"));
    assert!(fields.iter().any(|f| f == "numberOfMarkerErrors=2"));
    assert!(fields
        .iter()
        .any(|f| f.starts_with("error_per_marker_per_frame=mkr#1#")));
}

/// Zero enabled inputs reject the solve immediately.
#[test]
fn empty_inputs_are_rejected() {
    let mut cameras = vec![square_camera()];
    let mut bundles = vec![Bundle::new("bnd")];
    let mut markers = MarkerList::from_markers(vec![]);
    let attrs = AttrList::from_attrs(vec![]);
    let frames = FrameList::from_frames(&[1]);
    let lens_setup = LensSetup::no_lens(1);
    let options = default_options();

    let result = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();
    assert!(!result.solver_result.success);
}

/// Markers with measurement noise still converge, settling near the
/// noise floor.
#[test]
fn noisy_markers_still_converge() {
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    let (mut cameras, mut markers, mut bundles, attrs, frames, _truth) = rigid_body_scene();
    let lens_setup = LensSetup::no_lens(cameras.len());

    // Roughly one pixel of gaussian noise at a 1920 pixel image width.
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let normal = Normal::new(0.0, 1.0 / 1920.0).unwrap();
    for marker_index in 0..markers.len() {
        let marker = markers.get_marker_mut(marker_index);
        for frame in 1..=10 {
            let x = marker.pos_x.get(frame) + normal.sample(&mut rng);
            let y = marker.pos_y.get(frame) + normal.sample(&mut rng);
            marker.pos_x.set(frame, x);
            marker.pos_y.set(frame, y);
        }
    }
    let mut options = default_options();
    options.auto_diff_type = AutoDiffType::Central;
    options.iter_max = 50;

    let result = solve(
        &options,
        &mut cameras,
        &mut markers,
        &mut bundles,
        &attrs,
        &frames,
        &lens_setup,
        PrintStatOptions::default(),
        LogLevel::Warning,
        &NeverInterrupt,
    )
    .unwrap();

    assert!(result.solver_result.success);
    assert!(
        result.solver_result.error_avg < 5.0,
        "average error too large: {}",
        result.solver_result.error_avg
    );
}

/// Both evaluation backends agree on the solved values.
#[test]
fn host_and_flat_scene_backends_agree() {
    let run = |mode: SceneGraphMode| {
        let mut cameras = vec![square_camera()];
        let mut bundles = vec![Bundle::new("bnd").with_position(1.2, 0.3, 10.0)];
        let mut marker = Marker::new("mkr", 0, 0);
        marker.pos_x = AttrValue::Static(0.0);
        marker.pos_y = AttrValue::Static(0.0);
        let mut markers = MarkerList::from_markers(vec![marker]);
        let attrs = AttrList::from_attrs(vec![
            Attr::new(
                "bnd.translateX",
                "btx",
                ObjectType::Bundle,
                AttrRole::TranslateX,
                0,
                false,
            ),
            Attr::new(
                "bnd.translateY",
                "bty",
                ObjectType::Bundle,
                AttrRole::TranslateY,
                0,
                false,
            ),
        ]);
        let frames = FrameList::from_frames(&[1]);
        let lens_setup = LensSetup::no_lens(1);
        let mut options = default_options();
        options.scene_graph_mode = mode;
        let result = solve(
            &options,
            &mut cameras,
            &mut markers,
            &mut bundles,
            &attrs,
            &frames,
            &lens_setup,
            PrintStatOptions::default(),
            LogLevel::Warning,
            &NeverInterrupt,
        )
        .unwrap();
        assert!(result.solver_result.success);
        (
            bundles[0].transform.tx.get(1),
            bundles[0].transform.ty.get(1),
        )
    };

    let host = run(SceneGraphMode::HostObjects);
    let flat = run(SceneGraphMode::FlatScene);
    assert_relative_eq!(host.0, flat.0, epsilon = 1e-9);
    assert_relative_eq!(host.1, flat.1, epsilon = 1e-9);
}
