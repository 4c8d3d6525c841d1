//! Common data structures shared by all adjustment stages.

use serde::{Deserialize, Serialize};

use crate::affects::GraphMode;
use crate::attr::AttrList;
use crate::bundle::Bundle;
use crate::camera::Camera;
use crate::frame::FrameList;
use crate::kernel::SolverType;
use crate::lens_state::LensState;
use crate::marker::MarkerList;
use crate::matrix_bool::{MatrixBool2D, MatrixBool3D};
use crate::scene_build::SceneData;
use crate::timer::SolverTimer;

/// Number of residuals contributed by one (marker, frame) pair.
pub use crate::relationships::ERRORS_PER_MARKER;

/// How per-frame values are solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameSolveMode {
    /// Loop over enabled frames, solving each in isolation.
    PerFrame,
    /// One solve covering every animated frame.
    #[default]
    AllFramesAtOnce,
}

/// Which evaluation backend re-projects bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SceneGraphMode {
    /// Evaluate the solve objects directly, with per-camera matrix caches.
    HostObjects,
    /// Evaluate through the baked flat scene.
    #[default]
    FlatScene,
}

/// Finite-differencing flavour for Jacobian columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoDiffType {
    #[default]
    Forward,
    Central,
}

/// Robust loss applied to residuals before they reach the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RobustLossType {
    #[default]
    Trivial,
    SoftL1,
    Cauchy,
}

/// Logging verbosity for a solve. Higher values are more verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    #[default]
    Info = 2,
    Verbose = 3,
    Debug = 4,
}

impl LogLevel {
    /// Per-frame solves print one level less; otherwise the volume of
    /// output slows the solve down noticeably.
    pub fn reduced_for_per_frame(self) -> LogLevel {
        match self {
            LogLevel::Debug => LogLevel::Verbose,
            LogLevel::Verbose => LogLevel::Info,
            LogLevel::Info => LogLevel::Warning,
            LogLevel::Warning => LogLevel::Error,
            LogLevel::Error => LogLevel::Error,
        }
    }
}

/// Statistics requested instead of a solve. Setting any mode implies
/// `do_not_solve`: the driver runs preflight and the affects analysis,
/// then returns without calling the kernel.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PrintStatOptions {
    pub do_not_solve: bool,
    /// Parameter/error counts.
    pub input: bool,
    /// The marker-affects-attribute map.
    pub affects: bool,
    /// Used and unused markers and attributes.
    pub used_solve_objects: bool,
    /// Per-frame and per-marker-per-frame deviations.
    pub deviation: bool,
}

impl PrintStatOptions {
    /// Parse the host-facing mode names.
    pub fn from_modes(modes: &[&str]) -> PrintStatOptions {
        let mut stats = PrintStatOptions::default();
        for mode in modes {
            match *mode {
                "inputs" => {
                    stats.do_not_solve = true;
                    stats.input = true;
                }
                "affects" => {
                    stats.do_not_solve = true;
                    stats.affects = true;
                }
                "usedSolveObjects" => {
                    stats.do_not_solve = true;
                    stats.used_solve_objects = true;
                }
                "deviation" => {
                    stats.do_not_solve = true;
                    stats.deviation = true;
                }
                unknown => {
                    tracing::warn!("ignoring unknown print statistics mode: {unknown}");
                }
            }
        }
        stats
    }
}

/// All the tunables of one solve. Iteration and convergence parameters
/// are fixed for the duration of a solve; the driver never varies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOptions {
    pub iter_max: usize,
    /// Initial damping factor for kernels that consume it.
    pub tau: f64,
    pub function_tolerance: f64,
    pub parameter_tolerance: f64,
    pub gradient_tolerance: f64,
    /// Finite-difference step size.
    pub delta: f64,
    pub auto_diff_type: AutoDiffType,
    pub auto_param_scale: bool,
    pub robust_loss_type: RobustLossType,
    pub robust_loss_scale: f64,
    pub scene_graph_mode: SceneGraphMode,
    pub solver_type: SolverType,
    pub accept_only_better: bool,
    /// The pixel width residuals are scaled to.
    pub image_width: f64,
    pub frame_solve_mode: FrameSolveMode,
    pub affects_graph_mode: GraphMode,
    pub remove_unused_markers: bool,
    pub remove_unused_attributes: bool,
    pub remove_unused_frames: bool,
    pub solver_supports_auto_diff_forward: bool,
    pub solver_supports_auto_diff_central: bool,
    pub solver_supports_parameter_bounds: bool,
    pub solver_supports_robust_loss: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        let solver_type = SolverType::default();
        let mut options = Self {
            iter_max: 20,
            tau: 1e-3,
            function_tolerance: 1e-6,
            parameter_tolerance: 1e-6,
            gradient_tolerance: 1e-6,
            delta: 1e-4,
            auto_diff_type: AutoDiffType::Forward,
            auto_param_scale: false,
            robust_loss_type: RobustLossType::Trivial,
            robust_loss_scale: 1.0,
            scene_graph_mode: SceneGraphMode::default(),
            solver_type,
            accept_only_better: false,
            image_width: 1.0,
            frame_solve_mode: FrameSolveMode::default(),
            affects_graph_mode: GraphMode::default(),
            remove_unused_markers: false,
            remove_unused_attributes: false,
            remove_unused_frames: false,
            solver_supports_auto_diff_forward: false,
            solver_supports_auto_diff_central: false,
            solver_supports_parameter_bounds: false,
            solver_supports_robust_loss: false,
        };
        options.set_solver_type(solver_type);
        options
    }
}

impl SolverOptions {
    /// Select a kernel and take over its capability flags.
    pub fn set_solver_type(&mut self, solver_type: SolverType) {
        let capabilities = solver_type.capabilities();
        self.solver_type = solver_type;
        self.solver_supports_auto_diff_forward = capabilities.auto_diff_forward;
        self.solver_supports_auto_diff_central = capabilities.auto_diff_central;
        self.solver_supports_parameter_bounds = capabilities.parameter_bounds;
        self.solver_supports_robust_loss = capabilities.robust_loss;
    }
}

/// Co-operative cancellation, polled at the top of each residual
/// evaluation and before each Jacobian column.
pub trait Interruptor {
    fn is_interrupt_requested(&self) -> bool;
}

/// The default interruptor: never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverInterrupt;

impl Interruptor for NeverInterrupt {
    fn is_interrupt_requested(&self) -> bool {
        false
    }
}

/// Everything the solve function needs while the kernel iterates.
///
/// The driver owns this for the lifetime of the solve; the value stores
/// (solve objects, lens state, attribute data block) are the only state
/// the evaluator writes to.
pub struct SolverData<'a> {
    pub cameras: &'a mut [Camera],
    pub markers: &'a MarkerList,
    pub bundles: &'a mut [Bundle],
    pub attrs: &'a AttrList,
    pub frames: &'a FrameList,
    pub lens_state: LensState,

    /// Present when the flat-scene backend is active.
    pub scene: Option<SceneData>,

    // Relational mapping indexes.
    pub param_to_attr: Vec<(usize, Option<usize>)>,
    pub error_to_marker: Vec<(usize, usize)>,
    pub marker_pos: Vec<(f64, f64)>,
    pub marker_weight: Vec<f64>,
    pub param_to_frame: MatrixBool2D,
    pub error_to_param: MatrixBool2D,
    pub marker_to_attr_to_frame: &'a MatrixBool3D,

    // Internal solver state.
    pub params: Vec<f64>,
    pub previous_params: Vec<f64>,
    /// Residuals handed to the kernel; may carry robust-loss scaling.
    pub errors: Vec<f64>,
    /// Deviations shown to the user, never loss-scaled.
    pub error_list: Vec<f64>,
    pub error_distances: Vec<f64>,
    pub func_eval_count: usize,
    pub iter_count: usize,
    pub jac_iter_count: usize,
    pub number_of_marker_errors: usize,
    pub number_of_attr_stiffness_errors: usize,
    pub number_of_attr_smoothness_errors: usize,

    pub options: &'a SolverOptions,
    pub timer: SolverTimer,
    pub interrupt: &'a dyn Interruptor,
    pub user_interrupted: bool,
    pub log_level: LogLevel,
}

impl SolverData<'_> {
    pub fn number_of_parameters(&self) -> usize {
        self.param_to_attr.len()
    }

    pub fn number_of_errors(&self) -> usize {
        self.number_of_marker_errors
            + self.number_of_attr_stiffness_errors
            + self.number_of_attr_smoothness_errors
    }

    pub fn number_of_markers_measured(&self) -> usize {
        self.number_of_marker_errors / ERRORS_PER_MARKER
    }
}
