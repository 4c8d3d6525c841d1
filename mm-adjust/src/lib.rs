//! Bundle adjustment for match-move camera tracking.
//!
//! Given a set of 2D image observations ([`Marker`]) each associated with
//! a [`Camera`] and a 3D [`Bundle`], and a set of scene attributes
//! ([`Attr`]) marked as unknowns, the solver finds attribute values (some
//! static, some keyframed per-frame) that minimise the total reprojection
//! error in pixel units.
//!
//! The most important internal operations are the calculation of residual
//! errors (re-projecting bundles through cameras at each frame) and the
//! sparsity-aware finite-difference Jacobian of the residuals with respect
//! to the parameters. The Levenberg-Marquardt kernels themselves are
//! external; they are reached through
//! [`levenberg_marquardt::LeastSquaresProblem`].
//!
//! The public entry point is [`solve::solve`], which runs the full
//! state machine: validate inputs, analyse marker/attribute/frame
//! relationships, pack parameters through the box-constraint transform,
//! drive the kernel, and write accepted values back to the solve objects.
#![deny(rust_2018_idioms)]

use thiserror::Error;

/// Failures surfaced while preparing or running a solve. Most conditions
/// are captured into [`results::CommandResult`] instead; only missing
/// collaborators and internal inconsistencies surface as errors.
#[derive(Error, Debug)]
pub enum SolveError {
    #[error("marker '{marker}' references camera index {index} which does not exist")]
    UnknownCamera { marker: String, index: usize },
    #[error("marker '{marker}' references bundle index {index} which does not exist")]
    UnknownBundle { marker: String, index: usize },
    #[error("attribute '{attr}' references object index {index} which does not exist")]
    UnknownAttrObject { attr: String, index: usize },
    #[error("attribute '{attr}' has no role recognised by the solver")]
    UnknownAttrRole { attr: String },
    #[error("scene evaluation failed: {source}")]
    Scene {
        #[from]
        source: mm_scene::SceneError,
    },
    #[error("lens layer error: {source}")]
    Lens {
        #[from]
        source: mm_lens::LensError,
    },
}

pub type Result<T> = std::result::Result<T, SolveError>;

pub mod matrix_bool;
pub use crate::matrix_bool::{MatrixBool2D, MatrixBool3D};

pub mod frame;
pub use crate::frame::{FrameList, FrameNumber};

pub mod attr;
pub use crate::attr::{Attr, AttrList, AttrRole, AttrValue, ObjectType};

pub mod camera;
pub use crate::camera::{Camera, TransformValues};

pub mod bundle;
pub use crate::bundle::Bundle;

pub mod marker;
pub use crate::marker::{Marker, MarkerList};

pub mod lens_state;
pub use crate::lens_state::{LensSetup, LensState};

pub mod data;
pub use crate::data::{
    AutoDiffType, FrameSolveMode, Interruptor, LogLevel, NeverInterrupt, PrintStatOptions,
    RobustLossType, SceneGraphMode, SolverData, SolverOptions,
};

pub mod timer;
pub use crate::timer::{SolverTimer, Stopwatch};

pub mod loss;

pub mod affects;
pub use crate::affects::GraphMode;

pub mod relationships;
pub use crate::relationships::ERRORS_PER_MARKER;

pub mod params;

pub mod measure;

pub mod solve_func;
pub use crate::solve_func::SolveProblem;

pub mod kernel;
pub use crate::kernel::SolverType;

pub mod results;
pub use crate::results::{CommandResult, SolverResult};

pub mod scene_build;

pub mod solve;
pub use crate::solve::solve;
