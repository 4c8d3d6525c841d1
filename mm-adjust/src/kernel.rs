//! Thin adapters between the solve driver and the Levenberg-Marquardt
//! kernels.
//!
//! A kernel is identified by a small integer and a name; every kernel
//! computes the same thing, the Gauss-Newton step of the sum of squared
//! residuals. The *dif* kernels use dense forward-difference Jacobians,
//! the *der* kernels the sparsity-aware Jacobian with forward or central
//! differencing.

use levenberg_marquardt::{LevenbergMarquardt, TerminationReason};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::data::{SolverData, SolverOptions};
use crate::results::SolverResult;
use crate::solve_func::SolveProblem;

/// What the active kernel supports.
#[derive(Debug, Clone, Copy)]
pub struct SolverCapabilities {
    pub auto_diff_forward: bool,
    pub auto_diff_central: bool,
    pub parameter_bounds: bool,
    pub robust_loss: bool,
}

/// The selectable kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverType {
    /// Historical box-constrained finite-difference kernel; recognised
    /// but no longer shipped.
    Levmar,
    CMinpackLmdif,
    #[default]
    CMinpackLmder,
    CeresLmdif,
    CeresLmder,
}

impl SolverType {
    pub fn as_index(self) -> u8 {
        match self {
            SolverType::Levmar => 0,
            SolverType::CMinpackLmdif => 1,
            SolverType::CMinpackLmder => 2,
            SolverType::CeresLmdif => 3,
            SolverType::CeresLmder => 4,
        }
    }

    pub fn from_index(index: u8) -> Option<SolverType> {
        match index {
            0 => Some(SolverType::Levmar),
            1 => Some(SolverType::CMinpackLmdif),
            2 => Some(SolverType::CMinpackLmder),
            3 => Some(SolverType::CeresLmdif),
            4 => Some(SolverType::CeresLmder),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SolverType::Levmar => "levmar",
            SolverType::CMinpackLmdif => "cminpack_lmdif",
            SolverType::CMinpackLmder => "cminpack_lmder",
            SolverType::CeresLmdif => "ceres_lmdif",
            SolverType::CeresLmder => "ceres_lmder",
        }
    }

    pub fn from_name(name: &str) -> Option<SolverType> {
        solver_types()
            .into_iter()
            .find(|solver_type| solver_type.name() == name)
    }

    /// Whether the kernel computes its Jacobian through the affects-aware
    /// sparse path.
    pub fn uses_sparse_jacobian(self) -> bool {
        matches!(self, SolverType::CMinpackLmder | SolverType::CeresLmder)
    }

    pub fn capabilities(self) -> SolverCapabilities {
        match self {
            SolverType::Levmar => SolverCapabilities {
                auto_diff_forward: true,
                auto_diff_central: true,
                parameter_bounds: true,
                robust_loss: false,
            },
            SolverType::CMinpackLmdif => SolverCapabilities {
                auto_diff_forward: true,
                auto_diff_central: false,
                parameter_bounds: true,
                robust_loss: false,
            },
            SolverType::CMinpackLmder => SolverCapabilities {
                auto_diff_forward: true,
                auto_diff_central: true,
                parameter_bounds: true,
                robust_loss: false,
            },
            SolverType::CeresLmdif => SolverCapabilities {
                auto_diff_forward: true,
                auto_diff_central: false,
                parameter_bounds: true,
                robust_loss: true,
            },
            SolverType::CeresLmder => SolverCapabilities {
                auto_diff_forward: true,
                auto_diff_central: true,
                parameter_bounds: true,
                robust_loss: true,
            },
        }
    }
}

/// Every kernel that can actually solve.
pub fn solver_types() -> Vec<SolverType> {
    vec![
        SolverType::CMinpackLmdif,
        SolverType::CMinpackLmder,
        SolverType::CeresLmdif,
        SolverType::CeresLmder,
    ]
}

/// The environment variable naming the preferred default kernel.
pub const DEFAULT_SOLVER_ENV_VAR: &str = "MMSOLVER_DEFAULT_SOLVER";

/// Resolve the default kernel, honouring `MMSOLVER_DEFAULT_SOLVER` when
/// it names a known kernel. This is surfaced as explicit configuration
/// at option-construction time; nothing reads the environment later.
pub fn default_solver_type() -> SolverType {
    match std::env::var(DEFAULT_SOLVER_ENV_VAR) {
        Ok(name) => match SolverType::from_name(&name) {
            Some(solver_type) => solver_type,
            None => {
                let known: Vec<&str> = solver_types()
                    .into_iter()
                    .map(|solver_type| solver_type.name())
                    .collect();
                error!(
                    "{DEFAULT_SOLVER_ENV_VAR} environment variable is invalid; \
                     value={name} may be one of {known:?}"
                );
                SolverType::default()
            }
        },
        Err(_) => SolverType::default(),
    }
}

fn termination_reason(reason: &TerminationReason) -> (i32, String) {
    match reason {
        TerminationReason::Converged { ftol, xtol } => (
            1,
            format!("converged (ftol={ftol}, xtol={xtol})"),
        ),
        TerminationReason::ResidualsZero => (2, "residuals are zero".to_string()),
        TerminationReason::Orthogonal => (
            3,
            "residuals orthogonal to the jacobian columns".to_string(),
        ),
        TerminationReason::LostPatience => (4, "maximum iterations reached".to_string()),
        TerminationReason::NoImprovementPossible(detail) => {
            (5, format!("no reduction possible: {detail}"))
        }
        TerminationReason::User(detail) => (6, format!("terminated by evaluation: {detail}")),
        TerminationReason::Numerical(detail) => (7, format!("numerical failure: {detail}")),
        other => (0, format!("{other:?}")),
    }
}

/// Drive the configured kernel over a prepared problem, returning the
/// solver data and the kernel's report translated to a [`SolverResult`].
pub fn solve_with_kernel<'a>(
    options: &SolverOptions,
    problem: SolveProblem<'a>,
) -> (SolverData<'a>, SolverResult) {
    let mut minimizer = LevenbergMarquardt::new();
    if options.function_tolerance > 0.0 {
        minimizer = minimizer.with_ftol(options.function_tolerance);
    }
    if options.parameter_tolerance > 0.0 {
        minimizer = minimizer.with_xtol(options.parameter_tolerance);
    }
    if options.gradient_tolerance > 0.0 {
        minimizer = minimizer.with_gtol(options.gradient_tolerance);
    }
    if options.iter_max > 0 {
        minimizer = minimizer.with_patience(options.iter_max);
    }

    let (problem, report) = minimizer.minimize(problem);
    let data = problem.into_data();

    let (reason_number, reason) = termination_reason(&report.termination);
    let mut result = SolverResult::default();
    result.success = report.termination.was_successful();
    result.reason_number = reason_number;
    result.reason = reason;
    result.iterations = data.iter_count;
    result.function_evals = data.func_eval_count;
    result.jacobian_evals = data.jac_iter_count;
    result.error_final = report.objective_function;
    result.user_interrupted = data.user_interrupted;
    result.count = 1;
    (data, result)
}
