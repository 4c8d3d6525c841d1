//! The universal solve function: the problem the LM kernels iterate on.
//!
//! Kernels call back with either "evaluate residuals" or "evaluate
//! residuals and Jacobian"; both dispatch through here. Cancellation is
//! co-operative: the interrupt flag is polled on each entry and before
//! each Jacobian column, and observing it terminates the kernel by
//! returning `None`.

use std::cell::{Ref, RefCell};

use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::storage::Owned;
use nalgebra::{DVector, Dyn, OMatrix};
use tracing::{debug, warn};

use crate::data::{AutoDiffType, LogLevel, SolverData};
use crate::measure::measure_errors;
use crate::params::{calculate_parameter_delta, set_parameters};
use crate::relationships::ERRORS_PER_MARKER;

/// The solver state machine's view of one minimisation problem.
///
/// `sparse_jacobian` selects the affects-aware Jacobian (only residuals a
/// parameter can touch are re-measured); without it every column re-runs
/// a full measurement, which is how the historical
/// finite-difference-only kernels behaved.
pub struct SolveProblem<'a> {
    data: RefCell<SolverData<'a>>,
    sparse_jacobian: bool,
}

impl<'a> SolveProblem<'a> {
    pub fn new(data: SolverData<'a>, sparse_jacobian: bool) -> Self {
        Self {
            data: RefCell::new(data),
            sparse_jacobian,
        }
    }

    pub fn into_data(self) -> SolverData<'a> {
        self.data.into_inner()
    }

    pub fn data(&self) -> Ref<'_, SolverData<'a>> {
        self.data.borrow()
    }

    fn jacobian_column(
        &self,
        data: &mut SolverData<'a>,
        jacobian: &mut OMatrix<f64, Dyn, Dyn>,
        param_index: usize,
        base_params: &[f64],
        base_errors: &[f64],
        use_central: bool,
    ) {
        let number_of_errors = data.number_of_errors();
        let number_of_pairs = data.number_of_marker_errors / ERRORS_PER_MARKER;
        let delta = data.options.delta;
        debug_assert!(delta > 0.0);

        let (attr_index, _) = data.param_to_attr[param_index];
        let attr = data.attrs.get_attr(attr_index);
        let value = base_params[param_index];

        // Residuals a perturbation of this parameter cannot touch keep
        // their base values, making the column sparse without any
        // sparse-matrix structure.
        let (frame_enable, eval_measurements) = if self.sparse_jacobian {
            let frame_enable = data.param_to_frame.column(param_index);
            let eval_measurements: Vec<bool> = (0..number_of_pairs)
                .map(|pair_index| data.error_to_param.at(pair_index, param_index))
                .collect();
            (frame_enable, eval_measurements)
        } else {
            (data.frames.enabled_mask(), vec![true; number_of_pairs])
        };

        let delta_a = calculate_parameter_delta(value, delta, 1.0, attr);

        data.jac_iter_count += 1;
        data.func_eval_count += 1;

        let mut params_a = base_params.to_vec();
        params_a[param_index] += delta_a;
        data.timer.parameter.start();
        set_parameters(data, &params_a);
        data.timer.parameter.stop();

        let mut errors_a = base_errors.to_vec();
        data.timer.error.start();
        measure_errors(data, &frame_enable, &eval_measurements, &mut errors_a);
        data.timer.error.stop();

        let forward_fill =
            |jacobian: &mut OMatrix<f64, Dyn, Dyn>, errors_a: &[f64], delta_a: f64| {
                let inv_delta = 1.0 / delta_a;
                for error_index in 0..number_of_errors {
                    jacobian[(error_index, param_index)] =
                        (errors_a[error_index] - base_errors[error_index]) * inv_delta;
                }
            };

        if !use_central {
            forward_fill(jacobian, &errors_a, delta_a);
            return;
        }

        // The opposite-direction step may differ because of bounds; when
        // it does not, central collapses to forward.
        let delta_b = calculate_parameter_delta(value, delta, -1.0, attr);
        if delta_a == delta_b {
            forward_fill(jacobian, &errors_a, delta_a);
            return;
        }

        data.jac_iter_count += 1;
        data.func_eval_count += 1;

        let mut params_b = base_params.to_vec();
        params_b[param_index] += delta_b;
        data.timer.parameter.start();
        set_parameters(data, &params_b);
        data.timer.parameter.stop();

        let mut errors_b = base_errors.to_vec();
        data.timer.error.start();
        measure_errors(data, &frame_enable, &eval_measurements, &mut errors_b);
        data.timer.error.stop();

        let inv_delta = 1.0 / (delta_a.abs() + delta_b.abs());
        for error_index in 0..number_of_errors {
            jacobian[(error_index, param_index)] =
                (errors_a[error_index] - errors_b[error_index]) * inv_delta;
        }
    }
}

impl<'a> LeastSquaresProblem<f64, Dyn, Dyn> for SolveProblem<'a> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        let data = self.data.get_mut();
        data.params.clear();
        data.params.extend_from_slice(x.as_slice());
        data.timer.parameter.start();
        set_parameters(data, x.as_slice());
        data.timer.parameter.stop();
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.data.borrow().params)
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut data = self.data.borrow_mut();
        let data = &mut *data;

        if data.interrupt.is_interrupt_requested() {
            warn!("user wants to cancel the solve");
            data.user_interrupted = true;
            return None;
        }

        data.timer.function.start();
        data.func_eval_count += 1;
        data.iter_count += 1;

        let frame_enable = data.frames.enabled_mask();
        let number_of_pairs = data.number_of_marker_errors / ERRORS_PER_MARKER;
        let eval_measurements = vec![true; number_of_pairs];

        let mut errors = std::mem::take(&mut data.errors);
        data.timer.error.start();
        let stats = measure_errors(data, &frame_enable, &eval_measurements, &mut errors);
        data.timer.error.stop();
        data.timer.function.stop();

        if data.log_level >= LogLevel::Verbose {
            debug!(
                "iteration {:04} | eval {:04} | error avg {:8.4} min {:8.4} max {:8.4}",
                data.iter_count,
                data.func_eval_count,
                stats.error_avg,
                stats.error_min,
                stats.error_max
            );
        }

        let residuals = DVector::from_column_slice(&errors);
        data.errors = errors;
        Some(residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, Dyn>> {
        let mut data = self.data.borrow_mut();
        let data = &mut *data;

        let number_of_parameters = data.number_of_parameters();
        let number_of_errors = data.number_of_errors();
        let mut jacobian = OMatrix::<f64, Dyn, Dyn>::zeros(number_of_errors, number_of_parameters);

        let use_central = data.options.auto_diff_type == AutoDiffType::Central
            && data.options.solver_supports_auto_diff_central;

        let base_params = data.params.clone();
        let base_errors = data.errors.clone();

        data.timer.jacobian.start();
        for param_index in 0..number_of_parameters {
            if data.interrupt.is_interrupt_requested() {
                warn!("user wants to cancel the evaluation");
                data.user_interrupted = true;
                data.timer.jacobian.stop();
                return None;
            }
            self.jacobian_column(
                data,
                &mut jacobian,
                param_index,
                &base_params,
                &base_errors,
                use_central,
            );
        }

        // Leave the value stores at the un-perturbed parameters.
        data.timer.parameter.start();
        set_parameters(data, &base_params);
        data.timer.parameter.stop();
        data.timer.jacobian.stop();

        Some(jacobian)
    }
}
