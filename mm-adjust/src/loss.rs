//! Robust loss functions applied to residuals before they reach the
//! kernel, reducing the influence of outliers.

use crate::data::RobustLossType;

fn loss_trivial(z: f64) -> (f64, f64, f64) {
    (z, 1.0, 0.0)
}

fn loss_soft_l1(z: f64) -> (f64, f64, f64) {
    let t = 1.0 + z;
    let rho0 = 2.0 * (t.sqrt() - 1.0);
    let rho1 = t.powf(-0.5);
    let rho2 = -0.5 * t.powf(-1.5);
    (rho0, rho1, rho2)
}

fn loss_cauchy(z: f64) -> (f64, f64, f64) {
    let t = 1.0 + z;
    (z.ln_1p(), 1.0 / t, -1.0 / (t * t))
}

/// Transform each residual `f` into `f * rho1 / sqrt(rho1 + 2*rho2*f^2)`
/// where the rho terms are evaluated at `z = (f / scale)^2` and re-scaled
/// by `scale^2`. The trivial loss is the identity.
pub fn apply_loss_function_to_errors(errors: &mut [f64], loss_type: RobustLossType, scale: f64) {
    for value in errors.iter_mut() {
        let f = *value;
        let z = (f / scale).powi(2);
        let (mut rho0, rho1, mut rho2) = match loss_type {
            RobustLossType::Trivial => loss_trivial(z),
            RobustLossType::SoftL1 => loss_soft_l1(z),
            RobustLossType::Cauchy => loss_cauchy(z),
        };
        rho0 *= scale * scale;
        rho2 /= scale * scale;
        let _ = rho0;

        let mut jacobian_scale = rho1 + 2.0 * rho2 * f * f;
        if jacobian_scale < f64::EPSILON {
            jacobian_scale = f64::EPSILON;
        }
        *value = f * rho1 / jacobian_scale.sqrt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn trivial_loss_is_identity() {
        let mut errors = vec![-3.0, -0.5, 0.0, 0.25, 10.0];
        let expected = errors.clone();
        apply_loss_function_to_errors(&mut errors, RobustLossType::Trivial, 1.0);
        for (value, original) in errors.iter().zip(expected.iter()) {
            assert_relative_eq!(value, original, epsilon = 1e-12);
        }
    }

    #[test]
    fn outputs_stay_finite_and_keep_sign() {
        for loss_type in [RobustLossType::SoftL1, RobustLossType::Cauchy] {
            let mut errors = vec![-40.0, -1.0, 0.0, 1.0, 40.0];
            apply_loss_function_to_errors(&mut errors, loss_type, 2.0);
            for (value, original) in errors.iter().zip([-40.0, -1.0, 0.0, 1.0, 40.0]) {
                assert!(value.is_finite());
                assert!(value * original >= 0.0);
            }
        }
    }

    #[test]
    fn negative_denominator_is_clamped() {
        // A large Cauchy residual drives the inner term negative; the
        // epsilon clamp keeps the result a number.
        let mut errors = vec![1000.0];
        apply_loss_function_to_errors(&mut errors, RobustLossType::Cauchy, 1.0);
        assert!(errors[0].is_finite());
    }

    #[test]
    fn small_residuals_pass_nearly_unchanged() {
        for loss_type in [RobustLossType::SoftL1, RobustLossType::Cauchy] {
            let mut errors = vec![1e-4];
            apply_loss_function_to_errors(&mut errors, loss_type, 1.0);
            assert_relative_eq!(errors[0], 1e-4, epsilon = 1e-8);
        }
    }
}
