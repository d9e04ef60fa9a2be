//! The adaptive central-difference derivative.

use crate::settings::MinimizerOptions;
use crate::transform::{ParamTransform, Precision};

/// A pure objective: evaluates the function at a full parameter vector.
///
/// `Send + Sync` so the same implementation can be shared by a worker
/// process after `fork` without any synchronization of its own.
pub trait Objective: Send + Sync {
    fn value(&self, x: &[f64]) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn value(&self, x: &[f64]) -> f64 {
        self(x)
    }
}

/// The Minuit-compatible numerical gradient kernel.
///
/// Stateless beyond the machine-precision constants fixed at construction;
/// all per-parameter mutable state lives in [`crate::gradient::GradientState`]
/// so the kernel itself can be shared freely across tasks.
#[derive(Clone, Copy, Debug)]
pub struct NumericalGradientKernel {
    precision: Precision,
    /// When true, steps are chosen in internal space, finite differences
    /// are applied in external space, and the result is converted back to
    /// internal space by the transform's Jacobian.
    pub always_exactly_mimic_minuit2: bool,
}

impl Default for NumericalGradientKernel {
    fn default() -> Self {
        NumericalGradientKernel {
            precision: Precision::default(),
            always_exactly_mimic_minuit2: true,
        }
    }
}

impl NumericalGradientKernel {
    pub fn new(always_exactly_mimic_minuit2: bool) -> Self {
        NumericalGradientKernel {
            precision: Precision::default(),
            always_exactly_mimic_minuit2,
        }
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Evaluates `f` at `x` with component `i` perturbed by `delta` in
    /// internal space.
    ///
    /// When `always_exactly_mimic_minuit2` is set, the *entire* point is
    /// mapped into external space before calling `f` (every component
    /// goes through its own transform, not just `i`), so the central
    /// difference computed from the two resulting values is already the
    /// chain-ruled internal-space derivative -- no separate multiply by
    /// the transform's Jacobian is needed on top of it.
    fn eval_perturbed(
        &self,
        f: &dyn Objective,
        x_internal: &[f64],
        transforms: &[ParamTransform],
        i: usize,
        delta: f64,
    ) -> f64 {
        let mut x = x_internal.to_vec();
        x[i] += delta;
        if self.always_exactly_mimic_minuit2 {
            for (xi, t) in x.iter_mut().zip(transforms.iter()) {
                *xi = t.int2ext(*xi);
            }
        }
        f.value(&x)
    }

    /// Evaluates `f` at the unperturbed point, honoring
    /// `always_exactly_mimic_minuit2` the same way [`Self::eval_perturbed`]
    /// does.
    pub fn eval_at(&self, f: &dyn Objective, x_internal: &[f64], transforms: &[ParamTransform]) -> f64 {
        if self.always_exactly_mimic_minuit2 {
            let x_ext: Vec<f64> = x_internal
                .iter()
                .zip(transforms.iter())
                .map(|(&xi, t)| t.int2ext(xi))
                .collect();
            f.value(&x_ext)
        } else {
            f.value(x_internal)
        }
    }

    /// Runs up to `options.gradient_ncycles` cycles of adaptive central
    /// differencing for a single parameter `i`, mutating
    /// `(grad_i, g2_i, gstep_i)` in place.
    ///
    /// `x_internal` is the full current point in internal coordinates;
    /// only component `i` is perturbed. `f_val` is `f(x)` at the
    /// unperturbed point, precomputed once per call to `Differentiate`
    /// and shared across all parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn differentiate_component(
        &self,
        f: &dyn Objective,
        x_internal: &[f64],
        transforms: &[ParamTransform],
        i: usize,
        f_val: f64,
        grad_i: &mut f64,
        g2_i: &mut f64,
        gstep_i: &mut f64,
        options: &MinimizerOptions,
    ) {
        let eps = self.precision.eps;
        let eps2 = self.precision.eps2;
        let up = options.error_level;

        let dfmin = 8.0 * eps2 * (f_val.abs() + up);
        let vrysml = 8.0 * eps * eps;

        let x_i = x_internal[i];
        let has_limits = transforms[i].has_limits();

        let mut step_prev = *gstep_i;

        for cycle in 0..options.gradient_ncycles {
            let epspri = eps2 + grad_i.abs() * eps2;
            let opt = (dfmin / (g2_i.abs() + epspri)).sqrt();

            let mut step = opt.max((0.1 * *gstep_i).abs());
            if has_limits {
                step = step.min(0.5);
            }
            step = step.min(10.0 * gstep_i.abs());
            step = step.max(vrysml.max(8.0 * (eps2 * x_i).abs()));

            debug_assert!(step > 0.0, "step must be strictly positive by construction");

            if cycle > 0 && ((step - step_prev) / step).abs() < options.gradient_step_tolerance {
                break;
            }

            *gstep_i = step;
            step_prev = step;

            let fs1 = self.eval_perturbed(f, x_internal, transforms, i, step);
            let fs2 = self.eval_perturbed(f, x_internal, transforms, i, -step);

            let grad_prev = *grad_i;
            *grad_i = (fs1 - fs2) / (2.0 * step);
            *g2_i = (fs1 + fs2 - 2.0 * f_val) / (step * step);

            if std::env::var_os("MLE_GRAD_TRACE_NGK").is_some() {
                log::debug!(
                    "ngk param {i}: step={step:.6e} grad={grad_i:.6e} g2={:.6e}",
                    *g2_i
                );
            }

            if cycle > 0
                && (grad_prev - *grad_i).abs() / (grad_i.abs() + dfmin / step)
                    < options.gradient_tolerance
            {
                break;
            }
        }
    }

    /// Computes `(grad, g2, gstep)` for every free parameter, in
    /// ascending order. Workers call [`Self::differentiate_component`]
    /// directly for a single parameter instead; this exists for the
    /// single-process path and for tests.
    pub fn differentiate_all(
        &self,
        f: &dyn Objective,
        x_internal: &[f64],
        transforms: &[ParamTransform],
        state: &mut crate::gradient::state::GradientState,
        options: &MinimizerOptions,
    ) {
        let f_val = self.eval_at(f, x_internal, transforms);
        for i in 0..x_internal.len() {
            let (mut grad_i, mut g2_i, mut gstep_i) = state.component(i);
            self.differentiate_component(
                f,
                x_internal,
                transforms,
                i,
                f_val,
                &mut grad_i,
                &mut g2_i,
                &mut gstep_i,
                options,
            );
            state.set_component(i, grad_i, g2_i, gstep_i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::state::GradientState;

    #[test]
    fn scalar_square_matches_analytic_derivative() {
        let kernel = NumericalGradientKernel::new(false);
        let f = |x: &[f64]| x[0] * x[0];
        let transforms = [ParamTransform::Unbounded];
        let mut state = GradientState::defaults(1);
        let options = MinimizerOptions {
            error_level: 1.0,
            gradient_step_tolerance: 0.5,
            gradient_tolerance: 0.1,
            gradient_ncycles: 2,
        };

        kernel.differentiate_all(&f, &[3.0], &transforms, &mut state, &options);

        assert!((state.grad[0] - 6.0).abs() < 1e-6, "grad={}", state.grad[0]);
        assert!((state.g2[0] - 2.0).abs() < 1e-4, "g2={}", state.g2[0]);
    }

    #[test]
    fn two_parameter_quadratic_matches_analytic_gradient() {
        let kernel = NumericalGradientKernel::new(false);
        // f = (x0 - 1)^2 + 4 (x1 + 2)^2
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + 4.0 * (x[1] + 2.0).powi(2);
        let transforms = [ParamTransform::Unbounded, ParamTransform::Unbounded];
        let mut state = GradientState::defaults(2);
        let options = MinimizerOptions::default();

        kernel.differentiate_all(&f, &[0.0, 0.0], &transforms, &mut state, &options);

        assert!((state.grad[0] - -2.0).abs() < 1e-3, "grad0={}", state.grad[0]);
        assert!((state.grad[1] - 16.0).abs() < 1e-2, "grad1={}", state.grad[1]);
        assert!((state.g2[0] - 2.0).abs() < 1e-2, "g2_0={}", state.g2[0]);
        assert!((state.g2[1] - 8.0).abs() < 1e-1, "g2_1={}", state.g2[1]);
    }

    #[test]
    fn limited_parameter_clamps_step_and_stays_finite() {
        let kernel = NumericalGradientKernel::new(true);
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + 4.0 * (x[1] + 2.0).powi(2);
        let transforms = [
            ParamTransform::BothLimits {
                lower: -0.3,
                upper: 0.3,
            },
            ParamTransform::Unbounded,
        ];
        let mut state = GradientState::defaults(2);
        let options = MinimizerOptions::default();

        kernel.differentiate_all(&f, &[0.0, 0.0], &transforms, &mut state, &options);

        assert!(state.gstep[0] <= 0.5);
        assert!(state.grad[0].is_finite());
    }

    #[test]
    fn running_twice_at_same_point_is_deterministic() {
        let kernel = NumericalGradientKernel::new(false);
        let f = |x: &[f64]| x[0] * x[0] + x[1] * x[1];
        let transforms = [ParamTransform::Unbounded, ParamTransform::Unbounded];
        let options = MinimizerOptions::default();

        let mut state_a = GradientState::defaults(2);
        kernel.differentiate_all(&f, &[1.0, -2.0], &transforms, &mut state_a, &options);

        let mut state_b = GradientState::defaults(2);
        kernel.differentiate_all(&f, &[1.0, -2.0], &transforms, &mut state_b, &options);

        assert_eq!(state_a, state_b);
    }
}
