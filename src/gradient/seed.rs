//! Initial-gradient seeding, which replaces
//! [`crate::gradient::state::GradientState`]'s defaults with an estimate
//! derived from each parameter's width.

use crate::error::GradientError;
use crate::gradient::state::GradientState;
use crate::settings::ParameterSettings;
use crate::transform::Precision;

/// Computes the initial `(grad_i, g2_i, gstep_i)` for parameter `i` from
/// its current internal-space value `x_i` and its configured step width
/// `werr`.
fn seed_component(
    precision: Precision,
    settings: &ParameterSettings,
    x_i: f64,
    error_level: f64,
    param_index: usize,
) -> Result<(f64, f64, f64), GradientError> {
    let eps2 = precision.eps2;
    let transform = settings.transform();

    let sav = transform.int2ext(x_i);
    let sav_plus = transform.clip_to_upper(sav + settings.step);
    let sav_minus = transform.clip_to_lower(sav - settings.step);

    let vplu = transform.ext2int(sav_plus) - x_i;
    let vmin = transform.ext2int(sav_minus) - x_i;

    let gsmin = 8.0 * eps2 * (x_i.abs() + eps2);
    let dirin = ((vplu.abs() + vmin.abs()) / 2.0).max(gsmin);

    if dirin == 0.0 {
        return Err(GradientError::ZeroInitialStep { param_index });
    }

    let g2_i = 2.0 * error_level / (dirin * dirin);
    let mut gstep_i = gsmin.max(0.1 * dirin);
    let grad_i = g2_i * dirin;

    if transform.has_limits() {
        gstep_i = gstep_i.min(0.5);
    }

    Ok((grad_i, g2_i, gstep_i))
}

/// Reseeds every component of `state` from `x` (internal-space point) and
/// `settings`. Called by
/// [`crate::job::gradient_job::GradientJob::synchronize_parameter_settings`]
/// whenever the minimizer supplies new parameter settings.
pub fn set_initial_gradient(
    precision: Precision,
    settings: &[ParameterSettings],
    x_internal: &[f64],
    error_level: f64,
    state: &mut GradientState,
) -> Result<(), GradientError> {
    state.check_len(settings.len())?;
    for i in 0..settings.len() {
        let (grad_i, g2_i, gstep_i) =
            seed_component(precision, &settings[i], x_internal[i], error_level, i)?;
        state.set_component(i, grad_i, g2_i, gstep_i);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ParameterSettings;

    #[test]
    fn seeds_finite_gradient_for_unbounded_param() {
        let precision = Precision::default();
        let settings = vec![ParameterSettings::unbounded("x0", 3.0, 0.5)];
        let mut state = GradientState::defaults(1);
        set_initial_gradient(precision, &settings, &[3.0], 1.0, &mut state).unwrap();
        assert!(state.grad[0].is_finite());
        assert!(state.g2[0] >= 0.0);
        assert!(state.gstep[0] > 0.0);
    }

    #[test]
    fn clamps_gstep_for_limited_param() {
        let precision = Precision::default();
        let settings = vec![ParameterSettings::unbounded("x0", 0.0, 0.2).with_limits(-0.3, 0.3)];
        let mut state = GradientState::defaults(1);
        set_initial_gradient(precision, &settings, &[0.0], 1.0, &mut state).unwrap();
        assert!(state.gstep[0] <= 0.5);
        assert!(state.grad[0].is_finite());
    }
}
