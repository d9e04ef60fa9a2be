//! The `(grad, g2, gstep)` triple carried across calls to `Differentiate`.

use serde::{Deserialize, Serialize};

use crate::error::GradientError;

/// Per-parameter gradient state: the current first derivative estimate,
/// second derivative estimate, and last chosen step size.
///
/// Created with Minuit's historical defaults `(0.1, 0.1, 0.001)`, replaced
/// wholesale by [`crate::gradient::seed::set_initial_gradient`], and
/// mutated in place by [`crate::gradient::kernel::differentiate_component`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradientState {
    pub grad: Vec<f64>,
    pub g2: Vec<f64>,
    pub gstep: Vec<f64>,
}

impl GradientState {
    /// Default triple `(0.1, 0.1, 0.001)` replicated across `n` free
    /// parameters.
    pub fn defaults(n: usize) -> Self {
        GradientState {
            grad: vec![0.1; n],
            g2: vec![0.1; n],
            gstep: vec![0.001; n],
        }
    }

    pub fn len(&self) -> usize {
        self.grad.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grad.is_empty()
    }

    /// The single-parameter triple for component `i`.
    pub fn component(&self, i: usize) -> (f64, f64, f64) {
        (self.grad[i], self.g2[i], self.gstep[i])
    }

    pub fn set_component(&mut self, i: usize, grad: f64, g2: f64, gstep: f64) {
        self.grad[i] = grad;
        self.g2[i] = g2;
        self.gstep[i] = gstep;
    }

    /// Checks the triple is sized equal to `expected`, the spec's
    /// invariant that the state must track exactly the free parameters.
    pub fn check_len(&self, expected: usize) -> Result<(), GradientError> {
        if self.grad.len() != expected || self.g2.len() != expected || self.gstep.len() != expected
        {
            return Err(GradientError::StateLengthMismatch {
                got: self.grad.len(),
                expected,
            });
        }
        Ok(())
    }
}
