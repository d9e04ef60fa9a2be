//! Parameter settings, minimizer strategy, and manager configuration --
//! the plain-data configuration surface passed into the manager and the
//! gradient kernel.

use serde::{Deserialize, Serialize};

use crate::transform::ParamTransform;

/// Per-parameter settings, as supplied by the minimizer before activation
/// and broadcast to workers whenever they change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSettings {
    pub name: String,
    pub value: f64,
    pub step: f64,
    pub fixed: bool,
    pub has_lower_limit: bool,
    pub has_upper_limit: bool,
    pub lower: f64,
    pub upper: f64,
}

impl ParameterSettings {
    pub fn unbounded(name: impl Into<String>, value: f64, step: f64) -> Self {
        ParameterSettings {
            name: name.into(),
            value,
            step,
            fixed: false,
            has_lower_limit: false,
            has_upper_limit: false,
            lower: 0.0,
            upper: 0.0,
        }
    }

    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.has_lower_limit = true;
        self.has_upper_limit = true;
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn transform(&self) -> ParamTransform {
        ParamTransform::from_limits(
            self.has_lower_limit,
            self.has_upper_limit,
            self.lower,
            self.upper,
        )
    }
}

/// Strategy fields consumed by the gradient kernel.
///
/// `error_level` is Minuit's `Up`: `1.0` for chi-squared minimization,
/// `0.5` for negative-log-likelihood.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MinimizerOptions {
    pub error_level: f64,
    pub gradient_step_tolerance: f64,
    pub gradient_tolerance: f64,
    pub gradient_ncycles: usize,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        MinimizerOptions {
            error_level: 1.0,
            gradient_step_tolerance: 0.5,
            gradient_tolerance: 0.1,
            gradient_ncycles: 2,
        }
    }
}

/// Explicit configuration for the task manager, passed to
/// [`crate::manager::Manager::new`]. There is no global/implicit
/// configuration: every process-topology knob is named here.
#[derive(Clone, Copy, Debug)]
pub struct ManagerConfig {
    pub n_workers: usize,
    pub pin_cpus: bool,
    /// Capacity, in bytes, of each worker's shared-memory ring. Ignored
    /// for pipes that fall back to the socketpair transport.
    pub ring_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            n_workers: 1,
            pin_cpus: false,
            ring_capacity: 1 << 16,
        }
    }
}
