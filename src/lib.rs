//! A Minuit-compatible numerical gradient kernel, distributed across a
//! fork-based pool of worker processes.
//!
//! - [`transform`] -- internal/external parameter-space transforms (C2).
//! - [`gradient`] -- the adaptive central-difference kernel itself (C3).
//! - [`pipe`] -- the process-pair message transport (C1).
//! - [`manager`] -- the master/queue/worker process topology (C4).
//! - [`job`] -- the capability contract jobs implement, plus the
//!   gradient job that binds [`gradient`] to [`manager`] (C5, C6).

pub mod error;
pub mod gradient;
pub mod job;
pub mod manager;
pub mod pipe;
pub mod settings;
pub mod transform;

/// Initializes the `log` facade with `env_logger`. Call once, before
/// constructing a [`manager::Manager`], so every forked process inherits
/// an already-configured logger rather than each racing to initialize
/// its own. Never called implicitly by this crate.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

pub mod prelude {
    pub use crate::error::*;
    pub use crate::gradient::{GradientState, NumericalGradientKernel, Objective};
    pub use crate::job::gradient_job::GradientJob;
    pub use crate::job::Job;
    pub use crate::manager::Manager;
    pub use crate::settings::{ManagerConfig, MinimizerOptions, ParameterSettings};
    pub use crate::transform::ParamTransform;
}
