//! The numerical gradient kernel (C3): an adaptive central-difference
//! derivative per parameter, with Minuit-compatible internal/external
//! parameter-space handling and an initial-gradient seeder.

pub mod kernel;
pub mod seed;
pub mod state;

pub use kernel::{NumericalGradientKernel, Objective};
pub use seed::set_initial_gradient;
pub use state::GradientState;
