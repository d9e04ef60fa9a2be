//! The gradient kernel computes the same result whether invoked
//! directly in-process or distributed across 1, 2, or 3 worker
//! processes through a `GradientJob`.

use std::sync::{Arc, Mutex, OnceLock};

use mle_gradient::prelude::*;

fn lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn quadratic(x: &[f64]) -> f64 {
    (x[0] - 1.0).powi(2) + 4.0 * (x[1] + 2.0).powi(2) + 0.5 * (x[2] - 3.0).powi(2)
}

fn serial_gradient(x: &[f64], settings: &[ParameterSettings], options: &MinimizerOptions) -> (Vec<f64>, Vec<f64>) {
    let kernel = NumericalGradientKernel::default();
    let transforms: Vec<_> = settings.iter().map(|s| s.transform()).collect();
    let x_internal: Vec<f64> = settings
        .iter()
        .zip(x.iter())
        .map(|(s, &xi)| s.transform().ext2int(xi))
        .collect();
    let mut state = GradientState::defaults(settings.len());
    kernel.differentiate_all(&quadratic, &x_internal, &transforms, &mut state, options);
    (state.grad, state.g2)
}

fn distributed_gradient(n_workers: usize, x: &[f64], settings: Vec<ParameterSettings>, options: MinimizerOptions) -> (Vec<f64>, Vec<f64>) {
    let objective: Arc<dyn Objective> = Arc::new(quadratic);
    let manager_config = ManagerConfig {
        n_workers,
        pin_cpus: false,
        ring_capacity: 1 << 14,
    };
    let job = GradientJob::new(objective, settings, options, manager_config).unwrap();
    job.compute_gradient(x).unwrap();

    let mut grad = vec![0.0; x.len()];
    let mut g2 = vec![0.0; x.len()];
    job.fill_gradient(&mut grad);
    job.fill_second_derivative(&mut g2);

    let manager = Manager::current().unwrap();
    manager.shutdown().unwrap();
    (grad, g2)
}

#[test]
fn distributed_gradient_matches_serial_for_any_worker_count() {
    let _guard = lock().lock().unwrap();

    let x = [0.0, 0.0, 0.0];
    let settings = vec![
        ParameterSettings::unbounded("x0", x[0], 0.1),
        ParameterSettings::unbounded("x1", x[1], 0.1),
        ParameterSettings::unbounded("x2", x[2], 0.1),
    ];
    let options = MinimizerOptions::default();

    let (serial_grad, serial_g2) = serial_gradient(&x, &settings, &options);

    for n_workers in [1, 2, 3] {
        let (grad, g2) = distributed_gradient(n_workers, &x, settings.clone(), options);
        assert_eq!(grad, serial_grad, "n_workers={n_workers}: gradient mismatch");
        assert_eq!(g2, serial_g2, "n_workers={n_workers}: second-derivative mismatch");
    }
}
