//! The gradient job: binds the numerical gradient kernel to the job
//! contract, so a distributed `compute_gradient(x)` call looks exactly
//! like a direct one to the minimizer that drives it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Error, GradientError};
use crate::gradient::{set_initial_gradient, GradientState, NumericalGradientKernel, Objective};
use crate::job::registry::JobId;
use crate::job::Job;
use crate::manager::Manager;
use crate::settings::{ManagerConfig, MinimizerOptions, ParameterSettings};
use crate::transform::{ParamTransform, Precision};

type Triple = (f64, f64, f64);

struct Mutable {
    settings: Vec<ParameterSettings>,
    options: MinimizerOptions,
    x_internal: Vec<f64>,
    state: GradientState,
    task_results: BTreeMap<usize, Triple>,
}

/// A gradient evaluation distributed over the task manager's worker
/// pool. One free parameter is one task.
pub struct GradientJob {
    job_id: OnceLock<JobId>,
    kernel: NumericalGradientKernel,
    objective: Arc<dyn Objective>,
    /// A strong reference to the manager this job runs on. Holding it
    /// here (rather than looking it up via `Manager::current` on every
    /// call) is what ties the manager's lifetime to its jobs': once the
    /// last job drops, this is the last strong reference and the
    /// manager tears itself down.
    manager: Arc<Manager>,
    mutable: Mutex<Mutable>,
}

impl GradientJob {
    /// Registers a new gradient job against the manager singleton
    /// (constructing it with `manager_config` if none exists yet) and
    /// seeds its initial gradient estimate from `settings`. Must be
    /// called before the manager is activated.
    pub fn new(
        objective: Arc<dyn Objective>,
        settings: Vec<ParameterSettings>,
        options: MinimizerOptions,
        manager_config: ManagerConfig,
    ) -> Result<Arc<GradientJob>, Error> {
        let manager = Manager::current_or_init(manager_config)?;
        let n = settings.len();
        let x_internal: Vec<f64> = settings
            .iter()
            .map(|s| s.transform().ext2int(s.value))
            .collect();
        let mut state = GradientState::defaults(n);
        set_initial_gradient(
            Precision::default(),
            &settings,
            &x_internal,
            options.error_level,
            &mut state,
        )
        .map_err(Error::from)?;

        if manager.is_activated() {
            return Err(Error::from(crate::error::ManagerError::RegisteredAfterActivation));
        }

        let job = Arc::new(GradientJob {
            job_id: OnceLock::new(),
            kernel: NumericalGradientKernel::default(),
            objective,
            manager,
            mutable: Mutex::new(Mutable {
                settings,
                options,
                x_internal,
                state,
                task_results: BTreeMap::new(),
            }),
        });
        let id = crate::job::registry::register(job.clone() as Arc<dyn Job>);
        job.job_id
            .set(id)
            .unwrap_or_else(|_| panic!("job_id set exactly once, in new()"));
        Ok(job)
    }

    pub fn job_id(&self) -> JobId {
        *self.job_id.get().expect("job_id initialized in new()")
    }

    fn n_params(&self) -> usize {
        self.mutable.lock().expect("gradient job mutex poisoned").state.len()
    }

    /// Computes the gradient, second derivative, and step-size triple at
    /// `x` (external-space parameter values), distributing one task per
    /// free parameter across the manager's workers.
    pub fn compute_gradient(&self, x: &[f64]) -> Result<(), Error> {
        let n = self.n_params();
        assert_eq!(x.len(), n, "compute_gradient: point has the wrong arity");

        self.manager.switch_work_mode(true)?;

        {
            let mut m = self.mutable.lock().expect("gradient job mutex poisoned");
            for i in 0..n {
                if m.settings[i].value != x[i] {
                    m.settings[i].value = x[i];
                    let transform = m.settings[i].transform();
                    m.x_internal[i] = transform.ext2int(x[i]);
                    self.manager
                        .update_real(self.job_id(), i, x[i], m.settings[i].fixed)?;
                }
            }
            m.task_results.clear();
        }

        for i in 0..n {
            self.manager.enqueue(self.job_id(), i)?;
        }
        self.manager.retrieve()?;

        // Nothing left in the FIFO for any worker until the next call;
        // idle them rather than leaving them to poll an empty queue.
        self.manager.switch_work_mode(false)?;
        Ok(())
    }

    pub fn fill_gradient(&self, out: &mut [f64]) {
        let m = self.mutable.lock().expect("gradient job mutex poisoned");
        out.copy_from_slice(&m.state.grad);
    }

    pub fn fill_second_derivative(&self, out: &mut [f64]) {
        let m = self.mutable.lock().expect("gradient job mutex poisoned");
        out.copy_from_slice(&m.state.g2);
    }

    pub fn fill_step_size(&self, out: &mut [f64]) {
        let m = self.mutable.lock().expect("gradient job mutex poisoned");
        out.copy_from_slice(&m.state.gstep);
    }

    pub fn synchronize_with_minimizer(&self, options: &MinimizerOptions) {
        self.mutable.lock().expect("gradient job mutex poisoned").options = *options;
    }

    pub fn synchronize_parameter_settings(
        &self,
        settings: &[ParameterSettings],
    ) -> Result<(), GradientError> {
        let x_internal: Vec<f64> = settings
            .iter()
            .map(|s| s.transform().ext2int(s.value))
            .collect();
        let mut state = GradientState::defaults(settings.len());
        let mut m = self.mutable.lock().expect("gradient job mutex poisoned");
        set_initial_gradient(
            self.kernel.precision(),
            settings,
            &x_internal,
            m.options.error_level,
            &mut state,
        )?;
        m.settings = settings.to_vec();
        m.x_internal = x_internal;
        m.state = state;
        Ok(())
    }

    fn transforms(settings: &[ParameterSettings]) -> Vec<ParamTransform> {
        settings.iter().map(|s| s.transform()).collect()
    }
}

impl Job for GradientJob {
    fn evaluate_task(&self, task_id: usize) {
        let mut m = self.mutable.lock().expect("gradient job mutex poisoned");
        if m.settings[task_id].fixed {
            m.state.set_component(task_id, 0.0, 0.0, 0.0);
            return;
        }
        let transforms = Self::transforms(&m.settings);
        let options = m.options;
        let x_internal = m.x_internal.clone();
        let f_val = self.kernel.eval_at(self.objective.as_ref(), &x_internal, &transforms);
        let (mut grad_i, mut g2_i, mut gstep_i) = m.state.component(task_id);
        self.kernel.differentiate_component(
            self.objective.as_ref(),
            &x_internal,
            &transforms,
            task_id,
            f_val,
            &mut grad_i,
            &mut g2_i,
            &mut gstep_i,
            &options,
        );
        m.state.set_component(task_id, grad_i, g2_i, gstep_i);
    }

    fn send_back_task_result_from_worker(&self, task_id: usize) -> Vec<u8> {
        let m = self.mutable.lock().expect("gradient job mutex poisoned");
        let triple = m.state.component(task_id);
        bincode::serialize(&triple).expect("a triple of f64 always serializes")
    }

    fn receive_task_result_on_queue(&self, task_id: usize, bytes: Vec<u8>) {
        match bincode::deserialize::<Triple>(&bytes) {
            Ok(triple) => {
                self.mutable
                    .lock()
                    .expect("gradient job mutex poisoned")
                    .task_results
                    .insert(task_id, triple);
            }
            Err(e) => log::error!("gradient job {}: malformed task result: {e}", self.job_id()),
        }
    }

    fn send_back_results_from_queue_to_master(&self) -> Vec<u8> {
        let m = self.mutable.lock().expect("gradient job mutex poisoned");
        let ordered: Vec<(usize, Triple)> = m.task_results.iter().map(|(&k, &v)| (k, v)).collect();
        bincode::serialize(&ordered).expect("a vec of (usize, triple) always serializes")
    }

    fn receive_results_on_master(&self, bytes: &[u8]) {
        let ordered: Vec<(usize, Triple)> = match bincode::deserialize(bytes) {
            Ok(v) => v,
            Err(e) => {
                log::error!("gradient job {}: malformed retrieved results: {e}", self.job_id());
                return;
            }
        };
        let mut m = self.mutable.lock().expect("gradient job mutex poisoned");
        for (i, (grad, g2, gstep)) in ordered {
            m.state.set_component(i, grad, g2, gstep);
        }
    }

    fn update_real(&self, index: usize, value: f64, is_const: bool) {
        let mut m = self.mutable.lock().expect("gradient job mutex poisoned");
        m.settings[index].value = value;
        m.settings[index].fixed = is_const;
        let transform = m.settings[index].transform();
        m.x_internal[index] = transform.ext2int(value);
    }

    fn clear_results(&self) {
        self.mutable
            .lock()
            .expect("gradient job mutex poisoned")
            .task_results
            .clear();
    }
}

impl Drop for GradientJob {
    fn drop(&mut self) {
        if let Some(&id) = self.job_id.get() {
            crate::job::registry::deregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_seeds_a_finite_gradient_state() {
        let objective: Arc<dyn Objective> = Arc::new(|x: &[f64]| x[0] * x[0]);
        let settings = vec![ParameterSettings::unbounded("x0", 3.0, 0.5)];
        let job = GradientJob::new(
            objective,
            settings,
            MinimizerOptions::default(),
            ManagerConfig::default(),
        )
        .unwrap();

        let mut grad = [0.0];
        job.fill_gradient(&mut grad);
        assert!(grad[0].is_finite());
    }

    #[test]
    fn evaluate_task_on_a_fixed_parameter_zeroes_its_triple() {
        let objective: Arc<dyn Objective> = Arc::new(|x: &[f64]| x[0] * x[0] + x[1] * x[1]);
        let mut settings = vec![
            ParameterSettings::unbounded("x0", 1.0, 0.1),
            ParameterSettings::unbounded("x1", 2.0, 0.1),
        ];
        settings[1].fixed = true;
        let job = GradientJob::new(
            objective,
            settings,
            MinimizerOptions::default(),
            ManagerConfig::default(),
        )
        .unwrap();

        job.evaluate_task(1);
        let mut g2 = [0.0, 0.0];
        job.fill_second_derivative(&mut g2);
        assert_eq!(g2[1], 0.0);
    }
}
