//! The master-side protocols: `enqueue`, `retrieve`, and `shutdown`. All
//! three activate the manager on first use, so a job never has to call
//! `Manager::activate` itself.

use super::messages::{M2Q, Q2M, RetrievedJob};
use super::Manager;
use crate::error::ManagerError;
use crate::pipe::framed;

impl Manager {
    /// Appends `(job_id, task_id)` to the queue's FIFO. No reply is
    /// expected.
    pub fn enqueue(&self, job_id: usize, task_id: usize) -> Result<(), ManagerError> {
        self.ensure_activated()?;
        framed::send(&self.master_pipe, &M2Q::Enqueue { job_id, task_id })?;
        Ok(())
    }

    /// Broadcasts a parameter update to every worker via the queue.
    pub fn update_real(
        &self,
        job_id: usize,
        index: usize,
        value: f64,
        is_const: bool,
    ) -> Result<(), ManagerError> {
        self.ensure_activated()?;
        framed::send(
            &self.master_pipe,
            &M2Q::UpdateReal {
                job_id,
                index,
                value,
                is_const,
            },
        )?;
        Ok(())
    }

    /// Broadcasts a work-mode switch to every worker.
    pub fn switch_work_mode(&self, work_mode: bool) -> Result<(), ManagerError> {
        self.ensure_activated()?;
        framed::send(&self.master_pipe, &M2Q::SwitchWorkMode { work_mode })?;
        Ok(())
    }

    /// Asks a specific worker to evaluate a named double-returning const
    /// method and relays the result back.
    pub fn call_double_const_method(
        &self,
        job_id: usize,
        worker_id: usize,
        key: impl Into<String>,
    ) -> Result<f64, ManagerError> {
        self.ensure_activated()?;
        framed::send(
            &self.master_pipe,
            &M2Q::CallDoubleConstMethod {
                job_id,
                worker_id,
                key: key.into(),
            },
        )?;
        Ok(framed::recv(&self.master_pipe)?)
    }

    /// Blocks until every enqueued task has completed, then drains every
    /// registered job's accumulated results. Retries on
    /// `RetrieveRejected`; the queue only answers `RetrieveAccepted` once
    /// its FIFO is empty and every task has been reported complete, so no
    /// sleep or backoff is needed between retries.
    pub fn retrieve(&self) -> Result<(), ManagerError> {
        self.ensure_activated()?;
        loop {
            framed::send(&self.master_pipe, &M2Q::Retrieve)?;
            match framed::recv(&self.master_pipe)? {
                Q2M::RetrieveRejected => continue,
                Q2M::RetrieveAccepted => break,
                Q2M::WorkerFailed { worker_id } => {
                    return Err(ManagerError::WorkerUnavailable {
                        worker_id,
                        reason: "pipe to worker reported EOF or an error".to_string(),
                    })
                }
            }
        }

        let n_jobs: usize = framed::recv(&self.master_pipe)?;
        for _ in 0..n_jobs {
            let retrieved: RetrievedJob = framed::recv(&self.master_pipe)?;
            let job = crate::job::registry::lookup(retrieved.job_id)
                .ok_or(ManagerError::UnknownJob(retrieved.job_id))?;
            job.receive_results_on_master(&retrieved.bytes);
        }
        Ok(())
    }

    /// Tells the queue to stop, waits for it and every worker to exit,
    /// and logs (rather than propagates) a non-zero exit status -- a
    /// lingering child should not prevent the caller's own teardown.
    pub fn shutdown(&self) -> Result<(), ManagerError> {
        let (worker_pids, queue_pid) = {
            let state = self.activation.lock().expect("activation mutex poisoned");
            match &*state {
                super::ActivationState::Pending { .. } => return Ok(()),
                super::ActivationState::Activated {
                    worker_pids,
                    queue_pid,
                } => (worker_pids.clone(), *queue_pid),
            }
        };

        log::info!("shutting down manager: {} workers, queue pid {queue_pid}", worker_pids.len());
        framed::send(&self.master_pipe, &M2Q::Terminate)?;

        reap(queue_pid, "queue");
        for pid in worker_pids {
            reap(pid, "worker");
        }
        Ok(())
    }
}

fn reap(pid: nix::unistd::Pid, label: &str) {
    use nix::sys::wait::WaitStatus;
    match crate::pipe::close_and_wait(pid) {
        Ok(WaitStatus::Exited(_, 0)) => {}
        Ok(status) => log::warn!(
            "{}",
            ManagerError::Shutdown(format!("{label} process {pid} exited abnormally: {status:?}"))
        ),
        Err(e) => log::warn!(
            "{}",
            ManagerError::Shutdown(format!("failed to reap {label} process {pid}: {e}"))
        ),
    }
}
