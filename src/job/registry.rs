//! The process-wide job registry: `job_id -> Weak<dyn Job>`, plus the
//! monotonic counter that assigns ids. Jobs register before the manager is
//! activated; after `fork`, every process inherits an identical replica
//! built from the same sequence of registrations.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use super::Job;

pub type JobId = usize;

struct Registry {
    next_id: JobId,
    jobs: Vec<(JobId, Weak<dyn Job>)>,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            next_id: 0,
            jobs: Vec::new(),
        })
    })
}

/// Registers `job` and returns its assigned id. The manager rejects this
/// call once it has activated (`Error::RegisteredAfterActivation`).
pub fn register(job: Arc<dyn Job>) -> JobId {
    let mut reg = registry().lock().expect("job registry mutex poisoned");
    let id = reg.next_id;
    reg.next_id += 1;
    reg.jobs.push((id, Arc::downgrade(&job)));
    log::info!("job {id} registered");
    id
}

/// Removes `job_id` from the registry. Called when a job is dropped; if
/// this empties the registry, the manager tears itself down.
pub fn deregister(job_id: JobId) {
    let mut reg = registry().lock().expect("job registry mutex poisoned");
    reg.jobs.retain(|(id, _)| *id != job_id);
    log::info!("job {job_id} deregistered");
}

/// Looks up a live job by id. Returns `None` if the job has been dropped
/// or the id was never registered -- both surface to the caller as
/// `Error::UnknownJob`.
pub fn lookup(job_id: JobId) -> Option<Arc<dyn Job>> {
    let reg = registry().lock().expect("job registry mutex poisoned");
    reg.jobs
        .iter()
        .find(|(id, _)| *id == job_id)
        .and_then(|(_, weak)| weak.upgrade())
}

/// The number of currently-live registered jobs. `0` means the manager
/// should tear down.
pub fn live_count() -> usize {
    let reg = registry().lock().expect("job registry mutex poisoned");
    reg.jobs.iter().filter(|(_, w)| w.strong_count() > 0).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopJob;
    impl Job for NoopJob {
        fn evaluate_task(&self, _task_id: usize) {}
        fn send_back_task_result_from_worker(&self, _task_id: usize) -> Vec<u8> {
            Vec::new()
        }
        fn receive_task_result_on_queue(&self, _task_id: usize, _bytes: Vec<u8>) {}
        fn send_back_results_from_queue_to_master(&self) -> Vec<u8> {
            Vec::new()
        }
        fn receive_results_on_master(&self, _bytes: &[u8]) {}
        fn update_real(&self, _index: usize, _value: f64, _is_const: bool) {}
        fn clear_results(&self) {}
    }

    #[test]
    fn registering_and_dropping_a_job_updates_live_count() {
        let job: Arc<dyn Job> = Arc::new(NoopJob);
        let id = register(job.clone());
        assert!(lookup(id).is_some());
        drop(job);
        assert!(lookup(id).is_none());
        deregister(id);
    }
}
