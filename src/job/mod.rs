//! The job abstraction: the capability set a type must implement to
//! be driven by the task manager, plus the process-wide registry that
//! assigns and looks up `job_id`s.

pub mod gradient_job;
pub mod registry;

pub use registry::JobId;

/// A unit of work the manager can dispatch tasks to and collect results
/// from. A job is registered once, before the manager is ever activated,
/// and is addressed everywhere else purely by its `job_id`.
///
/// Every method takes `&self`: a job's interior state (e.g. a gradient
/// job's `GradientState`) is mutated through interior mutability so the
/// same `Arc<dyn Job>` can be shared between the registry and the
/// caller's own handle.
pub trait Job: Send + Sync {
    /// Runs this job's unit of work for `task_id` on a worker and stores
    /// the result internally for `send_back_task_result_from_worker`.
    fn evaluate_task(&self, task_id: usize);

    /// Serializes the result of `evaluate_task(task_id)` for transmission
    /// from a worker to the queue.
    fn send_back_task_result_from_worker(&self, task_id: usize) -> Vec<u8>;

    /// Deserializes and stores a task result the queue received from a
    /// worker, keyed by `task_id`.
    fn receive_task_result_on_queue(&self, task_id: usize, bytes: Vec<u8>);

    /// Serializes every task result accumulated on the queue, for
    /// transmission to the master during `Retrieve`.
    fn send_back_results_from_queue_to_master(&self) -> Vec<u8>;

    /// Deserializes results received on the master and makes them
    /// available to the job's owner.
    fn receive_results_on_master(&self, bytes: &[u8]);

    /// Applies a parameter update broadcast from the master.
    fn update_real(&self, index: usize, value: f64, is_const: bool);

    /// Drops all accumulated per-task results, in preparation for the
    /// next round of `enqueue`/`retrieve`.
    fn clear_results(&self);

    /// Answers a named, job-specific constant-valued query from a
    /// worker (`M2Q::CallDoubleConstMethod`). Not part of the core
    /// contract every job needs; jobs with no such accessors can leave
    /// the default.
    fn call_double_const_method(&self, _key: &str) -> f64 {
        0.0
    }
}
