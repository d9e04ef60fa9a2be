//! End-to-end tests: a generic job driven across a real fork-based
//! worker pool, and the manager's lifecycle rules.
//!
//! The manager is a process-wide singleton, so these tests serialize on
//! `LOCK` rather than relying on `cargo test`'s default thread-per-test
//! parallelism, tearing down and recreating the manager within one
//! process.

use std::sync::{Arc, Mutex, OnceLock};

use mle_gradient::job::registry;
use mle_gradient::job::Job;
use mle_gradient::manager::Manager;
use mle_gradient::settings::ManagerConfig;

fn lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// `result[i] = x[i]^2 + b`, computed one task per index.
struct SquareJob {
    x: Vec<f64>,
    b: f64,
    results: Mutex<Vec<Option<f64>>>,
}

impl SquareJob {
    fn new(x: Vec<f64>, b: f64) -> Arc<SquareJob> {
        let n = x.len();
        Arc::new(SquareJob {
            x,
            b,
            results: Mutex::new(vec![None; n]),
        })
    }
}

impl Job for SquareJob {
    fn evaluate_task(&self, task_id: usize) {
        let value = self.x[task_id] * self.x[task_id] + self.b;
        self.results.lock().unwrap()[task_id] = Some(value);
    }

    fn send_back_task_result_from_worker(&self, task_id: usize) -> Vec<u8> {
        let value = self.results.lock().unwrap()[task_id].expect("evaluated before send-back");
        bincode::serialize(&value).unwrap()
    }

    fn receive_task_result_on_queue(&self, task_id: usize, bytes: Vec<u8>) {
        let value: f64 = bincode::deserialize(&bytes).unwrap();
        self.results.lock().unwrap()[task_id] = Some(value);
    }

    fn send_back_results_from_queue_to_master(&self) -> Vec<u8> {
        bincode::serialize(&*self.results.lock().unwrap()).unwrap()
    }

    fn receive_results_on_master(&self, bytes: &[u8]) {
        let results: Vec<Option<f64>> = bincode::deserialize(bytes).unwrap();
        *self.results.lock().unwrap() = results;
    }

    fn update_real(&self, _index: usize, _value: f64, _is_const: bool) {}

    fn clear_results(&self) {
        for slot in self.results.lock().unwrap().iter_mut() {
            *slot = None;
        }
    }
}

fn run_square_job(n_workers: usize) -> Vec<f64> {
    let manager = Manager::current_or_init(ManagerConfig {
        n_workers,
        pin_cpus: false,
        ring_capacity: 1 << 14,
    })
    .unwrap();

    let job = SquareJob::new(vec![0.0, 1.0, 2.0, 3.0], 3.0);
    let job_id = registry::register(job.clone() as Arc<dyn Job>);

    for task_id in 0..job.x.len() {
        manager.enqueue(job_id, task_id).unwrap();
    }
    manager.retrieve().unwrap();

    let results = job
        .results
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.expect("every task retrieved"))
        .collect();

    registry::deregister(job_id);
    manager.shutdown().unwrap();
    results
}

#[test]
fn task_manager_smoke_matches_expected_for_any_worker_count() {
    let _guard = lock().lock().unwrap();
    for n_workers in [1, 2, 3] {
        let results = run_square_job(n_workers);
        assert_eq!(results, vec![3.0, 4.0, 7.0, 12.0], "n_workers={n_workers}");
    }
}

#[test]
fn registering_a_second_job_before_activation_succeeds() {
    let _guard = lock().lock().unwrap();
    let manager = Manager::current_or_init(ManagerConfig::default()).unwrap();
    assert!(!manager.is_activated());

    let job_a = SquareJob::new(vec![1.0], 0.0);
    let job_b = SquareJob::new(vec![2.0], 0.0);
    let id_a = registry::register(job_a.clone() as Arc<dyn Job>);
    let id_b = registry::register(job_b.clone() as Arc<dyn Job>);
    assert_ne!(id_a, id_b);

    registry::deregister(id_a);
    registry::deregister(id_b);
}

#[test]
fn dropping_the_last_job_tears_the_manager_down_for_a_fresh_instance() {
    let _guard = lock().lock().unwrap();
    {
        let manager = Manager::current_or_init(ManagerConfig::default()).unwrap();
        let job = SquareJob::new(vec![5.0], 1.0);
        let id = registry::register(job.clone() as Arc<dyn Job>);
        manager.enqueue(id, 0).unwrap();
        manager.retrieve().unwrap();
        assert_eq!(job.results.lock().unwrap()[0], Some(26.0));
        registry::deregister(id);
        manager.shutdown().unwrap();
    }
    // The manager was held only by a `Weak` in the singleton slot and by
    // the `Arc` above, which just went out of scope; a fresh call
    // constructs a brand new instance rather than reusing a torn-down
    // one.
    let fresh = Manager::current_or_init(ManagerConfig::default()).unwrap();
    assert!(!fresh.is_activated());
}
