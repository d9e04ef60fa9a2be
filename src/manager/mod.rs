//! The task manager: a master process, one queue process, and N worker
//! processes, connected by the pipe transport built before `fork`. A
//! process-wide singleton: at most one `Manager` exists per process,
//! constructed lazily on first job registration and torn down when the
//! last job is dropped.

pub mod master;
pub mod messages;
pub mod queue_loop;
pub mod worker_loop;

use std::sync::{Arc, Mutex, OnceLock, Weak};

use nix::unistd::{fork, ForkResult, Pid};

use crate::error::{ManagerError, PipeError};
use crate::pipe::ring::RingHalf;
use crate::pipe::socketpair::SocketPairHalf;
use crate::pipe::PipeTransport;
use crate::settings::ManagerConfig;

static MANAGER: OnceLock<Mutex<Weak<Manager>>> = OnceLock::new();

fn slot() -> &'static Mutex<Weak<Manager>> {
    MANAGER.get_or_init(|| Mutex::new(Weak::new()))
}

enum ActivationState {
    Pending {
        /// The queue's end of the master<->queue pipe, held until
        /// `activate` forks the queue process.
        queue_side_of_master: Option<SocketPairHalf>,
    },
    Activated {
        worker_pids: Vec<Pid>,
        queue_pid: Pid,
    },
}

/// The process-wide task manager.
pub struct Manager {
    config: ManagerConfig,
    master_pipe: PipeTransport,
    activation: Mutex<ActivationState>,
}

impl Manager {
    /// Returns the existing manager singleton, or constructs one with
    /// `config` if none exists. The first caller's configuration is the
    /// one that takes effect, created lazily on first job registration;
    /// later callers simply get the existing instance.
    pub fn current_or_init(config: ManagerConfig) -> Result<Arc<Manager>, ManagerError> {
        let mut guard = slot().lock().expect("manager slot mutex poisoned");
        if let Some(existing) = guard.upgrade() {
            return Ok(existing);
        }
        let manager = Arc::new(Manager::new(config)?);
        *guard = Arc::downgrade(&manager);
        Ok(manager)
    }

    /// Returns the existing manager singleton. Fails with
    /// `ManagerError::NoManagerConstructed` if no job has registered one
    /// yet, or every job has since been dropped.
    pub fn current() -> Result<Arc<Manager>, ManagerError> {
        slot()
            .lock()
            .expect("manager slot mutex poisoned")
            .upgrade()
            .ok_or(ManagerError::NoManagerConstructed)
    }

    fn new(config: ManagerConfig) -> Result<Manager, ManagerError> {
        let (master_side, queue_side_of_master) = SocketPairHalf::pair()?;
        Ok(Manager {
            config,
            master_pipe: PipeTransport::Socket(master_side),
            activation: Mutex::new(ActivationState::Pending {
                queue_side_of_master: Some(queue_side_of_master),
            }),
        })
    }

    pub fn config(&self) -> ManagerConfig {
        self.config
    }

    pub fn is_activated(&self) -> bool {
        matches!(
            *self.activation.lock().expect("activation mutex poisoned"),
            ActivationState::Activated { .. }
        )
    }

    fn ensure_activated(&self) -> Result<(), ManagerError> {
        if self.is_activated() {
            Ok(())
        } else {
            self.activate()
        }
    }

    /// Forks every worker, then the queue, in that order. Idempotent: a
    /// manager that is already activated returns `Ok(())` immediately.
    /// All pipes must have been constructed before
    /// this point so every child inherits exactly the ends it needs.
    pub fn activate(&self) -> Result<(), ManagerError> {
        let mut state = self.activation.lock().expect("activation mutex poisoned");
        let queue_side_of_master = match &mut *state {
            ActivationState::Activated { .. } => return Ok(()),
            ActivationState::Pending {
                queue_side_of_master,
            } => queue_side_of_master
                .take()
                .expect("queue-side-of-master pipe consumed more than once"),
        };

        let n_workers = self.config.n_workers;
        let ring_capacity = self.config.ring_capacity;
        let pin_cpus = self.config.pin_cpus;
        log::debug!("activating manager: n_workers={n_workers} pin_cpus={pin_cpus}");

        let mut queue_sides_of_workers = Vec::with_capacity(n_workers);
        let mut worker_pids = Vec::with_capacity(n_workers);

        for worker_id in 0..n_workers {
            let (worker_side, queue_side) =
                RingHalf::pair(ring_capacity).map_err(ManagerError::Pipe)?;
            match unsafe { fork() }.map_err(PipeError::Nix)? {
                ForkResult::Child => {
                    if pin_cpus {
                        pin_self_to_cpu(worker_id);
                    }
                    worker_loop::run(worker_id, PipeTransport::Ring(worker_side));
                    std::process::exit(0);
                }
                ForkResult::Parent { child } => {
                    worker_pids.push(child);
                    queue_sides_of_workers.push(queue_side);
                }
            }
        }

        match unsafe { fork() }.map_err(PipeError::Nix)? {
            ForkResult::Child => {
                if pin_cpus {
                    pin_self_to_cpu(n_workers);
                }
                queue_loop::run(PipeTransport::Socket(queue_side_of_master), queue_sides_of_workers);
                std::process::exit(0);
            }
            ForkResult::Parent { child: queue_pid } => {
                if pin_cpus {
                    pin_self_to_cpu(n_workers + 1);
                }
                crate::pipe::framed::handshake(&self.master_pipe).map_err(ManagerError::Pipe)?;
                log::info!("manager activated: {n_workers} workers, queue pid {queue_pid}");
                *state = ActivationState::Activated {
                    worker_pids,
                    queue_pid,
                };
                Ok(())
            }
        }
    }
}

impl Drop for Manager {
    /// Best-effort shutdown when the last strong reference to the
    /// manager goes away. Jobs hold an `Arc<Manager>`, so dropping the
    /// last job drops the last strong reference here, and the manager
    /// tears itself down without the caller having to remember to call
    /// `shutdown` explicitly.
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("manager teardown on drop failed: {e}");
        }
    }
}

#[cfg(target_os = "linux")]
fn pin_self_to_cpu(cpu: usize) {
    use nix::sched::{sched_setaffinity, CpuSet};
    let mut set = CpuSet::new();
    if let Err(e) = set.set(cpu) {
        log::warn!("{}", ManagerError::Platform(format!("cpu {cpu}: {e}")));
        return;
    }
    if let Err(e) = sched_setaffinity(Pid::from_raw(0), &set) {
        log::warn!("{}", ManagerError::Platform(format!("cpu {cpu}: {e}")));
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_self_to_cpu(_cpu: usize) {}
