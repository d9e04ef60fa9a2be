//! The queue process's main loop: owns the task FIFO and the per-round
//! completion counters, and is the sole process that ever touches
//! either.

use std::collections::{HashSet, VecDeque};

use crate::error::ManagerError;
use crate::manager::messages::{RetrievedJob, M2Q, Q2M, Q2W, W2Q};
use crate::pipe::{framed, poll_many, PipeTransport};

struct QueueState {
    fifo: VecDeque<(usize, usize)>,
    n_tasks: usize,
    n_completed: usize,
    touched_jobs: HashSet<usize>,
    dead_workers: HashSet<usize>,
}

/// Entry point for the forked queue process. Never returns normally; the
/// caller exits the process once this returns (on `Terminate` or on a
/// fatal error).
pub fn run(master: PipeTransport, workers: Vec<PipeTransport>) {
    if let Err(e) = run_inner(master, workers) {
        log::error!("queue process exiting on fatal error: {e}");
    }
}

fn run_inner(master: PipeTransport, workers: Vec<PipeTransport>) -> Result<(), ManagerError> {
    framed::handshake(&master)?;
    for worker in &workers {
        framed::handshake(worker)?;
    }

    let mut state = QueueState {
        fifo: VecDeque::new(),
        n_tasks: 0,
        n_completed: 0,
        touched_jobs: HashSet::new(),
        dead_workers: HashSet::new(),
    };

    loop {
        let mut refs: Vec<&PipeTransport> = Vec::with_capacity(workers.len() + 1);
        refs.push(&master);
        refs.extend(workers.iter());
        poll_many(&refs)?;

        if master.bytes_readable_nonblocking()? > 0 {
            let msg: M2Q = framed::recv(&master)?;
            log::trace!("queue dispatch from master: {msg:?}");
            if handle_m2q(msg, &master, &workers, &mut state)? {
                break;
            }
        }

        for (worker_id, worker) in workers.iter().enumerate() {
            if state.dead_workers.contains(&worker_id) {
                continue;
            }
            match worker.bytes_readable_nonblocking() {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) => {
                    mark_worker_dead(worker_id, ManagerError::from(e), &master, &mut state)?;
                    continue;
                }
            }
            if let Err(e) = handle_worker_message(worker_id, worker, &mut state) {
                mark_worker_dead(worker_id, e, &master, &mut state)?;
            }
        }
    }

    for (worker_id, worker) in workers.iter().enumerate() {
        if state.dead_workers.contains(&worker_id) {
            continue;
        }
        if let Err(e) = framed::send(worker, &Q2W::Terminate) {
            log::warn!("failed to send Terminate to worker {worker_id}: {e}");
        }
    }
    Ok(())
}

fn handle_worker_message(
    worker_id: usize,
    worker: &PipeTransport,
    state: &mut QueueState,
) -> Result<(), ManagerError> {
    let msg: W2Q = framed::recv(worker)?;
    log::trace!("queue dispatch from worker {worker_id}: {msg:?}");
    match msg {
        W2Q::Dequeue { .. } => {
            if let Some((job_id, task_id)) = state.fifo.pop_front() {
                framed::send(worker, &Q2W::DequeueAccepted { job_id, task_id })?;
            } else {
                framed::send(worker, &Q2W::DequeueRejected)?;
            }
        }
        W2Q::SendResult { job_id, task_id } => {
            let bytes = framed::recv_blob(worker)?;
            if let Some(job) = crate::job::registry::lookup(job_id) {
                job.receive_task_result_on_queue(task_id, bytes);
            } else {
                log::warn!("worker {worker_id} reported a result for unknown job {job_id}");
            }
            framed::send(worker, &Q2W::ResultReceived)?;
            state.n_completed += 1;
        }
    }
    Ok(())
}

fn mark_worker_dead(
    worker_id: usize,
    cause: ManagerError,
    master: &PipeTransport,
    state: &mut QueueState,
) -> Result<(), ManagerError> {
    log::error!("worker {worker_id} pipe failed, marking unavailable: {cause}");
    state.dead_workers.insert(worker_id);
    framed::send(master, &Q2M::WorkerFailed { worker_id })?;
    Ok(())
}

fn handle_m2q(
    msg: M2Q,
    master: &PipeTransport,
    workers: &[PipeTransport],
    state: &mut QueueState,
) -> Result<bool, ManagerError> {
    match msg {
        M2Q::Terminate => return Ok(true),
        M2Q::Enqueue { job_id, task_id } => {
            state.fifo.push_back((job_id, task_id));
            state.n_tasks += 1;
            state.touched_jobs.insert(job_id);
        }
        M2Q::Retrieve => {
            if state.fifo.is_empty() && state.n_completed == state.n_tasks {
                framed::send(master, &Q2M::RetrieveAccepted)?;
                let job_ids: Vec<usize> = state.touched_jobs.iter().copied().collect();
                framed::send(master, &job_ids.len())?;
                for job_id in job_ids {
                    let job = crate::job::registry::lookup(job_id);
                    let bytes = job
                        .as_ref()
                        .map(|j| j.send_back_results_from_queue_to_master())
                        .unwrap_or_default();
                    framed::send(master, &RetrievedJob { job_id, bytes })?;
                    if let Some(job) = job {
                        job.clear_results();
                    }
                }
                state.n_tasks = 0;
                state.n_completed = 0;
                state.touched_jobs.clear();
            } else {
                framed::send(master, &Q2M::RetrieveRejected)?;
            }
        }
        M2Q::UpdateReal {
            job_id,
            index,
            value,
            is_const,
        } => {
            for worker in workers {
                framed::send(
                    worker,
                    &Q2W::UpdateReal {
                        job_id,
                        index,
                        value,
                        is_const,
                    },
                )?;
            }
        }
        M2Q::SwitchWorkMode { work_mode } => {
            for worker in workers {
                framed::send(worker, &Q2W::SwitchWorkMode { work_mode })?;
            }
        }
        M2Q::CallDoubleConstMethod {
            job_id,
            worker_id,
            key,
        } => {
            let worker = workers.get(worker_id).ok_or_else(|| ManagerError::WorkerUnavailable {
                worker_id,
                reason: "no such worker index".to_string(),
            })?;
            framed::send(worker, &Q2W::CallDoubleConstMethod { job_id, key })?;
            let value: f64 = framed::recv(worker)?;
            framed::send(master, &value)?;
        }
    }
    Ok(false)
}
