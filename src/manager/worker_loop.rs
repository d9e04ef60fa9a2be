//! The worker process's main loop. Each worker toggles between work-mode
//! (actively dequeuing and evaluating tasks) and idle-mode (only
//! processing state updates) based on `Q2W::SwitchWorkMode`.

use crate::error::ManagerError;
use crate::manager::messages::{Q2W, W2Q};
use crate::pipe::{framed, PipeTransport};

/// Entry point for the forked worker process. Never returns normally.
pub fn run(worker_id: usize, queue: PipeTransport) {
    if let Err(e) = run_inner(worker_id, queue) {
        log::error!("worker {worker_id} exiting on fatal error: {e}");
    }
}

fn run_inner(worker_id: usize, queue: PipeTransport) -> Result<(), ManagerError> {
    framed::handshake(&queue)?;
    let mut work_mode = true;

    loop {
        if work_mode {
            framed::send(&queue, &W2Q::Dequeue { worker_id })?;
            match framed::recv(&queue)? {
                Q2W::DequeueAccepted { job_id, task_id } => {
                    run_task(&queue, job_id, task_id)?;
                }
                Q2W::DequeueRejected => {
                    // Do not immediately re-send Dequeue -- that would busy
                    // spin against the queue whenever the FIFO is empty.
                    // Block for whatever the queue sends next instead.
                    if let Dispatch::Stop = block_for_next_message(&queue, &mut work_mode, worker_id)? {
                        return Ok(());
                    }
                }
                Q2W::Terminate => return Ok(()),
                other => apply_idle_message(&queue, &mut work_mode, other, worker_id)?,
            }
        } else if let Dispatch::Stop = block_for_next_message(&queue, &mut work_mode, worker_id)? {
            return Ok(());
        }
    }
}

enum Dispatch {
    Continue,
    Stop,
}

/// Blocks on the next message from the queue and dispatches it, without
/// issuing a `Dequeue` of our own. Used both for idle-mode's steady state
/// and for the work-mode `DequeueRejected` case, where re-polling must not
/// turn into spinning.
fn block_for_next_message(
    queue: &PipeTransport,
    work_mode: &mut bool,
    worker_id: usize,
) -> Result<Dispatch, ManagerError> {
    match framed::recv(queue)? {
        Q2W::Terminate => Ok(Dispatch::Stop),
        Q2W::DequeueAccepted { .. } | Q2W::DequeueRejected | Q2W::ResultReceived => {
            // Stale acknowledgement from before a mode switch or a prior
            // rejection; quietly consumed.
            Ok(Dispatch::Continue)
        }
        other => {
            apply_idle_message(queue, work_mode, other, worker_id)?;
            Ok(Dispatch::Continue)
        }
    }
}

fn run_task(queue: &PipeTransport, job_id: usize, task_id: usize) -> Result<(), ManagerError> {
    let job = crate::job::registry::lookup(job_id).ok_or(ManagerError::UnknownJob(job_id))?;
    job.evaluate_task(task_id);
    let result = job.send_back_task_result_from_worker(task_id);
    framed::send(queue, &W2Q::SendResult { job_id, task_id })?;
    framed::send_blob(queue, &result)?;
    match framed::recv(queue)? {
        Q2W::ResultReceived => Ok(()),
        other => Err(ManagerError::Pipe(crate::error::PipeError::Protocol(
            format!("expected ResultReceived handshake, got {other:?}"),
        ))),
    }
}

fn apply_idle_message(
    queue: &PipeTransport,
    work_mode: &mut bool,
    msg: Q2W,
    worker_id: usize,
) -> Result<(), ManagerError> {
    match msg {
        Q2W::UpdateReal {
            job_id,
            index,
            value,
            is_const,
        } => {
            let job = crate::job::registry::lookup(job_id).ok_or(ManagerError::UnknownJob(job_id))?;
            job.update_real(index, value, is_const);
        }
        Q2W::SwitchWorkMode { work_mode: new_mode } => {
            *work_mode = new_mode;
        }
        Q2W::CallDoubleConstMethod { job_id, key } => {
            let job = crate::job::registry::lookup(job_id).ok_or(ManagerError::UnknownJob(job_id))?;
            let value = job.call_double_const_method(&key);
            log::trace!("worker {worker_id} answered call_double_const_method({key}) = {value}");
            framed::send(queue, &value)?;
        }
        Q2W::Terminate | Q2W::DequeueAccepted { .. } | Q2W::DequeueRejected | Q2W::ResultReceived => {
            unreachable!("dequeue-class and terminate messages are handled by the caller")
        }
    }
    Ok(())
}
