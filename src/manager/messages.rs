//! The four message alphabets exchanged between master, queue, and worker
//! processes. All four are plain `serde`-derived enums sent through
//! [`crate::pipe::framed`].

use serde::{Deserialize, Serialize};

/// Master → Queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum M2Q {
    Terminate,
    Enqueue {
        job_id: usize,
        task_id: usize,
    },
    Retrieve,
    UpdateReal {
        job_id: usize,
        index: usize,
        value: f64,
        is_const: bool,
    },
    SwitchWorkMode {
        work_mode: bool,
    },
    CallDoubleConstMethod {
        job_id: usize,
        worker_id: usize,
        key: String,
    },
}

/// Queue → Master.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Q2M {
    RetrieveAccepted,
    RetrieveRejected,
    /// A worker's pipe reported EOF or an error on `poll`. Sent on the
    /// master pipe as soon as the queue notices, surfaced to the caller
    /// of `Manager::retrieve` as `ManagerError::WorkerUnavailable`.
    WorkerFailed { worker_id: usize },
}

/// Worker → Queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum W2Q {
    Dequeue { worker_id: usize },
    SendResult { job_id: usize, task_id: usize },
}

/// Queue → Worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Q2W {
    Terminate,
    DequeueAccepted {
        job_id: usize,
        task_id: usize,
    },
    DequeueRejected,
    UpdateReal {
        job_id: usize,
        index: usize,
        value: f64,
        is_const: bool,
    },
    SwitchWorkMode {
        work_mode: bool,
    },
    CallDoubleConstMethod {
        job_id: usize,
        key: String,
    },
    ResultReceived,
}

/// One job's retrieved results, as streamed by the queue in response to a
/// successful `Retrieve`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievedJob {
    pub job_id: usize,
    pub bytes: Vec<u8>,
}
