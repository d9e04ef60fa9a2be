use thiserror::Error;

/// Errors raised by the pipe transport (C1): framing, handshake, and the
/// underlying OS primitives that back a process-pair channel.
#[derive(Error, Debug)]
pub enum PipeError {
    #[error("io error on pipe: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("build-id mismatch at handshake: local={local:#x} peer={peer:#x}")]
    BuildIdMismatch { local: u64, peer: u64 },

    #[error("nix syscall failed: {0}")]
    Nix(#[from] nix::Error),
}

/// Errors raised by the task manager (C4): lifecycle and fatal protocol
/// conditions that abort the owning process.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("pipe error: {0}")]
    Pipe(#[from] PipeError),

    #[error("a job was registered after the manager was activated")]
    RegisteredAfterActivation,

    #[error("manager::current() called with no manager constructed in this process")]
    NoManagerConstructed,

    #[error("worker {worker_id} became unavailable: {reason}")]
    WorkerUnavailable { worker_id: usize, reason: String },

    #[error("unknown job id {0} referenced in a protocol message")]
    UnknownJob(usize),

    #[error("CPU affinity pinning failed, continuing without it: {0}")]
    Platform(String),

    #[error("child process returned a non-zero exit status on shutdown: {0}")]
    Shutdown(String),
}

/// Errors raised by the numerical gradient kernel (C3).
#[derive(Error, Debug)]
pub enum GradientError {
    #[error(
        "initial-gradient seeding produced dirin == 0 for parameter {param_index}; this should \
         be unreachable because gsmin > 0 bounds dirin from below"
    )]
    ZeroInitialStep { param_index: usize },

    #[error(
        "gradient state vectors have length {got}, expected {expected} (one entry per free \
         parameter)"
    )]
    StateLengthMismatch { got: usize, expected: usize },
}

/// Crate-wide error type, the union of every component's error enum.
///
/// Mirrors the two-tier `EqSysError` / `SolverError` split this crate is
/// descended from: each component keeps its own focused error enum, and
/// this top-level enum exists only to let call sites outside any single
/// component propagate with `?`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Pipe(#[from] PipeError),

    #[error("{0}")]
    Manager(#[from] ManagerError),

    #[error("{0}")]
    Gradient(#[from] GradientError),
}
