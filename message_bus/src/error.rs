use task_runner::RunnerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("The bus runner failed: {0}")]
    Runner(#[from] RunnerError),

    /// Returned by the `try_publish_*` variants once the bus has been shut down.
    #[error("The bus is shut down, message of type {0} dropped")]
    ShutDown(&'static str),
}

pub type BusResult<T> = Result<T, BusError>;
