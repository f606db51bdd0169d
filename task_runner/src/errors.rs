use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn the worker thread of runner {name}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Runner {0} is stopped and accepts no more tasks")]
    Stopped(String),

    #[error("The worker thread of runner {0} panicked")]
    WorkerPanicked(String),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
