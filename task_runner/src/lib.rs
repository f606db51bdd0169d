//! # Task Runner
//! A background task runner owning exactly one worker thread.
//! Tasks run one at a time, in submission order. While its queue is empty the worker is
//! suspended on a condition variable, it never spins.
//!
//! ```rust
//! use task_runner::TaskRunner;
//!
//! let runner = TaskRunner::new("doc-runner").unwrap();
//! runner.submit(|| println!("hello from the worker")).unwrap();
//! runner.wait_idle();
//! runner.shutdown().unwrap();
//! ```

/// This module contains error handling types.
pub mod errors;
/// Contains the trait definitions for tasks.
pub mod task;
/// The implementation of the runner.
pub mod task_runner;

pub use errors::{RunnerError, RunnerResult};
pub use task::{BoxedTask, Runnable};
pub use task_runner::{RunnerHandle, TaskRunner};
