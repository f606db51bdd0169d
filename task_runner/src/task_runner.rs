use crate::{
    errors::{RunnerError, RunnerResult},
    task::{BoxedTask, Runnable},
};
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    ops::Deref,
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};
use sync_tools::ConcurrentQueue;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

#[derive(Default)]
struct WorkerState {
    /// A task has been taken from the queue and has not returned yet.
    busy: bool,
    /// `shutdown` was requested: the worker finishes what is queued, then exits.
    closing: bool,
    /// The worker has exited, normally or by panic. Nothing will run anymore.
    stopped: bool,
    worker: Option<ThreadId>,
}

struct Shared {
    name: String,
    queue: ConcurrentQueue<BoxedTask>,
    state: Mutex<WorkerState>,
    have_task: Condvar,
    idle: Condvar,
}

impl Shared {
    /// Blocks until a task is available, or returns `None` once the runner is closing and the
    /// queue is empty.
    fn next_task(&self) -> Option<BoxedTask> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = self.queue.extract_first() {
                state.busy = true;
                return Some(task);
            }
            if state.closing {
                return None;
            }
            self.have_task.wait(&mut state);
        }
    }

    fn task_done(&self) {
        let mut state = self.state.lock();
        state.busy = false;
        if self.queue.is_empty() {
            self.idle.notify_all();
        }
    }
}

/// Marks the runner as stopped when the worker loop is left, whether it returned or a task
/// panicked. Tasks still queued at that point are dropped without being run.
struct WorkerExit<'a> {
    shared: &'a Shared,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.busy = false;
        }
        let discarded = self.shared.queue.clear();
        self.shared.idle.notify_all();
        if thread::panicking() {
            error!(
                runner = %self.shared.name,
                discarded,
                "a task panicked, the worker thread is going down"
            );
        } else {
            debug!(runner = %self.shared.name, "worker thread exited");
        }
    }
}

fn work(shared: Arc<Shared>) {
    shared.state.lock().worker = Some(thread::current().id());
    let _exit = WorkerExit { shared: &shared };
    while let Some(task) = shared.next_task() {
        task.run();
        shared.task_done();
    }
}

/// The submitting side of a [`TaskRunner`]. Cheap to clone; every clone feeds the same worker.
#[derive(Clone)]
pub struct RunnerHandle {
    shared: Arc<Shared>,
}

impl RunnerHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queues `task` and wakes the worker.
    ///
    /// Fails with [`RunnerError::Stopped`] once the worker is gone or a shutdown was requested, in
    /// which case `task` is dropped without running. The one exception is a task submitted from
    /// the worker thread itself during shutdown: the worker drains it like everything else queued.
    pub fn submit<T: Runnable>(&self, task: T) -> RunnerResult<()> {
        self.submit_boxed(Box::new(task))
    }

    pub fn submit_boxed(&self, task: BoxedTask) -> RunnerResult<()> {
        let state = self.shared.state.lock();
        let from_worker = state.worker == Some(thread::current().id());
        if state.stopped || (state.closing && !from_worker) {
            drop(state);
            drop(task);
            return Err(RunnerError::Stopped(self.shared.name.clone()));
        }
        self.shared.queue.push(task);
        self.shared.have_task.notify_one();
        Ok(())
    }

    /// Number of tasks waiting, not counting the one running.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Returns true if no task is running and none is queued.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        !state.busy && self.shared.queue.is_empty()
    }

    /// Returns true once the worker thread has exited.
    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Returns true when called from this runner's worker thread.
    pub fn is_worker_thread(&self) -> bool {
        self.shared.state.lock().worker == Some(thread::current().id())
    }

    /// Blocks the calling thread until the runner is idle or stopped.
    ///
    /// Calling this from a task running on the same runner deadlocks.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while !state.stopped && (state.busy || !self.shared.queue.is_empty()) {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Returns a receiver completed once every task submitted before this call has run.
    /// If the runner is stopped the receiver resolves to an error instead.
    pub fn flush(&self) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        if let Err(e) = self.submit(move || {
            let _ = sender.send(());
        }) {
            warn!("Flush rejected: {e}");
        }
        receiver
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closing = true;
        self.shared.have_task.notify_all();
    }
}

impl fmt::Debug for RunnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerHandle")
            .field("name", &self.shared.name)
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

/// Owns a worker thread that executes submitted tasks one at a time, in submission order.
///
/// The runner dereferences to its [`RunnerHandle`], so tasks can be submitted directly on it.
/// Hand out [`TaskRunner::handle`] clones to whoever else needs to submit.
///
/// Shutting down (explicitly or by dropping the runner) stops accepting tasks from other
/// threads, lets the worker run everything already queued, and joins it.
pub struct TaskRunner {
    handle: RunnerHandle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskRunner {
    /// Starts a runner whose worker thread is named `name`.
    pub fn new(name: impl Into<String>) -> RunnerResult<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            queue: ConcurrentQueue::new(),
            state: Mutex::new(WorkerState::default()),
            have_task: Condvar::new(),
            idle: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || work(shared))
                .map_err(|source| RunnerError::Spawn {
                    name: name.clone(),
                    source,
                })?
        };
        debug!(runner = %name, "worker thread started");
        Ok(Self {
            handle: RunnerHandle { shared },
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn handle(&self) -> RunnerHandle {
        self.handle.clone()
    }

    /// Stops the runner and joins its worker. Idempotent.
    ///
    /// Returns [`RunnerError::WorkerPanicked`] if a task brought the worker down. When called
    /// from the worker thread itself the join is skipped, the worker exits on its own after the
    /// current task.
    pub fn shutdown(&self) -> RunnerResult<()> {
        self.handle.close();
        let worker = self.worker.lock().take();
        match worker {
            None => Ok(()),
            Some(worker) if worker.thread().id() == thread::current().id() => {
                debug!(runner = %self.handle.name(), "shutdown from the worker thread, not joining");
                Ok(())
            }
            Some(worker) => worker
                .join()
                .map_err(|_| RunnerError::WorkerPanicked(self.handle.name().to_string())),
        }
    }
}

impl Deref for TaskRunner {
    type Target = RunnerHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to shut down the runner: {e}");
        }
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskRunner").field(&self.handle).finish()
    }
}
