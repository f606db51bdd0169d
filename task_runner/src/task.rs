/// A unit of work for a [`TaskRunner`](crate::TaskRunner). Running consumes the task.
///
/// The runner does not catch panics: a task that panics takes the worker thread down with it,
/// and the runner stops. Tasks are expected to handle their own faults.
pub trait Runnable: Send + 'static {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send + 'static> Runnable for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

pub type BoxedTask = Box<dyn Runnable>;
