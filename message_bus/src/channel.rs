use crate::{listener::ListenerHandle, BusMessage, Message};
use std::{
    any::{type_name, Any},
    sync::Arc,
};
use sync_tools::ConcurrentSet;
use task_runner::{RunnerHandle, RunnerResult};
use tracing::trace;

/// The registry and fan-out logic for one message type.
///
/// Fan-out visits the listeners under the registry's exclusive lock. A subscription change
/// issued during a fan-out waits for it, so a listener being removed is either visited with the
/// message or not at all. Two fan-outs never interleave either: every listener sees concurrently
/// dispatched messages in the same order.
///
/// A handler reached by a synchronous dispatch must not touch the registry of its own message
/// type (subscribe, unsubscribe, count subscribers): it deadlocks.
pub(crate) struct Channel<M: BusMessage> {
    listeners: ConcurrentSet<ListenerHandle<M>>,
}

impl<M: BusMessage> Channel<M> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: ConcurrentSet::new(),
        }
    }

    pub(crate) fn add_listener(&self, listener: ListenerHandle<M>) -> bool {
        self.listeners.insert(listener)
    }

    pub(crate) fn remove_listener(&self, listener: &ListenerHandle<M>) -> bool {
        self.listeners.remove(listener)
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Handles `message` in every current listener, on the calling thread, before returning.
    pub(crate) fn dispatch_sync(&self, message: Message<M>) {
        let visited = self.listeners.invoke_exclusive(|listeners| {
            listeners.fold(0usize, |visited, listener| {
                listener.receive_sync(Arc::clone(&message));
                visited + 1
            })
        });
        trace!(message = type_name::<M>(), visited, "synchronous dispatch");
    }

    /// Submits the fan-out of `message` to `runner` and returns without waiting for it.
    pub(crate) fn dispatch_async(
        self: &Arc<Self>,
        runner: &RunnerHandle,
        message: Message<M>,
    ) -> RunnerResult<()> {
        let channel = Arc::clone(self);
        runner.submit(move || channel.fan_out(message))
    }

    fn fan_out(&self, message: Message<M>) {
        let visited = self.listeners.invoke_exclusive(|listeners| {
            listeners.fold(0usize, |visited, listener| {
                listener.receive(Arc::clone(&message));
                visited + 1
            })
        });
        trace!(message = type_name::<M>(), visited, "asynchronous fan-out");
    }
}

/// Type-erased access to a `Channel<M>`, so channels of every type fit in one registry.
pub(crate) trait AnyChannel: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn subscriber_count(&self) -> usize;
    fn message_type(&self) -> &'static str;
}

impl<M: BusMessage> AnyChannel for Arc<Channel<M>> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriber_count(&self) -> usize {
        self.len()
    }

    fn message_type(&self) -> &'static str {
        type_name::<M>()
    }
}
