use crate::{bus::MessageBus, BusMessage, Message};
use parking_lot::{Condvar, Mutex};
use std::{
    any::type_name,
    fmt,
    hash::{Hash, Hasher},
    ptr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use sync_tools::ConcurrentQueue;
use task_runner::RunnerHandle;
use tracing::{debug, trace, warn};

/// The capability a consumer implements once per message type it listens to.
///
/// `handle_message` is only ever called by a drain pass or by synchronous delivery, never
/// concurrently for the same handler object. It should not panic: a panic raised on a runner
/// thread stops that runner.
pub trait Handler<M>: Send + 'static {
    fn handle_message(&mut self, message: Message<M>);
}

/// A handler behind a lock, shareable by several listeners (see [`MultiListener`](crate::MultiListener)).
pub type SharedHandler<M> = Arc<Mutex<dyn Handler<M>>>;

/// Identifies a listener in logs. Unique within the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Who currently holds the in-flight guard.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Drain {
    /// A drain task was submitted to the runner; it is queued or running there.
    Scheduled,
    /// A caller of [`Listener::drain`] is running the pass on its own thread.
    Inline,
}

#[derive(Default)]
struct Gate {
    draining: Option<Drain>,
    /// Set once the owning `Listener` is being destroyed. Nothing is handled after that.
    closed: bool,
}

/// The part of a listener shared with its channel and with in-flight drain tasks.
///
/// Every transition of the in-flight guard happens under `gate`, together with the inbox
/// operation it depends on: a push and its claim in `receive`, an empty pop and the release in
/// `next_or_release`. A message can therefore never be left queued with nobody draining.
pub(crate) struct ListenerCore<M: BusMessage> {
    id: ListenerId,
    inbox: ConcurrentQueue<Message<M>>,
    gate: Mutex<Gate>,
    released: Condvar,
    handler: SharedHandler<M>,
    runner: RunnerHandle,
}

impl<M: BusMessage> ListenerCore<M> {
    fn handle(&self, message: Message<M>) {
        self.handler.lock().handle_message(message)
    }

    fn claim(self: &Arc<Self>, gate: &mut Gate, kind: Drain) -> DrainClaim<M> {
        gate.draining = Some(kind);
        DrainClaim {
            core: Arc::clone(self),
            armed: true,
        }
    }

    pub(crate) fn receive(self: &Arc<Self>, message: Message<M>) {
        let claim = {
            let mut gate = self.gate.lock();
            if gate.closed {
                return;
            }
            self.inbox.push(message);
            if gate.draining.is_some() {
                return;
            }
            self.claim(&mut gate, Drain::Scheduled)
        };
        // On failure the closure is dropped, and the claim with it, which releases the guard.
        if let Err(e) = self.runner.submit(move || {
            claim.drain();
        }) {
            warn!(listener = %self.id, "Drain not scheduled, messages stay queued: {e}");
        }
    }

    pub(crate) fn receive_sync(&self, message: Message<M>) {
        if self.gate.lock().closed {
            return;
        }
        self.handle(message)
    }

    fn enqueue(&self, message: Message<M>) {
        let gate = self.gate.lock();
        if !gate.closed {
            self.inbox.push(message);
        }
    }

    fn drain_inline(self: &Arc<Self>) -> usize {
        let claim = {
            let mut gate = self.gate.lock();
            if gate.closed || gate.draining.is_some() {
                return 0;
            }
            self.claim(&mut gate, Drain::Inline)
        };
        claim.drain()
    }

    /// Pops the next message, or releases the guard if there is none left (or the listener is
    /// closing). Both outcomes are decided under the gate.
    fn next_or_release(&self) -> Option<Message<M>> {
        let mut gate = self.gate.lock();
        if !gate.closed {
            if let Some(message) = self.inbox.extract_first() {
                return Some(message);
            }
        }
        gate.draining = None;
        self.released.notify_all();
        None
    }

    fn release(&self) {
        let mut gate = self.gate.lock();
        gate.draining = None;
        self.released.notify_all();
    }

    fn is_draining(&self) -> bool {
        self.gate.lock().draining.is_some()
    }

    /// Stops all further handling and waits for a drain pass in progress to finish.
    /// Returns the number of queued messages discarded.
    fn close(&self) -> usize {
        // A drain scheduled on the runner we are running on cannot be in progress: it sits
        // behind the current task, and will release without handling once it sees `closed`.
        let on_runner = self.runner.is_worker_thread();
        self.gate.lock().closed = true;
        let discarded = self.inbox.clear();

        let mut gate = self.gate.lock();
        while let Some(kind) = gate.draining {
            if kind == Drain::Scheduled && on_runner {
                break;
            }
            self.released.wait(&mut gate);
        }
        discarded
    }
}

/// Ownership of a listener's in-flight guard for one drain pass.
///
/// Dropping an armed claim releases the guard. That covers the drain task being dropped without
/// running (runner stopped) and a handler panicking mid-pass.
struct DrainClaim<M: BusMessage> {
    core: Arc<ListenerCore<M>>,
    armed: bool,
}

impl<M: BusMessage> DrainClaim<M> {
    fn drain(mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.core.next_or_release() {
            self.core.handle(message);
            handled += 1;
        }
        // `next_or_release` already released the guard.
        self.armed = false;
        trace!(listener = %self.core.id, handled, "drain pass finished");
        handled
    }
}

impl<M: BusMessage> Drop for DrainClaim<M> {
    fn drop(&mut self) {
        if self.armed {
            self.core.release();
        }
    }
}

/// The identity under which a listener is stored in its channel. Equality is identity of the
/// listener, not of anything it holds.
pub(crate) struct ListenerHandle<M: BusMessage>(Arc<ListenerCore<M>>);

impl<M: BusMessage> ListenerHandle<M> {
    pub(crate) fn receive(&self, message: Message<M>) {
        self.0.receive(message)
    }

    pub(crate) fn receive_sync(&self, message: Message<M>) {
        self.0.receive_sync(message)
    }
}

impl<M: BusMessage> Clone for ListenerHandle<M> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<M: BusMessage> PartialEq for ListenerHandle<M> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<M: BusMessage> Eq for ListenerHandle<M> {}

impl<M: BusMessage> Hash for ListenerHandle<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ptr::hash(Arc::as_ptr(&self.0), state)
    }
}

/// A subscriber's end of the bus for one message type `M`.
///
/// A listener owns a private FIFO of received messages and hands them to its [`Handler`] one at
/// a time. It starts unsubscribed; [`Listener::set_subscription`] registers it with the bus's
/// channel for `M`.
///
/// Messages reach the handler in three ways:
/// - asynchronously ([`Listener::receive`], or an asynchronous publish): the message is queued
///   and, unless a drain pass is already in flight, a drain task is scheduled on the bus runner;
/// - synchronously ([`Listener::receive_sync`], or a synchronous publish): handled right away on
///   the caller's thread;
/// - manually ([`Listener::enqueue`] then [`Listener::drain`]): the caller runs the drain pass.
///
/// At most one drain pass per listener is in flight at any time, and it preserves arrival order.
///
/// Dropping a listener unsubscribes it, discards what is still queued, and blocks until a drain
/// pass in progress has finished. Once `drop` returns the handler is never called again.
/// Like [`Listener::set_subscription`], dropping a subscribed listener from inside a synchronous
/// handler of the same message type deadlocks.
pub struct Listener<M: BusMessage> {
    core: Arc<ListenerCore<M>>,
    /// Serializes subscription changes.
    toggle: Mutex<()>,
    subscribed: AtomicBool,
    bus: MessageBus,
}

impl<M: BusMessage> Listener<M> {
    /// Returns an unsubscribed listener delivering to `handler`.
    pub fn new<H: Handler<M>>(bus: &MessageBus, handler: H) -> Self {
        Self::with_shared_handler(bus, Arc::new(Mutex::new(handler)))
    }

    /// Returns an unsubscribed listener delivering to a handler that may be shared with other
    /// listeners. Calls into a shared handler are serialized by its lock.
    pub fn with_shared_handler(bus: &MessageBus, handler: SharedHandler<M>) -> Self {
        Self {
            core: Arc::new(ListenerCore {
                id: ListenerId::next(),
                inbox: ConcurrentQueue::new(),
                gate: Mutex::new(Gate::default()),
                released: Condvar::new(),
                handler,
                runner: bus.handler_runner(),
            }),
            toggle: Mutex::new(()),
            subscribed: AtomicBool::new(false),
            bus: bus.clone(),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.core.id
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Subscribes to, or unsubscribes from, the channel for `M`. Does nothing if the listener is
    /// already in the requested state.
    ///
    /// A change waits for any fan-out of `M` in progress to finish. Changing the subscription of
    /// any listener of `M` from inside a synchronous handler of `M` therefore deadlocks.
    pub fn set_subscription(&self, subscribe: bool) {
        let _toggle = self.toggle.lock();
        if self.subscribed.load(Ordering::Acquire) == subscribe {
            return;
        }
        if subscribe {
            self.bus.add_subscriber(self.handle());
        } else {
            self.bus.remove_subscriber(&self.handle());
        }
        self.subscribed.store(subscribe, Ordering::Release);
        debug!(
            listener = %self.core.id,
            message = type_name::<M>(),
            subscribed = subscribe,
            "subscription changed"
        );
    }

    /// Never waits, not even on a subscription change in progress: that change is reported once
    /// it has been applied to the channel.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Queues `message` and makes sure a drain pass will handle it. Works whether or not the
    /// listener is subscribed.
    pub fn receive(&self, message: Message<M>) {
        self.core.receive(message)
    }

    /// Handles `message` on the calling thread, bypassing the queue.
    pub fn receive_sync(&self, message: Message<M>) {
        self.core.receive_sync(message)
    }

    /// Queues `message` without scheduling anything. It is handled by the next drain pass,
    /// whoever runs it.
    pub fn enqueue(&self, message: Message<M>) {
        self.core.enqueue(message)
    }

    /// Runs a drain pass on the calling thread and returns the number of messages handled.
    /// Returns 0 immediately if another pass is already in flight.
    pub fn drain(&self) -> usize {
        self.core.drain_inline()
    }

    /// Pops the oldest queued message without handling it.
    pub fn extract_first_unhandled(&self) -> Option<Message<M>> {
        self.core.inbox.extract_first()
    }

    pub fn has_unhandled(&self) -> bool {
        !self.core.inbox.is_empty()
    }

    /// Number of queued, not yet handled, messages.
    pub fn pending(&self) -> usize {
        self.core.inbox.len()
    }

    /// Discards every queued message and returns how many there were.
    pub fn reset_queue(&self) -> usize {
        self.core.inbox.clear()
    }

    /// Returns true while a drain pass holds the in-flight guard.
    pub fn is_draining(&self) -> bool {
        self.core.is_draining()
    }

    pub(crate) fn handle(&self) -> ListenerHandle<M> {
        ListenerHandle(Arc::clone(&self.core))
    }
}

impl<M: BusMessage> Drop for Listener<M> {
    fn drop(&mut self) {
        self.set_subscription(false);
        let discarded = self.core.close();
        debug!(listener = %self.core.id, discarded, "listener destroyed");
    }
}

impl<M: BusMessage> fmt::Debug for Listener<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.core.id)
            .field("message", &type_name::<M>())
            .field("subscribed", &self.is_subscribed())
            .field("pending", &self.pending())
            .finish()
    }
}
