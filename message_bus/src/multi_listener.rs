use crate::{
    bus::MessageBus,
    listener::{Handler, Listener, SharedHandler},
    BusMessage, Message,
};
use std::{
    any::{type_name, Any, TypeId},
    fmt,
};
use sync_tools::{wrap, Wrapped};

/// What a [`MultiListener`] needs from each of its listeners, whatever the message type.
trait ErasedListener: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn message_type(&self) -> &'static str;
    fn set_subscription(&self, subscribe: bool);
    fn is_subscribed(&self) -> bool;
    fn pending(&self) -> usize;
    fn reset_queue(&self) -> usize;
    fn drain(&self) -> usize;
}

impl<M: BusMessage> ErasedListener for Listener<M> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn message_type(&self) -> &'static str {
        type_name::<M>()
    }

    fn set_subscription(&self, subscribe: bool) {
        Listener::set_subscription(self, subscribe)
    }

    fn is_subscribed(&self) -> bool {
        Listener::is_subscribed(self)
    }

    fn pending(&self) -> usize {
        Listener::pending(self)
    }

    fn reset_queue(&self) -> usize {
        Listener::reset_queue(self)
    }

    fn drain(&self) -> usize {
        Listener::drain(self)
    }
}

struct Entry {
    type_id: TypeId,
    listener: Box<dyn ErasedListener>,
}

/// Builds a [`MultiListener`], one [`MultiListenerBuilder::listen`] call per message type.
pub struct MultiListenerBuilder<H> {
    bus: MessageBus,
    handler: Wrapped<H>,
    entries: Vec<Entry>,
}

impl<H: Send + 'static> MultiListenerBuilder<H> {
    /// Adds a listener for `M`. Listening twice to the same type adds nothing.
    pub fn listen<M: BusMessage>(mut self) -> Self
    where
        H: Handler<M>,
    {
        if self.entries.iter().any(|entry| entry.type_id == TypeId::of::<M>()) {
            return self;
        }
        let handler: SharedHandler<M> = self.handler.clone();
        self.entries.push(Entry {
            type_id: TypeId::of::<M>(),
            listener: Box::new(Listener::with_shared_handler(&self.bus, handler)),
        });
        self
    }

    /// Returns the multi-listener with every listener unsubscribed.
    pub fn build(self) -> MultiListener<H> {
        MultiListener {
            handler: self.handler,
            entries: self.entries,
        }
    }

    /// Returns the multi-listener with every listener already subscribed.
    pub fn build_subscribed(self) -> MultiListener<H> {
        let multi = self.build();
        multi.set_all_subscriptions(true);
        multi
    }
}

/// One handler object receiving several message types, each through its own [`Listener`].
///
/// The listeners share the handler behind a single lock, so the handler is never entered by two
/// of them at once, while each type keeps its own queue, drain pass and subscription.
///
/// ```rust
/// use message_bus::{Handler, Message, MessageBus, MultiListener};
///
/// struct Started(u32);
/// struct Stopped(u32);
///
/// #[derive(Default)]
/// struct Running(Vec<u32>);
///
/// impl Handler<Started> for Running {
///     fn handle_message(&mut self, message: Message<Started>) {
///         self.0.push(message.0);
///     }
/// }
///
/// impl Handler<Stopped> for Running {
///     fn handle_message(&mut self, message: Message<Stopped>) {
///         self.0.retain(|id| *id != message.0);
///     }
/// }
///
/// let bus = MessageBus::new().unwrap();
/// let running = MultiListener::builder(&bus, Running::default())
///     .listen::<Started>()
///     .listen::<Stopped>()
///     .build_subscribed();
///
/// bus.publish_sync(Started(1));
/// bus.publish_sync(Started(2));
/// bus.publish_sync(Stopped(1));
/// assert_eq!(running.handler().lock().0, vec![2]);
/// ```
pub struct MultiListener<H> {
    handler: Wrapped<H>,
    entries: Vec<Entry>,
}

impl<H: Send + 'static> MultiListener<H> {
    pub fn builder(bus: &MessageBus, handler: H) -> MultiListenerBuilder<H> {
        MultiListenerBuilder {
            bus: bus.clone(),
            handler: wrap!(handler),
            entries: Vec::new(),
        }
    }
}

impl<H> MultiListener<H> {
    /// The handler shared by every listener. Holding its lock holds up their deliveries.
    pub fn handler(&self) -> &Wrapped<H> {
        &self.handler
    }

    /// The listener for `M`, if this multi-listener was built to listen to `M`.
    pub fn listener<M: BusMessage>(&self) -> Option<&Listener<M>> {
        self.entries
            .iter()
            .find(|entry| entry.type_id == TypeId::of::<M>())
            .and_then(|entry| entry.listener.as_any().downcast_ref::<Listener<M>>())
    }

    pub fn listens_to<M: BusMessage>(&self) -> bool {
        self.listener::<M>().is_some()
    }

    /// Toggles the subscription for `M`. Returns false if there is no listener for `M`.
    pub fn set_subscription<M: BusMessage>(&self, subscribe: bool) -> bool {
        match self.listener::<M>() {
            Some(listener) => {
                listener.set_subscription(subscribe);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed<M: BusMessage>(&self) -> bool {
        self.listener::<M>()
            .is_some_and(|listener| listener.is_subscribed())
    }

    pub fn set_all_subscriptions(&self, subscribe: bool) {
        for entry in &self.entries {
            entry.listener.set_subscription(subscribe);
        }
    }

    /// Queues `message` on the listener for `M`. Returns false if there is none.
    pub fn receive<M: BusMessage>(&self, message: Message<M>) -> bool {
        self.listener::<M>()
            .map(|listener| listener.receive(message))
            .is_some()
    }

    /// Handles `message` on the calling thread. Returns false if there is no listener for `M`.
    pub fn receive_sync<M: BusMessage>(&self, message: Message<M>) -> bool {
        self.listener::<M>()
            .map(|listener| listener.receive_sync(message))
            .is_some()
    }

    /// Queued messages over all listeners.
    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.listener.pending())
            .sum()
    }

    /// Discards every queued message of every listener and returns how many there were.
    pub fn reset_all_queues(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.listener.reset_queue())
            .sum()
    }

    /// Runs a drain pass for each listener in turn, on the calling thread.
    pub fn drain_all(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.listener.drain())
            .sum()
    }

    pub fn message_types(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .map(|entry| entry.listener.message_type())
            .collect()
    }

    /// Type names of the messages currently subscribed to.
    pub fn subscribed_types(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|entry| entry.listener.is_subscribed())
            .map(|entry| entry.listener.message_type())
            .collect()
    }
}

impl<H> Drop for MultiListener<H> {
    fn drop(&mut self) {
        // Every type leaves the bus before any listener starts waiting on its drain.
        self.set_all_subscriptions(false);
    }
}

impl<H> fmt::Debug for MultiListener<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiListener")
            .field("handler", &type_name::<H>())
            .field("message_types", &self.message_types())
            .field("subscribed", &self.subscribed_types())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Join(&'static str);
    #[derive(Debug)]
    struct Leave(&'static str);
    #[derive(Debug)]
    struct Unrelated;

    #[derive(Default)]
    struct Roster {
        members: Vec<&'static str>,
        events: usize,
    }

    impl Handler<Join> for Roster {
        fn handle_message(&mut self, message: Message<Join>) {
            self.members.push(message.0);
            self.events += 1;
        }
    }

    impl Handler<Leave> for Roster {
        fn handle_message(&mut self, message: Message<Leave>) {
            self.members.retain(|member| *member != message.0);
            self.events += 1;
        }
    }

    fn roster(bus: &MessageBus) -> MultiListener<Roster> {
        MultiListener::builder(bus, Roster::default())
            .listen::<Join>()
            .listen::<Leave>()
            .build()
    }

    #[tokio::test]
    async fn test_each_type_handled_once() {
        let bus = MessageBus::new().unwrap();
        let multi = roster(&bus);
        multi.set_all_subscriptions(true);

        bus.publish_async(Join("ada"));
        bus.publish_async(Join("bob"));
        bus.flush().await;
        bus.publish_async(Leave("ada"));
        bus.flush().await;

        let handler = multi.handler().lock();
        assert_eq!(handler.members, vec!["bob"]);
        assert_eq!(handler.events, 3);
    }

    #[test]
    fn test_subscriptions_per_type() {
        let bus = MessageBus::new().unwrap();
        let multi = roster(&bus);
        assert!(!multi.is_subscribed::<Join>());

        assert!(multi.set_subscription::<Join>(true));
        assert!(multi.is_subscribed::<Join>());
        assert!(!multi.is_subscribed::<Leave>());
        assert_eq!(bus.subscriber_count::<Join>(), 1);
        assert_eq!(bus.subscriber_count::<Leave>(), 0);

        bus.publish_sync(Join("ada"));
        bus.publish_sync(Leave("ada"));
        assert_eq!(multi.handler().lock().members, vec!["ada"]);

        assert_eq!(multi.subscribed_types(), vec![type_name::<Join>()]);

        multi.set_all_subscriptions(true);
        assert_eq!(bus.subscriber_count::<Leave>(), 1);
        assert_eq!(multi.subscribed_types().len(), 2);
        drop(multi);
        assert_eq!(bus.subscriber_count::<Join>(), 0);
        assert_eq!(bus.subscriber_count::<Leave>(), 0);
    }

    #[test]
    fn test_unknown_type() {
        let bus = MessageBus::new().unwrap();
        let multi = roster(&bus);
        assert!(!multi.listens_to::<Unrelated>());
        assert!(multi.listener::<Unrelated>().is_none());
        assert!(!multi.set_subscription::<Unrelated>(true));
        assert!(!multi.receive_sync(Arc::new(Unrelated)));
        assert_eq!(bus.subscriber_count::<Unrelated>(), 0);
    }

    #[test]
    fn test_listening_twice_adds_one_listener() {
        let bus = MessageBus::new().unwrap();
        let multi = MultiListener::builder(&bus, Roster::default())
            .listen::<Join>()
            .listen::<Join>()
            .build_subscribed();
        assert_eq!(multi.message_types().len(), 1);
        assert_eq!(bus.subscriber_count::<Join>(), 1);
    }

    #[test]
    fn test_manual_queues() {
        let bus = MessageBus::new().unwrap();
        let multi = roster(&bus);
        let join = multi.listener::<Join>().unwrap();
        let leave = multi.listener::<Leave>().unwrap();

        join.enqueue(Arc::new(Join("ada")));
        join.enqueue(Arc::new(Join("bob")));
        leave.enqueue(Arc::new(Leave("ada")));
        assert_eq!(multi.pending(), 3);

        assert_eq!(multi.drain_all(), 3);
        assert_eq!(multi.handler().lock().members, vec!["bob"]);

        join.enqueue(Arc::new(Join("eve")));
        leave.enqueue(Arc::new(Leave("bob")));
        assert_eq!(multi.reset_all_queues(), 2);
        assert_eq!(multi.drain_all(), 0);
        assert_eq!(multi.handler().lock().events, 3);
    }
}
