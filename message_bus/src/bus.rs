use crate::{
    channel::{AnyChannel, Channel},
    config::BusConfig,
    error::{BusError, BusResult},
    listener::{Listener, ListenerHandle},
    BusMessage, Message,
};
use parking_lot::RwLock;
use std::{
    any::{type_name, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};
use task_runner::{RunnerError, RunnerHandle, TaskRunner};
use tracing::{debug, warn};

type Registry = HashMap<TypeId, Box<dyn AnyChannel>>;

fn lookup<M: BusMessage>(channels: &Registry) -> Option<Arc<Channel<M>>> {
    channels
        .get(&TypeId::of::<M>())
        .and_then(|channel| channel.as_any().downcast_ref::<Arc<Channel<M>>>())
        .cloned()
}

struct BusInner {
    config: BusConfig,
    channels: RwLock<Registry>,
    // Dropped in declaration order: fan-out first, so the drains it submits still find their runner.
    dispatcher: TaskRunner,
    handler_runner: Option<TaskRunner>,
}

/// The publish/subscribe façade: one channel per message type, created on first use and kept
/// for the life of the bus, plus the runner(s) doing asynchronous delivery.
///
/// Cloning a `MessageBus` is cheap and every clone shares the same channels and runners. The
/// runners are shut down and joined when the last clone, and the last [`Listener`] created on
/// it, are dropped, or earlier through [`MessageBus::shutdown`].
///
/// Publishing synchronously from inside a handler is not supported when the fan-out would
/// reach a handler that is already running on the same thread (for instance a second message
/// type of the same [`MultiListener`](crate::MultiListener)): it deadlocks. The same goes for a
/// synchronous handler that touches the channel of its own message type: publishing it again,
/// subscribing or unsubscribing any listener of it, dropping a subscribed listener of it, or
/// calling [`MessageBus::subscriber_count`] for it.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Starts a bus with [`BusConfig::default`].
    pub fn new() -> BusResult<Self> {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> BusResult<Self> {
        let dispatcher = TaskRunner::new(config.dispatcher_name.clone())?;
        let handler_runner = if config.dedicated_handler_runner {
            Some(TaskRunner::new(config.handler_name.clone())?)
        } else {
            None
        };
        debug!(?config, "message bus started");
        Ok(Self {
            inner: Arc::new(BusInner {
                config,
                channels: RwLock::new(HashMap::new()),
                dispatcher,
                handler_runner,
            }),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Returns true if both values are clones of the same bus.
    pub fn same_bus(&self, other: &MessageBus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn channel<M: BusMessage>(&self) -> Arc<Channel<M>> {
        if let Some(channel) = lookup::<M>(&self.inner.channels.read()) {
            return channel;
        }
        let mut channels = self.inner.channels.write();
        if let Some(channel) = lookup::<M>(&channels) {
            return channel;
        }
        let channel = Arc::new(Channel::new());
        channels.insert(TypeId::of::<M>(), Box::new(Arc::clone(&channel)));
        debug!(message = type_name::<M>(), "channel created");
        channel
    }

    fn existing_channel<M: BusMessage>(&self) -> Option<Arc<Channel<M>>> {
        lookup::<M>(&self.inner.channels.read())
    }

    /// Creates the channel for `M` now rather than on first use.
    pub fn register<M: BusMessage>(&self) -> &Self {
        self.channel::<M>();
        self
    }

    /// Hands `message` to the dispatcher and returns. Every listener subscribed when the fan-out
    /// runs receives it. If the bus is shut down the message is dropped with a warning.
    pub fn publish_async<M: BusMessage>(&self, message: M) {
        self.publish_shared_async(Arc::new(message))
    }

    pub fn publish_shared_async<M: BusMessage>(&self, message: Message<M>) {
        if let Err(e) = self.try_publish_shared_async(message) {
            warn!("Asynchronous publish dropped: {e}");
        }
    }

    /// Like [`MessageBus::publish_async`], but reports a bus that no longer accepts messages.
    pub fn try_publish_async<M: BusMessage>(&self, message: M) -> BusResult<()> {
        self.try_publish_shared_async(Arc::new(message))
    }

    pub fn try_publish_shared_async<M: BusMessage>(&self, message: Message<M>) -> BusResult<()> {
        self.channel::<M>()
            .dispatch_async(&self.inner.dispatcher, message)
            .map_err(|e| match e {
                RunnerError::Stopped(_) => BusError::ShutDown(type_name::<M>()),
                e => e.into(),
            })
    }

    /// Handles `message` in every subscribed listener on the calling thread and returns once
    /// they all have. Works after shutdown too, it needs no runner.
    pub fn publish_sync<M: BusMessage>(&self, message: M) {
        self.publish_shared_sync(Arc::new(message))
    }

    pub fn publish_shared_sync<M: BusMessage>(&self, message: Message<M>) {
        self.channel::<M>().dispatch_sync(message)
    }

    /// Subscribes `listener`, same as `listener.set_subscription(true)`.
    ///
    /// A listener always subscribes on the bus it was created with. If that is another bus than
    /// `self`, the subscription still goes to the listener's own bus, `self` is left untouched,
    /// and a warning is logged.
    pub fn subscribe<M: BusMessage>(&self, listener: &Listener<M>) {
        if !self.same_bus(listener.bus()) {
            warn!(listener = %listener.id(), "Subscribing a listener that belongs to another bus");
        }
        listener.set_subscription(true)
    }

    /// Unsubscribes `listener`, same as `listener.set_subscription(false)`. Like
    /// [`MessageBus::subscribe`], this acts on the listener's own bus whatever `self` is.
    pub fn unsubscribe<M: BusMessage>(&self, listener: &Listener<M>) {
        listener.set_subscription(false)
    }

    pub(crate) fn add_subscriber<M: BusMessage>(&self, listener: ListenerHandle<M>) -> bool {
        self.channel::<M>().add_listener(listener)
    }

    pub(crate) fn remove_subscriber<M: BusMessage>(&self, listener: &ListenerHandle<M>) -> bool {
        self.existing_channel::<M>()
            .is_some_and(|channel| channel.remove_listener(listener))
    }

    /// Number of listeners currently subscribed to `M`.
    pub fn subscriber_count<M: BusMessage>(&self) -> usize {
        self.existing_channel::<M>()
            .map_or(0, |channel| channel.len())
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.read().len()
    }

    /// Type names of the messages that have a channel, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self
            .inner
            .channels
            .read()
            .values()
            .map(|channel| channel.message_type())
            .collect();
        types.sort_unstable();
        types
    }

    /// The runner on which listeners schedule their drain tasks.
    pub(crate) fn handler_runner(&self) -> RunnerHandle {
        self.inner
            .handler_runner
            .as_ref()
            .unwrap_or(&self.inner.dispatcher)
            .handle()
    }

    fn runners(&self) -> impl Iterator<Item = &TaskRunner> {
        std::iter::once(&self.inner.dispatcher).chain(self.inner.handler_runner.as_ref())
    }

    /// Returns true if no fan-out and no drain task is running or queued.
    pub fn is_idle(&self) -> bool {
        self.runners().all(|runner| runner.is_idle())
    }

    /// Blocks until every runner is idle at the same time, i.e. until everything published
    /// asynchronously so far has been handled. With publishers still active this may not return.
    ///
    /// Calling this from a handler deadlocks.
    pub fn wait_idle(&self) {
        loop {
            for runner in self.runners() {
                runner.wait_idle();
            }
            if self.is_idle() {
                break;
            }
        }
    }

    /// The asynchronous counterpart of [`MessageBus::wait_idle`].
    pub async fn flush(&self) {
        loop {
            for runner in self.runners() {
                // An error means the runner is stopped, which counts as idle.
                let _ = runner.flush().await;
            }
            if self.is_idle() {
                break;
            }
        }
    }

    /// Stops the runners after they have run what is queued, and joins them. Idempotent.
    /// Synchronous publishing keeps working afterwards; asynchronous publishing drops messages.
    pub fn shutdown(&self) -> BusResult<()> {
        let dispatcher = self.inner.dispatcher.shutdown();
        let handler = self
            .inner
            .handler_runner
            .as_ref()
            .map_or(Ok(()), |runner| runner.shutdown());
        debug!("message bus shut down");
        Ok(dispatcher.and(handler)?)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.dispatcher.is_stopped()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels = self.inner.channels.read();
        f.debug_struct("MessageBus")
            .field("config", &self.inner.config)
            .field(
                "subscribers",
                &channels
                    .values()
                    .map(|channel| (channel.message_type(), channel.subscriber_count()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handler;
    use parking_lot::Mutex;
    use std::thread;

    #[derive(Debug)]
    struct Tick(u64);
    #[derive(Debug)]
    struct Tock;

    struct ThreadNames(Arc<Mutex<Vec<Option<String>>>>);

    impl Handler<Tick> for ThreadNames {
        fn handle_message(&mut self, _: Message<Tick>) {
            self.0
                .lock()
                .push(thread::current().name().map(str::to_string));
        }
    }

    struct Sum(Arc<Mutex<u64>>);

    impl Handler<Tick> for Sum {
        fn handle_message(&mut self, message: Message<Tick>) {
            *self.0.lock() += message.0;
        }
    }

    #[test]
    fn test_channels_are_created_once_per_type() {
        let bus = MessageBus::new().unwrap();
        assert_eq!(bus.channel_count(), 0);

        bus.register::<Tick>().register::<Tick>();
        assert_eq!(bus.channel_count(), 1);

        bus.publish_sync(Tock);
        assert_eq!(bus.channel_count(), 2);
        assert!(Arc::ptr_eq(&bus.channel::<Tick>(), &bus.channel::<Tick>()));
        assert_eq!(bus.message_types().len(), 2);
    }

    #[test]
    fn test_unknown_type_has_no_subscribers() {
        let bus = MessageBus::new().unwrap();
        assert_eq!(bus.subscriber_count::<Tock>(), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = MessageBus::new().unwrap();
        bus.publish_sync(Tick(1));
        bus.try_publish_async(Tick(2)).unwrap();
        bus.flush().await;
        assert!(bus.is_idle());
    }

    #[tokio::test]
    async fn test_clones_share_channels() {
        let bus = MessageBus::new().unwrap();
        let total = Arc::new(Mutex::new(0));
        let listener = Listener::new(&bus, Sum(Arc::clone(&total)));
        bus.subscribe(&listener);

        let clone = bus.clone();
        assert!(clone.same_bus(&bus));
        assert_eq!(clone.subscriber_count::<Tick>(), 1);
        clone.publish_async(Tick(4));
        clone.publish_async(Tick(6));
        bus.flush().await;
        assert_eq!(*total.lock(), 10);

        bus.unsubscribe(&listener);
        assert_eq!(clone.subscriber_count::<Tick>(), 0);
    }

    #[test]
    fn test_subscribe_routes_to_the_listener_bus() {
        let home = MessageBus::new().unwrap();
        let elsewhere = MessageBus::new().unwrap();
        let total = Arc::new(Mutex::new(0));
        let listener = Listener::new(&home, Sum(Arc::clone(&total)));

        elsewhere.subscribe(&listener);
        assert!(listener.is_subscribed());
        assert_eq!(home.subscriber_count::<Tick>(), 1);
        assert_eq!(elsewhere.subscriber_count::<Tick>(), 0);

        elsewhere.publish_sync(Tick(1));
        home.publish_sync(Tick(2));
        assert_eq!(*total.lock(), 2);

        elsewhere.unsubscribe(&listener);
        assert_eq!(home.subscriber_count::<Tick>(), 0);
    }

    #[test]
    fn test_shutdown_stops_async_but_not_sync_publishing() {
        let bus = MessageBus::new().unwrap();
        let total = Arc::new(Mutex::new(0));
        let listener = Listener::new(&bus, Sum(Arc::clone(&total)));
        listener.set_subscription(true);

        bus.shutdown().unwrap();
        bus.shutdown().unwrap();
        assert!(bus.is_shut_down());

        assert!(matches!(
            bus.try_publish_async(Tick(1)),
            Err(BusError::ShutDown(_))
        ));
        bus.publish_async(Tick(2));
        bus.publish_sync(Tick(3));
        assert_eq!(*total.lock(), 3);
    }

    #[test]
    fn test_dedicated_handler_runner() {
        let config = BusConfig::default()
            .with_dispatcher_name("test-dispatch")
            .with_handler_name("test-handler")
            .with_dedicated_handler_runner(true);
        let bus = MessageBus::with_config(config).unwrap();
        let names = Arc::new(Mutex::new(Vec::new()));
        let listener = Listener::new(&bus, ThreadNames(Arc::clone(&names)));
        listener.set_subscription(true);

        bus.publish_async(Tick(1));
        bus.wait_idle();
        bus.publish_sync(Tick(2));

        assert_eq!(
            *names.lock(),
            vec![
                Some("test-handler".to_string()),
                thread::current().name().map(str::to_string),
            ]
        );
    }

    #[test]
    fn test_shared_runner_by_default() {
        let bus = MessageBus::new().unwrap();
        let names = Arc::new(Mutex::new(Vec::new()));
        let listener = Listener::new(&bus, ThreadNames(Arc::clone(&names)));
        listener.set_subscription(true);

        bus.publish_async(Tick(1));
        bus.wait_idle();
        assert_eq!(
            *names.lock(),
            vec![Some(crate::config::DEFAULT_DISPATCHER_NAME.to_string())]
        );
    }

    #[test]
    fn test_publish_shared_message() {
        let bus = MessageBus::new().unwrap();
        let total = Arc::new(Mutex::new(0));
        let first = Listener::new(&bus, Sum(Arc::clone(&total)));
        let second = Listener::new(&bus, Sum(Arc::clone(&total)));
        first.set_subscription(true);
        second.set_subscription(true);

        let message = Arc::new(Tick(5));
        bus.publish_shared_sync(Arc::clone(&message));
        bus.publish_shared_async(Arc::clone(&message));
        bus.wait_idle();

        assert_eq!(*total.lock(), 20);
        // Listeners release their references once handled.
        assert_eq!(Arc::strong_count(&message), 1);
    }
}
