//! # Message Bus
//!
//! An in-process publish/subscribe bus. Messages are routed by their Rust type: every message
//! type gets its own channel, and a [`Listener<M>`] receives the messages of type `M` once it is
//! subscribed.
//!
//! Publishing comes in two flavors:
//! - [`MessageBus::publish_sync`] handles the message in every subscribed listener on the
//!   calling thread before returning.
//! - [`MessageBus::publish_async`] returns immediately. A background runner fans the message out
//!   to the subscribed listeners, and each listener handles its queue in arrival order, one
//!   message at a time.
//!
//! # Examples
//!
//! ```rust
//! use message_bus::{Handler, Listener, Message, MessageBus};
//! use std::sync::{
//!     atomic::{AtomicU64, Ordering},
//!     Arc,
//! };
//!
//! struct Deposit(u64);
//!
//! struct Balance(Arc<AtomicU64>);
//!
//! impl Handler<Deposit> for Balance {
//!     fn handle_message(&mut self, message: Message<Deposit>) {
//!         self.0.fetch_add(message.0, Ordering::SeqCst);
//!     }
//! }
//!
//! let bus = MessageBus::new().unwrap();
//! let balance = Arc::new(AtomicU64::new(0));
//! let listener = Listener::new(&bus, Balance(Arc::clone(&balance)));
//! listener.set_subscription(true);
//!
//! bus.publish_sync(Deposit(10));
//! assert_eq!(balance.load(Ordering::SeqCst), 10);
//!
//! bus.publish_async(Deposit(5));
//! bus.wait_idle();
//! assert_eq!(balance.load(Ordering::SeqCst), 15);
//! ```
//! ## Modules
//! This crate is organized into the following modules:

use std::sync::Arc;

/// Contains the `MessageBus`, the channel registry and the publishing entry points.
pub mod bus;

/// Per message type registry of subscribed listeners and the fan-out over it.
pub(crate) mod channel;

/// Runner setup of a bus.
pub mod config;

/// Contains the error types of the bus.
pub mod error;

/// Contains `Listener`, the per type subscriber with its queue and drain pass, and the
/// `Handler` trait consumers implement.
///
/// ### Key Types:
/// - `Handler<M>`: what the consumer implements for each message type it accepts.
/// - `Listener<M>`: connects one handler to the channel of `M`.
/// - `ListenerId`: identifies a listener in logs.
pub mod listener;

/// One handler object listening to several message types.
pub mod multi_listener;

pub use bus::MessageBus;
pub use config::{BusConfig, DEFAULT_DISPATCHER_NAME, DEFAULT_HANDLER_NAME};
pub use error::{BusError, BusResult};
pub use listener::{Handler, Listener, ListenerId, SharedHandler};
pub use multi_listener::{MultiListener, MultiListenerBuilder};

/// A published message. Every listener it reaches shares the same allocation; the message is
/// freed once the last of them has handled it.
pub type Message<M> = Arc<M>;

/// Anything that can travel on the bus.
pub trait BusMessage: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> BusMessage for T {}
