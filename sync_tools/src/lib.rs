//! # Sync Tools
//! Small building blocks for sharing state between threads.
//!
//! - [`ConcurrentSet`]: a hash set where every operation runs under the set's lock,
//!   with scoped traversal that keeps the set stable while the closure runs.
//! - [`ConcurrentQueue`]: a FIFO where every operation runs under the queue's lock
//!   and extraction never blocks on an empty queue.
//! - [`Wrapped`] / [`wrap!`]: the `Arc<Mutex<T>>` shorthand.
//!
//! ```rust
//! use sync_tools::{ConcurrentQueue, ConcurrentSet};
//!
//! let set = ConcurrentSet::new();
//! assert!(set.insert(1));
//! assert!(!set.insert(1));
//! assert_eq!(set.invoke(|members| members.count()), 1);
//!
//! let queue = ConcurrentQueue::new();
//! queue.push("first");
//! queue.push("second");
//! assert_eq!(queue.extract_first(), Some("first"));
//! ```

mod macros;
/// The lock-guarded FIFO.
pub mod queue;
/// The lock-guarded hash set.
pub mod set;

use std::sync::Arc;

pub use parking_lot::Mutex;
pub use queue::ConcurrentQueue;
pub use set::ConcurrentSet;

pub type Wrapped<T> = Arc<Mutex<T>>;
