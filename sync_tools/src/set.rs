use std::{
    collections::{hash_set::Iter, HashSet},
    fmt,
    hash::Hash,
};

use parking_lot::RwLock;

/// A hash set shared between threads. Every operation takes the set's lock for its whole
/// duration: mutations take it exclusively, reads take it shared.
///
/// Traversal goes through [`ConcurrentSet::invoke`] (read-only view) or
/// [`ConcurrentSet::invoke_mut`] (mutating view). The lock is held for as long as the closure
/// runs and is released on every exit path, unwinding included, so an insert or remove issued
/// by another thread during a traversal waits for the traversal to end instead of being seen
/// half-way.
pub struct ConcurrentSet<T> {
    members: RwLock<HashSet<T>>,
}

impl<T: Eq + Hash> Default for ConcurrentSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> ConcurrentSet<T> {
    /// Returns an empty set.
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashSet::new()),
        }
    }

    /// Inserts `value`. Returns `false` if it was already present, in which case the set is unchanged.
    pub fn insert(&self, value: T) -> bool {
        self.members.write().insert(value)
    }

    /// Removes `value`. Returns `false` if it was not present.
    pub fn remove(&self, value: &T) -> bool {
        self.members.write().remove(value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.members.read().contains(value)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn clear(&self) {
        self.members.write().clear()
    }

    /// Runs `func` over the members while holding the lock shared. Concurrent traversals may
    /// overlap; inserts and removes wait until every traversal in progress has returned.
    ///
    /// `func` must not call back into a mutating method of the same set, that would deadlock.
    pub fn invoke<R>(&self, func: impl FnOnce(Iter<'_, T>) -> R) -> R {
        let members = self.members.read();
        func(members.iter())
    }

    /// Runs `func` over the members while holding the lock exclusively: traversals of the same
    /// set never overlap, so two of them visit the members in the same relative order.
    ///
    /// `func` must not call back into any method of the same set, that would deadlock.
    pub fn invoke_exclusive<R>(&self, func: impl FnOnce(Iter<'_, T>) -> R) -> R {
        let members = self.members.write();
        func(members.iter())
    }

    /// Runs `func` with exclusive access to the underlying set.
    pub fn invoke_mut<R>(&self, func: impl FnOnce(&mut HashSet<T>) -> R) -> R {
        let mut members = self.members.write();
        func(&mut members)
    }
}

impl<T: Eq + Hash + Clone> ConcurrentSet<T> {
    /// Copies the current members out, so they can be visited without holding the lock.
    pub fn snapshot(&self) -> Vec<T> {
        self.invoke(|members| members.cloned().collect())
    }
}

impl<T> fmt::Debug for ConcurrentSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentSet")
            .field("len", &self.members.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Barrier,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn test_insert_is_idempotent() {
        let set = ConcurrentSet::new();
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&"a"));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let set = ConcurrentSet::new();
        set.insert(1);
        assert!(!set.remove(&2));
        assert!(set.remove(&1));
        assert!(!set.remove(&1));
        assert!(set.is_empty());
    }

    #[test]
    fn test_concurrent_inserts_keep_one_copy() {
        let set = Arc::new(ConcurrentSet::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for value in 0..100 {
                        set.insert(value);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(set.len(), 100);
    }

    #[test]
    fn test_invoke_blocks_concurrent_insert() {
        let set = Arc::new(ConcurrentSet::new());
        set.insert(1);
        let entered = Arc::new(Barrier::new(2));
        let inserted = Arc::new(AtomicBool::new(false));

        let writer = {
            let set = Arc::clone(&set);
            let entered = Arc::clone(&entered);
            let inserted = Arc::clone(&inserted);
            thread::spawn(move || {
                entered.wait();
                set.insert(2);
                inserted.store(true, Ordering::SeqCst);
            })
        };

        set.invoke(|members| {
            entered.wait();
            thread::sleep(Duration::from_millis(50));
            assert!(!inserted.load(Ordering::SeqCst));
            assert_eq!(members.count(), 1);
        });

        writer.join().unwrap();
        assert!(inserted.load(Ordering::SeqCst));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_invoke_exclusive_blocks_other_traversals() {
        let set = Arc::new(ConcurrentSet::new());
        set.insert(1);
        let entered = Arc::new(Barrier::new(2));
        let traversed = Arc::new(AtomicBool::new(false));

        let reader = {
            let set = Arc::clone(&set);
            let entered = Arc::clone(&entered);
            let traversed = Arc::clone(&traversed);
            thread::spawn(move || {
                entered.wait();
                set.invoke(|members| members.count());
                traversed.store(true, Ordering::SeqCst);
            })
        };

        set.invoke_exclusive(|members| {
            entered.wait();
            thread::sleep(Duration::from_millis(50));
            assert!(!traversed.load(Ordering::SeqCst));
            assert_eq!(members.count(), 1);
        });

        reader.join().unwrap();
        assert!(traversed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invoke_mut_and_snapshot() {
        let set = ConcurrentSet::new();
        for value in 0..5 {
            set.insert(value);
        }
        let kept = set.invoke_mut(|members| {
            members.retain(|value| value % 2 == 0);
            members.len()
        });
        assert_eq!(kept, 3);

        let mut snapshot = set.snapshot();
        snapshot.sort();
        assert_eq!(snapshot, vec![0, 2, 4]);
    }

    #[test]
    fn test_lock_released_after_panic() {
        let set = Arc::new(ConcurrentSet::new());
        set.insert(1);
        let panicking = Arc::clone(&set);
        let result = thread::spawn(move || panicking.invoke(|_| panic!("traversal failed"))).join();
        assert!(result.is_err());
        assert!(set.insert(2));
    }
}
