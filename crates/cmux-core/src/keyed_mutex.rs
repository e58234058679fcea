// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-key serialization primitive (spec §4.1). Operations tagged with the
//! same key run one at a time in FIFO order; operations on distinct keys run
//! concurrently. Used for per-workspace history appends, per-extension-
//! metadata writes, and anywhere a shared file is mutated.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

struct Entry {
    lock: AsyncMutex<()>,
    /// Count of callers that have claimed this entry (queued or holding the
    /// lock). Reaching zero means the entry can be garbage-collected.
    refs: AtomicUsize,
}

/// Serializes async operations by string key.
///
/// `tokio::sync::Mutex` is FIFO, so ordering within one key follows call
/// order. Entries are reference-counted and dropped from the map as soon as
/// no caller is waiting on or holding them, so the key space never grows
/// unbounded.
#[derive(Default)]
pub struct KeyedMutex {
    entries: StdMutex<HashMap<String, Arc<Entry>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self { entries: StdMutex::new(HashMap::new()) }
    }

    fn claim(&self, key: &str) -> Arc<Entry> {
        let mut entries = self.entries.lock().expect("keyed mutex map poisoned");
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Entry { lock: AsyncMutex::new(()), refs: AtomicUsize::new(0) }))
            .clone();
        entry.refs.fetch_add(1, Ordering::SeqCst);
        entry
    }

    fn release(&self, key: &str, entry: &Arc<Entry>) {
        if entry.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            // We may have just raced a fresh claim() that reinserted the same
            // key; only remove the map entry if it's still this exact Arc.
            let mut entries = self.entries.lock().expect("keyed mutex map poisoned");
            if let Some(current) = entries.get(key) {
                if Arc::ptr_eq(current, entry) {
                    entries.remove(key);
                }
            }
        }
    }

    /// Run `op` exclusively with respect to any other call on the same
    /// `key`. A panic inside `op` releases the lock (and decrements the
    /// refcount) before propagating, via unwind-safe `Drop` guards.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let entry = self.claim(key);
        let _guard = entry.lock.lock().await;
        let result = op().await;
        drop(_guard);
        self.release(key, &entry);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn distinct_keys_run_concurrently() {
        let km = Arc::new(KeyedMutex::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let km_a = km.clone();
        let order_a = order.clone();
        let a = tokio::spawn(async move {
            km_a.with_lock("a", || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                order_a.lock().unwrap().push("a");
            })
            .await;
        });

        let km_b = km.clone();
        let order_b = order.clone();
        let b = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            km_b.with_lock("b", || async {
                order_b.lock().unwrap().push("b");
            })
            .await;
        });

        let _ = tokio::join!(a, b);
        // "b" (short, independent key) finishes before "a" despite starting later.
        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn same_key_serializes_in_call_order() {
        let km = Arc::new(KeyedMutex::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let km1 = km.clone();
        let order1 = order.clone();
        let first = tokio::spawn(async move {
            km1.with_lock("shared", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                order1.lock().unwrap().push(1);
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;

        let km2 = km.clone();
        let order2 = order.clone();
        let second = tokio::spawn(async move {
            km2.with_lock("shared", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                order2.lock().unwrap().push(2);
            })
            .await;
        });

        let _ = tokio::join!(first, second);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn entry_is_garbage_collected_when_queue_empties() {
        let km = KeyedMutex::new();
        km.with_lock("k", || async {}).await;
        assert!(km.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panic_in_op_releases_lock_and_refcount() {
        let km = Arc::new(KeyedMutex::new());
        let km2 = km.clone();
        let handle = tokio::spawn(async move {
            km2.with_lock("k", || async { panic!("boom") }).await
        });
        let _ = handle.await; // JoinError — panic is caught by tokio's task boundary

        // Lock must be free and the entry GC'd despite the panic.
        assert!(km.entries.lock().unwrap().is_empty());
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        km.with_lock("k", || async move {
            counter2.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
