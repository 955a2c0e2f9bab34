// src/rwlock.rs

//! Writer-priority reader/writer exclusion primitive.
//!
//! Multiple readers may hold the lock concurrently. A writer excludes
//! every reader and every other writer. Once a writer is waiting, new
//! readers are blocked until all writers currently queued have drained —
//! starving readers under sustained write pressure is the accepted
//! tradeoff (spec favors this over the inverse). Every wait is bounded
//! so a caller polling a shutdown flag alongside the lock never blocks
//! past the 1 s ceiling.
//!
//! This is deliberately not a thin wrapper over `tokio::sync::RwLock`:
//! that type does not promise writer priority. The gate/fence pattern
//! here mirrors the two-lock-plus-gate design called for when the
//! target runtime's stock lock is reader-preferring or unfair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tokio::time::Duration;

const POLL_BOUND: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Gate {
    /// Count of writers currently waiting or holding the lock. While
    /// nonzero, new readers must wait at the fence.
    waiting_writers: AtomicUsize,
}

/// Writer-priority RWLock. Call [`RwLock::read_acquire`] /
/// [`RwLock::read_release`] around read-only access, and
/// [`RwLock::write_acquire`] / [`RwLock::write_release`] around
/// mutating access. There is no RAII guard by design — the contract
/// names four explicit operations (§4.A), matching callers that must
/// interleave the acquire/release around non-lexical scopes such as a
/// whole iteration loop that mutates as it goes.
pub struct RwLock {
    /// Serializes writers against each other and against the last
    /// reader to leave. `Arc`-wrapped so a held guard can outlive the
    /// borrow of `self` across the write_acquire/write_release pair.
    writer: Arc<Mutex<()>>,
    /// Tracks the number of readers currently holding the lock.
    readers: Mutex<usize>,
    /// Signaled whenever the reader count transitions to zero.
    readers_drained: Notify,
    /// Signaled whenever the fence reopens for readers.
    fence_opened: Notify,
    gate: Gate,
    /// Holds the writer-lock guard between write_acquire and
    /// write_release so release can find it again without re-locking.
    held: Mutex<Option<OwnedMutexGuard<()>>>,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            writer: Arc::new(Mutex::new(())),
            readers: Mutex::new(0),
            readers_drained: Notify::new(),
            fence_opened: Notify::new(),
            gate: Gate::default(),
            held: Mutex::new(None),
        }
    }

    fn fence_open(&self) -> bool {
        self.gate.waiting_writers.load(Ordering::Acquire) == 0
    }

    /// Acquire for reading. Blocks while a writer holds or is waiting
    /// for the lock; each wait is bounded to [`POLL_BOUND`] so a caller
    /// racing a shutdown signal never stalls longer than that.
    pub async fn read_acquire(&self) {
        loop {
            if self.fence_open() {
                let mut count = self.readers.lock().await;
                if self.fence_open() {
                    *count += 1;
                    return;
                }
            }
            let _ = tokio::time::timeout(POLL_BOUND, self.fence_opened.notified()).await;
        }
    }

    pub async fn read_release(&self) {
        let mut count = self.readers.lock().await;
        *count -= 1;
        if *count == 0 {
            self.readers_drained.notify_waiters();
        }
    }

    /// Acquire for writing: shuts the fence so no further readers are
    /// admitted, then waits for currently-held reads to drain.
    pub async fn write_acquire(&self) {
        self.gate.waiting_writers.fetch_add(1, Ordering::AcqRel);
        let guard = self.writer.clone().lock_owned().await;
        loop {
            let count = *self.readers.lock().await;
            if count == 0 {
                break;
            }
            let _ = tokio::time::timeout(POLL_BOUND, self.readers_drained.notified()).await;
        }
        *self.held.lock().await = Some(guard);
    }

    pub async fn write_release(&self) {
        self.gate.waiting_writers.fetch_sub(1, Ordering::AcqRel);
        self.fence_opened.notify_waiters();
        let guard = self.held.lock().await.take();
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn concurrent_readers_allowed() {
        let lock = Arc::new(RwLock::new());
        lock.read_acquire().await;
        lock.read_acquire().await;
        // Both readers in at once; release must not deadlock.
        lock.read_release().await;
        lock.read_release().await;
    }

    #[tokio::test]
    async fn writer_excludes_everyone() {
        let lock = Arc::new(RwLock::new());
        let shared = Arc::new(AtomicI64::new(0));

        lock.write_acquire().await;
        shared.store(1, Ordering::SeqCst);

        let lock2 = lock.clone();
        let shared2 = shared.clone();
        let reader = tokio::spawn(async move {
            lock2.read_acquire().await;
            let v = shared2.load(Ordering::SeqCst);
            lock2.read_release().await;
            v
        });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        shared.store(2, Ordering::SeqCst);
        lock.write_release().await;

        let observed = reader.await.unwrap();
        assert_eq!(observed, 2);
    }

    #[tokio::test]
    async fn pending_writer_blocks_new_readers() {
        let lock = Arc::new(RwLock::new());
        lock.read_acquire().await;

        let lock2 = lock.clone();
        let writer_done = Arc::new(AtomicI64::new(0));
        let wd2 = writer_done.clone();
        let writer = tokio::spawn(async move {
            lock2.write_acquire().await;
            wd2.store(1, Ordering::SeqCst);
            lock2.write_release().await;
        });

        // Give the writer a chance to register as waiting.
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let lock3 = lock.clone();
        let new_reader_order = Arc::new(AtomicI64::new(0));
        let nro2 = new_reader_order.clone();
        let wd3 = writer_done.clone();
        let late_reader = tokio::spawn(async move {
            lock3.read_acquire().await;
            nro2.store(wd3.load(Ordering::SeqCst), Ordering::SeqCst);
            lock3.read_release().await;
        });

        lock.read_release().await;
        writer.await.unwrap();
        late_reader.await.unwrap();

        // The late reader must observe the writer had already run.
        assert_eq!(new_reader_order.load(Ordering::SeqCst), 1);
    }
}
