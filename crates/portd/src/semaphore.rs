//! Counting semaphore with a FIFO wait queue and bulk cancellation.
//!
//! - `acquire()` registers its waiter immediately, so call order is grant order
//! - `release()` hands capacity to the head of the queue
//! - `purge()` rejects every queued waiter and resets the running count
//!
//! Locks granted before a purge belong to an older generation. Releasing one
//! does not touch the running count of the current generation.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SemaphoreError {
    #[error(
        "The {label} semaphore was created with a max value of {max} but the max value cannot be less than 1"
    )]
    InvalidMax { label: String, max: usize },
    #[error("The {label} semaphore was purged and as a result this task has been cancelled")]
    Purged { label: String },
    #[error("Timed out after {timeout:?} waiting on the {label} semaphore")]
    Timeout { label: String, timeout: Duration },
}

type Grant = Result<u64, SemaphoreError>;

/// A pending acquisition.
struct Waiter {
    id: u64,
    tx: oneshot::Sender<Grant>,
}

struct State {
    running: usize,
    waiting: VecDeque<Waiter>,
    generation: u64,
    next_waiter: u64,
}

struct Inner {
    label: String,
    max: usize,
    state: StdMutex<State>,
}

impl Inner {
    fn new(label: String, max: usize) -> Self {
        Self {
            label,
            max,
            state: StdMutex::new(State {
                running: 0,
                waiting: VecDeque::new(),
                generation: 0,
                next_waiter: 0,
            }),
        }
    }

    // Critical sections never panic, so a poisoned guard still holds consistent state.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Promote queued waiters while capacity allows.
    fn take(&self, state: &mut State) {
        while state.running < self.max {
            let Some(waiter) = state.waiting.pop_front() else {
                break;
            };
            state.running += 1;
            if waiter.tx.send(Ok(state.generation)).is_err() {
                // Receiver vanished between queueing and promotion.
                state.running -= 1;
            }
        }
    }

    fn release(&self, generation: u64) {
        let mut state = self.state();
        if generation == state.generation {
            state.running = state.running.saturating_sub(1);
        } else {
            tracing::trace!(semaphore = %self.label, "Lock from before purge released");
        }
        self.take(&mut state);
    }

    fn forget(&self, id: u64) {
        let mut state = self.state();
        if let Some(pos) = state.waiting.iter().position(|w| w.id == id) {
            state.waiting.remove(pos);
            tracing::trace!(semaphore = %self.label, "Abandoned waiter removed from queue");
        }
    }
}

/// Bounded-concurrency gate.
///
/// Cloning shares the same underlying counter and queue.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

impl Semaphore {
    pub fn new(label: impl Into<String>, max: usize) -> Result<Self, SemaphoreError> {
        let label = label.into();
        if max < 1 {
            return Err(SemaphoreError::InvalidMax { label, max });
        }
        Ok(Self {
            inner: Arc::new(Inner::new(label, max)),
        })
    }

    /// A semaphore with `max = 1`, used as an async mutual-exclusion lock.
    pub fn mutex(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner::new(label.into(), 1)),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn max(&self) -> usize {
        self.inner.max
    }

    pub fn running(&self) -> usize {
        self.inner.state().running
    }

    pub fn waiting(&self) -> usize {
        self.inner.state().waiting.len()
    }

    /// Acquire a lock on the guarded resource.
    ///
    /// The waiter is queued before this returns. The returned future resolves
    /// once capacity is granted, or fails with [`SemaphoreError::Purged`].
    /// Dropping the future gives up the place in the queue.
    pub fn acquire(&self) -> Acquire {
        let mut state = self.inner.state();

        if state.running < self.inner.max && state.waiting.is_empty() {
            state.running += 1;
            return Acquire {
                inner: Arc::clone(&self.inner),
                stage: Stage::Granted(state.generation),
            };
        }

        let id = state.next_waiter;
        state.next_waiter += 1;
        let (tx, rx) = oneshot::channel();
        state.waiting.push_back(Waiter { id, tx });
        tracing::trace!(
            semaphore = %self.inner.label,
            queued = state.waiting.len(),
            "Waiting for lock"
        );
        self.inner.take(&mut state);

        Acquire {
            inner: Arc::clone(&self.inner),
            stage: Stage::Queued { id, rx },
        }
    }

    /// Acquire with a deadline. On timeout the waiter is removed from the queue.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Lock, SemaphoreError> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(SemaphoreError::Timeout {
                label: self.inner.label.clone(),
                timeout,
            }),
        }
    }

    /// Reject every queued waiter and reset the running count to zero.
    ///
    /// Work already holding a lock is not interrupted. Returns the number of
    /// cancelled waiters.
    pub fn purge(&self) -> usize {
        let waiting = {
            let mut state = self.inner.state();
            state.running = 0;
            state.generation += 1;
            std::mem::take(&mut state.waiting)
        };

        tracing::info!(
            "Purge requested on the {} semaphore, {} pending tasks will be cancelled",
            self.inner.label,
            waiting.len()
        );

        let cancelled = waiting.len();
        for waiter in waiting {
            let _ = waiter.tx.send(Err(SemaphoreError::Purged {
                label: self.inner.label.clone(),
            }));
        }
        cancelled
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("Semaphore")
            .field("label", &self.inner.label)
            .field("max", &self.inner.max)
            .field("running", &state.running)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}

enum Stage {
    Granted(u64),
    Queued {
        id: u64,
        rx: oneshot::Receiver<Grant>,
    },
    Done,
}

/// Future returned by [`Semaphore::acquire`].
#[must_use = "the waiter leaves the queue when this future is dropped"]
pub struct Acquire {
    inner: Arc<Inner>,
    stage: Stage,
}

impl Future for Acquire {
    type Output = Result<Lock, SemaphoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let grant = match &mut this.stage {
            Stage::Granted(generation) => Ok(*generation),
            Stage::Queued { rx, .. } => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(grant)) => grant,
                // Sender dropped without a grant: only happens when the queue is torn down.
                Poll::Ready(Err(_)) => Err(SemaphoreError::Purged {
                    label: this.inner.label.clone(),
                }),
            },
            Stage::Done => panic!("`Acquire` polled after completion"),
        };
        this.stage = Stage::Done;
        Poll::Ready(grant.map(|generation| Lock {
            inner: Arc::clone(&this.inner),
            generation,
            released: false,
        }))
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Granted(generation) => self.inner.release(generation),
            Stage::Queued { id, mut rx } => {
                rx.close();
                match rx.try_recv() {
                    Ok(Ok(generation)) => self.inner.release(generation),
                    _ => self.inner.forget(id),
                }
            }
            Stage::Done => {}
        }
    }
}

/// Permission to run, granted by [`Semaphore::acquire`].
///
/// Released exactly once: explicitly via [`Lock::release`] or on drop.
#[must_use = "dropping a Lock releases it immediately"]
pub struct Lock {
    inner: Arc<Inner>,
    generation: u64,
    released: bool,
}

impl Lock {
    pub fn release(mut self) {
        self.released = true;
        self.inner.release(self.generation);
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if !self.released {
            self.inner.release(self.generation);
        }
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("semaphore", &self.inner.label)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn zero_max_is_rejected() {
        let err = Semaphore::new("ns", 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The ns semaphore was created with a max value of 0 but the max value cannot be less than 1"
        );
    }

    #[tokio::test]
    async fn mutex_is_a_fresh_max_one_semaphore() {
        let sem = Semaphore::mutex("dispatch");
        assert_eq!(sem.label(), "dispatch");
        assert_eq!(sem.max(), 1);
        assert_eq!((sem.running(), sem.waiting()), (0, 0));

        let lock = sem.acquire().await.unwrap();
        let _queued = sem.acquire();
        assert_eq!((sem.running(), sem.waiting()), (1, 1));
        lock.release();
    }

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let sem = Semaphore::mutex("ns");

        let first = sem.acquire().await.unwrap();
        assert_eq!(sem.running(), 1);

        let mut second = sem.acquire();
        assert!(futures::poll!(&mut second).is_pending());
        assert_eq!(sem.waiting(), 1);

        first.release();
        let second = second.await.unwrap();
        assert_eq!(sem.running(), 1);
        assert_eq!(sem.waiting(), 0);

        second.release();
        assert_eq!(sem.running(), 0);
    }

    #[tokio::test]
    async fn waiters_are_granted_in_fifo_order() {
        let sem = Semaphore::mutex("ns");
        let order = Arc::new(Mutex::new(Vec::new()));

        let holder = sem.acquire().await.unwrap();

        let mut tasks = Vec::new();
        for name in ["A", "B", "C"] {
            let acquire = sem.acquire();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let lock = acquire.await.unwrap();
                order.lock().unwrap().push(name);
                tokio::task::yield_now().await;
                lock.release();
            }));
        }
        assert_eq!(sem.waiting(), 3);

        holder.release();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(sem.running(), 0);
    }

    #[tokio::test]
    async fn manual_release_promotes_in_order() {
        let sem = Semaphore::mutex("ns");
        let holder = sem.acquire().await.unwrap();

        let mut a = sem.acquire();
        let mut b = sem.acquire();
        let mut c = sem.acquire();

        holder.release();
        let a_lock = match futures::poll!(&mut a) {
            Poll::Ready(lock) => lock.unwrap(),
            Poll::Pending => panic!("A should be granted first"),
        };
        assert!(futures::poll!(&mut b).is_pending());
        assert!(futures::poll!(&mut c).is_pending());

        a_lock.release();
        let b_lock = b.await.unwrap();
        assert!(futures::poll!(&mut c).is_pending());

        b_lock.release();
        c.await.unwrap().release();
    }

    #[tokio::test]
    async fn purge_cancels_queued_waiters() {
        let sem = Semaphore::mutex("ns");
        let _holder = sem.acquire().await.unwrap();

        let a = sem.acquire();
        let b = sem.acquire();
        assert_eq!(sem.waiting(), 2);

        assert_eq!(sem.purge(), 2);
        assert_eq!(sem.running(), 0);
        assert_eq!(sem.waiting(), 0);

        assert!(matches!(a.await, Err(SemaphoreError::Purged { .. })));
        assert!(matches!(b.await, Err(SemaphoreError::Purged { .. })));

        let mut next = sem.acquire();
        assert!(futures::poll!(&mut next).is_ready());
    }

    #[tokio::test]
    async fn stale_lock_does_not_disturb_counter_after_purge() {
        let sem = Semaphore::mutex("ns");
        let stale = sem.acquire().await.unwrap();

        sem.purge();
        let fresh = sem.acquire().await.unwrap();
        assert_eq!(sem.running(), 1);

        stale.release();
        assert_eq!(sem.running(), 1);

        let mut blocked = sem.acquire();
        assert!(futures::poll!(&mut blocked).is_pending());

        fresh.release();
        assert!(blocked.await.is_ok());
    }

    #[tokio::test]
    async fn timeout_removes_waiter_from_queue() {
        let sem = Semaphore::mutex("ns");
        let holder = sem.acquire().await.unwrap();

        let err = sem
            .acquire_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SemaphoreError::Timeout { .. }));
        assert_eq!(sem.waiting(), 0);

        holder.release();
        assert_eq!(sem.running(), 0);
        let mut next = sem.acquire();
        assert!(futures::poll!(&mut next).is_ready());
    }

    #[tokio::test]
    async fn dropped_grant_returns_capacity() {
        let sem = Semaphore::mutex("ns");
        let holder = sem.acquire().await.unwrap();

        let pending = sem.acquire();
        holder.release();
        // Granted but never polled.
        assert_eq!(sem.running(), 1);
        drop(pending);
        assert_eq!(sem.running(), 0);
    }

    #[tokio::test]
    async fn dropped_lock_releases() {
        let sem = Semaphore::new("pool", 2).unwrap();
        {
            let _a = sem.acquire().await.unwrap();
            let _b = sem.acquire().await.unwrap();
            assert_eq!(sem.running(), 2);
        }
        assert_eq!(sem.running(), 0);
    }
}
