//! # Keyed Work Queue
//!
//! Jobs submitted under the same key run one after another, in submission
//! order. Jobs under different keys may run concurrently, bounded by a shared
//! limit. Submitting the same work twice is allowed; it simply runs twice.
//!
//! ```text
//!   submit(k1, a) ──┐   lane k1: [a] → [c]      ┐
//!   submit(k2, b) ──┼─→ lane k2: [b]            ├─→ semaphore (limit) ─→ run
//!   submit(k1, c) ──┘                            ┘
//! ```
//!
//! Each key has at most one lane task alive. The lane pops its next job after
//! finishing the current one and exits when the lane is empty. Jobs run in
//! their own task, so a panicking job counts as finished.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, trace};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Inner<K> {
    lanes: Mutex<HashMap<K, VecDeque<Job>>>,
    permits: Semaphore,
    /// Submitted jobs not finished yet.
    pending: watch::Sender<usize>,
}

pub struct KeyedWorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for KeyedWorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> KeyedWorkQueue<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    /// `max_concurrent` is clamped to at least 1.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                lanes: Mutex::new(HashMap::new()),
                permits: Semaphore::new(max_concurrent.max(1)),
                pending,
            }),
        }
    }

    /// Queue `job` behind every job already submitted under `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, key: K, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.pending.send_modify(|n| *n += 1);
        enqueue(&self.inner, key, Box::pin(job));
    }

    /// Like [`KeyedWorkQueue::submit`], but the job only joins its lane once
    /// `delay` has elapsed. It counts as pending while waiting.
    pub fn submit_after<F>(&self, key: K, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.pending.send_modify(|n| *n += 1);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            enqueue(&inner, key, Box::pin(job));
        });
    }

    /// Resolves once every submitted job, including jobs submitted by jobs,
    /// has finished.
    pub async fn idle(&self) {
        let mut rx = self.inner.pending.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Jobs submitted and not finished yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }
}

fn enqueue<K>(inner: &Arc<Inner<K>>, key: K, job: Job)
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    let mut lanes = inner.lanes.lock();
    if let Some(lane) = lanes.get_mut(&key) {
        lane.push_back(job);
        trace!(?key, queued = lane.len(), "Job queued behind running lane");
        return;
    }
    lanes.insert(key.clone(), VecDeque::new());
    drop(lanes);

    tokio::spawn(run_lane(Arc::clone(inner), key, job));
}

async fn run_lane<K>(inner: Arc<Inner<K>>, key: K, first: Job)
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    let mut job = first;
    loop {
        {
            // The semaphore is never closed.
            let _permit = inner.permits.acquire().await.ok();
            // A panicking job must not take the lane down with it.
            if let Err(e) = tokio::spawn(job).await {
                error!(?key, error = %e, "Queued job did not complete");
            }
        }
        inner.pending.send_modify(|n| *n = n.saturating_sub(1));

        let next = {
            let mut lanes = inner.lanes.lock();
            match lanes.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(next) => Some(next),
                None => {
                    lanes.remove(&key);
                    None
                }
            }
        };
        match next {
            Some(next) => job = next,
            None => break,
        }
    }
    trace!(?key, "Lane drained");
}
