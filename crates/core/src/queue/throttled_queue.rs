//! Debounced, size-bounded batching buffer.

use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error};
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::errors::Result;
use crate::settings::QueueSettings;

/// Boxed batch handler shared by every flush of a queue.
pub type BatchHandler<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Callback fired once a queue holds no items and has no flush in flight.
pub type EmptyHandler = Arc<dyn Fn() + Send + Sync>;

/// Splits `items` into the smallest number of near-equal batches that are
/// no larger than `max_batch_size`.
///
/// 150 items with a maximum of 100 become two batches of 75.
pub fn split_batches<T>(items: Vec<T>, max_batch_size: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let max_batch_size = max_batch_size.max(1);
    let batch_count = items.len().div_ceil(max_batch_size);
    let batch_size = items.len().div_ceil(batch_count);

    let mut batches = Vec::with_capacity(batch_count);
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}

struct QueueTimer {
    id: u64,
    handle: AbortHandle,
}

struct QueueState<T> {
    items: Vec<T>,
    seen: HashSet<T>,
    timer: Option<QueueTimer>,
    next_timer_id: u64,
    in_flight: usize,
}

impl<T> QueueState<T> {
    fn is_idle(&self) -> bool {
        self.items.is_empty() && self.in_flight == 0
    }
}

struct Inner<T> {
    handler: BatchHandler<T>,
    settings: QueueSettings,
    state: Mutex<QueueState<T>>,
    /// Serializes handler invocations of this queue.
    processing: tokio::sync::Mutex<()>,
    idle: Notify,
    on_empty: OnceLock<EmptyHandler>,
}

impl<T> Inner<T> {
    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        // A handler panic never happens while the state lock is held.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Non-owning handle used by callbacks that must not keep a queue alive.
pub(crate) struct WeakThrottledQueue<T> {
    inner: Weak<Inner<T>>,
}

impl<T> WeakThrottledQueue<T> {
    pub(crate) fn upgrade(&self) -> Option<ThrottledQueue<T>> {
        self.inner.upgrade().map(|inner| ThrottledQueue { inner })
    }
}

/// Collects items into a de-duplicated set and hands them to a handler in
/// batches, either once `max_batch_size` items are held or once `max_delay`
/// has passed since the first item arrived.
///
/// Adding items never blocks: flushes run on spawned Tokio tasks, one at a
/// time per queue. Items added while a flush runs start a new set.
///
/// # Panics
///
/// Adding items or flushing must happen inside a Tokio runtime.
pub struct ThrottledQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ThrottledQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ThrottledQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new<F, Fut>(settings: QueueSettings, handler: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_boxed_handler(settings, Arc::new(move |items| handler(items).boxed()))
    }

    pub fn with_boxed_handler(settings: QueueSettings, handler: BatchHandler<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                settings,
                state: Mutex::new(QueueState {
                    items: Vec::new(),
                    seen: HashSet::new(),
                    timer: None,
                    next_timer_id: 0,
                    in_flight: 0,
                }),
                processing: tokio::sync::Mutex::new(()),
                idle: Notify::new(),
                on_empty: OnceLock::new(),
            }),
        }
    }

    /// Registers the empty callback. Only the first registration is kept.
    pub fn set_empty_handler(&self, on_empty: EmptyHandler) {
        let _ = self.inner.on_empty.set(on_empty);
    }

    pub fn settings(&self) -> QueueSettings {
        self.inner.settings
    }

    pub fn add_item(&self, item: T) {
        self.add_items(std::iter::once(item));
    }

    pub fn add_items<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let batch = {
            let mut state = self.inner.lock_state();
            for item in items {
                if state.seen.insert(item.clone()) {
                    state.items.push(item);
                }
            }

            if state.items.is_empty() {
                return;
            }

            if state.items.len() >= self.inner.settings.max_batch_size {
                Self::take_pending(&mut state)
            } else {
                self.arm_timer(&mut state);
                None
            }
        };

        if let Some(batch) = batch {
            debug!("Throttled queue reached {} items, flushing", batch.len());
            self.spawn_processing(batch);
        }
    }

    /// Flushes every held item now. No-op when the queue is empty.
    pub fn flush_all(&self) {
        let batch = {
            let mut state = self.inner.lock_state();
            Self::take_pending(&mut state)
        };
        if let Some(batch) = batch {
            self.spawn_processing(batch);
        }
    }

    /// Flushes every held item and waits until all flushes have completed.
    pub async fn flush_and_wait(&self) {
        self.flush_all();
        self.wait().await;
    }

    /// Waits until no flush is in flight, including flushes started while waiting.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.lock_state().in_flight == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock_state().items.is_empty()
    }

    /// No items held and no flush in flight.
    pub fn is_idle(&self) -> bool {
        self.inner.lock_state().is_idle()
    }

    pub fn has_pending_flush(&self) -> bool {
        self.inner.lock_state().in_flight > 0
    }

    pub fn has_pending_timer(&self) -> bool {
        self.inner.lock_state().timer.is_some()
    }

    /// Returns true when both handles point at the same queue.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakThrottledQueue<T> {
        WeakThrottledQueue {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn take_pending(state: &mut QueueState<T>) -> Option<Vec<T>> {
        if let Some(timer) = state.timer.take() {
            timer.handle.abort();
        }
        if state.items.is_empty() {
            return None;
        }
        state.seen.clear();
        state.in_flight += 1;
        Some(std::mem::take(&mut state.items))
    }

    fn arm_timer(&self, state: &mut QueueState<T>) {
        let Some(delay) = self.inner.settings.max_delay else {
            return;
        };
        if state.timer.is_some() {
            return;
        }

        state.next_timer_id += 1;
        let id = state.next_timer_id;
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                ThrottledQueue { inner }.fire_timer(id);
            }
        });
        state.timer = Some(QueueTimer {
            id,
            handle: task.abort_handle(),
        });
    }

    fn fire_timer(&self, id: u64) {
        let batch = {
            let mut state = self.inner.lock_state();
            match &state.timer {
                Some(timer) if timer.id == id => {
                    state.timer = None;
                    Self::take_pending(&mut state)
                }
                // Superseded by a flush that already took the items.
                _ => None,
            }
        };
        if let Some(batch) = batch {
            debug!("Throttled queue timer expired, flushing {} items", batch.len());
            self.spawn_processing(batch);
        }
    }

    fn spawn_processing(&self, items: Vec<T>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            {
                let _guard = inner.processing.lock().await;
                process(&inner, items).await;
            }
            ThrottledQueue { inner }.finish_flush();
        });
    }

    fn finish_flush(&self) {
        let emptied = {
            let mut state = self.inner.lock_state();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.is_idle()
        };
        if emptied {
            if let Some(on_empty) = self.inner.on_empty.get() {
                on_empty();
            }
        }
        self.inner.idle.notify_waiters();
    }
}

async fn process<T>(inner: &Inner<T>, items: Vec<T>)
where
    T: Send + 'static,
{
    for batch in split_batches(items, inner.settings.max_batch_size) {
        let size = batch.len();
        let call = (inner.handler).clone();
        let outcome = AssertUnwindSafe(async move { call(batch).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Throttled queue handler failed for {} items: {}", size, e),
            Err(_) => error!("Throttled queue handler panicked for {} items", size),
        }
    }
}
