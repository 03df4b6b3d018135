//! Per-group throttled queues sharing one debounce timer.

use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;
use tokio::task::AbortHandle;

use super::throttled_queue::{BatchHandler, ThrottledQueue};
use crate::errors::Result;
use crate::settings::QueueSettings;

/// Handler invoked with the group key and one batch of that group's items.
pub type GroupedBatchHandler<T> =
    Arc<dyn Fn(String, Vec<T>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct GroupTimer {
    id: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct TimerState {
    timer: Option<GroupTimer>,
    next_id: u64,
}

struct Inner<T> {
    handler: GroupedBatchHandler<T>,
    settings: QueueSettings,
    groups: DashMap<String, ThrottledQueue<T>>,
    timer: Mutex<TimerState>,
}

impl<T> Inner<T> {
    fn lock_timer(&self) -> MutexGuard<'_, TimerState> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A registry of [`ThrottledQueue`]s keyed by group (an organization id), so
/// a busy group never delays a quiet one.
///
/// Sub-queues are created on the first add for a group and dropped as soon as
/// they are idle again. One shared timer bounds staleness across all groups;
/// each sub-queue still flushes on its own once it holds `max_batch_size` items.
pub struct GroupedThrottledQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for GroupedThrottledQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> GroupedThrottledQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new<F, Fut>(settings: QueueSettings, handler: F) -> Self
    where
        F: Fn(String, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                handler: Arc::new(move |group, items| handler(group, items).boxed()),
                settings,
                groups: DashMap::new(),
                timer: Mutex::new(TimerState::default()),
            }),
        }
    }

    pub fn add_item(&self, group: &str, item: T) {
        self.add_items(group, std::iter::once(item));
    }

    pub fn add_items<I>(&self, group: &str, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        if items.is_empty() {
            return;
        }
        {
            // The entry lock is held while adding so an idle sub-queue cannot be
            // removed between lookup and insert.
            let queue = self
                .inner
                .groups
                .entry(group.to_string())
                .or_insert_with(|| self.create_group_queue(group));
            queue.add_items(items);
        }
        self.arm_timer();
    }

    /// Flushes one group. Unknown groups are ignored.
    pub fn flush_group(&self, group: &str) {
        if let Some(queue) = self.group_queue(group) {
            queue.flush_all();
        }
    }

    pub async fn flush_group_and_wait(&self, group: &str) {
        if let Some(queue) = self.group_queue(group) {
            queue.flush_and_wait().await;
        }
    }

    /// Flushes every group and clears the shared timer.
    pub fn flush_all(&self) {
        {
            let mut timer = self.inner.lock_timer();
            if let Some(timer) = timer.timer.take() {
                timer.handle.abort();
            }
        }
        for queue in self.snapshot() {
            queue.flush_all();
        }
    }

    pub async fn flush_and_wait(&self) {
        self.flush_all();
        self.wait().await;
    }

    /// Waits until no group has a flush in flight.
    pub async fn wait(&self) {
        loop {
            let busy: Vec<ThrottledQueue<T>> = self
                .snapshot()
                .into_iter()
                .filter(|queue| queue.has_pending_flush())
                .collect();
            if busy.is_empty() {
                return;
            }
            for queue in busy {
                queue.wait().await;
            }
        }
    }

    pub fn group_count(&self) -> usize {
        self.inner.groups.len()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.inner.groups.contains_key(group)
    }

    pub fn has_pending_timer(&self) -> bool {
        self.inner.lock_timer().timer.is_some()
    }

    pub fn settings(&self) -> QueueSettings {
        self.inner.settings
    }

    fn group_queue(&self, group: &str) -> Option<ThrottledQueue<T>> {
        self.inner.groups.get(group).map(|queue| queue.clone())
    }

    fn snapshot(&self) -> Vec<ThrottledQueue<T>> {
        self.inner
            .groups
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn create_group_queue(&self, group: &str) -> ThrottledQueue<T> {
        let handler = self.inner.handler.clone();
        let key = group.to_string();
        let batch_handler: BatchHandler<T> =
            Arc::new(move |items| handler(key.clone(), items));

        // The shared timer drives delayed flushes, so sub-queues only flush on size.
        let queue = ThrottledQueue::with_boxed_handler(
            QueueSettings {
                max_batch_size: self.inner.settings.max_batch_size,
                max_delay: None,
            },
            batch_handler,
        );

        let registry: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let this_queue = queue.downgrade();
        let key = group.to_string();
        queue.set_empty_handler(Arc::new(move || {
            let (Some(inner), Some(queue)) = (registry.upgrade(), this_queue.upgrade()) else {
                return;
            };
            let removed = inner
                .groups
                .remove_if(&key, |_, current| current.ptr_eq(&queue) && current.is_idle());
            if removed.is_some() {
                debug!("Dropped idle queue for group {}", key);
            }
        }));
        queue
    }

    fn arm_timer(&self) {
        let Some(delay) = self.inner.settings.max_delay else {
            return;
        };
        let mut state = self.inner.lock_timer();
        if state.timer.is_some() {
            return;
        }

        state.next_id += 1;
        let id = state.next_id;
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                GroupedThrottledQueue { inner }.fire_timer(id);
            }
        });
        state.timer = Some(GroupTimer {
            id,
            handle: task.abort_handle(),
        });
    }

    fn fire_timer(&self, id: u64) {
        {
            let mut state = self.inner.lock_timer();
            match &state.timer {
                Some(timer) if timer.id == id => state.timer = None,
                _ => return,
            }
        }
        debug!(
            "Grouped queue timer expired, flushing {} groups",
            self.group_count()
        );
        for queue in self.snapshot() {
            queue.flush_all();
        }
    }
}
