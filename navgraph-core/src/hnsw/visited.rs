//! Generation-tagged visited trackers and the pool that lends them out.
//!
//! A tracker stamps each node with the generation of the traversal that
//! reached it, so resetting between traversals is a counter bump. The tag
//! array is only cleared when the generation wraps.

use std::{
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex},
};

use tracing::debug;

use crate::error::HnswError;

use super::store::try_filled;

/// Per-traversal visited set sized to the index capacity.
#[derive(Debug)]
pub(crate) struct VisitedList {
    tags: Box<[u16]>,
    generation: u16,
}

impl VisitedList {
    pub(crate) fn new(capacity: usize) -> Result<Self, HnswError> {
        Ok(Self {
            tags: try_filled(capacity, "visited tracker", || 0)?,
            generation: 0,
        })
    }

    /// Starts a new traversal.
    pub(crate) fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            debug!(capacity = self.tags.len(), "visited tracker generation wrapped");
            self.tags.fill(0);
            self.generation = 1;
        }
    }

    pub(crate) fn mark(&mut self, id: u32) {
        self.tags[id as usize] = self.generation;
    }

    pub(crate) fn is_marked(&self, id: u32) -> bool {
        self.tags[id as usize] == self.generation
    }

    /// Marks `id`, returning `true` when it was not yet visited.
    pub(crate) fn insert(&mut self, id: u32) -> bool {
        if self.is_marked(id) {
            return false;
        }
        self.mark(id);
        true
    }

    pub(crate) fn capacity(&self) -> usize {
        self.tags.len()
    }

    fn detached() -> Self {
        Self {
            tags: Box::default(),
            generation: 0,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<VisitedList>,
    created: usize,
}

/// Pool of trackers owned by one index.
///
/// Grows on demand up to `limit` trackers; beyond that, acquirers wait for a
/// tracker to be returned.
#[derive(Debug)]
pub(crate) struct VisitedPool {
    capacity: usize,
    limit: usize,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl VisitedPool {
    pub(crate) fn new(capacity: usize, limit: usize) -> Result<Self, HnswError> {
        let first = VisitedList::new(capacity)?;
        Ok(Self {
            capacity,
            limit: limit.max(1),
            state: Mutex::new(PoolState {
                idle: vec![first],
                created: 1,
            }),
            returned: Condvar::new(),
        })
    }

    /// Checks out a tracker with a fresh generation.
    pub(crate) fn acquire(&self) -> Result<VisitedGuard<'_>, HnswError> {
        let mut state = self.state.lock().map_err(|_| HnswError::LockPoisoned {
            resource: "visited pool",
        })?;
        let mut list = loop {
            if let Some(list) = state.idle.pop() {
                break list;
            }
            if state.created < self.limit {
                state.created += 1;
                drop(state);
                match VisitedList::new(self.capacity) {
                    Ok(list) => break list,
                    Err(err) => {
                        self.forget_one();
                        return Err(err);
                    }
                }
            }
            state = self
                .returned
                .wait(state)
                .map_err(|_| HnswError::LockPoisoned {
                    resource: "visited pool",
                })?;
        };
        list.reset();
        Ok(VisitedGuard { pool: self, list })
    }

    fn release(&self, list: VisitedList) {
        if let Ok(mut state) = self.state.lock() {
            state.idle.push(list);
        }
        self.returned.notify_one();
    }

    fn forget_one(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.created = state.created.saturating_sub(1);
        }
        self.returned.notify_one();
    }

    #[cfg(test)]
    fn created(&self) -> usize {
        self.state.lock().map_or(0, |state| state.created)
    }
}

/// Tracker on loan from a [`VisitedPool`], returned on drop.
#[derive(Debug)]
pub(crate) struct VisitedGuard<'pool> {
    pool: &'pool VisitedPool,
    list: VisitedList,
}

impl Deref for VisitedGuard<'_> {
    type Target = VisitedList;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl DerefMut for VisitedGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.list
    }
}

impl Drop for VisitedGuard<'_> {
    fn drop(&mut self) {
        let list = std::mem::replace(&mut self.list, VisitedList::detached());
        self.pool.release(list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    #[test]
    fn insert_reports_first_visit_only() {
        let mut list = VisitedList::new(8).expect("list");
        list.reset();
        assert!(list.insert(3));
        assert!(!list.insert(3));
        assert!(list.is_marked(3));
        list.reset();
        assert!(!list.is_marked(3));
        assert!(list.insert(3));
    }

    #[test]
    fn generation_wrap_clears_tags() {
        let mut list = VisitedList::new(4).expect("list");
        list.reset();
        list.mark(1);
        for _ in 0..u16::MAX {
            list.reset();
        }
        assert_eq!(list.generation, 1);
        assert!(!list.is_marked(1), "stale tag survived the wrap");
        assert!(list.insert(1));
    }

    #[test]
    fn pool_reuses_returned_trackers() {
        let pool = VisitedPool::new(16, 4).expect("pool");
        {
            let mut first = pool.acquire().expect("first");
            first.mark(2);
            assert_eq!(first.capacity(), 16);
        }
        let second = pool.acquire().expect("second");
        assert!(!second.is_marked(2), "returned tracker must start fresh");
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn pool_grows_until_limit() {
        let pool = VisitedPool::new(4, 2).expect("pool");
        let _a = pool.acquire().expect("a");
        let _b = pool.acquire().expect("b");
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn exhausted_pool_blocks_until_release() {
        let pool = Arc::new(VisitedPool::new(4, 1).expect("pool"));
        let held = pool.acquire().expect("held");
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let pool = Arc::clone(&pool);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _tracker = pool.acquire().expect("waiter");
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(
            !acquired.load(Ordering::SeqCst),
            "acquire should block while the only tracker is on loan"
        );
        drop(held);
        handle.join().expect("thread joins");
        assert!(acquired.load(Ordering::SeqCst));
    }
}
