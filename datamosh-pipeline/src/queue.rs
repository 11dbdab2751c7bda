//! Bounded blocking queues between pipeline stages.
//!
//! Two flavors exist. [`Queue`] is a plain bounded FIFO used for packets.
//! [`DocQueue`] carries per-frame documents and keeps its pending slots
//! sorted by packet position, so a consumer always sees the lowest pending
//! frame first and can also wait for one exact position. The small fixed
//! capacity is what bounds reordering: a stage that runs ahead simply blocks
//! until the slow side catches up.
//!
//! Shutdown is an explicit element, not a magic position value. After
//! [`Queue::shutdown`] every pending element is still delivered, pushes
//! become no-ops, and drained consumers receive [`QueueItem::Shutdown`]
//! instead of blocking.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use datamosh_core::packet::FrameDoc;

/// Slots per queue. Shared by the packet and document queues.
pub const QUEUE_CAPACITY: usize = 8;

/// What a consumer receives from a queue.
#[derive(Debug)]
pub enum QueueItem<T> {
    Item(T),
    /// The producing side is gone; no further elements will arrive.
    Shutdown,
}

impl<T> QueueItem<T> {
    /// Unwrap the item, mapping `Shutdown` to `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            QueueItem::Item(item) => Some(item),
            QueueItem::Shutdown => None,
        }
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Bounded multi-producer multi-consumer FIFO.
pub struct Queue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(QUEUE_CAPACITY),
                shutdown: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Push an element, blocking while the queue is full. Returns `false`
    /// if the queue has been shut down; the element is dropped in that case.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if inner.shutdown {
                return false;
            }
            if inner.items.len() < QUEUE_CAPACITY {
                break;
            }
            self.not_full.wait(&mut inner);
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Pop the head element, blocking while the queue is empty. Pending
    /// elements are drained before `Shutdown` is reported.
    pub fn pop(&self) -> QueueItem<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return QueueItem::Item(item);
            }
            if inner.shutdown {
                return QueueItem::Shutdown;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Stop the queue: wake every waiter, make pushes no-ops.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }
}

struct DocInner {
    // kept sorted by pkt_pos after every insert
    slots: Vec<FrameDoc>,
    shutdown: bool,
}

/// Bounded queue of per-frame documents, ordered by packet position.
///
/// Producers may insert frames out of order (the script stage finishes
/// frames in whatever order it likes); consumers take either the lowest
/// pending position or one exact position.
pub struct DocQueue {
    inner: Mutex<DocInner>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl Default for DocQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DocQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DocInner {
                slots: Vec::with_capacity(QUEUE_CAPACITY),
                shutdown: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Insert a frame, blocking while all slots are taken. The pending
    /// slots are re-sorted by position so the head is always the lowest
    /// pending frame. Returns `false` after shutdown.
    pub fn push(&self, doc: FrameDoc) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if inner.shutdown {
                return false;
            }
            if inner.slots.len() < QUEUE_CAPACITY {
                break;
            }
            self.not_full.wait(&mut inner);
        }
        inner.slots.push(doc);
        inner.slots.sort_by_key(|d| d.pkt_pos);
        self.not_empty.notify_all();
        true
    }

    /// Take the frame with the lowest pending position, blocking while the
    /// queue is empty.
    pub fn pop_lowest(&self) -> QueueItem<FrameDoc> {
        let mut inner = self.inner.lock();
        loop {
            if !inner.slots.is_empty() {
                let doc = inner.slots.remove(0);
                self.not_full.notify_all();
                return QueueItem::Item(doc);
            }
            if inner.shutdown {
                return QueueItem::Shutdown;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Take the frame whose position is exactly `pkt_pos`, blocking until
    /// one arrives. After shutdown, a missing position reports `Shutdown`
    /// instead of blocking forever.
    pub fn pop_at(&self, pkt_pos: i64) -> QueueItem<FrameDoc> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(idx) = inner.slots.iter().position(|d| d.pkt_pos == pkt_pos) {
                let doc = inner.slots.remove(idx);
                self.not_full.notify_all();
                return QueueItem::Item(doc);
            }
            if inner.shutdown {
                return QueueItem::Shutdown;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Stop the queue: wake every waiter, make pushes no-ops.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}
