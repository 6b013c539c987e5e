use std::collections::HashMap;

use parking_lot::Mutex;

use crate::common::config::FrameId;

/// A node in the intrusive doubly-linked list backing the LRU ordering.
struct Node {
    prev: Option<FrameId>,
    next: Option<FrameId>,
}

/// Tracks the set of evictable (unpinned, resident) frames in recency order
/// and yields the least-recently-used one on demand.
///
/// A frame's position reflects *when it most recently became unpinned*, not
/// when its page was last read: this is "clock-on-unpin" LRU, a deliberate
/// simplification over LRU-K access-history tracking. `head` is the most
/// recently unpinned frame, `tail` the least.
struct Inner {
    nodes: HashMap<FrameId, Node>,
    head: Option<FrameId>,
    tail: Option<FrameId>,
}

impl Inner {
    fn unlink(&mut self, frame_id: FrameId) {
        let Node { prev, next } = match self.nodes.remove(&frame_id) {
            Some(node) => node,
            None => return,
        };
        match prev {
            Some(p) => self.nodes.get_mut(&p).unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes.get_mut(&n).unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, frame_id: FrameId) {
        let old_head = self.head;
        self.nodes.insert(
            frame_id,
            Node {
                prev: None,
                next: old_head,
            },
        );
        if let Some(h) = old_head {
            self.nodes.get_mut(&h).unwrap().prev = Some(frame_id);
        } else {
            self.tail = Some(frame_id);
        }
        self.head = Some(frame_id);
    }
}

/// Plain LRU replacer over buffer frames. Knows only `frame_id`s;
/// page identity is the Buffer Pool's concern.
pub struct LruReplacer {
    inner: Mutex<Inner>,
}

impl LruReplacer {
    pub fn new() -> LruReplacer {
        LruReplacer {
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                head: None,
                tail: None,
            }),
        }
    }

    /// Removes and returns the least-recently-used frame, or `None` if no
    /// frame is currently evictable.
    pub fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let frame_id = inner.tail?;
        inner.unlink(frame_id);
        Some(frame_id)
    }

    /// Marks `frame_id` as pinned: if tracked, stop tracking it. Idempotent
    /// for an already-untracked id.
    pub fn pin(&self, frame_id: FrameId) {
        self.inner.lock().unlink(frame_id);
    }

    /// Marks `frame_id` as unpinned: if untracked, insert at the front (most
    /// recently used). Idempotent for an already-tracked id.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(&frame_id) {
            return;
        }
        inner.push_front(frame_id);
    }

    /// Removes `frame_id` from tracking unconditionally, e.g. when its frame
    /// is deleted. Idempotent.
    pub fn remove(&self, frame_id: FrameId) {
        self.inner.lock().unlink(frame_id);
    }

    /// Current count of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}
