//! Intrusive membership lists for pooled frames
//!
//! The pool tracks which frames are free or freeable with doubly-linked
//! lists threaded through per-slot link records. Frames are arena slots,
//! so a list entry is just the frame's slot index and every operation,
//! including removal from the middle, is O(1) with no auxiliary map.

use std::sync::Mutex;

/// Per-slot link record. A slot is on at most one list at a time.
#[derive(Clone, Copy, Default)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

struct Links {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    slots: Vec<Link>,
}

/// A FIFO list of frame slot indices with O(1) append, pop and unlink.
///
/// The list has its own mutex, distinct from the pool mutex: the pool
/// mutex orders compound decisions (which list to take from), the list
/// mutex protects only the link structure itself.
pub(crate) struct FrameList {
    inner: Mutex<Links>,
}

impl FrameList {
    /// Create an empty list able to hold slots `0..capacity`.
    pub(crate) fn new(capacity: usize) -> Self {
        FrameList {
            inner: Mutex::new(Links {
                head: None,
                tail: None,
                len: 0,
                slots: vec![Link::default(); capacity],
            }),
        }
    }

    /// Append a slot at the tail.
    ///
    /// Panics if the slot is already on this list; a frame on two lists
    /// at once is a state-machine bug, not a runtime condition.
    pub(crate) fn push_back(&self, index: usize) {
        let mut links = self.inner.lock().unwrap();

        assert!(
            !links.slots[index].linked,
            "frame {index}: already on a pool list"
        );

        links.slots[index] = Link {
            prev: links.tail,
            next: None,
            linked: true,
        };

        match links.tail {
            Some(tail) => links.slots[tail].next = Some(index),
            None => links.head = Some(index),
        }
        links.tail = Some(index);
        links.len += 1;
    }

    /// Remove and return the slot at the head, or `None` if empty.
    pub(crate) fn pop_front(&self) -> Option<usize> {
        let mut links = self.inner.lock().unwrap();

        let index = links.head?;
        let next = links.slots[index].next;

        links.head = next;
        match next {
            Some(next) => links.slots[next].prev = None,
            None => links.tail = None,
        }

        links.slots[index] = Link::default();
        links.len -= 1;
        Some(index)
    }

    /// Remove a slot from whichever position it occupies.
    ///
    /// Panics if the slot is not on the list: the caller (resurrection)
    /// asserts membership, and silently unlinking a non-member would
    /// corrupt the head/tail pointers.
    pub(crate) fn unlink(&self, index: usize) {
        let mut links = self.inner.lock().unwrap();

        assert!(
            links.slots[index].linked,
            "frame {index}: not on the expected pool list"
        );

        let Link { prev, next, .. } = links.slots[index];

        match prev {
            Some(prev) => links.slots[prev].next = next,
            None => links.head = next,
        }
        match next {
            Some(next) => links.slots[next].prev = prev,
            None => links.tail = prev,
        }

        links.slots[index] = Link::default();
        links.len -= 1;
    }

    /// Number of slots currently on the list.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    /// Whether the given slot is on this list.
    pub(crate) fn contains(&self, index: usize) -> bool {
        self.inner.lock().unwrap().slots[index].linked
    }
}
