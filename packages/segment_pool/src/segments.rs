use std::{iter, mem};

use crate::Segment;

/// Identifies a segment within the [`Segments`] arena of one pool.
///
/// The same value is written into the header of the mapped segment memory, which is how a
/// freed payload pointer finds its way back to the bookkeeping entry of its segment.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct SegmentId(usize);

impl SegmentId {
    #[cfg(test)]
    #[must_use]
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct Entry {
    segment: Segment,

    /// Whether the segment is part of the active list. The links are meaningless if not.
    linked: bool,
    prev: Option<SegmentId>,
    next: Option<SegmentId>,
}

/// Arena of segments plus an ordered "active" list threaded through them.
///
/// Segments are addressed by [`SegmentId`], which stays stable for the lifetime of the segment.
/// Ids of removed segments are reused. A segment can live in the arena without being linked
/// into the active list; the pool uses this for its deletion candidate.
///
/// Every list operation is O(1).
#[derive(Debug, Default)]
pub(crate) struct Segments {
    entries: Vec<Option<Entry>>,

    /// Indexes of `entries` that are `None`, reused before the vector grows.
    vacant_ids: Vec<SegmentId>,

    head: Option<SegmentId>,
    tail: Option<SegmentId>,

    linked_count: usize,
}

impl Segments {
    /// Adds a segment to the arena without linking it. The closure receives the id that the
    /// segment will be stored under, so it can be embedded into the segment memory.
    pub(crate) fn insert_with(&mut self, f: impl FnOnce(SegmentId) -> Segment) -> SegmentId {
        let id = self
            .vacant_ids
            .pop()
            .unwrap_or_else(|| SegmentId(self.entries.len()));

        let entry = Entry {
            segment: f(id),
            linked: false,
            prev: None,
            next: None,
        };

        if id.0 == self.entries.len() {
            self.entries.push(Some(entry));
        } else {
            *self.slot_mut(id) = Some(entry);
        }

        id
    }

    /// Removes an unlinked segment from the arena.
    ///
    /// # Panics
    ///
    /// Panics if the segment is still linked into the active list.
    pub(crate) fn remove(&mut self, id: SegmentId) -> Segment {
        assert!(
            !self.is_linked(id),
            "segment {id:?} must be unlinked before it is removed"
        );

        let entry = self
            .slot_mut(id)
            .take()
            .expect("is_linked() already verified the entry exists");

        self.vacant_ids.push(id);

        entry.segment
    }

    /// Removes every segment, linked or not, leaving the arena empty.
    #[must_use]
    pub(crate) fn drain(&mut self) -> Vec<Segment> {
        self.vacant_ids.clear();
        self.head = None;
        self.tail = None;
        self.linked_count = 0;

        mem::take(&mut self.entries)
            .into_iter()
            .flatten()
            .map(|entry| entry.segment)
            .collect()
    }

    #[cfg(any(debug_assertions, test))]
    #[must_use]
    pub(crate) fn get(&self, id: SegmentId) -> &Segment {
        &self.entry(id).segment
    }

    #[must_use]
    pub(crate) fn get_mut(&mut self, id: SegmentId) -> &mut Segment {
        &mut self.entry_mut(id).segment
    }

    /// Number of segments in the arena, linked or not.
    #[cfg(any(debug_assertions, test))]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        // Cannot underflow because every vacant id refers to an existing entry.
        self.entries.len().wrapping_sub(self.vacant_ids.len())
    }

    #[cfg(any(debug_assertions, test))]
    #[must_use]
    pub(crate) fn linked_count(&self) -> usize {
        self.linked_count
    }

    #[must_use]
    pub(crate) fn front(&self) -> Option<SegmentId> {
        self.head
    }

    #[must_use]
    pub(crate) fn is_front(&self, id: SegmentId) -> bool {
        self.head == Some(id)
    }

    #[must_use]
    pub(crate) fn is_linked(&self, id: SegmentId) -> bool {
        self.entry(id).linked
    }

    /// Iterates over the active list from front to back.
    pub(crate) fn iter_linked(&self) -> impl Iterator<Item = SegmentId> + '_ {
        let mut cursor = self.head;

        iter::from_fn(move || {
            let current = cursor?;
            cursor = self.entry(current).next;
            Some(current)
        })
    }

    /// Links an unlinked segment at the front of the active list.
    pub(crate) fn push_front(&mut self, id: SegmentId) {
        let old_head = self.head;

        {
            let entry = self.entry_mut(id);
            assert!(!entry.linked, "segment {id:?} is already linked");

            entry.linked = true;
            entry.prev = None;
            entry.next = old_head;
        }

        match old_head {
            Some(old_head) => self.entry_mut(old_head).prev = Some(id),
            None => self.tail = Some(id),
        }

        self.head = Some(id);

        // Cannot overflow because every linked segment occupies memory.
        self.linked_count = self.linked_count.wrapping_add(1);
    }

    /// Links an unlinked segment at the back of the active list.
    pub(crate) fn push_back(&mut self, id: SegmentId) {
        let old_tail = self.tail;

        {
            let entry = self.entry_mut(id);
            assert!(!entry.linked, "segment {id:?} is already linked");

            entry.linked = true;
            entry.prev = old_tail;
            entry.next = None;
        }

        match old_tail {
            Some(old_tail) => self.entry_mut(old_tail).next = Some(id),
            None => self.head = Some(id),
        }

        self.tail = Some(id);

        // Cannot overflow because every linked segment occupies memory.
        self.linked_count = self.linked_count.wrapping_add(1);
    }

    /// Removes a segment from the active list, keeping it in the arena.
    pub(crate) fn unlink(&mut self, id: SegmentId) {
        let (prev, next) = {
            let entry = self.entry_mut(id);
            assert!(entry.linked, "segment {id:?} is not linked");

            entry.linked = false;
            (entry.prev.take(), entry.next.take())
        };

        match prev {
            Some(prev) => self.entry_mut(prev).next = next,
            None => self.head = next,
        }

        match next {
            Some(next) => self.entry_mut(next).prev = prev,
            None => self.tail = prev,
        }

        // Cannot underflow because the segment was linked.
        self.linked_count = self.linked_count.wrapping_sub(1);
    }

    pub(crate) fn move_to_front(&mut self, id: SegmentId) {
        if !self.is_front(id) {
            self.unlink(id);
            self.push_front(id);
        }
    }

    pub(crate) fn move_to_back(&mut self, id: SegmentId) {
        if self.tail != Some(id) {
            self.unlink(id);
            self.push_back(id);
        }
    }

    fn slot_mut(&mut self, id: SegmentId) -> &mut Option<Entry> {
        self.entries
            .get_mut(id.0)
            .unwrap_or_else(|| panic!("segment {id:?} was never allocated"))
    }

    fn entry(&self, id: SegmentId) -> &Entry {
        self.entries
            .get(id.0)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("segment {id:?} does not exist"))
    }

    fn entry_mut(&mut self, id: SegmentId) -> &mut Entry {
        self.entries
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("segment {id:?} does not exist"))
    }
}
