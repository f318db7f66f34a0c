// src/idle.rs
use std::collections::HashMap;
use std::os::fd::RawFd;

const NIL: usize = usize::MAX;

struct Slot<T> {
    entry: Option<(RawFd, T)>,
    prev: usize,
    // Doubles as the free-list link while the slot is vacant.
    next: usize,
}

/// Ordered set of idle connections keyed by descriptor.
///
/// Entries live in a slab of slots linked oldest-first. The descriptor index
/// points at slot positions, so push, pop from either end and removal by
/// descriptor are all O(1). Vacant slots are recycled through a free list
/// and the slab never shrinks.
pub(crate) struct IdleList<T> {
    slots: Vec<Slot<T>>,
    index: HashMap<RawFd, usize>,
    head: usize,
    tail: usize,
    free: usize,
    len: usize,
}

impl<T> IdleList<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            free: NIL,
            len: 0,
        }
    }

    /// Append as the newest entry. Hands the value back if `fd` is already present.
    pub fn push_back(&mut self, fd: RawFd, value: T) -> Result<(), T> {
        if self.index.contains_key(&fd) {
            return Err(value);
        }

        let idx = self.allocate(fd, value);
        self.slots[idx].prev = self.tail;
        if self.tail == NIL {
            self.head = idx;
        } else {
            self.slots[self.tail].next = idx;
        }
        self.tail = idx;

        self.index.insert(fd, idx);
        self.len += 1;
        Ok(())
    }

    /// Remove the oldest entry.
    pub fn pop_front(&mut self) -> Option<(RawFd, T)> {
        if self.head == NIL {
            return None;
        }
        Some(self.unlink(self.head))
    }

    /// Remove the newest entry.
    pub fn pop_back(&mut self) -> Option<(RawFd, T)> {
        if self.tail == NIL {
            return None;
        }
        Some(self.unlink(self.tail))
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<T> {
        let idx = *self.index.get(&fd)?;
        Some(self.unlink(idx).1)
    }

    pub fn get(&self, fd: RawFd) -> Option<&T> {
        let idx = *self.index.get(&fd)?;
        self.slots[idx].entry.as_ref().map(|(_, value)| value)
    }

    #[cfg(test)]
    pub fn contains(&self, fd: RawFd) -> bool {
        self.index.contains_key(&fd)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove every entry, oldest first.
    pub fn drain(&mut self) -> Vec<(RawFd, T)> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(entry) = self.pop_front() {
            out.push(entry);
        }
        out
    }

    /// Descriptors in order, oldest first.
    #[cfg(test)]
    pub fn fds(&self) -> Vec<RawFd> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while cursor != NIL {
            if let Some((fd, _)) = &self.slots[cursor].entry {
                out.push(*fd);
            }
            cursor = self.slots[cursor].next;
        }
        out
    }

    fn allocate(&mut self, fd: RawFd, value: T) -> usize {
        let slot = Slot {
            entry: Some((fd, value)),
            prev: NIL,
            next: NIL,
        };
        if self.free == NIL {
            self.slots.push(slot);
            return self.slots.len() - 1;
        }
        let idx = self.free;
        self.free = self.slots[idx].next;
        self.slots[idx] = slot;
        idx
    }

    fn unlink(&mut self, idx: usize) -> (RawFd, T) {
        let prev = self.slots[idx].prev;
        let next = self.slots[idx].next;

        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }

        let slot = &mut self.slots[idx];
        let entry = slot.entry.take();
        slot.prev = NIL;
        slot.next = self.free;
        self.free = idx;
        self.len -= 1;

        match entry {
            Some((fd, value)) => {
                self.index.remove(&fd);
                (fd, value)
            }
            // Only linked slots reach here and linked slots are always occupied.
            None => unreachable!("idle list linked a vacant slot"),
        }
    }

    /// Walks the links and checks them against the index.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        let mut cursor = self.head;
        let mut prev = NIL;
        let mut seen = 0;
        while cursor != NIL {
            let slot = &self.slots[cursor];
            assert_eq!(slot.prev, prev, "broken back link at slot {cursor}");
            let (fd, _) = slot.entry.as_ref().expect("linked slot is vacant");
            assert_eq!(self.index.get(fd), Some(&cursor), "index disagrees for fd {fd}");
            seen += 1;
            prev = cursor;
            cursor = slot.next;
        }
        assert_eq!(prev, self.tail);
        assert_eq!(seen, self.len);
        assert_eq!(self.index.len(), self.len);
    }
}
