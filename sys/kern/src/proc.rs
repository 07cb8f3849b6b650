// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process control blocks, process queues, and the process tree.
//!
//! All PCBs live in a fixed arena ([`ProcTable`]) and are named by index
//! ([`ProcId`]); links between them are `Option<ProcId>`, never pointers.
//! This keeps the whole module in safe code and makes the structures easy
//! to dump from a debugger.
//!
//! A process queue is circular, doubly linked, and named by its *tail*: a
//! [`Queue`] is just an optional tail ID, `None` meaning empty, and the
//! head is always `tail.next`. Queue operations live on `ProcTable` since
//! that's where the links are. The free pool is itself such a queue,
//! threaded through the same links -- a PCB is either free, in one queue,
//! or dispatched, never more than one of those.
//!
//! The process tree hangs off three more links per PCB: `parent`,
//! `first_child` (the most recently added child), and the sibling chain
//! running from `first_child` through `prev_sib` toward older siblings.
//! `next_sib` points the other way, toward the newer sibling; the first
//! child's `next_sib` is always `None`.

use abi::{SavedState, TrapKind, MAX_PROC};

/// Names a slot in the PCB arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct ProcId(u8);

impl ProcId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// An exception vector registered by SPECTRAPVEC: where to stash the
/// offending state, and where to find the state to resume with.
#[derive(Copy, Clone, Debug)]
pub struct TrapVector {
    pub old_area: u32,
    pub new_area: u32,
}

/// One process control block.
pub struct Pcb {
    next: Option<ProcId>,
    prev: Option<ProcId>,
    parent: Option<ProcId>,
    first_child: Option<ProcId>,
    next_sib: Option<ProcId>,
    prev_sib: Option<ProcId>,

    /// Saved machine state of the process.
    pub(crate) state: SavedState,
    /// Microseconds of CPU time charged so far.
    pub(crate) cpu_time: u64,
    /// Address of the semaphore this process is blocked on, or `None` when
    /// it is ready, dispatched, or free.
    pub(crate) sem_addr: Option<u32>,
    /// Exception vectors, one slot per trap kind, unset until the process
    /// registers one.
    pub(crate) vectors: [Option<TrapVector>; TrapKind::COUNT],
}

impl Pcb {
    /// A PCB with every field at its just-allocated value. PCBs get
    /// reused, so it is important that no previous life's state persists
    /// through the free pool.
    fn reset() -> Self {
        Pcb {
            next: None,
            prev: None,
            parent: None,
            first_child: None,
            next_sib: None,
            prev_sib: None,
            state: SavedState::default(),
            cpu_time: 0,
            sem_addr: None,
            vectors: [None; TrapKind::COUNT],
        }
    }
}

/// A process queue, named by its tail. `None` iff the queue is empty.
#[derive(Copy, Clone, Debug, Default)]
pub struct Queue {
    tail: Option<ProcId>,
}

impl Queue {
    pub const fn new() -> Self {
        Queue { tail: None }
    }

    pub fn is_empty(&self) -> bool {
        self.tail.is_none()
    }
}

/// The PCB arena plus its free pool.
pub struct ProcTable {
    slots: [Pcb; MAX_PROC],
    free: Queue,
}

impl ProcTable {
    /// Creates a table with every PCB on the free pool.
    pub fn new() -> Self {
        let mut table = ProcTable {
            slots: core::array::from_fn(|_| Pcb::reset()),
            free: Queue::new(),
        };
        let mut free = Queue::new();
        for i in 0..MAX_PROC {
            table.enqueue(&mut free, ProcId(i as u8));
        }
        table.free = free;
        table
    }

    /// Takes a PCB off the free pool, reset to its initial state. Returns
    /// `None` if the pool is exhausted.
    pub fn alloc(&mut self) -> Option<ProcId> {
        let mut free = core::mem::take(&mut self.free);
        let got = self.dequeue(&mut free);
        self.free = free;
        let p = got?;
        self.slots[p.index()] = Pcb::reset();
        Some(p)
    }

    /// Returns `p` to the free pool. The caller guarantees `p` is no
    /// longer in any queue or tree.
    pub fn release(&mut self, p: ProcId) {
        let mut free = core::mem::take(&mut self.free);
        self.enqueue(&mut free, p);
        self.free = free;
    }

    /// Number of PCBs currently on the free pool. Mostly interesting to
    /// tests and debuggers.
    pub fn free_count(&self) -> usize {
        let mut n = 0;
        if let Some(tail) = self.free.tail {
            let mut cursor = self.next_of(tail);
            loop {
                n += 1;
                if cursor == tail {
                    break;
                }
                cursor = self.next_of(cursor);
            }
        }
        n
    }

    //
    // Queue operations.
    //

    /// The head of `q` (the oldest element), without removing it.
    pub fn head(&self, q: &Queue) -> Option<ProcId> {
        q.tail.map(|t| self.next_of(t))
    }

    /// Appends `p` at the tail of `q`.
    pub fn enqueue(&mut self, q: &mut Queue, p: ProcId) {
        match q.tail {
            None => {
                // Sole element: a one-cycle.
                self.slots[p.index()].next = Some(p);
                self.slots[p.index()].prev = Some(p);
            }
            Some(tail) => {
                let head = self.next_of(tail);
                self.slots[p.index()].next = Some(head);
                self.slots[p.index()].prev = Some(tail);
                self.slots[tail.index()].next = Some(p);
                self.slots[head.index()].prev = Some(p);
            }
        }
        q.tail = Some(p);
    }

    /// Pops the head of `q`, or `None` if it's empty. The returned PCB's
    /// queue links are cleared.
    pub fn dequeue(&mut self, q: &mut Queue) -> Option<ProcId> {
        let tail = q.tail?;
        let head = self.next_of(tail);
        if head == tail {
            q.tail = None;
        } else {
            let new_head = self.next_of(head);
            self.slots[tail.index()].next = Some(new_head);
            self.slots[new_head.index()].prev = Some(tail);
        }
        self.clear_queue_links(head);
        Some(head)
    }

    /// Removes `p` from wherever it sits in `q`. Returns `None` -- an error
    /// condition for callers -- if `p` isn't actually a member.
    pub fn remove(&mut self, q: &mut Queue, p: ProcId) -> Option<ProcId> {
        let tail = q.tail?;
        if p == tail {
            let head = self.next_of(tail);
            if head == tail {
                q.tail = None;
            } else {
                let prev = self.prev_of(tail);
                self.slots[prev.index()].next = Some(head);
                self.slots[head.index()].prev = Some(prev);
                q.tail = Some(prev);
            }
            self.clear_queue_links(p);
            return Some(p);
        }

        let mut cursor = self.next_of(tail);
        while cursor != tail {
            if cursor == p {
                let prev = self.prev_of(p);
                let next = self.next_of(p);
                self.slots[prev.index()].next = Some(next);
                self.slots[next.index()].prev = Some(prev);
                self.clear_queue_links(p);
                return Some(p);
            }
            cursor = self.next_of(cursor);
        }
        None
    }

    //
    // Tree operations.
    //

    pub fn first_child(&self, p: ProcId) -> Option<ProcId> {
        self.slots[p.index()].first_child
    }

    pub fn has_children(&self, p: ProcId) -> bool {
        self.slots[p.index()].first_child.is_some()
    }

    /// Makes `p` the newest child of `parent`.
    pub fn insert_child(&mut self, parent: ProcId, p: ProcId) {
        match self.slots[parent.index()].first_child {
            Some(older) => {
                self.slots[older.index()].next_sib = Some(p);
                self.slots[p.index()].prev_sib = Some(older);
            }
            None => {
                self.slots[p.index()].prev_sib = None;
            }
        }
        self.slots[p.index()].next_sib = None;
        self.slots[p.index()].parent = Some(parent);
        self.slots[parent.index()].first_child = Some(p);
    }

    /// Detaches and returns `parent`'s newest child, or `None` if it has
    /// none.
    pub fn remove_first_child(&mut self, parent: ProcId) -> Option<ProcId> {
        let first = self.slots[parent.index()].first_child?;
        match self.slots[first.index()].prev_sib {
            None => {
                self.slots[parent.index()].first_child = None;
            }
            Some(older) => {
                self.slots[parent.index()].first_child = Some(older);
                self.slots[older.index()].next_sib = None;
                self.slots[first.index()].prev_sib = None;
            }
        }
        self.slots[first.index()].parent = None;
        Some(first)
    }

    /// Detaches `p` from its parent's child chain, wherever it sits in it.
    /// Returns `None` if `p` is an orphan.
    pub fn detach_child(&mut self, p: ProcId) -> Option<ProcId> {
        let parent = self.slots[p.index()].parent?;
        if self.slots[parent.index()].first_child == Some(p) {
            return self.remove_first_child(parent);
        }

        // Not the first child, so a newer sibling necessarily exists.
        let newer = match self.slots[p.index()].next_sib {
            Some(n) => n,
            None => panic!("child chain corrupt at {:?}", p),
        };
        match self.slots[p.index()].prev_sib {
            None => {
                // Oldest child: just terminate the chain at the newer one.
                self.slots[newer.index()].prev_sib = None;
            }
            Some(older) => {
                self.slots[newer.index()].prev_sib = Some(older);
                self.slots[older.index()].next_sib = Some(newer);
                self.slots[p.index()].prev_sib = None;
            }
        }
        self.slots[p.index()].next_sib = None;
        self.slots[p.index()].parent = None;
        Some(p)
    }

    //
    // Internals.
    //

    fn next_of(&self, p: ProcId) -> ProcId {
        match self.slots[p.index()].next {
            Some(n) => n,
            None => panic!("queue structure corrupt at {:?}", p),
        }
    }

    fn prev_of(&self, p: ProcId) -> ProcId {
        match self.slots[p.index()].prev {
            Some(n) => n,
            None => panic!("queue structure corrupt at {:?}", p),
        }
    }

    fn clear_queue_links(&mut self, p: ProcId) {
        self.slots[p.index()].next = None;
        self.slots[p.index()].prev = None;
    }

    /// Queue contents, head first. Test support.
    #[cfg(test)]
    fn queue_contents(&self, q: &Queue) -> Vec<ProcId> {
        let mut out = Vec::new();
        if let Some(tail) = q.tail {
            let mut cursor = self.next_of(tail);
            loop {
                out.push(cursor);
                if cursor == tail {
                    break;
                }
                cursor = self.next_of(cursor);
            }
        }
        out
    }
}

impl core::ops::Index<ProcId> for ProcTable {
    type Output = Pcb;

    fn index(&self, id: ProcId) -> &Pcb {
        &self.slots[id.index()]
    }
}

impl core::ops::IndexMut<ProcId> for ProcTable {
    fn index_mut(&mut self, id: ProcId) -> &mut Pcb {
        &mut self.slots[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Allocates `n` PCBs or dies trying.
    fn table_with(n: usize) -> (ProcTable, Vec<ProcId>) {
        let mut t = ProcTable::new();
        let ids = (0..n)
            .map(|i| t.alloc().unwrap_or_else(|| panic!("alloc {i} failed")))
            .collect();
        (t, ids)
    }

    #[test]
    fn pool_hands_out_exactly_max_proc() {
        let (mut t, ids) = table_with(MAX_PROC);
        assert_eq!(ids.len(), MAX_PROC);
        assert_eq!(t.free_count(), 0);
        assert!(t.alloc().is_none(), "pool should be exhausted");

        // Releasing one makes exactly one allocatable again.
        t.release(ids[3]);
        assert_eq!(t.free_count(), 1);
        let again = t.alloc().expect("released PCB should be reusable");
        assert_eq!(again, ids[3]);
        assert!(t.alloc().is_none());
    }

    #[test]
    fn reused_pcb_is_fully_reset() {
        let (mut t, ids) = table_with(2);
        let p = ids[0];
        t[p].cpu_time = 12345;
        t[p].sem_addr = Some(0x9000);
        t[p].vectors[0] = Some(TrapVector { old_area: 1, new_area: 2 });
        t[p].state.a1 = 99;
        t.insert_child(ids[1], p);
        t.detach_child(p);
        t.release(p);

        let q = t.alloc().expect("alloc after release");
        assert_eq!(q, p);
        assert_eq!(t[q].cpu_time, 0);
        assert_eq!(t[q].sem_addr, None);
        assert!(t[q].vectors[0].is_none());
        assert_eq!(t[q].state.a1, 0);
        assert!(t.first_child(q).is_none());
    }

    #[test]
    fn queue_is_fifo() {
        let (mut t, ids) = table_with(5);
        let mut q = Queue::new();
        assert!(q.is_empty());
        assert_eq!(t.head(&q), None);
        assert_eq!(t.dequeue(&mut q), None);

        for &p in &ids {
            t.enqueue(&mut q, p);
        }
        assert_eq!(t.head(&q), Some(ids[0]));
        assert_eq!(t.queue_contents(&q), ids);

        for &p in &ids {
            assert_eq!(t.dequeue(&mut q), Some(p));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn queue_against_model() {
        // Scripted interleaving of insert/removeHead checked against a Vec
        // model, crossing the empty boundary repeatedly.
        let (mut t, ids) = table_with(4);
        let mut q = Queue::new();
        let mut model: Vec<ProcId> = Vec::new();
        let script: &[(bool, usize)] = &[
            (true, 0),
            (true, 1),
            (false, 0),
            (true, 2),
            (false, 0),
            (false, 0),
            (false, 0), // empty again
            (true, 3),
            (true, 0),
            (false, 0),
        ];
        for &(push, i) in script {
            if push {
                t.enqueue(&mut q, ids[i]);
                model.push(ids[i]);
            } else {
                let expect = if model.is_empty() {
                    None
                } else {
                    Some(model.remove(0))
                };
                assert_eq!(t.dequeue(&mut q), expect);
            }
            assert_eq!(t.queue_contents(&q), model);
            assert_eq!(q.is_empty(), model.is_empty());
        }
    }

    #[test]
    fn remove_from_every_position() {
        for victim in 0..4 {
            let (mut t, ids) = table_with(4);
            let mut q = Queue::new();
            for &p in &ids {
                t.enqueue(&mut q, p);
            }
            assert_eq!(t.remove(&mut q, ids[victim]), Some(ids[victim]));

            let expect: Vec<ProcId> = ids
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != victim)
                .map(|(_, &p)| p)
                .collect();
            assert_eq!(t.queue_contents(&q), expect, "victim {victim}");

            // Removing it again is an error, reported as None.
            assert_eq!(t.remove(&mut q, ids[victim]), None);
        }
    }

    #[test]
    fn remove_last_element_empties_queue() {
        let (mut t, ids) = table_with(1);
        let mut q = Queue::new();
        t.enqueue(&mut q, ids[0]);
        assert_eq!(t.remove(&mut q, ids[0]), Some(ids[0]));
        assert!(q.is_empty());
    }

    #[test]
    fn remove_from_empty_queue_is_none() {
        let (mut t, ids) = table_with(1);
        let mut q = Queue::new();
        assert_eq!(t.remove(&mut q, ids[0]), None);
    }

    #[test]
    fn newest_child_is_first_child() {
        let (mut t, ids) = table_with(4);
        let parent = ids[0];
        assert!(!t.has_children(parent));
        assert_eq!(t.remove_first_child(parent), None);

        for &c in &ids[1..] {
            t.insert_child(parent, c);
            assert_eq!(t.first_child(parent), Some(c));
        }

        // Children come back off newest-first.
        assert_eq!(t.remove_first_child(parent), Some(ids[3]));
        assert_eq!(t.remove_first_child(parent), Some(ids[2]));
        assert_eq!(t.remove_first_child(parent), Some(ids[1]));
        assert!(!t.has_children(parent));
    }

    #[test]
    fn detach_child_from_any_position() {
        // Detach the newest, oldest, and a middle child in turn; the
        // remaining chain must stay intact each time.
        for victim in 1..4 {
            let (mut t, ids) = table_with(4);
            let parent = ids[0];
            for &c in &ids[1..] {
                t.insert_child(parent, c);
            }

            assert_eq!(t.detach_child(ids[victim]), Some(ids[victim]));

            // Drain the remaining children and check the survivors appear,
            // newest first.
            let mut survivors = Vec::new();
            while let Some(c) = t.remove_first_child(parent) {
                survivors.push(c);
            }
            let expect: Vec<ProcId> = ids[1..]
                .iter()
                .rev()
                .filter(|&&c| c != ids[victim])
                .copied()
                .collect();
            assert_eq!(survivors, expect, "victim {victim}");
        }
    }

    #[test]
    fn detach_orphan_is_none() {
        let (mut t, ids) = table_with(1);
        assert_eq!(t.detach_child(ids[0]), None);
    }
}
