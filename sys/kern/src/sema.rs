// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The active semaphore list (ASL).
//!
//! A semaphore is "active" while at least one process is blocked on it.
//! Each active semaphore gets a descriptor holding the queue of its
//! waiters; descriptors live in a fixed pool and are chained into a singly
//! linked list sorted by semaphore address, so membership checks and
//! insertion are one predecessor search.
//!
//! Two permanent sentinel descriptors bracket the list, keyed `0` and
//! `u32::MAX`. Every real node therefore has a predecessor and a
//! successor, which removes all the edge cases from the search: walk from
//! the head while the next key is below the target, and the answer is
//! always "the node after the one you stopped on".
//!
//! The pool holds `MAX_PROC + 2` descriptors: at most `MAX_PROC` distinct
//! semaphores can have waiters at once (each waiter is a process), plus
//! the sentinels. Exhaustion is therefore unreachable in a correctly
//! accounted kernel, but the allocation path still fails closed and lets
//! the caller decide how loudly to die.

use abi::MAX_PROC;

use crate::proc::{ProcId, ProcTable, Queue};

/// Error returned when a new descriptor was needed and the pool was empty.
/// The process was *not* enqueued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoolExhausted;

/// Names a slot in the descriptor pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
struct SemdId(u8);

impl SemdId {
    fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// One semaphore descriptor.
struct Semd {
    /// Successor on the active list, or the next free descriptor while
    /// pooled.
    next: Option<SemdId>,
    /// Address of the semaphore word this descriptor stands for.
    key: u32,
    /// Processes blocked on this semaphore, FIFO.
    queue: Queue,
}

const POOL_SIZE: usize = MAX_PROC + 2;

/// The descriptor pool and the active list threaded through it.
pub struct SemTable {
    slots: [Semd; POOL_SIZE],
    /// Head of the free chain.
    free: Option<SemdId>,
    /// The head sentinel (key 0).
    head: SemdId,
}

impl SemTable {
    pub fn new() -> Self {
        let mut table = SemTable {
            slots: core::array::from_fn(|_| Semd {
                next: None,
                key: 0,
                queue: Queue::new(),
            }),
            free: None,
            head: SemdId(0),
        };
        for i in 0..POOL_SIZE {
            table.free_descriptor(SemdId(i as u8));
        }

        let head = table.must_alloc();
        let tail = table.must_alloc();
        table.slots[tail.index()].key = u32::MAX;
        table.slots[tail.index()].next = None;
        table.slots[head.index()].key = 0;
        table.slots[head.index()].next = Some(tail);
        table.head = head;
        table
    }

    /// Appends `p` to the queue of waiters for the semaphore at `key`,
    /// activating the semaphore if this is its first waiter, and records
    /// the blockage in `p`'s PCB.
    pub fn insert_blocked(
        &mut self,
        procs: &mut ProcTable,
        key: u32,
        p: ProcId,
    ) -> Result<(), PoolExhausted> {
        let pred = self.find_pred(key);
        let succ = self.next_of(pred);
        let d = if self.slots[succ.index()].key == key {
            succ
        } else {
            let d = self.alloc_descriptor().ok_or(PoolExhausted)?;
            self.slots[d.index()].key = key;
            self.slots[d.index()].queue = Queue::new();
            self.slots[d.index()].next = Some(succ);
            self.slots[pred.index()].next = Some(d);
            d
        };

        let mut q = self.slots[d.index()].queue;
        procs.enqueue(&mut q, p);
        self.slots[d.index()].queue = q;
        procs[p].sem_addr = Some(key);
        Ok(())
    }

    /// Pops the head waiter for the semaphore at `key`, deactivating the
    /// semaphore if its queue drains. Returns `None` if `key` has no
    /// waiters at all.
    pub fn remove_blocked(
        &mut self,
        procs: &mut ProcTable,
        key: u32,
    ) -> Option<ProcId> {
        let pred = self.find_pred(key);
        let d = self.next_of(pred);
        if self.slots[d.index()].key != key {
            return None;
        }

        let mut q = self.slots[d.index()].queue;
        let got = procs.dequeue(&mut q);
        self.slots[d.index()].queue = q;
        let p = match got {
            Some(p) => p,
            None => panic!("active descriptor for {key:#x} has no waiters"),
        };

        if self.slots[d.index()].queue.is_empty() {
            self.unlink_after(pred, d);
        }
        Some(p)
    }

    /// Removes `p` from the queue of the semaphore its PCB says it is
    /// blocked on. Returns `None` -- an error condition -- if `p` isn't
    /// marked blocked, or isn't actually on that queue.
    pub fn out_blocked(
        &mut self,
        procs: &mut ProcTable,
        p: ProcId,
    ) -> Option<ProcId> {
        let key = procs[p].sem_addr?;
        let pred = self.find_pred(key);
        let d = self.next_of(pred);
        if self.slots[d.index()].key != key {
            return None;
        }

        let mut q = self.slots[d.index()].queue;
        let got = procs.remove(&mut q, p);
        self.slots[d.index()].queue = q;
        got?;

        if self.slots[d.index()].queue.is_empty() {
            self.unlink_after(pred, d);
        }
        Some(p)
    }

    /// The head waiter for `key`, without unblocking it. `None` if the
    /// semaphore has no waiters.
    pub fn head_blocked(&self, procs: &ProcTable, key: u32) -> Option<ProcId> {
        let pred = self.find_pred(key);
        let d = self.next_of(pred);
        if self.slots[d.index()].key != key {
            return None;
        }
        procs.head(&self.slots[d.index()].queue)
    }

    //
    // Internals.
    //

    /// Finds the node after which `key` sits (or would sit): the last node
    /// whose successor's key is not below `key`. Thanks to the sentinels
    /// this always exists and always has a successor.
    fn find_pred(&self, key: u32) -> SemdId {
        let mut cursor = self.head;
        while let Some(n) = self.slots[cursor.index()].next {
            if self.slots[n.index()].key < key {
                cursor = n;
            } else {
                break;
            }
        }
        cursor
    }

    fn next_of(&self, d: SemdId) -> SemdId {
        match self.slots[d.index()].next {
            Some(n) => n,
            None => panic!("semaphore list corrupt at {:?}", d),
        }
    }

    fn unlink_after(&mut self, pred: SemdId, d: SemdId) {
        self.slots[pred.index()].next = self.slots[d.index()].next;
        self.free_descriptor(d);
    }

    fn alloc_descriptor(&mut self) -> Option<SemdId> {
        let d = self.free?;
        self.free = self.slots[d.index()].next;
        self.slots[d.index()].next = None;
        self.slots[d.index()].key = 0;
        self.slots[d.index()].queue = Queue::new();
        Some(d)
    }

    fn free_descriptor(&mut self, d: SemdId) {
        self.slots[d.index()].key = 0;
        self.slots[d.index()].queue = Queue::new();
        self.slots[d.index()].next = self.free;
        self.free = Some(d);
    }

    fn must_alloc(&mut self) -> SemdId {
        match self.alloc_descriptor() {
            Some(d) => d,
            None => panic!("descriptor pool empty during init"),
        }
    }

    /// Keys of the active (non-sentinel) descriptors, in list order. Test
    /// support.
    #[cfg(test)]
    fn active_keys(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = self.next_of(self.head);
        while let Some(n) = self.slots[cursor.index()].next {
            out.push(self.slots[cursor.index()].key);
            cursor = n;
        }
        // `cursor` is now the tail sentinel, which we don't report.
        out
    }

    /// Number of descriptors on the free chain. Test support.
    #[cfg(test)]
    fn free_count(&self) -> usize {
        let mut n = 0;
        let mut cursor = self.free;
        while let Some(d) = cursor {
            n += 1;
            cursor = self.slots[d.index()].next;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(nprocs: usize) -> (SemTable, ProcTable, Vec<ProcId>) {
        let mut procs = ProcTable::new();
        let ids = (0..nprocs).map(|_| procs.alloc().unwrap()).collect();
        (SemTable::new(), procs, ids)
    }

    #[test]
    fn starts_with_no_active_semaphores() {
        let (asl, procs, _) = setup(0);
        assert_eq!(asl.active_keys(), Vec::<u32>::new());
        assert_eq!(asl.free_count(), MAX_PROC);
        assert_eq!(asl.head_blocked(&procs, 0x9000), None);
    }

    #[test]
    fn keys_stay_sorted_regardless_of_insertion_order() {
        let (mut asl, mut procs, ids) = setup(4);
        for (&p, key) in ids.iter().zip([0x9000, 0x100, 0x5000, 0x200]) {
            asl.insert_blocked(&mut procs, key, p).unwrap();
        }
        assert_eq!(asl.active_keys(), vec![0x100, 0x200, 0x5000, 0x9000]);
    }

    #[test]
    fn descriptor_exists_iff_queue_nonempty() {
        let (mut asl, mut procs, ids) = setup(2);
        let key = 0x8000;

        asl.insert_blocked(&mut procs, key, ids[0]).unwrap();
        asl.insert_blocked(&mut procs, key, ids[1]).unwrap();
        // Two waiters, one descriptor.
        assert_eq!(asl.active_keys(), vec![key]);
        assert_eq!(asl.free_count(), MAX_PROC - 1);

        assert_eq!(asl.remove_blocked(&mut procs, key), Some(ids[0]));
        assert_eq!(asl.active_keys(), vec![key]);

        assert_eq!(asl.remove_blocked(&mut procs, key), Some(ids[1]));
        // Queue drained: descriptor reclaimed.
        assert_eq!(asl.active_keys(), Vec::<u32>::new());
        assert_eq!(asl.free_count(), MAX_PROC);

        assert_eq!(asl.remove_blocked(&mut procs, key), None);
    }

    #[test]
    fn waiters_wake_in_fifo_order() {
        let (mut asl, mut procs, ids) = setup(3);
        let key = 0x4000;
        for &p in &ids {
            asl.insert_blocked(&mut procs, key, p).unwrap();
        }
        assert_eq!(asl.head_blocked(&procs, key), Some(ids[0]));
        assert_eq!(asl.remove_blocked(&mut procs, key), Some(ids[0]));
        assert_eq!(asl.remove_blocked(&mut procs, key), Some(ids[1]));
        assert_eq!(asl.remove_blocked(&mut procs, key), Some(ids[2]));
    }

    #[test]
    fn insert_records_blockage_in_pcb() {
        let (mut asl, mut procs, ids) = setup(1);
        asl.insert_blocked(&mut procs, 0x7777, ids[0]).unwrap();
        assert_eq!(procs[ids[0]].sem_addr, Some(0x7777));
    }

    #[test]
    fn out_blocked_plucks_from_middle() {
        let (mut asl, mut procs, ids) = setup(3);
        let key = 0x4000;
        for &p in &ids {
            asl.insert_blocked(&mut procs, key, p).unwrap();
        }

        assert_eq!(asl.out_blocked(&mut procs, ids[1]), Some(ids[1]));
        // Remaining waiters still in order, descriptor still active.
        assert_eq!(asl.remove_blocked(&mut procs, key), Some(ids[0]));
        assert_eq!(asl.remove_blocked(&mut procs, key), Some(ids[2]));
        assert_eq!(asl.active_keys(), Vec::<u32>::new());
    }

    #[test]
    fn out_blocked_on_unblocked_pcb_is_error() {
        let (mut asl, mut procs, ids) = setup(2);
        // Never blocked: no sem_addr.
        assert_eq!(asl.out_blocked(&mut procs, ids[0]), None);

        // Marked blocked on a semaphore whose queue it isn't on.
        asl.insert_blocked(&mut procs, 0x4000, ids[0]).unwrap();
        procs[ids[1]].sem_addr = Some(0x4000);
        // ids[1] claims 0x4000 but isn't queued there.
        assert_eq!(asl.out_blocked(&mut procs, ids[1]), None);
    }

    #[test]
    fn sum_of_queue_lengths_matches_blocked_count() {
        let (mut asl, mut procs, ids) = setup(MAX_PROC);
        // Spread all processes over a handful of semaphores.
        let keys = [0x1000u32, 0x2000, 0x3000];
        for (i, &p) in ids.iter().enumerate() {
            asl.insert_blocked(&mut procs, keys[i % keys.len()], p).unwrap();
        }
        assert_eq!(asl.active_keys().len(), keys.len());

        let mut drained = 0;
        for &key in &keys {
            while asl.remove_blocked(&mut procs, key).is_some() {
                drained += 1;
            }
        }
        assert_eq!(drained, MAX_PROC);
        assert_eq!(asl.free_count(), MAX_PROC);
    }

    #[test]
    fn pool_supports_max_distinct_semaphores() {
        let (mut asl, mut procs, ids) = setup(MAX_PROC);
        // Worst case: every process blocked on its own semaphore.
        for (i, &p) in ids.iter().enumerate() {
            let key = 0x1000 + 0x10 * i as u32;
            asl.insert_blocked(&mut procs, key, p)
                .expect("pool must cover MAX_PROC distinct semaphores");
        }
        assert_eq!(asl.active_keys().len(), MAX_PROC);
        assert_eq!(asl.free_count(), 0);
    }
}
