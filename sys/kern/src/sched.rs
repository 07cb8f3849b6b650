// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler: round-robin with a time quantum, plus the system-wide
//! completion, deadlock, and idle decisions.
//!
//! Everything here assumes it is reached with no process dispatched --
//! whoever gave up the CPU (or had it taken) has already been enqueued,
//! blocked, or torn down by the caller.

use abi::QUANTUM;
use ringbuf::ringbuf_entry;

use crate::machine::Machine;
use crate::trace::Trace;
use crate::{Control, Kernel};

impl Kernel {
    /// Picks what runs next.
    ///
    /// In order: dispatch the head of the ready queue; halt if no process
    /// exists at all; declare deadlock if processes exist but none can
    /// ever run again; otherwise idle until an interrupt delivers a
    /// runnable process.
    ///
    /// # Panics
    ///
    /// On deadlock: the ready queue is empty, processes remain, and none
    /// of them is awaiting an interrupt, so no future event can unblock
    /// anything.
    pub(crate) fn schedule(&mut self, machine: &mut impl Machine) -> Control {
        debug_assert!(self.current.is_none());

        if let Some(p) = self.procs.dequeue(&mut self.ready) {
            self.current = Some(p);
            let now = machine.now();
            // The quantum may be cut short so the pseudo-clock tick lands
            // on time. A deadline already in the past programs a zero
            // timer, forcing an immediate line-2 interrupt.
            let remaining = self.interval_deadline.saturating_since(now);
            machine.set_timer(remaining.min(QUANTUM));
            self.accounting_start = now;
            ringbuf_entry!(self.trace, Trace::Dispatch(p));
            return Control::Resume;
        }

        if self.proc_count == 0 {
            ringbuf_entry!(self.trace, Trace::Halt);
            return Control::Halt;
        }

        if self.soft_block_count == 0 {
            panic!(
                "deadlock: {} processes blocked with no interrupt pending",
                self.proc_count
            );
        }

        // Sleep out the rest of the interval; the timer (or a device) will
        // wake us with something to do.
        let now = machine.now();
        machine.set_timer(self.interval_deadline.saturating_since(now));
        ringbuf_entry!(self.trace, Trace::Idle);
        Control::Idle
    }

    /// Charges the current process for the CPU time since it last resumed
    /// and restarts the accounting clock. Call this before blocking or
    /// preempting, and before reporting CPU time; time spent blocked is
    /// never charged.
    pub(crate) fn update_time(&mut self, machine: &impl Machine) {
        if let Some(cur) = self.current {
            let now = machine.now();
            self.procs[cur].cpu_time +=
                now.saturating_since(self.accounting_start);
            self.accounting_start = now;
        }
    }
}
