// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ananke kernel.
//!
//! This is a small preemptive multi-process kernel for a single-CPU
//! emulated machine. It multiplexes a fixed pool of processes over one CPU
//! with round-robin scheduling and a time quantum, provides counting
//! semaphores and a handful of other services via trap, fields device
//! interrupts, and detects system-wide completion and deadlock.
//!
//! # Deliberate naivety
//!
//! The algorithms in here are simple on purpose: safe Rust, fixed pools,
//! linear walks, nothing clever. Two assumptions make that affordable --
//! the process pool is tiny (twenty), so every walk is bounded by it, and
//! kernel code always runs with interrupts disabled, so nothing needs to
//! be reentrant. If either assumption ever breaks, revisit.
//!
//! # Shape
//!
//! All kernel state lives in a single [`Kernel`] value. The machine -- the
//! emulator hosting us, reached through the [`machine::Machine`] trait --
//! stores the interrupted processor state into a fixed "old area" and then
//! calls one of the four entry points (`handle_syscall`,
//! `handle_program_trap`, `handle_tlb_trap`, `handle_interrupt`). Each
//! entry point runs to completion and returns a [`Control`] telling the
//! machine whether to resume the current process, sleep until an
//! interrupt, or halt.
//!
//! Unrecoverable kernel conditions -- deadlock, or an internal invariant
//! caught broken -- are Rust panics; on the emulated machine that is the
//! PANIC primitive, a halt with a diagnostic.

// std is allowed under test only. Watch out: editor tooling tends to
// build with `test` set, so it won't complain about code that breaks the
// no_std build.
#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod interrupts;
pub mod machine;
pub mod proc;
pub mod sched;
pub mod sema;
pub mod startup;
pub mod syscalls;
pub mod time;
pub mod trace;

use abi::{SavedState, DEVICE_SEM_COUNT};
use ringbuf::Ringbuf;

use crate::proc::{ProcId, ProcTable, Queue};
use crate::sema::SemTable;
use crate::time::Timestamp;
use crate::trace::{Trace, TRACE_DEPTH};

/// The kernel: every piece of mutable kernel state, in one place.
///
/// Built once by [`Kernel::start`] and then driven entirely through the
/// four trap entry points. Mutation only ever happens inside those entry
/// points, which the machine invokes with interrupts disabled, so there is
/// no interior locking anywhere.
pub struct Kernel {
    /// Fixed pool of process control blocks.
    procs: ProcTable,
    /// Active semaphore list: one blocked-process queue per semaphore that
    /// currently has waiters.
    asl: SemTable,
    /// Processes ready to run, in FIFO order.
    ready: Queue,
    /// The process currently executing, or `None` between dispatches.
    current: Option<ProcId>,
    /// Number of live processes (PCBs outside the free pool).
    proc_count: usize,
    /// Number of processes blocked awaiting an interrupt (a device or the
    /// pseudo-clock), as opposed to a signal from another process.
    soft_block_count: usize,
    /// Time at which the pseudo-clock next fires.
    interval_deadline: Timestamp,
    /// Time at which the current process last (re)gained the CPU; the basis
    /// for its CPU-time charge.
    accounting_start: Timestamp,
    /// Last seen status word for each device, buffering a completion that
    /// arrives before anyone waits for it.
    device_status: [u32; DEVICE_SEM_COUNT],
    /// Event trace for debugger consumption.
    trace: Ringbuf<Trace, TRACE_DEPTH>,
}

/// What the machine should do when a kernel entry point returns.
///
/// This is marked `must_use` because dropping one means the machine never
/// finds out whether anything is still runnable, which would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum Control {
    /// Load the current process's saved state and return to it.
    Resume,
    /// Nothing is runnable, but blocked processes are awaiting interrupts:
    /// enter the wait state (interrupts enabled, privileged mode) until the
    /// next interrupt arrives.
    Idle,
    /// Every process has terminated. Clean shutdown.
    Halt,
}

impl Kernel {
    /// Number of live processes.
    pub fn proc_count(&self) -> usize {
        self.proc_count
    }

    /// Number of processes blocked awaiting a device or the pseudo-clock.
    pub fn soft_block_count(&self) -> usize {
        self.soft_block_count
    }

    /// The currently dispatched process, if any.
    pub fn current(&self) -> Option<ProcId> {
        self.current
    }

    /// Saved state of the currently dispatched process; this is what a
    /// [`Control::Resume`] asks the machine to load.
    pub fn current_state(&self) -> Option<&SavedState> {
        self.current.map(|p| &self.procs[p].state)
    }

    /// Read-only view of the kernel event trace.
    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }

    /// Returns the current process's ID, panicking if there isn't one.
    /// Every trap entry implies a process was executing, so a missing
    /// current process at these call sites is a machine/kernel disconnect.
    pub(crate) fn running(&self) -> ProcId {
        match self.current {
            Some(p) => p,
            None => panic!("trap taken with no process dispatched"),
        }
    }
}
