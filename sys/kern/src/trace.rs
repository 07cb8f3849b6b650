// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel event trace.
//!
//! Scheduling decisions and trap entries get recorded into a ring buffer
//! inside the [`Kernel`](crate::Kernel) so a debugger attached to the
//! emulator (or a curious test) can reconstruct recent history. Entries
//! are tiny `Copy` values; consecutive repeats collapse into a count, so a
//! process spinning on one syscall doesn't wipe the history.

use crate::proc::ProcId;

/// Depth of the kernel's trace ring.
pub const TRACE_DEPTH: usize = 64;

/// One traced kernel event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    /// A service request arrived with this number in `a1`.
    Syscall(u32),
    /// The scheduler handed the CPU to this process.
    Dispatch(ProcId),
    /// End of quantum: this process went back to the ready queue.
    Preempt(ProcId),
    /// An interrupt arrived on this line.
    Interrupt(u8),
    /// The pseudo-clock fired and released its waiters.
    IntervalTick,
    /// This process and its descendants were torn down.
    Terminate(ProcId),
    /// Nothing runnable; waiting for an interrupt.
    Idle,
    /// All processes done.
    Halt,
}
