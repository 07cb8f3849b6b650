// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! Boot wires up the machine's exception plumbing -- the four "new" state
//! areas the hardware resumes from when a trap or interrupt arrives -- and
//! launches the first process at the entry point the loader supplies.
//! Everything else the kernel ever does happens inside a trap entry after
//! this returns.

use abi::{
    device_sem_addr, Psr, SavedState, DEVICE_SEM_COUNT, FRAME_SIZE,
    INTERRUPT_ENTRY, INTERVAL, INT_NEW_AREA, PGM_NEW_AREA,
    PROGRAM_TRAP_ENTRY, SYSCALL_ENTRY, SYS_NEW_AREA, TLB_NEW_AREA,
    TLB_TRAP_ENTRY,
};
use ringbuf::Ringbuf;

use crate::machine::Machine;
use crate::proc::{ProcTable, Queue};
use crate::sema::SemTable;
use crate::time::Timestamp;
use crate::trace::Trace;
use crate::{Control, Kernel};

impl Kernel {
    /// Boots the kernel: populates the exception vector areas, zeroes the
    /// device semaphores, creates the first process with its program
    /// counter at `entry_point`, and dispatches it.
    ///
    /// The returned [`Control`] is always `Resume` (the first process is
    /// ready by construction), but the machine should obey it rather than
    /// assume.
    pub fn start(
        machine: &mut impl Machine,
        entry_point: u32,
    ) -> (Kernel, Control) {
        let mut kernel = Kernel {
            procs: ProcTable::new(),
            asl: SemTable::new(),
            ready: Queue::new(),
            current: None,
            proc_count: 0,
            soft_block_count: 0,
            interval_deadline: Timestamp::ZERO,
            accounting_start: Timestamp::ZERO,
            device_status: [0; DEVICE_SEM_COUNT],
            trace: Ringbuf::new(Trace::None),
        };

        // Each new area resumes the machine inside the kernel: handler
        // entry, a stack at the top of RAM, kernel mode with interrupts
        // off, VM off.
        let ram_top = machine.ram_top();
        for (area, entry) in [
            (SYS_NEW_AREA, SYSCALL_ENTRY),
            (PGM_NEW_AREA, PROGRAM_TRAP_ENTRY),
            (TLB_NEW_AREA, TLB_TRAP_ENTRY),
            (INT_NEW_AREA, INTERRUPT_ENTRY),
        ] {
            let state = SavedState {
                pc: entry,
                sp: ram_top,
                psr: (Psr::MODE_KERNEL
                    | Psr::IRQ_DISABLED
                    | Psr::FIQ_DISABLED)
                    .bits(),
                ..SavedState::default()
            };
            machine.write_state(area, &state);
        }

        for index in 0..DEVICE_SEM_COUNT {
            machine.write_word(device_sem_addr(index), 0);
        }

        // The first process: runs the supplied entry point in kernel mode
        // with interrupts enabled, on its own frame below the handler
        // stacks. It is nobody's child.
        let first = match kernel.procs.alloc() {
            Some(p) => p,
            None => panic!("PCB pool empty at boot"),
        };
        kernel.procs[first].state = SavedState {
            pc: entry_point,
            sp: ram_top - FRAME_SIZE,
            psr: Psr::MODE_KERNEL.bits(),
            ..SavedState::default()
        };
        kernel.procs.enqueue(&mut kernel.ready, first);
        kernel.proc_count = 1;

        // Arm the pseudo-clock just before the first dispatch, so the
        // first interval is a full one.
        kernel.interval_deadline = machine.now().offset(INTERVAL);

        let control = kernel.schedule(machine);
        (kernel, control)
    }
}
