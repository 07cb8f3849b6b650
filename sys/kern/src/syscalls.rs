// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Service call dispatch and the program/TLB trap paths.
//!
//! Each service is a method with the same shape: it reads its arguments
//! out of the current PCB's saved state (the dispatcher copies the trap's
//! old area there first), does its work, and returns a [`Control`] --
//! usually `Resume`, or whatever the scheduler says if the caller blocked
//! or died.
//!
//! The non-service traps share one policy, *pass up or die*: a process
//! that registered a handler for the trap kind gets resumed inside that
//! handler; one that didn't is torn down along with every descendant.

use abi::{
    device_sem_addr, device_sem_index, is_device_sem, Sysnum, TrapKind,
    CAUSE_RESERVED_INSTRUCTION, CLOCK_SEM, DEVS_PER_LINE, FAILURE,
    LINE_TERMINAL, PGM_OLD_AREA, SUCCESS, SYS_OLD_AREA, TLB_OLD_AREA,
};
use ringbuf::ringbuf_entry;

use crate::machine::{read_sem, write_sem, Machine};
use crate::proc::{ProcId, TrapVector};
use crate::trace::Trace;
use crate::{Control, Kernel};

impl Kernel {
    /// Entry point for a service trap. The machine has stored the caller's
    /// state in the syscall old area; the service number is in `a1`.
    pub fn handle_syscall(&mut self, machine: &mut impl Machine) -> Control {
        let cur = self.running();
        let old = machine.read_state(SYS_OLD_AREA);
        self.procs[cur].state = old;

        ringbuf_entry!(self.trace, Trace::Syscall(old.a1));

        // Service numbers we don't implement are the process's own
        // business: pass them to its handler, or kill it.
        let service = match Sysnum::try_from(old.a1) {
            Ok(s) => s,
            Err(()) => {
                return self.pass_up_or_die(
                    machine,
                    TrapKind::Syscall,
                    SYS_OLD_AREA,
                )
            }
        };

        // The services below are privileged. A request from user mode is
        // rewritten into a program trap for a reserved instruction, which
        // is what the request effectively was.
        if !old.is_kernel_mode() {
            let mut pgm = old;
            pgm.cause = CAUSE_RESERVED_INSTRUCTION;
            machine.write_state(PGM_OLD_AREA, &pgm);
            return self.handle_program_trap(machine);
        }

        match service {
            Sysnum::Create => self.create(machine),
            Sysnum::Terminate => self.terminate_current(machine),
            Sysnum::Signal => self.signal(machine),
            Sysnum::Wait => self.wait(machine),
            Sysnum::SetTrapVec => self.set_trap_vec(machine),
            Sysnum::GetCpuTime => self.get_cpu_time(machine),
            Sysnum::WaitClock => self.wait_clock(machine),
            Sysnum::WaitIo => self.wait_io(machine),
        }
    }

    /// Entry point for a program trap.
    pub fn handle_program_trap(
        &mut self,
        machine: &mut impl Machine,
    ) -> Control {
        self.pass_up_or_die(machine, TrapKind::Program, PGM_OLD_AREA)
    }

    /// Entry point for a TLB trap. Virtual memory is off, but the machine
    /// can still raise these, and processes can still ask to handle them.
    pub fn handle_tlb_trap(&mut self, machine: &mut impl Machine) -> Control {
        self.pass_up_or_die(machine, TrapKind::Tlb, TLB_OLD_AREA)
    }

    /// The shared trap policy. With a vector registered for `kind`, the
    /// faulting state is stashed where the process asked and the process
    /// resumes in the state it supplied; without one, the process and its
    /// whole subtree die.
    fn pass_up_or_die(
        &mut self,
        machine: &mut impl Machine,
        kind: TrapKind,
        old_area: u32,
    ) -> Control {
        let cur = self.running();
        match self.procs[cur].vectors[kind.index()] {
            Some(vector) => {
                let old = machine.read_state(old_area);
                machine.write_state(vector.old_area, &old);
                self.procs[cur].state = machine.read_state(vector.new_area);
                Control::Resume
            }
            None => self.terminate_current(machine),
        }
    }

    /// CREATE: allocate a PCB, copy the state at `a2` into it, and make it
    /// a ready child of the caller. The caller learns success or pool
    /// exhaustion through `a1`.
    fn create(&mut self, machine: &mut impl Machine) -> Control {
        let cur = self.running();
        let state_addr = self.procs[cur].state.a2;
        match self.procs.alloc() {
            Some(new) => {
                self.procs[new].state = machine.read_state(state_addr);
                self.procs.insert_child(cur, new);
                self.procs.enqueue(&mut self.ready, new);
                self.proc_count += 1;
                self.procs[cur].state.a1 = SUCCESS;
            }
            None => {
                self.procs[cur].state.a1 = FAILURE;
            }
        }
        Control::Resume
    }

    /// TERMINATE: tear down the current process and every descendant,
    /// children before parents, then let the scheduler pick someone else.
    ///
    /// Also the back half of pass-up-or-die and of a repeated SPECTRAPVEC.
    pub(crate) fn terminate_current(
        &mut self,
        machine: &mut impl Machine,
    ) -> Control {
        let root = self.running();
        ringbuf_entry!(self.trace, Trace::Terminate(root));

        // The tree is bounded by the PCB pool, so instead of recursing we
        // repeatedly descend to a leaf and reap it until the root itself
        // goes.
        loop {
            let mut victim = root;
            while let Some(child) = self.procs.first_child(victim) {
                victim = child;
            }
            self.reap(machine, victim);
            if victim == root {
                break;
            }
        }
        self.schedule(machine)
    }

    /// Removes one childless process from the system: from its parent,
    /// from whatever queue holds it, and from the semaphore accounting if
    /// it was blocked.
    fn reap(&mut self, machine: &mut impl Machine, victim: ProcId) {
        self.procs.detach_child(victim);

        if self.current == Some(victim) {
            // Dispatched, so in no queue at all.
            self.current = None;
        } else if let Some(key) = self.procs[victim].sem_addr {
            if self.asl.out_blocked(&mut self.procs, victim).is_none() {
                panic!("{victim:?} marked blocked on {key:#x} but not queued");
            }
            if is_device_sem(key) {
                // The interrupt it was waiting for may still arrive; the
                // V at that point will find no waiter and cache the
                // status instead.
                self.soft_block_count -= 1;
            } else {
                // One fewer waiter on a user semaphore.
                let value = read_sem(machine, key);
                write_sem(machine, key, value + 1);
            }
        } else {
            self.procs.remove(&mut self.ready, victim);
        }

        self.procs.release(victim);
        self.proc_count -= 1;
    }

    /// V: signal the semaphore at `a2`, unblocking its head waiter if the
    /// count says anyone is waiting.
    ///
    /// # Panics
    ///
    /// If the count claims waiters exist but the queue is empty. Semaphore
    /// words are only ever written by the kernel, so that means kernel
    /// state is corrupt.
    fn signal(&mut self, machine: &mut impl Machine) -> Control {
        let cur = self.running();
        let key = self.procs[cur].state.a2;
        let value = read_sem(machine, key) + 1;
        write_sem(machine, key, value);

        if value <= 0 {
            let woken = match self.asl.remove_blocked(&mut self.procs, key) {
                Some(p) => p,
                None => panic!(
                    "semaphore {key:#x} counts {} waiters but has none",
                    -value + 1
                ),
            };
            self.procs[woken].sem_addr = None;
            self.procs.enqueue(&mut self.ready, woken);
        }
        Control::Resume
    }

    /// P: wait on the semaphore at `a2`, blocking the caller if the count
    /// goes negative.
    fn wait(&mut self, machine: &mut impl Machine) -> Control {
        let cur = self.running();
        let key = self.procs[cur].state.a2;
        let value = read_sem(machine, key) - 1;
        write_sem(machine, key, value);

        if value < 0 {
            self.block_current(machine, key);
            self.schedule(machine)
        } else {
            Control::Resume
        }
    }

    /// SPECTRAPVEC: record where to stash and fetch states for one trap
    /// kind. Each kind may be set once per process; a second attempt -- or
    /// a kind that doesn't exist -- costs the caller its life, same as an
    /// unhandled trap.
    fn set_trap_vec(&mut self, machine: &mut impl Machine) -> Control {
        let cur = self.running();
        let state = self.procs[cur].state;
        let kind = match TrapKind::try_from(state.a2) {
            Ok(k) => k,
            Err(()) => return self.terminate_current(machine),
        };

        let slot = &mut self.procs[cur].vectors[kind.index()];
        if slot.is_some() {
            return self.terminate_current(machine);
        }
        *slot = Some(TrapVector {
            old_area: state.a3,
            new_area: state.a4,
        });
        Control::Resume
    }

    /// GETCPUTIME: report the caller's accumulated CPU time in `a1`,
    /// charged up to this very call.
    fn get_cpu_time(&mut self, machine: &mut impl Machine) -> Control {
        self.update_time(machine);
        let cur = self.running();
        self.procs[cur].state.a1 = self.procs[cur].cpu_time as u32;
        Control::Resume
    }

    /// WAITCLOCK: block until the next pseudo-clock tick.
    ///
    /// # Panics
    ///
    /// If the clock semaphore fails to go negative. Nothing but the
    /// interval handler signals it, and that resets it to zero, so a
    /// nonnegative count after a P means the accounting is broken.
    fn wait_clock(&mut self, machine: &mut impl Machine) -> Control {
        let key = device_sem_addr(CLOCK_SEM);
        let value = read_sem(machine, key) - 1;
        write_sem(machine, key, value);

        if value >= 0 {
            panic!("pseudo-clock semaphore nonnegative after P: {value}");
        }
        self.block_current(machine, key);
        self.soft_block_count += 1;
        self.schedule(machine)
    }

    /// WAITIO: wait for the device named by `a2` (line), `a3` (device
    /// number), and -- for terminals -- `a4` (nonzero to wait for a
    /// receive). If the device's interrupt already arrived, its buffered
    /// status comes back immediately in `a1` with no block.
    fn wait_io(&mut self, machine: &mut impl Machine) -> Control {
        let cur = self.running();
        let state = self.procs[cur].state;
        let (line, device) = (state.a2, state.a3);
        let wait_for_read = state.a4 != 0;

        let mut index = match device_sem_index(line as u8, device as u8) {
            Some(i) => i,
            // Not a device line/number pair this machine has. The caller
            // is confused beyond saving.
            None => return self.terminate_current(machine),
        };
        if line as u8 == LINE_TERMINAL && !wait_for_read {
            index += DEVS_PER_LINE;
        }

        let key = device_sem_addr(index);
        let value = read_sem(machine, key) - 1;
        write_sem(machine, key, value);

        if value < 0 {
            self.block_current(machine, key);
            self.soft_block_count += 1;
            self.schedule(machine)
        } else {
            // The interrupt beat us here; hand over the buffered status.
            self.procs[cur].state.a1 = self.device_status[index];
            Control::Resume
        }
    }

    /// Settles the current process onto the blocked queue for `key` and
    /// vacates the CPU. The caller picks the successor (and maintains the
    /// soft-block count if `key` is a device).
    fn block_current(&mut self, machine: &impl Machine, key: u32) {
        let cur = self.running();
        self.update_time(machine);
        if self
            .asl
            .insert_blocked(&mut self.procs, key, cur)
            .is_err()
        {
            // MAX_PROC processes cannot occupy more than MAX_PROC
            // descriptors, so a dry pool means the accounting is broken.
            panic!("semaphore descriptor pool exhausted");
        }
        self.current = None;
    }
}
