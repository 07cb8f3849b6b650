// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt handling.
//!
//! One entry point serves every line. Line priority is fixed: lower
//! numbers win, and within a device line, lower device numbers win. Line 2
//! is the countdown timer and does double duty -- it is both the end of a
//! process's quantum and the pseudo-clock tick, disambiguated by whether
//! the interval deadline has arrived. Lines 3..7 are external devices,
//! each serviced with a V on its semaphore and an ACK to its command
//! register; line 7's terminals split into receive and transmit
//! subdevices sharing one register block.

use abi::{
    device_reg_addr, device_sem_addr, device_sem_index, pending_map_addr,
    ACK, CLOCK_SEM, DEVICE_READY, DEVS_PER_LINE, DEV_COMMAND, DEV_STATUS,
    INTERVAL, INT_OLD_AREA, LINE_COUNT, LINE_TERMINAL, LINE_TIMER,
    PC_PREFETCH, QUANTUM, STATUS_READY_MASK, TERM_RECV_COMMAND,
    TERM_RECV_STATUS, TERM_TRANSM_COMMAND, TERM_TRANSM_STATUS,
};
use ringbuf::ringbuf_entry;

use crate::machine::{read_sem, write_sem, Machine};
use crate::time::Timestamp;
use crate::trace::Trace;
use crate::{Control, Kernel};

impl Kernel {
    /// Entry point for an interrupt. The machine has stored the
    /// interrupted state in the interrupt old area, with the asserting
    /// lines in the high bits of the cause word.
    ///
    /// # Panics
    ///
    /// On a line 0/1 interrupt (multiprocessor support doesn't exist), or
    /// if no line bit is set at all -- the machine should never have
    /// trapped.
    pub fn handle_interrupt(&mut self, machine: &mut impl Machine) -> Control {
        let mut old = machine.read_state(INT_OLD_AREA);
        let line = highest_priority_line(old.pending_lines());
        ringbuf_entry!(self.trace, Trace::Interrupt(line));

        if line < LINE_TIMER {
            panic!("multiprocessor interrupt on line {line}: unsupported");
        }

        // The processor saved pc past the interrupted instruction; back up
        // so it re-executes on resume. (For a timer interrupt the process
        // just continues where it was, and the adjustment is what makes
        // that true.)
        old.pc = old.pc.wrapping_sub(PC_PREFETCH);

        // If someone was running, bank their time and keep the adjusted
        // state; they may resume, get requeued, or stay blocked depending
        // on the line.
        if let Some(cur) = self.current {
            self.update_time(machine);
            self.procs[cur].state = old;
        }

        if line == LINE_TIMER {
            self.timer_interrupt(machine)
        } else {
            self.device_interrupt(machine, line)
        }
    }

    /// Line 2: either the pseudo-clock tick or the end of the current
    /// process's quantum.
    fn timer_interrupt(&mut self, machine: &mut impl Machine) -> Control {
        let now = machine.now();
        if now >= self.interval_deadline {
            return self.interval_tick(machine, now);
        }

        // End of quantum: to the back of the line.
        if let Some(cur) = self.current.take() {
            ringbuf_entry!(self.trace, Trace::Preempt(cur));
            self.procs.enqueue(&mut self.ready, cur);
        }
        self.schedule(machine)
    }

    /// The pseudo-clock tick: release every WAITCLOCK waiter, reset the
    /// clock semaphore, and rearm both timers before getting back to work.
    fn interval_tick(
        &mut self,
        machine: &mut impl Machine,
        now: Timestamp,
    ) -> Control {
        ringbuf_entry!(self.trace, Trace::IntervalTick);
        let key = device_sem_addr(CLOCK_SEM);

        while let Some(p) = self.asl.remove_blocked(&mut self.procs, key) {
            self.procs[p].sem_addr = None;
            self.procs.enqueue(&mut self.ready, p);
            self.soft_block_count -= 1;
        }
        // No waiters remain, so the count starts over.
        write_sem(machine, key, 0);

        machine.set_timer(QUANTUM);
        self.interval_deadline = now.offset(INTERVAL);

        if self.current.is_some() {
            self.accounting_start = machine.now();
            Control::Resume
        } else {
            self.schedule(machine)
        }
    }

    /// Lines 3..7: V the interrupting device's semaphore, deliver its
    /// status to the waiter (or buffer it if nobody's waiting yet), and
    /// acknowledge the device.
    fn device_interrupt(
        &mut self,
        machine: &mut impl Machine,
        line: u8,
    ) -> Control {
        let pending = machine.read_word(pending_map_addr(line));
        let device = lowest_pending_device(line, pending);
        let mut index = match device_sem_index(line, device) {
            Some(i) => i,
            None => panic!("no semaphore for line {line} device {device}"),
        };
        let reg = device_reg_addr(index);

        // Pick the status to report and the command register to ACK. A
        // terminal with received data pending is a receive-subdevice
        // interrupt; otherwise it's the transmitter finishing, which is
        // the second bank of eight semaphores.
        let (status, command) = if line == LINE_TERMINAL {
            let recv_status = machine.read_word(reg + TERM_RECV_STATUS);
            if recv_status & STATUS_READY_MASK == DEVICE_READY {
                (recv_status, reg + TERM_RECV_COMMAND)
            } else {
                index += DEVS_PER_LINE;
                let transm_status =
                    machine.read_word(reg + TERM_TRANSM_STATUS);
                (transm_status, reg + TERM_TRANSM_COMMAND)
            }
        } else {
            (machine.read_word(reg + DEV_STATUS), reg + DEV_COMMAND)
        };

        let key = device_sem_addr(index);
        let value = read_sem(machine, key) + 1;
        write_sem(machine, key, value);

        if value <= 0 {
            let woken = match self.asl.remove_blocked(&mut self.procs, key) {
                Some(p) => p,
                None => panic!(
                    "device semaphore {index} counts waiters but has none"
                ),
            };
            self.procs[woken].sem_addr = None;
            self.soft_block_count -= 1;
            self.procs[woken].state.a1 = status;
            self.procs.enqueue(&mut self.ready, woken);
        } else {
            // Interrupt before any WAITIO: hold the status until someone
            // asks.
            self.device_status[index] = status;
        }

        machine.write_word(command, ACK);

        if self.current.is_some() {
            // Don't bill the interrupted process for our time here.
            self.accounting_start = machine.now();
            Control::Resume
        } else {
            self.schedule(machine)
        }
    }
}

/// Highest-priority (lowest-numbered) asserted line.
fn highest_priority_line(pending: u32) -> u8 {
    for line in 0..LINE_COUNT {
        if pending & (1 << line) != 0 {
            return line;
        }
    }
    panic!("interrupt taken with no line asserted");
}

/// Highest-priority (lowest-numbered) asserted device on a line.
fn lowest_pending_device(line: u8, pending: u32) -> u8 {
    for device in 0..DEVS_PER_LINE as u8 {
        if pending & (1 << device) != 0 {
            return device;
        }
    }
    panic!("line {line} interrupted with no device asserted");
}
