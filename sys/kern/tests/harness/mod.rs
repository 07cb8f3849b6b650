// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A stand-in machine and the plumbing to drive the kernel the way the
//! emulator would: store a state into the right old area, call the entry
//! point, obey the returned control.

use abi::{
    device_reg_addr, device_sem_index, pending_map_addr, Psr, SavedState,
    CAUSE_LINE_SHIFT, DEV_STATUS, INT_OLD_AREA, SYS_OLD_AREA,
};
use kern::machine::Machine;
use kern::time::Timestamp;
use kern::{Control, Kernel};

/// 256 KiB of emulated RAM; comfortably clears the vector areas and
/// leaves room for the test workload's states and semaphores.
pub const RAM_SIZE: usize = 0x4_0000;

/// Where the first process nominally starts executing.
pub const TEST_ENTRY: u32 = 0x8000;

/// Flat-memory machine: a RAM image, a hand-cranked clock, and a latch
/// recording the last timer programming.
pub struct TestMachine {
    pub ram: Vec<u8>,
    pub clock: u64,
    pub timer: u64,
}

impl TestMachine {
    pub fn new() -> Self {
        TestMachine {
            ram: vec![0; RAM_SIZE],
            clock: 0,
            timer: 0,
        }
    }

    /// Moves the time-of-day clock forward.
    pub fn advance(&mut self, micros: u64) {
        self.clock += micros;
    }

    /// Semaphore word at `addr`, as the kernel sees it.
    pub fn sem(&self, addr: u32) -> i32 {
        self.read_word(addr) as i32
    }
}

impl Machine for TestMachine {
    fn now(&self) -> Timestamp {
        Timestamp::from(self.clock)
    }

    fn set_timer(&mut self, micros: u64) {
        self.timer = micros;
    }

    fn ram_top(&self) -> u32 {
        RAM_SIZE as u32
    }

    fn read_word(&self, addr: u32) -> u32 {
        let a = addr as usize;
        u32::from_le_bytes(self.ram[a..a + 4].try_into().unwrap())
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        let a = addr as usize;
        self.ram[a..a + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Boots a kernel on a fresh machine and checks the first process got
/// dispatched.
pub fn boot() -> (Kernel, TestMachine) {
    let mut machine = TestMachine::new();
    let (kernel, control) = Kernel::start(&mut machine, TEST_ENTRY);
    assert_eq!(control, Control::Resume, "first process should dispatch");
    (kernel, machine)
}

/// Issues a service call as the currently dispatched process: its saved
/// state, with the service number and arguments dropped into `a1..a4`,
/// lands in the syscall old area exactly as the hardware would put it.
pub fn syscall(
    kernel: &mut Kernel,
    machine: &mut TestMachine,
    nr: u32,
    a2: u32,
    a3: u32,
    a4: u32,
) -> Control {
    syscall_with(kernel, machine, |state| {
        state.a1 = nr;
        state.a2 = a2;
        state.a3 = a3;
        state.a4 = a4;
    })
}

/// Like [`syscall`], but lets the caller doctor the trapping state
/// arbitrarily first (e.g. to fake user mode).
pub fn syscall_with(
    kernel: &mut Kernel,
    machine: &mut TestMachine,
    edit: impl FnOnce(&mut SavedState),
) -> Control {
    let mut state = *kernel
        .current_state()
        .expect("syscall with nothing dispatched");
    edit(&mut state);
    machine.write_state(SYS_OLD_AREA, &state);
    kernel.handle_syscall(machine)
}

/// Raises an interrupt on `line`. The old area gets the running process's
/// state if there is one (as on a real preemption), or a blank idle state,
/// either way with the line's cause bit set.
pub fn raise_interrupt(
    kernel: &mut Kernel,
    machine: &mut TestMachine,
    line: u8,
) -> Control {
    let mut state = kernel.current_state().copied().unwrap_or_default();
    state.cause = 1 << (CAUSE_LINE_SHIFT + u32::from(line));
    machine.write_state(INT_OLD_AREA, &state);
    kernel.handle_interrupt(machine)
}

/// Makes device `device` on `line` (3..=6) interrupt with `status`:
/// asserts its pending bit, presents the status register, and raises the
/// line.
pub fn raise_device_interrupt(
    kernel: &mut Kernel,
    machine: &mut TestMachine,
    line: u8,
    device: u8,
    status: u32,
) -> Control {
    let index = device_sem_index(line, device).unwrap();
    machine.write_word(pending_map_addr(line), 1 << device);
    machine.write_word(device_reg_addr(index) + DEV_STATUS, status);
    raise_interrupt(kernel, machine, line)
}

/// Writes a plausible kernel-mode state starting at `pc` into RAM at
/// `addr`, for handing to CREATE or SPECTRAPVEC.
pub fn stage_state(machine: &mut TestMachine, addr: u32, pc: u32) {
    let state = SavedState {
        pc,
        sp: 0x2_0000,
        psr: Psr::MODE_KERNEL.bits(),
        ..SavedState::default()
    };
    machine.write_state(addr, &state);
}
