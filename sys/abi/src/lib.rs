// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions shared between the kernel and the machine emulator.
//!
//! Everything in here is part of the contract with the emulated hardware:
//! the shape of a saved processor state, the fixed addresses of the
//! exception vector areas and device registers, the timing constants, and
//! the numbering of kernel services and trap kinds. The kernel crate and
//! any emulator (or test double) both build against this and nothing else.

#![no_std]

use zerocopy::{AsBytes, FromBytes};

/// Number of process control blocks in the fixed pool. The kernel refuses
/// to create a twenty-first process rather than allocate.
pub const MAX_PROC: usize = 20;

/// Maximum contiguous CPU time a process may hold before preemption, in
/// microseconds.
pub const QUANTUM: u64 = 5_000;

/// Period of the pseudo-clock, in microseconds. Every `INTERVAL` the kernel
/// releases all processes blocked in WAITCLOCK.
pub const INTERVAL: u64 = 100_000;

/// The processor stores `pc + PC_PREFETCH` when an interrupt is taken; the
/// kernel subtracts this before resuming so the interrupted instruction
/// re-executes.
pub const PC_PREFETCH: u32 = 4;

/// Size of one stack frame carved off the top of RAM for the first process.
pub const FRAME_SIZE: u32 = 4096;

/// Cause code recorded when a privileged service is requested from user
/// mode: the service instruction is treated as reserved.
pub const CAUSE_RESERVED_INSTRUCTION: u32 = 20;

/// The high byte of the cause word carries the pending-interrupt line bits.
pub const CAUSE_LINE_SHIFT: u32 = 24;

/// Syscall completion codes returned in `a1`.
pub const SUCCESS: u32 = 0;
pub const FAILURE: u32 = !0;

bitflags::bitflags! {
    /// Processor status word layout.
    ///
    /// The low five bits select the mode; interrupt masking is active-high
    /// (a set bit *disables* the corresponding interrupt class).
    pub struct Psr: u32 {
        const MODE_USER = 0x10;
        const MODE_KERNEL = 0x1F;
        const FIQ_DISABLED = 0x40;
        const IRQ_DISABLED = 0x80;
    }
}

/// Mask covering the mode field of the status word.
pub const PSR_MODE_MASK: u32 = 0x1F;

/// Saved processor state, as stored in the fixed exception areas and in
/// each PCB.
///
/// The kernel copies these records whole and inspects only a handful of
/// fields (`a1`..`a4`, `sp`, `pc`, `psr`, `cause`); the rest ride along
/// opaquely. The record is plain words so an emulator can blit it to and
/// from RAM.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, AsBytes, FromBytes)]
#[repr(C)]
pub struct SavedState {
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    pub a4: u32,
    pub v1: u32,
    pub v2: u32,
    pub v3: u32,
    pub v4: u32,
    pub v5: u32,
    pub v6: u32,
    pub sl: u32,
    pub fp: u32,
    pub ip: u32,
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub psr: u32,
    pub vm: u32,
    pub cause: u32,
    pub tod_hi: u32,
    pub tod_lo: u32,
}

impl SavedState {
    /// Size of the record in 32-bit words.
    pub const WORDS: usize = core::mem::size_of::<SavedState>() / 4;

    /// Checks whether this state was captured in kernel mode.
    pub fn is_kernel_mode(&self) -> bool {
        self.psr & PSR_MODE_MASK == Psr::MODE_KERNEL.bits()
    }

    /// Extracts the pending-interrupt line bits from the cause word. Bit
    /// `n` set means line `n` is asserting.
    pub fn pending_lines(&self) -> u32 {
        self.cause >> CAUSE_LINE_SHIFT
    }
}

/// The three trap kinds a process may register exception vectors for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum TrapKind {
    Tlb = 0,
    Program = 1,
    Syscall = 2,
}

impl TrapKind {
    /// Number of trap kinds, i.e. the length of a per-PCB vector array.
    pub const COUNT: usize = 3;

    /// Index of this kind in a per-PCB vector array.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// We're using an explicit `TryFrom` impl instead of `FromPrimitive`
/// because the kernel doesn't depend on `num-traits` and this seems okay.
impl core::convert::TryFrom<u32> for TrapKind {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Tlb),
            1 => Ok(Self::Program),
            2 => Ok(Self::Syscall),
            _ => Err(()),
        }
    }
}

/// Enumeration of kernel service numbers, as passed in `a1`.
///
/// Numbers above `WaitIo` are not errors at this layer: the dispatcher
/// passes them up to a handler the process registered, or terminates it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    Create = 1,
    Terminate = 2,
    Signal = 3,
    Wait = 4,
    SetTrapVec = 5,
    GetCpuTime = 6,
    WaitClock = 7,
    WaitIo = 8,
}

impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            1 => Ok(Self::Create),
            2 => Ok(Self::Terminate),
            3 => Ok(Self::Signal),
            4 => Ok(Self::Wait),
            5 => Ok(Self::SetTrapVec),
            6 => Ok(Self::GetCpuTime),
            7 => Ok(Self::WaitClock),
            8 => Ok(Self::WaitIo),
            _ => Err(()),
        }
    }
}

//
// Exception vector areas.
//
// On a trap or interrupt the hardware stores the interrupted state into the
// "old" area for that event and resumes from the state found in the "new"
// area. The kernel fills the four new areas at boot.
//

pub const INT_OLD_AREA: u32 = 0x7000;
pub const INT_NEW_AREA: u32 = 0x7058;
pub const TLB_OLD_AREA: u32 = 0x70B0;
pub const TLB_NEW_AREA: u32 = 0x7108;
pub const PGM_OLD_AREA: u32 = 0x7160;
pub const PGM_NEW_AREA: u32 = 0x71B8;
pub const SYS_OLD_AREA: u32 = 0x7210;
pub const SYS_NEW_AREA: u32 = 0x7268;

//
// Handler entry tokens.
//
// The kernel writes these into the new-area program counters; when the
// emulator resumes from a new area and finds one of these values, it
// invokes the matching kernel entry point instead of fetching from RAM.
//

pub const INTERRUPT_ENTRY: u32 = 0x1000;
pub const TLB_TRAP_ENTRY: u32 = 0x1004;
pub const PROGRAM_TRAP_ENTRY: u32 = 0x1008;
pub const SYSCALL_ENTRY: u32 = 0x100C;

//
// Interrupt lines. Lower numbers have higher priority. Lines 0 and 1 are
// multiprocessor signals this kernel does not support; line 2 is the
// machine's countdown timer; lines 3..7 carry external devices, eight per
// line.
//

pub const LINE_COUNT: u8 = 8;
pub const LINE_TIMER: u8 = 2;
pub const LINE_DISK: u8 = 3;
pub const LINE_TAPE: u8 = 4;
pub const LINE_NETWORK: u8 = 5;
pub const LINE_PRINTER: u8 = 6;
pub const LINE_TERMINAL: u8 = 7;
pub const DEVS_PER_LINE: usize = 8;

/// Number of device semaphores: five lines of eight devices, a second set
/// of eight for the terminal transmit subdevices, and the pseudo-clock.
pub const DEVICE_SEM_COUNT: usize = 49;

/// Semaphore index of the pseudo-clock.
pub const CLOCK_SEM: usize = 48;

/// Pending-interrupt bitmaps, one word per device line, bit `i` set iff
/// device `i` on that line is asserting.
pub const DISK_PENDING_MAP: u32 = 0x6FE0;
pub const TAPE_PENDING_MAP: u32 = 0x6FE4;
pub const NETWORK_PENDING_MAP: u32 = 0x6FE8;
pub const PRINTER_PENDING_MAP: u32 = 0x6FEC;
pub const TERMINAL_PENDING_MAP: u32 = 0x6FF0;

/// Address of the pending-interrupt bitmap for a device line (3..=7).
pub fn pending_map_addr(line: u8) -> u32 {
    DISK_PENDING_MAP + 4 * u32::from(line - LINE_DISK)
}

//
// Device register file. Each device owns a four-word register block at a
// fixed stride from the base. Non-terminal devices expose
// status/command/data0/data1; terminals expose the receive pair followed by
// the transmit pair.
//

pub const DEV_REG_BASE: u32 = 0x40;
pub const DEV_REG_STRIDE: u32 = 16;

pub const DEV_STATUS: u32 = 0;
pub const DEV_COMMAND: u32 = 4;
pub const DEV_DATA0: u32 = 8;
pub const DEV_DATA1: u32 = 12;

pub const TERM_RECV_STATUS: u32 = 0;
pub const TERM_RECV_COMMAND: u32 = 4;
pub const TERM_TRANSM_STATUS: u32 = 8;
pub const TERM_TRANSM_COMMAND: u32 = 12;

/// Command word acknowledging (and thereby clearing) a device interrupt.
pub const ACK: u32 = 1;

/// Status value meaning a (sub)device has completed an operation.
pub const DEVICE_READY: u32 = 1;

/// Mask isolating the ready nibble of a terminal status word.
pub const STATUS_READY_MASK: u32 = 0x0F;

/// Base address of the kernel's device semaphore words, one word per index
/// `0..DEVICE_SEM_COUNT`. These live in kernel RAM like any other
/// semaphore; the fixed range is what lets the kernel tell a device wait
/// from a wait on a user semaphore.
pub const DEVICE_SEM_BASE: u32 = 0x7300;

/// Address of the semaphore word for device semaphore `index`.
pub fn device_sem_addr(index: usize) -> u32 {
    DEVICE_SEM_BASE + 4 * index as u32
}

/// Checks whether `addr` names one of the 49 device semaphore words.
pub fn is_device_sem(addr: u32) -> bool {
    addr >= DEVICE_SEM_BASE && addr < DEVICE_SEM_BASE + 4 * DEVICE_SEM_COUNT as u32
}

/// Semaphore index for device `device` on `line`, or `None` if the pair
/// doesn't name a device. The terminal transmit subdevices are the caller's
/// problem: this returns the receive (base) index for line 7.
pub fn device_sem_index(line: u8, device: u8) -> Option<usize> {
    if (LINE_DISK..=LINE_TERMINAL).contains(&line)
        && (device as usize) < DEVS_PER_LINE
    {
        Some(DEVS_PER_LINE * usize::from(line - LINE_DISK) + device as usize)
    } else {
        None
    }
}

/// Address of the register block for the device with semaphore index
/// `index` (valid for the 40 real devices, indexes 0..40).
pub fn device_reg_addr(index: usize) -> u32 {
    DEV_REG_BASE + index as u32 * DEV_REG_STRIDE
}
