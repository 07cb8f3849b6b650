// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hardware boundary.
//!
//! The kernel never touches the emulated machine directly; everything it
//! needs -- the time-of-day clock, the countdown timer, and RAM -- comes
//! through this trait. The emulator provides the real implementation;
//! tests provide a flat-memory fake. Either way the kernel code is
//! identical, which is the point.
//!
//! Whole-state transfers are provided as default methods over the word
//! accessors, so an implementation only has to know how to move words.

use abi::SavedState;
use zerocopy::AsBytes;

use crate::time::Timestamp;

pub trait Machine {
    /// Current reading of the time-of-day clock.
    fn now(&self) -> Timestamp;

    /// Programs the countdown timer to raise a line-2 interrupt after
    /// `micros` microseconds. A zero (or very small) value is legal and
    /// produces an immediate interrupt once interrupts are enabled.
    fn set_timer(&mut self, micros: u64);

    /// One past the highest RAM address. The kernel parks handler stacks
    /// and the first process's stack just below here.
    fn ram_top(&self) -> u32;

    /// Reads the RAM word at `addr`.
    fn read_word(&self, addr: u32) -> u32;

    /// Writes the RAM word at `addr`.
    fn write_word(&mut self, addr: u32, value: u32);

    /// Reads a whole saved processor state from RAM at `addr`.
    fn read_state(&self, addr: u32) -> SavedState {
        let mut state = SavedState::default();
        let bytes = state.as_bytes_mut();
        for i in 0..SavedState::WORDS {
            let word = self.read_word(addr + 4 * i as u32);
            bytes[4 * i..4 * i + 4].copy_from_slice(&word.to_le_bytes());
        }
        state
    }

    /// Writes a whole saved processor state to RAM at `addr`.
    fn write_state(&mut self, addr: u32, state: &SavedState) {
        let bytes = state.as_bytes();
        for i in 0..SavedState::WORDS {
            let mut word = [0; 4];
            word.copy_from_slice(&bytes[4 * i..4 * i + 4]);
            self.write_word(addr + 4 * i as u32, u32::from_le_bytes(word));
        }
    }
}

/// Reads the semaphore word at `addr`. Semaphore values are signed: a
/// negative count records how many processes are blocked.
pub(crate) fn read_sem(machine: &impl Machine, addr: u32) -> i32 {
    machine.read_word(addr) as i32
}

/// Writes the semaphore word at `addr`.
pub(crate) fn write_sem(machine: &mut impl Machine, addr: u32, value: i32) {
    machine.write_word(addr, value as u32);
}
