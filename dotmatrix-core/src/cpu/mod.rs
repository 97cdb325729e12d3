//! Fetch-execute core.
//!
//! Opcode handlers advance the shared cycle counter from inside their
//! bodies, once per machine cycle, so every memory access lands on the bus
//! at its true offset within the instruction. Interrupt dispatch only
//! happens at opcode boundaries.

mod opcodes;

use crate::{
    Machine,
    state::{Interruptions, INTERRUPT_FLAG, io_index},
    tuning,
};

pub(crate) const AF: usize = 0;
pub(crate) const BC: usize = 1;
pub(crate) const DE: usize = 2;
pub(crate) const HL: usize = 3;
pub(crate) const SP: usize = 4;

pub(crate) const ZERO_FLAG: u16 = 0x80;
pub(crate) const SUBTRACT_FLAG: u16 = 0x40;
pub(crate) const HALF_CARRY_FLAG: u16 = 0x20;
pub(crate) const CARRY_FLAG: u16 = 0x10;

impl Machine {
    pub(crate) fn a(&self) -> u8 {
        (self.regs[AF] >> 8) as u8
    }

    pub(crate) fn set_a(&mut self, value: u8) {
        self.regs[AF] = (self.regs[AF] & 0xff) | (u16::from(value) << 8);
    }

    fn pending_interrupts(&self) -> u8 {
        self.interrupt_enable.bits() & self.io[io_index(INTERRUPT_FLAG)] & 0x1f
    }

    /// One instruction (or one idle machine cycle while halted, stopped or
    /// stalled by HDMA).
    pub(crate) fn cpu_run(&mut self) {
        let pending = self.pending_interrupts();
        if pending != 0 {
            self.halted = false;
        }

        if self.hdma.active {
            self.advance_cycles(4);
            return;
        }

        if self.stopped {
            self.advance_cycles(4);
            return;
        }

        if self.ime && pending != 0 {
            if self.ime_toggle {
                self.ime = !self.ime;
                self.ime_toggle = false;
            }
            self.dispatch_interrupt();
        } else if !self.halted {
            if self.ime_toggle {
                self.ime = !self.ime;
                self.ime_toggle = false;
            }
            let opcode = self.read_memory(self.pc);
            if self.halt_bug {
                // the skipped PC increment makes the next byte execute twice
                self.halt_bug = false;
                self.pc = self.pc.wrapping_sub(1);
            }
            opcodes::OPCODES[usize::from(opcode)](self, opcode);
        } else {
            self.advance_cycles(4);
        }
    }

    /// 20 cycles: two idle, push PC, jump. The pending set is sampled again
    /// after the high push so a push over IE redirects the dispatch.
    fn dispatch_interrupt(&mut self) {
        self.ime = false;
        self.ime_toggle = false;
        self.advance_cycles(8);
        self.regs[SP] = self.regs[SP].wrapping_sub(1);
        self.write_memory(self.regs[SP], (self.pc >> 8) as u8);
        self.advance_cycles(4);
        self.regs[SP] = self.regs[SP].wrapping_sub(1);
        self.write_memory(self.regs[SP], (self.pc & 0xff) as u8);
        self.advance_cycles(4);

        let pending = Interruptions::from_bits_truncate(self.pending_interrupts());
        self.pc = pending.vector();
        if let Some(interrupt) = pending.iter().next() {
            self.io[io_index(INTERRUPT_FLAG)] &= !interrupt.bits();
        }
        self.advance_cycles(4);
    }

    pub(crate) fn execute_halt(&mut self) {
        if self.ime {
            self.halted = true;
        } else if self.pending_interrupts() != 0 {
            // not entered; on DMG the next fetch also fails to advance PC
            if !self.is_cgb() {
                self.halt_bug = true;
            }
        } else {
            self.halted = true;
        }
    }

    pub(crate) fn execute_stop(&mut self) {
        if self.is_cgb() && self.io[io_index(crate::state::KEY1)] & 1 != 0 {
            self.double_speed = !self.double_speed;
            self.io[io_index(crate::state::KEY1)] = 0;
        } else {
            self.stopped = true;
        }
    }

    pub(crate) fn execute_di(&mut self) {
        if !self.is_cgb() || !tuning::CGB_DI_IS_DELAYED {
            self.ime = false;
        } else if self.ime {
            self.ime_toggle = true;
        }
    }

    pub(crate) fn execute_ei(&mut self) {
        // "disable interrupts for one instruction, then enable them"
        self.ime = false;
        self.ime_toggle = true;
    }

    pub(crate) fn execute_illegal(&mut self, opcode: u8) {
        log::warn!("illegal opcode ${opcode:02x} at ${:04x}, halting", self.pc);
        self.interrupt_enable = Interruptions::empty();
        self.halted = true;
    }
}
