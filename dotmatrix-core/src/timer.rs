//! DIV and TIMA.
//!
//! A 14-bit system counter increments every M-cycle; DIV is its top 8 bits,
//! so DIV runs at 16384 Hz (and twice that in double speed, since the
//! counter is fed CPU cycles). TIMA increments on the falling edge of
//! (TAC enable AND the TAC-selected counter bit), which reproduces the
//! documented DIV-write and TAC-write glitches for free.

use crate::{
    Machine,
    state::{Interruptions, io_index, INTERRUPT_FLAG, TIMER_CONTROL, TIMER_COUNTER, TIMER_MODULO},
};

#[derive(Clone, Default)]
pub struct Timer {
    pub(crate) system_counter: u16,
    falling_edge_detector: bool,
    // the one M-cycle delay between a TIMA overflow and the TMA reload
    tima_has_overflowed: Option<u8>,
    pub(crate) consumed_cycles: u64,
}

impl Timer {
    pub fn div(&self) -> u8 {
        (self.system_counter >> 6) as u8
    }

    pub(crate) fn reset_system_counter(&mut self) {
        self.system_counter = 0;
    }

    pub(crate) fn save_edges(&self, w: &mut crate::savestate::Writer) {
        w.bool(self.falling_edge_detector);
        w.bool(self.tima_has_overflowed.is_some());
        w.u8(self.tima_has_overflowed.unwrap_or(0));
    }

    pub(crate) fn load_edges(&mut self, c: &mut crate::savestate::Cursor) {
        c.bool(&mut self.falling_edge_detector);
        let mut pending = false;
        let mut value = 0;
        c.bool(&mut pending);
        c.u8(&mut value);
        self.tima_has_overflowed = pending.then_some(value);
    }
}

impl Machine {
    pub(crate) fn timer_run(&mut self, cycles: u8) {
        self.timer.consumed_cycles += u64::from(cycles);
        for _ in 0..cycles / 4 {
            self.timer_tick_mcycle();
        }
    }

    fn timer_tick_mcycle(&mut self) {
        if let Some(tma) = self.timer.tima_has_overflowed.take() {
            self.io[io_index(TIMER_COUNTER)] = tma;
            self.io[io_index(INTERRUPT_FLAG)] |= Interruptions::TIMER.bits();
        }

        let tac = self.io[io_index(TIMER_CONTROL)];
        // one bit of the system counter selects each TIMA frequency
        let frequency_mask: u16 = match tac & 0b11 {
            0b00 => 0x80,
            0b01 => 0x02,
            0b10 => 0x08,
            0b11 => 0x20,
            _ => unreachable!(),
        };

        self.timer.system_counter = self.timer.system_counter.wrapping_add(1) & 0x3fff;

        let and = tac & 0b100 != 0 && self.timer.system_counter & frequency_mask != 0;

        if and == self.timer.falling_edge_detector {
            return;
        }

        self.timer.falling_edge_detector = and;

        if self.timer.falling_edge_detector {
            return;
        }

        let tima = self.io[io_index(TIMER_COUNTER)].wrapping_add(1);
        self.io[io_index(TIMER_COUNTER)] = tima;

        if tima == 0 {
            self.timer.tima_has_overflowed = Some(self.io[io_index(TIMER_MODULO)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Machine, Model, state::*};

    fn machine() -> Machine {
        Machine::new(Model::Dmg)
    }

    #[test]
    fn div_rate() {
        let mut machine = machine();
        machine.write_memory(DIV, 0x55); // any value resets it
        assert_eq!(0, machine.read_memory(DIV));
        // one DIV tick per 256 base cycles
        for _ in 0..63 {
            machine.timer_run(4);
        }
        assert_eq!(0, machine.read_memory(DIV));
        machine.timer_run(4);
        assert_eq!(1, machine.read_memory(DIV));
    }

    #[test]
    fn tima_increments_at_selected_rate() {
        let mut machine = machine();
        machine.write_memory(TIMER_CONTROL, 0b101); // enabled, every 16 cycles
        machine.write_memory(DIV, 0);
        for _ in 0..4 {
            machine.timer_run(4);
        }
        assert_eq!(1, machine.read_memory(TIMER_COUNTER));
    }

    #[test]
    fn overflow_reloads_tma_one_mcycle_later() {
        let mut machine = machine();
        machine.write_memory(TIMER_MODULO, 0xab);
        machine.write_memory(TIMER_COUNTER, 0xff);
        machine.write_memory(TIMER_CONTROL, 0b101);
        machine.write_memory(DIV, 0);
        for _ in 0..4 {
            machine.timer_run(4);
        }
        // overflowed, but the reload lands on the next M-cycle
        assert_eq!(0, machine.read_memory(TIMER_COUNTER));
        machine.timer_run(4);
        assert_eq!(0xab, machine.read_memory(TIMER_COUNTER));
        assert_ne!(
            0,
            machine.read_memory(INTERRUPT_FLAG) & Interruptions::TIMER.bits()
        );
    }
}
