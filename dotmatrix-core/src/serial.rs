//! Serial port stub. There is no link peer, so a transfer started on the
//! internal clock shifts in 0xff and completes after its eight bit-times,
//! raising the SERIAL interrupt. External-clock transfers never complete.

use crate::{
    Machine,
    state::{Interruptions, SB, SC, SerialControl, io_index, INTERRUPT_FLAG},
};

// 8192 Hz bit clock
const CYCLES_PER_BIT: u32 = 512;

#[derive(Clone, Default)]
pub struct Serial {
    pub(crate) countdown: u32, // cycles until the transfer completes, 0 = idle
}

impl Machine {
    pub(crate) fn write_serial_control(&mut self, value: u8) {
        let control = SerialControl::from_bits_truncate(value);
        self.io[io_index(SC)] = control.bits();
        if control.contains(SerialControl::TRANSFER_ENABLE | SerialControl::CLOCK_SELECT) {
            self.serial.countdown = 8 * CYCLES_PER_BIT;
        }
    }

    pub(crate) fn serial_run(&mut self, cycles: u8) {
        if self.serial.countdown == 0 {
            return;
        }
        self.serial.countdown = self.serial.countdown.saturating_sub(u32::from(cycles));
        if self.serial.countdown == 0 {
            log::debug!("serial transfer out ${:02x}", self.io[io_index(SB)]);
            self.io[io_index(SB)] = 0xff;
            self.io[io_index(SC)] &= !SerialControl::TRANSFER_ENABLE.bits();
            self.io[io_index(INTERRUPT_FLAG)] |= Interruptions::SERIAL.bits();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Machine, Model, state::*};

    #[test]
    fn internal_clock_transfer_completes_in_4096_cycles() {
        let mut machine = Machine::new(Model::Dmg);
        machine.write_memory(SB, 0x42);
        machine.write_memory(SC, 0x81);
        for _ in 0..4096 / 4 - 1 {
            machine.serial_run(4);
        }
        assert_ne!(0, machine.read_memory(SC) & 0x80);
        machine.serial_run(4);
        assert_eq!(0, machine.read_memory(SC) & 0x80);
        assert_eq!(0xff, machine.read_memory(SB));
        assert_ne!(
            0,
            machine.read_memory(INTERRUPT_FLAG) & Interruptions::SERIAL.bits()
        );
    }

    #[test]
    fn external_clock_never_completes() {
        let mut machine = Machine::new(Model::Dmg);
        machine.write_memory(SC, 0x80);
        for _ in 0..10_000 {
            machine.serial_run(4);
        }
        assert_ne!(0, machine.read_memory(SC) & 0x80);
    }
}
