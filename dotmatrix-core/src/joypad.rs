//! Input matrix. Two select lines pick one of two button nibbles; everything
//! is active-low. A newly grounded input line raises the JOYPAD interrupt.

use crate::{
    Machine,
    state::{Interruptions, io_index, INTERRUPT_FLAG},
};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct JoypadFlags: u8 {
        const NOT_BUTTONS = 1 << 5;
        const NOT_DPAD = 1 << 4;
        const NOT_START_DOWN = 1 << 3;
        const NOT_SELECT_UP = 1 << 2;
        const NOT_B_LEFT = 1 << 1;
        const NOT_A_RIGHT = 1;
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct JoypadInput {
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    pub right: bool,
    pub left: bool,
    pub up: bool,
    pub down: bool,
}

#[derive(Clone, Default)]
pub struct Joypad {
    pub input: JoypadInput,
    pub(crate) is_dpad_selected: bool,
    pub(crate) is_buttons_selected: bool,
    last_lines: u8,
}

impl Joypad {
    fn lines(&self) -> u8 {
        let mut value = JoypadFlags::NOT_START_DOWN
            | JoypadFlags::NOT_SELECT_UP
            | JoypadFlags::NOT_B_LEFT
            | JoypadFlags::NOT_A_RIGHT;
        if self.is_dpad_selected {
            if self.input.down {
                value.remove(JoypadFlags::NOT_START_DOWN);
            }
            if self.input.up {
                value.remove(JoypadFlags::NOT_SELECT_UP);
            }
            if self.input.left {
                value.remove(JoypadFlags::NOT_B_LEFT);
            }
            if self.input.right {
                value.remove(JoypadFlags::NOT_A_RIGHT);
            }
        }
        if self.is_buttons_selected {
            if self.input.start {
                value.remove(JoypadFlags::NOT_START_DOWN);
            }
            if self.input.select {
                value.remove(JoypadFlags::NOT_SELECT_UP);
            }
            if self.input.b {
                value.remove(JoypadFlags::NOT_B_LEFT);
            }
            if self.input.a {
                value.remove(JoypadFlags::NOT_A_RIGHT);
            }
        }
        value.bits() & 0x0f
    }

    pub(crate) fn register(&self) -> u8 {
        let mut value = JoypadFlags::from_bits_retain(self.lines());
        value.set(JoypadFlags::NOT_DPAD, !self.is_dpad_selected);
        value.set(JoypadFlags::NOT_BUTTONS, !self.is_buttons_selected);
        value.bits() | 0b11000000 // unused bits read 1
    }
}

impl Machine {
    pub(crate) fn write_joyp(&mut self, value: u8) {
        let flags = JoypadFlags::from_bits_retain(value);
        self.joypad.is_dpad_selected = !flags.contains(JoypadFlags::NOT_DPAD);
        self.joypad.is_buttons_selected = !flags.contains(JoypadFlags::NOT_BUTTONS);
        self.sgb_joyp_written(value);
        self.update_joypad_interrupt();
    }

    pub(crate) fn read_joyp(&self) -> u8 {
        let value = self.joypad.register();
        match &self.sgb {
            // with multiple controllers requested and neither matrix half
            // selected, the low nibble identifies the current player
            Some(sgb)
                if sgb.player_count > 1
                    && !self.joypad.is_dpad_selected
                    && !self.joypad.is_buttons_selected =>
            {
                (value & 0xf0) | (0x0f ^ sgb.current_player & 0x03)
            }
            _ => value,
        }
    }

    /// Apply new input state from the host and raise the interrupt for any
    /// selected line that just went low.
    pub fn set_input(&mut self, input: JoypadInput) {
        self.joypad.input = input;
        self.update_joypad_interrupt();
    }

    pub(crate) fn update_joypad_interrupt(&mut self) {
        let lines = self.joypad.lines();
        let newly_low = self.joypad.last_lines & !lines;
        self.joypad.last_lines = lines;
        if newly_low != 0 {
            self.io[io_index(INTERRUPT_FLAG)] |= Interruptions::JOYPAD.bits();
            // a press is the only way out of stop mode
            self.stopped = false;
        }
    }
}
