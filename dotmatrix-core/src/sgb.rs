//! Super-variant coprocessor adapter.
//!
//! Commands arrive as 16-byte packets bit-banged over the joypad select
//! lines: both lines low resets the pulse window, P15 low sends a 1, P14
//! low sends a 0, both high is the clock pulse. The decoder reassembles
//! packets and applies the palette and configuration commands; border and
//! attribute transfers are acknowledged but composited by the host.

pub const PACKET_SIZE: usize = 16;
const MAX_PACKETS: usize = 7;

#[derive(Clone)]
pub struct Sgb {
    command: [u8; PACKET_SIZE * MAX_PACKETS],
    command_write_index: u16, // in bits
    ready_for_pulse: bool,
    ready_for_write: bool,
    ready_for_stop: bool,
    disable_commands: bool,
    pub(crate) player_count: u8,
    pub(crate) current_player: u8,
    pub(crate) mask_mode: u8,
    // four palettes of four RGB15 colors, plus the 512-palette memory
    pub(crate) effective_palettes: [u16; 4 * 4],
    pub(crate) ram_palettes: Box<[u16]>,
    pub(crate) pending_attribute_transfer: bool,
    pub(crate) pending_tile_transfer: Option<bool>, // Some(high half)
}

impl Default for Sgb {
    fn default() -> Self {
        Self {
            command: [0; PACKET_SIZE * MAX_PACKETS],
            command_write_index: 0,
            ready_for_pulse: false,
            ready_for_write: false,
            ready_for_stop: false,
            disable_commands: false,
            player_count: 1,
            current_player: 0,
            mask_mode: 0,
            effective_palettes: [0; 16],
            ram_palettes: vec![0; 512 * 4].into_boxed_slice(),
            pending_attribute_transfer: false,
            pending_tile_transfer: None,
        }
    }
}

impl Sgb {
    fn command_size_bits(&self) -> u16 {
        let packets = if self.command[0] & 0xf1 == 0xf1 {
            1
        } else {
            (self.command[0] & 7).max(1)
        };
        u16::from(packets) * (PACKET_SIZE as u16) * 8
    }

    fn reset_command(&mut self) {
        self.command_write_index = 0;
        self.command = [0; PACKET_SIZE * MAX_PACKETS];
    }
}

impl crate::Machine {
    /// Observe a JOYP write and feed the packet decoder.
    pub(crate) fn sgb_joyp_written(&mut self, value: u8) {
        let mut command_complete = false;
        {
            let Some(sgb) = self.sgb.as_deref_mut() else {
                return;
            };
            if sgb.disable_commands {
                return;
            }
            if usize::from(sgb.command_write_index) >= sgb.command.len() * 8 {
                return;
            }

            let command_size = sgb.command_size_bits();

            match (value >> 4) & 3 {
                3 => sgb.ready_for_pulse = true,
                2 => {
                    // zero bit, or the stop window
                    if !sgb.ready_for_pulse || !sgb.ready_for_write {
                        return;
                    }
                    if sgb.ready_for_stop {
                        command_complete = sgb.command_write_index == command_size;
                        sgb.ready_for_pulse = false;
                        sgb.ready_for_write = false;
                        sgb.ready_for_stop = false;
                    } else {
                        sgb.command_write_index += 1;
                        sgb.ready_for_pulse = false;
                        if sgb.command_write_index % (PACKET_SIZE as u16 * 8) == 0 {
                            sgb.ready_for_stop = true;
                        }
                    }
                }
                1 => {
                    // one bit
                    if !sgb.ready_for_pulse || !sgb.ready_for_write {
                        return;
                    }
                    if sgb.ready_for_stop {
                        log::warn!("corrupt coprocessor packet, dropping");
                        sgb.ready_for_pulse = false;
                        sgb.ready_for_write = false;
                        sgb.reset_command();
                    } else {
                        sgb.command[usize::from(sgb.command_write_index / 8)] |=
                            1 << (sgb.command_write_index & 7);
                        sgb.command_write_index += 1;
                        sgb.ready_for_pulse = false;
                        if sgb.command_write_index % (PACKET_SIZE as u16 * 8) == 0 {
                            sgb.ready_for_stop = true;
                        }
                    }
                }
                0 => {
                    // both lines low: open the write window, advance the
                    // player counter when several controllers are requested
                    if !sgb.ready_for_pulse {
                        return;
                    }
                    sgb.ready_for_pulse = false;
                    sgb.ready_for_write = true;
                    if sgb.player_count > 1 {
                        sgb.current_player = (sgb.current_player + 1) & (sgb.player_count - 1);
                    }
                }
                _ => unreachable!(),
            }
        }

        if command_complete {
            self.sgb_command_ready();
            if let Some(sgb) = self.sgb.as_deref_mut() {
                sgb.reset_command();
            }
        }
    }

    fn sgb_command_ready(&mut self) {
        let command = self.sgb.as_deref().map(|sgb| sgb.command);
        let Some(command) = command else { return };
        let sgb = self.sgb.as_deref_mut().unwrap();

        // header packets carry the cartridge header to the companion chip;
        // a bad checksum or a non-super cartridge disables the channel
        if command[0] & 0xf1 == 0xf1 {
            let checksum: u8 = command[2..PACKET_SIZE]
                .iter()
                .fold(0u8, |sum, &byte| sum.wrapping_add(byte));
            if checksum != command[1] {
                log::warn!("bad checksum on header packet, disabling coprocessor commands");
                sgb.disable_commands = true;
                return;
            }
            if command[0] == 0xf9 && command[0xc] != 3 {
                sgb.disable_commands = true;
            }
            if command[0] == 0xfb && command[0x3] != 0x33 {
                sgb.disable_commands = true;
            }
            return;
        }

        match command[0] >> 3 {
            0x00 => sgb.pal_command(&command, 0, 1),
            0x01 => sgb.pal_command(&command, 2, 3),
            0x02 => sgb.pal_command(&command, 0, 3),
            0x03 => sgb.pal_command(&command, 1, 2),
            // PAL_SET: four palettes picked from palette memory
            0x0a => {
                for palette in 0..4usize {
                    let entry = usize::from(command[1 + palette * 2])
                        | (usize::from(command[2 + palette * 2] & 1) << 8);
                    for color in 0..4 {
                        sgb.effective_palettes[palette * 4 + color] =
                            sgb.ram_palettes[entry * 4 + color];
                    }
                }
            }
            // PAL_TRN: 4 KiB of palette memory out of VRAM tile data
            0x0b => {
                for entry in 0..2048usize {
                    sgb.ram_palettes[entry] = u16::from(self.vram[entry * 2])
                        | (u16::from(self.vram[entry * 2 + 1]) << 8);
                }
            }
            // ATTR_TRN; the attribute file itself is host-composited
            0x15 => sgb.pending_attribute_transfer = true,
            // CHR_TRN
            0x13 => sgb.pending_tile_transfer = Some(command[1] & 1 != 0),
            // PCT_TRN (border map); host-composited as well
            0x14 => {}
            // MLT_REQ
            0x11 => {
                sgb.player_count = [1, 2, 1, 4][usize::from(command[1] & 3)];
                sgb.current_player = sgb.player_count - 1;
            }
            // MASK_EN
            0x17 => sgb.mask_mode = command[1] & 3,
            command_id => {
                log::info!("unimplemented coprocessor command {command_id:#x}");
            }
        }
    }
}

impl Sgb {
    fn pal_command(&mut self, command: &[u8], first: usize, second: usize) {
        // color 0 is shared by all four palettes
        let color_0 = u16::from(command[1]) | (u16::from(command[2]) << 8);
        for palette in 0..4 {
            self.effective_palettes[palette * 4] = color_0;
        }
        for i in 0..3 {
            self.effective_palettes[first * 4 + i + 1] =
                u16::from(command[3 + i * 2]) | (u16::from(command[4 + i * 2]) << 8);
            self.effective_palettes[second * 4 + i + 1] =
                u16::from(command[9 + i * 2]) | (u16::from(command[10 + i * 2]) << 8);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Machine, Model, state::JOYPAD};

    fn send_packet(machine: &mut Machine, packet: &[u8; 16]) {
        // reset pulse
        machine.write_memory(JOYPAD, 0x30);
        machine.write_memory(JOYPAD, 0x00);
        machine.write_memory(JOYPAD, 0x30);
        for byte in packet {
            for bit in 0..8 {
                let line = if byte & (1 << bit) != 0 { 0x10 } else { 0x20 };
                machine.write_memory(JOYPAD, line);
                machine.write_memory(JOYPAD, 0x30);
            }
        }
        // stop bit
        machine.write_memory(JOYPAD, 0x20);
        machine.write_memory(JOYPAD, 0x30);
    }

    #[test]
    fn mlt_req_changes_player_count() {
        let mut machine = Machine::new(Model::Sgb);
        let mut packet = [0u8; 16];
        packet[0] = (0x11 << 3) | 1; // MLT_REQ, one packet
        packet[1] = 0x01; // two players
        send_packet(&mut machine, &packet);
        assert_eq!(2, machine.sgb.as_ref().unwrap().player_count);
    }

    #[test]
    fn pal01_sets_shared_color_zero() {
        let mut machine = Machine::new(Model::Sgb);
        let mut packet = [0u8; 16];
        packet[0] = 1; // PAL01, one packet
        packet[1] = 0x1f; // color 0 low
        packet[2] = 0x00;
        packet[3] = 0xe0; // palette 0 color 1 low
        packet[4] = 0x03;
        send_packet(&mut machine, &packet);
        let sgb = machine.sgb.as_ref().unwrap();
        for palette in 0..4 {
            assert_eq!(0x001f, sgb.effective_palettes[palette * 4]);
        }
        assert_eq!(0x03e0, sgb.effective_palettes[1]);
    }

    #[test]
    fn mask_en_sets_mask_mode() {
        let mut machine = Machine::new(Model::Sgb);
        let mut packet = [0u8; 16];
        packet[0] = (0x17 << 3) | 1;
        packet[1] = 0x02;
        send_packet(&mut machine, &packet);
        assert_eq!(2, machine.sgb.as_ref().unwrap().mask_mode);
    }

    #[test]
    fn corrupt_packet_is_dropped() {
        let mut machine = Machine::new(Model::Sgb);
        let mut packet = [0u8; 16];
        packet[0] = (0x11 << 3) | 1;
        packet[1] = 0x01;
        send_packet(&mut machine, &packet);
        // a 1 bit inside the stop window corrupts the next command
        machine.write_memory(JOYPAD, 0x30);
        machine.write_memory(JOYPAD, 0x00);
        machine.write_memory(JOYPAD, 0x30);
        for _ in 0..128 {
            machine.write_memory(JOYPAD, 0x20);
            machine.write_memory(JOYPAD, 0x30);
        }
        machine.write_memory(JOYPAD, 0x10);
        machine.write_memory(JOYPAD, 0x30);
        assert_eq!(2, machine.sgb.as_ref().unwrap().player_count);
    }

    #[test]
    fn non_super_machine_ignores_packets() {
        let mut machine = Machine::new(Model::Dmg);
        let mut packet = [0u8; 16];
        packet[0] = (0x11 << 3) | 1;
        packet[1] = 0x03;
        send_packet(&mut machine, &packet);
        assert!(machine.sgb.is_none());
    }
}
