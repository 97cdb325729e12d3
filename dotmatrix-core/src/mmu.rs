//! Address decode and read/write gating.
//!
//! Every access consults the PPU blocking flags; blocked reads return 0xff
//! and blocked writes are dropped. While the OAM DMA engine runs, CPU reads
//! below the I/O page float to 0xff. The DMA engine itself reads through
//! `dma_read`, which skips the gating and extends echo RAM to the top of
//! the address space.

use crate::{
    Machine,
    state::{Interruptions, io_index, *},
};

impl Machine {
    fn wram_index(&self, address: u16) -> usize {
        match address & 0x1fff {
            offset @ 0x0000..0x1000 => usize::from(offset),
            offset => {
                let bank = if self.cgb_mode {
                    usize::from(self.ram_bank.max(1))
                } else {
                    1
                };
                bank * 0x1000 + usize::from(offset & 0x0fff)
            }
        }
    }

    pub(crate) fn vram_bank_offset(&self) -> usize {
        usize::from(self.vram_bank) * 0x2000
    }

    /// A read exactly as the CPU would see it, blocking windows included.
    /// Also the peek surface for debugger front-ends.
    pub fn read_memory(&self, address: u16) -> u8 {
        if self.boot_rom_mapped && address < 0x100 {
            return self.boot_rom[usize::from(address)];
        }

        // while the OAM copy runs, the CPU only really sees the high page
        if self.oam_dma.is_active() && address < IO {
            return 0xff;
        }

        match address {
            ..VIDEO_RAM => self.cartridge.read(address),
            VIDEO_RAM..EXTERNAL_RAM => {
                if self.ppu.vram_read_blocked {
                    0xff
                } else {
                    self.vram[usize::from(address - VIDEO_RAM) + self.vram_bank_offset()]
                }
            }
            EXTERNAL_RAM..WORK_RAM => self.cartridge.read(address),
            WORK_RAM..ECHO_RAM => self.ram[self.wram_index(address)],
            ECHO_RAM..OAM => self.ram[self.wram_index(address - 0x2000)],
            OAM..NOT_USABLE => {
                if self.ppu.oam_read_blocked || self.oam_dma.is_active() {
                    0xff
                } else {
                    self.oam[usize::from(address - OAM)]
                }
            }
            NOT_USABLE..IO => 0xff,
            IO..HRAM => self.read_io(address),
            HRAM..INTERRUPT_ENABLE => self.hram[usize::from(address - HRAM)],
            INTERRUPT_ENABLE => self.interrupt_enable.bits(),
        }
    }

    fn read_io(&self, address: u16) -> u8 {
        match address {
            JOYPAD => self.read_joyp(),
            SB => self.io[io_index(SB)],
            SC => self.io[io_index(SC)] | 0b0111_1110,
            DIV => self.timer.div(),
            TIMER_COUNTER => self.io[io_index(TIMER_COUNTER)],
            TIMER_MODULO => self.io[io_index(TIMER_MODULO)],
            TIMER_CONTROL => self.io[io_index(TIMER_CONTROL)] | 0xf8,
            INTERRUPT_FLAG => self.io[io_index(INTERRUPT_FLAG)] | 0b1110_0000,
            CH1_SWEEP..LCD_CONTROL => self.apu_read(address),
            LCD_CONTROL => self.io[io_index(LCD_CONTROL)],
            LCD_STATUS => self.io[io_index(LCD_STATUS)] | 0b1000_0000,
            SCY | SCX | LYC | DMA | BGP | OBP0 | OBP1 | WY | WX => self.io[io_index(address)],
            LY => self.io[io_index(LY)],
            KEY1 if self.is_cgb() => {
                0b0111_1110 | ((self.double_speed as u8) << 7) | (self.io[io_index(KEY1)] & 1)
            }
            VBK if self.is_cgb() => self.vram_bank | 0b1111_1110,
            HDMA5 if self.is_cgb() => self.hdma5_read(),
            RP if self.is_cgb() => self.io[io_index(RP)] | 0b0011_1100,
            BGPI if self.is_cgb() => self.io[io_index(BGPI)] | 0b0100_0000,
            BGPD if self.is_cgb() => {
                if self.ppu.vram_read_blocked {
                    0xff
                } else {
                    self.background_palettes_data[usize::from(self.io[io_index(BGPI)] & 0x3f)]
                }
            }
            OBPI if self.is_cgb() => self.io[io_index(OBPI)] | 0b0100_0000,
            OBPD if self.is_cgb() => {
                if self.ppu.vram_read_blocked {
                    0xff
                } else {
                    self.sprite_palettes_data[usize::from(self.io[io_index(OBPI)] & 0x3f)]
                }
            }
            SVBK if self.cgb_mode => self.ram_bank | 0b1111_1000,
            _ => 0xff,
        }
    }

    /// A write exactly as the CPU would issue it, including every register
    /// side effect.
    pub fn write_memory(&mut self, address: u16, value: u8) {
        if self.oam_dma.is_active() && (OAM..NOT_USABLE).contains(&address) {
            return;
        }

        match address {
            ..VIDEO_RAM => self.cartridge.write(address, value),
            VIDEO_RAM..EXTERNAL_RAM => {
                if !self.ppu.vram_write_blocked {
                    let offset = self.vram_bank_offset();
                    self.vram[usize::from(address - VIDEO_RAM) + offset] = value;
                }
            }
            EXTERNAL_RAM..WORK_RAM => self.cartridge.write(address, value),
            WORK_RAM..ECHO_RAM => {
                let index = self.wram_index(address);
                self.ram[index] = value;
            }
            ECHO_RAM..OAM => {
                let index = self.wram_index(address - 0x2000);
                self.ram[index] = value;
            }
            OAM..NOT_USABLE => {
                if !self.ppu.oam_write_blocked {
                    self.oam[usize::from(address - OAM)] = value;
                }
            }
            NOT_USABLE..IO => {}
            IO..HRAM => self.write_io(address, value),
            HRAM..INTERRUPT_ENABLE => self.hram[usize::from(address - HRAM)] = value,
            INTERRUPT_ENABLE => {
                self.interrupt_enable = Interruptions::from_bits_retain(value);
            }
        }
    }

    fn write_io(&mut self, address: u16, value: u8) {
        match address {
            JOYPAD => self.write_joyp(value),
            SB => self.io[io_index(SB)] = value,
            SC => self.write_serial_control(value),
            // writing any value resets the whole counter, not just DIV
            DIV => self.timer.reset_system_counter(),
            TIMER_COUNTER => self.io[io_index(TIMER_COUNTER)] = value,
            TIMER_MODULO => self.io[io_index(TIMER_MODULO)] = value,
            TIMER_CONTROL => self.io[io_index(TIMER_CONTROL)] = value & 0x07,
            INTERRUPT_FLAG => self.io[io_index(INTERRUPT_FLAG)] = value & 0x1f,
            CH1_SWEEP..LCD_CONTROL => self.apu_write(address, value),
            LCD_CONTROL => self.write_lcdc(value),
            // the mode and comparison bits are read-only
            LCD_STATUS => {
                self.io[io_index(LCD_STATUS)] =
                    (self.io[io_index(LCD_STATUS)] & 0x07) | (value & 0x78);
                self.stat_refresh_after_write();
            }
            SCY | SCX | BGP | OBP0 | OBP1 => self.io[io_index(address)] = value,
            LY => {} // read only
            LYC => {
                self.io[io_index(LYC)] = value;
                self.stat_update();
            }
            DMA => {
                self.io[io_index(DMA)] = value;
                self.oam_dma.request = true;
            }
            WY | WX => self.window_related_write(address, value),
            KEY1 if self.is_cgb() => self.io[io_index(KEY1)] = value & 1,
            VBK if self.cgb_mode => self.vram_bank = value & 1,
            BOOT_ROM_MAPPING_CONTROL => {
                if value & 1 != 0 {
                    self.boot_rom_mapped = false;
                }
            }
            HDMA1..=HDMA5 if self.cgb_mode => self.hdma_write(address, value),
            RP if self.is_cgb() => self.io[io_index(RP)] = value & 0xc1,
            BGPI if self.is_cgb() => self.io[io_index(BGPI)] = value,
            BGPD if self.is_cgb() => {
                let index = self.io[io_index(BGPI)] & 0x3f;
                if !self.ppu.vram_write_blocked {
                    self.background_palettes_data[usize::from(index)] = value;
                    self.palette_changed(true, index);
                }
                if self.io[io_index(BGPI)] & 0x80 != 0 {
                    self.io[io_index(BGPI)] = 0x80 | (index.wrapping_add(1) & 0x3f);
                }
            }
            OBPI if self.is_cgb() => self.io[io_index(OBPI)] = value,
            OBPD if self.is_cgb() => {
                let index = self.io[io_index(OBPI)] & 0x3f;
                if !self.ppu.vram_write_blocked {
                    self.sprite_palettes_data[usize::from(index)] = value;
                    self.palette_changed(false, index);
                }
                if self.io[io_index(OBPI)] & 0x80 != 0 {
                    self.io[io_index(OBPI)] = 0x80 | (index.wrapping_add(1) & 0x3f);
                }
            }
            SVBK if self.cgb_mode => {
                self.ram_bank = value & 7;
                self.io[io_index(SVBK)] = value & 7;
            }
            _ => {}
        }
    }

    fn write_lcdc(&mut self, value: u8) {
        let was_enabled = self.io[io_index(LCD_CONTROL)] & 0x80 != 0;
        self.window_related_write(LCD_CONTROL, value);
        let is_enabled = value & 0x80 != 0;
        if was_enabled && !is_enabled {
            self.lcd_off();
        } else if !was_enabled && is_enabled {
            self.lcd_on();
        }
    }

    /// Reads for the OAM DMA engine: no gating, and echo RAM covers
    /// everything above 0xe000.
    pub(crate) fn dma_read(&self, address: u16) -> u8 {
        match address {
            ..VIDEO_RAM => self.cartridge.read(address),
            VIDEO_RAM..EXTERNAL_RAM => {
                self.vram[usize::from(address - VIDEO_RAM) + self.vram_bank_offset()]
            }
            EXTERNAL_RAM..WORK_RAM => self.cartridge.read(address),
            WORK_RAM..ECHO_RAM => self.ram[self.wram_index(address)],
            ECHO_RAM.. => self.ram[self.wram_index(address.wrapping_sub(0x2000))],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Machine, Model, state::*};

    #[test]
    fn echo_ram_mirrors_work_ram() {
        let mut machine = Machine::new(Model::Dmg);
        machine.write_memory(WORK_RAM + 0x123, 0x42);
        assert_eq!(0x42, machine.read_memory(ECHO_RAM + 0x123));
        machine.write_memory(ECHO_RAM + 0x456, 0x24);
        assert_eq!(0x24, machine.read_memory(WORK_RAM + 0x456));
    }

    #[test]
    fn unusable_region_reads_ff() {
        let mut machine = Machine::new(Model::Dmg);
        machine.write_memory(0xfeb0, 0x55);
        assert_eq!(0xff, machine.read_memory(0xfeb0));
    }

    #[test]
    fn unused_io_bits_read_one() {
        let mut machine = Machine::new(Model::Dmg);
        machine.write_memory(TIMER_CONTROL, 0x05);
        assert_eq!(0xfd, machine.read_memory(TIMER_CONTROL));
        machine.write_memory(INTERRUPT_FLAG, 0x01);
        assert_eq!(0xe1, machine.read_memory(INTERRUPT_FLAG));
        machine.write_memory(SC, 0x80);
        assert_eq!(0xfe, machine.read_memory(SC));
        assert_eq!(0xff, machine.read_memory(0xff03));
    }

    #[test]
    fn cgb_registers_float_on_dmg() {
        let machine = Machine::new(Model::Dmg);
        assert_eq!(0xff, machine.read_memory(KEY1));
        assert_eq!(0xff, machine.read_memory(VBK));
        assert_eq!(0xff, machine.read_memory(SVBK));
        assert_eq!(0xff, machine.read_memory(BGPI));
    }

    #[test]
    fn cgb_work_ram_banking() {
        let mut machine = Machine::new(Model::Cgb);
        machine.write_memory(SVBK, 2);
        machine.write_memory(0xd000, 0xaa);
        machine.write_memory(SVBK, 3);
        machine.write_memory(0xd000, 0xbb);
        machine.write_memory(SVBK, 2);
        assert_eq!(0xaa, machine.read_memory(0xd000));
        // bank 0 maps as bank 1
        machine.write_memory(SVBK, 1);
        machine.write_memory(0xd000, 0xcc);
        machine.write_memory(SVBK, 0);
        assert_eq!(0xcc, machine.read_memory(0xd000));
    }

    #[test]
    fn cgb_vram_banking() {
        let mut machine = Machine::new(Model::Cgb);
        machine.write_memory(VIDEO_RAM, 0x11);
        machine.write_memory(VBK, 1);
        machine.write_memory(VIDEO_RAM, 0x22);
        assert_eq!(0x22, machine.read_memory(VIDEO_RAM));
        machine.write_memory(VBK, 0);
        assert_eq!(0x11, machine.read_memory(VIDEO_RAM));
    }

    #[test]
    fn cgb_palette_autoincrement() {
        let mut machine = Machine::new(Model::Cgb);
        machine.write_memory(BGPI, 0x80);
        machine.write_memory(BGPD, 0x1f);
        machine.write_memory(BGPD, 0x7c);
        machine.write_memory(BGPI, 0x00);
        assert_eq!(0x1f, machine.read_memory(BGPD));
        machine.write_memory(BGPI, 0x01);
        assert_eq!(0x7c, machine.read_memory(BGPD));
    }

    #[test]
    fn stat_write_keeps_readonly_bits() {
        let mut machine = Machine::new(Model::Dmg);
        machine.write_memory(LCD_CONTROL, 0x91);
        machine.write_memory(LCD_STATUS, 0xff);
        let stat = machine.read_memory(LCD_STATUS);
        assert_eq!(0x78, stat & 0x78);
        assert_eq!(0x80, stat & 0x80);
    }
}
