//! Versioned save states and battery files.
//!
//! A state is a magic tag, a version word, then named sections each
//! prefixed with its byte length, followed by the raw cartridge RAM, work
//! RAM and video RAM blobs. The loader validates the header against the
//! live machine before touching anything, then reads `min(saved, current)`
//! bytes of each section and skips the excess, so states survive small
//! layout drifts within a version.

use crate::{Machine, StateError, mbc::MbcKind, state::Interruptions};

const MAGIC: &[u8; 4] = b"DTMX";
const VERSION: u32 = 1;

// battery files with a timestamp before this are not real RTC data
// (1997-01-01; there were no RTC cartridges before then)
const RTC_EPOCH_FLOOR: u64 = 852_076_800;

pub(crate) struct Writer {
    pub data: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.u8(value as u8);
    }

    pub fn u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i16(&mut self, value: i16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn bytes(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
    }

    fn section(&mut self, fill: impl FnOnce(&mut Writer)) {
        let mut body = Writer::new();
        fill(&mut body);
        self.u32(body.data.len() as u32);
        self.data.extend_from_slice(&body.data);
    }
}

/// Reads fields in order; once the saved section runs out the remaining
/// destinations keep their current values.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let slice = self.data.get(self.position..self.position + count)?;
        self.position += count;
        Some(slice)
    }

    pub fn u8(&mut self, dst: &mut u8) {
        if let Some(bytes) = self.take(1) {
            *dst = bytes[0];
        }
    }

    pub fn bool(&mut self, dst: &mut bool) {
        let mut raw = *dst as u8;
        self.u8(&mut raw);
        *dst = raw != 0;
    }

    pub fn u16(&mut self, dst: &mut u16) {
        if let Some(bytes) = self.take(2) {
            *dst = u16::from_le_bytes(bytes.try_into().unwrap());
        }
    }

    pub fn i16(&mut self, dst: &mut i16) {
        if let Some(bytes) = self.take(2) {
            *dst = i16::from_le_bytes(bytes.try_into().unwrap());
        }
    }

    pub fn u32(&mut self, dst: &mut u32) {
        if let Some(bytes) = self.take(4) {
            *dst = u32::from_le_bytes(bytes.try_into().unwrap());
        }
    }

    pub fn u64(&mut self, dst: &mut u64) {
        if let Some(bytes) = self.take(8) {
            *dst = u64::from_le_bytes(bytes.try_into().unwrap());
        }
    }

    pub fn bytes(&mut self, dst: &mut [u8]) {
        let count = dst.len().min(self.data.len() - self.position);
        dst[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
    }
}

fn read_section<'a>(data: &'a [u8], offset: &mut usize) -> Result<&'a [u8], StateError> {
    let length_bytes = data
        .get(*offset..*offset + 4)
        .ok_or(StateError::Truncated)?;
    let length = u32::from_le_bytes(length_bytes.try_into().unwrap()) as usize;
    *offset += 4;
    let body = data
        .get(*offset..*offset + length)
        .ok_or(StateError::Truncated)?;
    *offset += length;
    Ok(body)
}

impl Machine {
    pub fn save_state(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.bytes(MAGIC);
        w.u32(VERSION);

        w.section(|w| {
            w.u8(self.model as u8);
            w.bool(self.cgb_mode);
            w.u32(self.cartridge.mbc_ram.len() as u32);
            w.u32(self.ram.len() as u32);
            w.u32(self.vram.len() as u32);
        });

        w.section(|w| self.save_core_state(w));
        w.section(|w| self.save_hdma(w));
        w.section(|w| self.save_mbc(w));
        w.section(|w| w.bytes(&self.hram));
        w.section(|w| self.save_timing(w));
        w.section(|w| self.save_apu(w));
        w.section(|w| self.save_rtc(w));
        w.section(|w| self.save_video(w));

        w.bytes(&self.cartridge.mbc_ram);
        w.bytes(&self.ram);
        w.bytes(&self.vram);
        w.data
    }

    pub fn load_state(&mut self, data: &[u8]) -> Result<(), StateError> {
        if data.get(..4) != Some(MAGIC.as_slice()) {
            return Err(StateError::BadMagic);
        }
        let version = u32::from_le_bytes(
            data.get(4..8).ok_or(StateError::Truncated)?.try_into().unwrap(),
        );
        if version != VERSION {
            return Err(StateError::BadVersion(version));
        }

        let mut offset = 8;
        let header = read_section(data, &mut offset)?;
        let mut model = self.model as u8;
        let mut cgb_mode = self.cgb_mode;
        let mut mbc_ram_size = 0u32;
        let mut ram_size = 0u32;
        let mut vram_size = 0u32;
        {
            let mut c = Cursor::new(header);
            c.u8(&mut model);
            c.bool(&mut cgb_mode);
            c.u32(&mut mbc_ram_size);
            c.u32(&mut ram_size);
            c.u32(&mut vram_size);
        }
        if model != self.model as u8 {
            return Err(StateError::ModelMismatch);
        }
        if mbc_ram_size as usize != self.cartridge.mbc_ram.len()
            || ram_size as usize != self.ram.len()
            || vram_size as usize != self.vram.len()
        {
            return Err(StateError::SizeMismatch);
        }

        // locate every section and the trailing blobs before mutating
        let core_state = read_section(data, &mut offset)?;
        let hdma = read_section(data, &mut offset)?;
        let mbc = read_section(data, &mut offset)?;
        let hram = read_section(data, &mut offset)?;
        let timing = read_section(data, &mut offset)?;
        let apu = read_section(data, &mut offset)?;
        let rtc = read_section(data, &mut offset)?;
        let video = read_section(data, &mut offset)?;
        let blob_length = self.cartridge.mbc_ram.len() + self.ram.len() + self.vram.len();
        if data.len() < offset + blob_length {
            return Err(StateError::Truncated);
        }

        self.cgb_mode = cgb_mode;
        self.load_core_state(&mut Cursor::new(core_state));
        self.load_hdma(&mut Cursor::new(hdma));
        self.load_mbc(&mut Cursor::new(mbc));
        Cursor::new(hram).bytes(&mut self.hram);
        self.load_timing(&mut Cursor::new(timing));
        self.load_apu(&mut Cursor::new(apu));
        self.load_rtc(&mut Cursor::new(rtc));
        self.load_video(&mut Cursor::new(video));

        let mut blobs = Cursor::new(&data[offset..]);
        blobs.bytes(&mut self.cartridge.mbc_ram);
        blobs.bytes(&mut self.ram);
        blobs.bytes(&mut self.vram);
        self.cartridge.update_mappings();
        Ok(())
    }

    fn save_core_state(&self, w: &mut Writer) {
        for register in self.regs {
            w.u16(register);
        }
        w.u16(self.pc);
        w.bool(self.ime);
        w.bool(self.ime_toggle);
        w.bool(self.halted);
        w.bool(self.stopped);
        w.bool(self.halt_bug);
        w.bool(self.double_speed);
        w.bool(self.boot_rom_mapped);
        w.u8(self.interrupt_enable.bits());
        w.u8(self.vram_bank);
        w.u8(self.ram_bank);
        w.bytes(&self.io);
        w.bytes(&self.oam);
    }

    fn load_core_state(&mut self, c: &mut Cursor) {
        for register in &mut self.regs {
            c.u16(register);
        }
        c.u16(&mut self.pc);
        c.bool(&mut self.ime);
        c.bool(&mut self.ime_toggle);
        c.bool(&mut self.halted);
        c.bool(&mut self.stopped);
        c.bool(&mut self.halt_bug);
        c.bool(&mut self.double_speed);
        c.bool(&mut self.boot_rom_mapped);
        let mut interrupt_enable = self.interrupt_enable.bits();
        c.u8(&mut interrupt_enable);
        self.interrupt_enable = Interruptions::from_bits_retain(interrupt_enable);
        c.u8(&mut self.vram_bank);
        c.u8(&mut self.ram_bank);
        c.bytes(&mut self.io);
        c.bytes(&mut self.oam);
        self.vram_bank &= 1;
        self.ram_bank &= 7;
    }

    fn save_hdma(&self, w: &mut Writer) {
        w.u16(self.hdma.source);
        w.u16(self.hdma.destination);
        w.u8(self.hdma.steps_left);
        w.bool(self.hdma.on_hblank);
        w.bool(self.hdma.active);
    }

    fn load_hdma(&mut self, c: &mut Cursor) {
        c.u16(&mut self.hdma.source);
        c.u16(&mut self.hdma.destination);
        c.u8(&mut self.hdma.steps_left);
        c.bool(&mut self.hdma.on_hblank);
        c.bool(&mut self.hdma.active);
        if self.hdma.steps_left == 0 {
            self.hdma.active = false;
        }
    }

    fn save_mbc(&self, w: &mut Writer) {
        let cart = &self.cartridge;
        w.u8(match cart.kind {
            MbcKind::None => 0,
            MbcKind::Mbc1 => 1,
            MbcKind::Mbc1m => 2,
            MbcKind::Mbc2 => 3,
            MbcKind::Mbc3 => 4,
            MbcKind::Mbc5 => 5,
        });
        w.bool(cart.ram_enable);
        w.u8(cart.mbc1.bank_low);
        w.u8(cart.mbc1.bank_high);
        w.bool(cart.mbc1.mode);
        w.u8(cart.mbc2_rom_bank);
        w.u8(cart.mbc3.rom_bank);
        w.u8(cart.mbc3.ram_bank);
        w.bool(cart.mbc3.latch_low);
        w.u8(cart.mbc5.rom_bank_low);
        w.u8(cart.mbc5.rom_bank_high);
        w.u8(cart.mbc5.ram_bank);
    }

    fn load_mbc(&mut self, c: &mut Cursor) {
        let cart = &mut self.cartridge;
        // the kind is wired by the inserted cartridge, not by the state
        let mut kind = 0;
        c.u8(&mut kind);
        c.bool(&mut cart.ram_enable);
        c.u8(&mut cart.mbc1.bank_low);
        c.u8(&mut cart.mbc1.bank_high);
        c.bool(&mut cart.mbc1.mode);
        c.u8(&mut cart.mbc2_rom_bank);
        c.u8(&mut cart.mbc3.rom_bank);
        c.u8(&mut cart.mbc3.ram_bank);
        c.bool(&mut cart.mbc3.latch_low);
        c.u8(&mut cart.mbc5.rom_bank_low);
        c.u8(&mut cart.mbc5.rom_bank_high);
        c.u8(&mut cart.mbc5.ram_bank);
    }

    fn save_timing(&self, w: &mut Writer) {
        w.u16(self.timer.system_counter);
        self.timer.save_edges(w);
        w.u64(self.cycle_counter);
        w.u32(self.serial.countdown);
        w.u16(self.oam_dma.range.start);
        w.u16(self.oam_dma.range.end);
        w.bool(self.oam_dma.is_active);
        w.bool(self.oam_dma.request);
    }

    fn load_timing(&mut self, c: &mut Cursor) {
        c.u16(&mut self.timer.system_counter);
        self.timer.load_edges(c);
        c.u64(&mut self.cycle_counter);
        c.u32(&mut self.serial.countdown);
        c.u16(&mut self.oam_dma.range.start);
        c.u16(&mut self.oam_dma.range.end);
        c.bool(&mut self.oam_dma.is_active);
        c.bool(&mut self.oam_dma.request);
    }

    fn save_rtc(&self, w: &mut Writer) {
        w.bytes(&self.cartridge.rtc.live);
        w.bytes(&self.cartridge.rtc.latched);
        w.u64(self.cartridge.rtc.last_second);
    }

    fn load_rtc(&mut self, c: &mut Cursor) {
        c.bytes(&mut self.cartridge.rtc.live);
        c.bytes(&mut self.cartridge.rtc.latched);
        c.u64(&mut self.cartridge.rtc.last_second);
    }

    /// Cartridge RAM, then RTC fields and the wall-clock anchor when the
    /// cartridge has a clock.
    pub fn save_battery(&self) -> Option<Vec<u8>> {
        if !self.cartridge.has_battery {
            return None;
        }
        if self.cartridge.mbc_ram.is_empty() && !self.cartridge.has_rtc {
            return None;
        }
        let mut w = Writer::new();
        w.bytes(&self.cartridge.mbc_ram);
        if self.cartridge.has_rtc {
            w.bytes(&self.cartridge.rtc.live);
            w.bytes(&self.cartridge.rtc.latched);
            w.u64(self.cartridge.rtc.last_second);
        }
        Some(w.data)
    }

    /// Loading stops quietly on a short file. Timestamps from the future or
    /// before 1997 reset the clock and set the battery-dead hint bit.
    pub fn load_battery(&mut self, data: &[u8], now_unix_seconds: u64) {
        let ram_length = self.cartridge.mbc_ram.len();
        let mut c = Cursor::new(data);
        c.bytes(&mut self.cartridge.mbc_ram);
        if !self.cartridge.has_rtc {
            return;
        }
        if data.len() < ram_length + 5 + 5 + 8 {
            self.reset_rtc(now_unix_seconds);
            return;
        }
        c.bytes(&mut self.cartridge.rtc.live);
        c.bytes(&mut self.cartridge.rtc.latched);
        c.u64(&mut self.cartridge.rtc.last_second);

        if self.cartridge.rtc.last_second > now_unix_seconds
            || self.cartridge.rtc.last_second < RTC_EPOCH_FLOOR
        {
            self.reset_rtc(now_unix_seconds);
        }
    }

    fn reset_rtc(&mut self, now_unix_seconds: u64) {
        self.cartridge.rtc.last_second = now_unix_seconds;
        // hints to the game that the clock needs to be set again
        self.cartridge.rtc.live[4] |= crate::mbc::RTC_DAY_CARRY;
    }
}

#[cfg(test)]
mod tests {
    use crate::{Machine, Model, StateError, state::*};

    fn machine_with_progress() -> Machine {
        let mut machine = Machine::new(Model::Dmg);
        machine.load_test_program(&[0x3e, 0x55, 0x06, 0x66, 0x21, 0x00, 0xc0, 0x77]);
        machine.write_memory(LCD_CONTROL, 0x91);
        machine.write_memory(AUDIO_MASTER_CONTROL, 0x80);
        machine.write_memory(CH2_VOLUME_AND_ENVELOPE, 0xf0);
        machine.write_memory(CH2_PERIOD_HIGH_AND_CONTROL, 0x80);
        for _ in 0..5000 {
            machine.step();
        }
        machine
    }

    #[test]
    fn state_roundtrip_resumes_identically() {
        let mut machine = machine_with_progress();
        let saved = machine.save_state();

        let mut restored = Machine::new(Model::Dmg);
        restored.load_test_program(&[0x3e, 0x55, 0x06, 0x66, 0x21, 0x00, 0xc0, 0x77]);
        restored.load_state(&saved).unwrap();

        assert_eq!(machine.regs, restored.regs);
        assert_eq!(machine.pc, restored.pc);
        assert_eq!(machine.cycles(), restored.cycles());

        // saving the restored machine reproduces the same bytes
        assert_eq!(saved, restored.save_state());

        // and both continue in lockstep
        for _ in 0..1000 {
            machine.step();
            restored.step();
        }
        assert_eq!(machine.regs, restored.regs);
        assert_eq!(machine.pc, restored.pc);
        assert_eq!(
            machine.read_memory(LCD_STATUS),
            restored.read_memory(LCD_STATUS)
        );
    }

    #[test]
    fn bad_magic_is_rejected_without_touching_state() {
        let mut machine = machine_with_progress();
        let pc = machine.pc;
        let mut saved = machine.save_state();
        saved[0] = b'?';
        assert!(matches!(
            machine.load_state(&saved),
            Err(StateError::BadMagic)
        ));
        assert_eq!(pc, machine.pc);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut machine = machine_with_progress();
        let mut saved = machine.save_state();
        saved[4] = 0xfe;
        assert!(matches!(
            machine.load_state(&saved),
            Err(StateError::BadVersion(_))
        ));
    }

    #[test]
    fn model_mismatch_is_rejected() {
        let machine = machine_with_progress();
        let saved = machine.save_state();
        let mut other = Machine::new(Model::Cgb);
        other.load_test_program(&[0x00]);
        assert!(other.load_state(&saved).is_err());
    }

    #[test]
    fn battery_roundtrip_with_rtc() {
        let mut machine = Machine::new(Model::Dmg);
        let mut rom = vec![0u8; 0x8000];
        rom[0x147] = 0x10; // MBC3+TIMER+RAM+BATTERY
        rom[0x149] = 0x03;
        machine.load_rom(rom).unwrap();
        machine.write_memory(0x0000, 0x0a);
        machine.write_memory(0xa000, 0x5a);
        machine.update_rtc(1_000_000_000);
        machine.update_rtc(1_000_000_030);

        let battery = machine.save_battery().unwrap();

        let mut restored = Machine::new(Model::Dmg);
        let mut rom = vec![0u8; 0x8000];
        rom[0x147] = 0x10;
        rom[0x149] = 0x03;
        restored.load_rom(rom).unwrap();
        restored.load_battery(&battery, 1_000_000_040);
        restored.write_memory(0x0000, 0x0a);
        assert_eq!(0x5a, restored.read_memory(0xa000));
        // the clock kept ticking across the gap
        restored.update_rtc(1_000_000_040);
        restored.write_memory(0x6000, 0x00);
        restored.write_memory(0x6000, 0x01);
        restored.write_memory(0x4000, 0x08); // RTC seconds register
        assert_eq!(40, restored.read_memory(0xa000));
    }

    #[test]
    fn battery_from_the_future_resets_the_clock() {
        let mut machine = Machine::new(Model::Dmg);
        let mut rom = vec![0u8; 0x8000];
        rom[0x147] = 0x10;
        rom[0x149] = 0x03;
        machine.load_rom(rom).unwrap();
        machine.update_rtc(2_000_000_000);
        let battery = machine.save_battery().unwrap();

        let mut restored = Machine::new(Model::Dmg);
        let mut rom = vec![0u8; 0x8000];
        rom[0x147] = 0x10;
        rom[0x149] = 0x03;
        restored.load_rom(rom).unwrap();
        restored.load_battery(&battery, 1_500_000_000); // "now" is earlier
        assert_ne!(0, restored.cartridge.rtc.live[4] & 0x80);
    }
}
