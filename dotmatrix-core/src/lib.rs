//! Cycle-accurate emulation core for the classic 8-bit handheld and its
//! color and super revisions.
//!
//! One `Machine` owns every buffer and every subsystem. The CPU drives
//! time: each opcode handler publishes cycle deltas through
//! `advance_cycles`, which fans them out to the timer, the APU, the PPU
//! and the DMA engines in that fixed order, so a mid-instruction write is
//! visible to a peripheral on the very cycle it completes.

pub mod apu;
mod cpu;
mod dma;
pub mod joypad;
pub mod mbc;
mod mmu;
pub mod ppu;
mod savestate;
mod serial;
pub mod sgb;
pub mod state;
pub mod timer;
pub mod tuning;

use std::fmt;

use crate::{
    apu::Apu,
    dma::{Hdma, OamDma},
    joypad::{Joypad, JoypadInput},
    mbc::Cartridge,
    ppu::Ppu,
    serial::Serial,
    sgb::Sgb,
    state::{Interruptions, io_index, *},
    timer::Timer,
};

pub const WIDTH: u8 = 160;
pub const HEIGHT: u8 = 144;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Model {
    /// The original monochrome device.
    Dmg = 0,
    /// The color revision, with double speed, banked RAM/VRAM and HDMA.
    Cgb = 1,
    /// The super variant with the companion coprocessor.
    Sgb = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    ImageTooSmall(usize),
    UnknownCartridgeType(u8),
    BadRamSize(u8),
    BadBootRomSize(usize),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageTooSmall(size) => write!(f, "image of {size} bytes has no header"),
            Self::UnknownCartridgeType(code) => write!(f, "unknown cartridge type ${code:02x}"),
            Self::BadRamSize(code) => write!(f, "unknown RAM size code ${code:02x}"),
            Self::BadBootRomSize(size) => write!(f, "boot ROM must be 256 bytes, got {size}"),
        }
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    BadMagic,
    BadVersion(u32),
    ModelMismatch,
    SizeMismatch,
    Truncated,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not a save state"),
            Self::BadVersion(version) => write!(f, "save state version {version} not supported"),
            Self::ModelMismatch => write!(f, "save state is for a different model"),
            Self::SizeMismatch => write!(f, "save state has non-matching RAM sizes"),
            Self::Truncated => write!(f, "save state is truncated"),
        }
    }
}

impl std::error::Error for StateError {}

pub type VblankCallback = Box<dyn FnMut(&[u32], usize, usize) + Send>;
pub type InputPollCallback = Box<dyn FnMut() -> JoypadInput + Send>;
pub type RgbEncodeCallback = Box<dyn FnMut(u8, u8, u8) -> u32 + Send>;

pub struct Machine {
    pub(crate) model: Model,
    pub(crate) cgb_mode: bool,
    pub(crate) double_speed: bool,

    // CPU
    pub(crate) regs: [u16; 5], // AF BC DE HL SP
    pub(crate) pc: u16,
    pub(crate) ime: bool,
    pub(crate) ime_toggle: bool,
    pub(crate) halted: bool,
    pub(crate) stopped: bool,
    pub(crate) halt_bug: bool,
    pub(crate) interrupt_enable: Interruptions,

    // memory
    pub(crate) ram: Box<[u8]>,
    pub(crate) vram: Box<[u8]>,
    pub(crate) oam: [u8; 0xa0],
    pub(crate) hram: [u8; 0x7f],
    pub(crate) io: [u8; 0x80],
    pub(crate) ram_bank: u8,
    pub(crate) vram_bank: u8,
    pub(crate) boot_rom: [u8; 0x100],
    pub(crate) boot_rom_loaded: bool,
    pub(crate) boot_rom_mapped: bool,

    pub(crate) cartridge: Cartridge,
    pub(crate) timer: Timer,
    pub(crate) joypad: Joypad,
    pub(crate) serial: Serial,
    pub(crate) apu: Apu,
    pub(crate) ppu: Ppu,
    pub(crate) oam_dma: OamDma,
    pub(crate) hdma: Hdma,
    pub(crate) sgb: Option<Box<Sgb>>,

    // host interface
    pub(crate) screen: Box<[u32]>,
    pub(crate) rgb_encode: Option<RgbEncodeCallback>,
    pub(crate) vblank_callback: Option<VblankCallback>,
    pub(crate) input_poll: Option<InputPollCallback>,
    pub(crate) frame_ready: bool,

    // color pipeline
    pub(crate) background_palettes_rgb: [u32; 0x20],
    pub(crate) sprite_palettes_rgb: [u32; 0x20],
    pub(crate) background_palettes_data: [u8; 0x40],
    pub(crate) sprite_palettes_data: [u8; 0x40],
    pub(crate) blank_pixel: u32,
    pub(crate) black_pixel: u32,

    pub(crate) cycle_counter: u64,
}

impl Machine {
    pub fn new(model: Model) -> Self {
        let (ram_size, vram_size) = match model {
            Model::Cgb => (8 * 0x1000, 2 * 0x2000),
            _ => (0x2000, 0x2000),
        };
        let mut machine = Self {
            model,
            cgb_mode: model == Model::Cgb,
            double_speed: false,
            regs: [0; 5],
            pc: 0,
            ime: false,
            ime_toggle: false,
            halted: false,
            stopped: false,
            halt_bug: false,
            interrupt_enable: Interruptions::empty(),
            ram: vec![0; ram_size].into_boxed_slice(),
            vram: vec![0; vram_size].into_boxed_slice(),
            oam: [0; 0xa0],
            hram: [0; 0x7f],
            io: [0; 0x80],
            ram_bank: 1,
            vram_bank: 0,
            boot_rom: [0; 0x100],
            boot_rom_loaded: false,
            boot_rom_mapped: false,
            cartridge: Cartridge::default(),
            timer: Timer::default(),
            joypad: Joypad::default(),
            serial: Serial::default(),
            apu: Apu::default(),
            ppu: Ppu::default(),
            oam_dma: OamDma::default(),
            hdma: Hdma::default(),
            sgb: (model == Model::Sgb).then(|| Box::new(Sgb::default())),
            screen: vec![0; usize::from(WIDTH) * usize::from(HEIGHT)].into_boxed_slice(),
            rgb_encode: None,
            vblank_callback: None,
            input_poll: None,
            frame_ready: false,
            background_palettes_rgb: [0; 0x20],
            sprite_palettes_rgb: [0; 0x20],
            background_palettes_data: [0; 0x40],
            sprite_palettes_data: [0; 0x40],
            blank_pixel: 0xffffffff,
            black_pixel: 0,
            cycle_counter: 0,
        };
        machine.refresh_monochrome_shades();
        machine.apply_power_on_defaults();
        machine
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn is_cgb(&self) -> bool {
        self.model == Model::Cgb
    }

    pub fn is_cgb_mode(&self) -> bool {
        self.cgb_mode
    }

    pub fn is_double_speed(&self) -> bool {
        self.double_speed
    }

    /// Total base cycles executed since power-on.
    pub fn cycles(&self) -> u64 {
        self.cycle_counter
    }

    pub fn af(&self) -> u16 {
        self.regs[cpu::AF]
    }

    pub fn bc(&self) -> u16 {
        self.regs[cpu::BC]
    }

    pub fn de(&self) -> u16 {
        self.regs[cpu::DE]
    }

    pub fn hl(&self) -> u16 {
        self.regs[cpu::HL]
    }

    pub fn sp(&self) -> u16 {
        self.regs[cpu::SP]
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// The 160x144 host-format frame, row major.
    pub fn screen(&self) -> &[u32] {
        &self.screen
    }

    /// Whether the CPU quiesced on an illegal opcode (interrupts cleared and
    /// halted with nothing to wake it).
    pub fn is_emulation_stopped(&self) -> bool {
        self.halted && self.interrupt_enable.is_empty()
    }

    /// Parse a cartridge image and power the machine.
    pub fn load_rom(&mut self, rom: Vec<u8>) -> Result<(), LoadError> {
        self.cartridge = Cartridge::new(rom)?;
        // a color-aware title on color hardware enables the color feature set
        self.cgb_mode = self.is_cgb() && self.cartridge.rom[0x143] & 0x80 != 0;
        self.power(false);
        Ok(())
    }

    pub fn load_boot_rom(&mut self, bytes: &[u8]) -> Result<(), LoadError> {
        if bytes.len() != self.boot_rom.len() {
            return Err(LoadError::BadBootRomSize(bytes.len()));
        }
        self.boot_rom.copy_from_slice(bytes);
        self.boot_rom_loaded = true;
        Ok(())
    }

    /// Reset live state. Cartridge RAM and the RTC survive unless
    /// `clear_cartridge_ram` is set.
    pub fn power(&mut self, clear_cartridge_ram: bool) {
        self.double_speed = false;
        self.regs = [0; 5];
        self.pc = 0;
        self.ime = false;
        self.ime_toggle = false;
        self.halted = false;
        self.stopped = false;
        self.halt_bug = false;
        self.interrupt_enable = Interruptions::empty();
        self.ram.fill(0);
        self.vram.fill(0);
        self.oam = [0; 0xa0];
        self.hram = [0; 0x7f];
        self.io = [0; 0x80];
        self.ram_bank = 1;
        self.vram_bank = 0;
        self.timer = Timer::default();
        self.joypad = Joypad::default();
        self.serial = Serial::default();
        self.apu = Apu::default();
        self.ppu = Ppu::default();
        self.oam_dma = OamDma::default();
        self.hdma = Hdma::default();
        if self.model == Model::Sgb {
            self.sgb = Some(Box::new(Sgb::default()));
        }
        self.frame_ready = false;
        self.cycle_counter = 0;

        let rom = std::mem::take(&mut self.cartridge.rom);
        let mbc_ram = std::mem::take(&mut self.cartridge.mbc_ram);
        let rtc = self.cartridge.rtc.clone();
        let kind = self.cartridge.kind;
        let (has_battery, has_rtc, has_rumble) = (
            self.cartridge.has_battery,
            self.cartridge.has_rtc,
            self.cartridge.has_rumble,
        );
        self.cartridge = Cartridge {
            rom,
            mbc_ram: if clear_cartridge_ram {
                vec![0; mbc_ram.len()].into_boxed_slice()
            } else {
                mbc_ram
            },
            kind,
            has_battery,
            has_rtc,
            has_rumble,
            rtc: if clear_cartridge_ram {
                Default::default()
            } else {
                rtc
            },
            ..Cartridge::default()
        };
        self.cartridge.update_mappings();

        self.boot_rom_mapped = self.boot_rom_loaded;
        if !self.boot_rom_mapped {
            self.apply_power_on_defaults();
        }
    }

    /// The register state the boot ROM leaves behind, for running without
    /// one.
    fn apply_power_on_defaults(&mut self) {
        use crate::cpu::{AF, BC, DE, HL, SP};
        self.regs[AF] = match self.model {
            Model::Dmg => 0x01b0,
            Model::Cgb => 0x1180,
            Model::Sgb => 0x0100,
        };
        self.regs[BC] = 0x0013;
        self.regs[DE] = 0x00d8;
        self.regs[HL] = 0x014d;
        self.regs[SP] = 0xfffe;
        self.pc = 0x0100;

        self.io[io_index(INTERRUPT_FLAG)] = 0x01;
        self.io[io_index(BGP)] = 0xfc;
        self.io[io_index(OBP0)] = 0xff;
        self.io[io_index(OBP1)] = 0xff;

        // the boot ROM leaves the APU powered with these levels
        self.apu_write(AUDIO_MASTER_CONTROL, 0x80);
        self.apu_write(MASTER_VOLUME_AND_VIN_PANNING, 0x77);
        self.apu_write(SOUND_PANNING, 0xf3);

        self.io[io_index(LCD_CONTROL)] = 0x91;
        self.lcd_on();
    }

    /// Advance one CPU instruction, or four cycles while quiesced.
    pub fn step(&mut self) {
        self.cpu_run();
    }

    /// Run until the next end-of-frame signal.
    pub fn run_frame(&mut self) {
        loop {
            self.step();
            if self.take_frame_ready() {
                return;
            }
        }
    }

    /// True once per completed frame (70224 base cycles).
    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    /// The scheduler root: fan a cycle delta out to every subsystem, in
    /// fixed order. In double speed the CPU-side clocks (timer, OAM DMA)
    /// see the full delta while the PPU and APU see half.
    pub(crate) fn advance_cycles(&mut self, cycles: u8) {
        self.cycle_counter += u64::from(cycles);
        let base = if self.double_speed {
            cycles >> 1
        } else {
            cycles
        };
        self.timer_run(cycles);
        self.apu_update_div_edge();
        self.apu_run(base);
        self.display_run(base);
        self.oam_dma_run(cycles);
        self.hdma_run(base);
        self.serial_run(cycles);
    }

    /// Advance the cartridge clock to the given wall-clock second count.
    /// The core never reads the system time itself.
    pub fn update_rtc(&mut self, now_unix_seconds: u64) {
        if self.cartridge.has_rtc {
            self.cartridge.rtc.advance_to(now_unix_seconds);
        }
    }

    pub fn set_vblank_callback(&mut self, callback: VblankCallback) {
        self.vblank_callback = Some(callback);
    }

    pub fn set_input_poll_callback(&mut self, callback: InputPollCallback) {
        self.input_poll = Some(callback);
    }

    pub fn set_rgb_encode_callback(&mut self, callback: RgbEncodeCallback) {
        self.rgb_encode = Some(callback);
        self.refresh_monochrome_shades();
        self.refresh_all_palettes();
    }

    /// Per-subsystem cycle counters (timer, APU, PPU, OAM DMA); each tracks
    /// the cycles fanned out to it since power-on.
    pub fn subsystem_cycles(&self) -> [u64; 4] {
        [
            self.timer.consumed_cycles,
            self.apu.consumed_cycles,
            self.ppu.consumed_cycles,
            self.oam_dma.consumed_cycles,
        ]
    }

    /// Build a flat no-controller image with `program` at the entry point
    /// and boot it. Test scaffolding shared by the test suites.
    pub fn load_test_program(&mut self, program: &[u8]) {
        let mut rom = vec![0u8; 0x8000];
        rom[0x100..0x100 + program.len()].copy_from_slice(program);
        self.load_rom(rom).expect("flat image is always valid");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_fanout_is_conserved() {
        let mut machine = Machine::new(Model::Dmg);
        machine.load_test_program(&[0x00, 0x04, 0x18, 0xfb]); // nop; inc b; jr -5
        for _ in 0..10_000 {
            machine.step();
        }
        let total = machine.cycles();
        assert!(total > 0);
        for consumed in machine.subsystem_cycles() {
            assert_eq!(total, consumed);
        }
    }

    #[test]
    fn frame_signal_every_70224_cycles() {
        let mut machine = Machine::new(Model::Dmg);
        machine.load_test_program(&[0x18, 0xfe]); // jr -2
        machine.run_frame();
        let first = machine.cycles();
        machine.run_frame();
        assert_eq!(70224, machine.cycles() - first);
    }

    #[test]
    fn vblank_callback_reports_dimensions() {
        use std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        };
        let frames = Arc::new(AtomicUsize::new(0));
        let seen = frames.clone();
        let mut machine = Machine::new(Model::Dmg);
        machine.load_test_program(&[0x18, 0xfe]);
        machine.set_vblank_callback(Box::new(move |screen, width, height| {
            assert_eq!(160, width);
            assert_eq!(144, height);
            assert_eq!(160 * 144, screen.len());
            seen.fetch_add(1, Ordering::Relaxed);
        }));
        machine.run_frame();
        machine.run_frame();
        assert_eq!(2, frames.load(Ordering::Relaxed));
    }

    #[test]
    fn double_speed_keeps_display_cadence() {
        let mut machine = Machine::new(Model::Cgb);
        // switch to double speed, then spin
        machine.load_test_program(&[0x3e, 0x01, 0xe0, 0x4d, 0x10, 0x00, 0x18, 0xfe]);
        machine.run_frame();
        assert!(machine.is_double_speed());
        let first = machine.cycles();
        machine.run_frame();
        // the CPU spends twice the cycles per frame at double speed
        assert_eq!(2 * 70224, machine.cycles() - first);
    }

    #[test]
    fn illegal_opcode_surface() {
        let mut machine = Machine::new(Model::Dmg);
        machine.load_test_program(&[0xed]);
        machine.step();
        assert!(machine.is_emulation_stopped());
    }
}
