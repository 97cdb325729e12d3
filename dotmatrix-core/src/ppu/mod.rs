//! Line-level pixel pipeline.
//!
//! The whole display is one state machine: every variant of `DisplayState`
//! is a resume label, and `sleep(n, next)` parks the machine for `n` dots
//! before the next labelled block runs. `display_run` feeds it the cycle
//! budget the CPU just spent, so mid-instruction writes land between dots
//! exactly like they do on hardware.
//!
//! STAT is deliberately late: the mode bits change a few dots after the
//! internal mode does at the mode 2 and mode 3 boundaries, while the
//! interrupt sources fire on time (the OAM source one dot early, except on
//! line 0). The single STAT interrupt line is the OR of the enabled
//! sources; the CPU-visible interrupt fires only on its rising edge.

mod fifo;

use arrayvec::ArrayVec;

pub(crate) use fifo::Fifo;

use crate::{
    HEIGHT, Machine, WIDTH,
    state::{Interruptions, io_index, *},
};

pub const MODE2_LENGTH: u32 = 80;
pub const MODE3_LENGTH: u32 = 172;
pub const LINE_LENGTH: u32 = 456;
pub const LINES: u8 = 144;
pub const VIRTUAL_LINES: u8 = 154;
pub const FRAME_LENGTH: u32 = LINE_LENGTH * VIRTUAL_LINES as u32; // 70224

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LcdControl: u8 {
        const LCD_PPU_ENABLE = 1 << 7;
        const WINDOW_TILE_MAP = 1 << 6;
        const WINDOW_ENABLE = 1 << 5;
        const BG_AND_WINDOW_TILES = 1 << 4;
        const BG_TILE_MAP = 1 << 3;
        const OBJ_SIZE = 1 << 2;
        const OBJ_ENABLE = 1 << 1;
        const BG_AND_WINDOW_ENABLE = 1;
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub(crate) enum FetcherState {
    #[default]
    GetTile,
    GetTileDataLower,
    GetTileDataHigh,
    Sleep,
}

impl FetcherState {
    fn advance(self) -> Self {
        match self {
            Self::GetTile => Self::GetTileDataLower,
            Self::GetTileDataLower => Self::GetTileDataHigh,
            Self::GetTileDataHigh => Self::Sleep,
            Self::Sleep => Self::GetTile,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::GetTile => 0,
            Self::GetTileDataLower => 1,
            Self::GetTileDataHigh => 2,
            Self::Sleep => 3,
        }
    }

    fn from_index(index: u8) -> Self {
        match index & 3 {
            0 => Self::GetTile,
            1 => Self::GetTileDataLower,
            2 => Self::GetTileDataHigh,
            _ => Self::Sleep,
        }
    }
}

/// Resume labels of the display state machine.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub(crate) enum DisplayState {
    #[default]
    LcdOffFrame,
    // the truncated line 0 right after the LCD is switched on
    EnableGlitchLine0,
    GlitchMode3,
    GlitchMode0Entry,
    GlitchMode0Stat,
    GlitchLineEnd,
    // steady-state visible lines
    LineStart,
    OamIntGlitch,
    OamScanStart,
    Mode3Blocking,
    PixelTransferSetup,
    RenderStart,
    ObjectFetchBegin,
    ObjectFetchEnd,
    RenderDot,
    HblankStat,
    HblankEnd,
    // vertical blank
    VblankLineStart,
    VblankLineBody,
    VblankLineEnd,
    Line153Ly0,
    Line153CompareNone,
    Line153CompareZero,
    FrameEnd,
}

impl DisplayState {
    const ALL: [DisplayState; 24] = {
        use DisplayState::*;
        [
            LcdOffFrame,
            EnableGlitchLine0,
            GlitchMode3,
            GlitchMode0Entry,
            GlitchMode0Stat,
            GlitchLineEnd,
            LineStart,
            OamIntGlitch,
            OamScanStart,
            Mode3Blocking,
            PixelTransferSetup,
            RenderStart,
            ObjectFetchBegin,
            ObjectFetchEnd,
            RenderDot,
            HblankStat,
            HblankEnd,
            VblankLineStart,
            VblankLineBody,
            VblankLineEnd,
            Line153Ly0,
            Line153CompareNone,
            Line153CompareZero,
            FrameEnd,
        ]
    };

    fn discriminant(self) -> u8 {
        Self::ALL.iter().position(|&state| state == self).unwrap_or(0) as u8
    }

    fn from_discriminant(value: u8) -> Self {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .unwrap_or(DisplayState::LcdOffFrame)
    }
}

#[derive(Clone)]
pub struct Ppu {
    pub(crate) state: DisplayState,
    pub(crate) sleep_left: u32,
    pub(crate) current_line: u8,
    pub(crate) ly_for_comparison: Option<u8>,
    pub(crate) cycles_for_line: u32,
    pub(crate) position_in_line: i16,
    pub(crate) stat_interrupt_line: bool,
    pub(crate) oam_read_blocked: bool,
    pub(crate) oam_write_blocked: bool,
    pub(crate) vram_read_blocked: bool,
    pub(crate) vram_write_blocked: bool,
    pub(crate) wy_diff: u8,
    pub(crate) window_disabled_while_active: bool,
    pub(crate) in_window: bool,
    pub(crate) bg_fifo: Fifo,
    pub(crate) oam_fifo: Fifo,
    pub(crate) fifo_paused: bool,
    pub(crate) fetcher_state: FetcherState,
    pub(crate) fetcher_divisor: bool,
    pub(crate) fetching_objects: bool,
    pub(crate) fetcher_x: u8,
    pub(crate) fetcher_y: u8,
    pub(crate) current_tile: u8,
    pub(crate) current_tile_attributes: u8,
    pub(crate) current_tile_address: u16,
    pub(crate) current_tile_data: [u8; 2],
    pub(crate) visible_objs: ArrayVec<u8, 10>,
    pub(crate) consumed_cycles: u64,
}

impl Default for Ppu {
    fn default() -> Self {
        Self {
            state: DisplayState::LcdOffFrame,
            sleep_left: FRAME_LENGTH,
            current_line: 0,
            ly_for_comparison: Some(0),
            cycles_for_line: 0,
            position_in_line: 0,
            stat_interrupt_line: false,
            oam_read_blocked: false,
            oam_write_blocked: false,
            vram_read_blocked: false,
            vram_write_blocked: false,
            wy_diff: 0,
            window_disabled_while_active: false,
            in_window: false,
            bg_fifo: Default::default(),
            oam_fifo: Default::default(),
            fifo_paused: false,
            fetcher_state: Default::default(),
            fetcher_divisor: false,
            fetching_objects: false,
            fetcher_x: 0,
            fetcher_y: 0,
            current_tile: 0,
            current_tile_attributes: 0,
            current_tile_address: 0,
            current_tile_data: [0; 2],
            visible_objs: Default::default(),
            consumed_cycles: 0,
        }
    }
}

impl Machine {
    fn lcdc(&self) -> LcdControl {
        LcdControl::from_bits_retain(self.io[io_index(LCD_CONTROL)])
    }

    fn set_stat_mode(&mut self, mode: u8) {
        let stat = &mut self.io[io_index(LCD_STATUS)];
        *stat = (*stat & !3) | mode;
    }

    fn sleep(&mut self, dots: u32, next: DisplayState) {
        self.ppu.state = next;
        self.ppu.sleep_left = dots;
    }

    fn goto_state(&mut self, next: DisplayState) {
        self.sleep(0, next);
    }

    fn stat_interrupt_sources(&mut self) -> bool {
        let lyc = self.io[io_index(LYC)];
        if self.ppu.ly_for_comparison == Some(lyc) {
            self.io[io_index(LCD_STATUS)] |= 4;
        } else {
            self.io[io_index(LCD_STATUS)] &= !4;
        }

        let stat = LcdStatus::from_bits_retain(self.io[io_index(LCD_STATUS)]);
        let mut interrupt_line = match stat.bits() & 3 {
            0 => stat.contains(LcdStatus::HBLANK_INT),
            1 => stat.contains(LcdStatus::VBLANK_INT),
            2 => stat.contains(LcdStatus::OAM_INT),
            _ => false,
        };
        if stat.contains(LcdStatus::LYC_INT | LcdStatus::LYC_EQUAL_TO_LY) {
            interrupt_line = true;
        }
        interrupt_line
    }

    pub(crate) fn stat_update(&mut self) {
        if !self.lcdc().contains(LcdControl::LCD_PPU_ENABLE) {
            return;
        }

        let previous_interrupt_line = self.ppu.stat_interrupt_line;
        let interrupt_line = self.stat_interrupt_sources();
        self.ppu.stat_interrupt_line = interrupt_line;
        if interrupt_line && !previous_interrupt_line {
            self.io[io_index(INTERRUPT_FLAG)] |= Interruptions::LCD.bits();
        }
    }

    /// STAT writes re-evaluate the interrupt line but do not produce an
    /// edge themselves: enabling a source whose condition is already active
    /// fires nothing until the condition next becomes true.
    pub(crate) fn stat_refresh_after_write(&mut self) {
        if !self.lcdc().contains(LcdControl::LCD_PPU_ENABLE) {
            return;
        }
        self.ppu.stat_interrupt_line = self.stat_interrupt_sources();
    }

    pub(crate) fn lcd_off(&mut self) {
        self.ppu.state = DisplayState::LcdOffFrame;
        self.ppu.sleep_left = FRAME_LENGTH;
        self.io[io_index(LY)] = 0;
        self.io[io_index(LCD_STATUS)] &= !3;
        self.io[io_index(LCD_STATUS)] |= 4;
        if self.hdma.on_hblank {
            self.hdma.on_hblank = false;
            self.hdma.active = false;
            self.hdma.steps_left = 0;
        }
        self.ppu.stat_interrupt_line = false;
        self.ppu.oam_read_blocked = false;
        self.ppu.vram_read_blocked = false;
        self.ppu.oam_write_blocked = false;
        self.ppu.vram_write_blocked = false;
        self.ppu.wy_diff = 0;
        self.ppu.window_disabled_while_active = false;
        self.ppu.current_line = 0;
        self.ppu.ly_for_comparison = Some(0);
    }

    pub(crate) fn lcd_on(&mut self) {
        self.sleep(1, DisplayState::EnableGlitchLine0);
    }

    fn window_enabled(&self) -> bool {
        let lcdc = self.lcdc();
        if !lcdc.contains(LcdControl::BG_AND_WINDOW_ENABLE) && self.is_cgb() && !self.cgb_mode {
            return false;
        }
        lcdc.contains(LcdControl::WINDOW_ENABLE) && self.io[io_index(WX)] < 167
    }

    /// LCDC, WY and WX writes adjust the window line bookkeeping so a window
    /// toggled mid-frame resumes from the source line where it stopped.
    pub(crate) fn window_related_write(&mut self, address: u16, value: u8) {
        let before = self.window_enabled();
        self.io[io_index(address)] = value;
        let after = self.window_enabled();

        if before != after
            && self.ppu.current_line < LINES
            && self.ppu.current_line >= self.io[io_index(WY)]
        {
            let line = self.ppu.current_line;
            if after {
                if !self.ppu.window_disabled_while_active {
                    // first activation this frame while LY is already past WY:
                    // the window starts on the next line at source line 0
                    self.ppu.wy_diff = line.wrapping_add(1).wrapping_sub(self.io[io_index(WY)]);
                } else {
                    self.ppu.wy_diff = self.ppu.wy_diff.wrapping_add(line);
                }
            } else {
                self.ppu.wy_diff = self.ppu.wy_diff.wrapping_sub(line);
                self.ppu.window_disabled_while_active = true;
            }
        }
    }

    fn search_oam(&mut self) {
        let height_16 = self.lcdc().contains(LcdControl::OBJ_SIZE);
        let line = i16::from(self.ppu.current_line);
        self.ppu.visible_objs.clear();
        for index in 0..40u8 {
            let y = i16::from(self.oam[usize::from(index) * 4]) - 16;
            let height = if height_16 { 16 } else { 8 };
            if y <= line && line < y + height {
                // keep the list sorted by X descending; the end of the list
                // is popped first, so ties go to the lower OAM index
                let x = self.oam[usize::from(index) * 4 + 1];
                let mut insert_at = 0;
                while insert_at < self.ppu.visible_objs.len()
                    && self.oam[usize::from(self.ppu.visible_objs[insert_at]) * 4 + 1] > x
                {
                    insert_at += 1;
                }
                self.ppu.visible_objs.insert(insert_at, index);
                if self.ppu.visible_objs.len() == 10 {
                    return;
                }
            }
        }
    }

    fn render_pixel_if_possible(&mut self) {
        let fifo_item = if !self.ppu.fifo_paused {
            Some(self.ppu.bg_fifo.pop())
        } else {
            None
        };
        let oam_item = if self.ppu.oam_fifo.size() > 0 {
            Some(self.ppu.oam_fifo.pop())
        } else {
            None
        };

        let mut draw_oam = false;
        let mut bg_priority = false;
        if let Some(item) = oam_item
            && item.pixel != 0
        {
            draw_oam = true;
            bg_priority |= item.bg_priority;
        }

        // everything left of the viewport (fine scroll and the dummy fetch)
        // is shifted out without reaching the screen
        if !(0..i16::from(WIDTH)).contains(&self.ppu.position_in_line) {
            self.ppu.position_in_line += 1;
            return;
        }
        if self.ppu.fifo_paused {
            return;
        }

        let lcdc = self.lcdc();
        // on CGB, LCDC bit 0 is the priority master switch instead
        let master_priority = lcdc.contains(LcdControl::BG_AND_WINDOW_ENABLE);
        let mut bg_enabled = true;
        if !master_priority {
            if self.cgb_mode {
                bg_priority = false;
            } else {
                bg_enabled = false;
            }
        }
        if !self.is_cgb() && self.ppu.in_window {
            bg_enabled = true;
        }

        let item = fifo_item.unwrap_or_default();
        let position = usize::from(self.ppu.position_in_line as u16 as u8);
        let screen_index = position + usize::from(self.ppu.current_line) * usize::from(WIDTH);

        // CGB background attributes can force the background above objects
        if self.cgb_mode && master_priority && item.bg_priority && item.pixel != 0 {
            bg_priority = true;
        }

        if !bg_enabled {
            self.screen[screen_index] = self.blank_pixel;
        } else {
            let mut pixel = item.pixel;
            if pixel != 0 && bg_priority {
                draw_oam = false;
            }
            if !self.cgb_mode {
                pixel = (self.io[io_index(BGP)] >> (pixel << 1)) & 3;
            }
            self.screen[screen_index] =
                self.background_palettes_rgb[usize::from(item.palette) * 4 + usize::from(pixel)];
        }

        if draw_oam {
            let item = oam_item.unwrap_or_default();
            let mut pixel = item.pixel;
            if !self.cgb_mode {
                let obp = if item.palette != 0 { OBP1 } else { OBP0 };
                pixel = (self.io[io_index(obp)] >> (pixel << 1)) & 3;
            }
            self.screen[screen_index] =
                self.sprite_palettes_rgb[usize::from(item.palette) * 4 + usize::from(pixel)];
        }

        self.ppu.position_in_line += 1;
    }

    fn display_vblank(&mut self) {
        self.frame_ready = true;

        if !self.lcdc().contains(LcdControl::LCD_PPU_ENABLE) || self.stopped {
            // LCD off shows white; a stopped unit with the LCD on goes black
            let color = if self.lcdc().contains(LcdControl::LCD_PPU_ENABLE) && self.stopped {
                self.black_pixel
            } else {
                self.blank_pixel
            };
            self.screen.fill(color);
        }

        if let Some(mut callback) = self.input_poll.take() {
            let input = callback();
            self.set_input(input);
            self.input_poll = Some(callback);
        }
        if let Some(mut callback) = self.vblank_callback.take() {
            callback(&self.screen, usize::from(WIDTH), usize::from(HEIGHT));
            self.vblank_callback = Some(callback);
        }
    }

    pub(crate) fn display_run(&mut self, cycles: u8) {
        self.ppu.consumed_cycles += u64::from(cycles);
        let mut budget = u32::from(cycles);
        loop {
            if self.ppu.sleep_left > 0 {
                let used = self.ppu.sleep_left.min(budget);
                self.ppu.sleep_left -= used;
                budget -= used;
                if self.ppu.sleep_left > 0 {
                    return;
                }
            }

            use DisplayState::*;
            match self.ppu.state {
                LcdOffFrame => {
                    self.display_vblank();
                    self.sleep(FRAME_LENGTH, LcdOffFrame);
                }

                EnableGlitchLine0 => {
                    self.ppu.current_line = 0;
                    self.io[io_index(LY)] = 0;
                    self.ppu.ly_for_comparison = Some(0);
                    self.set_stat_mode(0);
                    self.ppu.oam_read_blocked = false;
                    self.ppu.vram_read_blocked = false;
                    self.ppu.oam_write_blocked = false;
                    self.ppu.vram_write_blocked = false;
                    self.ppu.cycles_for_line = MODE2_LENGTH - 4;
                    self.stat_update();
                    self.sleep(MODE2_LENGTH - 4, GlitchMode3);
                }
                GlitchMode3 => {
                    self.set_stat_mode(3);
                    self.ppu.oam_read_blocked = true;
                    self.ppu.vram_read_blocked = true;
                    self.ppu.oam_write_blocked = true;
                    self.ppu.vram_write_blocked = true;
                    self.stat_update();
                    let length = MODE3_LENGTH + u32::from(self.io[io_index(SCX)] & 7) + 2;
                    self.ppu.cycles_for_line += length;
                    self.sleep(length, GlitchMode0Entry);
                }
                GlitchMode0Entry => {
                    self.set_stat_mode(0);
                    self.ppu.oam_read_blocked = false;
                    self.ppu.vram_read_blocked = false;
                    self.ppu.oam_write_blocked = false;
                    self.ppu.vram_write_blocked = false;
                    self.ppu.cycles_for_line += 1;
                    self.sleep(1, GlitchMode0Stat);
                }
                GlitchMode0Stat => {
                    self.stat_update();
                    // the first line after enabling is 8 dots short
                    self.sleep(
                        LINE_LENGTH - self.ppu.cycles_for_line - 8,
                        GlitchLineEnd,
                    );
                }
                GlitchLineEnd => {
                    self.ppu.current_line = 1;
                    self.goto_state(LineStart);
                }

                LineStart => {
                    let line = self.ppu.current_line;
                    self.io[io_index(LY)] = line;
                    self.ppu.oam_read_blocked = true;
                    self.ppu.oam_write_blocked = false;
                    self.ppu.ly_for_comparison = if line != 0 { None } else { Some(0) };
                    self.stat_update();
                    self.sleep(3, OamIntGlitch);
                }
                OamIntGlitch => {
                    // the OAM STAT interrupt fires one dot before the mode
                    // bits change, except on line 0
                    if self.ppu.current_line != 0 {
                        self.set_stat_mode(2);
                        self.stat_update();
                        self.set_stat_mode(0);
                    }
                    self.search_oam();
                    self.sleep(1, OamScanStart);
                }
                OamScanStart => {
                    self.set_stat_mode(2);
                    self.ppu.oam_write_blocked = true;
                    self.ppu.ly_for_comparison = Some(self.ppu.current_line);
                    self.stat_update();
                    self.sleep(MODE2_LENGTH - 4, Mode3Blocking);
                }
                Mode3Blocking => {
                    self.ppu.vram_read_blocked = true;
                    self.ppu.vram_write_blocked = false;
                    self.ppu.oam_write_blocked = false;
                    self.stat_update();
                    self.sleep(crate::tuning::STAT_MODE_LAG, PixelTransferSetup);
                }
                PixelTransferSetup => {
                    self.set_stat_mode(3);
                    self.ppu.vram_write_blocked = true;
                    self.ppu.oam_write_blocked = true;
                    self.stat_update();
                    self.ppu.cycles_for_line = MODE2_LENGTH + 4;
                    self.ppu.bg_fifo.clear();
                    self.ppu.oam_fifo.clear();
                    let scx = self.io[io_index(SCX)];
                    self.ppu.position_in_line = -i16::from(scx & 7) - 8;
                    self.ppu.fetcher_x = (scx / 8) & 0x1f;
                    self.ppu.cycles_for_line += 5;
                    self.sleep(5, RenderStart);
                }
                RenderStart => {
                    self.ppu.fetcher_divisor = false;
                    self.ppu.fetcher_state = FetcherState::GetTile;
                    self.ppu.fifo_paused = true;
                    self.ppu.in_window = false;
                    self.render_iteration();
                }
                ObjectFetchBegin => {
                    self.ppu.fetching_objects = true;
                    self.ppu.cycles_for_line += 6;
                    self.sleep(6, ObjectFetchEnd);
                }
                ObjectFetchEnd => {
                    self.fetch_object_row();
                    // more objects may share this X; they skip the penalty
                    self.render_iteration();
                }
                RenderDot => {
                    self.render_iteration();
                }
                HblankStat => {
                    self.stat_update();
                    self.sleep(LINE_LENGTH - self.ppu.cycles_for_line, HblankEnd);
                }
                HblankEnd => {
                    self.ppu.current_line += 1;
                    if self.ppu.current_line < LINES {
                        self.goto_state(LineStart);
                    } else {
                        self.goto_state(VblankLineStart);
                    }
                }

                VblankLineStart => {
                    self.io[io_index(LY)] = self.ppu.current_line;
                    self.ppu.ly_for_comparison = None;
                    self.stat_update();
                    self.sleep(4, VblankLineBody);
                }
                VblankLineBody => {
                    self.ppu.ly_for_comparison = Some(self.ppu.current_line);
                    if self.ppu.current_line == LINES {
                        // entering vblank pushes mode 2 for an instant, which
                        // is what raises the OAM-source STAT interrupt here
                        self.set_stat_mode(2);
                        self.stat_update();
                        self.set_stat_mode(1);
                        self.io[io_index(INTERRUPT_FLAG)] |= Interruptions::VBLANK.bits();
                        if LcdStatus::from_bits_retain(self.io[io_index(LCD_STATUS)])
                            .contains(LcdStatus::OAM_INT)
                        {
                            self.ppu.stat_interrupt_line = true;
                        }
                        self.display_vblank();
                    }
                    self.stat_update();
                    self.sleep(LINE_LENGTH - 4, VblankLineEnd);
                }
                VblankLineEnd => {
                    self.ppu.current_line += 1;
                    if self.ppu.current_line < VIRTUAL_LINES - 1 {
                        self.goto_state(VblankLineStart);
                    } else {
                        self.io[io_index(LY)] = 153;
                        self.ppu.ly_for_comparison = None;
                        self.stat_update();
                        self.sleep(4, Line153Ly0);
                    }
                }
                Line153Ly0 => {
                    // LY already reads 0 for the rest of line 153, while the
                    // comparison value walks 153 -> none -> 0
                    self.io[io_index(LY)] = 0;
                    self.ppu.ly_for_comparison = Some(153);
                    self.stat_update();
                    self.sleep(4, Line153CompareNone);
                }
                Line153CompareNone => {
                    self.ppu.ly_for_comparison = None;
                    self.stat_update();
                    self.sleep(4, Line153CompareZero);
                }
                Line153CompareZero => {
                    self.ppu.ly_for_comparison = Some(0);
                    self.stat_update();
                    self.sleep(LINE_LENGTH - 12, FrameEnd);
                }
                FrameEnd => {
                    self.set_stat_mode(0);
                    self.ppu.wy_diff = 0;
                    self.ppu.window_disabled_while_active = false;
                    self.ppu.current_line = 0;
                    self.goto_state(LineStart);
                }
            }
        }
    }

    fn next_object_matches(&self) -> bool {
        if self.ppu.visible_objs.is_empty()
            || !self.lcdc().contains(LcdControl::OBJ_ENABLE)
        {
            return false;
        }
        let index = usize::from(*self.ppu.visible_objs.last().unwrap());
        self.oam[index * 4 + 1] == (self.ppu.position_in_line + 8) as u8
    }

    fn render_iteration(&mut self) {
        if self.next_object_matches() {
            if !self.ppu.fetching_objects {
                // interrupting the fetcher costs up to 5 dots depending
                // on how far along it is
                const PENALTY: [u32; 8] = [5, 4, 3, 2, 1, 0, 0, 0];
                let penalty = PENALTY
                    [self.ppu.fetcher_state.index() * 2 + self.ppu.fetcher_divisor as usize];
                self.ppu.cycles_for_line += penalty;
                self.sleep(penalty, DisplayState::ObjectFetchBegin);
            } else {
                self.ppu.cycles_for_line += 6;
                self.sleep(6, DisplayState::ObjectFetchEnd);
            }
            return;
        }
        self.ppu.fetching_objects = false;

        if !self.ppu.in_window
            && self.window_enabled()
            && self.ppu.current_line >= self.io[io_index(WY)].wrapping_add(self.ppu.wy_diff)
            && self.ppu.position_in_line + 7 == i16::from(self.io[io_index(WX)])
        {
            self.ppu.in_window = true;
            self.ppu.bg_fifo.clear();
            self.ppu.fifo_paused = true;
            self.ppu.fetcher_x = 0;
            self.ppu.fetcher_state = FetcherState::GetTile;
        }

        let mut push = false;
        if self.ppu.fetcher_divisor {
            self.fetcher_step(&mut push);
        }
        self.ppu.fetcher_divisor = !self.ppu.fetcher_divisor;

        self.render_pixel_if_possible();

        if push {
            let attributes = self.ppu.current_tile_attributes;
            let [lower, upper] = self.ppu.current_tile_data;
            self.ppu.bg_fifo.push_background_row(
                lower,
                upper,
                attributes & 7,
                attributes & 0x80 != 0,
                attributes & 0x20 != 0,
            );
            self.ppu.fifo_paused = false;
        }

        if self.ppu.position_in_line == i16::from(WIDTH) {
            self.enter_hblank();
            return;
        }
        self.ppu.cycles_for_line += 1;
        self.sleep(1, DisplayState::RenderDot);
    }

    fn fetcher_step(&mut self, push: &mut bool) {
        let lcdc = self.lcdc();
        match self.ppu.fetcher_state {
            FetcherState::GetTile => {
                let mut map = 0x1800usize;
                if lcdc.contains(LcdControl::BG_TILE_MAP) && !self.ppu.in_window {
                    map = 0x1c00;
                } else if lcdc.contains(LcdControl::WINDOW_TILE_MAP) && self.ppu.in_window {
                    map = 0x1c00;
                }
                self.ppu.fetcher_y = if self.ppu.in_window {
                    self.ppu
                        .current_line
                        .wrapping_sub(self.io[io_index(WY)])
                        .wrapping_sub(self.ppu.wy_diff)
                } else {
                    self.ppu.current_line.wrapping_add(self.io[io_index(SCY)])
                };
                let index = map
                    + usize::from(self.ppu.fetcher_x)
                    + usize::from(self.ppu.fetcher_y / 8) * 32;
                self.ppu.current_tile = self.vram[index];
                self.ppu.current_tile_attributes = if self.cgb_mode {
                    self.vram[index + 0x2000]
                } else {
                    0
                };
                self.ppu.fetcher_x = (self.ppu.fetcher_x + 1) & 0x1f;
            }
            FetcherState::GetTileDataLower => {
                let attributes = self.ppu.current_tile_attributes;
                self.ppu.current_tile_address =
                    if lcdc.contains(LcdControl::BG_AND_WINDOW_TILES) {
                        u16::from(self.ppu.current_tile) * 0x10
                    } else {
                        (0x1000i32 + i32::from(self.ppu.current_tile.cast_signed()) * 0x10) as u16
                    };
                if attributes & 0x08 != 0 {
                    self.ppu.current_tile_address += 0x2000;
                }
                self.ppu.current_tile_data[0] =
                    self.vram[usize::from(self.ppu.current_tile_address) + self.tile_row() * 2];
            }
            FetcherState::GetTileDataHigh => {
                self.ppu.current_tile_data[1] = self.vram
                    [usize::from(self.ppu.current_tile_address) + self.tile_row() * 2 + 1];
            }
            FetcherState::Sleep => *push = true,
        }
        self.ppu.fetcher_state = self.ppu.fetcher_state.advance();
    }

    fn tile_row(&self) -> usize {
        let mut row = self.ppu.fetcher_y & 7;
        if self.ppu.current_tile_attributes & 0x40 != 0 {
            row = 7 - row;
        }
        usize::from(row)
    }

    fn fetch_object_row(&mut self) {
        let Some(&object_index) = self.ppu.visible_objs.last() else {
            return;
        };
        let base = usize::from(object_index) * 4;
        let [y, _x, tile, flags] = [
            self.oam[base],
            self.oam[base + 1],
            self.oam[base + 2],
            self.oam[base + 3],
        ];
        let height_16 = self.lcdc().contains(LcdControl::OBJ_SIZE);
        let mut tile_y =
            self.ppu.current_line.wrapping_sub(y) & if height_16 { 0xf } else { 7 };
        if flags & 0x40 != 0 {
            tile_y ^= if height_16 { 0xf } else { 7 };
        }
        let mut line_address = u16::from(if height_16 { tile & 0xfe } else { tile }) * 0x10
            + u16::from(tile_y) * 2;
        if self.cgb_mode && flags & 0x08 != 0 {
            line_address += 0x2000;
        }
        let palette = if self.cgb_mode {
            flags & 0x07
        } else {
            (flags & 0x10 != 0) as u8
        };
        self.ppu.oam_fifo.overlay_object_row(
            self.vram[usize::from(line_address)],
            self.vram[usize::from(line_address) + 1],
            palette,
            flags & 0x80 != 0,
            if self.cgb_mode { object_index } else { 0 },
            flags & 0x20 != 0,
        );
        self.ppu.visible_objs.pop();
    }

    fn enter_hblank(&mut self) {
        self.set_stat_mode(0);
        self.ppu.oam_read_blocked = false;
        self.ppu.vram_read_blocked = false;
        self.ppu.oam_write_blocked = false;
        self.ppu.vram_write_blocked = false;
        self.hdma_hblank_trigger();
        self.ppu.cycles_for_line += 1;
        self.sleep(1, DisplayState::HblankStat);
    }

    fn scale_channel(value: u8) -> u8 {
        (value << 3) | (value >> 2)
    }

    fn convert_rgb15(&mut self, color: u16) -> u32 {
        let r = Self::scale_channel((color & 0x1f) as u8);
        let g = Self::scale_channel(((color >> 5) & 0x1f) as u8);
        let b = Self::scale_channel(((color >> 10) & 0x1f) as u8);
        match self.rgb_encode.as_mut() {
            Some(encode) => encode(r, g, b),
            None => 0,
        }
    }

    /// Refresh one cached host-format color after a palette data write.
    /// Without an encode callback the render output is best-effort skipped.
    pub(crate) fn palette_changed(&mut self, background_palette: bool, index: u8) {
        if self.rgb_encode.is_none() || !self.is_cgb() {
            return;
        }
        let data = if background_palette {
            &self.background_palettes_data
        } else {
            &self.sprite_palettes_data
        };
        let index = usize::from(index);
        let color =
            u16::from(data[index & !1]) | (u16::from(data[index | 1]) << 8);
        let rgb = self.convert_rgb15(color);
        let target = if background_palette {
            &mut self.background_palettes_rgb
        } else {
            &mut self.sprite_palettes_rgb
        };
        target[index / 2] = rgb;
    }

    pub(crate) fn refresh_all_palettes(&mut self) {
        if self.cgb_mode {
            for index in 0..0x20 {
                self.palette_changed(true, index * 2);
                self.palette_changed(false, index * 2);
            }
        } else {
            self.refresh_monochrome_shades();
        }
    }

    /// The four monochrome shades, through the host encoder when present.
    pub(crate) fn refresh_monochrome_shades(&mut self) {
        let mut shades = [0xffffffffu32, 0xaaaaaaaa, 0x55555555, 0x00000000];
        for (shade, gray) in shades.iter_mut().zip([0xffu8, 0xaa, 0x55, 0x00]) {
            if let Some(encode) = self.rgb_encode.as_mut() {
                *shade = encode(gray, gray, gray);
            }
        }
        self.background_palettes_rgb[..4].copy_from_slice(&shades);
        self.sprite_palettes_rgb[..4].copy_from_slice(&shades);
        self.sprite_palettes_rgb[4..8].copy_from_slice(&shades);
        self.blank_pixel = shades[0];
        self.black_pixel = shades[3];
    }

    pub(crate) fn save_video(&self, w: &mut crate::savestate::Writer) {
        let ppu = &self.ppu;
        w.u8(ppu.state.discriminant());
        w.u32(ppu.sleep_left);
        w.u8(ppu.current_line);
        w.bool(ppu.ly_for_comparison.is_some());
        w.u8(ppu.ly_for_comparison.unwrap_or(0));
        w.u32(ppu.cycles_for_line);
        w.i16(ppu.position_in_line);
        w.bool(ppu.stat_interrupt_line);
        w.bool(ppu.oam_read_blocked);
        w.bool(ppu.oam_write_blocked);
        w.bool(ppu.vram_read_blocked);
        w.bool(ppu.vram_write_blocked);
        w.u8(ppu.wy_diff);
        w.bool(ppu.window_disabled_while_active);
        w.bool(ppu.in_window);
        ppu.bg_fifo.save(w);
        ppu.oam_fifo.save(w);
        w.bool(ppu.fifo_paused);
        w.u8(ppu.fetcher_state.index() as u8);
        w.bool(ppu.fetcher_divisor);
        w.bool(ppu.fetching_objects);
        w.u8(ppu.fetcher_x);
        w.u8(ppu.fetcher_y);
        w.u8(ppu.current_tile);
        w.u8(ppu.current_tile_attributes);
        w.u16(ppu.current_tile_address);
        w.bytes(&ppu.current_tile_data);
        w.u8(ppu.visible_objs.len() as u8);
        let mut objects = [0u8; 10];
        objects[..ppu.visible_objs.len()].copy_from_slice(&ppu.visible_objs);
        w.bytes(&objects);
        w.bytes(&self.background_palettes_data);
        w.bytes(&self.sprite_palettes_data);
    }

    pub(crate) fn load_video(&mut self, c: &mut crate::savestate::Cursor) {
        let ppu = &mut self.ppu;
        let mut state = ppu.state.discriminant();
        c.u8(&mut state);
        ppu.state = DisplayState::from_discriminant(state);
        c.u32(&mut ppu.sleep_left);
        c.u8(&mut ppu.current_line);
        let mut compare_valid = false;
        let mut compare_value = 0;
        c.bool(&mut compare_valid);
        c.u8(&mut compare_value);
        ppu.ly_for_comparison = compare_valid.then_some(compare_value);
        c.u32(&mut ppu.cycles_for_line);
        c.i16(&mut ppu.position_in_line);
        c.bool(&mut ppu.stat_interrupt_line);
        c.bool(&mut ppu.oam_read_blocked);
        c.bool(&mut ppu.oam_write_blocked);
        c.bool(&mut ppu.vram_read_blocked);
        c.bool(&mut ppu.vram_write_blocked);
        c.u8(&mut ppu.wy_diff);
        c.bool(&mut ppu.window_disabled_while_active);
        c.bool(&mut ppu.in_window);
        ppu.bg_fifo.load(c);
        ppu.oam_fifo.load(c);
        c.bool(&mut ppu.fifo_paused);
        let mut fetcher_state = 0;
        c.u8(&mut fetcher_state);
        ppu.fetcher_state = FetcherState::from_index(fetcher_state);
        c.bool(&mut ppu.fetcher_divisor);
        c.bool(&mut ppu.fetching_objects);
        c.u8(&mut ppu.fetcher_x);
        c.u8(&mut ppu.fetcher_y);
        c.u8(&mut ppu.current_tile);
        c.u8(&mut ppu.current_tile_attributes);
        c.u16(&mut ppu.current_tile_address);
        c.bytes(&mut ppu.current_tile_data);
        let mut count = 0;
        c.u8(&mut count);
        let mut objects = [0u8; 10];
        c.bytes(&mut objects);
        ppu.visible_objs.clear();
        for &index in objects.iter().take(usize::from(count.min(10))) {
            ppu.visible_objs.push(index.min(39));
        }
        ppu.fetcher_x &= 0x1f;
        ppu.current_tile_address &= 0x3fff;
        c.bytes(&mut self.background_palettes_data);
        c.bytes(&mut self.sprite_palettes_data);
        self.refresh_all_palettes();
    }
}
