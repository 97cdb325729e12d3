//! Timing constants that are not pinned down by a hardware test we trust.
//!
//! Each value here reproduces observed behaviour on at least one unit but has
//! not been verified across revisions. Tests exercise the current values;
//! changing one is expected to move those tests, not break unrelated ones.

/// Extra 2 MHz cycles added to a square channel's fresh countdown when it is
/// retriggered while already active. The alignment of the first duty step
/// after a retrigger differs from a cold trigger on hardware.
pub const SQUARE_RETRIGGER_OFFSET: u16 = 2;

/// Extra 2 MHz cycles between a wave channel trigger and its first sample
/// fetch. Verified on DMG, assumed identical on CGB.
pub const WAVE_TRIGGER_DELAY: u16 = 3;

/// Whether DI takes effect one instruction late when IME is set on CGB.
/// Some revisions may apply it immediately like DMG does.
pub const CGB_DI_IS_DELAYED: bool = true;

/// STAT mode bits lag the internal mode change by this many cycles at the
/// start of mode 2 and mode 3. Double-speed behaviour is unverified; the
/// same offset is currently used for both speeds.
pub const STAT_MODE_LAG: u32 = 4;
