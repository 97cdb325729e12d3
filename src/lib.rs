//! Std-side glue for embedding the core: wall-clock plumbing for the
//! cartridge RTC and file-backed ROM, boot ROM and battery handling. The
//! emulation core itself never touches the file system or the system
//! clock.

use std::{
    fmt, fs, io,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use dotmatrix_core::Machine;

#[derive(Debug)]
pub enum RomError {
    Io(io::Error),
    Load(dotmatrix_core::LoadError),
}

impl fmt::Display for RomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "reading image: {error}"),
            Self::Load(error) => write!(f, "loading image: {error}"),
        }
    }
}

impl std::error::Error for RomError {}

impl From<io::Error> for RomError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<dotmatrix_core::LoadError> for RomError {
    fn from(error: dotmatrix_core::LoadError) -> Self {
        Self::Load(error)
    }
}

pub fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// Bring the cartridge clock up to the present.
pub fn sync_rtc(machine: &mut Machine) {
    machine.update_rtc(now_unix_seconds());
}

pub fn load_rom_from_path(machine: &mut Machine, path: impl AsRef<Path>) -> Result<(), RomError> {
    let bytes = fs::read(path.as_ref())?;
    log::info!(
        "loading {} ({} bytes)",
        path.as_ref().display(),
        bytes.len()
    );
    machine.load_rom(bytes)?;
    Ok(())
}

pub fn load_boot_rom_from_path(
    machine: &mut Machine,
    path: impl AsRef<Path>,
) -> Result<(), RomError> {
    let bytes = fs::read(path)?;
    machine.load_boot_rom(&bytes)?;
    Ok(())
}

/// Load the battery file next to the ROM if one exists; missing files are
/// not an error, a battery simply starts blank.
pub fn load_battery_from_path(machine: &mut Machine, path: impl AsRef<Path>) -> io::Result<()> {
    match fs::read(path) {
        Ok(bytes) => {
            machine.load_battery(&bytes, now_unix_seconds());
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

pub fn save_battery_to_path(machine: &Machine, path: impl AsRef<Path>) -> io::Result<()> {
    if let Some(bytes) = machine.save_battery() {
        fs::write(path, bytes)?;
    }
    Ok(())
}
