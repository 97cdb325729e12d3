use dotmatrix_core::{Machine, Model};

const SPIN: &[u8] = &[0x18, 0xfe];

/// An image with the given controller type where every bank is stamped
/// with its own number.
fn stamped_rom(cartridge_type: u8, ram_code: u8, banks: usize) -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000 * banks];
    rom[0x100..0x102].copy_from_slice(SPIN);
    rom[0x147] = cartridge_type;
    rom[0x149] = ram_code;
    for (bank, chunk) in rom.chunks_mut(0x4000).enumerate() {
        chunk[0x1234] = bank as u8;
    }
    rom
}

#[test]
fn mbc1_bank_switching_through_the_bus() {
    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(stamped_rom(0x01, 0x03, 64)).unwrap();
    assert_eq!(1, machine.read_memory(0x5234));
    machine.write_memory(0x2000, 0x15);
    assert_eq!(0x15, machine.read_memory(0x5234));
    // writing zero lands on bank one
    machine.write_memory(0x2000, 0x00);
    assert_eq!(1, machine.read_memory(0x5234));
    // the high register extends the bank number past five bits
    machine.write_memory(0x4000, 0x01);
    machine.write_memory(0x2000, 0x00);
    assert_eq!(0x21, machine.read_memory(0x5234));
}

#[test]
fn external_ram_survives_power_but_not_clear() {
    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(stamped_rom(0x03, 0x03, 4)).unwrap();
    machine.write_memory(0x0000, 0x0a);
    machine.write_memory(0xa010, 0x99);
    machine.power(false);
    machine.write_memory(0x0000, 0x0a);
    assert_eq!(0x99, machine.read_memory(0xa010));
    machine.power(true);
    machine.write_memory(0x0000, 0x0a);
    assert_eq!(0x00, machine.read_memory(0xa010));
}

#[test]
fn mbc5_reaches_every_bank_including_zero() {
    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(stamped_rom(0x19, 0x00, 128)).unwrap();
    machine.write_memory(0x2000, 0x00);
    assert_eq!(0, machine.read_memory(0x5234));
    machine.write_memory(0x2000, 0x7f);
    assert_eq!(0x7f, machine.read_memory(0x5234));
}

#[test]
fn battery_roundtrip_through_files() {
    let path = std::env::temp_dir().join("dotmatrix-battery-test.sav");
    let _ = std::fs::remove_file(&path);

    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(stamped_rom(0x03, 0x03, 4)).unwrap();
    machine.write_memory(0x0000, 0x0a);
    machine.write_memory(0xa123, 0x42);
    dotmatrix::save_battery_to_path(&machine, &path).unwrap();

    let mut restored = Machine::new(Model::Dmg);
    restored.load_rom(stamped_rom(0x03, 0x03, 4)).unwrap();
    dotmatrix::load_battery_from_path(&mut restored, &path).unwrap();
    restored.write_memory(0x0000, 0x0a);
    assert_eq!(0x42, restored.read_memory(0xa123));

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn missing_battery_file_is_fine() {
    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(stamped_rom(0x03, 0x03, 4)).unwrap();
    let path = std::env::temp_dir().join("dotmatrix-no-such-battery.sav");
    dotmatrix::load_battery_from_path(&mut machine, path).unwrap();
}

#[test]
fn rom_only_image_without_battery_saves_nothing() {
    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(stamped_rom(0x00, 0x00, 2)).unwrap();
    assert!(machine.save_battery().is_none());
}

#[test]
fn save_state_resumes_mid_program() {
    // a counting loop: inc b; inc c; jr -3
    let mut machine = Machine::new(Model::Dmg);
    let mut rom = stamped_rom(0x00, 0x00, 2);
    rom[0x100..0x104].copy_from_slice(&[0x04, 0x0c, 0x18, 0xfc]);
    machine.load_rom(rom.clone()).unwrap();
    for _ in 0..12_345 {
        machine.step();
    }
    let state = machine.save_state();

    let mut restored = Machine::new(Model::Dmg);
    restored.load_rom(rom).unwrap();
    restored.load_state(&state).unwrap();
    assert_eq!(machine.bc(), restored.bc());

    for _ in 0..999 {
        machine.step();
        restored.step();
    }
    assert_eq!(machine.bc(), restored.bc());
    assert_eq!(machine.pc(), restored.pc());
    assert_eq!(machine.cycles(), restored.cycles());
}

#[test]
fn state_for_another_cartridge_is_rejected() {
    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(stamped_rom(0x03, 0x03, 4)).unwrap(); // has 32 KiB RAM
    let state = machine.save_state();

    let mut other = Machine::new(Model::Dmg);
    other.load_rom(stamped_rom(0x00, 0x00, 2)).unwrap(); // no RAM
    assert!(other.load_state(&state).is_err());
}

#[test]
fn rtc_latch_through_the_bus() {
    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(stamped_rom(0x10, 0x03, 4)).unwrap();
    machine.update_rtc(1_700_000_000);
    machine.update_rtc(1_700_000_090); // 1:30 on the clock
    machine.write_memory(0x0000, 0x0a);
    machine.write_memory(0x6000, 0x00);
    machine.write_memory(0x6000, 0x01); // latch
    machine.write_memory(0x4000, 0x08);
    assert_eq!(30, machine.read_memory(0xa000)); // seconds
    machine.write_memory(0x4000, 0x09);
    assert_eq!(1, machine.read_memory(0xa000)); // minutes
}
