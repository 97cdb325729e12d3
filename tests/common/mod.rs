// not every test binary uses every helper
#![allow(dead_code)]

use dotmatrix_core::{Machine, Model};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A flat 32 KiB no-controller image: `program` at the entry point and one
/// 8-byte handler stub per interrupt vector.
pub fn flat_rom(program: &[u8], vectors: &[(u16, &[u8])]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x100 + program.len()].copy_from_slice(program);
    for (address, stub) in vectors {
        let address = usize::from(*address);
        rom[address..address + stub.len()].copy_from_slice(stub);
    }
    rom
}

pub fn machine_with(program: &[u8], vectors: &[(u16, &[u8])]) -> Machine {
    init_logging();
    let mut machine = Machine::new(Model::Dmg);
    machine.load_rom(flat_rom(program, vectors)).unwrap();
    machine
}

/// Step until LY reads the wanted line (bounded, panics if it never shows).
pub fn run_to_line(machine: &mut Machine, line: u8) {
    for _ in 0..200_000 {
        if machine.read_memory(0xff44) == line {
            return;
        }
        machine.step();
    }
    panic!("LY never reached {line}");
}
