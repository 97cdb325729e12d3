mod common;

use common::machine_with;
use dotmatrix_core::state::{INTERRUPT_ENABLE, INTERRUPT_FLAG};

// ld a, 0x2a; inc a; halt; ei; nop
const HALT_PROGRAM: &[u8] = &[0x3e, 0x2a, 0x3c, 0x76, 0xfb, 0x00];

#[test]
fn halt_with_no_enabled_interrupts_pends_forever() {
    let mut machine = machine_with(HALT_PROGRAM, &[]);
    for _ in 0..3 {
        machine.step();
    }
    let pc = machine.pc();
    for _ in 0..50_000 {
        machine.step();
    }
    assert_eq!(pc, machine.pc());
    assert_eq!(0x2b, (machine.af() >> 8) as u8);
}

#[test]
fn externally_raised_interrupt_dispatches_in_twenty_cycles() {
    // the serial stub increments B then returns
    let mut machine = machine_with(HALT_PROGRAM, &[(0x58, &[0x04, 0xd9])]);
    machine.write_memory(INTERRUPT_ENABLE, 0x08); // serial only
    for _ in 0..3 {
        machine.step(); // ld, inc, halt
    }
    machine.write_memory(INTERRUPT_FLAG, 0x08);
    machine.step(); // wakes, runs ei
    machine.step(); // nop; interrupts armed after it
    let before = machine.cycles();
    machine.step();
    assert_eq!(20, machine.cycles() - before);
    assert_eq!(0x0058, machine.pc());

    // the handler runs and returns past the nop
    machine.step();
    machine.step();
    assert_eq!(0x01, (machine.bc() >> 8) as u8);
    assert_eq!(0x0106, machine.pc());
}

#[test]
fn vblank_interrupt_drives_a_frame_counter() {
    // main loop: ei; halt; jr -3  /  vblank stub: inc b; reti
    let mut machine = machine_with(&[0xfb, 0x76, 0x18, 0xfd], &[(0x40, &[0x04, 0xd9])]);
    machine.write_memory(INTERRUPT_ENABLE, 0x01);
    machine.write_memory(INTERRUPT_FLAG, 0x00); // shed the power-on flag
    let start = machine.cycles();
    while (machine.bc() >> 8) < 3 {
        machine.step();
        assert!(machine.cycles() - start < 400_000, "vblank never fired");
    }
    // three frames of wall-clock cycles, give or take the loop overhead
    let elapsed = machine.cycles() - start;
    assert!((2 * 70224..4 * 70224).contains(&elapsed));
}

#[test]
fn higher_priority_interrupt_wins() {
    let mut machine = machine_with(
        &[0xfb, 0x00, 0x00],
        &[(0x40, &[0x0c, 0xd9]), (0x50, &[0x04, 0xd9])],
    );
    machine.write_memory(INTERRUPT_ENABLE, 0x05); // vblank + timer
    machine.write_memory(INTERRUPT_FLAG, 0x05); // both pending
    machine.step(); // ei
    machine.step(); // nop
    machine.step(); // dispatch
    assert_eq!(0x0040, machine.pc());
    // the timer bit is still pending
    assert_ne!(0, machine.read_memory(INTERRUPT_FLAG) & 0x04);
    assert_eq!(0, machine.read_memory(INTERRUPT_FLAG) & 0x01);
}
