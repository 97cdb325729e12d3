//! The 256 primary opcodes plus the CB-prefixed bank.
//!
//! Handlers are grouped by encoding pattern and decode their operands from
//! the opcode byte. Every `advance_cycles` call below is load-bearing: it
//! places the surrounding memory accesses on the correct machine cycle.
//!
//! Operand naming:
//!   r/lr/hr = 8-bit register (low/high half), rr = 16-bit register,
//!   d8/d16 = immediates, d.. = memory at .., cc = condition code.

use super::{AF, BC, CARRY_FLAG, DE, HALF_CARRY_FLAG, HL, SP, SUBTRACT_FLAG, ZERO_FLAG};
use crate::Machine;

pub(super) type Opcode = fn(&mut Machine, u8);

fn ill(m: &mut Machine, opcode: u8) {
    m.execute_illegal(opcode);
}

fn nop(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
}

fn stop(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.execute_stop();
    m.pc = m.pc.wrapping_add(1);
}

fn halt(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.execute_halt();
}

fn di(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.execute_di();
}

fn ei(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.execute_ei();
}

// 8-bit source operand decode shared by the ALU rows and the CB bank;
// (hl) costs the extra access cycle here
fn get_src_value(m: &mut Machine, opcode: u8) -> u8 {
    match opcode & 7 {
        0 => (m.regs[BC] >> 8) as u8,
        1 => m.regs[BC] as u8,
        2 => (m.regs[DE] >> 8) as u8,
        3 => m.regs[DE] as u8,
        4 => (m.regs[HL] >> 8) as u8,
        5 => m.regs[HL] as u8,
        6 => {
            let value = m.read_memory(m.regs[HL]);
            m.advance_cycles(4);
            value
        }
        _ => (m.regs[AF] >> 8) as u8,
    }
}

fn set_register_by_id(m: &mut Machine, id: u8, value: u8) {
    match id {
        0 => m.regs[BC] = (m.regs[BC] & 0xff) | (u16::from(value) << 8),
        1 => m.regs[BC] = (m.regs[BC] & 0xff00) | u16::from(value),
        2 => m.regs[DE] = (m.regs[DE] & 0xff) | (u16::from(value) << 8),
        3 => m.regs[DE] = (m.regs[DE] & 0xff00) | u16::from(value),
        4 => m.regs[HL] = (m.regs[HL] & 0xff) | (u16::from(value) << 8),
        5 => m.regs[HL] = (m.regs[HL] & 0xff00) | u16::from(value),
        _ => m.set_a(value),
    }
}

fn set_src_value(m: &mut Machine, opcode: u8, value: u8) {
    if opcode & 7 == 6 {
        m.write_memory(m.regs[HL], value);
        m.advance_cycles(4);
    } else {
        set_register_by_id(m, opcode & 7, value);
    }
}

fn set_dst_value(m: &mut Machine, opcode: u8, value: u8) {
    let dst = (opcode >> 3) & 7;
    if dst == 6 {
        m.write_memory(m.regs[HL], value);
        m.advance_cycles(4);
    } else {
        set_register_by_id(m, dst, value);
    }
}

fn condition(m: &Machine, opcode: u8) -> bool {
    match (opcode >> 3) & 3 {
        0 => m.regs[AF] & ZERO_FLAG == 0,
        1 => m.regs[AF] & ZERO_FLAG != 0,
        2 => m.regs[AF] & CARRY_FLAG == 0,
        _ => m.regs[AF] & CARRY_FLAG != 0,
    }
}

fn ld_rr_d16(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    let register_id = usize::from(opcode >> 4) + 1;
    m.pc = m.pc.wrapping_add(1);
    let mut value = u16::from(m.read_memory(m.pc));
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    value |= u16::from(m.read_memory(m.pc)) << 8;
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    m.regs[register_id] = value;
}

fn ld_drr_a(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    let register_id = usize::from(opcode >> 4) + 1;
    m.pc = m.pc.wrapping_add(1);
    m.write_memory(m.regs[register_id], m.a());
    m.advance_cycles(4);
}

fn ld_a_drr(m: &mut Machine, opcode: u8) {
    let register_id = usize::from(opcode >> 4) + 1;
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = m.read_memory(m.regs[register_id]);
    m.set_a(value);
    m.advance_cycles(4);
}

fn inc_rr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(8);
    let register_id = usize::from(opcode >> 4) + 1;
    m.pc = m.pc.wrapping_add(1);
    m.regs[register_id] = m.regs[register_id].wrapping_add(1);
}

fn dec_rr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(8);
    let register_id = usize::from(opcode >> 4) + 1;
    m.pc = m.pc.wrapping_add(1);
    m.regs[register_id] = m.regs[register_id].wrapping_sub(1);
}

fn add_hl_rr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(8);
    m.pc = m.pc.wrapping_add(1);
    let hl = m.regs[HL];
    let rr = m.regs[usize::from(opcode >> 4) + 1];
    m.regs[HL] = hl.wrapping_add(rr);
    m.regs[AF] &= !(SUBTRACT_FLAG | CARRY_FLAG | HALF_CARRY_FLAG);
    if (hl & 0xfff) + (rr & 0xfff) & 0x1000 != 0 {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if u32::from(hl) + u32::from(rr) & 0x10000 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
}

fn inc_hr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let register_id = (usize::from(opcode >> 4) + 1) & 0x03;
    m.regs[register_id] = m.regs[register_id].wrapping_add(0x100);
    m.regs[AF] &= !(SUBTRACT_FLAG | ZERO_FLAG | HALF_CARRY_FLAG);
    if m.regs[register_id] & 0x0f00 == 0 {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if m.regs[register_id] & 0xff00 == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn dec_hr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let register_id = (usize::from(opcode >> 4) + 1) & 0x03;
    m.regs[register_id] = m.regs[register_id].wrapping_sub(0x100);
    m.regs[AF] &= !(ZERO_FLAG | HALF_CARRY_FLAG);
    m.regs[AF] |= SUBTRACT_FLAG;
    if m.regs[register_id] & 0x0f00 == 0x0f00 {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if m.regs[register_id] & 0xff00 == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn inc_lr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let register_id = usize::from(opcode >> 4) + 1;
    let value = (m.regs[register_id] as u8).wrapping_add(1);
    m.regs[register_id] = (m.regs[register_id] & 0xff00) | u16::from(value);
    m.regs[AF] &= !(SUBTRACT_FLAG | ZERO_FLAG | HALF_CARRY_FLAG);
    if value & 0x0f == 0 {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if value == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn dec_lr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let register_id = usize::from(opcode >> 4) + 1;
    let value = (m.regs[register_id] as u8).wrapping_sub(1);
    m.regs[register_id] = (m.regs[register_id] & 0xff00) | u16::from(value);
    m.regs[AF] &= !(ZERO_FLAG | HALF_CARRY_FLAG);
    m.regs[AF] |= SUBTRACT_FLAG;
    if value & 0x0f == 0x0f {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if value == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn ld_hr_d8(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let register_id = (usize::from(opcode >> 4) + 1) & 0x03;
    let value = m.read_memory(m.pc);
    m.pc = m.pc.wrapping_add(1);
    m.regs[register_id] = (m.regs[register_id] & 0xff) | (u16::from(value) << 8);
    m.advance_cycles(4);
}

fn ld_lr_d8(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let register_id = usize::from(opcode >> 4) + 1;
    let value = m.read_memory(m.pc);
    m.pc = m.pc.wrapping_add(1);
    m.regs[register_id] = (m.regs[register_id] & 0xff00) | u16::from(value);
    m.advance_cycles(4);
}

fn rlca(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let a = m.a();
    m.set_a(a.rotate_left(1));
    m.regs[AF] &= 0xff00;
    if a & 0x80 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
}

fn rrca(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let a = m.a();
    m.set_a(a.rotate_right(1));
    m.regs[AF] &= 0xff00;
    if a & 1 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
}

fn rla(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let a = m.a();
    let carry = m.regs[AF] & CARRY_FLAG != 0;
    m.set_a((a << 1) | carry as u8);
    m.regs[AF] &= 0xff00;
    if a & 0x80 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
}

fn rra(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let a = m.a();
    let carry = m.regs[AF] & CARRY_FLAG != 0;
    m.set_a((a >> 1) | ((carry as u8) << 7));
    m.regs[AF] &= 0xff00;
    if a & 1 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
}

fn ld_da16_sp(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let mut address = u16::from(m.read_memory(m.pc));
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    address |= u16::from(m.read_memory(m.pc)) << 8;
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    m.write_memory(address, m.regs[SP] as u8);
    m.advance_cycles(4);
    m.write_memory(address.wrapping_add(1), (m.regs[SP] >> 8) as u8);
    m.advance_cycles(4);
}

fn jr_r8(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let offset = m.read_memory(m.pc).cast_signed();
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(8);
    m.pc = m.pc.wrapping_add_signed(i16::from(offset));
}

fn jr_cc_r8(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let offset = m.read_memory(m.pc).cast_signed();
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    if condition(m, opcode) {
        m.pc = m.pc.wrapping_add_signed(i16::from(offset));
        m.advance_cycles(4);
    }
}

fn daa(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let mut a = m.a();
    let subtract = m.regs[AF] & SUBTRACT_FLAG != 0;
    let half_carry = m.regs[AF] & HALF_CARRY_FLAG != 0;
    let mut carry = m.regs[AF] & CARRY_FLAG != 0;

    let mut adjust = 0u8;
    if subtract {
        if half_carry {
            adjust += 0x06;
        }
        if carry {
            adjust += 0x60;
        }
        a = a.wrapping_sub(adjust);
    } else {
        if half_carry || a & 0x0f > 0x09 {
            adjust += 0x06;
        }
        if carry || a > 0x99 {
            adjust += 0x60;
            carry = true;
        }
        a = a.wrapping_add(adjust);
    }
    m.set_a(a);
    m.regs[AF] &= 0xff00 | SUBTRACT_FLAG;
    if a == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
    if carry {
        m.regs[AF] |= CARRY_FLAG;
    }
}

fn cpl(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let a = m.a();
    m.set_a(!a);
    m.regs[AF] |= HALF_CARRY_FLAG | SUBTRACT_FLAG;
}

fn scf(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.regs[AF] |= CARRY_FLAG;
    m.regs[AF] &= !(HALF_CARRY_FLAG | SUBTRACT_FLAG);
}

fn ccf(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.regs[AF] ^= CARRY_FLAG;
    m.regs[AF] &= !(HALF_CARRY_FLAG | SUBTRACT_FLAG);
}

fn ld_dhli_a(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.write_memory(m.regs[HL], m.a());
    m.regs[HL] = m.regs[HL].wrapping_add(1);
    m.advance_cycles(4);
}

fn ld_dhld_a(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.write_memory(m.regs[HL], m.a());
    m.regs[HL] = m.regs[HL].wrapping_sub(1);
    m.advance_cycles(4);
}

fn ld_a_dhli(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = m.read_memory(m.regs[HL]);
    m.regs[HL] = m.regs[HL].wrapping_add(1);
    m.set_a(value);
    m.advance_cycles(4);
}

fn ld_a_dhld(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = m.read_memory(m.regs[HL]);
    m.regs[HL] = m.regs[HL].wrapping_sub(1);
    m.set_a(value);
    m.advance_cycles(4);
}

fn inc_dhl(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = m.read_memory(m.regs[HL]).wrapping_add(1);
    m.advance_cycles(4);
    m.write_memory(m.regs[HL], value);
    m.advance_cycles(4);
    m.regs[AF] &= !(SUBTRACT_FLAG | ZERO_FLAG | HALF_CARRY_FLAG);
    if value & 0x0f == 0 {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if value == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn dec_dhl(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = m.read_memory(m.regs[HL]).wrapping_sub(1);
    m.advance_cycles(4);
    m.write_memory(m.regs[HL], value);
    m.advance_cycles(4);
    m.regs[AF] &= !(ZERO_FLAG | HALF_CARRY_FLAG);
    m.regs[AF] |= SUBTRACT_FLAG;
    if value & 0x0f == 0x0f {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if value == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn ld_dhl_d8(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = m.read_memory(m.pc);
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    m.write_memory(m.regs[HL], value);
    m.advance_cycles(4);
}

fn ld_r_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    set_dst_value(m, opcode, value);
}

fn add_a_value(m: &mut Machine, value: u8) {
    let a = m.a();
    let (result, carry) = a.overflowing_add(value);
    m.regs[AF] = u16::from(result) << 8;
    if carry {
        m.regs[AF] |= CARRY_FLAG;
    }
    if (a & 0x0f) + (value & 0x0f) > 0x0f {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn adc_a_value(m: &mut Machine, value: u8) {
    let a = u16::from(m.a());
    let value = u16::from(value);
    let carry = (m.regs[AF] & CARRY_FLAG != 0) as u16;
    let result = a + value + carry;
    m.regs[AF] = (result & 0xff) << 8;
    if (a ^ value ^ result) & 0x10 != 0 {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if result & 0x100 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if result & 0xff == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn sub_a_value(m: &mut Machine, value: u8) {
    let a = m.a();
    let (result, carry) = a.overflowing_sub(value);
    m.regs[AF] = (u16::from(result) << 8) | SUBTRACT_FLAG;
    if carry {
        m.regs[AF] |= CARRY_FLAG;
    }
    if (a & 0x0f) < (value & 0x0f) {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn sbc_a_value(m: &mut Machine, value: u8) {
    let a = u16::from(m.a());
    let value = u16::from(value);
    let carry = (m.regs[AF] & CARRY_FLAG != 0) as u16;
    let result = a.wrapping_sub(value).wrapping_sub(carry);
    m.regs[AF] = ((result & 0xff) << 8) | SUBTRACT_FLAG;
    if (a ^ value ^ result) & 0x10 != 0 {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if result & 0x100 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if result & 0xff == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn and_a_value(m: &mut Machine, value: u8) {
    let result = m.a() & value;
    m.regs[AF] = (u16::from(result) << 8) | HALF_CARRY_FLAG;
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn xor_a_value(m: &mut Machine, value: u8) {
    let result = m.a() ^ value;
    m.regs[AF] = u16::from(result) << 8;
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn or_a_value(m: &mut Machine, value: u8) {
    let result = m.a() | value;
    m.regs[AF] = u16::from(result) << 8;
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn cp_a_value(m: &mut Machine, value: u8) {
    let a = m.a();
    let (result, carry) = a.overflowing_sub(value);
    m.regs[AF] &= 0xff00;
    m.regs[AF] |= SUBTRACT_FLAG;
    if carry {
        m.regs[AF] |= CARRY_FLAG;
    }
    if (a & 0x0f) < (value & 0x0f) {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

macro_rules! alu_handlers {
    ($(($r:ident, $d8:ident, $apply:ident)),* $(,)?) => {
        $(
            fn $r(m: &mut Machine, opcode: u8) {
                m.advance_cycles(4);
                m.pc = m.pc.wrapping_add(1);
                let value = get_src_value(m, opcode);
                $apply(m, value);
            }

            fn $d8(m: &mut Machine, _: u8) {
                m.advance_cycles(4);
                m.pc = m.pc.wrapping_add(1);
                let value = m.read_memory(m.pc);
                m.pc = m.pc.wrapping_add(1);
                m.advance_cycles(4);
                $apply(m, value);
            }
        )*
    };
}

alu_handlers!(
    (add_a_r, add_a_d8, add_a_value),
    (adc_a_r, adc_a_d8, adc_a_value),
    (sub_a_r, sub_a_d8, sub_a_value),
    (sbc_a_r, sbc_a_d8, sbc_a_value),
    (and_a_r, and_a_d8, and_a_value),
    (xor_a_r, xor_a_d8, xor_a_value),
    (or_a_r, or_a_d8, or_a_value),
    (cp_a_r, cp_a_d8, cp_a_value),
);

fn ret_cc(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    if condition(m, opcode) {
        let mut address = u16::from(m.read_memory(m.regs[SP]));
        m.advance_cycles(4);
        address |= u16::from(m.read_memory(m.regs[SP].wrapping_add(1))) << 8;
        m.advance_cycles(4);
        m.regs[SP] = m.regs[SP].wrapping_add(2);
        m.pc = address;
        m.advance_cycles(4);
    }
}

fn ret(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    let mut address = u16::from(m.read_memory(m.regs[SP]));
    m.advance_cycles(4);
    address |= u16::from(m.read_memory(m.regs[SP].wrapping_add(1))) << 8;
    m.advance_cycles(8);
    m.regs[SP] = m.regs[SP].wrapping_add(2);
    m.pc = address;
}

fn reti(m: &mut Machine, opcode: u8) {
    ret(m, opcode);
    m.ime = true;
}

fn pop_rr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    let register_id = (usize::from(opcode >> 4) + 1) & 3;
    m.pc = m.pc.wrapping_add(1);
    let mut value = u16::from(m.read_memory(m.regs[SP]));
    m.advance_cycles(4);
    value |= u16::from(m.read_memory(m.regs[SP].wrapping_add(1))) << 8;
    m.advance_cycles(4);
    m.regs[SP] = m.regs[SP].wrapping_add(2);
    if register_id == AF {
        // the low nibble of F does not exist
        value &= 0xfff0;
    }
    m.regs[register_id] = value;
}

fn push_rr(m: &mut Machine, opcode: u8) {
    m.advance_cycles(8);
    let register_id = (usize::from(opcode >> 4) + 1) & 3;
    m.pc = m.pc.wrapping_add(1);
    m.regs[SP] = m.regs[SP].wrapping_sub(1);
    m.write_memory(m.regs[SP], (m.regs[register_id] >> 8) as u8);
    m.advance_cycles(4);
    m.regs[SP] = m.regs[SP].wrapping_sub(1);
    m.write_memory(m.regs[SP], m.regs[register_id] as u8);
    m.advance_cycles(4);
}

fn jp_cc_a16(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let mut address = u16::from(m.read_memory(m.pc));
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    address |= u16::from(m.read_memory(m.pc)) << 8;
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    if condition(m, opcode) {
        m.pc = address;
        m.advance_cycles(4);
    }
}

fn jp_a16(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let mut address = u16::from(m.read_memory(m.pc));
    m.advance_cycles(4);
    address |= u16::from(m.read_memory(m.pc.wrapping_add(1))) << 8;
    m.advance_cycles(8);
    m.pc = address;
}

fn call_cc_a16(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let mut address = u16::from(m.read_memory(m.pc));
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    address |= u16::from(m.read_memory(m.pc)) << 8;
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    if condition(m, opcode) {
        m.advance_cycles(4);
        m.regs[SP] = m.regs[SP].wrapping_sub(1);
        m.write_memory(m.regs[SP], (m.pc >> 8) as u8);
        m.advance_cycles(4);
        m.regs[SP] = m.regs[SP].wrapping_sub(1);
        m.write_memory(m.regs[SP], m.pc as u8);
        m.advance_cycles(4);
        m.pc = address;
    }
}

fn call_a16(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let mut address = u16::from(m.read_memory(m.pc));
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    address |= u16::from(m.read_memory(m.pc)) << 8;
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(8);
    m.regs[SP] = m.regs[SP].wrapping_sub(1);
    m.write_memory(m.regs[SP], (m.pc >> 8) as u8);
    m.advance_cycles(4);
    m.regs[SP] = m.regs[SP].wrapping_sub(1);
    m.write_memory(m.regs[SP], m.pc as u8);
    m.advance_cycles(4);
    m.pc = address;
}

fn rst(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    let return_address = m.pc.wrapping_add(1);
    m.regs[SP] = m.regs[SP].wrapping_sub(1);
    m.write_memory(m.regs[SP], (return_address >> 8) as u8);
    m.advance_cycles(4);
    m.regs[SP] = m.regs[SP].wrapping_sub(1);
    m.write_memory(m.regs[SP], return_address as u8);
    m.advance_cycles(4);
    m.pc = u16::from(opcode & 0x38);
    m.advance_cycles(4);
}

fn ld_da8_a(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let offset = m.read_memory(m.pc);
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    m.write_memory(0xff00 | u16::from(offset), m.a());
    m.advance_cycles(4);
}

fn ld_a_da8(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let offset = m.read_memory(m.pc);
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    let value = m.read_memory(0xff00 | u16::from(offset));
    m.set_a(value);
    m.advance_cycles(4);
}

fn ld_dc_a(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    m.write_memory(0xff00 | (m.regs[BC] & 0xff), m.a());
    m.advance_cycles(4);
}

fn ld_a_dc(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = m.read_memory(0xff00 | (m.regs[BC] & 0xff));
    m.set_a(value);
    m.advance_cycles(4);
}

fn add_sp_r8(m: &mut Machine, _: u8) {
    let sp = m.regs[SP];
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let offset = m.read_memory(m.pc).cast_signed();
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(12);
    m.regs[SP] = sp.wrapping_add_signed(i16::from(offset));
    m.regs[AF] &= 0xff00;
    if (sp & 0x0f) + (offset as u16 & 0x0f) > 0x0f {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if (sp & 0xff) + (offset as u16 & 0xff) > 0xff {
        m.regs[AF] |= CARRY_FLAG;
    }
}

fn jp_hl(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.regs[HL];
}

fn ld_da16_a(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let mut address = u16::from(m.read_memory(m.pc));
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    address |= u16::from(m.read_memory(m.pc)) << 8;
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    m.write_memory(address, m.a());
    m.advance_cycles(4);
}

fn ld_a_da16(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let mut address = u16::from(m.read_memory(m.pc));
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    address |= u16::from(m.read_memory(m.pc)) << 8;
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(4);
    let value = m.read_memory(address);
    m.set_a(value);
    m.advance_cycles(4);
}

fn ld_hl_sp_r8(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let offset = m.read_memory(m.pc).cast_signed();
    m.pc = m.pc.wrapping_add(1);
    m.advance_cycles(8);
    let sp = m.regs[SP];
    m.regs[HL] = sp.wrapping_add_signed(i16::from(offset));
    m.regs[AF] &= 0xff00;
    if (sp & 0x0f) + (offset as u16 & 0x0f) > 0x0f {
        m.regs[AF] |= HALF_CARRY_FLAG;
    }
    if (sp & 0xff) + (offset as u16 & 0xff) > 0xff {
        m.regs[AF] |= CARRY_FLAG;
    }
}

fn ld_sp_hl(m: &mut Machine, _: u8) {
    m.advance_cycles(8);
    m.pc = m.pc.wrapping_add(1);
    m.regs[SP] = m.regs[HL];
}

// ---- CB bank ----

fn rlc_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    let result = value.rotate_left(1);
    m.regs[AF] &= 0xff00;
    set_src_value(m, opcode, result);
    if value & 0x80 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn rrc_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    let result = value.rotate_right(1);
    m.regs[AF] &= 0xff00;
    set_src_value(m, opcode, result);
    if value & 1 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn rl_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    let carry = m.regs[AF] & CARRY_FLAG != 0;
    let result = (value << 1) | carry as u8;
    m.regs[AF] &= 0xff00;
    set_src_value(m, opcode, result);
    if value & 0x80 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn rr_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    let carry = m.regs[AF] & CARRY_FLAG != 0;
    let result = (value >> 1) | ((carry as u8) << 7);
    m.regs[AF] &= 0xff00;
    set_src_value(m, opcode, result);
    if value & 1 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn sla_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    let result = value << 1;
    m.regs[AF] &= 0xff00;
    set_src_value(m, opcode, result);
    if value & 0x80 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn sra_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    let result = (value >> 1) | (value & 0x80);
    m.regs[AF] &= 0xff00;
    set_src_value(m, opcode, result);
    if value & 1 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if result == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn swap_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    m.regs[AF] &= 0xff00;
    set_src_value(m, opcode, value.rotate_left(4));
    if value == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn srl_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    m.regs[AF] &= 0xff00;
    set_src_value(m, opcode, value >> 1);
    if value & 1 != 0 {
        m.regs[AF] |= CARRY_FLAG;
    }
    if value >> 1 == 0 {
        m.regs[AF] |= ZERO_FLAG;
    }
}

fn bit_res_set_r(m: &mut Machine, opcode: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let value = get_src_value(m, opcode);
    let bit = 1 << ((opcode >> 3) & 7);
    match opcode & 0xc0 {
        0x40 => {
            m.regs[AF] &= 0xff00 | CARRY_FLAG;
            m.regs[AF] |= HALF_CARRY_FLAG;
            if value & bit == 0 {
                m.regs[AF] |= ZERO_FLAG;
            }
        }
        0x80 => set_src_value(m, opcode, value & !bit),
        _ => set_src_value(m, opcode, value | bit),
    }
}

fn cb_prefix(m: &mut Machine, _: u8) {
    m.advance_cycles(4);
    m.pc = m.pc.wrapping_add(1);
    let opcode = m.read_memory(m.pc);
    match opcode >> 3 {
        0 => rlc_r(m, opcode),
        1 => rrc_r(m, opcode),
        2 => rl_r(m, opcode),
        3 => rr_r(m, opcode),
        4 => sla_r(m, opcode),
        5 => sra_r(m, opcode),
        6 => swap_r(m, opcode),
        7 => srl_r(m, opcode),
        _ => bit_res_set_r(m, opcode),
    }
}

#[rustfmt::skip]
pub(super) const OPCODES: [Opcode; 256] = [
    /*  X0          X1          X2          X3          X4          X5          X6          X7          */
    /*  X8          X9          Xa          Xb          Xc          Xd          Xe          Xf          */
    nop,        ld_rr_d16,  ld_drr_a,   inc_rr,     inc_hr,     dec_hr,     ld_hr_d8,   rlca,       /* 0X */
    ld_da16_sp, add_hl_rr,  ld_a_drr,   dec_rr,     inc_lr,     dec_lr,     ld_lr_d8,   rrca,
    stop,       ld_rr_d16,  ld_drr_a,   inc_rr,     inc_hr,     dec_hr,     ld_hr_d8,   rla,        /* 1X */
    jr_r8,      add_hl_rr,  ld_a_drr,   dec_rr,     inc_lr,     dec_lr,     ld_lr_d8,   rra,
    jr_cc_r8,   ld_rr_d16,  ld_dhli_a,  inc_rr,     inc_hr,     dec_hr,     ld_hr_d8,   daa,        /* 2X */
    jr_cc_r8,   add_hl_rr,  ld_a_dhli,  dec_rr,     inc_lr,     dec_lr,     ld_lr_d8,   cpl,
    jr_cc_r8,   ld_rr_d16,  ld_dhld_a,  inc_rr,     inc_dhl,    dec_dhl,    ld_dhl_d8,  scf,        /* 3X */
    jr_cc_r8,   add_hl_rr,  ld_a_dhld,  dec_rr,     inc_hr,     dec_hr,     ld_hr_d8,   ccf,
    ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     /* 4X */
    ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,
    ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     /* 5X */
    ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,
    ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     /* 6X */
    ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,
    ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     halt,       ld_r_r,     /* 7X */
    ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,     ld_r_r,
    add_a_r,    add_a_r,    add_a_r,    add_a_r,    add_a_r,    add_a_r,    add_a_r,    add_a_r,    /* 8X */
    adc_a_r,    adc_a_r,    adc_a_r,    adc_a_r,    adc_a_r,    adc_a_r,    adc_a_r,    adc_a_r,
    sub_a_r,    sub_a_r,    sub_a_r,    sub_a_r,    sub_a_r,    sub_a_r,    sub_a_r,    sub_a_r,    /* 9X */
    sbc_a_r,    sbc_a_r,    sbc_a_r,    sbc_a_r,    sbc_a_r,    sbc_a_r,    sbc_a_r,    sbc_a_r,
    and_a_r,    and_a_r,    and_a_r,    and_a_r,    and_a_r,    and_a_r,    and_a_r,    and_a_r,    /* aX */
    xor_a_r,    xor_a_r,    xor_a_r,    xor_a_r,    xor_a_r,    xor_a_r,    xor_a_r,    xor_a_r,
    or_a_r,     or_a_r,     or_a_r,     or_a_r,     or_a_r,     or_a_r,     or_a_r,     or_a_r,     /* bX */
    cp_a_r,     cp_a_r,     cp_a_r,     cp_a_r,     cp_a_r,     cp_a_r,     cp_a_r,     cp_a_r,
    ret_cc,     pop_rr,     jp_cc_a16,  jp_a16,     call_cc_a16, push_rr,   add_a_d8,   rst,        /* cX */
    ret_cc,     ret,        jp_cc_a16,  cb_prefix,  call_cc_a16, call_a16,  adc_a_d8,   rst,
    ret_cc,     pop_rr,     jp_cc_a16,  ill,        call_cc_a16, push_rr,   sub_a_d8,   rst,        /* dX */
    ret_cc,     reti,       jp_cc_a16,  ill,        call_cc_a16, ill,       sbc_a_d8,   rst,
    ld_da8_a,   pop_rr,     ld_dc_a,    ill,        ill,        push_rr,    and_a_d8,   rst,        /* eX */
    add_sp_r8,  jp_hl,      ld_da16_a,  ill,        ill,        ill,        xor_a_d8,   rst,
    ld_a_da8,   pop_rr,     ld_a_dc,    di,         ill,        push_rr,    or_a_d8,    rst,        /* fX */
    ld_hl_sp_r8, ld_sp_hl,  ld_a_da16,  ei,         ill,        ill,        cp_a_d8,    rst,
];
