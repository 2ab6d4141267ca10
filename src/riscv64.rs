//! RISC-V relocation application. Values are computed in wrapping u64
//! arithmetic and packed into the instruction encodings below; each writer
//! masks out the instruction's immediate bits and preserves the rest.
//!
//! Application runs in three passes over a section's relocations:
//!
//! 1. Simple relocations are applied, and each PCREL/TLS-GOT HI20 site gets
//!    its full 32-bit target value stored as a marker.
//! 2. Each PCREL_LO12 reads the 32-bit value its paired HI20 site computed
//!    in pass 1 and encodes the I/S-type immediate from it.
//! 3. The HI20 sites are finalized: the original instruction bytes are
//!    restored and the U-type immediate is encoded from the marker value.
//!
//! The pass order matters: a LO12 must observe its HI20's computed value
//! before the HI20 site is narrowed to its upper 20 bits.

use crate::bit_misc::bit;
use crate::bit_misc::bits;
use crate::bit_misc::sign_extend;
use crate::context::Context;
use crate::error::Result;
use crate::object_file::InputSectionId;
use crate::symbol::Placement;
use anyhow::ensure;
use object::elf::R_RISCV_32;
use object::elf::R_RISCV_64;
use object::elf::R_RISCV_BRANCH;
use object::elf::R_RISCV_CALL;
use object::elf::R_RISCV_CALL_PLT;
use object::elf::R_RISCV_HI20;
use object::elf::R_RISCV_JAL;
use object::elf::R_RISCV_LO12_I;
use object::elf::R_RISCV_LO12_S;
use object::elf::R_RISCV_NONE;
use object::elf::R_RISCV_PCREL_HI20;
use object::elf::R_RISCV_PCREL_LO12_I;
use object::elf::R_RISCV_PCREL_LO12_S;
use object::elf::R_RISCV_RELAX;
use object::elf::R_RISCV_TLS_GOT_HI20;
use object::elf::R_RISCV_TPREL_LO12_I;
use object::elf::R_RISCV_TPREL_LO12_S;

fn itype(val: u32) -> u32 {
    val << 20
}

fn stype(val: u32) -> u32 {
    bits(val, 11, 5) << 25 | bits(val, 4, 0) << 7
}

fn btype(val: u32) -> u32 {
    bit(val, 12) << 31 | bits(val, 10, 5) << 25 | bits(val, 4, 1) << 8 | bit(val, 11) << 7
}

/// Rounds the low 12 bits into the upper immediate so that the paired LO12
/// sign-extends back to the exact value.
fn utype(val: u32) -> u32 {
    (val.wrapping_add(0x800)) & 0xffff_f000
}

fn jtype(val: u32) -> u32 {
    bit(val, 20) << 31 | bits(val, 10, 1) << 21 | bit(val, 11) << 20 | bits(val, 19, 12) << 12
}

fn read_u32(loc: &[u8]) -> u32 {
    u32::from_le_bytes(loc[..4].try_into().unwrap())
}

fn write_u32(loc: &mut [u8], val: u32) {
    loc[..4].copy_from_slice(&val.to_le_bytes());
}

fn write_u64(loc: &mut [u8], val: u64) {
    loc[..8].copy_from_slice(&val.to_le_bytes());
}

fn write_itype(loc: &mut [u8], val: u32) {
    let mask = 0b000000_00000_11111_111_11111_1111111;
    write_u32(loc, (read_u32(loc) & mask) | itype(val));
}

fn write_stype(loc: &mut [u8], val: u32) {
    let mask = 0b000000_11111_11111_111_00000_1111111;
    write_u32(loc, (read_u32(loc) & mask) | stype(val));
}

fn write_btype(loc: &mut [u8], val: u32) {
    let mask = 0b000000_11111_11111_111_00000_1111111;
    write_u32(loc, (read_u32(loc) & mask) | btype(val));
}

fn write_utype(loc: &mut [u8], val: u32) {
    let mask = 0b000000_00000_00000_000_11111_1111111;
    write_u32(loc, (read_u32(loc) & mask) | utype(val));
}

fn write_jtype(loc: &mut [u8], val: u32) {
    let mask = 0b000000_00000_00000_000_11111_1111111;
    write_u32(loc, (read_u32(loc) & mask) | jtype(val));
}

fn set_rs1(loc: &mut [u8], rs1: u32) {
    write_u32(loc, read_u32(loc) & 0b111111_11111_00000_111_11111_1111111);
    write_u32(loc, read_u32(loc) | (rs1 << 15));
}

/// Applies the relocations of one input section. `base` is the output
/// buffer, starting at the section's position in the image.
pub(crate) fn apply_reloc_alloc(ctx: &Context, id: InputSectionId, base: &mut [u8]) -> Result {
    let isec = ctx.input_section(id);
    let rels = isec.rels.as_deref().unwrap_or(&[]);
    let section_addr = ctx.input_section_addr(id);

    for rel in rels {
        let ty = rel.r_type();
        if ty == R_RISCV_NONE || ty == R_RISCV_RELAX {
            continue;
        }

        let sym = ctx.symbol_for(id.file, rel.sym() as usize);
        if sym.file.is_none() {
            continue;
        }

        let s = ctx.symbol_addr(sym);
        let a = rel.addend;
        let p = section_addr.wrapping_add(rel.offset);
        let loc = &mut base[rel.offset as usize..];

        match ty {
            R_RISCV_32 => write_u32(loc, s.wrapping_add(a) as u32),
            R_RISCV_64 => write_u64(loc, s.wrapping_add(a)),
            R_RISCV_BRANCH => write_btype(loc, s.wrapping_add(a).wrapping_sub(p) as u32),
            R_RISCV_JAL => write_jtype(loc, s.wrapping_add(a).wrapping_sub(p) as u32),
            R_RISCV_CALL | R_RISCV_CALL_PLT => {
                let val = s.wrapping_add(a).wrapping_sub(p) as u32;
                write_utype(loc, val);
                write_itype(&mut loc[4..], val);
            }
            R_RISCV_TLS_GOT_HI20 => {
                let got = ctx.got_tp_addr(sym);
                write_u32(loc, got.wrapping_add(a).wrapping_sub(p) as u32);
            }
            R_RISCV_PCREL_HI20 => {
                // Full-precision marker; the paired LO12 reads it in pass 2
                // and pass 3 narrows it to the U-type immediate.
                write_u32(loc, s.wrapping_add(a).wrapping_sub(p) as u32);
            }
            R_RISCV_HI20 => write_utype(loc, s.wrapping_add(a) as u32),
            R_RISCV_LO12_I | R_RISCV_LO12_S => {
                let val = s.wrapping_add(a);
                if ty == R_RISCV_LO12_I {
                    write_itype(loc, val as u32);
                } else {
                    write_stype(loc, val as u32);
                }
                // If the value fits in 12 signed bits, the paired LUI was
                // unnecessary and x0 can serve as the base register.
                if sign_extend(val, 11) == val {
                    set_rs1(loc, 0);
                }
            }
            R_RISCV_TPREL_LO12_I | R_RISCV_TPREL_LO12_S => {
                let val = s.wrapping_add(a).wrapping_sub(ctx.tp_addr);
                if ty == R_RISCV_TPREL_LO12_I {
                    write_itype(loc, val as u32);
                } else {
                    write_stype(loc, val as u32);
                }
                // Values that fit can be addressed straight off tp (x4).
                if sign_extend(val, 11) == val {
                    set_rs1(loc, 4);
                }
            }
            _ => {}
        }
    }

    for rel in rels {
        match rel.r_type() {
            R_RISCV_PCREL_LO12_I | R_RISCV_PCREL_LO12_S => {
                let sym = ctx.symbol_for(id.file, rel.sym() as usize);
                ensure!(
                    sym.placement == Some(Placement::Section(id)),
                    "PCREL_LO12 pair symbol is not defined in the relocated section"
                );
                let val = read_u32(&base[sym.value as usize..]);
                let loc = &mut base[rel.offset as usize..];
                if rel.r_type() == R_RISCV_PCREL_LO12_I {
                    write_itype(loc, val);
                } else {
                    write_stype(loc, val);
                }
            }
            _ => {}
        }
    }

    for rel in rels {
        match rel.r_type() {
            R_RISCV_PCREL_HI20 | R_RISCV_TLS_GOT_HI20 => {
                let offset = rel.offset as usize;
                let val = read_u32(&base[offset..]);
                let original = read_u32(&isec.contents[offset..]);
                write_u32(&mut base[offset..], original);
                write_utype(&mut base[offset..], val);
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUIPC_A0: u32 = 0x0000_0517;
    const ADDI_A0_A0: u32 = 0x0005_0513;

    #[test]
    fn test_utype_rounds_for_lo12_sign_extension() {
        // For any value, utype(v) + sign_extend(v & 0xfff) == v.
        for val in [0u32, 1, 0x7ff, 0x800, 0x801, 0xfff, 0x1234, 0x8000_0000] {
            let upper = utype(val);
            let lower = sign_extend(u64::from(val) & 0xfff, 11) as u32;
            assert_eq!(
                upper.wrapping_add(lower),
                val,
                "value {val:#x} didn't survive the U+I split"
            );
        }
    }

    #[test]
    fn test_writers_preserve_non_immediate_bits() {
        let mut insn = AUIPC_A0.to_le_bytes();
        write_utype(&mut insn, 0x12345678);
        let out = u32::from_le_bytes(insn);
        // Opcode and rd are untouched.
        assert_eq!(out & 0xfff, AUIPC_A0 & 0xfff);
        assert_eq!(out & 0xffff_f000, utype(0x12345678));

        let mut insn = ADDI_A0_A0.to_le_bytes();
        write_itype(&mut insn, 0x7ff);
        let out = u32::from_le_bytes(insn);
        assert_eq!(out & 0xfffff, ADDI_A0_A0 & 0xfffff);
        assert_eq!(out >> 20, 0x7ff);
    }

    #[test]
    fn test_btype_jtype_bit_scatter() {
        // B-type: imm[12|10:5] in 31:25, imm[4:1|11] in 11:7.
        let val: u32 = 0x1abe;
        let encoded = btype(val);
        assert_eq!(encoded >> 31, bit(val, 12));
        assert_eq!((encoded >> 25) & 0x3f, bits(val, 10, 5));
        assert_eq!((encoded >> 8) & 0xf, bits(val, 4, 1));
        assert_eq!((encoded >> 7) & 1, bit(val, 11));

        // J-type: imm[20|10:1|11|19:12] in 31:12.
        let val = 0x0010_0ffe & !1;
        let encoded = jtype(val as u32);
        assert_eq!(encoded >> 31, bit(val as u32, 20));
        assert_eq!((encoded >> 21) & 0x3ff, bits(val as u32, 10, 1));
        assert_eq!((encoded >> 20) & 1, bit(val as u32, 11));
        assert_eq!((encoded >> 12) & 0xff, bits(val as u32, 19, 12));
    }

    #[test]
    fn test_set_rs1() {
        let mut insn = 0xffff_ffffu32.to_le_bytes();
        set_rs1(&mut insn, 4);
        let out = u32::from_le_bytes(insn);
        assert_eq!((out >> 15) & 0x1f, 4);
        // Everything outside rs1 is preserved.
        assert_eq!(out | (0x1f << 15), 0xffff_ffff);
    }
}
