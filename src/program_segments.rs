//! Builds the program header table from the final chunk order: a PT_NOTE
//! segment per run of note chunks, a PT_LOAD per run of allocated chunks
//! with equal permissions, and a PT_TLS covering the TLS chunks.

use crate::context::Context;
use crate::elf::shf;
use crate::elf::ProgramHeader;
use crate::elf::SectionHeader;
use crate::elf::PAGE_SIZE;
use crate::layout::is_tbss;

fn to_phdr_flags(shdr: &SectionHeader) -> u32 {
    let mut flags = object::elf::PF_R;
    if shdr.flags & shf::WRITE != 0 {
        flags |= object::elf::PF_W;
    }
    if shdr.flags & shf::EXECINSTR != 0 {
        flags |= object::elf::PF_X;
    }
    flags
}

fn is_note(shdr: &SectionHeader) -> bool {
    shdr.ty == object::elf::SHT_NOTE && shdr.flags & shf::ALLOC != 0
}

fn is_bss(shdr: &SectionHeader) -> bool {
    shdr.ty == object::elf::SHT_NOBITS && shdr.flags & shf::TLS == 0
}

/// Starts a new segment covering `shdr`.
fn define(phdrs: &mut Vec<ProgramHeader>, ty: u32, flags: u32, min_align: u64, shdr: &SectionHeader) {
    phdrs.push(ProgramHeader {
        ty,
        flags,
        offset: shdr.offset,
        virtual_addr: shdr.address,
        physical_addr: shdr.address,
        file_size: if shdr.ty == object::elf::SHT_NOBITS {
            0
        } else {
            shdr.size
        },
        mem_size: shdr.size,
        alignment: min_align.max(shdr.alignment),
    });
}

/// Extends the last segment to also cover `shdr`.
fn push(phdrs: &mut Vec<ProgramHeader>, shdr: &SectionHeader) {
    let phdr = phdrs.last_mut().unwrap();
    phdr.alignment = phdr.alignment.max(shdr.alignment);
    let end = shdr.address + shdr.size;
    if shdr.ty != object::elf::SHT_NOBITS {
        phdr.file_size = end - phdr.virtual_addr;
    }
    phdr.mem_size = end - phdr.virtual_addr;
}

/// Returns the program headers plus the TLS segment's start address (the
/// thread pointer), if there is one.
pub(crate) fn create_phdrs(ctx: &Context) -> (Vec<ProgramHeader>, Option<u64>) {
    let shdrs: Vec<&SectionHeader> = ctx.chunks.iter().map(|&c| ctx.chunk_shdr(c)).collect();
    let mut phdrs = Vec::new();

    // One PT_NOTE per run of equally-flagged note chunks.
    let mut i = 0;
    while i < shdrs.len() {
        let first = shdrs[i];
        i += 1;
        if !is_note(first) {
            continue;
        }
        let flags = to_phdr_flags(first);
        define(&mut phdrs, object::elf::PT_NOTE, flags, first.alignment, first);
        while i < shdrs.len() && is_note(shdrs[i]) && to_phdr_flags(shdrs[i]) == flags {
            push(&mut phdrs, shdrs[i]);
            i += 1;
        }
    }

    // PT_LOAD segments. TBSS is invisible here: it doesn't take up address
    // space. A run takes same-flag chunks, letting BSS join only at the end
    // so that the file-backed part stays contiguous.
    let loadable: Vec<&SectionHeader> = shdrs
        .iter()
        .copied()
        .filter(|shdr| !is_tbss(shdr))
        .collect();
    let mut i = 0;
    while i < loadable.len() {
        let first = loadable[i];
        i += 1;
        if first.flags & shf::ALLOC == 0 {
            break;
        }
        let flags = to_phdr_flags(first);
        define(&mut phdrs, object::elf::PT_LOAD, flags, PAGE_SIZE, first);
        if !is_bss(first) {
            while i < loadable.len() && !is_bss(loadable[i]) && to_phdr_flags(loadable[i]) == flags
            {
                push(&mut phdrs, loadable[i]);
                i += 1;
            }
        }
        while i < loadable.len() && is_bss(loadable[i]) && to_phdr_flags(loadable[i]) == flags {
            push(&mut phdrs, loadable[i]);
            i += 1;
        }
    }

    // PT_TLS over the run of TLS chunks. Its start address is the thread
    // pointer that TPREL relocations are relative to.
    let mut tp_addr = None;
    let mut i = 0;
    while i < shdrs.len() {
        let first = shdrs[i];
        i += 1;
        if first.flags & shf::TLS == 0 {
            continue;
        }
        define(&mut phdrs, object::elf::PT_TLS, to_phdr_flags(first), 1, first);
        while i < shdrs.len() && shdrs[i].flags & shf::TLS != 0 {
            push(&mut phdrs, shdrs[i]);
            i += 1;
        }
        tp_addr = Some(phdrs.last().unwrap().virtual_addr);
        break;
    }

    (phdrs, tp_addr)
}
