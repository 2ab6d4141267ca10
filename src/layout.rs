//! Decides what goes where in the output file: bins input sections into
//! their output sections, allocates TLS GOT slots, computes sizes, orders
//! the chunks and assigns addresses and file offsets.

use crate::alignment::align_to;
use crate::context::Context;
use crate::elf::shf;
use crate::elf::SectionHeader;
use crate::elf::GOT_ENTRY_SIZE;
use crate::elf::IMAGE_BASE;
use crate::elf_writer;
use crate::elf_writer::Chunk;
use crate::error::Result;
use crate::object_file::InputSectionId;
use crate::output_sections::OutputSectionId;
use crate::string_merging::MergedSectionId;
use crate::symbol::NEEDS_GOT_TP;

#[tracing::instrument(skip_all, name = "Bin sections")]
pub(crate) fn bin_sections(ctx: &mut Context) {
    let mut groups: Vec<Vec<InputSectionId>> = vec![Vec::new(); ctx.output_sections.len()];
    for &oid in &ctx.live_objects {
        let obj = &ctx.objects[oid.as_usize()];
        for isec in obj.sections.iter().flatten() {
            if !isec.is_alive {
                continue;
            }
            groups[isec.output_section.as_usize()].push(InputSectionId {
                file: isec.file,
                shndx: isec.shndx,
            });
        }
    }
    for (idx, members) in groups.into_iter().enumerate() {
        ctx.output_sections
            .section_mut(OutputSectionId::new(idx))
            .members = members;
    }
}

/// Appends the output sections that ended up with members, and the merged
/// sections that ended up with bytes, to the chunk list.
#[tracing::instrument(skip_all, name = "Collect output sections")]
pub(crate) fn collect_output_sections(ctx: &mut Context) {
    let mut chunks = Vec::new();
    for osec in ctx.output_sections.iter() {
        if !osec.members.is_empty() {
            chunks.push(Chunk::Output(osec.idx));
        }
    }
    for (i, msec) in ctx.merged_sections.iter().enumerate() {
        if msec.shdr.size > 0 {
            chunks.push(Chunk::Merged(MergedSectionId::new(i)));
        }
    }
    ctx.chunks.extend(chunks);
}

/// Finds the symbols that need a TLS GOT slot and assigns the slots. The
/// per-object scan sets a pending flag on each such symbol; this pass then
/// visits each flagged symbol once (via its defining object) and clears the
/// flag.
#[tracing::instrument(skip_all, name = "Scan relocations")]
pub(crate) fn scan_relocations(ctx: &mut Context) -> Result {
    let live = ctx.live_objects.clone();
    for &oid in &live {
        let Context {
            objects, symbol_db, ..
        } = ctx;
        objects[oid.as_usize()].scan_relocations(symbol_db)?;
    }

    let mut pending = Vec::new();
    for &oid in &live {
        let num_symbols = ctx.objects[oid.as_usize()].symbols.len();
        for i in 0..num_symbols {
            let sym = ctx.symbol_for(oid, i);
            if sym.file == Some(oid) && sym.flags != 0 {
                pending.push((oid, i));
            }
        }
    }
    for (oid, i) in pending {
        if ctx.symbol_for(oid, i).flags & NEEDS_GOT_TP != 0 {
            let slot = (ctx.got.shdr.size / GOT_ENTRY_SIZE) as u32;
            ctx.got.shdr.size += GOT_ENTRY_SIZE;
            ctx.got.tp_syms.push((oid, i));
            ctx.symbol_for_mut(oid, i).got_tp_idx = slot;
        }
        ctx.symbol_for_mut(oid, i).flags = 0;
    }
    Ok(())
}

#[tracing::instrument(skip_all, name = "Compute section sizes")]
pub(crate) fn compute_section_sizes(ctx: &mut Context) {
    for idx in 0..ctx.output_sections.len() {
        let id = OutputSectionId::new(idx);
        let members = ctx.output_sections.section(id).members.clone();
        let mut offset = 0u64;
        let mut p2align = 0u8;
        for member in members {
            let obj = &mut ctx.objects[member.file.as_usize()];
            let isec = obj.sections[member.shndx as usize].as_mut().unwrap();
            offset = align_to(offset, 1 << isec.p2align);
            isec.offset = offset;
            offset += isec.sh_size;
            p2align = p2align.max(isec.p2align);
        }
        let osec = ctx.output_sections.section_mut(id);
        osec.shdr.size = offset;
        osec.shdr.alignment = 1 << p2align;
    }
}

/// The rank function that produces the canonical ELF segment order:
/// headers, then read-only, executable, TLS, writable, BSS; non-allocated
/// chunks after everything, with the section header table last of all.
fn chunk_rank(ctx: &Context, chunk: Chunk) -> i32 {
    if chunk == Chunk::Shdr {
        return i32::MAX;
    }
    let shdr = ctx.chunk_shdr(chunk);
    if shdr.flags & shf::ALLOC == 0 {
        return i32::MAX - 1;
    }
    match chunk {
        Chunk::Ehdr => return 0,
        Chunk::Phdr => return 1,
        _ => {}
    }
    if shdr.ty == object::elf::SHT_NOTE {
        return 2;
    }

    let writeable = i32::from(shdr.flags & shf::WRITE != 0);
    let not_exec = i32::from(shdr.flags & shf::EXECINSTR == 0);
    let not_tls = i32::from(shdr.flags & shf::TLS == 0);
    let is_bss = i32::from(shdr.ty == object::elf::SHT_NOBITS);

    writeable << 7 | not_exec << 6 | not_tls << 5 | is_bss << 4
}

#[tracing::instrument(skip_all, name = "Sort output sections")]
pub(crate) fn sort_output_sections(ctx: &mut Context) {
    let mut chunks = std::mem::take(&mut ctx.chunks);
    chunks.sort_by_key(|&chunk| chunk_rank(ctx, chunk));
    ctx.chunks = chunks;
}

pub(crate) fn is_tbss(shdr: &SectionHeader) -> bool {
    shdr.ty == object::elf::SHT_NOBITS && shdr.flags & shf::TLS != 0
}

/// Assigns addresses to the allocated chunks starting at the image base,
/// then file offsets: the load region mirrors memory, everything after it
/// packs with its own alignment. Returns the final file size.
#[tracing::instrument(skip_all, name = "Set output section offsets")]
pub(crate) fn set_output_section_offsets(ctx: &mut Context) -> u64 {
    let chunks = ctx.chunks.clone();
    let mut addr = IMAGE_BASE;
    for &chunk in &chunks {
        let shdr = ctx.chunk_shdr(chunk);
        if shdr.flags & shf::ALLOC == 0 {
            continue;
        }
        addr = align_to(addr, shdr.alignment);
        let tbss = is_tbss(shdr);
        let size = shdr.size;
        ctx.chunk_shdr_mut(chunk).address = addr;
        // TBSS occupies no address space of its own; it overlays the
        // template area addressed relative to the thread pointer.
        if !tbss {
            addr += size;
        }
    }

    let base = ctx.chunk_shdr(chunks[0]).address;
    let mut i = 0;
    loop {
        let shdr = ctx.chunk_shdr_mut(chunks[i]);
        shdr.offset = shdr.address - base;
        i += 1;
        if i >= chunks.len() || ctx.chunk_shdr(chunks[i]).flags & shf::ALLOC == 0 {
            break;
        }
    }

    let last = ctx.chunk_shdr(chunks[i - 1]);
    let mut fileoff = last.offset + last.size;
    while i < chunks.len() {
        let shdr = ctx.chunk_shdr_mut(chunks[i]);
        fileoff = align_to(fileoff, shdr.alignment);
        shdr.offset = fileoff;
        fileoff += shdr.size;
        i += 1;
    }

    // Addresses are final now, so the program headers can be built for real.
    // This is also what establishes the thread pointer address.
    elf_writer::update_phdr(ctx);
    fileoff
}
