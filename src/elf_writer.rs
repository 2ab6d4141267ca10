//! Everything that gets emitted into the output image is a chunk: the three
//! synthetic headers, the GOT, the collected output sections and the merged
//! sections. Chunks share four operations — name, section header, header
//! update and buffer copy — dispatched over a small sum type rather than any
//! kind of inheritance.

use crate::context::Context;
use crate::context::ObjectId;
use crate::elf;
use crate::elf::shf;
use crate::elf::FileHeader;
use crate::elf::ProgramHeader;
use crate::elf::SectionHeader;
use crate::elf::FILE_HEADER_SIZE;
use crate::elf::GOT_ENTRY_SIZE;
use crate::elf::PROGRAM_HEADER_SIZE;
use crate::elf::SECTION_HEADER_SIZE;
use crate::error::Result;
use crate::output_sections::OutputSectionId;
use crate::program_segments;
use crate::riscv64;
use crate::string_merging::MergedSectionId;
use anyhow::Context as _;
use std::io::Write as _;
use std::path::Path;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Chunk {
    Ehdr,
    Phdr,
    Shdr,
    Got,
    Output(OutputSectionId),
    Merged(MergedSectionId),
}

pub(crate) struct OutputEhdr {
    pub(crate) shdr: SectionHeader,
}

pub(crate) struct OutputPhdr {
    pub(crate) shdr: SectionHeader,
    pub(crate) phdrs: Vec<ProgramHeader>,
}

pub(crate) struct OutputShdr {
    pub(crate) shdr: SectionHeader,
}

/// Holds one 8-byte slot per symbol accessed through an initial-exec TLS
/// relocation. Each slot stores the symbol's offset from the thread pointer.
pub(crate) struct GotSection {
    pub(crate) shdr: SectionHeader,
    /// Each entry locates a registered symbol via (object, symbol index).
    pub(crate) tp_syms: Vec<(ObjectId, usize)>,
}

impl OutputEhdr {
    pub(crate) fn new() -> OutputEhdr {
        OutputEhdr {
            shdr: SectionHeader {
                flags: shf::ALLOC,
                size: FILE_HEADER_SIZE as u64,
                alignment: 8,
                ..Default::default()
            },
        }
    }
}

impl OutputPhdr {
    pub(crate) fn new() -> OutputPhdr {
        OutputPhdr {
            shdr: SectionHeader {
                flags: shf::ALLOC,
                alignment: 8,
                ..Default::default()
            },
            phdrs: Vec::new(),
        }
    }
}

impl OutputShdr {
    pub(crate) fn new() -> OutputShdr {
        OutputShdr {
            shdr: SectionHeader {
                alignment: 8,
                ..Default::default()
            },
        }
    }
}

impl GotSection {
    pub(crate) fn new() -> GotSection {
        GotSection {
            shdr: SectionHeader {
                ty: object::elf::SHT_PROGBITS,
                flags: shf::ALLOC | shf::WRITE,
                alignment: 8,
                ..Default::default()
            },
            tp_syms: Vec::new(),
        }
    }
}

/// Pushes the synthetic chunks, in the order they appear in the file's head.
#[tracing::instrument(skip_all, name = "Create synthetic sections")]
pub(crate) fn create_synthetic_sections(ctx: &mut Context) {
    ctx.chunks
        .extend([Chunk::Ehdr, Chunk::Phdr, Chunk::Shdr, Chunk::Got]);
}

/// Runs every chunk's header update in the current chunk order.
pub(crate) fn update_shdrs(ctx: &mut Context) {
    for chunk in ctx.chunks.clone() {
        match chunk {
            Chunk::Phdr => update_phdr(ctx),
            // The section header table holds just the null entry: the output
            // carries no symbol table or debug info that would need more.
            Chunk::Shdr => ctx.shdr_chunk.shdr.size = SECTION_HEADER_SIZE as u64,
            _ => {}
        }
    }
}

/// Rebuilds the program header table from the current chunk state. Runs once
/// to size the table and again after addresses are assigned, which is when
/// the TLS segment start (the thread pointer) becomes known.
pub(crate) fn update_phdr(ctx: &mut Context) {
    let (phdrs, tp_addr) = program_segments::create_phdrs(ctx);
    ctx.phdr_chunk.shdr.size = (phdrs.len() * PROGRAM_HEADER_SIZE) as u64;
    ctx.phdr_chunk.phdrs = phdrs;
    if let Some(tp_addr) = tp_addr {
        ctx.tp_addr = tp_addr;
    }
}

/// The executable's entry point: the start of `.text`.
fn entry_addr(ctx: &Context) -> u64 {
    ctx.output_sections
        .find_by_name(".text")
        .map(|osec| osec.shdr.address)
        .unwrap_or(0)
}

/// e_flags for the output: the first live object's flags, picking up the
/// RVC bit if any other object was built with compressed instructions.
fn riscv_flags(ctx: &Context) -> u32 {
    let mut live = ctx.live_objects.iter();
    let Some(&first) = live.next() else {
        return 0;
    };
    let mut flags = ctx.object(first).ehdr_flags;
    for &oid in live {
        if ctx.object(oid).ehdr_flags & object::elf::EF_RISCV_RVC != 0 {
            flags |= object::elf::EF_RISCV_RVC;
            break;
        }
    }
    flags
}

#[tracing::instrument(skip_all, name = "Copy chunks")]
pub(crate) fn copy_chunks(ctx: &Context, buf: &mut [u8]) -> Result {
    for &chunk in &ctx.chunks {
        copy_buf(ctx, chunk, buf)?;
    }
    Ok(())
}

fn copy_buf(ctx: &Context, chunk: Chunk, buf: &mut [u8]) -> Result {
    match chunk {
        Chunk::Ehdr => {
            let ehdr = FileHeader {
                magic: object::elf::ELFMAG,
                class: object::elf::ELFCLASS64,
                data: object::elf::ELFDATA2LSB,
                ei_version: 1,
                os_abi: 0,
                abi_version: 0,
                padding: [0; 7],
                ty: object::elf::ET_EXEC,
                machine: object::elf::EM_RISCV,
                e_version: 1,
                entry_point: entry_addr(ctx),
                program_header_offset: ctx.phdr_chunk.shdr.offset,
                section_header_offset: ctx.shdr_chunk.shdr.offset,
                flags: riscv_flags(ctx),
                ehsize: FILE_HEADER_SIZE as u16,
                program_header_entry_size: PROGRAM_HEADER_SIZE as u16,
                program_header_num: (ctx.phdr_chunk.shdr.size / PROGRAM_HEADER_SIZE as u64) as u16,
                section_header_entry_size: SECTION_HEADER_SIZE as u16,
                section_header_num: (ctx.shdr_chunk.shdr.size / SECTION_HEADER_SIZE as u64) as u16,
                section_names_index: 0,
            };
            elf::write(&mut buf[ctx.ehdr_chunk.shdr.offset as usize..], ehdr);
        }
        Chunk::Phdr => {
            let base = ctx.phdr_chunk.shdr.offset as usize;
            for (i, phdr) in ctx.phdr_chunk.phdrs.iter().enumerate() {
                elf::write(&mut buf[base + i * PROGRAM_HEADER_SIZE..], *phdr);
            }
        }
        Chunk::Shdr => {
            // Just the null section header.
            elf::write(
                &mut buf[ctx.shdr_chunk.shdr.offset as usize..],
                SectionHeader::default(),
            );
        }
        Chunk::Got => {
            let base = ctx.got.shdr.offset as usize;
            for &(oid, index) in &ctx.got.tp_syms {
                let sym = ctx.symbol_for(oid, index);
                let value = ctx.symbol_addr(sym).wrapping_sub(ctx.tp_addr);
                let slot = base + sym.got_tp_idx as usize * GOT_ENTRY_SIZE as usize;
                elf::write(&mut buf[slot..], value);
            }
        }
        Chunk::Output(id) => {
            let osec = ctx.output_sections.section(id);
            if osec.shdr.ty == object::elf::SHT_NOBITS {
                return Ok(());
            }
            let osec_offset = osec.shdr.offset as usize;
            for &member in &osec.members {
                let isec = ctx.input_section(member);
                let shdr = ctx.object(member.file).elf_sections[member.shndx as usize];
                if shdr.ty == object::elf::SHT_NOBITS || isec.sh_size == 0 {
                    continue;
                }
                let start = osec_offset + isec.offset as usize;
                buf[start..start + isec.contents.len()].copy_from_slice(isec.contents);
                if shdr.flags & shf::ALLOC != 0 {
                    riscv64::apply_reloc_alloc(ctx, member, &mut buf[start..])?;
                }
            }
        }
        Chunk::Merged(id) => {
            let msec = ctx.merged_sections.section(id);
            let base = msec.shdr.offset as usize;
            for (key, &idx) in &msec.pool {
                let frag = &msec.fragments[idx as usize];
                buf[base + frag.offset as usize..][..key.len()].copy_from_slice(key);
            }
        }
    }
    Ok(())
}

/// Writes the finished image in one go and makes it executable.
#[tracing::instrument(skip_all, name = "Write output")]
pub(crate) fn write_output(path: &Path, buf: &[u8]) -> Result {
    use std::os::unix::fs::PermissionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to open `{}` for writing", path.display()))?;
    file.write_all(buf)
        .with_context(|| format!("Failed to write `{}`", path.display()))?;

    // The image is a program: give each class that can read it permission
    // to run it too.
    let mut permissions = file.metadata()?.permissions();
    let mode = permissions.mode();
    permissions.set_mode(mode | ((mode & 0o444) >> 2));
    file.set_permissions(permissions)
        .with_context(|| format!("Failed to make `{}` executable", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bit_misc::sign_extend;
    use crate::elf::fixtures::ObjectBuilder;
    use crate::elf::fixtures::SectionSpec;
    use crate::elf::fixtures::SymbolSpec;
    use crate::elf::IMAGE_BASE;
    use crate::layout;
    use crate::object_file::ObjectFile;
    use crate::resolution;
    use crate::string_merging;
    use crate::symbol::SymbolName;

    const AUIPC_A0: u32 = 0x0000_0517;
    const ADDI_A0_A0: u32 = 0x0005_0513;

    struct TestInput {
        name: &'static str,
        data: Vec<u8>,
        in_lib: bool,
    }

    fn object(name: &'static str, data: Vec<u8>) -> TestInput {
        TestInput {
            name,
            data,
            in_lib: false,
        }
    }

    fn member(name: &'static str, data: Vec<u8>) -> TestInput {
        TestInput {
            name,
            data,
            in_lib: true,
        }
    }

    /// Drives the whole pipeline over in-memory objects, returning the
    /// context and the final image buffer.
    fn link(inputs: &[TestInput]) -> (Context<'_>, Vec<u8>) {
        let mut ctx = Context::new();
        for input in inputs {
            let this = ObjectId::new(ctx.objects.len());
            let mut obj =
                ObjectFile::new(input.name.to_owned(), &input.data, !input.in_lib).unwrap();
            obj.parse(
                this,
                &mut ctx.output_sections,
                &mut ctx.merged_sections,
                &mut ctx.symbol_db,
            )
            .unwrap();
            ctx.objects.push(obj);
        }
        resolution::resolve_symbols(&mut ctx).unwrap();
        string_merging::register_section_pieces(&mut ctx).unwrap();
        string_merging::compute_merged_section_sizes(&mut ctx);
        create_synthetic_sections(&mut ctx);
        layout::bin_sections(&mut ctx);
        layout::collect_output_sections(&mut ctx);
        layout::scan_relocations(&mut ctx).unwrap();
        layout::compute_section_sizes(&mut ctx);
        layout::sort_output_sections(&mut ctx);
        update_shdrs(&mut ctx);
        let file_size = layout::set_output_section_offsets(&mut ctx);
        let mut buf = vec![0u8; file_size as usize];
        copy_chunks(&ctx, &mut buf).unwrap();
        (ctx, buf)
    }

    fn global_symbol<'a, 'data>(
        ctx: &'a Context<'data>,
        name: &str,
    ) -> &'a crate::symbol::Symbol<'data> {
        let id = ctx.symbol_db.get(SymbolName::new(name.as_bytes())).unwrap();
        ctx.symbol_db.symbol(id)
    }

    #[test]
    fn test_hello_world_link() {
        let main = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", vec![0x13, 0, 0, 0, 0x13, 0, 0, 0])
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .addralign(4),
            )
            .symbol(SymbolSpec::global("main", ".text", 0))
            .symbol(SymbolSpec::undef("printf"))
            .build();
        let printf = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", vec![0x67, 0x80, 0, 0])
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .addralign(4),
            )
            .symbol(SymbolSpec::global("printf", ".text", 0))
            .build();
        let unused = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", vec![0xaa, 0xaa, 0xaa, 0xaa])
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .addralign(4),
            )
            .symbol(SymbolSpec::global("helper", ".text", 0))
            .build();

        let inputs = [
            object("main.o", main),
            member("libc.a(printf.o)", printf),
            member("libc.a(unused.o)", unused),
        ];
        let (ctx, buf) = link(&inputs);

        // Only the referenced member got pulled in.
        assert_eq!(ctx.live_objects, vec![ObjectId::new(0), ObjectId::new(1)]);
        assert_eq!(global_symbol(&ctx, "printf").file, Some(ObjectId::new(1)));

        // .text holds the two live objects' sections in command-line order.
        let text = ctx.output_sections.find_by_name(".text").unwrap();
        assert_eq!(text.members.len(), 2);
        assert_eq!(text.members[0].file, ObjectId::new(0));
        assert_eq!(text.members[1].file, ObjectId::new(1));
        assert_eq!(text.shdr.size, 12);

        // The image starts with a valid executable header that enters at
        // .text, and the dead member's bytes are nowhere in the file.
        let ehdr: FileHeader = elf::read(&buf).unwrap();
        assert_eq!(ehdr.magic, object::elf::ELFMAG);
        assert_eq!(ehdr.ty, object::elf::ET_EXEC);
        assert_eq!(ehdr.machine, object::elf::EM_RISCV);
        assert_eq!(ehdr.entry_point, text.shdr.address);
        assert!(memchr::memmem::find(&buf, &[0xaa, 0xaa, 0xaa, 0xaa]).is_none());
        let text_file_range = text.shdr.offset as usize..(text.shdr.offset + 4) as usize;
        assert_eq!(&buf[text_file_range], &[0x13, 0, 0, 0]);
    }

    #[test]
    fn test_determinism() {
        let build = || {
            ObjectBuilder::new()
                .section(
                    SectionSpec::new(".rodata.str1.1", b"hi\0there\0".to_vec())
                        .flags(shf::ALLOC | shf::MERGE | shf::STRINGS)
                        .entsize(1),
                )
                .section(SectionSpec::new(".text", vec![0x13, 0, 0, 0]))
                .symbol(SymbolSpec::global("main", ".text", 0))
                .build()
        };
        let a = [object("a.o", build())];
        let b = [object("a.o", build())];
        let (_, buf_a) = link(&a);
        let (_, buf_b) = link(&b);
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn test_string_pool_dedup() {
        let strings = |data: &[u8]| {
            ObjectBuilder::new()
                .section(
                    SectionSpec::new(".rodata.str1.1", data.to_vec())
                        .flags(shf::ALLOC | shf::MERGE | shf::STRINGS)
                        .entsize(1),
                )
                .build()
        };
        let inputs = [
            object("a.o", strings(b"foo\0bar\0")),
            object("b.o", strings(b"bar\0baz\0")),
        ];
        let (ctx, buf) = link(&inputs);

        let msec = ctx
            .merged_sections
            .iter()
            .find(|m| m.name == ".rodata.str")
            .unwrap();
        assert_eq!(msec.pool.len(), 3);
        assert_eq!(msec.shdr.size, 12);
        // Fragments are laid out by (alignment, length, bytes).
        let start = msec.shdr.offset as usize;
        assert_eq!(&buf[start..start + 12], b"bar\0baz\0foo\0");
    }

    #[test]
    fn test_constant_pool_dedup() {
        let constant = || {
            ObjectBuilder::new()
                .section(
                    SectionSpec::new(".rodata.cst8", vec![9, 8, 7, 6, 5, 4, 3, 2])
                        .flags(shf::ALLOC | shf::MERGE)
                        .addralign(8)
                        .entsize(8),
                )
                .build()
        };
        let inputs = [object("a.o", constant()), object("b.o", constant())];
        let (ctx, buf) = link(&inputs);

        let msec = ctx
            .merged_sections
            .iter()
            .find(|m| m.name == ".rodata.cst")
            .unwrap();
        assert_eq!(msec.pool.len(), 1);
        assert_eq!(msec.shdr.size, 8);
        assert_eq!(msec.shdr.alignment, 8);
        let start = msec.shdr.offset as usize;
        assert_eq!(&buf[start..start + 8], &[9, 8, 7, 6, 5, 4, 3, 2]);
    }

    #[test]
    fn test_mergeable_symbol_rebind() {
        let with_sym = ObjectBuilder::new()
            .section(
                SectionSpec::new(".rodata.str1.1", b"aa\0bb\0".to_vec())
                    .flags(shf::ALLOC | shf::MERGE | shf::STRINGS)
                    .entsize(1),
            )
            .symbol(SymbolSpec::global("second_string", ".rodata.str1.1", 3))
            .build();
        let inputs = [object("a.o", with_sym)];
        let (ctx, buf) = link(&inputs);

        let sym = global_symbol(&ctx, "second_string");
        assert!(matches!(
            sym.placement,
            Some(crate::symbol::Placement::Fragment(_))
        ));
        let addr = ctx.symbol_addr(sym);
        let msec = ctx
            .merged_sections
            .iter()
            .find(|m| m.name == ".rodata.str")
            .unwrap();
        let file_pos = (msec.shdr.offset + (addr - msec.shdr.address)) as usize;
        assert_eq!(&buf[file_pos..file_pos + 3], b"bb\0");
    }

    #[test]
    fn test_absolute_relocation() {
        let main = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", vec![0x13, 0, 0, 0])
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .addralign(4),
            )
            .section(
                SectionSpec::new(".data", vec![0; 8])
                    .flags(shf::ALLOC | shf::WRITE)
                    .addralign(8)
                    .rela(0, object::elf::R_RISCV_64, "main", 4),
            )
            .symbol(SymbolSpec::global("main", ".text", 0))
            .build();
        let inputs = [object("main.o", main)];
        let (ctx, buf) = link(&inputs);

        let main_addr = ctx.symbol_addr(global_symbol(&ctx, "main"));
        let data = ctx.output_sections.find_by_name(".data").unwrap();
        let slot = data.shdr.offset as usize;
        let stored = u64::from_le_bytes(buf[slot..slot + 8].try_into().unwrap());
        assert_eq!(stored, main_addr + 4);
    }

    #[test]
    fn test_pcrel_pair() {
        // auipc a0, %pcrel_hi(g); addi a0, a0, %pcrel_lo(label)
        let mut text = Vec::new();
        text.extend_from_slice(&AUIPC_A0.to_le_bytes());
        text.extend_from_slice(&ADDI_A0_A0.to_le_bytes());
        let user = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", text)
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .addralign(4)
                    .rela(0, object::elf::R_RISCV_PCREL_HI20, "g", 0)
                    .rela(4, object::elf::R_RISCV_PCREL_LO12_I, ".L0", 0),
            )
            .symbol(SymbolSpec::local(".L0", ".text", 0))
            .symbol(SymbolSpec::global("start", ".text", 0))
            .build();
        let def = ObjectBuilder::new()
            .section(
                SectionSpec::new(".data", vec![1, 2, 3, 4])
                    .flags(shf::ALLOC | shf::WRITE)
                    .addralign(4),
            )
            .symbol(SymbolSpec::global("g", ".data", 0))
            .build();
        let inputs = [object("user.o", user), object("def.o", def)];
        let (ctx, buf) = link(&inputs);

        let text = ctx.output_sections.find_by_name(".text").unwrap();
        let delta = (ctx.symbol_addr(global_symbol(&ctx, "g")))
            .wrapping_sub(text.shdr.address) as u32;

        let at = text.shdr.offset as usize;
        let auipc = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        let addi = u32::from_le_bytes(buf[at + 4..at + 8].try_into().unwrap());

        // Non-immediate bits are preserved.
        assert_eq!(auipc & 0xfff, AUIPC_A0 & 0xfff);
        assert_eq!(addi & 0xfffff, ADDI_A0_A0 & 0xfffff);
        // The U+I immediates reconstruct the PC-relative delta exactly.
        assert_eq!(auipc & 0xffff_f000, delta.wrapping_add(0x800) & 0xffff_f000);
        let reconstructed =
            (auipc & 0xffff_f000).wrapping_add(sign_extend(u64::from(addi >> 20), 11) as u32);
        assert_eq!(reconstructed, delta);
    }

    #[test]
    fn test_tls_got() {
        let user = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", AUIPC_A0.to_le_bytes().to_vec())
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .addralign(4)
                    .rela(0, object::elf::R_RISCV_TLS_GOT_HI20, "tvar", 0),
            )
            .symbol(SymbolSpec::global("start", ".text", 0))
            .symbol(SymbolSpec::undef("tvar"))
            .build();
        let def = ObjectBuilder::new()
            .section(
                SectionSpec::new(".tdata", vec![5, 6, 7, 8])
                    .flags(shf::ALLOC | shf::WRITE | shf::TLS)
                    .addralign(4),
            )
            .symbol(SymbolSpec::global("tvar", ".tdata", 0))
            .build();
        let inputs = [object("user.o", user), object("def.o", def)];
        let (ctx, buf) = link(&inputs);

        // The symbol got slot 0 of the GOT.
        let tvar = global_symbol(&ctx, "tvar");
        assert_eq!(tvar.got_tp_idx, 0);
        assert_eq!(ctx.got.shdr.size, 8);

        // The thread pointer is the TLS segment's start, and the slot holds
        // the symbol's offset from it.
        let tdata = ctx.output_sections.find_by_name(".tdata").unwrap();
        assert_eq!(ctx.tp_addr, tdata.shdr.address);
        let slot = ctx.got.shdr.offset as usize;
        let stored = u64::from_le_bytes(buf[slot..slot + 8].try_into().unwrap());
        assert_eq!(stored, ctx.symbol_addr(tvar).wrapping_sub(ctx.tp_addr));

        // The relocation site encodes got_slot_addr - pc as a U-type.
        let text = ctx.output_sections.find_by_name(".text").unwrap();
        let at = text.shdr.offset as usize;
        let auipc = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        let delta = ctx.got_tp_addr(tvar).wrapping_sub(text.shdr.address) as u32;
        assert_eq!(auipc & 0xfff, AUIPC_A0 & 0xfff);
        assert_eq!(auipc & 0xffff_f000, delta.wrapping_add(0x800) & 0xffff_f000);

        // A PT_TLS segment covers .tdata.
        let tls = ctx
            .phdr_chunk
            .phdrs
            .iter()
            .find(|p| p.ty == object::elf::PT_TLS)
            .unwrap();
        assert_eq!(tls.virtual_addr, tdata.shdr.address);
    }

    #[test]
    fn test_layout_invariants() {
        let mixed = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", vec![0x13, 0, 0, 0])
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .addralign(4),
            )
            .section(
                SectionSpec::new(".data", vec![1, 2, 3])
                    .flags(shf::ALLOC | shf::WRITE)
                    .addralign(1),
            )
            .section(
                SectionSpec::new(".bss", Vec::new())
                    .ty(object::elf::SHT_NOBITS)
                    .flags(shf::ALLOC | shf::WRITE)
                    .addralign(8)
                    .size(16),
            )
            .section(SectionSpec::new(".comment", b"test\0".to_vec()).flags(0))
            .symbol(SymbolSpec::global("main", ".text", 0))
            .build();
        let other = ObjectBuilder::new()
            .section(
                SectionSpec::new(".data", vec![9; 5])
                    .flags(shf::ALLOC | shf::WRITE)
                    .addralign(4),
            )
            .symbol(SymbolSpec::global("datum", ".data", 0))
            .build();
        let inputs = [object("a.o", mixed), object("b.o", other)];
        let (ctx, _buf) = link(&inputs);

        // All allocated chunks precede non-allocated ones, and the section
        // header chunk is last of all.
        let first_non_alloc = ctx
            .chunks
            .iter()
            .position(|&c| ctx.chunk_shdr(c).flags & shf::ALLOC == 0)
            .unwrap();
        assert!(ctx.chunks[first_non_alloc..ctx.chunks.len() - 1]
            .iter()
            .all(|&c| ctx.chunk_shdr(c).flags & shf::ALLOC == 0));
        assert_eq!(*ctx.chunks.last().unwrap(), Chunk::Shdr);
        assert_eq!(ctx.chunks[0], Chunk::Ehdr);
        assert_eq!(ctx.chunks[1], Chunk::Phdr);

        // In the load region, file offsets mirror memory addresses.
        let base = ctx.chunk_shdr(ctx.chunks[0]).address;
        assert_eq!(base, IMAGE_BASE);
        for &chunk in &ctx.chunks[..first_non_alloc] {
            let shdr = ctx.chunk_shdr(chunk);
            assert_eq!(shdr.offset, shdr.address - base);
            assert_eq!(shdr.address % shdr.alignment, 0);
        }

        // Member offsets within .data are monotonic, aligned, in input
        // order.
        let data = ctx.output_sections.find_by_name(".data").unwrap();
        assert_eq!(data.members.len(), 2);
        let first = ctx.input_section(data.members[0]);
        let second = ctx.input_section(data.members[1]);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 4);
        assert_eq!(second.offset % (1 << second.p2align), 0);
        assert_eq!(data.shdr.size, 9);

        // .bss advances the address cursor but writes nothing.
        let bss = ctx.output_sections.find_by_name(".bss").unwrap();
        assert_eq!(bss.shdr.size, 16);
        assert_eq!(bss.shdr.ty, object::elf::SHT_NOBITS);

        // The header knows how many program headers were emitted.
        let ehdr: FileHeader = elf::read(&_buf).unwrap();
        assert_eq!(
            usize::from(ehdr.program_header_num),
            ctx.phdr_chunk.phdrs.len()
        );
        assert!(ctx
            .phdr_chunk
            .phdrs
            .iter()
            .any(|p| p.ty == object::elf::PT_LOAD));
    }

    #[test]
    fn test_noop_relocations_leave_bytes_unchanged() {
        let main = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", vec![0xef, 0xbe, 0xad, 0xde])
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .addralign(4)
                    .rela(0, object::elf::R_RISCV_NONE, "main", 0)
                    .rela(0, object::elf::R_RISCV_RELAX, "main", 0),
            )
            .symbol(SymbolSpec::global("main", ".text", 0))
            .build();
        let inputs = [object("main.o", main)];
        let (ctx, buf) = link(&inputs);
        let text = ctx.output_sections.find_by_name(".text").unwrap();
        let at = text.shdr.offset as usize;
        assert_eq!(&buf[at..at + 4], &[0xef, 0xbe, 0xad, 0xde]);
    }
}
