//! Parsing of relocatable object files into the linker's object model: the
//! section header array, the input sections we care about, the local symbol
//! storage and the aliases into the global symbol directory.

use crate::archive_splitter::InputBytes;
use crate::context::Context;
use crate::context::ObjectId;
use crate::elf;
use crate::elf::shf;
use crate::elf::FileHeader;
use crate::elf::Rela;
use crate::elf::SectionHeader;
use crate::elf::SymtabEntry;
use crate::error::Result;
use crate::file_kind::MachineType;
use crate::output_sections::OutputSectionId;
use crate::output_sections::OutputSections;
use crate::string_merging;
use crate::string_merging::FragmentId;
use crate::string_merging::MergeableSection;
use crate::string_merging::MergedSections;
use crate::symbol::Placement;
use crate::symbol::Symbol;
use crate::symbol::SymbolName;
use crate::symbol::SymbolRef;
use crate::symbol::NEEDS_GOT_TP;
use crate::symbol_db::SymbolDb;
use anyhow::bail;
use anyhow::ensure;
use anyhow::Context as _;

/// Identifies an input section as its owning object plus the section header
/// index within that object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct InputSectionId {
    pub(crate) file: ObjectId,
    pub(crate) shndx: u32,
}

pub(crate) struct ObjectFile<'data> {
    pub(crate) name: String,
    pub(crate) data: &'data [u8],
    pub(crate) ehdr_flags: u32,
    pub(crate) elf_sections: Vec<SectionHeader>,
    pub(crate) shstrtab: &'data [u8],
    pub(crate) symtab_sec: Option<usize>,
    pub(crate) elf_syms: Vec<SymtabEntry>,
    pub(crate) first_global: usize,
    pub(crate) symbol_strtab: &'data [u8],
    pub(crate) is_alive: bool,
    /// Aliases for every symbol table entry; locals point at
    /// `local_symbols`, globals at the context's directory.
    pub(crate) symbols: Vec<SymbolRef>,
    pub(crate) local_symbols: Vec<Symbol<'data>>,
    pub(crate) symtab_shndx: Vec<u32>,
    /// One slot per section header; sections we don't link stay `None`.
    pub(crate) sections: Vec<Option<InputSection<'data>>>,
    pub(crate) mergeable_sections: Vec<Option<MergeableSection<'data>>>,
}

pub(crate) struct InputSection<'data> {
    pub(crate) file: ObjectId,
    pub(crate) shndx: u32,
    pub(crate) contents: &'data [u8],
    pub(crate) sh_size: u64,
    pub(crate) is_alive: bool,
    pub(crate) p2align: u8,
    /// Offset within the owning output section, assigned during layout.
    pub(crate) offset: u64,
    pub(crate) output_section: OutputSectionId,
    /// Index of the SHT_RELA section targeting this section, if any.
    pub(crate) relsec_idx: u32,
    pub(crate) rels: Option<Vec<Rela>>,
}

impl<'data> InputSection<'data> {
    fn new(
        output_sections: &mut OutputSections<'data>,
        name: &'data str,
        shdr: &SectionHeader,
        file: ObjectId,
        shndx: u32,
        contents: &'data [u8],
    ) -> Result<InputSection<'data>> {
        ensure!(
            shdr.flags & shf::COMPRESSED == 0,
            "compressed sections are not supported"
        );
        Ok(InputSection {
            file,
            shndx,
            contents,
            sh_size: shdr.size,
            is_alive: true,
            p2align: crate::alignment::to_p2align(shdr.alignment),
            offset: u64::MAX,
            output_section: output_sections.get_or_create(name, shdr.ty, shdr.flags),
            relsec_idx: u32::MAX,
            rels: None,
        })
    }
}

impl<'data> ObjectFile<'data> {
    /// Decodes the file and section headers. The rest of parsing happens in
    /// `parse` once the object has an ID.
    pub(crate) fn new(name: String, data: &'data [u8], is_alive: bool) -> Result<ObjectFile<'data>> {
        if data.len() < elf::FILE_HEADER_SIZE {
            bail!("file too small");
        }
        if !elf::check_magic(data) {
            bail!("not an ELF file");
        }

        let ehdr: FileHeader = elf::read(data)?;
        let shoff = ehdr.section_header_offset as usize;
        let shdr0: SectionHeader = elf::read(data.get(shoff..).unwrap_or(&[]))
            .context("section header table is out of range")?;

        // An e_shnum of zero means the real count is in section header 0.
        let num_sections = if ehdr.section_header_num == 0 {
            shdr0.size as usize
        } else {
            ehdr.section_header_num as usize
        };
        let Some(table) = data
            .get(shoff..)
            .and_then(|d| d.get(..num_sections * elf::SECTION_HEADER_SIZE))
        else {
            bail!("section header table is out of range");
        };
        let elf_sections: Vec<SectionHeader> = elf::read_slice(table, elf::SECTION_HEADER_SIZE)?;

        let shstrndx = if ehdr.section_names_index == object::elf::SHN_XINDEX {
            shdr0.link as usize
        } else {
            ehdr.section_names_index as usize
        };
        let Some(shstrtab_shdr) = elf_sections.get(shstrndx) else {
            bail!("section name string table index is out of range");
        };
        let shstrtab = section_bytes(data, shstrtab_shdr)?;

        Ok(ObjectFile {
            name,
            data,
            ehdr_flags: ehdr.flags,
            elf_sections,
            shstrtab,
            symtab_sec: None,
            elf_syms: Vec::new(),
            first_global: 0,
            symbol_strtab: &[],
            is_alive,
            symbols: Vec::new(),
            local_symbols: Vec::new(),
            symtab_shndx: Vec::new(),
            sections: Vec::new(),
            mergeable_sections: Vec::new(),
        })
    }

    pub(crate) fn parse(
        &mut self,
        this: ObjectId,
        output_sections: &mut OutputSections<'data>,
        merged_sections: &mut MergedSections<'data>,
        symbol_db: &mut SymbolDb<'data>,
    ) -> Result {
        if let Some(symtab_idx) = self.find_section(object::elf::SHT_SYMTAB) {
            let shdr = self.elf_sections[symtab_idx];
            self.symtab_sec = Some(symtab_idx);
            self.first_global = shdr.info as usize;
            self.elf_syms = elf::read_slice(
                self.section_bytes(&shdr)?,
                elf::SYMTAB_ENTRY_SIZE,
            )?;
            ensure!(
                self.first_global <= self.elf_syms.len(),
                "corrupt symbol table"
            );
            let Some(strtab_shdr) = self.elf_sections.get(shdr.link as usize) else {
                bail!("symbol string table index is out of range");
            };
            self.symbol_strtab = section_bytes(self.data, strtab_shdr)?;
        }

        self.initialize_sections(this, output_sections)?;
        self.initialize_symbols(this, symbol_db)?;
        self.initialize_mergeable_sections(merged_sections)?;
        self.skip_eh_frame_sections()?;
        Ok(())
    }

    pub(crate) fn section_bytes(&self, shdr: &SectionHeader) -> Result<&'data [u8]> {
        section_bytes(self.data, shdr)
    }

    pub(crate) fn section_name(&self, shndx: usize) -> Result<&'data str> {
        elf::get_name(self.shstrtab, self.elf_sections[shndx].name)
    }

    fn find_section(&self, ty: u32) -> Option<usize> {
        self.elf_sections.iter().position(|shdr| shdr.ty == ty)
    }

    fn initialize_sections(
        &mut self,
        this: ObjectId,
        output_sections: &mut OutputSections<'data>,
    ) -> Result {
        self.sections = (0..self.elf_sections.len()).map(|_| None).collect();
        for i in 0..self.elf_sections.len() {
            let shdr = self.elf_sections[i];
            match shdr.ty {
                object::elf::SHT_GROUP
                | object::elf::SHT_SYMTAB
                | object::elf::SHT_STRTAB
                | object::elf::SHT_REL
                | object::elf::SHT_RELA
                | object::elf::SHT_NULL => {}
                object::elf::SHT_SYMTAB_SHNDX => {
                    self.symtab_shndx = elf::read_slice(self.section_bytes(&shdr)?, 4)?;
                }
                _ => {
                    let name = elf::get_name(self.shstrtab, shdr.name)?;
                    let contents = self.section_bytes(&shdr)?;
                    self.sections[i] = Some(InputSection::new(
                        output_sections,
                        name,
                        &shdr,
                        this,
                        i as u32,
                        contents,
                    )?);
                }
            }
        }

        // Attach each relocation section to the section it relocates.
        for i in 0..self.elf_sections.len() {
            let shdr = self.elf_sections[i];
            if shdr.ty != object::elf::SHT_RELA {
                continue;
            }
            ensure!(
                (shdr.info as usize) < self.sections.len(),
                "relocation section target is out of range"
            );
            if let Some(target) = self.sections[shdr.info as usize].as_mut() {
                ensure!(
                    target.relsec_idx == u32::MAX,
                    "multiple relocation sections target one section"
                );
                target.relsec_idx = i as u32;
            }
        }
        Ok(())
    }

    fn initialize_symbols(&mut self, this: ObjectId, symbol_db: &mut SymbolDb<'data>) -> Result {
        if self.symtab_sec.is_none() {
            return Ok(());
        }

        self.local_symbols = Vec::with_capacity(self.first_global);
        if self.first_global > 0 {
            // Entry 0 is the null symbol.
            let mut null_sym = Symbol::new(SymbolName::new(&[]));
            null_sym.file = Some(this);
            self.local_symbols.push(null_sym);
        }
        for i in 1..self.first_global {
            let esym = self.elf_syms[i];
            let name = elf::get_name(self.symbol_strtab, esym.name)?;
            let mut sym = Symbol::new(SymbolName::new(name.as_bytes()));
            sym.file = Some(this);
            sym.value = esym.value;
            sym.sym_idx = i;
            if !esym.is_abs() {
                let shndx = self.shndx_of(&esym, i);
                if self.sections.get(shndx).is_some_and(Option::is_some) {
                    sym.placement = Some(Placement::Section(InputSectionId {
                        file: this,
                        shndx: shndx as u32,
                    }));
                }
            }
            self.local_symbols.push(sym);
        }

        self.symbols = Vec::with_capacity(self.elf_syms.len());
        for i in 0..self.local_symbols.len() {
            self.symbols.push(SymbolRef::Local(i as u32));
        }
        for i in self.first_global..self.elf_syms.len() {
            let esym = self.elf_syms[i];
            let name = elf::get_name(self.symbol_strtab, esym.name)?;
            let id = symbol_db.get_or_create(SymbolName::new(name.as_bytes()))?;
            self.symbols.push(SymbolRef::Global(id));
        }
        Ok(())
    }

    fn initialize_mergeable_sections(&mut self, merged_sections: &mut MergedSections<'data>) -> Result {
        self.mergeable_sections = (0..self.sections.len()).map(|_| None).collect();
        for i in 0..self.sections.len() {
            if !matches!(&self.sections[i], Some(isec) if isec.is_alive) {
                continue;
            }
            let shdr = self.elf_sections[i];
            if shdr.flags & shf::MERGE == 0 {
                continue;
            }
            let name = elf::get_name(self.shstrtab, shdr.name)?;
            let contents = self.section_bytes(&shdr)?;
            let p2align = self.sections[i].as_ref().unwrap().p2align;
            self.mergeable_sections[i] = Some(string_merging::split_section(
                merged_sections,
                name,
                &shdr,
                contents,
                p2align,
            )?);
            // The section's bytes now get emitted through the merged section.
            self.sections[i].as_mut().unwrap().is_alive = false;
        }
        Ok(())
    }

    fn skip_eh_frame_sections(&mut self) -> Result {
        for i in 0..self.sections.len() {
            if !matches!(&self.sections[i], Some(isec) if isec.is_alive) {
                continue;
            }
            if self.section_name(i)? == ".eh_frame" {
                self.sections[i].as_mut().unwrap().is_alive = false;
            }
        }
        Ok(())
    }

    /// Resolves a symbol's section header index, following the extended
    /// index table when the symbol table uses SHN_XINDEX.
    pub(crate) fn shndx_of(&self, esym: &SymtabEntry, idx: usize) -> usize {
        if esym.shndx == object::elf::SHN_XINDEX {
            self.symtab_shndx.get(idx).copied().unwrap_or(0) as usize
        } else {
            esym.shndx as usize
        }
    }

    /// Binds each global this object defines, unless some earlier object
    /// already claimed it. First definer wins.
    pub(crate) fn resolve_symbols(&self, this: ObjectId, symbol_db: &mut SymbolDb<'data>) {
        for i in self.first_global..self.elf_syms.len() {
            let esym = self.elf_syms[i];
            if esym.is_undef() {
                continue;
            }

            let mut placement = None;
            if !esym.is_abs() {
                let shndx = self.shndx_of(&esym, i);
                if !self.sections.get(shndx).is_some_and(Option::is_some) {
                    continue;
                }
                placement = Some(Placement::Section(InputSectionId {
                    file: this,
                    shndx: shndx as u32,
                }));
            }

            let SymbolRef::Global(id) = self.symbols[i] else {
                continue;
            };
            let sym = symbol_db.symbol_mut(id);
            if sym.file.is_none() {
                sym.file = Some(this);
                sym.placement = placement;
                sym.value = esym.value;
                sym.sym_idx = i;
            }
        }
    }

    /// Un-binds every global that this (dead) object defined, so that the
    /// definitions of discarded archive members don't leak into the link.
    pub(crate) fn clear_symbols(&self, this: ObjectId, symbol_db: &mut SymbolDb<'data>) {
        let first = self.first_global.min(self.symbols.len());
        for sym_ref in &self.symbols[first..] {
            if let SymbolRef::Global(id) = sym_ref {
                let sym = symbol_db.symbol_mut(*id);
                if sym.file == Some(this) {
                    sym.clear();
                }
            }
        }
    }

    /// Inserts this object's section pieces into their merge pools, then
    /// rebinds symbols that pointed into mergeable sections onto the pooled
    /// fragments.
    pub(crate) fn register_section_pieces(
        &mut self,
        merged_sections: &mut MergedSections<'data>,
        symbol_db: &mut SymbolDb<'data>,
    ) -> Result {
        for m in self.mergeable_sections.iter_mut().flatten() {
            let mut fragments = Vec::with_capacity(m.pieces.len());
            for piece in &m.pieces {
                fragments.push(
                    merged_sections
                        .section_mut(m.parent)
                        .insert(piece, u32::from(m.p2align)),
                );
            }
            m.fragments = fragments;
        }

        for i in 1..self.elf_syms.len() {
            let esym = self.elf_syms[i];
            if esym.is_abs() || esym.is_undef() || esym.is_common() {
                continue;
            }
            let shndx = self.shndx_of(&esym, i);
            let Some(m) = self.mergeable_sections.get(shndx).and_then(Option::as_ref) else {
                continue;
            };
            let Some((fragment, fragment_offset)) = m.fragment_at(esym.value as u32) else {
                bail!("bad symbol value");
            };
            let placement = Placement::Fragment(FragmentId {
                merged: m.parent,
                fragment,
            });
            let sym = match self.symbols[i] {
                SymbolRef::Local(n) => &mut self.local_symbols[n as usize],
                SymbolRef::Global(id) => symbol_db.symbol_mut(id),
            };
            sym.placement = Some(placement);
            sym.value = u64::from(fragment_offset);
        }
        Ok(())
    }

    /// Decodes the relocations of live allocated sections and flags symbols
    /// targeted by TLS GOT relocations.
    pub(crate) fn scan_relocations(&mut self, symbol_db: &mut SymbolDb<'data>) -> Result {
        // Decode first: the relocation bytes live in sections we skipped.
        for i in 0..self.sections.len() {
            let Some(isec) = &self.sections[i] else {
                continue;
            };
            if !isec.is_alive
                || self.elf_sections[i].flags & shf::ALLOC == 0
                || isec.relsec_idx == u32::MAX
                || isec.rels.is_some()
            {
                continue;
            }
            let relsec = self.elf_sections[isec.relsec_idx as usize];
            let rels = elf::read_slice(section_bytes(self.data, &relsec)?, elf::RELA_ENTRY_SIZE)?;
            self.sections[i].as_mut().unwrap().rels = Some(rels);
        }

        for i in 0..self.sections.len() {
            let Some(isec) = &self.sections[i] else {
                continue;
            };
            if !isec.is_alive || self.elf_sections[i].flags & shf::ALLOC == 0 {
                continue;
            }
            for rel in isec.rels.iter().flatten() {
                let sym_ref = *self
                    .symbols
                    .get(rel.sym() as usize)
                    .context("relocation symbol index is out of range")?;
                let sym = match sym_ref {
                    SymbolRef::Local(n) => &mut self.local_symbols[n as usize],
                    SymbolRef::Global(id) => symbol_db.symbol_mut(id),
                };
                if sym.file.is_none() {
                    continue;
                }
                if rel.r_type() == object::elf::R_RISCV_TLS_GOT_HI20 {
                    sym.flags |= NEEDS_GOT_TP;
                }
            }
        }
        Ok(())
    }
}

/// Parses every input blob into an object in the context, checking each one
/// for machine compatibility. Command-line objects start alive, archive
/// members dead.
#[tracing::instrument(skip_all, name = "Parse input files")]
pub(crate) fn parse_input_files<'data>(
    ctx: &mut Context<'data>,
    inputs: &[InputBytes<'data>],
) -> Result {
    for input in inputs {
        ensure!(
            MachineType::from_contents(input.data) == MachineType::RiscV64,
            "incompatible file type: {}",
            input.name
        );
        let this = ObjectId::new(ctx.objects.len());
        let mut obj = ObjectFile::new(input.name.clone(), input.data, !input.from_archive)
            .with_context(|| format!("Failed to parse object file `{}`", input.name))?;
        obj.parse(
            this,
            &mut ctx.output_sections,
            &mut ctx.merged_sections,
            &mut ctx.symbol_db,
        )
        .with_context(|| format!("Failed to parse object file `{}`", input.name))?;
        ctx.objects.push(obj);
    }
    Ok(())
}

fn section_bytes<'data>(data: &'data [u8], shdr: &SectionHeader) -> Result<&'data [u8]> {
    // NOBITS sections occupy no file bytes.
    if shdr.ty == object::elf::SHT_NOBITS {
        return Ok(&[]);
    }
    let start = shdr.offset as usize;
    let end = start + shdr.size as usize;
    if data.len() < end {
        bail!("section header is out of range: {}", shdr.offset);
    }
    Ok(&data[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::fixtures::ObjectBuilder;
    use crate::elf::fixtures::SectionSpec;
    use crate::elf::fixtures::SymbolSpec;

    fn parse_object(data: &[u8]) -> (ObjectFile, OutputSections, MergedSections, SymbolDb) {
        let mut output_sections = OutputSections::new();
        let mut merged_sections = MergedSections::new();
        let mut symbol_db = SymbolDb::new();
        let mut obj = ObjectFile::new("test.o".to_owned(), data, true).unwrap();
        obj.parse(
            ObjectId::new(0),
            &mut output_sections,
            &mut merged_sections,
            &mut symbol_db,
        )
        .unwrap();
        (obj, output_sections, merged_sections, symbol_db)
    }

    #[test]
    fn test_parse_sections_and_symbols() {
        let data = ObjectBuilder::new()
            .section(SectionSpec::new(".text", vec![0; 8]).flags(shf::ALLOC | shf::EXECINSTR))
            .section(
                SectionSpec::new(".data", vec![1, 2, 3, 4]).flags(shf::ALLOC | shf::WRITE),
            )
            .symbol(SymbolSpec::local("local_label", ".text", 4))
            .symbol(SymbolSpec::global("main", ".text", 0))
            .symbol(SymbolSpec::undef("printf"))
            .build();
        let (obj, output_sections, _, symbol_db) = parse_object(&data);

        assert_eq!(obj.first_global, 2);
        assert_eq!(obj.local_symbols.len(), 2);
        assert_eq!(obj.local_symbols[1].value, 4);
        assert!(matches!(
            obj.local_symbols[1].placement,
            Some(Placement::Section(id)) if id.shndx == 1
        ));
        // Symbol and relocation carriers don't become input sections, the
        // others do.
        assert!(obj.sections[1].is_some());
        assert!(obj.sections[2].is_some());
        let symtab = obj.symtab_sec.unwrap();
        assert!(obj.sections[symtab].is_none());
        assert_eq!(output_sections.len(), 2);
        assert!(symbol_db.get(SymbolName::new(b"main")).is_some());
        assert!(symbol_db.get(SymbolName::new(b"printf")).is_some());
    }

    #[test]
    fn test_rela_attachment() {
        let data = ObjectBuilder::new()
            .section(
                SectionSpec::new(".text", vec![0; 8])
                    .flags(shf::ALLOC | shf::EXECINSTR)
                    .rela(0, object::elf::R_RISCV_64, "x", 0),
            )
            .symbol(SymbolSpec::undef("x"))
            .build();
        let (obj, ..) = parse_object(&data);
        let isec = obj.sections[1].as_ref().unwrap();
        assert_ne!(isec.relsec_idx, u32::MAX);
        assert_eq!(
            obj.elf_sections[isec.relsec_idx as usize].ty,
            object::elf::SHT_RELA
        );
    }

    #[test]
    fn test_mergeable_sections_are_split_and_killed() {
        let data = ObjectBuilder::new()
            .section(
                SectionSpec::new(".rodata.str1.1", b"hi\0there\0".to_vec())
                    .flags(shf::ALLOC | shf::MERGE | shf::STRINGS)
                    .entsize(1),
            )
            .build();
        let (obj, _, merged_sections, _) = parse_object(&data);
        let m = obj.mergeable_sections[1].as_ref().unwrap();
        assert_eq!(m.pieces.len(), 2);
        assert!(!obj.sections[1].as_ref().unwrap().is_alive);
        assert_eq!(merged_sections.len(), 1);
    }

    #[test]
    fn test_eh_frame_is_skipped() {
        let data = ObjectBuilder::new()
            .section(SectionSpec::new(".eh_frame", vec![0; 4]))
            .section(SectionSpec::new(".text", vec![0; 4]))
            .build();
        let (obj, ..) = parse_object(&data);
        assert!(!obj.sections[1].as_ref().unwrap().is_alive);
        assert!(obj.sections[2].as_ref().unwrap().is_alive);
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(ObjectFile::new("x".to_owned(), b"tiny", true).is_err());
        let not_elf = vec![0u8; 200];
        assert!(ObjectFile::new("x".to_owned(), &not_elf, true).is_err());
    }
}
