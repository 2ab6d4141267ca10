//! The shared state that the linker passes operate on: the input objects,
//! the global symbol directory, the output and merged section registries,
//! and the list of chunks that make up the output image.

use crate::elf::SectionHeader;
use crate::elf::GOT_ENTRY_SIZE;
use crate::elf_writer::Chunk;
use crate::elf_writer::GotSection;
use crate::elf_writer::OutputEhdr;
use crate::elf_writer::OutputPhdr;
use crate::elf_writer::OutputShdr;
use crate::object_file::InputSection;
use crate::object_file::InputSectionId;
use crate::object_file::ObjectFile;
use crate::output_sections::OutputSections;
use crate::string_merging::FragmentId;
use crate::string_merging::MergedSections;
use crate::symbol::Placement;
use crate::symbol::Symbol;
use crate::symbol::SymbolRef;
use crate::symbol_db::SymbolDb;

/// An index into the context's object list. Stable for the whole link, even
/// for objects that liveness analysis later discards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ObjectId(u32);

impl ObjectId {
    pub(crate) fn new(value: usize) -> ObjectId {
        ObjectId(u32::try_from(value).expect("too many input objects"))
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct Context<'data> {
    pub(crate) objects: Vec<ObjectFile<'data>>,
    /// The objects that survived liveness analysis, in input order.
    pub(crate) live_objects: Vec<ObjectId>,
    pub(crate) symbol_db: SymbolDb<'data>,
    pub(crate) output_sections: OutputSections<'data>,
    pub(crate) merged_sections: MergedSections<'data>,
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) ehdr_chunk: OutputEhdr,
    pub(crate) phdr_chunk: OutputPhdr,
    pub(crate) shdr_chunk: OutputShdr,
    pub(crate) got: GotSection,
    pub(crate) tp_addr: u64,
}

impl<'data> Context<'data> {
    pub(crate) fn new() -> Context<'data> {
        Context {
            objects: Vec::new(),
            live_objects: Vec::new(),
            symbol_db: SymbolDb::new(),
            output_sections: OutputSections::new(),
            merged_sections: MergedSections::new(),
            chunks: Vec::new(),
            ehdr_chunk: OutputEhdr::new(),
            phdr_chunk: OutputPhdr::new(),
            shdr_chunk: OutputShdr::new(),
            got: GotSection::new(),
            tp_addr: 0,
        }
    }

    pub(crate) fn object(&self, id: ObjectId) -> &ObjectFile<'data> {
        &self.objects[id.as_usize()]
    }

    pub(crate) fn input_section(&self, id: InputSectionId) -> &InputSection<'data> {
        self.objects[id.file.as_usize()].sections[id.shndx as usize]
            .as_ref()
            .expect("input section id refers to a skipped section")
    }

    /// The final address of an input section within the image.
    pub(crate) fn input_section_addr(&self, id: InputSectionId) -> u64 {
        let isec = self.input_section(id);
        let osec = self.output_sections.section(isec.output_section);
        osec.shdr.address + isec.offset
    }

    pub(crate) fn fragment_addr(&self, id: FragmentId) -> u64 {
        let msec = self.merged_sections.section(id.merged);
        msec.shdr.address + u64::from(msec.fragments[id.fragment as usize].offset)
    }

    /// Resolves an entry of an object's symbol array to the actual symbol,
    /// wherever it's stored.
    pub(crate) fn symbol_for(&self, file: ObjectId, index: usize) -> &Symbol<'data> {
        let obj = &self.objects[file.as_usize()];
        match obj.symbols[index] {
            SymbolRef::Local(n) => &obj.local_symbols[n as usize],
            SymbolRef::Global(id) => self.symbol_db.symbol(id),
        }
    }

    pub(crate) fn symbol_for_mut(&mut self, file: ObjectId, index: usize) -> &mut Symbol<'data> {
        let obj = &mut self.objects[file.as_usize()];
        match obj.symbols[index] {
            SymbolRef::Local(n) => &mut obj.local_symbols[n as usize],
            SymbolRef::Global(id) => self.symbol_db.symbol_mut(id),
        }
    }

    pub(crate) fn symbol_addr(&self, sym: &Symbol) -> u64 {
        match sym.placement {
            Some(Placement::Fragment(id)) => self.fragment_addr(id).wrapping_add(sym.value),
            Some(Placement::Section(id)) => self.input_section_addr(id).wrapping_add(sym.value),
            None => sym.value,
        }
    }

    /// The address of a symbol's TLS GOT slot.
    pub(crate) fn got_tp_addr(&self, sym: &Symbol) -> u64 {
        self.got.shdr.address + u64::from(sym.got_tp_idx) * GOT_ENTRY_SIZE
    }

    pub(crate) fn chunk_shdr(&self, chunk: Chunk) -> &SectionHeader {
        match chunk {
            Chunk::Ehdr => &self.ehdr_chunk.shdr,
            Chunk::Phdr => &self.phdr_chunk.shdr,
            Chunk::Shdr => &self.shdr_chunk.shdr,
            Chunk::Got => &self.got.shdr,
            Chunk::Output(id) => &self.output_sections.section(id).shdr,
            Chunk::Merged(id) => &self.merged_sections.section(id).shdr,
        }
    }

    pub(crate) fn chunk_shdr_mut(&mut self, chunk: Chunk) -> &mut SectionHeader {
        match chunk {
            Chunk::Ehdr => &mut self.ehdr_chunk.shdr,
            Chunk::Phdr => &mut self.phdr_chunk.shdr,
            Chunk::Shdr => &mut self.shdr_chunk.shdr,
            Chunk::Got => &mut self.got.shdr,
            Chunk::Output(id) => &mut self.output_sections.section_mut(id).shdr,
            Chunk::Merged(id) => &mut self.merged_sections.section_mut(id).shdr,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn chunk_name(&self, chunk: Chunk) -> &str {
        match chunk {
            Chunk::Ehdr | Chunk::Phdr | Chunk::Shdr => "",
            Chunk::Got => ".got",
            Chunk::Output(id) => self.output_sections.section(id).name,
            Chunk::Merged(id) => self.merged_sections.section(id).name,
        }
    }
}
