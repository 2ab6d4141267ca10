//! The registry of output sections, plus the rules for mapping input section
//! names onto output section names.

use crate::elf::shf;
use crate::elf::SectionHeader;
use crate::object_file::InputSectionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct OutputSectionId(u32);

impl OutputSectionId {
    pub(crate) fn new(value: usize) -> OutputSectionId {
        OutputSectionId(u32::try_from(value).expect("too many output sections"))
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct OutputSection<'data> {
    pub(crate) name: &'data str,
    pub(crate) shdr: SectionHeader,
    pub(crate) members: Vec<InputSectionId>,
    pub(crate) idx: OutputSectionId,
}

pub(crate) struct OutputSections<'data> {
    sections: Vec<OutputSection<'data>>,
}

/// Input sections whose names match one of these prefixes (or equal the
/// prefix minus its trailing dot) all collapse into the stem. Order matters:
/// the first match wins.
const PREFIXES: &[&str] = &[
    ".text.",
    ".data.rel.ro.",
    ".data.",
    ".rodata.",
    ".bss.rel.ro.",
    ".bss.",
    ".init_array.",
    ".fini_array.",
    ".tbss.",
    ".tdata.",
    ".gcc_except_table.",
    ".ctors.",
    ".dtors.",
];

/// Maps an input section name to the name of the output section it goes
/// into. Mergeable read-only data is pooled under a fixed name depending on
/// whether it holds strings or fixed-size constants.
pub(crate) fn get_output_name<'data>(name: &'data str, flags: u64) -> &'data str {
    if (name == ".rodata" || name.starts_with(".rodata.")) && flags & shf::MERGE != 0 {
        return if flags & shf::STRINGS != 0 {
            ".rodata.str"
        } else {
            ".rodata.cst"
        };
    }

    for prefix in PREFIXES {
        let stem = &prefix[..prefix.len() - 1];
        if name == stem || name.starts_with(prefix) {
            return stem;
        }
    }

    name
}

impl<'data> OutputSections<'data> {
    pub(crate) fn new() -> OutputSections<'data> {
        OutputSections {
            sections: Vec::new(),
        }
    }

    /// Finds or creates the output section for the given input section key.
    /// The first caller creates the section; its index is creation order.
    pub(crate) fn get_or_create(
        &mut self,
        name: &'data str,
        ty: u32,
        flags: u64,
    ) -> OutputSectionId {
        let name = get_output_name(name, flags);
        let flags = flags & !(shf::GROUP | shf::COMPRESSED | shf::LINK_ORDER);

        if let Some(osec) = self
            .sections
            .iter()
            .find(|osec| osec.name == name && osec.shdr.ty == ty && osec.shdr.flags == flags)
        {
            return osec.idx;
        }

        let idx = OutputSectionId::new(self.sections.len());
        self.sections.push(OutputSection {
            name,
            shdr: SectionHeader {
                ty,
                flags,
                alignment: 1,
                ..Default::default()
            },
            members: Vec::new(),
            idx,
        });
        idx
    }

    pub(crate) fn section(&self, id: OutputSectionId) -> &OutputSection<'data> {
        &self.sections[id.as_usize()]
    }

    pub(crate) fn section_mut(&mut self, id: OutputSectionId) -> &mut OutputSection<'data> {
        &mut self.sections[id.as_usize()]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &OutputSection<'data>> {
        self.sections.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.sections.len()
    }

    pub(crate) fn find_by_name(&self, name: &str) -> Option<&OutputSection<'data>> {
        self.sections.iter().find(|osec| osec.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_output_name() {
        assert_eq!(get_output_name(".text.main", 0), ".text");
        assert_eq!(get_output_name(".text", 0), ".text");
        assert_eq!(get_output_name(".data.rel.ro.foo", 0), ".data.rel.ro");
        assert_eq!(get_output_name(".data.foo", 0), ".data");
        assert_eq!(get_output_name(".tbss.x", 0), ".tbss");
        assert_eq!(get_output_name(".comment", 0), ".comment");
        // Mergeable .rodata maps to a pool name based on SHF_STRINGS.
        assert_eq!(
            get_output_name(".rodata.str1.1", shf::MERGE | shf::STRINGS),
            ".rodata.str"
        );
        assert_eq!(get_output_name(".rodata.cst8", shf::MERGE), ".rodata.cst");
        assert_eq!(get_output_name(".rodata", shf::MERGE), ".rodata.cst");
        // Without SHF_MERGE the ordinary prefix rule applies.
        assert_eq!(get_output_name(".rodata.str1.1", 0), ".rodata");
    }

    #[test]
    fn test_get_or_create_dedups_by_key() {
        let mut sections = OutputSections::new();
        let a = sections.get_or_create(".text.foo", object::elf::SHT_PROGBITS, shf::ALLOC);
        let b = sections.get_or_create(".text.bar", object::elf::SHT_PROGBITS, shf::ALLOC);
        let c = sections.get_or_create(
            ".text",
            object::elf::SHT_PROGBITS,
            shf::ALLOC | shf::GROUP,
        );
        let d = sections.get_or_create(".data", object::elf::SHT_PROGBITS, shf::ALLOC | shf::WRITE);
        assert_eq!(a, b);
        // SHF_GROUP is masked out of the key.
        assert_eq!(a, c);
        assert_ne!(a, d);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections.section(a).name, ".text");
    }
}
