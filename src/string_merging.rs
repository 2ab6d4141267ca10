//! Handling for input sections flagged SHF_MERGE. Despite the module name,
//! this covers both string sections (null-terminated elements) and constant
//! pools (fixed-size elements). Each mergeable input section is split into
//! pieces at parse time; a later pass inserts the pieces into a per-output
//! pool that dedupes identical bytes, then symbols that pointed into the
//! original section are rebound to the pooled fragments.

use crate::alignment::align_to;
use crate::context::Context;
use crate::elf::shf;
use crate::elf::SectionHeader;
use crate::error::Result;
use crate::output_sections::get_output_name;
use ahash::AHashMap;
use anyhow::bail;
use anyhow::ensure;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MergedSectionId(u32);

impl MergedSectionId {
    pub(crate) fn new(value: usize) -> MergedSectionId {
        MergedSectionId(u32::try_from(value).expect("too many merged sections"))
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Identifies one deduped piece within a merged section's pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FragmentId {
    pub(crate) merged: MergedSectionId,
    pub(crate) fragment: u32,
}

pub(crate) struct SectionFragment {
    /// Offset within the merged section. Assigned once all pieces have been
    /// pooled.
    pub(crate) offset: u32,
    pub(crate) p2align: u32,
}

pub(crate) struct MergedSection<'data> {
    pub(crate) name: &'data str,
    pub(crate) shdr: SectionHeader,
    /// Piece bytes to fragment index. Keys are compared by exact bytes,
    /// including the null terminator for string pools.
    pub(crate) pool: AHashMap<&'data [u8], u32>,
    pub(crate) fragments: Vec<SectionFragment>,
}

pub(crate) struct MergedSections<'data> {
    sections: Vec<MergedSection<'data>>,
}

/// A mergeable input section after splitting: the pieces, their offsets in
/// the original section and, once registered, the pooled fragment for each
/// piece.
pub(crate) struct MergeableSection<'data> {
    pub(crate) parent: MergedSectionId,
    pub(crate) p2align: u8,
    pub(crate) pieces: Vec<&'data [u8]>,
    pub(crate) piece_offsets: Vec<u32>,
    pub(crate) fragments: Vec<u32>,
}

impl<'data> MergedSections<'data> {
    pub(crate) fn new() -> MergedSections<'data> {
        MergedSections {
            sections: Vec::new(),
        }
    }

    pub(crate) fn get_or_create(
        &mut self,
        name: &'data str,
        ty: u32,
        flags: u64,
    ) -> MergedSectionId {
        let name = get_output_name(name, flags);
        let flags = flags & !(shf::GROUP | shf::MERGE | shf::STRINGS | shf::COMPRESSED);

        if let Some(pos) = self
            .sections
            .iter()
            .position(|msec| msec.name == name && msec.shdr.ty == ty && msec.shdr.flags == flags)
        {
            return MergedSectionId::new(pos);
        }

        let id = MergedSectionId::new(self.sections.len());
        self.sections.push(MergedSection {
            name,
            shdr: SectionHeader {
                ty,
                flags,
                alignment: 1,
                ..Default::default()
            },
            pool: AHashMap::new(),
            fragments: Vec::new(),
        });
        id
    }

    pub(crate) fn section(&self, id: MergedSectionId) -> &MergedSection<'data> {
        &self.sections[id.as_usize()]
    }

    pub(crate) fn section_mut(&mut self, id: MergedSectionId) -> &mut MergedSection<'data> {
        &mut self.sections[id.as_usize()]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &MergedSection<'data>> {
        self.sections.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut MergedSection<'data>> {
        self.sections.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.sections.len()
    }
}

impl<'data> MergedSection<'data> {
    /// Inserts a piece into the pool, returning its fragment index. The
    /// fragment's alignment becomes the maximum that any inserter asked for.
    pub(crate) fn insert(&mut self, key: &'data [u8], p2align: u32) -> u32 {
        let next = self.fragments.len() as u32;
        let idx = *self.pool.entry(key).or_insert(next);
        if idx == next {
            self.fragments.push(SectionFragment {
                offset: u32::MAX,
                p2align: 0,
            });
        }
        let frag = &mut self.fragments[idx as usize];
        frag.p2align = frag.p2align.max(p2align);
        idx
    }

    /// Orders the fragments deterministically and assigns their offsets.
    /// The sort key makes the output byte-reproducible regardless of pool
    /// iteration order.
    pub(crate) fn assign_offsets(&mut self) {
        let mut entries: Vec<(&'data [u8], u32)> =
            self.pool.iter().map(|(key, &idx)| (*key, idx)).collect();
        entries.sort_by(|(key_a, idx_a), (key_b, idx_b)| {
            let align_a = self.fragments[*idx_a as usize].p2align;
            let align_b = self.fragments[*idx_b as usize].p2align;
            align_a
                .cmp(&align_b)
                .then(key_a.len().cmp(&key_b.len()))
                .then(key_a.cmp(key_b))
        });

        let mut offset = 0u64;
        let mut p2align = 0u32;
        for (key, idx) in entries {
            let frag = &mut self.fragments[idx as usize];
            offset = align_to(offset, 1 << frag.p2align);
            frag.offset = offset as u32;
            offset += key.len() as u64;
            p2align = p2align.max(frag.p2align);
        }

        self.shdr.size = align_to(offset, 1 << p2align);
        self.shdr.alignment = 1 << p2align;
    }
}

impl<'data> MergeableSection<'data> {
    /// Finds the piece containing the given offset into the original section
    /// and returns its fragment index along with the offset within the
    /// piece. Returns the exact piece when the offset lands on a boundary.
    pub(crate) fn fragment_at(&self, offset: u32) -> Option<(u32, u32)> {
        let pos = self.piece_offsets.partition_point(|&piece| piece <= offset);
        if pos == 0 {
            return None;
        }
        let idx = pos - 1;
        Some((self.fragments[idx], offset - self.piece_offsets[idx]))
    }
}

/// Splits a mergeable input section into its pieces and hooks it up to its
/// parent merged section.
pub(crate) fn split_section<'data>(
    merged_sections: &mut MergedSections<'data>,
    name: &'data str,
    shdr: &SectionHeader,
    contents: &'data [u8],
    p2align: u8,
) -> Result<MergeableSection<'data>> {
    let parent = merged_sections.get_or_create(name, shdr.ty, shdr.flags);
    let mut m = MergeableSection {
        parent,
        p2align,
        pieces: Vec::new(),
        piece_offsets: Vec::new(),
        fragments: Vec::new(),
    };

    let entsize = shdr.entsize as usize;
    ensure!(entsize > 0, "mergeable section has zero entry size");

    let mut data = contents;
    let mut offset = 0u32;
    if shdr.flags & shf::STRINGS != 0 {
        while !data.is_empty() {
            let Some(end) = find_null(data, entsize) else {
                bail!("string is not null terminated");
            };
            let size = end + entsize;
            m.pieces.push(&data[..size]);
            m.piece_offsets.push(offset);
            data = &data[size..];
            offset += size as u32;
        }
    } else {
        if data.len() % entsize != 0 {
            bail!("section size is not multiple of entsize");
        }
        while !data.is_empty() {
            m.pieces.push(&data[..entsize]);
            m.piece_offsets.push(offset);
            data = &data[entsize..];
            offset += entsize as u32;
        }
    }

    Ok(m)
}

/// Finds the first null terminator in `data` at entry-size granularity.
fn find_null(data: &[u8], entsize: usize) -> Option<usize> {
    if entsize == 1 {
        return memchr::memchr(0, data);
    }

    let mut offset = 0;
    while offset + entsize <= data.len() {
        if data[offset..offset + entsize].iter().all(|&b| b == 0) {
            return Some(offset);
        }
        offset += entsize;
    }
    None
}

#[tracing::instrument(skip_all, name = "Register section pieces")]
pub(crate) fn register_section_pieces(ctx: &mut Context) -> Result {
    let live = ctx.live_objects.clone();
    for oid in live {
        let Context {
            objects,
            merged_sections,
            symbol_db,
            ..
        } = ctx;
        objects[oid.as_usize()].register_section_pieces(merged_sections, symbol_db)?;
    }
    Ok(())
}

#[tracing::instrument(skip_all, name = "Compute merged section sizes")]
pub(crate) fn compute_merged_section_sizes(ctx: &mut Context) {
    for msec in ctx.merged_sections.iter_mut() {
        msec.assign_offsets();
    }
}
