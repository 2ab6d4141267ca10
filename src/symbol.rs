use crate::context::ObjectId;
use crate::object_file::InputSectionId;
use crate::string_merging::FragmentId;
use crate::symbol_db::SymbolId;
use std::fmt::Display;
use std::hash::Hasher;

/// Set while scanning relocations on a symbol that needs a TLS GOT slot.
pub(crate) const NEEDS_GOT_TP: u32 = 1 << 0;

/// A symbol name together with a precomputed hash of its bytes. The hash is
/// computed once up-front so that repeated map lookups don't rehash the name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct SymbolName<'data> {
    hash: u64,
    bytes: &'data [u8],
}

impl<'data> std::hash::Hash for SymbolName<'data> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // The stored hash already covers the bytes.
        state.write_u64(self.hash);
    }
}

impl<'data> SymbolName<'data> {
    pub(crate) fn new(bytes: &'data [u8]) -> SymbolName<'data> {
        Self {
            bytes,
            hash: fxhash::hash64(bytes),
        }
    }

    pub(crate) fn bytes(&self) -> &'data [u8] {
        self.bytes
    }
}

impl<'data> Display for SymbolName<'data> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        String::from_utf8_lossy(self.bytes).fmt(f)
    }
}

/// Where a defined symbol's value lives. The two variants are mutually
/// exclusive: a symbol either points into an input section or, after merge
/// pooling, into a section fragment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Placement {
    Section(InputSectionId),
    Fragment(FragmentId),
}

/// A linker symbol. Global symbols live in the context's symbol directory;
/// local symbols live inline in their defining object.
pub(crate) struct Symbol<'data> {
    pub(crate) name: SymbolName<'data>,
    pub(crate) file: Option<ObjectId>,
    pub(crate) value: u64,
    pub(crate) sym_idx: usize,
    pub(crate) got_tp_idx: u32,
    pub(crate) placement: Option<Placement>,
    pub(crate) flags: u32,
}

/// How an entry of an object's symbol array aliases the actual `Symbol`
/// storage: locals index the object's own storage, globals index the
/// context's directory.
#[derive(Clone, Copy)]
pub(crate) enum SymbolRef {
    Local(u32),
    Global(SymbolId),
}

impl<'data> Symbol<'data> {
    pub(crate) fn new(name: SymbolName<'data>) -> Symbol<'data> {
        Self {
            name,
            file: None,
            value: 0,
            sym_idx: usize::MAX,
            got_tp_idx: 0,
            placement: None,
            flags: 0,
        }
    }

    /// Un-binds the symbol. Used when the object that defined it turns out
    /// not to be part of the link.
    pub(crate) fn clear(&mut self) {
        self.file = None;
        self.placement = None;
        self.sym_idx = usize::MAX;
    }
}
