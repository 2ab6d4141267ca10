//! The global symbol directory: a map from symbol names to IDs plus the
//! storage for all global symbols. Whichever object first mentions a name
//! creates the entry; resolution later decides which object defines it.

use crate::error::Result;
use crate::symbol::Symbol;
use crate::symbol::SymbolName;
use anyhow::Context as _;
use std::collections::hash_map;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::hash::Hasher;
use std::num::NonZeroU32;

/// An index into the global symbol storage. This is as opposed to a symbol
/// index within an object file's symbol table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SymbolId(NonZeroU32);

/// The name → ID map. A `SymbolName` already carries the hash of its bytes,
/// computed once at interning time, so the map's hasher just passes that
/// value through rather than hashing the name again on every lookup.
type NameMap<'data> = HashMap<SymbolName<'data>, SymbolId, NameHash>;

/// Hasher and `BuildHasher` in one. `SymbolName`'s `Hash` impl feeds the
/// stored hash in through `write_u64` and `finish` returns it untouched.
#[derive(Default)]
struct NameHash(u64);

impl Hasher for NameHash {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write_u64(&mut self, hash: u64) {
        self.0 = hash;
    }

    fn write(&mut self, _bytes: &[u8]) {
        unreachable!("symbol names hash via write_u64 only");
    }
}

impl BuildHasher for NameHash {
    type Hasher = NameHash;

    fn build_hasher(&self) -> NameHash {
        NameHash::default()
    }
}

pub(crate) struct SymbolDb<'data> {
    symbol_ids: NameMap<'data>,
    symbols: Vec<Symbol<'data>>,
}

impl<'data> SymbolDb<'data> {
    pub(crate) fn new() -> SymbolDb<'data> {
        // Slot 0 is never used. It lets us represent IDs with a NonZeroU32.
        SymbolDb {
            symbol_ids: NameMap::default(),
            symbols: vec![Symbol::new(SymbolName::new(&[]))],
        }
    }

    /// Returns the ID for `name`, creating an unbound symbol if this is the
    /// first time the name has been seen.
    pub(crate) fn get_or_create(&mut self, name: SymbolName<'data>) -> Result<SymbolId> {
        match self.symbol_ids.entry(name) {
            hash_map::Entry::Occupied(entry) => Ok(*entry.get()),
            hash_map::Entry::Vacant(entry) => {
                let symbol_id = self.symbols.len().try_into()?;
                entry.insert(symbol_id);
                self.symbols.push(Symbol::new(name));
                Ok(symbol_id)
            }
        }
    }

    pub(crate) fn get(&self, name: SymbolName<'data>) -> Option<SymbolId> {
        self.symbol_ids.get(&name).copied()
    }

    pub(crate) fn symbol(&self, symbol_id: SymbolId) -> &Symbol<'data> {
        &self.symbols[symbol_id.as_usize()]
    }

    pub(crate) fn symbol_mut(&mut self, symbol_id: SymbolId) -> &mut Symbol<'data> {
        &mut self.symbols[symbol_id.as_usize()]
    }
}

impl SymbolId {
    pub(crate) fn as_usize(self) -> usize {
        self.0.get() as usize
    }
}

impl TryFrom<usize> for SymbolId {
    type Error = anyhow::Error;

    fn try_from(value: usize) -> std::result::Result<Self, Self::Error> {
        Ok(SymbolId(
            NonZeroU32::new(u32::try_from(value).context("Too many symbols")?)
                .context("Attempt to create SymbolId with ID 0")?,
        ))
    }
}
