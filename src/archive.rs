//! Code to read ar files. We parse the format by hand because we want to
//! borrow the data of each entry rather than copy it out.

use crate::error::Result;
use anyhow::bail;
use anyhow::Context;
use bytemuck::Pod;
use bytemuck::Zeroable;

pub(crate) enum ArchiveEntry<'data> {
    Regular(ArchiveContent<'data>),
    Symbols(SymbolTable<'data>),
    Filenames(ExtendedFilenames<'data>),
}

#[derive(Clone, Copy)]
pub(crate) struct ExtendedFilenames<'data> {
    data: &'data [u8],
}

/// The identifier (generally a filename) of an archive entry. Resolving an
/// identifier that lives in the extended filenames entry is deferred until
/// `as_slice` is called.
#[derive(Clone, Copy)]
pub(crate) struct Identifier<'data> {
    data: &'data [u8],
}

pub(crate) struct ArchiveContent<'data> {
    ident: &'data str,
    pub(crate) entry_data: &'data [u8],
}

pub(crate) struct SymbolTable<'data> {
    #[allow(dead_code)]
    pub(crate) data: &'data [u8],
}

pub(crate) struct ArchiveIterator<'data> {
    data: &'data [u8],
}

#[derive(Zeroable, Pod, Clone, Copy)]
#[repr(C)]
struct EntryHeader {
    ident: [u8; 16],
    _timestamp: [u8; 12],
    _owner_id: [u8; 6],
    _group_id: [u8; 6],
    _mode: [u8; 8],
    size: [u8; 10],
    _end: [u8; 2],
}

const HEADER_SIZE: usize = std::mem::size_of::<EntryHeader>();

const _ASSERTS: () = {
    assert!(HEADER_SIZE == 60);
};

impl<'data> ArchiveIterator<'data> {
    /// Creates an iterator from the bytes of the whole archive, including the
    /// `!<arch>\n` magic.
    pub(crate) fn from_archive_bytes(data: &'data [u8]) -> Result<Self> {
        let Some(data) = data.strip_prefix(&object::archive::MAGIC) else {
            bail!("missing archive header");
        };
        Ok(Self { data })
    }

    fn next_result(&mut self) -> Result<Option<ArchiveEntry<'data>>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        if self.data.len() < HEADER_SIZE {
            bail!("short archive entry header");
        }
        let (header_bytes, rest) = self.data.split_at(HEADER_SIZE);
        let header: EntryHeader = bytemuck::pod_read_unaligned(header_bytes);
        let size = parse_decimal_int(&header.size);
        self.data = rest;
        if self.data.len() < size {
            bail!(
                "archive entry size is {size}, but only {} bytes left",
                self.data.len()
            );
        }
        let ident_bytes = &header_bytes[..16];
        let ident =
            std::str::from_utf8(ident_bytes).context("archive ident is invalid UTF-8")?;
        let ident = ident.trim();
        let entry_data = &self.data[..size];
        let entry = match ident {
            "/" => ArchiveEntry::Symbols(SymbolTable { data: entry_data }),
            "//" => ArchiveEntry::Filenames(ExtendedFilenames { data: entry_data }),
            _ => ArchiveEntry::Regular(ArchiveContent { ident, entry_data }),
        };
        let size_with_padding = size.next_multiple_of(2).min(self.data.len());
        self.data = &self.data[size_with_padding..];
        Ok(Some(entry))
    }
}

fn parse_decimal_int(bytes: &[u8]) -> usize {
    let mut value = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            break;
        }
        value = value * 10 + ((byte - b'0') as usize);
    }
    value
}

impl<'data> ArchiveContent<'data> {
    /// Returns the identifier of this entry. An ident of the form `/N` refers
    /// to offset N within the extended filenames entry.
    pub(crate) fn identifier(
        &self,
        extended_filenames: Option<ExtendedFilenames<'data>>,
    ) -> Identifier<'data> {
        if let Some(filenames) = extended_filenames {
            if let Some(rest) = self.ident.strip_prefix('/') {
                if let Ok(offset) = rest.parse::<usize>() {
                    if offset <= filenames.data.len() {
                        return Identifier {
                            data: &filenames.data[offset..],
                        };
                    }
                }
            }
        }
        Identifier {
            data: self.ident.as_bytes(),
        }
    }
}

impl<'data> Identifier<'data> {
    pub(crate) fn as_slice(&self) -> &'data [u8] {
        let end = memchr::memchr(b'/', self.data).unwrap_or(self.data.len());
        &self.data[..end]
    }
}

impl<'data> Iterator for ArchiveIterator<'data> {
    type Item = Result<ArchiveEntry<'data>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_result().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::fixtures::build_archive;

    fn read_members(data: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut filenames = None;
        let mut contents = Vec::new();
        for entry in ArchiveIterator::from_archive_bytes(data).unwrap() {
            match entry.unwrap() {
                ArchiveEntry::Regular(content) => contents.push(content),
                ArchiveEntry::Symbols(_) => {}
                ArchiveEntry::Filenames(table) => filenames = Some(table),
            }
        }
        contents
            .into_iter()
            .map(|c| {
                (
                    c.identifier(filenames).as_slice().to_owned(),
                    c.entry_data.to_owned(),
                )
            })
            .collect()
    }

    #[test]
    fn test_iterate_archive() {
        let archive = build_archive(&[("a.o", b"aaa"), ("b.o", b"bbbb")]);
        let members = read_members(&archive);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0], (b"a.o".to_vec(), b"aaa".to_vec()));
        assert_eq!(members[1], (b"b.o".to_vec(), b"bbbb".to_vec()));
    }

    #[test]
    fn test_extended_filenames() {
        let long = "a_rather_long_member_name.o";
        let archive = build_archive(&[(long, b"xyz"), ("b.o", b"12")]);
        let members = read_members(&archive);
        assert_eq!(members[0].0, long.as_bytes());
        assert_eq!(members[0].1, b"xyz");
        assert_eq!(members[1].0, b"b.o");
    }

    #[test]
    fn test_missing_magic() {
        assert!(ArchiveIterator::from_archive_bytes(b"not an archive").is_err());
    }

    #[test]
    fn test_truncated_entry() {
        let mut archive = build_archive(&[("a.o", b"aaaa")]);
        archive.truncate(archive.len() - 2);
        let err = ArchiveIterator::from_archive_bytes(&archive)
            .unwrap()
            .find_map(|e| e.err());
        assert!(err.is_some());
    }

    #[test]
    fn test_parse_decimal_int() {
        assert_eq!(parse_decimal_int("123   ".as_bytes()), 123);
        assert_eq!(parse_decimal_int("0   ".as_bytes()), 0);
    }
}
