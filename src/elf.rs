//! Typed, zero-copy-ish views over the bytes of 64-bit little-endian ELF
//! files. Record types are plain-old-data and get decoded with unaligned
//! reads, since nothing in an input file is guaranteed to be aligned once
//! archives enter the picture.

use crate::error::Result;
use anyhow::bail;
use bytemuck::Pod;
use bytemuck::Zeroable;

/// Our starting address in memory. We can pick whatever we like here; a
/// distinctive non-zero value makes it more obvious when a file offset gets
/// mixed up with a memory address.
pub(crate) const IMAGE_BASE: u64 = 0x200000;

pub(crate) const PAGE_SIZE: u64 = 4096;

/// These sizes are from the spec (for 64 bit ELF).
pub(crate) const FILE_HEADER_SIZE: usize = 0x40;
pub(crate) const PROGRAM_HEADER_SIZE: usize = 0x38;
pub(crate) const SECTION_HEADER_SIZE: usize = 0x40;
pub(crate) const SYMTAB_ENTRY_SIZE: usize = 0x18;
pub(crate) const RELA_ENTRY_SIZE: usize = 0x18;

pub(crate) const GOT_ENTRY_SIZE: u64 = 8;

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct FileHeader {
    pub(crate) magic: [u8; 4],
    pub(crate) class: u8,
    pub(crate) data: u8,
    pub(crate) ei_version: u8,
    pub(crate) os_abi: u8,
    pub(crate) abi_version: u8,
    pub(crate) padding: [u8; 7],
    pub(crate) ty: u16,
    pub(crate) machine: u16,
    pub(crate) e_version: u32,
    pub(crate) entry_point: u64,
    pub(crate) program_header_offset: u64,
    pub(crate) section_header_offset: u64,
    pub(crate) flags: u32,
    pub(crate) ehsize: u16,
    pub(crate) program_header_entry_size: u16,
    pub(crate) program_header_num: u16,
    pub(crate) section_header_entry_size: u16,
    pub(crate) section_header_num: u16,
    pub(crate) section_names_index: u16,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct SectionHeader {
    pub(crate) name: u32,
    pub(crate) ty: u32,
    pub(crate) flags: u64,
    pub(crate) address: u64,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) link: u32,
    pub(crate) info: u32,
    pub(crate) alignment: u64,
    pub(crate) entsize: u64,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct SymtabEntry {
    pub(crate) name: u32,
    pub(crate) info: u8,
    pub(crate) other: u8,
    pub(crate) shndx: u16,
    pub(crate) value: u64,
    pub(crate) size: u64,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct Rela {
    pub(crate) offset: u64,
    pub(crate) info: u64,
    pub(crate) addend: u64,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct ProgramHeader {
    pub(crate) ty: u32,
    pub(crate) flags: u32,
    pub(crate) offset: u64,
    pub(crate) virtual_addr: u64,
    pub(crate) physical_addr: u64,
    pub(crate) file_size: u64,
    pub(crate) mem_size: u64,
    pub(crate) alignment: u64,
}

const _ASSERTS: () = {
    assert!(FILE_HEADER_SIZE == std::mem::size_of::<FileHeader>());
    assert!(PROGRAM_HEADER_SIZE == std::mem::size_of::<ProgramHeader>());
    assert!(SECTION_HEADER_SIZE == std::mem::size_of::<SectionHeader>());
    assert!(SYMTAB_ENTRY_SIZE == std::mem::size_of::<SymtabEntry>());
    assert!(RELA_ENTRY_SIZE == std::mem::size_of::<Rela>());
};

/// Section flag bit values.
#[allow(unused)]
pub(crate) mod shf {
    pub(crate) const WRITE: u64 = 0x1;
    pub(crate) const ALLOC: u64 = 0x2;
    pub(crate) const EXECINSTR: u64 = 0x4;
    pub(crate) const MERGE: u64 = 0x10;
    pub(crate) const STRINGS: u64 = 0x20;
    pub(crate) const INFO_LINK: u64 = 0x40;
    pub(crate) const LINK_ORDER: u64 = 0x80;
    pub(crate) const GROUP: u64 = 0x200;
    pub(crate) const TLS: u64 = 0x400;
    pub(crate) const COMPRESSED: u64 = 0x800;
}

impl SymtabEntry {
    pub(crate) fn is_undef(&self) -> bool {
        self.shndx == object::elf::SHN_UNDEF
    }

    pub(crate) fn is_abs(&self) -> bool {
        self.shndx == object::elf::SHN_ABS
    }

    pub(crate) fn is_common(&self) -> bool {
        self.shndx == object::elf::SHN_COMMON
    }
}

impl Rela {
    pub(crate) fn sym(&self) -> u32 {
        (self.info >> 32) as u32
    }

    pub(crate) fn r_type(&self) -> u32 {
        self.info as u32
    }
}

pub(crate) fn check_magic(contents: &[u8]) -> bool {
    contents.starts_with(&object::elf::ELFMAG)
}

/// Decodes a single record from the start of `bytes`.
pub(crate) fn read<T: Pod>(bytes: &[u8]) -> Result<T> {
    let size = std::mem::size_of::<T>();
    let Some(bytes) = bytes.get(..size) else {
        bail!("short read of {size} byte record");
    };
    Ok(bytemuck::pod_read_unaligned(bytes))
}

/// Decodes `bytes` as a sequence of records of the given entry size. The
/// entry size is taken from the input file (`sh_entsize`), so it's checked
/// rather than trusted.
pub(crate) fn read_slice<T: Pod>(bytes: &[u8], entry_size: usize) -> Result<Vec<T>> {
    if entry_size < std::mem::size_of::<T>() {
        bail!("entry size {entry_size} is too small");
    }
    if bytes.len() % entry_size != 0 {
        bail!("section size is not a multiple of its entry size");
    }
    bytes
        .chunks_exact(entry_size)
        .map(|chunk| read(chunk))
        .collect()
}

/// Writes a record into the start of `out`.
pub(crate) fn write<T: Pod>(out: &mut [u8], value: T) {
    let bytes = bytemuck::bytes_of(&value);
    out[..bytes.len()].copy_from_slice(bytes);
}

/// Reads a null-terminated string from a string table.
pub(crate) fn get_name(strtab: &[u8], offset: u32) -> Result<&str> {
    let Some(rest) = strtab.get(offset as usize..) else {
        bail!("string table offset {offset} is out of range");
    };
    let end = memchr::memchr(0, rest).unwrap_or(rest.len());
    Ok(std::str::from_utf8(&rest[..end])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_round_trip() {
        let shdr = SectionHeader {
            name: 7,
            ty: object::elf::SHT_PROGBITS,
            flags: shf::ALLOC | shf::EXECINSTR,
            size: 0x40,
            alignment: 4,
            ..Default::default()
        };
        let mut bytes = vec![0u8; SECTION_HEADER_SIZE + 3];
        write(&mut bytes[3..], shdr);
        // Deliberately decode from an unaligned offset.
        let decoded: SectionHeader = read(&bytes[3..]).unwrap();
        assert_eq!(decoded.name, 7);
        assert_eq!(decoded.flags, shf::ALLOC | shf::EXECINSTR);
        assert_eq!(decoded.alignment, 4);
    }

    #[test]
    fn test_read_slice() {
        let mut bytes = vec![0u8; RELA_ENTRY_SIZE * 2];
        write(
            &mut bytes[RELA_ENTRY_SIZE..],
            Rela {
                offset: 8,
                info: (3u64 << 32) | u64::from(object::elf::R_RISCV_64),
                addend: 4,
            },
        );
        let relas: Vec<Rela> = read_slice(&bytes, RELA_ENTRY_SIZE).unwrap();
        assert_eq!(relas.len(), 2);
        assert_eq!(relas[1].sym(), 3);
        assert_eq!(relas[1].r_type(), object::elf::R_RISCV_64);
        assert!(read_slice::<Rela>(&bytes[1..], RELA_ENTRY_SIZE).is_err());
    }

    #[test]
    fn test_get_name() {
        let strtab = b"\0main\0printf\0";
        assert_eq!(get_name(strtab, 0).unwrap(), "");
        assert_eq!(get_name(strtab, 1).unwrap(), "main");
        assert_eq!(get_name(strtab, 6).unwrap(), "printf");
        assert!(get_name(strtab, 100).is_err());
    }
}
