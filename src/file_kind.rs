//! Code for identifying what sort of file we're dealing with based on the
//! bytes of the file.

use crate::elf;
use crate::elf::FileHeader;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum FileKind {
    Empty,
    ElfObject,
    Archive,
    Unknown,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub(crate) enum MachineType {
    #[default]
    None,
    RiscV64,
}

impl FileKind {
    pub(crate) fn identify_bytes(bytes: &[u8]) -> FileKind {
        if bytes.is_empty() {
            return FileKind::Empty;
        }
        if elf::check_magic(bytes) {
            let Ok(header) = elf::read::<FileHeader>(bytes) else {
                return FileKind::Unknown;
            };
            if header.ty == object::elf::ET_REL {
                return FileKind::ElfObject;
            }
            return FileKind::Unknown;
        }
        if bytes.starts_with(&object::archive::MAGIC) {
            return FileKind::Archive;
        }
        FileKind::Unknown
    }
}

impl MachineType {
    pub(crate) fn from_contents(bytes: &[u8]) -> MachineType {
        if FileKind::identify_bytes(bytes) == FileKind::ElfObject {
            // identify_bytes already checked that a full header is present.
            let header: FileHeader = elf::read(bytes).unwrap();
            if header.machine == object::elf::EM_RISCV && header.class == object::elf::ELFCLASS64 {
                return MachineType::RiscV64;
            }
        }
        MachineType::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::fixtures::ObjectBuilder;

    #[test]
    fn test_identify_bytes() {
        assert_eq!(FileKind::identify_bytes(b""), FileKind::Empty);
        assert_eq!(FileKind::identify_bytes(b"!<arch>\nrest"), FileKind::Archive);
        assert_eq!(FileKind::identify_bytes(b"not elf"), FileKind::Unknown);
        let object = ObjectBuilder::new().build();
        assert_eq!(FileKind::identify_bytes(&object), FileKind::ElfObject);
        // An ELF file that isn't ET_REL isn't an input we accept.
        let mut executable = object.clone();
        executable[16] = object::elf::ET_EXEC as u8;
        assert_eq!(FileKind::identify_bytes(&executable), FileKind::Unknown);
    }

    #[test]
    fn test_machine_type() {
        let object = ObjectBuilder::new().build();
        assert_eq!(MachineType::from_contents(&object), MachineType::RiscV64);
        let mut x86 = object.clone();
        x86[18] = object::elf::EM_X86_64 as u8;
        assert_eq!(MachineType::from_contents(&x86), MachineType::None);
        assert_eq!(MachineType::from_contents(b"!<arch>\n"), MachineType::None);
    }
}
