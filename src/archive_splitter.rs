//! Turns the loaded input files into a flat sequence of relocatable object
//! blobs: plain objects pass straight through, archives contribute one blob
//! per member. Members start out dead; liveness analysis decides which ones
//! actually join the link.

use crate::archive::ArchiveEntry;
use crate::archive::ArchiveIterator;
use crate::error::Result;
use crate::file_kind::FileKind;
use crate::input_data::InputData;
use anyhow::bail;
use anyhow::ensure;
use anyhow::Context as _;

pub(crate) struct InputBytes<'data> {
    pub(crate) name: String,
    pub(crate) data: &'data [u8],
    pub(crate) from_archive: bool,
}

#[tracing::instrument(skip_all, name = "Split archives")]
pub(crate) fn split_archives(input_data: &InputData) -> Result<Vec<InputBytes>> {
    let mut inputs = Vec::new();
    for file in &input_data.files {
        match FileKind::identify_bytes(&file.data) {
            FileKind::ElfObject => inputs.push(InputBytes {
                name: file.filename.display().to_string(),
                data: &file.data,
                from_archive: false,
            }),
            FileKind::Archive => {
                let mut extended_filenames = None;
                for entry in ArchiveIterator::from_archive_bytes(&file.data)? {
                    let entry = entry.with_context(|| {
                        format!("Failed to read archive `{}`", file.filename.display())
                    })?;
                    match entry {
                        ArchiveEntry::Regular(content) => {
                            ensure!(
                                FileKind::identify_bytes(content.entry_data)
                                    == FileKind::ElfObject,
                                "archive member is not a relocatable object in `{}`",
                                file.filename.display()
                            );
                            let member = String::from_utf8_lossy(
                                content.identifier(extended_filenames).as_slice(),
                            )
                            .into_owned();
                            inputs.push(InputBytes {
                                name: format!("{}({member})", file.filename.display()),
                                data: content.entry_data,
                                from_archive: true,
                            });
                        }
                        ArchiveEntry::Filenames(table) => extended_filenames = Some(table),
                        ArchiveEntry::Symbols(_) => {}
                    }
                }
            }
            FileKind::Empty | FileKind::Unknown => {
                bail!("unknown file type: {}", file.filename.display())
            }
        }
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::fixtures::build_archive;
    use crate::elf::fixtures::ObjectBuilder;
    use crate::input_data::InputFile;
    use std::path::PathBuf;

    #[test]
    fn test_objects_and_archives() {
        let obj = ObjectBuilder::new().build();
        let member = ObjectBuilder::new().build();
        let archive = build_archive(&[("m.o", &member)]);
        let input_data = InputData {
            files: vec![
                InputFile {
                    filename: PathBuf::from("a.o"),
                    data: obj,
                },
                InputFile {
                    filename: PathBuf::from("libx.a"),
                    data: archive,
                },
            ],
        };
        let inputs = split_archives(&input_data).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(!inputs[0].from_archive);
        assert_eq!(inputs[0].name, "a.o");
        assert!(inputs[1].from_archive);
        assert_eq!(inputs[1].name, "libx.a(m.o)");
    }

    #[test]
    fn test_non_object_member_is_fatal() {
        let archive = build_archive(&[("junk.txt", b"hello")]);
        let input_data = InputData {
            files: vec![InputFile {
                filename: PathBuf::from("libjunk.a"),
                data: archive,
            }],
        };
        assert!(split_archives(&input_data).is_err());
    }

    #[test]
    fn test_unknown_file_is_fatal() {
        let input_data = InputData {
            files: vec![InputFile {
                filename: PathBuf::from("README"),
                data: b"not an object".to_vec(),
            }],
        };
        assert!(split_archives(&input_data).is_err());
    }
}
