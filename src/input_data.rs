//! Reads the linker's input files into memory. Libraries named with `-l` are
//! resolved against the `-L` search paths here; archive members are carved
//! out later by the archive splitter, borrowing from these buffers.

use crate::args::Args;
use crate::args::Input;
use crate::error::Result;
use anyhow::bail;
use anyhow::Context as _;
use std::path::PathBuf;

pub(crate) struct InputFile {
    pub(crate) filename: PathBuf,
    pub(crate) data: Vec<u8>,
}

pub(crate) struct InputData {
    pub(crate) files: Vec<InputFile>,
}

impl InputData {
    #[tracing::instrument(skip_all, name = "Read input files")]
    pub(crate) fn from_args(args: &Args) -> Result<InputData> {
        let mut files = Vec::new();
        for input in &args.inputs {
            let file = match input {
                Input::File(path) => InputFile {
                    data: std::fs::read(path)
                        .with_context(|| format!("Failed to read file `{}`", path.display()))?,
                    filename: path.clone(),
                },
                Input::Library(name) => find_library(args, name)?,
            };
            files.push(file);
        }
        Ok(InputData { files })
    }
}

/// Searches each library path for `lib<name>.a`; the first one that can be
/// read wins.
fn find_library(args: &Args, name: &str) -> Result<InputFile> {
    for dir in &args.library_paths {
        let candidate = dir.join(format!("lib{name}.a"));
        if let Ok(data) = std::fs::read(&candidate) {
            return Ok(InputFile {
                filename: candidate,
                data,
            });
        }
    }
    bail!("library not found");
}
