//! A handwritten parser for our arguments.
//!
//! We don't use a declarative CLI library because we need to parse arguments
//! the same way as the other linkers do: multi-character option names are
//! accepted with either one or two dashes, values can be attached with `=` or
//! smashed directly onto single-character options, and several GNU ld options
//! need to be accepted then deliberately ignored.

use crate::error::Result;
use crate::file_kind::MachineType;
use anyhow::bail;
use normalize_path::NormalizePath;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;

pub(crate) struct Args {
    pub(crate) output: PathBuf,
    pub(crate) emulation: MachineType,
    pub(crate) library_paths: Vec<PathBuf>,
    pub(crate) inputs: Vec<Input>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Input {
    /// A positional input file path.
    File(PathBuf),
    /// `-l NAME`, to be resolved against the library search paths.
    Library(String),
}

struct ArgStream {
    args: VecDeque<String>,
}

impl Args {
    pub(crate) fn from_env() -> Result<Args> {
        Args::parse(std::env::args().skip(1))
    }

    pub(crate) fn parse(input: impl Iterator<Item = String>) -> Result<Args> {
        let mut args = Args {
            output: PathBuf::from("a.out"),
            emulation: MachineType::None,
            library_paths: Vec::new(),
            inputs: Vec::new(),
        };
        let mut stream = ArgStream {
            args: input.collect(),
        };

        while let Some(front) = stream.args.front().cloned() {
            if stream.read_flag("help") {
                println!("usage: rivet [options] file...");
                std::process::exit(0);
            }
            if let Some(value) = stream.read_arg("output")? {
                args.output = PathBuf::from(value);
            } else if let Some(value) = stream.read_arg("o")? {
                args.output = PathBuf::from(value);
            } else if stream.read_flag("v") || stream.read_flag("version") {
                println!("rivet {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            } else if let Some(value) = stream.read_arg("m")? {
                if value == "elf64lriscv" {
                    args.emulation = MachineType::RiscV64;
                } else {
                    bail!("unknown -m argument: {value}");
                }
            } else if let Some(value) = stream.read_arg("L")? {
                args.library_paths.push(Path::new(&value).normalize());
            } else if let Some(value) = stream.read_arg("l")? {
                args.inputs.push(Input::Library(value));
            } else if stream.read_arg("sysroot")?.is_some()
                || stream.read_flag("static")
                || stream.read_arg("plugin")?.is_some()
                || stream.read_arg("plugin-opt")?.is_some()
                || stream.read_flag("as-needed")
                || stream.read_flag("start-group")
                || stream.read_flag("end-group")
                || stream.read_arg("hash-style")?.is_some()
                || stream.read_arg("build-id")?.is_some()
                || stream.read_flag("s")
                || stream.read_flag("no-relax")
            {
                // Accepted, but ignored.
            } else if front.starts_with('-') {
                bail!("unknown command line option: {front}");
            } else {
                stream.args.pop_front();
                args.inputs.push(Input::File(PathBuf::from(front)));
            }
        }

        Ok(args)
    }
}

/// Returns the accepted spellings of an option. Single-character names take
/// one dash; longer names take one or two.
fn dashes(name: &str) -> Vec<String> {
    if name.len() == 1 {
        vec![format!("-{name}")]
    } else {
        vec![format!("-{name}"), format!("--{name}")]
    }
}

impl ArgStream {
    /// Consumes an option that takes no value. Returns whether it matched.
    fn read_flag(&mut self, name: &str) -> bool {
        let Some(front) = self.args.front() else {
            return false;
        };
        if dashes(name).iter().any(|opt| front == opt) {
            self.args.pop_front();
            return true;
        }
        false
    }

    /// Consumes an option that takes a value, either as the following
    /// argument (`-o foo`), attached with `=` (`--output=foo`), or for
    /// single-character options smashed on directly (`-lc`).
    fn read_arg(&mut self, name: &str) -> Result<Option<String>> {
        let Some(front) = self.args.front().cloned() else {
            return Ok(None);
        };
        for opt in dashes(name) {
            if front == opt {
                self.args.pop_front();
                let Some(value) = self.args.pop_front() else {
                    bail!("option -{name}: argument missing");
                };
                return Ok(Some(value));
            }
            let attached = format!("{opt}=");
            if let Some(rest) = front.strip_prefix(&attached) {
                self.args.pop_front();
                return Ok(Some(rest.to_owned()));
            }
            if name.len() == 1 {
                if let Some(rest) = front.strip_prefix(&opt) {
                    if !rest.is_empty() {
                        self.args.pop_front();
                        return Ok(Some(rest.to_owned()));
                    }
                }
            }
        }
        Ok(None)
    }
}
