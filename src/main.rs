mod alignment;
mod archive;
mod archive_splitter;
mod args;
mod bit_misc;
mod context;
mod elf;
mod elf_writer;
mod error;
mod file_kind;
mod input_data;
mod layout;
mod object_file;
mod output_sections;
mod program_segments;
mod resolution;
mod riscv64;
mod string_merging;
mod symbol;
mod symbol_db;
mod timing;

use crate::args::Input;
use crate::error::Result;
use crate::file_kind::MachineType;
use anyhow::bail;
use anyhow::Context as _;

fn main() -> Result {
    let args = args::Args::from_env()?;
    timing::init_tracing();
    link(&args)
}

#[tracing::instrument(skip_all, name = "Link")]
fn link(args: &args::Args) -> Result {
    // Without an explicit `-m`, the first positional input that parses as an
    // object decides the target. Only RISC-V 64 is supported either way.
    let mut emulation = args.emulation;
    if emulation == MachineType::None {
        for input in &args.inputs {
            let Input::File(path) = input else {
                continue;
            };
            let contents = std::fs::read(path)
                .with_context(|| format!("Failed to read file `{}`", path.display()))?;
            emulation = MachineType::from_contents(&contents);
            if emulation != MachineType::None {
                break;
            }
        }
    }
    if emulation != MachineType::RiscV64 {
        bail!("unknown emulation type");
    }

    let input_data = input_data::InputData::from_args(args)?;
    let inputs = archive_splitter::split_archives(&input_data)?;

    let mut ctx = context::Context::new();
    object_file::parse_input_files(&mut ctx, &inputs)?;
    resolution::resolve_symbols(&mut ctx)?;
    string_merging::register_section_pieces(&mut ctx)?;
    string_merging::compute_merged_section_sizes(&mut ctx);
    elf_writer::create_synthetic_sections(&mut ctx);
    layout::bin_sections(&mut ctx);
    layout::collect_output_sections(&mut ctx);
    layout::scan_relocations(&mut ctx)?;
    layout::compute_section_sizes(&mut ctx);
    layout::sort_output_sections(&mut ctx);
    elf_writer::update_shdrs(&mut ctx);
    let file_size = layout::set_output_section_offsets(&mut ctx);

    let mut buf = vec![0u8; file_size as usize];
    elf_writer::copy_chunks(&ctx, &mut buf)?;
    elf_writer::write_output(&args.output, &buf)
}
