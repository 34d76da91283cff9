use goblin::elf::header::{EI_ABIVERSION, EI_CLASS, EI_DATA, EI_OSABI, EI_VERSION, ELFCLASS32, ELFDATA2LSB};
use goblin::elf::program_header::{pt_to_str, PF_R, PF_W, PF_X};
use goblin::elf::Elf;

use crate::analysis::program_header::ProgramHeader;
use crate::error::{AnalysisError, Result};

/// Number of doubles in the header feature vector.
pub const HEADER_VECTOR_LEN: usize = 18;

/// Section names tracked by the section-size vector, in vector order.
const TRACKED_SECTIONS: [&str; 6] = [".text", ".rodata", ".data", ".bss", ".symtab", ".shstrtab"];

/// Parses the raw bytes as ELF. Any goblin failure is reported as a parse
/// failure, which the extractor recovers from.
pub fn parse(bytes: &[u8]) -> Result<Elf<'_>> {
    Elf::parse(bytes).map_err(|e| AnalysisError::ParseFailure(e.to_string()))
}

/// Builds the 18-dimensional header feature vector.
///
/// Identification bytes map class to 0 (32-bit) / 1 (64-bit) and data
/// encoding to 0 (LSB) / 1 (MSB); the remaining fields are the header
/// integers cast to double.
pub fn header_vector(elf: &Elf) -> Vec<f64> {
    let ident = &elf.header.e_ident;
    vec![
        if ident[EI_CLASS] == ELFCLASS32 { 0.0 } else { 1.0 },
        if ident[EI_DATA] == ELFDATA2LSB { 0.0 } else { 1.0 },
        f64::from(ident[EI_VERSION]),
        f64::from(ident[EI_OSABI]),
        f64::from(ident[EI_ABIVERSION]),
        f64::from(elf.header.e_type),
        f64::from(elf.header.e_machine),
        f64::from(elf.header.e_version),
        elf.header.e_entry as f64,
        elf.header.e_phoff as f64,
        elf.header.e_shoff as f64,
        f64::from(elf.header.e_flags),
        f64::from(elf.header.e_ehsize),
        f64::from(elf.header.e_phentsize),
        f64::from(elf.header.e_phnum),
        f64::from(elf.header.e_shentsize),
        f64::from(elf.header.e_shnum),
        f64::from(elf.header.e_shstrndx),
    ]
}

/// Builds the 6-dimensional section-size vector, each tracked section's
/// size divided by the upload size. Missing sections contribute 0.
///
/// If the declared section-header table would extend past the end of the
/// file, the vector is all zeros.
pub fn section_size_vector(elf: &Elf, file_size: u64) -> Vec<f64> {
    let mut sizes = vec![0.0; TRACKED_SECTIONS.len()];
    if file_size == 0 {
        return sizes;
    }
    let table_end = elf
        .header
        .e_shoff
        .saturating_add(u64::from(elf.header.e_shnum) * u64::from(elf.header.e_shentsize));
    if table_end > file_size {
        return sizes;
    }
    for section in &elf.section_headers {
        let Some(name) = elf.shdr_strtab.get_at(section.sh_name) else {
            continue;
        };
        if let Some(idx) = TRACKED_SECTIONS.iter().position(|&s| s == name.trim()) {
            if sizes[idx] == 0.0 {
                sizes[idx] = section.sh_size as f64 / file_size as f64;
            }
        }
    }
    sizes
}

/// Maps goblin's program-header table into the shared schema, with
/// readelf-style permission letters in the flags string.
pub fn program_headers(elf: &Elf) -> Vec<ProgramHeader> {
    elf.program_headers
        .iter()
        .map(|ph| {
            let mut flags = String::new();
            if ph.p_flags & PF_R != 0 {
                flags.push('R');
            }
            if ph.p_flags & PF_W != 0 {
                flags.push('W');
            }
            if ph.p_flags & PF_X != 0 {
                flags.push('E');
            }
            ProgramHeader {
                kind: pt_to_str(ph.p_type).to_string(),
                offset: ph.p_offset,
                vaddr: ph.p_vaddr,
                paddr: ph.p_paddr,
                file_size: ph.p_filesz,
                mem_size: ph.p_memsz,
                flags,
                align: ph.p_align,
            }
        })
        .collect()
}
