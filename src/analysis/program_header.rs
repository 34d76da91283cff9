use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// One entry of the program-header table, in the schema shared by the
/// in-process ELF reader and the `readelf -lW` fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramHeader {
    pub kind: String,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub flags: String,
    pub align: u64,
}

/// Builds the 9-dimensional program-header summary vector.
///
/// Order: segment count, mean/std-dev of mem_size, 25th/50th/75th
/// percentiles (nearest rank), executable fraction, writable fraction,
/// total file size over total mem size. Empty input yields an empty vector.
pub fn feature_vector(headers: &[ProgramHeader]) -> Vec<f64> {
    if headers.is_empty() {
        return Vec::new();
    }
    let n = headers.len();
    let mem_sizes: Vec<u64> = headers.iter().map(|h| h.mem_size).collect();
    let total_mem: u64 = mem_sizes.iter().sum();
    let total_file: u64 = headers.iter().map(|h| h.file_size).sum();

    let mean = total_mem as f64 / n as f64;
    let variance = mem_sizes
        .iter()
        .map(|&m| {
            let d = m as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    let std_dev = variance.sqrt();

    let mut sorted = mem_sizes.clone();
    sorted.sort_unstable();
    let percentile = |q: f64| sorted[(q * (n - 1) as f64).round() as usize] as f64;

    let flag_fraction = |flag: char| {
        headers.iter().filter(|h| h.flags.contains(flag)).count() as f64 / n as f64
    };

    let ratio = if total_mem > 0 {
        total_file as f64 / total_mem as f64
    } else {
        0.0
    };

    vec![
        n as f64,
        mean,
        std_dev,
        percentile(0.25),
        percentile(0.50),
        percentile(0.75),
        flag_fraction('E'),
        flag_fraction('W'),
        ratio,
    ]
}

/// Extracts program headers by invoking the external `readelf -lW` command.
///
/// Used when the in-process reader could not parse the file; the tool is
/// more permissive about damaged section tables.
pub fn from_readelf(path: &Path) -> Result<Vec<ProgramHeader>> {
    let readelf = which::which("readelf")
        .map_err(|e| AnalysisError::ExternalToolFailure(format!("readelf: {e}")))?;
    let output = Command::new(readelf)
        .arg("-lW")
        .arg(path)
        .output()
        .map_err(|e| AnalysisError::ExternalToolFailure(format!("readelf: {e}")))?;
    if !output.status.success() {
        return Err(AnalysisError::ExternalToolFailure(format!(
            "readelf exited with {} for {}",
            output.status,
            path.display()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_readelf_output(stdout.lines()))
}

/// Parses the columnar `readelf -lW` output into program headers.
///
/// Lines with malformed hex columns are skipped rather than failing the
/// whole table.
pub fn parse_readelf_output<'a, I>(lines: I) -> Vec<ProgramHeader>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut result = Vec::new();
    let mut lines = lines.into_iter();

    if !lines.any(|l| l.contains("Program Headers:")) {
        return result;
    }
    for line in lines.by_ref() {
        if line.trim_start().starts_with("Type") {
            break;
        }
    }

    for line in lines {
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with("Section to") {
            break;
        }
        // interpreter annotation lines
        if raw.starts_with('[') {
            continue;
        }
        let cols: Vec<&str> = raw.split_whitespace().collect();
        // Type, Offset, VirtAddr, PhysAddr, FileSiz, MemSiz, Flags.., Align
        if cols.len() < 8 {
            continue;
        }
        let align_tok = cols[cols.len() - 1];
        if !align_tok.starts_with("0x") || align_tok.len() < 3 {
            continue;
        }
        let hex = |tok: &str| -> Option<u64> {
            u64::from_str_radix(tok.strip_prefix("0x")?, 16).ok()
        };
        let parsed = (|| {
            Some(ProgramHeader {
                kind: cols[0].to_string(),
                offset: hex(cols[1])?,
                vaddr: hex(cols[2])?,
                paddr: hex(cols[3])?,
                file_size: hex(cols[4])?,
                mem_size: hex(cols[5])?,
                flags: cols[6..cols.len() - 1].join(" "),
                align: hex(align_tok)?,
            })
        })();
        if let Some(header) = parsed {
            result.push(header);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(file_size: u64, mem_size: u64, flags: &str) -> ProgramHeader {
        ProgramHeader {
            kind: "LOAD".into(),
            offset: 0,
            vaddr: 0,
            paddr: 0,
            file_size,
            mem_size,
            flags: flags.into(),
            align: 0x1000,
        }
    }

    #[test]
    fn empty_table_yields_empty_vector() {
        assert!(feature_vector(&[]).is_empty());
    }

    #[test]
    fn vector_has_nine_dimensions() {
        let headers = vec![segment(10, 20, "R E"), segment(30, 40, "RW")];
        assert_eq!(feature_vector(&headers).len(), 9);
    }

    #[test]
    fn summary_statistics_are_exact() {
        let headers = vec![
            segment(100, 100, "R E"),
            segment(200, 200, "R"),
            segment(50, 300, "RW"),
        ];
        let v = feature_vector(&headers);
        assert_eq!(v[0], 3.0);
        assert_eq!(v[1], 200.0);
        let expected_std = (((100.0f64 - 200.0).powi(2)
            + (200.0f64 - 200.0).powi(2)
            + (300.0f64 - 200.0).powi(2))
            / 3.0)
            .sqrt();
        assert!((v[2] - expected_std).abs() < 1e-12);
        // nearest-rank percentiles over [100, 200, 300]
        assert_eq!(v[3], 200.0); // round(0.25 * 2) = 1
        assert_eq!(v[4], 200.0);
        assert_eq!(v[5], 300.0); // round(0.75 * 2) = 2
        assert!((v[6] - 1.0 / 3.0).abs() < 1e-12);
        assert!((v[7] - 1.0 / 3.0).abs() < 1e-12);
        assert!((v[8] - 350.0 / 600.0).abs() < 1e-12);
    }

    #[test]
    fn zero_mem_total_yields_zero_ratio() {
        let headers = vec![segment(10, 0, "R")];
        let v = feature_vector(&headers);
        assert_eq!(v[8], 0.0);
    }

    #[test]
    fn parses_readelf_columns() {
        let output = "\
Elf file type is EXEC (Executable file)
Entry point 0x401000
There are 3 program headers, starting at offset 64

Program Headers:
  Type           Offset   VirtAddr           PhysAddr           FileSiz  MemSiz   Flg Align
  PHDR           0x000040 0x0000000000400040 0x0000000000400040 0x0000a8 0x0000a8 R   0x8
  INTERP         0x0000e8 0x00000000004000e8 0x00000000004000e8 0x00001c 0x00001c R   0x1
      [Requesting program interpreter: /lib64/ld-linux-x86-64.so.2]
  LOAD           0x000000 0x0000000000400000 0x0000000000400000 0x000500 0x000600 R E 0x1000

 Section to Segment mapping:
  Segment Sections...
   00
";
        let headers = parse_readelf_output(output.lines());
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].kind, "PHDR");
        assert_eq!(headers[0].offset, 0x40);
        assert_eq!(headers[1].kind, "INTERP");
        assert_eq!(headers[2].flags, "R E");
        assert_eq!(headers[2].file_size, 0x500);
        assert_eq!(headers[2].mem_size, 0x600);
        assert_eq!(headers[2].align, 0x1000);
    }

    #[test]
    fn tolerates_missing_table_and_bad_rows() {
        assert!(parse_readelf_output("no headers here".lines()).is_empty());
        let mangled = "\
Program Headers:
  Type           Offset   VirtAddr           PhysAddr           FileSiz  MemSiz   Flg Align
  LOAD           0xZZZZZZ 0x0000000000400000 0x0000000000400000 0x000500 0x000600 R E 0x1000
  LOAD           0x000000 0x0000000000400000 0x0000000000400000 0x000500 0x000600 R E 4096
";
        assert!(parse_readelf_output(mangled.lines()).is_empty());
    }
}
