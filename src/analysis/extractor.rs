use std::collections::BTreeSet;
use std::path::Path;

use crate::analysis::{
    bytes, coderec, elf, minhash::MinHash, program_header, strings, CodeRegion, CoderecBridge,
    FileRecord, RepresentationType,
};
use crate::error::Result;

/// Runs the full fingerprint pipeline for one upload.
///
/// The upload is materialized into a scoped temporary directory so the
/// string scanner, the classifier, and `readelf` all see the same on-disk
/// artifact; the directory is deleted when the extraction ends, on every
/// path.
pub fn extract(filename: &str, raw: &[u8], bridge: &CoderecBridge) -> Result<FileRecord> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join(safe_file_name(filename));
    std::fs::write(&path, raw)?;

    let regions = bridge.classify(&path)?;
    build_record(filename, raw, &path, regions)
}

/// Fingerprints a file already materialized on disk, with its code regions
/// classified up front (the zip-ingest batch path).
pub fn extract_from_path(
    filename: &str,
    path: &Path,
    regions: Vec<CodeRegion>,
) -> Result<FileRecord> {
    let raw = std::fs::read(path)?;
    build_record(filename, &raw, path, regions)
}

fn build_record(
    filename: &str,
    raw: &[u8],
    path: &Path,
    regions: Vec<CodeRegion>,
) -> Result<FileRecord> {
    let sha256 = bytes::sha256_hex(raw);
    let mut record = FileRecord::new(filename, sha256);

    let parsed = match elf::parse(raw) {
        Ok(elf) => Some(elf),
        Err(e) => {
            tracing::debug!("{} did not parse as ELF: {}", filename, e);
            None
        }
    };
    record.parsing_successful = parsed.is_some();

    let scanned = strings::scan_file(path, strings::DEFAULT_MIN_LENGTH)?;
    let tokens: BTreeSet<u32> =
        MinHash::global().tokenize(scanned.iter().map(String::as_str));
    record.add_representation(
        RepresentationType::StringMinhash,
        bytes::pack_ints(&MinHash::global().signature(&tokens)),
    );

    record.add_representation(
        RepresentationType::CodeRegionList,
        coderec::serialize_regions(&regions)?,
    );

    // headers come from the parse tree when it exists, from readelf when the
    // in-process parse failed, and degrade to the empty table otherwise
    let headers = match &parsed {
        Some(elf) => elf::program_headers(elf),
        None => program_header::from_readelf(path).unwrap_or_else(|e| {
            tracing::debug!("readelf fallback failed for {}: {}", filename, e);
            Vec::new()
        }),
    };
    record.add_representation(
        RepresentationType::ProgramHeaderVector,
        bytes::pack_doubles(&program_header::feature_vector(&headers)),
    );

    if let Some(elf) = &parsed {
        record.add_representation(
            RepresentationType::ElfHeaderVector,
            bytes::pack_doubles(&elf::header_vector(elf)),
        );
        record.add_representation(
            RepresentationType::SectionSizeVector,
            bytes::pack_doubles(&elf::section_size_vector(elf, raw.len() as u64)),
        );
    }

    Ok(record)
}

/// Reduces a client-supplied filename to a bare file name component.
fn safe_file_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .unwrap_or_else(|| "upload.bin".to_string())
}
