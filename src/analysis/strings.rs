use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use memmap2::Mmap;

/// Minimum run length, same default as GNU strings.
pub const DEFAULT_MIN_LENGTH: usize = 4;

const CHUNK_SIZE: usize = 64 * 1024;

fn is_printable(b: u8) -> bool {
    (0x20..=0x7E).contains(&b) || b == b'\t'
}

/// Scans a byte slice for maximal runs of printable ASCII of at least
/// `min_length` characters, in file order.
pub fn scan_bytes(bytes: &[u8], min_length: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut run = String::new();
    for &b in bytes {
        if is_printable(b) {
            run.push(b as char);
        } else {
            if run.len() >= min_length {
                out.push(std::mem::take(&mut run));
            } else {
                run.clear();
            }
        }
    }
    if run.len() >= min_length {
        out.push(run);
    }
    out
}

/// Scans a file for printable ASCII strings, memory-mapping it when possible
/// and falling back to chunked buffered reads otherwise.
pub fn scan_file(path: &Path, min_length: usize) -> std::io::Result<Vec<String>> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }
    match unsafe { Mmap::map(&file) } {
        Ok(map) => Ok(scan_bytes(&map, min_length)),
        Err(_) => scan_reader(BufReader::new(file), min_length),
    }
}

/// Buffered scanner that keeps runs intact across chunk boundaries.
fn scan_reader<R: Read>(mut reader: R, min_length: usize) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut run = String::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for &b in &buf[..n] {
            if is_printable(b) {
                run.push(b as char);
            } else {
                if run.len() >= min_length {
                    out.push(std::mem::take(&mut run));
                } else {
                    run.clear();
                }
            }
        }
    }
    if run.len() >= min_length {
        out.push(run);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn emits_runs_in_file_order() {
        let data = b"\x00abcd\x01ef\x02/bin/sh\x00";
        assert_eq!(scan_bytes(data, 4), vec!["abcd", "/bin/sh"]);
    }

    #[test]
    fn tab_counts_as_printable() {
        let data = b"\x00a\tbc\x00";
        assert_eq!(scan_bytes(data, 4), vec!["a\tbc"]);
    }

    #[test]
    fn respects_min_length() {
        let data = b"ab\x00abc\x00abcd";
        assert!(scan_bytes(data, 5).is_empty());
        assert_eq!(scan_bytes(data, 3), vec!["abc", "abcd"]);
    }

    #[test]
    fn run_at_end_of_input_is_emitted() {
        assert_eq!(scan_bytes(b"trailing", 4), vec!["trailing"]);
    }

    #[test]
    fn reader_path_matches_slice_path_across_chunks() {
        // a run that straddles the chunk boundary
        let mut data = vec![0u8; CHUNK_SIZE - 2];
        data.extend_from_slice(b"straddled string\x00tail");
        let from_slice = scan_bytes(&data, 4);
        let from_reader = scan_reader(Cursor::new(&data), 4).unwrap();
        assert_eq!(from_slice, from_reader);
        assert_eq!(from_slice, vec!["straddled string", "tail"]);
    }

    #[test]
    fn scan_file_handles_empty_and_binary_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert!(scan_file(&empty, 4).unwrap().is_empty());

        let bin = dir.path().join("data.bin");
        std::fs::write(&bin, b"\x7fELF\x00\x00usr/lib\x00").unwrap();
        assert_eq!(scan_file(&bin, 4).unwrap(), vec!["usr/lib"]);
    }
}
