use std::fs;
use std::time::Duration;

use elfsim::analysis::{extract, CoderecBridge};
use elfsim::compare::{RatingThresholds, WeightConfig};
use elfsim::export::export_comparisons;
use elfsim::service::Deadline;

fn minimal_elf64(entry: u64) -> Vec<u8> {
    let mut bytes = vec![0u8; 64];
    bytes[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    bytes[4] = 2;
    bytes[5] = 1;
    bytes[6] = 1;
    bytes[16..18].copy_from_slice(&2u16.to_le_bytes());
    bytes[18..20].copy_from_slice(&62u16.to_le_bytes());
    bytes[20..24].copy_from_slice(&1u32.to_le_bytes());
    bytes[24..32].copy_from_slice(&entry.to_le_bytes());
    bytes[52..54].copy_from_slice(&64u16.to_le_bytes());
    bytes
}

#[test]
fn exports_one_json_per_family_member() {
    let bridge = CoderecBridge::disabled();
    let snapshot = vec![
        extract("busybox___x86", &minimal_elf64(0x1000), &bridge).unwrap(),
        extract("dropbear___x86", &minimal_elf64(0x2000), &bridge).unwrap(),
    ];

    let input = tempfile::TempDir::new().unwrap();
    fs::write(input.path().join("busybox___x86_gcc"), minimal_elf64(0x1000)).unwrap();
    fs::write(input.path().join("busybox___arm_clang"), minimal_elf64(0x3000)).unwrap();
    fs::write(input.path().join("dropbear___x86_gcc"), minimal_elf64(0x4000)).unwrap();

    let output = tempfile::TempDir::new().unwrap();
    let summary = export_comparisons(
        &snapshot,
        "busybox",
        input.path(),
        output.path(),
        &bridge,
        &WeightConfig::default(),
        &RatingThresholds::default(),
        Deadline::after(None),
    )
    .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.output_dir, output.path().join("busybox"));

    let exported: Vec<String> = fs::read_dir(&summary.output_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(exported.len(), 2);
    assert!(exported.contains(&"busybox___x86_gcc.json".to_string()));
    assert!(exported.contains(&"busybox___arm_clang.json".to_string()));

    // one comparison per snapshot row, in snapshot order
    let raw = fs::read(summary.output_dir.join("busybox___x86_gcc.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["fileName"], "busybox___x86");
    assert_eq!(rows[1]["fileName"], "dropbear___x86");
    // identical bytes as the first snapshot row: the identity short-circuit
    assert_eq!(rows[0]["similarityScore"], 1.0);
    assert_eq!(rows[0]["similarityRating"], "high");
}

#[test]
fn missing_input_directory_is_rejected() {
    let output = tempfile::TempDir::new().unwrap();
    let result = export_comparisons(
        &[],
        "busybox",
        &output.path().join("does-not-exist"),
        output.path(),
        &CoderecBridge::disabled(),
        &WeightConfig::default(),
        &RatingThresholds::default(),
        Deadline::after(Some(Duration::from_secs(60))),
    );
    assert!(result.is_err());
}
