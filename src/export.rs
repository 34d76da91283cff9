use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::analysis::{extract, CoderecBridge, FileRecord};
use crate::compare::{compare_records, RatingThresholds, WeightConfig};
use crate::error::{AnalysisError, Result};
use crate::service::Deadline;

/// Outcome of a family export run.
#[derive(Debug)]
pub struct ExportSummary {
    pub processed: usize,
    pub failed: usize,
    pub output_dir: PathBuf,
}

/// Compares every file of one family in `input_dir` against a preloaded
/// catalog snapshot and writes one JSON document per input into
/// `output_root/<family>/`.
///
/// Dataset files are named `<family>___<origin>`; a file with no `___`
/// separator must match the family name exactly. Inputs fan out over the
/// worker pool; each task does its own I/O and extraction against the
/// immutable snapshot. A failing input is logged and counted, never fatal.
pub fn export_comparisons(
    snapshot: &[FileRecord],
    family: &str,
    input_dir: &Path,
    output_root: &Path,
    bridge: &CoderecBridge,
    weights: &WeightConfig,
    thresholds: &RatingThresholds,
    deadline: Deadline,
) -> Result<ExportSummary> {
    if !input_dir.is_dir() {
        return Err(AnalysisError::InvalidArgument(format!(
            "input dir does not exist: {}",
            input_dir.display()
        )));
    }
    let output_dir = output_root.join(family.to_ascii_lowercase());
    std::fs::create_dir_all(&output_dir)?;

    let mut inputs: Vec<PathBuf> = std::fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|n| matches_family(&n.to_string_lossy(), family))
                .unwrap_or(false)
        })
        .collect();
    inputs.sort();

    let outcomes: Vec<Result<()>> = inputs
        .par_iter()
        .map(|path| {
            deadline.check()?;
            export_one(path, snapshot, &output_dir, bridge, weights, thresholds)
        })
        .collect();

    let mut processed = 0;
    let mut failed = 0;
    for (path, outcome) in inputs.iter().zip(&outcomes) {
        match outcome {
            Ok(()) => processed += 1,
            Err(AnalysisError::DeadlineExceeded) => return Err(AnalysisError::DeadlineExceeded),
            Err(e) => {
                tracing::warn!("export failed for {}: {}", path.display(), e);
                failed += 1;
            }
        }
    }
    tracing::info!(
        "export finished for family '{}': processed={}, failed={}, out={}",
        family,
        processed,
        failed,
        output_dir.display()
    );
    Ok(ExportSummary { processed, failed, output_dir })
}

fn export_one(
    path: &Path,
    snapshot: &[FileRecord],
    output_dir: &Path,
    bridge: &CoderecBridge,
    weights: &WeightConfig,
    thresholds: &RatingThresholds,
) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AnalysisError::InvalidArgument(format!("{}", path.display())))?;
    let raw = std::fs::read(path)?;
    let record = extract(&name, &raw, bridge)?;

    let comparisons = snapshot
        .iter()
        .map(|stored| compare_records(&record, stored, weights, thresholds))
        .collect::<Result<Vec<_>>>()?;

    let out = output_dir.join(format!("{name}.json"));
    let json = serde_json::to_vec_pretty(&comparisons)
        .map_err(|e| AnalysisError::InvalidEncoding(e.to_string()))?;
    std::fs::write(&out, json)?;
    tracing::debug!("exported {} comparisons for {}", comparisons.len(), name);
    Ok(())
}

/// `busybox___x86_gcc` belongs to family `busybox`; a name without the
/// separator must equal the family outright.
fn matches_family(file_name: &str, family: &str) -> bool {
    let lowered = file_name.to_ascii_lowercase();
    let stem = lowered.split("___").next().unwrap_or(&lowered);
    stem == family.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_matching_uses_the_name_prefix() {
        assert!(matches_family("busybox___x86_gcc12", "busybox"));
        assert!(matches_family("BUSYBOX___arm_clang", "busybox"));
        assert!(matches_family("busybox", "busybox"));
        assert!(!matches_family("busybox-legacy___x86", "busybox"));
        assert!(!matches_family("dropbear___x86", "busybox"));
    }
}
