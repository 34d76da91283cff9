use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use zip::ZipArchive;

use crate::analysis::extractor::{extract, extract_from_path};
use crate::analysis::{CodeRegion, CoderecBridge, FileRecord, Representation, RepresentationType};
use crate::catalog::Catalog;
use crate::compare::{compare_records, FileComparison, RatingThresholds, WeightConfig};
use crate::error::{AnalysisError, Result};

/// Optional per-request deadline, checked at task boundaries (between
/// catalog rows and archive entries, never inside the math kernels).
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(limit: Option<Duration>) -> Self {
        Self(limit.map(|d| Instant::now() + d))
    }

    pub fn check(&self) -> Result<()> {
        match self.0 {
            Some(at) if Instant::now() > at => Err(AnalysisError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Orchestrates extraction, cataloging, and comparison for the HTTP surface.
pub struct FileAnalysisService {
    catalog: Catalog,
    bridge: Arc<CoderecBridge>,
    weights: WeightConfig,
    thresholds: RatingThresholds,
    deadline: Option<Duration>,
}

impl FileAnalysisService {
    pub fn new(
        catalog: Catalog,
        bridge: Arc<CoderecBridge>,
        weights: WeightConfig,
        thresholds: RatingThresholds,
        deadline: Option<Duration>,
    ) -> Self {
        Self { catalog, bridge, weights, thresholds, deadline }
    }

    /// Fingerprints the upload, persists it when its `(hash, filename)`
    /// pair is new, and compares it against the full catalog snapshot.
    /// The returned list mirrors the snapshot order.
    pub async fn analyze(&self, filename: &str, raw: &[u8]) -> Result<Vec<FileComparison>> {
        tracing::info!("analyzing: {} ({} bytes)", filename, raw.len());
        let deadline = Deadline::after(self.deadline);

        let snapshot = self.catalog.find_all().await?;
        let upload = extract(filename, raw, &self.bridge)?;

        if self
            .catalog
            .find_by_sha256_and_filename(&upload.sha256, &upload.filename)
            .await?
            .is_none()
        {
            let mut persisted = upload.clone();
            self.catalog.save(&mut persisted).await?;
        }

        snapshot
            .par_iter()
            .map(|stored| {
                deadline.check()?;
                compare_records(&upload, stored, &self.weights, &self.thresholds)
            })
            .collect()
    }

    /// Compares two uploads in memory, without touching the catalog.
    pub async fn compare(
        &self,
        first: (&str, &[u8]),
        second: (&str, &[u8]),
    ) -> Result<FileComparison> {
        let a = extract(first.0, first.1, &self.bridge)?;
        let b = extract(second.0, second.1, &self.bridge)?;
        compare_records(&a, &b, &self.weights, &self.thresholds)
    }

    /// Compares every file of one family in a dataset directory against the
    /// current catalog snapshot, writing one JSON document per input.
    /// An operator workflow, not part of the HTTP surface.
    pub async fn export_family(
        &self,
        family: &str,
        input_dir: &Path,
        output_root: &Path,
    ) -> Result<crate::export::ExportSummary> {
        let snapshot = self.catalog.find_all().await?;
        crate::export::export_comparisons(
            &snapshot,
            family,
            input_dir,
            output_root,
            &self.bridge,
            &self.weights,
            &self.thresholds,
            Deadline::after(self.deadline),
        )
    }

    /// Expands a ZIP archive into a scoped temporary directory and ingests
    /// every non-directory entry. A failing entry is logged and skipped.
    ///
    /// Entries whose content hash is already cataloged are not re-stored;
    /// when `requested` names specific representation kinds, those are
    /// recomputed for such entries and replaced in place on the existing
    /// rows, and the classifier only runs if the region list is among them.
    pub async fn import_zip(
        &self,
        archive: &[u8],
        requested: &[RepresentationType],
    ) -> Result<()> {
        let deadline = Deadline::after(self.deadline);
        let dir = tempfile::TempDir::new()?;
        let entries = unpack_archive(archive, dir.path())?;
        let total = entries.len();
        tracing::info!("processing {} archive entries", total);

        let want_regions =
            requested.is_empty() || requested.contains(&RepresentationType::CodeRegionList);
        let regions_by_name = if want_regions {
            let paths: Vec<PathBuf> = entries.iter().map(|(_, p)| p.clone()).collect();
            self.bridge.classify_batch(&paths)?
        } else {
            HashMap::new()
        };

        // records are built in parallel on the worker pool; persistence
        // stays sequential, one transaction per record
        let built: Vec<(String, Result<FileRecord>)> = entries
            .par_iter()
            .map(|(name, path)| {
                let record = deadline.check().and_then(|_| {
                    let regions = regions_for(&regions_by_name, path);
                    extract_from_path(name, path, regions)
                });
                (name.clone(), record)
            })
            .collect();

        let mut next_log_threshold = 5;
        for (index, (name, built_record)) in built.into_iter().enumerate() {
            deadline.check()?;
            let percent = index * 100 / total.max(1);
            if percent >= next_log_threshold {
                tracing::info!("  {}% done ({} of {} entries)", percent, index, total);
                next_log_threshold += 5;
            }
            let mut record = match built_record {
                Ok(record) => record,
                Err(AnalysisError::DeadlineExceeded) => return Err(AnalysisError::DeadlineExceeded),
                Err(e) => {
                    tracing::error!("failed to process '{}': {}", name, e);
                    continue;
                }
            };
            let existing = self.catalog.find_by_sha256(&record.sha256).await?;
            if existing.is_empty() {
                if let Err(e) = self.catalog.save(&mut record).await {
                    tracing::error!("failed to persist '{}': {}", name, e);
                }
            } else if !requested.is_empty() {
                let recomputed: Vec<Representation> = record
                    .representations
                    .iter()
                    .filter(|r| requested.contains(&r.kind))
                    .cloned()
                    .collect();
                for row in &existing {
                    let Some(file_id) = row.id else { continue };
                    if let Err(e) =
                        self.catalog.replace_representations(file_id, &recomputed).await
                    {
                        tracing::error!("failed to reanalyze '{}': {}", name, e);
                    }
                }
                tracing::debug!(
                    "'{}' already cataloged, replaced {} representation(s)",
                    name,
                    recomputed.len()
                );
            } else {
                tracing::debug!("'{}' already cataloged, skipping", name);
            }
        }
        Ok(())
    }
}

/// Extracts every non-directory entry into `dir`, one uniquely named
/// subdirectory per entry, preserving archive order.
fn unpack_archive(archive: &[u8], dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;
    let mut entries = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let base = Path::new(&name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("entry-{i}"));
        let entry_dir = dir.join(i.to_string());
        std::fs::create_dir_all(&entry_dir)?;
        let path = entry_dir.join(base);
        let mut out = std::fs::File::create(&path)?;
        std::io::copy(&mut entry, &mut out)?;
        entries.push((name, path));
    }
    Ok(entries)
}

fn regions_for(
    regions_by_name: &HashMap<String, Vec<CodeRegion>>,
    path: &Path,
) -> Vec<CodeRegion> {
    path.file_name()
        .and_then(|n| regions_by_name.get(&n.to_string_lossy().into_owned()))
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_far_in_the_future_passes() {
        let deadline = Deadline::after(Some(Duration::from_secs(3600)));
        assert!(deadline.check().is_ok());
        assert!(Deadline::after(None).check().is_ok());
    }

    #[test]
    fn elapsed_deadline_is_reported() {
        let deadline = Deadline::after(Some(Duration::from_nanos(1)));
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(deadline.check(), Err(AnalysisError::DeadlineExceeded)));
    }

    #[test]
    fn unpack_preserves_entry_order_and_skips_directories() {
        let mut buffer = Cursor::new(Vec::new());
        {
            use std::io::Write;
            use zip::write::FileOptions;
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer.add_directory("bins/", FileOptions::default()).unwrap();
            writer.start_file("bins/alpha", FileOptions::default()).unwrap();
            writer.write_all(b"alpha-bytes").unwrap();
            writer.start_file("bins/beta", FileOptions::default()).unwrap();
            writer.write_all(b"beta-bytes").unwrap();
            writer.finish().unwrap();
        }
        let dir = tempfile::TempDir::new().unwrap();
        let entries = unpack_archive(buffer.get_ref(), dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "bins/alpha");
        assert_eq!(entries[1].0, "bins/beta");
        assert_eq!(std::fs::read(&entries[0].1).unwrap(), b"alpha-bytes");
    }
}
