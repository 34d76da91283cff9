use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AnalysisError, Result};

/// Maximum number of paths handed to the classifier per invocation.
pub const BATCH_SIZE: usize = 200;

/// A byte range the classifier labeled. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRegion {
    pub start: u64,
    pub end: u64,
    pub length: u64,
    pub tag: String,
}

/// Serializes a region list into the self-describing blob stored as
/// `CODE_REGION_LIST`.
pub fn serialize_regions(regions: &[CodeRegion]) -> Result<Vec<u8>> {
    serde_json::to_vec(regions)
        .map_err(|e| AnalysisError::InvalidEncoding(format!("region list: {e}")))
}

/// Round-trips a stored `CODE_REGION_LIST` blob back into regions.
pub fn deserialize_regions(data: &[u8]) -> Result<Vec<CodeRegion>> {
    serde_json::from_slice(data)
        .map_err(|e| AnalysisError::InvalidEncoding(format!("region list: {e}")))
}

/// Bridge to the external entropy classifier.
///
/// The classifier emits one JSON document per input file; batch invocations
/// concatenate the documents with no separator. When disabled, every input
/// classifies to an empty region list.
pub struct CoderecBridge {
    enabled: bool,
    location: Option<PathBuf>,
}

impl CoderecBridge {
    pub fn new(enabled: bool, location: Option<PathBuf>) -> Self {
        Self { enabled, location }
    }

    pub fn disabled() -> Self {
        Self::new(false, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Classifies a single file.
    pub fn classify(&self, path: &Path) -> Result<Vec<CodeRegion>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let results = self.classify_batch(std::slice::from_ref(&path.to_path_buf()))?;
        let name = file_name(path);
        results
            .get(&name)
            .cloned()
            .ok_or_else(|| AnalysisError::ExternalToolFailure(format!(
                "classifier returned no result for {}",
                path.display()
            )))
    }

    /// Classifies many files, chunking into invocations of at most
    /// [`BATCH_SIZE`] paths. Results are keyed by file name as reported in
    /// each document's `file` field.
    pub fn classify_batch(&self, paths: &[PathBuf]) -> Result<HashMap<String, Vec<CodeRegion>>> {
        if !self.enabled {
            return Ok(paths
                .iter()
                .map(|p| (file_name(p), Vec::new()))
                .collect());
        }
        let mut results = HashMap::new();
        for batch in paths.chunks(BATCH_SIZE) {
            let raw = self.run_batch(batch)?;
            for document in split_concatenated(&raw) {
                let (name, regions) = parse_document(&document)?;
                results.insert(name, regions);
            }
        }
        Ok(results)
    }

    fn executable(&self) -> Result<PathBuf> {
        let location = self.location.as_ref().ok_or_else(|| {
            AnalysisError::ExternalToolFailure("classifier location not configured".into())
        })?;
        if location.is_file() {
            return Ok(location.clone());
        }
        which::which(location)
            .map_err(|e| AnalysisError::ExternalToolFailure(format!("classifier: {e}")))
    }

    fn run_batch(&self, batch: &[PathBuf]) -> Result<String> {
        let exe = self.executable()?;
        tracing::info!("running classifier over {} paths", batch.len());
        let output = Command::new(&exe)
            .args(batch)
            .output()
            .map_err(|e| AnalysisError::ExternalToolFailure(format!("classifier: {e}")))?;
        if !output.status.success() {
            return Err(AnalysisError::ExternalToolFailure(format!(
                "classifier exited with {}",
                output.status
            )));
        }
        let raw = String::from_utf8_lossy(&output.stdout).into_owned();
        if raw.trim().is_empty() {
            return Err(AnalysisError::ExternalToolFailure(format!(
                "classifier produced no output from {}",
                exe.display()
            )));
        }
        Ok(raw)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Splits a stream of concatenated JSON objects on the `}{` boundary.
fn split_concatenated(raw: &str) -> Vec<String> {
    raw.replace("}{", "}\u{1}{")
        .split('\u{1}')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses one classifier document into its file name and region list.
///
/// The document is `{file: string, range_results: [[{start, end}, length,
/// tag], ...]}`; the triple array is heterogeneous so it is walked as raw
/// JSON values.
fn parse_document(document: &str) -> Result<(String, Vec<CodeRegion>)> {
    let raw: Value = serde_json::from_str(document)
        .map_err(|e| AnalysisError::InvalidEncoding(format!("classifier output: {e}")))?;

    let name = raw
        .get("file")
        .and_then(Value::as_str)
        .map(|f| file_name(Path::new(&f.replace("\\\\", "\\"))))
        .unwrap_or_default();

    let entries = raw
        .get("range_results")
        .and_then(Value::as_array)
        .ok_or_else(|| AnalysisError::InvalidEncoding("missing range_results".into()))?;

    let mut regions = Vec::with_capacity(entries.len());
    for entry in entries {
        let triple = entry.as_array().ok_or_else(|| {
            AnalysisError::InvalidEncoding("range_results entry is not an array".into())
        })?;
        let invalid =
            || AnalysisError::InvalidEncoding("malformed range_results entry".into());
        if triple.len() != 3 {
            return Err(invalid());
        }
        let coords = triple[0].as_object().ok_or_else(invalid)?;
        regions.push(CodeRegion {
            start: coords.get("start").and_then(Value::as_u64).ok_or_else(invalid)?,
            end: coords.get("end").and_then(Value::as_u64).ok_or_else(invalid)?,
            length: triple[1].as_u64().ok_or_else(invalid)?,
            tag: triple[2].as_str().ok_or_else(invalid)?.to_string(),
        });
    }
    Ok((name, regions))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{"file": "/tmp/work/busybox", "range_results": [
        [{"start": 0, "end": 4096}, 4096, "header"],
        [{"start": 4096, "end": 90112}, 86016, "code"]
    ]}"#;

    #[test]
    fn parses_single_document() {
        let (name, regions) = parse_document(DOCUMENT).unwrap();
        assert_eq!(name, "busybox");
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].start, 4096);
        assert_eq!(regions[1].end, 90112);
        assert_eq!(regions[1].length, 86016);
        assert_eq!(regions[1].tag, "code");
    }

    #[test]
    fn splits_concatenated_documents() {
        let stream = r#"{"file":"a","range_results":[]}{"file":"b","range_results":[]}"#;
        let documents = split_concatenated(stream);
        assert_eq!(documents.len(), 2);
        assert_eq!(parse_document(&documents[0]).unwrap().0, "a");
        assert_eq!(parse_document(&documents[1]).unwrap().0, "b");
    }

    #[test]
    fn missing_range_results_is_invalid_encoding() {
        let err = parse_document(r#"{"file": "a"}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidEncoding(_)));
    }

    #[test]
    fn region_blob_round_trips() {
        let regions = vec![
            CodeRegion { start: 0, end: 100, length: 100, tag: "code".into() },
            CodeRegion { start: 100, end: 164, length: 64, tag: "data".into() },
        ];
        let blob = serialize_regions(&regions).unwrap();
        assert_eq!(deserialize_regions(&blob).unwrap(), regions);
    }

    #[test]
    fn disabled_bridge_classifies_everything_empty() {
        let bridge = CoderecBridge::disabled();
        let paths = vec![PathBuf::from("/tmp/a.bin"), PathBuf::from("/tmp/b.bin")];
        let results = bridge.classify_batch(&paths).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results["a.bin"].is_empty());
        assert!(results["b.bin"].is_empty());
        assert!(bridge.classify(Path::new("/tmp/a.bin")).unwrap().is_empty());
    }
}
