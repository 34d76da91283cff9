use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use crate::analysis::minhash::MinHash;
use crate::analysis::RepresentationType;
use crate::compare::{FileComparison, SimilarityRating};
use crate::error::{AnalysisError, Result};
use crate::AppState;

/// One uploaded multipart part: the client's original filename plus bytes.
struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeQuery {
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub rating: Option<String>,
}

pub async fn health_check() -> Json<serde_json::Value> {
    let engine = MinHash::global();
    Json(json!({
        "status": "healthy",
        "service": "elfsim",
        "version": env!("CARGO_PKG_VERSION"),
        "minhash": {
            "signature_len": engine.signature_len(),
            "dict_size": engine.dict_size(),
            "seed": engine.seed(),
        }
    }))
}

// POST /api - upload one file, compare against the whole catalog
pub async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    multipart: Multipart,
) -> Result<Json<Vec<FileComparison>>> {
    let mut fields = read_multipart(multipart, &["file"]).await?;
    let upload = fields
        .remove("file")
        .ok_or_else(|| AnalysisError::InvalidArgument("missing multipart field 'file'".into()))?;

    let comparisons = state.service.analyze(&upload.filename, &upload.bytes).await?;

    // an unknown rating value means "no rating filter"
    let rating_filter = query.rating.as_deref().and_then(SimilarityRating::parse);
    let filtered = comparisons
        .into_iter()
        .filter(|c| query.min_score.map_or(true, |min| c.similarity_score >= min))
        .filter(|c| query.max_score.map_or(true, |max| c.similarity_score <= max))
        .filter(|c| rating_filter.map_or(true, |r| c.similarity_rating == r))
        .collect();
    Ok(Json(filtered))
}

// POST /api/compare - compare two uploads directly
pub async fn compare(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FileComparison>> {
    let mut fields = read_multipart(multipart, &["file1", "file2"]).await?;
    let first = fields
        .remove("file1")
        .ok_or_else(|| AnalysisError::InvalidArgument("missing multipart field 'file1'".into()))?;
    let second = fields
        .remove("file2")
        .ok_or_else(|| AnalysisError::InvalidArgument("missing multipart field 'file2'".into()))?;

    let comparison = state
        .service
        .compare(
            (&first.filename, &first.bytes),
            (&second.filename, &second.bytes),
        )
        .await?;
    Ok(Json(comparison))
}

#[derive(Debug, Deserialize)]
pub struct UploadZipQuery {
    /// Comma-separated representation type names. When present, entries
    /// already cataloged get exactly these representations recomputed and
    /// replaced in place.
    pub representations: Option<String>,
}

// POST /api/upload-zip - bulk-ingest an archive of binaries
pub async fn upload_zip(
    State(state): State<AppState>,
    Query(query): Query<UploadZipQuery>,
    multipart: Multipart,
) -> Result<StatusCode> {
    let mut fields = read_multipart(multipart, &["file"]).await?;
    let archive = fields
        .remove("file")
        .ok_or_else(|| AnalysisError::InvalidArgument("missing multipart field 'file'".into()))?;

    let requested = query
        .representations
        .as_deref()
        .map(parse_representation_list)
        .unwrap_or_default();
    tracing::info!("importing archive: {} ({} bytes)", archive.filename, archive.bytes.len());
    state.service.import_zip(&archive.bytes, &requested).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Parses a comma-separated list of representation type names; unknown
/// names are dropped, like the rating filter.
fn parse_representation_list(raw: &str) -> Vec<RepresentationType> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(RepresentationType::from_str)
        .collect()
}

/// Drains the multipart stream, keeping the named fields. Every kept field
/// must carry the client's original filename.
async fn read_multipart(
    mut multipart: Multipart,
    wanted: &[&str],
) -> Result<std::collections::HashMap<String, Upload>> {
    let mut fields = std::collections::HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AnalysisError::InvalidArgument(format!("multipart: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if !wanted.contains(&name.as_str()) {
            tracing::debug!("ignoring multipart field '{}'", name);
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|f| !f.is_empty())
            .ok_or(AnalysisError::MissingFilename)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AnalysisError::InvalidArgument(format!("reading '{name}': {e}")))?
            .to_vec();
        tracing::debug!("field '{}': '{}', {} bytes", name, filename, bytes.len());
        fields.insert(name, Upload { filename, bytes });
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representation_list_parses_known_names() {
        assert_eq!(
            parse_representation_list("CODE_REGION_LIST,STRING_MINHASH"),
            vec![RepresentationType::CodeRegionList, RepresentationType::StringMinhash]
        );
        assert_eq!(
            parse_representation_list(" CODE_REGION_LIST , "),
            vec![RepresentationType::CodeRegionList]
        );
    }

    #[test]
    fn unknown_representation_names_are_dropped() {
        assert!(parse_representation_list("BOGUS,ALSO_BOGUS").is_empty());
        assert_eq!(
            parse_representation_list("BOGUS,PROGRAM_HEADER_VECTOR"),
            vec![RepresentationType::ProgramHeaderVector]
        );
        assert!(parse_representation_list("").is_empty());
    }
}
