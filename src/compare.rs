use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::{
    bytes, coderec, minhash::MinHash, CodeRegion, FileRecord, RepresentationType,
};
use crate::error::{AnalysisError, Result};

/// Similarity category, ordered LOW < MEDIUM < HIGH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityRating {
    Low,
    Medium,
    High,
}

impl SimilarityRating {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "high" => Some(SimilarityRating::High),
            "medium" => Some(SimilarityRating::Medium),
            "low" => Some(SimilarityRating::Low),
            _ => None,
        }
    }
}

/// Score cut-offs for the rating; deployment configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RatingThresholds {
    pub high: f64,
    pub low: f64,
}

impl Default for RatingThresholds {
    fn default() -> Self {
        Self { high: 0.6094, low: 0.30 }
    }
}

impl RatingThresholds {
    pub fn rate(&self, score: f64) -> SimilarityRating {
        if score >= self.high {
            SimilarityRating::High
        } else if score <= self.low {
            SimilarityRating::Low
        } else {
            SimilarityRating::Medium
        }
    }
}

/// The two per-axis weight maps, selected by whether both sides parsed.
/// Deployment configuration; an operator weight search rewrites these.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightConfig {
    pub full: BTreeMap<RepresentationType, f64>,
    pub fallback: BTreeMap<RepresentationType, f64>,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            full: BTreeMap::from([
                (RepresentationType::ElfHeaderVector, 0.032),
                (RepresentationType::StringMinhash, 0.125),
                (RepresentationType::SectionSizeVector, 0.338),
                (RepresentationType::CodeRegionList, 0.190),
                (RepresentationType::RegionCountSim, 0.021),
                (RepresentationType::AvgRegionLengthSim, 0.007),
                (RepresentationType::ProgramHeaderVector, 0.277),
                (RepresentationType::None, 0.009),
            ]),
            fallback: BTreeMap::from([
                (RepresentationType::StringMinhash, 0.100),
                (RepresentationType::CodeRegionList, 0.154),
                (RepresentationType::RegionCountSim, 0.048),
                (RepresentationType::AvgRegionLengthSim, 0.009),
                (RepresentationType::ProgramHeaderVector, 0.688),
            ]),
        }
    }
}

impl WeightConfig {
    /// Each map must sum to 1. The shipped defaults land at 0.999, so the
    /// check carries a matching tolerance.
    pub fn validate(&self) -> Result<()> {
        for (name, map) in [("full", &self.full), ("fallback", &self.fallback)] {
            let sum: f64 = map.values().sum();
            if (sum - 1.0).abs() > 1e-2 {
                return Err(AnalysisError::InvalidArgument(format!(
                    "{name} weight map sums to {sum}, expected 1"
                )));
            }
        }
        Ok(())
    }
}

/// Result of comparing two files. Not persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileComparison {
    pub file_name: String,
    pub second_file_name: String,
    pub similarity_score: f64,
    pub similarity_rating: SimilarityRating,
    pub comparison_details: BTreeMap<RepresentationType, f64>,
    pub weights: BTreeMap<RepresentationType, f64>,
}

/// Compares a reference record against a target record.
///
/// Records sharing a content hash short-circuit to score 1 with no per-axis
/// work. Otherwise each available axis contributes its similarity times its
/// configured weight; axes absent from the detail map contribute 0.
pub fn compare_records(
    reference: &FileRecord,
    target: &FileRecord,
    weights: &WeightConfig,
    thresholds: &RatingThresholds,
) -> Result<FileComparison> {
    if reference.sha256 == target.sha256 {
        return Ok(FileComparison {
            file_name: target.filename.clone(),
            second_file_name: reference.filename.clone(),
            similarity_score: 1.0,
            similarity_rating: SimilarityRating::High,
            comparison_details: BTreeMap::new(),
            weights: BTreeMap::new(),
        });
    }

    let both_parsed = reference.parsing_successful && target.parsing_successful;
    let mut details = BTreeMap::new();

    if both_parsed {
        details.insert(
            RepresentationType::ElfHeaderVector,
            cosine_similarity(
                &unpack_vector(reference, RepresentationType::ElfHeaderVector)?,
                &unpack_vector(target, RepresentationType::ElfHeaderVector)?,
            )?,
        );
        details.insert(
            RepresentationType::SectionSizeVector,
            cosine_similarity(
                &unpack_vector(reference, RepresentationType::SectionSizeVector)?,
                &unpack_vector(target, RepresentationType::SectionSizeVector)?,
            )?,
        );
    }

    details.insert(
        RepresentationType::StringMinhash,
        MinHash::global().similarity(
            &bytes::unpack_ints(required(reference, RepresentationType::StringMinhash)?)?,
            &bytes::unpack_ints(required(target, RepresentationType::StringMinhash)?)?,
        )?,
    );

    let regions_a =
        coderec::deserialize_regions(required(reference, RepresentationType::CodeRegionList)?)?;
    let regions_b =
        coderec::deserialize_regions(required(target, RepresentationType::CodeRegionList)?)?;
    if !regions_a.is_empty() && !regions_b.is_empty() {
        details.insert(
            RepresentationType::CodeRegionList,
            interval_jaccard(&regions_a, &regions_b),
        );
        details.insert(
            RepresentationType::RegionCountSim,
            region_count_similarity(&regions_a, &regions_b),
        );
        details.insert(
            RepresentationType::AvgRegionLengthSim,
            avg_region_length_similarity(&regions_a, &regions_b),
        );
    }

    details.insert(
        RepresentationType::ProgramHeaderVector,
        program_header_similarity(
            &unpack_vector(reference, RepresentationType::ProgramHeaderVector)?,
            &unpack_vector(target, RepresentationType::ProgramHeaderVector)?,
        )?,
    );

    let active = if both_parsed { &weights.full } else { &weights.fallback };
    let score: f64 = details
        .iter()
        .map(|(kind, sim)| active.get(kind).copied().unwrap_or(0.0) * sim)
        .sum();

    Ok(FileComparison {
        file_name: target.filename.clone(),
        second_file_name: reference.filename.clone(),
        similarity_score: score,
        similarity_rating: thresholds.rate(score),
        comparison_details: details,
        weights: active.clone(),
    })
}

fn required(record: &FileRecord, kind: RepresentationType) -> Result<&[u8]> {
    record
        .representation(kind)
        .map(|r| r.data.as_slice())
        .ok_or_else(|| {
            AnalysisError::NotFound(format!("{} for {}", kind.as_str(), record.filename))
        })
}

fn unpack_vector(record: &FileRecord, kind: RepresentationType) -> Result<Vec<f64>> {
    bytes::unpack_doubles(required(record, kind)?)
}

/// Cosine similarity of two equal-length vectors. A zero-norm vector
/// compares as 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(AnalysisError::InvalidArgument(format!(
            "vector lengths differ: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    if a.is_empty() {
        return Err(AnalysisError::InvalidArgument("vectors must not be empty".into()));
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Per-axis max normalization of the first seven dimensions, then cosine.
/// Indices 7 and 8 are already fractions and stay untouched. Either vector
/// empty compares as 0.
pub fn program_header_similarity(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.is_empty() || b.is_empty() {
        return Ok(0.0);
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    for i in 0..=6 {
        let max = a[i].max(b[i]);
        if max > 0.0 {
            a[i] /= max;
            b[i] /= max;
        }
    }
    cosine_similarity(&a, &b)
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    start: u64,
    end: u64,
}

/// Sorts regions by start and merges overlapping or adjacent ones into
/// disjoint intervals.
fn merge_regions(regions: &[CodeRegion]) -> Vec<Interval> {
    let mut intervals: Vec<Interval> = regions
        .iter()
        .map(|r| Interval { start: r.start, end: r.end })
        .collect();
    intervals.sort_by_key(|iv| iv.start);

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for iv in intervals {
        match merged.last_mut() {
            Some(last) if last.end >= iv.start => last.end = last.end.max(iv.end),
            _ => merged.push(iv),
        }
    }
    merged
}

/// Jaccard over merged byte intervals, intersection computed with a
/// two-pointer sweep. An empty union compares as 1.
pub fn interval_jaccard(a: &[CodeRegion], b: &[CodeRegion]) -> f64 {
    let ia = merge_regions(a);
    let ib = merge_regions(b);

    let mut inter = 0u64;
    let (mut i, mut j) = (0, 0);
    while i < ia.len() && j < ib.len() {
        let lo = ia[i].start.max(ib[j].start);
        let hi = ia[i].end.min(ib[j].end);
        if lo < hi {
            inter += hi - lo;
        }
        if ia[i].end < ib[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }

    let sum_a: u64 = ia.iter().map(|iv| iv.end - iv.start).sum();
    let sum_b: u64 = ib.iter().map(|iv| iv.end - iv.start).sum();
    let uni = sum_a + sum_b - inter;
    if uni == 0 {
        1.0
    } else {
        inter as f64 / uni as f64
    }
}

/// `1 - |n_a - n_b| / max(n_a, n_b)`; both empty compares as 1, exactly one
/// empty as 0.
pub fn region_count_similarity(a: &[CodeRegion], b: &[CodeRegion]) -> f64 {
    let (na, nb) = (a.len(), b.len());
    if na == 0 && nb == 0 {
        return 1.0;
    }
    if na == 0 || nb == 0 {
        return 0.0;
    }
    1.0 - (na.abs_diff(nb) as f64 / na.max(nb) as f64)
}

/// `min(avg_a, avg_b) / max(avg_a, avg_b)` over region lengths; both
/// averages zero compares as 1, exactly one zero as 0.
pub fn avg_region_length_similarity(a: &[CodeRegion], b: &[CodeRegion]) -> f64 {
    let avg = |regions: &[CodeRegion]| {
        if regions.is_empty() {
            0.0
        } else {
            regions.iter().map(|r| r.length as f64).sum::<f64>() / regions.len() as f64
        }
    };
    let (avg_a, avg_b) = (avg(a), avg(b));
    if avg_a == 0.0 && avg_b == 0.0 {
        return 1.0;
    }
    if avg_a == 0.0 || avg_b == 0.0 {
        return 0.0;
    }
    avg_a.min(avg_b) / avg_a.max(avg_b)
}
