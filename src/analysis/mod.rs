pub mod bytes;
pub mod coderec;
pub mod elf;
pub mod extractor;
pub mod minhash;
pub mod program_header;
pub mod strings;

pub use self::coderec::{CodeRegion, CoderecBridge};
pub use self::extractor::extract;
pub use self::minhash::MinHash;
pub use self::program_header::ProgramHeader;

use serde::{Deserialize, Serialize};

/// Closed enumeration of representation kinds.
///
/// The first five are persisted blobs; the remaining markers only appear as
/// keys of the comparator's detail and weight maps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepresentationType {
    ElfHeaderVector,
    StringMinhash,
    SectionSizeVector,
    CodeRegionList,
    ProgramHeaderVector,
    RegionCountSim,
    AvgRegionLengthSim,
    None,
}

impl RepresentationType {
    /// Stable name used for the database column and the JSON wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RepresentationType::ElfHeaderVector => "ELF_HEADER_VECTOR",
            RepresentationType::StringMinhash => "STRING_MINHASH",
            RepresentationType::SectionSizeVector => "SECTION_SIZE_VECTOR",
            RepresentationType::CodeRegionList => "CODE_REGION_LIST",
            RepresentationType::ProgramHeaderVector => "PROGRAM_HEADER_VECTOR",
            RepresentationType::RegionCountSim => "REGION_COUNT_SIM",
            RepresentationType::AvgRegionLengthSim => "AVG_REGION_LENGTH_SIM",
            RepresentationType::None => "NONE",
        }
    }

    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "ELF_HEADER_VECTOR" => Some(RepresentationType::ElfHeaderVector),
            "STRING_MINHASH" => Some(RepresentationType::StringMinhash),
            "SECTION_SIZE_VECTOR" => Some(RepresentationType::SectionSizeVector),
            "CODE_REGION_LIST" => Some(RepresentationType::CodeRegionList),
            "PROGRAM_HEADER_VECTOR" => Some(RepresentationType::ProgramHeaderVector),
            "REGION_COUNT_SIM" => Some(RepresentationType::RegionCountSim),
            "AVG_REGION_LENGTH_SIM" => Some(RepresentationType::AvgRegionLengthSim),
            "NONE" => Some(RepresentationType::None),
            _ => None,
        }
    }
}

/// One extracted representation blob. The owning file's id becomes the
/// back-reference (`file_id`) when the record is persisted.
#[derive(Debug, Clone)]
pub struct Representation {
    pub id: Option<i64>,
    pub kind: RepresentationType,
    pub data: Vec<u8>,
}

/// A cataloged file: display name, content hash, parse outcome, and its
/// representations. At most one representation per kind.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Option<i64>,
    pub filename: String,
    pub sha256: String,
    pub parsing_successful: bool,
    pub representations: Vec<Representation>,
}

impl FileRecord {
    pub fn new(filename: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            id: None,
            filename: filename.into(),
            sha256: sha256.into(),
            parsing_successful: false,
            representations: Vec::new(),
        }
    }

    pub fn representation(&self, kind: RepresentationType) -> Option<&Representation> {
        self.representations.iter().find(|r| r.kind == kind)
    }

    /// Adds a representation, replacing any existing one of the same kind
    /// (recomputation replaces in place).
    pub fn add_representation(&mut self, kind: RepresentationType, data: Vec<u8>) {
        self.representations.retain(|r| r.kind != kind);
        self.representations.push(Representation { id: None, kind, data });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_round_trip() {
        for kind in [
            RepresentationType::ElfHeaderVector,
            RepresentationType::StringMinhash,
            RepresentationType::SectionSizeVector,
            RepresentationType::CodeRegionList,
            RepresentationType::ProgramHeaderVector,
            RepresentationType::RegionCountSim,
            RepresentationType::AvgRegionLengthSim,
            RepresentationType::None,
        ] {
            assert_eq!(RepresentationType::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(RepresentationType::from_str("SOMETHING_ELSE"), None);
    }

    #[test]
    fn serde_names_match_database_names() {
        let json = serde_json::to_string(&RepresentationType::ElfHeaderVector).unwrap();
        assert_eq!(json, "\"ELF_HEADER_VECTOR\"");
        let back: RepresentationType = serde_json::from_str("\"STRING_MINHASH\"").unwrap();
        assert_eq!(back, RepresentationType::StringMinhash);
    }

    #[test]
    fn at_most_one_representation_per_kind() {
        let mut record = FileRecord::new("a.bin", "00".repeat(32));
        record.add_representation(RepresentationType::StringMinhash, vec![1]);
        record.add_representation(RepresentationType::StringMinhash, vec![2]);
        assert_eq!(record.representations.len(), 1);
        assert_eq!(
            record.representation(RepresentationType::StringMinhash).unwrap().data,
            vec![2]
        );
    }
}
