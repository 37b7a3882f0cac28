use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TcgaError;
use crate::flatten::FlatRow;

/// GDC project identifier, e.g. `TCGA-LUSC` or `CPTAC-3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = TcgaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let pattern = Regex::new(r"^[A-Z0-9]+(-[A-Z0-9]+)+$").unwrap();
        if !pattern.is_match(&normalized) {
            return Err(TcgaError::InvalidProjectId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Filetype selector passed on the command line, e.g. `.svs` or `.bam`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filetype(String);

impl Filetype {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Filetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Filetype {
    type Err = TcgaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let rest = normalized.strip_prefix('.');
        let is_valid = rest
            .map(|rest| {
                !rest.is_empty()
                    && rest
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '.')
            })
            .unwrap_or(false);
        if !is_valid {
            return Err(TcgaError::InvalidFiletype(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationCategory {
    Clinical,
    Molecular,
    Report,
    Diagnosis,
}

impl AnnotationCategory {
    pub const ALL: [AnnotationCategory; 4] = [
        AnnotationCategory::Clinical,
        AnnotationCategory::Molecular,
        AnnotationCategory::Report,
        AnnotationCategory::Diagnosis,
    ];

    /// File stem of the CSV artifact for this category.
    pub fn table_stem(&self) -> &'static str {
        match self {
            AnnotationCategory::Clinical => "clinical",
            AnnotationCategory::Molecular => "molecular_index",
            AnnotationCategory::Report => "reports_index",
            AnnotationCategory::Diagnosis => "diagnosis",
        }
    }

    /// Expand a user selection, honoring the `all` shorthand and dropping
    /// duplicates while keeping first-mention order.
    pub fn parse_selection(values: &[String]) -> Result<Vec<AnnotationCategory>, TcgaError> {
        let mut selected = Vec::new();
        for value in values {
            if value.trim().eq_ignore_ascii_case("all") {
                for category in AnnotationCategory::ALL {
                    if !selected.contains(&category) {
                        selected.push(category);
                    }
                }
                continue;
            }
            let category = value.parse()?;
            if !selected.contains(&category) {
                selected.push(category);
            }
        }
        Ok(selected)
    }
}

impl fmt::Display for AnnotationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationCategory::Clinical => write!(f, "clinical"),
            AnnotationCategory::Molecular => write!(f, "molecular"),
            AnnotationCategory::Report => write!(f, "report"),
            AnnotationCategory::Diagnosis => write!(f, "diagnosis"),
        }
    }
}

impl FromStr for AnnotationCategory {
    type Err = TcgaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "clinical" => Ok(AnnotationCategory::Clinical),
            "molecular" => Ok(AnnotationCategory::Molecular),
            "report" => Ok(AnnotationCategory::Report),
            "diagnosis" => Ok(AnnotationCategory::Diagnosis),
            _ => Err(TcgaError::InvalidCategory(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Tumor,
    Normal,
    Unknown,
}

impl SampleType {
    /// Coarse classification of a GDC `sample_type` label. Absent or novel
    /// labels classify as unknown rather than failing.
    pub fn from_label(label: Option<&str>) -> SampleType {
        match label.map(str::trim) {
            Some("Primary Tumor") | Some("Metastatic") | Some("Recurrent Tumor") => {
                SampleType::Tumor
            }
            Some("Solid Tissue Normal") | Some("Blood Derived Normal") => SampleType::Normal,
            _ => SampleType::Unknown,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleType::Tumor => write!(f, "tumor"),
            SampleType::Normal => write!(f, "normal"),
            SampleType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseGroup {
    Paired,
    TumorOnly,
    NormalOnly,
    Unknown,
}

impl CaseGroup {
    /// Pure function of the distinct sample types observed for one case.
    pub fn from_flags(has_tumor: bool, has_normal: bool) -> CaseGroup {
        match (has_tumor, has_normal) {
            (true, true) => CaseGroup::Paired,
            (true, false) => CaseGroup::TumorOnly,
            (false, true) => CaseGroup::NormalOnly,
            (false, false) => CaseGroup::Unknown,
        }
    }
}

impl fmt::Display for CaseGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseGroup::Paired => write!(f, "paired"),
            CaseGroup::TumorOnly => write!(f, "tumor_only"),
            CaseGroup::NormalOnly => write!(f, "normal_only"),
            CaseGroup::Unknown => write!(f, "unknown"),
        }
    }
}

/// One data file known to the GDC, resolved to its owning case.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub file_id: String,
    pub file_name: String,
    pub case_id: String,
    pub submitter_id: Option<String>,
    pub sample_ids: Vec<String>,
    pub sample_type: SampleType,
    pub sample_type_label: Option<String>,
    pub data_category: Option<String>,
    pub data_type: Option<String>,
    pub data_format: Option<String>,
    pub md5sum: Option<String>,
    pub file_size: Option<u64>,
    pub state: Option<String>,
    pub local_path: Option<String>,
}

impl FileRecord {
    /// Build a file record from one flattened `/files` hit. Returns `None`
    /// when the hit carries no file id or no case id; such hits cannot be
    /// grouped and are reported as malformed by the caller.
    pub fn from_flat(row: &FlatRow) -> Option<FileRecord> {
        let file_id = flat_str(row, &["id", "file_id"])?;
        let case_id = flat_str(row, &["cases.case_id", "cases.0.case_id"])?;
        let sample_type_label = flat_str(
            row,
            &[
                "cases.samples.sample_type",
                "cases.0.samples.sample_type",
                "cases.0.samples.0.sample_type",
            ],
        );
        let sample_ids = flat_str(
            row,
            &[
                "cases.samples.sample_id",
                "cases.0.samples.sample_id",
                "cases.0.samples.0.sample_id",
            ],
        )
        .map(|joined| {
            joined
                .split(crate::flatten::JOIN_DELIMITER)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

        Some(FileRecord {
            file_id,
            file_name: flat_str(row, &["file_name"]).unwrap_or_default(),
            case_id,
            submitter_id: flat_str(row, &["cases.submitter_id", "cases.0.submitter_id"]),
            sample_ids,
            sample_type: SampleType::from_label(sample_type_label.as_deref()),
            sample_type_label,
            data_category: flat_str(row, &["data_category"]),
            data_type: flat_str(row, &["data_type"]),
            data_format: flat_str(row, &["data_format"]),
            md5sum: flat_str(row, &["md5sum"]),
            file_size: flat_u64(row, &["file_size"]),
            state: flat_str(row, &["state"]),
            local_path: None,
        })
    }
}

pub(crate) fn flat_str(row: &FlatRow, keys: &[&str]) -> Option<String> {
    for key in keys {
        match row.get(*key) {
            Some(Value::String(text)) if !text.is_empty() => return Some(text.clone()),
            Some(Value::Number(number)) => return Some(number.to_string()),
            _ => {}
        }
    }
    None
}

fn flat_u64(row: &FlatRow, keys: &[&str]) -> Option<u64> {
    for key in keys {
        match row.get(*key) {
            Some(Value::Number(number)) => return number.as_u64(),
            Some(Value::String(text)) => {
                if let Ok(parsed) = text.parse() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}
