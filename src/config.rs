use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{AnnotationCategory, Filetype, ProjectId};
use crate::error::TcgaError;

pub const GDC_BASE_URL: &str = "https://api.gdc.cancer.gov";
pub const GDC_TOKEN_ENV: &str = "GDC_TOKEN";

/// Default fields requested for `/files` hits; nested case and sample info
/// keeps the flattened CSV self-describing.
pub const DEFAULT_FILE_FIELDS: &[&str] = &[
    "id",
    "file_id",
    "file_name",
    "md5sum",
    "state",
    "file_size",
    "data_category",
    "data_type",
    "data_format",
    "experimental_strategy",
    "cases.case_id",
    "cases.submitter_id",
    "cases.project.project_id",
    "cases.project.name",
    "cases.disease_type",
    "cases.primary_site",
    "cases.diagnoses.age_at_diagnosis",
    "cases.diagnoses.vital_status",
    "cases.diagnoses.days_to_death",
    "cases.diagnoses.days_to_last_follow_up",
    "cases.demographic.gender",
    "cases.demographic.race",
    "cases.demographic.ethnicity",
    "cases.samples.sample_id",
    "cases.samples.submitter_id",
    "cases.samples.sample_type",
    "cases.samples.portions.portion_id",
];

/// Minimal fields for the `/cases` endpoint.
pub const DEFAULT_CASE_FIELDS: &[&str] = &[
    "case_id",
    "submitter_id",
    "project.project_id",
    "project.name",
    "disease_type",
    "primary_site",
    "demographic.gender",
    "demographic.race",
    "demographic.ethnicity",
    "demographic.year_of_birth",
];

/// Extended clinical/survival/treatment fields. Best-effort: projects that
/// lack some of these trigger the no-fields query fallback.
pub const CLINICAL_FIELDS: &[&str] = &[
    "diagnoses.primary_diagnosis",
    "diagnoses.morphology",
    "diagnoses.tumor_stage",
    "diagnoses.tumor_grade",
    "diagnoses.vital_status",
    "diagnoses.days_to_death",
    "diagnoses.days_to_last_follow_up",
    "treatments.treatment_type",
    "treatments.therapeutic_agents",
    "treatments.measure_of_response",
    "treatments.days_to_treatment",
    "follow_ups.days_to_last_follow_up",
    "follow_ups.vital_status",
    "follow_ups.progression_or_recurrence",
    "follow_ups.days_to_recurrence",
    "exposures.cigarettes_per_day",
    "exposures.alcohol_history",
];

/// Focused diagnosis/subtyping fields.
pub const DIAGNOSIS_FIELDS: &[&str] = &[
    "diagnoses.primary_diagnosis",
    "diagnoses.morphology",
    "diagnoses.tumor_stage",
    "diagnoses.tumor_grade",
];

pub const MOLECULAR_CATEGORIES: &[&str] = &[
    "Simple Nucleotide Variation",
    "Transcriptome Profiling",
    "Copy Number Variation",
    "DNA Methylation",
    "Somatic Structural Variation",
    "Proteome Profiling",
    "Sequencing Reads",
];

pub const MOLECULAR_FILE_FIELDS: &[&str] = &[
    "id",
    "file_name",
    "data_category",
    "data_type",
    "data_format",
    "experimental_strategy",
    "cases.case_id",
    "cases.submitter_id",
    "cases.samples.sample_type",
    "cases.samples.sample_id",
];

pub const REPORT_DATA_TYPES: &[&str] = &["Pathology Report", "Clinical Supplement"];

pub const REPORT_FILE_FIELDS: &[&str] = &[
    "id",
    "file_name",
    "data_category",
    "data_type",
    "data_format",
    "cases.case_id",
    "cases.submitter_id",
];

/// Mapping from a filename extension to preferred selection criteria.
#[derive(Debug, Clone, Copy)]
pub struct FiletypePreference {
    pub data_formats: &'static [&'static str],
    pub data_types: &'static [&'static str],
}

pub fn filetype_preference(extension: &str) -> Option<FiletypePreference> {
    let preference = match extension {
        ".svs" => FiletypePreference {
            data_formats: &["SVS"],
            data_types: &["Diagnostic Slide Image"],
        },
        ".ndpi" => FiletypePreference {
            data_formats: &["NDPI"],
            data_types: &[],
        },
        ".bcr.xml" | ".xml" => FiletypePreference {
            data_formats: &["BCR XML"],
            data_types: &[],
        },
        ".bam" => FiletypePreference {
            data_formats: &["BAM"],
            data_types: &[],
        },
        ".vcf" => FiletypePreference {
            data_formats: &["VCF"],
            data_types: &[],
        },
        ".maf" => FiletypePreference {
            data_formats: &["MAF"],
            data_types: &[],
        },
        ".txt" => FiletypePreference {
            data_formats: &["TSV", "TXT"],
            data_types: &[],
        },
        ".tsv" => FiletypePreference {
            data_formats: &["TSV"],
            data_types: &[],
        },
        _ => return None,
    };
    Some(preference)
}

pub fn read_env_token() -> Option<String> {
    std::env::var(GDC_TOKEN_ENV)
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default)]
    pub filetypes: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ProjectEntry {
    Shorthand(String),
    Detailed(ProjectEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProjectEntryObject {
    pub project: String,
    #[serde(default)]
    pub filetypes: Option<Vec<String>>,
    #[serde(default)]
    pub annotations: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ProjectRequest {
    pub project: ProjectId,
    pub filetypes: Vec<Filetype>,
    pub annotations: Vec<AnnotationCategory>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub projects: Vec<ProjectRequest>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TcgaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("tcga-annot.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(TcgaError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TcgaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TcgaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TcgaError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let default_filetypes = parse_filetypes(&config.filetypes)?;
        let default_annotations = AnnotationCategory::parse_selection(&config.annotations)?;

        let projects = config
            .projects
            .into_iter()
            .map(|entry| match entry {
                ProjectEntry::Shorthand(value) => Ok(ProjectRequest {
                    project: value.parse()?,
                    filetypes: effective_filetypes(&default_filetypes),
                    annotations: default_annotations.clone(),
                }),
                ProjectEntry::Detailed(obj) => Ok(ProjectRequest {
                    project: obj.project.parse()?,
                    filetypes: match obj.filetypes {
                        Some(values) => {
                            let parsed = parse_filetypes(&values)?;
                            effective_filetypes(&parsed)
                        }
                        None => effective_filetypes(&default_filetypes),
                    },
                    annotations: match obj.annotations {
                        Some(values) => AnnotationCategory::parse_selection(&values)?,
                        None => default_annotations.clone(),
                    },
                }),
            })
            .collect::<Result<Vec<_>, TcgaError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            projects,
        })
    }
}

fn parse_filetypes(values: &[String]) -> Result<Vec<Filetype>, TcgaError> {
    values.iter().map(|value| value.parse()).collect()
}

fn effective_filetypes(parsed: &[Filetype]) -> Vec<Filetype> {
    if parsed.is_empty() {
        default_filetypes()
    } else {
        parsed.to_vec()
    }
}

pub fn default_filetypes() -> Vec<Filetype> {
    vec![".svs".parse().expect("default filetype")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            schema_version: None,
            projects: vec![ProjectEntry::Shorthand("TCGA-LUSC".to_string())],
            filetypes: Vec::new(),
            annotations: vec!["all".to_string()],
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.projects.len(), 1);
        assert_eq!(resolved.projects[0].filetypes, default_filetypes());
        assert_eq!(
            resolved.projects[0].annotations,
            AnnotationCategory::ALL.to_vec()
        );
    }

    #[test]
    fn detailed_entry_overrides_defaults() {
        let config = Config {
            schema_version: Some(1),
            projects: vec![ProjectEntry::Detailed(ProjectEntryObject {
                project: "TCGA-LUAD".to_string(),
                filetypes: Some(vec![".bam".to_string()]),
                annotations: Some(vec!["clinical".to_string()]),
            })],
            filetypes: vec![".svs".to_string()],
            annotations: Vec::new(),
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        let request = &resolved.projects[0];
        assert_eq!(request.project.as_str(), "TCGA-LUAD");
        assert_eq!(request.filetypes[0].as_str(), ".bam");
        assert_eq!(request.annotations, vec![AnnotationCategory::Clinical]);
    }

    #[test]
    fn filetype_preferences_cover_common_extensions() {
        assert_eq!(filetype_preference(".svs").unwrap().data_formats, &["SVS"]);
        assert_eq!(filetype_preference(".bam").unwrap().data_formats, &["BAM"]);
        assert!(filetype_preference(".qcow2").is_none());
    }
}
