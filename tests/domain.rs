use std::str::FromStr;

use assert_matches::assert_matches;

use tcga_annotation_manager::domain::{
    AnnotationCategory, CaseGroup, Filetype, ProjectId, SampleType,
};
use tcga_annotation_manager::error::TcgaError;

#[test]
fn project_ids_normalize_to_uppercase() {
    let id = ProjectId::from_str("tcga-brca").unwrap();
    assert_eq!(id.as_str(), "TCGA-BRCA");
    assert_eq!(id.to_string(), "TCGA-BRCA");
}

#[test]
fn project_id_requires_a_program_prefix() {
    let err = ProjectId::from_str("BRCA").unwrap_err();
    assert_matches!(err, TcgaError::InvalidProjectId(_));
    assert!(ProjectId::from_str("TCGA LUSC").is_err());
}

#[test]
fn categories_parse_case_insensitively() {
    assert_eq!(
        AnnotationCategory::from_str("Clinical").unwrap(),
        AnnotationCategory::Clinical
    );
    assert_matches!(
        AnnotationCategory::from_str("imaging").unwrap_err(),
        TcgaError::InvalidCategory(_)
    );
}

#[test]
fn selection_keeps_first_mention_order() {
    let selected = AnnotationCategory::parse_selection(&[
        "diagnosis".to_string(),
        "clinical".to_string(),
        "diagnosis".to_string(),
    ])
    .unwrap();
    assert_eq!(
        selected,
        vec![AnnotationCategory::Diagnosis, AnnotationCategory::Clinical]
    );
}

#[test]
fn filetypes_require_a_leading_dot() {
    assert_eq!(Filetype::from_str(".BCR.XML").unwrap().as_str(), ".bcr.xml");
    assert!(Filetype::from_str("svs").is_err());
    assert!(Filetype::from_str(".").is_err());
}

#[test]
fn grouping_labels_render_snake_case() {
    assert_eq!(CaseGroup::Paired.to_string(), "paired");
    assert_eq!(CaseGroup::TumorOnly.to_string(), "tumor_only");
    assert_eq!(CaseGroup::NormalOnly.to_string(), "normal_only");
    assert_eq!(CaseGroup::Unknown.to_string(), "unknown");
}

#[test]
fn metastatic_counts_as_tumor() {
    assert_eq!(SampleType::from_label(Some("Metastatic")), SampleType::Tumor);
    assert_eq!(
        SampleType::from_label(Some("Blood Derived Normal")),
        SampleType::Normal
    );
}
