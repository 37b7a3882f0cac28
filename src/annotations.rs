use serde_json::Value;

use crate::config::{
    CLINICAL_FIELDS, DEFAULT_CASE_FIELDS, DIAGNOSIS_FIELDS, MOLECULAR_CATEGORIES,
    MOLECULAR_FILE_FIELDS, REPORT_DATA_TYPES, REPORT_FILE_FIELDS,
};
use crate::domain::{AnnotationCategory, ProjectId, flat_str};
use crate::error::TcgaError;
use crate::filters;
use crate::flatten::{FlatRow, SequenceMode, flatten_into, flatten_record};
use crate::gdc::Endpoint;
use crate::query::QuerySpec;

/// Sub-record lists of a case record that expand into their own rows.
const CLINICAL_SECTIONS: &[&str] = &["diagnoses", "treatments", "follow_ups", "exposures"];

pub fn category_endpoint(category: AnnotationCategory) -> Endpoint {
    match category {
        AnnotationCategory::Clinical | AnnotationCategory::Diagnosis => Endpoint::Cases,
        AnnotationCategory::Molecular | AnnotationCategory::Report => Endpoint::Files,
    }
}

/// The query one category issues for a set of cases in a project.
pub fn query_spec_for(
    category: AnnotationCategory,
    project: &ProjectId,
    case_ids: &[String],
) -> QuerySpec {
    match category {
        AnnotationCategory::Clinical => QuerySpec {
            endpoint: Endpoint::Cases,
            filters: filters::cases_by_id(case_ids),
            preferred_fields: Some(merge_fields(DEFAULT_CASE_FIELDS, CLINICAL_FIELDS)),
        },
        AnnotationCategory::Diagnosis => QuerySpec {
            endpoint: Endpoint::Cases,
            filters: filters::cases_by_id(case_ids),
            preferred_fields: Some(merge_fields(DEFAULT_CASE_FIELDS, DIAGNOSIS_FIELDS)),
        },
        AnnotationCategory::Molecular => QuerySpec {
            endpoint: Endpoint::Files,
            filters: filters::molecular_files(project, MOLECULAR_CATEGORIES, case_ids),
            preferred_fields: Some(merge_fields(MOLECULAR_FILE_FIELDS, &[])),
        },
        AnnotationCategory::Report => QuerySpec {
            endpoint: Endpoint::Files,
            filters: filters::report_files(project, REPORT_DATA_TYPES, case_ids),
            preferred_fields: Some(merge_fields(REPORT_FILE_FIELDS, &[])),
        },
    }
}

fn merge_fields(base: &[&str], extra: &[&str]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for field in base.iter().chain(extra) {
        if !merged.iter().any(|existing| existing == field) {
            merged.push((*field).to_string());
        }
    }
    merged
}

/// Turn one raw record into zero or more flattened rows for the category,
/// every row tagged with the owning case id. A record that cannot carry the
/// category (no sub-records) yields zero rows; a record without the required
/// identifiers is malformed and skipped by the caller.
pub fn extract_rows(
    category: AnnotationCategory,
    record: &Value,
) -> Result<Vec<FlatRow>, TcgaError> {
    match category {
        AnnotationCategory::Clinical => extract_case_entries(record, CLINICAL_SECTIONS, true),
        AnnotationCategory::Diagnosis => extract_case_entries(record, &["diagnoses"], false),
        AnnotationCategory::Molecular | AnnotationCategory::Report => {
            extract_file_row(record).map(|row| vec![row])
        }
    }
}

/// Fields whose absence must still produce a column (the explicit empty
/// marker) so that rows from sparse projects line up.
pub fn requested_fields(category: AnnotationCategory) -> &'static [&'static str] {
    match category {
        AnnotationCategory::Clinical => CLINICAL_FIELDS,
        AnnotationCategory::Diagnosis => DIAGNOSIS_FIELDS,
        AnnotationCategory::Molecular | AnnotationCategory::Report => &[],
    }
}

/// Expand the sub-record lists of one case record: each entry of each
/// section yields its own row on top of the case-level base fields. With
/// `base_row_fallback`, a case with no entries at all still contributes its
/// demographic/base row.
fn extract_case_entries(
    record: &Value,
    sections: &[&str],
    base_row_fallback: bool,
) -> Result<Vec<FlatRow>, TcgaError> {
    let map = record.as_object().ok_or_else(|| malformed(record, "case record is not an object"))?;
    let case_id = flat_str(&flatten_record(record), &["case_id", "id"])
        .ok_or_else(|| malformed(record, "case record has no case id"))?;

    let mut base = FlatRow::new();
    for (key, value) in map {
        if sections.contains(&key.as_str()) || CLINICAL_SECTIONS.contains(&key.as_str()) {
            continue;
        }
        flatten_into(key, value, SequenceMode::Auto, &mut base);
    }
    base.insert("case_id".to_string(), Value::String(case_id));
    ensure_fields(&mut base, DEFAULT_CASE_FIELDS);

    let mut rows = Vec::new();
    for section in sections {
        let Some(node) = map.get(*section) else {
            continue;
        };
        let entries: Vec<&Value> = match node {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![node],
            _ => continue,
        };
        for entry in entries {
            let mut row = base.clone();
            flatten_into(section, entry, SequenceMode::Auto, &mut row);
            ensure_section_fields(&mut row, section);
            rows.push(row);
        }
    }

    if rows.is_empty() && base_row_fallback {
        rows.push(base);
    }
    Ok(rows)
}

/// One row per file reference: molecular and report tables index files, not
/// cases. The row carries both the file id and the owning case id.
fn extract_file_row(record: &Value) -> Result<FlatRow, TcgaError> {
    if !record.is_object() {
        return Err(malformed(record, "file record is not an object"));
    }
    let mut row = flatten_record(record);
    let file_id = flat_str(&row, &["id", "file_id"])
        .ok_or_else(|| malformed(record, "file record has no file id"))?;
    let case_id = flat_str(&row, &["cases.case_id", "cases.0.case_id", "case_id"])
        .ok_or_else(|| malformed(record, "file record has no case id"))?;
    row.insert("file_id".to_string(), Value::String(file_id));
    row.insert("case_id".to_string(), Value::String(case_id));
    Ok(row)
}

fn ensure_fields(row: &mut FlatRow, fields: &[&str]) {
    for field in fields {
        row.entry((*field).to_string()).or_insert(Value::Null);
    }
}

fn ensure_section_fields(row: &mut FlatRow, section: &str) {
    let prefix = format!("{section}.");
    for field in CLINICAL_FIELDS {
        if field.starts_with(&prefix) {
            row.entry((*field).to_string()).or_insert(Value::Null);
        }
    }
}

fn malformed(record: &Value, reason: &str) -> TcgaError {
    let record_id = record
        .get("id")
        .or_else(|| record.get("case_id"))
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    TcgaError::MalformedRecord {
        record_id,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn two_treatments_yield_two_rows() {
        let case = json!({
            "case_id": "C1",
            "submitter_id": "TCGA-XX-0001",
            "treatments": [
                {"treatment_type": "Radiation", "measure_of_response": "PR"},
                {"treatment_type": "Chemotherapy", "measure_of_response": "CR"},
            ],
        });
        let rows = extract_rows(AnnotationCategory::Clinical, &case).unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.get("case_id"), Some(&json!("C1")));
        }
        assert_eq!(
            rows[0].get("treatments.treatment_type"),
            Some(&json!("Radiation"))
        );
        assert_eq!(
            rows[1].get("treatments.treatment_type"),
            Some(&json!("Chemotherapy"))
        );
    }

    #[test]
    fn clinical_entries_expand_across_sections() {
        let case = json!({
            "case_id": "C1",
            "diagnoses": [{"vital_status": "Alive"}],
            "follow_ups": [{"days_to_last_follow_up": 1200}],
        });
        let rows = extract_rows(AnnotationCategory::Clinical, &case).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("diagnoses.vital_status"), Some(&json!("Alive")));
        assert_eq!(
            rows[1].get("follow_ups.days_to_last_follow_up"),
            Some(&json!(1200))
        );
    }

    #[test]
    fn clinical_without_entries_keeps_the_base_row() {
        let case = json!({
            "case_id": "C2",
            "demographic": {"gender": "female"},
        });
        let rows = extract_rows(AnnotationCategory::Clinical, &case).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("demographic.gender"), Some(&json!("female")));
    }

    #[test]
    fn requested_section_fields_get_the_empty_marker() {
        let case = json!({
            "case_id": "C1",
            "treatments": [{"treatment_type": "Radiation"}],
        });
        let rows = extract_rows(AnnotationCategory::Clinical, &case).unwrap();
        // The entry lacks a response, but the column was requested.
        assert_eq!(
            rows[0].get("treatments.measure_of_response"),
            Some(&serde_json::Value::Null)
        );
    }

    #[test]
    fn diagnosis_yields_one_row_per_entry_and_none_when_absent() {
        let with_entries = json!({
            "case_id": "C1",
            "diagnoses": [
                {"tumor_stage": "Stage II"},
                {"tumor_stage": "Stage III"},
            ],
        });
        let rows = extract_rows(AnnotationCategory::Diagnosis, &with_entries).unwrap();
        assert_eq!(rows.len(), 2);

        let without = json!({"case_id": "C2"});
        let rows = extract_rows(AnnotationCategory::Diagnosis, &without).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn molecular_row_carries_both_identifiers() {
        let hit = json!({
            "id": "F9",
            "data_category": "Copy Number Variation",
            "cases": [{"case_id": "C1"}],
        });
        let rows = extract_rows(AnnotationCategory::Molecular, &hit).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("file_id"), Some(&json!("F9")));
        assert_eq!(rows[0].get("case_id"), Some(&json!("C1")));
    }

    #[test]
    fn file_record_without_case_is_malformed() {
        let hit = json!({"id": "F9"});
        let err = extract_rows(AnnotationCategory::Report, &hit).unwrap_err();
        assert_matches!(err, TcgaError::MalformedRecord { .. });
    }

    #[test]
    fn clinical_spec_merges_field_presets() {
        let project: ProjectId = "TCGA-LUSC".parse().unwrap();
        let spec = query_spec_for(AnnotationCategory::Clinical, &project, &["C1".to_string()]);
        let fields = spec.preferred_fields.unwrap();
        assert!(fields.iter().any(|field| field == "case_id"));
        assert!(fields.iter().any(|field| field == "treatments.treatment_type"));
        assert_eq!(spec.endpoint, Endpoint::Cases);
    }
}
