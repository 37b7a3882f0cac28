use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::grouping::Grouping;
use crate::table::Table;

const VITAL_STATUS_COLUMNS: &[&str] = &[
    "diagnoses.vital_status",
    "vital_status",
    "follow_ups.vital_status",
];
const DAYS_TO_DEATH_COLUMNS: &[&str] = &["diagnoses.days_to_death", "days_to_death"];
const DAYS_TO_FOLLOW_UP_COLUMNS: &[&str] = &[
    "diagnoses.days_to_last_follow_up",
    "days_to_last_follow_up",
    "follow_ups.days_to_last_follow_up",
];

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub n_files: usize,
    pub n_cases: usize,
    pub sample_type_counts: BTreeMap<String, usize>,
    pub data_category_counts: BTreeMap<String, usize>,
    pub group_counts: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survival: Option<SurvivalSummary>,
}

/// Best-effort overall-survival proxy derived from the clinical table:
/// event = dead, time = max of days-to-death and days-to-last-follow-up.
#[derive(Debug, Clone, Serialize)]
pub struct SurvivalSummary {
    pub n: usize,
    pub events: usize,
    pub time_days_min: f64,
    pub time_days_median: f64,
    pub time_days_max: f64,
}

pub fn compute_stats(
    files: &Table,
    grouping: Option<&Grouping>,
    clinical: Option<&Table>,
) -> DatasetStats {
    let n_cases = files
        .column_values("cases.case_id")
        .or_else(|| files.column_values("cases.0.case_id"))
        .map(|values| {
            values
                .into_iter()
                .filter(|value| !value.is_empty())
                .collect::<BTreeSet<_>>()
                .len()
        })
        .unwrap_or(0);

    DatasetStats {
        n_files: files.len(),
        n_cases,
        sample_type_counts: column_counts(
            files,
            &[
                "cases.samples.sample_type",
                "cases.0.samples.sample_type",
                "cases.0.samples.0.sample_type",
            ],
        ),
        data_category_counts: column_counts(files, &["data_category"]),
        group_counts: grouping.map(group_counts).unwrap_or_default(),
        survival: clinical.and_then(compute_survival),
    }
}

/// Value histogram tolerating an absent column; empty cells count under an
/// explicit `<NA>` bucket as the original tables did.
fn column_counts(table: &Table, candidates: &[&str]) -> BTreeMap<String, usize> {
    let Some(column) = table.first_column(candidates) else {
        return BTreeMap::new();
    };
    let mut counts = BTreeMap::new();
    for value in table.column_values(column).unwrap_or_default() {
        let key = if value.is_empty() { "<NA>" } else { value };
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
    counts
}

fn group_counts(grouping: &Grouping) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in &grouping.records {
        *counts.entry(record.group.to_string()).or_insert(0) += 1;
    }
    counts
}

fn compute_survival(clinical: &Table) -> Option<SurvivalSummary> {
    let vital_column = clinical.first_column(VITAL_STATUS_COLUMNS)?;
    let vital = clinical.column_values(vital_column)?;

    let death = clinical
        .first_column(DAYS_TO_DEATH_COLUMNS)
        .and_then(|column| clinical.column_values(column));
    let follow_up = clinical
        .first_column(DAYS_TO_FOLLOW_UP_COLUMNS)
        .and_then(|column| clinical.column_values(column));
    if death.is_none() && follow_up.is_none() {
        return None;
    }

    let mut times = Vec::new();
    let mut events = 0usize;
    for (index, status) in vital.iter().enumerate() {
        let to_death = death
            .as_ref()
            .and_then(|values| values.get(index))
            .and_then(|value| value.parse::<f64>().ok());
        let to_follow_up = follow_up
            .as_ref()
            .and_then(|values| values.get(index))
            .and_then(|value| value.parse::<f64>().ok());
        let time = match (to_death, to_follow_up) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        let Some(time) = time else {
            continue;
        };
        if status.eq_ignore_ascii_case("dead") {
            events += 1;
        }
        times.push(time);
    }
    if times.is_empty() {
        return None;
    }

    times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if times.len() % 2 == 1 {
        times[times.len() / 2]
    } else {
        let upper = times.len() / 2;
        (times[upper - 1] + times[upper]) / 2.0
    };

    Some(SurvivalSummary {
        n: times.len(),
        events,
        time_days_min: times[0],
        time_days_median: median,
        time_days_max: times[times.len() - 1],
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::flatten::flatten_record;
    use crate::table::TableBuilder;

    use super::*;

    fn table(rows: &[serde_json::Value]) -> Table {
        let mut builder = TableBuilder::new(&[]);
        for row in rows {
            builder.push_row(&flatten_record(row));
        }
        builder.finish()
    }

    #[test]
    fn counts_tolerate_missing_columns() {
        let files = table(&[json!({"id": "F1"})]);
        let stats = compute_stats(&files, None, None);
        assert_eq!(stats.n_files, 1);
        assert_eq!(stats.n_cases, 0);
        assert!(stats.sample_type_counts.is_empty());
        assert!(stats.survival.is_none());
    }

    #[test]
    fn sample_type_histogram() {
        let files = table(&[
            json!({"id": "F1", "cases": {"case_id": "C1", "samples": {"sample_type": "Primary Tumor"}}}),
            json!({"id": "F2", "cases": {"case_id": "C1", "samples": {"sample_type": "Primary Tumor"}}}),
            json!({"id": "F3", "cases": {"case_id": "C2", "samples": {"sample_type": "Solid Tissue Normal"}}}),
        ]);
        let stats = compute_stats(&files, None, None);
        assert_eq!(stats.n_cases, 2);
        assert_eq!(stats.sample_type_counts.get("Primary Tumor"), Some(&2));
        assert_eq!(stats.sample_type_counts.get("Solid Tissue Normal"), Some(&1));
    }

    #[test]
    fn survival_summary_uses_the_longest_known_time() {
        // Rows shaped the way the clinical extractor emits them: one
        // diagnosis entry flattened under the bare section prefix.
        let clinical = table(&[
            json!({
                "case_id": "C1",
                "diagnoses": {"vital_status": "Dead", "days_to_death": 800},
            }),
            json!({
                "case_id": "C2",
                "diagnoses": {"vital_status": "Alive", "days_to_last_follow_up": 1200},
            }),
            json!({"case_id": "C3"}),
        ]);
        let stats = compute_stats(&table(&[]), None, Some(&clinical));
        let survival = stats.survival.unwrap();
        assert_eq!(survival.n, 2);
        assert_eq!(survival.events, 1);
        assert_eq!(survival.time_days_min, 800.0);
        assert_eq!(survival.time_days_max, 1200.0);
        assert_eq!(survival.time_days_median, 1000.0);
    }
}
