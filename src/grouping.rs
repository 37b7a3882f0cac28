use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{CaseGroup, FileRecord, SampleType};
use crate::error::TcgaError;

/// Per-case summary of the sample types observed across its files.
#[derive(Debug, Clone, Serialize)]
pub struct GroupingRecord {
    pub case_id: String,
    pub submitter_id: Option<String>,
    pub has_tumor: bool,
    pub has_normal: bool,
    pub group: CaseGroup,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Grouping {
    pub records: Vec<GroupingRecord>,
    pub sample_to_case: BTreeMap<String, String>,
}

/// Classify every case that has at least one file. The classification is a
/// pure function of the distinct sample types per case, so any permutation
/// of the input yields the same grouping. A sample id claimed by two cases
/// is a data-integrity error and surfaces instead of being resolved.
pub fn build_groups(files: &[FileRecord]) -> Result<Grouping, TcgaError> {
    #[derive(Default)]
    struct CaseAccumulator {
        submitter_id: Option<String>,
        has_tumor: bool,
        has_normal: bool,
    }

    let mut cases: BTreeMap<String, CaseAccumulator> = BTreeMap::new();
    let mut sample_to_case: BTreeMap<String, String> = BTreeMap::new();

    for file in files {
        let entry = cases.entry(file.case_id.clone()).or_default();
        if entry.submitter_id.is_none() {
            entry.submitter_id = file.submitter_id.clone();
        }
        match file.sample_type {
            SampleType::Tumor => entry.has_tumor = true,
            SampleType::Normal => entry.has_normal = true,
            SampleType::Unknown => {}
        }

        for sample_id in &file.sample_ids {
            match sample_to_case.get(sample_id) {
                Some(existing) if existing != &file.case_id => {
                    let (first_case, second_case) = if existing < &file.case_id {
                        (existing.clone(), file.case_id.clone())
                    } else {
                        (file.case_id.clone(), existing.clone())
                    };
                    return Err(TcgaError::GroupingConflict {
                        sample_id: sample_id.clone(),
                        first_case,
                        second_case,
                    });
                }
                Some(_) => {}
                None => {
                    sample_to_case.insert(sample_id.clone(), file.case_id.clone());
                }
            }
        }
    }

    let records = cases
        .into_iter()
        .map(|(case_id, acc)| GroupingRecord {
            case_id,
            submitter_id: acc.submitter_id,
            has_tumor: acc.has_tumor,
            has_normal: acc.has_normal,
            group: CaseGroup::from_flags(acc.has_tumor, acc.has_normal),
        })
        .collect();

    Ok(Grouping {
        records,
        sample_to_case,
    })
}
