use serde_json::{Value, json};

use crate::config::filetype_preference;
use crate::domain::{Filetype, ProjectId};

/// Builders for the GDC filter JSON grammar (`op`/`content` trees).

pub fn eq(field: &str, value: impl Into<Value>) -> Value {
    json!({"op": "=", "content": {"field": field, "value": [value.into()]}})
}

pub fn in_list<I, V>(field: &str, values: I) -> Value
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    json!({"op": "in", "content": {"field": field, "value": values}})
}

pub fn and_all(parts: Vec<Value>) -> Value {
    json!({"op": "and", "content": parts})
}

pub fn or_any(mut parts: Vec<Value>) -> Value {
    if parts.len() == 1 {
        return parts.remove(0);
    }
    json!({"op": "or", "content": parts})
}

/// Filter for all files of a project matching any of the requested filetypes.
/// Preference order per filetype: data_format, then data_type, then a
/// filename-suffix wildcard.
pub fn project_files(project: &ProjectId, filetypes: &[Filetype]) -> Value {
    let clauses = filetypes
        .iter()
        .map(|filetype| match filetype_preference(filetype.as_str()) {
            Some(pref) if !pref.data_formats.is_empty() => {
                in_list("data_format", pref.data_formats.iter().copied())
            }
            Some(pref) if !pref.data_types.is_empty() => {
                in_list("data_type", pref.data_types.iter().copied())
            }
            _ => in_list("file_name", [format!("*{}", filetype.as_str())]),
        })
        .collect::<Vec<_>>();
    and_all(vec![
        eq("cases.project.project_id", project.as_str()),
        or_any(clauses),
    ])
}

/// Filter for a set of case ids on the `/cases` endpoint.
pub fn cases_by_id(case_ids: &[String]) -> Value {
    in_list("case_id", case_ids.iter().cloned())
}

/// Filter for molecular files of the given cases within a project.
pub fn molecular_files(project: &ProjectId, categories: &[&str], case_ids: &[String]) -> Value {
    and_all(vec![
        eq("cases.project.project_id", project.as_str()),
        in_list("data_category", categories.iter().copied()),
        in_list("cases.case_id", case_ids.iter().cloned()),
    ])
}

/// Filter for report documents (clinical supplements, pathology reports).
pub fn report_files(project: &ProjectId, data_types: &[&str], case_ids: &[String]) -> Value {
    and_all(vec![
        eq("cases.project.project_id", project.as_str()),
        in_list("data_category", ["Clinical"]),
        in_list("data_type", data_types.iter().copied()),
        in_list("cases.case_id", case_ids.iter().cloned()),
    ])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn eq_wraps_value_in_list() {
        let filter = eq("cases.project.project_id", "TCGA-LUSC");
        assert_eq!(
            filter,
            json!({"op": "=", "content": {"field": "cases.project.project_id", "value": ["TCGA-LUSC"]}})
        );
    }

    #[test]
    fn single_clause_or_collapses() {
        let filter = or_any(vec![eq("a", 1)]);
        assert_eq!(filter["op"], "=");
    }

    #[test]
    fn project_files_prefers_data_format() {
        let project: ProjectId = "TCGA-LUSC".parse().unwrap();
        let filetypes = vec![".svs".parse().unwrap()];
        let filter = project_files(&project, &filetypes);
        assert_eq!(filter["op"], "and");
        let clauses = filter["content"].as_array().unwrap();
        assert_eq!(clauses[1]["content"]["field"], "data_format");
        assert_eq!(clauses[1]["content"]["value"], json!(["SVS"]));
    }

    #[test]
    fn unknown_filetype_falls_back_to_file_name() {
        let project: ProjectId = "TCGA-LUSC".parse().unwrap();
        let filetypes = vec![".qcow2".parse().unwrap()];
        let filter = project_files(&project, &filetypes);
        let clauses = filter["content"].as_array().unwrap();
        assert_eq!(clauses[1]["content"]["field"], "file_name");
        assert_eq!(clauses[1]["content"]["value"], json!(["*.qcow2"]));
    }
}
