use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::TcgaError;
use crate::gdc::{DEFAULT_PAGE_SIZE, Endpoint, MetadataSource, QueryError, QueryRequest};

/// What to ask the metadata source for: endpoint, filter tree and the field
/// list we would prefer. The executor may have to drop the field list.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub endpoint: Endpoint,
    pub filters: Value,
    pub preferred_fields: Option<Vec<String>>,
}

impl QuerySpec {
    pub fn new(endpoint: Endpoint, filters: Value, preferred_fields: &[&str]) -> Self {
        Self {
            endpoint,
            filters,
            preferred_fields: Some(preferred_fields.iter().map(|f| f.to_string()).collect()),
        }
    }
}

/// One attempt against the source, recorded for the run log whether it
/// completed or not.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAttempt {
    pub fields: Option<Vec<String>>,
    pub pages: usize,
    pub records: usize,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum AttemptOutcome {
    Completed,
    FieldsRejected(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub records: Vec<Value>,
    pub fields_used: Option<Vec<String>>,
    pub attempts: Vec<QueryAttempt>,
}

/// Run a query with the preferred field list, falling back to an
/// unrestricted query when the source rejects the fields. Both attempts are
/// returned as data; any other error class is fatal for this dataset only.
pub fn run_paged_query(
    source: &dyn MetadataSource,
    dataset: &str,
    spec: &QuerySpec,
) -> Result<QueryOutcome, TcgaError> {
    let mut attempts = Vec::new();

    match fetch_all_pages(source, spec, spec.preferred_fields.clone()) {
        Ok((records, attempt)) => {
            attempts.push(attempt);
            return Ok(QueryOutcome {
                records,
                fields_used: spec.preferred_fields.clone(),
                attempts,
            });
        }
        Err((QueryError::FieldRejected(_), attempt)) => {
            warn!(
                endpoint = %spec.endpoint,
                dataset,
                "source rejected requested fields; retrying without a field list"
            );
            attempts.push(attempt);
        }
        Err((error, attempt)) => {
            attempts.push(attempt);
            return Err(TcgaError::SourceUnavailable {
                project: dataset.to_string(),
                reason: error.reason().to_string(),
            });
        }
    }

    match fetch_all_pages(source, spec, None) {
        Ok((records, attempt)) => {
            attempts.push(attempt);
            Ok(QueryOutcome {
                records,
                fields_used: None,
                attempts,
            })
        }
        Err((error, attempt)) => {
            attempts.push(attempt);
            Err(TcgaError::SourceUnavailable {
                project: dataset.to_string(),
                reason: error.reason().to_string(),
            })
        }
    }
}

/// Accumulate every page for one field-list choice. The loop trusts only the
/// page contents: it advances by the number of records actually returned and
/// stops on an empty page or once the reported total is reached.
fn fetch_all_pages(
    source: &dyn MetadataSource,
    spec: &QuerySpec,
    fields: Option<Vec<String>>,
) -> Result<(Vec<Value>, QueryAttempt), (QueryError, QueryAttempt)> {
    let mut records = Vec::new();
    let mut pages = 0usize;
    let mut from = 0usize;

    loop {
        let request = QueryRequest {
            endpoint: spec.endpoint,
            filters: spec.filters.clone(),
            fields: fields.clone(),
            from,
            size: DEFAULT_PAGE_SIZE,
        };
        let page = match source.fetch_page(&request) {
            Ok(page) => page,
            Err(error) => {
                let outcome = match &error {
                    QueryError::FieldRejected(reason) => {
                        AttemptOutcome::FieldsRejected(reason.clone())
                    }
                    other => AttemptOutcome::Failed(other.reason().to_string()),
                };
                let attempt = QueryAttempt {
                    fields,
                    pages,
                    records: records.len(),
                    outcome,
                };
                return Err((error, attempt));
            }
        };

        pages += 1;
        let fetched = page.records.len();
        from += fetched;
        records.extend(page.records);
        debug!(
            endpoint = %spec.endpoint,
            page = pages,
            fetched,
            accumulated = records.len(),
            "fetched metadata page"
        );

        let complete = fetched == 0
            || page
                .total
                .map(|total| records.len() >= total)
                .unwrap_or(false);
        if complete {
            break;
        }
    }

    let attempt = QueryAttempt {
        fields,
        pages,
        records: records.len(),
        outcome: AttemptOutcome::Completed,
    };
    Ok((records, attempt))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use serde_json::json;

    use crate::gdc::QueryPage;

    use super::*;

    struct PagedStub {
        records: Vec<Value>,
        page_size: usize,
        rejected_field: Option<&'static str>,
        requests: Mutex<Vec<Option<Vec<String>>>>,
    }

    impl PagedStub {
        fn new(records: Vec<Value>, page_size: usize) -> Self {
            Self {
                records,
                page_size,
                rejected_field: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn rejecting(records: Vec<Value>, rejected_field: &'static str) -> Self {
            Self {
                records,
                page_size: 100,
                rejected_field: Some(rejected_field),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl MetadataSource for PagedStub {
        fn fetch_page(&self, request: &QueryRequest) -> Result<QueryPage, QueryError> {
            self.requests.lock().unwrap().push(request.fields.clone());
            if let (Some(rejected), Some(fields)) = (self.rejected_field, &request.fields) {
                if fields.iter().any(|field| field == rejected) {
                    return Err(QueryError::FieldRejected(format!(
                        "unsupported field: {rejected}"
                    )));
                }
            }
            let start = request.from.min(self.records.len());
            let end = (start + self.page_size).min(self.records.len());
            Ok(QueryPage {
                records: self.records[start..end].to_vec(),
                total: Some(self.records.len()),
            })
        }

        fn download_manifest(&self, _filters: &Value, _destination: &Path) -> Result<(), TcgaError> {
            Ok(())
        }
    }

    struct FailingStub(QueryError);

    impl MetadataSource for FailingStub {
        fn fetch_page(&self, _request: &QueryRequest) -> Result<QueryPage, QueryError> {
            Err(self.0.clone())
        }

        fn download_manifest(&self, _filters: &Value, _destination: &Path) -> Result<(), TcgaError> {
            Ok(())
        }
    }


    fn records(count: usize) -> Vec<Value> {
        (0..count).map(|index| json!({"case_id": index})).collect()
    }

    #[test]
    fn accumulates_every_page() {
        let stub = PagedStub::new(records(250), 100);
        let spec = QuerySpec::new(Endpoint::Cases, json!({}), &["case_id"]);
        let outcome = run_paged_query(&stub, "TCGA-LUSC", &spec).unwrap();
        assert_eq!(outcome.records.len(), 250);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].pages, 3);
        assert_matches!(outcome.attempts[0].outcome, AttemptOutcome::Completed);
    }

    #[test]
    fn empty_result_is_a_single_page() {
        let stub = PagedStub::new(Vec::new(), 100);
        let spec = QuerySpec::new(Endpoint::Files, json!({}), &["id"]);
        let outcome = run_paged_query(&stub, "TCGA-LUSC", &spec).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.attempts[0].pages, 1);
    }

    #[test]
    fn field_rejection_falls_back_to_unrestricted_query() {
        let stub = PagedStub::rejecting(records(3), "treatments.bogus");
        let spec = QuerySpec::new(Endpoint::Cases, json!({}), &["case_id", "treatments.bogus"]);
        let outcome = run_paged_query(&stub, "TCGA-LUSC", &spec).unwrap();

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.fields_used, None);
        assert_eq!(outcome.attempts.len(), 2);
        assert_matches!(outcome.attempts[0].outcome, AttemptOutcome::FieldsRejected(_));
        assert_matches!(outcome.attempts[1].outcome, AttemptOutcome::Completed);

        let requests = stub.requests.lock().unwrap();
        let retried = requests.last().unwrap();
        assert!(retried.is_none());
    }

    #[test]
    fn auth_error_is_dataset_fatal() {
        let stub = FailingStub(QueryError::Auth("token expired".to_string()));
        let spec = QuerySpec::new(Endpoint::Cases, json!({}), &["case_id"]);
        let err = run_paged_query(&stub, "TCGA-LUSC", &spec).unwrap_err();
        assert_matches!(err, TcgaError::SourceUnavailable { .. });
    }
}
