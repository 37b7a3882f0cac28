use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};

use crate::annotations;
use crate::config::{DEFAULT_FILE_FIELDS, ProjectRequest};
use crate::domain::{AnnotationCategory, FileRecord, ProjectId};
use crate::error::TcgaError;
use crate::fetch::{FetchOutcome, FetchRequest, FetchStatus, FileFetcher};
use crate::filters;
use crate::flatten::{FlatRow, flatten_record};
use crate::gdc::{Endpoint, MetadataSource};
use crate::grouping::{Grouping, build_groups};
use crate::query::{QueryOutcome, QuerySpec, run_paged_query};
use crate::stats::compute_stats;
use crate::store::OutputStore;
use crate::table::{Table, TableBuilder};

const FILES_KEY_COLUMNS: &[&str] = &[
    "id",
    "file_name",
    "cases.case_id",
    "cases.samples.sample_id",
    "cases.samples.sample_type",
    "patient",
    "local_path",
];
const GROUPS_KEY_COLUMNS: &[&str] =
    &["case_id", "submitter_id", "has_tumor", "has_normal", "group"];
const CASE_KEY_COLUMNS: &[&str] = &["case_id"];
const FILE_INDEX_KEY_COLUMNS: &[&str] = &["file_id", "case_id"];

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub raw: bool,
    pub tar_archives: bool,
    pub related_files: bool,
    pub manifest: bool,
    pub statistics: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            raw: false,
            tar_archives: false,
            related_files: true,
            manifest: true,
            statistics: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Structured trail of everything a run did, written next to the tables.
#[derive(Debug, Clone, Serialize)]
pub struct RunLog {
    pub timestamp: String,
    pub projects: Vec<String>,
    pub raw: bool,
    pub datasets: Vec<DatasetLog>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetLog {
    pub project: String,
    pub filetypes: Vec<String>,
    pub annotations: Vec<String>,
    pub queries: Vec<QueryLogEntry>,
    pub skipped_records: Vec<SkippedRecord>,
    pub category_errors: Vec<CategoryError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouping_conflict: Option<String>,
    pub fetch_failures: Vec<FetchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatasetLog {
    fn new(request: &ProjectRequest) -> Self {
        Self {
            project: request.project.as_str().to_string(),
            filetypes: request.filetypes.iter().map(|ft| ft.to_string()).collect(),
            annotations: request
                .annotations
                .iter()
                .map(|category| category.to_string())
                .collect(),
            queries: Vec::new(),
            skipped_records: Vec::new(),
            category_errors: Vec::new(),
            grouping_conflict: None,
            fetch_failures: Vec::new(),
            error: None,
        }
    }

    fn record_query(&mut self, label: &str, endpoint: Endpoint, outcome: &QueryOutcome) {
        self.queries.push(QueryLogEntry {
            label: label.to_string(),
            endpoint: endpoint.path().to_string(),
            fields_used: outcome.fields_used.clone(),
            attempts: outcome.attempts.clone(),
            returned: outcome.records.len(),
        });
    }

    fn record_skip(&mut self, error: &TcgaError) {
        if let TcgaError::MalformedRecord { record_id, reason } = error {
            self.skipped_records.push(SkippedRecord {
                record_id: record_id.clone(),
                reason: reason.clone(),
            });
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryLogEntry {
    pub label: String,
    pub endpoint: String,
    pub fields_used: Option<Vec<String>>,
    pub attempts: Vec<crate::query::QueryAttempt>,
    pub returned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub record_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryError {
    pub category: String,
    pub reason: String,
}

/// Artifact paths one dataset produced. Absent entries mean the artifact was
/// not requested or could not be assembled.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetArtifacts {
    pub project: String,
    pub files_csv: Option<String>,
    pub groups_csv: Option<String>,
    pub manifest_tsv: Option<String>,
    pub annotation_csvs: BTreeMap<String, String>,
    pub stats_json: Option<String>,
    pub preview_json: Option<String>,
    pub data_dir: Option<String>,
    pub grouping_incomplete: bool,
    pub fetch_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<DatasetArtifacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub datasets: Vec<DatasetReport>,
    pub aggregate_files_csv: Option<String>,
    pub aggregate_groups_csv: Option<String>,
    pub run_log: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectListing {
    pub columns: Vec<String>,
    pub projects: Vec<BTreeMap<String, String>>,
}

/// Tables kept in memory for cross-dataset aggregation.
struct DatasetTables {
    files: Table,
    groups: Option<Table>,
}

#[derive(Clone)]
pub struct App<M: MetadataSource, F: FileFetcher> {
    source: M,
    fetcher: F,
    store: OutputStore,
}

impl<M: MetadataSource, F: FileFetcher> App<M, F> {
    pub fn new(store: OutputStore, source: M, fetcher: F) -> Self {
        Self {
            source,
            fetcher,
            store,
        }
    }

    /// Process every requested dataset. A dataset that fails entirely is
    /// reported and skipped; the run never aborts globally.
    pub fn run(
        &self,
        requests: &[ProjectRequest],
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, TcgaError> {
        let mut reports = Vec::new();
        let mut tables = Vec::new();
        let mut run_log = RunLog {
            timestamp: iso_timestamp(),
            projects: requests
                .iter()
                .map(|request| request.project.as_str().to_string())
                .collect(),
            raw: options.raw,
            datasets: Vec::new(),
        };

        for request in requests {
            let mut dataset_log = DatasetLog::new(request);
            match self.run_dataset(request, options, sink, &mut dataset_log) {
                Ok((artifacts, dataset_tables)) => {
                    reports.push(DatasetReport {
                        project: request.project.as_str().to_string(),
                        artifacts: Some(artifacts),
                        error: None,
                    });
                    tables.push(dataset_tables);
                }
                Err(err) => {
                    sink.event(ProgressEvent {
                        message: format!("phase=Failed; {} {err}", request.project),
                        elapsed: None,
                    });
                    dataset_log.error = Some(err.to_string());
                    reports.push(DatasetReport {
                        project: request.project.as_str().to_string(),
                        artifacts: None,
                        error: Some(err.to_string()),
                    });
                }
            }
            run_log.datasets.push(dataset_log);
        }

        let (aggregate_files_csv, aggregate_groups_csv) = if tables.len() > 1 {
            self.write_aggregates(&tables)?
        } else {
            (None, None)
        };

        let run_log_path = self.store.run_log_path();
        self.store.write_json(&run_log_path, &run_log)?;

        Ok(RunSummary {
            datasets: reports,
            aggregate_files_csv,
            aggregate_groups_csv,
            run_log: run_log_path.to_string(),
        })
    }

    fn run_dataset(
        &self,
        request: &ProjectRequest,
        options: &RunOptions,
        sink: &dyn ProgressSink,
        log: &mut DatasetLog,
    ) -> Result<(DatasetArtifacts, DatasetTables), TcgaError> {
        let project = &request.project;
        sink.event(ProgressEvent {
            message: format!("phase=Query; files for {project}"),
            elapsed: None,
        });
        self.store.ensure_dataset_dirs(project)?;

        let files_filters = filters::project_files(project, &request.filetypes);
        let files_spec = QuerySpec::new(
            Endpoint::Files,
            files_filters.clone(),
            DEFAULT_FILE_FIELDS,
        );
        let outcome = run_paged_query(&self.source, project.as_str(), &files_spec)?;
        log.record_query("files", Endpoint::Files, &outcome);

        let mut flat_rows = Vec::new();
        let mut records = Vec::new();
        for raw in &outcome.records {
            let row = flatten_record(raw);
            match FileRecord::from_flat(&row) {
                Some(record) => {
                    flat_rows.push(row);
                    records.push(record);
                }
                None => log.record_skip(&TcgaError::MalformedRecord {
                    record_id: record_label(raw),
                    reason: "file hit lacks a file id or case id".to_string(),
                }),
            }
        }

        sink.event(ProgressEvent {
            message: format!("phase=Group; {} files", records.len()),
            elapsed: None,
        });
        let grouping = match build_groups(&records) {
            Ok(grouping) => Some(grouping),
            Err(err) => {
                log.grouping_conflict = Some(err.to_string());
                None
            }
        };

        if !options.raw && !records.is_empty() {
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {} files", records.len()),
                elapsed: None,
            });
            self.fetch_data(project, &mut records, options, log)?;
        }
        // Raw runs still get a manifest, assembled locally from the metadata
        // instead of fetched from the source.
        let manifest_tsv = if options.manifest && !records.is_empty() {
            let path = self.store.manifest_path(project);
            if options.raw {
                self.store.write_manifest(&path, &records)?;
            } else {
                self.source.download_manifest(&files_filters, path.as_std_path())?;
            }
            Some(path.to_string())
        } else {
            None
        };

        sink.event(ProgressEvent {
            message: "phase=Assemble; writing tables".to_string(),
            elapsed: None,
        });
        // Only per-file downloads give each record a local path; in raw and
        // tar modes every discovered record stays in the metadata table.
        let per_file_downloads = !options.raw && !options.tar_archives && !records.is_empty();
        let files_table = assemble_files_table(&flat_rows, &records, per_file_downloads);
        let files_csv = self.store.files_csv_path(project);
        self.store.write_table(&files_csv, &files_table)?;

        let groups_table = grouping.as_ref().map(assemble_groups_table);
        let groups_csv = match &groups_table {
            Some(table) => {
                let path = self.store.groups_csv_path(project);
                self.store.write_table(&path, table)?;
                Some(path.to_string())
            }
            None => None,
        };

        let case_ids: Vec<String> = records
            .iter()
            .map(|record| record.case_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut annotation_csvs = BTreeMap::new();
        let mut clinical_table = None;
        if !case_ids.is_empty() {
            for category in &request.annotations {
                sink.event(ProgressEvent {
                    message: format!("phase=Annotate; {category} for {project}"),
                    elapsed: None,
                });
                match self.build_annotation_table(project, *category, &case_ids, log) {
                    Ok(table) => {
                        let path = self.store.category_csv_path(project, *category);
                        self.store.write_table(&path, &table)?;
                        annotation_csvs.insert(category.table_stem().to_string(), path.to_string());
                        if *category == AnnotationCategory::Clinical {
                            clinical_table = Some(table);
                        }
                    }
                    // One failing category leaves the others running.
                    Err(err) => log.category_errors.push(CategoryError {
                        category: category.to_string(),
                        reason: err.to_string(),
                    }),
                }
            }
        }

        let stats_json = if options.statistics {
            let stats = compute_stats(&files_table, grouping.as_ref(), clinical_table.as_ref());
            let path = self.store.stats_path(project);
            self.store.write_json(&path, &stats)?;
            Some(path.to_string())
        } else {
            None
        };

        let preview_json = if options.raw {
            let path = self.store.preview_path(project);
            let preview = build_preview(request, &files_table, grouping.as_ref(), &case_ids);
            self.store.write_json(&path, &preview)?;
            Some(path.to_string())
        } else {
            None
        };

        let artifacts = DatasetArtifacts {
            project: project.as_str().to_string(),
            files_csv: Some(files_csv.to_string()),
            groups_csv,
            manifest_tsv,
            annotation_csvs,
            stats_json,
            preview_json,
            data_dir: (!options.raw).then(|| self.store.data_dir(project).to_string()),
            grouping_incomplete: log.grouping_conflict.is_some(),
            fetch_failures: log.fetch_failures.len(),
        };
        Ok((
            artifacts,
            DatasetTables {
                files: files_table,
                groups: groups_table,
            },
        ))
    }

    /// Retrieve the dataset's files, either as one tar.gz bundle or one by
    /// one. Per-file failures are retained in the log; the records of failed
    /// fetches lose their local path and drop out of the success view.
    fn fetch_data(
        &self,
        project: &ProjectId,
        records: &mut [FileRecord],
        options: &RunOptions,
        log: &mut DatasetLog,
    ) -> Result<(), TcgaError> {
        let data_dir = self.store.data_dir(project);

        if options.tar_archives {
            let archive = self.store.archive_path(project);
            let file_ids: Vec<String> = records
                .iter()
                .map(|record| record.file_id.clone())
                .collect();
            match self
                .fetcher
                .fetch_archive(&file_ids, archive.as_std_path())
                .and_then(|()| crate::fs_util::validate_gzip(archive.as_std_path()))
            {
                Ok(()) => {
                    let unpacked = archive.with_extension("");
                    crate::fs_util::gunzip_file(archive.as_std_path(), unpacked.as_std_path())?;
                }
                Err(err) => log.fetch_failures.push(FetchOutcome {
                    file_id: "bulk-archive".to_string(),
                    destination: archive.into_std_path_buf(),
                    status: FetchStatus::Failed(err.to_string()),
                }),
            }
            return Ok(());
        }

        let requests: Vec<FetchRequest> = records
            .iter()
            .map(|record| {
                let name = if record.file_name.is_empty() {
                    record.file_id.clone()
                } else {
                    record.file_name.clone()
                };
                FetchRequest {
                    file_id: record.file_id.clone(),
                    destination: data_dir.join(name).into_std_path_buf(),
                }
            })
            .collect();
        let outcomes = self.fetcher.fetch_files(&requests, options.related_files);
        for outcome in outcomes {
            if outcome.is_fetched() {
                if let Some(record) = records
                    .iter_mut()
                    .find(|record| record.file_id == outcome.file_id)
                {
                    record.local_path = Some(outcome.destination.display().to_string());
                }
            } else {
                log.fetch_failures.push(outcome);
            }
        }
        Ok(())
    }

    fn build_annotation_table(
        &self,
        project: &ProjectId,
        category: AnnotationCategory,
        case_ids: &[String],
        log: &mut DatasetLog,
    ) -> Result<Table, TcgaError> {
        let spec = annotations::query_spec_for(category, project, case_ids);
        let outcome = run_paged_query(&self.source, project.as_str(), &spec)?;
        log.record_query(&category.to_string(), spec.endpoint, &outcome);

        let key_columns = match annotations::category_endpoint(category) {
            Endpoint::Cases => CASE_KEY_COLUMNS,
            _ => FILE_INDEX_KEY_COLUMNS,
        };
        let mut builder = TableBuilder::new(key_columns);
        for record in &outcome.records {
            match annotations::extract_rows(category, record) {
                Ok(rows) => {
                    for row in &rows {
                        builder.push_row(row);
                    }
                }
                Err(err) => log.record_skip(&err),
            }
        }
        Ok(builder.finish())
    }

    fn write_aggregates(
        &self,
        tables: &[DatasetTables],
    ) -> Result<(Option<String>, Option<String>), TcgaError> {
        let mut files_builder = TableBuilder::new(FILES_KEY_COLUMNS);
        let mut groups_builder = TableBuilder::new(GROUPS_KEY_COLUMNS);
        let mut any_groups = false;
        for dataset in tables {
            for row in dataset.files.iter_maps() {
                files_builder.push_string_row(row);
            }
            if let Some(groups) = &dataset.groups {
                any_groups = true;
                for row in groups.iter_maps() {
                    groups_builder.push_string_row(row);
                }
            }
        }

        let files_path = self.store.aggregate_files_path();
        self.store.write_table(&files_path, &files_builder.finish())?;
        let groups_path = if any_groups {
            let path = self.store.aggregate_groups_path();
            self.store.write_table(&path, &groups_builder.finish())?;
            Some(path.to_string())
        } else {
            None
        };
        Ok((Some(files_path.to_string()), groups_path))
    }

    /// List the projects the source offers for a program (default: TCGA).
    pub fn list_projects(&self, program: &str) -> Result<ProjectListing, TcgaError> {
        let spec = QuerySpec::new(
            Endpoint::Projects,
            filters::eq("program.name", program),
            &[
                "project_id",
                "name",
                "disease_type",
                "primary_site",
                "summary.case_count",
                "summary.file_count",
            ],
        );
        let outcome = run_paged_query(&self.source, program, &spec)?;

        let mut builder = TableBuilder::new(&["project_id", "name"]);
        for record in &outcome.records {
            builder.push_row(&flatten_record(record));
        }
        let table = builder.finish();
        Ok(ProjectListing {
            columns: table.columns.clone(),
            projects: table.iter_maps().collect(),
        })
    }
}

fn assemble_files_table(rows: &[FlatRow], records: &[FileRecord], fetched_only: bool) -> Table {
    let mut builder = TableBuilder::new(FILES_KEY_COLUMNS);
    for (row, record) in rows.iter().zip(records) {
        if fetched_only && record.local_path.is_none() {
            // Requested but failed downloads stay out of the success view;
            // they are retained in the run log's failures list.
            continue;
        }
        let patient = record
            .submitter_id
            .clone()
            .unwrap_or_else(|| record.case_id.clone());
        let local_path = record.local_path.clone().unwrap_or_default();
        builder.push_row_with(row, &[("patient", patient), ("local_path", local_path)]);
    }
    builder.finish()
}

fn assemble_groups_table(grouping: &Grouping) -> Table {
    let mut builder = TableBuilder::new(GROUPS_KEY_COLUMNS);
    for record in &grouping.records {
        let mut row = BTreeMap::new();
        row.insert("case_id".to_string(), record.case_id.clone());
        row.insert(
            "submitter_id".to_string(),
            record.submitter_id.clone().unwrap_or_default(),
        );
        row.insert("has_tumor".to_string(), record.has_tumor.to_string());
        row.insert("has_normal".to_string(), record.has_normal.to_string());
        row.insert("group".to_string(), record.group.to_string());
        builder.push_string_row(row);
    }
    builder.finish()
}

fn build_preview(
    request: &ProjectRequest,
    files: &Table,
    grouping: Option<&Grouping>,
    case_ids: &[String],
) -> Value {
    let example_files: Vec<BTreeMap<String, String>> = files.iter_maps().take(10).collect();
    let mut grouping_summary = BTreeMap::new();
    if let Some(grouping) = grouping {
        for record in &grouping.records {
            *grouping_summary.entry(record.group.to_string()).or_insert(0) += 1;
        }
    }
    json!({
        "project": request.project.as_str(),
        "filetypes": request.filetypes.iter().map(|ft| ft.to_string()).collect::<Vec<_>>(),
        "files_found": files.len(),
        "example_files": example_files,
        "grouping_summary": grouping_summary,
        "case_ids": case_ids.iter().take(20).collect::<Vec<_>>(),
    })
}

fn record_label(record: &Value) -> String {
    record
        .get("id")
        .or_else(|| record.get("file_id"))
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
