use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{AnnotationCategory, FileRecord, ProjectId};
use crate::error::TcgaError;
use crate::table::Table;

/// Output layout for one run: a root directory with one subdirectory per
/// dataset plus run-level aggregate artifacts.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dataset_dir(&self, project: &ProjectId) -> Utf8PathBuf {
        self.root.join(project.as_str())
    }

    pub fn data_dir(&self, project: &ProjectId) -> Utf8PathBuf {
        self.dataset_dir(project).join("data")
    }

    pub fn files_csv_path(&self, project: &ProjectId) -> Utf8PathBuf {
        self.dataset_dir(project).join("files_metadata.csv")
    }

    pub fn groups_csv_path(&self, project: &ProjectId) -> Utf8PathBuf {
        self.dataset_dir(project).join("groups.csv")
    }

    pub fn category_csv_path(
        &self,
        project: &ProjectId,
        category: AnnotationCategory,
    ) -> Utf8PathBuf {
        self.dataset_dir(project)
            .join(format!("{}.csv", category.table_stem()))
    }

    pub fn manifest_path(&self, project: &ProjectId) -> Utf8PathBuf {
        self.dataset_dir(project).join("gdc_manifest.tsv")
    }

    pub fn archive_path(&self, project: &ProjectId) -> Utf8PathBuf {
        self.dataset_dir(project)
            .join(format!("{}_files.tar.gz", project.as_str()))
    }

    pub fn stats_path(&self, project: &ProjectId) -> Utf8PathBuf {
        self.dataset_dir(project).join("stats.json")
    }

    pub fn preview_path(&self, project: &ProjectId) -> Utf8PathBuf {
        self.dataset_dir(project).join("preview.json")
    }

    pub fn run_log_path(&self) -> Utf8PathBuf {
        self.root.join("run_log.json")
    }

    pub fn aggregate_files_path(&self) -> Utf8PathBuf {
        self.root.join("files_metadata.all.csv")
    }

    pub fn aggregate_groups_path(&self) -> Utf8PathBuf {
        self.root.join("groups.all.csv")
    }

    pub fn ensure_dataset_dirs(&self, project: &ProjectId) -> Result<(), TcgaError> {
        fs::create_dir_all(self.data_dir(project).as_std_path())
            .map_err(|err| TcgaError::Filesystem(err.to_string()))
    }

    pub fn write_table(&self, path: &Utf8Path, table: &Table) -> Result<(), TcgaError> {
        let mut buffer = Vec::new();
        if path.extension() == Some("tsv") {
            table.write_tsv(&mut buffer)?;
        } else {
            table.write_csv(&mut buffer)?;
        }
        Self::write_bytes_atomic(path, &buffer)
    }

    /// TSV manifest keyed by file id, one row per file, matching the header
    /// the external bulk download tool expects.
    pub fn write_manifest(&self, path: &Utf8Path, records: &[FileRecord]) -> Result<(), TcgaError> {
        let mut buffer = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(b'\t')
                .from_writer(&mut buffer);
            writer
                .write_record(["id", "filename", "md5", "size", "state"])
                .map_err(|err| TcgaError::TableWrite(err.to_string()))?;
            for record in records {
                let size = record
                    .file_size
                    .map(|size| size.to_string())
                    .unwrap_or_default();
                writer
                    .write_record([
                        record.file_id.as_str(),
                        record.file_name.as_str(),
                        record.md5sum.as_deref().unwrap_or(""),
                        size.as_str(),
                        record.state.as_deref().unwrap_or(""),
                    ])
                    .map_err(|err| TcgaError::TableWrite(err.to_string()))?;
            }
            writer
                .flush()
                .map_err(|err| TcgaError::TableWrite(err.to_string()))?;
        }
        Self::write_bytes_atomic(path, &buffer)
    }

    pub fn write_json<T: Serialize>(&self, path: &Utf8Path, value: &T) -> Result<(), TcgaError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TcgaError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::SampleType;
    use crate::table::TableBuilder;

    use super::*;

    #[test]
    fn layout_paths() {
        let store = OutputStore::new("/tmp/out");
        let project: ProjectId = "TCGA-LUSC".parse().unwrap();

        assert!(store.files_csv_path(&project).ends_with("TCGA-LUSC/files_metadata.csv"));
        assert!(
            store
                .category_csv_path(&project, AnnotationCategory::Molecular)
                .ends_with("TCGA-LUSC/molecular_index.csv")
        );
        assert!(store.run_log_path().ends_with("run_log.json"));
    }

    #[test]
    fn manifest_has_fixed_header() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = OutputStore::new(root.clone());
        let record = FileRecord {
            file_id: "F1".to_string(),
            file_name: "slide1.svs".to_string(),
            case_id: "C1".to_string(),
            submitter_id: None,
            sample_ids: Vec::new(),
            sample_type: SampleType::Unknown,
            sample_type_label: None,
            data_category: None,
            data_type: None,
            data_format: None,
            md5sum: Some("abc123".to_string()),
            file_size: Some(42),
            state: Some("released".to_string()),
            local_path: None,
        };

        let path = root.join("gdc_manifest.tsv");
        store.write_manifest(&path, &[record]).unwrap();
        let text = fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(
            text,
            "id\tfilename\tmd5\tsize\tstate\nF1\tslide1.svs\tabc123\t42\treleased\n"
        );
    }

    #[test]
    fn table_write_is_atomic_into_missing_dirs() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = OutputStore::new(root.clone());

        let mut builder = TableBuilder::new(&["case_id"]);
        builder.push_string_row([("case_id".to_string(), "C1".to_string())].into());
        let table = builder.finish();

        let path = root.join("nested").join("groups.csv");
        store.write_table(&path, &table).unwrap();
        assert!(path.as_std_path().exists());
        assert!(!path.with_extension("tmp").as_std_path().exists());
    }
}
