use std::fs::File;
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::config::GDC_BASE_URL;
use crate::error::TcgaError;
use crate::gdc::{build_client, handle_status};

/// One file to retrieve from the data endpoint.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub file_id: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum FetchStatus {
    Fetched,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub file_id: String,
    pub destination: PathBuf,
    #[serde(flatten)]
    pub status: FetchStatus,
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self.status, FetchStatus::Fetched)
    }
}

pub trait FileFetcher: Send + Sync {
    /// Retrieve each file to its destination. Failures are recorded per item,
    /// never raised: a bad file must not sink the rest of the batch.
    fn fetch_files(&self, requests: &[FetchRequest], related_files: bool) -> Vec<FetchOutcome>;

    /// Retrieve many files as one tar.gz archive.
    fn fetch_archive(&self, file_ids: &[String], destination: &Path) -> Result<(), TcgaError>;
}

#[derive(Clone)]
pub struct GdcDataClient {
    client: Client,
    base_url: String,
}

impl GdcDataClient {
    pub fn new(token: Option<&str>) -> Result<Self, TcgaError> {
        Self::with_base_url(GDC_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: Option<&str>) -> Result<Self, TcgaError> {
        let client = build_client(token)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fetch_single(&self, request: &FetchRequest, related_files: bool) -> Result<(), TcgaError> {
        let url = format!("{}/data/{}", self.base_url, request.file_id);
        let mut builder = self.client.get(&url);
        if related_files {
            builder = builder.query(&[("related_files", "true")]);
        }
        let response = builder
            .send()
            .map_err(|err| TcgaError::GdcHttp(err.to_string()))?;
        let mut response = handle_status(response)?;
        let mut file = File::create(&request.destination)
            .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl FileFetcher for GdcDataClient {
    fn fetch_files(&self, requests: &[FetchRequest], related_files: bool) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let status = match self.fetch_single(request, related_files) {
                Ok(()) => FetchStatus::Fetched,
                Err(err) => {
                    warn!(file_id = %request.file_id, "download failed: {err}");
                    FetchStatus::Failed(err.to_string())
                }
            };
            outcomes.push(FetchOutcome {
                file_id: request.file_id.clone(),
                destination: request.destination.clone(),
                status,
            });
        }
        outcomes
    }

    fn fetch_archive(&self, file_ids: &[String], destination: &Path) -> Result<(), TcgaError> {
        let url = format!("{}/data", self.base_url);
        let payload = json!({"ids": file_ids});
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .map_err(|err| TcgaError::GdcHttp(err.to_string()))?;
        let mut response = handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
