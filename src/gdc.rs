use std::fmt;
use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};

use crate::config::GDC_BASE_URL;
use crate::error::TcgaError;

pub const DEFAULT_PAGE_SIZE: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Projects,
    Cases,
    Files,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Projects => "projects",
            Endpoint::Cases => "cases",
            Endpoint::Files => "files",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// One page request against the metadata source.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub endpoint: Endpoint,
    pub filters: Value,
    pub fields: Option<Vec<String>>,
    pub from: usize,
    pub size: usize,
}

/// One page of records plus the total the source claims to hold.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub records: Vec<Value>,
    pub total: Option<usize>,
}

/// Error classes the metadata source can signal. Only `FieldRejected` is
/// recoverable; the query executor retries it without an explicit field list.
#[derive(Debug, Clone)]
pub enum QueryError {
    FieldRejected(String),
    NotFound(String),
    Auth(String),
    Transient(String),
}

impl QueryError {
    pub fn reason(&self) -> &str {
        match self {
            QueryError::FieldRejected(reason)
            | QueryError::NotFound(reason)
            | QueryError::Auth(reason)
            | QueryError::Transient(reason) => reason,
        }
    }
}

pub trait MetadataSource: Send + Sync {
    fn fetch_page(&self, request: &QueryRequest) -> Result<QueryPage, QueryError>;
    fn download_manifest(&self, filters: &Value, destination: &Path) -> Result<(), TcgaError>;
}

#[derive(Clone)]
pub struct GdcMetadataClient {
    client: Client,
    base_url: String,
}

impl GdcMetadataClient {
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

    fn payload(request: &QueryRequest) -> Value {
        let mut payload = json!({
            "filters": request.filters,
            "format": "JSON",
            "size": request.size,
            "from": request.from,
        });
        if let Some(fields) = &request.fields {
            payload["fields"] = Value::String(fields.join(","));
        }
        payload
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, String>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(err.to_string());
                }
            }
        }
    }
}

impl MetadataSource for GdcMetadataClient {
    fn fetch_page(&self, request: &QueryRequest) -> Result<QueryPage, QueryError> {
        let url = format!("{}/{}", self.base_url, request.endpoint.path());
        let payload = Self::payload(request);
        let response = self
            .send_with_retries(|| self.client.post(&url).json(&payload))
            .map_err(QueryError::Transient)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "GDC request failed".to_string());
            return Err(classify_status(status, request.fields.is_some(), message));
        }

        let body: Value = response
            .json()
            .map_err(|err| QueryError::Transient(err.to_string()))?;
        let records = body
            .pointer("/data/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = body
            .pointer("/data/pagination/total")
            .and_then(Value::as_u64)
            .map(|total| total as usize);
        Ok(QueryPage { records, total })
    }

    fn download_manifest(&self, filters: &Value, destination: &Path) -> Result<(), TcgaError> {
        let url = format!("{}/files", self.base_url);
        let filters_text = filters.to_string();
        let response = self
            .send_with_retries(|| {
                self.client.get(&url).query(&[
                    ("filters", filters_text.as_str()),
                    ("return_type", "manifest"),
                ])
            })
            .map_err(TcgaError::GdcHttp)?;
        let mut response = handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| TcgaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub(crate) fn build_client(token: Option<&str>) -> Result<Client, TcgaError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("tcga-annot/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| TcgaError::GdcHttp(err.to_string()))?,
    );
    if let Some(token) = token {
        if !token.trim().is_empty() {
            headers.insert(
                "X-Auth-Token",
                HeaderValue::from_str(token.trim())
                    .map_err(|err| TcgaError::GdcHttp(err.to_string()))?,
            );
        }
    }
    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|err| TcgaError::GdcHttp(err.to_string()))
}

pub(crate) fn handle_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, TcgaError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "GDC request failed".to_string());
    Err(TcgaError::GdcStatus { status, message })
}

fn classify_status(status: u16, fields_requested: bool, message: String) -> QueryError {
    match status {
        400 if fields_requested => QueryError::FieldRejected(message),
        401 | 403 => QueryError::Auth(message),
        404 => QueryError::NotFound(message),
        _ => QueryError::Transient(format!("status {status}: {message}")),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
