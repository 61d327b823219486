// src/backend.rs
// Client for the document backend's /api/v1/ endpoints. The trait is the
// seam the session and catalog talk through; HttpBackend is the reqwest
// implementation.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::model::ServerFileEntry;

/// One file in a multipart upload batch.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// What the backend returned for a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub accepted: usize,
    pub body: Value,
}

/// Upload failures carry the HTTP status and whatever `error`/`message`
/// field the server put in the body, so the notice can show both.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("Upload failed with status code {status}.{}", detail_suffix(.detail))]
    Rejected {
        status: u16,
        detail: Option<String>,
    },
    #[error("Upload failed: {0}")]
    Transport(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(text) => format!(" Server error: {}", text),
        None => " Could not parse error response.".to_string(),
    }
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// POST /api/v1/upload-files/ - multipart form, field `files` repeated.
    async fn upload_files(&self, parts: Vec<UploadPart>) -> Result<UploadReceipt, UploadError>;

    /// GET /api/v1/ask_question/ - answer a query scoped to named documents.
    async fn ask_question(&self, documents: &[String], query: &str)
        -> Result<String, ServiceError>;

    /// GET /api/v1/list_files/ - full server-side file listing.
    async fn list_files(&self) -> Result<Vec<ServerFileEntry>, ServiceError>;

    /// DELETE /api/v1/delete_file/ - remove one file by name.
    async fn delete_file(&self, name: &str) -> Result<(), ServiceError>;
}

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl DocumentBackend for HttpBackend {
    async fn upload_files(&self, parts: Vec<UploadPart>) -> Result<UploadReceipt, UploadError> {
        let accepted = parts.len();
        let mut form = reqwest::multipart::Form::new();
        for part in parts {
            let piece = reqwest::multipart::Part::bytes(part.bytes).file_name(part.name);
            form = form.part("files", piece);
        }

        let response = self
            .client
            .post(self.url("/api/v1/upload-files/"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body = response.json::<Value>().await.unwrap_or(Value::Null);
            debug!(accepted, "upload accepted");
            return Ok(UploadReceipt { accepted, body });
        }

        // The server may not return JSON on error.
        let detail = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("error")
                    .or_else(|| body.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        warn!(status = status.as_u16(), ?detail, "upload rejected");
        Err(UploadError::Rejected {
            status: status.as_u16(),
            detail,
        })
    }

    async fn ask_question(
        &self,
        documents: &[String],
        query: &str,
    ) -> Result<String, ServiceError> {
        let names = documents.join(", ");
        let url = format!(
            "{}?documents={}&query={}",
            self.url("/api/v1/ask_question/"),
            urlencoding::encode(&names),
            urlencoding::encode(query)
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::from_status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        body.get("answer")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Malformed("missing `answer` field".to_string()))
    }

    async fn list_files(&self) -> Result<Vec<ServerFileEntry>, ServiceError> {
        let response = self.client.get(self.url("/api/v1/list_files/")).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::from_status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        parse_file_listing(&body)
    }

    async fn delete_file(&self, name: &str) -> Result<(), ServiceError> {
        let url = format!(
            "{}?filename={}",
            self.url("/api/v1/delete_file/"),
            urlencoding::encode(name)
        );
        let response = self.client.delete(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ServiceError::from_status(status.as_u16()))
        }
    }
}

/// The listing endpoint has shipped two shapes: a bare array of filenames,
/// and an array of objects keyed `name`/`filename` with optional `size`
/// and `date`/`created_at`. Anything else is malformed.
pub fn parse_file_listing(body: &Value) -> Result<Vec<ServerFileEntry>, ServiceError> {
    let items = body
        .as_array()
        .ok_or_else(|| ServiceError::Malformed("file listing is not an array".to_string()))?;

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(name) => entries.push(ServerFileEntry::named(name.clone())),
            Value::Object(obj) => {
                let name = obj
                    .get("name")
                    .or_else(|| obj.get("filename"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ServiceError::Malformed("listing entry has no name".to_string())
                    })?;
                let size = match obj.get("size") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => String::new(),
                };
                let created = obj
                    .get("date")
                    .or_else(|| obj.get("created_at"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                entries.push(ServerFileEntry {
                    name: name.to_string(),
                    size,
                    created,
                });
            }
            other => {
                return Err(ServiceError::Malformed(format!(
                    "unexpected listing entry: {}",
                    other
                )))
            }
        }
    }
    Ok(entries)
}
