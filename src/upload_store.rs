//! Upload persistence and the upload pipeline.
//!
//! Defines the [`UploadStore`] trait so the Realtime Database backend and the
//! in-memory store can be swapped at startup, plus [`process_upload`], which
//! ties ingestion to persistence.

use crate::ingest::{ingest, IngestError};
use crate::report_type::{Module, ReportType};
use crate::schema::{NormalizedRow, Upload, UploadStatus};
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Rows written per store call.
pub const ROW_BATCH_SIZE: usize = 100;

/// Async trait implemented by each persistence backend.
#[async_trait::async_trait]
pub trait UploadStore: Send + Sync {
    fn name(&self) -> &str;

    /// Write upload metadata, replacing any previous record with the same id.
    async fn put_upload(&self, upload: &Upload) -> Result<()>;

    /// Write `rows` under sequential keys starting at `start`.
    async fn put_rows(&self, upload_id: &str, start: usize, rows: &[NormalizedRow]) -> Result<()>;

    async fn get_upload(&self, upload_id: &str) -> Result<Option<Upload>>;

    /// All uploads, newest first.
    async fn list_uploads(&self) -> Result<Vec<Upload>>;

    /// Rows of an upload in key order.
    async fn get_rows(&self, upload_id: &str) -> Result<Vec<NormalizedRow>>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    uploads: HashMap<String, Upload>,
    rows: HashMap<String, BTreeMap<usize, NormalizedRow>>,
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryUploadStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("Upload store lock poisoned")
}

#[async_trait::async_trait]
impl UploadStore for MemoryUploadStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_upload(&self, upload: &Upload) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.uploads.insert(upload.id.clone(), upload.clone());
        debug!("MemoryUploadStore: stored upload '{}'", upload.id);
        Ok(())
    }

    async fn put_rows(&self, upload_id: &str, start: usize, rows: &[NormalizedRow]) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let stored = inner.rows.entry(upload_id.to_string()).or_default();
        for (offset, row) in rows.iter().enumerate() {
            stored.insert(start + offset, row.clone());
        }
        Ok(())
    }

    async fn get_upload(&self, upload_id: &str) -> Result<Option<Upload>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.uploads.get(upload_id).cloned())
    }

    async fn list_uploads(&self) -> Result<Vec<Upload>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut uploads: Vec<Upload> = inner.uploads.values().cloned().collect();
        sort_newest_first(&mut uploads);
        Ok(uploads)
    }

    async fn get_rows(&self, upload_id: &str) -> Result<Vec<NormalizedRow>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .rows
            .get(upload_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// RFC 3339 timestamps with a fixed offset sort lexically.
pub fn sort_newest_first(uploads: &mut [Upload]) {
    uploads.sort_by(|a, b| {
        b.uploaded_at
            .cmp(&a.uploaded_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ============================================================================
// Pipeline
// ============================================================================

/// A file submitted for ingestion by an authenticated principal.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub uploaded_by: String,
    pub module: Module,
    pub report_type: ReportType,
    pub filename: String,
    pub data: Vec<u8>,
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub upload_id: String,
    pub status: UploadStatus,
    pub row_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The file could not be ingested. The upload was recorded as failed.
    #[error("{source}")]
    Ingest {
        upload_id: String,
        #[source]
        source: IngestError,
    },
    /// Metadata or a row batch could not be written.
    #[error("Failed to persist upload {upload_id}: {cause:#}")]
    Persist {
        upload_id: String,
        cause: anyhow::Error,
    },
}

/// Hex sha256 of the file contents.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Ingest a file and persist its metadata and rows.
///
/// Metadata is written once with its terminal status. Rows follow in
/// batches of [`ROW_BATCH_SIZE`]; a failed batch stops the upload but
/// batches already written stay in the store.
pub async fn process_upload(
    store: &dyn UploadStore,
    request: UploadRequest,
) -> Result<UploadReceipt, UploadError> {
    let mut upload = Upload::new(
        request.uploaded_by,
        request.module,
        request.report_type,
        request.filename,
    );
    upload.content_hash = Some(content_hash(&request.data));

    info!(
        "Processing upload {} ({}, {} bytes, {})",
        upload.id,
        upload.filename,
        request.data.len(),
        upload.report_type
    );

    let outcome = match ingest(&request.data, request.report_type) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Upload {} failed ingestion: {}", upload.id, e);
            upload.fail(e.to_string());
            if let Err(persist_err) = store.put_upload(&upload).await {
                error!(
                    "Failed to record failed upload {}: {:#}",
                    upload.id, persist_err
                );
            }
            return Err(UploadError::Ingest {
                upload_id: upload.id,
                source: e,
            });
        }
    };

    let mut rows = outcome.rows;
    for row in rows.iter_mut() {
        row.upload_id = upload.id.clone();
    }
    upload.complete(outcome.row_count, outcome.columns);

    let persist_err = |upload_id: &str, cause: anyhow::Error| {
        error!("Persistence failed for upload {}: {:#}", upload_id, cause);
        UploadError::Persist {
            upload_id: upload_id.to_string(),
            cause,
        }
    };

    store
        .put_upload(&upload)
        .await
        .map_err(|e| persist_err(&upload.id, e))?;

    for (batch_idx, batch) in rows.chunks(ROW_BATCH_SIZE).enumerate() {
        let start = batch_idx * ROW_BATCH_SIZE;
        store
            .put_rows(&upload.id, start, batch)
            .await
            .map_err(|e| persist_err(&upload.id, e.context(format!("row batch at {}", start))))?;
        debug!("Upload {}: wrote rows {}..{}", upload.id, start, start + batch.len());
    }

    info!(
        "Upload {} completed via {} store: {} rows",
        upload.id,
        store.name(),
        upload.row_count
    );

    Ok(UploadReceipt {
        upload_id: upload.id,
        status: upload.status,
        row_count: upload.row_count,
    })
}
