//! Ingestion data model: raw records, normalized rows and upload metadata.

use crate::coerce::{CellValue, FieldValue};
use crate::report_type::{CanonicalField, Module, ReportType};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Current UTC time as an ISO8601 timestamp.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// One spreadsheet row: header → cell, in column order.
///
/// Empty cells are not stored, so a header absent from the record means the
/// cell was blank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    cells: Vec<(String, CellValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cell. Empty cells are dropped.
    pub fn push(&mut self, header: impl Into<String>, value: CellValue) {
        if !value.is_empty() {
            self.cells.push((header.into(), value));
        }
    }

    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (header, value) in &self.cells {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RawRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = RawRecord;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header to cell value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RawRecord, A::Error> {
                let mut record = RawRecord::new();
                while let Some((header, value)) = access.next_entry::<String, CellValue>()? {
                    record.push(header, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// One ingested row after header mapping and value coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    #[serde(rename = "_id")]
    pub id: String,
    /// Empty until the upload pipeline assigns an upload id.
    #[serde(rename = "_uploadId", default)]
    pub upload_id: String,
    /// 1-based position within the sheet's data rows.
    #[serde(rename = "_rowNumber")]
    pub row_number: usize,
    #[serde(rename = "_rawData", default)]
    pub raw: RawRecord,
    #[serde(flatten)]
    pub fields: BTreeMap<CanonicalField, FieldValue>,
}

impl NormalizedRow {
    pub fn new(row_number: usize, raw: RawRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            upload_id: String::new(),
            row_number,
            raw,
            fields: BTreeMap::new(),
        }
    }

    /// Set a field; a later write to the same field replaces the earlier one.
    pub fn set(&mut self, field: CanonicalField, value: FieldValue) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: CanonicalField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn has(&self, field: CanonicalField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn number(&self, field: CanonicalField) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_number)
    }

    pub fn text(&self, field: CanonicalField) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    /// Builder-style setter, mostly for fixtures.
    pub fn with(mut self, field: CanonicalField, value: FieldValue) -> Self {
        self.set(field, value);
        self
    }
}

/// Lifecycle state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: String,
    pub uploaded_at: String,
    pub uploaded_by: String,
    pub module: Module,
    pub report_type: ReportType,
    pub filename: String,
    pub row_count: usize,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Upload {
    pub fn new(
        uploaded_by: String,
        module: Module,
        report_type: ReportType,
        filename: String,
    ) -> Self {
        Self {
            id: format!("upload_{}", Uuid::new_v4().simple()),
            uploaded_at: now_iso8601(),
            uploaded_by,
            module,
            report_type,
            filename,
            row_count: 0,
            status: UploadStatus::Processing,
            error: None,
            columns: Vec::new(),
            content_hash: None,
        }
    }

    pub fn complete(&mut self, row_count: usize, columns: Vec<String>) {
        self.status = UploadStatus::Completed;
        self.row_count = row_count;
        self.columns = columns;
        self.error = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = UploadStatus::Failed;
        self.row_count = 0;
        self.error = Some(message.into());
    }
}
