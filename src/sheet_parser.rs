//! Workbook decoding for uploaded reports (.xlsx/.xlsm/.xlsb, .xls, .ods and CSV).
//!
//! Only the first sheet is read. Its first row supplies the headers and every
//! following non-blank row becomes a [`RawRecord`].

use crate::coerce::CellValue;
use crate::ingest::IngestError;
use crate::schema::RawRecord;
use calamine::{open_workbook_from_rs, Data, Ods, Range, Reader, Xls, Xlsb, Xlsx};
use chrono::{NaiveDate, NaiveDateTime};
use std::io::{Cursor, Read, Seek};
use tracing::{debug, warn};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const CFB_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
/// Stored `mimetype` entry that opens every OpenDocument spreadsheet, right
/// after the 30-byte local file header.
const ODS_MIMETYPE_ENTRY: &[u8] = b"mimetypeapplication/vnd.oasis.opendocument.spreadsheet";
const ZIP_LOCAL_HEADER_LEN: usize = 30;

/// Header prefix given to columns whose header cell is blank.
const BLANK_HEADER: &str = "__EMPTY";

/// Container format, detected from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    OpenXml,
    OpenDocument,
    Biff,
    Csv,
}

/// First sheet of a workbook, split into header-keyed records.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
    pub source_type: SourceType,
}

impl RawSheet {
    /// Headers that name a real column: either titled in the sheet or
    /// holding at least one value.
    pub fn columns(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|h| {
                !h.starts_with(BLANK_HEADER) || self.records.iter().any(|r| r.get(h).is_some())
            })
            .cloned()
            .collect()
    }
}

pub fn detect_source_type(data: &[u8]) -> SourceType {
    if data.starts_with(ZIP_MAGIC) {
        match data.get(ZIP_LOCAL_HEADER_LEN..) {
            Some(entry) if entry.starts_with(ODS_MIMETYPE_ENTRY) => SourceType::OpenDocument,
            _ => SourceType::OpenXml,
        }
    } else if data.starts_with(CFB_MAGIC) {
        SourceType::Biff
    } else {
        SourceType::Csv
    }
}

/// Decode `data` and read its first sheet.
pub fn read_first_sheet(data: &[u8]) -> Result<RawSheet, IngestError> {
    match detect_source_type(data) {
        SourceType::OpenXml => read_open_xml(data),
        SourceType::OpenDocument => {
            let mut workbook: Ods<_> = open_workbook_from_rs(Cursor::new(data))
                .map_err(|e| IngestError::DecodeFailure(format!("Failed to open workbook: {}", e)))?;
            first_sheet(&mut workbook, SourceType::OpenDocument)
        }
        SourceType::Biff => {
            let mut workbook: Xls<_> = open_workbook_from_rs(Cursor::new(data))
                .map_err(|e| IngestError::DecodeFailure(format!("Failed to open workbook: {}", e)))?;
            first_sheet(&mut workbook, SourceType::Biff)
        }
        SourceType::Csv => parse_csv(data),
    }
}

/// Zip containers are tried as .xlsx, then .xlsb, then .ods (for packages
/// whose `mimetype` entry is not stored first).
fn read_open_xml(data: &[u8]) -> Result<RawSheet, IngestError> {
    let xlsx_err = match open_workbook_from_rs::<Xlsx<_>, _>(Cursor::new(data)) {
        Ok(mut workbook) => return first_sheet(&mut workbook, SourceType::OpenXml),
        Err(e) => e,
    };
    debug!("Not an xlsx container ({}), trying xlsb", xlsx_err);
    if let Ok(mut workbook) = open_workbook_from_rs::<Xlsb<_>, _>(Cursor::new(data)) {
        return first_sheet(&mut workbook, SourceType::OpenXml);
    }
    if let Ok(mut workbook) = open_workbook_from_rs::<Ods<_>, _>(Cursor::new(data)) {
        return first_sheet(&mut workbook, SourceType::OpenDocument);
    }
    Err(IngestError::DecodeFailure(format!(
        "Failed to open workbook: {}",
        xlsx_err
    )))
}

fn first_sheet<RS, R>(workbook: &mut R, source_type: SourceType) -> Result<RawSheet, IngestError>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(IngestError::NoSheet)?;

    let range = workbook.worksheet_range(&name).map_err(|e| {
        warn!("Unreadable sheet '{}': {}", name, e);
        IngestError::DecodeFailure(format!("Failed to read sheet '{}': {}", name, e))
    })?;

    Ok(range_to_raw_sheet(&name, &range, source_type))
}

/// Convert a calamine Range into a RawSheet. First row = headers.
fn range_to_raw_sheet(name: &str, range: &Range<Data>, source_type: SourceType) -> RawSheet {
    let mut row_iter = range.rows();

    let headers = match row_iter.next() {
        Some(header_row) => normalize_headers(header_row.iter().map(header_text).collect()),
        None => Vec::new(),
    };

    let mut records = Vec::new();
    for row in row_iter {
        let mut record = RawRecord::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            record.push(header.clone(), cell_to_value(cell));
        }
        // Skip completely empty rows
        if !record.is_empty() {
            records.push(record);
        }
    }

    RawSheet {
        name: name.to_string(),
        headers,
        records,
        source_type,
    }
}

/// Parse a CSV file as a single-sheet workbook.
fn parse_csv(data: &[u8]) -> Result<RawSheet, IngestError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| IngestError::DecodeFailure("Unrecognized spreadsheet format".to_string()))?;
    if text.contains('\0') {
        return Err(IngestError::DecodeFailure(
            "Unrecognized spreadsheet format".to_string(),
        ));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = normalize_headers(
        reader
            .headers()
            .map_err(|e| IngestError::DecodeFailure(format!("Failed to read CSV headers: {}", e)))?
            .iter()
            .map(|h| h.to_string())
            .collect(),
    );

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result
            .map_err(|e| IngestError::DecodeFailure(format!("Failed to read CSV record: {}", e)))?;
        let mut record = RawRecord::new();
        for (header, field) in headers.iter().zip(row.iter()) {
            record.push(header.clone(), infer_csv_cell(field));
        }
        if !record.is_empty() {
            records.push(record);
        }
    }

    Ok(RawSheet {
        name: "Sheet1".to_string(),
        headers,
        records,
        source_type: SourceType::Csv,
    })
}

/// Make headers distinct: blanks become `__EMPTY`, `__EMPTY_1`, ... and
/// repeats get `_1`, `_2` suffixes.
fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(raw.len());

    for header in raw {
        let base = if header.trim().is_empty() {
            BLANK_HEADER.to_string()
        } else {
            header
        };

        let mut candidate = base.clone();
        let mut suffix = 0;
        while seen.contains(&candidate) {
            suffix += 1;
            candidate = format!("{}_{}", base, suffix);
        }
        seen.push(candidate);
    }

    seen
}

/// Typed value of a CSV field: numbers and TRUE/FALSE are recognized.
fn infer_csv_cell(field: &str) -> CellValue {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return CellValue::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return CellValue::Bool(false);
    }

    let numeric_start = trimmed
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        .unwrap_or(false);
    if numeric_start {
        if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() {
                return CellValue::Number(n);
            }
        }
    }

    CellValue::Text(field.to_string())
}

fn header_text(cell: &Data) -> String {
    match cell_to_value(cell) {
        CellValue::Text(s) => s,
        CellValue::Number(n) => crate::coerce::format_number(n),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Date(dt) => dt.date().format("%Y-%m-%d").to_string(),
        CellValue::Empty => String::new(),
    }
}

/// Convert a calamine cell to a typed cell value.
fn cell_to_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(CellValue::Date)
            .unwrap_or(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) => parse_iso_datetime(s)
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(_) => CellValue::Empty,
    }
}

/// Convert an Excel serial date number to a calendar datetime.
/// Excel epoch: 1899-12-30, with the 1900 leap year bug (serials below 60
/// count from 1899-12-31).
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }

    let days = serial.trunc() as i64;
    let secs = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    let epoch = if days < 60 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };

    epoch
        .checked_add_signed(chrono::Duration::days(days))?
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(chrono::Duration::seconds(secs))
}

fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
