//! Report ingestion: workbook bytes in, normalized rows out.
//!
//! Either the whole file ingests or the call fails; there is no partial
//! result. Mapping misses and unparseable cells are not failures.

use crate::coerce::coerce;
use crate::column_mapper::map_columns;
use crate::report_type::ReportType;
use crate::schema::NormalizedRow;
use crate::sheet_parser::read_first_sheet;
use tracing::{debug, info};

/// Structural ingestion failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("No sheet found in workbook")]
    NoSheet,
    #[error("No data found in sheet")]
    EmptySheet,
    #[error("{0}")]
    DecodeFailure(String),
}

impl IngestError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::NoSheet => "NO_SHEET",
            IngestError::EmptySheet => "EMPTY_SHEET",
            IngestError::DecodeFailure(_) => "DECODE_FAILURE",
        }
    }
}

/// Successful ingestion result.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub rows: Vec<NormalizedRow>,
    pub row_count: usize,
    /// Distinct raw headers observed in the sheet.
    pub columns: Vec<String>,
}

/// Ingest the first sheet of `data` as a report of `report_type`.
pub fn ingest(data: &[u8], report_type: ReportType) -> Result<IngestOutcome, IngestError> {
    let sheet = read_first_sheet(data)?;
    info!(
        "Read {:?} sheet '{}' ({} headers, {} rows) as {}",
        sheet.source_type,
        sheet.name,
        sheet.headers.len(),
        sheet.records.len(),
        report_type
    );

    if sheet.records.is_empty() {
        return Err(IngestError::EmptySheet);
    }

    let mapping = map_columns(&sheet.headers, report_type);
    if !mapping.unmapped().is_empty() {
        debug!("Unmapped headers for {}: {:?}", report_type, mapping.unmapped());
    }

    let columns = sheet.columns();
    let rows: Vec<NormalizedRow> = sheet
        .records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| {
            let mut row = NormalizedRow::new(idx + 1, Default::default());
            for column in mapping.columns() {
                if let Some(value) = record.get(&column.header) {
                    row.set(column.field, coerce(column.field, value));
                }
            }
            row.raw = record;
            row
        })
        .collect();

    info!(
        "Normalized {} rows ({} of {} columns mapped)",
        rows.len(),
        mapping.len(),
        sheet.headers.len()
    );

    Ok(IngestOutcome {
        row_count: rows.len(),
        rows,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::FieldValue;
    use crate::report_type::CanonicalField;
    use std::collections::HashSet;

    #[test]
    fn test_ingest_in_house_list() {
        let csv = b"Room No,Guest Name,Rate,Total,Nationality,Frobnicate\n\
                    101,Alice,\"1,200.50\",2401,FR,x\n\
                    102,Bob,abc,0,,y\n";
        let outcome = ingest(csv, ReportType::InHouseGuestList).unwrap();
        assert_eq!(outcome.row_count, 2);
        assert_eq!(
            outcome.columns,
            vec!["Room No", "Guest Name", "Rate", "Total", "Nationality", "Frobnicate"]
        );

        let first = &outcome.rows[0];
        assert_eq!(first.row_number, 1);
        assert_eq!(first.upload_id, "");
        assert_eq!(first.text(CanonicalField::RoomNumber), Some("101"));
        assert_eq!(first.text(CanonicalField::GuestName), Some("Alice"));
        assert_eq!(first.number(CanonicalField::RoomRate), Some(1200.5));
        assert_eq!(first.number(CanonicalField::TotalCharge), Some(2401.0));
        assert_eq!(first.text(CanonicalField::Nationality), Some("FR"));
        assert_eq!(first.fields.len(), 5);
        assert!(first.raw.get("Frobnicate").is_some());

        let second = &outcome.rows[1];
        assert_eq!(second.row_number, 2);
        assert_eq!(second.number(CanonicalField::RoomRate), Some(0.0));
        assert!(!second.has(CanonicalField::Nationality));
    }

    #[test]
    fn test_ingest_xlsx_in_house_list() {
        let data = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/in_house.xlsx"));
        let outcome = ingest(data, ReportType::InHouseGuestList).unwrap();
        assert_eq!(outcome.row_count, 2);
        assert_eq!(
            outcome.columns,
            vec!["Room No", "Guest Name", "Arrival", "Rate", "No. Of Nights"]
        );

        let first = &outcome.rows[0];
        assert_eq!(first.text(CanonicalField::RoomNumber), Some("305"));
        assert_eq!(first.text(CanonicalField::GuestName), Some("Alice"));
        assert_eq!(first.text(CanonicalField::CheckInDate), Some("2024-03-09"));
        assert_eq!(first.number(CanonicalField::RoomRate), Some(150.5));
        assert_eq!(first.number(CanonicalField::Nights), Some(2.0));

        let second = &outcome.rows[1];
        assert_eq!(second.row_number, 2);
        assert_eq!(second.text(CanonicalField::CheckInDate), Some("2024-03-10"));
        assert_eq!(second.number(CanonicalField::RoomRate), Some(99.0));
    }

    #[test]
    fn test_header_only_xlsx_is_empty() {
        let data = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/header_only.xlsx"));
        let err = ingest(data, ReportType::InHouseGuestList).unwrap_err();
        assert_eq!(err, IngestError::EmptySheet);
    }

    #[test]
    fn test_ingest_ods_guest_list() {
        let data = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/guests.ods"));
        let outcome = ingest(data, ReportType::InHouseGuestList).unwrap();
        assert_eq!(outcome.row_count, 1);
        assert_eq!(outcome.rows[0].text(CanonicalField::RoomNumber), Some("101"));
        assert_eq!(outcome.rows[0].number(CanonicalField::RoomRate), Some(120.25));
    }

    #[test]
    fn test_header_only_sheet_is_empty() {
        let err = ingest(b"Room No,Guest Name\n", ReportType::InHouseGuestList).unwrap_err();
        assert_eq!(err, IngestError::EmptySheet);
        assert_eq!(err.code(), "EMPTY_SHEET");
    }

    #[test]
    fn test_zero_byte_file_is_empty() {
        let err = ingest(b"", ReportType::PaymentJournal).unwrap_err();
        assert_eq!(err, IngestError::EmptySheet);
    }

    #[test]
    fn test_undecodable_bytes() {
        let err = ingest(&[0x00, 0xff, 0x10, 0x80], ReportType::GuestLaundry).unwrap_err();
        assert_eq!(err.code(), "DECODE_FAILURE");
    }

    #[test]
    fn test_n_rows_numbered_with_unique_ids() {
        let mut csv = String::from("Date,Method,Amount\n");
        for i in 0..250 {
            csv.push_str(&format!("2024-01-{:02},Cash,{}\n", i % 28 + 1, i));
        }
        let outcome = ingest(csv.as_bytes(), ReportType::PaymentJournal).unwrap();
        assert_eq!(outcome.rows.len(), 250);

        let ids: HashSet<&str> = outcome.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 250);
        for (idx, row) in outcome.rows.iter().enumerate() {
            assert_eq!(row.row_number, idx + 1);
            assert_eq!(row.number(CanonicalField::Amount), Some(idx as f64));
        }
    }

    #[test]
    fn test_later_synonym_overwrites_earlier() {
        let csv = b"Rate,Room Rate\n100,150\n";
        let outcome = ingest(csv, ReportType::InHouseGuestList).unwrap();
        assert_eq!(outcome.rows[0].number(CanonicalField::RoomRate), Some(150.0));
    }

    #[test]
    fn test_blank_synonym_does_not_overwrite() {
        let csv = b"Rate,Room Rate\n100,\n";
        let outcome = ingest(csv, ReportType::InHouseGuestList).unwrap();
        assert_eq!(outcome.rows[0].number(CanonicalField::RoomRate), Some(100.0));
    }

    #[test]
    fn test_boolean_and_date_fields() {
        let csv = b"Date,Room No,Items,Amount,Charged to Room\n2024-02-01,210,Shirt x2,12.5,yes\n";
        let outcome = ingest(csv, ReportType::GuestLaundry).unwrap();
        let row = &outcome.rows[0];
        assert_eq!(
            row.get(CanonicalField::ChargedToRoom),
            Some(&FieldValue::Boolean(true))
        );
        assert_eq!(row.text(CanonicalField::Date), Some("2024-02-01"));
        assert_eq!(row.text(CanonicalField::LaundryItems), Some("Shirt x2"));
    }

    #[test]
    fn test_reingest_produces_fresh_ids() {
        let csv = b"Room No\n101\n";
        let a = ingest(csv, ReportType::WalkInGuestList).unwrap();
        let b = ingest(csv, ReportType::WalkInGuestList).unwrap();
        assert_ne!(a.rows[0].id, b.rows[0].id);
        assert_eq!(a.rows[0].fields, b.rows[0].fields);
    }
}
