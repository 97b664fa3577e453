//! Header-to-field mapping for uploaded sheets.
//!
//! Each report type has a static synonym table. Headers are matched exactly
//! first, then case-insensitively; anything else is left unmapped.

use crate::report_type::{CanonicalField, ReportType};
use serde::Serialize;

use CanonicalField::*;

/// Header synonym table for a report type.
pub fn header_table(report_type: ReportType) -> &'static [(&'static str, CanonicalField)] {
    match report_type {
        ReportType::InHouseGuestList => &[
            ("Guest Name", GuestName),
            ("Name", GuestName),
            ("Room No", RoomNumber),
            ("Room Number", RoomNumber),
            ("Room", RoomNumber),
            ("Check In", CheckInDate),
            ("Check In Date", CheckInDate),
            ("Arrival", CheckInDate),
            ("Check Out", CheckOutDate),
            ("Check Out Date", CheckOutDate),
            ("Departure", CheckOutDate),
            ("Nights", Nights),
            ("No. Of Nights", Nights),
            ("Rate", RoomRate),
            ("Room Rate", RoomRate),
            ("Total", TotalCharge),
            ("Total Charge", TotalCharge),
            ("Nationality", Nationality),
            ("Nation", Nationality),
            ("Country", Nationality),
            ("Company", Company),
        ],
        ReportType::WalkInGuestList => &[
            ("Guest Name", GuestName),
            ("Name", GuestName),
            ("Room No", RoomNumber),
            ("Room Number", RoomNumber),
            ("Check In", CheckInDate),
            ("Check In Date", CheckInDate),
            ("Check Out", CheckOutDate),
            ("Check Out Date", CheckOutDate),
            ("Room Type", RoomType),
            ("Type", RoomType),
            ("Rate", RoomRate),
            ("Total", TotalCharge),
            ("Total Charge", TotalCharge),
        ],
        ReportType::RoomRevenueBreakdown => &[
            ("Date", Date),
            ("Room Type", RoomType),
            ("Type", RoomType),
            ("Rooms", Rooms),
            ("No. of Rooms", Rooms),
            ("Rate", Rate),
            ("Room Rate", Rate),
            ("Revenue", Revenue),
            ("Total Revenue", Revenue),
            ("Occupancy", Occupancy),
            ("Occupied Rooms", Occupancy),
        ],
        ReportType::PaymentJournal => &[
            ("Date", Date),
            ("Payment Method", PaymentMethod),
            ("Method", PaymentMethod),
            ("Amount", Amount),
            ("User", User),
            ("Cashier", User),
            ("Description", Description),
            ("Notes", Description),
        ],
        ReportType::TurnoverReport => &[
            ("Date", Date),
            ("Department", Department),
            ("Dept", Department),
            ("Category", Category),
            ("Amount", Amount),
            ("Cashier", Cashier),
            ("User", Cashier),
        ],
        ReportType::SummaryCashier => &[
            ("Date", Date),
            ("Cashier", Cashier),
            ("Name", Cashier),
            ("Opening", Opening),
            ("Opening Balance", Opening),
            ("Closing", Closing),
            ("Closing Balance", Closing),
            ("Difference", Difference),
            ("Variance", Difference),
            ("Status", Status),
        ],
        ReportType::NationCountry => &[
            ("Nationality", Nationality),
            ("Nation", Nationality),
            ("Country", Nationality),
            ("Guest Count", GuestCount),
            ("No. of Guests", GuestCount),
            ("Rooms", RoomsOccupied),
            ("Rooms Occupied", RoomsOccupied),
            ("Revenue", Revenue),
            ("Total Revenue", Revenue),
        ],
        ReportType::ComplimentGuestList => &[
            ("Guest Name", GuestName),
            ("Name", GuestName),
            ("Room No", RoomNumber),
            ("Room Number", RoomNumber),
            ("Compliment Type", ComplimentType),
            ("Type", ComplimentType),
            ("Amount", Amount),
            ("Date", Date),
            ("Authorized By", AuthorizedBy),
            ("Approved By", AuthorizedBy),
        ],
        ReportType::CostControlAmenities => &[
            ("Date", Date),
            ("Amenity Type", AmenityType),
            ("Type", AmenityType),
            ("Quantity", Quantity),
            ("Qty", Quantity),
            ("Unit Cost", UnitCost),
            ("Cost per Unit", UnitCost),
            ("Total Cost", TotalCost),
            ("Total", TotalCost),
        ],
        ReportType::CostControlLaundry => &[
            ("Date", Date),
            ("Laundry Type", LaundryType),
            ("Type", LaundryType),
            ("Pieces", Pieces),
            ("No. of Pieces", Pieces),
            ("Cost per Piece", CostPerPiece),
            ("Unit Cost", CostPerPiece),
            ("Total Cost", TotalCost),
            ("Total", TotalCost),
        ],
        ReportType::GuestLaundry => &[
            ("Date", Date),
            ("Room No", RoomNumber),
            ("Room Number", RoomNumber),
            ("Laundry Items", LaundryItems),
            ("Items", LaundryItems),
            ("Amount", Amount),
            ("Charged to Room", ChargedToRoom),
            ("Room Charge", ChargedToRoom),
        ],
    }
}

/// One mapped column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedColumn {
    /// Header exactly as it appears in the sheet.
    pub header: String,
    pub field: CanonicalField,
}

/// Raw header → canonical field mapping for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    columns: Vec<MappedColumn>,
    unmapped: Vec<String>,
}

impl ColumnMapping {
    /// Mapped columns in sheet order.
    pub fn columns(&self) -> &[MappedColumn] {
        &self.columns
    }

    /// Headers that matched no table entry.
    pub fn unmapped(&self) -> &[String] {
        &self.unmapped
    }

    /// Canonical field for a raw header, if mapped.
    pub fn get(&self, header: &str) -> Option<CanonicalField> {
        self.columns
            .iter()
            .find(|c| c.header == header)
            .map(|c| c.field)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Build the column mapping for the observed headers.
///
/// Several headers may resolve to the same field when the table defines
/// synonyms; the ingestor applies them in order, so the later column wins.
pub fn map_columns<S: AsRef<str>>(headers: &[S], report_type: ReportType) -> ColumnMapping {
    let table = header_table(report_type);
    let mut mapping = ColumnMapping::default();

    for header in headers {
        let header = header.as_ref();
        if mapping.columns.iter().any(|c| c.header == header) {
            continue;
        }

        match match_header(table, header.trim()) {
            Some(field) => mapping.columns.push(MappedColumn {
                header: header.to_string(),
                field,
            }),
            None => mapping.unmapped.push(header.to_string()),
        }
    }

    mapping
}

fn match_header(table: &[(&str, CanonicalField)], trimmed: &str) -> Option<CanonicalField> {
    if let Some((_, field)) = table.iter().find(|(key, _)| *key == trimmed) {
        return Some(*field);
    }

    let lower = trimmed.to_lowercase();
    table
        .iter()
        .find(|(key, _)| key.to_lowercase() == lower)
        .map(|(_, field)| *field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_house_headers_map_to_fields() {
        let mapping = map_columns(&["Room No", "Guest Name", "Rate"], ReportType::InHouseGuestList);
        assert_eq!(mapping.get("Room No"), Some(RoomNumber));
        assert_eq!(mapping.get("Guest Name"), Some(GuestName));
        assert_eq!(mapping.get("Rate"), Some(RoomRate));
        assert_eq!(mapping.len(), 3);
    }

    #[test]
    fn test_every_table_header_maps_for_its_type() {
        for report_type in ReportType::ALL {
            let table = header_table(report_type);
            let headers: Vec<&str> = table.iter().map(|(h, _)| *h).collect();
            let mapping = map_columns(&headers, report_type);
            assert_eq!(mapping.len(), table.len(), "{}", report_type);
            for (header, field) in table {
                assert_eq!(mapping.get(header), Some(*field), "{} / {}", report_type, header);
            }
            assert!(mapping.unmapped().is_empty());
        }
    }

    #[test]
    fn test_table_fields_belong_to_schema() {
        for report_type in ReportType::ALL {
            for (header, field) in header_table(report_type) {
                assert!(
                    report_type.schema().contains(field),
                    "{} maps '{}' to {} outside its schema",
                    report_type,
                    header,
                    field
                );
            }
        }
    }

    #[test]
    fn test_case_insensitive_match() {
        let lower = map_columns(&["room no"], ReportType::InHouseGuestList);
        let exact = map_columns(&["Room No"], ReportType::InHouseGuestList);
        assert_eq!(lower.get("room no"), exact.get("Room No"));
        assert_eq!(lower.get("room no"), Some(RoomNumber));
    }

    #[test]
    fn test_whitespace_is_trimmed_but_raw_header_kept() {
        let mapping = map_columns(&["  Total Charge "], ReportType::WalkInGuestList);
        assert_eq!(mapping.columns()[0].header, "  Total Charge ");
        assert_eq!(mapping.get("  Total Charge "), Some(TotalCharge));
    }

    #[test]
    fn test_unrecognized_header_is_unmapped() {
        for report_type in ReportType::ALL {
            let mapping = map_columns(&["Frobnicate"], report_type);
            assert!(mapping.is_empty());
            assert_eq!(mapping.unmapped(), ["Frobnicate".to_string()]);
        }
    }

    #[test]
    fn test_same_header_resolves_per_type() {
        let walk_in = map_columns(&["Type"], ReportType::WalkInGuestList);
        let laundry = map_columns(&["Type"], ReportType::CostControlLaundry);
        assert_eq!(walk_in.get("Type"), Some(RoomType));
        assert_eq!(laundry.get("Type"), Some(LaundryType));
    }

    #[test]
    fn test_synonyms_both_mapped() {
        let mapping = map_columns(&["Rate", "Room Rate"], ReportType::InHouseGuestList);
        assert_eq!(mapping.get("Rate"), Some(RoomRate));
        assert_eq!(mapping.get("Room Rate"), Some(RoomRate));
    }
}
