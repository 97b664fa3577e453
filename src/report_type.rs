//! Report type registry: the closed set of uploadable reports and their
//! canonical field schemas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operational module a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Module {
    FrontOffice,
    Housekeeping,
    #[serde(rename = "room-divition")]
    RoomDivision,
}

impl Module {
    pub const ALL: [Module; 3] = [Module::FrontOffice, Module::Housekeeping, Module::RoomDivision];

    pub fn as_str(self) -> &'static str {
        match self {
            Module::FrontOffice => "front-office",
            Module::Housekeeping => "housekeeping",
            Module::RoomDivision => "room-divition",
        }
    }

    /// Report types uploaded under this module.
    pub fn report_types(self) -> Vec<ReportType> {
        ReportType::ALL
            .into_iter()
            .filter(|t| t.module() == self)
            .collect()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// A name that matches no registry entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown name: {0}")]
pub struct UnknownName(pub String);

/// Spreadsheet report type. Determines the header table and field schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReportType {
    #[serde(rename = "in-house-guest-list")]
    InHouseGuestList,
    #[serde(rename = "walk-in-guest-list")]
    WalkInGuestList,
    #[serde(rename = "room-revenue-breakdown")]
    RoomRevenueBreakdown,
    #[serde(rename = "payment-journal")]
    PaymentJournal,
    #[serde(rename = "turnover-report")]
    TurnoverReport,
    #[serde(rename = "summary-cashier")]
    SummaryCashier,
    #[serde(rename = "nation-country")]
    NationCountry,
    #[serde(rename = "compliment-guest-list")]
    ComplimentGuestList,
    #[serde(rename = "cost-control-amenites")]
    CostControlAmenities,
    #[serde(rename = "cost-control-laundry")]
    CostControlLaundry,
    #[serde(rename = "guest-laundry")]
    GuestLaundry,
}

impl ReportType {
    pub const ALL: [ReportType; 11] = [
        ReportType::InHouseGuestList,
        ReportType::WalkInGuestList,
        ReportType::RoomRevenueBreakdown,
        ReportType::PaymentJournal,
        ReportType::TurnoverReport,
        ReportType::SummaryCashier,
        ReportType::NationCountry,
        ReportType::ComplimentGuestList,
        ReportType::CostControlAmenities,
        ReportType::CostControlLaundry,
        ReportType::GuestLaundry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::InHouseGuestList => "in-house-guest-list",
            ReportType::WalkInGuestList => "walk-in-guest-list",
            ReportType::RoomRevenueBreakdown => "room-revenue-breakdown",
            ReportType::PaymentJournal => "payment-journal",
            ReportType::TurnoverReport => "turnover-report",
            ReportType::SummaryCashier => "summary-cashier",
            ReportType::NationCountry => "nation-country",
            ReportType::ComplimentGuestList => "compliment-guest-list",
            ReportType::CostControlAmenities => "cost-control-amenites",
            ReportType::CostControlLaundry => "cost-control-laundry",
            ReportType::GuestLaundry => "guest-laundry",
        }
    }

    pub fn module(self) -> Module {
        match self {
            ReportType::CostControlAmenities
            | ReportType::CostControlLaundry
            | ReportType::GuestLaundry => Module::Housekeeping,
            _ => Module::FrontOffice,
        }
    }

    /// Canonical fields a row of this report type may carry.
    pub fn schema(self) -> &'static [CanonicalField] {
        use CanonicalField::*;
        match self {
            ReportType::InHouseGuestList => &[
                GuestName,
                RoomNumber,
                CheckInDate,
                CheckOutDate,
                Nights,
                RoomRate,
                TotalCharge,
                Nationality,
                Company,
            ],
            ReportType::WalkInGuestList => &[
                GuestName,
                RoomNumber,
                CheckInDate,
                CheckOutDate,
                RoomType,
                RoomRate,
                TotalCharge,
            ],
            ReportType::RoomRevenueBreakdown => &[Date, RoomType, Rooms, Rate, Revenue, Occupancy],
            ReportType::PaymentJournal => &[Date, PaymentMethod, Amount, User, Description],
            ReportType::TurnoverReport => &[Date, Department, Category, Amount, Cashier],
            ReportType::SummaryCashier => &[Date, Cashier, Opening, Closing, Difference, Status],
            ReportType::NationCountry => &[Nationality, GuestCount, RoomsOccupied, Revenue],
            ReportType::ComplimentGuestList => &[
                GuestName,
                RoomNumber,
                ComplimentType,
                Amount,
                Date,
                AuthorizedBy,
            ],
            ReportType::CostControlAmenities => &[Date, AmenityType, Quantity, UnitCost, TotalCost],
            ReportType::CostControlLaundry => &[Date, LaundryType, Pieces, CostPerPiece, TotalCost],
            ReportType::GuestLaundry => &[Date, RoomNumber, LaundryItems, Amount, ChargedToRoom],
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// Declared value type of a canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Boolean,
}

/// Normalized attribute name shared by all report types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalField {
    GuestName,
    RoomNumber,
    CheckInDate,
    CheckOutDate,
    Nights,
    RoomRate,
    TotalCharge,
    Nationality,
    Company,
    RoomType,
    Date,
    Rooms,
    Rate,
    Revenue,
    Occupancy,
    PaymentMethod,
    Amount,
    User,
    Description,
    Department,
    Category,
    Cashier,
    Opening,
    Closing,
    Difference,
    Status,
    GuestCount,
    RoomsOccupied,
    ComplimentType,
    AuthorizedBy,
    AmenityType,
    Quantity,
    UnitCost,
    TotalCost,
    LaundryType,
    Pieces,
    CostPerPiece,
    LaundryItems,
    ChargedToRoom,
}

impl CanonicalField {
    pub fn kind(self) -> FieldKind {
        use CanonicalField::*;
        match self {
            Nights | RoomRate | TotalCharge | Rooms | Rate | Revenue | Occupancy | Amount
            | Opening | Closing | Difference | GuestCount | RoomsOccupied | Quantity
            | UnitCost | TotalCost | Pieces | CostPerPiece => FieldKind::Number,
            CheckInDate | CheckOutDate | Date => FieldKind::Date,
            ChargedToRoom => FieldKind::Boolean,
            _ => FieldKind::Text,
        }
    }

    /// Wire name (camelCase), as persisted and served.
    pub fn as_str(self) -> &'static str {
        use CanonicalField::*;
        match self {
            GuestName => "guestName",
            RoomNumber => "roomNumber",
            CheckInDate => "checkInDate",
            CheckOutDate => "checkOutDate",
            Nights => "nights",
            RoomRate => "roomRate",
            TotalCharge => "totalCharge",
            Nationality => "nationality",
            Company => "company",
            RoomType => "roomType",
            Date => "date",
            Rooms => "rooms",
            Rate => "rate",
            Revenue => "revenue",
            Occupancy => "occupancy",
            PaymentMethod => "paymentMethod",
            Amount => "amount",
            User => "user",
            Description => "description",
            Department => "department",
            Category => "category",
            Cashier => "cashier",
            Opening => "opening",
            Closing => "closing",
            Difference => "difference",
            Status => "status",
            GuestCount => "guestCount",
            RoomsOccupied => "roomsOccupied",
            ComplimentType => "complimentType",
            AuthorizedBy => "authorizedBy",
            AmenityType => "amenityType",
            Quantity => "quantity",
            UnitCost => "unitCost",
            TotalCost => "totalCost",
            LaundryType => "laundryType",
            Pieces => "pieces",
            CostPerPiece => "costPerPiece",
            LaundryItems => "laundryItems",
            ChargedToRoom => "chargedToRoom",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
