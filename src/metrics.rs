//! Hotel KPIs over normalized rows.
//!
//! Pure functions: no I/O, no shared state. Rows lacking the relevant
//! fields contribute nothing, so every aggregate degrades to zero or empty.

use crate::report_type::CanonicalField;
use crate::schema::NormalizedRow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Occupancy {
    /// Available rooms.
    pub rooms: u32,
    pub occupied: usize,
    /// Percentage, 0..=100 for sane inputs.
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Revenue {
    pub total: f64,
    pub average: f64,
    /// Period-over-period change. Always 0 without historical data.
    pub change: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guests {
    pub total: usize,
    pub average: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomTypeStats {
    pub revenue: f64,
    pub occupancy: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: String,
    pub revenue: f64,
    pub occupancy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
}

/// Aggregate KPIs for a row set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsMetrics {
    pub occupancy: Occupancy,
    pub revenue: Revenue,
    pub adr: f64,
    pub revpar: f64,
    pub guests: Guests,
    pub market_segment: BTreeMap<String, u64>,
    pub source_of_business: BTreeMap<String, u64>,
    pub room_type_performance: BTreeMap<String, RoomTypeStats>,
    pub trend: Vec<TrendPoint>,
    pub alerts: Vec<Alert>,
}

/// Distinct non-empty room numbers against the configured room count.
pub fn occupancy(rows: &[NormalizedRow], total_rooms: u32) -> Occupancy {
    let occupied = rows
        .iter()
        .filter_map(|row| row.text(CanonicalField::RoomNumber))
        .filter(|room| !room.is_empty())
        .collect::<BTreeSet<_>>()
        .len();

    let rate = if total_rooms == 0 {
        0.0
    } else {
        occupied as f64 / total_rooms as f64 * 100.0
    };

    Occupancy {
        rooms: total_rooms,
        occupied,
        rate,
    }
}

/// Row revenue: totalCharge when present, else revenue.
fn charge_or_revenue(row: &NormalizedRow) -> Option<f64> {
    if row.has(CanonicalField::TotalCharge) {
        Some(row.number(CanonicalField::TotalCharge).unwrap_or(0.0))
    } else if row.has(CanonicalField::Revenue) {
        Some(row.number(CanonicalField::Revenue).unwrap_or(0.0))
    } else {
        None
    }
}

/// Room-type revenue: revenue when present, else totalCharge.
fn revenue_or_charge(row: &NormalizedRow) -> f64 {
    if row.has(CanonicalField::Revenue) {
        row.number(CanonicalField::Revenue).unwrap_or(0.0)
    } else {
        row.number(CanonicalField::TotalCharge).unwrap_or(0.0)
    }
}

pub fn revenue(rows: &[NormalizedRow]) -> Revenue {
    let values: Vec<f64> = rows.iter().filter_map(charge_or_revenue).collect();
    let total: f64 = values.iter().sum();
    let average = if values.is_empty() {
        0.0
    } else {
        total / values.len() as f64
    };

    Revenue {
        total,
        average,
        change: 0.0,
    }
}

/// Average Daily Rate: mean of roomRate (or rate) over rows carrying one.
pub fn adr(rows: &[NormalizedRow]) -> f64 {
    let rates: Vec<f64> = rows
        .iter()
        .filter_map(|row| {
            if row.has(CanonicalField::RoomRate) {
                Some(row.number(CanonicalField::RoomRate).unwrap_or(0.0))
            } else if row.has(CanonicalField::Rate) {
                Some(row.number(CanonicalField::Rate).unwrap_or(0.0))
            } else {
                None
            }
        })
        .collect();

    if rates.is_empty() {
        return 0.0;
    }
    rates.iter().sum::<f64>() / rates.len() as f64
}

/// Revenue Per Available Room.
pub fn revpar(total_revenue: f64, available_rooms: u32) -> f64 {
    if available_rooms == 0 {
        return 0.0;
    }
    total_revenue / available_rooms as f64
}

fn text_or<'a>(row: &'a NormalizedRow, field: CanonicalField, default: &'a str) -> &'a str {
    match row.text(field) {
        Some(s) if !s.is_empty() => s,
        _ => default,
    }
}

/// Row counts by nationality, falling back to company.
pub fn market_segment(rows: &[NormalizedRow]) -> BTreeMap<String, u64> {
    let mut segment = BTreeMap::new();
    for row in rows {
        let key = if row.has(CanonicalField::Nationality) {
            text_or(row, CanonicalField::Nationality, "Unknown")
        } else if row.has(CanonicalField::Company) {
            text_or(row, CanonicalField::Company, "Individual")
        } else {
            continue;
        };
        *segment.entry(key.to_string()).or_insert(0) += 1;
    }
    segment
}

/// Row counts by payment method.
pub fn source_of_business(rows: &[NormalizedRow]) -> BTreeMap<String, u64> {
    let mut source = BTreeMap::new();
    for row in rows.iter().filter(|r| r.has(CanonicalField::PaymentMethod)) {
        let method = text_or(row, CanonicalField::PaymentMethod, "Other");
        *source.entry(method.to_string()).or_insert(0) += 1;
    }
    source
}

pub fn room_type_performance(rows: &[NormalizedRow]) -> BTreeMap<String, RoomTypeStats> {
    let mut performance: BTreeMap<String, RoomTypeStats> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.has(CanonicalField::RoomType)) {
        let room_type = text_or(row, CanonicalField::RoomType, "Standard");
        let stats = performance.entry(room_type.to_string()).or_default();
        stats.revenue += revenue_or_charge(row);
        stats.occupancy += 1;
    }
    performance
}

/// Per-date revenue and occupancy, ascending by date.
pub fn trend(rows: &[NormalizedRow]) -> Vec<TrendPoint> {
    let mut by_date: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for row in rows {
        let date = match row.text(CanonicalField::Date) {
            Some(d) if !d.is_empty() => d,
            _ => continue,
        };
        let entry = by_date.entry(date).or_insert((0.0, 0.0));
        entry.0 += charge_or_revenue(row).unwrap_or(0.0);
        entry.1 += row.number(CanonicalField::Occupancy).unwrap_or(0.0);
    }

    by_date
        .into_iter()
        .map(|(date, (revenue, occupancy))| TrendPoint {
            date: date.to_string(),
            revenue,
            occupancy,
        })
        .collect()
}

/// Threshold alerts. Rules are independent; several may fire at once.
pub fn detect_alerts(metrics: &AnalyticsMetrics) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let rate = metrics.occupancy.rate;

    if rate < 50.0 {
        alerts.push(Alert {
            severity: Severity::High,
            message: format!("Low occupancy rate: {:.1}%", rate),
        });
    }

    if rate > 90.0 {
        alerts.push(Alert {
            severity: Severity::Medium,
            message: format!("High occupancy rate: {:.1}%", rate),
        });
    }

    if metrics.revenue.total == 0.0 {
        alerts.push(Alert {
            severity: Severity::High,
            message: "No revenue data recorded".to_string(),
        });
    }

    alerts
}

/// Inclusive reporting window; an open end is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Period {
    pub fn is_unbounded(&self) -> bool {
        self.start_date.is_none() && self.end_date.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date.map_or(true, |start| date >= start)
            && self.end_date.map_or(true, |end| date <= end)
    }
}

/// Business date of a row: `date`, else `checkInDate`. Datetime text is
/// truncated to its calendar day.
pub fn row_date(row: &NormalizedRow) -> Option<NaiveDate> {
    [CanonicalField::Date, CanonicalField::CheckInDate]
        .into_iter()
        .filter_map(|field| row.text(field))
        .find_map(|text| {
            let day = text.trim().get(..10)?;
            NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
        })
}

/// All KPIs for `rows`, alerts included.
pub fn compute_analytics(rows: &[NormalizedRow], total_rooms: u32) -> AnalyticsMetrics {
    let occupancy = occupancy(rows, total_rooms);
    let revenue = revenue(rows);
    let revpar = revpar(revenue.total, occupancy.rooms);

    let mut metrics = AnalyticsMetrics {
        adr: adr(rows),
        revpar,
        guests: Guests {
            total: rows.len(),
            // A row set covers one reporting period.
            average: rows.len() as f64,
        },
        market_segment: market_segment(rows),
        source_of_business: source_of_business(rows),
        room_type_performance: room_type_performance(rows),
        trend: trend(rows),
        occupancy,
        revenue,
        alerts: Vec::new(),
    };
    metrics.alerts = detect_alerts(&metrics);
    metrics
}
