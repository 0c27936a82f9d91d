use std::{fmt::Display, str::FromStr};

use jiff::civil::{Date, DateTime, Time};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DOWNLOAD_PRICE_DAY_URL: &str = "https://api.esios.ree.es/archives/71/download";

pub const HOURS_PER_DAY: usize = 24;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PvpcError {
    #[error("Expected 23, 24 or 25 rows for {date} {toll}, got {count}")]
    UnexpectedRowCount {
        date: String,
        toll: String,
        count: usize,
    },
    #[error("Hours for {date} {toll} are not 0..23 each exactly once: {hours:?}")]
    InvalidHours {
        date: String,
        toll: String,
        hours: Vec<u8>,
    },
    #[error("Sheet '{expected}' not found (and no legacy sheet '{legacy}'), available: {available:?}")]
    MissingSheet {
        expected: String,
        legacy: String,
        available: Vec<String>,
    },
    #[error("Sheet '{sheet}' has only {found} non-empty columns, need {needed}")]
    MissingColumns {
        sheet: String,
        found: usize,
        needed: usize,
    },
    #[error("Sheet '{sheet}' row {row}: can't read column '{column}' from {value}")]
    InvalidCell {
        sheet: String,
        row: usize,
        column: String,
        value: String,
    },
    #[error("No files found for date {0}")]
    MissingFiles(Date),
    #[error("Field '{field}' mismatch between hourly and daily records: '{hourly}' != '{daily}'")]
    FieldMismatch {
        field: String,
        hourly: String,
        daily: String,
    },
    #[error("Unknown location {0}")]
    UnknownLocation(String),
    #[error("Start date {start} is after end date {end}")]
    InvalidRange { start: Date, end: Date },
    #[error("Download failed for {url}: {status}")]
    DownloadFailed { url: String, status: String },
}

/// PVPC price zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Location {
    /// Península, Canarias y Baleares
    #[serde(rename = "PCB")]
    Pcb,
    /// Ceuta y Melilla
    #[serde(rename = "CYM")]
    Cym,
}

impl Location {
    pub fn all() -> [Location; 2] {
        [Location::Pcb, Location::Cym]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Location::Pcb => "Península, Canarias y Baleares",
            Location::Cym => "Ceuta y Melilla",
        }
    }
}

impl FromStr for Location {
    type Err = PvpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PCB" => Ok(Location::Pcb),
            "CYM" => Ok(Location::Cym),
            _ => Err(PvpcError::UnknownLocation(s.to_string())),
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Pcb => write!(f, "PCB"),
            Location::Cym => write!(f, "CYM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregationLevel {
    NoAggregation,
    ByDay,
}

impl Display for AggregationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationLevel::NoAggregation => write!(f, "NO_AGGREGATION"),
            AggregationLevel::ByDay => write!(f, "BY_DAY"),
        }
    }
}

/// One row of the per toll csv files.  Prices are in EUR/kWh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: Date,
    /// Hour beginning, 0..23 (24 only shows up on the fall back day)
    pub hour: u8,
    pub toll: String,
    pub period: u8,
    #[serde(rename = "PVPC_price_kwh")]
    pub pvpc_price_kwh: f64,
    #[serde(rename = "TEU_charges_kwh")]
    pub teu_charges_kwh: f64,
    #[serde(rename = "TCU_production_price_kwh")]
    pub tcu_production_price_kwh: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HourlyPriceRecord {
    pub date: Date,
    pub hour: u8,
    pub location: Location,
    pub toll: String,
    pub period: u8,
    #[serde(rename = "PVPC_price_kwh")]
    pub pvpc_price_kwh: f64,
    #[serde(rename = "TEU_charges_kwh")]
    pub teu_charges_kwh: f64,
    #[serde(rename = "TCU_production_price_kwh")]
    pub tcu_production_price_kwh: f64,
    pub datetime_spain: DateTime,
}

impl HourlyPriceRecord {
    pub fn from_row(row: &PriceRow, location: Location) -> Result<HourlyPriceRecord, jiff::Error> {
        let time = Time::new(row.hour as i8, 0, 0, 0)?;
        Ok(HourlyPriceRecord {
            date: row.date,
            hour: row.hour,
            location,
            toll: row.toll.clone(),
            period: row.period,
            pvpc_price_kwh: row.pvpc_price_kwh,
            teu_charges_kwh: row.teu_charges_kwh,
            tcu_production_price_kwh: row.tcu_production_price_kwh,
            datetime_spain: row.date.to_datetime(time),
        })
    }
}

/// All the hours of one day packed in arrays, index i is hour i.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DayAggregateRecord {
    pub datetime_spain: DateTime,
    pub date: Date,
    pub location: Location,
    pub toll: String,
    pub period: Vec<u8>,
    #[serde(rename = "PVPC_price_kwh")]
    pub pvpc_price_kwh: Vec<f64>,
    #[serde(rename = "TEU_charges_kwh")]
    pub teu_charges_kwh: Vec<f64>,
    #[serde(rename = "TCU_production_price_kwh")]
    pub tcu_production_price_kwh: Vec<f64>,
}
