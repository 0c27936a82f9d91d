use std::{error::Error, path::Path};

use calamine::{open_workbook_auto, Data, Reader};
use itertools::Itertools;
use jiff::{
    civil::{date, Date, DateTime},
    ToSpan,
};
use log::warn;

use super::lib_pvpc::{Location, PriceRow, PvpcError};

/// Sheet name for each location in the current file format.
pub const SHEET_NAMES: [(&str, Location); 2] = [
    ("Tabla de Datos PCB", Location::Pcb),
    ("Tabla de Datos CYM", Location::Cym),
];

/// Older files only have one sheet.
pub const LEGACY_SHEET_NAME: &str = "Tabla de Datos";

/// Rows of header noise left after removing the empty rows.
pub const HEADER_ROWS: usize = 3;

pub const COLUMN_NAMES: [&str; 7] = [
    "date",
    "hour",
    "toll",
    "period",
    "PVPC_price_kwh",
    "TEU_charges_kwh",
    "TCU_production_price_kwh",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSheet {
    pub location: Location,
    pub sheet_name: String,
    /// Rows for each toll, in the order the tolls show up in the sheet.
    pub tolls: Vec<(String, Vec<PriceRow>)>,
}

/// Read all the location sheets of one downloaded file.
pub fn read_workbook(path: &Path) -> Result<Vec<ParsedSheet>, Box<dyn Error + Send + Sync>> {
    let mut workbook = open_workbook_auto(path)?;
    let available = workbook.sheet_names().to_vec();
    let mut out: Vec<ParsedSheet> = Vec::new();
    for (expected, location) in SHEET_NAMES {
        let sheet_name = resolve_sheet_name(&available, expected)?;
        if sheet_name != expected {
            warn!(
                "Sheet '{}' not found in {}, using '{}'",
                expected,
                path.display(),
                sheet_name
            );
        }
        let range = workbook.worksheet_range(&sheet_name)?;
        // the first row of the range is the title line of the sheet
        let grid: Vec<Vec<Data>> = range.rows().skip(1).map(|row| row.to_vec()).collect();
        let rows = parse_grid(&sheet_name, &grid)?;
        out.push(ParsedSheet {
            location,
            sheet_name,
            tolls: partition_by_toll(rows),
        });
    }
    Ok(out)
}

pub fn resolve_sheet_name(available: &[String], expected: &str) -> Result<String, PvpcError> {
    if available.iter().any(|name| name == expected) {
        return Ok(expected.to_string());
    }
    if available.iter().any(|name| name == LEGACY_SHEET_NAME) {
        return Ok(LEGACY_SHEET_NAME.to_string());
    }
    Err(PvpcError::MissingSheet {
        expected: expected.to_string(),
        legacy: LEGACY_SHEET_NAME.to_string(),
        available: available.to_vec(),
    })
}

/// Parse the data part of a sheet into rows sorted by hour.
pub fn parse_grid(sheet_name: &str, grid: &[Vec<Data>]) -> Result<Vec<PriceRow>, PvpcError> {
    let cleaned = clean_grid(grid);
    let width = cleaned.first().map_or(0, |row| row.len());
    if cleaned.len() > HEADER_ROWS && width < COLUMN_NAMES.len() {
        return Err(PvpcError::MissingColumns {
            sheet: sheet_name.to_string(),
            found: width,
            needed: COLUMN_NAMES.len(),
        });
    }

    let mut rows: Vec<PriceRow> = Vec::new();
    for (i, row) in cleaned.iter().enumerate().skip(HEADER_ROWS) {
        let invalid = |column: usize| PvpcError::InvalidCell {
            sheet: sheet_name.to_string(),
            row: i,
            column: COLUMN_NAMES[column].to_string(),
            value: format!("{:?}", row[column]),
        };
        let date = cell_to_date(&row[0]).ok_or_else(|| invalid(0))?;
        let hour = match cell_to_f64(&row[1]) {
            Some(v) if (1.0..=25.0).contains(&v) && v.fract() == 0.0 => v as u8 - 1,
            _ => return Err(invalid(1)),
        };
        let toll = cell_to_string(&row[2]).ok_or_else(|| invalid(2))?;
        let period = match cell_to_f64(&row[3]) {
            Some(v) if (0.0..=255.0).contains(&v) && v.fract() == 0.0 => v as u8,
            _ => return Err(invalid(3)),
        };
        let pvpc = cell_to_f64(&row[4]).ok_or_else(|| invalid(4))?;
        let teu = cell_to_f64(&row[5]).ok_or_else(|| invalid(5))?;
        let tcu = cell_to_f64(&row[6]).ok_or_else(|| invalid(6))?;
        rows.push(PriceRow {
            date,
            hour,
            toll,
            period,
            pvpc_price_kwh: pvpc / 1000.0,
            teu_charges_kwh: teu / 1000.0,
            tcu_production_price_kwh: tcu / 1000.0,
        });
    }
    rows.sort_by_key(|row| row.hour);
    Ok(rows)
}

/// Remove the fully empty rows and columns.
pub fn clean_grid(grid: &[Vec<Data>]) -> Vec<Vec<Data>> {
    let rows: Vec<&Vec<Data>> = grid
        .iter()
        .filter(|row| !row.iter().all(is_empty))
        .collect();
    let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);
    let columns: Vec<usize> = (0..width)
        .filter(|&j| rows.iter().any(|row| row.get(j).is_some_and(|c| !is_empty(c))))
        .collect();
    rows.into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|&j| row.get(j).cloned().unwrap_or(Data::Empty))
                .collect()
        })
        .collect()
}

/// Split the rows of a sheet by toll.  Each group stays sorted by hour.
pub fn partition_by_toll(rows: Vec<PriceRow>) -> Vec<(String, Vec<PriceRow>)> {
    let tolls: Vec<String> = rows.iter().map(|row| row.toll.clone()).unique().collect();
    tolls
        .into_iter()
        .map(|toll| {
            let mut group: Vec<PriceRow> =
                rows.iter().filter(|row| row.toll == toll).cloned().collect();
            group.sort_by_key(|row| row.hour);
            (toll, group)
        })
        .collect()
}

fn is_empty(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn cell_to_f64(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn cell_to_date(cell: &Data) -> Option<Date> {
    match cell {
        Data::DateTime(dt) => serial_to_date(dt.as_f64()),
        Data::Float(f) => serial_to_date(*f),
        Data::Int(i) => serial_to_date(*i as f64),
        Data::DateTimeIso(s) | Data::String(s) => parse_date(s.trim()),
        _ => None,
    }
}

/// Excel serial dates count days from 1899-12-30.
fn serial_to_date(serial: f64) -> Option<Date> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    date(1899, 12, 30).checked_add((serial.trunc() as i64).days()).ok()
}

fn parse_date(s: &str) -> Option<Date> {
    if let Ok(dt) = DateTime::strptime("%Y-%m-%d %H:%M:%S", s) {
        return Some(dt.date());
    }
    if let Ok(dt) = DateTime::strptime("%Y-%m-%dT%H:%M:%S", s) {
        return Some(dt.date());
    }
    Date::strptime("%Y-%m-%d", s)
        .or_else(|_| Date::strptime("%d/%m/%Y", s))
        .ok()
}
