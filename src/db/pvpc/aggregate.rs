use super::lib_pvpc::{DayAggregateRecord, HourlyPriceRecord, Location, PvpcError, HOURS_PER_DAY};

/// Fold the 24 hourly records of one day into one record.  The records need
/// to be sorted by hour.
pub fn aggregate(
    records: &[HourlyPriceRecord],
    location: Location,
    toll: &str,
) -> Result<DayAggregateRecord, PvpcError> {
    if records.len() != HOURS_PER_DAY {
        let first = records.first();
        return Err(PvpcError::UnexpectedRowCount {
            date: first.map(|r| r.date.to_string()).unwrap_or_default(),
            toll: toll.to_string(),
            count: records.len(),
        });
    }
    let first = &records[0];
    if records.iter().enumerate().any(|(i, r)| r.hour as usize != i) {
        return Err(PvpcError::InvalidHours {
            date: first.date.to_string(),
            toll: toll.to_string(),
            hours: records.iter().map(|r| r.hour).collect(),
        });
    }

    let day = DayAggregateRecord {
        datetime_spain: first.datetime_spain,
        date: first.date,
        location,
        toll: toll.to_string(),
        period: records.iter().map(|r| r.period).collect(),
        pvpc_price_kwh: records.iter().map(|r| r.pvpc_price_kwh).collect(),
        teu_charges_kwh: records.iter().map(|r| r.teu_charges_kwh).collect(),
        tcu_production_price_kwh: records.iter().map(|r| r.tcu_production_price_kwh).collect(),
    };

    let mismatch = |field: &str, hourly: String, daily: String| PvpcError::FieldMismatch {
        field: field.to_string(),
        hourly,
        daily,
    };
    if first.date != day.date {
        return Err(mismatch("date", first.date.to_string(), day.date.to_string()));
    }
    if first.location != day.location {
        return Err(mismatch(
            "location",
            first.location.to_string(),
            day.location.to_string(),
        ));
    }
    if first.toll != day.toll {
        return Err(mismatch("toll", first.toll.clone(), day.toll.clone()));
    }
    Ok(day)
}
