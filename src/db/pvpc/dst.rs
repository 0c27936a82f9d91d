use super::lib_pvpc::{PriceRow, PvpcError, HOURS_PER_DAY};

/// Bring the rows of one (date, location, toll) to exactly 24 hours.
///
/// On the spring forward day the sheet has 23 rows.  The last row is
/// repeated as hour 23, so the filler hour carries the price of the hour
/// before it.  On the fall back day the sheet has 25 rows and the last one
/// is dropped.  Rows need to be sorted by hour.
pub fn normalize(mut rows: Vec<PriceRow>) -> Result<Vec<PriceRow>, PvpcError> {
    match rows.len() {
        23 => {
            let mut filler = rows[22].clone();
            filler.hour = 23;
            rows.push(filler);
        }
        24 => {}
        25 => {
            rows.pop();
        }
        count => {
            let (date, toll) = rows
                .first()
                .map(|r| (r.date.to_string(), r.toll.clone()))
                .unwrap_or_default();
            return Err(PvpcError::UnexpectedRowCount { date, toll, count });
        }
    }
    check_hours(&rows)?;
    Ok(rows)
}

/// Hours need to be 0..23, in order.
pub fn check_hours(rows: &[PriceRow]) -> Result<(), PvpcError> {
    let ok = rows.len() == HOURS_PER_DAY
        && rows.iter().enumerate().all(|(i, r)| r.hour as usize == i);
    if ok {
        return Ok(());
    }
    let (date, toll) = rows
        .first()
        .map(|r| (r.date.to_string(), r.toll.clone()))
        .unwrap_or_default();
    Err(PvpcError::InvalidHours {
        date,
        toll,
        hours: rows.iter().map(|r| r.hour).collect(),
    })
}
