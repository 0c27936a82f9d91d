use std::{collections::BTreeMap, error::Error};

use jiff::civil::Date;
use serde_json::Value;

use crate::db::document_store::DocumentStore;

use super::{
    keys::{collection_path, record_key},
    lib_pvpc::{AggregationLevel, DayAggregateRecord, Location, PvpcError, HOURS_PER_DAY},
};

pub struct PvpcQuerier<S: DocumentStore> {
    store: S,
}

impl<S: DocumentStore> PvpcQuerier<S> {
    pub fn new(store: S) -> Self {
        PvpcQuerier { store }
    }

    /// Day aggregates for all days between `start` and `end`, both inclusive.
    pub async fn get_days(
        &self,
        start: Date,
        end: Date,
        location: Location,
        toll: &str,
    ) -> Result<Vec<DayAggregateRecord>, Box<dyn Error>> {
        let collection = collection_path(location, toll, AggregationLevel::ByDay);
        let gte = start.at(0, 0, 0, 0).to_string();
        let lte = end.at(23, 59, 59, 0).to_string();
        let documents = self
            .store
            .query_range(&collection, "datetime_spain", &gte, &lte)
            .await?;
        let mut days: Vec<DayAggregateRecord> = Vec::with_capacity(documents.len());
        for document in documents {
            days.push(serde_json::from_value(Value::Object(document))?);
        }
        Ok(days)
    }

    pub async fn get_data_for_day(
        &self,
        day: Date,
        location: Location,
        toll: &str,
    ) -> Result<Option<DayAggregateRecord>, Box<dyn Error>> {
        let path = collection_path(location, toll, AggregationLevel::ByDay)
            .doc(&record_key(&day.at(0, 0, 0, 0), location, toll));
        match self.store.get(&path).await? {
            Some(document) => Ok(Some(serde_json::from_value(Value::Object(document))?)),
            None => Ok(None),
        }
    }

    pub async fn avg_price_by_period(
        &self,
        start: Date,
        end: Date,
        location: Location,
        toll: &str,
    ) -> Result<BTreeMap<u8, f64>, Box<dyn Error>> {
        let days = self.get_days(start, end, location, toll).await?;
        Ok(avg_by_period(&days)?)
    }

    pub async fn avg_price_by_hour(
        &self,
        start: Date,
        end: Date,
        location: Location,
        toll: &str,
    ) -> Result<BTreeMap<u8, f64>, Box<dyn Error>> {
        let days = self.get_days(start, end, location, toll).await?;
        Ok(avg_by_hour(&days)?)
    }
}

/// Average PVPC price for each period (time of use band).
pub fn avg_by_period(days: &[DayAggregateRecord]) -> Result<BTreeMap<u8, f64>, PvpcError> {
    let mut acc: BTreeMap<u8, (f64, usize)> = BTreeMap::new();
    for day in days {
        if day.period.len() != day.pvpc_price_kwh.len() {
            return Err(PvpcError::FieldMismatch {
                field: "period".to_string(),
                hourly: day.period.len().to_string(),
                daily: day.pvpc_price_kwh.len().to_string(),
            });
        }
        for (period, price) in day.period.iter().zip(&day.pvpc_price_kwh) {
            let e = acc.entry(*period).or_insert((0.0, 0));
            e.0 += price;
            e.1 += 1;
        }
    }
    Ok(acc
        .into_iter()
        .map(|(period, (sum, n))| (period, sum / n as f64))
        .collect())
}

/// Average PVPC price for each hour of the day.  Empty if there are no days.
pub fn avg_by_hour(days: &[DayAggregateRecord]) -> Result<BTreeMap<u8, f64>, PvpcError> {
    if days.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut sums = [0.0; HOURS_PER_DAY];
    for day in days {
        if day.pvpc_price_kwh.len() != HOURS_PER_DAY {
            return Err(PvpcError::UnexpectedRowCount {
                date: day.date.to_string(),
                toll: day.toll.clone(),
                count: day.pvpc_price_kwh.len(),
            });
        }
        for (sum, price) in sums.iter_mut().zip(&day.pvpc_price_kwh) {
            *sum += price;
        }
    }
    Ok(sums
        .iter()
        .enumerate()
        .map(|(hour, sum)| (hour as u8, sum / days.len() as f64))
        .collect())
}
