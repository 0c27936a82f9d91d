use std::{collections::HashSet, error::Error, sync::Mutex};

use jiff::civil::Date;
use log::{debug, info};
use serde_json::json;

use crate::db::document_store::{to_document, DocumentStore};

use super::{
    aggregate::aggregate,
    dst::normalize,
    keys::{collection_path, location_path, record_key, toll_display_name, toll_path, toll_segment},
    lib_pvpc::{
        AggregationLevel, DayAggregateRecord, HourlyPriceRecord, Location, PriceRow, HOURS_PER_DAY,
    },
};

/// Location and toll documents already known to be in the store.  Lives as
/// long as the writer that owns it.
#[derive(Debug, Default)]
pub struct MetadataCache {
    locations: Mutex<HashSet<(AggregationLevel, Location)>>,
    tolls: Mutex<HashSet<(AggregationLevel, Location, String)>>,
}

impl MetadataCache {
    pub fn has_location(&self, aggregation: AggregationLevel, location: Location) -> bool {
        self.locations
            .lock()
            .unwrap()
            .contains(&(aggregation, location))
    }

    pub fn add_location(&self, aggregation: AggregationLevel, location: Location) {
        self.locations.lock().unwrap().insert((aggregation, location));
    }

    pub fn has_toll(&self, aggregation: AggregationLevel, location: Location, toll: &str) -> bool {
        self.tolls
            .lock()
            .unwrap()
            .contains(&(aggregation, location, toll.to_string()))
    }

    pub fn add_toll(&self, aggregation: AggregationLevel, location: Location, toll: &str) {
        self.tolls
            .lock()
            .unwrap()
            .insert((aggregation, location, toll.to_string()));
    }
}

pub struct StoreWriter<S: DocumentStore> {
    store: S,
    cache: MetadataCache,
}

impl<S: DocumentStore> StoreWriter<S> {
    pub fn new(store: S) -> Self {
        StoreWriter {
            store,
            cache: MetadataCache::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Create the location and toll documents if they are not in the store.
    /// Two writers doing this at the same time both write the same content.
    pub async fn ensure_metadata(
        &self,
        aggregation: AggregationLevel,
        location: Location,
        toll: &str,
    ) -> Result<(), Box<dyn Error>> {
        if !self.cache.has_location(aggregation, location) {
            let path = location_path(aggregation, location);
            if !self.store.exists(&path).await? {
                info!("Creating location document {}", path);
                let document = to_document(&json!({"name": location.description()}))?;
                self.store.set(&path, document).await?;
            }
            self.cache.add_location(aggregation, location);
        }

        if !self.cache.has_toll(aggregation, location, toll) {
            let path = toll_path(aggregation, location, toll);
            if !self.store.exists(&path).await? {
                info!("Creating toll document {}", path);
                let name = toll_display_name(&toll_segment(toll));
                self.store.set(&path, to_document(&json!({"name": name}))?).await?;
            }
            self.cache.add_toll(aggregation, location, toll);
        }
        Ok(())
    }

    /// Overwrite one document per hour under NO_AGGREGATION.
    pub async fn write_hourly(&self, records: &[HourlyPriceRecord]) -> Result<(), Box<dyn Error>> {
        let aggregation = AggregationLevel::NoAggregation;
        for record in records {
            self.ensure_metadata(aggregation, record.location, &record.toll)
                .await?;
            let path = collection_path(record.location, &record.toll, aggregation).doc(
                &record_key(&record.datetime_spain, record.location, &record.toll),
            );
            self.store.set(&path, to_document(record)?).await?;
            debug!("wrote {}", path);
        }
        Ok(())
    }

    /// Overwrite the document of the day under BY_DAY.
    pub async fn write_daily_aggregate(&self, day: &DayAggregateRecord) -> Result<(), Box<dyn Error>> {
        let aggregation = AggregationLevel::ByDay;
        self.ensure_metadata(aggregation, day.location, &day.toll)
            .await?;
        let path = collection_path(day.location, &day.toll, aggregation)
            .doc(&record_key(&day.datetime_spain, day.location, &day.toll));
        self.store.set(&path, to_document(day)?).await?;
        debug!("wrote {}", path);
        Ok(())
    }

    /// The day is in the store only if both the first hour and the day
    /// aggregate are there.  A run that died half way leaves only one of them.
    pub async fn exists(&self, day: Date, location: Location, toll: &str) -> Result<bool, Box<dyn Error>> {
        let key = record_key(&day.at(0, 0, 0, 0), location, toll);
        let hourly = collection_path(location, toll, AggregationLevel::NoAggregation).doc(&key);
        if !self.store.exists(&hourly).await? {
            return Ok(false);
        }
        let daily = collection_path(location, toll, AggregationLevel::ByDay).doc(&key);
        self.store.exists(&daily).await
    }

    /// Remove the hourly documents and the day aggregate of one day.  Return
    /// the number of documents deleted.  Metadata documents stay.
    pub async fn delete_day(&self, day: Date, location: Location, toll: &str) -> Result<usize, Box<dyn Error>> {
        let hourly = collection_path(location, toll, AggregationLevel::NoAggregation);
        let mut deleted = 0;
        for hour in 0..HOURS_PER_DAY as i8 {
            let key = record_key(&day.at(hour, 0, 0, 0), location, toll);
            if self.store.delete(&hourly.doc(&key)).await? {
                deleted += 1;
            }
        }
        let daily = collection_path(location, toll, AggregationLevel::ByDay)
            .doc(&record_key(&day.at(0, 0, 0, 0), location, toll));
        if self.store.delete(&daily).await? {
            deleted += 1;
        }
        info!("Deleted {} documents for {} {} {}", deleted, day, location, toll);
        Ok(deleted)
    }

    /// Normalize the rows of one day and write both representations.
    pub async fn post(
        &self,
        rows: Vec<PriceRow>,
        location: Location,
        toll: &str,
    ) -> Result<DayAggregateRecord, Box<dyn Error>> {
        let rows = normalize(rows)?;
        let records = rows
            .iter()
            .map(|row| HourlyPriceRecord::from_row(row, location))
            .collect::<Result<Vec<_>, _>>()?;
        let day = aggregate(&records, location, toll)?;
        self.write_hourly(&records).await?;
        self.write_daily_aggregate(&day).await?;
        Ok(day)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use super::*;
    use crate::db::document_store::InMemoryDocumentStore;

    fn rows(day: Date, n: u8) -> Vec<PriceRow> {
        (0..n)
            .map(|h| PriceRow {
                date: day,
                hour: h,
                toll: "2.0TD".to_string(),
                period: 1,
                pvpc_price_kwh: 0.15,
                teu_charges_kwh: 0.04,
                tcu_production_price_kwh: 0.11,
            })
            .collect()
    }

    #[tokio::test]
    async fn post_then_exists() -> Result<(), Box<dyn Error>> {
        let writer = StoreWriter::new(InMemoryDocumentStore::new());
        let day = date(2024, 1, 1);
        assert!(!writer.exists(day, Location::Pcb, "2.0TD").await?);
        writer.post(rows(day, 24), Location::Pcb, "2.0TD").await?;
        assert!(writer.exists(day, Location::Pcb, "2.0TD").await?);
        assert!(!writer.exists(date(2024, 1, 2), Location::Pcb, "2.0TD").await?);
        assert!(!writer.exists(day, Location::Cym, "2.0TD").await?);

        let store = writer.store();
        let hourly = collection_path(Location::Pcb, "2.0TD", AggregationLevel::NoAggregation);
        let daily = collection_path(Location::Pcb, "2.0TD", AggregationLevel::ByDay);
        assert_eq!(store.len(&hourly), 24);
        assert_eq!(store.len(&daily), 1);
        // 24 hours + 1 day + location and toll docs for both aggregations
        assert_eq!(store.write_count(), 24 + 1 + 4);

        let toll = store
            .get(&toll_path(AggregationLevel::ByDay, Location::Pcb, "2.0TD"))
            .await?
            .unwrap();
        assert_eq!(toll["name"], "2.0TD");
        let location = store
            .get(&location_path(AggregationLevel::ByDay, Location::Pcb))
            .await?
            .unwrap();
        assert_eq!(location["name"], Location::Pcb.description());

        let doc = store
            .get(&daily.doc("2024-01-01--00:00--PCB-2.0TD"))
            .await?
            .unwrap();
        assert_eq!(doc["PVPC_price_kwh"].as_array().unwrap().len(), 24);
        assert_eq!(doc["datetime_spain"], "2024-01-01T00:00:00");
        Ok(())
    }

    #[tokio::test]
    async fn partial_day_is_not_there() -> Result<(), Box<dyn Error>> {
        let writer = StoreWriter::new(InMemoryDocumentStore::new());
        let day = date(2024, 1, 1);
        let records: Vec<HourlyPriceRecord> = rows(day, 24)
            .iter()
            .map(|r| HourlyPriceRecord::from_row(r, Location::Pcb).unwrap())
            .collect();
        writer.write_hourly(&records).await?;
        assert!(!writer.exists(day, Location::Pcb, "2.0TD").await?);
        Ok(())
    }

    #[tokio::test]
    async fn rewrite_overwrites() -> Result<(), Box<dyn Error>> {
        let writer = StoreWriter::new(InMemoryDocumentStore::new());
        let day = date(2024, 3, 31);
        writer.post(rows(day, 23), Location::Cym, "2.0TD").await?;
        let mut again = rows(day, 23);
        again[22].pvpc_price_kwh = 0.3;
        writer.post(again, Location::Cym, "2.0TD").await?;
        let store = writer.store();
        let hourly = collection_path(Location::Cym, "2.0TD", AggregationLevel::NoAggregation);
        assert_eq!(store.len(&hourly), 24);
        // metadata documents are written only once
        assert_eq!(store.write_count(), 2 * 25 + 4);
        let last = store
            .get(&hourly.doc("2024-03-31--23:00--CYM-2.0TD"))
            .await?
            .unwrap();
        assert_eq!(last["PVPC_price_kwh"], 0.3);
        Ok(())
    }

    #[tokio::test]
    async fn delete_then_post_again() -> Result<(), Box<dyn Error>> {
        let writer = StoreWriter::new(InMemoryDocumentStore::new());
        let day = date(2024, 1, 1);
        writer.post(rows(day, 24), Location::Pcb, "2.0TD").await?;
        writer.post(rows(date(2024, 1, 2), 24), Location::Pcb, "2.0TD").await?;
        assert_eq!(writer.delete_day(day, Location::Pcb, "2.0TD").await?, 25);
        assert!(!writer.exists(day, Location::Pcb, "2.0TD").await?);
        assert!(writer.exists(date(2024, 1, 2), Location::Pcb, "2.0TD").await?);
        assert_eq!(writer.delete_day(day, Location::Pcb, "2.0TD").await?, 0);

        let store = writer.store();
        let hourly = collection_path(Location::Pcb, "2.0TD", AggregationLevel::NoAggregation);
        assert_eq!(store.len(&hourly), 24);
        assert!(store
            .exists(&toll_path(AggregationLevel::ByDay, Location::Pcb, "2.0TD"))
            .await?);

        writer.post(rows(day, 24), Location::Pcb, "2.0TD").await?;
        assert!(writer.exists(day, Location::Pcb, "2.0TD").await?);
        Ok(())
    }

    #[tokio::test]
    async fn bad_row_count_writes_nothing() {
        let writer = StoreWriter::new(InMemoryDocumentStore::new());
        let res = writer.post(rows(date(2024, 1, 1), 20), Location::Pcb, "2.0TD").await;
        assert!(res.is_err());
        assert_eq!(writer.store().write_count(), 0);
    }
}
