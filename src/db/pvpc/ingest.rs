use std::{error::Error, future::Future};

use futures::future::join_all;
use jiff::{civil::Date, ToSpan};
use log::{error, info};

use crate::db::document_store::DocumentStore;

use super::{
    lib_pvpc::{Location, PvpcError},
    prices_archive::{read_csv, PvpcPricesArchive},
    store_writer::StoreWriter,
};

pub const DEFAULT_WIDTH: usize = 8;

/// Runs one task per day, `width` days at a time.  A chunk of days is
/// finished before the next one starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayPool {
    pub width: usize,
}

impl Default for DayPool {
    fn default() -> Self {
        DayPool {
            width: DEFAULT_WIDTH,
        }
    }
}

impl DayPool {
    pub fn new(width: usize) -> Self {
        DayPool {
            width: width.max(1),
        }
    }

    /// The days from `start` to `end`, both included.
    pub fn days(start: Date, end: Date) -> Result<Vec<Date>, PvpcError> {
        if start > end {
            return Err(PvpcError::InvalidRange { start, end });
        }
        Ok(start.series(1.day()).take_while(|day| *day <= end).collect())
    }

    /// Stops at the first chunk with a failed day and returns the error of
    /// the earliest failed day in it.
    pub async fn run<T, F, Fut>(&self, days: &[Date], task: F) -> Result<Vec<T>, Box<dyn Error>>
    where
        F: Fn(Date) -> Fut,
        Fut: Future<Output = Result<T, Box<dyn Error>>>,
    {
        let mut out: Vec<T> = Vec::with_capacity(days.len());
        for chunk in days.chunks(self.width.max(1)) {
            info!(
                "Working on {} to {}",
                chunk[0],
                chunk[chunk.len() - 1]
            );
            let results = join_all(chunk.iter().map(|day| task(*day))).await;
            for (day, result) in chunk.iter().zip(results) {
                match result {
                    Ok(value) => out.push(value),
                    Err(e) => {
                        error!("Failed for {}: {}", day, e);
                        return Err(e);
                    }
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayReport {
    pub date: Date,
    pub posted: Vec<(Location, String)>,
    pub skipped: Vec<(Location, String)>,
}

pub struct PvpcIngestor<S: DocumentStore> {
    pub archive: PvpcPricesArchive,
    pub writer: StoreWriter<S>,
    pub pool: DayPool,
    pub skip_if_exists: bool,
}

impl<S: DocumentStore> PvpcIngestor<S> {
    pub fn new(archive: PvpcPricesArchive, store: S) -> Self {
        PvpcIngestor {
            archive,
            writer: StoreWriter::new(store),
            pool: DayPool::default(),
            skip_if_exists: true,
        }
    }

    pub fn with_pool(mut self, pool: DayPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_skip_if_exists(mut self, skip_if_exists: bool) -> Self {
        self.skip_if_exists = skip_if_exists;
        self
    }

    /// Post all the csv files of one day.
    pub async fn ingest_day(&self, day: Date) -> Result<DayReport, Box<dyn Error>> {
        let files = self.archive.find_files(&day)?;
        if files.is_empty() {
            return Err(PvpcError::MissingFiles(day).into());
        }
        let mut report = DayReport {
            date: day,
            posted: Vec::new(),
            skipped: Vec::new(),
        };
        for ((location, toll), path) in files {
            if self.skip_if_exists && self.writer.exists(day, location, &toll).await? {
                info!("Data for {} {} {} already exists in the database. Skipping", day, location, toll);
                report.skipped.push((location, toll));
                continue;
            }
            let rows = tokio::task::spawn_blocking(move || read_csv(&path)).await??;
            self.writer.post(rows, location, &toll).await?;
            info!("Posted {} {} {}", day, location, toll);
            report.posted.push((location, toll));
        }
        Ok(report)
    }

    /// Delete from the store the tolls of this day which have a csv file.
    pub async fn delete_day(&self, day: Date) -> Result<usize, Box<dyn Error>> {
        let mut deleted = 0;
        for (location, toll) in self.archive.find_files(&day)?.into_keys() {
            deleted += self.writer.delete_day(day, location, &toll).await?;
        }
        Ok(deleted)
    }

    pub async fn delete_range(&self, start: Date, end: Date) -> Result<usize, Box<dyn Error>> {
        let days = DayPool::days(start, end)?;
        let counts = self.pool.run(&days, |day| self.delete_day(day)).await?;
        Ok(counts.into_iter().sum())
    }

    /// Post the days from `start` to `end`, both included.  Any failed day
    /// aborts the range.
    pub async fn ingest_range(&self, start: Date, end: Date) -> Result<Vec<DayReport>, Box<dyn Error>> {
        let days = DayPool::days(start, end)?;
        self.pool.run(&days, |day| self.ingest_day(day)).await
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, error::Error, path::Path};

    use jiff::civil::date;

    use super::*;
    use crate::db::{
        document_store::InMemoryDocumentStore,
        pvpc::{lib_pvpc::PriceRow, prices_archive::write_csv, querier::PvpcQuerier},
    };

    fn rows(day: Date, n: u8, toll: &str) -> Vec<PriceRow> {
        (0..n)
            .map(|h| PriceRow {
                date: day,
                hour: h,
                toll: toll.to_string(),
                period: if h < 8 { 3 } else { 1 },
                pvpc_price_kwh: 0.1 + h as f64 / 100.0,
                teu_charges_kwh: 0.03,
                tcu_production_price_kwh: 0.07,
            })
            .collect()
    }

    fn archive_with(
        dir: &tempfile::TempDir,
        days: &[(Date, u8)],
    ) -> Result<PvpcPricesArchive, Box<dyn Error>> {
        let archive = PvpcPricesArchive::new(dir.path().to_str().unwrap());
        for &(day, n) in days {
            for (location, toll) in [(Location::Pcb, "2.0TD"), (Location::Cym, "2.0TD")] {
                let path = archive.csv_filename(location, toll, &day);
                std::fs::create_dir_all(path.parent().unwrap())?;
                write_csv(&path, &rows(day, n, toll))?;
            }
        }
        Ok(archive)
    }

    #[test]
    fn days_in_range() {
        let days = DayPool::days(date(2024, 2, 27), date(2024, 3, 1)).unwrap();
        assert_eq!(
            days,
            vec![date(2024, 2, 27), date(2024, 2, 28), date(2024, 2, 29), date(2024, 3, 1)]
        );
        assert_eq!(
            DayPool::days(date(2024, 1, 2), date(2024, 1, 2)).unwrap(),
            vec![date(2024, 1, 2)]
        );
        assert!(DayPool::days(date(2024, 1, 2), date(2024, 1, 1)).is_err());
    }

    #[tokio::test]
    async fn pool_runs_chunks_in_order() -> Result<(), Box<dyn Error>> {
        let days = DayPool::days(date(2024, 1, 1), date(2024, 1, 10))?;
        let pool = DayPool::new(3);
        let seen: RefCell<Vec<Date>> = RefCell::new(Vec::new());
        let out = pool
            .run(&days, |day| {
                seen.borrow_mut().push(day);
                async move { Ok(day.day()) }
            })
            .await?;
        assert_eq!(out, (1..=10).collect::<Vec<i8>>());
        assert_eq!(*seen.borrow(), days);
        Ok(())
    }

    #[tokio::test]
    async fn pool_stops_after_failed_chunk() {
        let days = DayPool::days(date(2024, 1, 1), date(2024, 1, 10)).unwrap();
        let pool = DayPool::new(4);
        let started: RefCell<usize> = RefCell::new(0);
        let res = pool
            .run(&days, |day| {
                *started.borrow_mut() += 1;
                async move {
                    if day == date(2024, 1, 6) {
                        Err::<(), Box<dyn Error>>("boom".into())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert_eq!(res.unwrap_err().to_string(), "boom");
        // the third chunk never started
        assert_eq!(*started.borrow(), 8);
    }

    #[tokio::test]
    async fn ingest_range_with_dst_days() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = archive_with(
            &dir,
            &[(date(2024, 3, 30), 24), (date(2024, 3, 31), 23), (date(2024, 4, 1), 24)],
        )?;
        let ingestor = PvpcIngestor::new(archive, InMemoryDocumentStore::new())
            .with_pool(DayPool::new(2));
        let reports = ingestor.ingest_range(date(2024, 3, 30), date(2024, 4, 1)).await?;
        assert_eq!(
            reports.iter().map(|r| r.date).collect::<Vec<_>>(),
            vec![date(2024, 3, 30), date(2024, 3, 31), date(2024, 4, 1)]
        );
        assert!(reports.iter().all(|r| r.posted.len() == 2 && r.skipped.is_empty()));
        for day in [date(2024, 3, 30), date(2024, 3, 31), date(2024, 4, 1)] {
            for location in Location::all() {
                assert!(ingestor.writer.exists(day, location, "2.0TD").await?);
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn second_run_writes_nothing() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = archive_with(&dir, &[(date(2023, 10, 29), 25)])?;
        let ingestor = PvpcIngestor::new(archive, InMemoryDocumentStore::new());
        let first = ingestor.ingest_day(date(2023, 10, 29)).await?;
        assert_eq!(first.posted.len(), 2);
        let writes = ingestor.writer.store().write_count();
        assert!(writes > 0);

        let second = ingestor.ingest_day(date(2023, 10, 29)).await?;
        assert!(second.posted.is_empty());
        assert_eq!(second.skipped.len(), 2);
        assert_eq!(ingestor.writer.store().write_count(), writes);
        Ok(())
    }

    #[tokio::test]
    async fn no_skip_rewrites() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = archive_with(&dir, &[(date(2024, 1, 1), 24)])?;
        let ingestor = PvpcIngestor::new(archive, InMemoryDocumentStore::new())
            .with_skip_if_exists(false);
        ingestor.ingest_day(date(2024, 1, 1)).await?;
        let writes = ingestor.writer.store().write_count();
        ingestor.ingest_day(date(2024, 1, 1)).await?;
        // metadata is cached, only the prices are written again
        assert_eq!(ingestor.writer.store().write_count(), writes + 2 * 25);
        Ok(())
    }

    #[tokio::test]
    async fn missing_day_aborts_range() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = archive_with(&dir, &[(date(2024, 1, 1), 24), (date(2024, 1, 3), 24)])?;
        let ingestor = PvpcIngestor::new(archive, InMemoryDocumentStore::new());
        let err = ingestor
            .ingest_range(date(2024, 1, 1), date(2024, 1, 3))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), PvpcError::MissingFiles(date(2024, 1, 2)).to_string());
        Ok(())
    }

    #[tokio::test]
    async fn bad_row_count_fails() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = archive_with(&dir, &[(date(2024, 1, 1), 22)])?;
        let ingestor = PvpcIngestor::new(archive, InMemoryDocumentStore::new());
        assert!(ingestor.ingest_day(date(2024, 1, 1)).await.is_err());
        assert_eq!(ingestor.writer.store().write_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn single_day_range() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = archive_with(&dir, &[(date(2024, 1, 1), 24), (date(2024, 1, 2), 24)])?;
        let ingestor = PvpcIngestor::new(archive, InMemoryDocumentStore::new());
        let reports = ingestor.ingest_range(date(2024, 1, 2), date(2024, 1, 2)).await?;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].date, date(2024, 1, 2));
        assert!(ingestor.writer.exists(date(2024, 1, 2), Location::Pcb, "2.0TD").await?);
        assert!(!ingestor.writer.exists(date(2024, 1, 1), Location::Pcb, "2.0TD").await?);
        Ok(())
    }

    #[tokio::test]
    async fn legacy_workbook_to_store() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = PvpcPricesArchive::new(dir.path().to_str().unwrap());
        let fixture = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/pvpc_legacy_2024-03-31.xlsx");
        archive.cast_to_csv(&fixture).await?;

        let ingestor = PvpcIngestor::new(archive, InMemoryDocumentStore::new());
        let report = ingestor.ingest_day(date(2024, 3, 31)).await?;
        assert_eq!(
            report.posted,
            vec![(Location::Pcb, "2.0TD".to_string()), (Location::Cym, "2.0TD".to_string())]
        );
        let querier = PvpcQuerier::new(ingestor.writer.into_store());
        for location in Location::all() {
            let day = querier
                .get_data_for_day(date(2024, 3, 31), location, "2.0TD")
                .await?
                .unwrap();
            assert_eq!(day.pvpc_price_kwh.len(), 24);
            // the missing hour is a copy of the last one
            assert_eq!(day.pvpc_price_kwh[23], day.pvpc_price_kwh[22]);
            assert!((day.pvpc_price_kwh[0] - 0.101).abs() < 1e-12);
        }
        Ok(())
    }

    #[tokio::test]
    async fn delete_range_then_ingest() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = archive_with(&dir, &[(date(2024, 1, 1), 24), (date(2024, 1, 2), 24)])?;
        let ingestor = PvpcIngestor::new(archive, InMemoryDocumentStore::new());
        ingestor.ingest_range(date(2024, 1, 1), date(2024, 1, 2)).await?;
        // two locations, 24 hours and one day aggregate each
        assert_eq!(ingestor.delete_range(date(2024, 1, 2), date(2024, 1, 2)).await?, 2 * 25);
        assert!(!ingestor.writer.exists(date(2024, 1, 2), Location::Cym, "2.0TD").await?);
        assert!(ingestor.writer.exists(date(2024, 1, 1), Location::Cym, "2.0TD").await?);

        let reports = ingestor.ingest_range(date(2024, 1, 1), date(2024, 1, 2)).await?;
        assert_eq!(reports[0].skipped.len(), 2);
        assert_eq!(reports[1].posted.len(), 2);
        Ok(())
    }
}
