use std::{
    collections::BTreeMap,
    error::Error,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use jiff::civil::Date;
use log::{info, warn};
use reqwest::StatusCode;

use super::{
    ingest::DayPool,
    lib_pvpc::{Location, PriceRow, PvpcError, DOWNLOAD_PRICE_DAY_URL},
    sheet::read_workbook,
};

/// Daily PVPC files from REE.  The raw spreadsheets are kept in
/// `{base_dir}/Raw/{year}/` and the cleaned data goes to one csv file per
/// day in `{base_dir}/{location}/{toll}/`.
#[derive(Debug)]
pub struct PvpcPricesArchive {
    pub base_dir: String,
    dir_lock: Mutex<()>,
}

impl PvpcPricesArchive {
    pub fn new(base_dir: &str) -> Self {
        PvpcPricesArchive {
            base_dir: base_dir.to_string(),
            dir_lock: Mutex::new(()),
        }
    }

    /// Return the raw spreadsheet filename for the day.  Does not check if the file exists.
    pub fn filename(&self, date: &Date) -> String {
        self.base_dir.to_owned()
            + "/Raw/"
            + &date.year().to_string()
            + "/pvpc_"
            + &date.strftime("%Y-%m-%d").to_string()
            + ".xls"
    }

    pub fn csv_filename(&self, location: Location, toll: &str, date: &Date) -> PathBuf {
        Path::new(&self.base_dir)
            .join(location.to_string())
            .join(toll)
            .join(format!("{}.csv", date.strftime("%Y-%m-%d")))
    }

    pub fn url(date: &Date) -> String {
        format!("{}?date={}", DOWNLOAD_PRICE_DAY_URL, date.strftime("%Y-%m-%d"))
    }

    /// Create the folder if needed.  Several downloads can run at once.
    fn ensure_dir(&self, dir: &Path) -> std::io::Result<()> {
        let _guard = self.dir_lock.lock().unwrap();
        if !dir.is_dir() {
            warn!("Folder {} does not exist. Creating it", dir.display());
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Download the spreadsheet for one day and split it into csv files.
    /// Return the csv files written.
    pub async fn download_file(&self, date: Date) -> Result<Vec<PathBuf>, Box<dyn Error>> {
        let url = Self::url(&date);
        let response = reqwest::get(&url).await?;
        if response.status() != StatusCode::OK {
            return Err(PvpcError::DownloadFailed {
                url,
                status: response.status().to_string(),
            }
            .into());
        }
        let body = response.bytes().await?;
        let filename = self.filename(&date);
        let path = Path::new(&filename);
        if let Some(dir) = path.parent() {
            self.ensure_dir(dir)?;
        }
        tokio::fs::write(path, &body).await?;
        info!("downloaded {} bytes for {}", body.len(), date);
        self.cast_to_csv(path).await
    }

    /// Download the days from `start` to `end`, both included, a few at a time.
    pub async fn download_range(
        &self,
        start: Date,
        end: Date,
        pool: &DayPool,
    ) -> Result<Vec<PathBuf>, Box<dyn Error>> {
        let days = DayPool::days(start, end)?;
        let files = pool.run(&days, |day| self.download_file(day)).await?;
        Ok(files.into_iter().flatten().collect())
    }

    /// Write one csv file per location and toll with the content of a
    /// spreadsheet.  The workbook is parsed on the blocking pool.
    pub async fn cast_to_csv(&self, xls_path: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
        let path = xls_path.to_path_buf();
        let sheets = tokio::task::spawn_blocking(move || read_workbook(&path))
            .await?
            .map_err(|e| e as Box<dyn Error>)?;
        let mut paths: Vec<PathBuf> = Vec::new();
        for sheet in sheets {
            for (toll, rows) in sheet.tolls {
                let Some(first) = rows.first() else {
                    continue;
                };
                let csv_path = self.csv_filename(sheet.location, &toll, &first.date);
                if let Some(dir) = csv_path.parent() {
                    self.ensure_dir(dir)?;
                }
                write_csv(&csv_path, &rows)?;
                paths.push(csv_path);
            }
        }
        Ok(paths)
    }

    /// All the csv files for this day, by location and toll.
    pub fn find_files(&self, date: &Date) -> Result<BTreeMap<(Location, String), PathBuf>, Box<dyn Error>> {
        let filename = format!("{}.csv", date.strftime("%Y-%m-%d"));
        let mut out = BTreeMap::new();
        let base = Path::new(&self.base_dir);
        if !base.is_dir() {
            return Ok(out);
        }
        for location_entry in fs::read_dir(base)? {
            let location_entry = location_entry?;
            let name = location_entry.file_name().to_string_lossy().to_string();
            // skip Raw/ and anything else which is not a location
            let Ok(location) = name.parse::<Location>() else {
                continue;
            };
            if !location_entry.path().is_dir() {
                continue;
            }
            for toll_entry in fs::read_dir(location_entry.path())? {
                let toll_entry = toll_entry?;
                let path = toll_entry.path().join(&filename);
                if path.is_file() {
                    let toll = toll_entry.file_name().to_string_lossy().to_string();
                    out.insert((location, toll), path);
                }
            }
        }
        Ok(out)
    }
}

pub fn write_csv(path: &Path, rows: &[PriceRow]) -> Result<(), Box<dyn Error>> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_csv(path: &Path) -> Result<Vec<PriceRow>, csv::Error> {
    let mut rdr = csv::Reader::from_path(path)?;
    rdr.deserialize().collect()
}
