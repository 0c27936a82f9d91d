use std::{error::Error, path::Path};

use clap::Parser;
use jiff::{
    civil::{time, Date},
    ToSpan, Zoned,
};
use log::info;
use pvpc::db::{
    prod_db::ProdDb,
    pvpc::ingest::{DayPool, PvpcIngestor, DEFAULT_WIDTH},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Update only this day
    #[arg(long, conflicts_with_all = ["start", "end"])]
    day: Option<Date>,

    /// First day to update, defaults to 5 days ago
    #[arg(long)]
    start: Option<Date>,

    /// Last day to update, inclusive.  Defaults to today, or tomorrow once
    /// tomorrow's prices are out
    #[arg(long)]
    end: Option<Date>,

    /// Number of days worked on at the same time
    #[arg(short, long, default_value_t = DEFAULT_WIDTH)]
    width: usize,

    /// Post the days again even if they are already in the database
    #[arg(long)]
    no_skip: bool,

    /// Delete the days from the database before posting them
    #[arg(long, conflicts_with = "download_only")]
    delete: bool,

    /// Only download the spreadsheets
    #[arg(long, conflicts_with = "ingest_only")]
    download_only: bool,

    /// Only post the csv files already in the archive
    #[arg(long)]
    ingest_only: bool,
}

/// Prices for the next day are published around 20:30[Europe/Madrid].
fn default_range(now: &Zoned) -> Result<(Date, Date), jiff::Error> {
    let today = now.date();
    let end = if now.time() >= time(20, 30, 0, 0) {
        today.tomorrow()?
    } else {
        today
    };
    Ok((today - 5.days(), end))
}

/// Run this job every day after 20:30[Europe/Madrid].
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let (start, end) = match args.day {
        Some(day) => (day, day),
        None => {
            let (start, end) = default_range(&Zoned::now().in_tz("Europe/Madrid")?)?;
            (args.start.unwrap_or(start), args.end.unwrap_or(end))
        }
    };
    info!("Updating PVPC prices from {} to {}", start, end);

    let archive = ProdDb::pvpc_prices()?;
    let pool = DayPool::new(args.width);
    if !args.ingest_only {
        let files = archive.download_range(start, end, &pool).await?;
        info!("Wrote {} csv files", files.len());
    }
    if args.download_only {
        return Ok(());
    }

    let store = ProdDb::pvpc_store().await?;
    let ingestor = PvpcIngestor::new(archive, store)
        .with_pool(pool)
        .with_skip_if_exists(!args.no_skip);
    if args.delete {
        let deleted = ingestor.delete_range(start, end).await?;
        info!("Deleted {} documents", deleted);
    }
    let reports = ingestor.ingest_range(start, end).await?;
    let posted: usize = reports.iter().map(|r| r.posted.len()).sum();
    let skipped: usize = reports.iter().map(|r| r.skipped.len()).sum();
    info!(
        "Done, {} days: posted {} tolls, skipped {}",
        reports.len(),
        posted,
        skipped
    );

    Ok(())
}
