use std::{error::Error, path::Path};

use clap::Parser;
use jiff::civil::Date;
use pvpc::db::{
    prod_db::ProdDb,
    pvpc::{
        lib_pvpc::Location,
        querier::{avg_by_hour, avg_by_period, PvpcQuerier},
    },
};
use tabled::{Table, Tabled};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// First day, inclusive
    #[arg(long)]
    start: Date,

    /// Last day, inclusive
    #[arg(long)]
    end: Date,

    /// PCB or CYM
    #[arg(short, long, default_value = "PCB")]
    location: Location,

    #[arg(short, long, default_value = "2.0TD")]
    toll: String,
}

#[derive(Tabled)]
struct HourRow {
    hour: u8,
    period: String,
    #[tabled(rename = "EUR/kWh")]
    price: String,
}

#[derive(Tabled)]
struct PeriodRow {
    period: u8,
    #[tabled(rename = "EUR/kWh")]
    price: String,
}

/// Print the average PVPC price by hour and by period.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let querier = PvpcQuerier::new(ProdDb::pvpc_store().await?);
    let days = querier
        .get_days(args.start, args.end, args.location, &args.toll)
        .await?;
    if days.is_empty() {
        println!(
            "No prices for {} {} between {} and {}",
            args.location, args.toll, args.start, args.end
        );
        return Ok(());
    }

    let by_hour = avg_by_hour(&days)?;
    let periods = &days[0].period;
    let rows: Vec<HourRow> = by_hour
        .iter()
        .map(|(hour, price)| HourRow {
            hour: *hour,
            period: periods
                .get(*hour as usize)
                .map_or(String::new(), |p| p.to_string()),
            price: format!("{:.4}", price),
        })
        .collect();
    let mean = by_hour.values().sum::<f64>() / by_hour.len() as f64;
    println!(
        "{} {}, {} days from {} to {}",
        args.location,
        args.toll,
        days.len(),
        args.start,
        args.end
    );
    println!("{}", Table::new(rows));
    println!("Average: {:.4} EUR/kWh\n", mean);

    let by_period: Vec<PeriodRow> = avg_by_period(&days)?
        .into_iter()
        .map(|(period, price)| PeriodRow {
            period,
            price: format!("{:.4}", price),
        })
        .collect();
    println!("{}", Table::new(by_period));

    Ok(())
}
