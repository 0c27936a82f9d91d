use jiff::civil::DateTime;

use crate::db::document_store::{CollectionPath, DocumentPath};

use super::lib_pvpc::{AggregationLevel, Location};

pub const PVPC_PRICES: &str = "PVPC_PRICES";
pub const LOCATIONS: &str = "LOCATIONS";
pub const TOLLS: &str = "TOLLS";
pub const PRICES: &str = "PRICES";

/// Document id for one hour (or one day, with the midnight datetime), e.g.
/// `2024-01-01--13:00--PCB-2.0TD`.
pub fn record_key(datetime: &DateTime, location: Location, toll: &str) -> String {
    format!(
        "{}--{}-{}",
        datetime.strftime("%Y-%m-%d--%H:00"),
        location,
        toll
    )
}

/// Path segments can't contain periods, so `2.0TD` becomes `2-0TD`.
pub fn toll_segment(toll: &str) -> String {
    toll.replace('.', "-")
}

pub fn toll_display_name(segment: &str) -> String {
    segment.replace('-', ".")
}

pub fn location_path(aggregation: AggregationLevel, location: Location) -> DocumentPath {
    CollectionPath::root(PVPC_PRICES)
        .doc(&aggregation.to_string())
        .collection(LOCATIONS)
        .doc(&location.to_string())
}

pub fn toll_path(aggregation: AggregationLevel, location: Location, toll: &str) -> DocumentPath {
    location_path(aggregation, location)
        .collection(TOLLS)
        .doc(&toll_segment(toll))
}

/// `PVPC_PRICES/{aggregation}/LOCATIONS/{location}/TOLLS/{toll}/PRICES`
pub fn collection_path(
    location: Location,
    toll: &str,
    aggregation: AggregationLevel,
) -> CollectionPath {
    toll_path(aggregation, location, toll).collection(PRICES)
}
