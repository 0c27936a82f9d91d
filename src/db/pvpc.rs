pub mod aggregate;
pub mod dst;
pub mod ingest;
pub mod keys;
pub mod lib_pvpc;
pub mod prices_archive;
pub mod querier;
pub mod sheet;
pub mod store_writer;
