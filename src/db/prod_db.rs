use std::env;

use super::{document_store::MongoDocumentStore, pvpc::prices_archive::PvpcPricesArchive};

pub struct ProdDb {}

impl ProdDb {
    /// Needs `PVPC_ARCHIVE_DIR` in the environment.
    pub fn pvpc_prices() -> Result<PvpcPricesArchive, env::VarError> {
        let base_dir = env::var("PVPC_ARCHIVE_DIR")?;
        Ok(PvpcPricesArchive::new(&base_dir))
    }

    /// Connect to the database at `MONGODB_URI`.  The database name is
    /// `PVPC_MONGODB_DATABASE`, `pvpc` if not set.
    pub async fn pvpc_store() -> Result<MongoDocumentStore, Box<dyn std::error::Error>> {
        let uri = env::var("MONGODB_URI")?;
        let database = env::var("PVPC_MONGODB_DATABASE").unwrap_or("pvpc".to_string());
        Ok(MongoDocumentStore::connect(&uri, &database).await?)
    }
}
