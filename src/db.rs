pub mod document_store;
pub mod prod_db;
pub mod pvpc;
