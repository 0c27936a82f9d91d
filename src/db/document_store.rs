use std::{
    collections::BTreeMap,
    error::Error,
    fmt::Display,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use futures::TryStreamExt;
use log::debug;
use mongodb::{
    bson::{self, doc, Bson},
    options::ClientOptions,
    Client, Collection, Database,
};
use serde::Serialize;
use serde_json::Value;

/// Documents are JSON maps.
pub type Document = serde_json::Map<String, Value>;

/// Path to a collection, e.g. `PVPC_PRICES/BY_DAY/LOCATIONS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    pub fn root(name: &str) -> CollectionPath {
        CollectionPath {
            segments: vec![name.to_string()],
        }
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.to_string(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl DocumentPath {
    /// A sub-collection of this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        let mut segments = self.collection.segments.clone();
        segments.push(self.id.clone());
        segments.push(name.to_string());
        CollectionPath { segments }
    }
}

impl Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, Box<dyn Error>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        v => Err(format!("Expected a map, got {}", v).into()),
    }
}

/// A store of JSON documents addressed by hierarchical paths.  Writes
/// replace the whole document.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, Box<dyn Error>>;

    async fn set(&self, path: &DocumentPath, document: Document) -> Result<(), Box<dyn Error>>;

    async fn exists(&self, path: &DocumentPath) -> Result<bool, Box<dyn Error>> {
        Ok(self.get(path).await?.is_some())
    }

    /// Return `true` if the document was there.
    async fn delete(&self, path: &DocumentPath) -> Result<bool, Box<dyn Error>>;

    /// Delete all the documents of the collection, return how many.
    async fn delete_collection(&self, collection: &CollectionPath) -> Result<usize, Box<dyn Error>>;

    /// All documents of the collection with `gte <= field <= lte`, sorted by
    /// that field.  The field needs to hold a string.
    async fn query_range(
        &self,
        collection: &CollectionPath,
        field: &str,
        gte: &str,
        lte: &str,
    ) -> Result<Vec<Document>, Box<dyn Error>>;
}

/// Each collection path is one MongoDB collection, and the document id the
/// `_id` of the document.
pub struct MongoDocumentStore {
    #[allow(dead_code)]
    client: Client,
    db: Database,
}

impl MongoDocumentStore {
    pub async fn connect(uri: &str, database: &str) -> mongodb::error::Result<MongoDocumentStore> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(database);
        Ok(MongoDocumentStore { client, db })
    }

    fn collection(&self, path: &CollectionPath) -> Collection<bson::Document> {
        self.db.collection(&path.to_string())
    }
}

fn from_bson(mut document: bson::Document) -> Result<Document, Box<dyn Error>> {
    document.remove("_id");
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        v => Err(format!("Expected a map, got {}", v).into()),
    }
}

impl DocumentStore for MongoDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, Box<dyn Error>> {
        let found = self
            .collection(&path.collection)
            .find_one(doc! {"_id": path.id.as_str()})
            .await?;
        match found {
            Some(document) => Ok(Some(from_bson(document)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, path: &DocumentPath, document: Document) -> Result<(), Box<dyn Error>> {
        let mut replacement = bson::to_document(&document)?;
        replacement.insert("_id", path.id.clone());
        self.collection(&path.collection)
            .replace_one(doc! {"_id": path.id.as_str()}, replacement)
            .upsert(true)
            .await?;
        debug!("set {}", path);
        Ok(())
    }

    async fn exists(&self, path: &DocumentPath) -> Result<bool, Box<dyn Error>> {
        let count = self
            .collection(&path.collection)
            .count_documents(doc! {"_id": path.id.as_str()})
            .await?;
        Ok(count > 0)
    }

    async fn delete(&self, path: &DocumentPath) -> Result<bool, Box<dyn Error>> {
        let res = self
            .collection(&path.collection)
            .delete_one(doc! {"_id": path.id.as_str()})
            .await?;
        debug!("deleted {}", path);
        Ok(res.deleted_count > 0)
    }

    async fn delete_collection(&self, collection: &CollectionPath) -> Result<usize, Box<dyn Error>> {
        let res = self.collection(collection).delete_many(doc! {}).await?;
        debug!("deleted {} documents from {}", res.deleted_count, collection);
        Ok(res.deleted_count as usize)
    }

    async fn query_range(
        &self,
        collection: &CollectionPath,
        field: &str,
        gte: &str,
        lte: &str,
    ) -> Result<Vec<Document>, Box<dyn Error>> {
        let mut filter = bson::Document::new();
        filter.insert(field, doc! {"$gte": gte, "$lte": lte});
        let mut sort = bson::Document::new();
        sort.insert(field, 1);
        let cursor = self.collection(collection).find(filter).sort(sort).await?;
        let documents: Vec<bson::Document> = cursor.try_collect().await?;
        documents.into_iter().map(from_bson).collect()
    }
}

/// Keeps everything in memory.  Counts the writes.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<BTreeMap<CollectionPath, BTreeMap<String, Document>>>,
    writes: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self, collection: &CollectionPath) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map_or(0, |docs| docs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.collections.lock().unwrap().is_empty()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, Box<dyn Error>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
            .cloned())
    }

    async fn set(&self, path: &DocumentPath, document: Document) -> Result<(), Box<dyn Error>> {
        self.collections
            .lock()
            .unwrap()
            .entry(path.collection.clone())
            .or_default()
            .insert(path.id.clone(), document);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<bool, Box<dyn Error>> {
        let mut collections = self.collections.lock().unwrap();
        Ok(collections
            .get_mut(&path.collection)
            .and_then(|docs| docs.remove(&path.id))
            .is_some())
    }

    async fn delete_collection(&self, collection: &CollectionPath) -> Result<usize, Box<dyn Error>> {
        let mut collections = self.collections.lock().unwrap();
        Ok(collections.remove(collection).map_or(0, |docs| docs.len()))
    }

    async fn query_range(
        &self,
        collection: &CollectionPath,
        field: &str,
        gte: &str,
        lte: &str,
    ) -> Result<Vec<Document>, Box<dyn Error>> {
        let collections = self.collections.lock().unwrap();
        let mut out: Vec<(String, Document)> = collections
            .get(collection)
            .into_iter()
            .flat_map(|docs| docs.values())
            .filter_map(|d| match d.get(field) {
                Some(Value::String(v)) if v.as_str() >= gte && v.as_str() <= lte => {
                    Some((v.clone(), d.clone()))
                }
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out.into_iter().map(|(_, d)| d).collect())
    }
}
