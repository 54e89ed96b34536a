//! MongoDB storage backend.
//!
//! Each table is a collection of documents `{ _id, name, ...properties }`
//! with a unique index on `name`. The `_id` never leaves this module.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, Document, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions, ServerAddress, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::{debug, warn};

use super::{ID_FIELD, NAME_FIELD, Properties, Store, StoreObject};
use crate::error::{Error, Result};

const DUPLICATE_KEY_CODE: i32 = 11000;
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a client for one endpoint. Connections are established lazily.
pub(super) fn connect(host: &str, port: u16) -> Result<Client> {
    let address = ServerAddress::parse(format!("{}:{}", host, port)).map_err(map_error)?;
    let options = ClientOptions::builder()
        .hosts(vec![address])
        .app_name("dnsfilter".to_string())
        .server_selection_timeout(SERVER_SELECTION_TIMEOUT)
        .build();
    Client::with_options(options).map_err(map_error)
}

/// A store backed by one MongoDB collection.
pub struct MongoStore {
    collection: Collection<Document>,
}

impl MongoStore {
    /// Open `collection` in `database`, ensuring the unique `name` index.
    pub async fn open(client: &Client, database: &str, collection: &str) -> Result<Self> {
        let collection = client.database(database).collection::<Document>(collection);

        let index = IndexModel::builder()
            .keys(doc! { "name": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        collection.create_index(index, None).await.map_err(map_error)?;

        debug!(database, collection = collection.name(), "opened mongo store");
        Ok(Self { collection })
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn create(&self, name: &str, properties: Properties) -> Result<()> {
        let document = to_document(name, &properties)?;
        match self.collection.insert_one(document, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(Error::DuplicateKey(name.to_string())),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn create_if_absent(&self, name: &str, properties: Properties) -> Result<bool> {
        let document = to_document(name, &properties)?;
        let options = UpdateOptions::builder().upsert(true).build();
        let result = self
            .collection
            .update_one(
                doc! { "name": name },
                doc! { "$setOnInsert": document },
                options,
            )
            .await;

        match result {
            Ok(outcome) => Ok(outcome.upserted_id.is_some()),
            // Lost the race against a concurrent upsert on the unique index.
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn read(&self, name: &str) -> Result<Option<StoreObject>> {
        let document = self
            .collection
            .find_one(doc! { "name": name }, None)
            .await
            .map_err(map_error)?;

        debug!(name, found = document.is_some(), "read");
        document.map(from_document).transpose()
    }

    async fn update(&self, name: &str, properties: Properties) -> Result<()> {
        let document = to_document(name, &properties)?;
        let outcome = self
            .collection
            .update_one(doc! { "name": name }, doc! { "$set": document }, None)
            .await
            .map_err(map_error)?;

        if outcome.matched_count == 0 {
            warn!(name, "failed to update missing object");
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let outcome = self
            .collection
            .delete_one(doc! { "name": name }, None)
            .await
            .map_err(map_error)?;

        if outcome.deleted_count == 0 {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn find(&self, criteria: &Properties) -> Result<Vec<StoreObject>> {
        let filter = bson::to_document(criteria).map_err(|e| Error::invalid_record("criteria", e))?;
        let cursor = self
            .collection
            .find(filter, None)
            .await
            .map_err(map_error)?;
        let documents: Vec<Document> = cursor.try_collect().await.map_err(map_error)?;

        debug!(count = documents.len(), "found documents");
        documents.into_iter().map(from_document).collect()
    }
}

fn to_document(name: &str, properties: &Properties) -> Result<Document> {
    let mut document = bson::to_document(properties).map_err(|e| Error::invalid_record(name, e))?;
    document.remove(ID_FIELD);
    document.insert(NAME_FIELD, name);
    Ok(document)
}

fn from_document(mut document: Document) -> Result<StoreObject> {
    let id = document.remove(ID_FIELD);
    let name = match document.get_str(NAME_FIELD) {
        Ok(name) => name.to_string(),
        // Documents written by other tools may lack a name; fall back to the id.
        Err(_) => match id {
            Some(bson::Bson::ObjectId(oid)) => oid.to_hex(),
            Some(other) => other.to_string(),
            None => return Err(Error::invalid_record("<unnamed>", "document without name or _id")),
        },
    };

    let properties: Properties =
        bson::from_document(document).map_err(|e| Error::invalid_record(&name, e))?;
    Ok(StoreObject::new(name, properties))
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

fn map_error(err: mongodb::error::Error) -> Error {
    Error::backend(err)
}
