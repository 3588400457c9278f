//! MongoDB source

use async_trait::async_trait;
use bson::doc;
use futures::TryStreamExt;
use mongodb::Client;
use serde::de::DeserializeOwned;
use tracing::info;

use super::{ConfigSource, JobConfig};
use crate::connector::ConnectorConfig;
use crate::types::{GatehouseError, Result};

/// Collection holding outgoing WebSocket connector rows
pub const CONNECTORS_COLLECTION: &str = "outconn_wsx";

/// Collection holding scheduler job rows
pub const JOBS_COLLECTION: &str = "scheduler_jobs";

/// Reads rows from MongoDB
#[derive(Clone)]
pub struct MongoConfigSource {
    client: Client,
    db_name: String,
}

impl MongoConfigSource {
    /// Connect and verify the server answers
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Avoid hanging on an unreachable server.
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| GatehouseError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GatehouseError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    async fn load<T>(&self, collection: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        let rows: Vec<T> = self
            .client
            .database(&self.db_name)
            .collection::<T>(collection)
            .find(doc! {})
            .await?
            .try_collect()
            .await?;
        info!(collection = %collection, rows = rows.len(), "Loaded rows");
        Ok(rows)
    }
}

#[async_trait]
impl ConfigSource for MongoConfigSource {
    async fn connector_configs(&self) -> Result<Vec<ConnectorConfig>> {
        self.load(CONNECTORS_COLLECTION).await
    }

    async fn job_list(&self) -> Result<Vec<JobConfig>> {
        self.load(JOBS_COLLECTION).await
    }
}
