//! JSON file source

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{ConfigSource, JobConfig};
use crate::connector::ConnectorConfig;
use crate::types::{GatehouseError, Result};

#[derive(Debug, Default, Deserialize)]
struct FileRows {
    #[serde(default)]
    connectors: Vec<ConnectorConfig>,
    #[serde(default)]
    jobs: Vec<JobConfig>,
}

/// Reads `{"connectors": [...], "jobs": [...]}` from disk
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read(&self) -> Result<FileRows> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            GatehouseError::Config(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let rows: FileRows = serde_json::from_slice(&data).map_err(|e| {
            GatehouseError::Config(format!("cannot parse {}: {}", self.path.display(), e))
        })?;
        info!(
            path = %self.path.display(),
            connectors = rows.connectors.len(),
            jobs = rows.jobs.len(),
            "Loaded configuration file"
        );
        Ok(rows)
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn connector_configs(&self) -> Result<Vec<ConnectorConfig>> {
        Ok(self.read().await?.connectors)
    }

    async fn job_list(&self) -> Result<Vec<JobConfig>> {
        Ok(self.read().await?.jobs)
    }
}
