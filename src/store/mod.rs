//! Startup configuration sources
//!
//! At startup a process loads its outgoing connector rows and the scheduler's
//! job list from one source. Later changes arrive as broker messages.

pub mod file;
pub mod jobs;
pub mod mongo;

use async_trait::async_trait;

use crate::connector::ConnectorConfig;
use crate::types::Result;

pub use file::FileConfigSource;
pub use jobs::{JobConfig, JobKind};
pub use mongo::MongoConfigSource;

/// Where startup rows come from
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Outgoing connector rows
    async fn connector_configs(&self) -> Result<Vec<ConnectorConfig>>;

    /// Scheduled job rows
    async fn job_list(&self) -> Result<Vec<JobConfig>>;
}

/// Source with no rows
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySource;

#[async_trait]
impl ConfigSource for EmptySource {
    async fn connector_configs(&self) -> Result<Vec<ConnectorConfig>> {
        Ok(Vec::new())
    }

    async fn job_list(&self) -> Result<Vec<JobConfig>> {
        Ok(Vec::new())
    }
}
