//! Configuration for Gatehouse
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::broker::SchedulerConfig;

/// Default broker subject every node subscribes to
pub const DEFAULT_BROKER_SUBJECT: &str = "gatehouse.broker";

/// Gatehouse - cluster control plane and outgoing connectors
#[derive(Parser, Debug, Clone)]
#[command(name = "gatehouse")]
#[command(about = "Cluster broker and pooled WebSocket connectors for an integration server")]
pub struct Args {
    /// Unique identifier of this process
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address the status endpoint listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Broker subject carrying encoded envelopes
    #[arg(long, env = "GATEHOUSE_BROKER_SUBJECT", default_value = DEFAULT_BROKER_SUBJECT)]
    pub broker_subject: String,

    /// How application callbacks are run
    #[arg(long, env = "CALLBACK_MODE", value_enum, default_value = "log")]
    pub callback_mode: CallbackMode,

    /// Subject prefix for callbacks published over NATS
    #[arg(long, env = "CALLBACK_SUBJECT_PREFIX", default_value = "gatehouse.callback")]
    pub callback_subject_prefix: String,

    /// Upper bound on one callback invocation in milliseconds
    #[arg(long, env = "CALLBACK_TIMEOUT_MS", default_value = "30000")]
    pub callback_timeout_ms: u64,

    /// WebSocket connect timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// Where connector and job rows are loaded from at startup
    #[arg(long, env = "CONFIG_SOURCE", value_enum, default_value = "none")]
    pub config_source: ConfigSourceKind,

    /// JSON file with `connectors` and `jobs` arrays (file source)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// MongoDB connection URI (mongo source)
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "gatehouse")]
    pub mongodb_db: String,

    /// Scheduler API host; scheduler actions go over the broker when unset
    #[arg(long, env = "SCHEDULER_HOST")]
    pub scheduler_host: Option<String>,

    /// Scheduler API port
    #[arg(long, env = "SCHEDULER_PORT", default_value = "31530")]
    pub scheduler_port: u16,

    /// Use https for the scheduler API
    #[arg(long, env = "SCHEDULER_USE_TLS", default_value = "false")]
    pub scheduler_use_tls: bool,

    /// Scheduler API username
    #[arg(long, env = "SCHEDULER_USERNAME")]
    pub scheduler_username: Option<String>,

    /// Scheduler API password
    #[arg(long, env = "SCHEDULER_PASSWORD")]
    pub scheduler_password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

/// How callbacks reach the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CallbackMode {
    /// Only log callbacks
    Log,
    /// Publish callbacks on `<prefix>.<service>`
    Nats,
}

/// Startup configuration source
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigSourceKind {
    None,
    File,
    Mongo,
}

impl Args {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Scheduler API settings, if a host is configured
    pub fn scheduler(&self) -> Option<SchedulerConfig> {
        self.scheduler_host.as_ref().map(|host| SchedulerConfig {
            host: host.clone(),
            port: self.scheduler_port,
            use_tls: self.scheduler_use_tls,
            username: self.scheduler_username.clone(),
            password: self.scheduler_password.clone(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.broker_subject.is_empty()
            || self.broker_subject.contains(['*', '>', ' '])
        {
            return Err(format!(
                "GATEHOUSE_BROKER_SUBJECT must be a concrete subject, got `{}`",
                self.broker_subject
            ));
        }

        if self.callback_timeout_ms == 0 {
            return Err("CALLBACK_TIMEOUT_MS must be greater than 0".to_string());
        }

        if self.connect_timeout_ms == 0 {
            return Err("CONNECT_TIMEOUT_MS must be greater than 0".to_string());
        }

        match self.config_source {
            ConfigSourceKind::File if self.config_file.is_none() => {
                return Err("CONFIG_FILE is required when CONFIG_SOURCE=file".to_string());
            }
            ConfigSourceKind::Mongo if self.mongodb_uri.is_none() => {
                return Err("MONGODB_URI is required when CONFIG_SOURCE=mongo".to_string());
            }
            _ => {}
        }

        if self.scheduler_password.is_some() && self.scheduler_username.is_none() {
            return Err("SCHEDULER_PASSWORD is set without SCHEDULER_USERNAME".to_string());
        }

        Ok(())
    }
}
