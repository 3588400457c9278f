//! Gatehouse control CLI - publishes administrative envelopes to the cluster
//!
//! Usage:
//!   gatehouse-ctl execute-job --name nightly --extra '{"day":"mon"}'
//!   gatehouse-ctl reconnect --id 3
//!   gatehouse-ctl delete-connector --name crm
//!   gatehouse-ctl action --resource outgoing_wsx --operation alive --payload '{"name":"crm"}'
//!
//! Environment variables:
//!   NATS_URL - NATS server URL (default: nats://127.0.0.1:4222)
//!   GATEHOUSE_BROKER_SUBJECT - broker subject (default: gatehouse.broker)

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use gatehouse::{
    broker::{actions, ActionCode, ActionRegistry, BrokerClient, BrokerEnvelope, Payload},
    config::{NatsArgs, DEFAULT_BROKER_SUBJECT},
    logging,
    nats::NatsClient,
};

#[derive(Parser, Debug)]
#[command(name = "gatehouse-ctl")]
#[command(about = "Publish administrative commands to a Gatehouse cluster")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    nats: NatsArgs,

    /// Broker subject
    #[arg(long, env = "GATEHOUSE_BROKER_SUBJECT", default_value = DEFAULT_BROKER_SUBJECT)]
    broker_subject: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scheduled job now
    ExecuteJob {
        #[arg(long)]
        name: String,
        /// Service to invoke, defaults to the job name
        #[arg(long)]
        service: Option<String>,
        /// JSON handed to the service
        #[arg(long)]
        extra: Option<String>,
    },
    /// Rebuild a connector's pool
    Reconnect {
        #[arg(long)]
        id: u64,
    },
    /// Remove a connector from every node
    DeleteConnector {
        #[arg(long)]
        name: String,
    },
    /// Close every connector of a socket group
    CloseGroup {
        #[arg(long)]
        group: String,
    },
    /// Publish any action, by code or by resource and operation
    Action {
        #[arg(long, conflicts_with_all = ["resource", "operation"])]
        code: Option<u32>,
        #[arg(long, requires = "operation")]
        resource: Option<String>,
        #[arg(long, requires = "resource")]
        operation: Option<String>,
        /// JSON object used as the payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.log_level, false);

    let envelope = build_envelope(cli.command)?;

    let nats = NatsClient::new(&cli.nats, &format!("gatehouse-ctl-{}", uuid::Uuid::new_v4()))
        .await
        .context("NATS connection failed")?;
    let client = BrokerClient::new(Arc::new(nats.clone()), cli.broker_subject.clone());

    client.publish(&envelope).await?;
    nats.flush().await?;

    info!(
        action = %envelope.action,
        correlation_id = %envelope.correlation_id,
        "Published to {}",
        cli.broker_subject
    );
    println!("{}", envelope.correlation_id);
    Ok(())
}

fn build_envelope(command: Command) -> anyhow::Result<BrokerEnvelope> {
    let envelope = match command {
        Command::ExecuteJob { name, service, extra } => {
            let mut env = BrokerEnvelope::new(actions::SCHEDULER_EXECUTE).with("name", name);
            if let Some(service) = service {
                env = env.with("service", service);
            }
            if let Some(extra) = extra {
                let extra: Value = serde_json::from_str(&extra).context("--extra is not JSON")?;
                env = env.with("extra", extra);
            }
            env
        }
        Command::Reconnect { id } => BrokerEnvelope::new(actions::OUTGOING_WSX_RECONNECT).with("id", id),
        Command::DeleteConnector { name } => {
            BrokerEnvelope::new(actions::OUTGOING_WSX_DELETE).with("name", name)
        }
        Command::CloseGroup { group } => BrokerEnvelope::new(actions::SOCKET_CLOSE).with("group", group),
        Command::Action {
            code,
            resource,
            operation,
            payload,
        } => {
            let code = match (code, resource, operation) {
                (Some(code), _, _) => ActionCode(code),
                (None, Some(resource), Some(operation)) => ActionRegistry::builtin()
                    .code_of(&resource, &operation)
                    .ok_or_else(|| anyhow!("no action {}.{}", resource, operation))?,
                _ => bail!("either --code or --resource with --operation is required"),
            };
            let payload: Payload = match serde_json::from_str(&payload).context("--payload is not JSON")? {
                Value::Object(map) => map.into_iter().collect(),
                _ => bail!("--payload must be a JSON object"),
            };
            BrokerEnvelope::new(code).with_payload(payload)
        }
    };
    Ok(envelope)
}
