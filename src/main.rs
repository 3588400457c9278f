//! Gatehouse - cluster control plane and outgoing connectors

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use gatehouse::{
    broker::{ActionRegistry, BrokerClient, Dispatcher},
    config::{Args, CallbackMode, ConfigSourceKind},
    connector::{CallbackInvoker, ConnectorRuntime, ConnectorSupervisor, LoggingInvoker},
    jobs::{self, ExecuteJobHandler},
    logging,
    nats::{NatsCallbackInvoker, NatsClient},
    server::{self, ServerState},
    store::{ConfigSource, EmptySource, FileConfigSource, MongoConfigSource},
    transport::WsDialer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Gatehouse");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Status endpoint: {}", args.listen);
    info!("NATS: {}", args.nats.nats_url);
    info!("Broker subject: {}", args.broker_subject);
    info!("Callbacks: {:?}", args.callback_mode);
    info!("Config source: {:?}", args.config_source);
    match args.scheduler() {
        Some(scheduler) => info!("Scheduler: {}", scheduler.url()),
        None => info!("Scheduler: via broker"),
    }
    info!("======================================");

    let nats = match NatsClient::new(&args.nats, &format!("gatehouse-{}", args.node_id)).await {
        Ok(client) => {
            info!("NATS connected successfully");
            client
        }
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let mut broker = BrokerClient::new(Arc::new(nats.clone()), args.broker_subject.clone());
    if let Some(scheduler) = args.scheduler() {
        broker = broker.with_scheduler(scheduler);
    }

    let invoker: Arc<dyn CallbackInvoker> = match args.callback_mode {
        CallbackMode::Log => Arc::new(LoggingInvoker),
        CallbackMode::Nats => Arc::new(NatsCallbackInvoker::new(
            nats.clone(),
            args.callback_subject_prefix.clone(),
        )),
    };

    let runtime = ConnectorRuntime::new(
        Arc::new(WsDialer::new(args.connect_timeout())),
        Arc::clone(&invoker),
    )
    .with_callback_timeout(args.callback_timeout());
    let supervisor = ConnectorSupervisor::new(runtime);

    // Handler registration conflicts are programming errors; refuse to start.
    let registry = Arc::new(ActionRegistry::builtin());
    let mut dispatcher = Dispatcher::new(Arc::clone(&registry));
    supervisor.register_handlers(&mut dispatcher)?;
    ExecuteJobHandler::new(Arc::clone(&invoker), args.callback_timeout()).register(&mut dispatcher)?;
    let dispatcher = Arc::new(dispatcher);
    info!("Registered {} actions", registry.len());

    let source: Box<dyn ConfigSource> = match args.config_source {
        ConfigSourceKind::None => Box::new(EmptySource),
        ConfigSourceKind::File => match args.config_file.as_ref() {
            Some(path) => Box::new(FileConfigSource::new(path)),
            None => Box::new(EmptySource),
        },
        ConfigSourceKind::Mongo => {
            let uri = args.mongodb_uri.as_deref().unwrap_or_default();
            match MongoConfigSource::connect(uri, &args.mongodb_db).await {
                Ok(source) => Box::new(source),
                Err(e) => {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    match source.connector_configs().await {
        Ok(configs) => {
            let loaded = supervisor.load(configs);
            info!("Loaded {} connectors", loaded);
        }
        Err(e) => warn!("Could not load connectors: {}", e),
    }

    match source.job_list().await {
        Ok(list) => {
            jobs::submit_startup_jobs(&broker, list).await;
        }
        Err(e) => warn!("Could not load jobs: {}", e),
    }

    let state = Arc::new(ServerState::new(
        args.node_id,
        Arc::clone(&supervisor),
        Arc::clone(&dispatcher),
    ));
    let listen = args.listen;
    let status_server = tokio::spawn(async move {
        if let Err(e) = server::run(state, listen).await {
            error!("Status endpoint failed: {}", e);
        }
    });

    let frames = nats.frames(&args.broker_subject).await?;
    info!("Listening for broker messages on {}", args.broker_subject);

    tokio::select! {
        _ = dispatcher.run(frames) => {
            warn!("Broker subscription closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    supervisor.shutdown();
    status_server.abort();
    if let Err(e) = nats.flush().await {
        warn!("Could not flush NATS: {}", e);
    }
    info!("Gatehouse stopped");

    Ok(())
}
