//! Scheduled jobs
//!
//! The scheduler itself runs elsewhere. This node submits its job list at
//! startup and runs a job's service when the scheduler says it fired.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::broker::{actions, BrokerClient, BrokerEnvelope, Dispatcher, Handler};
use crate::connector::{invoke_contained, CallbackContext, CallbackInvoker};
use crate::store::JobConfig;
use crate::types::{GatehouseError, Result};

/// Runs a job's service on `SCHEDULER_EXECUTE`
pub struct ExecuteJobHandler {
    invoker: Arc<dyn CallbackInvoker>,
    timeout: Duration,
}

impl ExecuteJobHandler {
    pub fn new(invoker: Arc<dyn CallbackInvoker>, timeout: Duration) -> Self {
        Self { invoker, timeout }
    }

    /// Register for `SCHEDULER_EXECUTE`
    pub fn register(self, dispatcher: &mut Dispatcher) -> Result<()> {
        dispatcher.register_handler(actions::SCHEDULER_EXECUTE, Arc::new(self))
    }
}

#[async_trait]
impl Handler for ExecuteJobHandler {
    async fn handle(&self, envelope: &BrokerEnvelope) -> Result<()> {
        let job = envelope.require_str("name")?;
        let service = envelope.get_str("service").unwrap_or(job);
        let extra = envelope.payload.get("extra").cloned().unwrap_or(Value::Null);

        info!(
            job = %job,
            service = %service,
            correlation_id = %envelope.correlation_id,
            "Executing job"
        );

        let ctx = CallbackContext::Job {
            job: job.to_string(),
            cid: envelope.correlation_id.clone(),
            extra,
        };
        if invoke_contained(self.invoker.as_ref(), service, &ctx, self.timeout).await {
            Ok(())
        } else {
            Err(GatehouseError::callback(service, format!("job `{}` did not complete", job)))
        }
    }
}

/// Submit active, valid jobs to the scheduler, returning how many were accepted
pub async fn submit_startup_jobs(client: &BrokerClient, jobs: Vec<JobConfig>) -> usize {
    let mut submitted = 0;
    for job in jobs {
        if !job.is_active {
            continue;
        }
        if let Err(e) = job.validate() {
            warn!("Skipping job: {}", e);
            continue;
        }
        let result = match job.to_create_envelope() {
            Ok(envelope) => client.publish(&envelope).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => submitted += 1,
            Err(e) => warn!(job = %job.name, "Could not submit job: {}", e),
        }
    }
    info!("Submitted {} startup jobs", submitted);
    submitted
}
