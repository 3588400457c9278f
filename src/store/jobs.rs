//! Scheduled job rows

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::{actions, BrokerEnvelope, Payload};
use crate::types::{GatehouseError, Result};

/// How a job is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    OneTime,
    IntervalBased,
    CronStyle,
}

/// One scheduler job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: u64,
    pub name: String,
    /// Service invoked when the job fires
    pub service: String,
    pub job_type: JobKind,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub start_date: Option<String>,

    #[serde(default)]
    pub weeks: Option<u32>,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub hours: Option<u32>,
    #[serde(default)]
    pub minutes: Option<u32>,
    #[serde(default)]
    pub seconds: Option<u32>,
    #[serde(default)]
    pub repeats: Option<u32>,

    #[serde(default)]
    pub cron_definition: Option<String>,

    /// Handed to the service as-is
    #[serde(default)]
    pub extra: Value,
}

fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Reject rows the scheduler could never run
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.service.is_empty() {
            return Err(GatehouseError::Config(format!(
                "job {} needs both a name and a service",
                self.id
            )));
        }
        match self.job_type {
            JobKind::CronStyle if self.cron_definition.is_none() => Err(GatehouseError::Config(
                format!("cron job `{}` has no cron definition", self.name),
            )),
            JobKind::IntervalBased
                if [self.weeks, self.days, self.hours, self.minutes, self.seconds]
                    .iter()
                    .all(|v| v.unwrap_or(0) == 0) =>
            {
                Err(GatehouseError::Config(format!(
                    "interval job `{}` has no interval",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }

    /// `SCHEDULER_CREATE` envelope for this job
    pub fn to_create_envelope(&self) -> Result<BrokerEnvelope> {
        let payload: Payload = match serde_json::to_value(self)? {
            Value::Object(map) => map.into_iter().collect(),
            _ => Payload::new(),
        };
        Ok(BrokerEnvelope::new(actions::SCHEDULER_CREATE).with_payload(payload))
    }
}
