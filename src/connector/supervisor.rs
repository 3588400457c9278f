//! Connector supervisor
//!
//! Owns every outgoing connector of the process, keyed by name with an id
//! index for broker messages that only carry ids. Reconfiguration swaps the
//! map entry in one insert, so a sender resolves either the old connector
//! (whose pool is drained and fails fast) or the new one.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::config::ConnectorConfig;
use super::connector::{ConnectorRuntime, ConnectorStatus, PooledConnector};
use crate::broker::{actions, ActionCode, BrokerEnvelope, Dispatcher, Handler};
use crate::transport::Outbound;
use crate::types::{GatehouseError, Result};

/// Actions routed to the supervisor
pub const SUPERVISOR_ACTIONS: &[ActionCode] = &[
    actions::OUTGOING_WSX_CREATE,
    actions::OUTGOING_WSX_EDIT,
    actions::OUTGOING_WSX_DELETE,
    actions::OUTGOING_WSX_RECONNECT,
    actions::OUTGOING_WSX_ALIVE,
    actions::SOCKET_CLOSE,
];

/// All outgoing connectors of this process
pub struct ConnectorSupervisor {
    /// name → connector
    connectors: DashMap<String, Arc<PooledConnector>>,
    /// id → name
    names: DashMap<u64, String>,
    runtime: ConnectorRuntime,
}

impl ConnectorSupervisor {
    pub fn new(runtime: ConnectorRuntime) -> Arc<Self> {
        Arc::new(Self {
            connectors: DashMap::new(),
            names: DashMap::new(),
            runtime,
        })
    }

    /// Create and start a connector
    ///
    /// Inactive connectors are registered but not started.
    pub fn create(&self, config: ConnectorConfig) -> Result<Arc<PooledConnector>> {
        config.validate()?;

        let connector = match self.connectors.entry(config.name.clone()) {
            Entry::Occupied(_) => {
                return Err(GatehouseError::Config(format!(
                    "connector `{}` already exists",
                    config.name
                )))
            }
            Entry::Vacant(slot) => {
                let connector = PooledConnector::new(config, self.runtime.clone());
                slot.insert(Arc::clone(&connector));
                connector
            }
        };

        self.names
            .insert(connector.id(), connector.name().to_string());
        self.start_if_active(&connector);
        Ok(connector)
    }

    /// Replace a connector's configuration
    ///
    /// The old connector is drained with an administrative reason, so none of
    /// its sessions reconnect or reach the on-close service. The swap happens
    /// on the map entry, so a concurrent delete either wins outright or
    /// removes the new connector.
    pub fn reconfigure(&self, name: &str, config: ConnectorConfig) -> Result<Arc<PooledConnector>> {
        config.validate()?;
        let connector = PooledConnector::new(config, self.runtime.clone());

        let old = if connector.name() == name {
            match self.connectors.entry(name.to_string()) {
                Entry::Occupied(mut slot) => slot.insert(Arc::clone(&connector)),
                Entry::Vacant(_) => return Err(GatehouseError::ConnectorNotFound(name.to_string())),
            }
        } else {
            let (_, old) = self
                .connectors
                .remove(name)
                .ok_or_else(|| GatehouseError::ConnectorNotFound(name.to_string()))?;

            let taken = match self.connectors.entry(connector.name().to_string()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&connector));
                    false
                }
            };
            if taken {
                self.connectors.entry(name.to_string()).or_insert(old);
                return Err(GatehouseError::Config(format!(
                    "cannot rename `{}` to `{}`: name taken",
                    name,
                    connector.name()
                )));
            }
            info!(from = %name, to = %connector.name(), "Connector renamed");
            old
        };

        if old.id() != connector.id() {
            self.names.remove(&old.id());
        }
        old.delete();
        self.names
            .insert(connector.id(), connector.name().to_string());

        info!(connector = %connector.name(), "Connector reconfigured");
        self.start_if_active(&connector);
        Ok(connector)
    }

    /// Delete a connector and close its sessions
    pub fn delete(&self, name: &str) -> Result<()> {
        let (_, connector) = self
            .connectors
            .remove(name)
            .ok_or_else(|| GatehouseError::ConnectorNotFound(name.to_string()))?;
        self.names.remove(&connector.id());
        connector.delete();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<PooledConnector>> {
        self.connectors.get(name).map(|c| c.value().clone())
    }

    pub fn get_by_id(&self, id: u64) -> Option<Arc<PooledConnector>> {
        let name = self.names.get(&id).map(|n| n.value().clone())?;
        self.get(&name)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Send a payload through the named connector
    pub async fn send(&self, name: &str, data: impl Into<Outbound>, timeout: Duration) -> Result<()> {
        let connector = self
            .get(name)
            .ok_or_else(|| GatehouseError::ConnectorNotFound(name.to_string()))?;
        connector.send(data, timeout).await
    }

    /// Tear a connector down and build it again from its current config
    pub fn reconnect(&self, id: u64) -> Result<Arc<PooledConnector>> {
        let connector = self
            .get_by_id(id)
            .ok_or_else(|| GatehouseError::ConnectorNotFound(format!("id {}", id)))?;
        let config = connector.config().clone();
        info!(connector = %config.name, "Reconnecting connector");
        self.reconfigure(&config.name.clone(), config)
    }

    /// Close every connector of a socket group
    pub fn close_group(&self, group: &str) -> usize {
        let names: Vec<String> = self
            .connectors
            .iter()
            .filter(|c| c.value().config().group.as_deref() == Some(group))
            .map(|c| c.key().clone())
            .collect();

        for name in &names {
            if let Err(e) = self.delete(name) {
                debug!(connector = %name, "Already gone while closing group: {}", e);
            }
        }
        info!(group = %group, closed = names.len(), "Socket group closed");
        names.len()
    }

    /// Apply a connector broker message
    pub fn route_broker_message(&self, envelope: &BrokerEnvelope) -> Result<()> {
        match envelope.action {
            code if code == actions::OUTGOING_WSX_CREATE => {
                let config = ConnectorConfig::from_payload(&envelope.payload)?;
                self.create(config).map(|_| ())
            }
            code if code == actions::OUTGOING_WSX_EDIT => {
                let config = ConnectorConfig::from_payload(&envelope.payload)?;
                let old_name = match envelope.get_str("old_name") {
                    Some(name) => name.to_string(),
                    None => self
                        .names
                        .get(&config.id)
                        .map(|n| n.value().clone())
                        .unwrap_or_else(|| config.name.clone()),
                };
                self.reconfigure(&old_name, config).map(|_| ())
            }
            code if code == actions::OUTGOING_WSX_DELETE => {
                let name = self.resolve_name(envelope)?;
                self.delete(&name)
            }
            code if code == actions::OUTGOING_WSX_RECONNECT => {
                let id = self.resolve_id(envelope)?;
                self.reconnect(id).map(|_| ())
            }
            code if code == actions::OUTGOING_WSX_ALIVE => {
                let name = self.resolve_name(envelope)?;
                let connector = self
                    .get(&name)
                    .ok_or(GatehouseError::ConnectorNotFound(name))?;
                connector.note_alive();
                Ok(())
            }
            code if code == actions::SOCKET_CLOSE => {
                let group = envelope.require_str("group")?;
                self.close_group(group);
                Ok(())
            }
            other => Err(GatehouseError::UnknownCode(other)),
        }
    }

    fn resolve_name(&self, envelope: &BrokerEnvelope) -> Result<String> {
        if let Some(name) = envelope.get_str("name") {
            return Ok(name.to_string());
        }
        let id = self.resolve_id(envelope)?;
        self.names
            .get(&id)
            .map(|n| n.value().clone())
            .ok_or_else(|| GatehouseError::ConnectorNotFound(format!("id {}", id)))
    }

    fn resolve_id(&self, envelope: &BrokerEnvelope) -> Result<u64> {
        if let Some(id) = envelope.get_u64("id") {
            return Ok(id);
        }
        if let Some(name) = envelope.get_str("name") {
            if let Some(connector) = self.get(name) {
                return Ok(connector.id());
            }
            return Err(GatehouseError::ConnectorNotFound(name.to_string()));
        }
        Err(GatehouseError::InvalidMessage(format!(
            "{} carries neither `id` nor `name`",
            envelope.correlation_id
        )))
    }

    /// Register the connector handlers with a dispatcher
    pub fn register_handlers(self: &Arc<Self>, dispatcher: &mut Dispatcher) -> Result<()> {
        for code in SUPERVISOR_ACTIONS {
            dispatcher.register_handler(*code, Arc::new(SupervisorHandler(Arc::clone(self))))?;
        }
        Ok(())
    }

    /// Create connectors from startup rows, returning how many were created
    pub fn load(&self, configs: impl IntoIterator<Item = ConnectorConfig>) -> usize {
        let mut created = 0;
        for config in configs {
            let name = config.name.clone();
            match self.create(config) {
                Ok(_) => created += 1,
                Err(e) => error!(connector = %name, "Could not create connector: {}", e),
            }
        }
        info!(created, "Outgoing connectors loaded");
        created
    }

    /// Status of every connector, ordered by name
    pub fn statuses(&self) -> Vec<ConnectorStatus> {
        let mut statuses: Vec<_> = self.connectors.iter().map(|c| c.value().status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Delete every connector
    pub fn shutdown(&self) {
        let names: Vec<String> = self.connectors.iter().map(|c| c.key().clone()).collect();
        for name in names {
            if let Err(e) = self.delete(&name) {
                warn!(connector = %name, "Shutdown: {}", e);
            }
        }
        info!("All outgoing connectors stopped");
    }

    fn start_if_active(&self, connector: &Arc<PooledConnector>) {
        if connector.config().is_active {
            connector.start();
        } else {
            info!(connector = %connector.name(), "Connector is inactive, not starting");
        }
    }
}

struct SupervisorHandler(Arc<ConnectorSupervisor>);

#[async_trait]
impl Handler for SupervisorHandler {
    async fn handle(&self, envelope: &BrokerEnvelope) -> Result<()> {
        self.0.route_broker_message(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ActionRegistry;

    fn inactive(id: u64, name: &str) -> ConnectorConfig {
        let mut config = ConnectorConfig::new(id, name, "ws://127.0.0.1:9/feed");
        config.is_active = false;
        config
    }

    fn supervisor() -> Arc<ConnectorSupervisor> {
        ConnectorSupervisor::new(ConnectorRuntime::default())
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let sup = supervisor();
        sup.create(inactive(1, "crm")).unwrap();
        let err = sup.create(inactive(2, "crm")).unwrap_err();
        assert!(matches!(err, GatehouseError::Config(_)));
        assert_eq!(sup.len(), 1);
    }

    #[tokio::test]
    async fn test_broker_messages_manage_connectors() {
        let sup = supervisor();

        let create = BrokerEnvelope::new(actions::OUTGOING_WSX_CREATE)
            .with_payload(inactive(5, "billing").to_payload().unwrap());
        sup.route_broker_message(&create).unwrap();
        assert!(sup.get("billing").is_some());
        assert_eq!(sup.get_by_id(5).unwrap().name(), "billing");

        let mut renamed = inactive(5, "billing-v2");
        renamed.pool_size = 3;
        let edit = BrokerEnvelope::new(actions::OUTGOING_WSX_EDIT)
            .with_payload(renamed.to_payload().unwrap())
            .with("old_name", "billing");
        sup.route_broker_message(&edit).unwrap();
        assert!(sup.get("billing").is_none());
        assert_eq!(sup.get_by_id(5).unwrap().config().pool_size, 3);

        let delete = BrokerEnvelope::new(actions::OUTGOING_WSX_DELETE).with("id", 5);
        sup.route_broker_message(&delete).unwrap();
        assert!(sup.is_empty());
        assert!(sup.get_by_id(5).is_none());
    }

    #[tokio::test]
    async fn test_edit_without_old_name_uses_id_index() {
        let sup = supervisor();
        sup.create(inactive(9, "feed")).unwrap();

        let edit = BrokerEnvelope::new(actions::OUTGOING_WSX_EDIT)
            .with_payload(inactive(9, "feed-renamed").to_payload().unwrap());
        sup.route_broker_message(&edit).unwrap();
        assert_eq!(sup.len(), 1);
        assert!(sup.get("feed-renamed").is_some());
    }

    #[tokio::test]
    async fn test_reconfigured_connector_is_drained() {
        let sup = supervisor();
        let old = sup.create(inactive(1, "crm")).unwrap();
        let new = sup.reconfigure("crm", inactive(1, "crm")).unwrap();

        assert!(old.pool().is_draining());
        assert!(!new.pool().is_draining());
        assert!(Arc::ptr_eq(&sup.get("crm").unwrap(), &new));
    }

    #[tokio::test]
    async fn test_rename_onto_taken_name_keeps_both() {
        let sup = supervisor();
        let crm = sup.create(inactive(1, "crm")).unwrap();
        sup.create(inactive(2, "erp")).unwrap();

        let err = sup.reconfigure("crm", inactive(1, "erp")).unwrap_err();
        assert!(matches!(err, GatehouseError::Config(_)));
        assert!(Arc::ptr_eq(&sup.get("crm").unwrap(), &crm));
        assert!(!crm.pool().is_draining());
        assert_eq!(sup.get("erp").unwrap().id(), 2);
    }

    #[test]
    fn test_delete_racing_reconfigure_is_never_undone() {
        for _ in 0..200 {
            let sup = supervisor();
            sup.create(inactive(1, "crm")).unwrap();

            let (deleted, _) = std::thread::scope(|scope| {
                let deleter = scope.spawn(|| sup.delete("crm").is_ok());
                let editor = scope.spawn(|| sup.reconfigure("crm", inactive(1, "crm")).is_ok());
                (deleter.join().unwrap(), editor.join().unwrap())
            });

            // Whichever order they ran in, a successful delete leaves nothing behind.
            assert!(deleted);
            assert!(sup.get("crm").is_none());
            assert!(sup.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_connector_errors() {
        let sup = supervisor();
        assert!(matches!(
            sup.delete("nope"),
            Err(GatehouseError::ConnectorNotFound(_))
        ));
        assert!(matches!(
            sup.reconnect(42),
            Err(GatehouseError::ConnectorNotFound(_))
        ));
        assert!(matches!(
            sup.send("nope", "hi", Duration::ZERO).await,
            Err(GatehouseError::ConnectorNotFound(_))
        ));
        let delete = BrokerEnvelope::new(actions::OUTGOING_WSX_DELETE);
        assert!(matches!(
            sup.route_broker_message(&delete),
            Err(GatehouseError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_socket_close_closes_only_the_group() {
        let sup = supervisor();
        for (id, name, group) in [(1, "a", "finance"), (2, "b", "finance"), (3, "c", "ops")] {
            let mut config = inactive(id, name);
            config.group = Some(group.to_string());
            sup.create(config).unwrap();
        }

        let close = BrokerEnvelope::new(actions::SOCKET_CLOSE).with("group", "finance");
        sup.route_broker_message(&close).unwrap();

        let names: Vec<_> = sup.statuses().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_alive_notice_records_time() {
        let sup = supervisor();
        sup.create(inactive(4, "crm")).unwrap();
        assert!(sup.get("crm").unwrap().status().last_alive.is_none());

        let alive = BrokerEnvelope::new(actions::OUTGOING_WSX_ALIVE).with("id", 4);
        sup.route_broker_message(&alive).unwrap();
        assert!(sup.get("crm").unwrap().status().last_alive.is_some());
    }

    #[tokio::test]
    async fn test_register_handlers_once() {
        let sup = supervisor();
        let mut dispatcher = Dispatcher::new(Arc::new(ActionRegistry::builtin()));
        sup.register_handlers(&mut dispatcher).unwrap();
        for code in SUPERVISOR_ACTIONS {
            assert!(dispatcher.has_handler(*code));
        }

        let err = sup.register_handlers(&mut dispatcher).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_load_skips_invalid_rows() {
        let sup = supervisor();
        let rows = vec![inactive(1, "ok"), inactive(2, ""), inactive(3, "also-ok")];
        assert_eq!(sup.load(rows), 2);

        sup.shutdown();
        assert!(sup.is_empty());
    }
}
