//! Action registry
//!
//! Maps `(resource, operation)` pairs to numeric action codes and back.
//! Each resource owns a block of [`BLOCK_SIZE`] consecutive codes. The
//! built-in table pins the legacy numbering so that nodes running different
//! versions agree on every code they both know; resources registered at
//! runtime get the next free block above [`DYNAMIC_BLOCK_START`].
//!
//! A registry is built with `&mut self` during startup and then shared as
//! `Arc<ActionRegistry>`, after which it can no longer change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::types::{GatehouseError, Result};

/// Number of codes reserved for one resource
pub const BLOCK_SIZE: u32 = 100;

/// First block handed out to resources without a pinned code
pub const DYNAMIC_BLOCK_START: u32 = 50_000;

/// Identifier of one `(resource, operation)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionCode(pub u32);

impl ActionCode {
    /// Base of the block this code belongs to
    pub fn block(self) -> u32 {
        self.0 - self.0 % BLOCK_SIZE
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ActionCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

macro_rules! builtin_actions {
    ($( $name:ident = ($resource:literal, $operation:literal, $code:literal); )*) => {
        /// Well-known action codes
        pub mod actions {
            use super::ActionCode;
            $( pub const $name: ActionCode = ActionCode($code); )*
        }

        const BUILTIN: &[(&str, &str, ActionCode)] = &[
            $( ($resource, $operation, actions::$name), )*
        ];
    };
}

builtin_actions! {
    SCHEDULER_CREATE = ("scheduler", "create", 10000);
    SCHEDULER_EDIT = ("scheduler", "edit", 10001);
    SCHEDULER_DELETE = ("scheduler", "delete", 10002);
    SCHEDULER_EXECUTE = ("scheduler", "execute", 10003);
    SCHEDULER_JOB_EXECUTED = ("scheduler", "job_executed", 10004);

    SOCKET_CLOSE = ("socket", "close", 10100);

    SECURITY_BASIC_AUTH_CREATE = ("security", "basic_auth_create", 10200);
    SECURITY_BASIC_AUTH_EDIT = ("security", "basic_auth_edit", 10201);
    SECURITY_BASIC_AUTH_DELETE = ("security", "basic_auth_delete", 10202);
    SECURITY_BASIC_AUTH_CHANGE_PASSWORD = ("security", "basic_auth_change_password", 10203);

    DEFINITION_AMQP_CREATE = ("definition", "amqp_create", 10500);
    DEFINITION_AMQP_EDIT = ("definition", "amqp_edit", 10501);
    DEFINITION_AMQP_DELETE = ("definition", "amqp_delete", 10502);

    OUTGOING_SQL_CREATE_EDIT = ("outgoing", "sql_create_edit", 10612);
    OUTGOING_SQL_CHANGE_PASSWORD = ("outgoing", "sql_change_password", 10613);
    OUTGOING_SQL_DELETE = ("outgoing", "sql_delete", 10614);
    OUTGOING_HTTP_SOAP_CREATE_EDIT = ("outgoing", "http_soap_create_edit", 10615);
    OUTGOING_HTTP_SOAP_DELETE = ("outgoing", "http_soap_delete", 10616);

    CHANNEL_HTTP_SOAP_CREATE_EDIT = ("channel", "http_soap_create_edit", 10712);
    CHANNEL_HTTP_SOAP_DELETE = ("channel", "http_soap_delete", 10713);

    SERVICE_EDIT = ("service", "edit", 10900);
    SERVICE_DELETE = ("service", "delete", 10901);
    SERVICE_SET_REQUEST_RESPONSE = ("service", "set_request_response", 10902);

    OUTGOING_WSX_CREATE = ("outgoing_wsx", "create", 11000);
    OUTGOING_WSX_EDIT = ("outgoing_wsx", "edit", 11001);
    OUTGOING_WSX_DELETE = ("outgoing_wsx", "delete", 11002);
    OUTGOING_WSX_RECONNECT = ("outgoing_wsx", "reconnect", 11003);
    OUTGOING_WSX_ALIVE = ("outgoing_wsx", "alive", 11004);
}

#[derive(Debug, Clone)]
struct ActionEntry {
    resource: String,
    operation: String,
    name: String,
}

/// Registry of action codes
#[derive(Debug, Default)]
pub struct ActionRegistry {
    /// code → entry, ordered for stable listings
    by_code: BTreeMap<ActionCode, ActionEntry>,
    /// (resource, operation) → code
    by_pair: HashMap<(String, String), ActionCode>,
    /// resource → base of its block
    blocks: HashMap<String, u32>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in action table
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (resource, operation, code) in BUILTIN {
            // The table is static and free of duplicates; the unit tests pin that.
            if let Err(e) = registry.register_with_code(resource, operation, *code) {
                tracing::error!("Built-in action table is inconsistent: {}", e);
            }
        }
        registry
    }

    /// Register a pair, allocating the next code in the resource's block
    pub fn register(&mut self, resource: &str, operation: &str) -> Result<ActionCode> {
        self.check_pair(resource, operation)?;

        let base = match self.blocks.get(resource) {
            Some(base) => *base,
            None => self.next_free_block(),
        };

        let next = self
            .by_code
            .range(ActionCode(base)..ActionCode(base + BLOCK_SIZE))
            .next_back()
            .map(|(code, _)| code.0 + 1)
            .unwrap_or(base);

        if next >= base + BLOCK_SIZE {
            return Err(GatehouseError::RegistryFull(format!(
                "resource `{}` has used all {} codes of block {}",
                resource, BLOCK_SIZE, base
            )));
        }

        self.insert(resource, operation, ActionCode(next))
    }

    /// Register a pair under a pinned code
    pub fn register_with_code(
        &mut self,
        resource: &str,
        operation: &str,
        code: ActionCode,
    ) -> Result<ActionCode> {
        self.check_pair(resource, operation)?;
        self.insert(resource, operation, code)
    }

    /// Diagnostic name of a code, e.g. `SCHEDULER_EXECUTE`
    pub fn name_of(&self, code: ActionCode) -> Result<&str> {
        self.by_code
            .get(&code)
            .map(|entry| entry.name.as_str())
            .ok_or(GatehouseError::UnknownCode(code))
    }

    /// Look up the code of a pair
    pub fn code_of(&self, resource: &str, operation: &str) -> Option<ActionCode> {
        self.by_pair
            .get(&(resource.to_string(), operation.to_string()))
            .copied()
    }

    /// Resource and operation of a code
    pub fn pair_of(&self, code: ActionCode) -> Option<(&str, &str)> {
        self.by_code
            .get(&code)
            .map(|entry| (entry.resource.as_str(), entry.operation.as_str()))
    }

    /// Whether the code is registered
    pub fn contains(&self, code: ActionCode) -> bool {
        self.by_code.contains_key(&code)
    }

    /// Number of registered actions
    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// All registered codes with their names, ordered by code
    pub fn iter(&self) -> impl Iterator<Item = (ActionCode, &str)> {
        self.by_code
            .iter()
            .map(|(code, entry)| (*code, entry.name.as_str()))
    }

    fn check_pair(&self, resource: &str, operation: &str) -> Result<()> {
        if resource.is_empty() || operation.is_empty() {
            return Err(GatehouseError::Config(
                "action resource and operation must not be empty".into(),
            ));
        }
        if let Some(code) = self.code_of(resource, operation) {
            return Err(GatehouseError::DuplicateCode(format!(
                "{} is already registered as {}",
                action_name(resource, operation),
                code
            )));
        }
        Ok(())
    }

    fn insert(&mut self, resource: &str, operation: &str, code: ActionCode) -> Result<ActionCode> {
        if let Some(existing) = self.by_code.get(&code) {
            return Err(GatehouseError::DuplicateCode(format!(
                "code {} is already taken by {}",
                code, existing.name
            )));
        }

        self.blocks
            .entry(resource.to_string())
            .or_insert_with(|| code.block());
        self.by_pair
            .insert((resource.to_string(), operation.to_string()), code);
        self.by_code.insert(
            code,
            ActionEntry {
                resource: resource.to_string(),
                operation: operation.to_string(),
                name: action_name(resource, operation),
            },
        );

        Ok(code)
    }

    fn next_free_block(&self) -> u32 {
        let mut base = DYNAMIC_BLOCK_START;
        while self.blocks.values().any(|b| *b == base)
            || self
                .by_code
                .range(ActionCode(base)..ActionCode(base + BLOCK_SIZE))
                .next()
                .is_some()
        {
            base += BLOCK_SIZE;
        }
        base
    }
}

fn action_name(resource: &str, operation: &str) -> String {
    format!("{}_{}", resource, operation).to_uppercase()
}
