use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::NetworkContext;
use crate::error::SimError;
use crate::message::Message;
use crate::telemetry::TelemetryRecord;

pub type EntityId = u32;
pub type ConnectionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Client,
    Server,
    LoadBalancer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Client => "Client",
            Self::Server => "Server",
            Self::LoadBalancer => "LoadBalancer",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            "loadbalancer" | "lb" => Ok(Self::LoadBalancer),
            _ => Err(SimError::UnknownKind(s.to_string())),
        }
    }
}

/// Identity every entity carries: its address, a display name and the
/// connections it takes part in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCore {
    pub ip: String,
    pub name: String,
    pub connections: Vec<ConnectionId>,
}

impl EntityCore {
    pub fn new(ip: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            name: name.into(),
            connections: Vec::new(),
        }
    }

    pub fn attach(&mut self, connection: ConnectionId) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    pub fn detach(&mut self, connection: ConnectionId) {
        self.connections.retain(|&id| id != connection);
    }
}

/// Read-only view of the rest of the network, handed to an entity while it runs.
pub trait SystemInspector {
    fn kind_of(&self, id: EntityId) -> Option<EntityKind>;
    fn total_load(&self, id: EntityId) -> Option<usize>;
}

/// Contract shared by clients, servers and load balancers.
///
/// Entities never own each other or their connections; everything they need to
/// touch outside themselves goes through the [`NetworkContext`].
pub trait NetworkEntity: Any {
    fn core(&self) -> &EntityCore;
    fn core_mut(&mut self) -> &mut EntityCore;
    fn kind(&self) -> EntityKind;

    fn ip(&self) -> &str {
        &self.core().ip
    }
    fn name(&self) -> &str {
        &self.core().name
    }
    fn connections(&self) -> &[ConnectionId] {
        &self.core().connections
    }

    fn tick(&mut self, elapsed: Duration, net: &mut NetworkContext<'_>);
    fn receive(&mut self, connection: ConnectionId, message: Message, net: &mut NetworkContext<'_>);

    /// Called once the connection is attached, and again whenever it is re-activated.
    fn on_new_connection(&mut self, _connection: ConnectionId, _net: &mut NetworkContext<'_>) {}
    /// Called after the connection went inactive and dropped its in-flight messages.
    fn on_connection_disconnected(&mut self, connection: ConnectionId, net: &mut NetworkContext<'_>);

    /// Work currently held by the entity, as seen by load balancers.
    fn total_load(&self) -> Option<usize> {
        None
    }

    fn snapshot(&self) -> TelemetryRecord;
    fn encode_config(&self) -> serde_json::Value;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
