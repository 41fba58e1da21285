use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::engine::NetworkContext;
use crate::error::SimError;
use crate::message::{Message, NO_SERVERS_CONTENT};
use crate::telemetry::{LoadBalancerSnapshot, TelemetryRecord};
use crate::traits::{ConnectionId, EntityCore, EntityId, EntityKind, NetworkEntity, SystemInspector};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LoadBalancerAlgorithm {
    RoundRobin,
    LeastConnections,
    #[serde(rename = "IPHashing", alias = "IpHashing")]
    IpHashing,
}

impl fmt::Display for LoadBalancerAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RoundRobin => "RoundRobin",
            Self::LeastConnections => "LeastConnections",
            Self::IpHashing => "IPHashing",
        };
        f.write_str(name)
    }
}

impl FromStr for LoadBalancerAlgorithm {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "roundrobin" | "rr" => Ok(Self::RoundRobin),
            "leastconnections" | "leastconn" => Ok(Self::LeastConnections),
            "iphashing" | "iphash" => Ok(Self::IpHashing),
            _ => Err(SimError::UnknownAlgorithm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub algorithm: LoadBalancerAlgorithm,
    /// Keep a client pinned to its server after the final response.
    pub sticky_sessions: bool,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: LoadBalancerAlgorithm::RoundRobin,
            sticky_sessions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Backend {
    id: EntityId,
    ip: String,
    connection: ConnectionId,
}

/// Index of the next server in cyclic order; `cursor` moves past it.
pub fn round_robin(cursor: &mut usize, count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let idx = *cursor % count;
    *cursor = (idx + 1) % count;
    Some(idx)
}

/// Index of the smallest load; the earliest one wins a tie.
pub fn least_loaded(loads: &[usize]) -> Option<usize> {
    loads
        .iter()
        .enumerate()
        .min_by_key(|(_, &load)| load)
        .map(|(idx, _)| idx)
}

/// Server index derived only from the sender address and the server count.
pub fn ip_hash_index(ip: &str, count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    Some((crate::stable_hash(ip) % count as u64) as usize)
}

pub struct LoadBalancer {
    core: EntityCore,
    config: LoadBalancerConfig,
    servers: Vec<Backend>,
    next_rr_idx: usize,
    affinity: HashMap<String, String>,
}

impl LoadBalancer {
    pub fn new(ip: &str, name: &str, config: LoadBalancerConfig) -> Self {
        Self::from_parts(EntityCore::new(ip, name), config, 0)
    }

    pub(crate) fn from_parts(core: EntityCore, config: LoadBalancerConfig, _seed: u64) -> Self {
        Self {
            core,
            config,
            servers: Vec::new(),
            next_rr_idx: 0,
            affinity: HashMap::new(),
        }
    }

    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    pub fn algorithm(&self) -> LoadBalancerAlgorithm {
        self.config.algorithm
    }

    pub fn set_algorithm(&mut self, algorithm: LoadBalancerAlgorithm) {
        self.config.algorithm = algorithm;
        self.next_rr_idx = 0;
    }

    pub fn servers(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.ip.as_str()).collect()
    }

    pub fn affinity_for(&self, client_ip: &str) -> Option<&str> {
        self.affinity.get(client_ip).map(String::as_str)
    }

    pub fn affinity_len(&self) -> usize {
        self.affinity.len()
    }

    fn select_server(&mut self, sender_ip: &str, inspector: &dyn SystemInspector) -> Option<usize> {
        match self.config.algorithm {
            LoadBalancerAlgorithm::RoundRobin => round_robin(&mut self.next_rr_idx, self.servers.len()),
            LoadBalancerAlgorithm::LeastConnections => {
                let loads: Vec<usize> = self
                    .servers
                    .iter()
                    .map(|s| inspector.total_load(s.id).unwrap_or(0))
                    .collect();
                least_loaded(&loads)
            }
            LoadBalancerAlgorithm::IpHashing => ip_hash_index(sender_ip, self.servers.len()),
        }
    }

    /// The server this client is pinned to, if the pin still holds.
    fn pinned_server(&mut self, client_ip: &str, net: &NetworkContext<'_>) -> Option<usize> {
        let server_ip = self.affinity.get(client_ip)?;
        let valid = self
            .servers
            .iter()
            .position(|s| &s.ip == server_ip && net.is_active(s.connection));
        if valid.is_none() {
            self.affinity.remove(client_ip);
        }
        valid
    }

    fn register_server(&mut self, id: EntityId, ip: &str, connection: ConnectionId) {
        if let Some(existing) = self.servers.iter_mut().find(|s| s.id == id) {
            existing.connection = connection;
            return;
        }
        self.servers.push(Backend {
            id,
            ip: ip.to_string(),
            connection,
        });
        log::info!(
            "{}: registered server {}, {} total",
            self.core.name,
            ip,
            self.servers.len()
        );
    }

    fn forward_to_server(&mut self, connection: ConnectionId, message: Message, net: &mut NetworkContext<'_>) {
        if self.servers.is_empty() {
            log::info!("{}: no servers available for {}", self.core.name, message.from_ip());
            let reply = Message::new(
                net.allocate_message_id(),
                self.core.ip.as_str(),
                message.from_ip(),
                message.original_sender_ip(),
                Bytes::from_static(NO_SERVERS_CONTENT),
                net.now(),
            )
            .finalized(true);
            net.transfer(connection, reply);
            return;
        }

        let client_ip = message.from_ip().to_string();
        let idx = match self.pinned_server(&client_ip, net) {
            Some(idx) => idx,
            None => {
                let Some(idx) = self.select_server(&client_ip, net.inspector()) else {
                    return;
                };
                self.affinity.insert(client_ip, self.servers[idx].ip.clone());
                idx
            }
        };

        let backend = &self.servers[idx];
        let forwarded = message.with_addresses(&self.core.ip, &backend.ip);
        if !net.transfer(backend.connection, forwarded) {
            log::warn!("{}: could not forward {} to {}", self.core.name, message.id(), backend.ip);
        }
    }

    fn forward_to_client(&mut self, message: Message, net: &mut NetworkContext<'_>) {
        let client_ip = message.original_sender_ip();
        let route = self.core.connections.iter().copied().find(|&cid| {
            net.connection(cid)
                .is_some_and(|c| c.is_active() && c.component_with_ip(client_ip).is_some())
        });
        let Some(route) = route else {
            log::warn!("{}: no connection to client {}, dropping {}", self.core.name, client_ip, message.id());
            return;
        };
        if message.is_final() && !self.config.sticky_sessions {
            self.affinity.remove(client_ip);
        }
        net.transfer(route, message.with_addresses(&self.core.ip, client_ip));
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new("10.0.0.3", "Load Balancer", LoadBalancerConfig::default())
    }
}

impl NetworkEntity for LoadBalancer {
    fn core(&self) -> &EntityCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }
    fn kind(&self) -> EntityKind {
        EntityKind::LoadBalancer
    }

    fn tick(&mut self, _elapsed: Duration, _net: &mut NetworkContext<'_>) {}

    fn receive(&mut self, connection: ConnectionId, message: Message, net: &mut NetworkContext<'_>) {
        // A sender address that differs from the origin marks a reply coming back.
        if message.from_ip() != message.original_sender_ip() {
            self.forward_to_client(message, net);
        } else if message.to_ip() == self.core.ip {
            self.forward_to_server(connection, message, net);
        } else {
            log::warn!(
                "{}: unexpected message from {} to {}",
                self.core.name,
                message.from_ip(),
                message.to_ip()
            );
        }
    }

    fn on_new_connection(&mut self, connection: ConnectionId, net: &mut NetworkContext<'_>) {
        let Some(peer) = net.connection(connection).and_then(|c| c.opposite_of(&self.core.ip)) else {
            return;
        };
        if net.inspector().kind_of(peer.id) == Some(EntityKind::Server) {
            let (id, ip) = (peer.id, peer.ip.clone());
            self.register_server(id, &ip, connection);
        }
    }

    fn on_connection_disconnected(&mut self, connection: ConnectionId, net: &mut NetworkContext<'_>) {
        let peer_ip = net
            .connection(connection)
            .and_then(|c| c.opposite_of(&self.core.ip))
            .map(|p| p.ip.clone());

        let (lost, kept): (Vec<Backend>, Vec<Backend>) = std::mem::take(&mut self.servers)
            .into_iter()
            .partition(|s| s.connection == connection);
        self.servers = kept;
        for server in &lost {
            self.affinity.retain(|_, target| target != &server.ip);
            log::info!("{}: deregistered server {}", self.core.name, server.ip);
        }
        if let Some(peer_ip) = peer_ip {
            self.affinity.remove(&peer_ip);
        }
        if self.next_rr_idx >= self.servers.len() {
            self.next_rr_idx = 0;
        }
    }

    fn snapshot(&self) -> TelemetryRecord {
        TelemetryRecord::LoadBalancer(LoadBalancerSnapshot {
            ip: self.core.ip.clone(),
            algorithm: self.config.algorithm,
            servers: self.servers.iter().map(|s| s.ip.clone()).collect(),
            affinity_entries: self.affinity.len(),
        })
    }

    fn encode_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
