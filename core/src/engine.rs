use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::components::create_entity;
use crate::error::{Result, SimError};
use crate::message::MessageId;
use crate::network::{canonical_key, Connection, Endpoint, LinkConfig};
use crate::telemetry::{MetricsSink, NullSink, TelemetryRecord};
use crate::traits::{ConnectionId, EntityCore, EntityId, EntityKind, NetworkEntity, SystemInspector};

/// What an entity may touch while it ticks or handles a message: the
/// connections, a read-only view of its peers, the clock and the telemetry buffer.
pub struct NetworkContext<'a> {
    now: Duration,
    connections: &'a mut BTreeMap<ConnectionId, Connection>,
    inspector: &'a dyn SystemInspector,
    next_message_id: &'a mut MessageId,
    records: &'a mut Vec<TelemetryRecord>,
}

impl NetworkContext<'_> {
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(Connection::is_active)
    }

    /// Hands a message to a connection. `false` if it was not accepted.
    pub fn transfer(&mut self, id: ConnectionId, message: crate::message::Message) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) => connection.transfer_data(message),
            None => {
                log::warn!("transfer on unknown connection {id}");
                false
            }
        }
    }

    pub fn allocate_message_id(&mut self) -> MessageId {
        let id = *self.next_message_id;
        *self.next_message_id += 1;
        id
    }

    pub fn inspector(&self) -> &dyn SystemInspector {
        self.inspector
    }

    pub fn emit(&mut self, record: TelemetryRecord) {
        self.records.push(record);
    }
}

#[cfg(test)]
impl<'a> NetworkContext<'a> {
    pub(crate) fn detached(
        connections: &'a mut BTreeMap<ConnectionId, Connection>,
        inspector: &'a dyn SystemInspector,
        next_message_id: &'a mut MessageId,
        records: &'a mut Vec<TelemetryRecord>,
    ) -> Self {
        Self {
            now: Duration::ZERO,
            connections,
            inspector,
            next_message_id,
            records,
        }
    }
}

/// Everything except the entity currently being run.
struct Registry<'a>(&'a BTreeMap<EntityId, Box<dyn NetworkEntity>>);

impl SystemInspector for Registry<'_> {
    fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        self.0.get(&id).map(|e| e.kind())
    }

    fn total_load(&self, id: EntityId) -> Option<usize> {
        self.0.get(&id).and_then(|e| e.total_load())
    }
}

/// The network and its clock.
///
/// Time only moves through [`Simulation::advance`]. Topology edits are plain
/// method calls and are expected between advances, never during one.
pub struct Simulation {
    time: Duration,
    seed: u64,
    entities: BTreeMap<EntityId, Box<dyn NetworkEntity>>,
    connections: BTreeMap<ConnectionId, Connection>,
    links: HashMap<(EntityId, EntityId), ConnectionId>,
    next_entity_id: EntityId,
    next_connection_id: ConnectionId,
    next_message_id: MessageId,
    records: Vec<TelemetryRecord>,
    sink: Box<dyn MetricsSink>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self::new_with_seed(0)
    }

    pub fn new_with_seed(seed: u64) -> Self {
        Self {
            time: Duration::ZERO,
            seed,
            entities: BTreeMap::new(),
            connections: BTreeMap::new(),
            links: HashMap::new(),
            next_entity_id: 1,
            next_connection_id: 1,
            next_message_id: 1,
            records: Vec::new(),
            sink: Box::new(NullSink),
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn MetricsSink>) {
        self.sink = sink;
    }

    pub fn time(&self) -> Duration {
        self.time
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    // --- topology ---

    /// Builds an entity of `kind` from JSON parameters (`null` for defaults) at
    /// an automatically assigned address.
    pub fn add_entity(&mut self, kind: EntityKind, params: serde_json::Value) -> Result<EntityId> {
        let id = self.next_entity_id;
        let ip = format!("10.0.{}.{}", id / 256, id % 256);
        self.add_entity_at(kind, &ip, params)
    }

    pub fn add_entity_at(&mut self, kind: EntityKind, ip: &str, params: serde_json::Value) -> Result<EntityId> {
        let id = self.next_entity_id;
        let core = EntityCore::new(ip, format!("{kind} {id}"));
        let seed = self.seed ^ crate::stable_hash(ip);
        let entity = create_entity(kind, core, params, seed)?;
        self.insert_entity(entity)
    }

    /// Registers an already built entity. Its connection list is reset.
    pub fn insert_entity(&mut self, mut entity: Box<dyn NetworkEntity>) -> Result<EntityId> {
        if self.entity_by_ip(entity.ip()).is_some() {
            return Err(SimError::DuplicateIp(entity.ip().to_string()));
        }
        entity.core_mut().connections.clear();
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        log::debug!("added {} {} at {}", entity.kind(), id, entity.ip());
        self.entities.insert(id, entity);
        Ok(id)
    }

    /// Removes the entity together with every connection touching it.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<()> {
        let connections = self
            .entities
            .get(&id)
            .map(|e| e.connections().to_vec())
            .ok_or(SimError::UnknownEntity(id))?;
        for connection in connections {
            self.remove_connection(connection)?;
        }
        self.entities.remove(&id);
        self.flush_records();
        Ok(())
    }

    pub fn connect(&mut self, a: EntityId, b: EntityId, config: LinkConfig) -> Result<ConnectionId> {
        if a == b {
            return Err(SimError::SelfConnection(a));
        }
        let first = self.endpoint(a)?;
        let second = self.endpoint(b)?;
        let key = canonical_key(a, b);
        if self.links.contains_key(&key) {
            return Err(SimError::AlreadyConnected(a, b));
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.insert(id, Connection::new(id, first, second, config));
        self.links.insert(key, id);
        for end in [a, b] {
            if let Some(entity) = self.entities.get_mut(&end) {
                entity.core_mut().attach(id);
            }
        }

        self.dispatch(a, |entity, net| entity.on_new_connection(id, net));
        self.dispatch(b, |entity, net| entity.on_new_connection(id, net));
        self.flush_records();
        Ok(id)
    }

    /// Deactivating drops in-flight traffic and notifies both endpoints;
    /// re-activating lets them register the link again.
    pub fn set_connection_active(&mut self, id: ConnectionId, active: bool) -> Result<()> {
        let connection = self.connections.get_mut(&id).ok_or(SimError::UnknownConnection(id))?;
        if connection.is_active() == active {
            return Ok(());
        }
        let ends = [connection.first().id, connection.second().id];
        let dropped = connection.set_active(active);
        if active {
            log::info!("{} up", connection.display_name());
            for end in ends {
                self.dispatch(end, |entity, net| entity.on_new_connection(id, net));
            }
        } else {
            log::info!("{} down, {} messages lost", connection.display_name(), dropped);
            for end in ends {
                self.dispatch(end, |entity, net| entity.on_connection_disconnected(id, net));
            }
        }
        self.flush_records();
        Ok(())
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Result<()> {
        self.set_connection_active(id, false)?;
        if let Some(connection) = self.connections.remove(&id) {
            let (a, b) = (connection.first().id, connection.second().id);
            self.links.remove(&canonical_key(a, b));
            for end in [a, b] {
                if let Some(entity) = self.entities.get_mut(&end) {
                    entity.core_mut().detach(id);
                }
            }
        }
        Ok(())
    }

    pub fn set_link_config(&mut self, id: ConnectionId, config: LinkConfig) -> Result<()> {
        self.connections
            .get_mut(&id)
            .ok_or(SimError::UnknownConnection(id))?
            .set_config(config);
        Ok(())
    }

    fn endpoint(&self, id: EntityId) -> Result<Endpoint> {
        let entity = self.entities.get(&id).ok_or(SimError::UnknownEntity(id))?;
        Ok(Endpoint {
            id,
            ip: entity.ip().to_string(),
            name: entity.name().to_string(),
        })
    }

    // --- lookup ---

    pub fn entity<T: NetworkEntity>(&self, id: EntityId) -> Option<&T> {
        self.entities.get(&id).and_then(|e| e.as_any().downcast_ref::<T>())
    }

    pub fn entity_mut<T: NetworkEntity>(&mut self, id: EntityId) -> Option<&mut T> {
        self.entities.get_mut(&id).and_then(|e| e.as_any_mut().downcast_mut::<T>())
    }

    pub fn entity_dyn(&self, id: EntityId) -> Option<&dyn NetworkEntity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    pub fn entity_by_ip(&self, ip: &str) -> Option<EntityId> {
        self.entities.iter().find(|(_, e)| e.ip() == ip).map(|(&id, _)| id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &dyn NetworkEntity)> {
        self.entities.iter().map(|(&id, e)| (id, e.as_ref()))
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection_between(&self, a: EntityId, b: EntityId) -> Option<ConnectionId> {
        self.links.get(&canonical_key(a, b)).copied()
    }

    // --- scheduler ---

    /// Advances simulated time by `elapsed * speed`, split into `sub_steps`
    /// equal steps. Each step ticks every entity, then every connection.
    pub fn advance(&mut self, elapsed: Duration, sub_steps: u32, speed: f64) {
        if !speed.is_finite() || speed < 0.0 {
            log::warn!("ignoring advance with speed multiplier {speed}");
            return;
        }
        let scaled = if speed == 1.0 {
            elapsed
        } else {
            match Duration::try_from_secs_f64(elapsed.as_secs_f64() * speed) {
                Ok(scaled) => scaled,
                Err(err) => {
                    log::warn!("ignoring advance of {elapsed:?} x{speed}: {err}");
                    return;
                }
            }
        };
        let steps = sub_steps.max(1);
        let step = scaled / steps;
        for _ in 0..steps {
            self.step(step);
        }
    }

    /// One sub-step. A message sent during the entity phase can already arrive
    /// in the connection phase of the same sub-step; one sent from a delivery
    /// handler starts moving in the next sub-step, whichever link carries it.
    pub fn step(&mut self, dt: Duration) {
        self.time = self.time.saturating_add(dt);

        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        for id in ids {
            self.dispatch(id, |entity, net| entity.tick(dt, net));
        }

        let connection_ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for connection in self.connections.values_mut() {
            connection.begin_delivery_phase();
        }
        for cid in connection_ids {
            let deliveries = match self.connections.get_mut(&cid) {
                Some(connection) => connection.tick(dt),
                None => continue,
            };
            for (receiver, message) in deliveries {
                let message_id = message.id();
                if !self.dispatch(receiver, |entity, net| entity.receive(cid, message, net)) {
                    log::warn!("message {message_id} arrived for missing entity {receiver}");
                }
            }
            if let Some(connection) = self.connections.get_mut(&cid) {
                connection.promote_pending();
            }
        }
        for connection in self.connections.values_mut() {
            connection.end_delivery_phase();
        }

        self.flush_records();
        self.publish_snapshots();
    }

    /// Runs `f` against one entity while the others stay readable through the
    /// inspector. The entity is taken out of the registry for the duration.
    fn dispatch<F>(&mut self, id: EntityId, f: F) -> bool
    where
        F: FnOnce(&mut dyn NetworkEntity, &mut NetworkContext<'_>),
    {
        let Some(mut entity) = self.entities.remove(&id) else {
            return false;
        };
        {
            let inspector = Registry(&self.entities);
            let mut net = NetworkContext {
                now: self.time,
                connections: &mut self.connections,
                inspector: &inspector,
                next_message_id: &mut self.next_message_id,
                records: &mut self.records,
            };
            f(entity.as_mut(), &mut net);
        }
        self.entities.insert(id, entity);
        true
    }

    fn flush_records(&mut self) {
        for record in self.records.drain(..) {
            self.sink.record(self.time, &record);
        }
    }

    fn publish_snapshots(&mut self) {
        for entity in self.entities.values() {
            self.sink.record(self.time, &entity.snapshot());
        }
        for connection in self.connections.values() {
            self.sink
                .record(self.time, &TelemetryRecord::Connection(connection.snapshot()));
        }
    }
}
