pub mod analytics;
pub mod components;
pub mod compression;
pub mod engine;
pub mod error;
pub mod message;
pub mod network;
pub mod telemetry;
pub mod traits;

pub use analytics::{MetricPoint, MetricsCollector};
pub use components::client::{Client, ClientConfig, ClientMode, ClientState, TransferStatus};
pub use components::load_balancer::{LoadBalancer, LoadBalancerAlgorithm, LoadBalancerConfig};
pub use components::server::{ProcessingState, Server, ServerConfig};
pub use components::{create_entity, entity_catalog};
pub use compression::CompressionModel;
pub use engine::{NetworkContext, Simulation};
pub use error::{Result, SimError};
pub use message::{chunk_payload, Chunk, Message, MessageId, MAX_PACKET_SIZE};
pub use network::{canonical_key, Connection, Endpoint, LinkConfig, MessageInTransit};
pub use telemetry::{MetricsSink, NullSink, TelemetryRecord};
pub use traits::{ConnectionId, EntityCore, EntityId, EntityKind, NetworkEntity, SystemInspector};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Interval of the external driver clock (one UI frame).
pub const DEFAULT_EXTERNAL_TICK: Duration = Duration::from_millis(16);
/// Sub-steps each external tick is divided into.
pub const DEFAULT_SUB_STEPS: u32 = 16;

/// Hash of a string that is identical across runs and processes.
pub fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
