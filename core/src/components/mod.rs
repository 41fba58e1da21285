use serde_json::Value;

use crate::error::{Result, SimError};
use crate::traits::{EntityCore, EntityKind, NetworkEntity};

pub mod client;
pub mod load_balancer;
pub mod server;

macro_rules! register_entities {
    ($($kind:path => $type:ty, $config:ty, $blurb:expr);* $(;)?) => {
        /// Builds an entity of `kind` from JSON parameters. `null` means defaults.
        pub fn create_entity(
            kind: EntityKind,
            core: EntityCore,
            params: Value,
            seed: u64,
        ) -> Result<Box<dyn NetworkEntity>> {
            match kind {
                $(
                    $kind => {
                        let config: $config = if params.is_null() {
                            Default::default()
                        } else {
                            serde_json::from_value(params)
                                .map_err(|source| SimError::InvalidConfig { kind, source })?
                        };
                        Ok(Box::new(<$type>::from_parts(core, config, seed)))
                    }
                )*
            }
        }

        /// Every entity kind that can be built, with a one-line description.
        pub fn entity_catalog() -> Vec<(EntityKind, &'static str)> {
            vec![$(($kind, $blurb)),*]
        }
    };
}

register_entities!(
    EntityKind::Client => client::Client, client::ClientConfig,
        "Sends pings, chunked payloads or files and waits for replies";
    EntityKind::Server => server::Server, server::ServerConfig,
        "Reassembles chunks, decompresses and processes them";
    EntityKind::LoadBalancer => load_balancer::LoadBalancer, load_balancer::LoadBalancerConfig,
        "Spreads client traffic over the servers attached to it";
);
