use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use wiresim_core::{Client, EntityId, EntityKind, LinkConfig, Simulation};

/// A topology described in JSON.
///
/// ```json
/// {
///   "seed": 7,
///   "entities": [
///     { "label": "web", "kind": "Client", "config": { "mode": "Http" } },
///     { "label": "lb", "kind": "LoadBalancer", "config": { "algorithm": "IPHashing" } },
///     { "label": "s1", "kind": "Server" }
///   ],
///   "connections": [
///     { "a": "web", "b": "lb" },
///     { "a": "lb", "b": "s1", "link": { "base_latency_ms": 2.0 } }
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub seed: Option<u64>,
    pub entities: Vec<EntitySpec>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitySpec {
    pub label: String,
    pub kind: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub config: Value,
    /// Source file for a file-transfer client, relative to the scenario file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSpec {
    pub a: String,
    pub b: String,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| format!("cannot read scenario {}: {err}", path.display()))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Adds every entity and connection to `sim`. Returns the ids by label.
    pub fn build(&self, sim: &mut Simulation, base_dir: &Path) -> Result<BTreeMap<String, EntityId>, Box<dyn Error>> {
        let mut ids = BTreeMap::new();
        for entry in &self.entities {
            let kind: EntityKind = entry.kind.parse()?;
            let id = match &entry.ip {
                Some(ip) => sim.add_entity_at(kind, ip, entry.config.clone())?,
                None => sim.add_entity(kind, entry.config.clone())?,
            };
            if ids.insert(entry.label.clone(), id).is_some() {
                return Err(format!("duplicate entity label {:?}", entry.label).into());
            }

            if let Some(file) = &entry.file {
                let path = base_dir.join(file);
                let data = std::fs::read(&path)
                    .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
                let client = sim
                    .entity_mut::<Client>(id)
                    .ok_or_else(|| format!("{:?} has a file but is not a client", entry.label))?;
                log::info!("{}: loaded {} bytes from {}", entry.label, data.len(), path.display());
                client.load_file(data);
            }
        }

        for entry in &self.connections {
            let lookup = |label: &str| {
                ids.get(label)
                    .copied()
                    .ok_or_else(|| format!("connection refers to unknown entity {label:?}"))
            };
            let (a, b) = (lookup(&entry.a)?, lookup(&entry.b)?);
            let connection = sim.connect(a, b, entry.link)?;
            if !entry.active {
                sim.set_connection_active(connection, false)?;
            }
        }
        Ok(ids)
    }
}
