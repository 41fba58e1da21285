use std::any::Any;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::compression::{decompress_and_measure, CompressionModel};
use crate::engine::NetworkContext;
use crate::message::{Message, ACK_CONTENT, RESPONSE_CONTENT};
use crate::telemetry::{MessageEvent, MessageState, Processor, ServerSnapshot, TelemetryRecord};
use crate::traits::{ConnectionId, EntityCore, EntityKind, NetworkEntity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub processing_time_ms: u64,
    pub max_concurrent_packets: usize,
    pub compression_model: CompressionModel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            processing_time_ms: 50,
            max_concurrent_packets: 4,
            compression_model: CompressionModel::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingState {
    Idle,
    DecompressingData,
    ProcessingData,
    FinishedProcessing,
}

impl From<ProcessingState> for MessageState {
    fn from(state: ProcessingState) -> Self {
        match state {
            ProcessingState::Idle => MessageState::Received,
            ProcessingState::DecompressingData => MessageState::Decompressing,
            ProcessingState::ProcessingData => MessageState::Processing,
            ProcessingState::FinishedProcessing => MessageState::Processed,
        }
    }
}

/// Work in progress for one originating client.
#[derive(Debug, Clone)]
struct ProcessingContext {
    client_ip: String,
    connection: ConnectionId,
    state: ProcessingState,
    messages: Vec<Message>,
    time_in_state: Duration,
    total_elapsed: Duration,
    time_to_decompress: Duration,
    time_to_process: Duration,
}

impl ProcessingContext {
    fn new(client_ip: String, connection: ConnectionId, time_to_process: Duration) -> Self {
        Self {
            client_ip,
            connection,
            state: ProcessingState::Idle,
            messages: Vec::new(),
            time_in_state: Duration::ZERO,
            total_elapsed: Duration::ZERO,
            time_to_decompress: Duration::ZERO,
            time_to_process,
        }
    }

    fn change_state(&mut self, state: ProcessingState) {
        if self.state != state {
            self.state = state;
            self.time_in_state = Duration::ZERO;
        }
    }

    /// Collects a chunk. The final chunk of an idle context starts the work;
    /// one arriving while work is under way joins it.
    fn add_message(&mut self, message: Message, model: &CompressionModel) {
        let is_final = message.is_final();
        let compressed = message.is_compressed();
        self.messages.push(message);
        if !is_final || self.state != ProcessingState::Idle {
            return;
        }
        if !compressed {
            self.change_state(ProcessingState::ProcessingData);
            return;
        }
        let payload: Vec<u8> = self
            .messages
            .iter()
            .flat_map(|m| m.content().iter().copied())
            .collect();
        match decompress_and_measure(&payload, model) {
            Ok((_, cost)) => {
                self.time_to_decompress = cost;
                self.change_state(ProcessingState::DecompressingData);
            }
            Err(err) => {
                log::warn!("payload from {} failed to decompress: {err}", self.client_ip);
                self.change_state(ProcessingState::ProcessingData);
            }
        }
    }

    fn tick(&mut self, elapsed: Duration) {
        self.time_in_state = self.time_in_state.saturating_add(elapsed);
        self.total_elapsed = self.total_elapsed.saturating_add(elapsed);
        match self.state {
            ProcessingState::DecompressingData if self.time_in_state >= self.time_to_decompress => {
                self.change_state(ProcessingState::ProcessingData);
            }
            ProcessingState::ProcessingData if self.time_in_state >= self.time_to_process => {
                self.change_state(ProcessingState::FinishedProcessing);
            }
            _ => {}
        }
    }
}

pub struct Server {
    core: EntityCore,
    config: ServerConfig,
    contexts: Vec<ProcessingContext>,
}

impl Server {
    pub fn new(ip: &str, name: &str, config: ServerConfig) -> Self {
        Self::from_parts(EntityCore::new(ip, name), config, 0)
    }

    pub(crate) fn from_parts(core: EntityCore, config: ServerConfig, _seed: u64) -> Self {
        Self {
            core,
            config,
            contexts: Vec::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn set_processing_time(&mut self, time: Duration) {
        self.config.processing_time_ms = time.as_millis().try_into().unwrap_or(u64::MAX);
    }

    pub fn set_max_concurrent_packets(&mut self, max: usize) {
        self.config.max_concurrent_packets = max;
    }

    /// Contexts being worked on, capped by the concurrency limit.
    pub fn processing_load(&self) -> usize {
        let busy = self
            .contexts
            .iter()
            .filter(|c| c.state != ProcessingState::Idle)
            .count();
        busy.min(self.config.max_concurrent_packets)
    }

    /// Contexts still assembling chunks or waiting for a processing slot.
    pub fn queued_count(&self) -> usize {
        self.contexts.len() - self.processing_load()
    }

    pub fn context_state(&self, client_ip: &str) -> Option<ProcessingState> {
        self.contexts
            .iter()
            .find(|c| c.client_ip == client_ip)
            .map(|c| c.state)
    }

    fn respond(&self, context: &ProcessingContext, net: &mut NetworkContext<'_>) {
        let Some(peer_ip) = net
            .connection(context.connection)
            .and_then(|c| c.opposite_of(&self.core.ip))
            .map(|e| e.ip.clone())
        else {
            log::warn!("{}: no route back to {}", self.core.name, context.client_ip);
            return;
        };
        let response = Message::new(
            net.allocate_message_id(),
            self.core.ip.as_str(),
            peer_ip,
            context.client_ip.as_str(),
            Bytes::from_static(RESPONSE_CONTENT),
            net.now(),
        )
        .finalized(true);
        if !net.transfer(context.connection, response) {
            log::debug!("{}: response to {} dropped", self.core.name, context.client_ip);
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new("10.0.0.2", "Server", ServerConfig::default())
    }
}

impl NetworkEntity for Server {
    fn core(&self) -> &EntityCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }
    fn kind(&self) -> EntityKind {
        EntityKind::Server
    }

    fn receive(&mut self, connection: ConnectionId, message: Message, net: &mut NetworkContext<'_>) {
        let sender = message.original_sender_ip().to_string();
        let idx = match self.contexts.iter().position(|c| c.client_ip == sender) {
            Some(idx) => idx,
            None => {
                let time_to_process = Duration::from_millis(self.config.processing_time_ms);
                self.contexts
                    .push(ProcessingContext::new(sender.clone(), connection, time_to_process));
                self.contexts.len() - 1
            }
        };

        if !message.is_final() && message.ack_requested() {
            let ack = Message::new(
                net.allocate_message_id(),
                self.core.ip.as_str(),
                message.from_ip(),
                sender.as_str(),
                Bytes::from_static(ACK_CONTENT),
                net.now(),
            );
            net.transfer(connection, ack);
        }

        let context = &mut self.contexts[idx];
        context.add_message(message, &self.config.compression_model);
        if let Some(last) = context.messages.last() {
            net.emit(TelemetryRecord::Message(MessageEvent::observe(
                last,
                context.state.into(),
                Processor::Server,
                net.now(),
            )));
        }
    }

    fn tick(&mut self, elapsed: Duration, net: &mut NetworkContext<'_>) {
        let mut advanced = 0;
        for context in &mut self.contexts {
            if advanced >= self.config.max_concurrent_packets {
                break;
            }
            if context.state != ProcessingState::Idle {
                context.tick(elapsed);
                advanced += 1;
            }
        }

        for context in &self.contexts {
            for message in &context.messages {
                net.emit(TelemetryRecord::Message(MessageEvent::observe(
                    message,
                    context.state.into(),
                    Processor::Server,
                    net.now(),
                )));
            }
        }

        let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.contexts)
            .into_iter()
            .partition(|c| c.state == ProcessingState::FinishedProcessing);
        self.contexts = pending;
        for context in &finished {
            self.respond(context, net);
        }
    }

    fn on_connection_disconnected(&mut self, connection: ConnectionId, net: &mut NetworkContext<'_>) {
        let link = net.connection(connection);
        let before = self.contexts.len();
        self.contexts.retain(|c| {
            let routed_here = c.connection == connection;
            let client_on_link = link.is_some_and(|l| l.component_with_ip(&c.client_ip).is_some());
            !(routed_here || client_on_link)
        });
        let dropped = before - self.contexts.len();
        if dropped > 0 {
            log::info!("{}: dropped {} contexts after disconnect", self.core.name, dropped);
        }
    }

    fn total_load(&self) -> Option<usize> {
        Some(self.contexts.len())
    }

    fn snapshot(&self) -> TelemetryRecord {
        TelemetryRecord::Server(ServerSnapshot {
            ip: self.core.ip.clone(),
            processing_load: self.processing_load(),
            queued_count: self.queued_count(),
            total_load: self.contexts.len(),
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
