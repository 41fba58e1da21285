use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::compression::{compress_and_measure, CompressionModel};
use crate::engine::NetworkContext;
use crate::message::{chunk_payload, Message};
use crate::telemetry::{ClientSnapshot, MessageEvent, MessageState, Processor, RoundTripEvent, TelemetryRecord};
use crate::traits::{ConnectionId, EntityCore, EntityKind, NetworkEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClientMode {
    /// Fire and forget: never waits for an answer.
    #[default]
    Ping,
    /// Waits for any reply before producing the next payload.
    Http,
    /// Sends a finite byte source unit by unit, waiting on each.
    FileTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientState {
    Finished,
    ProcessingData,
    ProcessedData,
    CompressingData,
    SendingData,
    WaitingForResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    NotStarted,
    Ready,
    Transferring,
    Completed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotStarted => "Not started",
            Self::Ready => "Ready",
            Self::Transferring => "Transferring",
            Self::Completed => "Completed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub mode: ClientMode,
    pub sending_period_ms: u64, // Time spent in ProcessingData before each send
    pub data_size_bytes: usize,
    pub compression: bool,
    pub compression_model: CompressionModel,
    pub reconnect_delay_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: ClientMode::Ping,
            sending_period_ms: 100,
            data_size_bytes: 1024,
            compression: false,
            compression_model: CompressionModel::default(),
            reconnect_delay_ms: None,
        }
    }
}

/// Timers and current state. The in-state timer restarts only when the state
/// actually changes.
#[derive(Debug, Clone)]
pub struct ClientContext {
    state: ClientState,
    time_in_state: Duration,
    total_elapsed: Duration,
    time_to_process: Duration,
    time_to_compress: Duration,
    backoff: Duration,
}

impl ClientContext {
    fn new(time_to_process: Duration) -> Self {
        Self {
            state: ClientState::ProcessingData,
            time_in_state: Duration::ZERO,
            total_elapsed: Duration::ZERO,
            time_to_process,
            time_to_compress: Duration::ZERO,
            backoff: Duration::ZERO,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }
    pub fn time_in_state(&self) -> Duration {
        self.time_in_state
    }
    pub fn total_elapsed(&self) -> Duration {
        self.total_elapsed
    }

    fn change_state(&mut self, state: ClientState) {
        if self.state != state {
            self.state = state;
            self.time_in_state = Duration::ZERO;
        }
    }

    fn tick(&mut self, elapsed: Duration) {
        self.time_in_state = self.time_in_state.saturating_add(elapsed);
        self.total_elapsed = self.total_elapsed.saturating_add(elapsed);
        match self.state {
            ClientState::CompressingData if self.time_in_state >= self.time_to_compress => {
                self.change_state(ClientState::SendingData);
            }
            ClientState::ProcessingData if self.time_in_state >= self.time_to_process.saturating_add(self.backoff) => {
                self.backoff = Duration::ZERO;
                self.change_state(ClientState::ProcessedData);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
struct FileSource {
    data: Bytes,
    position: usize,
}

impl FileSource {
    fn exhausted(&self) -> bool {
        self.position >= self.data.len()
    }

    fn progress(&self) -> f64 {
        if self.data.is_empty() {
            return 100.0;
        }
        self.position as f64 / self.data.len() as f64 * 100.0
    }
}

pub struct Client {
    core: EntityCore,
    config: ClientConfig,
    context: ClientContext,
    outbound: BTreeMap<ConnectionId, VecDeque<Message>>,
    file: Option<FileSource>,
    status: TransferStatus,
    request_started: Option<Duration>,
    rng: StdRng,
}

impl Client {
    pub fn new(ip: &str, name: &str, config: ClientConfig) -> Self {
        let seed = crate::stable_hash(ip);
        Self::from_parts(EntityCore::new(ip, name), config, seed)
    }

    pub(crate) fn from_parts(core: EntityCore, config: ClientConfig, seed: u64) -> Self {
        let context = ClientContext::new(Duration::from_millis(config.sending_period_ms));
        Self {
            core,
            config,
            context,
            outbound: BTreeMap::new(),
            file: None,
            status: TransferStatus::NotStarted,
            request_started: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    pub fn state(&self) -> ClientState {
        self.context.state
    }

    pub fn mode(&self) -> ClientMode {
        self.config.mode
    }

    /// Switching to ping releases a client stuck waiting for an answer.
    pub fn set_mode(&mut self, mode: ClientMode) {
        self.config.mode = mode;
        if mode == ClientMode::Ping && self.context.state == ClientState::WaitingForResponse {
            self.request_started = None;
            self.context.change_state(ClientState::ProcessingData);
        }
    }

    pub fn set_sending_period(&mut self, period: Duration) {
        self.config.sending_period_ms = period.as_millis().try_into().unwrap_or(u64::MAX);
        self.context.time_to_process = period;
    }

    pub fn set_compression(&mut self, enabled: bool) {
        self.config.compression = enabled;
    }

    /// Replaces the file-transfer source and starts over from its first byte.
    pub fn load_file(&mut self, data: impl Into<Bytes>) {
        self.file = Some(FileSource {
            data: data.into(),
            position: 0,
        });
        self.status = TransferStatus::Ready;
        self.outbound.clear();
        self.request_started = None;
        self.context.change_state(ClientState::ProcessingData);
    }

    pub fn transfer_progress(&self) -> f64 {
        self.file.as_ref().map_or(0.0, FileSource::progress)
    }

    pub fn transfer_status(&self) -> TransferStatus {
        self.status
    }

    /// Status line shown next to the progress bar.
    pub fn transfer_status_text(&self) -> String {
        match self.status {
            TransferStatus::Transferring => format!("{}: {:.1}%", self.status, self.transfer_progress()),
            status => status.to_string(),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.outbound.values().map(VecDeque::len).sum()
    }

    fn transmit(&mut self, net: &mut NetworkContext<'_>) {
        let links: Vec<(ConnectionId, String)> = self
            .core
            .connections
            .iter()
            .filter_map(|&cid| {
                let connection = net.connection(cid).filter(|c| c.is_active())?;
                let peer = connection.opposite_of(&self.core.ip)?;
                Some((cid, peer.ip.clone()))
            })
            .collect();
        if links.is_empty() {
            return;
        }

        let mut compress_time = None;
        for (cid, peer_ip) in &links {
            if self.outbound.get(cid).map_or(true, VecDeque::is_empty) {
                if let Some(cost) = self.refill(*cid, peer_ip, net) {
                    compress_time = Some(compress_time.unwrap_or(Duration::ZERO).saturating_add(cost));
                }
            }
        }
        if let Some(cost) = compress_time {
            self.context.time_to_compress = cost;
            self.context.change_state(ClientState::CompressingData);
            return;
        }

        let mut sent = false;
        for (cid, _) in &links {
            let Some(message) = self.outbound.get_mut(cid).and_then(VecDeque::pop_front) else {
                continue;
            };
            let event = MessageEvent::observe(&message, MessageState::InTransit, Processor::Client, net.now());
            if !net.transfer(*cid, message) {
                continue;
            }
            if self.config.mode != ClientMode::Ping && self.request_started.is_none() {
                self.request_started = Some(net.now());
            }
            net.emit(TelemetryRecord::Message(event));
            sent = true;
        }

        if sent {
            match self.config.mode {
                ClientMode::Ping => self.context.change_state(ClientState::ProcessingData),
                ClientMode::Http | ClientMode::FileTransfer => {
                    self.context.change_state(ClientState::WaitingForResponse)
                }
            }
        } else if self.config.mode == ClientMode::FileTransfer
            && self.file.as_ref().is_some_and(FileSource::exhausted)
            && self.queue_depth() == 0
        {
            self.status = TransferStatus::Completed;
            self.context.change_state(ClientState::Finished);
            log::info!("{}: file transfer completed", self.core.name);
        }
    }

    /// Produces the next unit of content for a link. Returns the compression
    /// time when the unit was compressed.
    fn refill(&mut self, cid: ConnectionId, peer_ip: &str, net: &mut NetworkContext<'_>) -> Option<Duration> {
        let content = match self.config.mode {
            ClientMode::FileTransfer => self.next_file_unit()?,
            ClientMode::Ping | ClientMode::Http => random_sentence(&mut self.rng, self.config.data_size_bytes),
        };
        self.queue_content(cid, peer_ip, content, net)
    }

    fn next_file_unit(&mut self) -> Option<Bytes> {
        let file = self.file.as_mut()?;
        if file.exhausted() {
            return None;
        }
        let len = self.config.data_size_bytes.max(1).min(file.data.len() - file.position);
        let unit = file.data.slice(file.position..file.position + len);
        file.position += len;
        self.status = TransferStatus::Transferring;
        Some(unit)
    }

    fn queue_content(
        &mut self,
        cid: ConnectionId,
        peer_ip: &str,
        content: Bytes,
        net: &mut NetworkContext<'_>,
    ) -> Option<Duration> {
        let mut compress_time = None;
        let mut payload = content;
        if self.config.compression {
            match compress_and_measure(&payload, &self.config.compression_model) {
                Ok((packed, cost)) => {
                    payload = Bytes::from(packed);
                    compress_time = Some(cost);
                }
                Err(err) => log::warn!("{}: compression failed, sending raw: {err}", self.core.name),
            }
        }

        let compressed = compress_time.is_some();
        let wants_ack = self.config.mode != ClientMode::Ping;
        let queue = self.outbound.entry(cid).or_default();
        for chunk in chunk_payload(payload) {
            let message = Message::new(
                net.allocate_message_id(),
                self.core.ip.as_str(),
                peer_ip,
                self.core.ip.as_str(),
                chunk.bytes,
                net.now(),
            )
            .compressed(compressed)
            .finalized(chunk.is_final)
            .requesting_ack(wants_ack);
            let state = if compressed { MessageState::Compressing } else { MessageState::Created };
            net.emit(TelemetryRecord::Message(MessageEvent::observe(
                &message,
                state,
                Processor::Client,
                net.now(),
            )));
            queue.push_back(message);
        }
        compress_time
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new("10.0.0.1", "Client", ClientConfig::default())
    }
}

impl NetworkEntity for Client {
    fn core(&self) -> &EntityCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }
    fn kind(&self) -> EntityKind {
        EntityKind::Client
    }

    fn tick(&mut self, elapsed: Duration, net: &mut NetworkContext<'_>) {
        self.context.tick(elapsed);
        if matches!(self.context.state, ClientState::ProcessedData | ClientState::SendingData) {
            self.transmit(net);
        }
    }

    fn receive(&mut self, _connection: ConnectionId, message: Message, net: &mut NetworkContext<'_>) {
        net.emit(TelemetryRecord::Message(MessageEvent::observe(
            &message,
            MessageState::Received,
            Processor::Client,
            net.now(),
        )));
        if self.context.state != ClientState::WaitingForResponse {
            return;
        }
        if self.queue_depth() > 0 {
            self.context.change_state(ClientState::SendingData);
            return;
        }
        if message.is_final() {
            if let Some(started) = self.request_started.take() {
                net.emit(TelemetryRecord::RoundTrip(RoundTripEvent {
                    client_ip: self.core.ip.clone(),
                    latency: net.now().saturating_sub(started),
                }));
            }
        }
        self.context.change_state(ClientState::ProcessingData);
    }

    fn on_connection_disconnected(&mut self, connection: ConnectionId, _net: &mut NetworkContext<'_>) {
        if let Some(lost) = self.outbound.remove(&connection) {
            if !lost.is_empty() {
                log::debug!("{}: discarding {} queued chunks", self.core.name, lost.len());
            }
        }
        if self.context.state == ClientState::WaitingForResponse {
            self.request_started = None;
            if let Some(delay) = self.config.reconnect_delay_ms {
                self.context.backoff = Duration::from_millis(delay);
            }
            self.context.change_state(ClientState::ProcessingData);
        }
    }

    fn snapshot(&self) -> TelemetryRecord {
        TelemetryRecord::Client(ClientSnapshot {
            ip: self.core.ip.clone(),
            state: self.context.state,
            time_in_state: self.context.time_in_state,
            total_elapsed: self.context.total_elapsed,
            queue_depth: self.queue_depth(),
            transfer_progress: self.transfer_progress(),
            transfer_status: self.transfer_status_text(),
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

/// Random words of capitals and digits, exactly `len` bytes long.
fn random_sentence(rng: &mut StdRng, len: usize) -> Bytes {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let word = rng.gen_range(2..10).min(len - out.len());
        out.extend((0..word).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]));
        if out.len() < len {
            out.push(b' ');
        }
    }
    Bytes::from(out)
}
