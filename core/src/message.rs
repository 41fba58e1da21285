use std::time::Duration;

use bytes::Bytes;

pub type MessageId = u64;

/// Largest chunk a single message may carry.
pub const MAX_PACKET_SIZE: usize = 65_535;

pub const ACK_CONTENT: &[u8] = b"ACK";
pub const RESPONSE_CONTENT: &[u8] = b"Finished processing";
pub const NO_SERVERS_CONTENT: &[u8] = b"No servers available to handle the request.";

/// A unit of payload in flight. Immutable once handed to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    from_ip: String,
    to_ip: String,
    original_sender_ip: String,
    content: Bytes,
    is_compressed: bool,
    is_final: bool,
    ack_requested: bool,
    created_at: Duration,
}

impl Message {
    pub fn new(
        id: MessageId,
        from_ip: impl Into<String>,
        to_ip: impl Into<String>,
        original_sender_ip: impl Into<String>,
        content: impl Into<Bytes>,
        created_at: Duration,
    ) -> Self {
        Self {
            id,
            from_ip: from_ip.into(),
            to_ip: to_ip.into(),
            original_sender_ip: original_sender_ip.into(),
            content: content.into(),
            is_compressed: false,
            is_final: false,
            ack_requested: false,
            created_at,
        }
    }

    pub fn compressed(mut self, yes: bool) -> Self {
        self.is_compressed = yes;
        self
    }

    pub fn finalized(mut self, yes: bool) -> Self {
        self.is_final = yes;
        self
    }

    pub fn requesting_ack(mut self, yes: bool) -> Self {
        self.ack_requested = yes;
        self
    }

    /// Same message re-addressed for the next hop. The original sender survives.
    pub fn with_addresses(&self, from_ip: &str, to_ip: &str) -> Self {
        Self {
            from_ip: from_ip.to_string(),
            to_ip: to_ip.to_string(),
            ..self.clone()
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }
    pub fn from_ip(&self) -> &str {
        &self.from_ip
    }
    pub fn to_ip(&self) -> &str {
        &self.to_ip
    }
    pub fn original_sender_ip(&self) -> &str {
        &self.original_sender_ip
    }
    pub fn content(&self) -> &Bytes {
        &self.content
    }
    pub fn size(&self) -> usize {
        self.content.len()
    }
    pub fn is_compressed(&self) -> bool {
        self.is_compressed
    }
    pub fn is_final(&self) -> bool {
        self.is_final
    }
    pub fn ack_requested(&self) -> bool {
        self.ack_requested
    }
    pub fn created_at(&self) -> Duration {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Bytes,
    pub is_final: bool,
}

/// Splits a payload into ordered chunks of at most [`MAX_PACKET_SIZE`] bytes.
///
/// Only the last chunk is final. An empty payload still yields one (empty,
/// final) chunk so that the request reaches the receiver.
pub fn chunk_payload(payload: Bytes) -> Vec<Chunk> {
    if payload.is_empty() {
        return vec![Chunk {
            bytes: payload,
            is_final: true,
        }];
    }
    let count = payload.len().div_ceil(MAX_PACKET_SIZE);
    (0..count)
        .map(|i| {
            let start = i * MAX_PACKET_SIZE;
            let end = (start + MAX_PACKET_SIZE).min(payload.len());
            Chunk {
                bytes: payload.slice(start..end),
                is_final: i + 1 == count,
            }
        })
        .collect()
}
