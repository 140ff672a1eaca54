//! Evidence captured by spec handlers

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::codec::{frame_summary, parse, EthernetFrame};
use crate::models::PortId;
use crate::timing::Timestamp;

/// One frame seen on the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub port: PortId,
    pub timestamp: Timestamp,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
    pub summary: String,
}

impl FrameRecord {
    pub fn new(port: PortId, timestamp: Timestamp, bytes: Vec<u8>) -> Self {
        let summary = frame_summary(&bytes);
        Self {
            port,
            timestamp,
            bytes,
            summary,
        }
    }

    pub fn decode(&self) -> Option<EthernetFrame> {
        parse(&self.bytes).ok()
    }
}

/// What a handler sent and what came back
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub sent: Vec<FrameRecord>,
    pub received: BTreeMap<PortId, Vec<FrameRecord>>,
    pub latency: Option<Duration>,
    pub notes: Vec<String>,
}

impl Evidence {
    pub fn record_sent(&mut self, record: FrameRecord) {
        self.sent.push(record);
    }

    pub fn record_received(&mut self, record: FrameRecord) {
        self.received.entry(record.port).or_default().push(record);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Ports on which at least one matching frame arrived
    pub fn observed_ports(&self) -> BTreeSet<PortId> {
        self.received
            .iter()
            .filter(|(_, frames)| !frames.is_empty())
            .map(|(port, _)| *port)
            .collect()
    }

    /// The probe frame, i.e. the last frame sent
    pub fn probe(&self) -> Option<&FrameRecord> {
        self.sent.last()
    }

    pub fn frames_on(&self, port: PortId) -> &[FrameRecord] {
        self.received.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_received(&self) -> usize {
        self.received.values().map(Vec::len).sum()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
