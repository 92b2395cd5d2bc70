//! Outbound events for the host application: discovery, inbound relay data, transfer progress.

use serde::Serialize;
use uuid::Uuid;

use crate::protocol::LogicalInterface;
use crate::wire::RelayOutput;

/// Every event the relay emits toward the host. Serialized with an `event` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    DeviceDiscovered(DiscoveredDevice),
    ScanStopped,
    InboundRelay(InboundRelayMessage),
    #[serde(rename_all = "camelCase")]
    ConnectionLost { address: String },
    TransferProgress(TransferProgress),
    #[serde(rename_all = "camelCase")]
    TransferCompleted { job_id: Uuid, address: String },
    #[serde(rename_all = "camelCase")]
    TransferFailed {
        job_id: Uuid,
        address: String,
        kind: String,
        reason: String,
    },
}

impl Event {
    /// True for the events that end a transfer job.
    pub fn is_transfer_terminal(&self) -> bool {
        matches!(
            self,
            Event::TransferCompleted { .. } | Event::TransferFailed { .. }
        )
    }
}

/// Relay data received from a module, tagged with the session it arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRelayMessage {
    pub session_address: String,
    pub source_interface: LogicalInterface,
    pub data: Vec<u8>,
}

impl InboundRelayMessage {
    pub fn new(session_address: &str, output: RelayOutput) -> Self {
        Self {
            session_address: session_address.to_string(),
            source_interface: output.source_interface,
            data: output.data,
        }
    }
}

/// Snapshot of a running transfer after a dispatched chunk, or the final snapshot with `is_done`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub job_id: Uuid,
    pub address: String,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    /// 0 when the source length is unknown.
    pub declared_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
    /// Bytes per millisecond since the job started.
    pub throughput: f64,
    pub is_done: bool,
}

/// A module seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub name: Option<String>,
    /// Address to pass to `connect`.
    pub id: String,
    pub rssi: i16,
    pub advertising: Advertising,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertising {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    /// Base64 of the raw manufacturer data.
    pub manufacturer_data: Option<String>,
    pub is_connectable: bool,
}
