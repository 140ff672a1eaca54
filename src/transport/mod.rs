//! DUT transport and management interfaces
//!
//! `DutTransport` moves frames to and from the switch ports; `DutController`
//! carries the management commands the session controller needs. Real
//! implementations (raw sockets, pcap, vendor management APIs) live outside
//! this crate; `SimulatedSwitch` implements both for offline runs.

mod sim;

pub use sim::{Faults, PortStatistics, SimulatedSwitch};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::PortId;
use crate::timing::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Up,
    Down,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Up => write!(f, "up"),
            LinkStatus::Down => write!(f, "down"),
        }
    }
}

/// Frame bytes as captured, stamped by the run's timing source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedFrame {
    pub bytes: Vec<u8>,
    pub timestamp: Timestamp,
}

/// Finite stream of frames captured during one receive window
pub type FrameStream = BoxStream<'static, CapturedFrame>;

/// Transport and management errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("DUT unreachable: {0}")]
    Unreachable(String),

    #[error("unknown port {0}")]
    UnknownPort(PortId),

    #[error("send failed on port {port}: {reason}")]
    SendFailed { port: PortId, reason: String },

    #[error("receive failed on port {port}: {reason}")]
    ReceiveFailed { port: PortId, reason: String },

    #[error("reset not acknowledged: {0}")]
    ResetRejected(String),

    #[error("{0} not supported by this DUT")]
    Unsupported(&'static str),
}

impl TransportError {
    /// Worth one retry after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_)
                | TransportError::SendFailed { .. }
                | TransportError::ReceiveFailed { .. }
        )
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, TransportError::Unreachable(_))
    }
}

/// Frame-level access to the DUT's ports
#[async_trait]
pub trait DutTransport: Send + Sync {
    async fn send(&self, port: PortId, frame: &[u8]) -> Result<(), TransportError>;

    /// Frames arriving on `port` within `timeout`. The stream ends when the window closes.
    async fn receive(&self, port: PortId, timeout: Duration) -> Result<FrameStream, TransportError>;

    async fn link_status(&self, port: PortId) -> Result<LinkStatus, TransportError>;

    async fn reset_statistics(&self, port: PortId) -> Result<(), TransportError>;
}

/// Management commands for returning the DUT to a known state
#[async_trait]
pub trait DutController: Send + Sync {
    async fn clear_mac_table(&self) -> Result<(), TransportError>;

    async fn power_cycle(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("power cycle"))
    }

    /// Current number of learned entries, when the DUT can report it
    async fn mac_table_entries(&self) -> Result<Option<usize>, TransportError> {
        Ok(None)
    }

    /// VLAN membership as configured on the DUT, when it can be queried
    async fn vlan_membership(&self, _port: PortId) -> Result<Option<BTreeSet<u16>>, TransportError> {
        Ok(None)
    }
}

/// Controller for DUTs that cannot be managed programmatically.
///
/// Clearing is a no-op; the session controller falls back to the aging wait.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullController;

#[async_trait]
impl DutController for NullController {
    async fn clear_mac_table(&self) -> Result<(), TransportError> {
        debug!("MAC table clear requested on unmanaged DUT; relying on aging");
        Ok(())
    }
}
