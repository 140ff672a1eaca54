//! DUT session state and port leasing
//!
//! A `Session` tracks the isolation state of every DUT port for one run. The
//! engine's dispatcher checks ports out as a `PortLease` for the duration of
//! one case and checks them back in afterwards, so no two in-flight cases ever
//! share a port and the session itself needs no lock.

mod controller;
mod strategy;

pub use controller::SessionController;
pub use strategy::{for_profile, ManualClear, PowerCycle, ResetOutcome, ResetStrategy};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::models::{DutProfile, PortId};
use crate::transport::TransportError;

/// Isolation state of one port
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Clean,
    /// Post-condition passed; ready for the next case
    Verified,
    Active,
    Contaminated,
}

impl SessionState {
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Clean | Verified, Active)
                | (Active, Verified)
                | (_, Contaminated)
                | (Contaminated, Clean)
        )
    }

    /// Whether a case may start on a port in this state
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Clean | SessionState::Verified)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Clean => "clean",
            SessionState::Active => "active",
            SessionState::Verified => "verified",
            SessionState::Contaminated => "contaminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Failure of a session pre- or post-condition. Always classified as Error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContaminationError {
    #[error("statistics reset failed on port {port}: {source}")]
    StatisticsReset {
        port: PortId,
        #[source]
        source: TransportError,
    },

    #[error("MAC table clear failed: {0}")]
    MacClear(#[source] TransportError),

    #[error("MAC table query failed: {0}")]
    MacTableQuery(#[source] TransportError),

    #[error("port {0} link is down")]
    LinkDown(PortId),

    #[error("port {port} link still down after {waited_ms}ms")]
    LinkTimeout { port: PortId, waited_ms: u64 },

    #[error("link status query failed on port {port}: {source}")]
    LinkQuery {
        port: PortId,
        #[source]
        source: TransportError,
    },

    #[error("VLAN configuration mismatch on port {port}: {detail}")]
    VlanMismatch { port: PortId, detail: String },

    #[error("recovery reset failed: {0}")]
    Recovery(#[source] TransportError),

    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Isolation timing, all in milliseconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Upper bound on the post-case aging wait
    #[serde(default = "default_max_aging_wait_ms")]
    pub max_aging_wait_ms: u64,

    /// How long `finish` polls for link-up before giving up
    #[serde(default = "default_link_wait_ms")]
    pub link_wait_ms: u64,

    #[serde(default = "default_link_poll_ms")]
    pub link_poll_ms: u64,

    /// Interval between MAC-table occupancy checks during the aging wait
    #[serde(default = "default_aging_poll_ms")]
    pub aging_poll_ms: u64,

    /// Delay before a failed `begin` or transport error is retried
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_aging_wait_ms() -> u64 {
    30_000
}

fn default_link_wait_ms() -> u64 {
    5_000
}

fn default_link_poll_ms() -> u64 {
    1_000
}

fn default_aging_poll_ms() -> u64 {
    1_000
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_aging_wait_ms: default_max_aging_wait_ms(),
            link_wait_ms: default_link_wait_ms(),
            link_poll_ms: default_link_poll_ms(),
            aging_poll_ms: default_aging_poll_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl SessionPolicy {
    pub fn max_aging_wait(&self) -> Duration {
        Duration::from_millis(self.max_aging_wait_ms)
    }

    pub fn link_wait(&self) -> Duration {
        Duration::from_millis(self.link_wait_ms)
    }

    pub fn link_poll(&self) -> Duration {
        Duration::from_millis(self.link_poll_ms.max(1))
    }

    pub fn aging_poll(&self) -> Duration {
        Duration::from_millis(self.aging_poll_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Exclusive hold on a set of ports for one case
#[derive(Debug, PartialEq, Eq)]
pub struct PortLease {
    states: BTreeMap<PortId, SessionState>,
}

impl PortLease {
    pub fn ports(&self) -> Vec<PortId> {
        self.states.keys().copied().collect()
    }

    pub fn state(&self, port: PortId) -> Option<SessionState> {
        self.states.get(&port).copied()
    }

    /// Move every leased port to `next`, or none of them
    pub fn transition(&mut self, next: SessionState) -> Result<(), ContaminationError> {
        if let Some((_, &from)) = self
            .states
            .iter()
            .find(|(_, s)| !s.can_transition_to(next))
        {
            return Err(ContaminationError::InvalidTransition { from, to: next });
        }
        for state in self.states.values_mut() {
            *state = next;
        }
        Ok(())
    }

    pub fn mark_contaminated(&mut self) {
        for state in self.states.values_mut() {
            *state = SessionState::Contaminated;
        }
    }

    pub fn contaminated(&self) -> Vec<PortId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == SessionState::Contaminated)
            .map(|(p, _)| *p)
            .collect()
    }

    pub(crate) fn restore(&mut self, ports: &[PortId]) {
        for port in ports {
            if let Some(state) = self.states.get_mut(port) {
                *state = SessionState::Clean;
            }
        }
    }

    /// Least favourable state across the lease
    pub fn overall(&self) -> SessionState {
        self.states.values().copied().max().unwrap_or_default()
    }
}

/// Per-run port state table
#[derive(Debug)]
pub struct Session {
    dut: String,
    states: BTreeMap<PortId, SessionState>,
    leased: BTreeSet<PortId>,
}

impl Session {
    pub fn new(profile: &DutProfile) -> Self {
        Self {
            dut: profile.name.clone(),
            states: profile
                .port_ids()
                .map(|p| (p, SessionState::Clean))
                .collect(),
            leased: BTreeSet::new(),
        }
    }

    pub fn dut(&self) -> &str {
        &self.dut
    }

    pub fn state(&self, port: PortId) -> Option<SessionState> {
        self.states.get(&port).copied()
    }

    pub fn contains_all(&self, scope: &BTreeSet<PortId>) -> bool {
        scope.iter().all(|p| self.states.contains_key(p))
    }

    pub fn is_available(&self, scope: &BTreeSet<PortId>) -> bool {
        self.contains_all(scope) && scope.is_disjoint(&self.leased)
    }

    /// Lease `scope` if none of its ports is in use
    pub fn checkout(&mut self, scope: &BTreeSet<PortId>) -> Option<PortLease> {
        if !self.is_available(scope) {
            return None;
        }
        let states = scope
            .iter()
            .map(|p| (*p, self.states.get(p).copied().unwrap_or_default()))
            .collect();
        self.leased.extend(scope.iter().copied());
        Some(PortLease { states })
    }

    pub fn checkin(&mut self, lease: PortLease) {
        for (port, state) in lease.states {
            self.leased.remove(&port);
            self.states.insert(port, state);
        }
    }

    pub fn leased(&self) -> usize {
        self.leased.len()
    }

    pub fn contaminated(&self) -> Vec<PortId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == SessionState::Contaminated)
            .map(|(p, _)| *p)
            .collect()
    }
}
