//! Device-under-test profile
//!
//! A profile describes the switch being tested: its ports, VLAN layout and the
//! capabilities that decide which specifications apply to it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::codec::{MacAddr, MAX_VID};

/// Zero-based port index
pub type PortId = usize;

/// Profile validation errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to read profile {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("profile syntax error: {0}")]
    Syntax(String),

    #[error("profile declares no ports")]
    NoPorts,

    #[error("port_count is {declared} but {actual} ports are listed")]
    PortCountMismatch { declared: usize, actual: usize },

    #[error("ports[{position}] has index {index}; indices must be contiguous from 0")]
    NonContiguousPorts { position: usize, index: PortId },

    #[error("port {port}: VLAN ID {vid} out of range 0..=4095")]
    VidOutOfRange { port: PortId, vid: u16 },

    #[error("port {port}: PVID {pvid} is not in its VLAN membership")]
    PvidNotMember { port: PortId, pvid: u16 },

    #[error("power-cycling reset modes require can_reset: true")]
    ResetModeUnsupported,
}

/// How the DUT is returned to a clean state between cases
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// MAC-table clear and statistics reset through the controller
    #[default]
    ManualClear,
    /// MAC-table clear, with a power cycle when the clear is refused
    PowerCycle,
    /// Power cycle before and after every case
    PowerCycleAlways,
}

/// One switch port
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub index: PortId,
    pub interface: String,
    pub mac: MacAddr,
    #[serde(default = "default_speed")]
    pub speed_mbps: u32,
    #[serde(default)]
    pub vlan_membership: BTreeSet<u16>,
    #[serde(default = "default_pvid")]
    pub pvid: u16,
    #[serde(default)]
    pub trunk: bool,
}

fn default_speed() -> u32 {
    100
}

fn default_pvid() -> u16 {
    1
}

fn default_true() -> bool {
    true
}

fn default_mac_table_size() -> usize {
    1024
}

fn default_aging_secs() -> u64 {
    300
}

impl PortConfig {
    pub fn new(index: PortId, interface: impl Into<String>) -> Self {
        Self {
            index,
            interface: interface.into(),
            mac: MacAddr::station(index),
            speed_mbps: default_speed(),
            vlan_membership: BTreeSet::from([default_pvid()]),
            pvid: default_pvid(),
            trunk: false,
        }
    }

    pub fn with_vlans(mut self, vids: impl IntoIterator<Item = u16>) -> Self {
        self.vlan_membership = vids.into_iter().collect();
        self
    }

    pub fn with_pvid(mut self, pvid: u16) -> Self {
        self.pvid = pvid;
        self
    }

    pub fn trunk(mut self) -> Self {
        self.trunk = true;
        self
    }

    pub fn is_member(&self, vid: u16) -> bool {
        self.vlan_membership.contains(&vid)
    }
}

/// Static description of the device under test
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DutProfile {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub firmware: String,
    pub port_count: usize,
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub supported_features: BTreeSet<String>,
    #[serde(default = "default_mac_table_size")]
    pub mac_table_size: usize,
    #[serde(default = "default_aging_secs")]
    pub mac_aging_secs: u64,
    #[serde(default)]
    pub supports_double_tagging: bool,
    #[serde(default)]
    pub supports_gptp: bool,
    #[serde(default)]
    pub can_reset: bool,
    #[serde(default)]
    pub reset_mode: ResetMode,
    #[serde(default = "default_true")]
    pub supports_simultaneous_traffic: bool,
    #[serde(default)]
    pub notes: String,
}

impl DutProfile {
    /// Profile with `ports` access ports all in VLAN 1
    pub fn new(name: impl Into<String>, ports: Vec<PortConfig>) -> Self {
        Self {
            name: name.into(),
            model: String::new(),
            firmware: String::new(),
            port_count: ports.len(),
            ports,
            supported_features: ["vlan", "learning", "flooding"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            mac_table_size: default_mac_table_size(),
            mac_aging_secs: default_aging_secs(),
            supports_double_tagging: false,
            supports_gptp: false,
            can_reset: false,
            reset_mode: ResetMode::ManualClear,
            supports_simultaneous_traffic: true,
            notes: String::new(),
        }
    }

    /// Four-port reference switch: ports 0-1 access in VLAN 1, ports 2-3 trunks
    /// carrying VLANs 1, 10 and 100.
    pub fn reference() -> Self {
        let mut profile = Self::new(
            "reference-switch",
            vec![
                PortConfig::new(0, "eth0"),
                PortConfig::new(1, "eth1"),
                PortConfig::new(2, "eth2").with_vlans([1, 10, 100]).trunk(),
                PortConfig::new(3, "eth3").with_vlans([1, 10, 100]).trunk(),
            ],
        );
        profile.model = "simulated".to_string();
        profile.firmware = "sim-1.0".to_string();
        profile.mac_aging_secs = 1;
        profile
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, SchemaError> {
        let profile: Self =
            serde_yaml::from_str(content).map_err(|e| SchemaError::Syntax(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_json_str(content: &str) -> Result<Self, SchemaError> {
        let profile: Self =
            serde_json::from_str(content).map_err(|e| SchemaError::Syntax(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.port_count == 0 || self.ports.is_empty() {
            return Err(SchemaError::NoPorts);
        }
        if self.port_count != self.ports.len() {
            return Err(SchemaError::PortCountMismatch {
                declared: self.port_count,
                actual: self.ports.len(),
            });
        }
        for (position, port) in self.ports.iter().enumerate() {
            if port.index != position {
                return Err(SchemaError::NonContiguousPorts {
                    position,
                    index: port.index,
                });
            }
            if let Some(&vid) = port.vlan_membership.iter().find(|&&v| v > MAX_VID) {
                return Err(SchemaError::VidOutOfRange {
                    port: port.index,
                    vid,
                });
            }
            if port.pvid > MAX_VID {
                return Err(SchemaError::VidOutOfRange {
                    port: port.index,
                    vid: port.pvid,
                });
            }
            if !port.is_member(port.pvid) {
                return Err(SchemaError::PvidNotMember {
                    port: port.index,
                    pvid: port.pvid,
                });
            }
        }
        if self.reset_mode != ResetMode::ManualClear && !self.can_reset {
            return Err(SchemaError::ResetModeUnsupported);
        }
        Ok(())
    }

    pub fn port(&self, id: PortId) -> Option<&PortConfig> {
        self.ports.get(id)
    }

    pub fn port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.ports.iter().map(|p| p.index)
    }

    /// Union of all ports' VLAN memberships
    pub fn configured_vids(&self) -> BTreeSet<u16> {
        self.ports
            .iter()
            .flat_map(|p| p.vlan_membership.iter().copied())
            .collect()
    }

    /// Ports that are members of `vid`
    pub fn members_of(&self, vid: u16) -> BTreeSet<PortId> {
        self.ports
            .iter()
            .filter(|p| p.is_member(vid))
            .map(|p| p.index)
            .collect()
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.supported_features.contains(feature)
    }

    pub fn aging_interval(&self) -> Duration {
        Duration::from_secs(self.mac_aging_secs)
    }

    pub fn interfaces(&self) -> Vec<String> {
        self.ports.iter().map(|p| p.interface.clone()).collect()
    }
}
