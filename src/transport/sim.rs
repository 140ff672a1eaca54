//! Simulated 802.1Q learning switch
//!
//! Behaves like a small managed switch configured from a `DutProfile`:
//! ingress filtering, PVID assignment for untagged and priority-tagged frames,
//! independent VLAN learning, flooding to VLAN members, tagged egress on trunks
//! and untagged egress on access ports. Optional 802.1ad outer-tag switching
//! when the profile supports double tagging. Faults can be injected to
//! exercise the engine's failure paths.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CapturedFrame, DutController, DutTransport, FrameStream, LinkStatus, TransportError};
use crate::codec::{parse, EthernetFrame, MacAddr, Tpid, VlanTag};
use crate::models::{DutProfile, PortId};
use crate::timing::TimingSource;

/// Injectable misbehavior
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    /// Forward every frame to every other port, ignoring VLAN membership
    pub leak_vlans: bool,
    /// Every operation fails as if the DUT were off the network
    pub unreachable: bool,
    /// Statistics resets and MAC-table clears are rejected
    pub fail_resets: bool,
    /// Clears are acknowledged but entries remain until they age out
    pub ignore_clear: bool,
    /// MAC-table clears alone are rejected; statistics resets still succeed
    pub fail_clear: bool,
    /// Added to the timestamp of every forwarded frame
    pub latency: Duration,
    /// On the next send, take this port down for the given time
    pub link_flap: Option<(PortId, Duration)>,
}

/// Per-port frame counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatistics {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub dropped: u64,
}

#[derive(Debug)]
struct SimPort {
    membership: BTreeSet<u16>,
    pvid: u16,
    trunk: bool,
    admin_down: bool,
    down_until: Option<Instant>,
    stats: PortStatistics,
    queue: Vec<CapturedFrame>,
}

impl SimPort {
    fn link(&self, now: Instant) -> LinkStatus {
        let flapping = self.down_until.map(|t| now < t).unwrap_or(false);
        if self.admin_down || flapping {
            LinkStatus::Down
        } else {
            LinkStatus::Up
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct FdbEntry {
    port: PortId,
    learned_at: Instant,
}

#[derive(Debug)]
struct SwitchState {
    ports: Vec<SimPort>,
    fdb: HashMap<(u16, MacAddr), FdbEntry>,
    aging: Duration,
    double_tagging: bool,
    faults: Faults,
    power_cycles: usize,
}

impl SwitchState {
    fn check_reachable(&self) -> Result<(), TransportError> {
        if self.faults.unreachable {
            return Err(TransportError::Unreachable("no response from simulated DUT".into()));
        }
        Ok(())
    }

    fn check_port(&self, port: PortId) -> Result<(), TransportError> {
        if port >= self.ports.len() {
            return Err(TransportError::UnknownPort(port));
        }
        Ok(())
    }

    fn purge_aged(&mut self, now: Instant) {
        let aging = self.aging;
        self.fdb
            .retain(|_, entry| now.saturating_duration_since(entry.learned_at) < aging);
    }
}

/// In-memory switch implementing both `DutTransport` and `DutController`
pub struct SimulatedSwitch {
    state: Mutex<SwitchState>,
    clock: Arc<dyn TimingSource>,
}

impl SimulatedSwitch {
    pub fn new(profile: &DutProfile, clock: Arc<dyn TimingSource>) -> Self {
        let ports = profile
            .ports
            .iter()
            .map(|p| SimPort {
                membership: p.vlan_membership.clone(),
                pvid: p.pvid,
                trunk: p.trunk,
                admin_down: false,
                down_until: None,
                stats: PortStatistics::default(),
                queue: Vec::new(),
            })
            .collect();

        Self {
            state: Mutex::new(SwitchState {
                ports,
                fdb: HashMap::new(),
                aging: profile.aging_interval().max(Duration::from_millis(1)),
                double_tagging: profile.supports_double_tagging,
                faults: Faults::default(),
                power_cycles: 0,
            }),
            clock,
        }
    }

    /// Apply fault changes
    pub fn inject(&self, update: impl FnOnce(&mut Faults)) {
        let mut state = self.state.lock();
        update(&mut state.faults);
        debug!("simulated DUT faults: {:?}", state.faults);
    }

    pub fn faults(&self) -> Faults {
        self.state.lock().faults.clone()
    }

    /// Administratively force a port's link state
    pub fn set_link(&self, port: PortId, status: LinkStatus) {
        let mut state = self.state.lock();
        if let Some(p) = state.ports.get_mut(port) {
            p.admin_down = status == LinkStatus::Down;
            p.down_until = None;
        }
    }

    pub fn statistics(&self, port: PortId) -> Option<PortStatistics> {
        self.state.lock().ports.get(port).map(|p| p.stats)
    }

    pub fn learned_port(&self, vid: u16, mac: MacAddr) -> Option<PortId> {
        let mut state = self.state.lock();
        state.purge_aged(Instant::now());
        state.fdb.get(&(vid, mac)).map(|e| e.port)
    }

    /// Power cycles performed since creation
    pub fn power_cycles(&self) -> usize {
        self.state.lock().power_cycles
    }

    pub fn fdb_len(&self) -> usize {
        let mut state = self.state.lock();
        state.purge_aged(Instant::now());
        state.fdb.len()
    }

    fn forward(&self, state: &mut SwitchState, ingress: PortId, frame: EthernetFrame) {
        let now = Instant::now();

        // Service tags are only recognised when the DUT does 802.1ad; otherwise they are payload
        let pvid = state.ports[ingress].pvid;
        let (vid, classifying) = match frame.tags.first().copied() {
            Some(tag) if tag.tpid == Tpid::Cvlan || state.double_tagging => {
                let vid = if tag.vid == 0 { pvid } else { tag.vid };
                (vid, Some(tag))
            }
            _ => (pvid, None),
        };

        if vid == 4095 {
            state.ports[ingress].stats.dropped += 1;
            trace!("port {}: dropped frame with reserved VID 4095", ingress);
            return;
        }

        let leak = state.faults.leak_vlans;
        if !leak && !state.ports[ingress].membership.contains(&vid) {
            state.ports[ingress].stats.dropped += 1;
            trace!("port {}: ingress filter dropped VID {}", ingress, vid);
            return;
        }

        if frame.src.is_unicast() {
            state.fdb.insert(
                (vid, frame.src),
                FdbEntry {
                    port: ingress,
                    learned_at: now,
                },
            );
        }

        state.purge_aged(now);
        let egress: Vec<PortId> = {
            let view: &SwitchState = state;
            let eligible = |port: PortId| -> bool {
                port != ingress
                    && view.ports[port].link(now) == LinkStatus::Up
                    && (leak || view.ports[port].membership.contains(&vid))
            };
            match view.fdb.get(&(vid, frame.dst)) {
                Some(entry) if frame.dst.is_unicast() && !leak => {
                    if eligible(entry.port) {
                        vec![entry.port]
                    } else {
                        Vec::new()
                    }
                }
                _ => (0..view.ports.len()).filter(|&p| eligible(p)).collect(),
            }
        };

        let inner: Vec<VlanTag> = match classifying {
            Some(_) => frame.tags[1..].to_vec(),
            None => frame.tags.clone(),
        };
        let pcp = classifying.map(|t| t.pcp).unwrap_or(0);
        let egress_tpid = classifying.map(|t| t.tpid).unwrap_or(Tpid::Cvlan);

        let timestamp = self.clock.now().add(state.faults.latency);
        for port in egress {
            let mut out = frame.clone();
            out.tags = inner.clone();
            if state.ports[port].trunk {
                out.tags.insert(
                    0,
                    VlanTag {
                        tpid: egress_tpid,
                        vid,
                        pcp,
                        dei: false,
                    },
                );
            }
            match out.encode() {
                Ok(bytes) => {
                    let p = &mut state.ports[port];
                    p.stats.tx_frames += 1;
                    p.queue.push(CapturedFrame { bytes, timestamp });
                }
                Err(e) => {
                    state.ports[port].stats.dropped += 1;
                    debug!("port {}: egress encode failed: {}", port, e);
                }
            }
        }
    }
}

#[async_trait]
impl DutTransport for SimulatedSwitch {
    async fn send(&self, port: PortId, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        state.check_port(port)?;

        let now = Instant::now();
        if state.ports[port].link(now) == LinkStatus::Down {
            return Err(TransportError::SendFailed {
                port,
                reason: "link down".into(),
            });
        }

        if let Some((flap_port, down_for)) = state.faults.link_flap.take() {
            if let Some(p) = state.ports.get_mut(flap_port) {
                p.down_until = Some(now + down_for);
                debug!("port {} link flapping for {:?}", flap_port, down_for);
            }
        }

        state.ports[port].stats.rx_frames += 1;
        match parse(frame) {
            Ok(decoded) => self.forward(&mut state, port, decoded),
            Err(e) => {
                state.ports[port].stats.dropped += 1;
                debug!("port {}: discarding malformed frame: {}", port, e);
            }
        }
        Ok(())
    }

    async fn receive(&self, port: PortId, timeout: Duration) -> Result<FrameStream, TransportError> {
        let latency = {
            let state = self.state.lock();
            state.check_reachable()?;
            state.check_port(port)?;
            state.faults.latency
        };

        if !latency.is_zero() && !timeout.is_zero() {
            tokio::time::sleep(latency.min(timeout)).await;
        }

        let frames = std::mem::take(&mut self.state.lock().ports[port].queue);
        Ok(stream::iter(frames).boxed())
    }

    async fn link_status(&self, port: PortId) -> Result<LinkStatus, TransportError> {
        let state = self.state.lock();
        state.check_reachable()?;
        state.check_port(port)?;
        Ok(state.ports[port].link(Instant::now()))
    }

    async fn reset_statistics(&self, port: PortId) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        state.check_port(port)?;
        if state.faults.fail_resets {
            return Err(TransportError::ResetRejected(format!(
                "statistics reset on port {port}"
            )));
        }
        state.ports[port].stats = PortStatistics::default();
        Ok(())
    }
}

#[async_trait]
impl DutController for SimulatedSwitch {
    async fn clear_mac_table(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        if state.faults.fail_resets || state.faults.fail_clear {
            return Err(TransportError::ResetRejected("MAC table clear".into()));
        }
        if !state.faults.ignore_clear {
            state.fdb.clear();
        }
        Ok(())
    }

    async fn power_cycle(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        state.fdb.clear();
        for port in state.ports.iter_mut() {
            port.stats = PortStatistics::default();
            port.queue.clear();
            port.down_until = None;
        }
        state.power_cycles += 1;
        debug!("simulated DUT power cycled");
        Ok(())
    }

    async fn mac_table_entries(&self) -> Result<Option<usize>, TransportError> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        state.purge_aged(Instant::now());
        Ok(Some(state.fdb.len()))
    }

    async fn vlan_membership(&self, port: PortId) -> Result<Option<BTreeSet<u16>>, TransportError> {
        let state = self.state.lock();
        state.check_reachable()?;
        state.check_port(port)?;
        Ok(Some(state.ports[port].membership.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{build, EtherType};
    use crate::models::PortConfig;
    use crate::timing::MonotonicClock;

    fn switch(profile: &DutProfile) -> SimulatedSwitch {
        SimulatedSwitch::new(profile, Arc::new(MonotonicClock::new()))
    }

    async fn drain(sim: &SimulatedSwitch, port: PortId) -> Vec<EthernetFrame> {
        sim.receive(port, Duration::ZERO)
            .await
            .unwrap()
            .map(|f| parse(&f.bytes).unwrap())
            .collect()
            .await
    }

    fn tagged(src: MacAddr, dst: MacAddr, vid: u16) -> Vec<u8> {
        let tag = VlanTag::new(Tpid::Cvlan, vid, 3).unwrap();
        build(src, dst, &[tag], EtherType::IPV4, &[0; 46]).unwrap()
    }

    fn untagged(src: MacAddr, dst: MacAddr) -> Vec<u8> {
        build(src, dst, &[], EtherType::IPV4, &[0; 46]).unwrap()
    }

    #[tokio::test]
    async fn test_floods_untagged_to_access_members() {
        let sim = switch(&DutProfile::reference());
        sim.send(0, &untagged(MacAddr::station(0), MacAddr::BROADCAST))
            .await
            .unwrap();

        assert_eq!(drain(&sim, 0).await.len(), 0);
        let access = drain(&sim, 1).await;
        assert_eq!(access.len(), 1);
        assert!(access[0].tags.is_empty());

        let trunk = drain(&sim, 2).await;
        assert_eq!(trunk.len(), 1);
        assert_eq!(trunk[0].outer_vid(), Some(1));
        assert_eq!(trunk[0].tags[0].tpid, Tpid::Cvlan);
    }

    #[tokio::test]
    async fn test_ingress_filtering() {
        let sim = switch(&DutProfile::reference());
        // Port 0 is not a member of VLAN 10
        sim.send(0, &tagged(MacAddr::station(0), MacAddr::BROADCAST, 10))
            .await
            .unwrap();
        for port in 1..4 {
            assert!(drain(&sim, port).await.is_empty());
        }
        assert_eq!(sim.statistics(0).unwrap().dropped, 1);
    }

    #[tokio::test]
    async fn test_trunk_to_trunk_keeps_vid_and_pcp() {
        let sim = switch(&DutProfile::reference());
        sim.send(2, &tagged(MacAddr::station(2), MacAddr::BROADCAST, 100))
            .await
            .unwrap();
        assert!(drain(&sim, 0).await.is_empty());
        let frames = drain(&sim, 3).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].tags[0].vid, 100);
        assert_eq!(frames[0].tags[0].pcp, 3);
    }

    #[tokio::test]
    async fn test_learning_and_unicast_forwarding() {
        let sim = switch(&DutProfile::reference());
        sim.send(1, &untagged(MacAddr::station(1), MacAddr::BROADCAST))
            .await
            .unwrap();
        assert_eq!(sim.learned_port(1, MacAddr::station(1)), Some(1));
        for port in 0..4 {
            drain(&sim, port).await;
        }

        sim.send(0, &untagged(MacAddr::station(0), MacAddr::station(1)))
            .await
            .unwrap();
        assert_eq!(drain(&sim, 1).await.len(), 1);
        assert!(drain(&sim, 2).await.is_empty());
        assert!(drain(&sim, 3).await.is_empty());

        sim.clear_mac_table().await.unwrap();
        assert_eq!(sim.mac_table_entries().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_priority_tag_uses_pvid() {
        let sim = switch(&DutProfile::reference());
        sim.send(0, &tagged(MacAddr::station(0), MacAddr::BROADCAST, 0))
            .await
            .unwrap();
        let frames = drain(&sim, 1).await;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].tags.is_empty());
    }

    #[tokio::test]
    async fn test_leak_fault_ignores_membership() {
        let profile = DutProfile::new(
            "two-port",
            vec![
                PortConfig::new(0, "eth0"),
                PortConfig::new(1, "eth1").with_vlans([100]).with_pvid(100),
            ],
        );
        let sim = switch(&profile);
        sim.send(0, &untagged(MacAddr::station(0), MacAddr::BROADCAST))
            .await
            .unwrap();
        assert!(drain(&sim, 1).await.is_empty());

        sim.inject(|f| f.leak_vlans = true);
        sim.send(0, &untagged(MacAddr::station(0), MacAddr::BROADCAST))
            .await
            .unwrap();
        assert_eq!(drain(&sim, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_double_tagging_switches_on_outer_tag() {
        let mut profile = DutProfile::reference();
        profile.supports_double_tagging = true;
        let sim = switch(&profile);

        let outer = VlanTag::new(Tpid::Svlan, 100, 0).unwrap();
        let inner = VlanTag::new(Tpid::Cvlan, 7, 0).unwrap();
        let bytes = build(
            MacAddr::station(2),
            MacAddr::BROADCAST,
            &[outer, inner],
            EtherType::IPV4,
            &[0; 46],
        )
        .unwrap();
        sim.send(2, &bytes).await.unwrap();

        let frames = drain(&sim, 3).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].tags, vec![outer, inner]);
    }

    #[tokio::test]
    async fn test_faults() {
        let sim = switch(&DutProfile::reference());

        sim.set_link(1, LinkStatus::Down);
        assert_eq!(sim.link_status(1).await.unwrap(), LinkStatus::Down);
        assert!(sim.send(1, &untagged(MacAddr::station(1), MacAddr::BROADCAST)).await.is_err());
        sim.set_link(1, LinkStatus::Up);

        sim.inject(|f| f.fail_resets = true);
        assert!(matches!(
            sim.reset_statistics(0).await,
            Err(TransportError::ResetRejected(_))
        ));
        assert!(sim.clear_mac_table().await.is_err());

        sim.inject(|f| *f = Faults { fail_clear: true, ..Faults::default() });
        assert!(sim.reset_statistics(0).await.is_ok());
        assert!(sim.clear_mac_table().await.is_err());
        sim.power_cycle().await.unwrap();
        assert_eq!(sim.power_cycles(), 1);

        sim.inject(|f| *f = Faults { unreachable: true, ..Faults::default() });
        assert!(matches!(
            sim.link_status(0).await,
            Err(TransportError::Unreachable(_))
        ));
        assert!(matches!(
            sim.send(9, &[]).await,
            Err(TransportError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_port() {
        let sim = switch(&DutProfile::reference());
        assert_eq!(
            sim.link_status(7).await,
            Err(TransportError::UnknownPort(7))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_flap_recovers() {
        let sim = switch(&DutProfile::reference());
        sim.inject(|f| f.link_flap = Some((1, Duration::from_millis(200))));
        sim.send(0, &untagged(MacAddr::station(0), MacAddr::BROADCAST))
            .await
            .unwrap();
        assert_eq!(sim.link_status(1).await.unwrap(), LinkStatus::Down);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sim.link_status(1).await.unwrap(), LinkStatus::Up);
    }
}
