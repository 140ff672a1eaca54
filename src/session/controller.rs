//! Per-case isolation protocol
//!
//! `begin` takes a lease from Clean (or Verified) to Active after resetting
//! statistics, clearing the MAC table and checking links and VLAN layout.
//! `finish` repeats the reset, waits for links to come back and for learned
//! entries to age out (unless the reset power cycled the DUT), and moves the
//! lease to Verified. Any failing step leaves
//! the leased ports Contaminated; they are recovered before their next case.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::strategy::{for_profile, ResetOutcome, ResetStrategy};
use super::{ContaminationError, PortLease, SessionPolicy, SessionState};
use crate::models::{DutProfile, PortId};
use crate::transport::{DutController, DutTransport, LinkStatus};

pub struct SessionController {
    transport: Arc<dyn DutTransport>,
    controller: Arc<dyn DutController>,
    profile: Arc<DutProfile>,
    policy: SessionPolicy,
    strategy: Arc<dyn ResetStrategy>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn DutTransport>,
        controller: Arc<dyn DutController>,
        profile: Arc<DutProfile>,
        policy: SessionPolicy,
    ) -> Self {
        let strategy = for_profile(&profile);
        Self {
            transport,
            controller,
            profile,
            policy,
            strategy,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ResetStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Pre-condition: lease becomes Active or Contaminated.
    pub async fn begin(&self, lease: &mut PortLease) -> Result<(), ContaminationError> {
        if !lease.contaminated().is_empty() {
            self.recover(lease).await?;
        }
        lease.transition(SessionState::Active)?;

        let ports = lease.ports();
        match self.prepare(&ports).await {
            Ok(()) => {
                trace!("ports {:?} active", ports);
                Ok(())
            }
            Err(e) => {
                warn!("session begin failed on {:?}: {}", ports, e);
                lease.mark_contaminated();
                Err(e)
            }
        }
    }

    /// Post-condition: lease becomes Verified or Contaminated.
    pub async fn finish(&self, lease: &mut PortLease) -> Result<(), ContaminationError> {
        let ports = lease.ports();
        let outcome: Result<(), ContaminationError> = async {
            self.reset_statistics(&ports).await?;
            let reset = self.reset().await?;
            self.wait_for_links(&ports).await?;
            if reset.table_known_empty() {
                debug!("DUT power cycled, skipping aging wait");
                return Ok(());
            }
            self.aging_wait().await
        }
        .await;

        match outcome {
            Ok(()) => {
                lease.transition(SessionState::Verified)?;
                trace!("ports {:?} verified", ports);
                Ok(())
            }
            Err(e) => {
                warn!("session finish failed on {:?}: {}", ports, e);
                lease.mark_contaminated();
                Err(e)
            }
        }
    }

    /// Bring contaminated ports in the lease back to Clean
    pub async fn recover(&self, lease: &mut PortLease) -> Result<(), ContaminationError> {
        let ports = lease.contaminated();
        if ports.is_empty() {
            return Ok(());
        }
        info!(
            "recovering contaminated ports {:?} ({})",
            ports,
            self.strategy.name()
        );

        self.strategy
            .recover(self.controller.as_ref())
            .await
            .map_err(ContaminationError::Recovery)?;
        self.wait_for_links(&ports).await?;
        self.reset_statistics(&ports).await?;

        lease.restore(&ports);
        info!("ports {:?} recovered", ports);
        Ok(())
    }

    async fn reset(&self) -> Result<ResetOutcome, ContaminationError> {
        self.strategy
            .reset(self.controller.as_ref())
            .await
            .map_err(ContaminationError::MacClear)
    }

    async fn prepare(&self, ports: &[PortId]) -> Result<(), ContaminationError> {
        self.reset_statistics(ports).await?;
        self.reset().await?;

        for &port in ports {
            let status = self
                .transport
                .link_status(port)
                .await
                .map_err(|source| ContaminationError::LinkQuery { port, source })?;
            if status == LinkStatus::Down {
                return Err(ContaminationError::LinkDown(port));
            }
        }

        self.check_vlans(ports).await
    }

    async fn reset_statistics(&self, ports: &[PortId]) -> Result<(), ContaminationError> {
        for &port in ports {
            self.transport
                .reset_statistics(port)
                .await
                .map_err(|source| ContaminationError::StatisticsReset { port, source })?;
        }
        Ok(())
    }

    async fn check_vlans(&self, ports: &[PortId]) -> Result<(), ContaminationError> {
        for &port in ports {
            let Some(config) = self.profile.port(port) else {
                return Err(ContaminationError::VlanMismatch {
                    port,
                    detail: "port not in profile".to_string(),
                });
            };
            if !config.is_member(config.pvid) {
                return Err(ContaminationError::VlanMismatch {
                    port,
                    detail: format!("PVID {} is not a member VLAN", config.pvid),
                });
            }

            let reported = self
                .controller
                .vlan_membership(port)
                .await
                .map_err(|source| ContaminationError::LinkQuery { port, source })?;
            if let Some(actual) = reported {
                if actual != config.vlan_membership {
                    return Err(ContaminationError::VlanMismatch {
                        port,
                        detail: format!(
                            "DUT reports {:?}, profile declares {:?}",
                            actual, config.vlan_membership
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Poll until every port is up or the link-wait ceiling passes
    async fn wait_for_links(&self, ports: &[PortId]) -> Result<(), ContaminationError> {
        let started = Instant::now();
        let deadline = started + self.policy.link_wait();
        loop {
            let mut down = None;
            for &port in ports {
                let status = self
                    .transport
                    .link_status(port)
                    .await
                    .map_err(|source| ContaminationError::LinkQuery { port, source })?;
                if status == LinkStatus::Down {
                    down = Some(port);
                    break;
                }
            }

            let Some(port) = down else {
                return Ok(());
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(ContaminationError::LinkTimeout {
                    port,
                    waited_ms: now.duration_since(started).as_millis() as u64,
                });
            }
            debug!("port {} link down, polling", port);
            tokio::time::sleep(self.policy.link_poll().min(deadline - now)).await;
        }
    }

    /// Wait for an empty MAC table, at most `min(aging interval, max aging wait)`
    async fn aging_wait(&self) -> Result<(), ContaminationError> {
        let ceiling = self
            .profile
            .aging_interval()
            .min(self.policy.max_aging_wait());
        if ceiling.is_zero() {
            return Ok(());
        }
        let deadline = Instant::now() + ceiling;

        loop {
            let entries = self
                .controller
                .mac_table_entries()
                .await
                .map_err(ContaminationError::MacTableQuery)?;
            match entries {
                Some(0) => return Ok(()),
                None => {
                    // occupancy cannot be observed; wait out the full ceiling
                    tokio::time::sleep_until(deadline).await;
                    return Ok(());
                }
                Some(n) => trace!("{} MAC entries still present", n),
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("aging wait ceiling {:?} reached", ceiling);
                return Ok(());
            }
            let pause: Duration = self.policy.aging_poll().min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResetMode;
    use crate::session::Session;
    use crate::timing::MonotonicClock;
    use crate::transport::{NullController, SimulatedSwitch, TransportError};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    /// Forwards resets to the simulator but cannot report table occupancy
    struct Unobservable(Arc<SimulatedSwitch>);

    #[async_trait]
    impl DutController for Unobservable {
        async fn clear_mac_table(&self) -> Result<(), TransportError> {
            self.0.clear_mac_table().await
        }

        async fn power_cycle(&self) -> Result<(), TransportError> {
            self.0.power_cycle().await
        }
    }

    fn fast_policy() -> SessionPolicy {
        SessionPolicy {
            max_aging_wait_ms: 2_000,
            link_wait_ms: 3_000,
            link_poll_ms: 100,
            aging_poll_ms: 100,
            retry_backoff_ms: 10,
        }
    }

    fn setup(profile: DutProfile) -> (Arc<SimulatedSwitch>, SessionController, Session) {
        let sim = Arc::new(SimulatedSwitch::new(&profile, Arc::new(MonotonicClock::new())));
        let session = Session::new(&profile);
        let controller =
            SessionController::new(sim.clone(), sim.clone(), Arc::new(profile), fast_policy());
        (sim, controller, session)
    }

    #[tokio::test]
    async fn test_begin_finish_happy_path() {
        let (_sim, controller, mut session) = setup(DutProfile::reference());
        let mut lease = session.checkout(&BTreeSet::from([0, 1])).unwrap();

        controller.begin(&mut lease).await.unwrap();
        assert_eq!(lease.overall(), SessionState::Active);
        controller.finish(&mut lease).await.unwrap();
        assert_eq!(lease.overall(), SessionState::Verified);

        session.checkin(lease);
        let mut again = session.checkout(&BTreeSet::from([0, 1])).unwrap();
        controller.begin(&mut again).await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_fails_fast_on_link_down() {
        let (sim, controller, mut session) = setup(DutProfile::reference());
        sim.set_link(1, LinkStatus::Down);
        let mut lease = session.checkout(&BTreeSet::from([0, 1])).unwrap();

        let err = controller.begin(&mut lease).await.unwrap_err();
        assert_eq!(err, ContaminationError::LinkDown(1));
        assert_eq!(lease.overall(), SessionState::Contaminated);
    }

    #[tokio::test]
    async fn test_rejected_reset_contaminates() {
        let (sim, controller, mut session) = setup(DutProfile::reference());
        sim.inject(|f| f.fail_resets = true);
        let mut lease = session.checkout(&BTreeSet::from([2])).unwrap();

        let err = controller.begin(&mut lease).await.unwrap_err();
        assert!(matches!(
            err,
            ContaminationError::StatisticsReset { port: 2, .. }
        ));
        assert_eq!(lease.state(2), Some(SessionState::Contaminated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_waits_out_short_link_flap() {
        let (sim, controller, mut session) = setup(DutProfile::reference());
        let mut lease = session.checkout(&BTreeSet::from([0, 1])).unwrap();
        controller.begin(&mut lease).await.unwrap();

        sim.inject(|f| f.link_flap = Some((1, Duration::from_millis(500))));
        let frame = crate::codec::build(
            crate::codec::MacAddr::station(0),
            crate::codec::MacAddr::BROADCAST,
            &[],
            crate::codec::EtherType::IPV4,
            &[0; 46],
        )
        .unwrap();
        sim.send(0, &frame).await.unwrap();

        controller.finish(&mut lease).await.unwrap();
        assert_eq!(lease.overall(), SessionState::Verified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_times_out_then_recovers() {
        let (sim, controller, mut session) = setup(DutProfile::reference());
        let mut lease = session.checkout(&BTreeSet::from([0, 1])).unwrap();
        controller.begin(&mut lease).await.unwrap();

        sim.set_link(1, LinkStatus::Down);
        let err = controller.finish(&mut lease).await.unwrap_err();
        assert!(matches!(err, ContaminationError::LinkTimeout { port: 1, .. }));
        session.checkin(lease);
        assert_eq!(session.contaminated(), vec![0, 1]);

        // still down: recovery fails and the ports stay contaminated
        let mut lease = session.checkout(&BTreeSet::from([1])).unwrap();
        assert!(controller.begin(&mut lease).await.is_err());
        session.checkin(lease);
        assert_eq!(session.state(1), Some(SessionState::Contaminated));

        sim.set_link(1, LinkStatus::Up);
        let mut lease = session.checkout(&BTreeSet::from([1])).unwrap();
        controller.begin(&mut lease).await.unwrap();
        assert_eq!(lease.overall(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aging_wait_bounded_by_ceiling() {
        let (sim, controller, mut session) = setup(DutProfile::reference());
        sim.inject(|f| f.ignore_clear = true);
        let mut lease = session.checkout(&BTreeSet::from([0, 1])).unwrap();
        controller.begin(&mut lease).await.unwrap();

        let frame = crate::codec::build(
            crate::codec::MacAddr::station(0),
            crate::codec::MacAddr::BROADCAST,
            &[],
            crate::codec::EtherType::IPV4,
            &[0; 46],
        )
        .unwrap();
        sim.send(0, &frame).await.unwrap();
        assert_eq!(sim.fdb_len(), 1);

        let started = Instant::now();
        controller.finish(&mut lease).await.unwrap();
        // reference profile ages entries after 1s, below the 2s policy ceiling
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() <= Duration::from_secs(2));
        assert_eq!(lease.overall(), SessionState::Verified);
    }

    #[tokio::test]
    async fn test_vlan_layout_mismatch() {
        let actual = DutProfile::reference();
        let sim = Arc::new(SimulatedSwitch::new(&actual, Arc::new(MonotonicClock::new())));

        let mut declared = actual.clone();
        declared.ports[2].vlan_membership = BTreeSet::from([1, 10]);
        let mut session = Session::new(&declared);
        let controller = SessionController::new(
            sim.clone(),
            sim.clone(),
            Arc::new(declared),
            fast_policy(),
        );

        let mut lease = session.checkout(&BTreeSet::from([2, 3])).unwrap();
        let err = controller.begin(&mut lease).await.unwrap_err();
        assert!(matches!(err, ContaminationError::VlanMismatch { port: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmanaged_dut_waits_full_ceiling() {
        let profile = DutProfile::reference();
        let sim = Arc::new(SimulatedSwitch::new(&profile, Arc::new(MonotonicClock::new())));
        let mut session = Session::new(&profile);
        let controller = SessionController::new(
            sim,
            Arc::new(NullController),
            Arc::new(profile),
            fast_policy(),
        );

        let mut lease = session.checkout(&BTreeSet::from([0])).unwrap();
        controller.begin(&mut lease).await.unwrap();
        let started = Instant::now();
        controller.finish(&mut lease).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_clear_power_cycles_and_skips_aging() {
        let mut profile = DutProfile::reference();
        profile.can_reset = true;
        profile.reset_mode = ResetMode::PowerCycle;
        let sim = Arc::new(SimulatedSwitch::new(&profile, Arc::new(MonotonicClock::new())));
        let mut session = Session::new(&profile);
        let controller = SessionController::new(
            sim.clone(),
            Arc::new(Unobservable(sim.clone())),
            Arc::new(profile),
            fast_policy(),
        );
        assert_eq!(controller.strategy_name(), "power-cycle");

        let mut lease = session.checkout(&BTreeSet::from([0, 1])).unwrap();
        controller.begin(&mut lease).await.unwrap();
        assert_eq!(sim.power_cycles(), 0);

        let frame = crate::codec::build(
            crate::codec::MacAddr::station(0),
            crate::codec::MacAddr::BROADCAST,
            &[],
            crate::codec::EtherType::IPV4,
            &[0; 46],
        )
        .unwrap();
        sim.send(0, &frame).await.unwrap();
        assert_eq!(sim.fdb_len(), 1);

        sim.inject(|f| f.fail_clear = true);
        let started = Instant::now();
        controller.finish(&mut lease).await.unwrap();

        assert_eq!(sim.power_cycles(), 1);
        assert_eq!(sim.fdb_len(), 0);
        // occupancy is unobservable, so only the power cycle avoids the 1s ceiling
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(lease.overall(), SessionState::Verified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_clear_without_power_cycle_contaminates() {
        let (sim, controller, mut session) = setup(DutProfile::reference());
        let mut lease = session.checkout(&BTreeSet::from([0, 1])).unwrap();
        controller.begin(&mut lease).await.unwrap();

        sim.inject(|f| f.fail_clear = true);
        let err = controller.finish(&mut lease).await.unwrap_err();
        assert!(matches!(err, ContaminationError::MacClear(_)));
        assert_eq!(sim.power_cycles(), 0);
        assert_eq!(lease.overall(), SessionState::Contaminated);
    }
}
