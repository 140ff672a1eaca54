//! Pluggable DUT reset strategies

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{DutProfile, ResetMode};
use crate::transport::{DutController, TransportError};

/// What a reset achieved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    /// A MAC-table flush was requested; entries may still be aging out
    Cleared,
    /// The DUT restarted, so no learned entry survived
    PowerCycled,
}

impl ResetOutcome {
    /// Whether the aging wait can be skipped after this reset
    pub fn table_known_empty(&self) -> bool {
        matches!(self, ResetOutcome::PowerCycled)
    }
}

/// How forwarding state is cleared between cases and after contamination
#[async_trait]
pub trait ResetStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reset(&self, controller: &dyn DutController) -> Result<ResetOutcome, TransportError>;

    /// Heavier reset for ports left contaminated by an earlier case
    async fn recover(
        &self,
        controller: &dyn DutController,
    ) -> Result<ResetOutcome, TransportError> {
        self.reset(controller).await
    }
}

/// Request a MAC-table flush and rely on the aging wait otherwise
#[derive(Clone, Copy, Debug, Default)]
pub struct ManualClear;

#[async_trait]
impl ResetStrategy for ManualClear {
    fn name(&self) -> &'static str {
        "manual-clear"
    }

    async fn reset(&self, controller: &dyn DutController) -> Result<ResetOutcome, TransportError> {
        controller.clear_mac_table().await?;
        Ok(ResetOutcome::Cleared)
    }
}

/// Power cycle the DUT when a flush is refused, or on every reset when
/// `every_case` is set. Recovery always power cycles.
#[derive(Clone, Copy, Debug, Default)]
pub struct PowerCycle {
    pub every_case: bool,
}

impl PowerCycle {
    pub fn every_case() -> Self {
        Self { every_case: true }
    }

    async fn cycle(&self, controller: &dyn DutController) -> Result<ResetOutcome, TransportError> {
        info!("power cycling DUT");
        controller.power_cycle().await?;
        Ok(ResetOutcome::PowerCycled)
    }
}

#[async_trait]
impl ResetStrategy for PowerCycle {
    fn name(&self) -> &'static str {
        if self.every_case {
            "power-cycle-always"
        } else {
            "power-cycle"
        }
    }

    async fn reset(&self, controller: &dyn DutController) -> Result<ResetOutcome, TransportError> {
        if self.every_case {
            return self.cycle(controller).await;
        }
        match controller.clear_mac_table().await {
            Ok(()) => Ok(ResetOutcome::Cleared),
            Err(e) if e.is_unreachable() => Err(e),
            Err(e) => {
                warn!("MAC table clear failed ({}), falling back to power cycle", e);
                self.cycle(controller).await
            }
        }
    }

    async fn recover(
        &self,
        controller: &dyn DutController,
    ) -> Result<ResetOutcome, TransportError> {
        self.cycle(controller).await
    }
}

pub fn for_profile(profile: &DutProfile) -> Arc<dyn ResetStrategy> {
    if !profile.can_reset {
        return Arc::new(ManualClear);
    }
    match profile.reset_mode {
        ResetMode::ManualClear => Arc::new(ManualClear),
        ResetMode::PowerCycle => Arc::new(PowerCycle::default()),
        ResetMode::PowerCycleAlways => Arc::new(PowerCycle::every_case()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::MonotonicClock;
    use crate::transport::{NullController, SimulatedSwitch};

    #[test]
    fn test_strategy_selection() {
        let mut profile = DutProfile::reference();
        assert_eq!(for_profile(&profile).name(), "manual-clear");

        profile.reset_mode = ResetMode::PowerCycle;
        assert_eq!(for_profile(&profile).name(), "manual-clear");

        profile.can_reset = true;
        assert_eq!(for_profile(&profile).name(), "power-cycle");

        profile.reset_mode = ResetMode::PowerCycleAlways;
        assert_eq!(for_profile(&profile).name(), "power-cycle-always");
    }

    #[tokio::test]
    async fn test_refused_clear_falls_back_to_power_cycle() {
        let profile = DutProfile::reference();
        let sim = SimulatedSwitch::new(&profile, Arc::new(MonotonicClock::new()));

        assert_eq!(
            PowerCycle::default().reset(&sim).await.unwrap(),
            ResetOutcome::Cleared
        );
        assert_eq!(sim.power_cycles(), 0);

        sim.inject(|f| f.fail_clear = true);
        assert_eq!(
            PowerCycle::default().reset(&sim).await.unwrap(),
            ResetOutcome::PowerCycled
        );
        assert_eq!(sim.power_cycles(), 1);

        // manual clearing has nothing to fall back to
        assert!(ManualClear.reset(&sim).await.is_err());
        assert_eq!(sim.power_cycles(), 1);
    }

    #[tokio::test]
    async fn test_every_case_always_cycles() {
        let profile = DutProfile::reference();
        let sim = SimulatedSwitch::new(&profile, Arc::new(MonotonicClock::new()));
        let outcome = PowerCycle::every_case().reset(&sim).await.unwrap();
        assert!(outcome.table_known_empty());
        assert_eq!(sim.power_cycles(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_dut_is_not_power_cycled() {
        let profile = DutProfile::reference();
        let sim = SimulatedSwitch::new(&profile, Arc::new(MonotonicClock::new()));
        sim.inject(|f| f.unreachable = true);
        assert!(PowerCycle::default().reset(&sim).await.is_err());
        assert_eq!(sim.power_cycles(), 0);
    }

    #[tokio::test]
    async fn test_power_cycle_unsupported_by_controller() {
        struct Refusing;

        #[async_trait]
        impl DutController for Refusing {
            async fn clear_mac_table(&self) -> Result<(), TransportError> {
                Err(TransportError::ResetRejected("MAC table clear".into()))
            }
        }

        assert_eq!(
            PowerCycle::default().reset(&Refusing).await,
            Err(TransportError::Unsupported("power cycle"))
        );
        assert_eq!(
            ManualClear.reset(&NullController).await.unwrap(),
            ResetOutcome::Cleared
        );
    }
}
