//! Spec handlers
//!
//! A handler drives the transport and the codec for one case and returns the
//! evidence it collected. Handlers never classify; the classifier compares the
//! evidence with the spec's expected outcome.

mod forwarding;
mod latency;
mod probe;

pub use forwarding::ForwardingHandler;
pub use latency::LatencyHandler;
pub use probe::{
    carries_nonce, case_nonce, learn_frame, probe_destination, probe_frame, probe_payload,
    LEARN_MARKER, PAYLOAD_MARKER,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::codec::CodecError;
use crate::models::{DutProfile, Evidence, ExpectedOutcome, PortId, SpecDefinition, TestCase};
use crate::timing::TimingSource;
use crate::transport::{DutTransport, TransportError};

/// Evidence collection failures
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("frame construction failed: {0}")]
    Codec(#[from] CodecError),

    #[error("no handler registered for {0}")]
    NoHandler(String),

    #[error("case {0} has no port pair")]
    MissingPorts(String),

    #[error("port {0} is not in the DUT profile")]
    UnknownPort(PortId),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler did not finish within {0:?}")]
    TimedOut(Duration),
}

impl HandlerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transport(e) if e.is_transient())
    }
}

/// Everything a handler may touch while running one case
pub struct HandlerContext<'a> {
    pub case: &'a TestCase,
    pub spec: &'a SpecDefinition,
    pub profile: &'a DutProfile,
    pub transport: &'a dyn DutTransport,
    pub clock: &'a dyn TimingSource,
    /// Receive window per port
    pub receive_timeout: Duration,
}

impl HandlerContext<'_> {
    /// Ingress and egress of the case, both present in the profile
    pub fn pair(&self) -> Result<(PortId, PortId), HandlerError> {
        let pair = self
            .case
            .ports
            .ok_or_else(|| HandlerError::MissingPorts(self.case.id.clone()))?;
        for port in [pair.ingress, pair.egress] {
            if self.profile.port(port).is_none() {
                return Err(HandlerError::UnknownPort(port));
            }
        }
        Ok((pair.ingress, pair.egress))
    }

    /// Nonce carried by this case's probe frames
    pub fn nonce(&self) -> u64 {
        case_nonce(&self.case.id)
    }
}

#[async_trait]
pub trait SpecHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Evidence, HandlerError>;
}

/// Spec ID to handler, with defaults per expected-outcome kind
pub struct HandlerRegistry {
    by_id: HashMap<String, Arc<dyn SpecHandler>>,
    forwarding: Arc<dyn SpecHandler>,
    timing: Arc<dyn SpecHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            forwarding: Arc::new(ForwardingHandler),
            timing: Arc::new(LatencyHandler),
        }
    }

    pub fn register(&mut self, spec_id: impl Into<String>, handler: Arc<dyn SpecHandler>) {
        self.by_id.insert(spec_id.into(), handler);
    }

    pub fn with_handler(mut self, spec_id: impl Into<String>, handler: Arc<dyn SpecHandler>) -> Self {
        self.register(spec_id, handler);
        self
    }

    pub fn resolve(&self, spec: &SpecDefinition) -> Arc<dyn SpecHandler> {
        if let Some(handler) = self.by_id.get(&spec.id) {
            return handler.clone();
        }
        match spec.expected {
            // observations record where the probe went, same as forwarding
            ExpectedOutcome::Forwarding { .. } | ExpectedOutcome::Observation { .. } => {
                self.forwarding.clone()
            }
            ExpectedOutcome::Timing { .. } => self.timing.clone(),
        }
    }

    pub fn registered(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_id.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    struct Silent;

    #[async_trait]
    impl SpecHandler for Silent {
        fn name(&self) -> &'static str {
            "silent"
        }

        async fn execute(&self, _ctx: &HandlerContext<'_>) -> Result<Evidence, HandlerError> {
            Ok(Evidence::default())
        }
    }

    #[test]
    fn test_resolution_by_id_then_kind() {
        let catalog = Catalog::builtin().unwrap();
        let registry = HandlerRegistry::new().with_handler("SWITCH_VLAN_001", Arc::new(Silent));

        let vlan = catalog.get("SWITCH_VLAN_001").unwrap();
        let addr = catalog.get("SWITCH_ADDR_002").unwrap();
        let time = catalog.get("SWITCH_TIME_X01").unwrap();
        let runt = catalog.get("SWITCH_GEN_007").unwrap();
        assert_eq!(registry.resolve(vlan).name(), "silent");
        assert_eq!(registry.resolve(runt).name(), "forwarding");
        assert_eq!(registry.resolve(addr).name(), "forwarding");
        assert_eq!(registry.resolve(time).name(), "latency");
        assert_eq!(registry.registered(), vec!["SWITCH_VLAN_001"]);
    }

    #[test]
    fn test_nonce_follows_case_id_not_seq() {
        use crate::catalog::expand;
        use crate::models::SamplingTier;
        use crate::timing::MonotonicClock;
        use crate::transport::SimulatedSwitch;

        let catalog = Catalog::builtin().unwrap();
        let spec = catalog.get("SWITCH_VLAN_001").unwrap();
        let profile = DutProfile::reference();
        // a direct expansion leaves every seq at 0
        let cases = expand(spec, SamplingTier::Minimal, &profile);
        assert!(cases.len() >= 2);
        assert!(cases.iter().all(|c| c.seq == 0));

        let clock = MonotonicClock::new();
        let sim = SimulatedSwitch::new(&profile, Arc::new(MonotonicClock::new()));
        let nonces: Vec<u64> = cases
            .iter()
            .map(|case| {
                HandlerContext {
                    case,
                    spec,
                    profile: &profile,
                    transport: &sim,
                    clock: &clock,
                    receive_timeout: Duration::ZERO,
                }
                .nonce()
            })
            .collect();
        assert_ne!(nonces[0], nonces[1]);
        assert_eq!(nonces[0], case_nonce(&cases[0].id));
    }

    #[test]
    fn test_transient_classification() {
        let e = HandlerError::from(TransportError::Unreachable("x".into()));
        assert!(e.is_transient());
        assert!(!HandlerError::UnknownPort(3).is_transient());
        assert!(!HandlerError::TimedOut(Duration::from_secs(1)).is_transient());
    }
}
