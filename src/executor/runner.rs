//! Single-case execution
//!
//! Runs one case through pre-condition, handler and post-condition and turns
//! whatever happened into exactly one `TestResult`. Each case runs inside a
//! `case` span so its log events can be captured onto that result.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::EngineConfig;
use crate::catalog::Catalog;
use crate::classifier::{CaseOutcome, ResultClassifier};
use crate::handlers::{HandlerContext, HandlerError, HandlerRegistry, SpecHandler};
use crate::models::{Classification, DutProfile, Evidence, SpecDefinition, TestCase, TestResult};
use crate::session::{PortLease, ResetStrategy, SessionController, SessionState};
use crate::timing::{TimingSource, TimingTier};
use crate::transport::{DutController, DutTransport};
use crate::utils::log_capture::CaseLogs;
use crate::utils::timer::Timer;

/// Executes cases against one DUT
pub struct CaseRunner {
    catalog: Arc<Catalog>,
    profile: Arc<DutProfile>,
    transport: Arc<dyn DutTransport>,
    clock: Arc<dyn TimingSource>,
    session: SessionController,
    handlers: HandlerRegistry,
    classifier: ResultClassifier,
    config: EngineConfig,
    logs: Option<CaseLogs>,
}

impl CaseRunner {
    pub fn new(
        catalog: Arc<Catalog>,
        profile: Arc<DutProfile>,
        transport: Arc<dyn DutTransport>,
        controller: Arc<dyn DutController>,
        clock: Arc<dyn TimingSource>,
        config: EngineConfig,
    ) -> Self {
        let session = SessionController::new(
            transport.clone(),
            controller,
            profile.clone(),
            config.session.clone(),
        );
        Self {
            catalog,
            profile,
            transport,
            clock,
            session,
            handlers: HandlerRegistry::new(),
            classifier: ResultClassifier,
            config,
            logs: None,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Attach log entries buffered by `logs` to each result
    pub fn with_log_capture(mut self, logs: CaseLogs) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ResetStrategy>) -> Self {
        self.session = self.session.with_strategy(strategy);
        self
    }

    pub fn profile(&self) -> &DutProfile {
        &self.profile
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn timing_tier(&self) -> TimingTier {
        self.clock.tier()
    }

    /// Run one case. Placeholders never touch the DUT and need no lease; every
    /// other case needs a lease covering its scope.
    pub async fn execute(&self, case: &TestCase, lease: Option<&mut PortLease>) -> TestResult {
        let span = info_span!("case", case_id = %case.id);
        let result = self.run_case(case, lease).instrument(span).await;
        match &self.logs {
            Some(logs) => result.with_log_entries(logs.take(&case.id)),
            None => result,
        }
    }

    async fn run_case(&self, case: &TestCase, lease: Option<&mut PortLease>) -> TestResult {
        let started_at = Utc::now();
        let timer = Timer::start(&case.id);
        let tier = self.clock.tier();

        let Some(spec) = self.catalog.get(&case.spec_id) else {
            return TestResult::error(case, format!("unknown spec {}", case.spec_id))
                .with_timing(started_at, timer.elapsed_ms())
                .with_tier(tier);
        };

        let (outcome, state) = match (&case.placeholder, lease) {
            (Some(reason), _) => (CaseOutcome::Placeholder(reason.clone()), SessionState::Clean),
            (None, Some(lease)) => self.run_on_lease(spec, case, lease).await,
            (None, None) => (
                CaseOutcome::FrameworkError(format!(
                    "ports {:?} could not be leased from the DUT session",
                    case.scope
                )),
                SessionState::Clean,
            ),
        };

        let verdict = self
            .classifier
            .classify(spec, case, &outcome, tier, &self.profile);
        let evidence = match outcome {
            CaseOutcome::Collected(evidence) => Some(evidence),
            _ => None,
        };

        let result = verdict
            .into_result(case)
            .with_evidence(evidence)
            .with_timing(started_at, timer.elapsed_ms())
            .with_tier(tier)
            .with_session_state(state);

        match result.classification {
            Classification::Error => warn!("  {}", result),
            _ => info!("  {}", result),
        }
        result
    }

    async fn run_on_lease(
        &self,
        spec: &SpecDefinition,
        case: &TestCase,
        lease: &mut PortLease,
    ) -> (CaseOutcome, SessionState) {
        if let Err(first) = self.session.begin(lease).await {
            warn!("{}: pre-condition failed ({}), retrying", case.id, first);
            tokio::time::sleep(self.session.policy().retry_backoff()).await;
            if let Err(e) = self.session.begin(lease).await {
                let cause = format!("session pre-condition failed: {e}");
                return (CaseOutcome::FrameworkError(cause), lease.overall());
            }
        }

        let collected = self.collect(spec, case).await;
        let finished = self.session.finish(lease).await;

        let outcome = match (collected, finished) {
            (Ok(evidence), Ok(())) => CaseOutcome::Collected(evidence),
            (Ok(_), Err(e)) => {
                CaseOutcome::FrameworkError(format!("session post-condition failed: {e}"))
            }
            (Err(e), Ok(())) => CaseOutcome::FrameworkError(e.to_string()),
            (Err(e), Err(post)) => CaseOutcome::FrameworkError(format!(
                "{e}; session post-condition failed: {post}"
            )),
        };
        (outcome, lease.overall())
    }

    /// Handler execution with one retry for transient transport errors
    async fn collect(&self, spec: &SpecDefinition, case: &TestCase) -> Result<Evidence, HandlerError> {
        let handler = self.handlers.resolve(spec);
        let ctx = HandlerContext {
            case,
            spec,
            profile: &self.profile,
            transport: self.transport.as_ref(),
            clock: self.clock.as_ref(),
            receive_timeout: self.config.frame_timeout(),
        };
        debug!("{}: running {} handler", case.id, handler.name());

        match self.attempt(handler.as_ref(), &ctx).await {
            Err(e) if e.is_transient() => {
                warn!("{}: {} (retrying)", case.id, e);
                tokio::time::sleep(self.session.policy().retry_backoff()).await;
                self.attempt(handler.as_ref(), &ctx).await
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        handler: &dyn SpecHandler,
        ctx: &HandlerContext<'_>,
    ) -> Result<Evidence, HandlerError> {
        let limit = self.config.case_timeout();
        let guarded = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();
        match tokio::time::timeout(limit, guarded).await {
            Err(_) => Err(HandlerError::TimedOut(limit)),
            Ok(Err(payload)) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
            Ok(Ok(result)) => result,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SamplingTier;
    use crate::session::{Session, SessionPolicy};
    use crate::timing::MonotonicClock;
    use crate::transport::{LinkStatus, SimulatedSwitch};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            case_timeout_ms: 2_000,
            frame_timeout_ms: 20,
            session: SessionPolicy {
                max_aging_wait_ms: 200,
                link_wait_ms: 300,
                link_poll_ms: 20,
                aging_poll_ms: 20,
                retry_backoff_ms: 10,
            },
            ..EngineConfig::sequential()
        }
    }

    fn setup(profile: DutProfile) -> (Arc<SimulatedSwitch>, CaseRunner, Session, Arc<Catalog>) {
        let clock: Arc<dyn TimingSource> = Arc::new(MonotonicClock::new());
        let sim = Arc::new(SimulatedSwitch::new(&profile, clock.clone()));
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let session = Session::new(&profile);
        let runner = CaseRunner::new(
            catalog.clone(),
            Arc::new(profile),
            sim.clone(),
            sim.clone(),
            clock,
            fast_config(),
        );
        (sim, runner, session, catalog)
    }

    fn cases(catalog: &Catalog, spec_id: &str) -> Vec<TestCase> {
        let spec = catalog.get(spec_id).unwrap();
        let mut cases = crate::catalog::expand(spec, SamplingTier::Minimal, &DutProfile::reference());
        for (seq, case) in cases.iter_mut().enumerate() {
            case.seq = seq;
        }
        cases
    }

    struct Panicking;

    #[async_trait]
    impl SpecHandler for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn execute(&self, _ctx: &HandlerContext<'_>) -> Result<Evidence, HandlerError> {
            panic!("probe buffer exhausted");
        }
    }

    /// Fails with a transient error on the first call only
    struct Flaky(AtomicUsize);

    #[async_trait]
    impl SpecHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn execute(&self, _ctx: &HandlerContext<'_>) -> Result<Evidence, HandlerError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(crate::transport::TransportError::ReceiveFailed {
                    port: 1,
                    reason: "capture buffer overrun".into(),
                }
                .into());
            }
            Ok(Evidence::default())
        }
    }

    /// Logs which case it ran for
    struct Chatty;

    #[async_trait]
    impl SpecHandler for Chatty {
        fn name(&self) -> &'static str {
            "chatty"
        }

        async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Evidence, HandlerError> {
            debug!("chatty handler ran for {}", ctx.case.id);
            Ok(Evidence::default())
        }
    }

    struct Stalled;

    #[async_trait]
    impl SpecHandler for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn execute(&self, _ctx: &HandlerContext<'_>) -> Result<Evidence, HandlerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Evidence::default())
        }
    }

    #[tokio::test]
    async fn test_pass_leaves_ports_verified() {
        let (_sim, runner, mut session, catalog) = setup(DutProfile::reference());
        let case = cases(&catalog, "SWITCH_VLAN_001").remove(0);
        let mut lease = session.checkout(&case.scope).unwrap();

        let result = runner.execute(&case, Some(&mut lease)).await;
        assert_eq!(result.classification, Classification::Pass, "{result}");
        assert_eq!(result.session_state, SessionState::Verified);
        assert!(result.evidence.is_some());
        assert_eq!(result.expected, "ports {1, 2, 3}");
        assert_eq!(result.observed, result.expected);
    }

    #[tokio::test]
    async fn test_placeholder_needs_no_lease() {
        let (sim, runner, _session, catalog) = setup(DutProfile::reference());
        let case = cases(&catalog, "SWITCH_VLAN_010").remove(0);
        assert!(case.is_placeholder());

        let result = runner.execute(&case, None).await;
        assert_eq!(result.classification, Classification::Skip);
        assert!(result.evidence.is_none());
        assert_eq!(sim.statistics(0).unwrap().rx_frames, 0);
    }

    #[tokio::test]
    async fn test_missing_lease_is_error() {
        let (_sim, runner, _session, catalog) = setup(DutProfile::reference());
        let case = cases(&catalog, "SWITCH_VLAN_001").remove(0);
        let result = runner.execute(&case, None).await;
        assert_eq!(result.classification, Classification::Error);
    }

    #[tokio::test]
    async fn test_precondition_failure_is_error_never_skip() {
        let (sim, runner, mut session, catalog) = setup(DutProfile::reference());
        let case = cases(&catalog, "SWITCH_VLAN_001").remove(0);
        sim.set_link(1, LinkStatus::Down);

        let mut lease = session.checkout(&case.scope).unwrap();
        let result = runner.execute(&case, Some(&mut lease)).await;
        assert_eq!(result.classification, Classification::Error);
        assert!(result.explanation.contains("pre-condition"), "{}", result.explanation);
        assert_eq!(result.session_state, SessionState::Contaminated);
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let (_sim, runner, mut session, catalog) = setup(DutProfile::reference());
        let runner = runner
            .with_handlers(HandlerRegistry::new().with_handler("SWITCH_VLAN_001", Arc::new(Panicking)));
        let case = cases(&catalog, "SWITCH_VLAN_001").remove(0);
        let mut lease = session.checkout(&case.scope).unwrap();

        let result = runner.execute(&case, Some(&mut lease)).await;
        assert_eq!(result.classification, Classification::Error);
        assert!(result.explanation.contains("probe buffer exhausted"));
        // post-condition still ran
        assert_eq!(result.session_state, SessionState::Verified);
    }

    #[tokio::test]
    async fn test_transient_error_retried_once() {
        let (_sim, runner, mut session, catalog) = setup(DutProfile::reference());
        let flaky = Arc::new(Flaky(AtomicUsize::new(0)));
        let runner = runner
            .with_handlers(HandlerRegistry::new().with_handler("SWITCH_VLAN_003", flaky.clone()));
        let case = cases(&catalog, "SWITCH_VLAN_003").remove(0);
        let mut lease = session.checkout(&case.scope).unwrap();

        let result = runner.execute(&case, Some(&mut lease)).await;
        assert_eq!(flaky.0.load(Ordering::SeqCst), 2);
        assert_eq!(result.classification, Classification::Pass, "{result}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_case_timeout() {
        let (_sim, runner, mut session, catalog) = setup(DutProfile::reference());
        let runner = runner
            .with_handlers(HandlerRegistry::new().with_handler("SWITCH_VLAN_001", Arc::new(Stalled)));
        let case = cases(&catalog, "SWITCH_VLAN_001").remove(0);
        let mut lease = session.checkout(&case.scope).unwrap();

        let result = runner.execute(&case, Some(&mut lease)).await;
        assert_eq!(result.classification, Classification::Error);
        assert!(result.explanation.contains("did not finish"), "{}", result.explanation);
    }

    #[tokio::test]
    async fn test_case_logs_land_on_their_own_result() {
        use tracing_subscriber::prelude::*;

        let logs = CaseLogs::new();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(logs.layer()));

        let (_sim, runner, mut session, catalog) = setup(DutProfile::reference());
        let runner = runner
            .with_handlers(HandlerRegistry::new().with_handler("SWITCH_VLAN_001", Arc::new(Chatty)))
            .with_log_capture(logs.clone());
        let cases = cases(&catalog, "SWITCH_VLAN_001");
        assert_eq!(cases.len(), 2);

        let mut results = Vec::new();
        for case in &cases {
            let mut lease = session.checkout(&case.scope).unwrap();
            results.push(runner.execute(case, Some(&mut lease)).await);
            session.checkin(lease);
        }

        for (case, result) in cases.iter().zip(&results) {
            let own = format!("chatty handler ran for {}", case.id);
            let messages: Vec<&str> =
                result.log_entries.iter().map(|e| e.message.as_str()).collect();
            assert_eq!(
                messages.iter().filter(|m| m.starts_with("chatty")).collect::<Vec<_>>(),
                vec![&own.as_str()],
                "{messages:?}"
            );
            assert!(result
                .log_entries
                .iter()
                .any(|e| e.level == "DEBUG" && e.target.ends_with("runner")));
        }
        // nothing left behind once results are built
        assert!(logs.take(&cases[0].id).is_empty());
    }

    #[tokio::test]
    async fn test_no_capture_without_log_buffer() {
        let (_sim, runner, _session, catalog) = setup(DutProfile::reference());
        let case = cases(&catalog, "SWITCH_VLAN_010").remove(0);
        let result = runner.execute(&case, None).await;
        assert!(result.log_entries.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
