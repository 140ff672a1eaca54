//! Case dispatch
//!
//! Cases are queued per port set in first-appearance order. Each queue runs
//! one case at a time, so results for the same ports come out in catalog
//! order, while queues whose ports are disjoint run side by side on a bounded
//! worker pool. The dispatcher owns the run's `Session` and hands port leases
//! to workers; leases come back with the results.

use chrono::Utc;
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::runner::{panic_message, CaseRunner};
use super::CancelToken;
use crate::models::{PortId, RunReport, TestCase, TestResult};
use crate::session::{PortLease, Session, SessionState};
use crate::utils::timer::Timer;

const RESULT_BUFFER: usize = 64;

/// What the dispatcher did with the cases it was given
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: usize,
    /// Stopped early by the cancel token, the run deadline or a dropped receiver
    pub cancelled: bool,
    pub not_run: usize,
}

/// Results as they complete, plus the dispatcher's summary once drained
pub struct ResultStream {
    rx: mpsc::Receiver<TestResult>,
    dispatcher: JoinHandle<DispatchSummary>,
}

impl ResultStream {
    pub async fn next(&mut self) -> Option<TestResult> {
        self.rx.recv().await
    }

    /// Stop listening and wait for the dispatcher. Undelivered results are dropped.
    pub async fn finish(self) -> DispatchSummary {
        let ResultStream { rx, dispatcher } = self;
        drop(rx);
        match dispatcher.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("dispatcher failed: {}", e);
                DispatchSummary::default()
            }
        }
    }

    pub async fn collect(mut self) -> (Vec<TestResult>, DispatchSummary) {
        let mut results = Vec::new();
        while let Some(result) = self.next().await {
            results.push(result);
        }
        (results, self.finish().await)
    }
}

/// Runs case lists against one DUT
pub struct Engine {
    runner: Arc<CaseRunner>,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(runner: CaseRunner) -> Self {
        Self {
            runner: Arc::new(runner),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn runner(&self) -> &CaseRunner {
        &self.runner
    }

    /// Start dispatching on the current runtime
    pub fn run(&self, cases: Vec<TestCase>) -> ResultStream {
        let (tx, rx) = mpsc::channel(RESULT_BUFFER);
        let config = self.runner.config();
        let sequential = config.is_sequential_for(self.runner.profile());
        let dispatcher = Dispatcher {
            runner: self.runner.clone(),
            cancel: self.cancel.clone(),
            deadline: config.run_deadline().map(|d| Instant::now() + d),
            tx,
        };

        let handle = tokio::spawn(async move {
            if sequential {
                dispatcher.sequential(cases).await
            } else {
                dispatcher.parallel(cases).await
            }
        });

        ResultStream {
            rx,
            dispatcher: handle,
        }
    }

    /// Run to completion and summarize. Results are reported in input order.
    pub async fn run_to_report(&self, cases: Vec<TestCase>) -> RunReport {
        self.run_to_report_with(cases, |_| {}).await
    }

    /// As `run_to_report`, calling `on_result` for each result as it completes
    pub async fn run_to_report_with(
        &self,
        cases: Vec<TestCase>,
        mut on_result: impl FnMut(&TestResult),
    ) -> RunReport {
        let started_at = Utc::now();
        let timer = Timer::start("run");
        let tier = cases.first().map(|c| c.tier).unwrap_or_default();
        let order: HashMap<String, usize> = cases
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        let mut stream = self.run(cases);
        let mut results = Vec::new();
        while let Some(result) = stream.next().await {
            on_result(&result);
            results.push(result);
        }
        let summary = stream.finish().await;
        results.sort_by_key(|r| order.get(&r.case_id).copied().unwrap_or(usize::MAX));

        let report = RunReport::new(
            self.runner.profile().name.clone(),
            tier,
            self.runner.timing_tier(),
            results,
        )
        .with_cancellation(summary.cancelled, summary.not_run)
        .with_timing(started_at, timer.elapsed_ms());

        info!(
            "Run completed in {}ms - Pass: {}/{} ({:.1}%)",
            report.total_duration_ms,
            report.counts.passed,
            report.counts.total,
            report.pass_rate()
        );
        if report.cancelled {
            warn!("run stopped early; {} cases not run", report.not_run);
        }
        report
    }
}

/// Cases needing the same ports, in catalog order
#[derive(Debug, Default)]
struct ScopeGroup {
    queue: VecDeque<TestCase>,
    busy: bool,
}

fn group_by_scope(cases: Vec<TestCase>) -> Vec<ScopeGroup> {
    let mut slots: HashMap<BTreeSet<PortId>, usize> = HashMap::new();
    let mut groups: Vec<ScopeGroup> = Vec::new();
    for case in cases {
        let slot = *slots.entry(case.scope.clone()).or_insert_with(|| {
            groups.push(ScopeGroup::default());
            groups.len() - 1
        });
        groups[slot].queue.push_back(case);
    }
    groups
}

/// Run a leased case; a panic outside the handler still yields a result and
/// leaves the ports contaminated.
async fn run_guarded(runner: &CaseRunner, case: &TestCase, lease: &mut PortLease) -> TestResult {
    match AssertUnwindSafe(runner.execute(case, Some(&mut *lease)))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            lease.mark_contaminated();
            TestResult::error(
                case,
                format!("case panicked: {}", panic_message(payload.as_ref())),
            )
            .with_tier(runner.timing_tier())
            .with_session_state(SessionState::Contaminated)
        }
    }
}

type Finished = (usize, PortLease, TestResult);

struct Dispatcher {
    runner: Arc<CaseRunner>,
    cancel: CancelToken,
    deadline: Option<Instant>,
    tx: mpsc::Sender<TestResult>,
}

impl Dispatcher {
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn sequential(self, cases: Vec<TestCase>) -> DispatchSummary {
        info!("Dispatching {} cases sequentially", cases.len());
        let total = cases.len();
        let mut session = Session::new(self.runner.profile());
        let mut summary = DispatchSummary::default();

        for case in cases {
            if self.should_stop() {
                summary.cancelled = true;
                break;
            }

            let lease = if case.is_placeholder() {
                None
            } else {
                session.checkout(&case.scope)
            };
            let result = match lease {
                Some(mut lease) => {
                    let result = run_guarded(&self.runner, &case, &mut lease).await;
                    session.checkin(lease);
                    result
                }
                None => self.runner.execute(&case, None).await,
            };
            summary.dispatched += 1;

            if self.tx.send(result).await.is_err() {
                warn!("result receiver dropped; stopping dispatch");
                summary.cancelled = true;
                break;
            }
        }

        summary.not_run = total - summary.dispatched;
        summary
    }

    async fn parallel(self, cases: Vec<TestCase>) -> DispatchSummary {
        let workers = self.runner.config().max_workers.max(1);
        let total = cases.len();
        let mut groups = group_by_scope(cases);
        info!(
            "Dispatching {} cases in {} port groups on {} workers",
            total,
            groups.len(),
            workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut session = Session::new(self.runner.profile());
        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        let mut summary = DispatchSummary::default();

        loop {
            if !summary.cancelled && self.should_stop() {
                info!("run stopped; waiting for {} in-flight cases", in_flight.len());
                summary.cancelled = true;
            }

            let mut progress = 0;
            if !summary.cancelled {
                match self
                    .dispatch_ready(&mut groups, &mut session, &semaphore, &mut in_flight)
                    .await
                {
                    Some(started) => progress = started,
                    None => summary.cancelled = true,
                }
                summary.dispatched += progress;
            }

            match in_flight.join_next().await {
                Some(Ok((slot, lease, result))) => {
                    session.checkin(lease);
                    groups[slot].busy = false;
                    if self.tx.send(result).await.is_err() {
                        warn!("result receiver dropped; stopping dispatch");
                        summary.cancelled = true;
                    }
                }
                Some(Err(e)) => error!("case task lost: {}", e),
                None if summary.cancelled || groups.iter().all(|g| g.queue.is_empty()) => break,
                None if progress == 0 => {
                    if self.should_stop() {
                        summary.cancelled = true;
                    } else {
                        error!("dispatcher stalled with no case able to start");
                    }
                    break;
                }
                None => {}
            }
        }

        summary.not_run = groups.iter().map(|g| g.queue.len()).sum();
        summary
    }

    /// Start every queue head that can run now and emit placeholders inline.
    /// Returns the number of cases handled, or None once nobody is listening.
    async fn dispatch_ready(
        &self,
        groups: &mut [ScopeGroup],
        session: &mut Session,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<Finished>,
    ) -> Option<usize> {
        let mut handled = 0;
        // ports an earlier queue is waiting for; later queues may not overtake it
        let mut blocked: BTreeSet<PortId> = BTreeSet::new();

        for (slot, group) in groups.iter_mut().enumerate() {
            if group.busy {
                continue;
            }
            while let Some(head) = group.queue.front() {
                if self.should_stop() {
                    return Some(handled);
                }

                if head.is_placeholder() || !session.contains_all(&head.scope) {
                    let Some(case) = group.queue.pop_front() else {
                        break;
                    };
                    let result = self.runner.execute(&case, None).await;
                    handled += 1;
                    if self.tx.send(result).await.is_err() {
                        return None;
                    }
                    continue;
                }

                if !head.scope.is_disjoint(&blocked) {
                    blocked.extend(head.scope.iter().copied());
                    break;
                }
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    return Some(handled);
                };
                let Some(lease) = session.checkout(&head.scope) else {
                    blocked.extend(head.scope.iter().copied());
                    break;
                };
                let Some(case) = group.queue.pop_front() else {
                    break;
                };

                debug!("dispatch {} on ports {:?}", case.id, case.scope);
                group.busy = true;
                handled += 1;
                let runner = self.runner.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    let mut lease = lease;
                    let result = run_guarded(&runner, &case, &mut lease).await;
                    (slot, lease, result)
                });
                break;
            }
        }
        Some(handled)
    }
}
