//! Layer-2 switch conformance test engine
//!
//! Expands a catalog of TC8 Layer-2 specifications into concrete test cases
//! for a described switch (the DUT), runs them with per-port session
//! isolation, and classifies each outcome as Pass, Fail, Informational, Skip
//! or Error.
//!
//! ```no_run
//! use std::sync::Arc;
//! use l2_conformance::catalog::Catalog;
//! use l2_conformance::executor::{CaseRunner, Engine, EngineConfig};
//! use l2_conformance::models::{DutProfile, SamplingTier};
//! use l2_conformance::timing::{MonotonicClock, TimingSource};
//! use l2_conformance::transport::SimulatedSwitch;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let catalog = Arc::new(Catalog::builtin()?);
//! let profile = Arc::new(DutProfile::reference());
//! let clock: Arc<dyn TimingSource> = Arc::new(MonotonicClock::new());
//! let switch = Arc::new(SimulatedSwitch::new(&profile, clock.clone()));
//!
//! let cases = catalog.expand_all(SamplingTier::Minimal, &profile, &[]);
//! let runner = CaseRunner::new(
//!     catalog,
//!     profile,
//!     switch.clone(),
//!     switch,
//!     clock,
//!     EngineConfig::default(),
//! );
//! let report = Engine::new(runner).run_to_report(cases).await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod executor;
pub mod handlers;
pub mod models;
pub mod output;
pub mod session;
pub mod timing;
pub mod transport;
pub mod utils;
