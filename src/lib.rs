//! mergegate - pre-merge quality gate
//!
//! Runs independent rule-based validators over a proposed change, aggregates
//! their findings into a severity-ranked report and renders an enforceable
//! pass/fail verdict.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`changes`] - Change sets and the loaders that build them (payload, directories, git)
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`finding`] - Finding, severity and category value types
//! - [`validators`] - The validator trait, built-in validators and the registry
//! - [`orchestrator`] - Concurrent evaluation, cancellation and the verdict policy
//! - [`ledger`] - Append-only, hash-chained override ledger
//! - [`report`] - Quality reports and their text/structured rendering
//! - [`resilience`] - Circuit breaker and cached provider for external context
//! - [`testing`] - Testing infrastructure (mocks, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use mergegate::{ChangeSet, GateConfig, OverrideLedger, QualityOrchestrator};
//!
//! let config = GateConfig::discover(".")?;
//! let orchestrator = QualityOrchestrator::from_config(&config)?;
//! let ledger = OverrideLedger::open(config.ledger.resolve(Path::new(".")))?;
//!
//! let changes = ChangeSet::new("Add login", "")
//!     .with_changed("auth/login.py", source);
//! let report = orchestrator.evaluate(&changes, &ledger, config.mode).await;
//! println!("{}", mergegate::report::render_text(&report));
//! ```

pub mod changes;
pub mod config;
pub mod error;
pub mod finding;
pub mod ledger;
pub mod orchestrator;
pub mod report;
pub mod resilience;
pub mod testing;
pub mod validators;

// Re-export commonly used types
pub use error::{GateError, Result};

pub use changes::{ChangeKind, ChangeSet};
pub use config::{EvaluationMode, GateConfig};
pub use finding::{Category, Finding, Severity};
pub use ledger::{OverrideEntry, OverrideKey, OverrideLedger, OverrideRequest};
pub use orchestrator::{CancelHandle, CancelSignal, QualityOrchestrator, VerdictPolicy};
pub use report::{QualityReport, ReportEntry, SeverityCounts, Verdict};
pub use validators::{Validator, ValidatorKind, ValidatorMode, ValidatorRegistry};

pub use testing::MockValidator;
