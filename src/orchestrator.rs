//! Quality gate orchestration.
//!
//! The [`QualityOrchestrator`] runs every enabled validator over a change
//! set, gathers their findings, applies current overrides and decides the
//! verdict.
//!
//! # Execution
//!
//! Each validator runs on a blocking thread (`spawn_blocking`) under a
//! timeout of `timeout_per_file_ms` times the number of files. Results are
//! buffered per registration index and reassembled in canonical order, so
//! completion order never affects the report. A validator that panics, times
//! out or is cancelled contributes one `low` finding instead of its own.
//!
//! A timed-out validator's thread cannot be stopped; it keeps running in the
//! background until it returns and its result is discarded.
//!
//! # Example
//!
//! ```rust,ignore
//! use mergegate::{GateConfig, OverrideLedger, QualityOrchestrator};
//!
//! let config = GateConfig::discover(project_dir)?;
//! let orchestrator = QualityOrchestrator::from_config(&config)?;
//! let report = orchestrator
//!     .evaluate(&changes, &OverrideLedger::in_memory(), config.mode)
//!     .await;
//! println!("{}", mergegate::report::render_text(&report));
//! ```

use crate::changes::ChangeSet;
use crate::config::{EvaluationMode, ExecutionConfig, GateConfig, VerdictConfig};
use crate::error::Result;
use crate::finding::Finding;
use crate::ledger::{OverrideKey, OverrideLedger};
use crate::report::{
    IncompleteValidator, Interruption, QualityReport, ReportEntry, SeverityCounts, Verdict,
};
use crate::validators::{RegisteredValidator, Validator, ValidatorMode, ValidatorRegistry};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

// ============================================================================
// Cancellation
// ============================================================================

/// Observes a cancellation request and an optional deadline.
///
/// Cloning yields another observer of the same signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
    deadline: Option<tokio::time::Instant>,
}

/// Triggers the paired [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal together with the handle that triggers it.
    #[must_use]
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (sender, receiver) = watch::channel(false);
        (
            CancelHandle { sender },
            CancelSignal {
                receiver,
                deadline: None,
            },
        )
    }

    /// A signal that is never triggered.
    #[must_use]
    pub fn never() -> Self {
        Self::new().1
    }

    /// Also fire once `timeout` has elapsed from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(tokio::time::Instant::now() + timeout);
        self
    }

    /// Whether cancellation has been requested or the deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
            || self
                .deadline
                .is_some_and(|d| tokio::time::Instant::now() >= d)
    }

    /// Resolve once the signal fires. Never resolves for a signal whose
    /// handle was dropped without cancelling and which has no deadline.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let requested = async move {
            loop {
                if *receiver.borrow_and_update() {
                    return;
                }
                if receiver.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = requested => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => requested.await,
        }
    }
}

// ============================================================================
// Verdict policy
// ============================================================================

/// Turns report entries into a verdict.
#[derive(Debug, Clone, Default)]
pub struct VerdictPolicy {
    config: VerdictConfig,
}

impl VerdictPolicy {
    #[must_use]
    pub fn new(config: VerdictConfig) -> Self {
        Self { config }
    }

    /// Decide the verdict.
    ///
    /// Only unsuppressed findings from error-mode validators count. In global
    /// warning mode the verdict is always pass.
    #[must_use]
    pub fn decide(&self, entries: &[ReportEntry], mode: EvaluationMode) -> Verdict {
        if mode == EvaluationMode::Warning {
            return Verdict::Pass;
        }

        let counted = entries.iter().filter(|e| e.counts_toward_verdict());
        let mut high_count: u64 = 0;
        for entry in counted {
            let severity = entry.finding.severity();
            if severity >= self.config.critical_cutoff && self.config.block_on_critical {
                return Verdict::Fail;
            }
            if severity >= self.config.high_cutoff {
                high_count += 1;
            }
        }

        if high_count > u64::from(self.config.high_severity_threshold) {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// How a single validator run ended.
#[derive(Debug)]
enum Outcome {
    Completed(Vec<Finding>),
    TimedOut(Duration),
    Failed(String),
}

/// Runs validators and assembles [`QualityReport`]s.
#[derive(Debug, Clone, Default)]
pub struct QualityOrchestrator {
    registry: ValidatorRegistry,
    policy: VerdictPolicy,
    execution: ExecutionConfig,
}

impl QualityOrchestrator {
    /// Orchestrate `registry` with the default verdict and execution settings.
    #[must_use]
    pub fn new(registry: ValidatorRegistry) -> Self {
        Self {
            registry,
            policy: VerdictPolicy::default(),
            execution: ExecutionConfig::default(),
        }
    }

    /// Build the registry, policy and execution settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the verdict or execution settings
    /// are inconsistent, or when any validator cannot be built.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        config.validate_policy()?;
        Ok(Self::new(ValidatorRegistry::from_config(config)?)
            .with_verdict(config.verdict.clone())
            .with_execution(config.execution.clone()))
    }

    #[must_use]
    pub fn with_verdict(mut self, verdict: VerdictConfig) -> Self {
        self.policy = VerdictPolicy::new(verdict);
        self
    }

    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Evaluate a change set to completion.
    pub async fn evaluate(
        &self,
        changes: &ChangeSet,
        ledger: &OverrideLedger,
        mode: EvaluationMode,
    ) -> QualityReport {
        self.evaluate_with_cancel(changes, ledger, mode, &CancelSignal::never())
            .await
    }

    /// Evaluate a change set, stopping early when `cancel` fires.
    ///
    /// Validators still outstanding at cancellation each contribute one
    /// `cancelled` finding; findings already gathered are kept.
    pub async fn evaluate_with_cancel(
        &self,
        changes: &ChangeSet,
        ledger: &OverrideLedger,
        mode: EvaluationMode,
        cancel: &CancelSignal,
    ) -> QualityReport {
        let started = Instant::now();
        let validators: Vec<&RegisteredValidator> = self.registry.enabled().collect();
        let budget = self.execution.timeout_budget(changes.file_count());
        let changes = Arc::new(changes.clone());

        tracing::debug!(
            validators = validators.len(),
            files = changes.file_count(),
            budget_ms = budget.as_millis() as u64,
            parallel = self.execution.parallel,
            "Starting evaluation"
        );

        let slots = if self.execution.parallel {
            run_concurrent(&validators, &changes, budget, cancel).await
        } else {
            run_sequential(&validators, &changes, budget, cancel).await
        };

        let report = self.assemble(&validators, slots, ledger, mode, budget);

        tracing::info!(
            verdict = %report.verdict,
            findings = report.entries.len(),
            suppressed = report.suppressed_rule_ids.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Evaluation complete"
        );
        report
    }

    fn assemble(
        &self,
        validators: &[&RegisteredValidator],
        slots: Vec<Option<Outcome>>,
        ledger: &OverrideLedger,
        mode: EvaluationMode,
        budget: Duration,
    ) -> QualityReport {
        let overrides: Vec<OverrideKey> = ledger.current_overrides().into_keys().collect();

        let mut entries = Vec::new();
        let mut incomplete = Vec::new();
        for (registered, slot) in validators.iter().zip(slots) {
            let validator = &registered.validator;
            let name = validator.name().to_string();
            let findings = match slot {
                Some(Outcome::Completed(findings)) => findings,
                Some(Outcome::TimedOut(elapsed)) => {
                    incomplete.push(IncompleteValidator {
                        validator: name.clone(),
                        reason: Interruption::TimedOut,
                    });
                    vec![Finding::timeout(validator.category(), &name, elapsed.max(budget))]
                }
                Some(Outcome::Failed(detail)) => {
                    incomplete.push(IncompleteValidator {
                        validator: name.clone(),
                        reason: Interruption::Failed,
                    });
                    vec![Finding::validator_failure(validator.category(), &name, &detail)]
                }
                None => {
                    incomplete.push(IncompleteValidator {
                        validator: name.clone(),
                        reason: Interruption::Cancelled,
                    });
                    vec![Finding::cancelled(validator.category(), &name)]
                }
            };

            entries.extend(findings.into_iter().map(|finding| {
                let suppressed = overrides.iter().any(|key| key.matches(&finding));
                ReportEntry {
                    finding,
                    validator: name.clone(),
                    mode: registered.mode,
                    suppressed,
                }
            }));
        }

        let severity_counts = SeverityCounts::tally(entries.iter().map(|e| &e.finding));
        let suppressed_rule_ids: BTreeSet<String> = entries
            .iter()
            .filter(|e| e.suppressed)
            .map(|e| e.finding.rule_id().to_string())
            .collect();
        let verdict = self.policy.decide(&entries, mode);

        QualityReport {
            mode,
            entries,
            severity_counts,
            verdict,
            suppressed_rule_ids: suppressed_rule_ids.into_iter().collect(),
            incomplete,
        }
    }
}

/// Run all validators at once, filling slots as they finish.
async fn run_concurrent(
    validators: &[&RegisteredValidator],
    changes: &Arc<ChangeSet>,
    budget: Duration,
    cancel: &CancelSignal,
) -> Vec<Option<Outcome>> {
    let mut slots: Vec<Option<Outcome>> = validators.iter().map(|_| None).collect();
    let mut pending: FuturesUnordered<_> = validators
        .iter()
        .enumerate()
        .map(|(index, registered)| {
            let validator = Arc::clone(&registered.validator);
            let changes = Arc::clone(changes);
            async move { (index, run_validator(validator, changes, budget).await) }
        })
        .collect();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::warn!(outstanding = pending.len(), "Evaluation cancelled");
                break;
            }
            next = pending.next() => match next {
                Some((index, outcome)) => slots[index] = Some(outcome),
                None => break,
            },
        }
    }

    slots
}

/// Run validators one at a time in registration order.
async fn run_sequential(
    validators: &[&RegisteredValidator],
    changes: &Arc<ChangeSet>,
    budget: Duration,
    cancel: &CancelSignal,
) -> Vec<Option<Outcome>> {
    let mut slots: Vec<Option<Outcome>> = validators.iter().map(|_| None).collect();

    for (index, registered) in validators.iter().enumerate() {
        let run = run_validator(Arc::clone(&registered.validator), Arc::clone(changes), budget);
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::warn!(outstanding = validators.len() - index, "Evaluation cancelled");
                break;
            }
            outcome = run => slots[index] = Some(outcome),
        }
    }

    slots
}

/// Run one validator on a blocking thread under a timeout.
async fn run_validator(
    validator: Arc<dyn Validator>,
    changes: Arc<ChangeSet>,
    budget: Duration,
) -> Outcome {
    let name = validator.name().to_string();
    let start = Instant::now();
    tracing::debug!(validator = %name, "Validator started");

    let task = tokio::task::spawn_blocking(move || validator.inspect(&changes));
    let result = tokio::time::timeout(budget, task).await;
    let elapsed = start.elapsed();

    match result {
        Ok(Ok(findings)) => {
            tracing::debug!(
                validator = %name,
                findings = findings.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Validator finished"
            );
            Outcome::Completed(findings)
        }
        Ok(Err(join_error)) => {
            let detail = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                join_error.to_string()
            };
            tracing::warn!(validator = %name, detail = %detail, "Validator failed");
            Outcome::Failed(detail)
        }
        Err(_elapsed) => {
            tracing::warn!(
                validator = %name,
                budget_ms = budget.as_millis() as u64,
                "Validator timed out"
            );
            Outcome::TimedOut(elapsed)
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
