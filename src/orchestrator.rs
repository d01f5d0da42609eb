//! Domain migration orchestrator.
//!
//! Drives one domain through four gates, each backed by an external
//! collaborator:
//!
//! ```text
//! NotStarted ─► DependencyChecked ─► ModelsMigrated ─► TestsRun ─► ConsistencyVerified ─► Done
//!                     │                   │                              │
//!                     └───────────────────┴──────────► Aborted ◄─────────┘
//! ```
//!
//! A gate is named after the state it leads to. Dependency, model and
//! consistency gates abort the run on failure. The test gate never does: a
//! failing test run is recorded and logged, and the run moves on to
//! consistency verification.
//!
//! Models already migrated before a failure are not rolled back here.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analyzer::Domain;
use crate::domains::{DomainGraph, DomainSpec, ModelRef};
use crate::error::MigrateResult;

/// Result of one external step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Passed,
    Failed(String),
}

impl StepOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Reports whether a domain has already been migrated.
pub trait MigrationStateStore {
    fn is_domain_migrated(&self, domain: Domain) -> impl Future<Output = MigrateResult<bool>>;
}

/// Runs one transformation model.
pub trait ModelRunner {
    fn run_model(&self, model: &ModelRef<'_>) -> impl Future<Output = StepOutcome>;
}

/// Runs the test suite scoped to a domain.
pub trait TestRunner {
    fn run_tests(&self, domain: Domain) -> impl Future<Output = StepOutcome>;
}

/// Compares source and target data for a migrated domain.
pub trait ConsistencyChecker {
    fn verify(&self, spec: &DomainSpec) -> impl Future<Output = StepOutcome>;
}

impl<S: MigrationStateStore + ?Sized> MigrationStateStore for &S {
    fn is_domain_migrated(&self, domain: Domain) -> impl Future<Output = MigrateResult<bool>> {
        (**self).is_domain_migrated(domain)
    }
}

impl<M: ModelRunner + ?Sized> ModelRunner for &M {
    fn run_model(&self, model: &ModelRef<'_>) -> impl Future<Output = StepOutcome> {
        (**self).run_model(model)
    }
}

impl<T: TestRunner + ?Sized> TestRunner for &T {
    fn run_tests(&self, domain: Domain) -> impl Future<Output = StepOutcome> {
        (**self).run_tests(domain)
    }
}

impl<C: ConsistencyChecker + ?Sized> ConsistencyChecker for &C {
    fn verify(&self, spec: &DomainSpec) -> impl Future<Output = StepOutcome> {
        (**self).verify(spec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    NotStarted,
    DependencyChecked,
    ModelsMigrated,
    TestsRun,
    ConsistencyVerified,
    Done,
    Aborted,
}

impl MigrationState {
    /// The state reached by passing the next gate.
    pub fn next(self) -> Option<MigrationState> {
        match self {
            Self::NotStarted => Some(Self::DependencyChecked),
            Self::DependencyChecked => Some(Self::ModelsMigrated),
            Self::ModelsMigrated => Some(Self::TestsRun),
            Self::TestsRun => Some(Self::ConsistencyVerified),
            Self::ConsistencyVerified => Some(Self::Done),
            Self::Done | Self::Aborted => None,
        }
    }

    /// Whether failing the gate leading to this state aborts the run.
    pub fn can_abort(self) -> bool {
        matches!(
            self,
            Self::DependencyChecked | Self::ModelsMigrated | Self::ConsistencyVerified
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not started",
            Self::DependencyChecked => "dependency check",
            Self::ModelsMigrated => "model migration",
            Self::TestsRun => "test run",
            Self::ConsistencyVerified => "consistency verification",
            Self::Done => "done",
            Self::Aborted => "aborted",
        })
    }
}

/// Why a run was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationFailure {
    #[error("prerequisite domain '{prerequisite}' of '{domain}' has not been migrated")]
    DependencyNotSatisfied { domain: Domain, prerequisite: Domain },

    #[error("could not read migration state of '{prerequisite}': {reason}")]
    StateUnavailable { prerequisite: Domain, reason: String },

    #[error("model {model} failed: {reason}")]
    ModelMigration { model: String, reason: String },

    #[error("consistency check for '{domain}' failed: {reason}")]
    ConsistencyCheck { domain: Domain, reason: String },

    #[error("cancelled before {gate}")]
    Cancelled { gate: MigrationState },
}

/// Outcome of one gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub gate: MigrationState,
    pub passed: bool,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl GateOutcome {
    /// Wall-clock time the gate finished, `HH:MM:SS` UTC.
    pub fn timestamp(&self) -> String {
        self.at.format("%H:%M:%S").to_string()
    }
}

/// One migration request. Created per request, mutated only by gate
/// transitions, discarded after the terminal status is reported.
#[derive(Debug, Clone)]
pub struct MigrationRun {
    domain: Domain,
    state: MigrationState,
    gates: Vec<GateOutcome>,
    failure: Option<MigrationFailure>,
}

impl MigrationRun {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            state: MigrationState::NotStarted,
            gates: Vec::new(),
            failure: None,
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn gates(&self) -> &[GateOutcome] {
        &self.gates
    }

    pub fn failure(&self) -> Option<&MigrationFailure> {
        self.failure.as_ref()
    }

    /// True only when the run reached `Done`.
    pub fn is_success(&self) -> bool {
        self.state == MigrationState::Done
    }

    /// Human-readable reason for an aborted run.
    pub fn reason(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }

    fn last_gate(&self) -> Option<&GateOutcome> {
        self.gates.last()
    }

    fn record(&mut self, gate: MigrationState, passed: bool, detail: Option<String>) {
        self.gates.push(GateOutcome {
            gate,
            passed,
            detail,
            at: Utc::now(),
        });
    }

    /// Pass `gate`, which must be the next state.
    fn advance(&mut self, gate: MigrationState, detail: Option<String>) {
        debug_assert_eq!(self.state.next(), Some(gate), "out-of-order gate");
        self.record(gate, true, detail);
        self.state = gate;
    }

    /// Non-fatal failure: the gate is recorded as failed but the run still
    /// advances. Only the test gate uses this.
    fn advance_with_warning(&mut self, gate: MigrationState, warning: String) {
        debug_assert!(!gate.can_abort(), "abortable gate passed with warning");
        debug_assert_eq!(self.state.next(), Some(gate), "out-of-order gate");
        self.record(gate, false, Some(warning));
        self.state = gate;
    }

    fn abort(&mut self, gate: MigrationState, failure: MigrationFailure) {
        debug_assert!(gate.can_abort(), "gate {gate} cannot abort");
        self.record(gate, false, Some(failure.to_string()));
        self.failure = Some(failure);
        self.state = MigrationState::Aborted;
    }

    fn complete(&mut self) {
        debug_assert_eq!(self.state, MigrationState::ConsistencyVerified);
        self.state = MigrationState::Done;
    }
}

/// Shared cancellation signal, checked between orchestrator steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notifications for callers that print as the run proceeds.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    CheckingDependency(Domain),
    MigratingModel(ModelRef<'a>),
    RunningTests,
    VerifyingConsistency,
    GateFinished(&'a GateOutcome),
}

/// Runs domain migrations against a domain graph.
///
/// Exactly one domain is processed per call. Concurrent runs across domains
/// are not supported: the dependency check reads external state without any
/// coordination against concurrent writers.
pub struct Orchestrator<'g, S, M, T, C> {
    graph: &'g DomainGraph,
    store: S,
    models: M,
    tests: T,
    consistency: C,
    cancel: CancelFlag,
}

impl<'g, S, M, T, C> Orchestrator<'g, S, M, T, C>
where
    S: MigrationStateStore,
    M: ModelRunner,
    T: TestRunner,
    C: ConsistencyChecker,
{
    pub fn new(graph: &'g DomainGraph, store: S, models: M, tests: T, consistency: C) -> Self {
        Self {
            graph,
            store,
            models,
            tests,
            consistency,
            cancel: CancelFlag::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Migrate one domain. Errors only for an unknown domain; gate failures
    /// are reported through the returned run.
    pub async fn migrate(&self, domain: &str) -> MigrateResult<MigrationRun> {
        self.migrate_with(domain, |_| {}).await
    }

    /// Like [`Orchestrator::migrate`], reporting progress as it goes.
    pub async fn migrate_with<F>(&self, domain: &str, mut on_progress: F) -> MigrateResult<MigrationRun>
    where
        F: FnMut(Progress<'_>),
    {
        let spec = self.graph.lookup(domain)?;
        let mut run = MigrationRun::new(spec.name);
        info!(domain = %spec.name, models = spec.model_count(), "starting domain migration");

        self.run_gates(spec, &mut run, &mut on_progress).await;

        match run.failure() {
            None => info!(domain = %spec.name, "domain migration complete"),
            Some(failure) => warn!(domain = %spec.name, %failure, "domain migration aborted"),
        }
        Ok(run)
    }

    async fn run_gates<F>(&self, spec: &DomainSpec, run: &mut MigrationRun, on_progress: &mut F)
    where
        F: FnMut(Progress<'_>),
    {
        // 1. prerequisites
        if self.cancelled(run, MigrationState::DependencyChecked, on_progress) {
            return;
        }
        for &prerequisite in &spec.depends_on {
            on_progress(Progress::CheckingDependency(prerequisite));
            let failure = match self.store.is_domain_migrated(prerequisite).await {
                Ok(true) => {
                    debug!(domain = %spec.name, %prerequisite, "prerequisite satisfied");
                    continue;
                }
                Ok(false) => MigrationFailure::DependencyNotSatisfied {
                    domain: spec.name,
                    prerequisite,
                },
                Err(err) => MigrationFailure::StateUnavailable {
                    prerequisite,
                    reason: err.to_string(),
                },
            };
            run.abort(MigrationState::DependencyChecked, failure);
            emit_gate(run, on_progress);
            return;
        }
        run.advance(MigrationState::DependencyChecked, None);
        emit_gate(run, on_progress);

        // 2. models, in listed order; first failure stops the domain
        for model in spec.models() {
            if self.cancelled(run, MigrationState::ModelsMigrated, on_progress) {
                return;
            }
            on_progress(Progress::MigratingModel(model));
            if let StepOutcome::Failed(reason) = self.models.run_model(&model).await {
                run.abort(
                    MigrationState::ModelsMigrated,
                    MigrationFailure::ModelMigration {
                        model: model.to_string(),
                        reason,
                    },
                );
                emit_gate(run, on_progress);
                return;
            }
            debug!(%model, "model migrated");
        }
        run.advance(
            MigrationState::ModelsMigrated,
            Some(format!("{} models", spec.model_count())),
        );
        emit_gate(run, on_progress);

        // 3. tests: failures are logged, never fatal
        on_progress(Progress::RunningTests);
        match self.tests.run_tests(spec.name).await {
            StepOutcome::Passed => run.advance(MigrationState::TestsRun, None),
            StepOutcome::Failed(reason) => {
                warn!(domain = %spec.name, %reason, "domain tests failed, continuing");
                run.advance_with_warning(MigrationState::TestsRun, reason);
            }
        }
        emit_gate(run, on_progress);

        // 4. consistency
        if self.cancelled(run, MigrationState::ConsistencyVerified, on_progress) {
            return;
        }
        on_progress(Progress::VerifyingConsistency);
        match self.consistency.verify(spec).await {
            StepOutcome::Passed => {
                run.advance(MigrationState::ConsistencyVerified, None);
                emit_gate(run, on_progress);
                run.complete();
            }
            StepOutcome::Failed(reason) => {
                run.abort(
                    MigrationState::ConsistencyVerified,
                    MigrationFailure::ConsistencyCheck {
                        domain: spec.name,
                        reason,
                    },
                );
                emit_gate(run, on_progress);
            }
        }
    }

    fn cancelled<F>(&self, run: &mut MigrationRun, gate: MigrationState, on_progress: &mut F) -> bool
    where
        F: FnMut(Progress<'_>),
    {
        if !self.cancel.is_cancelled() {
            return false;
        }
        run.abort(gate, MigrationFailure::Cancelled { gate });
        emit_gate(run, on_progress);
        true
    }
}

fn emit_gate<F>(run: &MigrationRun, on_progress: &mut F)
where
    F: FnMut(Progress<'_>),
{
    if let Some(gate) = run.last_gate() {
        on_progress(Progress::GateFinished(gate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeStore {
        migrated: HashSet<Domain>,
    }

    impl MigrationStateStore for FakeStore {
        async fn is_domain_migrated(&self, domain: Domain) -> MigrateResult<bool> {
            Ok(self.migrated.contains(&domain))
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        fail_on: Option<&'static str>,
        calls: RefCell<Vec<String>>,
    }

    impl ModelRunner for FakeRunner {
        async fn run_model(&self, model: &ModelRef<'_>) -> StepOutcome {
            self.calls.borrow_mut().push(model.id.to_string());
            if self.fail_on == Some(model.id) {
                StepOutcome::failed("exit status 1")
            } else {
                StepOutcome::Passed
            }
        }
    }

    struct Fixed(StepOutcome);

    impl TestRunner for Fixed {
        async fn run_tests(&self, _domain: Domain) -> StepOutcome {
            self.0.clone()
        }
    }

    impl ConsistencyChecker for Fixed {
        async fn verify(&self, _spec: &DomainSpec) -> StepOutcome {
            self.0.clone()
        }
    }

    #[test]
    fn test_state_sequence() {
        let mut state = MigrationState::NotStarted;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            seen.push(next);
            state = next;
        }
        assert_eq!(seen.last(), Some(&MigrationState::Done));
        assert_eq!(seen.len(), 6);
        assert!(!MigrationState::TestsRun.can_abort());
    }

    #[tokio::test]
    async fn test_sales_happy_path() {
        let graph = DomainGraph::builtin();
        let runner = FakeRunner::default();
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            &runner,
            Fixed(StepOutcome::Passed),
            Fixed(StepOutcome::Passed),
        );

        let run = orch.migrate("sales").await.unwrap();
        assert!(run.is_success());
        assert_eq!(run.gates().len(), 4);
        assert!(run.gates().iter().all(|g| g.passed));
        assert_eq!(runner.calls.borrow().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_prerequisite_runs_nothing() {
        let graph = DomainGraph::builtin();
        let runner = FakeRunner::default();
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            &runner,
            Fixed(StepOutcome::Passed),
            Fixed(StepOutcome::Passed),
        );

        let run = orch.migrate("production").await.unwrap();
        assert_eq!(run.state(), MigrationState::Aborted);
        assert_eq!(
            run.failure(),
            Some(&MigrationFailure::DependencyNotSatisfied {
                domain: Domain::Production,
                prerequisite: Domain::Sales,
            })
        );
        assert!(runner.calls.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_first_model_failure_skips_rest() {
        let graph = DomainGraph::builtin();
        let runner = FakeRunner {
            fail_on: Some("dws.order_daily"),
            ..Default::default()
        };
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            &runner,
            Fixed(StepOutcome::Passed),
            Fixed(StepOutcome::Passed),
        );

        let run = orch.migrate("sales").await.unwrap();
        assert!(!run.is_success());
        assert_eq!(*runner.calls.borrow(), vec!["dwd.order_fact", "dws.order_daily"]);
        assert_eq!(
            run.reason().unwrap(),
            "model dws.order_daily (SQLMesh) failed: exit status 1"
        );
    }

    #[tokio::test]
    async fn test_failed_tests_do_not_abort() {
        let graph = DomainGraph::builtin();
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            FakeRunner::default(),
            Fixed(StepOutcome::failed("2 of 14 tests failed")),
            Fixed(StepOutcome::Passed),
        );

        let run = orch.migrate("inventory").await.unwrap();
        assert!(run.is_success());
        let tests = &run.gates()[2];
        assert_eq!(tests.gate, MigrationState::TestsRun);
        assert!(!tests.passed);
        assert_eq!(tests.detail.as_deref(), Some("2 of 14 tests failed"));
    }

    #[tokio::test]
    async fn test_consistency_failure_aborts() {
        let graph = DomainGraph::builtin();
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            FakeRunner::default(),
            Fixed(StepOutcome::Passed),
            Fixed(StepOutcome::failed("row counts differ")),
        );

        let run = orch.migrate("purchase").await.unwrap();
        assert_eq!(run.state(), MigrationState::Aborted);
        assert!(matches!(
            run.failure(),
            Some(MigrationFailure::ConsistencyCheck { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let graph = DomainGraph::builtin();
        let cancel = CancelFlag::default();
        cancel.cancel();
        let runner = FakeRunner::default();
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            &runner,
            Fixed(StepOutcome::Passed),
            Fixed(StepOutcome::Passed),
        )
        .with_cancel(cancel);

        let run = orch.migrate("sales").await.unwrap();
        assert_eq!(
            run.failure(),
            Some(&MigrationFailure::Cancelled {
                gate: MigrationState::DependencyChecked
            })
        );
        assert!(runner.calls.borrow().is_empty());
    }

    /// Cancels the shared flag while running the first model.
    struct CancelDuringModel {
        cancel: CancelFlag,
        calls: RefCell<Vec<String>>,
    }

    impl ModelRunner for CancelDuringModel {
        async fn run_model(&self, model: &ModelRef<'_>) -> StepOutcome {
            self.calls.borrow_mut().push(model.id.to_string());
            self.cancel.cancel();
            StepOutcome::Passed
        }
    }

    #[tokio::test]
    async fn test_cancelled_between_models() {
        let graph = DomainGraph::builtin();
        let cancel = CancelFlag::default();
        let runner = CancelDuringModel {
            cancel: cancel.clone(),
            calls: RefCell::default(),
        };
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            &runner,
            Fixed(StepOutcome::Passed),
            Fixed(StepOutcome::Passed),
        )
        .with_cancel(cancel);

        let run = orch.migrate("sales").await.unwrap();
        assert_eq!(run.state(), MigrationState::Aborted);
        assert_eq!(
            run.failure(),
            Some(&MigrationFailure::Cancelled {
                gate: MigrationState::ModelsMigrated
            })
        );
        assert_eq!(*runner.calls.borrow(), vec!["dwd.order_fact"]);
    }

    struct CancelDuringTests(CancelFlag);

    impl TestRunner for CancelDuringTests {
        async fn run_tests(&self, _domain: Domain) -> StepOutcome {
            self.0.cancel();
            StepOutcome::Passed
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_consistency() {
        let graph = DomainGraph::builtin();
        let cancel = CancelFlag::default();
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            FakeRunner::default(),
            CancelDuringTests(cancel.clone()),
            Fixed(StepOutcome::failed("must not run")),
        )
        .with_cancel(cancel);

        let run = orch.migrate("inventory").await.unwrap();
        assert_eq!(
            run.failure(),
            Some(&MigrationFailure::Cancelled {
                gate: MigrationState::ConsistencyVerified
            })
        );
        let gates: Vec<MigrationState> = run.gates().iter().map(|g| g.gate).collect();
        assert_eq!(
            gates,
            vec![
                MigrationState::DependencyChecked,
                MigrationState::ModelsMigrated,
                MigrationState::TestsRun,
                MigrationState::ConsistencyVerified,
            ]
        );
    }

    #[tokio::test]
    async fn test_gate_timestamps_in_order() {
        let graph = DomainGraph::builtin();
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            FakeRunner::default(),
            Fixed(StepOutcome::Passed),
            Fixed(StepOutcome::Passed),
        );

        let run = orch.migrate("purchase").await.unwrap();
        let gates = run.gates();
        assert!(gates.windows(2).all(|w| w[0].at <= w[1].at));
        let stamp = gates[0].timestamp();
        assert_eq!(stamp.len(), 8);
        assert_eq!(stamp.matches(':').count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_domain_is_error() {
        let graph = DomainGraph::builtin();
        let orch = Orchestrator::new(
            &graph,
            FakeStore::default(),
            FakeRunner::default(),
            Fixed(StepOutcome::Passed),
            Fixed(StepOutcome::Passed),
        );
        assert!(orch.migrate("finance").await.is_err());
    }
}
