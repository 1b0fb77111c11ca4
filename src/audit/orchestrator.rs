//! Audit run orchestration.
//!
//! State machine over one run:
//!
//! ```text
//! PENDING_CLASSIFICATION ─▸ CLASSIFIED ─▸ REVIEWING ─▸ AGGREGATING ─▸ DONE
//!          │                                  │              │
//!          └──────────────────────────────────┴──────────────┴─▸ FAILED
//! ```
//!
//! The classifier runs first and alone: clause applicability depends
//! on the safety class, so nothing else may start until it resolves.
//! The remaining reviewers own disjoint clause partitions and run
//! concurrently under a semaphore slot limit; each failure degrades
//! only its own partition. The external model API is the sole shared
//! resource — every task otherwise works on immutable snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::audit::aggregator::aggregate;
use crate::audit::finding::{AuditReport, Finding, SafetyClassification};
use crate::audit::reviewer::{validate_partition, ReviewOutcome, ReviewRequest, ReviewerAgent};
use crate::catalog::ClauseCatalog;
use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::evidence::{EvidenceStore, EvidenceUnit};

// ── Run state ────────────────────────────────────────────────────

/// Lifecycle of one audit run, for logging and introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    PendingClassification,
    Classified,
    Reviewing,
    Aggregating,
    Done,
    Failed,
}

impl RunState {
    pub fn label(self) -> &'static str {
        match self {
            Self::PendingClassification => "PENDING_CLASSIFICATION",
            Self::Classified => "CLASSIFIED",
            Self::Reviewing => "REVIEWING",
            Self::Aggregating => "AGGREGATING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────

/// Schedules the audit team over one run at a time.
///
/// Holds the static team and configuration; all per-run state lives
/// in the `run` call so the orchestrator can be reused across runs
/// without carry-over.
pub struct Orchestrator {
    config: AuditConfig,
    catalog: Arc<ClauseCatalog>,
    classifier: Arc<dyn ReviewerAgent>,
    reviewers: Vec<Arc<dyn ReviewerAgent>>,
}

impl Orchestrator {
    /// Assemble an orchestrator, validating the clause partition.
    ///
    /// Fails with [`AuditError::ScopeOverlap`] or
    /// [`AuditError::UnknownClause`] on a misconfigured team — at
    /// startup, not mid-run.
    pub fn new(
        config: AuditConfig,
        catalog: Arc<ClauseCatalog>,
        classifier: Arc<dyn ReviewerAgent>,
        reviewers: Vec<Arc<dyn ReviewerAgent>>,
    ) -> Result<Self, AuditError> {
        let mut all: Vec<&dyn ReviewerAgent> = vec![classifier.as_ref()];
        all.extend(reviewers.iter().map(|r| r.as_ref()));
        validate_partition(&all, &catalog)?;
        Ok(Self {
            config,
            catalog,
            classifier,
            reviewers,
        })
    }

    /// Execute one audit run over an immutable evidence snapshot.
    ///
    /// The store and catalog are read-only here and remain valid for
    /// further runs whatever the outcome.
    pub async fn run(
        &self,
        store: &EvidenceStore,
        cancel: CancellationToken,
    ) -> Result<AuditReport, AuditError> {
        let run_id = uuid::Uuid::new_v4();
        self.transition(run_id, RunState::PendingClassification);

        let classification = match self.classify(store, &cancel).await {
            Ok(c) => c,
            Err(e) => {
                self.transition(run_id, RunState::Failed);
                return Err(e);
            }
        };
        self.transition(run_id, RunState::Classified);
        tracing::info!(
            run_id = %run_id,
            class = %classification.0.class,
            "Safety classification resolved"
        );

        self.transition(run_id, RunState::Reviewing);
        let (classification, mut findings) = classification;
        match self.review_all(store, &classification, &cancel).await {
            Ok(reviewed) => findings.extend(reviewed),
            Err(e) => {
                self.transition(run_id, RunState::Failed);
                return Err(e);
            }
        }

        self.transition(run_id, RunState::Aggregating);
        match aggregate(&classification, findings, store, &self.catalog) {
            Ok(report) => {
                self.transition(run_id, RunState::Done);
                Ok(report)
            }
            Err(e) => {
                self.transition(run_id, RunState::Failed);
                Err(e)
            }
        }
    }

    fn transition(&self, run_id: uuid::Uuid, state: RunState) {
        tracing::info!(run_id = %run_id, state = state.label(), "Audit run state");
    }

    /// Phase 1: resolve the safety classification, retrying the
    /// classifier within the configured bounds. Without a class the
    /// run cannot proceed.
    async fn classify(
        &self,
        store: &EvidenceStore,
        cancel: &CancellationToken,
    ) -> Result<(SafetyClassification, Vec<Finding>), AuditError> {
        // The classifier sees the full evidence snapshot: class
        // determination may draw on any document, not just hazard
        // artifacts.
        let request = ReviewRequest {
            clause_ids: self.classifier.scope().to_vec(),
            evidence: store.units().cloned().collect(),
            classification: None,
        };

        let outcome = Self::call_with_retry(
            &self.config,
            self.classifier.clone(),
            request,
            cancel.clone(),
        )
        .await
        .map_err(|e| match e {
            // Cancellation and configuration defects pass through;
            // only call failures become ClassificationUnresolved.
            e if e.is_fatal() => e,
            other => AuditError::ClassificationUnresolved {
                attempts: self.config.max_retries + 1,
                reason: other.to_string(),
            },
        })?;

        let classification = outcome.classification.ok_or_else(|| {
            AuditError::ClassificationUnresolved {
                attempts: self.config.max_retries + 1,
                reason: "classifier returned no safety classification".into(),
            }
        })?;
        Ok((classification, outcome.findings))
    }

    /// Phase 2: dispatch the class-dependent reviewers concurrently.
    /// Each reviewer failure degrades its own partition to
    /// OBSERVATION findings; only cancellation or a programming error
    /// aborts the phase.
    async fn review_all(
        &self,
        store: &EvidenceStore,
        classification: &SafetyClassification,
        cancel: &CancellationToken,
    ) -> Result<Vec<Finding>, AuditError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_reviews));
        let mut tasks: JoinSet<Result<Vec<Finding>, AuditError>> = JoinSet::new();

        for reviewer in &self.reviewers {
            let subset = self.applicable_subset(reviewer.as_ref(), classification)?;
            if subset.is_empty() {
                tracing::debug!(
                    reviewer = reviewer.id(),
                    class = %classification.class,
                    "No applicable clauses for this class, skipping reviewer"
                );
                continue;
            }

            let request = ReviewRequest {
                clause_ids: subset.clone(),
                evidence: self.evidence_for(store, &subset)?,
                classification: Some(classification.clone()),
            };

            let reviewer = reviewer.clone();
            let config = self.config.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| AuditError::Cancelled)?;
                let reviewer_id = reviewer.id().to_string();
                match Self::call_with_retry(&config, reviewer, request, cancel).await {
                    Ok(outcome) => Ok(outcome.findings),
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        // Isolated failure: the partition is degraded,
                        // the run continues and says so explicitly.
                        tracing::warn!(
                            reviewer = %reviewer_id,
                            error = %e,
                            "Reviewer unavailable, degrading its clause partition"
                        );
                        Ok(subset
                            .iter()
                            .map(|clause| {
                                Finding::unavailable(clause, &reviewer_id, &e.to_string())
                            })
                            .collect())
                    }
                }
            });
        }

        let mut findings = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let task_findings = joined
                .map_err(|e| AuditError::Transport(format!("reviewer task failed: {e}")))??;
            findings.extend(task_findings);
        }
        Ok(findings)
    }

    /// One reviewer call with per-attempt timeout and exponential
    /// backoff. Fatal errors (cancellation, programming errors) are
    /// never retried.
    async fn call_with_retry(
        config: &AuditConfig,
        reviewer: Arc<dyn ReviewerAgent>,
        request: ReviewRequest,
        cancel: CancellationToken,
    ) -> Result<ReviewOutcome, AuditError> {
        let timeout = std::time::Duration::from_secs(config.call_timeout_secs);
        let mut last_error = AuditError::Transport("no attempt made".into());

        for attempt in 0..=config.max_retries {
            if cancel.is_cancelled() {
                return Err(AuditError::Cancelled);
            }
            if attempt > 0 {
                tokio::time::sleep(config.backoff_delay(attempt - 1)).await;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(AuditError::Cancelled),
                result = tokio::time::timeout(timeout, reviewer.review(&request)) => result,
            };

            match result {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(e)) if e.is_fatal() => return Err(e),
                Ok(Err(e)) => {
                    tracing::warn!(
                        reviewer = reviewer.id(),
                        attempt,
                        error = %e,
                        "Reviewer call failed"
                    );
                    last_error = e;
                }
                Err(_) => {
                    tracing::warn!(
                        reviewer = reviewer.id(),
                        attempt,
                        timeout_secs = config.call_timeout_secs,
                        "Reviewer call timed out"
                    );
                    last_error = AuditError::Transport(format!(
                        "call timed out after {}s",
                        config.call_timeout_secs
                    ));
                }
            }
        }

        Err(AuditError::ReviewerUnavailable {
            reviewer_id: reviewer.id().to_string(),
            reason: last_error.to_string(),
        })
    }

    /// The subset of a reviewer's scope applicable to the class.
    fn applicable_subset(
        &self,
        reviewer: &dyn ReviewerAgent,
        classification: &SafetyClassification,
    ) -> Result<Vec<String>, AuditError> {
        let mut subset = Vec::new();
        for clause_id in reviewer.scope() {
            if self.catalog.applicable(clause_id, classification.class)? {
                subset.push(clause_id.clone());
            }
        }
        Ok(subset)
    }

    /// Evidence snapshot for a clause subset: the union of each
    /// clause's artifact-matched units, deduplicated, deterministic
    /// order.
    fn evidence_for(
        &self,
        store: &EvidenceStore,
        subset: &[String],
    ) -> Result<Vec<EvidenceUnit>, AuditError> {
        let mut merged: BTreeMap<String, EvidenceUnit> = BTreeMap::new();
        for clause_id in subset {
            let clause = self.catalog.get(clause_id)?;
            for unit in store.query_clause(clause) {
                merged.entry(unit.id.clone()).or_insert_with(|| unit.clone());
            }
        }
        Ok(merged.into_values().collect())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::finding::{FindingStatus, Priority, Severity};
    use crate::catalog::SafetyClass;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Classifier stub that fails a fixed number of times before
    /// succeeding with class B.
    struct FlakyClassifier {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReviewerAgent for FlakyClassifier {
        fn id(&self) -> &str {
            "classifier"
        }
        fn scope(&self) -> &[String] {
            static SCOPE: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
            SCOPE.get_or_init(|| vec!["4.3".into()])
        }
        fn is_classifier(&self) -> bool {
            true
        }
        async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome, AuditError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(AuditError::Transport("connection reset".into()));
            }
            Ok(ReviewOutcome {
                findings: vec![Finding {
                    clause_id: "4.3".into(),
                    reviewer_id: "classifier".into(),
                    status: FindingStatus::Conforming,
                    severity: Severity::Low,
                    evidence_refs: request
                        .evidence
                        .first()
                        .map(|u| vec![u.id.clone()])
                        .unwrap_or_default(),
                    rationale: "hazard analysis present".into(),
                    recommended_action: None,
                    priority: Priority::P3,
                    reviewer_unavailable: false,
                }],
                classification: Some(SafetyClassification {
                    class: SafetyClass::B,
                    rationale: "non-serious injury possible".into(),
                    evidence_refs: vec![],
                }),
            })
        }
    }

    /// Reviewer stub that emits a fixed verdict for every requested
    /// clause, or always fails.
    struct CannedReviewer {
        id: String,
        scope: Vec<String>,
        fail: bool,
    }

    impl CannedReviewer {
        fn new(id: &str, scope: &[&str], fail: bool) -> Arc<dyn ReviewerAgent> {
            Arc::new(Self {
                id: id.into(),
                scope: scope.iter().map(|s| s.to_string()).collect(),
                fail,
            })
        }
    }

    #[async_trait]
    impl ReviewerAgent for CannedReviewer {
        fn id(&self) -> &str {
            &self.id
        }
        fn scope(&self) -> &[String] {
            &self.scope
        }
        async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome, AuditError> {
            if request.classification.is_none() {
                return Err(AuditError::PrematureReview(self.id.clone()));
            }
            if self.fail {
                return Err(AuditError::Transport("simulated outage".into()));
            }
            Ok(ReviewOutcome {
                findings: request
                    .clause_ids
                    .iter()
                    .map(|clause| Finding {
                        clause_id: clause.clone(),
                        reviewer_id: self.id.clone(),
                        status: FindingStatus::MinorNc,
                        severity: Severity::Medium,
                        evidence_refs: vec![],
                        rationale: format!("gap in {clause}"),
                        recommended_action: None,
                        priority: Priority::P2,
                        reviewer_unavailable: false,
                    })
                    .collect(),
                classification: None,
            })
        }
    }

    fn full_team(soup_fails: bool) -> (Arc<dyn ReviewerAgent>, Vec<Arc<dyn ReviewerAgent>>) {
        let classifier: Arc<dyn ReviewerAgent> = Arc::new(FlakyClassifier {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        });
        let reviewers = vec![
            CannedReviewer::new(
                "lifecycle",
                &["5.1", "5.2", "5.3", "5.4", "5.5", "5.6", "5.7"],
                false,
            ),
            CannedReviewer::new("rcp", &["5.8", "7.1", "9.1"], false),
            CannedReviewer::new("soup", &["8.1", "8.2"], soup_fails),
            CannedReviewer::new("trace", &["5.1.1"], false),
        ];
        (classifier, reviewers)
    }

    fn fast_config() -> AuditConfig {
        AuditConfig {
            max_retries: 1,
            backoff_base_ms: 1,
            call_timeout_secs: 5,
            ..AuditConfig::default()
        }
    }

    fn store_with_hazards() -> EvidenceStore {
        let mut store = EvidenceStore::new();
        store.ingest(&crate::evidence::SourceDocument {
            name: "hazards.md".into(),
            sections: vec![("§1".into(), "hazard analysis: risk of minor injury".into())],
        });
        store
    }

    #[tokio::test]
    async fn full_run_reaches_done() {
        let (classifier, reviewers) = full_team(false);
        let orch = Orchestrator::new(
            fast_config(),
            Arc::new(ClauseCatalog::iec62304()),
            classifier,
            reviewers,
        )
        .unwrap();

        let report = orch
            .run(&store_with_hazards(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.classification.class, SafetyClass::B);
        // Every clause applicable to class B appears exactly once.
        let catalog = ClauseCatalog::iec62304();
        let applicable = catalog.applicable_clauses(SafetyClass::B);
        assert_eq!(report.findings.len(), applicable.len());
    }

    #[tokio::test]
    async fn classifier_retries_then_succeeds() {
        let classifier: Arc<dyn ReviewerAgent> = Arc::new(FlakyClassifier {
            failures_before_success: 1,
            calls: AtomicU32::new(0),
        });
        let (_, reviewers) = full_team(false);
        let orch = Orchestrator::new(
            fast_config(),
            Arc::new(ClauseCatalog::iec62304()),
            classifier,
            reviewers,
        )
        .unwrap();

        let report = orch
            .run(&store_with_hazards(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.classification.class, SafetyClass::B);
    }

    #[tokio::test]
    async fn exhausted_classifier_fails_the_run() {
        let classifier: Arc<dyn ReviewerAgent> = Arc::new(FlakyClassifier {
            failures_before_success: 99,
            calls: AtomicU32::new(0),
        });
        let (_, reviewers) = full_team(false);
        let orch = Orchestrator::new(
            fast_config(),
            Arc::new(ClauseCatalog::iec62304()),
            classifier,
            reviewers,
        )
        .unwrap();

        let err = orch
            .run(&store_with_hazards(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ClassificationUnresolved { .. }));
    }

    #[tokio::test]
    async fn failed_reviewer_degrades_its_partition_only() {
        let (classifier, reviewers) = full_team(true);
        let orch = Orchestrator::new(
            fast_config(),
            Arc::new(ClauseCatalog::iec62304()),
            classifier,
            reviewers,
        )
        .unwrap();

        let report = orch
            .run(&store_with_hazards(), CancellationToken::new())
            .await
            .unwrap();

        // SOUP clauses are degraded observations, run still done.
        for clause in ["8.1", "8.2"] {
            let f = report
                .findings
                .iter()
                .find(|f| f.clause_id == clause)
                .unwrap();
            assert_eq!(f.status, FindingStatus::Observation);
            assert!(f.reviewer_unavailable);
        }
        // Other partitions untouched.
        let lifecycle = report
            .findings
            .iter()
            .find(|f| f.clause_id == "5.1")
            .unwrap();
        assert!(!lifecycle.reviewer_unavailable);
        assert!(report.has_degraded_coverage());
    }

    #[tokio::test]
    async fn cancellation_aborts_the_run() {
        let (classifier, reviewers) = full_team(false);
        let orch = Orchestrator::new(
            fast_config(),
            Arc::new(ClauseCatalog::iec62304()),
            classifier,
            reviewers,
        )
        .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch
            .run(&store_with_hazards(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Cancelled));
    }

    /// Reviewer stub that never answers within any call budget.
    struct StalledReviewer {
        scope: Vec<String>,
    }

    #[async_trait]
    impl ReviewerAgent for StalledReviewer {
        fn id(&self) -> &str {
            "soup"
        }
        fn scope(&self) -> &[String] {
            &self.scope
        }
        async fn review(&self, _request: &ReviewRequest) -> Result<ReviewOutcome, AuditError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Err(AuditError::Transport("unreachable".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_reviewer_degrades_its_partition() {
        let classifier: Arc<dyn ReviewerAgent> = Arc::new(FlakyClassifier {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        });
        let reviewers: Vec<Arc<dyn ReviewerAgent>> = vec![
            CannedReviewer::new(
                "lifecycle",
                &["5.1", "5.1.1", "5.2", "5.3", "5.4", "5.5", "5.6", "5.7"],
                false,
            ),
            CannedReviewer::new("rcp", &["5.8", "7.1", "9.1"], false),
            Arc::new(StalledReviewer {
                scope: vec!["8.1".into(), "8.2".into()],
            }),
        ];
        let orch = Orchestrator::new(
            fast_config(),
            Arc::new(ClauseCatalog::iec62304()),
            classifier,
            reviewers,
        )
        .unwrap();

        let report = orch
            .run(&store_with_hazards(), CancellationToken::new())
            .await
            .unwrap();
        let soup = report
            .findings
            .iter()
            .find(|f| f.clause_id == "8.1")
            .unwrap();
        assert_eq!(soup.status, FindingStatus::Observation);
        assert!(soup.reviewer_unavailable);
        assert!(report.has_degraded_coverage());
    }

    /// Transport that answers by audit role, for end-to-end runs over
    /// the real team. Roles that should decide locally get an error so
    /// an unexpected model call shows up in the report.
    struct RoutingTransport;

    #[async_trait]
    impl crate::audit::agents::LlmTransport for RoutingTransport {
        async fn complete(&self, system: &str, _prompt: &str) -> Result<String, AuditError> {
            let hazard_id = EvidenceUnit::derive_id("hazards.md", "§1");
            if system.contains("Safety Classification Auditor") {
                return Ok(format!(
                    "{{\"safety_class\": \"B\", \"class_rationale\": \"minor injury\", \
                     \"class_evidence\": [\"{hazard_id}\"], \"findings\": [{{\
                     \"clause\": \"4.3\", \"status\": \"conforming\", \"severity\": \"low\", \
                     \"evidence\": [\"{hazard_id}\"], \"rationale\": \"hazard analysis on file\", \
                     \"recommendation\": null}}]}}"
                ));
            }
            if system.contains("Risk/Config/Problem Auditor") {
                return Ok(format!(
                    "{{\"findings\": [{{\"clause\": \"7.1\", \"status\": \"conforming\", \
                     \"severity\": \"low\", \"evidence\": [\"{hazard_id}\"], \
                     \"rationale\": \"risk analysis covers the hazard\", \
                     \"recommendation\": null}}]}}"
                ));
            }
            Err(AuditError::Transport("unexpected model call".into()))
        }
    }

    #[tokio::test]
    async fn end_to_end_with_llm_team() {
        let catalog = Arc::new(ClauseCatalog::iec62304());
        let (classifier, reviewers) = crate::audit::agents::LlmReviewer::team(
            catalog.clone(),
            Arc::new(RoutingTransport),
        );
        let orch = Orchestrator::new(fast_config(), catalog.clone(), classifier, reviewers).unwrap();

        let report = orch
            .run(&store_with_hazards(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.classification.class, SafetyClass::B);
        assert_eq!(
            report.findings.len(),
            catalog.applicable_clauses(SafetyClass::B).len()
        );
        // Only 4.3 and 7.1 had matching evidence; everything else was
        // decided locally, with no model round-trip.
        for clause in ["4.3", "7.1"] {
            let f = report.findings.iter().find(|f| f.clause_id == clause).unwrap();
            assert_eq!(f.status, FindingStatus::Conforming);
        }
        let soup = report
            .findings
            .iter()
            .find(|f| f.clause_id == "8.1")
            .unwrap();
        assert_eq!(soup.status, FindingStatus::MajorNc);
        assert_eq!(soup.priority, Priority::P1);
        assert!(!report.has_degraded_coverage());
        assert!(report
            .non_conformity_register
            .iter()
            .any(|f| f.clause_id == "8.1"));
    }

    #[tokio::test]
    async fn overlapping_team_is_rejected_at_construction() {
        let classifier: Arc<dyn ReviewerAgent> = Arc::new(FlakyClassifier {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        });
        let reviewers = vec![
            CannedReviewer::new("lifecycle", &["5.1", "5.3"], false),
            CannedReviewer::new("trace", &["5.3"], false),
        ];
        let err = Orchestrator::new(
            fast_config(),
            Arc::new(ClauseCatalog::iec62304()),
            classifier,
            reviewers,
        )
        .err()
        .unwrap();
        assert!(matches!(err, AuditError::ScopeOverlap { .. }));
    }
}
