//! Reviewer agent contract and clause-partition validation.
//!
//! Every reviewer owns a static, disjoint subset of catalog clauses.
//! The partition is validated once at startup; after that no runtime
//! overlap checks are needed and the aggregator can treat a duplicate
//! clause as a defect rather than guessing a merge heuristic.

use async_trait::async_trait;

use crate::audit::finding::{Finding, SafetyClassification};
use crate::catalog::ClauseCatalog;
use crate::error::AuditError;
use crate::evidence::EvidenceUnit;

// ── Request / outcome ────────────────────────────────────────────

/// Immutable snapshot handed to one reviewer call: the applicable
/// clause subset, the evidence matched to those clauses, and the
/// resolved safety classification (absent only for the classifier).
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    /// Clauses (from the reviewer's scope) applicable to this run's
    /// class, deterministic order.
    pub clause_ids: Vec<String>,
    /// Evidence units matched to those clauses.
    pub evidence: Vec<EvidenceUnit>,
    /// `None` only when invoking the safety classifier.
    pub classification: Option<SafetyClassification>,
}

/// What a reviewer call produced.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    /// Exactly one finding per requested clause.
    pub findings: Vec<Finding>,
    /// Set only by the safety classifier.
    pub classification: Option<SafetyClassification>,
}

// ── Reviewer trait ───────────────────────────────────────────────

/// A specialized audit agent scoped to a fixed clause subset.
///
/// Implementations wrap a model call behind a schema-validated
/// boundary: whatever nondeterminism the model introduces, the
/// outcome either satisfies the schema or the call fails as a whole.
#[async_trait]
pub trait ReviewerAgent: Send + Sync {
    /// Stable reviewer identifier (e.g. "lifecycle", "soup").
    fn id(&self) -> &str;

    /// Clause ids this reviewer exclusively owns.
    fn scope(&self) -> &[String];

    /// Whether this reviewer produces the safety classification and
    /// is allowed to run with `classification: None`.
    fn is_classifier(&self) -> bool {
        false
    }

    /// Review the requested clauses and return validated findings.
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome, AuditError>;
}

// ── Partition validation ─────────────────────────────────────────

/// Validate the static clause partition at configuration time.
///
/// Checks that every scoped clause exists in the catalog and that no
/// clause is owned by two reviewers. Run once before the first audit;
/// both violations are configuration defects, not runtime faults.
pub fn validate_partition(
    reviewers: &[&dyn ReviewerAgent],
    catalog: &ClauseCatalog,
) -> Result<(), AuditError> {
    let mut owners: std::collections::BTreeMap<&str, &str> = std::collections::BTreeMap::new();

    for reviewer in reviewers {
        for clause_id in reviewer.scope() {
            catalog.get(clause_id)?;
            if let Some(first) = owners.insert(clause_id.as_str(), reviewer.id()) {
                return Err(AuditError::ScopeOverlap {
                    clause_id: clause_id.clone(),
                    first: first.to_string(),
                    second: reviewer.id().to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Validate a reviewer outcome against the request it answered.
///
/// Enforced invariants:
/// - every finding addresses a requested clause (in scope, applicable)
/// - every requested clause is addressed exactly once
/// - `CONFORMING` findings cite at least one evidence unit
/// - every cited evidence id exists in the request snapshot
///
/// Any violation rejects the entire response — a model answer is
/// never partially trusted.
pub fn validate_outcome(
    reviewer_id: &str,
    request: &ReviewRequest,
    findings: &[Finding],
) -> Result<(), AuditError> {
    let known_evidence: std::collections::BTreeSet<&str> =
        request.evidence.iter().map(|u| u.id.as_str()).collect();
    let mut seen: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();

    for finding in findings {
        if !request.clause_ids.iter().any(|c| c == &finding.clause_id) {
            return Err(AuditError::MalformedResponse(format!(
                "reviewer '{reviewer_id}' emitted a finding for clause '{}' outside the request",
                finding.clause_id
            )));
        }
        if !seen.insert(finding.clause_id.as_str()) {
            return Err(AuditError::MalformedResponse(format!(
                "reviewer '{reviewer_id}' emitted two findings for clause '{}'",
                finding.clause_id
            )));
        }
        if finding.status == crate::audit::finding::FindingStatus::Conforming
            && finding.evidence_refs.is_empty()
        {
            return Err(AuditError::MalformedResponse(format!(
                "reviewer '{reviewer_id}' claimed CONFORMING for clause '{}' without evidence",
                finding.clause_id
            )));
        }
        for evidence_id in &finding.evidence_refs {
            if !known_evidence.contains(evidence_id.as_str()) {
                return Err(AuditError::MalformedResponse(format!(
                    "reviewer '{reviewer_id}' cited unknown evidence '{evidence_id}' \
                     for clause '{}'",
                    finding.clause_id
                )));
            }
        }
    }

    for clause_id in &request.clause_ids {
        if !seen.contains(clause_id.as_str()) {
            return Err(AuditError::MalformedResponse(format!(
                "reviewer '{reviewer_id}' left clause '{clause_id}' unaddressed"
            )));
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
