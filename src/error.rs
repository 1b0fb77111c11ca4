//! Audit error taxonomy.
//!
//! Errors split into two families:
//!
//! - **Isolated** ([`AuditError::ReviewerUnavailable`]): one reviewer's
//!   partition degrades to `OBSERVATION` findings; the run continues.
//! - **Fatal** (everything else): the run aborts and no report is
//!   produced. A compliance report must never look complete when it
//!   is not.

use crate::catalog::SafetyClass;

/// Errors raised by the audit core.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The safety classifier failed after all retries. Clause
    /// applicability depends on the class, so the run cannot proceed.
    #[error("safety classification unresolved after {attempts} attempt(s): {reason}")]
    ClassificationUnresolved { attempts: u32, reason: String },

    /// A reviewer call failed after retries. Isolated: its clause
    /// partition is degraded, the run still completes.
    #[error("reviewer '{reviewer_id}' unavailable: {reason}")]
    ReviewerUnavailable { reviewer_id: String, reason: String },

    /// A clause id was referenced that does not exist in the catalog.
    /// Configuration defect — failing loudly here prevents a reviewer
    /// from silently skipping coverage.
    #[error("unknown clause '{0}' (not in the IEC 62304 catalog)")]
    UnknownClause(String),

    /// Two reviewers were configured to own the same clause. The
    /// clause partition must be disjoint; validated at startup.
    #[error("clause '{clause_id}' is claimed by both '{first}' and '{second}'")]
    ScopeOverlap {
        clause_id: String,
        first: String,
        second: String,
    },

    /// A class-dependent reviewer was invoked before the safety
    /// classification existed. Programming error, never retried.
    #[error("reviewer '{0}' invoked before safety classification was resolved")]
    PrematureReview(String),

    /// Two findings for the same clause with equal severity. With a
    /// disjoint clause partition this cannot happen in a correct
    /// configuration, so it is surfaced instead of merged.
    #[error("conflicting findings for clause '{clause_id}' (equal severity {severity})")]
    ConflictingFindings { clause_id: String, severity: String },

    /// A finding references an evidence unit not present in this
    /// run's store. Fatal aggregation defect, not a warning.
    #[error("finding for clause '{clause_id}' references unknown evidence '{evidence_id}'")]
    DanglingEvidenceReference {
        clause_id: String,
        evidence_id: String,
    },

    /// A clause applicable to the determined class has no finding at
    /// all. Distinguishes "evidence shows conformance" from "reviewer
    /// never looked".
    #[error("coverage gap: clause '{clause_id}' is applicable to class {class} but has no finding")]
    CoverageGap {
        clause_id: String,
        class: SafetyClass,
    },

    /// A finding exists for a clause that does not apply to the
    /// determined class. The report's clause set must be exactly the
    /// applicable set; an extra clause means a scheduling defect.
    #[error("finding for clause '{clause_id}' which is not applicable to class {class}")]
    InapplicableFinding {
        clause_id: String,
        class: SafetyClass,
    },

    /// Model response did not satisfy the review schema (bad enums,
    /// out-of-scope clause, missing coverage, unsupported CONFORMING).
    /// Treated as a reviewer failure, never partially trusted.
    #[error("malformed reviewer response: {0}")]
    MalformedResponse(String),

    /// Transport-level failure talking to the model API.
    #[error("transport error: {0}")]
    Transport(String),

    /// The run was aborted by the user. In-flight reviewer calls are
    /// dropped; store and catalog are left untouched.
    #[error("audit run cancelled")]
    Cancelled,
}

impl AuditError {
    /// Whether this error aborts the whole run (as opposed to
    /// degrading a single reviewer's partition).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ReviewerUnavailable { .. } | Self::Transport(_) | Self::MalformedResponse(_)
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewer_unavailable_is_isolated() {
        let err = AuditError::ReviewerUnavailable {
            reviewer_id: "soup".into(),
            reason: "timeout".into(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn aggregation_defects_are_fatal() {
        let conflict = AuditError::ConflictingFindings {
            clause_id: "5.3".into(),
            severity: "HIGH".into(),
        };
        let dangling = AuditError::DanglingEvidenceReference {
            clause_id: "5.3".into(),
            evidence_id: "abc".into(),
        };
        assert!(conflict.is_fatal());
        assert!(dangling.is_fatal());
    }

    #[test]
    fn error_messages_name_the_clause() {
        let err = AuditError::UnknownClause("99.9".into());
        assert!(err.to_string().contains("99.9"));
    }
}
