//! Audit finding types and the assembled report.
//!
//! A [`Finding`] is created by exactly one reviewer and never mutated
//! afterwards; corrections supersede rather than edit, preserving the
//! audit trail. The [`AuditReport`] is the sole externally visible
//! artifact of a run.

use serde::{Deserialize, Serialize};

use crate::catalog::SafetyClass;
use crate::evidence::EvidenceId;

// ── Severity ─────────────────────────────────────────────────────

/// Severity of a finding, per ISO 14971 risk levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Status ───────────────────────────────────────────────────────

/// Conformance status of an audited clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    /// Evidence shows the clause requirement is met.
    Conforming,
    /// Requirement partially met; correction needed.
    MinorNc,
    /// Requirement not met; mandatory artifact absent or defective.
    MajorNc,
    /// Informational note, no conformance claim.
    Observation,
}

impl FindingStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Conforming => "CONFORMING",
            Self::MinorNc => "MINOR_NC",
            Self::MajorNc => "MAJOR_NC",
            Self::Observation => "OBSERVATION",
        }
    }

    /// Whether this status lands in the non-conformity register.
    pub fn is_non_conforming(self) -> bool {
        matches!(self, Self::MinorNc | Self::MajorNc)
    }
}

impl std::fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Priority ─────────────────────────────────────────────────────

/// Remediation priority. A pure function of (severity, status) —
/// deterministic and independent of reviewer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
}

impl Priority {
    /// P1 iff (HIGH, MAJOR_NC); P2 for any other non-conformity;
    /// P3 otherwise.
    pub fn assign(severity: Severity, status: FindingStatus) -> Self {
        if severity == Severity::High && status == FindingStatus::MajorNc {
            Self::P1
        } else if status.is_non_conforming() {
            Self::P2
        } else {
            Self::P3
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Finding ──────────────────────────────────────────────────────

/// One reviewer's verdict on one clause. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Catalog clause this finding addresses.
    pub clause_id: String,
    /// Reviewer that produced it.
    pub reviewer_id: String,
    pub status: FindingStatus,
    pub severity: Severity,
    /// Evidence units backing the verdict, in citation order.
    pub evidence_refs: Vec<EvidenceId>,
    /// Why the reviewer reached this verdict.
    pub rationale: String,
    /// Actionable remediation, if any.
    pub recommended_action: Option<String>,
    pub priority: Priority,
    /// Set when this finding was synthesized because the owning
    /// reviewer failed; the clause was not actually examined.
    #[serde(default)]
    pub reviewer_unavailable: bool,
}

impl Finding {
    /// Placeholder finding for a clause whose reviewer failed.
    /// Status is OBSERVATION: no conformance claim is made for a
    /// clause nobody examined.
    pub fn unavailable(clause_id: &str, reviewer_id: &str, reason: &str) -> Self {
        Self {
            clause_id: clause_id.into(),
            reviewer_id: reviewer_id.into(),
            status: FindingStatus::Observation,
            severity: Severity::Medium,
            evidence_refs: Vec::new(),
            rationale: format!("Reviewer unavailable ({reason}); clause not examined this run"),
            recommended_action: Some("Re-run the audit to obtain coverage for this clause".into()),
            priority: Priority::assign(Severity::Medium, FindingStatus::Observation),
            reviewer_unavailable: true,
        }
    }
}

// ── Safety classification ────────────────────────────────────────

/// Output of the safety classifier; produced once per run before any
/// class-dependent reviewer is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyClassification {
    pub class: SafetyClass,
    pub rationale: String,
    pub evidence_refs: Vec<EvidenceId>,
}

// ── Traceability matrix ──────────────────────────────────────────

/// One requirement's linkage through design and test evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceLink {
    /// Requirement-stage evidence unit.
    pub requirement: EvidenceId,
    /// Design-stage units from the same source document.
    pub design: Vec<EvidenceId>,
    /// Test-stage units from the same source document.
    pub test: Vec<EvidenceId>,
}

impl TraceLink {
    /// A link is complete when the requirement reaches both design
    /// and test evidence.
    pub fn is_complete(&self) -> bool {
        !self.design.is_empty() && !self.test.is_empty()
    }
}

/// Requirements→design→test linkage computed by the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceabilityMatrix {
    pub links: Vec<TraceLink>,
    /// Whether every requirement chains through to test evidence.
    pub connected: bool,
}

// ── Audit report ─────────────────────────────────────────────────

/// The assembled result of one audit run. Immutable; built once by
/// the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub classification: SafetyClassification,
    /// All findings, ordered by clause id.
    pub findings: Vec<Finding>,
    /// Findings with status MINOR_NC or MAJOR_NC, ordered by severity
    /// descending then clause id ascending.
    pub non_conformity_register: Vec<Finding>,
    pub traceability_matrix: TraceabilityMatrix,
}

impl AuditReport {
    /// Count findings with a given status.
    pub fn count_by_status(&self, status: FindingStatus) -> usize {
        self.findings.iter().filter(|f| f.status == status).count()
    }

    /// Whether any reviewer partition was degraded this run.
    pub fn has_degraded_coverage(&self) -> bool {
        self.findings.iter().any(|f| f.reviewer_unavailable)
    }

    /// Render the report as markdown for terminal display.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("## IEC 62304 Audit Report\n\n");
        md.push_str(&format!(
            "**Safety Class**: {} — {}\n\n",
            self.classification.class, self.classification.rationale
        ));

        if self.has_degraded_coverage() {
            md.push_str(
                "> ⚠ Partial audit: one or more reviewers were unavailable. \
                 Clauses marked `reviewer unavailable` were not examined.\n\n",
            );
        }

        md.push_str("| Clause | Status | Severity | Priority | Rationale |\n");
        md.push_str("|--------|--------|----------|----------|----------|\n");
        for f in &self.findings {
            let note = if f.reviewer_unavailable {
                " *(reviewer unavailable)*"
            } else {
                ""
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} | {}{} |\n",
                f.clause_id,
                f.status,
                f.severity,
                f.priority,
                f.rationale.replace('\n', " ").replace('|', "\\|"),
                note,
            ));
        }

        md.push_str("\n### Non-Conformity Register\n\n");
        if self.non_conformity_register.is_empty() {
            md.push_str("No non-conformities recorded.\n");
        } else {
            for (i, f) in self.non_conformity_register.iter().enumerate() {
                md.push_str(&format!(
                    "{}. **NC-{:03}** clause {} [{} / {}] — {}\n",
                    i + 1,
                    i + 1,
                    f.clause_id,
                    f.status,
                    f.severity,
                    f.rationale.replace('\n', " "),
                ));
                if let Some(ref action) = f.recommended_action {
                    md.push_str(&format!("   - Action: {action}\n"));
                }
            }
        }

        md.push_str("\n### Traceability\n\n");
        if self.traceability_matrix.links.is_empty() {
            md.push_str("No requirement-stage evidence to trace.\n");
        } else {
            md.push_str(&format!(
                "{} requirement unit(s), chain {}.\n",
                self.traceability_matrix.links.len(),
                if self.traceability_matrix.connected {
                    "connected"
                } else {
                    "BROKEN"
                },
            ));
            for link in &self.traceability_matrix.links {
                md.push_str(&format!(
                    "- `{}` → design: {} → test: {}\n",
                    link.requirement,
                    if link.design.is_empty() { "∅".into() } else { link.design.join(", ") },
                    if link.test.is_empty() { "∅".into() } else { link.test.join(", ") },
                ));
            }
        }

        md
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_mapping_table() {
        use FindingStatus::*;
        use Severity::*;
        assert_eq!(Priority::assign(High, MajorNc), Priority::P1);
        assert_eq!(Priority::assign(Medium, MajorNc), Priority::P2);
        assert_eq!(Priority::assign(High, MinorNc), Priority::P2);
        assert_eq!(Priority::assign(Low, MinorNc), Priority::P2);
        assert_eq!(Priority::assign(High, Conforming), Priority::P3);
        assert_eq!(Priority::assign(Low, Observation), Priority::P3);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn non_conforming_statuses() {
        assert!(FindingStatus::MajorNc.is_non_conforming());
        assert!(FindingStatus::MinorNc.is_non_conforming());
        assert!(!FindingStatus::Conforming.is_non_conforming());
        assert!(!FindingStatus::Observation.is_non_conforming());
    }

    #[test]
    fn unavailable_finding_makes_no_conformance_claim() {
        let f = Finding::unavailable("8.1", "soup", "timeout");
        assert_eq!(f.status, FindingStatus::Observation);
        assert!(f.reviewer_unavailable);
        assert!(f.evidence_refs.is_empty());
        assert!(f.rationale.contains("timeout"));
    }

    #[test]
    fn report_markdown_flags_partial_audits() {
        let report = AuditReport {
            classification: SafetyClassification {
                class: crate::catalog::SafetyClass::B,
                rationale: "Non-serious injury possible".into(),
                evidence_refs: vec![],
            },
            findings: vec![Finding::unavailable("8.1", "soup", "timeout")],
            non_conformity_register: vec![],
            traceability_matrix: TraceabilityMatrix::default(),
        };
        let md = report.to_markdown();
        assert!(md.contains("Partial audit"));
        assert!(md.contains("reviewer unavailable"));
    }

    #[test]
    fn report_markdown_escapes_table_pipes() {
        // Model-written rationales can contain pipes; the findings
        // table must survive them.
        let mut finding = Finding::unavailable("8.1", "soup", "timeout");
        finding.rationale = "inventory lists A | B | C".into();
        let report = AuditReport {
            classification: SafetyClassification {
                class: crate::catalog::SafetyClass::B,
                rationale: "Non-serious injury possible".into(),
                evidence_refs: vec![],
            },
            findings: vec![finding],
            non_conformity_register: vec![],
            traceability_matrix: TraceabilityMatrix::default(),
        };
        let md = report.to_markdown();
        assert!(md.contains("inventory lists A \\| B \\| C"));
    }

    #[test]
    fn status_serde_uses_snake_case() {
        let json = serde_json::to_string(&FindingStatus::MajorNc).unwrap();
        assert_eq!(json, "\"major_nc\"");
        let back: FindingStatus = serde_json::from_str("\"minor_nc\"").unwrap();
        assert_eq!(back, FindingStatus::MinorNc);
    }
}
