//! Lead auditor: merges reviewer findings into one consistent report.
//!
//! The aggregator is deliberately deterministic — identical inputs
//! yield a byte-identical ordered register — and defensive: with a
//! validated disjoint clause partition, duplicates and dangling
//! references cannot occur in a correct configuration, so when they
//! do appear they are surfaced as fatal defects instead of being
//! merged away.

use std::collections::BTreeMap;

use crate::audit::finding::{
    AuditReport, Finding, FindingStatus, Priority, SafetyClassification, Severity, TraceLink,
    TraceabilityMatrix,
};
use crate::catalog::ClauseCatalog;
use crate::error::AuditError;
use crate::evidence::EvidenceStore;

/// Clause whose findings carry requirement-stage evidence.
const REQUIREMENT_CLAUSE: &str = "5.2";
/// Clause whose findings carry design-stage evidence.
const DESIGN_CLAUSE: &str = "5.3";
/// Clause whose findings carry test-stage evidence.
const TEST_CLAUSE: &str = "5.7";
/// The traceability reviewer's clause; a broken chain supersedes its
/// finding with a MAJOR_NC.
const TRACE_CLAUSE: &str = "5.1.1";

/// Merge findings into the final [`AuditReport`].
///
/// Fatal defects: unknown clause ids, dangling evidence references,
/// equal-severity duplicates, and coverage gaps. None of them produce
/// a partial report.
pub fn aggregate(
    classification: &SafetyClassification,
    findings: Vec<Finding>,
    store: &EvidenceStore,
    catalog: &ClauseCatalog,
) -> Result<AuditReport, AuditError> {
    // Referential integrity first: every finding must point at a
    // catalog clause and at evidence present in this run's store.
    for finding in &findings {
        catalog.get(&finding.clause_id)?;
        for evidence_id in &finding.evidence_refs {
            if !store.contains(evidence_id) {
                return Err(AuditError::DanglingEvidenceReference {
                    clause_id: finding.clause_id.clone(),
                    evidence_id: evidence_id.clone(),
                });
            }
        }
    }
    for evidence_id in &classification.evidence_refs {
        if !store.contains(evidence_id) {
            return Err(AuditError::DanglingEvidenceReference {
                clause_id: "4.3".into(),
                evidence_id: evidence_id.clone(),
            });
        }
    }

    let mut by_clause = dedup_by_clause(findings)?;

    // Coverage completeness: the clause set of the report must be
    // exactly the set applicable to the class. A missing clause means
    // a reviewer never looked; an extra one means a scheduling defect.
    let applicable: std::collections::BTreeSet<&str> = catalog
        .applicable_clauses(classification.class)
        .into_iter()
        .collect();
    for clause_id in &applicable {
        if !by_clause.contains_key(*clause_id) {
            return Err(AuditError::CoverageGap {
                clause_id: clause_id.to_string(),
                class: classification.class,
            });
        }
    }
    for clause_id in by_clause.keys() {
        if !applicable.contains(clause_id.as_str()) {
            return Err(AuditError::InapplicableFinding {
                clause_id: clause_id.clone(),
                class: classification.class,
            });
        }
    }

    let matrix = build_traceability(&by_clause, store);
    if !matrix.connected {
        supersede_trace_finding(&mut by_clause, &matrix, classification, catalog)?;
    }

    // Priority is a pure function of (severity, status); recompute so
    // the mapping is uniform regardless of what reviewers proposed.
    let findings: Vec<Finding> = by_clause
        .into_values()
        .map(|mut f| {
            f.priority = Priority::assign(f.severity, f.status);
            f
        })
        .collect();

    let mut register: Vec<Finding> = findings
        .iter()
        .filter(|f| f.status.is_non_conforming())
        .cloned()
        .collect();
    register.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.clause_id.cmp(&b.clause_id))
    });

    tracing::info!(
        class = %classification.class,
        findings = findings.len(),
        non_conformities = register.len(),
        trace_connected = matrix.connected,
        "Audit report assembled"
    );

    Ok(AuditReport {
        classification: classification.clone(),
        findings,
        non_conformity_register: register,
        traceability_matrix: matrix,
    })
}

/// Collapse findings onto their clause. Should be one per clause
/// already (disjoint partition); when it is not, higher severity wins
/// and equal severity is a fatal conflict.
fn dedup_by_clause(findings: Vec<Finding>) -> Result<BTreeMap<String, Finding>, AuditError> {
    let mut by_clause: BTreeMap<String, Finding> = BTreeMap::new();
    for finding in findings {
        match by_clause.get(&finding.clause_id) {
            None => {
                by_clause.insert(finding.clause_id.clone(), finding);
            }
            Some(existing) if existing.severity == finding.severity => {
                return Err(AuditError::ConflictingFindings {
                    clause_id: finding.clause_id,
                    severity: finding.severity.to_string(),
                });
            }
            Some(existing) if existing.severity < finding.severity => {
                tracing::warn!(
                    clause = %finding.clause_id,
                    "Duplicate findings for clause, keeping higher severity"
                );
                by_clause.insert(finding.clause_id.clone(), finding);
            }
            Some(_) => {
                tracing::warn!(
                    clause = %finding.clause_id,
                    "Duplicate findings for clause, keeping higher severity"
                );
            }
        }
    }
    Ok(by_clause)
}

/// Compute the requirements→design→test matrix from the evidence the
/// stage findings actually cited. Two stages link when they share a
/// source document. No requirement-stage evidence means there is
/// nothing to trace (vacuously connected).
fn build_traceability(
    by_clause: &BTreeMap<String, Finding>,
    store: &EvidenceStore,
) -> TraceabilityMatrix {
    let stage_docs = |clause: &str| -> Vec<(String, String)> {
        by_clause
            .get(clause)
            .map(|f| {
                f.evidence_refs
                    .iter()
                    .filter_map(|id| {
                        store
                            .get(id)
                            .map(|u| (id.clone(), u.source_document.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let requirements = stage_docs(REQUIREMENT_CLAUSE);
    let designs = stage_docs(DESIGN_CLAUSE);
    let tests = stage_docs(TEST_CLAUSE);

    let links: Vec<TraceLink> = requirements
        .iter()
        .map(|(req_id, req_doc)| TraceLink {
            requirement: req_id.clone(),
            design: designs
                .iter()
                .filter(|(_, doc)| doc == req_doc)
                .map(|(id, _)| id.clone())
                .collect(),
            test: tests
                .iter()
                .filter(|(_, doc)| doc == req_doc)
                .map(|(id, _)| id.clone())
                .collect(),
        })
        .collect();

    let connected = links.iter().all(TraceLink::is_complete);
    TraceabilityMatrix { links, connected }
}

/// A broken chain supersedes the traceability clause's finding with a
/// MAJOR_NC citing the unlinked requirement units. Recorded, never
/// silently omitted.
fn supersede_trace_finding(
    by_clause: &mut BTreeMap<String, Finding>,
    matrix: &TraceabilityMatrix,
    classification: &SafetyClassification,
    catalog: &ClauseCatalog,
) -> Result<(), AuditError> {
    if !catalog.applicable(TRACE_CLAUSE, classification.class)? {
        return Ok(());
    }

    let broken: Vec<String> = matrix
        .links
        .iter()
        .filter(|l| !l.is_complete())
        .map(|l| l.requirement.clone())
        .collect();

    tracing::warn!(
        broken = broken.len(),
        "Traceability chain broken, superseding clause finding"
    );
    by_clause.insert(
        TRACE_CLAUSE.to_string(),
        Finding {
            clause_id: TRACE_CLAUSE.to_string(),
            reviewer_id: "lead".into(),
            status: FindingStatus::MajorNc,
            severity: Severity::High,
            evidence_refs: broken,
            rationale: "Requirement evidence does not chain through design and test \
                        artifacts; bi-directional traceability per 5.1.1 is not \
                        demonstrated"
                .into(),
            recommended_action: Some(
                "Link each requirement to its design element and verifying test".into(),
            ),
            priority: Priority::assign(Severity::High, FindingStatus::MajorNc),
            reviewer_unavailable: false,
        },
    );
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SafetyClass;
    use crate::evidence::SourceDocument;

    fn classification(class: SafetyClass) -> SafetyClassification {
        SafetyClassification {
            class,
            rationale: "test".into(),
            evidence_refs: vec![],
        }
    }

    fn finding(clause: &str, status: FindingStatus, severity: Severity) -> Finding {
        Finding {
            clause_id: clause.into(),
            reviewer_id: "test".into(),
            status,
            severity,
            evidence_refs: vec![],
            rationale: format!("finding for {clause}"),
            recommended_action: None,
            priority: Priority::assign(severity, status),
            reviewer_unavailable: false,
        }
    }

    /// One finding per clause applicable to the class.
    fn full_coverage(class: SafetyClass) -> Vec<Finding> {
        ClauseCatalog::iec62304()
            .applicable_clauses(class)
            .into_iter()
            .map(|c| finding(c, FindingStatus::Observation, Severity::Low))
            .collect()
    }

    fn empty_store() -> EvidenceStore {
        EvidenceStore::new()
    }

    #[test]
    fn register_contains_only_non_conformities_in_order() {
        let mut findings = full_coverage(SafetyClass::B);
        findings.retain(|f| !["5.1", "5.2", "5.3"].contains(&f.clause_id.as_str()));
        findings.push(finding("5.2", FindingStatus::MinorNc, Severity::Medium));
        findings.push(finding("5.1", FindingStatus::MajorNc, Severity::High));
        findings.push(finding("5.3", FindingStatus::MajorNc, Severity::High));

        let report = aggregate(
            &classification(SafetyClass::B),
            findings,
            &empty_store(),
            &ClauseCatalog::iec62304(),
        )
        .unwrap();

        let clauses: Vec<&str> = report
            .non_conformity_register
            .iter()
            .map(|f| f.clause_id.as_str())
            .collect();
        // Severity descending, clause ascending within severity.
        assert_eq!(clauses, vec!["5.1", "5.3", "5.2"]);
        assert!(report
            .non_conformity_register
            .iter()
            .all(|f| f.status.is_non_conforming()));
    }

    #[test]
    fn aggregation_is_deterministic() {
        let findings = {
            let mut f = full_coverage(SafetyClass::B);
            f[0].status = FindingStatus::MajorNc;
            f[0].severity = Severity::High;
            f
        };
        let catalog = ClauseCatalog::iec62304();
        let store = empty_store();
        let class = classification(SafetyClass::B);

        let a = aggregate(&class, findings.clone(), &store, &catalog).unwrap();
        let b = aggregate(&class, findings, &store, &catalog).unwrap();
        assert_eq!(
            serde_json::to_string(&a.non_conformity_register).unwrap(),
            serde_json::to_string(&b.non_conformity_register).unwrap(),
        );
    }

    #[test]
    fn equal_severity_duplicate_is_a_conflict() {
        let mut findings = full_coverage(SafetyClass::A);
        findings.push(finding("5.1", FindingStatus::MinorNc, Severity::Low));

        let err = aggregate(
            &classification(SafetyClass::A),
            findings,
            &empty_store(),
            &ClauseCatalog::iec62304(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AuditError::ConflictingFindings { clause_id, .. } if clause_id == "5.1"
        ));
    }

    #[test]
    fn higher_severity_wins_duplicates() {
        let mut findings = full_coverage(SafetyClass::A);
        findings.push(finding("5.1", FindingStatus::MajorNc, Severity::High));

        let report = aggregate(
            &classification(SafetyClass::A),
            findings,
            &empty_store(),
            &ClauseCatalog::iec62304(),
        )
        .unwrap();
        let f = report
            .findings
            .iter()
            .find(|f| f.clause_id == "5.1")
            .unwrap();
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.status, FindingStatus::MajorNc);
    }

    #[test]
    fn dangling_evidence_reference_is_fatal() {
        let mut findings = full_coverage(SafetyClass::A);
        findings[0].evidence_refs = vec!["deadbeefdeadbeef".into()];

        let err = aggregate(
            &classification(SafetyClass::A),
            findings,
            &empty_store(),
            &ClauseCatalog::iec62304(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::DanglingEvidenceReference { .. }));
    }

    #[test]
    fn coverage_gap_is_fatal() {
        let mut findings = full_coverage(SafetyClass::B);
        findings.retain(|f| f.clause_id != "5.6");

        let err = aggregate(
            &classification(SafetyClass::B),
            findings,
            &empty_store(),
            &ClauseCatalog::iec62304(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AuditError::CoverageGap { clause_id, .. } if clause_id == "5.6"
        ));
    }

    #[test]
    fn inapplicable_clause_finding_is_fatal() {
        // 5.4 (detailed design) applies to class C only; a finding
        // for it under class B must not ride into the report.
        let mut findings = full_coverage(SafetyClass::B);
        findings.push(finding("5.4", FindingStatus::Observation, Severity::Low));

        let err = aggregate(
            &classification(SafetyClass::B),
            findings,
            &empty_store(),
            &ClauseCatalog::iec62304(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AuditError::InapplicableFinding { clause_id, class }
                if clause_id == "5.4" && class == SafetyClass::B
        ));
    }

    #[test]
    fn unknown_clause_in_findings_is_fatal() {
        let mut findings = full_coverage(SafetyClass::A);
        findings.push(finding("42.0", FindingStatus::Observation, Severity::High));

        let err = aggregate(
            &classification(SafetyClass::A),
            findings,
            &empty_store(),
            &ClauseCatalog::iec62304(),
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::UnknownClause(id) if id == "42.0"));
    }

    #[test]
    fn broken_trace_chain_supersedes_trace_finding() {
        let mut store = EvidenceStore::new();
        let req_units = store.ingest(&SourceDocument {
            name: "srs.md".into(),
            sections: vec![("REQ-1".into(), "the device shall alarm".into())],
        });
        // Design evidence exists but in a different document with no
        // matching test evidence: the chain from REQ-1 is broken.
        store.ingest(&SourceDocument {
            name: "design.md".into(),
            sections: vec![("§2".into(), "architecture".into())],
        });

        let mut findings = full_coverage(SafetyClass::B);
        for f in &mut findings {
            if f.clause_id == "5.2" {
                f.evidence_refs = vec![req_units[0].id.clone()];
                f.status = FindingStatus::Conforming;
            }
        }

        let report = aggregate(
            &classification(SafetyClass::B),
            findings,
            &store,
            &ClauseCatalog::iec62304(),
        )
        .unwrap();

        assert!(!report.traceability_matrix.connected);
        let trace = report
            .findings
            .iter()
            .find(|f| f.clause_id == "5.1.1")
            .unwrap();
        assert_eq!(trace.status, FindingStatus::MajorNc);
        assert_eq!(trace.severity, Severity::High);
        assert_eq!(trace.priority, Priority::P1);
        assert_eq!(trace.reviewer_id, "lead");
        assert_eq!(trace.evidence_refs, vec![req_units[0].id.clone()]);
    }

    #[test]
    fn connected_trace_chain_keeps_reviewer_finding() {
        let mut store = EvidenceStore::new();
        let units = store.ingest(&SourceDocument {
            name: "dossier.md".into(),
            sections: vec![
                ("REQ-1".into(), "requirement: the device shall alarm".into()),
                ("DES-1".into(), "architecture component: alarm module".into()),
                ("TST-1".into(), "system test: alarm fires".into()),
            ],
        });

        let mut findings = full_coverage(SafetyClass::B);
        for f in &mut findings {
            match f.clause_id.as_str() {
                "5.2" => f.evidence_refs = vec![units[0].id.clone()],
                "5.3" => f.evidence_refs = vec![units[1].id.clone()],
                "5.7" => f.evidence_refs = vec![units[2].id.clone()],
                _ => {}
            }
        }

        let report = aggregate(
            &classification(SafetyClass::B),
            findings,
            &store,
            &ClauseCatalog::iec62304(),
        )
        .unwrap();

        assert!(report.traceability_matrix.connected);
        assert_eq!(report.traceability_matrix.links.len(), 1);
        let trace = report
            .findings
            .iter()
            .find(|f| f.clause_id == "5.1.1")
            .unwrap();
        assert_eq!(trace.reviewer_id, "test");
    }

    #[test]
    fn priorities_are_recomputed_uniformly() {
        let mut findings = full_coverage(SafetyClass::A);
        for f in &mut findings {
            if f.clause_id == "5.1" {
                f.status = FindingStatus::MajorNc;
                f.severity = Severity::High;
                // Reviewer proposed the wrong priority.
                f.priority = Priority::P3;
            }
        }

        let report = aggregate(
            &classification(SafetyClass::A),
            findings,
            &empty_store(),
            &ClauseCatalog::iec62304(),
        )
        .unwrap();
        let f = report
            .findings
            .iter()
            .find(|f| f.clause_id == "5.1")
            .unwrap();
        assert_eq!(f.priority, Priority::P1);
    }
}
