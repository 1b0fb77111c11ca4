//! Static IEC 62304 clause catalog.
//!
//! The catalog is the read-only ground truth for which clauses exist,
//! which documentation artifacts each clause demands, and which safety
//! classes it applies to. It is built once at startup and shared
//! read-only by every reviewer; lookups of unknown clause ids fail
//! loudly instead of returning an empty default, so a misconfigured
//! reviewer can never silently skip coverage.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;

// ── Safety class ─────────────────────────────────────────────────

/// IEC 62304:4.3 software safety class.
///
/// Drives which clauses apply and how rigorous the audit is:
/// A = no injury possible, B = non-serious injury, C = death or
/// serious injury.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SafetyClass {
    A,
    B,
    C,
}

impl SafetyClass {
    pub fn label(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }

    /// Parse a single-letter class as emitted by the classifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            _ => None,
        }
    }
}

impl std::fmt::Display for SafetyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Artifact kinds ───────────────────────────────────────────────

/// Kind of documentation artifact a clause expects as evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    HazardAnalysis,
    RiskAssessment,
    DevelopmentPlan,
    RequirementsSpec,
    ArchitectureDesign,
    DetailedDesign,
    UnitVerification,
    IntegrationTestRecord,
    SystemTestRecord,
    ReleaseRecord,
    ProblemReport,
    SoupInventory,
    SoupAnomalyList,
    TraceabilityRecord,
}

impl ArtifactKind {
    /// Keyword profile used to match evidence units against this
    /// artifact. Matching is case-insensitive substring search over
    /// the unit's text and locator.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::HazardAnalysis => &["hazard", "harm", "injury", "safety class"],
            Self::RiskAssessment => &["risk", "14971", "mitigation", "residual"],
            Self::DevelopmentPlan => &["development plan", "lifecycle", "milestone"],
            Self::RequirementsSpec => &["requirement", "srs", "shall"],
            Self::ArchitectureDesign => &["architecture", "architectural", "component", "interface"],
            Self::DetailedDesign => &["detailed design", "unit design", "module design"],
            Self::UnitVerification => &["unit test", "unit verification", "code review"],
            Self::IntegrationTestRecord => &["integration test", "integration"],
            Self::SystemTestRecord => &["system test", "test report", "validation"],
            Self::ReleaseRecord => &["release", "baseline", "configuration item", "version"],
            Self::ProblemReport => &["problem report", "defect", "anomaly report", "capa"],
            Self::SoupInventory => &["soup", "third-party", "off-the-shelf", "dependency"],
            Self::SoupAnomalyList => &["known anomal", "errata", "upstream bug"],
            Self::TraceabilityRecord => &["traceab", "trace matrix", "linkage"],
        }
    }
}

// ── Clause ───────────────────────────────────────────────────────

/// One IEC 62304 clause with its evidence expectations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    /// Clause reference, e.g. "5.3".
    pub clause_id: String,
    /// Clause title as in the standard.
    pub title: String,
    /// Artifacts that MUST exist when the clause applies. Absence is
    /// a major non-conformity.
    pub required_artifacts: BTreeSet<ArtifactKind>,
    /// Artifacts that strengthen conformance but whose absence is
    /// only an observation.
    pub optional_artifacts: BTreeSet<ArtifactKind>,
    /// Safety classes this clause applies to.
    pub applicable_classes: BTreeSet<SafetyClass>,
}

impl Clause {
    fn new(
        clause_id: &str,
        title: &str,
        required: &[ArtifactKind],
        optional: &[ArtifactKind],
        classes: &[SafetyClass],
    ) -> Self {
        Self {
            clause_id: clause_id.into(),
            title: title.into(),
            required_artifacts: required.iter().copied().collect(),
            optional_artifacts: optional.iter().copied().collect(),
            applicable_classes: classes.iter().copied().collect(),
        }
    }

    /// All artifacts this clause can match evidence against.
    pub fn all_artifacts(&self) -> impl Iterator<Item = ArtifactKind> + '_ {
        self.required_artifacts
            .iter()
            .chain(self.optional_artifacts.iter())
            .copied()
    }
}

// ── Catalog ──────────────────────────────────────────────────────

/// Read-only clause lookup keyed by clause id.
#[derive(Debug, Clone)]
pub struct ClauseCatalog {
    clauses: BTreeMap<String, Clause>,
}

impl ClauseCatalog {
    /// Build the IEC 62304 catalog used by the audit team.
    ///
    /// Clause scoping mirrors the auditor roles: 4.3 classification,
    /// 5.1–5.8 lifecycle and release, 5.1.1 traceability, 7.1 risk,
    /// 8.x SOUP, 9.1 problem resolution.
    pub fn iec62304() -> Self {
        use ArtifactKind::*;
        use SafetyClass::*;

        let all = [A, B, C];
        let bc = [B, C];
        let clauses = [
            Clause::new(
                "4.3",
                "Software safety classification",
                &[HazardAnalysis],
                &[RiskAssessment],
                &all,
            ),
            Clause::new(
                "5.1",
                "Software development planning",
                &[DevelopmentPlan],
                &[],
                &all,
            ),
            Clause::new(
                "5.1.1",
                "Requirements-design-test traceability",
                &[TraceabilityRecord],
                &[],
                &bc,
            ),
            Clause::new(
                "5.2",
                "Software requirements analysis",
                &[RequirementsSpec],
                &[],
                &all,
            ),
            Clause::new(
                "5.3",
                "Software architectural design",
                &[ArchitectureDesign],
                &[],
                &bc,
            ),
            Clause::new(
                "5.4",
                "Software detailed design",
                &[DetailedDesign],
                &[],
                &[C],
            ),
            Clause::new(
                "5.5",
                "Software unit implementation and verification",
                &[UnitVerification],
                &[],
                &bc,
            ),
            Clause::new(
                "5.6",
                "Software integration and integration testing",
                &[IntegrationTestRecord],
                &[],
                &bc,
            ),
            Clause::new(
                "5.7",
                "Software system testing",
                &[SystemTestRecord],
                &[],
                &bc,
            ),
            Clause::new(
                "5.8",
                "Software release and configuration baseline",
                &[ReleaseRecord],
                &[],
                &all,
            ),
            Clause::new(
                "7.1",
                "Software risk management",
                &[RiskAssessment],
                &[HazardAnalysis],
                &bc,
            ),
            Clause::new(
                "8.1",
                "SOUP identification and evaluation",
                &[SoupInventory],
                &[],
                &all,
            ),
            Clause::new(
                "8.2",
                "SOUP anomaly and change evaluation",
                &[],
                &[SoupAnomalyList],
                &bc,
            ),
            Clause::new(
                "9.1",
                "Software problem resolution",
                &[ProblemReport],
                &[],
                &all,
            ),
        ];

        Self {
            clauses: clauses
                .into_iter()
                .map(|c| (c.clause_id.clone(), c))
                .collect(),
        }
    }

    /// Look up a clause. Unknown ids are a configuration defect.
    pub fn get(&self, clause_id: &str) -> Result<&Clause, AuditError> {
        self.clauses
            .get(clause_id)
            .ok_or_else(|| AuditError::UnknownClause(clause_id.to_string()))
    }

    /// Whether a clause applies to the given safety class.
    pub fn applicable(&self, clause_id: &str, class: SafetyClass) -> Result<bool, AuditError> {
        Ok(self.get(clause_id)?.applicable_classes.contains(&class))
    }

    /// Mandatory artifacts for a clause.
    pub fn required_artifacts(
        &self,
        clause_id: &str,
    ) -> Result<&BTreeSet<ArtifactKind>, AuditError> {
        Ok(&self.get(clause_id)?.required_artifacts)
    }

    /// All clause ids, in deterministic (lexicographic) order.
    pub fn clause_ids(&self) -> impl Iterator<Item = &str> {
        self.clauses.keys().map(String::as_str)
    }

    /// Clause ids applicable to a class, deterministic order.
    pub fn applicable_clauses(&self, class: SafetyClass) -> Vec<&str> {
        self.clauses
            .values()
            .filter(|c| c.applicable_classes.contains(&class))
            .map(|c| c.clause_id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_clause_is_an_error() {
        let catalog = ClauseCatalog::iec62304();
        assert!(matches!(
            catalog.get("99.9"),
            Err(AuditError::UnknownClause(id)) if id == "99.9"
        ));
    }

    #[test]
    fn detailed_design_applies_to_class_c_only() {
        let catalog = ClauseCatalog::iec62304();
        assert!(!catalog.applicable("5.4", SafetyClass::A).unwrap());
        assert!(!catalog.applicable("5.4", SafetyClass::B).unwrap());
        assert!(catalog.applicable("5.4", SafetyClass::C).unwrap());
    }

    #[test]
    fn architecture_clause_requires_design_artifact() {
        let catalog = ClauseCatalog::iec62304();
        let required = catalog.required_artifacts("5.3").unwrap();
        assert!(required.contains(&ArtifactKind::ArchitectureDesign));
    }

    #[test]
    fn class_a_scope_is_a_strict_subset_of_class_c() {
        let catalog = ClauseCatalog::iec62304();
        let a: std::collections::BTreeSet<_> =
            catalog.applicable_clauses(SafetyClass::A).into_iter().collect();
        let c: std::collections::BTreeSet<_> =
            catalog.applicable_clauses(SafetyClass::C).into_iter().collect();
        assert!(a.is_subset(&c));
        assert!(a.len() < c.len());
    }

    #[test]
    fn clause_ids_are_sorted() {
        let catalog = ClauseCatalog::iec62304();
        let ids: Vec<_> = catalog.clause_ids().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn safety_class_parses_loosely() {
        assert_eq!(SafetyClass::parse(" b "), Some(SafetyClass::B));
        assert_eq!(SafetyClass::parse("C"), Some(SafetyClass::C));
        assert_eq!(SafetyClass::parse("D"), None);
    }
}
