//! Concrete reviewer agents backed by a model transport.
//!
//! Each agent pairs an audit role (clause scope + system prompt) with
//! a shared [`LlmTransport`]. The model sees only the clause subset
//! and matched evidence; its JSON answer is schema-validated before a
//! single finding is trusted. Clauses with no matching evidence never
//! reach the model at all — their verdict is decided locally by the
//! evidence-matching policy, which keeps the absent-artifact path
//! deterministic.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::audit::finding::{
    Finding, FindingStatus, Priority, SafetyClassification, Severity,
};
use crate::audit::reviewer::{
    validate_outcome, ReviewOutcome, ReviewRequest, ReviewerAgent,
};
use crate::catalog::{Clause, ClauseCatalog, SafetyClass};
use crate::error::AuditError;
use crate::evidence::EvidenceUnit;

// ── Transport boundary ───────────────────────────────────────────

/// Minimal completion transport. Production uses the Anthropic
/// Messages API; tests substitute a scripted mock.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AuditError>;
}

/// Anthropic Messages API transport.
pub struct AnthropicTransport {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicTransport {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmTransport for AnthropicTransport {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AuditError> {
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": 4096,
            "temperature": 0.2,
            "system": system,
            "messages": [{
                "role": "user",
                "content": prompt,
            }]
        });

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| AuditError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuditError::Transport(format!(
                "Anthropic API error {status}: {body}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AuditError::Transport(e.to_string()))?;
        body["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AuditError::MalformedResponse("empty completion body".into()))
    }
}

// ── Audit roles ──────────────────────────────────────────────────

/// The five fixed audit roles. Clause ownership is static so the
/// partition can be validated once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditRole {
    /// Determines the A/B/C safety class (IEC 62304:4.3).
    Classifier,
    /// Lifecycle processes 5.1–5.7.
    Lifecycle,
    /// Risk management, configuration/release, problem resolution.
    RiskConfigProblem,
    /// Software of unknown provenance (§8).
    Soup,
    /// Requirements↔design↔test linkage (5.1.1).
    Traceability,
}

impl AuditRole {
    pub fn id(self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::Lifecycle => "lifecycle",
            Self::RiskConfigProblem => "rcp",
            Self::Soup => "soup",
            Self::Traceability => "trace",
        }
    }

    /// Clause ids owned by this role. Disjoint by construction.
    pub fn clause_scope(self) -> &'static [&'static str] {
        match self {
            Self::Classifier => &["4.3"],
            Self::Lifecycle => &["5.1", "5.2", "5.3", "5.4", "5.5", "5.6", "5.7"],
            Self::RiskConfigProblem => &["5.8", "7.1", "9.1"],
            Self::Soup => &["8.1", "8.2"],
            Self::Traceability => &["5.1.1"],
        }
    }

    /// System prompt for the model, per the audit role.
    fn system_prompt(self) -> &'static str {
        match self {
            Self::Classifier => {
                "You are the Safety Classification Auditor for IEC 62304. Determine the \
                 software safety class per IEC 62304:4.3: A = no injury or damage to health \
                 possible, B = non-serious injury possible, C = death or serious injury \
                 possible. When the hazard analysis is unclear or missing, classify \
                 conservatively and say which analysis is missing."
            }
            Self::Lifecycle => {
                "You are the Lifecycle Auditor for IEC 62304 §5.1-5.7. Verify development \
                 planning, requirements analysis, architectural and detailed design, and \
                 unit/integration/system testing, with rigor appropriate to the safety class."
            }
            Self::RiskConfigProblem => {
                "You are the Risk/Config/Problem Auditor for IEC 62304. Verify ISO 14971 \
                 risk management integration, configuration management and release \
                 baselines, and the problem resolution process (§9)."
            }
            Self::Soup => {
                "You are the SOUP Auditor for IEC 62304 §8. Check identification of \
                 software of unknown provenance, evaluation criteria, known anomalies, and \
                 change monitoring. Flag undeclared third-party dependencies."
            }
            Self::Traceability => {
                "You are the Traceability Auditor for IEC 62304:5.1.1. Verify bi-directional \
                 links between requirements, design, implementation, tests, and risks, with \
                 full coverage expected for class B and C software."
            }
        }
    }
}

// ── Wire schema ──────────────────────────────────────────────────

/// Model response schema. Findings reuse the domain enums directly so
/// serde rejects out-of-vocabulary statuses and severities.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    findings: Vec<WireFinding>,
    /// Classifier only: "A" | "B" | "C".
    safety_class: Option<String>,
    /// Classifier only: why that class.
    class_rationale: Option<String>,
    /// Classifier only: evidence ids backing the class.
    #[serde(default)]
    class_evidence: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireFinding {
    clause: String,
    status: FindingStatus,
    severity: Severity,
    #[serde(default)]
    evidence: Vec<String>,
    rationale: String,
    recommendation: Option<String>,
}

impl WireFinding {
    fn into_finding(self, reviewer_id: &str) -> Finding {
        Finding {
            clause_id: self.clause,
            reviewer_id: reviewer_id.to_string(),
            status: self.status,
            severity: self.severity,
            evidence_refs: self.evidence,
            rationale: self.rationale,
            recommended_action: self.recommendation,
            priority: Priority::assign(self.severity, self.status),
            reviewer_unavailable: false,
        }
    }
}

/// Extract JSON content from a response that may be wrapped in
/// markdown code fences.
pub fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return text[json_start..json_start + end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let block_start = start + 3;
        if let Some(end) = text[block_start..].find("```") {
            let candidate = text[block_start..block_start + end].trim();
            if let Some(nl) = candidate.find('\n') {
                if !candidate[..nl].starts_with('{') {
                    return candidate[nl + 1..].trim();
                }
            }
            return candidate;
        }
    }
    text.trim()
}

// ── LLM reviewer ─────────────────────────────────────────────────

/// A reviewer agent for one audit role, backed by a shared transport
/// and the read-only clause catalog.
pub struct LlmReviewer {
    role: AuditRole,
    scope: Vec<String>,
    catalog: Arc<ClauseCatalog>,
    transport: Arc<dyn LlmTransport>,
}

impl LlmReviewer {
    pub fn new(role: AuditRole, catalog: Arc<ClauseCatalog>, transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            role,
            scope: role.clause_scope().iter().map(|s| s.to_string()).collect(),
            catalog,
            transport,
        }
    }

    /// Build the full audit team sharing one transport: the classifier
    /// plus the four class-dependent reviewers.
    pub fn team(
        catalog: Arc<ClauseCatalog>,
        transport: Arc<dyn LlmTransport>,
    ) -> (Arc<dyn ReviewerAgent>, Vec<Arc<dyn ReviewerAgent>>) {
        let classifier: Arc<dyn ReviewerAgent> = Arc::new(Self::new(
            AuditRole::Classifier,
            catalog.clone(),
            transport.clone(),
        ));
        let reviewers: Vec<Arc<dyn ReviewerAgent>> = [
            AuditRole::Lifecycle,
            AuditRole::RiskConfigProblem,
            AuditRole::Soup,
            AuditRole::Traceability,
        ]
        .into_iter()
        .map(|role| {
            Arc::new(Self::new(role, catalog.clone(), transport.clone()))
                as Arc<dyn ReviewerAgent>
        })
        .collect();
        (classifier, reviewers)
    }

    /// Evidence from the request matched to one clause's artifact
    /// profiles.
    fn matched_evidence<'a>(
        clause: &Clause,
        evidence: &'a [EvidenceUnit],
    ) -> Vec<&'a EvidenceUnit> {
        evidence
            .iter()
            .filter(|u| clause.all_artifacts().any(|a| u.matches_artifact(a)))
            .collect()
    }

    /// Local verdict for a clause with zero matching evidence:
    /// MAJOR_NC when a mandatory artifact is absent, OBSERVATION when
    /// only optional artifacts were expected. Never CONFORMING.
    fn absent_evidence_finding(&self, clause: &Clause) -> Finding {
        let (status, severity, rationale) = if clause.required_artifacts.is_empty() {
            (
                FindingStatus::Observation,
                Severity::Low,
                format!(
                    "No evidence matched optional artifacts for clause {} ({})",
                    clause.clause_id, clause.title
                ),
            )
        } else {
            let missing: Vec<&str> = clause
                .required_artifacts
                .iter()
                .map(|a| a.keywords()[0])
                .collect();
            (
                FindingStatus::MajorNc,
                Severity::High,
                format!(
                    "Mandatory artifact(s) absent for clause {} ({}): no evidence matched {}",
                    clause.clause_id,
                    clause.title,
                    missing.join(", ")
                ),
            )
        };
        Finding {
            clause_id: clause.clause_id.clone(),
            reviewer_id: self.role.id().to_string(),
            status,
            severity,
            evidence_refs: Vec::new(),
            rationale,
            recommended_action: Some(format!(
                "Produce and submit the documentation required by IEC 62304 {}",
                clause.clause_id
            )),
            priority: Priority::assign(severity, status),
            reviewer_unavailable: false,
        }
    }

    /// Build the user prompt: classification, clause table, evidence
    /// blocks with citable ids, and the response format.
    fn build_prompt(&self, request: &ReviewRequest, clauses: &[&Clause]) -> String {
        let mut prompt = String::new();

        match &request.classification {
            Some(c) => prompt.push_str(&format!(
                "Software safety class: {} ({})\n\n",
                c.class, c.rationale
            )),
            None => prompt.push_str("Software safety class: not yet determined.\n\n"),
        }

        prompt.push_str("## Clauses under review\n");
        for clause in clauses {
            let required: Vec<String> = clause
                .required_artifacts
                .iter()
                .map(|a| format!("{a:?}"))
                .collect();
            prompt.push_str(&format!(
                "- {} {} (required artifacts: {})\n",
                clause.clause_id,
                clause.title,
                if required.is_empty() { "none".into() } else { required.join(", ") },
            ));
        }

        prompt.push_str("\n## Evidence\n");
        for unit in &request.evidence {
            prompt.push_str(&format!(
                "\n[{}] {} — {}{}\n{}\n",
                unit.id,
                unit.source_document,
                unit.locator,
                if unit.truncated { " (truncated)" } else { "" },
                unit.text,
            ));
        }

        prompt.push_str(
            "\n## Instructions\n\
             Emit exactly one finding per clause listed above. Cite evidence by the \
             bracketed ids. A CONFORMING status requires at least one citation. \
             Respond with ONLY this JSON:\n\
             ```json\n\
             {\n",
        );
        if self.role == AuditRole::Classifier {
            prompt.push_str(
                "  \"safety_class\": \"A\" | \"B\" | \"C\",\n\
                 \"class_rationale\": \"why\",\n\
                 \"class_evidence\": [\"evidence id\"],\n",
            );
        }
        prompt.push_str(
            "  \"findings\": [\n\
             {\n\
             \"clause\": \"5.3\",\n\
             \"status\": \"conforming\" | \"minor_nc\" | \"major_nc\" | \"observation\",\n\
             \"severity\": \"low\" | \"medium\" | \"high\",\n\
             \"evidence\": [\"evidence id\"],\n\
             \"rationale\": \"what the evidence shows\",\n\
             \"recommendation\": \"actionable fix or null\"\n\
             }\n\
             ]\n\
             }\n\
             ```\n",
        );
        prompt
    }

    /// Parse the classifier's classification block.
    fn parse_classification(
        &self,
        wire: &WireResponse,
        request: &ReviewRequest,
    ) -> Result<SafetyClassification, AuditError> {
        let raw = wire.safety_class.as_deref().ok_or_else(|| {
            AuditError::MalformedResponse("classifier response missing safety_class".into())
        })?;
        let class = SafetyClass::parse(raw).ok_or_else(|| {
            AuditError::MalformedResponse(format!("invalid safety class '{raw}'"))
        })?;

        let known: std::collections::BTreeSet<&str> =
            request.evidence.iter().map(|u| u.id.as_str()).collect();
        for id in &wire.class_evidence {
            if !known.contains(id.as_str()) {
                return Err(AuditError::MalformedResponse(format!(
                    "classification cites unknown evidence '{id}'"
                )));
            }
        }

        Ok(SafetyClassification {
            class,
            rationale: wire
                .class_rationale
                .clone()
                .unwrap_or_else(|| "No rationale provided".into()),
            evidence_refs: wire.class_evidence.clone(),
        })
    }
}

#[async_trait]
impl ReviewerAgent for LlmReviewer {
    fn id(&self) -> &str {
        self.role.id()
    }

    fn scope(&self) -> &[String] {
        &self.scope
    }

    fn is_classifier(&self) -> bool {
        self.role == AuditRole::Classifier
    }

    async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome, AuditError> {
        if !self.is_classifier() && request.classification.is_none() {
            return Err(AuditError::PrematureReview(self.role.id().to_string()));
        }

        // Split the clause subset by the evidence-matching policy.
        // Absent-evidence clauses are decided locally; the classifier
        // always consults the model because a class must come out.
        let mut local_findings: Vec<Finding> = Vec::new();
        let mut model_clauses: Vec<&Clause> = Vec::new();
        for clause_id in &request.clause_ids {
            let clause = self.catalog.get(clause_id)?;
            if !self.is_classifier()
                && Self::matched_evidence(clause, &request.evidence).is_empty()
            {
                local_findings.push(self.absent_evidence_finding(clause));
            } else {
                model_clauses.push(clause);
            }
        }

        let mut classification = None;
        let mut findings = local_findings;

        if !model_clauses.is_empty() {
            let prompt = self.build_prompt(request, &model_clauses);
            tracing::debug!(
                reviewer = self.role.id(),
                clauses = model_clauses.len(),
                evidence = request.evidence.len(),
                "Dispatching reviewer call"
            );
            let raw = self
                .transport
                .complete(self.role.system_prompt(), &prompt)
                .await?;

            let wire: WireResponse = serde_json::from_str(extract_json_block(&raw))
                .map_err(|e| AuditError::MalformedResponse(e.to_string()))?;

            if self.is_classifier() {
                classification = Some(self.parse_classification(&wire, request)?);
            }
            findings.extend(
                wire.findings
                    .into_iter()
                    .map(|f| f.into_finding(self.role.id())),
            );
        }

        findings.sort_by(|a, b| a.clause_id.cmp(&b.clause_id));
        validate_outcome(self.role.id(), request, &findings)?;

        Ok(ReviewOutcome {
            findings,
            classification,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
