//! Evidence store: normalized, addressable documentation excerpts.
//!
//! Every piece of audited documentation becomes an [`EvidenceUnit`]
//! with a stable id derived from `(document, locator)`, so ingesting
//! the same document twice is a no-op rather than a duplication.
//! Findings reference units by id and never own them; the store is
//! the single owner and is read-only for the duration of a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::{ArtifactKind, Clause};

/// Stable evidence identifier (16 hex chars of SHA-256 over
/// document name + locator).
pub type EvidenceId = String;

/// Default per-document character budget. Matches the excerpt size
/// the upstream auditor fed each agent per file.
pub const DEFAULT_DOC_BUDGET_CHARS: usize = 1600;

// ── Evidence unit ────────────────────────────────────────────────

/// One addressable excerpt of source documentation. Immutable once
/// created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceUnit {
    /// Stable id, derived from `(source_document, locator)`.
    pub id: EvidenceId,
    /// Originating document (file name).
    pub source_document: String,
    /// Where in the document this came from (page, heading, row).
    pub locator: String,
    /// Normalized UTF-8 text of the excerpt.
    pub text: String,
    /// Whether this unit (or the document after it) was cut short by
    /// the ingestion budget. Reviewers lower confidence accordingly;
    /// truncation is an inspectable fact, not silent data loss.
    pub truncated: bool,
    /// When the excerpt was extracted.
    pub extracted_at: DateTime<Utc>,
}

impl EvidenceUnit {
    /// Derive the stable id for a `(document, locator)` pair.
    pub fn derive_id(source_document: &str, locator: &str) -> EvidenceId {
        let mut hasher = Sha256::new();
        hasher.update(source_document.as_bytes());
        hasher.update([0u8]);
        hasher.update(locator.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Case-insensitive keyword match over text and locator.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let kw = keyword.to_ascii_lowercase();
        self.text.to_ascii_lowercase().contains(&kw)
            || self.locator.to_ascii_lowercase().contains(&kw)
    }

    /// Whether this unit matches an artifact's keyword profile.
    pub fn matches_artifact(&self, kind: ArtifactKind) -> bool {
        kind.keywords().iter().any(|kw| self.matches_keyword(kw))
    }
}

// ── Source document ──────────────────────────────────────────────

/// A document handed to the store by the ingestion layer: a name plus
/// ordered, locatable sections.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    /// `(locator, text)` pairs in document order.
    pub sections: Vec<(String, String)>,
}

// ── Evidence store ───────────────────────────────────────────────

/// Owner of all evidence units for a run. Keyed by id in a BTreeMap
/// so iteration order is deterministic.
#[derive(Debug, Default, Clone)]
pub struct EvidenceStore {
    units: BTreeMap<EvidenceId, EvidenceUnit>,
    /// Per-document character budget applied at ingestion.
    doc_budget_chars: usize,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self {
            units: BTreeMap::new(),
            doc_budget_chars: DEFAULT_DOC_BUDGET_CHARS,
        }
    }

    pub fn with_budget(doc_budget_chars: usize) -> Self {
        Self {
            units: BTreeMap::new(),
            doc_budget_chars,
        }
    }

    /// Ingest a document, returning the evidence units it produced.
    ///
    /// Ids are derived from `(document, locator)`, so re-ingesting the
    /// same document yields identical ids and no duplicates (the first
    /// ingestion's units, including timestamps, are kept). Sections
    /// past the per-document budget are dropped; whenever any content
    /// was cut — a section trimmed mid-text or whole sections dropped —
    /// the last emitted unit carries the `truncated` flag.
    pub fn ingest(&mut self, document: &SourceDocument) -> Vec<EvidenceUnit> {
        let mut produced: Vec<EvidenceId> = Vec::new();
        let mut remaining = self.doc_budget_chars;
        let mut dropped = 0usize;

        for (locator, text) in &document.sections {
            if remaining == 0 {
                dropped += 1;
                continue;
            }

            let truncated = text.chars().count() > remaining;
            let kept: String = text.chars().take(remaining).collect();
            remaining = remaining.saturating_sub(kept.chars().count());

            let id = EvidenceUnit::derive_id(&document.name, locator);
            self.units.entry(id.clone()).or_insert_with(|| EvidenceUnit {
                id: id.clone(),
                source_document: document.name.clone(),
                locator: locator.clone(),
                text: kept,
                truncated,
                extracted_at: Utc::now(),
            });
            produced.push(id);
        }

        if dropped > 0 {
            tracing::debug!(
                document = %document.name,
                dropped,
                "Evidence budget exhausted, sections dropped"
            );
            // A section that exactly fills the budget is not trimmed
            // itself, but the document still lost content; the cut is
            // recorded on the last unit that made it in.
            if let Some(unit) = produced.last().and_then(|id| self.units.get_mut(id)) {
                unit.truncated = true;
            }
        }

        tracing::info!(
            document = %document.name,
            units = produced.len(),
            "Ingested document"
        );
        produced
            .iter()
            .filter_map(|id| self.units.get(id).cloned())
            .collect()
    }

    /// Resolve an evidence id.
    pub fn get(&self, id: &str) -> Option<&EvidenceUnit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// All units, deterministic order.
    pub fn units(&self) -> impl Iterator<Item = &EvidenceUnit> {
        self.units.values()
    }

    /// Units from a given document.
    pub fn query_document(&self, name: &str) -> Vec<&EvidenceUnit> {
        self.units
            .values()
            .filter(|u| u.source_document == name)
            .collect()
    }

    /// Units whose text or locator contains the keyword.
    pub fn query_keyword(&self, keyword: &str) -> Vec<&EvidenceUnit> {
        self.units
            .values()
            .filter(|u| u.matches_keyword(keyword))
            .collect()
    }

    /// Units matching any artifact profile of the clause (required or
    /// optional). This is the reviewer evidence-selection policy.
    pub fn query_clause(&self, clause: &Clause) -> Vec<&EvidenceUnit> {
        self.units
            .values()
            .filter(|u| clause.all_artifacts().any(|a| u.matches_artifact(a)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }
}

// ── Tests ────────────────────────────────────────────────────────
