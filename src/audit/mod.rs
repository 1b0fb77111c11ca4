//! Multi-agent IEC 62304 audit pipeline.
//!
//! Implements the audit-team pattern where specialized agents each
//! own a disjoint slice of the standard and a lead auditor merges
//! their findings:
//!
//! 1. **Safety Classifier** determines the A/B/C class (4.3)
//! 2. **Lifecycle / RCP / SOUP / Traceability** reviewers run
//!    concurrently over their clause partitions
//! 3. The **Aggregator** (lead auditor) merges, deduplicates, checks
//!    traceability, and assembles the report
//!
//! ## Architecture
//!
//! ```text
//! Evidence ─▸ Classifier ─▸ SafetyClassification ─┐
//!                                                 │
//!             ┌─▸ Lifecycle (5.1–5.7) ─▸ findings ┤
//!             ├─▸ RCP (5.8, 7.1, 9.1) ─▸ findings ├─▸ Aggregator ─▸ AuditReport
//!             ├─▸ SOUP (8.1, 8.2)     ─▸ findings ┤
//!             └─▸ Trace (5.1.1)       ─▸ findings ┘
//! ```
//!
//! ## Extension
//!
//! Add reviewers by implementing [`ReviewerAgent`] and registering
//! them with [`Orchestrator::new`]; the clause partition is validated
//! at construction.

pub mod agents;
pub mod aggregator;
pub mod finding;
pub mod orchestrator;
pub mod reviewer;

pub use agents::{AnthropicTransport, AuditRole, LlmReviewer, LlmTransport};
pub use aggregator::aggregate;
pub use finding::{
    AuditReport, Finding, FindingStatus, Priority, SafetyClassification, Severity,
    TraceabilityMatrix,
};
pub use orchestrator::{Orchestrator, RunState};
pub use reviewer::{ReviewOutcome, ReviewRequest, ReviewerAgent};
