//! medaudit — multi-agent IEC 62304 compliance auditor.
//!
//! Audits medical-device software documentation against IEC 62304 by
//! coordinating specialized reviewer agents over a shared evidence
//! pool and merging their findings into one consistent report.
//!
//! ## Layout
//!
//! - [`evidence`] — addressable documentation excerpts with provenance
//! - [`catalog`] — static IEC 62304 clause table
//! - [`ingest`] — file loaders feeding the evidence store
//! - [`audit`] — reviewer agents, orchestration, and aggregation
//! - [`config`] / [`error`] — runtime configuration and the error
//!   taxonomy

pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod evidence;
pub mod ingest;

pub use audit::{AuditReport, Orchestrator};
pub use catalog::{ClauseCatalog, SafetyClass};
pub use config::AuditConfig;
pub use error::AuditError;
pub use evidence::{EvidenceStore, EvidenceUnit};
