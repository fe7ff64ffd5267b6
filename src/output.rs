//! Result types produced by extraction, auditing and batch processing.
//!
//! Everything here is `Serialize + Deserialize` so a batch report can be
//! written as JSON by the CLI or returned from a web handler unchanged.

use crate::error::DocumentError;
use crate::pipeline::input::{DocumentId, DocumentKind};
use crate::pipeline::normalize::CanonicalRegion;
use crate::pipeline::score::RiskLevel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default for textual fields the service did not return.
pub const MISSING_TEXT: &str = "N/A";
/// Default for monetary fields the service did not return.
pub const MISSING_AMOUNT: &str = "0.00";

/// One invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub amount: String,
}

/// Structured fields and PII regions extracted from one document.
///
/// Immutable once built by [`crate::pipeline::extract::map_invoice`].
/// Monetary values stay strings exactly as printed; currency and
/// formatting are part of what the auditor inspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInvoice {
    pub vendor: String,
    pub total: String,
    pub tax: String,
    pub date: String,
    pub line_items: Vec<LineItem>,
    pub pii_regions: Vec<CanonicalRegion>,
}

impl Default for ExtractedInvoice {
    fn default() -> Self {
        Self {
            vendor: MISSING_TEXT.to_string(),
            total: MISSING_AMOUNT.to_string(),
            tax: MISSING_AMOUNT.to_string(),
            date: MISSING_TEXT.to_string(),
            line_items: Vec::new(),
            pii_regions: Vec::new(),
        }
    }
}

impl ExtractedInvoice {
    /// Regions that apply to the given 1-based page.
    pub fn regions_on_page(&self, page: u32) -> Vec<CanonicalRegion> {
        self.pii_regions
            .iter()
            .filter(|r| r.page() == page)
            .copied()
            .collect()
    }

    /// JSON sent to the risk assessor: the business fields only.
    ///
    /// Region geometry carries nothing the auditor can judge, so it is left out.
    pub fn to_audit_json(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct AuditView<'a> {
            vendor: &'a str,
            total: &'a str,
            tax: &'a str,
            date: &'a str,
            line_items: &'a [LineItem],
        }

        serde_json::to_string(&AuditView {
            vendor: &self.vendor,
            total: &self.total,
            tax: &self.tax,
            date: &self.date,
            line_items: &self.line_items,
        })
    }
}

/// The auditor's verdict for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Cleaned narrative returned by the risk assessor.
    pub narrative: String,
    /// Score in `[0, 100]`; 50 when the response carried no parseable score.
    pub risk_score: u8,
    /// Whether `risk_score` was read from the response or is the fallback.
    pub score_parsed: bool,
    pub risk_level: RiskLevel,
    /// Regions painted on the rendered page before the image left the process.
    pub redacted_regions: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// How far a document got through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Extraction and audit both succeeded.
    Audited {
        invoice: ExtractedInvoice,
        report: AuditReport,
        /// Redacted image in the vault, when anything was redacted.
        artifact: Option<PathBuf>,
    },
    /// Fields were extracted but the audit failed; there is no score.
    AuditFailed {
        invoice: ExtractedInvoice,
        error: DocumentError,
    },
    /// Rendering or extraction failed.
    Failed { error: DocumentError },
}

/// Result for one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    /// Original upload name.
    pub filename: String,
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    #[serde(flatten)]
    pub status: DocumentStatus,
    /// Served from the session cache without a new audit call.
    pub cached: bool,
    pub duration_ms: u64,
}

impl DocumentReport {
    pub fn is_audited(&self) -> bool {
        matches!(self.status, DocumentStatus::Audited { .. })
    }

    pub fn risk_score(&self) -> Option<u8> {
        match &self.status {
            DocumentStatus::Audited { report, .. } => Some(report.risk_score),
            _ => None,
        }
    }

    pub fn invoice(&self) -> Option<&ExtractedInvoice> {
        match &self.status {
            DocumentStatus::Audited { invoice, .. } | DocumentStatus::AuditFailed { invoice, .. } => {
                Some(invoice)
            }
            DocumentStatus::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&DocumentError> {
        match &self.status {
            DocumentStatus::Audited { .. } => None,
            DocumentStatus::AuditFailed { error, .. } | DocumentStatus::Failed { error } => {
                Some(error)
            }
        }
    }
}

/// Aggregate counters for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub audited: usize,
    pub audit_failed: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Every document of a batch, in upload order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub documents: Vec<DocumentReport>,
    pub stats: BatchStats,
}

impl BatchReport {
    /// Assemble a report, deriving the counters from the documents.
    pub fn from_documents(documents: Vec<DocumentReport>, total_duration_ms: u64) -> Self {
        let mut stats = BatchStats {
            total_documents: documents.len(),
            total_duration_ms,
            ..BatchStats::default()
        };
        for doc in &documents {
            if doc.cached {
                stats.cache_hits += 1;
            }
            match &doc.status {
                DocumentStatus::Audited { report, .. } => {
                    stats.audited += 1;
                    stats.total_input_tokens += report.input_tokens;
                    stats.total_output_tokens += report.output_tokens;
                }
                DocumentStatus::AuditFailed { .. } => stats.audit_failed += 1,
                DocumentStatus::Failed { .. } => stats.failed += 1,
            }
        }
        Self { documents, stats }
    }
}
