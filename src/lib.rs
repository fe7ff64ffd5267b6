//! # invoice-audit
//!
//! Redact customer PII on invoices and run a vision-LLM fraud/compliance audit.
//!
//! ## Why this crate?
//!
//! Sending invoice scans to a hosted model leaks customer names and
//! addresses. This crate asks a document-understanding service where those
//! fields sit on the page, paints them out on a rendered raster, keeps a
//! write-once copy of exactly what left the process, and only then sends the
//! redacted image plus the business fields to a vision model for a risk
//! verdict.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / PNG / JPEG
//!  │
//!  ├─ 1. Input     local file or URL; SHA-256 identity
//!  ├─ 2. Extract   vendor, totals, tax, date, items + PII bounding regions
//!  ├─ 3. Render    page 1 via pdfium or image decode (spawn_blocking)
//!  ├─ 4. Redact    canonical 0..1000 polygons → opaque black on the raster
//!  ├─ 5. Vault     CLEANSED_<timestamp>_<name>.jpg, never overwritten
//!  ├─ 6. Assess    vision LLM with date-aware auditor rules
//!  └─ 7. Score     RISK_SCORE: N → SAFE / CAUTION / HIGH RISK
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice_audit::{load_document, AuditConfig, ExtractionConfig, InvoiceAuditor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Document Intelligence from DOCUMENT_INTELLIGENCE_ENDPOINT / _KEY,
//!     // LLM provider auto-detected from AZURE_OPENAI_* or OPENAI_API_KEY.
//!     let config = AuditConfig::builder()
//!         .extraction(ExtractionConfig::from_env())
//!         .build()?;
//!     let auditor = InvoiceAuditor::from_config(config).await?;
//!
//!     let doc = load_document("invoice.pdf", 120).await?;
//!     let report = auditor.process_document(&doc).await;
//!     println!("{:?}", report.risk_score());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice-audit` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! invoice-audit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod raster;
pub mod vault;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use audit::{resolve_provider, AuditOutcome, InvoiceAuditor};
pub use cache::{CachedAudit, ReportCache};
pub use config::{AuditConfig, AuditConfigBuilder, ExtractionConfig};
pub use error::{
    AuditError, DocumentError, ExtractionError, InvoiceAuditError, RedactionError, RenderError,
    VaultError,
};
pub use export::{default_export_name, BatchExport, ExportRow, FailureRow};
pub use output::{
    AuditReport, BatchReport, BatchStats, DocumentReport, DocumentStatus, ExtractedInvoice,
    LineItem,
};
pub use pipeline::assess::{AssessmentRequest, AssessmentResponse, LlmRiskAssessor, RiskAssessor};
pub use pipeline::docintel::AzureDocumentAnalyzer;
pub use pipeline::extract::{map_invoice, AnalyzedDocument, DocumentAnalyzer, FieldExtractor};
pub use pipeline::input::{
    load_document, load_documents, DocumentId, DocumentKind, InputFailure, SourceDocument,
};
pub use pipeline::normalize::{normalize_polygon, CanonicalRegion, PageDimensions, PolygonCoords};
pub use pipeline::redact::{redact, RedactionSummary};
pub use pipeline::render::DocumentRenderer;
pub use pipeline::score::{parse_risk_score, ParsedScore, RiskLevel};
pub use progress::{AuditProgressCallback, NoopProgressCallback, ProgressCallback};
pub use raster::RasterImage;
pub use vault::{LocalVault, VaultStore};
