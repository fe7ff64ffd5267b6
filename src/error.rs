//! Error types for the invoice-audit library.
//!
//! Errors are split by blast radius:
//!
//! * [`InvoiceAuditError`]: **Fatal**: the run cannot start at all (input
//!   path missing, provider not configured, export file unwritable). Returned
//!   as `Err` from loaders, constructors and exporters. A batch loader turns
//!   a load failure into an `input`-stage [`DocumentError`] instead.
//!
//! * [`RenderError`], [`ExtractionError`], [`AuditError`]: **Per document**:
//!   one invoice failed a pipeline stage. The batch records the failure as a
//!   [`DocumentError`] inside [`crate::output::DocumentReport`] and moves on
//!   to the next file.
//!
//! * [`RedactionError`]: **Per region**: contained inside
//!   [`crate::pipeline::redact`]. A malformed polygon is logged and skipped;
//!   it never aborts the document.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the invoice-audit library.
#[derive(Debug, Error)]
pub enum InvoiceAuditError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Invoice file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The bytes are neither a PDF nor a PNG/JPEG image.
    #[error("Unsupported document '{name}': expected PDF, PNG or JPEG (first bytes: {magic:?})")]
    UnsupportedDocument { name: String, magic: Vec<u8> },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Service configuration errors ──────────────────────────────────────
    /// The risk-assessment LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The document-understanding endpoint or key is missing.
    #[error(
        "Document-understanding service is not configured: {0}\n\
Set DOCUMENT_INTELLIGENCE_ENDPOINT and DOCUMENT_INTELLIGENCE_KEY, or pass --di-endpoint/--di-key."
    )]
    ExtractorNotConfigured(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// The redaction vault directory could not be created.
    #[error("Vault directory '{path}' is unavailable: {source}")]
    VaultUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The batch export could not be built or written.
    #[error("Failed to export batch results to '{path}': {detail}")]
    ExportFailed { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The document could not be turned into a raster image.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH (or --pdfium-lib) to a directory or file containing libpdfium."
    )]
    RendererUnavailable(String),

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// PDF is encrypted; invoices are expected to open without a password.
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    /// The PDF parsed but has no pages.
    #[error("PDF has no pages")]
    EmptyDocument,

    /// pdfium returned an error while rasterising the first page.
    #[error("Rasterisation of page 1 failed: {detail}")]
    RasterisationFailed { detail: String },

    /// PNG/JPEG bytes could not be decoded.
    #[error("Image decoding failed: {detail}")]
    DecodeFailed { detail: String },

    /// The blocking render task panicked or was cancelled.
    #[error("Render task failed: {0}")]
    Internal(String),
}

/// The document-understanding call failed or returned an unusable structure.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Transport-level failure (DNS, TLS, connection reset).
    #[error("Document analysis request failed: {detail}")]
    Request { detail: String },

    /// The request or a poll exceeded the configured timeout.
    #[error("Document analysis timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The service answered with a non-success HTTP status.
    #[error("Document analysis returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The service accepted the document but the analysis itself failed.
    #[error("Document analysis failed ({code}): {message}")]
    AnalysisFailed { code: String, message: String },

    /// The operation was still running after the last allowed poll.
    #[error("Document analysis did not finish after {attempts} polls")]
    PollExhausted { attempts: u32 },

    /// The response did not have the expected shape.
    #[error("Malformed document analysis response: {detail}")]
    MalformedResponse { detail: String },
}

/// A single PII region could not be painted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RedactionError {
    /// The region collapses to a point or a line once mapped to pixels.
    #[error("Region {index} is degenerate (zero area after scaling to {width}x{height} px)")]
    Degenerate { index: usize, width: u32, height: u32 },
}

/// The redacted image could not be persisted in the vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The vault directory could not be created.
    #[error("Failed to create vault directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The artifact file could not be created or written.
    #[error("Failed to write vault artifact '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every candidate file name was already taken.
    #[error("No free artifact name for '{name}' after {attempts} attempts")]
    NameExhausted { name: String, attempts: u32 },
}

/// The security audit of one document failed.
///
/// The batch turns this into a textual error entry with no numeric score.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The document had to be rendered inside the audit and that failed.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The (possibly redacted) raster could not be encoded for transport.
    #[error("Image encoding failed: {detail}")]
    Encode { detail: String },

    /// The redacted artifact could not be written.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// The extracted fields could not be serialised into the request.
    #[error("Failed to serialise extracted invoice: {detail}")]
    Serialize { detail: String },

    /// The risk-assessment call failed after all retries.
    #[error("Risk assessment failed after {retries} retries: {detail}")]
    Assessment { retries: u32, detail: String },

    /// The risk-assessment call did not answer in time.
    #[error("Risk assessment timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The risk-assessment call returned no text at all.
    #[error("Risk assessment returned an empty response")]
    EmptyResponse,
}

/// A non-fatal, per-document failure recorded in the batch report.
///
/// Stored as text so reports can be serialised and exported.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum DocumentError {
    /// The input could not be read, downloaded or recognised.
    #[error("Input error: {detail}")]
    Input { detail: String },

    /// The document could not be rasterised.
    #[error("Render error: {detail}")]
    Render { detail: String },

    /// The document-understanding call failed.
    #[error("Extraction error: {detail}")]
    Extraction { detail: String },

    /// The security audit failed; no risk score is available.
    #[error("Audit failed: {detail}")]
    Audit { detail: String },
}

impl DocumentError {
    /// Short pipeline-stage name used in exports.
    pub fn stage(&self) -> &'static str {
        match self {
            DocumentError::Input { .. } => "input",
            DocumentError::Render { .. } => "render",
            DocumentError::Extraction { .. } => "extraction",
            DocumentError::Audit { .. } => "audit",
        }
    }

    /// The error message without the stage prefix.
    pub fn detail(&self) -> &str {
        match self {
            DocumentError::Input { detail }
            | DocumentError::Render { detail }
            | DocumentError::Extraction { detail }
            | DocumentError::Audit { detail } => detail,
        }
    }
}

impl From<&InvoiceAuditError> for DocumentError {
    fn from(e: &InvoiceAuditError) -> Self {
        DocumentError::Input {
            detail: e.to_string(),
        }
    }
}

impl From<&RenderError> for DocumentError {
    fn from(e: &RenderError) -> Self {
        DocumentError::Render {
            detail: e.to_string(),
        }
    }
}

impl From<&ExtractionError> for DocumentError {
    fn from(e: &ExtractionError) -> Self {
        DocumentError::Extraction {
            detail: e.to_string(),
        }
    }
}

impl From<&AuditError> for DocumentError {
    fn from(e: &AuditError) -> Self {
        match e {
            AuditError::Render(inner) => inner.into(),
            other => DocumentError::Audit {
                detail: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_document_display() {
        let e = InvoiceAuditError::UnsupportedDocument {
            name: "notes.txt".into(),
            magic: b"hell".to_vec(),
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.txt"), "got: {msg}");
        assert!(msg.contains("PDF, PNG or JPEG"));
    }

    #[test]
    fn degenerate_region_display() {
        let e = RedactionError::Degenerate {
            index: 2,
            width: 800,
            height: 600,
        };
        assert!(e.to_string().contains("Region 2"));
        assert!(e.to_string().contains("800x600"));
    }

    #[test]
    fn audit_render_failure_maps_to_render_stage() {
        let audit = AuditError::Render(RenderError::EmptyDocument);
        let doc: DocumentError = (&audit).into();
        assert_eq!(doc.stage(), "render");
        assert_eq!(doc.detail(), "PDF has no pages");
    }

    #[test]
    fn audit_timeout_maps_to_audit_stage() {
        let doc: DocumentError = (&AuditError::Timeout { secs: 60 }).into();
        assert_eq!(doc.stage(), "audit");
        assert!(doc.to_string().starts_with("Audit failed:"));
        assert!(doc.detail().contains("60s"));
    }

    #[test]
    fn load_failure_maps_to_input_stage() {
        let e = InvoiceAuditError::FileNotFound {
            path: PathBuf::from("/tmp/missing.pdf"),
        };
        let doc: DocumentError = (&e).into();
        assert_eq!(doc.stage(), "input");
        assert!(doc.detail().contains("missing.pdf"));
        assert!(doc.to_string().starts_with("Input error:"));
    }

    #[test]
    fn document_error_serialises_with_stage_tag() {
        let e = DocumentError::Extraction {
            detail: "HTTP 401".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, r#"{"stage":"extraction","detail":"HTTP 401"}"#);
    }
}
