//! The audit orchestrator: extraction, rendering, redaction and assessment per document.
//!
//! ## Per-document flow
//!
//! ```text
//! bytes ─┬─ extract ──── fields + PII regions ─┐
//!        └─ render ───── page-1 raster ────────┴─▶ redact ─▶ encode ─┬─▶ vault
//!                                                                    └─▶ assess ─▶ score
//! ```
//!
//! Extraction and rendering run concurrently. Every failure is scoped to its
//! document: the batch records it and moves on, and no error leaks into
//! another document's report or export row.
//!
//! ## Why no global clients?
//!
//! All collaborators are owned by the [`InvoiceAuditor`] value, injected at
//! construction. Tests build an auditor from scripted analyzers and
//! assessors; the binary builds one from the environment.

use crate::cache::{CachedAudit, ReportCache};
use crate::config::AuditConfig;
use crate::error::{AuditError, DocumentError, ExtractionError, InvoiceAuditError, RenderError};
use crate::output::{AuditReport, BatchReport, DocumentReport, DocumentStatus, ExtractedInvoice};
use crate::pipeline::assess::{AssessmentRequest, LlmRiskAssessor, RiskAssessor};
use crate::pipeline::docintel::AzureDocumentAnalyzer;
use crate::pipeline::encode::encode_jpeg;
use crate::pipeline::extract::{DocumentAnalyzer, FieldExtractor};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::postprocess::clean_narrative;
use crate::pipeline::redact::redact;
use crate::pipeline::render::DocumentRenderer;
use crate::pipeline::score::{parse_risk_score, RiskLevel};
use crate::prompts::{audit_user_text, build_system_prompt};
use crate::raster::RasterImage;
use crate::vault::{LocalVault, VaultStore};
use chrono::Local;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The only page that is rendered, redacted and shown to the assessor.
const RENDERED_PAGE: u32 = 1;

/// Result of a successful [`InvoiceAuditor::security_audit`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuditOutcome {
    pub report: AuditReport,
    /// Vault path of the redacted image, when anything was redacted.
    pub artifact: Option<PathBuf>,
}

/// Audits invoices with injected extraction, assessment and storage backends.
pub struct InvoiceAuditor {
    config: AuditConfig,
    renderer: DocumentRenderer,
    extractor: FieldExtractor,
    assessor: Arc<dyn RiskAssessor>,
    vault: Arc<dyn VaultStore>,
    cache: ReportCache,
}

impl InvoiceAuditor {
    /// Assemble an auditor from explicit collaborators.
    pub fn new(
        config: AuditConfig,
        analyzer: Arc<dyn DocumentAnalyzer>,
        assessor: Arc<dyn RiskAssessor>,
        vault: Arc<dyn VaultStore>,
    ) -> Self {
        let renderer = DocumentRenderer::new(
            config.dpi,
            config.max_rendered_pixels,
            config.pdfium_lib_path.clone(),
        );
        Self {
            config,
            renderer,
            extractor: FieldExtractor::new(analyzer),
            assessor,
            vault,
            cache: ReportCache::new(),
        }
    }

    /// Build the production auditor: Document Intelligence, an LLM provider
    /// resolved from config/environment, and a local vault directory.
    pub async fn from_config(config: AuditConfig) -> Result<Self, InvoiceAuditError> {
        let provider = resolve_provider(&config)?;
        let analyzer = Arc::new(AzureDocumentAnalyzer::new(&config.extraction)?);

        tokio::fs::create_dir_all(&config.vault_dir)
            .await
            .map_err(|source| InvoiceAuditError::VaultUnavailable {
                path: config.vault_dir.clone(),
                source,
            })?;

        let assessor = Arc::new(LlmRiskAssessor::from_config(provider, &config));
        let vault = Arc::new(LocalVault::new(config.vault_dir.clone()));
        Ok(Self::new(config, analyzer, assessor, vault))
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn cache(&self) -> &ReportCache {
        &self.cache
    }

    /// Extract fields and PII regions from a document.
    pub async fn extract(&self, doc: &SourceDocument) -> Result<ExtractedInvoice, ExtractionError> {
        self.extractor.extract(doc.bytes()).await
    }

    /// Render the first page of a document.
    pub async fn render(&self, doc: &SourceDocument) -> Result<RasterImage, RenderError> {
        self.renderer.render(doc).await
    }

    /// Redact, store, encode and assess one document.
    ///
    /// Pass the raster from an earlier [`render`](Self::render) to avoid
    /// rendering twice; with `None` the document is rendered here. The raster
    /// is consumed: only its redacted, encoded form outlives this call.
    pub async fn security_audit(
        &self,
        doc: &SourceDocument,
        invoice: &ExtractedInvoice,
        rendered: Option<RasterImage>,
    ) -> Result<AuditOutcome, AuditError> {
        let mut raster = match rendered {
            Some(raster) => raster,
            None => self.renderer.render(doc).await?,
        };

        // ── Redaction ────────────────────────────────────────────────────
        let regions = invoice.regions_on_page(RENDERED_PAGE);
        let elsewhere = invoice.pii_regions.len() - regions.len();
        if elsewhere > 0 {
            info!(
                "{}: {} PII region(s) on pages after {} are not rendered; ignored",
                doc.name(),
                elsewhere,
                RENDERED_PAGE
            );
        }
        let summary = redact(&mut raster, &regions);

        // ── Encoding ─────────────────────────────────────────────────────
        let encoded =
            encode_jpeg(&raster, self.config.jpeg_quality).map_err(|e| AuditError::Encode {
                detail: e.to_string(),
            })?;
        drop(raster);

        // ── Vault ────────────────────────────────────────────────────────
        let artifact = if regions.is_empty() {
            None
        } else {
            Some(self.vault.store(&encoded, doc.name()).await?)
        };

        // ── Assessment ───────────────────────────────────────────────────
        let system_prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| build_system_prompt(Local::now().date_naive()));
        let invoice_json = invoice.to_audit_json().map_err(|e| AuditError::Serialize {
            detail: e.to_string(),
        })?;
        let request = AssessmentRequest {
            system_prompt,
            user_text: audit_user_text(&invoice_json),
            image: encoded,
        };

        let response = self.assessor.assess(&request).await?;
        let narrative = clean_narrative(&response.text);
        let parsed = parse_risk_score(&narrative);
        if !parsed.parsed {
            warn!(
                "{}: no parseable RISK_SCORE line; using fallback {}",
                doc.name(),
                parsed.score
            );
        }

        Ok(AuditOutcome {
            report: AuditReport {
                narrative,
                risk_score: parsed.score,
                score_parsed: parsed.parsed,
                risk_level: RiskLevel::from_score(parsed.score),
                redacted_regions: summary.masked,
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
            },
            artifact,
        })
    }

    /// Run one document through the whole pipeline.
    ///
    /// Never fails: stage errors are recorded in the returned report.
    pub async fn process_document(&self, doc: &SourceDocument) -> DocumentReport {
        self.process_indexed(doc, 1, 1).await
    }

    /// Process documents in upload order and collect a batch report.
    ///
    /// Up to `document_concurrency` documents are in flight at once; the
    /// report still lists them in the order given.
    pub async fn process_batch(&self, docs: &[SourceDocument]) -> BatchReport {
        let total = docs.len();
        let start = Instant::now();
        info!("Auditing batch of {} document(s)", total);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(total);
        }

        let documents: Vec<DocumentReport> = stream::iter(
            docs.iter()
                .enumerate()
                .map(|(i, doc)| self.process_indexed(doc, i + 1, total)),
        )
        .buffered(self.config.document_concurrency.max(1))
        .collect()
        .await;

        let report = BatchReport::from_documents(documents, start.elapsed().as_millis() as u64);
        info!(
            "Batch complete: {}/{} audited, {} audit failure(s), {} failed, {}ms",
            report.stats.audited,
            total,
            report.stats.audit_failed,
            report.stats.failed,
            report.stats.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, report.stats.audited);
        }
        report
    }

    async fn process_indexed(&self, doc: &SourceDocument, index: usize, total: usize) -> DocumentReport {
        let start = Instant::now();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_start(index, total, doc.name());
        }

        let outcome = self
            .cache
            .get_or_audit(doc.id(), || self.run_pipeline(doc))
            .await;
        let (status, cached) = match outcome {
            Ok((audit, cached)) => {
                if cached {
                    info!("{}: already audited (id {}), reusing verdict", doc.name(), doc.id().short());
                }
                let status = DocumentStatus::Audited {
                    invoice: audit.invoice,
                    report: audit.report,
                    artifact: audit.artifact,
                };
                (status, cached)
            }
            Err(status) => (status, false),
        };

        if let Some(ref cb) = self.config.progress_callback {
            match &status {
                DocumentStatus::Audited { report, .. } => {
                    cb.on_document_complete(index, total, doc.name(), report.risk_score)
                }
                DocumentStatus::AuditFailed { error, .. } | DocumentStatus::Failed { error } => {
                    cb.on_document_error(index, total, doc.name(), &error.to_string())
                }
            }
        }

        DocumentReport {
            filename: doc.name().to_string(),
            document_id: doc.id().clone(),
            kind: doc.kind(),
            status,
            cached,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Extract, render and audit one document. A failure comes back as the
    /// status to report.
    async fn run_pipeline(&self, doc: &SourceDocument) -> Result<CachedAudit, DocumentStatus> {
        debug!("{}: extracting and rendering", doc.name());
        let (extracted, rendered) = tokio::join!(self.extract(doc), self.render(doc));

        let invoice = match extracted {
            Ok(invoice) => invoice,
            Err(e) => {
                warn!("{}: extraction failed: {}", doc.name(), e);
                return Err(DocumentStatus::Failed {
                    error: DocumentError::from(&e),
                });
            }
        };
        let raster = match rendered {
            Ok(raster) => raster,
            Err(e) => {
                warn!("{}: render failed: {}", doc.name(), e);
                return Err(DocumentStatus::Failed {
                    error: DocumentError::from(&e),
                });
            }
        };

        match self.security_audit(doc, &invoice, Some(raster)).await {
            Ok(outcome) => {
                info!(
                    "{}: risk {} ({})",
                    doc.name(),
                    outcome.report.risk_score,
                    outcome.report.risk_level
                );
                Ok(CachedAudit {
                    invoice,
                    report: outcome.report,
                    artifact: outcome.artifact,
                })
            }
            Err(e) => {
                warn!("{}: audit failed: {}", doc.name(), e);
                Err(DocumentStatus::AuditFailed {
                    error: DocumentError::from(&e),
                    invoice,
                })
            }
        }
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Default model when only a provider name or API key is known.
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, InvoiceAuditError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceAuditError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the risk-assessment provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **Azure OpenAI** when `AZURE_OPENAI_API_KEY` and
///    `AZURE_OPENAI_CHAT_DEPLOYMENT` are both set; the deployment is the model.
/// 5. **OpenAI** when `OPENAI_API_KEY` is set.
/// 6. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &AuditConfig) -> Result<Arc<dyn LLMProvider>, InvoiceAuditError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Some(prov), Some(model)) = (
        non_empty_env("EDGEQUAKE_LLM_PROVIDER"),
        non_empty_env("EDGEQUAKE_MODEL"),
    ) {
        return create_vision_provider(&prov, &model);
    }

    if let (Some(_key), Some(deployment)) = (
        non_empty_env("AZURE_OPENAI_API_KEY"),
        non_empty_env("AZURE_OPENAI_CHAT_DEPLOYMENT"),
    ) {
        let model = config.model.clone().unwrap_or(deployment);
        return create_vision_provider("azure", &model);
    }

    if non_empty_env("OPENAI_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InvoiceAuditError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set AZURE_OPENAI_API_KEY + AZURE_OPENAI_CHAT_DEPLOYMENT, OPENAI_API_KEY, \
                or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
