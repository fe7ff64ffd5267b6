//! Configuration types for invoice auditing.
//!
//! Everything the pipeline needs (render resolution, vault location, the
//! risk-assessment provider and the document-understanding endpoint) lives in
//! one [`AuditConfig`] that is passed to [`crate::audit::InvoiceAuditor`] at
//! construction. There are no process-wide client handles; two auditors with
//! different configs can run side by side.

use crate::error::InvoiceAuditError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable holding the document-understanding endpoint.
pub const ENV_DI_ENDPOINT: &str = "DOCUMENT_INTELLIGENCE_ENDPOINT";
/// Environment variable holding the document-understanding key.
pub const ENV_DI_KEY: &str = "DOCUMENT_INTELLIGENCE_KEY";

/// Configuration for a batch of invoice audits.
///
/// Built via [`AuditConfig::builder()`] or using [`AuditConfig::default()`].
///
/// # Example
/// ```rust
/// use invoice_audit::AuditConfig;
///
/// let config = AuditConfig::builder()
///     .dpi(200)
///     .vault_dir("redacted_outputs")
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AuditConfig {
    /// Rendering DPI for the first page of PDF input. Range: 72–400. Default: 200.
    ///
    /// 200 DPI keeps 8 pt print legible for the vision model while a Letter
    /// page stays around 1700 × 2200 px.
    pub dpi: u32,

    /// Maximum rendered width or height in pixels. Default: 4000.
    ///
    /// Caps memory for oversized pages (A0 drawings attached as "invoices").
    pub max_rendered_pixels: u32,

    /// Directory or file containing the pdfium shared library.
    /// If None, the system library search path is used.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Write-once directory for redacted artifacts. Default: `redacted_outputs`.
    pub vault_dir: PathBuf,

    /// JPEG quality for the transported and vaulted image. Default: 75.
    pub jpeg_quality: u8,

    /// Documents audited at the same time. Default: 1 (upload order, one by one).
    ///
    /// Results are always returned in upload order regardless of this value.
    pub document_concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini" or an Azure deployment name.
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "azure", "anthropic").
    /// If None along with `provider`, the provider is resolved from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the audit completion. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate for one audit. Default: 2048.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed audit call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-audit-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Custom audit system prompt. If None, the built-in auditor rules are used.
    pub system_prompt: Option<String>,

    /// Document-understanding service settings.
    pub extraction: ExtractionConfig,

    /// Receives per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 4000,
            pdfium_lib_path: None,
            vault_dir: PathBuf::from("redacted_outputs"),
            jpeg_quality: 75,
            document_concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            system_prompt: None,
            extraction: ExtractionConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("vault_dir", &self.vault_dir)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("document_concurrency", &self.document_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("extraction", &self.extraction)
            .finish()
    }
}

impl AuditConfig {
    /// Create a new builder for `AuditConfig`.
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AuditConfig`].
#[derive(Debug)]
pub struct AuditConfigBuilder {
    config: AuditConfig,
}

impl AuditConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn vault_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.vault_dir = dir.into();
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn extraction(mut self, extraction: ExtractionConfig) -> Self {
        self.config.extraction = extraction;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AuditConfig, InvoiceAuditError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(InvoiceAuditError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.document_concurrency == 0 {
            return Err(InvoiceAuditError::InvalidConfig(
                "Document concurrency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(InvoiceAuditError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.vault_dir.as_os_str().is_empty() {
            return Err(InvoiceAuditError::InvalidConfig(
                "Vault directory must not be empty".into(),
            ));
        }
        if c.extraction.max_polls == 0 {
            return Err(InvoiceAuditError::InvalidConfig(
                "Extraction max_polls must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Settings for the document-understanding REST client.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtractionConfig {
    /// Service endpoint, e.g. `https://my-resource.cognitiveservices.azure.com`.
    pub endpoint: Option<String>,

    /// Subscription key sent as `Ocp-Apim-Subscription-Key`.
    pub api_key: Option<String>,

    /// Analysis model. Default: `prebuilt-invoice`.
    pub model_id: String,

    /// REST API version. Default: `2024-11-30`.
    pub api_version: String,

    /// Delay between operation polls when the service sends no `Retry-After`. Default: 1000.
    pub poll_interval_ms: u64,

    /// Polls before giving up on a running analysis. Default: 60.
    pub max_polls: u32,

    /// Timeout for each HTTP request in seconds. Default: 60.
    pub request_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model_id: "prebuilt-invoice".to_string(),
            api_version: "2024-11-30".to_string(),
            poll_interval_ms: 1000,
            max_polls: 60,
            request_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model_id", &self.model_id)
            .field("api_version", &self.api_version)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_polls", &self.max_polls)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ExtractionConfig {
    /// Defaults with endpoint and key taken from the environment when set.
    pub fn from_env() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            endpoint: non_empty(ENV_DI_ENDPOINT),
            api_key: non_empty(ENV_DI_KEY),
            ..Self::default()
        }
    }
}
