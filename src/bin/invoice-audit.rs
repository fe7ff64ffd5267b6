//! CLI binary for invoice-audit.
//!
//! A thin shim over the library crate that maps CLI flags to `AuditConfig`,
//! runs the batch and prints one result card per invoice.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use invoice_audit::{
    default_export_name, load_documents, AuditConfig, AuditProgressCallback, BatchExport,
    BatchReport, DocumentReport, DocumentStatus, ExtractionConfig, InputFailure, InvoiceAuditor,
    ProgressCallback, RiskLevel,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn risk_colour(level: RiskLevel, s: &str) -> String {
    match level {
        RiskLevel::Safe => green(s),
        RiskLevel::Caution => yellow(s),
        RiskLevel::HighRisk => red(s),
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per invoice.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} invoices  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Auditing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AuditProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Auditing {total_documents} invoice(s)…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, name: &str, risk_score: u8) {
        let level = RiskLevel::from_score(risk_score);
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            green("✓"),
            index,
            total,
            name,
            risk_colour(level, &format!("{risk_score:>3} {level}")),
            dim(&format!("{:.1}s", self.elapsed_secs(index))),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            red("✗"),
            index,
            total,
            name,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs(index))),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, audited: usize) {
        self.bar.finish_and_clear();
        let failed = total_documents.saturating_sub(audited);
        if failed == 0 {
            eprintln!("{} {} invoice(s) audited", green("✔"), bold(&audited.to_string()));
        } else {
            eprintln!(
                "{} {}/{} invoice(s) audited  ({} without a score)",
                if audited == 0 { red("✘") } else { cyan("⚠") },
                bold(&audited.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Audit one invoice
  invoice-audit invoice.pdf

  # Audit a folder of scans and export the results
  invoice-audit scans/*.pdf scans/*.png --export audit.xlsx

  # Audit from URL with an explicit Azure deployment
  invoice-audit --provider azure --model gpt-4o https://example.com/inv.pdf

  # JSON batch report on stdout
  invoice-audit --json *.pdf > report.json

ENVIRONMENT VARIABLES:
  DOCUMENT_INTELLIGENCE_ENDPOINT  Document-understanding endpoint
  DOCUMENT_INTELLIGENCE_KEY       Document-understanding subscription key
  AZURE_OPENAI_API_KEY            Azure OpenAI key
  AZURE_OPENAI_ENDPOINT           Azure OpenAI endpoint
  AZURE_OPENAI_CHAT_DEPLOYMENT    Azure OpenAI deployment (used as the model)
  OPENAI_API_KEY                  OpenAI API key
  EDGEQUAKE_LLM_PROVIDER          Override provider (openai, azure, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL                 Override model ID
  PDFIUM_LIB_PATH                 Directory or file of the pdfium shared library

RISK LEVELS:
  0-29   SAFE
  30-69  CAUTION
  70-100 HIGH RISK

  A missing RISK_SCORE line in the model answer is reported as 50 (CAUTION).
"#;

/// Redact customer PII on invoices and run a vision-LLM risk audit.
#[derive(Parser, Debug)]
#[command(
    name = "invoice-audit",
    version,
    about = "Redact customer PII on invoices and run a vision-LLM risk audit",
    long_about = "Extracts invoice fields with a document-understanding service, blacks out \
customer name and address regions on the first page, stores the redacted image in a local vault \
and asks a vision LLM for a fraud/compliance assessment with a 0-100 risk score.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local invoice files (PDF, PNG, JPEG) or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory for redacted artifacts.
    #[arg(long, env = "INVOICE_AUDIT_VAULT_DIR", default_value = "redacted_outputs")]
    vault_dir: PathBuf,

    /// Write the batch export here (.xlsx, or .json). Use "auto" for Security_Audit_<date>.xlsx.
    #[arg(long, env = "INVOICE_AUDIT_EXPORT")]
    export: Option<String>,

    /// Print the full batch report as JSON on stdout instead of result cards.
    #[arg(long, env = "INVOICE_AUDIT_JSON")]
    json: bool,

    /// Rendering DPI for PDF input (72–400).
    #[arg(long, env = "INVOICE_AUDIT_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum rendered width or height in pixels.
    #[arg(long, env = "INVOICE_AUDIT_MAX_PIXELS", default_value_t = 4000)]
    max_pixels: u32,

    /// Directory or file of the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// LLM provider: openai, azure, anthropic, gemini, ollama.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID or Azure deployment name.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Retries per invoice on a failed audit call.
    #[arg(long, env = "INVOICE_AUDIT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call audit timeout in seconds.
    #[arg(long, env = "INVOICE_AUDIT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Invoices audited at the same time (results keep upload order).
    #[arg(short, long, env = "INVOICE_AUDIT_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Document-understanding endpoint.
    #[arg(long, env = "DOCUMENT_INTELLIGENCE_ENDPOINT")]
    di_endpoint: Option<String>,

    /// Document-understanding subscription key.
    #[arg(long, env = "DOCUMENT_INTELLIGENCE_KEY", hide_env_values = true)]
    di_key: Option<String>,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "INVOICE_AUDIT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "INVOICE_AUDIT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE_AUDIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE_AUDIT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports every invoice; keep library INFO quiet.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build auditor ────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AuditProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let download_timeout = config.download_timeout_secs;
    let auditor = InvoiceAuditor::from_config(config)
        .await
        .context("Failed to initialise the auditor")?;

    // ── Load inputs ──────────────────────────────────────────────────────
    // A bad path or URL fails only its own entry.
    let (docs, input_failures) = load_documents(&cli.inputs, download_timeout).await;

    // ── Run batch ────────────────────────────────────────────────────────
    let report = auditor.process_batch(&docs).await;

    if cli.json {
        let out = serde_json::json!({
            "report": &report,
            "input_failures": &input_failures,
        });
        let json = serde_json::to_string_pretty(&out).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_cards(&cli.inputs, &report, &input_failures);
        print_summary(&report, input_failures.len());
    }

    // ── Export ───────────────────────────────────────────────────────────
    if let Some(ref target) = cli.export {
        let path = if target == "auto" {
            PathBuf::from(default_export_name(Local::now().date_naive()))
        } else {
            PathBuf::from(target)
        };
        let export = BatchExport::from_report(&report).with_input_failures(&input_failures);
        let is_json = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            export.write_json(&path)?;
        } else {
            export.write_xlsx(&path)?;
        }
        if !cli.quiet {
            eprintln!(
                "{} {} row(s), {} failure(s)  →  {}",
                green("✔"),
                export.rows.len(),
                export.failures.len(),
                bold(&path.display().to_string()),
            );
        }
    }

    if docs.is_empty() {
        anyhow::bail!("None of the {} input(s) could be loaded", cli.inputs.len());
    }
    Ok(())
}

/// Map CLI args to `AuditConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AuditConfig> {
    let mut extraction = ExtractionConfig::from_env();
    if cli.di_endpoint.is_some() {
        extraction.endpoint = cli.di_endpoint.clone();
    }
    if cli.di_key.is_some() {
        extraction.api_key = cli.di_key.clone();
    }

    let mut builder = AuditConfig::builder()
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .vault_dir(cli.vault_dir.clone())
        .document_concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .extraction(extraction);

    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(path.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

enum Card<'a> {
    Document(&'a DocumentReport),
    Unloadable(&'a InputFailure),
}

/// Cards in upload order, with unloadable inputs in their original slot.
fn cards<'a>(
    inputs: &[String],
    documents: &'a [DocumentReport],
    input_failures: &'a [InputFailure],
) -> Vec<Card<'a>> {
    let mut documents = documents.iter();
    let mut failures = input_failures.iter().peekable();
    let mut out = Vec::with_capacity(inputs.len());
    for input in inputs {
        if let Some(failure) = failures.next_if(|f| &f.input == input) {
            out.push(Card::Unloadable(failure));
        } else if let Some(doc) = documents.next() {
            out.push(Card::Document(doc));
        }
    }
    out
}

fn print_cards(inputs: &[String], report: &BatchReport, input_failures: &[InputFailure]) {
    for card in cards(inputs, &report.documents, input_failures) {
        match card {
            Card::Document(doc) => print_card(doc),
            Card::Unloadable(failure) => print_input_failure(failure),
        }
    }
}

fn print_input_failure(failure: &InputFailure) {
    println!();
    println!("{}", bold(&format!("═══ {} ═══", failure.input)));
    println!(
        "{}",
        red(&format!("FAILED ({}): {}", failure.error.stage(), failure.error.detail()))
    );
}

/// One result card: label, fields and narrative.
fn print_card(doc: &DocumentReport) {
    println!();
    println!("{}", bold(&format!("═══ {} ═══", doc.filename)));
    match &doc.status {
        DocumentStatus::Audited {
            invoice,
            report,
            artifact,
        } => {
            let label = format!("RISK {} — {}", report.risk_score, report.risk_level);
            println!("{}", risk_colour(report.risk_level, &bold(&label)));
            if !report.score_parsed {
                println!("{}", dim("(no RISK_SCORE line in the answer; fallback used)"));
            }
            println!(
                "Vendor: {}   Total: {}   Tax: {}   Date: {}",
                invoice.vendor, invoice.total, invoice.tax, invoice.date
            );
            match artifact {
                Some(path) => println!(
                    "Redacted {} region(s) → {}",
                    report.redacted_regions,
                    path.display()
                ),
                None => println!("{}", dim("No customer PII regions on page 1")),
            }
            if doc.cached {
                println!("{}", dim("(identical upload audited earlier; cached verdict)"));
            }
            println!();
            print!("{}", report.narrative);
        }
        DocumentStatus::AuditFailed { invoice, error } => {
            println!("{}", red(&format!("AUDIT FAILED: {}", error.detail())));
            println!(
                "Vendor: {}   Total: {}   Tax: {}   Date: {}",
                invoice.vendor, invoice.total, invoice.tax, invoice.date
            );
        }
        DocumentStatus::Failed { error } => {
            println!("{}", red(&format!("FAILED ({}): {}", error.stage(), error.detail())));
        }
    }
}

fn print_summary(report: &BatchReport, unloadable: usize) {
    let s = &report.stats;
    eprintln!(
        "{} audited, {} audit failure(s), {} failed  —  {} cached  —  {} tokens in / {} out  —  {}ms",
        s.audited,
        s.audit_failed,
        s.failed + unloadable,
        s.cache_hits,
        dim(&s.total_input_tokens.to_string()),
        dim(&s.total_output_tokens.to_string()),
        s.total_duration_ms,
    );
}
