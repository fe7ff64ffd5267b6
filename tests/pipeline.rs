//! Integration tests for the invoice-audit batch pipeline.
//!
//! Remote services are replaced by scripted `DocumentAnalyzer` and
//! `RiskAssessor` implementations, so these run offline. Tests that need a
//! pdfium shared library are gated behind `PDFIUM_TESTS=1`; the live test
//! against real services is gated behind `E2E_ENABLED=1`.
//!
//! Run with:
//!   cargo test --test pipeline
//!   PDFIUM_TESTS=1 PDFIUM_LIB_PATH=/opt/pdfium/lib cargo test --test pipeline

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use invoice_audit::{
    AnalyzedDocument, AssessmentRequest, AssessmentResponse, AuditConfig, AuditError,
    AuditProgressCallback, BatchExport, DocumentAnalyzer, DocumentKind, DocumentStatus,
    ExtractionError, InvoiceAuditor, LocalVault, RiskAssessor, RiskLevel, SourceDocument,
};
use serde_json::json;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Answers every request with the same analysis result and counts calls.
struct ScriptedAnalyzer {
    result: serde_json::Value,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    fn new(result: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DocumentAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, _bytes: &[u8]) -> Result<AnalyzedDocument, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        serde_json::from_value(self.result.clone()).map_err(|e| {
            ExtractionError::MalformedResponse {
                detail: e.to_string(),
            }
        })
    }
}

struct UnreachableAnalyzer;

#[async_trait]
impl DocumentAnalyzer for UnreachableAnalyzer {
    async fn analyze(&self, _bytes: &[u8]) -> Result<AnalyzedDocument, ExtractionError> {
        Err(ExtractionError::Http {
            status: 401,
            body: "Access denied due to invalid subscription key".into(),
        })
    }
}

/// Returns a fixed narrative; records the user text of every request.
struct ScriptedAssessor {
    narrative: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAssessor {
    fn new(narrative: &str) -> Arc<Self> {
        Arc::new(Self {
            narrative: narrative.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl RiskAssessor for ScriptedAssessor {
    async fn assess(&self, request: &AssessmentRequest) -> Result<AssessmentResponse, AuditError> {
        self.prompts.lock().unwrap().push(request.user_text.clone());
        Ok(AssessmentResponse {
            text: self.narrative.clone(),
            input_tokens: 1200,
            output_tokens: 300,
        })
    }
}

struct DownAssessor;

#[async_trait]
impl RiskAssessor for DownAssessor {
    async fn assess(&self, _request: &AssessmentRequest) -> Result<AssessmentResponse, AuditError> {
        Err(AuditError::Assessment {
            retries: 3,
            detail: "503 Service Unavailable".into(),
        })
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb([250, 250, 250]))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Same picture, different bytes: distinct content hashes.
fn png_variant(seed: u8) -> Vec<u8> {
    let mut img = RgbImage::from_pixel(40, 40, Rgb([250, 250, 250]));
    img.put_pixel(0, 0, Rgb([seed, seed, seed]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn invoice_with_customer() -> serde_json::Value {
    json!({
        "pages": [{"pageNumber": 1, "width": 8.5, "height": 11.0, "unit": "inch"}],
        "documents": [{
            "docType": "invoice",
            "fields": {
                "VendorName": {"content": "CONTOSO LTD."},
                "InvoiceTotal": {"content": "$110.00"},
                "TotalTax": {"content": "$10.00"},
                "InvoiceDate": {"content": "11/15/2019"},
                "CustomerName": {
                    "content": "MICROSOFT CORPORATION",
                    "boundingRegions": [{"pageNumber": 1, "polygon": [
                        {"x": 0.5, "y": 2.0}, {"x": 3.0, "y": 2.0},
                        {"x": 3.0, "y": 2.3}, {"x": 0.5, "y": 2.3}
                    ]}]
                }
            }
        }]
    })
}

fn invoice_without_pii() -> serde_json::Value {
    json!({
        "pages": [{"pageNumber": 1, "width": 1000.0, "height": 1000.0, "unit": "pixel"}],
        "documents": [{"fields": {"VendorName": {"content": "Globex"}}}]
    })
}

/// Route library logs through the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(vault: &Path) -> AuditConfig {
    AuditConfig::builder().vault_dir(vault).build().unwrap()
}

fn vault_files(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

// ── Batch behaviour ──────────────────────────────────────────────────────────

#[tokio::test]
async fn render_failure_is_isolated_to_its_document() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let assessor = ScriptedAssessor::new("Totals reconcile.\nRISK_SCORE: 12");
    let auditor = InvoiceAuditor::new(
        config(tmp.path()),
        ScriptedAnalyzer::new(invoice_with_customer()),
        assessor.clone(),
        Arc::new(LocalVault::new(tmp.path())),
    );

    let docs = vec![
        SourceDocument::from_bytes("first.png", png_variant(1)).unwrap(),
        SourceDocument::new("second.png", b"\x89PNG\r\n\x1a\ntruncated".to_vec(), DocumentKind::Raster),
        SourceDocument::from_bytes("third.png", png_variant(3)).unwrap(),
    ];
    let report = auditor.process_batch(&docs).await;

    let names: Vec<&str> = report.documents.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, ["first.png", "second.png", "third.png"]);
    assert!(report.documents[0].is_audited());
    assert!(!report.documents[1].is_audited());
    assert_eq!(report.documents[1].error().unwrap().stage(), "render");
    assert!(report.documents[2].is_audited());
    assert_eq!(report.stats.audited, 2);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(assessor.calls(), 2);

    let export = BatchExport::from_report(&report);
    assert_eq!(export.rows.len(), 2);
    assert_eq!(export.failures.len(), 1);
    assert_eq!(export.failures[0].filename, "second.png");
    assert!(export.rows.iter().all(|r| r.risk_score == 12 && r.risk_level == RiskLevel::Safe));
    assert!(export.to_xlsx_bytes().unwrap().starts_with(b"PK"));
}

#[tokio::test]
async fn no_pii_fields_means_no_vault_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    let vault_dir = tmp.path().join("vault");
    let auditor = InvoiceAuditor::new(
        config(&vault_dir),
        ScriptedAnalyzer::new(invoice_without_pii()),
        ScriptedAssessor::new("RISK_SCORE: 20"),
        Arc::new(LocalVault::new(&vault_dir)),
    );

    let doc = SourceDocument::from_bytes("plain.png", png(30, 30)).unwrap();
    let report = auditor.process_document(&doc).await;
    let DocumentStatus::Audited { invoice, report: audit, artifact } = report.status else {
        panic!("expected audited");
    };
    assert!(invoice.pii_regions.is_empty());
    assert_eq!(audit.redacted_regions, 0);
    assert!(artifact.is_none());
    assert!(vault_files(&vault_dir).is_empty());
}

#[tokio::test]
async fn redacted_artifact_lands_in_the_vault() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let auditor = InvoiceAuditor::new(
        config(tmp.path()),
        ScriptedAnalyzer::new(invoice_with_customer()),
        ScriptedAssessor::new("Date 11/15/2019 is in the past.\nRISK_SCORE: 74"),
        Arc::new(LocalVault::new(tmp.path())),
    );

    let doc = SourceDocument::from_bytes("Contoso Invoice.png", png(850, 1100)).unwrap();
    let report = auditor.process_document(&doc).await;
    let DocumentStatus::Audited { report: audit, artifact, .. } = report.status else {
        panic!("expected audited");
    };
    assert_eq!(audit.risk_score, 74);
    assert_eq!(audit.risk_level, RiskLevel::HighRisk);

    let artifact = artifact.unwrap();
    assert!(artifact.starts_with(tmp.path()));
    let files = vault_files(tmp.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("CLEANSED_"));
    assert!(files[0].ends_with("_Contoso_Invoice.jpg"));

    // Customer name box: x 0.5..3.0 in, y 2.0..2.3 in on an 8.5×11 in page.
    let stored = image::open(&artifact).unwrap().into_rgb8();
    assert!(stored.get_pixel(175, 215).0.iter().all(|&c| c < 40));
    assert!(stored.get_pixel(600, 600).0.iter().all(|&c| c > 200));
}

#[tokio::test]
async fn user_turn_carries_fields_not_geometry() {
    let tmp = tempfile::tempdir().unwrap();
    let assessor = ScriptedAssessor::new("RISK_SCORE: 10");
    let auditor = InvoiceAuditor::new(
        config(tmp.path()),
        ScriptedAnalyzer::new(invoice_with_customer()),
        assessor.clone(),
        Arc::new(LocalVault::new(tmp.path())),
    );
    let doc = SourceDocument::from_bytes("a.png", png(20, 20)).unwrap();
    auditor.process_document(&doc).await;

    let prompts = assessor.prompts.lock().unwrap();
    assert!(prompts[0].starts_with("Audit this data: "));
    assert!(prompts[0].contains("CONTOSO LTD."));
    assert!(prompts[0].contains("$10.00"));
    assert!(!prompts[0].contains("MICROSOFT"));
}

#[tokio::test]
async fn identical_upload_hits_the_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let analyzer = ScriptedAnalyzer::new(invoice_with_customer());
    let assessor = ScriptedAssessor::new("RISK_SCORE: 33");
    let auditor = InvoiceAuditor::new(
        config(tmp.path()),
        analyzer.clone(),
        assessor.clone(),
        Arc::new(LocalVault::new(tmp.path())),
    );

    let bytes = png(25, 25);
    let docs = vec![
        SourceDocument::from_bytes("march.png", bytes.clone()).unwrap(),
        SourceDocument::from_bytes("march-copy.png", bytes).unwrap(),
    ];
    let report = auditor.process_batch(&docs).await;

    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(assessor.calls(), 1);
    assert_eq!(vault_files(tmp.path()).len(), 1);
    assert!(!report.documents[0].cached);
    assert!(report.documents[1].cached);
    assert_eq!(report.documents[1].risk_score(), Some(33));
    assert_eq!(report.stats.cache_hits, 1);
    assert_eq!(auditor.cache().len().await, 1);
}

#[tokio::test]
async fn identical_uploads_in_flight_are_audited_once() {
    let tmp = tempfile::tempdir().unwrap();
    let analyzer = ScriptedAnalyzer::new(invoice_with_customer());
    let assessor = ScriptedAssessor::new("RISK_SCORE: 71");
    let config = AuditConfig::builder()
        .vault_dir(tmp.path())
        .document_concurrency(2)
        .build()
        .unwrap();
    let auditor = InvoiceAuditor::new(
        config,
        analyzer.clone(),
        assessor.clone(),
        Arc::new(LocalVault::new(tmp.path())),
    );

    let bytes = png(25, 25);
    let docs = vec![
        SourceDocument::from_bytes("april.png", bytes.clone()).unwrap(),
        SourceDocument::from_bytes("april-resend.png", bytes).unwrap(),
    ];
    let report = auditor.process_batch(&docs).await;

    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(assessor.calls(), 1);
    assert_eq!(vault_files(tmp.path()).len(), 1);
    assert_eq!(report.documents.iter().filter(|d| d.cached).count(), 1);
    assert!(report.documents.iter().all(|d| d.risk_score() == Some(71)));
    assert_eq!(report.stats.cache_hits, 1);
    assert_eq!(auditor.cache().len().await, 1);
}

#[tokio::test]
async fn region_on_unknown_page_is_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    let analysis = json!({
        "pages": [{"pageNumber": 1, "width": 100.0, "height": 100.0}],
        "documents": [{"fields": {
            "ShippingAddress": {"content": "1 Main St", "boundingRegions": [
                {"pageNumber": 4, "polygon": [0, 0, 50, 0, 50, 50, 0, 50]}
            ]}
        }}]
    });
    let auditor = InvoiceAuditor::new(
        config(tmp.path()),
        ScriptedAnalyzer::new(analysis),
        ScriptedAssessor::new("RISK_SCORE: 40"),
        Arc::new(LocalVault::new(tmp.path())),
    );
    let doc = SourceDocument::from_bytes("x.png", png(10, 10)).unwrap();
    let report = auditor.process_document(&doc).await;
    let invoice = report.invoice().unwrap();
    assert!(invoice.pii_regions.is_empty());
    assert!(vault_files(tmp.path()).is_empty());
}

#[tokio::test]
async fn extraction_failure_marks_document_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let assessor = ScriptedAssessor::new("RISK_SCORE: 1");
    let auditor = InvoiceAuditor::new(
        config(tmp.path()),
        Arc::new(UnreachableAnalyzer),
        assessor.clone(),
        Arc::new(LocalVault::new(tmp.path())),
    );
    let doc = SourceDocument::from_bytes("x.png", png(10, 10)).unwrap();
    let report = auditor.process_document(&doc).await;
    let error = report.error().unwrap();
    assert_eq!(error.stage(), "extraction");
    assert!(error.detail().contains("401"));
    assert_eq!(assessor.calls(), 0);
}

#[tokio::test]
async fn assessment_failure_keeps_fields_and_is_not_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let auditor = InvoiceAuditor::new(
        config(tmp.path()),
        ScriptedAnalyzer::new(invoice_without_pii()),
        Arc::new(DownAssessor),
        Arc::new(LocalVault::new(tmp.path())),
    );
    let doc = SourceDocument::from_bytes("x.png", png(10, 10)).unwrap();
    let report = auditor.process_document(&doc).await;

    let DocumentStatus::AuditFailed { invoice, error } = &report.status else {
        panic!("expected audit failure, got {:?}", report.status);
    };
    assert_eq!(invoice.vendor, "Globex");
    assert_eq!(error.stage(), "audit");
    assert!(report.risk_score().is_none());
    assert!(auditor.cache().is_empty().await);

    let export = BatchExport::from_report(&invoice_audit::BatchReport::from_documents(
        vec![report],
        0,
    ));
    assert!(export.rows.is_empty());
    assert_eq!(export.failures[0].stage, "audit");
}

#[tokio::test]
async fn concurrent_batch_keeps_upload_order() {
    let tmp = tempfile::tempdir().unwrap();
    let config = AuditConfig::builder()
        .vault_dir(tmp.path())
        .document_concurrency(4)
        .build()
        .unwrap();
    let auditor = InvoiceAuditor::new(
        config,
        ScriptedAnalyzer::new(invoice_without_pii()),
        ScriptedAssessor::new("RISK_SCORE: 55"),
        Arc::new(LocalVault::new(tmp.path())),
    );
    let docs: Vec<SourceDocument> = (0..6u8)
        .map(|i| SourceDocument::from_bytes(format!("inv-{i}.png"), png_variant(i)).unwrap())
        .collect();
    let report = auditor.process_batch(&docs).await;
    let names: Vec<String> = report.documents.iter().map(|d| d.filename.clone()).collect();
    let expected: Vec<String> = (0..6).map(|i| format!("inv-{i}.png")).collect();
    assert_eq!(names, expected);
    assert_eq!(report.stats.audited, 6);
}

#[tokio::test]
async fn progress_callbacks_follow_the_batch() {
    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl AuditProgressCallback for Events {
        fn on_batch_start(&self, total: usize) {
            self.0.lock().unwrap().push(format!("start {total}"));
        }
        fn on_document_complete(&self, index: usize, _total: usize, _name: &str, score: u8) {
            self.0.lock().unwrap().push(format!("ok {index} {score}"));
        }
        fn on_document_error(&self, index: usize, _total: usize, _name: &str, _error: &str) {
            self.0.lock().unwrap().push(format!("err {index}"));
        }
        fn on_batch_complete(&self, total: usize, audited: usize) {
            self.0.lock().unwrap().push(format!("done {audited}/{total}"));
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let events = Arc::new(Events::default());
    let config = AuditConfig::builder()
        .vault_dir(tmp.path())
        .progress_callback(events.clone())
        .build()
        .unwrap();
    let auditor = InvoiceAuditor::new(
        config,
        ScriptedAnalyzer::new(invoice_without_pii()),
        ScriptedAssessor::new("RISK_SCORE: 90"),
        Arc::new(LocalVault::new(tmp.path())),
    );
    let docs = vec![
        SourceDocument::from_bytes("good.png", png(8, 8)).unwrap(),
        SourceDocument::new("bad.jpg", vec![0xFF, 0xD8, 0xFF, 0x00], DocumentKind::Raster),
    ];
    auditor.process_batch(&docs).await;

    let events = events.0.lock().unwrap();
    assert_eq!(
        events.as_slice(),
        ["start 2", "ok 1 90", "err 2", "done 1/2"]
    );
}

// ── PDF rendering (needs pdfium) ─────────────────────────────────────────────

/// A one-page 200×100 pt PDF with an empty content stream.
fn minimal_pdf() -> Vec<u8> {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>",
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 100] /Contents 4 0 R /Resources << >> >>",
        "<< /Length 0 >>\nstream\n\nendstream",
    ];
    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }
    let xref = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for off in offsets {
        pdf.push_str(&format!("{off:010} 00000 n \n"));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref
    ));
    pdf.into_bytes()
}

#[tokio::test]
async fn pdf_first_page_is_rendered_and_redacted() {
    init_tracing();
    if std::env::var("PDFIUM_TESTS").is_err() {
        println!("SKIP — set PDFIUM_TESTS=1 to run pdfium tests");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let analysis = json!({
        "pages": [{"pageNumber": 1, "width": 200.0, "height": 100.0}],
        "documents": [{"fields": {
            "CustomerAddress": {"content": "x", "boundingRegions": [
                {"pageNumber": 1, "polygon": [0, 0, 100, 0, 100, 50, 0, 50]}
            ]}
        }}]
    });
    let config = AuditConfig::builder().vault_dir(tmp.path()).dpi(144).build().unwrap();
    let auditor = InvoiceAuditor::new(
        config,
        ScriptedAnalyzer::new(analysis),
        ScriptedAssessor::new("RISK_SCORE: 0"),
        Arc::new(LocalVault::new(tmp.path())),
    );
    let doc = SourceDocument::from_bytes("tiny.pdf", minimal_pdf()).unwrap();
    assert_eq!(doc.kind(), DocumentKind::Pdf);

    let raster = auditor.render(&doc).await.unwrap();
    assert_eq!((raster.width(), raster.height()), (400, 200));

    let report = auditor.process_document(&doc).await;
    let DocumentStatus::Audited { artifact, .. } = report.status else {
        panic!("expected audited");
    };
    let stored = image::open(artifact.unwrap()).unwrap().into_rgb8();
    assert!(stored.get_pixel(100, 50).0.iter().all(|&c| c < 40));
    assert!(stored.get_pixel(300, 150).0.iter().all(|&c| c > 200));
}

// ── Live services ────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_audit_of_sample_invoice() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run live tests");
        return;
    }
    let Ok(sample) = std::env::var("INVOICE_AUDIT_SAMPLE") else {
        println!("SKIP — set INVOICE_AUDIT_SAMPLE to an invoice path or URL");
        return;
    };
    let tmp = tempfile::tempdir().unwrap();
    let config = AuditConfig::builder()
        .vault_dir(tmp.path())
        .extraction(invoice_audit::ExtractionConfig::from_env())
        .build()
        .unwrap();
    let auditor = InvoiceAuditor::from_config(config).await.unwrap();
    let doc = invoice_audit::load_document(&sample, 120).await.unwrap();
    let report = auditor.process_document(&doc).await;
    assert!(report.is_audited(), "live audit failed: {:?}", report.error());
    assert!(report.risk_score().unwrap() <= 100);
}
