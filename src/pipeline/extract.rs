//! Field extraction: document-understanding output → [`ExtractedInvoice`].
//!
//! The remote call sits behind [`DocumentAnalyzer`]; everything after it is
//! the pure function [`map_invoice`], which is where the audit-visible fields
//! and the PII allow-list are decided.
//!
//! ## Why an allow-list?
//!
//! Only customer identity fields are ever redacted. Vendor, totals, tax and
//! dates are what the auditor reasons about, so a field the service labels
//! in an unexpected way stays visible rather than being blacked out.

use crate::error::ExtractionError;
use crate::output::{ExtractedInvoice, LineItem, MISSING_AMOUNT, MISSING_TEXT};
use crate::pipeline::normalize::{
    normalize_polygon, CanonicalRegion, PageDimensions, PolygonCoords,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fields whose bounding regions are redacted, in this order.
pub const PII_FIELDS: [&str; 4] = [
    "CustomerName",
    "BillingAddress",
    "ShippingAddress",
    "CustomerAddress",
];

// ── Service result model ─────────────────────────────────────────────────

/// The subset of an invoice analysis result the pipeline reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedDocument {
    #[serde(default)]
    pub pages: Vec<AnalyzedPage>,
    #[serde(default)]
    pub documents: Vec<AnalyzedInvoice>,
}

/// Page size in the unit polygons on that page are measured in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedPage {
    pub page_number: u32,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedInvoice {
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, AnalyzedField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedField {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
    #[serde(default)]
    pub value_array: Vec<AnalyzedField>,
    #[serde(default)]
    pub value_object: HashMap<String, AnalyzedField>,
}

impl AnalyzedField {
    /// Trimmed content, if non-empty.
    fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingRegion {
    pub page_number: u32,
    #[serde(default)]
    pub polygon: Option<PolygonCoords>,
}

// ── Analyzer seam ────────────────────────────────────────────────────────

/// A document-understanding backend that analyses raw invoice bytes.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, bytes: &[u8]) -> Result<AnalyzedDocument, ExtractionError>;
}

/// Runs an analyzer and maps its result.
#[derive(Clone)]
pub struct FieldExtractor {
    analyzer: Arc<dyn DocumentAnalyzer>,
}

impl FieldExtractor {
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Analyse `bytes` once and map the result.
    ///
    /// Missing fields are not errors; only a failed call is.
    pub async fn extract(&self, bytes: &[u8]) -> Result<ExtractedInvoice, ExtractionError> {
        let analyzed = self.analyzer.analyze(bytes).await?;
        let invoice = map_invoice(&analyzed);
        info!(
            "Extracted invoice from {}: {} line item(s), {} PII region(s)",
            invoice.vendor,
            invoice.line_items.len(),
            invoice.pii_regions.len()
        );
        Ok(invoice)
    }
}

// ── Mapping ──────────────────────────────────────────────────────────────

/// Map an analysis result to the internal invoice model.
///
/// Only the first analysed document is read. Each PII polygon is normalised
/// against the dimensions of the page it names; regions on pages the result
/// does not describe are dropped.
pub fn map_invoice(analyzed: &AnalyzedDocument) -> ExtractedInvoice {
    let Some(doc) = analyzed.documents.first() else {
        debug!("Analysis returned no documents; using defaults");
        return ExtractedInvoice::default();
    };
    if analyzed.documents.len() > 1 {
        debug!(
            "Analysis returned {} documents; reading the first",
            analyzed.documents.len()
        );
    }

    let fields = &doc.fields;
    let text = |name: &str, default: &str| -> String {
        fields
            .get(name)
            .and_then(AnalyzedField::text)
            .unwrap_or(default)
            .to_string()
    };

    let tax = ["TotalTax", "Tax"]
        .iter()
        .find_map(|name| fields.get(*name).and_then(AnalyzedField::text))
        .unwrap_or(MISSING_AMOUNT)
        .to_string();

    ExtractedInvoice {
        vendor: text("VendorName", MISSING_TEXT),
        total: text("InvoiceTotal", MISSING_AMOUNT),
        tax,
        date: text("InvoiceDate", MISSING_TEXT),
        line_items: line_items(fields),
        pii_regions: pii_regions(fields, &analyzed.pages),
    }
}

fn line_items(fields: &HashMap<String, AnalyzedField>) -> Vec<LineItem> {
    let Some(items) = fields.get("Items") else {
        return Vec::new();
    };
    items
        .value_array
        .iter()
        .filter_map(|item| {
            let obj = &item.value_object;
            let description = obj.get("Description").and_then(AnalyzedField::text);
            let amount = obj.get("Amount").and_then(AnalyzedField::text);
            if description.is_none() && amount.is_none() {
                return None;
            }
            Some(LineItem {
                description: description.unwrap_or(MISSING_TEXT).to_string(),
                amount: amount.unwrap_or(MISSING_AMOUNT).to_string(),
            })
        })
        .collect()
}

fn pii_regions(
    fields: &HashMap<String, AnalyzedField>,
    pages: &[AnalyzedPage],
) -> Vec<CanonicalRegion> {
    let mut regions = Vec::new();
    for name in PII_FIELDS {
        let Some(field) = fields.get(name) else {
            continue;
        };
        for region in &field.bounding_regions {
            let Some(polygon) = &region.polygon else {
                continue;
            };
            let Some(page) = pages.iter().find(|p| p.page_number == region.page_number) else {
                warn!(
                    "{}: region on page {} but result has {} page(s); dropped",
                    name,
                    region.page_number,
                    pages.len()
                );
                continue;
            };
            match normalize_polygon(
                polygon,
                PageDimensions::new(page.width, page.height),
                region.page_number,
            ) {
                Some(canonical) => regions.push(canonical),
                None => warn!(
                    "{}: unusable polygon on page {}; dropped",
                    name, region.page_number
                ),
            }
        }
    }
    regions
}
