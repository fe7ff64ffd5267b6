//! Batch export: one spreadsheet row per audited document.
//!
//! Only documents with a risk score become rows on the `Security_Audit`
//! sheet. Everything that failed, at any stage, is listed on a separate
//! `Failures` sheet instead, so a reviewer can never mistake a missing score
//! for a clean invoice.

use crate::error::InvoiceAuditError;
use crate::output::{BatchReport, DocumentStatus};
use crate::pipeline::input::InputFailure;
use crate::pipeline::score::RiskLevel;
use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Sheet holding audited documents.
pub const AUDIT_SHEET: &str = "Security_Audit";
/// Sheet holding failed documents.
pub const FAILURE_SHEET: &str = "Failures";

const AUDIT_HEADERS: [&str; 7] = [
    "Filename",
    "Vendor",
    "Total",
    "Tax",
    "Date",
    "Risk_Score",
    "Risk_Level",
];
const FAILURE_HEADERS: [&str; 3] = ["Filename", "Stage", "Error"];

/// One audited document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub filename: String,
    pub vendor: String,
    pub total: String,
    pub tax: String,
    pub date: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
}

/// One document without a score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRow {
    pub filename: String,
    pub stage: String,
    pub error: String,
}

/// Tabular view of a [`BatchReport`], in upload order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchExport {
    pub rows: Vec<ExportRow>,
    pub failures: Vec<FailureRow>,
}

impl BatchExport {
    pub fn from_report(report: &BatchReport) -> Self {
        let mut export = Self::default();
        for doc in &report.documents {
            match &doc.status {
                DocumentStatus::Audited {
                    invoice, report, ..
                } => export.rows.push(ExportRow {
                    filename: doc.filename.clone(),
                    vendor: invoice.vendor.clone(),
                    total: invoice.total.clone(),
                    tax: invoice.tax.clone(),
                    date: invoice.date.clone(),
                    risk_score: report.risk_score,
                    risk_level: report.risk_level,
                }),
                DocumentStatus::AuditFailed { error, .. } | DocumentStatus::Failed { error } => {
                    export.failures.push(FailureRow {
                        filename: doc.filename.clone(),
                        stage: error.stage().to_string(),
                        error: error.detail().to_string(),
                    })
                }
            }
        }
        export
    }

    /// Append inputs that could not be loaded to the failure sheet.
    pub fn with_input_failures(mut self, failures: &[InputFailure]) -> Self {
        self.failures.extend(failures.iter().map(|f| FailureRow {
            filename: f.input.clone(),
            stage: f.error.stage().to_string(),
            error: f.error.detail().to_string(),
        }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.failures.is_empty()
    }

    /// Render the workbook in memory.
    pub fn to_xlsx_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();

        let sheet = workbook.add_worksheet();
        sheet.set_name(AUDIT_SHEET)?;
        for (col, header) in AUDIT_HEADERS.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *header, &bold)?;
        }
        for (i, row) in self.rows.iter().enumerate() {
            let r = i as u32 + 1;
            sheet.write_string(r, 0, &row.filename)?;
            sheet.write_string(r, 1, &row.vendor)?;
            sheet.write_string(r, 2, &row.total)?;
            sheet.write_string(r, 3, &row.tax)?;
            sheet.write_string(r, 4, &row.date)?;
            sheet.write_number(r, 5, f64::from(row.risk_score))?;
            sheet.write_string(r, 6, row.risk_level.as_str())?;
        }

        let sheet = workbook.add_worksheet();
        sheet.set_name(FAILURE_SHEET)?;
        for (col, header) in FAILURE_HEADERS.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *header, &bold)?;
        }
        for (i, row) in self.failures.iter().enumerate() {
            let r = i as u32 + 1;
            sheet.write_string(r, 0, &row.filename)?;
            sheet.write_string(r, 1, &row.stage)?;
            sheet.write_string(r, 2, &row.error)?;
        }

        workbook.save_to_buffer()
    }

    /// Write the workbook to `path`.
    pub fn write_xlsx(&self, path: &Path) -> Result<(), InvoiceAuditError> {
        let export_failed = |detail: String| InvoiceAuditError::ExportFailed {
            path: path.to_path_buf(),
            detail,
        };
        let bytes = self.to_xlsx_bytes().map_err(|e| export_failed(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| export_failed(e.to_string()))?;
        info!(
            "Exported {} row(s), {} failure(s) to {}",
            self.rows.len(),
            self.failures.len(),
            path.display()
        );
        Ok(())
    }

    /// Write the export as pretty JSON to `path`.
    pub fn write_json(&self, path: &Path) -> Result<(), InvoiceAuditError> {
        let export_failed = |detail: String| InvoiceAuditError::ExportFailed {
            path: path.to_path_buf(),
            detail,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| export_failed(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| export_failed(e.to_string()))
    }
}

/// `Security_Audit_<YYYYmmdd>.xlsx`.
pub fn default_export_name(date: NaiveDate) -> String {
    format!("Security_Audit_{}.xlsx", date.format("%Y%m%d"))
}
