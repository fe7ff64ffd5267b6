//! System prompt and user turn for the invoice risk assessment.
//!
//! Centralising the prompt here keeps the auditor rules in one place and lets
//! unit tests inspect them without calling a model. Callers can replace the
//! system prompt via [`crate::config::AuditConfig::system_prompt`]; the
//! builder here is used only when no override is provided.
//!
//! The prompt embeds today's date because models anchor "now" to their
//! training cut-off and will otherwise flag last year's invoices as
//! future-dated.

use crate::pipeline::score::SCORE_MARKER;
use chrono::{Datelike, NaiveDate};

/// Build the auditor system prompt for `today`.
///
/// `today` is a parameter rather than read from the clock so the prompt is
/// deterministic under test.
pub fn build_system_prompt(today: NaiveDate) -> String {
    let year = today.year();
    format!(
        "Today's date is {today}. The current year is {year}. \
You are a Senior International Tax Auditor. Apply these combined rules:\n\n\
1. CHRONOLOGY: Compare all dates to today's date. Any year smaller than {year} is a PAST date. \
NEVER flag a date as 'Future' unless it is after {today}.\n\
2. JURISDICTION: Determine the country (US/UK/EU) via currency, address, and VAT ID. \
Apply local date formats (EU/UK: DD.MM.YYYY | US: MM/DD/YYYY).\n\
3. TAX AUDIT: Validate VAT (Europe) or Sales Tax (USA) based on the identified country. \
Ensure (Net + Tax + Shipping = Gross Total).\n\
4. FINAL ASSESSMENT: You MUST end your report with exactly one line: \
'{marker} X' (where X is 0-100). 0 is safe, 100 is fraud.",
        today = today.format("%d.%m.%Y"),
        year = year,
        marker = SCORE_MARKER,
    )
}

/// Text part of the user turn: the extracted fields as JSON.
pub fn audit_user_text(invoice_json: &str) -> String {
    format!("Audit this data: {}", invoice_json)
}
