//! Risk-score parsing and labelling.
//!
//! The audit prompt mandates a terminal `RISK_SCORE: <0-100>` line. Models
//! occasionally echo the instruction earlier in their answer, wrap the number
//! in markdown, or forget the line entirely, so parsing reads the *last*
//! marker and falls back to a neutral score instead of failing the audit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker that precedes the score in the narrative.
pub const SCORE_MARKER: &str = "RISK_SCORE:";

/// Score used when the response carries no parseable marker.
pub const FALLBACK_SCORE: u8 = 50;

/// Characters after the marker searched for digits.
const SCORE_WINDOW: usize = 10;

/// A parsed score and whether it came from the response text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedScore {
    pub score: u8,
    pub parsed: bool,
}

/// Read the score from the last `RISK_SCORE:` marker in `text`.
///
/// The first run of ASCII digits within the 10 characters after the marker
/// is the score, so `RISK_SCORE: **87**` and `RISK_SCORE: 87/100` both read
/// as 87. Values above 100 clamp to 100. A missing marker or no digits in the
/// window yields [`FALLBACK_SCORE`] with `parsed = false`.
pub fn parse_risk_score(text: &str) -> ParsedScore {
    let fallback = ParsedScore {
        score: FALLBACK_SCORE,
        parsed: false,
    };

    let Some(pos) = text.rfind(SCORE_MARKER) else {
        return fallback;
    };

    let digits: String = text[pos + SCORE_MARKER.len()..]
        .chars()
        .take(SCORE_WINDOW)
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    // At most 10 digits, so u64 cannot overflow.
    match digits.parse::<u64>() {
        Ok(value) => ParsedScore {
            score: value.min(100) as u8,
            parsed: true,
        },
        Err(_) => fallback,
    }
}

/// Coarse classification of a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "CAUTION")]
    Caution,
    #[serde(rename = "HIGH RISK")]
    HighRisk,
}

impl RiskLevel {
    /// `< 30` safe, `30..=69` caution, `>= 70` high risk.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => RiskLevel::Safe,
            30..=69 => RiskLevel::Caution,
            _ => RiskLevel::HighRisk,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Caution => "CAUTION",
            RiskLevel::HighRisk => "HIGH RISK",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_terminal_score_line() {
        let p = parse_risk_score("Totals reconcile.\nRISK_SCORE: 87");
        assert_eq!(p, ParsedScore { score: 87, parsed: true });
    }

    #[test]
    fn missing_marker_falls_back() {
        let p = parse_risk_score("The invoice looks fine.");
        assert_eq!(p, ParsedScore { score: 50, parsed: false });
    }

    #[test]
    fn non_numeric_score_falls_back() {
        let p = parse_risk_score("RISK_SCORE: abc");
        assert_eq!(p, ParsedScore { score: 50, parsed: false });
    }

    #[test]
    fn last_marker_wins() {
        let text = "You must end with RISK_SCORE: 0-100.\n...\nRISK_SCORE: 12";
        assert_eq!(parse_risk_score(text).score, 12);
    }

    #[test]
    fn markdown_decoration_is_ignored() {
        assert_eq!(parse_risk_score("**RISK_SCORE: 45**").score, 45);
        assert_eq!(parse_risk_score("RISK_SCORE:`72`").score, 72);
    }

    #[test]
    fn only_first_digit_run_counts() {
        assert_eq!(parse_risk_score("RISK_SCORE: 40/100").score, 40);
    }

    #[test]
    fn digits_outside_window_are_ignored() {
        let p = parse_risk_score("RISK_SCORE:            99");
        assert!(!p.parsed);
    }

    #[test]
    fn large_values_clamp() {
        assert_eq!(parse_risk_score("RISK_SCORE: 250").score, 100);
        assert_eq!(parse_risk_score("RISK_SCORE: 99999999999999999999").score, 100);
    }

    #[test]
    fn label_boundaries() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Caution);
        assert_eq!(RiskLevel::from_score(69), RiskLevel::Caution);
        assert_eq!(RiskLevel::from_score(70), RiskLevel::HighRisk);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::HighRisk);
        assert_eq!(RiskLevel::HighRisk.to_string(), "HIGH RISK");
    }
}
