//! Post-processing: deterministic cleanup of the auditor's narrative.
//!
//! Even well-prompted models wrap answers in code fences, emit `\r\n`, leak
//! zero-width characters from the invoice text, or decorate the mandated
//! score line (`**RISK_SCORE: 87**`). The narrative is shown to reviewers and
//! stored in reports, so it is normalised here with cheap string rules that
//! never touch the content itself.
//!
//! ## Rule Order
//!
//! Line endings are normalised before anything works line-by-line, and the
//! score line is rewritten after trailing whitespace is gone so its pattern
//! can anchor on end-of-line.

use crate::pipeline::score::SCORE_MARKER;
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a raw assessment response.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Collapse runs of blank lines to a single blank line
/// 6. Rewrite a decorated score line to plain `RISK_SCORE: N`
/// 7. Ensure the text ends with exactly one newline
pub fn clean_narrative(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_score_line(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md|text|plaintext)?\r?\n(.*)\r?\n```\s*$").unwrap()
});

fn strip_outer_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank-line runs ─────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 6: Plain score line ─────────────────────────────────────────────────
//
// Matches a whole line holding only the marker, its number and markdown
// decoration: `**RISK_SCORE: 87**`, `` `RISK_SCORE:87` ``, `> RISK_SCORE: 87`.

static RE_SCORE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?m)^[ \t>*_`'\x22#-]*{}[ \t]*[*_`'\x22]*[ \t]*(\d{{1,3}})[ \t*_`'\x22.]*$",
        regex::escape(SCORE_MARKER)
    ))
    .unwrap()
});

fn normalise_score_line(input: &str) -> String {
    RE_SCORE_LINE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            format!("{} {}", SCORE_MARKER, &caps[1])
        })
        .to_string()
}

// ── Rule 7: Ensure text ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
