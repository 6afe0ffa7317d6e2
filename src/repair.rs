// Text repair and timestamp resolution
//
// Carrier-delivered SMS text arrives with two recurring defects: mojibake
// from a UTF-8 payload decoded as Latin-1 somewhere upstream, and dates
// with the year chopped off. Both repairs are best-effort and total.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

/// Repair common mis-decoded-encoding artifacts and normalize to NFC.
///
/// The mojibake pass re-encodes the text as Latin-1 bytes and accepts the
/// strict UTF-8 re-decode only when it succeeds: real Latin-1 prose fails
/// that decode and passes through untouched, while `"Ù…ØµØ±"`-style damage
/// round-trips back to readable Arabic. The returned flag reports whether
/// the cleaned text differs from the input; it feeds audit/trust scoring
/// only, never routing.
pub fn repair_text(sms: &str) -> (String, bool) {
    if sms.is_empty() {
        return (String::new(), false);
    }

    let mut cleaned = match remojibake(sms) {
        Some(fixed) => fixed,
        None => sms.to_string(),
    };

    cleaned = cleaned.nfc().collect::<String>().trim().to_string();

    let repaired = cleaned != sms;
    (cleaned, repaired)
}

/// Reinterpret the text as Latin-1 bytes and try a strict UTF-8 decode.
/// Returns `None` unless the text is fully Latin-1-range, contains at
/// least one high byte, and the re-decode succeeds.
fn remojibake(text: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(text.len());
    let mut has_high_byte = false;

    for c in text.chars() {
        let code = c as u32;
        if code > 0xFF {
            return None;
        }
        if code > 0x7F {
            has_high_byte = true;
        }
        bytes.push(code as u8);
    }

    if !has_high_byte {
        return None;
    }

    String::from_utf8(bytes).ok()
}

// ============================================================================
// TIMESTAMP RESOLUTION
// ============================================================================

const FULL_DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"];

fn day_month_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<day>\d{1,2})[/-](?P<month>\d{1,2})$")
            .expect("day/month pattern is statically valid")
    })
}

/// Resolve an extracted date string to ISO-8601 (`YYYY-MM-DD`).
///
/// Full formats are tried first, in a fixed order. A bare `DD/MM` or
/// `DD-MM` synthesizes its year from the source file's modification time
/// when available, else from the message's ingestion time. Anything else
/// resolves to `None`: absence, not an error.
pub fn resolve_timestamp(
    extracted_date: Option<&str>,
    file_modified_at: Option<DateTime<Utc>>,
    ingested_at: DateTime<Utc>,
) -> Option<String> {
    let raw = extracted_date?.trim();
    if raw.is_empty() {
        return None;
    }

    for format in FULL_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }

    if let Some(caps) = day_month_pattern().captures(raw) {
        let day: u32 = caps["day"].parse().ok()?;
        let month: u32 = caps["month"].parse().ok()?;
        let year = file_modified_at.unwrap_or(ingested_at).year();
        return NaiveDate::from_ymd_opt(year, month, day)
            .map(|d| d.format("%Y-%m-%d").to_string());
    }

    None
}

/// Modification time of a source file, as the defined fallback input to
/// year inference. Any filesystem error degrades to `None`.
pub fn file_modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

// ============================================================================
// TESTS
// ============================================================================
