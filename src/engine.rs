// 🔎 Regex Template Engine
//
// Applies every candidate bank template to a message, scores each attempt,
// and keeps a single best extraction. Always returns a structurally valid
// result; a message nothing matches degrades to an explicit empty result
// at low confidence.

use anyhow::{bail, Result};
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::cards::CardSuffixExtractor;
use crate::numerals::normalize_numerals;
use crate::schema::Confidence;
use crate::templates::{Template, TemplateLibrary};

// ============================================================================
// EXTRACTED FIELDS
// ============================================================================

/// Output of one engine call: the winning template's extraction, selected
/// wholesale. Field values are never merged across templates.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub date: Option<String>,
    pub payee: Option<String>,
    pub transaction_type: Option<String>,
    pub card_suffix: Option<String>,
    pub confidence: Confidence,
    pub matched_bank: Option<String>,
    pub matched_template: Option<String>,
    /// The raw (trimmed) message text, preserved for downstream stages
    pub sms_text: Option<String>,
}

impl ExtractedFields {
    /// Explicit empty result: all fields null, keeps downstream stages total.
    pub fn empty(matched_bank: Option<String>, sms_text: Option<String>) -> Self {
        ExtractedFields {
            amount: None,
            currency: None,
            date: None,
            payee: None,
            transaction_type: None,
            card_suffix: None,
            confidence: Confidence::Low,
            matched_bank,
            matched_template: None,
            sms_text,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Extracts structured transaction fields from SMS text using per-bank
/// regex templates.
pub struct TemplateEngine {
    templates: RwLock<Arc<TemplateLibrary>>,
    cards: CardSuffixExtractor,
    enhance_card_suffix: bool,
}

impl TemplateEngine {
    pub fn new(library: TemplateLibrary) -> Self {
        TemplateEngine {
            templates: RwLock::new(Arc::new(library)),
            cards: CardSuffixExtractor::new(),
            enhance_card_suffix: true,
        }
    }

    /// Engine over the built-in template set.
    pub fn with_builtin() -> Self {
        Self::new(TemplateLibrary::builtin())
    }

    /// Disable the card-suffix enhancement pass (template patterns only).
    pub fn without_card_enhancement(mut self) -> Self {
        self.enhance_card_suffix = false;
        self
    }

    fn snapshot(&self) -> Arc<TemplateLibrary> {
        self.templates.read().expect("template lock poisoned").clone()
    }

    /// Atomically swap in a new template library.
    pub fn reload(&self, library: TemplateLibrary) {
        *self.templates.write().expect("template lock poisoned") = Arc::new(library);
        info!("templates reloaded");
    }

    /// Reload templates from a file; on error the active library is kept.
    pub fn reload_from_file(&self, path: &Path) -> Result<()> {
        let library = TemplateLibrary::from_file(path)?;
        self.reload(library);
        Ok(())
    }

    pub fn supported_banks(&self) -> Vec<String> {
        self.snapshot().bank_ids()
    }

    pub fn bank_templates(&self, bank_id: &str) -> Result<Vec<String>> {
        self.snapshot().template_names(bank_id)
    }

    /// Parse one SMS message, optionally scoped to a bank hint.
    ///
    /// With a known hint only that bank's templates run; without one every
    /// bank's templates are candidates. The single best attempt wins: higher
    /// field count first, and on a tie a high-confidence attempt replaces a
    /// non-high one. An unknown hint or a message no template touches yields
    /// the explicit empty result.
    pub fn parse(&self, sms: &str, bank_hint: Option<&str>) -> ExtractedFields {
        let trimmed = sms.trim();
        if trimmed.is_empty() {
            warn!("empty SMS message provided");
            return ExtractedFields::empty(None, None);
        }

        let library = self.snapshot();
        let normalized = normalize_numerals(trimmed);

        let candidates: Vec<_> = match bank_hint {
            Some(hint) => match library.get(hint) {
                Some(bank) => vec![bank],
                None => {
                    warn!(bank_id = hint, "bank id not found in templates");
                    return ExtractedFields::empty(None, Some(trimmed.to_string()));
                }
            },
            None => library.banks().iter().collect(),
        };

        let mut best: Option<ExtractedFields> = None;
        let mut best_score = 0usize;

        for bank in candidates {
            for template in &bank.templates {
                let mut extracted = self.apply_template(&normalized, template);

                // Enhancement pass: templates that did not capture a card
                // suffix get one more chance through the dedicated extractor.
                if self.enhance_card_suffix && lookup(&extracted, "card_suffix").is_none() {
                    if let Some(suffix) = self.cards.extract(&normalized) {
                        upsert(&mut extracted, "card_suffix", Some(suffix));
                    }
                }

                let confidence = calculate_confidence(&extracted, &template.required_fields);
                let score = extracted.iter().filter(|(_, v)| v.is_some()).count();

                let replaces = score > best_score
                    || (score == best_score && confidence == Confidence::High);
                if replaces && score > 0 {
                    best_score = score;
                    best = Some(build_result(
                        &extracted,
                        confidence,
                        &bank.bank_id,
                        &template.name,
                        trimmed,
                    ));
                }
            }
        }

        match best {
            Some(result) => result,
            None => {
                warn!(preview = %preview(trimmed), "no template matched for SMS");
                ExtractedFields::empty(
                    bank_hint.map(str::to_string),
                    Some(trimmed.to_string()),
                )
            }
        }
    }

    /// Parse a batch of messages with optional per-message bank hints.
    /// A hint-list length mismatch is a hard input error.
    pub fn parse_batch(
        &self,
        messages: &[String],
        bank_hints: Option<&[Option<String>]>,
    ) -> Result<Vec<ExtractedFields>> {
        if let Some(hints) = bank_hints {
            if hints.len() != messages.len() {
                bail!(
                    "bank_hints length ({}) must match messages length ({})",
                    hints.len(),
                    messages.len()
                );
            }
        }

        let results = messages
            .iter()
            .enumerate()
            .map(|(i, sms)| {
                let hint = bank_hints.and_then(|h| h[i].as_deref());
                self.parse(sms, hint)
            })
            .collect();

        info!(count = messages.len(), "parsed SMS batch");
        Ok(results)
    }

    fn apply_template(
        &self,
        normalized_sms: &str,
        template: &Template,
    ) -> Vec<(String, Option<String>)> {
        template
            .fields
            .iter()
            .map(|field| {
                let value = field
                    .regex
                    .as_ref()
                    .and_then(|re| extract_field(re, normalized_sms, &field.name));
                (field.name.clone(), value)
            })
            .collect()
    }
}

/// Run one field pattern and pull out the captured value.
///
/// Precedence: a capture group named after the field wins; otherwise the
/// first non-null capture group. Values are trimmed and numeral-normalized.
fn extract_field(re: &Regex, text: &str, field_name: &str) -> Option<String> {
    let caps = re.captures(text)?;

    if let Some(m) = caps.name(field_name) {
        return Some(normalize_numerals(m.as_str().trim()));
    }

    for i in 1..caps.len() {
        if let Some(m) = caps.get(i) {
            return Some(normalize_numerals(m.as_str().trim()));
        }
    }

    None
}

/// Confidence tiers for one template attempt: any missing required field is
/// low; all-or-all-but-one extracted is high; at least half is medium.
fn calculate_confidence(
    extracted: &[(String, Option<String>)],
    required_fields: &[String],
) -> Confidence {
    let missing_required = required_fields
        .iter()
        .any(|req| lookup(extracted, req).is_none());
    if missing_required {
        return Confidence::Low;
    }

    let total = extracted.len();
    let filled = extracted.iter().filter(|(_, v)| v.is_some()).count();

    if total == 0 {
        return Confidence::Low;
    }
    if filled + 1 >= total {
        Confidence::High
    } else if filled >= total / 2 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn lookup<'a>(extracted: &'a [(String, Option<String>)], field: &str) -> Option<&'a str> {
    extracted
        .iter()
        .find(|(name, _)| name == field)
        .and_then(|(_, v)| v.as_deref())
}

fn upsert(extracted: &mut Vec<(String, Option<String>)>, field: &str, value: Option<String>) {
    match extracted.iter_mut().find(|(name, _)| name == field) {
        Some(entry) => entry.1 = value,
        None => extracted.push((field.to_string(), value)),
    }
}

fn build_result(
    extracted: &[(String, Option<String>)],
    confidence: Confidence,
    bank_id: &str,
    template_name: &str,
    sms_text: &str,
) -> ExtractedFields {
    ExtractedFields {
        amount: lookup(extracted, "amount").map(str::to_string),
        currency: lookup(extracted, "currency").map(str::to_string),
        date: lookup(extracted, "date").map(str::to_string),
        payee: lookup(extracted, "payee").map(str::to_string),
        transaction_type: lookup(extracted, "transaction_type").map(str::to_string),
        card_suffix: lookup(extracted, "card_suffix").map(str::to_string),
        confidence,
        matched_bank: Some(bank_id.to_string()),
        matched_template: Some(template_name.to_string()),
        sms_text: Some(sms_text.to_string()),
    }
}

fn preview(sms: &str) -> String {
    sms.chars().take(50).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TemplateEngine {
        TemplateEngine::with_builtin()
    }

    #[test]
    fn test_parse_hsbc_english() {
        let sms = "Your HSBC card ending 1234 was charged 250.50 EGP at Store XYZ on 15/11/2024";
        let result = engine().parse(sms, Some("HSBC"));

        assert_eq!(result.amount.as_deref(), Some("250.50"));
        assert_eq!(result.currency.as_deref(), Some("EGP"));
        assert_eq!(result.card_suffix.as_deref(), Some("1234"));
        assert_eq!(result.date.as_deref(), Some("15/11/2024"));
        assert_eq!(result.matched_bank.as_deref(), Some("HSBC"));
    }

    #[test]
    fn test_parse_arabic_with_arabic_numerals() {
        let sms = "تم خصم ١٥٠٫٥٠ جنيه من بطاقة رقم ٥٦٧٨";
        let result = engine().parse(sms, Some("HSBC"));

        assert_eq!(result.amount.as_deref(), Some("150.50"));
        assert_eq!(result.currency.as_deref(), Some("جنيه"));
        assert_eq!(result.card_suffix.as_deref(), Some("5678"));
    }

    #[test]
    fn test_parse_without_hint_tries_all_banks() {
        let sms = "CIB: Your card ending 9999 Purchase of 500 EGP from MERCHANT NAME.";
        let result = engine().parse(sms, None);

        assert_eq!(result.amount.as_deref(), Some("500"));
        assert!(result.matched_bank.is_some());
    }

    #[test]
    fn test_unknown_bank_hint_is_empty_result() {
        let result = engine().parse("charged 100 EGP", Some("NoSuchBank"));
        assert_eq!(result.amount, None);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.sms_text.as_deref(), Some("charged 100 EGP"));
    }

    #[test]
    fn test_no_match_preserves_raw_text() {
        let result = engine().parse("hello world", Some("HSBC"));
        assert_eq!(result.amount, None);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.matched_bank.as_deref(), Some("HSBC"));
        assert_eq!(result.sms_text.as_deref(), Some("hello world"));
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        for sms in ["", "   ", "\n\t"] {
            let result = engine().parse(sms, None);
            assert_eq!(result.amount, None);
            assert_eq!(result.confidence, Confidence::Low);
        }
    }

    #[test]
    fn test_score_tie_high_confidence_wins() {
        // Template A extracts amount+currency+date but misses a required
        // field; template B extracts the same count with all required
        // present. B must win on the confidence tie-break.
        let value = serde_json::json!({
            "Bank": [
                {
                    "name": "A",
                    "patterns": {
                        "amount": r"(?P<amount>\d+(?:\.\d+)?)",
                        "currency": r"\d\s*(?P<currency>EGP)",
                        "date": r"on\s+(?P<date>\S+)",
                        "payee": r"at\s+(?P<payee>ZZZ)"
                    },
                    "required_fields": ["amount", "payee"]
                },
                {
                    "name": "B",
                    "patterns": {
                        "amount": r"(?P<amount>\d+(?:\.\d+)?)",
                        "currency": r"\d\s*(?P<currency>EGP)",
                        "date": r"on\s+(?P<date>\S+)"
                    },
                    "required_fields": ["amount"]
                }
            ]
        });
        let engine = TemplateEngine::new(TemplateLibrary::from_value(&value).unwrap())
            .without_card_enhancement();

        let result = engine.parse("charged 100 EGP on 15/11/2024", Some("Bank"));
        assert_eq!(result.matched_template.as_deref(), Some("B"));
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_higher_score_wins() {
        let value = serde_json::json!({
            "Bank": [
                {
                    "name": "narrow",
                    "patterns": { "amount": r"(?P<amount>\d+)" }
                },
                {
                    "name": "wide",
                    "patterns": {
                        "amount": r"(?P<amount>\d+)",
                        "currency": r"\d\s*(?P<currency>EGP)"
                    }
                }
            ]
        });
        let engine = TemplateEngine::new(TemplateLibrary::from_value(&value).unwrap())
            .without_card_enhancement();

        let result = engine.parse("paid 100 EGP", Some("Bank"));
        assert_eq!(result.matched_template.as_deref(), Some("wide"));
    }

    #[test]
    fn test_card_suffix_enhancement_pass() {
        // Generic template has no card_suffix pattern; the enhancement pass
        // still surfaces the suffix.
        let sms = "Transaction of 300 EGP on card ending 4321";
        let result = engine().parse(sms, Some("Generic_Bank"));
        assert_eq!(result.card_suffix.as_deref(), Some("4321"));
    }

    #[test]
    fn test_unnamed_group_fallback() {
        let value = serde_json::json!({
            "Bank": [
                { "patterns": { "amount": r"total\s+(\d+)" } }
            ]
        });
        let engine = TemplateEngine::new(TemplateLibrary::from_value(&value).unwrap())
            .without_card_enhancement();

        let result = engine.parse("total 450", Some("Bank"));
        assert_eq!(result.amount.as_deref(), Some("450"));
    }

    #[test]
    fn test_batch_length_mismatch_is_error() {
        let messages = vec!["a".to_string(), "b".to_string()];
        let hints = vec![Some("HSBC".to_string())];
        assert!(engine().parse_batch(&messages, Some(&hints)).is_err());
    }

    #[test]
    fn test_batch_parses_each_message() {
        let messages = vec![
            "HSBC card charged 100 EGP at Shop".to_string(),
            "not a transaction".to_string(),
        ];
        let results = engine().parse_batch(&messages, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].amount.as_deref(), Some("100"));
        assert_eq!(results[1].amount, None);
    }
}
