// ✅ Field Validator
//
// Syntactic per-field checks over extracted transaction data, with warning
// accumulation and confidence recomputation. Validation is total: malformed
// values become warnings on a degraded record, never errors.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use tracing::{info, warn};

use crate::engine::ExtractedFields;
use crate::schema::Confidence;
use crate::state::TransactionState;

// ============================================================================
// VALIDATED TRANSACTION
// ============================================================================

/// Extracted fields promoted through validation.
///
/// Field aliasing happens here: the engine's `transaction_type` becomes
/// `txn_type` and `matched_bank` becomes `bank_id`. Confidence is derived,
/// never set directly; see `recompute_confidence`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidatedTransaction {
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub date: Option<String>,
    pub payee: Option<String>,
    pub txn_type: Option<String>,
    pub card_suffix: Option<String>,
    pub bank_id: Option<String>,
    pub confidence: Confidence,
    pub warnings: Vec<String>,
    pub transaction_state: Option<TransactionState>,
    pub resolved_date: Option<String>,
    pub extracted_date_raw: Option<String>,
    pub text_repaired: bool,
}

/// Per-message context carried alongside the extracted fields: values the
/// repair and state stages produced before validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub transaction_state: Option<TransactionState>,
    pub resolved_date: Option<String>,
    pub extracted_date_raw: Option<String>,
    pub text_repaired: bool,
}

// ============================================================================
// VALIDATOR
// ============================================================================

const VALID_CURRENCIES: [&str; 26] = [
    "EGP", "USD", "EUR", "GBP", "SAR", "AED", "KWD", "QAR", "BHD", "OMR", "JOD", "LBP", "IQD",
    "SYP", "YER", "TND", "MAD", "DZD", "SDG", "LYD",
    // Arabic currency names
    "جنيه", "دولار", "يورو", "ريال", "درهم", "دينار",
];

const DATE_FORMATS: [&str; 11] = [
    "%d/%m/%Y", "%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y", "%Y.%m.%d",
    "%d %b %Y", "%d %B %Y", "%b %d, %Y", "%B %d, %Y",
];

#[derive(Debug, Default)]
pub struct FieldValidator;

impl FieldValidator {
    pub fn new() -> Self {
        FieldValidator
    }

    /// Validate one extracted record. Never fails; malformed values degrade
    /// to warnings and a recomputed confidence.
    pub fn validate(&self, fields: &ExtractedFields, ctx: ValidationContext) -> ValidatedTransaction {
        let amount = normalize_amount(fields.amount.as_deref());
        let currency = clean_field(fields.currency.as_deref()).map(|c| c.to_uppercase());
        let date = clean_field(fields.date.as_deref());
        let payee = clean_field(fields.payee.as_deref());
        let txn_type = clean_field(fields.transaction_type.as_deref());
        let card_suffix = clean_field(fields.card_suffix.as_deref());
        let bank_id = clean_field(fields.matched_bank.as_deref());

        let mut warnings = Vec::new();
        let mut amount_critical = false;

        // Amount: must parse as a positive decimal after stripping grouping
        match amount.as_deref() {
            Some(value) => match Decimal::from_str(&strip_grouping(value)) {
                Ok(parsed) => {
                    if parsed <= Decimal::ZERO {
                        warnings.push("Amount must be positive".to_string());
                    }
                }
                Err(_) => {
                    warnings.push(format!("Invalid numeric format for amount: {}", value));
                    amount_critical = true;
                }
            },
            None => {
                warnings.push("Missing required field: amount".to_string());
                amount_critical = true;
            }
        }

        // Currency: fixed allow-list of ISO and Arabic tokens
        match currency.as_deref() {
            Some(value) => {
                if !VALID_CURRENCIES.contains(&value) {
                    warnings.push(format!("Invalid currency code: {}", value));
                }
            }
            None => warnings.push("Missing currency field".to_string()),
        }

        // Date: any of the accepted formats
        if let Some(value) = date.as_deref() {
            if !parses_as_date(value) {
                warnings.push(format!("Malformed date: {}", value));
            }
        }

        // Card suffix: exactly 4 digits
        if let Some(value) = card_suffix.as_deref() {
            if value.len() != 4 || !value.chars().all(|c| c.is_ascii_digit()) {
                warnings.push(format!(
                    "Invalid card suffix (must be 4 digits): {}",
                    value
                ));
            }
        }

        let confidence = recompute_confidence(
            fields.confidence,
            amount_critical,
            &warnings,
            amount.is_some(),
            currency.is_some(),
            date.is_some(),
        );

        if warnings.is_empty() {
            info!("transaction validation successful");
        } else {
            warn!(?warnings, "transaction validation completed with warnings");
        }

        ValidatedTransaction {
            amount,
            currency,
            date,
            payee,
            txn_type,
            card_suffix,
            bank_id,
            confidence,
            warnings,
            transaction_state: ctx.transaction_state,
            resolved_date: ctx.resolved_date,
            extracted_date_raw: ctx.extracted_date_raw,
            text_repaired: ctx.text_repaired,
        }
    }

    /// Validate a batch; each record independently.
    pub fn validate_batch(
        &self,
        batch: &[(ExtractedFields, ValidationContext)],
    ) -> Vec<ValidatedTransaction> {
        let results = batch
            .iter()
            .map(|(fields, ctx)| self.validate(fields, ctx.clone()))
            .collect::<Vec<_>>();
        info!(count = results.len(), "validated transaction batch");
        results
    }
}

fn clean_field(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn strip_grouping(value: &str) -> String {
    value.replace([',', ' '], "")
}

/// Amount normalization: keep the stripped form when it parses cleanly,
/// otherwise keep the original so the warning can quote it.
fn normalize_amount(value: Option<&str>) -> Option<String> {
    let trimmed = clean_field(value)?;
    let stripped = strip_grouping(&trimmed);
    if stripped.is_empty() {
        return None;
    }
    if Decimal::from_str(&stripped).is_ok() {
        Some(stripped)
    } else {
        Some(trimmed)
    }
}

fn parses_as_date(value: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(value, fmt).is_ok())
}

/// Confidence invariant: `low` whenever the amount is missing or unparsable
/// (or two-plus warnings accumulated); `medium` with any warning; `high`
/// only when amount, currency, and date are all present with zero warnings.
/// Otherwise the incoming confidence stands.
fn recompute_confidence(
    incoming: Confidence,
    amount_critical: bool,
    warnings: &[String],
    has_amount: bool,
    has_currency: bool,
    has_date: bool,
) -> Confidence {
    if amount_critical || warnings.len() >= 2 {
        Confidence::Low
    } else if !warnings.is_empty() {
        Confidence::Medium
    } else if has_amount && has_currency && has_date {
        Confidence::High
    } else {
        incoming
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(
        amount: Option<&str>,
        currency: Option<&str>,
        date: Option<&str>,
    ) -> ExtractedFields {
        let mut f = ExtractedFields::empty(None, None);
        f.amount = amount.map(str::to_string);
        f.currency = currency.map(str::to_string);
        f.date = date.map(str::to_string);
        f.confidence = Confidence::Medium;
        f
    }

    #[test]
    fn test_valid_record_is_high_confidence() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("100.50"), Some("EGP"), Some("15/11/2024")),
            ValidationContext::default(),
        );
        assert_eq!(result.confidence, Confidence::High);
        assert!(result.warnings.is_empty());
        assert_eq!(result.amount.as_deref(), Some("100.50"));
    }

    #[test]
    fn test_missing_amount_is_low_confidence() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(None, Some("EGP"), Some("15/11/2024")),
            ValidationContext::default(),
        );
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result
            .warnings
            .contains(&"Missing required field: amount".to_string()));
    }

    #[test]
    fn test_unparsable_amount_is_low_confidence() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("12x.y"), Some("EGP"), Some("15/11/2024")),
            ValidationContext::default(),
        );
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.warnings.iter().any(|w| w.contains("Invalid numeric format")));
    }

    #[test]
    fn test_negative_amount_warns() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("-50"), Some("EGP"), Some("15/11/2024")),
            ValidationContext::default(),
        );
        assert!(result.warnings.contains(&"Amount must be positive".to_string()));
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn test_grouping_separators_stripped() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("1,234.56"), Some("EGP"), None),
            ValidationContext::default(),
        );
        assert_eq!(result.amount.as_deref(), Some("1234.56"));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_invalid_currency_warns() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("100"), Some("XXX"), None),
            ValidationContext::default(),
        );
        assert!(result.warnings.iter().any(|w| w.contains("Invalid currency code")));
    }

    #[test]
    fn test_arabic_currency_accepted() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("100"), Some("جنيه"), Some("15/11/2024")),
            ValidationContext::default(),
        );
        assert!(result.warnings.is_empty());
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_missing_currency_warns_medium() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("100"), None, Some("15/11/2024")),
            ValidationContext::default(),
        );
        assert!(result.warnings.contains(&"Missing currency field".to_string()));
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn test_malformed_date_warns() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("100"), Some("EGP"), Some("not-a-date")),
            ValidationContext::default(),
        );
        assert!(result.warnings.iter().any(|w| w.contains("Malformed date")));
    }

    #[test]
    fn test_textual_month_date_accepted() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("100"), Some("EGP"), Some("15 Nov 2024")),
            ValidationContext::default(),
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_bad_card_suffix_warns() {
        let validator = FieldValidator::new();
        let mut f = fields(Some("100"), Some("EGP"), Some("15/11/2024"));
        f.card_suffix = Some("12a4".to_string());
        let result = validator.validate(&f, ValidationContext::default());
        assert!(result.warnings.iter().any(|w| w.contains("Invalid card suffix")));
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn test_two_warnings_demote_to_low() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &fields(Some("100"), Some("XXX"), Some("junk")),
            ValidationContext::default(),
        );
        assert!(result.warnings.len() >= 2);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn test_aliases_applied() {
        let validator = FieldValidator::new();
        let mut f = fields(Some("100"), Some("EGP"), None);
        f.transaction_type = Some("POS".to_string());
        f.matched_bank = Some("HSBC".to_string());
        let result = validator.validate(&f, ValidationContext::default());
        assert_eq!(result.txn_type.as_deref(), Some("POS"));
        assert_eq!(result.bank_id.as_deref(), Some("HSBC"));
    }

    #[test]
    fn test_context_passes_through() {
        let validator = FieldValidator::new();
        let ctx = ValidationContext {
            transaction_state: Some(TransactionState::Monetary),
            resolved_date: Some("2024-11-15".to_string()),
            extracted_date_raw: Some("15/11".to_string()),
            text_repaired: true,
        };
        let result = validator.validate(&fields(Some("100"), Some("EGP"), None), ctx);
        assert_eq!(result.transaction_state, Some(TransactionState::Monetary));
        assert_eq!(result.resolved_date.as_deref(), Some("2024-11-15"));
        assert!(result.text_repaired);
    }

    #[test]
    fn test_totally_empty_input_is_low_not_panic() {
        let validator = FieldValidator::new();
        let result = validator.validate(
            &ExtractedFields::empty(None, None),
            ValidationContext::default(),
        );
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.amount.is_none());
    }
}
