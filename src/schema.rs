// 📋 Canonical Schema - unified transaction record + normalizer
//
// Every message ends up as exactly one TransactionRecord: ISO date, float
// amount, NFC-normalized text, attached account metadata, derived urgency.
// The record is immutable after creation except for the category fields,
// which the categorizer may set post hoc.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::cards::{AccountRegistry, AccountType};
use crate::state::TransactionState;
use crate::validator::ValidatedTransaction;

// ============================================================================
// VOCABULARY
// ============================================================================

/// Discrete extraction/validation completeness summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// Derived attention-priority tag based on amount and account type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    #[default]
    Normal,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Normal => "normal",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Urgency::High,
            "medium" => Urgency::Medium,
            _ => Urgency::Normal,
        }
    }
}

// ============================================================================
// TRANSACTION RECORD
// ============================================================================

/// Canonical output record, created exactly once per input message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub date: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub payee: Option<String>,
    pub normalized_merchant: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub tags: Vec<String>,
    pub account_id: Option<String>,
    pub account_type: Option<AccountType>,
    pub interest_rate: Option<f64>,
    pub urgency: Urgency,
    pub confidence: Confidence,
    pub transaction_state: TransactionState,
    pub text_repaired: bool,
    pub extracted_date_raw: Option<String>,
    pub ml_category: Option<String>,
    pub ml_category_score: Option<f64>,
    pub ml_category_confidence: Option<Confidence>,
}

impl TransactionRecord {
    /// Minimal record for degraded paths: fresh id, low confidence,
    /// everything else null.
    pub fn minimal() -> Self {
        TransactionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            date: None,
            amount: None,
            currency: None,
            payee: None,
            normalized_merchant: None,
            category: None,
            subcategory: None,
            tags: Vec::new(),
            account_id: None,
            account_type: None,
            interest_rate: None,
            urgency: Urgency::Normal,
            confidence: Confidence::Low,
            transaction_state: TransactionState::Unknown,
            text_repaired: false,
            extracted_date_raw: None,
            ml_category: None,
            ml_category_score: None,
            ml_category_confidence: None,
        }
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

const DATE_FORMATS: [&str; 11] = [
    "%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y", "%Y.%m.%d",
    "%d %b %Y", "%d %B %Y", "%b %d, %Y", "%B %d, %Y",
];

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%d/%m/%Y %H:%M:%S"];

/// Transforms a validated transaction into the canonical record.
pub struct SchemaNormalizer {
    accounts: Arc<AccountRegistry>,
}

impl SchemaNormalizer {
    pub fn new(accounts: Arc<AccountRegistry>) -> Self {
        SchemaNormalizer { accounts }
    }

    /// Normalize one validated transaction. Total: any unusable value
    /// degrades to null on the record, never to an error.
    pub fn normalize(&self, txn: &ValidatedTransaction) -> TransactionRecord {
        let mut record = TransactionRecord::minimal();

        record.date = normalize_date(txn.resolved_date.as_deref().or(txn.date.as_deref()));
        record.amount = safe_float_cast(txn.amount.as_deref());
        record.currency = normalize_text(txn.currency.as_deref());
        record.payee = normalize_text(txn.payee.as_deref());
        record.normalized_merchant = normalize_merchant(record.payee.as_deref());

        if let Some(suffix) = txn.card_suffix.as_deref() {
            let metadata = self.accounts.lookup(suffix);
            record.account_id = Some(metadata.account_id);
            record.account_type = Some(metadata.account_type);
            record.interest_rate = metadata.interest_rate;
        }

        record.urgency = determine_urgency(record.amount, record.account_type);
        record.category = Some("Uncategorized".to_string());
        record.subcategory = Some("General".to_string());
        record.tags = extract_tags(txn);
        record.confidence = txn.confidence;
        record.transaction_state = txn.transaction_state.unwrap_or_default();
        record.text_repaired = txn.text_repaired;
        record.extracted_date_raw = txn.extracted_date_raw.clone();

        debug!(id = %record.id, "normalized transaction");
        record
    }

    /// Normalize a batch; each record independently.
    pub fn normalize_batch(&self, txns: &[ValidatedTransaction]) -> Vec<TransactionRecord> {
        let records: Vec<TransactionRecord> = txns.iter().map(|t| self.normalize(t)).collect();
        info!(count = records.len(), "normalized transaction batch");
        records
    }
}

/// Normalize a date string to ISO 8601 (`YYYY-MM-DD`), trying the date
/// formats first and the datetime formats after.
fn normalize_date(date: Option<&str>) -> Option<String> {
    let raw = date?.trim();
    if raw.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(parsed.format("%Y-%m-%d").to_string());
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(parsed.date().format("%Y-%m-%d").to_string());
        }
    }

    warn!(date = raw, "could not parse date");
    None
}

/// Cast an amount string to f64, stripping grouping characters and going
/// through arbitrary-precision decimal to avoid binary-float surprises.
fn safe_float_cast(value: Option<&str>) -> Option<f64> {
    let cleaned = value?.trim().replace([',', ' '], "");
    if cleaned.is_empty() {
        return None;
    }
    match Decimal::from_str(&cleaned) {
        Ok(decimal) => decimal.to_f64(),
        Err(_) => {
            warn!(value = cleaned, "could not cast amount to float");
            None
        }
    }
}

/// NFC normalization plus whitespace collapsing for free-text fields.
fn normalize_text(text: Option<&str>) -> Option<String> {
    let trimmed = text?.trim();
    if trimmed.is_empty() {
        return None;
    }
    let composed: String = trimmed.nfc().collect();
    Some(composed.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Merchant form of the payee. Currently the normalized payee itself;
/// alias-level standardization happens in the categorizer's rule base.
fn normalize_merchant(payee: Option<&str>) -> Option<String> {
    normalize_text(payee)
}

/// Urgency: high for amounts ≥ 10000, medium for credit-card amounts
/// ≥ 5000, normal otherwise.
fn determine_urgency(amount: Option<f64>, account_type: Option<AccountType>) -> Urgency {
    let amount = match amount {
        Some(a) => a,
        None => return Urgency::Normal,
    };

    if amount >= 10_000.0 {
        return Urgency::High;
    }
    if account_type == Some(AccountType::Credit) && amount >= 5_000.0 {
        return Urgency::Medium;
    }
    Urgency::Normal
}

fn extract_tags(txn: &ValidatedTransaction) -> Vec<String> {
    let mut tags = Vec::new();
    if let Some(txn_type) = txn.txn_type.as_deref() {
        tags.push(txn_type.to_string());
    }
    if let Some(bank_id) = txn.bank_id.as_deref() {
        tags.push(bank_id.to_string());
    }
    if !txn.warnings.is_empty() {
        tags.push("has-warnings".to_string());
    }
    tags
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> SchemaNormalizer {
        SchemaNormalizer::new(Arc::new(AccountRegistry::empty()))
    }

    fn validated(amount: Option<&str>, date: Option<&str>) -> ValidatedTransaction {
        ValidatedTransaction {
            amount: amount.map(str::to_string),
            date: date.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_date_normalized_to_iso() {
        let record = normalizer().normalize(&validated(Some("100.50"), Some("15/11/2024")));
        assert_eq!(record.date.as_deref(), Some("2024-11-15"));
        assert_eq!(record.amount, Some(100.5));
    }

    #[test]
    fn test_resolved_date_preferred_over_raw() {
        let mut txn = validated(Some("100"), Some("15/11/2024"));
        txn.resolved_date = Some("2024-01-02".to_string());
        let record = normalizer().normalize(&txn);
        assert_eq!(record.date.as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn test_amount_via_decimal() {
        let record = normalizer().normalize(&validated(Some("1,234.56"), None));
        assert_eq!(record.amount, Some(1234.56));
    }

    #[test]
    fn test_unparsable_values_become_null() {
        let record = normalizer().normalize(&validated(Some("abc"), Some("nonsense")));
        assert_eq!(record.amount, None);
        assert_eq!(record.date, None);
        // still a structurally complete record
        assert!(!record.id.is_empty());
    }

    #[test]
    fn test_payee_nfc_and_whitespace_collapse() {
        let mut txn = validated(Some("50"), None);
        txn.payee = Some("  Cafe\u{0301}   Centrale  ".to_string());
        let record = normalizer().normalize(&txn);
        // U+0301 combining acute composes into é under NFC
        assert_eq!(record.payee.as_deref(), Some("Café Centrale"));
        assert_eq!(record.normalized_merchant.as_deref(), Some("Café Centrale"));
    }

    #[test]
    fn test_unknown_suffix_attaches_fallback_metadata() {
        let mut txn = validated(Some("50"), None);
        txn.card_suffix = Some("9876".to_string());
        let record = normalizer().normalize(&txn);
        assert_eq!(record.account_id.as_deref(), Some("unknown_9876"));
        assert_eq!(record.account_type, Some(AccountType::Unknown));
    }

    #[test]
    fn test_absent_suffix_means_empty_metadata() {
        let record = normalizer().normalize(&validated(Some("50"), None));
        assert_eq!(record.account_id, None);
        assert_eq!(record.account_type, None);
    }

    #[test]
    fn test_urgency_tiers() {
        assert_eq!(determine_urgency(None, None), Urgency::Normal);
        assert_eq!(determine_urgency(Some(15_000.0), None), Urgency::High);
        assert_eq!(
            determine_urgency(Some(6_000.0), Some(AccountType::Credit)),
            Urgency::Medium
        );
        assert_eq!(
            determine_urgency(Some(6_000.0), Some(AccountType::Debit)),
            Urgency::Normal
        );
        assert_eq!(
            determine_urgency(Some(100.0), Some(AccountType::Credit)),
            Urgency::Normal
        );
    }

    #[test]
    fn test_tags_from_type_bank_and_warnings() {
        let mut txn = validated(Some("50"), None);
        txn.txn_type = Some("POS".to_string());
        txn.bank_id = Some("HSBC".to_string());
        txn.warnings = vec!["Missing currency field".to_string()];
        let record = normalizer().normalize(&txn);
        assert_eq!(record.tags, vec!["POS", "HSBC", "has-warnings"]);
    }

    #[test]
    fn test_defaults_for_category_fields() {
        let record = normalizer().normalize(&validated(None, None));
        assert_eq!(record.category.as_deref(), Some("Uncategorized"));
        assert_eq!(record.subcategory.as_deref(), Some("General"));
        assert!(record.ml_category.is_none());
    }

    #[test]
    fn test_each_record_gets_unique_id() {
        let n = normalizer();
        let a = n.normalize(&validated(None, None));
        let b = n.normalize(&validated(None, None));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_minimal_record_shape() {
        let record = TransactionRecord::minimal();
        assert_eq!(record.confidence, Confidence::Low);
        assert_eq!(record.transaction_state, TransactionState::Unknown);
        assert!(record.amount.is_none());
    }
}
