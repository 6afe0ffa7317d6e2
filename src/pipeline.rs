// 🔩 Pipeline Orchestrator
//
// Composes repair → template extraction → state classification →
// validation → normalization → (categorization) → (ML scoring) for one
// message, and the same sequence independently per message for a batch.
// Every message yields a record; nothing in the hot path can fail.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::categorizer::Categorizer;
use crate::engine::TemplateEngine;
use crate::ml::CategoryScorer;
use crate::promo::PromoClassifier;
use crate::repair::{repair_text, resolve_timestamp};
use crate::banks::{BankRecognizer, UNKNOWN_BANK};
use crate::schema::{SchemaNormalizer, TransactionRecord};
use crate::state::StateClassifier;
use crate::validator::{FieldValidator, ValidationContext};

// ============================================================================
// RAW MESSAGE
// ============================================================================

/// One SMS message plus its optional context. Immutable input.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub text: String,
    /// Caller-supplied bank hint; when absent the recognizer (if any) runs
    pub bank_id: Option<String>,
    /// When the message entered the system; defaults to now
    pub ingested_at: Option<DateTime<Utc>>,
    /// Modification time of the source file, for year inference
    pub file_modified_at: Option<DateTime<Utc>>,
}

impl RawMessage {
    pub fn from_text(text: impl Into<String>) -> Self {
        RawMessage {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_bank(mut self, bank_id: impl Into<String>) -> Self {
        self.bank_id = Some(bank_id.into());
        self
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// End-to-end SMS transaction pipeline.
///
/// Construction wires the mandatory stages; the categorizer, bank
/// recognizer, and ML scorer are optional collaborators whose absence
/// changes nothing else.
pub struct SmsPipeline {
    engine: TemplateEngine,
    promo: PromoClassifier,
    state: StateClassifier,
    validator: FieldValidator,
    normalizer: SchemaNormalizer,
    categorizer: Option<Categorizer>,
    recognizer: Option<BankRecognizer>,
    scorer: Option<Box<dyn CategoryScorer>>,
}

impl SmsPipeline {
    pub fn new(engine: TemplateEngine, promo: PromoClassifier, normalizer: SchemaNormalizer) -> Self {
        SmsPipeline {
            engine,
            promo,
            state: StateClassifier::new(),
            validator: FieldValidator::new(),
            normalizer,
            categorizer: None,
            recognizer: None,
            scorer: None,
        }
    }

    /// Pipeline over the built-in templates, default keywords, and an
    /// empty account registry.
    pub fn with_defaults() -> Self {
        Self::new(
            TemplateEngine::with_builtin(),
            PromoClassifier::new(),
            SchemaNormalizer::new(std::sync::Arc::new(
                crate::cards::AccountRegistry::empty(),
            )),
        )
    }

    pub fn with_categorizer(mut self, categorizer: Categorizer) -> Self {
        self.categorizer = Some(categorizer);
        self
    }

    pub fn with_bank_recognizer(mut self, recognizer: BankRecognizer) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_scorer(mut self, scorer: Box<dyn CategoryScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    pub fn promo(&self) -> &PromoClassifier {
        &self.promo
    }

    pub fn categorizer(&self) -> Option<&Categorizer> {
        self.categorizer.as_ref()
    }

    /// Process one message into a canonical record. Total: any input,
    /// including empty or garbage text, produces a structurally valid
    /// record at worst at low confidence.
    pub fn process(&self, message: &RawMessage) -> TransactionRecord {
        let ingested_at = message.ingested_at.unwrap_or_else(Utc::now);

        // 1. Repair: mojibake + NFC, with audit flag
        let (repaired, text_repaired) = repair_text(&message.text);

        // 2. Bank hint: caller's, else recognizer's
        let hint = match &message.bank_id {
            Some(bank) => Some(bank.clone()),
            None => self.recognizer.as_ref().and_then(|r| {
                let bank = r.identify(&repaired);
                if bank == UNKNOWN_BANK {
                    None
                } else {
                    Some(bank)
                }
            }),
        };

        // 3. Template extraction
        let fields = self.engine.parse(&repaired, hint.as_deref());

        // 4. Timestamp resolution from the raw extracted date
        let extracted_date_raw = fields.date.clone();
        let resolved_date = resolve_timestamp(
            fields.date.as_deref(),
            message.file_modified_at,
            ingested_at,
        );

        // 5. State classification
        let state = self
            .state
            .classify(&repaired, fields.amount.is_some(), &self.promo);

        // 6. Validation
        let validated = self.validator.validate(
            &fields,
            ValidationContext {
                transaction_state: Some(state),
                resolved_date,
                extracted_date_raw,
                text_repaired,
            },
        );

        // 7. Normalization into the canonical record
        let mut record = self.normalizer.normalize(&validated);

        // 8. Optional categorization
        if let Some(categorizer) = &self.categorizer {
            categorizer.categorize(&mut record);
        }

        // 9. Optional ML scoring over concatenated text features
        if let Some(scorer) = &self.scorer {
            let features = text_features(&repaired, &record, validated.txn_type.as_deref());
            if let Some(prediction) = scorer.predict(&features) {
                record.ml_category = prediction.category.clone();
                record.ml_category_score = Some(prediction.probability);
                record.ml_category_confidence = Some(prediction.confidence);
            }
        }

        debug!(
            id = %record.id,
            state = record.transaction_state.as_str(),
            confidence = record.confidence.as_str(),
            "processed message"
        );
        record
    }

    /// Process a batch of messages. Each message's outcome is fully
    /// independent; order of results matches order of inputs.
    pub fn process_batch(&self, messages: &[RawMessage]) -> Vec<TransactionRecord> {
        let records: Vec<TransactionRecord> =
            messages.iter().map(|m| self.process(m)).collect();
        info!(count = records.len(), "processed message batch");
        records
    }
}

/// Text features handed to the ML scorer: raw text plus the strongest
/// merchant and type signals from the record.
fn text_features(sms: &str, record: &TransactionRecord, txn_type: Option<&str>) -> String {
    let mut parts = vec![sms.to_string()];
    if let Some(payee) = &record.payee {
        parts.push(payee.clone());
    }
    if let Some(merchant) = &record.normalized_merchant {
        parts.push(merchant.clone());
    }
    if let Some(txn_type) = txn_type {
        parts.push(txn_type.to_string());
    }
    parts.join(" ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::AccountRegistry;
    use crate::categorizer::RuleSet;
    use crate::ml::CategoryPrediction;
    use crate::schema::{Confidence, SchemaNormalizer};
    use crate::state::TransactionState;
    use std::sync::Arc;

    fn pipeline() -> SmsPipeline {
        SmsPipeline::with_defaults()
    }

    #[test]
    fn test_end_to_end_arabic_monetary() {
        let record = pipeline().process(
            &RawMessage::from_text("تم خصم ١٥٠٫٥٠ جنيه من بطاقة رقم ٥٦٧٨").with_bank("HSBC"),
        );

        assert_eq!(record.amount, Some(150.50));
        assert_eq!(record.currency.as_deref(), Some("جنيه"));
        assert_eq!(record.account_id.as_deref(), Some("unknown_5678"));
        assert_eq!(record.transaction_state, TransactionState::Monetary);
    }

    #[test]
    fn test_end_to_end_english_with_date() {
        let record = pipeline().process(
            &RawMessage::from_text(
                "Your HSBC card ending 1234 was charged 250.50 EGP at Store XYZ on 15/11/2024",
            )
            .with_bank("HSBC"),
        );

        assert_eq!(record.amount, Some(250.50));
        assert_eq!(record.date.as_deref(), Some("2024-11-15"));
        assert_eq!(record.payee.as_deref(), Some("Store XYZ"));
        assert_eq!(record.transaction_state, TransactionState::Monetary);
        assert!(record.tags.contains(&"HSBC".to_string()));
    }

    #[test]
    fn test_declined_with_amount_stays_declined() {
        let record = pipeline().process(&RawMessage::from_text(
            "Transaction of 250.00 EGP at Store was declined",
        ));
        assert_eq!(record.transaction_state, TransactionState::Declined);
    }

    #[test]
    fn test_otp_state() {
        let record = pipeline().process(&RawMessage::from_text(
            "Your OTP code is 123456, valid for 5 minutes",
        ));
        assert_eq!(record.transaction_state, TransactionState::Otp);
    }

    #[test]
    fn test_promo_state() {
        let record = pipeline().process(&RawMessage::from_text(
            "Special offer! Enjoy exclusive rewards and free gifts",
        ));
        assert_eq!(record.transaction_state, TransactionState::Promo);
    }

    #[test]
    fn test_garbage_input_is_total() {
        for text in ["", "   ", "\u{0000}\u{fffd}xx", "no transaction here"] {
            let record = pipeline().process(&RawMessage::from_text(text));
            assert_eq!(record.confidence, Confidence::Low);
            assert!(!record.id.is_empty());
        }
    }

    #[test]
    fn test_day_month_year_inference() {
        use chrono::TimeZone;
        let msg = RawMessage {
            text: "charged 100 EGP at Shop on 15/11".to_string(),
            bank_id: Some("HSBC".to_string()),
            ingested_at: Some(Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap()),
            file_modified_at: None,
        };
        let record = pipeline().process(&msg);
        assert_eq!(record.date.as_deref(), Some("2024-11-15"));
        assert_eq!(record.extracted_date_raw.as_deref(), Some("15/11"));
    }

    #[test]
    fn test_categorizer_runs_when_installed() {
        let rules = r#"{
            "rules": [
                { "match_regex": "(?i)store", "category": "Shopping", "subcategory": "Retail", "tags": ["Retail"] }
            ]
        }"#;
        let pipeline = SmsPipeline::with_defaults()
            .with_categorizer(Categorizer::with_rules(RuleSet::from_str(rules).unwrap()));

        let record = pipeline.process(&RawMessage::from_text(
            "Your HSBC card was charged 100 EGP at Store XYZ on 15/11/2024",
        ));
        assert_eq!(record.category.as_deref(), Some("Shopping"));
        assert!(record.tags.contains(&"Retail".to_string()));
    }

    #[test]
    fn test_recognizer_supplies_missing_hint() {
        let patterns = serde_json::json!({ "HSBC": ["HSBC"] });
        let pipeline = SmsPipeline::with_defaults()
            .with_bank_recognizer(BankRecognizer::from_value(&patterns).unwrap());

        let record = pipeline.process(&RawMessage::from_text(
            "HSBC alert: charged 75 EGP at Cafe",
        ));
        assert!(record.tags.contains(&"HSBC".to_string()));
    }

    struct FixedScorer;
    impl CategoryScorer for FixedScorer {
        fn predict(&self, _text: &str) -> Option<CategoryPrediction> {
            Some(CategoryPrediction::from_probability(
                Some("Transport".to_string()),
                0.9,
            ))
        }
    }

    #[test]
    fn test_scorer_fills_ml_fields() {
        let pipeline = SmsPipeline::with_defaults().with_scorer(Box::new(FixedScorer));
        let record = pipeline.process(&RawMessage::from_text("charged 40 EGP at Taxi"));
        assert_eq!(record.ml_category.as_deref(), Some("Transport"));
        assert_eq!(record.ml_category_score, Some(0.9));
        assert_eq!(record.ml_category_confidence, Some(Confidence::High));
    }

    #[test]
    fn test_no_scorer_leaves_ml_fields_null() {
        let record = pipeline().process(&RawMessage::from_text("charged 40 EGP at Taxi"));
        assert!(record.ml_category.is_none());
        assert!(record.ml_category_score.is_none());
    }

    #[test]
    fn test_batch_outcomes_are_independent() {
        let messages = vec![
            RawMessage::from_text("charged 100 EGP at Shop A"),
            RawMessage::from_text(""),
            RawMessage::from_text("charged 300 EGP at Shop B"),
        ];
        let records = pipeline().process_batch(&messages);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].amount, Some(100.0));
        assert_eq!(records[1].amount, None);
        assert_eq!(records[2].amount, Some(300.0));
    }

    #[test]
    fn test_known_account_metadata_attached() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "1234": {{ "account_id": "acc-7", "account_type": "Credit", "interest_rate": 24.0 }} }}"#
        )
        .unwrap();
        let accounts = Arc::new(AccountRegistry::from_file(file.path()).unwrap());

        let pipeline = SmsPipeline::new(
            TemplateEngine::with_builtin(),
            PromoClassifier::new(),
            SchemaNormalizer::new(accounts),
        );
        let record = pipeline.process(&RawMessage::from_text(
            "Your card ending 1234 was charged 6000 EGP at Mall",
        ));
        assert_eq!(record.account_id.as_deref(), Some("acc-7"));
        assert_eq!(record.urgency, crate::schema::Urgency::Medium);
    }
}
