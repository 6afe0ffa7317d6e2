// Transaction state classification
//
// Priority-ordered, first-match-wins tagging of a message's semantic state.
// The ordering is load-bearing: a declined SMS that still quotes an amount
// must come out DECLINED, not MONETARY.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::promo::PromoClassifier;

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionState {
    Otp,
    Declined,
    Promo,
    Monetary,
    #[default]
    Unknown,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Otp => "OTP",
            TransactionState::Declined => "DECLINED",
            TransactionState::Promo => "PROMO",
            TransactionState::Monetary => "MONETARY",
            TransactionState::Unknown => "UNKNOWN",
        }
    }

    /// Parse a state token, tolerating case and surrounding whitespace.
    /// Anything unrecognized collapses to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "OTP" => TransactionState::Otp,
            "DECLINED" => TransactionState::Declined,
            "PROMO" => TransactionState::Promo,
            "MONETARY" => TransactionState::Monetary,
            _ => TransactionState::Unknown,
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Classifies a message into OTP / DECLINED / PROMO / MONETARY / UNKNOWN.
pub struct StateClassifier {
    otp: regex::Regex,
    declined: regex::Regex,
}

impl Default for StateClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StateClassifier {
    pub fn new() -> Self {
        let otp = RegexBuilder::new(r"\b(otp|one\s*time\s*password|code)\b")
            .case_insensitive(true)
            .build()
            .expect("otp pattern is statically valid");
        let declined = RegexBuilder::new(r"\b(declined|refused)\b")
            .case_insensitive(true)
            .build()
            .expect("declined pattern is statically valid");
        StateClassifier { otp, declined }
    }

    /// Classify one message.
    ///
    /// `has_amount` reflects whether the template engine extracted an amount;
    /// the promo classifier supplies stage three of the priority chain.
    pub fn classify(
        &self,
        sms: &str,
        has_amount: bool,
        promo: &PromoClassifier,
    ) -> TransactionState {
        if self.otp.is_match(sms) {
            return TransactionState::Otp;
        }
        if self.declined.is_match(sms) {
            return TransactionState::Declined;
        }
        if promo.is_promotional(sms) {
            return TransactionState::Promo;
        }
        if !has_amount {
            return TransactionState::Unknown;
        }
        TransactionState::Monetary
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (StateClassifier, PromoClassifier) {
        (StateClassifier::new(), PromoClassifier::new())
    }

    #[test]
    fn test_otp_beats_everything() {
        let (state, promo) = setup();
        assert_eq!(
            state.classify("Your OTP code is 123456 for payment of 500 EGP", true, &promo),
            TransactionState::Otp
        );
    }

    #[test]
    fn test_declined_beats_monetary() {
        let (state, promo) = setup();
        assert_eq!(
            state.classify("Transaction of 250.00 EGP was declined", true, &promo),
            TransactionState::Declined
        );
    }

    #[test]
    fn test_promo_before_amount_check() {
        let (state, promo) = setup();
        assert_eq!(
            state.classify("Special offer: free gift with every purchase!", false, &promo),
            TransactionState::Promo
        );
    }

    #[test]
    fn test_missing_amount_is_unknown() {
        let (state, promo) = setup();
        assert_eq!(
            state.classify("Your statement is ready", false, &promo),
            TransactionState::Unknown
        );
    }

    #[test]
    fn test_plain_charge_is_monetary() {
        let (state, promo) = setup();
        assert_eq!(
            state.classify("Your card was charged 100 EGP at Store", true, &promo),
            TransactionState::Monetary
        );
    }

    #[test]
    fn test_parse_tolerates_case() {
        assert_eq!(TransactionState::parse(" declined "), TransactionState::Declined);
        assert_eq!(TransactionState::parse("bogus"), TransactionState::Unknown);
    }
}
