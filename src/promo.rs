// 📣 Promotional Message Classifier
//
// Keyword-set matcher that flags marketing SMS before it enters the
// transaction pipeline. English keywords match whole words
// case-insensitively; Arabic keywords match as case-sensitive substrings.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

use crate::schema::Confidence;

// ============================================================================
// VERDICT
// ============================================================================

/// Structured result of promotional classification.
#[derive(Debug, Clone)]
pub struct PromoVerdict {
    /// Whether the message should be skipped as promotional
    pub skip: bool,
    /// Human-readable reason, listing up to 3 matched keywords
    pub reason: String,
    /// Every keyword that matched
    pub matched_keywords: Vec<String>,
    /// Confidence in the verdict
    pub confidence: Confidence,
}

impl PromoVerdict {
    fn clean(reason: &str, confidence: Confidence) -> Self {
        PromoVerdict {
            skip: false,
            reason: reason.to_string(),
            matched_keywords: Vec::new(),
            confidence,
        }
    }
}

// ============================================================================
// KEYWORD SETS
// ============================================================================

#[derive(Debug, Deserialize)]
struct KeywordFile {
    #[serde(default)]
    english: Vec<String>,
    #[serde(default)]
    arabic: Vec<String>,
}

struct KeywordSets {
    // English keywords with their precompiled whole-word patterns
    english: Vec<(String, Regex)>,
    arabic: BTreeSet<String>,
}

impl KeywordSets {
    fn build(english: BTreeSet<String>, arabic: BTreeSet<String>) -> Self {
        let english = english
            .into_iter()
            .filter_map(|kw| {
                let pattern = format!(r"\b{}\b", regex::escape(&kw.to_lowercase()));
                match Regex::new(&pattern) {
                    Ok(re) => Some((kw, re)),
                    Err(e) => {
                        warn!(keyword = %kw, error = %e, "skipping unusable promo keyword");
                        None
                    }
                }
            })
            .collect();
        KeywordSets { english, arabic }
    }
}

fn default_english() -> BTreeSet<String> {
    [
        "offer", "discount", "sale", "enjoy", "special offer", "limited time", "promotion",
        "promo", "deal", "deals", "save", "saving", "cashback", "reward", "rewards",
        "exclusive", "free", "gift", "bonus", "win", "winner", "congratulations", "congrats",
        "voucher", "coupon", "redeem",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_arabic() -> BTreeSet<String> {
    // "خصم" is deliberately absent: it means both "discount" and "debit"
    [
        "عرض خاص", "لفترة محدودة", "عروض", "توفير", "مجاني", "هدية", "مكافأة", "مكافآت",
        "حصري", "خصومات", "استمتع", "تخفيض", "تخفيضات", "كاش باك", "قسيمة", "كوبون",
        "مبروك", "فائز", "اربح", "جائزة", "وفر الآن", "احصل على", "فرصة",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Classifier for promotional/marketing SMS messages.
///
/// Keyword sets are late-bound configuration: they can be replaced from a
/// file or adjusted in place at runtime; readers always see one consistent
/// snapshot.
pub struct PromoClassifier {
    sets: RwLock<Arc<KeywordSets>>,
}

impl Default for PromoClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PromoClassifier {
    /// Create a classifier with the built-in default keyword sets.
    pub fn new() -> Self {
        PromoClassifier {
            sets: RwLock::new(Arc::new(KeywordSets::build(
                default_english(),
                default_arabic(),
            ))),
        }
    }

    /// Create a classifier from a JSON keywords file
    /// (`{"english": [...], "arabic": [...]}`).
    ///
    /// A missing or unreadable file silently falls back to the built-in
    /// defaults; this mirrors how the keyword source is deployed as an
    /// optional override.
    pub fn from_file(path: &Path) -> Self {
        let classifier = Self::new();
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<KeywordFile>(&content) {
                Ok(file) => {
                    let english: BTreeSet<String> = file.english.into_iter().collect();
                    let arabic: BTreeSet<String> = file.arabic.into_iter().collect();
                    if english.is_empty() && arabic.is_empty() {
                        warn!(path = %path.display(), "empty keywords file, using defaults");
                    } else {
                        classifier.replace(english, arabic);
                        info!(path = %path.display(), "loaded promo keywords");
                    }
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "invalid keywords file, using defaults");
                }
            },
            Err(_) => {
                info!(path = %path.display(), "keywords file not found, using defaults");
            }
        }
        classifier
    }

    fn replace(&self, english: BTreeSet<String>, arabic: BTreeSet<String>) {
        *self.sets.write().expect("keyword lock poisoned") =
            Arc::new(KeywordSets::build(english, arabic));
    }

    fn snapshot(&self) -> Arc<KeywordSets> {
        self.sets.read().expect("keyword lock poisoned").clone()
    }

    /// Add keywords to the active sets.
    pub fn add_keywords(&self, english: &[&str], arabic: &[&str]) {
        let snapshot = self.snapshot();
        let mut en: BTreeSet<String> = snapshot.english.iter().map(|(k, _)| k.clone()).collect();
        let mut ar = snapshot.arabic.clone();
        en.extend(english.iter().map(|s| s.to_string()));
        ar.extend(arabic.iter().map(|s| s.to_string()));
        self.replace(en, ar);
    }

    /// Remove keywords from the active sets.
    pub fn remove_keywords(&self, english: &[&str], arabic: &[&str]) {
        let snapshot = self.snapshot();
        let mut en: BTreeSet<String> = snapshot.english.iter().map(|(k, _)| k.clone()).collect();
        let mut ar = snapshot.arabic.clone();
        for kw in english {
            en.remove(*kw);
        }
        for kw in arabic {
            ar.remove(*kw);
        }
        self.replace(en, ar);
    }

    /// Current keyword sets, sorted, for inspection.
    pub fn keywords(&self) -> (Vec<String>, Vec<String>) {
        let snapshot = self.snapshot();
        (
            snapshot.english.iter().map(|(k, _)| k.clone()).collect(),
            snapshot.arabic.iter().cloned().collect(),
        )
    }

    /// Classify an SMS message as promotional or not.
    ///
    /// Zero matches means not promotional at high confidence; one, two, and
    /// three-or-more matches map to low, medium, and high confidence that
    /// the message *is* promotional.
    pub fn classify(&self, sms: &str) -> PromoVerdict {
        let trimmed = sms.trim();
        if trimmed.is_empty() {
            return PromoVerdict::clean("Invalid input", Confidence::Low);
        }

        let snapshot = self.snapshot();
        let lower = trimmed.to_lowercase();
        let mut matched = Vec::new();

        for (keyword, pattern) in &snapshot.english {
            if pattern.is_match(&lower) {
                matched.push(keyword.clone());
            }
        }
        for keyword in &snapshot.arabic {
            if trimmed.contains(keyword.as_str()) {
                matched.push(keyword.clone());
            }
        }

        if matched.is_empty() {
            return PromoVerdict::clean("No promotional keywords detected", Confidence::High);
        }

        let confidence = match matched.len() {
            1 => Confidence::Low,
            2 => Confidence::Medium,
            _ => Confidence::High,
        };

        let mut listed = matched[..matched.len().min(3)].join(", ");
        if matched.len() > 3 {
            listed.push_str(&format!(" (and {} more)", matched.len() - 3));
        }

        PromoVerdict {
            skip: true,
            reason: format!("Promotional message detected (keywords: {})", listed),
            matched_keywords: matched,
            confidence,
        }
    }

    /// Shorthand boolean check.
    pub fn is_promotional(&self, sms: &str) -> bool {
        self.classify(sms).skip
    }

    /// Classify a batch of messages independently.
    pub fn classify_batch(&self, messages: &[String]) -> Vec<PromoVerdict> {
        let results: Vec<PromoVerdict> = messages.iter().map(|m| self.classify(m)).collect();
        let skipped = results.iter().filter(|r| r.skip).count();
        info!(
            total = messages.len(),
            promotional = skipped,
            "classified promo batch"
        );
        results
    }
}

// ============================================================================
// TESTS
// ============================================================================
