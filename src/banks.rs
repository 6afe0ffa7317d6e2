// 🏦 Bank Pattern Recognition
//
// Identifies the issuing bank from SMS text by matching against per-bank
// pattern fragments. Exact pass first (regex, or substring when a fragment
// is not a valid regex), then an optional fuzzy pass for partial overlaps.

use anyhow::{bail, Context, Result};
use regex::RegexBuilder;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub const UNKNOWN_BANK: &str = "unknown_bank";
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 80;

// ============================================================================
// PATTERNS
// ============================================================================

#[derive(Debug)]
struct BankPattern {
    raw: String,
    // None means the fragment is matched as a plain substring
    regex: Option<regex::Regex>,
}

#[derive(Debug)]
struct BankPatterns {
    bank_id: String,
    patterns: Vec<BankPattern>,
}

/// Recognizes banks from SMS messages using configured pattern fragments.
pub struct BankRecognizer {
    banks: RwLock<Arc<Vec<BankPatterns>>>,
    fuzzy_threshold: u8,
    enable_fuzzy: bool,
}

impl BankRecognizer {
    /// Load bank patterns from a JSON file
    /// (`{ bank_id: [fragment, ...] }`). Shape violations fail fast.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bank patterns file: {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in bank patterns file: {}", path.display()))?;
        let recognizer = Self::from_value(&value)?;
        info!(path = %path.display(), "loaded bank patterns");
        Ok(recognizer)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let banks = compile_banks(value)?;
        Ok(BankRecognizer {
            banks: RwLock::new(Arc::new(banks)),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            enable_fuzzy: true,
        })
    }

    pub fn with_fuzzy_threshold(mut self, threshold: u8) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn without_fuzzy(mut self) -> Self {
        self.enable_fuzzy = false;
        self
    }

    /// Reload patterns from a file; on error the active table is kept.
    pub fn reload(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bank patterns file: {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in bank patterns file: {}", path.display()))?;
        let banks = compile_banks(&value)?;
        *self.banks.write().expect("bank patterns lock poisoned") = Arc::new(banks);
        info!("bank patterns reloaded");
        Ok(())
    }

    fn snapshot(&self) -> Arc<Vec<BankPatterns>> {
        self.banks.read().expect("bank patterns lock poisoned").clone()
    }

    /// Identify the bank an SMS came from, or `"unknown_bank"`.
    pub fn identify(&self, sms: &str) -> String {
        self.identify_with_confidence(sms).0
    }

    /// Identify with a confidence score: 100 for an exact pattern hit,
    /// the fuzzy score for a fuzzy hit, 0 for no match.
    pub fn identify_with_confidence(&self, sms: &str) -> (String, u8) {
        let trimmed = sms.trim();
        if trimmed.is_empty() {
            warn!("empty SMS message provided to bank recognizer");
            return (UNKNOWN_BANK.to_string(), 0);
        }

        let banks = self.snapshot();
        let lower = trimmed.to_lowercase();

        // Exact pass
        for bank in banks.iter() {
            for pattern in &bank.patterns {
                let hit = match &pattern.regex {
                    Some(re) => re.is_match(trimmed),
                    None => lower.contains(&pattern.raw.to_lowercase()),
                };
                if hit {
                    return (bank.bank_id.clone(), 100);
                }
            }
        }

        // Fuzzy pass: best partial overlap above threshold
        if self.enable_fuzzy {
            let mut best: Option<(&str, u8)> = None;
            for bank in banks.iter() {
                for pattern in &bank.patterns {
                    let score = crate::fuzzy::partial_ratio(&pattern.raw.to_lowercase(), &lower);
                    if score >= self.fuzzy_threshold
                        && score > best.map(|(_, s)| s).unwrap_or(0)
                    {
                        best = Some((bank.bank_id.as_str(), score));
                    }
                }
            }
            if let Some((bank_id, score)) = best {
                return (bank_id.to_string(), score);
            }
        }

        warn!(preview = %trimmed.chars().take(50).collect::<String>(), "no bank matched for SMS");
        (UNKNOWN_BANK.to_string(), 0)
    }
}

fn compile_banks(value: &serde_json::Value) -> Result<Vec<BankPatterns>> {
    let obj = match value.as_object() {
        Some(obj) if !obj.is_empty() => obj,
        _ => bail!("bank patterns must be a non-empty mapping of bank id to fragment list"),
    };

    let mut banks = Vec::new();
    for (bank_id, fragments) in obj {
        let list = match fragments.as_array() {
            Some(list) => list,
            None => bail!("patterns for bank '{}' must be a list", bank_id),
        };
        if list.is_empty() {
            warn!(bank_id = %bank_id, "bank has no patterns defined");
        }

        let mut patterns = Vec::new();
        for fragment in list {
            let raw = match fragment.as_str() {
                Some(s) => s.to_string(),
                None => bail!("patterns for bank '{}' must be strings", bank_id),
            };
            let regex = RegexBuilder::new(&raw).case_insensitive(true).build().ok();
            patterns.push(BankPattern { raw, regex });
        }

        banks.push(BankPatterns {
            bank_id: bank_id.clone(),
            patterns,
        });
    }

    Ok(banks)
}

// ============================================================================
// TESTS
// ============================================================================
