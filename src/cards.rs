// 💳 Card Suffix Extraction + Account Metadata Registry
//
// Two concerns that always travel together: pulling the 4-digit card suffix
// out of SMS text (English and Arabic marker phrases), and resolving that
// suffix to static account metadata loaded from configuration.

use anyhow::{bail, Context, Result};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::numerals::normalize_numerals;

// ============================================================================
// ACCOUNT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccountType {
    Credit,
    Debit,
    Prepaid,
    #[default]
    Unknown,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Credit => "Credit",
            AccountType::Debit => "Debit",
            AccountType::Prepaid => "Prepaid",
            AccountType::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "Credit" => AccountType::Credit,
            "Debit" => AccountType::Debit,
            "Prepaid" => AccountType::Prepaid,
            _ => AccountType::Unknown,
        }
    }
}

/// One configured account entry, keyed externally by card suffix.
/// `account_id` and `account_type` are mandatory in the config source.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountEntry {
    pub account_id: String,
    pub account_type: String,
    #[serde(default)]
    pub interest_rate: Option<f64>,
    #[serde(default)]
    pub credit_limit: Option<f64>,
    #[serde(default)]
    pub billing_cycle: Option<u32>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Resolved metadata for a card suffix. Lookups never fail: unknown
/// suffixes produce a synthesized record with `is_known == false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountMetadata {
    pub card_suffix: Option<String>,
    pub account_id: String,
    pub account_type: AccountType,
    pub interest_rate: Option<f64>,
    pub credit_limit: Option<f64>,
    pub billing_cycle: Option<u32>,
    pub label: Option<String>,
    pub is_known: bool,
}

impl AccountMetadata {
    fn fallback(card_suffix: Option<&str>, label: &str) -> Self {
        AccountMetadata {
            account_id: match card_suffix {
                Some(s) => format!("unknown_{}", s),
                None => "unknown".to_string(),
            },
            account_type: AccountType::Unknown,
            interest_rate: None,
            credit_limit: None,
            billing_cycle: None,
            label: Some(label.to_string()),
            card_suffix: card_suffix.map(str::to_string),
            is_known: false,
        }
    }
}

// ============================================================================
// ACCOUNT REGISTRY
// ============================================================================

/// Read-only lookup table from 4-digit card suffix to account metadata.
///
/// Loaded once from a JSON mapping (`suffix -> entry`); `reload` swaps the
/// whole table atomically, so in-flight readers keep their snapshot.
pub struct AccountRegistry {
    accounts: RwLock<Arc<HashMap<String, AccountEntry>>>,
}

impl AccountRegistry {
    /// Create an empty registry (every lookup falls back to unknown).
    pub fn empty() -> Self {
        AccountRegistry {
            accounts: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Load account metadata from a JSON file.
    ///
    /// A missing file is not an error: the registry starts empty and every
    /// lookup synthesizes an unknown record. A present-but-malformed file is
    /// rejected as a whole.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "accounts file not found, starting empty");
            return Ok(Self::empty());
        }

        let table = Self::load_table(path)?;
        info!(accounts = table.len(), path = %path.display(), "loaded account records");
        Ok(AccountRegistry {
            accounts: RwLock::new(Arc::new(table)),
        })
    }

    fn load_table(path: &Path) -> Result<HashMap<String, AccountEntry>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read accounts file: {}", path.display()))?;

        let raw: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in accounts file: {}", path.display()))?;

        let obj = match raw.as_object() {
            Some(obj) => obj,
            None => bail!("accounts file must contain an object mapping suffixes to entries"),
        };

        let mut table = HashMap::new();
        for (suffix, value) in obj {
            let entry: AccountEntry = serde_json::from_value(value.clone()).with_context(|| {
                format!("account '{}' missing required field or malformed", suffix)
            })?;
            table.insert(suffix.clone(), entry);
        }

        Ok(table)
    }

    /// Reload the table from a file. On any error the previous table stays
    /// active and the error is returned to the caller.
    pub fn reload(&self, path: &Path) -> Result<()> {
        let table = Self::load_table(path)?;
        let count = table.len();
        *self.accounts.write().expect("accounts lock poisoned") = Arc::new(table);
        info!(accounts = count, "account records reloaded");
        Ok(())
    }

    /// Look up account metadata by card suffix. Never fails.
    pub fn lookup(&self, card_suffix: &str) -> AccountMetadata {
        if card_suffix.is_empty() {
            return AccountMetadata::fallback(None, "Invalid suffix");
        }

        let snapshot = self.accounts.read().expect("accounts lock poisoned").clone();

        match snapshot.get(card_suffix) {
            Some(entry) => {
                debug!(card_suffix, "found account for card suffix");
                AccountMetadata {
                    card_suffix: Some(card_suffix.to_string()),
                    account_id: entry.account_id.clone(),
                    account_type: AccountType::parse(&entry.account_type),
                    interest_rate: entry.interest_rate,
                    credit_limit: entry.credit_limit,
                    billing_cycle: entry.billing_cycle,
                    label: entry.label.clone(),
                    is_known: true,
                }
            }
            None => {
                warn!(card_suffix, "unknown card suffix");
                AccountMetadata::fallback(Some(card_suffix), "Unknown card")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.read().expect("accounts lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SUFFIX EXTRACTOR
// ============================================================================

/// Ordered pattern set that pulls a 4-digit card suffix out of SMS text.
///
/// Patterns capture a run of *four or more* digits and accept the match only
/// when the run is exactly four long. That rejects suffixes embedded in
/// longer digit sequences ("card 12345" yields nothing) without relying on
/// lookahead, which the regex crate does not support.
pub struct CardSuffixExtractor {
    patterns: Vec<regex::Regex>,
}

impl Default for CardSuffixExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CardSuffixExtractor {
    pub fn new() -> Self {
        // English first, Arabic after, mirroring marker frequency in the wild
        let sources = [
            r"(?:ending|card ending|ends with)\s+(\d{4,})",
            r"card\s+(?:number\s+)?(?:\*+\s*)?(\d{4,})",
            r"\*+(\d{4,})",
            r"(?:رقم|بطاقة رقم|ينتهي)\s+(\d{4,})",
            r"بطاقة\s+(?:\*+\s*)?(\d{4,})",
        ];

        let patterns = sources
            .iter()
            .map(|src| {
                RegexBuilder::new(src)
                    .case_insensitive(true)
                    .build()
                    .expect("card suffix pattern is statically valid")
            })
            .collect();

        CardSuffixExtractor { patterns }
    }

    /// Extract a card suffix from SMS text, or `None`.
    ///
    /// The text is numeral-normalized first so Arabic-Indic digits resolve
    /// to the same suffixes as Western ones.
    pub fn extract(&self, sms: &str) -> Option<String> {
        if sms.is_empty() {
            return None;
        }

        let normalized = normalize_numerals(sms);

        for pattern in &self.patterns {
            for caps in pattern.captures_iter(&normalized) {
                if let Some(group) = caps.get(1) {
                    let digits = group.as_str();
                    if digits.len() == 4 {
                        return Some(digits.to_string());
                    }
                }
            }
        }

        None
    }
}

// ============================================================================
// TESTS
// ============================================================================
