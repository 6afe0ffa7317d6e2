// 🏷️ Categorizer - Rules as Data
//
// Priority-ordered rule interpreter that assigns category, subcategory, and
// tags to normalized transaction records. Two rule shapes coexist: direct
// rules (exact string / regex / prior tag) and the legacy shape (exact
// merchant lists, fuzzy merchant lists, English/Arabic keywords).
//
// Matching priority, strictly in this order:
//   1. direct exact match        4. legacy exact merchant
//   2. direct regex match        5. legacy fuzzy merchant
//   3. direct tag match          6. legacy keywords
//   7. fallback (Uncategorized / General)

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::fuzzy;
use crate::schema::TransactionRecord;

pub const DEFAULT_FUZZY_THRESHOLD: u8 = 80;

// ============================================================================
// RULE SHAPES
// ============================================================================

#[derive(Debug)]
enum DirectMatcher {
    Exact(String),
    Pattern(Regex),
    Tag(String),
}

#[derive(Debug)]
struct DirectRule {
    matcher: DirectMatcher,
    category: Option<String>,
    subcategory: Option<String>,
    tags: Vec<String>,
}

#[derive(Debug)]
struct LegacyRule {
    category: Option<String>,
    subcategory: Option<String>,
    tags: Vec<String>,
    merchant_exact: Vec<String>,
    merchant_fuzzy: Vec<String>,
    keywords_english: Vec<String>,
    keywords_arabic: Vec<String>,
}

#[derive(Debug, Clone)]
struct Fallback {
    category: String,
    subcategory: String,
    tags: Vec<String>,
}

impl Default for Fallback {
    fn default() -> Self {
        Fallback {
            category: "Uncategorized".to_string(),
            subcategory: "General".to_string(),
            tags: Vec::new(),
        }
    }
}

/// A loaded, compiled rule base.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<DirectRule>,
    categories: Vec<LegacyRule>,
    fallback: Fallback,
}

// Raw (serde) shapes, compiled into RuleSet at load time

#[derive(Debug, Deserialize)]
struct RawRuleFile {
    #[serde(default)]
    rules: Vec<RawDirectRule>,
    #[serde(default)]
    categories: Vec<RawLegacyRule>,
    #[serde(default)]
    fallback: Option<RawFallback>,
}

#[derive(Debug, Deserialize)]
struct RawDirectRule {
    #[serde(rename = "match")]
    match_exact: Option<String>,
    match_regex: Option<String>,
    match_tag: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawKeywords {
    #[serde(default)]
    english: Vec<String>,
    #[serde(default)]
    arabic: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawLegacyRule {
    category: Option<String>,
    subcategory: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    merchant_exact: Vec<String>,
    #[serde(default)]
    merchant_fuzzy: Vec<String>,
    #[serde(default)]
    keywords: RawKeywords,
}

#[derive(Debug, Deserialize)]
struct RawFallback {
    category: Option<String>,
    subcategory: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl RuleSet {
    /// Parse and compile a rule file (JSON). Shape violations are hard
    /// errors; a malformed regex in one rule is logged and that rule
    /// skipped.
    pub fn from_str(content: &str) -> Result<Self> {
        let raw: RawRuleFile =
            serde_json::from_str(content).context("failed to parse category rules")?;

        if raw.rules.is_empty() && raw.categories.is_empty() {
            bail!("category rules must contain a 'rules' or 'categories' list");
        }

        let mut rules = Vec::new();
        for rule in raw.rules {
            let matcher = if let Some(exact) = rule.match_exact {
                DirectMatcher::Exact(exact)
            } else if let Some(pattern) = rule.match_regex {
                match Regex::new(&pattern) {
                    Ok(re) => DirectMatcher::Pattern(re),
                    Err(e) => {
                        error!(pattern = %pattern, error = %e, "invalid rule regex, skipping rule");
                        continue;
                    }
                }
            } else if let Some(tag) = rule.match_tag {
                DirectMatcher::Tag(tag)
            } else {
                warn!("rule without match/match_regex/match_tag, skipping");
                continue;
            };

            rules.push(DirectRule {
                matcher,
                category: rule.category,
                subcategory: rule.subcategory,
                tags: rule.tags,
            });
        }

        let categories = raw
            .categories
            .into_iter()
            .map(|c| LegacyRule {
                category: c.category,
                subcategory: c.subcategory,
                tags: c.tags,
                merchant_exact: c.merchant_exact,
                merchant_fuzzy: c.merchant_fuzzy,
                keywords_english: c.keywords.english,
                keywords_arabic: c.keywords.arabic,
            })
            .collect();

        let fallback = match raw.fallback {
            Some(f) => Fallback {
                category: f.category.unwrap_or_else(|| "Uncategorized".to_string()),
                subcategory: f.subcategory.unwrap_or_else(|| "General".to_string()),
                tags: f.tags,
            },
            None => Fallback::default(),
        };

        Ok(RuleSet {
            rules,
            categories,
            fallback,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read rules file: {}", path.display()))?;
        let rules = Self::from_str(&content)?;
        info!(
            direct = rules.rules.len(),
            legacy = rules.categories.len(),
            path = %path.display(),
            "loaded category rules"
        );
        Ok(rules)
    }
}

// ============================================================================
// CATEGORIZER
// ============================================================================

struct RuleOutcome<'a> {
    category: Option<&'a str>,
    subcategory: Option<&'a str>,
    tags: &'a [String],
}

pub struct Categorizer {
    rules: RwLock<Arc<RuleSet>>,
    fuzzy_threshold: u8,
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Categorizer {
    /// Categorizer with an empty rule base: everything falls through to
    /// the fallback until rules are loaded.
    pub fn new() -> Self {
        Self::with_rules(RuleSet::default())
    }

    pub fn with_rules(rules: RuleSet) -> Self {
        Categorizer {
            rules: RwLock::new(Arc::new(rules)),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    /// Initial load from a file: malformed configuration fails fast.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::with_rules(RuleSet::from_file(path)?))
    }

    pub fn with_fuzzy_threshold(mut self, threshold: u8) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    /// Reload rules from a file. A missing or malformed file retains the
    /// previously loaded rules and logs the condition. It never clears them.
    pub fn load_rules(&self, path: &Path) {
        match RuleSet::from_file(path) {
            Ok(rules) => {
                *self.rules.write().expect("rules lock poisoned") = Arc::new(rules);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "rules reload failed, keeping previous rules");
            }
        }
    }

    fn snapshot(&self) -> Arc<RuleSet> {
        self.rules.read().expect("rules lock poisoned").clone()
    }

    /// Assign category, subcategory, and tags to a record. At most one rule
    /// wins; its tags are unioned with any tags already on the record.
    pub fn categorize(&self, record: &mut TransactionRecord) {
        let rules = self.snapshot();
        let merchant = record
            .normalized_merchant
            .clone()
            .or_else(|| record.payee.clone());
        let merchant_lower = merchant.as_deref().map(|m| m.trim().to_lowercase());

        if let Some(outcome) = self.find_match(&rules, merchant.as_deref(), merchant_lower.as_deref(), &record.tags)
        {
            apply(record, outcome.category, outcome.subcategory, outcome.tags);
            return;
        }

        debug!(payee = ?record.payee, "fallback categorization");
        let fallback = rules.fallback.clone();
        apply(
            record,
            Some(&fallback.category),
            Some(&fallback.subcategory),
            &fallback.tags,
        );
    }

    /// Categorize a batch of records independently.
    pub fn categorize_batch(&self, records: &mut [TransactionRecord]) {
        for record in records.iter_mut() {
            self.categorize(record);
        }
        info!(count = records.len(), "categorized record batch");
    }

    fn find_match<'a>(
        &self,
        rules: &'a RuleSet,
        merchant: Option<&str>,
        merchant_lower: Option<&str>,
        record_tags: &[String],
    ) -> Option<RuleOutcome<'a>> {
        // 1. Direct exact
        if let Some(m) = merchant_lower {
            for rule in &rules.rules {
                if let DirectMatcher::Exact(expected) = &rule.matcher {
                    if expected.trim().to_lowercase() == m {
                        return Some(outcome(rule));
                    }
                }
            }
        }

        // 2. Direct regex
        if let Some(m) = merchant {
            for rule in &rules.rules {
                if let DirectMatcher::Pattern(re) = &rule.matcher {
                    if re.is_match(m) {
                        return Some(outcome(rule));
                    }
                }
            }
        }

        // 3. Direct tag
        for rule in &rules.rules {
            if let DirectMatcher::Tag(tag) = &rule.matcher {
                if record_tags.iter().any(|t| t == tag) {
                    return Some(outcome(rule));
                }
            }
        }

        let m = merchant_lower?;

        // 4. Legacy exact merchant
        for rule in &rules.categories {
            for exact in &rule.merchant_exact {
                if exact.trim().to_lowercase() == m {
                    return Some(legacy_outcome(rule));
                }
            }
        }

        // 5. Legacy fuzzy merchant: best score above threshold wins
        let mut best: Option<(&LegacyRule, u8)> = None;
        for rule in &rules.categories {
            for fuzzy_merchant in &rule.merchant_fuzzy {
                let candidate = fuzzy_merchant.trim().to_lowercase();
                let mut score = fuzzy::token_sort_ratio(m, &candidate)
                    .max(fuzzy::token_set_ratio(m, &candidate))
                    .max(fuzzy::partial_ratio(m, &candidate));
                if m.contains(candidate.as_str()) {
                    score = score.max(90);
                }
                if score >= self.fuzzy_threshold
                    && score > best.map(|(_, s)| s).unwrap_or(0)
                {
                    best = Some((rule, score));
                }
            }
        }
        if let Some((rule, score)) = best {
            debug!(score, "fuzzy merchant match");
            return Some(legacy_outcome(rule));
        }

        // 6. Legacy keywords (English substring, case-insensitive; Arabic
        //    substring, case-sensitive)
        for rule in &rules.categories {
            for keyword in &rule.keywords_english {
                if m.contains(&keyword.to_lowercase()) {
                    return Some(legacy_outcome(rule));
                }
            }
            if let Some(original) = merchant {
                for keyword in &rule.keywords_arabic {
                    if original.contains(keyword.as_str()) {
                        return Some(legacy_outcome(rule));
                    }
                }
            }
        }

        None
    }
}

fn outcome(rule: &DirectRule) -> RuleOutcome<'_> {
    RuleOutcome {
        category: rule.category.as_deref(),
        subcategory: rule.subcategory.as_deref(),
        tags: &rule.tags,
    }
}

fn legacy_outcome(rule: &LegacyRule) -> RuleOutcome<'_> {
    RuleOutcome {
        category: rule.category.as_deref(),
        subcategory: rule.subcategory.as_deref(),
        tags: &rule.tags,
    }
}

fn apply(
    record: &mut TransactionRecord,
    category: Option<&str>,
    subcategory: Option<&str>,
    tags: &[String],
) {
    record.category = category.map(str::to_string);
    record.subcategory = subcategory.map(str::to_string);
    for tag in tags {
        if !record.tags.contains(tag) {
            record.tags.push(tag.clone());
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
