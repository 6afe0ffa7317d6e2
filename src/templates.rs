// Bank template configuration
//
// Shape: `{ bank_id: [ { name, patterns: {field: pattern}, required_fields } ] }`.
// Shape violations are hard load-time errors (fail fast); an individual
// pattern that does not compile is logged and kept as a never-matching
// field so the per-message contract stays total.

use anyhow::{bail, Context, Result};
use regex::{Regex, RegexBuilder};
use std::path::Path;
use tracing::{info, warn};

// ============================================================================
// COMPILED SHAPES
// ============================================================================

/// One field-to-pattern entry of a template. `regex` is `None` when the
/// configured pattern failed to compile.
#[derive(Debug)]
pub struct FieldPattern {
    pub name: String,
    pub regex: Option<Regex>,
}

/// A named set of field extraction patterns scoped to one bank.
#[derive(Debug)]
pub struct Template {
    pub name: String,
    pub fields: Vec<FieldPattern>,
    pub required_fields: Vec<String>,
}

/// All templates for one bank, in configuration order.
#[derive(Debug)]
pub struct BankTemplates {
    pub bank_id: String,
    pub templates: Vec<Template>,
}

/// The full template table: banks in configuration order, templates per
/// bank in configuration order. Candidate iteration order follows this.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    banks: Vec<BankTemplates>,
}

impl TemplateLibrary {
    /// Load and validate a template file (JSON).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read templates file: {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in templates file: {}", path.display()))?;
        let library = Self::from_value(&value)?;
        info!(
            banks = library.banks.len(),
            path = %path.display(),
            "loaded bank templates"
        );
        Ok(library)
    }

    /// Build a library from an in-memory JSON value, validating the shape.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let obj = match value.as_object() {
            Some(obj) if !obj.is_empty() => obj,
            _ => bail!("templates must be a non-empty mapping of bank id to template list"),
        };

        let mut banks = Vec::new();
        for (bank_id, template_list) in obj {
            let list = match template_list.as_array() {
                Some(list) => list,
                None => bail!("templates for bank '{}' must be a list", bank_id),
            };

            let mut templates = Vec::new();
            for entry in list {
                let template = match entry.as_object() {
                    Some(t) => t,
                    None => bail!("each template for '{}' must be a mapping", bank_id),
                };
                let patterns = match template.get("patterns").and_then(|p| p.as_object()) {
                    Some(p) => p,
                    None => bail!("template in '{}' missing 'patterns' key", bank_id),
                };

                let name = template
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("unnamed")
                    .to_string();

                let mut fields = Vec::new();
                for (field_name, pattern) in patterns {
                    let source = match pattern.as_str() {
                        Some(s) => s,
                        None => bail!(
                            "pattern for field '{}' in '{}' must be a string",
                            field_name,
                            bank_id
                        ),
                    };
                    fields.push(FieldPattern {
                        name: field_name.clone(),
                        regex: compile_pattern(bank_id, field_name, source),
                    });
                }

                let required_fields = match template.get("required_fields") {
                    Some(serde_json::Value::Array(items)) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    None => vec!["amount".to_string()],
                    Some(_) => bail!("'required_fields' in '{}' must be a list", bank_id),
                };

                templates.push(Template {
                    name,
                    fields,
                    required_fields,
                });
            }

            banks.push(BankTemplates {
                bank_id: bank_id.clone(),
                templates,
            });
        }

        Ok(TemplateLibrary { banks })
    }

    /// Built-in template set covering the supported banks plus a generic
    /// catch-all. Serves as the default when no template file is given.
    pub fn builtin() -> Self {
        let value = serde_json::json!({
            "HSBC": [
                {
                    "name": "HSBC Standard",
                    "patterns": {
                        "amount": r"(?:charged|debited|paid|amount of|of)\s+(?P<amount>\d+(?:,\d{3})*(?:\.\d+)?)",
                        "currency": r"\d+(?:[.,]\d+)?\s*(?P<currency>EGP|USD|EUR|GBP|SAR|AED)",
                        "date": r"on\s+(?P<date>\d{1,2}[/.-]\d{1,2}(?:[/.-]\d{2,4})?)",
                        "payee": r"at\s+(?P<payee>[^.,\n]+?)(?:\s+on\b|[.,]|$)",
                        "transaction_type": r"\b(?P<transaction_type>purchase|withdrawal|transfer|refund|payment)\b",
                        "card_suffix": r"card\s+(?:ending\s+)?(?:\*+\s*)?(?P<card_suffix>\d{4})\b"
                    },
                    "required_fields": ["amount", "currency"]
                },
                {
                    "name": "HSBC Arabic",
                    "patterns": {
                        "amount": r"(?:خصم|دفع|مبلغ|سحب)\s+(?P<amount>\d+(?:,\d{3})*(?:\.\d+)?)",
                        "currency": r"\d+(?:[.,]\d+)?\s*(?P<currency>جنيه|دولار|يورو|ريال|درهم)",
                        "date": r"(?:بتاريخ|يوم)\s+(?P<date>\d{1,2}[/.-]\d{1,2}(?:[/.-]\d{2,4})?)",
                        "payee": r"(?:لدى|عند)\s+(?P<payee>[^.،\n]+?)(?:\s+بتاريخ|[.،]|$)"
                    },
                    "required_fields": ["amount"]
                }
            ],
            "CIB": [
                {
                    "name": "CIB Standard",
                    "patterns": {
                        "amount": r"(?:Purchase|Withdrawal|charged|amount|of)\s+(?:of\s+)?(?P<amount>\d+(?:,\d{3})*(?:\.\d+)?)",
                        "currency": r"\d+(?:[.,]\d+)?\s*(?P<currency>EGP|USD|EUR)",
                        "date": r"on\s+(?P<date>\d{1,2}[/.-]\d{1,2}(?:[/.-]\d{2,4})?)",
                        "payee": r"(?:from|at)\s+(?P<payee>[^.,\n]+?)(?:\s+on\b|[.,]|$)",
                        "transaction_type": r"\b(?P<transaction_type>Purchase|Withdrawal|Refund)\b",
                        "card_suffix": r"card\s+(?:ending\s+)?(?:\*+\s*)?(?P<card_suffix>\d{4})\b"
                    },
                    "required_fields": ["amount", "currency"]
                }
            ],
            "Generic_Bank": [
                {
                    "name": "Generic",
                    "patterns": {
                        "amount": r"(?:charged|debited|amount|transaction|of|paid)\s+(?P<amount>\d+(?:,\d{3})*(?:\.\d+)?)",
                        "currency": r"\d+(?:[.,]\d+)?\s*(?P<currency>EGP|USD|EUR|GBP|جنيه|دولار)",
                        "date": r"(?:on|بتاريخ)\s+(?P<date>\d{1,2}[/.-]\d{1,2}(?:[/.-]\d{2,4})?)"
                    },
                    "required_fields": ["amount"]
                }
            ]
        });

        Self::from_value(&value).expect("builtin templates are statically valid")
    }

    pub fn banks(&self) -> &[BankTemplates] {
        &self.banks
    }

    pub fn get(&self, bank_id: &str) -> Option<&BankTemplates> {
        self.banks.iter().find(|b| b.bank_id == bank_id)
    }

    pub fn bank_ids(&self) -> Vec<String> {
        self.banks.iter().map(|b| b.bank_id.clone()).collect()
    }

    /// Template names configured for one bank; unknown banks are an error.
    pub fn template_names(&self, bank_id: &str) -> Result<Vec<String>> {
        match self.get(bank_id) {
            Some(bank) => Ok(bank.templates.iter().map(|t| t.name.clone()).collect()),
            None => bail!("bank id '{}' not found in templates", bank_id),
        }
    }
}

fn compile_pattern(bank_id: &str, field: &str, source: &str) -> Option<Regex> {
    match RegexBuilder::new(source).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(bank_id, field, error = %e, "pattern failed to compile, field disabled");
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_library_loads() {
        let library = TemplateLibrary::builtin();
        let banks = library.bank_ids();
        assert!(banks.contains(&"HSBC".to_string()));
        assert!(banks.contains(&"CIB".to_string()));

        let names = library.template_names("HSBC").unwrap();
        assert!(names.contains(&"HSBC Standard".to_string()));
        assert!(names.contains(&"HSBC Arabic".to_string()));
    }

    #[test]
    fn test_rejects_non_list_bank_value() {
        let value = serde_json::json!({ "HSBC": { "patterns": {} } });
        assert!(TemplateLibrary::from_value(&value).is_err());
    }

    #[test]
    fn test_rejects_template_without_patterns() {
        let value = serde_json::json!({ "HSBC": [ { "name": "broken" } ] });
        assert!(TemplateLibrary::from_value(&value).is_err());
    }

    #[test]
    fn test_rejects_empty_mapping() {
        assert!(TemplateLibrary::from_value(&serde_json::json!({})).is_err());
        assert!(TemplateLibrary::from_value(&serde_json::json!([])).is_err());
    }

    #[test]
    fn test_required_fields_default_to_amount() {
        let value = serde_json::json!({
            "Bank": [ { "patterns": { "amount": r"(?P<amount>\d+)" } } ]
        });
        let library = TemplateLibrary::from_value(&value).unwrap();
        let bank = library.get("Bank").unwrap();
        assert_eq!(bank.templates[0].required_fields, vec!["amount"]);
        assert_eq!(bank.templates[0].name, "unnamed");
    }

    #[test]
    fn test_invalid_pattern_is_disabled_not_fatal() {
        let value = serde_json::json!({
            "Bank": [ { "patterns": { "amount": "([unclosed" } } ]
        });
        let library = TemplateLibrary::from_value(&value).unwrap();
        let bank = library.get("Bank").unwrap();
        assert!(bank.templates[0].fields[0].regex.is_none());
    }

    #[test]
    fn test_unknown_bank_lookup_errors() {
        let library = TemplateLibrary::builtin();
        assert!(library.template_names("NoSuchBank").is_err());
    }
}
