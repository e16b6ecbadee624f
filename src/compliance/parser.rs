//! Defensive extraction of structured data from knowledge-source answers
//!
//! The answer is scanned for the first well-formed JSON object (a fenced
//! ```json block wins over a bare object). Every field has an explicit
//! default, numbers are clamped into range, and nothing outside the object
//! is ever interpreted.

use crate::compliance::types::{
    EfficiencyFigures, PaymentPreferences, RegulatoryEnvironment, TaxImplications,
};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Longest answer we are willing to scan.
const MAX_SCAN_BYTES: usize = 64 * 1024;
/// Candidate objects tried before giving up.
const MAX_CANDIDATES: usize = 16;
const MAX_LIST_ITEMS: usize = 20;
const MAX_ITEM_CHARS: usize = 200;
pub const DEFAULT_SCORE: f64 = 0.5;

type Object = Map<String, Value>;

/// Parsed value plus whether it came from structured data or pure defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub structured: bool,
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    FENCED
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

/// First JSON object found in `text`.
pub fn extract_object(text: &str) -> Option<Object> {
    let text = truncate(text, MAX_SCAN_BYTES);

    if let Some(regex) = fenced_block() {
        for captures in regex.captures_iter(text).take(MAX_CANDIDATES) {
            if let Some(Value::Object(obj)) = captures
                .get(1)
                .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
            {
                return Some(obj);
            }
        }
    }

    balanced_spans(text)
        .into_iter()
        .take(MAX_CANDIDATES)
        .find_map(|(start, end)| match serde_json::from_str::<Value>(&text[start..end]) {
            Ok(Value::Object(obj)) => Some(obj),
            _ => None,
        })
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Byte ranges of every balanced `{...}` in `text`, ordered by start.
///
/// One forward pass with a stack of open positions. String literals are only
/// tracked inside an open brace, so quotes in surrounding prose are ignored.
fn balanced_spans(text: &str) -> Vec<(usize, usize)> {
    let mut open: Vec<usize> = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(index),
            '}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, index + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    spans
}

// ============================================================================
// Field readers
// ============================================================================

fn field<'a>(obj: &'a Object, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| obj.get(*name))
        .filter(|v| !v.is_null())
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok().map(|v| v / 100.0),
                None => trimmed.parse::<f64>().ok(),
            }
        }
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

/// A [0, 1] figure; values in (1, 100] are read as percentages.
fn unit_score(obj: &Object, names: &[&str], default: f64) -> f64 {
    field(obj, names)
        .and_then(as_number)
        .map(|v| if v > 1.0 && v <= 100.0 { v / 100.0 } else { v })
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(default)
}

fn flag(obj: &Object, names: &[&str], default: bool) -> bool {
    match field(obj, names) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "required" => true,
            "false" | "no" | "none" => false,
            _ => default,
        },
        _ => default,
    }
}

fn text(obj: &Object, names: &[&str]) -> Option<String> {
    match field(obj, names)? {
        Value::String(s) if !s.trim().is_empty() => Some(clip(s.trim())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(obj: &Object, names: &[&str]) -> Vec<String> {
    let items: Vec<String> = match field(obj, names) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(|s| clip(&s))
        .take(MAX_LIST_ITEMS)
        .collect()
}

fn clip(value: &str) -> String {
    value.chars().take(MAX_ITEM_CHARS).collect()
}

// ============================================================================
// Typed parsers
// ============================================================================

pub fn parse_preferences(answer: &str) -> Parsed<PaymentPreferences> {
    let defaults = PaymentPreferences::default();
    let Some(obj) = extract_object(answer) else {
        return Parsed {
            value: defaults,
            structured: false,
        };
    };

    let popular = string_list(&obj, &["popularMethods", "popular_methods", "methods"]);
    Parsed {
        value: PaymentPreferences {
            popular_methods: if popular.is_empty() {
                defaults.popular_methods
            } else {
                popular
            },
            mobile_money_adoption: unit_score(
                &obj,
                &["mobileMoneyAdoption", "mobile_money_adoption"],
                defaults.mobile_money_adoption,
            ),
            card_penetration: unit_score(
                &obj,
                &["cardPenetration", "card_penetration"],
                defaults.card_penetration,
            ),
            banking_penetration: unit_score(
                &obj,
                &["bankingPenetration", "banking_penetration"],
                defaults.banking_penetration,
            ),
            crypto_usage: unit_score(&obj, &["cryptoUsage", "crypto_usage"], defaults.crypto_usage),
            cash_usage: unit_score(&obj, &["cashUsage", "cash_usage"], defaults.cash_usage),
        },
        structured: true,
    }
}

pub fn parse_regulations(answer: &str) -> Parsed<RegulatoryEnvironment> {
    let defaults = RegulatoryEnvironment::default();
    let Some(obj) = extract_object(answer) else {
        return Parsed {
            value: defaults,
            structured: false,
        };
    };

    Parsed {
        value: RegulatoryEnvironment {
            regulatory_bodies: string_list(&obj, &["regulatoryBodies", "regulatory_bodies"]),
            licensing_required: flag(
                &obj,
                &["licensingRequired", "licensing_required"],
                defaults.licensing_required,
            ),
            kyc_level: text(&obj, &["kycLevel", "kyc_level", "kycRequirements"])
                .unwrap_or(defaults.kyc_level),
            data_protection_laws: string_list(
                &obj,
                &["dataProtectionLaws", "data_protection_laws", "dataProtection"],
            ),
            foreign_exchange_controls: flag(
                &obj,
                &["foreignExchangeControls", "foreign_exchange_controls", "fxControls"],
                defaults.foreign_exchange_controls,
            ),
            cross_border_restrictions: string_list(
                &obj,
                &["crossBorderRestrictions", "cross_border_restrictions"],
            ),
            reporting_requirements: string_list(
                &obj,
                &["reportingRequirements", "reporting_requirements"],
            ),
            compliance_cost_index: unit_score(
                &obj,
                &["complianceCostIndex", "compliance_cost_index"],
                defaults.compliance_cost_index,
            ),
        },
        structured: true,
    }
}

pub fn parse_tax(answer: &str) -> Parsed<TaxImplications> {
    let defaults = TaxImplications::default();
    let Some(obj) = extract_object(answer) else {
        return Parsed {
            value: defaults,
            structured: false,
        };
    };

    Parsed {
        value: TaxImplications {
            vat_rate: unit_score(&obj, &["vatRate", "vat_rate"], defaults.vat_rate),
            withholding_tax_rate: unit_score(
                &obj,
                &["withholdingTaxRate", "withholding_tax_rate"],
                defaults.withholding_tax_rate,
            ),
            digital_services_tax: unit_score(
                &obj,
                &["digitalServicesTax", "digital_services_tax"],
                defaults.digital_services_tax,
            ),
            transaction_levy: unit_score(
                &obj,
                &["transactionLevy", "transaction_levy"],
                defaults.transaction_levy,
            ),
            reporting_requirements: string_list(
                &obj,
                &["reportingRequirements", "reporting_requirements"],
            ),
            exemptions: string_list(&obj, &["exemptions"]),
        },
        structured: true,
    }
}

pub fn parse_efficiency(answer: &str) -> Parsed<EfficiencyFigures> {
    let obj = extract_object(answer);
    let structured = obj.is_some();
    let obj = obj.unwrap_or_default();

    Parsed {
        value: EfficiencyFigures {
            efficiency_score: unit_score(
                &obj,
                &["efficiencyScore", "efficiency_score", "regulatoryEfficiency"],
                DEFAULT_SCORE,
            ),
            tax_efficiency_score: unit_score(
                &obj,
                &["taxEfficiencyScore", "tax_efficiency_score", "taxEfficiency"],
                DEFAULT_SCORE,
            ),
            compliance_requirements: string_list(
                &obj,
                &["complianceRequirements", "compliance_requirements"],
            ),
            documentation_requirements: string_list(
                &obj,
                &["documentationRequirements", "documentation_requirements"],
            ),
            regulatory_costs: text(&obj, &["regulatoryCosts", "regulatory_costs"]),
        },
        structured,
    }
}
