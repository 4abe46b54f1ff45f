//! Result normalization.
//!
//! Turns the loosely-structured payload returned by the fraud-analysis
//! engine into [`CanonicalFields`]. Three payload shapes are recognised,
//! tried in order:
//!
//! 1. flat: the canonical keys sit at the top level,
//! 2. wrapped: a `résultats` (or `results`) key holds a list of mappings
//!    or a single mapping,
//! 3. fuzzy: anything else; keys are matched on substrings.
//!
//! Normalization never fails. Whatever cannot be read becomes an absent
//! field.

use crate::models::{CanonicalFields, RawPayload};
use serde_json::Value;
use tracing::debug;

const FRAUD_KEY: &str = "fraude";
const MERCHANT_KEY: &str = "Nom du commerce";
const DATE_KEY: &str = "Date de la facture";
const AMOUNT_KEY: &str = "Montant total";
const CITY_KEY: &str = "Ville";
const ADDRESS_KEY: &str = "Adresse complète";
const REASONS_KEY: &str = "raison";

const WRAPPER_KEYS: [&str; 2] = ["résultats", "results"];

const FRAUD_TOKENS: [&str; 1] = ["fraud"];
const MERCHANT_TOKENS: [&str; 2] = ["commerce", "merchant"];
const INVOICE_TOKENS: [&str; 2] = ["facture", "invoice"];
const AMOUNT_TOKENS: [&str; 3] = ["montant", "total", "amount"];
const CITY_TOKENS: [&str; 2] = ["ville", "city"];
const ADDRESS_TOKENS: [&str; 2] = ["adresse", "address"];
const REASON_TOKENS: [&str; 2] = ["raison", "reason"];

/// Where the fields of a recognised payload are read from.
enum Source<'a> {
    /// Canonical keys, read verbatim from this mapping.
    Exact(&'a RawPayload),
    /// The shape was recognised but carries nothing readable.
    Empty,
    /// Keys matched by substring.
    Fuzzy(&'a RawPayload),
}

type Detector = for<'a> fn(&'a RawPayload) -> Option<Source<'a>>;

const DETECTORS: [(&str, Detector); 3] = [
    ("flat", detect_flat),
    ("wrapped", detect_wrapped),
    ("fuzzy", detect_fuzzy),
];

/// Extract canonical fraud-report fields from a raw payload.
pub fn normalize(raw: &RawPayload) -> CanonicalFields {
    let detected = DETECTORS
        .iter()
        .find_map(|(name, detect)| detect(raw).map(|source| (*name, source)));

    let fields = match detected {
        Some((_, Source::Exact(map))) => extract_exact(map),
        Some((_, Source::Fuzzy(map))) => extract_fuzzy(map),
        Some((_, Source::Empty)) | None => CanonicalFields::default(),
    };

    debug!(
        "Normalized payload ({} shape): fraud={:?}, merchant={:?}, amount={:?}, reasons={}",
        detected.map(|(name, _)| name).unwrap_or("none"),
        fields.fraud_flag,
        fields.merchant_name,
        fields.total_amount,
        fields.fraud_reasons.len()
    );

    fields
}

fn detect_flat(raw: &RawPayload) -> Option<Source<'_>> {
    (raw.contains_key(FRAUD_KEY) || raw.contains_key(MERCHANT_KEY)).then_some(Source::Exact(raw))
}

fn detect_wrapped(raw: &RawPayload) -> Option<Source<'_>> {
    let wrapped = WRAPPER_KEYS.iter().find_map(|key| raw.get(*key))?;

    let source = match wrapped {
        Value::Array(items) => match items.first() {
            Some(Value::Object(first)) => Source::Exact(first),
            _ => Source::Empty,
        },
        Value::Object(inner) => Source::Exact(inner),
        _ => Source::Empty,
    };

    Some(source)
}

fn detect_fuzzy(raw: &RawPayload) -> Option<Source<'_>> {
    Some(Source::Fuzzy(raw))
}

fn extract_exact(map: &RawPayload) -> CanonicalFields {
    CanonicalFields {
        fraud_flag: map.get(FRAUD_KEY).and_then(text_value),
        merchant_name: map.get(MERCHANT_KEY).and_then(text_value),
        invoice_date: map.get(DATE_KEY).and_then(text_value),
        total_amount: map.get(AMOUNT_KEY).and_then(amount_value),
        city: map.get(CITY_KEY).and_then(text_value),
        full_address: map.get(ADDRESS_KEY).and_then(text_value),
        fraud_reasons: map.get(REASONS_KEY).and_then(reasons_value).unwrap_or_default(),
    }
}

/// Match keys case-insensitively on substrings. A later matching key
/// overrides an earlier one, unless it yields nothing. The reasons list is
/// the exception: the first key holding a list wins.
fn extract_fuzzy(map: &RawPayload) -> CanonicalFields {
    let mut fields = CanonicalFields::default();
    let mut reasons_found = false;

    for (key, value) in map {
        let key = key.to_lowercase();
        let has = |tokens: &[&str]| tokens.iter().any(|t| key.contains(t));
        let is_reason_key = has(&REASON_TOKENS);

        // "raison de la fraude" names the reasons, not the flag
        if has(&FRAUD_TOKENS) && !is_reason_key {
            overwrite(&mut fields.fraud_flag, text_value(value));
        }
        if has(&MERCHANT_TOKENS) {
            overwrite(&mut fields.merchant_name, text_value(value));
        }
        if key.contains("date") && has(&INVOICE_TOKENS) {
            overwrite(&mut fields.invoice_date, text_value(value));
        }
        if has(&AMOUNT_TOKENS) {
            overwrite(&mut fields.total_amount, amount_value(value));
        }
        if has(&CITY_TOKENS) {
            overwrite(&mut fields.city, text_value(value));
        }
        if has(&ADDRESS_TOKENS) {
            overwrite(&mut fields.full_address, text_value(value));
        }
        if !reasons_found && is_reason_key {
            if let Some(reasons) = reasons_value(value) {
                fields.fraud_reasons = reasons;
                reasons_found = true;
            }
        }
    }

    fields
}

fn overwrite<T>(field: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *field = value;
    }
}

/// Render a value as text. `null` is absent; nested values render as JSON.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Numbers pass through; strings are parsed as decimals. Anything that
/// does not yield a finite number is absent, never zero.
fn amount_value(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    amount.is_finite().then_some(amount)
}

fn reasons_value(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(text_value).collect()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> RawPayload {
        match value {
            Value::Object(map) => map,
            _ => panic!("test payload must be an object"),
        }
    }

    fn fixture(content: &str) -> RawPayload {
        payload(serde_json::from_str(content).unwrap())
    }

    #[test]
    fn test_flat_shape() {
        let fields = normalize(&payload(json!({
            "fraude": "Oui",
            "Nom du commerce": "Acme",
            "Montant total": 42.5
        })));

        assert_eq!(fields.fraud_flag.as_deref(), Some("Oui"));
        assert_eq!(fields.merchant_name.as_deref(), Some("Acme"));
        assert_eq!(fields.total_amount, Some(42.5));
        assert_eq!(fields.invoice_date, None);
        assert_eq!(fields.city, None);
        assert_eq!(fields.full_address, None);
        assert!(fields.fraud_reasons.is_empty());
    }

    #[test]
    fn test_wrapped_list_shape() {
        let fields = normalize(&payload(json!({
            "résultats": [{"fraude": "Non", "Ville": "Paris"}]
        })));

        assert_eq!(fields.fraud_flag.as_deref(), Some("Non"));
        assert_eq!(fields.city.as_deref(), Some("Paris"));
        assert_eq!(fields.merchant_name, None);
        assert_eq!(fields.total_amount, None);
    }

    #[test]
    fn test_wrapped_list_uses_first_element() {
        let fields = normalize(&fixture(include_str!(
            "../../fixtures/payloads/wrapped_list.json"
        )));

        assert_eq!(fields.merchant_name.as_deref(), Some("Hotel Atlas"));
        assert_eq!(fields.invoice_date.as_deref(), Some("2025-04-14"));
        assert_eq!(fields.total_amount, Some(720.5));
        assert_eq!(fields.city.as_deref(), Some("Marrakech"));
        assert_eq!(
            fields.fraud_reasons,
            vec!["Ville hors mission".to_string(), "Date hors période".to_string()]
        );
    }

    #[test]
    fn test_wrapped_single_mapping() {
        let fields = normalize(&payload(json!({
            "results": {"fraude": "Oui", "Adresse complète": "Av. Hassan II"}
        })));

        assert_eq!(fields.fraud_flag.as_deref(), Some("Oui"));
        assert_eq!(fields.full_address.as_deref(), Some("Av. Hassan II"));
    }

    #[test]
    fn test_malformed_inputs_yield_absent_fields() {
        assert!(normalize(&RawPayload::new()).is_empty());
        assert!(normalize(&payload(json!({"résultats": []}))).is_empty());
        assert!(normalize(&payload(json!({"résultats": ["not a mapping"]}))).is_empty());
        assert!(normalize(&payload(json!({"résultats": 12}))).is_empty());
        assert!(normalize(&payload(json!({"unrelated": {"deep": [1, 2]}}))).is_empty());
    }

    #[test]
    fn test_flat_shape_wins_over_wrapper() {
        let fields = normalize(&payload(json!({
            "Nom du commerce": "Top",
            "résultats": [{"Nom du commerce": "Nested"}]
        })));

        assert_eq!(fields.merchant_name.as_deref(), Some("Top"));
    }

    #[test]
    fn test_fuzzy_shape() {
        let fields = normalize(&fixture(include_str!("../../fixtures/payloads/fuzzy.json")));

        assert_eq!(fields.fraud_flag.as_deref(), Some("oui"));
        assert_eq!(fields.merchant_name.as_deref(), Some("Café Central"));
        assert_eq!(fields.invoice_date.as_deref(), Some("12/03/2025"));
        assert_eq!(fields.total_amount, Some(1250.0));
        assert_eq!(fields.city.as_deref(), Some("Casablanca"));
        assert_eq!(fields.full_address.as_deref(), Some("12 Rue Atlas"));
        assert_eq!(fields.fraud_reasons, vec!["Montant excessif".to_string()]);
    }

    #[test]
    fn test_fuzzy_date_needs_invoice_token() {
        let fields = normalize(&payload(json!({"date_upload": "2025-01-01"})));
        assert_eq!(fields.invoice_date, None);

        let fields = normalize(&payload(json!({"invoice_date": "2025-01-01"})));
        assert_eq!(fields.invoice_date.as_deref(), Some("2025-01-01"));
    }

    #[test]
    fn test_fuzzy_later_key_overrides() {
        let fields = normalize(&payload(json!({
            "Ville de départ": "Paris",
            "Ville facturée": "Lyon",
            "montant_ht": "100",
            "total_ttc": 120,
            "adresse": "1 Rue A",
            "address_raw": null
        })));

        assert_eq!(fields.city.as_deref(), Some("Lyon"));
        assert_eq!(fields.total_amount, Some(120.0));
        assert_eq!(fields.full_address.as_deref(), Some("1 Rue A"));
    }

    #[test]
    fn test_fuzzy_reasons_take_first_list() {
        let fields = normalize(&payload(json!({
            "reason_code": "R1",
            "reasons": ["a", null, 3],
            "raisons_bis": ["ignored"]
        })));

        assert_eq!(fields.fraud_reasons, vec!["a".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_amount_coercion() {
        let amount = |v: Value| normalize(&payload(json!({"fraude": "Non", "Montant total": v}))).total_amount;

        assert_eq!(amount(json!(10)), Some(10.0));
        assert_eq!(amount(json!(" 99.95 ")), Some(99.95));
        assert_eq!(amount(json!("inconnu")), None);
        assert_eq!(amount(json!("")), None);
        assert_eq!(amount(json!("NaN")), None);
        assert_eq!(amount(json!(true)), None);
        assert_eq!(amount(Value::Null), None);
    }

    #[test]
    fn test_text_coercion() {
        let fields = normalize(&payload(json!({
            "fraude": true,
            "Nom du commerce": null,
            "Ville": 75001,
            "Adresse complète": {"rue": "Atlas"}
        })));

        assert_eq!(fields.fraud_flag.as_deref(), Some("true"));
        assert_eq!(fields.merchant_name, None);
        assert_eq!(fields.city.as_deref(), Some("75001"));
        assert_eq!(fields.full_address.as_deref(), Some(r#"{"rue":"Atlas"}"#));
    }

    #[test]
    fn test_non_list_reasons_are_empty() {
        let fields = normalize(&payload(json!({"fraude": "Oui", "raison": "Ville"})));
        assert!(fields.fraud_reasons.is_empty());
    }
}
