//! AI findings normalization.
//!
//! The analysis service serializes its findings dict with Python's `str()`,
//! so the wire carries single-quoted pseudo-JSON (`{'Pneumonia': 0.82}`)
//! instead of a JSON object. Detection mode sends a plain sentence in the
//! same field. This module is the only place that knows about either
//! quirk: it turns whatever arrived into an ordered label -> confidence
//! list, and degrades to an empty list on anything it cannot read. A
//! degraded parse is not an error; the analysis itself still succeeded.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Findings field as it appears on the wire: either a real JSON object or
/// the pseudo-JSON string described in the module docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FindingsPayload {
    Structured(serde_json::Map<String, Value>),
    Text(String),
}

/// One classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub label: String,
    pub confidence: f64,
}

/// Normalized findings, ordered by descending confidence. Equal
/// confidences keep the order the payload listed them in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Findings(Vec<Finding>);

impl Findings {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Finding> {
        self.0.iter()
    }

    /// Highest-confidence finding, if any.
    pub fn top(&self) -> Option<&Finding> {
        self.0.first()
    }

    pub fn confidence_of(&self, label: &str) -> Option<f64> {
        self.0.iter().find(|f| f.label == label).map(|f| f.confidence)
    }
}

/// Normalizes a findings payload into an ordered list.
///
/// Structured payloads are read directly; text payloads go through the
/// quote substitution first. Any failure, including non-numeric
/// confidence values, yields an empty list.
pub fn normalize(payload: &FindingsPayload) -> Findings {
    let entries = match payload {
        FindingsPayload::Structured(map) => collect_entries(map),
        FindingsPayload::Text(text) => parse_pseudo_json(text).as_ref().and_then(collect_entries),
    };

    let mut entries = match entries {
        Some(entries) => entries,
        None => {
            tracing::warn!(
                payload = %payload_preview(payload),
                "findings payload not parseable, degrading to empty"
            );
            return Findings::default();
        }
    };

    // Stable sort keeps encounter order for equal confidences.
    entries.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    Findings(entries)
}

/// Canonical textual form of a payload, used when persisting a record.
/// Text passes through untouched so stored findings match what the
/// service sent; structured payloads re-serialize as JSON.
pub fn raw_text(payload: &FindingsPayload) -> String {
    match payload {
        FindingsPayload::Structured(map) => Value::Object(map.clone()).to_string(),
        FindingsPayload::Text(text) => text.clone(),
    }
}

/// The single-quote workaround: swap every quote and parse as JSON. Labels
/// containing apostrophes corrupt the swapped text and fail the parse;
/// that is an accepted upstream artifact (callers degrade to empty).
fn parse_pseudo_json(text: &str) -> Option<serde_json::Map<String, Value>> {
    let swapped = text.replace('\'', "\"");
    match serde_json::from_str::<Value>(&swapped) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) | Err(_) => None,
    }
}

fn collect_entries(map: &serde_json::Map<String, Value>) -> Option<Vec<Finding>> {
    map.iter()
        .map(|(label, value)| {
            let confidence = value.as_f64().filter(|c| c.is_finite())?;
            Some(Finding {
                label: label.clone(),
                confidence,
            })
        })
        .collect()
}

fn payload_preview(payload: &FindingsPayload) -> String {
    let text = match payload {
        FindingsPayload::Structured(map) => Value::Object(map.clone()).to_string(),
        FindingsPayload::Text(text) => text.clone(),
    };
    text.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_payload(s: &str) -> FindingsPayload {
        FindingsPayload::Text(s.to_string())
    }

    fn structured_payload(entries: &[(&str, f64)]) -> FindingsPayload {
        let mut map = serde_json::Map::new();
        for (label, confidence) in entries {
            map.insert(label.to_string(), serde_json::json!(confidence));
        }
        FindingsPayload::Structured(map)
    }

    #[test]
    fn parses_single_quoted_pseudo_json() {
        let findings = normalize(&text_payload("{'Pneumonia': 0.82, 'Edema': 0.41}"));
        assert_eq!(findings.len(), 2);
        assert_eq!(findings.top().unwrap().label, "Pneumonia");
        assert_eq!(findings.confidence_of("Edema"), Some(0.41));
    }

    #[test]
    fn structured_and_text_forms_normalize_identically() {
        let text = text_payload("{'Atelectasis': 0.12, 'Cardiomegaly': 0.77}");
        let structured = structured_payload(&[("Atelectasis", 0.12), ("Cardiomegaly", 0.77)]);
        assert_eq!(normalize(&text), normalize(&structured));
    }

    #[test]
    fn orders_by_descending_confidence_with_stable_ties() {
        let findings = normalize(&text_payload("{'A': 0.5, 'B': 0.9, 'C': 0.5}"));
        let labels: Vec<&str> = findings.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, ["B", "A", "C"]);
    }

    #[test]
    fn detection_summary_text_degrades_to_empty() {
        let findings = normalize(&text_payload("Detected 3 objects."));
        assert!(findings.is_empty());
    }

    #[test]
    fn non_numeric_confidence_degrades_to_empty() {
        let findings = normalize(&text_payload("{'Pneumonia': 'high', 'Edema': 0.4}"));
        assert!(findings.is_empty());
    }

    #[test]
    fn apostrophe_in_label_degrades_to_empty() {
        // The global quote swap corrupts this payload beyond repair.
        let findings = normalize(&text_payload("{'Pott's disease': 0.3}"));
        assert!(findings.is_empty());
    }

    #[test]
    fn empty_object_is_valid_and_empty() {
        assert!(normalize(&text_payload("{}")).is_empty());
        assert!(normalize(&structured_payload(&[])).is_empty());
    }

    #[test]
    fn raw_text_passes_text_through_unchanged() {
        let payload = text_payload("{'Pneumonia': 0.82}");
        assert_eq!(raw_text(&payload), "{'Pneumonia': 0.82}");
    }

    #[test]
    fn raw_text_serializes_structured_payloads_as_json() {
        let payload = structured_payload(&[("Pneumonia", 0.82)]);
        assert_eq!(raw_text(&payload), r#"{"Pneumonia":0.82}"#);
    }

    #[test]
    fn untagged_payload_deserializes_both_forms() {
        let text: FindingsPayload = serde_json::from_str(r#""Detected 2 objects.""#).unwrap();
        assert!(matches!(text, FindingsPayload::Text(_)));

        let structured: FindingsPayload =
            serde_json::from_str(r#"{"Pneumonia": 0.82}"#).unwrap();
        assert!(matches!(structured, FindingsPayload::Structured(_)));
    }
}
