//! Declarative effect-stack model.
//!
//! The stack document is the sole way hosts mutate pipeline behavior: an
//! ordered list of [`PassSpec`] entries, each naming a pass type and carrying
//! an option bag. The [`Reconciler`] diffs consecutive documents against its
//! cache of live pass instances and rebuilds only entries whose structural
//! configuration changed; tunable edits are patched in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod reconcile;

pub use reconcile::{PassFactory, Reconciler, StackPass};

/// Option bag attached to one stack entry, keyed by option name.
pub type OptionMap = BTreeMap<String, OptionValue>;

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("failed to parse effect stack: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate pass id '{0}' in effect stack")]
    DuplicateId(String),
}

/// One externally supplied stack entry.
///
/// `id` is stable across re-renders and is the reconciliation key; `kind`
/// selects the pass type from the registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PassSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub options: OptionMap,
}

fn default_enabled() -> bool {
    true
}

/// A single option value as it appears in the stack document.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl OptionValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            OptionValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Reads a numeric value clamped to `[min, max]`, falling back to
    /// `default` when the value is missing, non-numeric, or not finite.
    pub fn number_in(&self, min: f64, max: f64, default: f64) -> f64 {
        match self.as_f64() {
            Some(v) if v.is_finite() => v.clamp(min, max),
            _ => default,
        }
    }
}

impl PartialEq for OptionValue {
    /// Deep equality with NaN treated as equal to itself, so a stack
    /// document carrying NaN twice does not register as a change per frame.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OptionValue::Bool(a), OptionValue::Bool(b)) => a == b,
            (OptionValue::Number(a), OptionValue::Number(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            }
            (OptionValue::Text(a), OptionValue::Text(b)) => a == b,
            (OptionValue::List(a), OptionValue::List(b)) => a == b,
            _ => false,
        }
    }
}

/// Convenience lookup with clamping for pass constructors.
pub fn option_number(options: &OptionMap, key: &str, min: f64, max: f64, default: f64) -> f64 {
    options
        .get(key)
        .map(|v| v.number_in(min, max, default))
        .unwrap_or(default)
}

pub fn option_text<'a>(options: &'a OptionMap, key: &str, default: &'a str) -> &'a str {
    options.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}

/// Parses a stack document from JSON and rejects duplicate ids.
pub fn parse_stack(json: &str) -> Result<Vec<PassSpec>, StackError> {
    let specs: Vec<PassSpec> = serde_json::from_str(json)?;
    let mut seen = std::collections::HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.id.as_str()) {
            return Err(StackError::DuplicateId(spec.id.clone()));
        }
    }
    Ok(specs)
}

/// Keys whose values differ between two option bags, including keys present
/// on only one side.
pub fn changed_keys(before: &OptionMap, after: &OptionMap) -> Vec<String> {
    let mut keys = Vec::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            keys.push(key.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            keys.push(key.clone());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, OptionValue)]) -> OptionMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn parses_stack_document() {
        let specs = parse_stack(
            r#"[
                {"id": "a", "type": "invert"},
                {"id": "b", "type": "palette", "enabled": false,
                 "options": {"preset": "Gruvbox"}}
            ]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert!(specs[0].enabled);
        assert!(!specs[1].enabled);
        assert_eq!(
            specs[1].options.get("preset").unwrap().as_str(),
            Some("Gruvbox")
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = parse_stack(r#"[{"id": "a", "type": "invert"}, {"id": "a", "type": "invert"}]"#)
            .unwrap_err();
        assert!(matches!(err, StackError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn nan_compares_equal_to_itself() {
        let a = OptionValue::Number(f64::NAN);
        let b = OptionValue::Number(f64::NAN);
        assert_eq!(a, b);
        assert_ne!(OptionValue::Number(1.0), OptionValue::Number(2.0));
    }

    #[test]
    fn changed_keys_covers_additions_removals_and_edits() {
        let before = opts(&[
            ("low", OptionValue::Number(0.2)),
            ("mode", OptionValue::Text("Threshold".into())),
        ]);
        let after = opts(&[
            ("low", OptionValue::Number(0.4)),
            ("high", OptionValue::Number(0.9)),
        ]);
        let mut keys = changed_keys(&before, &after);
        keys.sort();
        assert_eq!(keys, vec!["high", "low", "mode"]);
    }

    #[test]
    fn numbers_clamp_to_declared_ranges() {
        assert_eq!(OptionValue::Number(99.0).number_in(0.0, 1.0, 0.5), 1.0);
        assert_eq!(OptionValue::Number(-3.0).number_in(0.0, 1.0, 0.5), 0.0);
        assert_eq!(OptionValue::Number(f64::NAN).number_in(0.0, 1.0, 0.5), 0.5);
        assert_eq!(OptionValue::Text("x".into()).number_in(0.0, 1.0, 0.5), 0.5);
    }
}
