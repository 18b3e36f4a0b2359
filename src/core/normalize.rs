use serde_json::{Map, Value};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Survey choice fields with an "Other" free-text option store the override
/// under `<field>_other`, next to the regular `<field>` value.
pub const OTHER_SUFFIX: &str = "_other";
/// Separator inside a configured label that marks a compound geometry field,
/// e.g. `SHAPE=x~y` extracts `x` and `y` from the nested `SHAPE` object.
pub const COMPOUND_SEPARATOR: char = '~';

/// One declarative rule for turning a raw submission field into canonical
/// attributes. The whole METADATA_ATTRIBUTES config compiles into a list of
/// these, so the interpreter below stays free of string-convention sniffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// Pass the raw value through under the configured label.
    Copy { field: String, label: String },
    /// Use the `_other` override when it is non-empty, otherwise fall back
    /// to the value of the field with the suffix stripped.
    OtherFallback { field: String, label: String },
    /// Pull two sub-values out of a nested object (e.g. SHAPE.x / SHAPE.y),
    /// each emitted as its own attribute labeled with the uppercased key.
    Decompose {
        field: String,
        first: String,
        second: String,
    },
}

/// One canonical (key, label, value) attribute derived from a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CanonicalAttribute {
    pub key: String,
    pub label: String,
    #[schema(value_type = Object)]
    pub value: Value,
}

/// The full canonical attribute set of a submission. Insertion-ordered, so
/// the description text built from it is stable across reads. Written once
/// at submission creation, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct CanonicalAttributes(pub Vec<CanonicalAttribute>);

impl CanonicalAttributes {
    pub fn get(&self, key: &str) -> Option<&CanonicalAttribute> {
        self.0.iter().find(|attr| attr.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanonicalAttribute> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, key: impl Into<String>, label: impl Into<String>, value: Value) {
        self.0.push(CanonicalAttribute {
            key: key.into(),
            label: label.into(),
            value,
        });
    }
}

/// Compile the configured field→label mapping into rules. The conventions
/// come from the survey tool: a `~` in the label means a compound field,
/// a field name ending in `_other` means a choice with an "Other" option.
pub fn rules_from_attribute_map(pairs: &[(String, String)]) -> Vec<FieldRule> {
    pairs
        .iter()
        .map(|(field, label)| {
            if let Some((first, second)) = label.split_once(COMPOUND_SEPARATOR) {
                FieldRule::Decompose {
                    field: field.clone(),
                    first: first.to_string(),
                    second: second.to_string(),
                }
            } else if field.ends_with(OTHER_SUFFIX) {
                FieldRule::OtherFallback {
                    field: field.clone(),
                    label: label.clone(),
                }
            } else {
                FieldRule::Copy {
                    field: field.clone(),
                    label: label.clone(),
                }
            }
        })
        .collect()
}

/// Derive the canonical attribute set from a raw submission record.
///
/// A field referenced by a rule but missing from the record means the
/// deployed survey schema and METADATA_ATTRIBUTES have drifted apart; that
/// is a configuration error and propagates instead of being papered over.
pub fn normalize_submission(
    record: &Map<String, Value>,
    rules: &[FieldRule],
) -> Result<CanonicalAttributes, AppError> {
    let mut canonical = CanonicalAttributes::default();

    for rule in rules {
        match rule {
            FieldRule::Copy { field, label } => {
                canonical.push(field.clone(), label.clone(), require_field(record, field)?);
            }
            FieldRule::OtherFallback { field, label } => {
                let override_value = require_field(record, field)?;
                let value = if is_empty_value(&override_value) {
                    // "Other" was not used, take the regular choice value
                    let base_field = field.strip_suffix(OTHER_SUFFIX).unwrap_or(field);
                    require_field(record, base_field)?
                } else {
                    override_value
                };
                canonical.push(field.clone(), label.clone(), value);
            }
            FieldRule::Decompose {
                field,
                first,
                second,
            } => {
                let compound = require_field(record, field)?;
                let nested = compound.as_object().ok_or_else(|| {
                    AppError::configuration(format!(
                        "field '{field}' is configured as compound but holds no nested object"
                    ))
                })?;
                for key in [first, second] {
                    let value = nested.get(key.as_str()).cloned().ok_or_else(|| {
                        AppError::configuration(format!(
                            "compound field '{field}' has no sub-value '{key}'"
                        ))
                    })?;
                    canonical.push(key.clone(), key.to_uppercase(), value);
                }
            }
        }
    }

    Ok(canonical)
}

fn require_field(record: &Map<String, Value>, field: &str) -> Result<Value, AppError> {
    record.get(field).cloned().ok_or_else(|| {
        AppError::configuration(format!("submission record has no field '{field}'"))
    })
}

/// Null and empty strings count as "not filled in" for the Other-fallback.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().expect("test record must be an object").clone()
    }

    fn rules(pairs: &[(&str, &str)]) -> Vec<FieldRule> {
        let owned: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        rules_from_attribute_map(&owned)
    }

    #[test]
    fn compound_field_decomposes_into_two_attributes() {
        let record = record(json!({ "SHAPE": { "x": 7.14, "y": 50.70 } }));
        let canonical = normalize_submission(&record, &rules(&[("SHAPE", "x~y")])).unwrap();

        let x = canonical.get("x").unwrap();
        assert_eq!(x.label, "X");
        assert_eq!(x.value, json!(7.14));
        let y = canonical.get("y").unwrap();
        assert_eq!(y.label, "Y");
        assert_eq!(y.value, json!(50.70));
        assert_eq!(canonical.len(), 2);
    }

    #[test]
    fn empty_other_falls_back_to_base_field() {
        let record = record(json!({
            "camera_attached_to_other": "",
            "camera_attached_to": "tree",
        }));
        let canonical = normalize_submission(
            &record,
            &rules(&[("camera_attached_to_other", "Camera attached to")]),
        )
        .unwrap();

        let attr = canonical.get("camera_attached_to_other").unwrap();
        assert_eq!(attr.label, "Camera attached to");
        assert_eq!(attr.value, json!("tree"));
    }

    #[test]
    fn non_empty_other_wins_over_base_field() {
        let record = record(json!({
            "camera_attached_to_other": "fence post",
            "camera_attached_to": "tree",
        }));
        let canonical = normalize_submission(
            &record,
            &rules(&[("camera_attached_to_other", "Camera attached to")]),
        )
        .unwrap();

        assert_eq!(
            canonical.get("camera_attached_to_other").unwrap().value,
            json!("fence post")
        );
    }

    #[test]
    fn plain_fields_pass_through_with_label() {
        let record = record(json!({ "project_name": "Chimpanzee retreat zone 1" }));
        let canonical =
            normalize_submission(&record, &rules(&[("project_name", "Project Name")])).unwrap();

        let attr = canonical.get("project_name").unwrap();
        assert_eq!(attr.label, "Project Name");
        assert_eq!(attr.value, json!("Chimpanzee retreat zone 1"));
    }

    #[test]
    fn missing_field_is_a_configuration_error() {
        let record = record(json!({ "unrelated": 1 }));
        let err = normalize_submission(&record, &rules(&[("project_name", "Project Name")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn output_preserves_rule_order() {
        let record = record(json!({
            "b_field": 2,
            "a_field": 1,
            "SHAPE": { "x": 0.0, "y": 0.0 },
        }));
        let canonical = normalize_submission(
            &record,
            &rules(&[("b_field", "B"), ("SHAPE", "x~y"), ("a_field", "A")]),
        )
        .unwrap();

        let keys: Vec<&str> = canonical.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["b_field", "x", "y", "a_field"]);
    }

    #[test]
    fn rule_compilation_recognizes_all_three_shapes() {
        let compiled = rules(&[
            ("project_name", "Project Name"),
            ("camera_attached_to_other", "Camera attached to"),
            ("SHAPE", "x~y"),
        ]);
        assert!(matches!(compiled[0], FieldRule::Copy { .. }));
        assert!(matches!(compiled[1], FieldRule::OtherFallback { .. }));
        assert!(matches!(compiled[2], FieldRule::Decompose { .. }));
    }
}
