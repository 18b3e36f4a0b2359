use serde_json::Value;

use crate::core::normalize::CanonicalAttributes;
use crate::error::AppError;

/// Canonical attributes split for the asset manager: `direct` entries map to
/// natively settable attributes (addressed by uppercased label), everything
/// else is folded into one free-text description field.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedAttributes {
    pub direct: Vec<(String, String)>,
    pub description: String,
}

impl RoutedAttributes {
    /// Flatten into the (attribute name, value) pairs that get patched onto
    /// each asset, description included under its configured attribute name.
    pub fn to_tag_pairs(&self, description_attribute: &str) -> Vec<(String, String)> {
        let mut pairs = self.direct.clone();
        pairs.push((description_attribute.to_string(), self.description.clone()));
        pairs
    }
}

/// Split canonical attributes into direct vs. aggregated.
///
/// The direct list is configuration and can change between deployments, so
/// this runs fresh on every request instead of being cached alongside the
/// submission. A direct key with no canonical entry means the config names a
/// field the survey schema doesn't produce.
pub fn route_attributes(
    canonical: &CanonicalAttributes,
    direct_keys: &[String],
) -> Result<RoutedAttributes, AppError> {
    let mut direct = Vec::with_capacity(direct_keys.len());
    for key in direct_keys {
        let attr = canonical.get(key).ok_or_else(|| {
            AppError::configuration(format!("direct attribute '{key}' not present in submission"))
        })?;
        direct.push((attr.label.to_uppercase(), value_to_string(&attr.value)));
    }

    let description = canonical
        .iter()
        .filter(|attr| !direct_keys.contains(&attr.key))
        .map(|attr| format!("{}: {}", attr.label, value_to_string(&attr.value)))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(RoutedAttributes { direct, description })
}

/// Strings render without quotes; everything else uses its JSON rendering.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::{normalize_submission, rules_from_attribute_map};
    use serde_json::json;

    fn sample_canonical() -> CanonicalAttributes {
        let record = json!({
            "SHAPE": { "x": 7.14, "y": 50.70 },
            "project_name": "Retreat zone 1",
            "your_name": "A. Monitor",
        });
        let pairs: Vec<(String, String)> = vec![
            ("SHAPE".into(), "x~y".into()),
            ("project_name".into(), "Project Name".into()),
            ("your_name".into(), "Forest Monitor name".into()),
        ];
        normalize_submission(
            record.as_object().unwrap(),
            &rules_from_attribute_map(&pairs),
        )
        .unwrap()
    }

    #[test]
    fn direct_and_aggregated_partition_the_input() {
        let canonical = sample_canonical();
        let direct_keys = vec!["x".to_string(), "y".to_string()];
        let routed = route_attributes(&canonical, &direct_keys).unwrap();

        // every direct key is present, uppercased
        assert_eq!(routed.direct.len(), 2);
        assert!(routed.direct.iter().any(|(label, _)| label == "X"));
        assert!(routed.direct.iter().any(|(label, _)| label == "Y"));

        // the description holds exactly the remaining attributes
        let lines: Vec<&str> = routed.description.lines().collect();
        assert_eq!(lines.len(), canonical.len() - direct_keys.len());
        assert!(lines.contains(&"Project Name: Retreat zone 1"));
        assert!(lines.contains(&"Forest Monitor name: A. Monitor"));
        // and none of the direct values leaked into it
        assert!(!routed.description.contains("7.14"));
    }

    #[test]
    fn numeric_direct_values_render_plainly() {
        let canonical = sample_canonical();
        let routed = route_attributes(&canonical, &["x".to_string()]).unwrap();
        assert_eq!(routed.direct[0], ("X".to_string(), "7.14".to_string()));
    }

    #[test]
    fn empty_direct_list_routes_everything_to_description() {
        let canonical = sample_canonical();
        let routed = route_attributes(&canonical, &[]).unwrap();
        assert!(routed.direct.is_empty());
        assert_eq!(routed.description.lines().count(), canonical.len());
    }

    #[test]
    fn unknown_direct_key_is_a_configuration_error() {
        let canonical = sample_canonical();
        let err = route_attributes(&canonical, &["altitude".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn tag_pairs_append_the_description_attribute() {
        let canonical = sample_canonical();
        let routed = route_attributes(&canonical, &["x".to_string(), "y".to_string()]).unwrap();
        let pairs = routed.to_tag_pairs("Description");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs.last().unwrap().0, "Description");
    }
}
