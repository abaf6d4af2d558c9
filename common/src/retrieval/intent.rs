use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse query purpose assigned by the upstream classifier.
///
/// The classifier is an external collaborator; unknown labels fold into
/// `General` rather than failing deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Recipe,
    RecipeCollection,
    ProductInfo,
    Comparison,
    Support,
    #[default]
    #[serde(other)]
    General,
}

impl std::str::FromStr for IntentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "recipe" => Ok(Self::Recipe),
            "recipe_collection" | "recipe-collection" => Ok(Self::RecipeCollection),
            "product_info" | "product-info" | "product" => Ok(Self::ProductInfo),
            "comparison" | "catalog" => Ok(Self::Comparison),
            "support" => Ok(Self::Support),
            "general" => Ok(Self::General),
            other => Err(format!("unknown intent type '{other}'")),
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IntentType::Recipe => "recipe",
            IntentType::RecipeCollection => "recipe_collection",
            IntentType::ProductInfo => "product_info",
            IntentType::Comparison => "comparison",
            IntentType::Support => "support",
            IntentType::General => "general",
        };
        f.write_str(label)
    }
}

/// Entities the classifier extracted from the query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntentEntities {
    pub products: Vec<String>,
    pub ingredients: Vec<String>,
    pub goals: Vec<String>,
}

/// Read-only classifier output consumed by the retrieval planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntentClassification {
    pub intent_type: IntentType,
    pub confidence: f32,
    pub content_types: Vec<String>,
    pub entities: IntentEntities,
}

impl Default for IntentClassification {
    fn default() -> Self {
        Self {
            intent_type: IntentType::General,
            confidence: 0.0,
            content_types: Vec::new(),
            entities: IntentEntities::default(),
        }
    }
}

impl IntentClassification {
    /// A permissive classification used when the upstream classifier output
    /// is missing or unusable.
    pub fn generic() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_intent_labels_fold_to_general() {
        let parsed: IntentClassification = serde_json::from_str(
            r#"{"intent_type": "weather_forecast", "confidence": 0.9}"#,
        )
        .expect("intent with unknown label should deserialize");
        assert_eq!(parsed.intent_type, IntentType::General);
    }

    #[test]
    fn missing_fields_default() {
        let parsed: IntentClassification = serde_json::from_str("{}").expect("empty intent");
        assert_eq!(parsed.intent_type, IntentType::General);
        assert!(parsed.content_types.is_empty());
        assert!(parsed.entities.ingredients.is_empty());
    }

    #[test]
    fn round_trips_known_intents() {
        let intent = IntentClassification {
            intent_type: IntentType::Comparison,
            confidence: 0.82,
            content_types: vec!["product".into()],
            entities: IntentEntities {
                products: vec!["almond flour".into()],
                ..IntentEntities::default()
            },
        };
        let json = serde_json::to_string(&intent).expect("serialize intent");
        let back: IntentClassification = serde_json::from_str(&json).expect("deserialize intent");
        assert_eq!(back, intent);
    }
}
