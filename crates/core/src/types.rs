//! Shared CRM domain types: contact records, campaign delivery metrics, and
//! the persisted shape of rules, segments and smart lists.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One contact (or equivalent entity) as returned by the entity store.
///
/// The shape is open: `email` is the join key for behavioral rules and `id`
/// the membership key for manual lists; every other attribute is arbitrary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    attributes: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value; anything other than an object is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(attributes) => Some(Self { attributes }),
            _ => None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Case-sensitive attribute lookup. `null` is reported as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    /// Walks nested objects, e.g. `["custom_fields", "industry"]`.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.get(first.as_ref())?;
        for segment in rest {
            current = current.as_object()?.get(segment.as_ref())?;
        }
        (!current.is_null()).then_some(current)
    }

    /// Identifier used by manual lists. Numeric ids are rendered as strings.
    pub fn id(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.get("email").and_then(Value::as_str)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }
}

/// Delivery metrics for one recipient of one campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignMetric {
    #[serde(default)]
    pub campaign_id: Option<String>,
    pub recipient_email: String,
    #[serde(default)]
    pub opened_at: Option<String>,
    #[serde(default)]
    pub clicked_at: Option<String>,
    #[serde(default)]
    pub bounced: bool,
}

/// A single field/operator/value condition as authored in the UI.
///
/// `field` and `operator` stay free-form strings so that a stored rule with an
/// unknown name still deserializes; resolution happens at compile time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: String,
    /// Restricts behavioral rules to one campaign's metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

impl Rule {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
            campaign_id: None,
        }
    }

    pub fn for_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }
}

/// How a list or segment decides membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Explicit `contact_ids`.
    Manual,
    /// Rule evaluation against the live record collection.
    #[default]
    Automatic,
}

/// Persisted shape shared by segments and smart lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudienceDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filter_type: FilterType,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub contact_ids: Vec<String>,
}
