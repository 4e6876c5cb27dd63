//! Field catalogs: the typed lookup table that turns a rule's field name into
//! a comparison-ready value on a record.

use std::collections::HashMap;

use crm_core::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::behavioral::{normalize_email, BehaviorKind};

/// Value domain of a field; decides which operators apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Enum,
    Array,
    Date,
    Behavior,
    Number,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Enum => "enum",
            FieldType::Array => "array",
            FieldType::Date => "date",
            FieldType::Behavior => "behavior",
            FieldType::Number => "number",
        }
    }
}

/// How a field's value is obtained from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// Top-level attribute, exact key.
    Attribute(String),
    /// Nested attribute through JSON objects.
    Path(Vec<String>),
    /// Domain part of the record's `email`.
    EmailDomain,
    /// Membership of the record's `email` in a behavioral index.
    Behavior(BehaviorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub accessor: Accessor,
}

impl FieldSpec {
    pub fn attribute(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            accessor: Accessor::Attribute(name.clone()),
            name,
            field_type,
        }
    }

    /// A field read from a dotted path such as `custom_fields.industry`.
    pub fn path(name: impl Into<String>, path: &str, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            accessor: Accessor::Path(path.split('.').map(str::to_string).collect()),
        }
    }

    pub fn behavior(name: impl Into<String>, kind: BehaviorKind) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Behavior,
            accessor: Accessor::Behavior(kind),
        }
    }

    fn derived(name: impl Into<String>, field_type: FieldType, accessor: Accessor) -> Self {
        Self {
            name: name.into(),
            field_type,
            accessor,
        }
    }
}

/// A resolved, comparison-ready field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    /// Lowercased text.
    Text(String),
    /// Untouched JSON for enum, array, date and number fields.
    Raw(&'a Value),
    /// Whether the record is in the behavioral index.
    Membership(bool),
}

/// Source of behavioral membership answers during resolution.
pub trait MembershipLookup {
    fn contains(&self, kind: BehaviorKind, campaign_id: Option<&str>, email: &str) -> bool;
}

/// Resolves `spec` on `record`. Missing or `null` attributes yield `None`.
///
/// Behavioral fields need `lookup`; without a record email they resolve to
/// `None` as well.
pub fn resolve<'a>(
    spec: &FieldSpec,
    record: &'a Record,
    lookup: &dyn MembershipLookup,
    campaign_id: Option<&str>,
) -> Option<FieldValue<'a>> {
    match &spec.accessor {
        Accessor::Attribute(key) => shape(spec.field_type, record.get(key)?),
        Accessor::Path(path) => shape(spec.field_type, record.get_path(path.as_slice())?),
        Accessor::EmailDomain => {
            let email = record.email()?;
            let (_, domain) = email.rsplit_once('@')?;
            Some(FieldValue::Text(domain.trim().to_lowercase()))
        }
        Accessor::Behavior(kind) => {
            let email = normalize_email(record.email()?);
            if email.is_empty() {
                return None;
            }
            Some(FieldValue::Membership(
                lookup.contains(*kind, campaign_id, &email),
            ))
        }
    }
}

fn shape(field_type: FieldType, value: &Value) -> Option<FieldValue<'_>> {
    match field_type {
        FieldType::Text => scalar_text(value).map(|s| FieldValue::Text(s.to_lowercase())),
        _ => Some(FieldValue::Raw(value)),
    }
}

/// String form of a scalar JSON value; arrays and objects have none.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The set of fields rules may reference at one call site.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    fields: HashMap<String, FieldSpec>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields offered by the segment builder and smart lists.
    pub fn contacts() -> Self {
        let mut catalog = Self::new();
        for name in [
            "first_name",
            "last_name",
            "email",
            "company",
            "job_title",
            "phone",
            "city",
        ] {
            catalog.insert(FieldSpec::attribute(name, FieldType::Text));
        }
        catalog.insert(FieldSpec::derived(
            "email_domain",
            FieldType::Text,
            Accessor::EmailDomain,
        ));
        catalog.insert(FieldSpec::attribute("status", FieldType::Enum));
        catalog.insert(FieldSpec::attribute("source", FieldType::Enum));
        catalog.insert(FieldSpec::attribute("tags", FieldType::Array));
        catalog.insert(FieldSpec::attribute("lead_score", FieldType::Number));
        catalog.insert(FieldSpec::attribute("last_engaged", FieldType::Date));
        catalog.insert(FieldSpec::attribute("created_date", FieldType::Date));
        catalog.insert_behaviors();
        catalog
    }

    /// Fields offered as workflow trigger conditions.
    pub fn workflow_triggers() -> Self {
        let mut catalog = Self::new();
        catalog.insert(FieldSpec::attribute("status", FieldType::Enum));
        catalog.insert(FieldSpec::attribute("source", FieldType::Enum));
        catalog.insert(FieldSpec::attribute("tags", FieldType::Array));
        catalog.insert(FieldSpec::attribute("lead_score", FieldType::Number));
        catalog.insert(FieldSpec::attribute("company", FieldType::Text));
        catalog.insert(FieldSpec::derived(
            "email_domain",
            FieldType::Text,
            Accessor::EmailDomain,
        ));
        catalog.insert(FieldSpec::attribute("created_date", FieldType::Date));
        catalog.insert(FieldSpec::attribute("last_engaged", FieldType::Date));
        catalog.insert_behaviors();
        catalog
    }

    pub fn with_field(mut self, spec: FieldSpec) -> Self {
        self.insert(spec);
        self
    }

    pub fn insert(&mut self, spec: FieldSpec) {
        self.fields.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// All fields, sorted by name.
    pub fn fields(&self) -> Vec<&FieldSpec> {
        let mut fields: Vec<_> = self.fields.values().collect();
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn insert_behaviors(&mut self) {
        for kind in BehaviorKind::ALL {
            self.insert(FieldSpec::behavior(kind.field_name(), kind));
        }
    }
}
