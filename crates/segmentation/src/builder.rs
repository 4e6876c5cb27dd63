//! Audience builder: fluent API for constructing segment and smart-list
//! definitions.

use crm_core::{AudienceDefinition, FilterType, Rule};
use uuid::Uuid;

use crate::behavioral::BehaviorKind;
use crate::operators::Operator;

pub struct AudienceBuilder {
    id: Option<String>,
    name: String,
    filter_type: FilterType,
    rules: Vec<Rule>,
    contact_ids: Vec<String>,
}

impl AudienceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            filter_type: FilterType::Automatic,
            rules: Vec::new(),
            contact_ids: Vec::new(),
        }
    }

    /// Keeps an id assigned by the entity store instead of generating one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn manual(mut self) -> Self {
        self.filter_type = FilterType::Manual;
        self
    }

    pub fn contact(mut self, id: impl Into<String>) -> Self {
        self.contact_ids.push(id.into());
        self
    }

    pub fn rule(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule::new(field, operator, value));
        self
    }

    pub fn text_equals(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.rule(field, Operator::Equals.as_str(), value)
    }

    pub fn has_tag(self, tag: impl Into<String>) -> Self {
        self.rule("tags", Operator::Contains.as_str(), tag)
    }

    pub fn lacks_tag(self, tag: impl Into<String>) -> Self {
        self.rule("tags", Operator::NotContains.as_str(), tag)
    }

    pub fn status_in(self, statuses: &[&str]) -> Self {
        self.rule("status", Operator::In.as_str(), statuses.join(","))
    }

    pub fn engaged_within_days(self, days: u32) -> Self {
        self.rule("last_engaged", Operator::WithinDays.as_str(), days.to_string())
    }

    pub fn lead_score_between(self, lo: f64, hi: f64) -> Self {
        self.rule("lead_score", Operator::Between.as_str(), format!("{lo},{hi}"))
    }

    pub fn did(self, behavior: BehaviorKind) -> Self {
        self.rule(behavior.field_name(), Operator::Has.as_str(), "")
    }

    pub fn did_not(self, behavior: BehaviorKind) -> Self {
        self.rule(behavior.field_name(), Operator::HasNot.as_str(), "")
    }

    pub fn opened_email(self) -> Self {
        self.did(BehaviorKind::Opened)
    }

    /// Scopes the most recently added rule to one campaign.
    pub fn in_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        if let Some(last) = self.rules.last_mut() {
            last.campaign_id = Some(campaign_id.into());
        }
        self
    }

    pub fn build(self) -> AudienceDefinition {
        AudienceDefinition {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            filter_type: self.filter_type,
            rules: self.rules,
            contact_ids: self.contact_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_automatic_segment() {
        let segment = AudienceBuilder::new("Engaged VIPs")
            .has_tag("vip")
            .status_in(&["lead", "customer"])
            .engaged_within_days(30)
            .lead_score_between(50.0, 100.0)
            .opened_email()
            .in_campaign("spring-sale")
            .build();

        assert_eq!(segment.filter_type, FilterType::Automatic);
        assert_eq!(segment.rules.len(), 5);
        assert_eq!(segment.rules[1], Rule::new("status", "in", "lead,customer"));
        assert_eq!(segment.rules[3].value, "50,100");
        assert_eq!(
            segment.rules[4],
            Rule::new("opened_email", "has", "").for_campaign("spring-sale")
        );
        assert!(Uuid::parse_str(&segment.id).is_ok());
    }

    #[test]
    fn test_build_manual_list() {
        let list = AudienceBuilder::new("Hand picked")
            .with_id("list-7")
            .manual()
            .contact("c1")
            .contact("c2")
            .build();

        assert_eq!(list.id, "list-7");
        assert_eq!(list.filter_type, FilterType::Manual);
        assert_eq!(list.contact_ids, vec!["c1".to_string(), "c2".to_string()]);
        assert!(list.rules.is_empty());
    }
}
