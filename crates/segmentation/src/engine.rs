//! Segmentation engine: registry of saved segment and smart-list definitions
//! with classification by id.

use crm_core::config::SegmentationConfig;
use crm_core::{AudienceDefinition, CampaignMetric, CrmError, CrmResult, FilterType, Record};
use dashmap::DashMap;
use tracing::info;

use crate::classifier::{Classification, MembershipClassifier};
use crate::fields::FieldCatalog;
use crate::rules::{validate, EvaluationOptions};

pub struct SegmentationEngine {
    definitions: DashMap<String, AudienceDefinition>,
    classifier: MembershipClassifier,
}

impl SegmentationEngine {
    pub fn new() -> Self {
        Self::with_classifier(MembershipClassifier::contacts())
    }

    pub fn with_classifier(classifier: MembershipClassifier) -> Self {
        Self {
            definitions: DashMap::new(),
            classifier,
        }
    }

    pub fn from_config(config: &SegmentationConfig) -> Self {
        Self::with_classifier(
            MembershipClassifier::new(FieldCatalog::contacts())
                .with_options(EvaluationOptions::from(config)),
        )
    }

    /// Stores a definition, replacing any previous one with the same id.
    /// Automatic definitions must pass strict rule validation first.
    pub fn register(&self, definition: AudienceDefinition) -> CrmResult<()> {
        if definition.id.trim().is_empty() {
            return Err(CrmError::Validation("definition id is empty".to_string()));
        }
        if definition.filter_type == FilterType::Automatic {
            validate(&definition.rules, self.classifier.catalog())?;
        }
        info!(
            definition_id = %definition.id,
            name = %definition.name,
            filter_type = ?definition.filter_type,
            rules = definition.rules.len(),
            "Registered audience definition"
        );
        self.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<AudienceDefinition> {
        self.definitions.get(id).map(|d| d.clone())
    }

    pub fn list(&self) -> Vec<AudienceDefinition> {
        let mut all: Vec<_> = self.definitions.iter().map(|d| d.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn remove(&self, id: &str) -> Option<AudienceDefinition> {
        let removed = self.definitions.remove(id).map(|(_, d)| d);
        if removed.is_some() {
            info!(definition_id = %id, "Removed audience definition");
        }
        removed
    }

    pub fn classify<'r>(
        &self,
        id: &str,
        records: &'r [Record],
        metrics: &[CampaignMetric],
    ) -> CrmResult<Classification<'r>> {
        let definition = self.require(id)?;
        Ok(self.classifier.classify(records, &definition, metrics))
    }

    /// Live audience size for a saved definition.
    pub fn estimate_size(
        &self,
        id: &str,
        records: &[Record],
        metrics: &[CampaignMetric],
    ) -> CrmResult<usize> {
        let definition = self.require(id)?;
        Ok(self.classifier.count(records, &definition, metrics))
    }

    /// Ids of every registered definition the record belongs to.
    pub fn memberships(&self, record: &Record, metrics: &[CampaignMetric]) -> Vec<String> {
        let mut ids: Vec<String> = self
            .list()
            .into_iter()
            .filter(|definition| {
                self.classifier
                    .count(std::slice::from_ref(record), definition, metrics)
                    == 1
            })
            .map(|definition| definition.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn classifier(&self) -> &MembershipClassifier {
        &self.classifier
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    // Cloned out so no map shard stays locked during evaluation.
    fn require(&self, id: &str) -> CrmResult<AudienceDefinition> {
        self.get(id)
            .ok_or_else(|| CrmError::NotFound(format!("audience definition `{id}`")))
    }
}

impl Default for SegmentationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::AudienceBuilder;
    use serde_json::json;

    fn records() -> Vec<Record> {
        [
            json!({ "id": "1", "email": "a@x.com", "tags": ["vip"], "status": "customer" }),
            json!({ "id": "2", "email": "b@x.com", "tags": [], "status": "lead" }),
        ]
        .into_iter()
        .filter_map(Record::from_value)
        .collect()
    }

    #[test]
    fn test_register_and_classify() {
        let engine = SegmentationEngine::new();
        let vips = AudienceBuilder::new("VIPs").with_id("vips").has_tag("VIP").build();
        engine.register(vips).unwrap();

        let records = records();
        let result = engine.classify("vips", &records, &[]).unwrap();
        assert_eq!(result.ids(), vec!["1".to_string()]);
        assert_eq!(engine.estimate_size("vips", &records, &[]).unwrap(), 1);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let engine = SegmentationEngine::new();
        let err = engine.estimate_size("missing", &records(), &[]).unwrap_err();
        assert!(matches!(err, CrmError::NotFound(_)));
    }

    #[test]
    fn test_register_rejects_invalid_rules() {
        let engine = SegmentationEngine::new();
        let draft = AudienceBuilder::new("Draft")
            .rule("lead_score", "greater_than", "")
            .build();
        assert!(matches!(engine.register(draft), Err(CrmError::Validation(_))));
        assert!(engine.is_empty());

        // Manual lists carry no rules worth validating.
        let manual = AudienceBuilder::new("Hand picked")
            .manual()
            .contact("2")
            .rule("nonsense", "equals", "x")
            .build();
        assert!(engine.register(manual).is_ok());
    }

    #[test]
    fn test_memberships_and_remove() {
        let engine = SegmentationEngine::new();
        let customers = AudienceBuilder::new("Customers")
            .with_id("customers")
            .rule("status", "equals", "customer")
            .build();
        let picked = AudienceBuilder::new("Picked")
            .with_id("picked")
            .manual()
            .contact("1")
            .build();
        engine.register(customers).unwrap();
        engine.register(picked).unwrap();

        let records = records();
        assert_eq!(
            engine.memberships(&records[0], &[]),
            vec!["customers".to_string(), "picked".to_string()]
        );
        assert!(engine.memberships(&records[1], &[]).is_empty());

        assert!(engine.remove("picked").is_some());
        assert!(engine.remove("picked").is_none());
        assert_eq!(engine.list().len(), 1);
    }

    #[test]
    fn test_from_config_honours_strictness() {
        let config = SegmentationConfig {
            pass_through_empty_values: false,
        };
        let engine = SegmentationEngine::from_config(&config);
        assert!(!engine.classifier().options().pass_through_empty_values);
    }
}
