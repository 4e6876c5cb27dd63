//! Membership classification: decides which records belong to a segment or
//! smart list, either by explicit ids or by rule evaluation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use crm_core::{AudienceDefinition, CampaignMetric, FilterType, Record, Rule};
use tracing::debug;

use crate::behavioral::BehavioralIndexes;
use crate::fields::FieldCatalog;
use crate::rules::{EvaluationOptions, RuleSet};

/// Records selected by one classification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification<'r> {
    pub matched: Vec<&'r Record>,
}

impl<'r> Classification<'r> {
    pub fn count(&self) -> usize {
        self.matched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }

    /// Identifiers of the matched records that carry one.
    pub fn ids(&self) -> Vec<String> {
        self.matched.iter().filter_map(|r| r.id()).collect()
    }

    pub fn into_owned(self) -> Vec<Record> {
        self.matched.into_iter().cloned().collect()
    }
}

/// Everything one pass needs, prepared before the record loop.
enum Plan {
    Manual(HashSet<String>),
    Automatic {
        rules: RuleSet,
        indexes: BehavioralIndexes,
        now: DateTime<Utc>,
    },
}

impl Plan {
    fn includes(&self, record: &Record) -> bool {
        match self {
            Plan::Manual(ids) => record.id().is_some_and(|id| ids.contains(&id)),
            Plan::Automatic {
                rules,
                indexes,
                now,
            } => rules.evaluate(record, indexes, *now),
        }
    }
}

/// Stateless classifier parameterised by the field catalog of its call site.
#[derive(Debug, Clone)]
pub struct MembershipClassifier {
    catalog: FieldCatalog,
    options: EvaluationOptions,
}

impl MembershipClassifier {
    pub fn new(catalog: FieldCatalog) -> Self {
        Self {
            catalog,
            options: EvaluationOptions::default(),
        }
    }

    /// Classifier over the contact field catalog.
    pub fn contacts() -> Self {
        Self::new(FieldCatalog::contacts())
    }

    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn options(&self) -> &EvaluationOptions {
        &self.options
    }

    pub fn classify<'r>(
        &self,
        records: &'r [Record],
        definition: &AudienceDefinition,
        metrics: &[CampaignMetric],
    ) -> Classification<'r> {
        self.classify_at(records, definition, metrics, Utc::now())
    }

    /// Like [`classify`](Self::classify) with an explicit evaluation time.
    pub fn classify_at<'r>(
        &self,
        records: &'r [Record],
        definition: &AudienceDefinition,
        metrics: &[CampaignMetric],
        now: DateTime<Utc>,
    ) -> Classification<'r> {
        let plan = self.plan(definition, metrics, now);
        let matched: Vec<&Record> = records.iter().filter(|r| plan.includes(r)).collect();
        debug!(
            definition_id = %definition.id,
            filter_type = ?definition.filter_type,
            total = records.len(),
            matched = matched.len(),
            "Classified audience"
        );
        Classification { matched }
    }

    /// Audience size only; same evaluation as [`classify`](Self::classify).
    pub fn count(
        &self,
        records: &[Record],
        definition: &AudienceDefinition,
        metrics: &[CampaignMetric],
    ) -> usize {
        self.count_at(records, definition, metrics, Utc::now())
    }

    pub fn count_at(
        &self,
        records: &[Record],
        definition: &AudienceDefinition,
        metrics: &[CampaignMetric],
        now: DateTime<Utc>,
    ) -> usize {
        let plan = self.plan(definition, metrics, now);
        records.iter().filter(|r| plan.includes(r)).count()
    }

    /// Rule-only evaluation, for callers holding a bare rule list such as a
    /// workflow trigger or an unsaved segment draft.
    pub fn filter_at<'r>(
        &self,
        records: &'r [Record],
        rules: &[Rule],
        metrics: &[CampaignMetric],
        now: DateTime<Utc>,
    ) -> Classification<'r> {
        let plan = self.automatic_plan(rules, metrics, now);
        Classification {
            matched: records.iter().filter(|r| plan.includes(r)).collect(),
        }
    }

    /// Whether a single record satisfies `rules`.
    pub fn matches_at(
        &self,
        record: &Record,
        rules: &[Rule],
        metrics: &[CampaignMetric],
        now: DateTime<Utc>,
    ) -> bool {
        self.automatic_plan(rules, metrics, now).includes(record)
    }

    fn plan(
        &self,
        definition: &AudienceDefinition,
        metrics: &[CampaignMetric],
        now: DateTime<Utc>,
    ) -> Plan {
        match definition.filter_type {
            FilterType::Manual => Plan::Manual(definition.contact_ids.iter().cloned().collect()),
            FilterType::Automatic => self.automatic_plan(&definition.rules, metrics, now),
        }
    }

    fn automatic_plan(&self, rules: &[Rule], metrics: &[CampaignMetric], now: DateTime<Utc>) -> Plan {
        let rules = RuleSet::compile(rules, &self.catalog, &self.options);
        let indexes = BehavioralIndexes::build(metrics, rules.behavioral_keys());
        Plan::Automatic {
            rules,
            indexes,
            now,
        }
    }
}

impl Default for MembershipClassifier {
    fn default() -> Self {
        Self::contacts()
    }
}
