//! Behavioral join: projects campaign delivery metrics into sets of contact
//! emails so behavioral rules become O(1) membership tests.

use std::collections::{HashMap, HashSet};

use crm_core::CampaignMetric;
use serde::{Deserialize, Serialize};

use crate::fields::MembershipLookup;

/// Engagement signals derivable from campaign metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    Opened,
    Clicked,
    Bounced,
}

impl BehaviorKind {
    pub const ALL: [BehaviorKind; 3] = [
        BehaviorKind::Opened,
        BehaviorKind::Clicked,
        BehaviorKind::Bounced,
    ];

    /// Field name the kind is exposed under in rule catalogs.
    pub fn field_name(&self) -> &'static str {
        match self {
            BehaviorKind::Opened => "opened_email",
            BehaviorKind::Clicked => "clicked_link",
            BehaviorKind::Bounced => "bounced_email",
        }
    }

    pub fn matches(&self, metric: &CampaignMetric) -> bool {
        match self {
            BehaviorKind::Opened => is_set(&metric.opened_at),
            BehaviorKind::Clicked => is_set(&metric.clicked_at),
            BehaviorKind::Bounced => metric.bounced,
        }
    }
}

fn is_set(timestamp: &Option<String>) -> bool {
    timestamp.as_deref().is_some_and(|t| !t.trim().is_empty())
}

/// Join keys compare case-insensitively and ignore surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Emails of the recipients that satisfied one behavioral predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BehavioralIndex {
    emails: HashSet<String>,
}

impl BehavioralIndex {
    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(email)
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

/// Single pass over `metrics`, collecting the recipients `predicate` accepts.
pub fn build_index<F>(metrics: &[CampaignMetric], predicate: F) -> BehavioralIndex
where
    F: Fn(&CampaignMetric) -> bool,
{
    let emails = metrics
        .iter()
        .filter(|m| predicate(m))
        .map(|m| normalize_email(&m.recipient_email))
        .filter(|email| !email.is_empty())
        .collect();
    BehavioralIndex { emails }
}

/// One index per behavior kind and optional campaign scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BehavioralKey {
    pub kind: BehaviorKind,
    pub campaign_id: Option<String>,
}

impl BehavioralKey {
    pub fn new(kind: BehaviorKind, campaign_id: Option<String>) -> Self {
        Self { kind, campaign_id }
    }
}

/// The indexes needed by one classification pass.
#[derive(Debug, Clone, Default)]
pub struct BehavioralIndexes {
    indexes: HashMap<BehavioralKey, BehavioralIndex>,
}

impl BehavioralIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds each distinct key once; duplicate keys cost nothing extra.
    pub fn build<'k>(
        metrics: &[CampaignMetric],
        keys: impl IntoIterator<Item = &'k BehavioralKey>,
    ) -> Self {
        let mut indexes = HashMap::new();
        for key in keys {
            if indexes.contains_key(key) {
                continue;
            }
            let kind = key.kind;
            let index = match key.campaign_id.as_deref() {
                Some(campaign) => build_index(metrics, |m| {
                    m.campaign_id.as_deref() == Some(campaign) && kind.matches(m)
                }),
                None => build_index(metrics, |m| kind.matches(m)),
            };
            indexes.insert(key.clone(), index);
        }
        Self { indexes }
    }

    pub fn get(&self, key: &BehavioralKey) -> Option<&BehavioralIndex> {
        self.indexes.get(key)
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

impl MembershipLookup for BehavioralIndexes {
    fn contains(&self, kind: BehaviorKind, campaign_id: Option<&str>, email: &str) -> bool {
        self.indexes
            .iter()
            .find(|(key, _)| key.kind == kind && key.campaign_id.as_deref() == campaign_id)
            .is_some_and(|(_, index)| index.contains(email))
    }
}
