//! Workflow triggers: decides which automation workflows fire for a contact
//! event, and who a workflow's enrolment audience is.
//!
//! Trigger conditions use the same rule evaluator as segments, over the
//! workflow-trigger field catalog. Executing actions is left to the caller.

use chrono::{DateTime, Utc};
use crm_core::{CampaignMetric, CrmError, CrmResult, Record, Rule};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::{Classification, MembershipClassifier};
use crate::fields::FieldCatalog;
use crate::rules::{validate, EvaluationOptions};

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// The contact event a workflow listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    ContactCreated,
    ContactUpdated,
    TagAdded,
    StatusChanged,
    EmailOpened,
    LinkClicked,
    FormSubmitted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub trigger_type: TriggerType,
    /// For `tag_added`: only this tag fires the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Extra conditions the contact must satisfy, AND-combined.
    #[serde(default)]
    pub conditions: Vec<Rule>,
}

/// Something that happened to a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub tag: Option<String>,
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            tag: None,
        }
    }

    pub fn tag_added(tag: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::TagAdded,
            tag: Some(tag.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum WorkflowAction {
    SendEmail { template_id: String },
    AddTag { tag: String },
    RemoveTag { tag: String },
    UpdateStatus { status: String },
    Wait { days: u32 },
    NotifyOwner { message: String },
}

impl WorkflowAction {
    fn validate(&self) -> Result<(), String> {
        let (what, value) = match self {
            WorkflowAction::SendEmail { template_id } => ("email template", template_id),
            WorkflowAction::AddTag { tag } | WorkflowAction::RemoveTag { tag } => ("tag", tag),
            WorkflowAction::UpdateStatus { status } => ("status", status),
            WorkflowAction::NotifyOwner { message } => ("notification message", message),
            WorkflowAction::Wait { days } => {
                return if *days == 0 {
                    Err("wait must be at least one day".to_string())
                } else {
                    Ok(())
                };
            }
        };
        if value.trim().is_empty() {
            Err(format!("{what} is empty"))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    pub trigger: WorkflowTrigger,
    #[serde(default)]
    pub actions: Vec<WorkflowAction>,
}

impl Workflow {
    /// Checks the workflow is executable: it has actions, every action is
    /// complete and every trigger condition is well formed.
    pub fn validate(&self, catalog: &FieldCatalog) -> CrmResult<()> {
        if self.actions.is_empty() {
            return Err(CrmError::Workflow(format!(
                "workflow `{}` has no actions",
                self.name
            )));
        }
        if let Some((i, reason)) = self
            .actions
            .iter()
            .enumerate()
            .find_map(|(i, action)| action.validate().err().map(|reason| (i, reason)))
        {
            return Err(CrmError::Workflow(format!(
                "workflow `{}` action {}: {}",
                self.name,
                i + 1,
                reason
            )));
        }
        if self.trigger.trigger_type == TriggerType::TagAdded
            && self.trigger.tag.as_deref().is_some_and(|t| t.trim().is_empty())
        {
            return Err(CrmError::Workflow(format!(
                "workflow `{}` trigger tag is empty",
                self.name
            )));
        }
        validate(&self.trigger.conditions, catalog)
    }

    fn listens_for(&self, event: &TriggerEvent) -> bool {
        if !self.is_active || self.trigger.trigger_type != event.trigger_type {
            return false;
        }
        match (&self.trigger.tag, &event.tag) {
            (None, _) => true,
            (Some(wanted), Some(got)) => {
                wanted.trim().to_lowercase() == got.trim().to_lowercase()
            }
            (Some(_), None) => false,
        }
    }
}

/// Matches contact events against workflow triggers.
#[derive(Debug, Clone)]
pub struct WorkflowMatcher {
    classifier: MembershipClassifier,
}

impl WorkflowMatcher {
    pub fn new() -> Self {
        Self {
            classifier: MembershipClassifier::new(FieldCatalog::workflow_triggers()),
        }
    }

    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.classifier = self.classifier.with_options(options);
        self
    }

    pub fn catalog(&self) -> &FieldCatalog {
        self.classifier.catalog()
    }

    /// Active workflows that fire for `event` on `contact`.
    pub fn matching<'w>(
        &self,
        workflows: &'w [Workflow],
        event: &TriggerEvent,
        contact: &Record,
        metrics: &[CampaignMetric],
    ) -> Vec<&'w Workflow> {
        self.matching_at(workflows, event, contact, metrics, Utc::now())
    }

    pub fn matching_at<'w>(
        &self,
        workflows: &'w [Workflow],
        event: &TriggerEvent,
        contact: &Record,
        metrics: &[CampaignMetric],
        now: DateTime<Utc>,
    ) -> Vec<&'w Workflow> {
        let fired: Vec<&Workflow> = workflows
            .iter()
            .filter(|w| w.listens_for(event))
            .filter(|w| {
                self.classifier
                    .matches_at(contact, &w.trigger.conditions, metrics, now)
            })
            .collect();
        debug!(
            trigger = ?event.trigger_type,
            candidates = workflows.len(),
            fired = fired.len(),
            "Matched workflow triggers"
        );
        fired
    }

    /// Contacts currently satisfying the workflow's trigger conditions.
    pub fn audience<'r>(
        &self,
        workflow: &Workflow,
        records: &'r [Record],
        metrics: &[CampaignMetric],
    ) -> Classification<'r> {
        self.audience_at(workflow, records, metrics, Utc::now())
    }

    pub fn audience_at<'r>(
        &self,
        workflow: &Workflow,
        records: &'r [Record],
        metrics: &[CampaignMetric],
        now: DateTime<Utc>,
    ) -> Classification<'r> {
        self.classifier
            .filter_at(records, &workflow.trigger.conditions, metrics, now)
    }
}

impl Default for WorkflowMatcher {
    fn default() -> Self {
        Self::new()
    }
}
