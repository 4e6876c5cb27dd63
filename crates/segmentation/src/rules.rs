//! Rule sets: compilation against a field catalog and AND evaluation.
//!
//! Compilation resolves each rule's field, operator and literal once, so the
//! per-record loop only resolves the record side. Malformed rules compile to a
//! check that never matches; evaluation itself cannot fail.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use crm_core::config::SegmentationConfig;
use crm_core::{CrmError, CrmResult, Record, Rule};
use tracing::debug;

use crate::behavioral::BehavioralKey;
use crate::fields::{resolve, Accessor, FieldCatalog, FieldSpec, FieldType, MembershipLookup};
use crate::operators::{compare, Operand, Operator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationOptions {
    /// Empty values on non-behavioral rules pass every record through.
    pub pass_through_empty_values: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            pass_through_empty_values: true,
        }
    }
}

impl From<&SegmentationConfig> for EvaluationOptions {
    fn from(config: &SegmentationConfig) -> Self {
        Self {
            pass_through_empty_values: config.pass_through_empty_values,
        }
    }
}

#[derive(Debug, Clone)]
enum Check {
    /// Value not entered yet; contributes no filtering.
    Skip,
    /// Unknown field or operator, or an unparseable literal.
    Never,
    Compare {
        spec: FieldSpec,
        operator: Operator,
        operand: Operand,
    },
    Behavior {
        spec: FieldSpec,
        operator: Operator,
        key: BehavioralKey,
    },
}

/// One rule resolved against a catalog.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    check: Check,
}

impl CompiledRule {
    pub fn compile(rule: &Rule, catalog: &FieldCatalog, options: &EvaluationOptions) -> Self {
        Self {
            check: compile_check(rule, catalog, options),
        }
    }

    pub fn matches(
        &self,
        record: &Record,
        lookup: &dyn MembershipLookup,
        now: DateTime<Utc>,
    ) -> bool {
        match &self.check {
            Check::Skip => true,
            Check::Never => false,
            Check::Compare {
                spec,
                operator,
                operand,
            } => resolve(spec, record, lookup, None)
                .is_some_and(|left| compare(spec.field_type, *operator, &left, operand, now)),
            Check::Behavior {
                spec,
                operator,
                key,
            } => resolve(spec, record, lookup, key.campaign_id.as_deref()).is_some_and(|left| {
                compare(spec.field_type, *operator, &left, &Operand::Membership, now)
            }),
        }
    }

    /// The behavioral index this rule reads, if any.
    pub fn behavioral_key(&self) -> Option<&BehavioralKey> {
        match &self.check {
            Check::Behavior { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.check, Check::Skip)
    }

    pub fn never_matches(&self) -> bool {
        matches!(self.check, Check::Never)
    }
}

fn compile_check(rule: &Rule, catalog: &FieldCatalog, options: &EvaluationOptions) -> Check {
    let Some(spec) = catalog.get(&rule.field) else {
        debug!(field = %rule.field, "Rule references an unknown field");
        return Check::Never;
    };
    let Some(requested) = Operator::parse(&rule.operator) else {
        debug!(field = %rule.field, operator = %rule.operator, "Rule uses an unknown operator");
        return Check::Never;
    };
    let operator = spec.field_type.effective_operator(requested);

    if let Accessor::Behavior(kind) = spec.accessor {
        return Check::Behavior {
            spec: spec.clone(),
            operator,
            key: BehavioralKey::new(kind, rule.campaign_id.clone()),
        };
    }

    if rule.value.trim().is_empty() {
        return if options.pass_through_empty_values {
            Check::Skip
        } else {
            Check::Never
        };
    }

    match Operand::parse(spec.field_type, operator, &rule.value) {
        Some(operand) => Check::Compare {
            spec: spec.clone(),
            operator,
            operand,
        },
        None => {
            debug!(field = %rule.field, value = %rule.value, "Rule value does not parse");
            Check::Never
        }
    }
}

/// An AND-combined, compiled list of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn compile(rules: &[Rule], catalog: &FieldCatalog, options: &EvaluationOptions) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|rule| CompiledRule::compile(rule, catalog, options))
                .collect(),
        }
    }

    /// True when every rule matches. Stops at the first rule that does not.
    pub fn evaluate(
        &self,
        record: &Record,
        lookup: &dyn MembershipLookup,
        now: DateTime<Utc>,
    ) -> bool {
        self.rules
            .iter()
            .all(|rule| rule.matches(record, lookup, now))
    }

    /// Distinct behavioral indexes the set needs, in first-use order.
    pub fn behavioral_keys(&self) -> Vec<&BehavioralKey> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .filter_map(CompiledRule::behavioral_key)
            .filter(|key| seen.insert(*key))
            .collect()
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Strict check for rules about to be persisted or executed.
///
/// Unlike compilation, which degrades bad rules to "never matches", this
/// reports every problem: unknown fields and operators, operators the field
/// type does not support, missing values and unparseable literals.
pub fn validate(rules: &[Rule], catalog: &FieldCatalog) -> CrmResult<()> {
    let problems: Vec<String> = rules
        .iter()
        .enumerate()
        .filter_map(|(i, rule)| {
            validate_rule(rule, catalog)
                .err()
                .map(|reason| format!("rule {} (`{}`): {}", i + 1, rule.field, reason))
        })
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(CrmError::Validation(problems.join("; ")))
    }
}

fn validate_rule(rule: &Rule, catalog: &FieldCatalog) -> Result<(), String> {
    let spec = catalog
        .get(&rule.field)
        .ok_or_else(|| "unknown field".to_string())?;
    let operator = Operator::parse(&rule.operator)
        .ok_or_else(|| format!("unknown operator `{}`", rule.operator))?;

    if !spec.field_type.supports(operator) {
        return Err(format!(
            "operator `{}` is not valid for {} fields",
            operator,
            spec.field_type.as_str()
        ));
    }
    if spec.field_type == FieldType::Behavior {
        return Ok(());
    }
    if rule.value.trim().is_empty() {
        return Err("value is empty".to_string());
    }
    Operand::parse(spec.field_type, operator, &rule.value)
        .map(|_| ())
        .ok_or_else(|| format!("value `{}` cannot be used with `{}`", rule.value, operator))
}
