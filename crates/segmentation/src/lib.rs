//! Audience rule engine: field catalogs, operator evaluation, behavioral
//! joins against campaign metrics, and membership classification for
//! segments, smart lists and workflow triggers.

pub mod behavioral;
pub mod builder;
pub mod classifier;
pub mod engine;
pub mod fields;
pub mod operators;
pub mod rules;
pub mod workflow;

pub use behavioral::{build_index, BehaviorKind, BehavioralIndex, BehavioralIndexes};
pub use builder::AudienceBuilder;
pub use classifier::{Classification, MembershipClassifier};
pub use engine::SegmentationEngine;
pub use fields::{FieldCatalog, FieldSpec, FieldType};
pub use operators::Operator;
pub use rules::{validate, EvaluationOptions, RuleSet};
pub use workflow::{TriggerEvent, TriggerType, Workflow, WorkflowAction, WorkflowMatcher};
