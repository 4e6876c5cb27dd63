//! crm-audience: evaluates segment, smart-list and workflow rules against
//! contact and campaign-metric collections exported from the entity store.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use crm_core::config::{AppConfig, LoggingConfig};
use crm_core::{AudienceDefinition, CampaignMetric, Record};
use crm_segmentation::{
    validate, EvaluationOptions, FieldCatalog, MembershipClassifier, TriggerEvent, TriggerType,
    Workflow, WorkflowMatcher,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crm-audience")]
#[command(about = "Rule-based audience classification for CRM segments, lists and workflows")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables still override it)
    #[arg(long, env = "CRM_AUDIENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Fail rules with empty values instead of skipping them (overrides config)
    #[arg(long, default_value_t = false)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify contacts against a segment or smart-list definition
    Classify {
        /// JSON array of contact records
        #[arg(long)]
        contacts: PathBuf,
        /// JSON audience definition (rules, filter_type, contact_ids)
        #[arg(long)]
        definition: PathBuf,
        /// JSON array of campaign metrics for behavioral rules
        #[arg(long)]
        metrics: Option<PathBuf>,
        /// Print only the audience size
        #[arg(long, default_value_t = false)]
        count_only: bool,
    },
    /// Strictly validate a definition's rules
    Validate {
        #[arg(long)]
        definition: PathBuf,
        #[arg(long, value_enum, default_value_t = CatalogKind::Contacts)]
        catalog: CatalogKind,
    },
    /// List the workflows a contact event fires
    Trigger {
        /// JSON array of workflows
        #[arg(long)]
        workflows: PathBuf,
        /// JSON contact record
        #[arg(long)]
        contact: PathBuf,
        /// Trigger type, e.g. contact_created or tag_added
        #[arg(long)]
        event: String,
        /// Tag for tag_added events
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        metrics: Option<PathBuf>,
    },
    /// Print the fields and operators a catalog offers
    Fields {
        #[arg(long, value_enum, default_value_t = CatalogKind::Contacts)]
        catalog: CatalogKind,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CatalogKind {
    Contacts,
    Workflow,
}

impl CatalogKind {
    fn catalog(self) -> FieldCatalog {
        match self {
            CatalogKind::Contacts => FieldCatalog::contacts(),
            CatalogKind::Workflow => FieldCatalog::workflow_triggers(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = AppConfig::load(cli.config.as_deref());
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => AppConfig::default(),
    };
    init_tracing(&config.logging);
    if let Err(e) = loaded {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    if cli.strict {
        config.segmentation.pass_through_empty_values = false;
    }
    let options = EvaluationOptions::from(&config.segmentation);

    match cli.command {
        Command::Classify {
            contacts,
            definition,
            metrics,
            count_only,
        } => {
            let records: Vec<Record> = read_json(&contacts)?;
            let definition: AudienceDefinition = read_json(&definition)?;
            let metrics = read_metrics(metrics.as_deref())?;
            let classifier = MembershipClassifier::contacts().with_options(options);

            info!(
                definition_id = %definition.id,
                records = records.len(),
                metrics = metrics.len(),
                "Classifying audience"
            );

            let output = if count_only {
                json!({
                    "definition_id": definition.id,
                    "count": classifier.count(&records, &definition, &metrics),
                })
            } else {
                let result = classifier.classify(&records, &definition, &metrics);
                json!({
                    "definition_id": definition.id,
                    "count": result.count(),
                    "matched": result.matched,
                })
            };
            print_json(&output)
        }
        Command::Validate {
            definition,
            catalog,
        } => {
            let definition: AudienceDefinition = read_json(&definition)?;
            validate(&definition.rules, &catalog.catalog())?;
            print_json(&json!({ "definition_id": definition.id, "valid": true }))
        }
        Command::Trigger {
            workflows,
            contact,
            event,
            tag,
            metrics,
        } => {
            let workflows: Vec<Workflow> = read_json(&workflows)?;
            let contact: Record = read_json(&contact)?;
            let metrics = read_metrics(metrics.as_deref())?;
            let trigger_type: TriggerType = serde_json::from_value(json!(event))
                .map_err(|_| anyhow!("unknown trigger type `{event}`"))?;
            let event = TriggerEvent { trigger_type, tag };

            let matcher = WorkflowMatcher::new().with_options(options);
            let fired: Vec<_> = matcher
                .matching(&workflows, &event, &contact, &metrics)
                .into_iter()
                .map(|w| json!({ "id": w.id, "name": w.name, "actions": w.actions }))
                .collect();
            print_json(&json!({ "fired": fired }))
        }
        Command::Fields { catalog } => {
            let fields: Vec<_> = catalog
                .catalog()
                .fields()
                .into_iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "type": f.field_type,
                        "operators": f.field_type.operators(),
                    })
                })
                .collect();
            print_json(&json!(fields))
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging.filter.clone().into()),
        )
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_metrics(path: Option<&Path>) -> anyhow::Result<Vec<CampaignMetric>> {
    path.map_or_else(|| Ok(Vec::new()), read_json)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
