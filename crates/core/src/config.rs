use std::path::Path;

use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `CRM_AUDIENCE__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    /// Rules whose value is still empty contribute no filtering. When false
    /// they never match instead.
    #[serde(default = "default_pass_through_empty_values")]
    pub pass_through_empty_values: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_json")]
    pub json: bool,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default functions
fn default_pass_through_empty_values() -> bool {
    true
}
fn default_log_json() -> bool {
    true
}
fn default_log_filter() -> String {
    "crm_audience=info,crm_segmentation=info".to_string()
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            pass_through_empty_values: default_pass_through_empty_values(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: default_log_json(),
            filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    /// Environment variables take precedence over the file.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("CRM_AUDIENCE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}
