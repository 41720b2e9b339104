//! Configuration structures and loading logic

use crate::error::{ConfigResult, ConfigurationError};
use crate::regions::RegionTable;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level deployment configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    pub stack_name: String,
    pub region: String,
    pub permission_scope: PermissionScope,
    pub model: ModelSettings,
    pub image: ImageSettings,
    pub artifacts: ArtifactSettings,
    pub endpoint: EndpointSettings,
    pub gateway: GatewaySettings,

    /// Additional or replacement entries for the region account table
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub regions: BTreeMap<String, String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            region: String::new(),
            permission_scope: PermissionScope::default(),
            model: ModelSettings::default(),
            image: ImageSettings::default(),
            artifacts: ArtifactSettings::default(),
            endpoint: EndpointSettings::default(),
            gateway: GatewaySettings::default(),
            regions: BTreeMap::new(),
        }
    }
}

/// How the execution role is granted its permissions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionScope {
    /// `AmazonSageMakerFullAccess` plus inline grants for logs, metrics,
    /// the artifact bucket and the image repository
    #[default]
    Managed,
    /// Only the actions the endpoint needs, on the narrowest resources
    LeastPrivilege,
}

/// Whether the model artifact bucket already exists or is created by the stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketMode {
    #[default]
    Existing,
    Provisioned,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// HuggingFace model id, e.g. "distilbert-base-uncased-finetuned-sst-2-english"
    pub name: String,
    pub task: String,
    pub workers_per_model: u32,

    /// Extra container environment, merged over the HF_* variables
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            task: default_task(),
            workers_per_model: 1,
            environment: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ImageSettings {
    pub repository: String,
    pub tag: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            repository: default_repository(),
            tag: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ArtifactSettings {
    pub mode: BucketMode,

    /// Required for `existing`; for `provisioned` the name is generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Object key of the packaged model; defaults to `<model name>.tar.gz`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Local archive uploaded into a provisioned bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EndpointSettings {
    pub name: String,
    pub variant_name: String,
    pub instance_type: String,
    pub initial_instance_count: u32,
    pub initial_variant_weight: f64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            name: default_endpoint_name(),
            variant_name: default_variant_name(),
            instance_type: default_instance_type(),
            initial_instance_count: 1,
            initial_variant_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    pub enabled: bool,
    pub stage_name: String,
    pub tracing_enabled: bool,
    pub metrics_enabled: bool,
    pub cors: bool,

    /// Path part of the POST route; defaults to the model name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            stage_name: default_stage_name(),
            tracing_enabled: true,
            metrics_enabled: true,
            cors: true,
            route: None,
        }
    }
}

impl DeployConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(region) = std::env::var("HF_STACK_REGION") {
            config.region = region;
        }
        if let Ok(model_name) = std::env::var("HF_STACK_MODEL_NAME") {
            config.model.name = model_name;
        }
        if let Ok(tag) = std::env::var("HF_STACK_IMAGE_TAG") {
            config.image.tag = tag;
        }
        if let Ok(instance_type) = std::env::var("HF_STACK_INSTANCE_TYPE") {
            config.endpoint.instance_type = instance_type;
        }
        if let Ok(enabled) = std::env::var("HF_STACK_GATEWAY_ENABLED") {
            config.gateway.enabled = enabled
                .parse()
                .context("Invalid HF_STACK_GATEWAY_ENABLED value")?;
        }

        Ok(config)
    }

    /// Check required fields and naming rules
    ///
    /// Region membership in the account table is checked by the composer,
    /// since the table itself depends on this configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.stack_name.is_empty() {
            return Err(ConfigurationError::MissingField { field: "stack_name" });
        }
        if !is_valid_stack_name(&self.stack_name) {
            return Err(invalid(
                "stack_name",
                format!(
                    "'{}' must start with a letter and contain only letters, digits and hyphens",
                    self.stack_name
                ),
            ));
        }

        if self.region.is_empty() {
            return Err(ConfigurationError::MissingField { field: "region" });
        }
        if self.model.name.is_empty() {
            return Err(ConfigurationError::MissingField { field: "model.name" });
        }
        if self.model.task.is_empty() {
            return Err(ConfigurationError::MissingField { field: "model.task" });
        }
        if self.model.workers_per_model == 0 {
            return Err(invalid("model.workers_per_model", "must be at least 1"));
        }
        if self.image.repository.is_empty() {
            return Err(ConfigurationError::MissingField {
                field: "image.repository",
            });
        }
        if self.image.tag.is_empty() {
            return Err(ConfigurationError::MissingField { field: "image.tag" });
        }

        self.validate_artifacts()?;
        self.validate_endpoint()?;

        if self.gateway.enabled {
            if self.gateway.stage_name.is_empty()
                || !self
                    .gateway
                    .stage_name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid(
                    "gateway.stage_name",
                    format!("'{}' is not a valid stage name", self.gateway.stage_name),
                ));
            }
            let route = self.route_path();
            if route.is_empty() || !route.chars().all(is_path_part_char) {
                return Err(invalid(
                    "gateway.route",
                    format!("'{}' is not a valid resource path part", route),
                ));
            }
        }

        for (region, account) in &self.regions {
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid(
                    "regions",
                    format!("account '{}' for region '{}' is not a 12-digit id", account, region),
                ));
            }
        }

        Ok(())
    }

    fn validate_artifacts(&self) -> ConfigResult<()> {
        match self.artifacts.mode {
            BucketMode::Existing => {
                if self.artifacts.bucket.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigurationError::MissingField {
                        field: "artifacts.bucket",
                    });
                }
            }
            BucketMode::Provisioned => {
                if self.artifacts.source.is_none() {
                    return Err(ConfigurationError::MissingField {
                        field: "artifacts.source",
                    });
                }
            }
        }

        if let Some(bucket) = &self.artifacts.bucket
            && !is_valid_bucket_name(bucket)
        {
            return Err(invalid(
                "artifacts.bucket",
                format!("'{}' is not a valid S3 bucket name", bucket),
            ));
        }

        if let Some(key) = &self.artifacts.key
            && (key.is_empty() || key.starts_with('/'))
        {
            return Err(invalid("artifacts.key", "must be a non-empty relative key"));
        }

        Ok(())
    }

    fn validate_endpoint(&self) -> ConfigResult<()> {
        let endpoint = &self.endpoint;

        if endpoint.name.is_empty() {
            return Err(ConfigurationError::MissingField {
                field: "endpoint.name",
            });
        }
        if !is_valid_sagemaker_name(&endpoint.name) {
            return Err(invalid(
                "endpoint.name",
                format!(
                    "'{}' must be at most 63 letters, digits or hyphens and start with a letter or digit",
                    endpoint.name
                ),
            ));
        }
        if !is_valid_sagemaker_name(&endpoint.variant_name) {
            return Err(invalid(
                "endpoint.variant_name",
                format!("'{}' is not a valid variant name", endpoint.variant_name),
            ));
        }
        if !endpoint.instance_type.starts_with("ml.") {
            return Err(invalid(
                "endpoint.instance_type",
                format!("'{}' is not a SageMaker instance type", endpoint.instance_type),
            ));
        }
        if endpoint.initial_instance_count == 0 {
            return Err(invalid("endpoint.initial_instance_count", "must be at least 1"));
        }
        if !endpoint.initial_variant_weight.is_finite() || endpoint.initial_variant_weight < 0.0 {
            return Err(invalid(
                "endpoint.initial_variant_weight",
                "must be a non-negative number",
            ));
        }

        Ok(())
    }

    /// Region table with this configuration's overrides applied
    pub fn region_table(&self) -> RegionTable {
        RegionTable::builtin().with_overrides(self.regions.clone())
    }

    /// Object key of the model archive
    pub fn artifact_key(&self) -> String {
        self.artifacts
            .key
            .clone()
            .unwrap_or_else(|| format!("{}.tar.gz", self.model.name))
    }

    /// Path part of the gateway route
    pub fn route_path(&self) -> String {
        self.gateway
            .route
            .clone()
            .unwrap_or_else(|| self.model.name.replace('/', "-"))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn is_valid_stack_name(name: &str) -> bool {
    name.len() <= 128
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_valid_sagemaker_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_valid_bucket_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
}

fn is_path_part_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

// Default functions
fn default_stack_name() -> String {
    "HuggingfaceAiDeploymentStack".to_string()
}
fn default_task() -> String {
    "text-classification".to_string()
}
fn default_repository() -> String {
    "huggingface-pytorch-inference".to_string()
}
fn default_endpoint_name() -> String {
    "HuggingFaceEndpoint".to_string()
}
fn default_variant_name() -> String {
    "HuggingFaceModel".to_string()
}
fn default_instance_type() -> String {
    "ml.m5.xlarge".to_string()
}
fn default_stage_name() -> String {
    "prod".to_string()
}
