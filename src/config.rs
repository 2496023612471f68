use crate::dn::Dn;
use crate::schema::{AttributeType, ObjectClass, Schema, SyntaxPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    /// Naming contexts served by the in-memory backend (e.g. "dc=example,dc=com").
    #[serde(default)]
    pub suffixes: Vec<String>,
    /// Optional HTTP listen address for metrics and health (e.g. "0.0.0.0:9090"). Endpoints: GET /metrics (Prometheus), GET /health (liveness), GET /ready (readiness).
    pub metrics_listen: Option<String>,
    #[serde(default)]
    pub schema: SchemaSettings,
    #[serde(default)]
    pub import: ImportSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub url: String,
}

/// Additions to the built-in schema and the syntax enforcement level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSettings {
    /// accept, warn or reject values that violate their attribute syntax.
    #[serde(default)]
    pub syntax_enforcement: SyntaxPolicy,
    #[serde(default)]
    pub attribute_types: Vec<AttributeType>,
    #[serde(default)]
    pub object_classes: Vec<ObjectClass>,
}

/// LDIF loaded into the backend at startup (or by the `import` command).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    #[serde(default)]
    pub ldif_files: Vec<PathBuf>,
    pub reject_file: Option<PathBuf>,
    pub skip_file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub validate_schema: bool,
    #[serde(default)]
    pub include_branches: Vec<String>,
    #[serde(default)]
    pub exclude_branches: Vec<String>,
    /// RFC 4515 filters, e.g. "(objectClass=person)".
    #[serde(default)]
    pub include_filters: Vec<String>,
    #[serde(default)]
    pub exclude_filters: Vec<String>,
    #[serde(default)]
    pub include_attributes: Vec<String>,
    #[serde(default)]
    pub exclude_attributes: Vec<String>,
    #[serde(default = "default_true")]
    pub include_object_classes: bool,
    #[serde(default = "default_true")]
    pub invoke_import_plugins: bool,
    /// Attributes whose presence makes the reject-attributes plugin refuse an entry.
    #[serde(default)]
    pub reject_attributes: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            ldif_files: Vec::new(),
            reject_file: None,
            skip_file: None,
            validate_schema: true,
            include_branches: Vec::new(),
            exclude_branches: Vec::new(),
            include_filters: Vec::new(),
            exclude_filters: Vec::new(),
            include_attributes: Vec::new(),
            exclude_attributes: Vec::new(),
            include_object_classes: true,
            invoke_import_plugins: true,
            reject_attributes: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).context("Invalid YAML configuration")?;
        Ok(config)
    }

    /// Core schema plus the configured additions.
    pub fn build_schema(&self) -> Schema {
        let mut schema = Schema::core().with_syntax_policy(self.schema.syntax_enforcement);
        for attr_type in &self.schema.attribute_types {
            schema.add_attribute_type(attr_type.clone());
        }
        for object_class in &self.schema.object_classes {
            schema.add_object_class(object_class.clone());
        }
        schema
    }

    pub fn suffix_dns(&self) -> Result<Vec<Dn>> {
        self.suffixes
            .iter()
            .map(|s| Dn::parse(s).with_context(|| format!("Invalid suffix {}", s)))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig {
                url: "ldap://127.0.0.1:1389".to_string(),
            },
            suffixes: Vec::new(),
            metrics_listen: None,
            schema: SchemaSettings::default(),
            import: ImportSettings::default(),
        }
    }
}
