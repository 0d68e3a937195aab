use serde::de::DeserializeOwned;
use std::path::Path;

use crate::dsl::ExtractionSchema;
use crate::error::{FlowError, FlowResult};
use crate::flow::ConditionalStep;

/// Reads schemas and control-flow steps from JSON or YAML
pub struct SchemaParser;

impl SchemaParser {
    /// Parse a schema from YAML string
    pub fn parse_yaml(yaml: &str) -> FlowResult<ExtractionSchema> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a schema from JSON string
    pub fn parse_json(json: &str) -> FlowResult<ExtractionSchema> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert a schema to YAML
    pub fn to_yaml(schema: &ExtractionSchema) -> FlowResult<String> {
        Ok(serde_yaml::to_string(schema)?)
    }

    /// Convert a schema to JSON
    pub fn to_json(schema: &ExtractionSchema) -> FlowResult<String> {
        Ok(serde_json::to_string_pretty(schema)?)
    }

    /// Parse a control-flow step from JSON or YAML text
    pub fn parse_step(text: &str) -> FlowResult<ConditionalStep> {
        parse_either(text)
    }

    /// Load a schema file; `.yaml`/`.yml` are read as YAML, everything else as JSON
    pub async fn load_schema<P: AsRef<Path>>(path: P) -> FlowResult<ExtractionSchema> {
        let path = path.as_ref();
        let content = read_file(path).await?;
        if is_yaml(path) {
            Self::parse_yaml(&content)
        } else {
            Self::parse_json(&content)
        }
    }

    /// Load any JSON or YAML document by file extension
    pub async fn load_document<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> FlowResult<T> {
        let path = path.as_ref();
        let content = read_file(path).await?;
        if is_yaml(path) {
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }
}

/// JSON is a subset of YAML, but JSON errors are more precise, so try it first.
fn parse_either<T: DeserializeOwned>(text: &str) -> FlowResult<T> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str(text).map_err(|yaml_err| FlowError::SchemaParsing {
            message: format!("not valid JSON ({}) or YAML ({})", json_err, yaml_err),
        }),
    }
}

async fn read_file(path: &Path) -> FlowResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| FlowError::FileSystem {
        path: format!("{}: {}", path.display(), e),
    })
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref(),
        Some("yaml") | Some("yml")
    )
}
